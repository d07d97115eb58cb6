//! Cancellation and deadline plumbing for remote calls

use std::future::Future;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::DeployError;

/// Machine id reported for operations on a machine that has no id yet
pub const NEW_MACHINE_ID: &str = "<new>";

/// Why a bounded operation stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Canceled,
    TimedOut,
}

impl Interrupted {
    pub fn into_error(self, what: &str, machine_id: &str) -> DeployError {
        match self {
            Interrupted::Canceled => DeployError::Canceled {
                what: what.to_string(),
                machine_id: machine_id.to_string(),
            },
            Interrupted::TimedOut => DeployError::Timeout {
                what: what.to_string(),
                machine_id: machine_id.to_string(),
            },
        }
    }
}

/// Drive `fut` until it completes, `cancel` fires or `deadline` passes.
/// Cancellation wins over the deadline when both are ready.
pub async fn run_until<F>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Canceled),
        _ = expired => Err(Interrupted::TimedOut),
        out = fut => Ok(out),
    }
}
