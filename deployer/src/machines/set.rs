//! Fleet-wide lease handling

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use machines_api::Machine;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::MachinesApi;
use crate::errors::DeployError;
use crate::machines::leasable::{LeasableMachine, LeasableMachineExt};

/// Time allowed to release leases once the deployment has been canceled
pub const RELEASE_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Unordered collection of leasable machines
#[derive(Default)]
pub struct MachineSet {
    machines: Vec<Box<dyn LeasableMachineExt>>,
}

impl MachineSet {
    pub fn new(api: Arc<dyn MachinesApi>, machines: Vec<Machine>) -> Self {
        Self {
            machines: machines
                .into_iter()
                .map(|m| Box::new(LeasableMachine::new(api.clone(), m)) as Box<dyn LeasableMachineExt>)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn get_machines(&self) -> &[Box<dyn LeasableMachineExt>] {
        &self.machines
    }

    pub fn get_machine_mut(&mut self, index: usize) -> Option<&mut Box<dyn LeasableMachineExt>> {
        self.machines.get_mut(index)
    }

    pub fn push(&mut self, machine: Box<dyn LeasableMachineExt>) {
        self.machines.push(machine);
    }

    /// Swap the member at `index` for `machine`, returning the old member
    pub fn replace(
        &mut self,
        index: usize,
        machine: Box<dyn LeasableMachineExt>,
    ) -> Box<dyn LeasableMachineExt> {
        std::mem::replace(&mut self.machines[index], machine)
    }

    /// Acquire leases on every member concurrently. All or nothing: when any
    /// member fails, every lease is released again before returning.
    pub async fn acquire_leases(
        &mut self,
        cancel: &CancellationToken,
        duration: Duration,
    ) -> Result<(), DeployError> {
        let total = self.machines.len();
        let failures = {
            let mut tasks: FuturesUnordered<_> = self
                .machines
                .iter_mut()
                .map(|m| async move { m.acquire_lease(cancel, duration).await })
                .collect();

            let mut failures = Vec::new();
            while let Some(result) = tasks.next().await {
                if let Err(e) = result {
                    warn!("failed to acquire lease: {}", e);
                    failures.push(e);
                }
            }
            failures
        };

        if failures.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.release_leases(cancel).await {
            warn!("error releasing machine leases: {}", e);
        }
        Err(DeployError::FleetLease {
            failed: failures.len(),
            total,
            first: failures[0].to_string(),
        })
    }

    /// Release every member's lease concurrently. When `cancel` already fired,
    /// the releases run on a fresh token bounded by [`RELEASE_GRACE_PERIOD`].
    pub async fn release_leases(&mut self, cancel: &CancellationToken) -> Result<(), DeployError> {
        let was_canceled = cancel.is_cancelled();
        let grace_token = CancellationToken::new();
        let (token, deadline) = if was_canceled {
            info!(
                "detected canceled deployment and allowing {:?} to release machine leases",
                RELEASE_GRACE_PERIOD
            );
            (&grace_token, Some(Instant::now() + RELEASE_GRACE_PERIOD))
        } else {
            (cancel, None)
        };

        let failures = {
            let mut tasks: FuturesUnordered<_> = self
                .machines
                .iter_mut()
                .map(|m| async move {
                    match deadline {
                        Some(deadline) => {
                            let id = m.machine().id.clone();
                            tokio::time::timeout_at(deadline, m.release_lease(token))
                                .await
                                .unwrap_or_else(|_| {
                                    Err(DeployError::Timeout {
                                        what: "lease release".to_string(),
                                        machine_id: id,
                                    })
                                })
                        }
                        None => m.release_lease(token).await,
                    }
                })
                .collect();

            let mut failures = Vec::new();
            while let Some(result) = tasks.next().await {
                match result {
                    Err(e) if was_canceled && e.is_interrupted() => {}
                    Err(e) => {
                        warn!("failed to release lease: {}", e);
                        failures.push(e);
                    }
                    Ok(()) => {}
                }
            }
            failures
        };

        if failures.is_empty() {
            return Ok(());
        }
        Err(DeployError::FleetRelease {
            failed: failures.len(),
            first: failures[0].to_string(),
        })
    }
}
