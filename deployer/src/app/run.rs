//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{MachinesApi, ReleaseBackend};
use crate::app::options::DeployOptions;
use crate::deploy::MachineDeployment;
use crate::errors::DeployError;
use crate::http::{HttpClient, MachinesClient};
use crate::models::AppConfig;
use crate::storage::Settings;

/// Deploy `app_config` with the remote services configured in `settings`.
/// `shutdown_signal` cancels the deployment; leases are still released.
pub async fn run(
    settings: &Settings,
    options: DeployOptions,
    app_config: AppConfig,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    let token = settings.access_token()?;
    let machines_http = HttpClient::new(&settings.control_plane.base_url, token.clone())?;
    let releases = HttpClient::new(&settings.release_backend.base_url, token)?;
    let api: Arc<dyn MachinesApi> =
        Arc::new(MachinesClient::new(machines_http, app_config.app_name.clone()));

    run_deployment(api, &releases, options, app_config, shutdown_signal).await
}

/// Build the deployment and drive it until it finishes or the signal fires
pub async fn run_deployment(
    api: Arc<dyn MachinesApi>,
    releases: &dyn ReleaseBackend,
    options: DeployOptions,
    app_config: AppConfig,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    let cancel = CancellationToken::new();
    tokio::pin!(shutdown_signal);

    let mut deployment = tokio::select! {
        result = MachineDeployment::new(options, app_config, api, releases) => result?,
        _ = &mut shutdown_signal => {
            warn!("Shutdown signal received before the deployment started");
            return Err(DeployError::Canceled {
                what: "deployment setup".to_string(),
                machine_id: String::new(),
            });
        }
    };

    info!(
        "Deploying release v{} with {} strategy",
        deployment.release().version,
        deployment.strategy()
    );

    let deploy = deployment.deploy(&cancel);
    tokio::pin!(deploy);

    tokio::select! {
        result = &mut deploy => result,
        _ = &mut shutdown_signal => {
            info!("Shutdown signal received, canceling deployment...");
            cancel.cancel();
            deploy.await
        }
    }
}
