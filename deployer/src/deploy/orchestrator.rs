//! Machine deployment orchestration

use std::sync::Arc;
use std::time::Duration;

use machines_api::{Machine, MachineState, PROCESS_GROUP_APP};
use release_api::CreateReleaseInput;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{MachinesApi, ReleaseBackend};
use crate::app::options::DeployOptions;
use crate::deploy::launch_input::{LaunchInputResolver, ReleaseInfo};
use crate::deploy::release_command::{ReleaseCommandOptions, ReleaseCommandRunner};
use crate::deploy::strategy::Strategy;
use crate::deploy::volumes::VolumePool;
use crate::errors::DeployError;
use crate::machines::wait::{run_until, NEW_MACHINE_ID};
use crate::machines::{LeasableMachine, LeasableMachineExt, MachineSet};
use crate::models::AppConfig;

/// Platform recorded on every release made by this tool
pub const RELEASE_PLATFORM_VERSION: &str = "machines";

/// Rolls a release out over an app's machines
pub struct MachineDeployment {
    api: Arc<dyn MachinesApi>,
    app_name: String,
    strategy: Strategy,
    skip_health_checks: bool,
    wait_timeout: Duration,
    lease_timeout: Duration,
    release: ReleaseInfo,
    resolver: LaunchInputResolver,
    machine_set: MachineSet,
    release_command: ReleaseCommandRunner,
}

impl MachineDeployment {
    /// Validate the options, discover the fleet and record the release
    pub async fn new(
        options: DeployOptions,
        mut app_config: AppConfig,
        api: Arc<dyn MachinesApi>,
        releases: &dyn ReleaseBackend,
    ) -> Result<Self, DeployError> {
        let image = options.image.clone().filter(|i| !i.trim().is_empty());
        match (&image, options.restart_only) {
            (Some(_), true) => {
                return Err(DeployError::Precondition(
                    "restart-only deployments can't specify an image".to_string(),
                ))
            }
            (None, false) => {
                return Err(DeployError::Precondition(
                    "an image is required unless restarting".to_string(),
                ))
            }
            _ => {}
        }

        app_config.apply_overrides(&options.env_from_flags, options.primary_region.as_deref())?;
        app_config.validate()?;

        let wait_timeout = options.effective_wait_timeout();
        let lease_timeout = options.effective_lease_timeout();
        info!(
            "Using wait timeout: {:?} lease timeout: {:?}",
            wait_timeout, lease_timeout
        );

        let strategy = Strategy::select(
            options.strategy.as_deref(),
            app_config.deploy_strategy(),
        )?;

        let (machines, release_command_machine) = api.list_app_machines().await?;
        validate_mounts(&machines)?;

        let volumes = if app_config.mounts.is_some() {
            VolumePool::new(api.list_volumes().await?)
        } else {
            VolumePool::default()
        };

        let image = match image {
            Some(image) => image,
            None => machines
                .first()
                .map(|m| m.config.image.clone())
                .unwrap_or_default(),
        };

        let release = releases
            .create_release(CreateReleaseInput {
                app_id: app_config.app_name.clone(),
                platform_version: RELEASE_PLATFORM_VERSION.to_string(),
                strategy: strategy.as_release_str(),
                image: image.clone(),
                definition: app_config.definition()?,
            })
            .await?;
        info!("Created release {} (v{})", release.id, release.version);
        let release = ReleaseInfo {
            id: release.id,
            version: release.version,
        };

        let release_command = ReleaseCommandRunner::new(
            api.clone(),
            ReleaseCommandOptions {
                command: app_config.release_command().map(str::to_string),
                restart_only: options.restart_only,
                wait_timeout,
                lease_timeout,
            },
            MachineSet::new(api.clone(), release_command_machine.into_iter().collect()),
        );

        let app_name = app_config.app_name.clone();
        let resolver = LaunchInputResolver::new(
            app_config,
            image,
            release.clone(),
            options.restart_only,
            volumes,
        );

        Ok(Self {
            machine_set: MachineSet::new(api.clone(), machines),
            api,
            app_name,
            strategy,
            skip_health_checks: options.skip_health_checks,
            wait_timeout,
            lease_timeout,
            release,
            resolver,
            release_command,
        })
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn release(&self) -> &ReleaseInfo {
        &self.release
    }

    pub fn machine_set(&self) -> &MachineSet {
        &self.machine_set
    }

    pub fn release_command(&self) -> &ReleaseCommandRunner {
        &self.release_command
    }

    /// Run the release command, then roll the release out over the fleet
    pub async fn deploy(&mut self, cancel: &CancellationToken) -> Result<(), DeployError> {
        if let Err(e) = self.release_command.run(&self.resolver, cancel).await {
            error!("release_command failed, aborting deployment: {}", e);
            return Err(e);
        }

        if self.machine_set.is_empty() {
            return self.create_one_machine(cancel).await;
        }

        self.machine_set
            .acquire_leases(cancel, self.lease_timeout)
            .await?;

        let result = self.update_existing_machines(cancel).await;

        if let Err(e) = self.machine_set.release_leases(cancel).await {
            warn!("error releasing leases on machines: {}", e);
        }
        result
    }

    async fn create_one_machine(&mut self, cancel: &CancellationToken) -> Result<(), DeployError> {
        info!("No machines in app {}, launching one new machine", self.app_name);

        let input = self
            .resolver
            .launch_input_for_launch(PROCESS_GROUP_APP, Vec::new())?;
        let machine = run_until(cancel, None, self.api.launch(input))
            .await
            .map_err(|i| i.into_error("launch", NEW_MACHINE_ID))??;
        info!("Created machine {}", machine.id);

        let mut machine = LeasableMachine::new(self.api.clone(), machine);
        self.wait_for_machine(&mut machine, cancel).await?;
        self.machine_set.push(Box::new(machine));

        info!("Finished launching new machines");
        Ok(())
    }

    async fn update_existing_machines(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        info!(
            "Updating {} machines of app {} with {} strategy",
            self.machine_set.len(),
            self.app_name,
            self.strategy
        );

        for index in 0..self.machine_set.len() {
            match self.update_machine(index, cancel).await {
                Ok(()) => {}
                Err(e) if self.strategy == Strategy::Immediate && !e.is_canceled() => {
                    warn!("Continuing after error: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        info!("Finished deploying");
        Ok(())
    }

    async fn update_machine(
        &mut self,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let machine = self
            .machine_set
            .get_machine_mut(index)
            .ok_or_else(|| DeployError::Internal(format!("no machine at index {}", index)))?;
        let orig = machine.machine().clone();
        let input = self.resolver.resolve(&orig)?;
        let skip_launch = input.skip_launch;

        if input.requires_replacement {
            info!("Replacing {} by new machine", orig.id);
            machine.destroy(cancel).await?;

            let mut input = input;
            input.id = None;
            let replacement = run_until(cancel, None, self.api.launch(input))
                .await
                .map_err(|i| i.into_error("launch", &orig.id))??;
            info!("Replaced {} by {}", orig.id, replacement.id);

            self.machine_set.replace(
                index,
                Box::new(LeasableMachine::new(self.api.clone(), replacement)),
            );
        } else {
            info!("Updating {}", orig.id);
            machine.update(cancel, input).await?;
        }

        if skip_launch {
            info!("Machine {} stays stopped until it is needed", orig.id);
            return Ok(());
        }

        let strategy = self.strategy;
        let skip_health_checks = self.skip_health_checks;
        let wait_timeout = self.wait_timeout;
        let machine = self
            .machine_set
            .get_machine_mut(index)
            .ok_or_else(|| DeployError::Internal(format!("no machine at index {}", index)))?;
        wait_for(machine.as_mut(), cancel, strategy, skip_health_checks, wait_timeout).await
    }

    async fn wait_for_machine(
        &self,
        machine: &mut dyn LeasableMachineExt,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        wait_for(
            machine,
            cancel,
            self.strategy,
            self.skip_health_checks,
            self.wait_timeout,
        )
        .await
    }
}

/// Wait for a machine to start and pass its checks, as far as the strategy asks for
async fn wait_for(
    machine: &mut dyn LeasableMachineExt,
    cancel: &CancellationToken,
    strategy: Strategy,
    skip_health_checks: bool,
    timeout: Duration,
) -> Result<(), DeployError> {
    if !strategy.waits_for_machines() {
        return Ok(());
    }

    machine
        .wait_for_state(cancel, MachineState::Started, timeout)
        .await?;

    if !skip_health_checks {
        machine.wait_for_healthchecks_to_pass(cancel, timeout).await?;
    }
    Ok(())
}

/// At most one mount per machine is supported
fn validate_mounts(machines: &[Machine]) -> Result<(), DeployError> {
    for machine in machines {
        if machine.config.mounts.len() > 1 {
            return Err(DeployError::ConfigResolution(format!(
                "error machine {} has {} mounts and expected 1",
                machine.id,
                machine.config.mounts.len()
            )));
        }
    }
    Ok(())
}
