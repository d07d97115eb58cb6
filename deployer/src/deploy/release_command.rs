//! One-shot release command run on a dedicated machine before the rollout

use std::sync::Arc;
use std::time::Duration;

use machines_api::{LaunchMachineInput, MachineRestart, MachineState, RestartPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::MachinesApi;
use crate::deploy::fsm::{ReleaseJobEvent, ReleaseJobFsm, ReleaseJobState};
use crate::deploy::launch_input::LaunchInputResolver;
use crate::errors::DeployError;
use crate::machines::wait::{run_until, NEW_MACHINE_ID};
use crate::machines::{LeasableMachine, MachineSet};

/// Marker set in the release command machine's environment
pub const ENV_RELEASE_COMMAND: &str = "RELEASE_COMMAND";

/// Release command runner settings
#[derive(Debug, Clone)]
pub struct ReleaseCommandOptions {
    /// Shell command, absent when none is configured
    pub command: Option<String>,

    /// Skip the command entirely
    pub restart_only: bool,

    /// Bound for each wait on the machine
    pub wait_timeout: Duration,

    /// Lease taken while updating a machine from a prior run
    pub lease_timeout: Duration,
}

/// Runs the release command and gates the rollout on its exit code
pub struct ReleaseCommandRunner {
    api: Arc<dyn MachinesApi>,
    options: ReleaseCommandOptions,
    machine: MachineSet,
    fsm: ReleaseJobFsm,
}

impl ReleaseCommandRunner {
    /// `machine` holds the release command machine of a prior run, if any
    pub fn new(api: Arc<dyn MachinesApi>, options: ReleaseCommandOptions, machine: MachineSet) -> Self {
        let fsm = ReleaseJobFsm::new(!machine.is_empty());
        Self {
            api,
            options,
            machine,
            fsm,
        }
    }

    pub fn machine_set(&self) -> &MachineSet {
        &self.machine
    }

    pub fn state(&self) -> &ReleaseJobState {
        self.fsm.state()
    }

    fn command(&self) -> Option<String> {
        self.options
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    }

    /// Run the command to completion. A non-zero exit code is an error.
    pub async fn run(
        &mut self,
        resolver: &LaunchInputResolver,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let Some(command) = self.command() else {
            return Ok(());
        };
        if self.options.restart_only {
            info!("Skipping release_command in restart-only mode");
            return Ok(());
        }

        let result = self.run_command(resolver, &command, cancel).await;
        if let Err(e) = &result {
            if !self.fsm.is_terminal() {
                let _ = self.fsm.process(ReleaseJobEvent::Fail(e.to_string()));
            }
        }
        result
    }

    async fn run_command(
        &mut self,
        resolver: &LaunchInputResolver,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        info!("Running release_command: {}", command);

        if self.machine.is_empty() {
            self.create(resolver, command, cancel).await.map_err(|e| {
                DeployError::release_command("error creating a release_command machine", e)
            })?;
        } else {
            self.update(resolver, command, cancel).await.map_err(|e| {
                DeployError::release_command("error updating release_command machine", e)
            })?;
        }

        let wait_timeout = self.options.wait_timeout;
        let machine = self
            .machine
            .get_machine_mut(0)
            .ok_or_else(|| DeployError::Internal("release_command machine missing".to_string()))?;
        let id = machine.machine().id.clone();

        machine
            .wait_for_state(cancel, MachineState::Started, wait_timeout)
            .await
            .map_err(|e| {
                DeployError::release_command(
                    format!("error waiting for release_command machine {} to start", id),
                    e,
                )
            })?;
        self.fsm.process(ReleaseJobEvent::Start).map_err(DeployError::Internal)?;

        let machine = self
            .machine
            .get_machine_mut(0)
            .ok_or_else(|| DeployError::Internal("release_command machine missing".to_string()))?;
        machine
            .wait_for_state(cancel, MachineState::Stopped, wait_timeout)
            .await
            .map_err(|e| {
                DeployError::release_command(
                    format!("error waiting for release_command machine {} to finish running", id),
                    e,
                )
            })?;
        self.fsm.process(ReleaseJobEvent::Stop).map_err(DeployError::Internal)?;

        let machine = self
            .machine
            .get_machine_mut(0)
            .ok_or_else(|| DeployError::Internal("release_command machine missing".to_string()))?;
        let exit_event = machine
            .wait_for_event_type_after_type(cancel, "exit", "start", wait_timeout)
            .await
            .map_err(|e| {
                DeployError::release_command(
                    format!("error finding the release_command machine {} exit event", id),
                    e,
                )
            })?;

        let exit_code = exit_event
            .request
            .as_ref()
            .and_then(|r| r.exit_code())
            .ok_or_else(|| {
                DeployError::release_command(
                    format!("error getting release_command machine {} exit code", id),
                    DeployError::Internal("no exit code found in exit event".to_string()),
                )
            })?;
        self.fsm
            .process(ReleaseJobEvent::Exit(exit_code))
            .map_err(DeployError::Internal)?;

        if exit_code != 0 {
            error!(
                "release_command machine {} exited with non-zero status of {}",
                id, exit_code
            );
            return Err(DeployError::ReleaseCommandFailed {
                machine_id: id,
                exit_code,
            });
        }

        info!("release_command {} completed successfully", id);
        Ok(())
    }

    async fn create(
        &mut self,
        resolver: &LaunchInputResolver,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let mut input = resolver.launch_input_for_release_command(None)?;
        apply_command_overrides(&mut input, command);

        let machine = run_until(cancel, None, self.api.launch(input))
            .await
            .map_err(|i| i.into_error("release_command launch", NEW_MACHINE_ID))??;
        info!("Created release_command machine {}", machine.id);

        self.machine
            .push(Box::new(LeasableMachine::new(self.api.clone(), machine)));
        self.fsm.process(ReleaseJobEvent::Launch).map_err(DeployError::Internal)
    }

    async fn update(
        &mut self,
        resolver: &LaunchInputResolver,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DeployError> {
        let wait_timeout = self.options.wait_timeout;
        let lease_timeout = self.options.lease_timeout;
        let machine = self
            .machine
            .get_machine_mut(0)
            .ok_or_else(|| DeployError::Internal("release_command machine missing".to_string()))?;

        // A prior run must finish before the machine is reused
        machine
            .wait_for_state(cancel, MachineState::Stopped, wait_timeout)
            .await?;

        let mut input = resolver.launch_input_for_release_command(Some(machine.machine()))?;
        apply_command_overrides(&mut input, command);

        self.machine.acquire_leases(cancel, lease_timeout).await?;
        let updated = match self.machine.get_machine_mut(0) {
            Some(machine) => machine.update(cancel, input).await,
            None => Err(DeployError::Internal("release_command machine missing".to_string())),
        };
        if let Err(e) = self.machine.release_leases(cancel).await {
            warn!("error releasing release_command machine lease: {}", e);
        }
        updated?;

        self.fsm.process(ReleaseJobEvent::Update).map_err(DeployError::Internal)
    }
}

/// Turn a resolved config into a one-shot job running `command`
fn apply_command_overrides(input: &mut LaunchMachineInput, command: &str) {
    let config = &mut input.config;
    config.init.cmd = Some(command.split_whitespace().map(str::to_string).collect());
    config.services.clear();
    config.checks.clear();
    config.restart = Some(MachineRestart {
        policy: RestartPolicy::No,
        max_retries: None,
    });
    config
        .env
        .entry(ENV_RELEASE_COMMAND.to_string())
        .or_insert_with(|| "1".to_string());
}
