//! A machine handle guarded by a lease

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use machines_api::{LaunchMachineInput, Machine, MachineEvent, MachineState};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::MachinesApi;
use crate::errors::{ApiError, DeployError};
use crate::machines::lease::Lease;
use crate::machines::wait::{run_until, Interrupted};
use crate::utils::{health_check_backoff, next_delay, poll_backoff};

/// Upper bound for the health poll interval when checks have shorter or no intervals
const MAX_HEALTH_POLL_BASE: Duration = Duration::from_secs(120);

/// Lease-aware operations on one machine
#[async_trait]
pub trait LeasableMachineExt: Send + Sync {
    /// Latest known snapshot of the machine
    fn machine(&self) -> &Machine;

    fn has_lease(&self) -> bool;

    /// Acquire a lease for `duration`, a no-op while one is already held
    async fn acquire_lease(
        &mut self,
        cancel: &CancellationToken,
        duration: Duration,
    ) -> Result<(), DeployError>;

    /// Release the lease. Local lease state is cleared even when the remote call fails.
    async fn release_lease(&mut self, cancel: &CancellationToken) -> Result<(), DeployError>;

    /// Update the machine under the held lease
    async fn update(
        &mut self,
        cancel: &CancellationToken,
        input: LaunchMachineInput,
    ) -> Result<(), DeployError>;

    /// Destroy the machine under the held lease
    async fn destroy(&mut self, cancel: &CancellationToken) -> Result<(), DeployError>;

    /// Start the machine; refused while a lease is held
    async fn start(&mut self, cancel: &CancellationToken) -> Result<(), DeployError>;

    async fn wait_for_state(
        &self,
        cancel: &CancellationToken,
        state: MachineState,
        timeout: Duration,
    ) -> Result<(), DeployError>;

    async fn wait_for_healthchecks_to_pass(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), DeployError>;

    /// Wait for an `event_type` event that follows the latest `after_type` event
    async fn wait_for_event_type_after_type(
        &mut self,
        cancel: &CancellationToken,
        event_type: &str,
        after_type: &str,
        timeout: Duration,
    ) -> Result<MachineEvent, DeployError>;
}

/// Control plane backed leasable machine
pub struct LeasableMachine {
    api: Arc<dyn MachinesApi>,
    machine: Machine,
    lease: Lease,
}

impl LeasableMachine {
    pub fn new(api: Arc<dyn MachinesApi>, machine: Machine) -> Self {
        Self {
            api,
            machine,
            lease: Lease::default(),
        }
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    fn id(&self) -> &str {
        &self.machine.id
    }

    fn held_nonce(&self) -> Result<String, DeployError> {
        if !self.has_lease() {
            return Err(DeployError::Precondition(format!(
                "no current lease for machine {}",
                self.id()
            )));
        }
        Ok(self.lease.nonce().to_string())
    }
}

#[async_trait]
impl LeasableMachineExt for LeasableMachine {
    fn machine(&self) -> &Machine {
        &self.machine
    }

    fn has_lease(&self) -> bool {
        self.lease.is_held()
    }

    async fn acquire_lease(
        &mut self,
        cancel: &CancellationToken,
        duration: Duration,
    ) -> Result<(), DeployError> {
        if self.has_lease() {
            return Ok(());
        }

        let id = self.machine.id.clone();
        let ttl_secs = duration.as_secs().max(1);
        let response = run_until(cancel, None, self.api.acquire_lease(&id, ttl_secs))
            .await
            .map_err(|i| i.into_error("lease", &id))?
            .map_err(|e| DeployError::Lease {
                machine_id: id.clone(),
                message: e.to_string(),
            })?;

        self.lease = Lease::from_response(&id, response)?;
        debug!(
            "Acquired lease on machine {} until {:?}",
            id,
            self.lease.expires_at()
        );
        Ok(())
    }

    async fn release_lease(&mut self, cancel: &CancellationToken) -> Result<(), DeployError> {
        if self.lease.nonce().is_empty() {
            self.lease.clear();
            return Ok(());
        }

        // Already dropped by the control plane, releasing it would only error
        if self.lease.is_stale_at(Utc::now()) {
            debug!("Lease on machine {} already expired, dropping it", self.id());
            self.lease.clear();
            return Ok(());
        }

        let id = self.machine.id.clone();
        let nonce = self.lease.nonce().to_string();
        let expires_at = self.lease.expires_at();
        let result = run_until(cancel, None, self.api.release_lease(&id, &nonce)).await;
        self.lease.clear();

        match result {
            Ok(Ok(())) => {
                debug!("Released lease on machine {}", id);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(
                    "failed to release lease for machine {} (expires at {:?}): {}",
                    id, expires_at, e
                );
                Err(DeployError::Lease {
                    machine_id: id,
                    message: e.to_string(),
                })
            }
            Err(interrupted) => {
                let err = interrupted.into_error("lease release", &id);
                warn!("failed to release lease for machine {}: {}", id, err);
                Err(err)
            }
        }
    }

    async fn update(
        &mut self,
        cancel: &CancellationToken,
        input: LaunchMachineInput,
    ) -> Result<(), DeployError> {
        let nonce = self.held_nonce()?;
        let id = self.machine.id.clone();

        let machine = run_until(cancel, None, self.api.update(input, &nonce))
            .await
            .map_err(|i| i.into_error("update", &id))??;
        self.machine = machine;
        Ok(())
    }

    async fn destroy(&mut self, cancel: &CancellationToken) -> Result<(), DeployError> {
        let nonce = self.held_nonce()?;
        let id = self.machine.id.clone();

        run_until(cancel, None, self.api.destroy(&id, &nonce))
            .await
            .map_err(|i| i.into_error("destroy", &id))??;
        self.lease.clear();
        self.machine.state = MachineState::Destroyed;
        Ok(())
    }

    async fn start(&mut self, cancel: &CancellationToken) -> Result<(), DeployError> {
        if self.has_lease() {
            return Err(DeployError::Precondition(format!(
                "cannot start machine {} because it has a lease expiring at {:?}",
                self.id(),
                self.lease.expires_at()
            )));
        }

        let id = self.machine.id.clone();
        info!("Starting machine {}", id);
        run_until(cancel, None, self.api.start(&id))
            .await
            .map_err(|i| i.into_error("start", &id))??;
        Ok(())
    }

    async fn wait_for_state(
        &self,
        cancel: &CancellationToken,
        state: MachineState,
        timeout: Duration,
    ) -> Result<(), DeployError> {
        let id = self.id();
        let what = format!("state {}", state);
        let deadline = Instant::now() + timeout;
        let mut backoff = poll_backoff();

        info!("Waiting for {} to have state: {}", id, state);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = run_until(
                cancel,
                Some(deadline),
                self.api.wait(&self.machine, state, remaining),
            )
            .await
            .map_err(|i| i.into_error(&what, id))?;

            match result {
                Ok(()) => {
                    info!("Machine {} has state: {}", id, state);
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    debug!("Retrying wait for machine {} to be {}: {}", id, state, e);
                }
                Err(e) => {
                    return Err(DeployError::Poll {
                        machine_id: id.to_string(),
                        source: e,
                    })
                }
            }

            let delay = next_delay(&mut backoff);
            run_until(cancel, Some(deadline), tokio::time::sleep(delay))
                .await
                .map_err(|i| i.into_error(&what, id))?;
        }
    }

    async fn wait_for_healthchecks_to_pass(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), DeployError> {
        if self.machine.config.checks.is_empty() {
            return Ok(());
        }

        let id = self.machine.id.clone();
        let what = "health checks to pass";
        let deadline = Instant::now() + timeout;
        let shortest = self
            .machine
            .config
            .shortest_check_interval()
            .map_or(MAX_HEALTH_POLL_BASE, |i| i.min(MAX_HEALTH_POLL_BASE));
        let mut backoff = health_check_backoff(shortest);
        let mut reported = false;

        loop {
            let fetched = run_until(cancel, Some(deadline), self.api.get(&id))
                .await
                .map_err(|i| i.into_error(what, &id))?;

            match fetched {
                Ok(machine) => {
                    let status = machine.health_check_status();
                    self.machine = machine;
                    if status.all_passing() {
                        info!(
                            "Machine {} is healthy: {}/{}",
                            id, status.passing, status.total
                        );
                        return Ok(());
                    }
                    if !reported {
                        info!(
                            "Waiting for {} to become healthy: {}/{}",
                            id, status.passing, status.total
                        );
                        reported = true;
                    } else {
                        debug!("Machine {} health checks: {}", id, status.summary());
                    }
                }
                Err(e) if e.is_transient() => {
                    debug!("Retrying health poll for machine {}: {}", id, e);
                }
                Err(e) => {
                    return Err(DeployError::Poll {
                        machine_id: id,
                        source: e,
                    })
                }
            }

            let delay = next_delay(&mut backoff);
            run_until(cancel, Some(deadline), tokio::time::sleep(delay))
                .await
                .map_err(|i| i.into_error(what, &id))?;
        }
    }

    async fn wait_for_event_type_after_type(
        &mut self,
        cancel: &CancellationToken,
        event_type: &str,
        after_type: &str,
        timeout: Duration,
    ) -> Result<MachineEvent, DeployError> {
        let id = self.machine.id.clone();
        let what = format!("{} event", event_type);
        let deadline = Instant::now() + timeout;
        let mut backoff = poll_backoff();

        info!("Waiting for {} to get {} event", id, event_type);
        loop {
            let fetched: Result<Machine, ApiError> =
                run_until(cancel, Some(deadline), self.api.get(&id))
                    .await
                    .map_err(|i| i.into_error(&what, &id))?;

            match fetched {
                Ok(machine) => {
                    let event = machine
                        .latest_event_of_type_after_type(event_type, after_type)
                        .cloned();
                    self.machine = machine;
                    if let Some(event) = event {
                        return Ok(event);
                    }
                }
                Err(e) if e.is_transient() => {
                    debug!("Retrying event poll for machine {}: {}", id, e);
                }
                Err(e) => {
                    return Err(DeployError::Poll {
                        machine_id: id,
                        source: e,
                    })
                }
            }

            let delay = next_delay(&mut backoff);
            run_until(cancel, Some(deadline), tokio::time::sleep(delay))
                .await
                .map_err(|i: Interrupted| i.into_error(&what, &id))?;
        }
    }
}
