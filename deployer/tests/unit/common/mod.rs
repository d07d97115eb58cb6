//! In-memory control plane and release service for tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use machdeploy::api::{MachinesApi, ReleaseBackend};
use machdeploy::errors::ApiError;
use machdeploy::http::machines::split_release_command_machine;
use machines_api::{
    CheckState, CheckStatus, ExitEvent, LaunchMachineInput, LeaseData, LeaseResponse, Machine,
    MachineCheck, MachineConfig, MachineEvent, MachineEventRequest, MachineState, Volume,
    METADATA_KEY_PLATFORM_VERSION, METADATA_KEY_PROCESS_GROUP, PLATFORM_VERSION_V2,
    PROCESS_GROUP_RELEASE_COMMAND,
};
use release_api::{CreateReleaseInput, Release};

/// Remote call seen by the fake control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Launch(String),
    Update(String),
    Destroy(String),
    Get(String),
    AcquireLease(String),
    ReleaseLease(String),
    Start(String),
    Wait(String, MachineState),
    ListMachines,
    ListVolumes,
}

#[derive(Default)]
struct FakeState {
    machines: BTreeMap<String, Machine>,
    leases: HashMap<String, String>,
    volumes: Vec<Volume>,
    calls: Vec<Call>,
    fail_update: HashSet<String>,
    fail_lease: HashSet<String>,
    fail_release: HashSet<String>,
    fail_get: HashMap<String, u16>,
    failing_check_polls: HashMap<String, u32>,
    lease_expiry_offset_secs: Option<i64>,
    release_exit_code: i32,
    next_id: u32,
    clock: i64,
}

impl FakeState {
    /// Strictly increasing event timestamps
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        DateTime::<Utc>::from_timestamp(1_700_000_000 + self.clock, 0).unwrap_or_default()
    }

    /// Release command machines run their command right away
    fn run_release_command(&mut self, id: &str) {
        let exit_code = self.release_exit_code;
        let start = self.tick();
        let exit = self.tick();
        if let Some(machine) = self.machines.get_mut(id) {
            machine.state = MachineState::Stopped;
            machine.events.push(event("start", start, None));
            machine.events.push(event("exit", exit, Some(exit_code)));
        }
    }
}

fn event(event_type: &str, timestamp: DateTime<Utc>, exit_code: Option<i32>) -> MachineEvent {
    MachineEvent {
        event_type: event_type.to_string(),
        status: String::new(),
        source: "flyd".to_string(),
        timestamp,
        request: exit_code.map(|exit_code| MachineEventRequest {
            exit_event: Some(ExitEvent {
                exit_code,
                ..Default::default()
            }),
            monitor_event: None,
        }),
    }
}

fn passing_checks(config: &MachineConfig) -> Vec<CheckStatus> {
    config
        .checks
        .keys()
        .map(|name| CheckStatus {
            name: name.clone(),
            status: CheckState::Passing,
            output: String::new(),
            updated_at: None,
        })
        .collect()
}

/// A platform machine in `group`
pub fn machine(id: &str, group: &str, state: MachineState) -> Machine {
    let mut metadata = BTreeMap::new();
    metadata.insert(
        METADATA_KEY_PLATFORM_VERSION.to_string(),
        PLATFORM_VERSION_V2.to_string(),
    );
    metadata.insert(METADATA_KEY_PROCESS_GROUP.to_string(), group.to_string());

    Machine {
        id: id.to_string(),
        state,
        region: "ord".to_string(),
        instance_id: format!("{}-1", id),
        config: MachineConfig {
            image: "registry/web:v1".to_string(),
            metadata,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// A platform machine in the app group with one passing check polled every `interval_secs`
pub fn machine_with_check(id: &str, interval_secs: u64) -> Machine {
    let mut machine = machine(id, "app", MachineState::Started);
    machine.config.checks.insert(
        "alive".to_string(),
        MachineCheck {
            check_type: Some("http".to_string()),
            interval_secs: Some(interval_secs),
            ..Default::default()
        },
    );
    machine.checks = passing_checks(&machine.config);
    machine
}

/// Fake control plane
#[derive(Default)]
pub struct FakeMachinesApi {
    state: Mutex<FakeState>,
}

impl FakeMachinesApi {
    pub fn new(machines: Vec<Machine>) -> Self {
        let api = Self::default();
        {
            let mut state = api.state.lock().unwrap();
            for machine in machines {
                state.machines.insert(machine.id.clone(), machine);
            }
        }
        api
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Ids of machines an update was attempted on, in order
    pub fn update_attempts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| wanted(c)).count()
    }

    pub fn fail_update_for(&self, id: &str) {
        self.state.lock().unwrap().fail_update.insert(id.to_string());
    }

    pub fn fail_lease_for(&self, id: &str) {
        self.state.lock().unwrap().fail_lease.insert(id.to_string());
    }

    /// Grant leases that expire `offset_secs` from now instead of after their ttl
    /// Make releasing the lease on `id` fail with a server error
    pub fn fail_release_for(&self, id: &str) {
        self.state.lock().unwrap().fail_release.insert(id.to_string());
    }

    /// Make fetching `id` fail with `status`
    pub fn fail_get_for(&self, id: &str, status: u16) {
        self.state.lock().unwrap().fail_get.insert(id.to_string(), status);
    }

    /// Report every check of `id` as critical for the next `polls` fetches
    pub fn fail_checks_for(&self, id: &str, polls: u32) {
        self.state
            .lock()
            .unwrap()
            .failing_check_polls
            .insert(id.to_string(), polls);
    }

    pub fn set_lease_expiry_offset(&self, offset_secs: i64) {
        self.state.lock().unwrap().lease_expiry_offset_secs = Some(offset_secs);
    }

    pub fn set_release_exit_code(&self, code: i32) {
        self.state.lock().unwrap().release_exit_code = code;
    }

    pub fn add_volume(&self, volume: Volume) {
        self.state.lock().unwrap().volumes.push(volume);
    }

    pub fn machine(&self, id: &str) -> Option<Machine> {
        self.state.lock().unwrap().machines.get(id).cloned()
    }

    pub fn machines(&self) -> Vec<Machine> {
        self.state.lock().unwrap().machines.values().cloned().collect()
    }

    pub fn held_leases(&self) -> usize {
        self.state.lock().unwrap().leases.len()
    }
}

fn not_found(id: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        message: format!("machine {} not found", id),
    }
}

#[async_trait]
impl MachinesApi for FakeMachinesApi {
    async fn launch(&self, input: LaunchMachineInput) -> Result<Machine, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("new-{}", state.next_id);
        state.calls.push(Call::Launch(id.clone()));

        let release_command = input.config.process_group() == PROCESS_GROUP_RELEASE_COMMAND;
        let machine = Machine {
            id: id.clone(),
            state: MachineState::Started,
            region: input.region.clone(),
            instance_id: format!("{}-1", id),
            checks: passing_checks(&input.config),
            config: input.config,
            ..Default::default()
        };
        state.machines.insert(id.clone(), machine);
        if release_command {
            state.run_release_command(&id);
        }
        state.machines.get(&id).cloned().ok_or_else(|| not_found(&id))
    }

    async fn update(
        &self,
        input: LaunchMachineInput,
        lease_nonce: &str,
    ) -> Result<Machine, ApiError> {
        let mut state = self.state.lock().unwrap();
        let id = input.id.clone().unwrap_or_default();
        state.calls.push(Call::Update(id.clone()));

        if state.fail_update.contains(&id) {
            return Err(ApiError::Status {
                status: 422,
                message: "invalid config".to_string(),
            });
        }
        if state.leases.get(&id).map(String::as_str) != Some(lease_nonce) {
            return Err(ApiError::Status {
                status: 412,
                message: "lease nonce mismatch".to_string(),
            });
        }

        let release_command = input.config.process_group() == PROCESS_GROUP_RELEASE_COMMAND;
        let machine = state.machines.get_mut(&id).ok_or_else(|| not_found(&id))?;
        machine.checks = passing_checks(&input.config);
        machine.config = input.config;
        machine.instance_id = format!("{}-2", id);
        if !input.skip_launch {
            machine.state = MachineState::Started;
        }
        if release_command {
            state.run_release_command(&id);
        }
        state.machines.get(&id).cloned().ok_or_else(|| not_found(&id))
    }

    async fn destroy(&self, machine_id: &str, lease_nonce: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Destroy(machine_id.to_string()));
        if state.leases.get(machine_id).map(String::as_str) != Some(lease_nonce) {
            return Err(ApiError::Status {
                status: 412,
                message: "lease nonce mismatch".to_string(),
            });
        }
        state.leases.remove(machine_id);
        state.machines.remove(machine_id);
        Ok(())
    }

    async fn get(&self, machine_id: &str) -> Result<Machine, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Get(machine_id.to_string()));
        if let Some(status) = state.fail_get.get(machine_id).copied() {
            return Err(ApiError::Status {
                status,
                message: format!("fetching machine {} failed", machine_id),
            });
        }

        let mut machine = state
            .machines
            .get(machine_id)
            .cloned()
            .ok_or_else(|| not_found(machine_id))?;
        if let Some(remaining) = state.failing_check_polls.get_mut(machine_id) {
            if *remaining > 0 {
                *remaining -= 1;
                for check in &mut machine.checks {
                    check.status = CheckState::Critical;
                }
            }
        }
        Ok(machine)
    }

    async fn list_app_machines(&self) -> Result<(Vec<Machine>, Option<Machine>), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListMachines);
        Ok(split_release_command_machine(
            state.machines.values().cloned().collect(),
        ))
    }

    async fn acquire_lease(
        &self,
        machine_id: &str,
        ttl_secs: u64,
    ) -> Result<LeaseResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::AcquireLease(machine_id.to_string()));
        if state.fail_lease.contains(machine_id) || state.leases.contains_key(machine_id) {
            return Err(ApiError::Status {
                status: 409,
                message: "machine is already leased".to_string(),
            });
        }

        let nonce = format!("nonce-{}", machine_id);
        state.leases.insert(machine_id.to_string(), nonce.clone());
        let offset = state.lease_expiry_offset_secs.unwrap_or(ttl_secs as i64);
        Ok(LeaseResponse {
            status: "success".to_string(),
            code: None,
            message: None,
            data: Some(LeaseData {
                nonce,
                expires_at: Utc::now().timestamp() + offset,
                owner: Some("test@example.com".to_string()),
            }),
        })
    }

    async fn release_lease(&self, machine_id: &str, nonce: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ReleaseLease(machine_id.to_string()));
        if state.fail_release.contains(machine_id) {
            return Err(ApiError::Status {
                status: 500,
                message: "lease release failed".to_string(),
            });
        }
        match state.leases.get(machine_id) {
            Some(held) if held == nonce => {
                state.leases.remove(machine_id);
                Ok(())
            }
            _ => Err(ApiError::Status {
                status: 404,
                message: "lease not found".to_string(),
            }),
        }
    }

    async fn start(&self, machine_id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Start(machine_id.to_string()));
        let machine = state
            .machines
            .get_mut(machine_id)
            .ok_or_else(|| not_found(machine_id))?;
        machine.state = MachineState::Started;
        Ok(())
    }

    async fn wait(
        &self,
        machine: &Machine,
        desired: MachineState,
        _timeout: Duration,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(Call::Wait(machine.id.clone(), desired));
        let current = state
            .machines
            .get(&machine.id)
            .ok_or_else(|| not_found(&machine.id))?;

        // The release command has already run through `started` by the time it is stopped
        let release_command = current.process_group() == PROCESS_GROUP_RELEASE_COMMAND;
        if current.state == desired || (release_command && desired == MachineState::Started) {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: 408,
                message: format!("machine still {}", current.state),
            })
        }
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListVolumes);
        Ok(state.volumes.clone())
    }
}

/// Fake release service recording every release it creates
#[derive(Default)]
pub struct FakeReleaseBackend {
    created: Mutex<Vec<CreateReleaseInput>>,
}

impl FakeReleaseBackend {
    pub fn created(&self) -> Vec<CreateReleaseInput> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleaseBackend for FakeReleaseBackend {
    async fn create_release(&self, input: CreateReleaseInput) -> Result<Release, ApiError> {
        let mut created = self.created.lock().unwrap();
        created.push(input);
        Ok(Release {
            id: format!("rel_{}", created.len()),
            version: created.len() as u64,
        })
    }
}
