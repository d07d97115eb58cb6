//! Leasable machine tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{machine, machine_with_check, Call, FakeMachinesApi};
use machdeploy::errors::{ApiError, DeployError};
use machdeploy::machines::{LeasableMachine, LeasableMachineExt};
use machines_api::{LaunchMachineInput, MachineState};
use tokio_util::sync::CancellationToken;

const LEASE: Duration = Duration::from_secs(60);

fn leasable(api: &Arc<FakeMachinesApi>, id: &str) -> LeasableMachine {
    let fetched = api.machine(id).unwrap();
    LeasableMachine::new(api.clone(), fetched)
}

fn update_input(id: &str) -> LaunchMachineInput {
    let mut input = LaunchMachineInput {
        id: Some(id.to_string()),
        region: "ord".to_string(),
        ..Default::default()
    };
    input.config.image = "registry/web:v2".to_string();
    input
}

#[tokio::test]
async fn test_update_requires_lease() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine("m1", "app", MachineState::Started)]));
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    let err = m1.update(&cancel, update_input("m1")).await.unwrap_err();
    assert!(matches!(err, DeployError::Precondition(_)));
    assert_eq!(api.update_attempts().len(), 0);

    m1.acquire_lease(&cancel, LEASE).await.unwrap();
    assert!(m1.has_lease());
    m1.update(&cancel, update_input("m1")).await.unwrap();
    assert_eq!(m1.machine().config.image, "registry/web:v2");
}

#[tokio::test]
async fn test_acquire_is_noop_while_held() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine("m1", "app", MachineState::Started)]));
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    m1.acquire_lease(&cancel, LEASE).await.unwrap();
    m1.acquire_lease(&cancel, LEASE).await.unwrap();
    assert_eq!(api.count(|c| matches!(c, Call::AcquireLease(_))), 1);
}

#[tokio::test]
async fn test_stale_lease_released_locally() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine("m1", "app", MachineState::Started)]));
    api.set_lease_expiry_offset(-10);
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    m1.acquire_lease(&cancel, LEASE).await.unwrap();
    assert!(!m1.has_lease());

    m1.release_lease(&cancel).await.unwrap();
    assert_eq!(api.count(|c| matches!(c, Call::ReleaseLease(_))), 0);
    assert!(m1.lease().nonce().is_empty());
}

#[tokio::test]
async fn test_live_lease_released_remotely() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine("m1", "app", MachineState::Started)]));
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    m1.acquire_lease(&cancel, LEASE).await.unwrap();
    m1.release_lease(&cancel).await.unwrap();

    assert_eq!(api.count(|c| matches!(c, Call::ReleaseLease(_))), 1);
    assert_eq!(api.held_leases(), 0);
    assert!(!m1.has_lease());
}

#[tokio::test]
async fn test_start_refused_while_leased() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine("m1", "app", MachineState::Stopped)]));
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    m1.acquire_lease(&cancel, LEASE).await.unwrap();
    let err = m1.start(&cancel).await.unwrap_err();
    assert!(matches!(err, DeployError::Precondition(_)));

    m1.release_lease(&cancel).await.unwrap();
    m1.start(&cancel).await.unwrap();
    assert_eq!(api.machine("m1").unwrap().state, MachineState::Started);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_state_times_out() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine("m1", "app", MachineState::Stopped)]));
    let m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    let err = m1
        .wait_for_state(&cancel, MachineState::Started, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Timeout { .. }));
    assert!(api.count(|c| matches!(c, Call::Wait(_, MachineState::Started))) > 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_state_canceled() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine("m1", "app", MachineState::Stopped)]));
    let m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    let canceler = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        canceler.cancel();
    });

    let err = m1
        .wait_for_state(&cancel, MachineState::Started, Duration::from_secs(60))
        .await
        .unwrap_err();
    assert!(err.is_canceled());
}

#[tokio::test]
async fn test_wait_for_healthchecks_without_checks() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine("m1", "app", MachineState::Started)]));
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    m1.wait_for_healthchecks_to_pass(&cancel, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(api.count(|c| matches!(c, Call::Get(_))), 0);
}

#[tokio::test]
async fn test_destroy_clears_lease() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine("m1", "app", MachineState::Started)]));
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    m1.acquire_lease(&cancel, LEASE).await.unwrap();
    m1.destroy(&cancel).await.unwrap();

    assert!(!m1.has_lease());
    assert_eq!(m1.machine().state, MachineState::Destroyed);
    assert!(api.machine("m1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_healthchecks_retries_until_passing() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine_with_check("m1", 2)]));
    api.fail_checks_for("m1", 2);
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    m1.wait_for_healthchecks_to_pass(&cancel, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(api.count(|c| matches!(c, Call::Get(_))), 3);
    assert!(m1.machine().health_check_status().all_passing());
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_healthchecks_times_out() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine_with_check("m1", 2)]));
    api.fail_checks_for("m1", u32::MAX);
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    let err = m1
        .wait_for_healthchecks_to_pass(&cancel, Duration::from_secs(10))
        .await
        .unwrap_err();
    match err {
        DeployError::Timeout { what, machine_id } => {
            assert_eq!(what, "health checks to pass");
            assert_eq!(machine_id, "m1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(api.count(|c| matches!(c, Call::Get(_))) > 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_healthchecks_stops_on_permanent_error() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine_with_check("m1", 2)]));
    api.fail_get_for("m1", 404);
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    let err = m1
        .wait_for_healthchecks_to_pass(&cancel, Duration::from_secs(60))
        .await
        .unwrap_err();
    match err {
        DeployError::Poll { machine_id, source } => {
            assert_eq!(machine_id, "m1");
            assert!(matches!(source, ApiError::Status { status: 404, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(api.count(|c| matches!(c, Call::Get(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_healthchecks_retries_transient_errors() {
    let api = Arc::new(FakeMachinesApi::new(vec![machine_with_check("m1", 2)]));
    api.fail_get_for("m1", 503);
    let mut m1 = leasable(&api, "m1");
    let cancel = CancellationToken::new();

    let err = m1
        .wait_for_healthchecks_to_pass(&cancel, Duration::from_secs(10))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Timeout { .. }));
    assert!(api.count(|c| matches!(c, Call::Get(_))) > 1);
}
