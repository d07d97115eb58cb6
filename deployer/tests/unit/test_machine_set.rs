//! Machine set lease fan-out tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{machine, Call, FakeMachinesApi};
use machdeploy::errors::DeployError;
use machdeploy::machines::MachineSet;
use machines_api::MachineState;
use tokio_util::sync::CancellationToken;

const LEASE: Duration = Duration::from_secs(60);

fn fleet(ids: &[&str]) -> Arc<FakeMachinesApi> {
    Arc::new(FakeMachinesApi::new(
        ids.iter()
            .map(|id| machine(id, "app", MachineState::Started))
            .collect(),
    ))
}

fn machine_set(api: &Arc<FakeMachinesApi>) -> MachineSet {
    MachineSet::new(api.clone(), api.machines())
}

#[tokio::test]
async fn test_acquire_and_release_all() {
    let api = fleet(&["m1", "m2", "m3"]);
    let mut set = machine_set(&api);
    let cancel = CancellationToken::new();

    set.acquire_leases(&cancel, LEASE).await.unwrap();
    assert!(set.get_machines().iter().all(|m| m.has_lease()));
    assert_eq!(api.held_leases(), 3);

    set.release_leases(&cancel).await.unwrap();
    assert!(set.get_machines().iter().all(|m| !m.has_lease()));
    assert_eq!(api.held_leases(), 0);
}

#[tokio::test]
async fn test_acquire_is_all_or_nothing() {
    let api = fleet(&["m1", "m2", "m3"]);
    api.fail_lease_for("m2");
    let mut set = machine_set(&api);
    let cancel = CancellationToken::new();

    let err = set.acquire_leases(&cancel, LEASE).await.unwrap_err();
    match err {
        DeployError::FleetLease { failed, total, .. } => {
            assert_eq!(failed, 1);
            assert_eq!(total, 3);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(set.get_machines().iter().all(|m| !m.has_lease()));
    assert_eq!(api.held_leases(), 0);
    assert_eq!(api.count(|c| matches!(c, Call::ReleaseLease(_))), 2);
}

#[tokio::test]
async fn test_release_after_cancel_gets_grace_period() {
    let api = fleet(&["m1", "m2"]);
    let mut set = machine_set(&api);
    let cancel = CancellationToken::new();

    set.acquire_leases(&cancel, LEASE).await.unwrap();
    cancel.cancel();

    set.release_leases(&cancel).await.unwrap();
    assert_eq!(api.count(|c| matches!(c, Call::ReleaseLease(_))), 2);
    assert_eq!(api.held_leases(), 0);
}

#[tokio::test]
async fn test_acquire_canceled() {
    let api = fleet(&["m1"]);
    let mut set = machine_set(&api);
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(set.acquire_leases(&cancel, LEASE).await.is_err());
    assert_eq!(api.held_leases(), 0);
}

#[tokio::test]
async fn test_empty_set() {
    let api = fleet(&[]);
    let mut set = machine_set(&api);
    let cancel = CancellationToken::new();

    assert!(set.is_empty());
    set.acquire_leases(&cancel, LEASE).await.unwrap();
    set.release_leases(&cancel).await.unwrap();
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_release_failure_reported() {
    let api = fleet(&["m1", "m2", "m3"]);
    let mut set = machine_set(&api);
    let cancel = CancellationToken::new();

    set.acquire_leases(&cancel, LEASE).await.unwrap();
    api.fail_release_for("m2");

    let err = set.release_leases(&cancel).await.unwrap_err();
    match err {
        DeployError::FleetRelease { failed, first } => {
            assert_eq!(failed, 1);
            assert!(first.contains("m2"), "{first}");
        }
        other => panic!("unexpected error: {other}"),
    }

    // Local lease state is dropped even where the remote release failed
    assert!(set.get_machines().iter().all(|m| !m.has_lease()));
    assert_eq!(api.count(|c| matches!(c, Call::ReleaseLease(_))), 3);
    assert_eq!(api.held_leases(), 1);
}
