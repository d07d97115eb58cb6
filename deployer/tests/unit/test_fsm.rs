//! Release job FSM unit tests

use machdeploy::deploy::fsm::{ReleaseJobEvent, ReleaseJobFsm, ReleaseJobState};

#[test]
fn test_fsm_initial_state() {
    let fsm = ReleaseJobFsm::new(false);
    assert_eq!(fsm.state(), &ReleaseJobState::Absent);
    assert!(fsm.error().is_none());
    assert!(fsm.exit_code().is_none());

    let fsm = ReleaseJobFsm::new(true);
    assert_eq!(fsm.state(), &ReleaseJobState::Existing);
}

#[test]
fn test_fsm_existing_machine_flow() {
    let mut fsm = ReleaseJobFsm::new(true);

    // Existing -> Launched
    fsm.process(ReleaseJobEvent::Update).unwrap();
    assert_eq!(fsm.state(), &ReleaseJobState::Launched);

    // Launched -> Started -> Stopped
    fsm.process(ReleaseJobEvent::Start).unwrap();
    fsm.process(ReleaseJobEvent::Stop).unwrap();
    assert_eq!(fsm.state(), &ReleaseJobState::Stopped);

    fsm.process(ReleaseJobEvent::Exit(0)).unwrap();
    assert_eq!(fsm.state(), &ReleaseJobState::Succeeded);
    assert_eq!(fsm.exit_code(), Some(0));
}

#[test]
fn test_fsm_non_zero_exit() {
    let mut fsm = ReleaseJobFsm::new(false);

    fsm.process(ReleaseJobEvent::Launch).unwrap();
    fsm.process(ReleaseJobEvent::Start).unwrap();
    fsm.process(ReleaseJobEvent::Stop).unwrap();
    fsm.process(ReleaseJobEvent::Exit(7)).unwrap();

    assert_eq!(fsm.state(), &ReleaseJobState::Failed);
    assert_eq!(fsm.exit_code(), Some(7));
    assert_eq!(fsm.error(), Some("exited with non-zero status of 7"));
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = ReleaseJobFsm::new(false);

    // Can't update a machine that doesn't exist
    assert!(fsm.process(ReleaseJobEvent::Update).is_err());

    // Can't read an exit code before the machine stopped
    fsm.process(ReleaseJobEvent::Launch).unwrap();
    assert!(fsm.process(ReleaseJobEvent::Exit(0)).is_err());
    assert_eq!(fsm.state(), &ReleaseJobState::Launched);

    // Can't start twice
    fsm.process(ReleaseJobEvent::Start).unwrap();
    assert!(fsm.process(ReleaseJobEvent::Start).is_err());
}
