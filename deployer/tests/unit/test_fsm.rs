//! FSM unit tests

use oci_lxc_deployer::deploy::fsm::{ExecutionFsm, ExecutionState, StepEvent};

#[test]
fn test_fsm_initial_state() {
    let fsm = ExecutionFsm::new();
    assert_eq!(fsm.state(), &ExecutionState::Pending);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.commands_completed(), 0);
}

#[test]
fn test_fsm_command_flow() {
    let mut fsm = ExecutionFsm::new();

    // Pending -> Dispatching -> Streaming -> Pending
    fsm.process(StepEvent::Dispatch).unwrap();
    assert_eq!(fsm.state(), &ExecutionState::Dispatching);
    fsm.process(StepEvent::Output).unwrap();
    fsm.process(StepEvent::Output).unwrap();
    assert_eq!(fsm.state(), &ExecutionState::Streaming);
    fsm.process(StepEvent::CommandDone).unwrap();
    assert_eq!(fsm.state(), &ExecutionState::Pending);

    // A command without output
    fsm.process(StepEvent::Dispatch).unwrap();
    fsm.process(StepEvent::CommandDone).unwrap();
    assert_eq!(fsm.commands_completed(), 2);

    fsm.process(StepEvent::Finish).unwrap();
    assert_eq!(fsm.state(), &ExecutionState::Completed);
}

#[test]
fn test_fsm_resume_flow() {
    let mut fsm = ExecutionFsm::new();

    fsm.process(StepEvent::Resume).unwrap();
    assert_eq!(fsm.state(), &ExecutionState::Resuming);

    fsm.process(StepEvent::Dispatch).unwrap();
    assert_eq!(fsm.state(), &ExecutionState::Dispatching);
}

#[test]
fn test_fsm_failure_flow() {
    let mut fsm = ExecutionFsm::new();

    fsm.process(StepEvent::Dispatch).unwrap();
    fsm.process(StepEvent::Output).unwrap();
    fsm.process(StepEvent::Fail("exit 1".to_string())).unwrap();

    assert_eq!(fsm.state(), &ExecutionState::Failed);
    assert_eq!(fsm.error(), Some("exit 1"));
    assert!(fsm.is_terminal());
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = ExecutionFsm::new();

    // Cannot finish a command that was never dispatched
    assert!(fsm.process(StepEvent::CommandDone).is_err());
    assert!(fsm.process(StepEvent::Output).is_err());

    fsm.process(StepEvent::Finish).unwrap();
    assert!(fsm.process(StepEvent::Dispatch).is_err());
    assert!(fsm.process(StepEvent::Fail("late".to_string())).is_err());
}

#[test]
fn test_fsm_reset_after_failure() {
    let mut fsm = ExecutionFsm::new();

    fsm.process(StepEvent::Dispatch).unwrap();
    fsm.process(StepEvent::CommandDone).unwrap();
    fsm.process(StepEvent::Dispatch).unwrap();
    fsm.process(StepEvent::Fail("error".to_string())).unwrap();

    fsm.process(StepEvent::Reset).unwrap();
    assert_eq!(fsm.state(), &ExecutionState::Pending);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.commands_completed(), 0);
}
