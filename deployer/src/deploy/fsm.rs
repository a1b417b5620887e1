//! Finite State Machine for command execution

use serde::{Deserialize, Serialize};

/// Execution state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    /// Between commands, or not started
    Pending,

    /// Restoring a checkpoint
    Resuming,

    /// A command has been handed to the transport
    Dispatching,

    /// A command is producing output
    Streaming,

    /// Every command succeeded
    Completed,

    /// A command failed
    Failed,
}

/// Event driving the execution state
#[derive(Debug, Clone)]
pub enum StepEvent {
    /// Restore from a checkpoint
    Resume,

    /// Send the next command
    Dispatch,

    /// Partial output arrived
    Output,

    /// The current command succeeded
    CommandDone,

    /// No commands left
    Finish,

    /// Execution error
    Fail(String),

    /// Reset to pending
    Reset,
}

/// Execution FSM
#[derive(Debug, Clone)]
pub struct ExecutionFsm {
    state: ExecutionState,
    error: Option<String>,
    commands_completed: u32,
}

impl ExecutionFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: ExecutionState::Pending,
            error: None,
            commands_completed: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Commands completed since the last reset
    pub fn commands_completed(&self) -> u32 {
        self.commands_completed
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ExecutionState::Completed | ExecutionState::Failed)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: StepEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // From Pending
            (ExecutionState::Pending, StepEvent::Resume) => ExecutionState::Resuming,
            (ExecutionState::Pending, StepEvent::Dispatch) => ExecutionState::Dispatching,
            (ExecutionState::Pending, StepEvent::Finish) => ExecutionState::Completed,

            // From Resuming
            (ExecutionState::Resuming, StepEvent::Dispatch) => ExecutionState::Dispatching,
            (ExecutionState::Resuming, StepEvent::Finish) => ExecutionState::Completed,

            // While a command runs
            (ExecutionState::Dispatching, StepEvent::Output)
            | (ExecutionState::Streaming, StepEvent::Output) => ExecutionState::Streaming,
            (ExecutionState::Dispatching, StepEvent::CommandDone)
            | (ExecutionState::Streaming, StepEvent::CommandDone) => {
                self.commands_completed += 1;
                ExecutionState::Pending
            }

            // Failures
            (ExecutionState::Completed, StepEvent::Fail(_))
            | (ExecutionState::Failed, StepEvent::Fail(_)) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", self.state, event));
            }
            (_, StepEvent::Fail(err)) => {
                self.error = Some(err.clone());
                ExecutionState::Failed
            }

            // From terminal states
            (ExecutionState::Failed, StepEvent::Reset)
            | (ExecutionState::Completed, StepEvent::Reset) => {
                self.error = None;
                self.commands_completed = 0;
                ExecutionState::Pending
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for ExecutionFsm {
    fn default() -> Self {
        Self::new()
    }
}
