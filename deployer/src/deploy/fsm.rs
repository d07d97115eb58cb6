//! Finite State Machine for the release command job

use serde::{Deserialize, Serialize};

/// Release job state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseJobState {
    /// No release command machine yet
    Absent,

    /// Machine left over from a previous deployment
    Existing,

    /// Machine created or updated with the current release
    Launched,

    /// Command is running
    Started,

    /// Machine stopped, exit code not inspected yet
    Stopped,

    /// Command exited with 0
    Succeeded,

    /// Command exited non-zero, or a step failed
    Failed,
}

/// Release job event
#[derive(Debug, Clone)]
pub enum ReleaseJobEvent {
    /// Machine created
    Launch,

    /// Existing machine updated
    Update,

    /// Machine reached `started`
    Start,

    /// Machine reached `stopped`
    Stop,

    /// Exit code read from the exit event
    Exit(i32),

    /// A step failed
    Fail(String),
}

/// Release job FSM
#[derive(Debug, Clone)]
pub struct ReleaseJobFsm {
    state: ReleaseJobState,
    error: Option<String>,
    exit_code: Option<i32>,
}

impl ReleaseJobFsm {
    /// Create a new FSM, `Existing` when a machine from a prior run is reused
    pub fn new(existing: bool) -> Self {
        Self {
            state: if existing {
                ReleaseJobState::Existing
            } else {
                ReleaseJobState::Absent
            },
            error: None,
            exit_code: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &ReleaseJobState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            ReleaseJobState::Succeeded | ReleaseJobState::Failed
        )
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ReleaseJobEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (ReleaseJobState::Absent, ReleaseJobEvent::Launch) => ReleaseJobState::Launched,
            (ReleaseJobState::Existing, ReleaseJobEvent::Update) => ReleaseJobState::Launched,

            (ReleaseJobState::Launched, ReleaseJobEvent::Start) => ReleaseJobState::Started,

            (ReleaseJobState::Started, ReleaseJobEvent::Stop) => ReleaseJobState::Stopped,

            (ReleaseJobState::Stopped, ReleaseJobEvent::Exit(code)) => {
                self.exit_code = Some(*code);
                if *code == 0 {
                    ReleaseJobState::Succeeded
                } else {
                    self.error = Some(format!("exited with non-zero status of {}", code));
                    ReleaseJobState::Failed
                }
            }

            // Any step before the exit code is known may fail
            (state, ReleaseJobEvent::Fail(err))
                if !matches!(state, ReleaseJobState::Succeeded | ReleaseJobState::Failed) =>
            {
                self.error = Some(err.clone());
                ReleaseJobState::Failed
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

impl Default for ReleaseJobFsm {
    fn default() -> Self {
        Self::new(false)
    }
}
