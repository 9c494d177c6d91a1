use crate::device::traits::Action;
use crate::errors::AgentError;
use crate::perception::types::{Element, Frame};

/// Lifecycle states of the control loop. Frame-bearing payloads move from
/// state to state, so an action can only ever reference elements of the
/// most recent capture; the frame is dropped when its iteration ends.
#[derive(Debug)]
pub enum LoopState {
    Idle,
    Capturing,
    Perceiving {
        frame: Frame,
    },
    Planning {
        frame: Frame,
        elements: Vec<Element>,
    },
    Acting {
        frame: Frame,
        action: Action,
        tag: String,
        reason: String,
    },
    Completed {
        summary: String,
    },
    Failed {
        error: AgentError,
    },
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Idle => "idle",
            LoopState::Capturing => "capturing",
            LoopState::Perceiving { .. } => "perceiving",
            LoopState::Planning { .. } => "planning",
            LoopState::Acting { .. } => "acting",
            LoopState::Completed { .. } => "completed",
            LoopState::Failed { .. } => "failed",
        }
    }
}

/// Terminal result of one run, mapped to the process exit code.
#[derive(Debug)]
pub enum Outcome {
    Completed { summary: String },
    GoalUnreachable { reason: String },
    Failed { error: AgentError },
    Cancelled,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Completed { .. } => 0,
            Outcome::GoalUnreachable { .. } => 2,
            Outcome::Failed { error } if error.is_device_fatal() => 3,
            Outcome::Failed { .. } => 1,
            Outcome::Cancelled => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_outcomes() {
        assert_eq!(
            Outcome::Completed {
                summary: String::new()
            }
            .exit_code(),
            0
        );
        assert_eq!(
            Outcome::GoalUnreachable {
                reason: String::new()
            }
            .exit_code(),
            2
        );
        assert_eq!(
            Outcome::Failed {
                error: AgentError::StepLimit(15)
            }
            .exit_code(),
            1
        );
        assert_eq!(
            Outcome::Failed {
                error: AgentError::DeviceUnavailable("none".into())
            }
            .exit_code(),
            3
        );
        assert_eq!(
            Outcome::Failed {
                error: AgentError::DeviceDisconnected("offline".into())
            }
            .exit_code(),
            3
        );
        assert_eq!(Outcome::Cancelled.exit_code(), 130);
    }
}
