use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No device available: {0}")]
    DeviceUnavailable(String),

    #[error("Device disconnected: {0}")]
    DeviceDisconnected(String),

    #[error("Screen capture failed: {0}")]
    Capture(String),

    #[error("Input dispatch failed: {0}")]
    Dispatch(String),

    #[error("Perception service unreachable: {0}")]
    PerceptionUnavailable(String),

    #[error("Perception call timed out after {0}s")]
    PerceptionTimeout(u64),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Step limit reached after {0} steps")]
    StepLimit(u32),

    #[error("Task cancelled")]
    Cancelled,
}

impl AgentError {
    /// Errors the control loop may retry within its bounded budget.
    /// Device disconnection is deliberately absent: once the device drops
    /// mid-run the input state is unknown and the loop must fail.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Capture(_)
                | AgentError::Dispatch(_)
                | AgentError::PerceptionUnavailable(_)
                | AgentError::PerceptionTimeout(_)
                | AgentError::LlmProvider(_)
        )
    }

    /// Fatal device-level errors get their own process exit code so a caller
    /// can tell "no device" apart from an ordinary failure.
    pub fn is_device_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::DeviceUnavailable(_) | AgentError::DeviceDisconnected(_)
        )
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(AgentError::Capture("i/o".into()).is_retryable());
        assert!(AgentError::Dispatch("i/o".into()).is_retryable());
        assert!(AgentError::PerceptionUnavailable("connection refused".into()).is_retryable());
        assert!(AgentError::PerceptionTimeout(30).is_retryable());
    }

    #[test]
    fn disconnection_is_never_retryable() {
        assert!(!AgentError::DeviceDisconnected("offline".into()).is_retryable());
        assert!(!AgentError::DeviceUnavailable("none".into()).is_retryable());
        assert!(AgentError::DeviceDisconnected("offline".into()).is_device_fatal());
    }
}
