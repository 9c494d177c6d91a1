use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AgentResult;
use crate::perception::types::Frame;

/// One intended device input. Produced by a planner from the current
/// element set, consumed immediately by the channel, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Tap {
        x: i32,
        y: i32,
    },
    Swipe {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u64,
    },
    InputText {
        text: String,
    },
    KeyEvent {
        keycode: String,
    },
    /// Executed by the control loop itself; never reaches the device.
    Wait {
        ms: u64,
    },
}

impl Action {
    /// Short human-readable label for logs and step history.
    pub fn summary(&self) -> String {
        match self {
            Action::Tap { x, y } => format!("tap({x},{y})"),
            Action::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => format!("swipe(({x1},{y1})->({x2},{y2}),{duration_ms}ms)"),
            Action::InputText { text } => {
                let shown: String = text.chars().take(20).collect();
                if text.chars().count() > 20 {
                    format!("input_text(\"{shown}…\")")
                } else {
                    format!("input_text(\"{shown}\")")
                }
            }
            Action::KeyEvent { keycode } => format!("key({keycode})"),
            Action::Wait { ms } => format!("wait({ms}ms)"),
        }
    }
}

/// Connection to a single device: screen capture plus input injection.
/// All operations are physical-device I/O; `dispatch` is not idempotent.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    async fn capture_frame(&self) -> AgentResult<Frame>;
    async fn dispatch(&self, action: &Action) -> AgentResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries_are_compact() {
        assert_eq!(Action::Tap { x: 10, y: 20 }.summary(), "tap(10,20)");
        assert_eq!(
            Action::KeyEvent {
                keycode: "KEYCODE_BACK".into()
            }
            .summary(),
            "key(KEYCODE_BACK)"
        );
        assert_eq!(Action::Wait { ms: 500 }.summary(), "wait(500ms)");
    }

    #[test]
    fn long_text_is_truncated_in_summary() {
        let action = Action::InputText {
            text: "a very long piece of text to type".into(),
        };
        let summary = action.summary();
        assert!(summary.starts_with("input_text(\"a very long piece of"));
        assert!(summary.contains('…'));
    }
}
