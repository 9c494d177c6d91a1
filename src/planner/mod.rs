pub mod llm;
pub mod rules;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::traits::Action;
use crate::errors::AgentResult;
use crate::perception::types::{Element, Frame};

/// What the planner wants the loop to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Act {
        action: Action,
        /// Stable tag recorded in step history; lets a pure planner see
        /// which goal steps have already been dispatched.
        tag: String,
        reason: String,
    },
    GoalReached {
        summary: String,
    },
    GoalUnreachable {
        reason: String,
    },
}

/// One completed loop step, as the planner sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub tag: String,
    pub summary: String,
    pub ok: bool,
}

/// Everything a planner may look at for one decision. Coordinates in the
/// resulting action must derive from `elements`, which belong to `frame`.
pub struct PlanContext<'a> {
    pub goal: &'a Goal,
    pub frame: &'a Frame,
    pub elements: &'a [Element],
    pub history: &'a [StepRecord],
}

#[async_trait]
pub trait ActionPlanner: Send + Sync {
    async fn plan(&self, ctx: &PlanContext<'_>) -> AgentResult<Decision>;
}

/// Parsed task. `tap:` / `type:` / `key:` prefixes select a structured
/// goal; anything else is free text, treated as a tap label by the rule
/// planner, passed verbatim to the LLM planner.
#[derive(Debug, Clone, PartialEq)]
pub enum Goal {
    Tap { label: String },
    Type { label: Option<String>, text: String },
    Key { keycode: String },
    Freeform { task: String },
}

impl Goal {
    pub fn parse(input: &str) -> Goal {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix("tap:") {
            return Goal::Tap {
                label: rest.trim().to_string(),
            };
        }
        if let Some(rest) = input.strip_prefix("type:") {
            let (label, text) = match rest.split_once('=') {
                Some((l, t)) if !l.trim().is_empty() => (Some(l.trim().to_string()), t.to_string()),
                Some((_, t)) => (None, t.to_string()),
                None => (None, rest.to_string()),
            };
            return Goal::Type { label, text };
        }
        if let Some(rest) = input.strip_prefix("key:") {
            return Goal::Key {
                keycode: rest.trim().to_string(),
            };
        }
        Goal::Freeform {
            task: input.to_string(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Goal::Tap { label } => format!("tap '{label}'"),
            Goal::Type {
                label: Some(label),
                text,
            } => format!("type '{text}' into '{label}'"),
            Goal::Type { label: None, text } => format!("type '{text}'"),
            Goal::Key { keycode } => format!("press {keycode}"),
            Goal::Freeform { task } => task.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tap_goal() {
        assert_eq!(
            Goal::parse("tap: Settings "),
            Goal::Tap {
                label: "Settings".into()
            }
        );
    }

    #[test]
    fn parses_type_goal_with_field() {
        assert_eq!(
            Goal::parse("type:Search=rust crates"),
            Goal::Type {
                label: Some("Search".into()),
                text: "rust crates".into()
            }
        );
    }

    #[test]
    fn parses_type_goal_without_field() {
        assert_eq!(
            Goal::parse("type:=hello"),
            Goal::Type {
                label: None,
                text: "hello".into()
            }
        );
        assert_eq!(
            Goal::parse("type:hello"),
            Goal::Type {
                label: None,
                text: "hello".into()
            }
        );
    }

    #[test]
    fn parses_key_goal() {
        assert_eq!(
            Goal::parse("key:KEYCODE_HOME"),
            Goal::Key {
                keycode: "KEYCODE_HOME".into()
            }
        );
    }

    #[test]
    fn bare_text_is_freeform() {
        assert_eq!(
            Goal::parse("open the settings app"),
            Goal::Freeform {
                task: "open the settings app".into()
            }
        );
    }
}
