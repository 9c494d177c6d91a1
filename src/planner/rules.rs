/// Deterministic planner driven by the goal grammar. `decide` is a pure
/// function of its inputs, so identical (goal, elements, history) always
/// yield the identical decision.
use async_trait::async_trait;

use crate::device::traits::Action;
use crate::errors::AgentResult;
use crate::perception::types::{Element, Frame};
use crate::planner::{ActionPlanner, Decision, Goal, PlanContext, StepRecord};

/// Tag used for exploratory scrolls while hunting an off-screen target.
const SCROLL_TAG: &str = "scroll";

pub struct RulePlanner {
    scroll_budget: u32,
}

impl RulePlanner {
    pub fn new(scroll_budget: u32) -> Self {
        Self { scroll_budget }
    }
}

#[async_trait]
impl ActionPlanner for RulePlanner {
    async fn plan(&self, ctx: &PlanContext<'_>) -> AgentResult<Decision> {
        Ok(decide(
            ctx.goal,
            ctx.frame,
            ctx.elements,
            ctx.history,
            self.scroll_budget,
        ))
    }
}

enum StepKind {
    TapLabel(String),
    InputText(String),
    Key(String),
}

struct GoalStep {
    tag: String,
    kind: StepKind,
}

/// Expand a goal into its ordered steps. Tags are stable across calls so
/// history lookups stay meaningful.
fn goal_steps(goal: &Goal) -> Vec<GoalStep> {
    match goal {
        Goal::Tap { label } => vec![GoalStep {
            tag: format!("tap:{label}"),
            kind: StepKind::TapLabel(label.clone()),
        }],
        Goal::Type { label, text } => {
            let mut steps = Vec::new();
            if let Some(label) = label {
                steps.push(GoalStep {
                    tag: format!("focus:{label}"),
                    kind: StepKind::TapLabel(label.clone()),
                });
            }
            steps.push(GoalStep {
                tag: format!("input:{text}"),
                kind: StepKind::InputText(text.clone()),
            });
            steps
        }
        Goal::Key { keycode } => vec![GoalStep {
            tag: format!("key:{keycode}"),
            kind: StepKind::Key(keycode.clone()),
        }],
        // Bare text is treated as a label to tap.
        Goal::Freeform { task } => vec![GoalStep {
            tag: format!("tap:{task}"),
            kind: StepKind::TapLabel(task.clone()),
        }],
    }
}

fn step_done(history: &[StepRecord], tag: &str) -> bool {
    history.iter().any(|r| r.tag == tag && r.ok)
}

pub fn decide(
    goal: &Goal,
    frame: &Frame,
    elements: &[Element],
    history: &[StepRecord],
    scroll_budget: u32,
) -> Decision {
    let steps = goal_steps(goal);
    let Some(step) = steps.iter().find(|s| !step_done(history, &s.tag)) else {
        return Decision::GoalReached {
            summary: format!("{}: all steps dispatched", goal.describe()),
        };
    };

    // An empty parse leaves nothing to act on; with work outstanding the
    // goal cannot be reached from this frame.
    if elements.is_empty() {
        return Decision::GoalUnreachable {
            reason: "no elements parsed from the current frame".into(),
        };
    }

    match &step.kind {
        StepKind::TapLabel(label) => match find_target(elements, label) {
            Some(el) => {
                let (x, y) = el.center(frame.width, frame.height);
                Decision::Act {
                    action: Action::Tap { x, y },
                    tag: step.tag.clone(),
                    reason: format!(
                        "tap element {} ('{}', confidence {:.2})",
                        el.index, el.content, el.confidence
                    ),
                }
            }
            None => {
                let scrolls = history
                    .iter()
                    .filter(|r| r.tag == SCROLL_TAG && r.ok)
                    .count() as u32;
                if scrolls < scroll_budget {
                    Decision::Act {
                        action: scroll_down(frame),
                        tag: SCROLL_TAG.into(),
                        reason: format!("'{label}' not visible, scrolling down"),
                    }
                } else {
                    Decision::GoalUnreachable {
                        reason: format!("'{label}' not found after {scrolls} scrolls"),
                    }
                }
            }
        },
        StepKind::InputText(text) => Decision::Act {
            action: Action::InputText { text: text.clone() },
            tag: step.tag.clone(),
            reason: "type into the focused field".into(),
        },
        StepKind::Key(keycode) => Decision::Act {
            action: Action::KeyEvent {
                keycode: keycode.clone(),
            },
            tag: step.tag.clone(),
            reason: format!("press {keycode}"),
        },
    }
}

/// Case-insensitive substring match over element content. Ties break on
/// highest confidence, then smallest box area (most specific match).
fn find_target<'a>(elements: &'a [Element], label: &str) -> Option<&'a Element> {
    let needle = label.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    elements
        .iter()
        .filter(|e| e.content.to_lowercase().contains(&needle))
        .min_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(a.area().total_cmp(&b.area()))
        })
}

pub(crate) fn scroll_down(frame: &Frame) -> Action {
    let x = (frame.width / 2) as i32;
    Action::Swipe {
        x1: x,
        y1: (frame.height as f32 * 0.8) as i32,
        x2: x,
        y2: (frame.height as f32 * 0.2) as i32,
        duration_ms: 400,
    }
}

pub(crate) fn scroll_up(frame: &Frame) -> Action {
    let x = (frame.width / 2) as i32;
    Action::Swipe {
        x1: x,
        y1: (frame.height as f32 * 0.2) as i32,
        x2: x,
        y2: (frame.height as f32 * 0.8) as i32,
        duration_ms: 400,
    }
}
