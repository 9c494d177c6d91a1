/// LLM-backed planner. Sends the frame plus the parsed element list to a
/// vision-capable chat model and maps its JSON reply onto a `Decision`.
use async_trait::async_trait;
use base64::Engine as _;

use crate::config::LlmConfig;
use crate::device::traits::Action;
use crate::errors::{AgentError, AgentResult};
use crate::llm::client::OpenAiChatClient;
use crate::llm::types::{ChatMessage, ContentPart};
use crate::perception::types::{Element, Frame};
use crate::planner::rules::{scroll_down, scroll_up};
use crate::planner::{ActionPlanner, Decision, PlanContext, StepRecord};

const SYSTEM_PROMPT: &str = "\
You are a mobile automation agent driving an Android device.
On every turn you receive the current screen, its parsed elements and the
recent action history. Decide the single best next action.

Available actions:
1. TAP - tap an element. Requires \"element_index\".
2. INPUT_TEXT - type into the focused field. Requires \"text\". Tap the
   field in a previous step if it is not focused yet.
3. SCROLL_DOWN / SCROLL_UP - scroll the screen.
4. SWIPE - custom swipe. Requires normalized \"start_x\", \"start_y\",
   \"end_x\", \"end_y\" (0.0-1.0); optional \"duration\" in milliseconds.
5. KEY - press a key. Requires \"keycode\" (e.g. KEYCODE_BACK).
6. WAIT - wait for content to load. Requires \"duration_seconds\".
7. DONE - only when the task is fully completed.
8. FAIL - when the task cannot be completed. Requires \"reason\".

Rules:
- Choose exactly ONE action.
- Prefer interactive elements for taps.
- If the screen looks unchanged after an action, scroll or wait.
- Return ONLY a JSON object: {\"action\": {...}, \"reasoning\": \"...\"}.
  No markdown, no extra text.";

pub struct LlmPlanner {
    client: OpenAiChatClient,
}

impl LlmPlanner {
    pub fn new(cfg: &LlmConfig) -> Self {
        Self {
            client: OpenAiChatClient::new(cfg),
        }
    }
}

#[async_trait]
impl ActionPlanner for LlmPlanner {
    async fn plan(&self, ctx: &PlanContext<'_>) -> AgentResult<Decision> {
        let prompt = build_prompt(&ctx.goal.describe(), ctx.elements, ctx.history);
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(&ctx.frame.png);
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(vec![
                ContentPart::png_image(&image_b64),
                ContentPart::text(prompt),
            ]),
        ];

        let reply = self.client.chat(&messages).await?;
        parse_reply(&reply, ctx.frame, ctx.elements)
    }
}

fn build_prompt(task: &str, elements: &[Element], history: &[StepRecord]) -> String {
    let mut prompt = format!("TASK: {task}\n\nRecent action history (oldest to newest):\n");
    if history.is_empty() {
        prompt.push_str("(no actions taken yet)\n");
    } else {
        for (i, entry) in history.iter().enumerate() {
            let status = if entry.ok { "ok" } else { "failed" };
            prompt.push_str(&format!("{}. {} [{status}]\n", i + 1, entry.summary));
        }
    }

    prompt.push_str("\nCurrent screen elements:\n");
    if elements.is_empty() {
        prompt.push_str("(no elements detected)\n");
    } else {
        for el in elements {
            let content: String = el.content.chars().take(50).collect();
            prompt.push_str(&format!(
                "- Element {} ({:?}): content='{}' bbox={:?} interactive={} confidence={:.2}\n",
                el.index, el.kind, content, el.bbox, el.interactive, el.confidence
            ));
        }
    }

    prompt.push_str("\nChoose the next action and return the JSON object.\n");
    prompt
}

/// Strip optional markdown code fences around the model's JSON reply.
fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

fn parse_reply(raw: &str, frame: &Frame, elements: &[Element]) -> AgentResult<Decision> {
    let text = strip_fences(raw);
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| AgentError::Planner(format!("LLM reply is not JSON: {e}")))?;

    let reasoning = value["reasoning"]
        .as_str()
        .unwrap_or("[no reasoning provided]")
        .to_string();
    let action = &value["action"];
    let kind = action["action"]
        .as_str()
        .ok_or_else(|| AgentError::Planner("LLM reply missing action.action".into()))?;

    let decision = match kind {
        "TAP" => {
            let index = action["element_index"]
                .as_u64()
                .ok_or_else(|| AgentError::Planner("TAP requires element_index".into()))?
                as usize;
            let el = elements.iter().find(|e| e.index == index).ok_or_else(|| {
                AgentError::Planner(format!("element {index} is not in the current parse"))
            })?;
            let (x, y) = el.center(frame.width, frame.height);
            Decision::Act {
                action: Action::Tap { x, y },
                tag: format!("llm:tap:{index}"),
                reason: reasoning,
            }
        }
        "INPUT_TEXT" => {
            let text = action["text"]
                .as_str()
                .ok_or_else(|| AgentError::Planner("INPUT_TEXT requires text".into()))?;
            Decision::Act {
                action: Action::InputText {
                    text: text.to_string(),
                },
                tag: "llm:input".into(),
                reason: reasoning,
            }
        }
        "SCROLL_DOWN" => Decision::Act {
            action: scroll_down(frame),
            tag: "scroll".into(),
            reason: reasoning,
        },
        "SCROLL_UP" => Decision::Act {
            action: scroll_up(frame),
            tag: "scroll".into(),
            reason: reasoning,
        },
        "SWIPE" => {
            let coord = |key: &str| -> AgentResult<f64> {
                action[key]
                    .as_f64()
                    .map(|v| v.clamp(0.0, 1.0))
                    .ok_or_else(|| AgentError::Planner(format!("SWIPE requires {key}")))
            };
            let (sx, sy, ex, ey) = (
                coord("start_x")?,
                coord("start_y")?,
                coord("end_x")?,
                coord("end_y")?,
            );
            let duration_ms = action["duration"].as_u64().unwrap_or(300);
            Decision::Act {
                action: Action::Swipe {
                    x1: (sx * frame.width as f64) as i32,
                    y1: (sy * frame.height as f64) as i32,
                    x2: (ex * frame.width as f64) as i32,
                    y2: (ey * frame.height as f64) as i32,
                    duration_ms,
                },
                tag: "llm:swipe".into(),
                reason: reasoning,
            }
        }
        "KEY" => {
            let keycode = action["keycode"]
                .as_str()
                .ok_or_else(|| AgentError::Planner("KEY requires keycode".into()))?;
            Decision::Act {
                action: Action::KeyEvent {
                    keycode: keycode.to_string(),
                },
                tag: format!("llm:key:{keycode}"),
                reason: reasoning,
            }
        }
        "WAIT" => {
            let seconds = action["duration_seconds"].as_f64().unwrap_or(2.0);
            Decision::Act {
                action: Action::Wait {
                    ms: (seconds * 1000.0) as u64,
                },
                tag: "llm:wait".into(),
                reason: reasoning,
            }
        }
        "DONE" => Decision::GoalReached { summary: reasoning },
        "FAIL" => Decision::GoalUnreachable {
            reason: action["reason"]
                .as_str()
                .map(str::to_string)
                .unwrap_or(reasoning),
        },
        other => {
            return Err(AgentError::Planner(format!(
                "unknown action '{other}' in LLM reply"
            )))
        }
    };

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::ElementKind;

    fn frame(width: u32, height: u32) -> Frame {
        Frame {
            png: Vec::new(),
            width,
            height,
            captured_at: chrono::Utc::now(),
        }
    }

    fn elements() -> Vec<Element> {
        vec![Element {
            index: 7,
            kind: ElementKind::Icon,
            bbox: [0.2, 0.2, 0.4, 0.4],
            content: "Settings".into(),
            interactive: true,
            confidence: 0.9,
        }]
    }

    #[test]
    fn tap_reply_maps_to_element_centroid() {
        let reply = r#"{"action": {"action": "TAP", "element_index": 7}, "reasoning": "tap settings"}"#;
        match parse_reply(reply, &frame(1000, 1000), &elements()).unwrap() {
            Decision::Act {
                action: Action::Tap { x, y },
                tag,
                reason,
            } => {
                assert_eq!((x, y), (300, 300));
                assert_eq!(tag, "llm:tap:7");
                assert_eq!(reason, "tap settings");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn markdown_fences_are_stripped() {
        let reply = "```json\n{\"action\": {\"action\": \"DONE\"}, \"reasoning\": \"finished\"}\n```";
        assert!(matches!(
            parse_reply(reply, &frame(100, 100), &elements()).unwrap(),
            Decision::GoalReached { .. }
        ));
    }

    #[test]
    fn fail_reply_is_unreachable_with_reason() {
        let reply =
            r#"{"action": {"action": "FAIL", "reason": "no such screen"}, "reasoning": "stuck"}"#;
        match parse_reply(reply, &frame(100, 100), &elements()).unwrap() {
            Decision::GoalUnreachable { reason } => assert_eq!(reason, "no such screen"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tap_on_stale_index_is_rejected() {
        let reply = r#"{"action": {"action": "TAP", "element_index": 99}, "reasoning": "r"}"#;
        let err = parse_reply(reply, &frame(100, 100), &elements()).unwrap_err();
        assert!(matches!(err, AgentError::Planner(_)));
    }

    #[test]
    fn swipe_coordinates_scale_and_clamp() {
        let reply = r#"{"action": {"action": "SWIPE", "start_x": 0.5, "start_y": 1.5, "end_x": 0.5, "end_y": 0.2}, "reasoning": "r"}"#;
        match parse_reply(reply, &frame(1000, 2000), &elements()).unwrap() {
            Decision::Act {
                action:
                    Action::Swipe {
                        x1,
                        y1,
                        y2,
                        duration_ms,
                        ..
                    },
                ..
            } => {
                assert_eq!(x1, 500);
                assert_eq!(y1, 2000);
                assert_eq!(y2, 400);
                assert_eq!(duration_ms, 300);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn wait_reply_converts_seconds() {
        let reply =
            r#"{"action": {"action": "WAIT", "duration_seconds": 1.5}, "reasoning": "loading"}"#;
        match parse_reply(reply, &frame(100, 100), &elements()).unwrap() {
            Decision::Act {
                action: Action::Wait { ms },
                ..
            } => assert_eq!(ms, 1500),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_is_an_error() {
        let reply = r#"{"action": {"action": "LAUNCH_APP"}, "reasoning": "r"}"#;
        assert!(parse_reply(reply, &frame(100, 100), &elements()).is_err());
    }

    #[test]
    fn prompt_lists_elements_and_history() {
        let history = vec![StepRecord {
            step: 1,
            tag: "tap:Settings".into(),
            summary: "tap(300,300)".into(),
            ok: true,
        }];
        let prompt = build_prompt("tap 'Settings'", &elements(), &history);
        assert!(prompt.contains("Element 7"));
        assert!(prompt.contains("Settings"));
        assert!(prompt.contains("tap(300,300) [ok]"));
    }
}
