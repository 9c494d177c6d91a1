/// HTTP client for an OmniParser-style screen-parsing demo service.
///
/// The service accepts a base64 screenshot and returns the detected
/// elements either as a JSON array or as the legacy text format
/// `icon N: {...}` carrying Python-repr dicts.
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::PerceptionConfig;
use crate::errors::{AgentError, AgentResult};
use crate::perception::traits::PerceptionClient;
use crate::perception::types::{Element, ElementKind, Frame};

pub struct OmniParserClient {
    cfg: PerceptionConfig,
    client: reqwest::Client,
}

impl OmniParserClient {
    pub fn new(cfg: &PerceptionConfig) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            cfg: cfg.clone(),
            client,
        })
    }

    fn parse_url(&self) -> String {
        format!("{}/parse/", self.cfg.endpoint.trim_end_matches('/'))
    }

    fn transport_error(&self, e: reqwest::Error) -> AgentError {
        if e.is_timeout() {
            AgentError::PerceptionTimeout(self.cfg.timeout_secs)
        } else {
            AgentError::PerceptionUnavailable(e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    base64_image: &'a str,
    box_threshold: f32,
    iou_threshold: f32,
    use_paddleocr: bool,
    imgsz: u32,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    parsed_content_list: serde_json::Value,
    #[serde(default)]
    latency: Option<f64>,
}

/// Element as the service reports it; missing fields get workable defaults.
#[derive(Debug, Deserialize)]
struct RawElement {
    #[serde(rename = "type", default)]
    kind: Option<ElementKind>,
    bbox: [f32; 4],
    #[serde(default)]
    interactivity: bool,
    #[serde(default)]
    content: Option<String>,
    #[serde(default = "full_confidence")]
    confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

impl RawElement {
    fn into_element(self, index: usize) -> Element {
        Element {
            index,
            kind: self.kind.unwrap_or(ElementKind::Unknown),
            bbox: self.bbox,
            content: self.content.unwrap_or_default(),
            interactive: self.interactivity,
            confidence: self.confidence,
        }
    }
}

#[async_trait]
impl PerceptionClient for OmniParserClient {
    async fn parse(&self, frame: &Frame) -> AgentResult<Vec<Element>> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(&frame.png);
        let request = ParseRequest {
            base64_image: &image_b64,
            box_threshold: self.cfg.box_threshold,
            iou_threshold: self.cfg.iou_threshold,
            use_paddleocr: self.cfg.use_ocr,
            imgsz: self.cfg.image_size,
        };

        tracing::debug!(
            url = %self.parse_url(),
            bytes = frame.png.len(),
            "sending frame to perception service"
        );

        let response = self
            .client
            .post(self.parse_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::PerceptionUnavailable(format!(
                "{status}: {body}"
            )));
        }

        let parsed: ParseResponse = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;

        let elements = normalize(decode_content_list(&parsed.parsed_content_list)?);
        tracing::debug!(
            count = elements.len(),
            latency = ?parsed.latency,
            "perception parse complete"
        );
        Ok(elements)
    }
}

fn decode_content_list(value: &serde_json::Value) -> AgentResult<Vec<Element>> {
    match value {
        serde_json::Value::Array(items) => {
            let mut elements = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match serde_json::from_value::<RawElement>(item.clone()) {
                    Ok(raw) => elements.push(raw.into_element(i)),
                    Err(e) => {
                        tracing::warn!(index = i, error = %e, "skipping unparseable element");
                    }
                }
            }
            Ok(elements)
        }
        serde_json::Value::String(text) => parse_elements_text(text),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(AgentError::Perception(format!(
            "unexpected parsed_content_list shape: {other}"
        ))),
    }
}

/// Clamp every box into the unit square and order highest-confidence first.
/// The sort is stable, so equal confidences keep service order.
fn normalize(mut elements: Vec<Element>) -> Vec<Element> {
    for e in &mut elements {
        e.clamp_bbox();
    }
    elements.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    elements
}

/// Parse the legacy `icon N: {...}` text format. The dicts are Python repr
/// and are normalized to JSON first; labels containing quote characters are
/// not handled.
fn parse_elements_text(raw: &str) -> AgentResult<Vec<Element>> {
    let pattern = Regex::new(r"(?m)^icon\s+(\d+):\s+(\{.*\})\s*$")
        .map_err(|e| AgentError::Perception(format!("element pattern: {e}")))?;

    let mut elements = Vec::new();
    for caps in pattern.captures_iter(raw.trim()) {
        let index: usize = caps[1].parse().unwrap_or(0);
        let json = python_repr_to_json(&caps[2]);
        match serde_json::from_str::<RawElement>(&json) {
            Ok(raw_el) => elements.push(raw_el.into_element(index)),
            Err(e) => {
                tracing::warn!(line = %&caps[0], error = %e, "skipping unparseable element line");
            }
        }
    }
    elements.sort_by_key(|e| e.index);
    Ok(elements)
}

fn python_repr_to_json(repr: &str) -> String {
    repr.replace('\'', "\"")
        .replace(": True", ": true")
        .replace(": False", ": false")
        .replace(": None", ": null")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_array_form() {
        let value = serde_json::json!([
            {
                "type": "text",
                "bbox": [0.1, 0.2, 0.3, 0.4],
                "interactivity": false,
                "content": "Battery",
                "confidence": 0.8
            },
            {
                "type": "icon",
                "bbox": [0.5, 0.5, 0.6, 0.6],
                "interactivity": true,
                "content": "Settings"
            }
        ]);

        let elements = normalize(decode_content_list(&value).unwrap());
        assert_eq!(elements.len(), 2);
        // The icon has no confidence field, defaults to 1.0 and sorts first.
        assert_eq!(elements[0].content, "Settings");
        assert_eq!(elements[0].index, 1);
        assert!(elements[0].interactive);
        assert_eq!(elements[1].kind, ElementKind::Text);
    }

    #[test]
    fn parses_legacy_text_form() {
        let text = "icon 0: {'type': 'text', 'bbox': [0.1, 0.1, 0.2, 0.2], 'interactivity': False, 'content': 'Wi-Fi'}\n\
                    icon 1: {'type': 'icon', 'bbox': [0.3, 0.3, 0.4, 0.4], 'interactivity': True, 'content': 'Settings'}";
        let value = serde_json::Value::String(text.to_string());

        let elements = decode_content_list(&value).unwrap();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].content, "Wi-Fi");
        assert!(!elements[0].interactive);
        assert_eq!(elements[1].content, "Settings");
        assert!(elements[1].interactive);
    }

    #[test]
    fn skips_malformed_lines() {
        let text = "icon 0: {'type': 'text', 'bbox': [0.1, 0.1, 0.2, 0.2], 'interactivity': False, 'content': 'ok'}\n\
                    icon 1: {not a dict}\n\
                    garbage line";
        let elements = parse_elements_text(text).unwrap();
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].content, "ok");
    }

    #[test]
    fn null_content_list_is_empty() {
        assert!(decode_content_list(&serde_json::Value::Null)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn unexpected_shape_is_an_error() {
        let err = decode_content_list(&serde_json::json!(42)).unwrap_err();
        assert!(matches!(err, AgentError::Perception(_)));
    }

    #[test]
    fn normalize_clamps_and_orders_by_confidence() {
        let value = serde_json::json!([
            {"bbox": [-0.5, 0.0, 1.5, 0.5], "content": "low", "confidence": 0.2},
            {"bbox": [0.0, 0.0, 0.5, 0.5], "content": "high", "confidence": 0.9}
        ]);
        let elements = normalize(decode_content_list(&value).unwrap());
        assert_eq!(elements[0].content, "high");
        assert_eq!(elements[1].bbox, [0.0, 0.0, 1.0, 0.5]);
    }

    #[test]
    fn python_repr_normalization() {
        assert_eq!(
            python_repr_to_json("{'a': True, 'b': False, 'c': None}"),
            r#"{"a": true, "b": false, "c": null}"#
        );
    }
}
