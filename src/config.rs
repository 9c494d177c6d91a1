use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    /// Optional. When absent the deterministic rule planner is the only
    /// planner available.
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Path to the adb binary; resolved through PATH when relative.
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    /// Device serial. When unset the single authorized device is used.
    pub serial: Option<String>,
    /// Per-command timeout for adb invocations.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    /// Settle delay after each dispatched input, giving the UI time to react.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: default_adb_path(),
            serial: None,
            command_timeout_secs: default_command_timeout(),
            settle_ms: default_settle_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    /// Base URL of the locally running screen-parsing demo service.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_perception_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_box_threshold")]
    pub box_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_true")]
    pub use_ocr: bool,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_perception_timeout(),
            box_threshold: default_box_threshold(),
            iou_threshold: default_iou_threshold(),
            use_ocr: true,
            image_size: default_image_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Iteration cap for the observe-act loop.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Number of recent steps kept for planner context.
    #[serde(default = "default_history_length")]
    pub history_length: usize,
    /// Retry budget for transient capture/perception/dispatch errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// How many scroll attempts the rule planner spends looking for an
    /// off-screen target before giving up.
    #[serde(default = "default_scroll_budget")]
    pub scroll_budget: u32,
    /// When set, every captured frame is written here as a PNG.
    pub frame_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            history_length: default_history_length(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            scroll_budget: default_scroll_budget(),
            frame_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat-completions endpoint of an OpenAI-compatible provider.
    pub api_base: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to the
    /// DROIDPILOT_API_KEY environment variable).
    #[serde(default)]
    pub api_key: Option<String>,
}

impl LlmConfig {
    pub fn resolve_api_key(&self) -> String {
        std::env::var("DROIDPILOT_API_KEY")
            .unwrap_or_else(|_| self.api_key.clone().unwrap_or_default())
    }
}

fn default_adb_path() -> String {
    "adb".to_string()
}

fn default_command_timeout() -> u64 {
    10
}

fn default_settle_ms() -> u64 {
    2000
}

fn default_endpoint() -> String {
    "http://127.0.0.1:7788".to_string()
}

fn default_perception_timeout() -> u64 {
    30
}

fn default_box_threshold() -> f32 {
    0.05
}

fn default_iou_threshold() -> f32 {
    0.1
}

fn default_image_size() -> u32 {
    640
}

fn default_max_steps() -> u32 {
    15
}

fn default_history_length() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_scroll_budget() -> u32 {
    3
}

fn default_temperature() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Some(candidate);
            }
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let candidate = cwd.join("config.toml");
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in working directory");
            return Some(candidate);
        }
    }

    None
}

/// Load the config from an explicit path, or from `config.toml` next to the
/// executable / in the working directory. A missing file is not an error:
/// every section has workable defaults.
pub fn load_config(path: Option<&Path>) -> AgentResult<AppConfig> {
    let resolved = match path {
        Some(p) => {
            if !p.exists() {
                return Err(AgentError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            Some(p.to_path_buf())
        }
        None => resolve_config_path(),
    };

    match resolved {
        Some(p) => {
            let content = std::fs::read_to_string(&p)?;
            let config: AppConfig = toml::from_str(&content)?;
            tracing::info!(path = %p.display(), "config loaded");
            Ok(config)
        }
        None => {
            tracing::debug!("no config.toml found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.device.adb_path, "adb");
        assert_eq!(cfg.perception.endpoint, "http://127.0.0.1:7788");
        assert_eq!(cfg.agent.max_steps, 15);
        assert_eq!(cfg.agent.max_retries, 3);
        assert!(cfg.llm.is_none());
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [agent]
            max_steps = 40

            [perception]
            endpoint = "http://10.0.0.2:7788"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.agent.max_steps, 40);
        assert_eq!(cfg.agent.history_length, 5);
        assert_eq!(cfg.perception.endpoint, "http://10.0.0.2:7788");
        assert!((cfg.perception.box_threshold - 0.05).abs() < f32::EPSILON);
    }

    #[test]
    fn llm_section_parses_with_default_temperature() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [llm]
            api_base = "https://api.example.com/v1/chat/completions"
            model = "vision-large"
            "#,
        )
        .unwrap();
        let llm = cfg.llm.unwrap();
        assert_eq!(llm.model, "vision-large");
        assert!((llm.temperature - 0.1).abs() < f64::EPSILON);
    }
}
