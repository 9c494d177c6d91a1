/// Device channel backed by the external `adb` binary. The transport
/// protocol stays adb's problem; this module only shells out to it.
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::DeviceConfig;
use crate::device::traits::{Action, DeviceChannel};
use crate::errors::{AgentError, AgentResult};
use crate::perception::types::Frame;

pub struct AdbChannel {
    adb_path: String,
    serial: String,
    screen: (u32, u32),
    command_timeout: Duration,
}

impl AdbChannel {
    /// Connect to the configured serial, or to the single authorized device
    /// when no serial is given.
    pub async fn connect(cfg: &DeviceConfig) -> AgentResult<Self> {
        let timeout = Duration::from_secs(cfg.command_timeout_secs);

        let output = run_adb(&cfg.adb_path, None, &["devices"], timeout)
            .await
            .map_err(AgentError::DeviceUnavailable)?;
        if !output.status.success() {
            return Err(AgentError::DeviceUnavailable(stderr_of(&output)));
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let serial = select_device(&listing, cfg.serial.as_deref())?;

        let mut channel = Self {
            adb_path: cfg.adb_path.clone(),
            serial,
            screen: (0, 0),
            command_timeout: timeout,
        };
        channel.screen = channel.query_screen_size().await?;
        tracing::info!(
            serial = %channel.serial,
            width = channel.screen.0,
            height = channel.screen.1,
            "device connected"
        );
        Ok(channel)
    }

    /// Physical screen size (width, height), cached at connect time.
    pub fn screen_size(&self) -> (u32, u32) {
        self.screen
    }

    async fn exec(&self, args: &[&str]) -> Result<Output, String> {
        run_adb(&self.adb_path, Some(&self.serial), args, self.command_timeout).await
    }

    async fn query_screen_size(&self) -> AgentResult<(u32, u32)> {
        let output = self
            .exec(&["shell", "wm", "size"])
            .await
            .map_err(AgentError::DeviceUnavailable)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_wm_size(&stdout).ok_or_else(|| {
            AgentError::DeviceUnavailable(format!(
                "could not read screen size from: {}",
                stdout.trim()
            ))
        })
    }
}

#[async_trait]
impl DeviceChannel for AdbChannel {
    async fn capture_frame(&self) -> AgentResult<Frame> {
        let output = self
            .exec(&["exec-out", "screencap", "-p"])
            .await
            .map_err(AgentError::Capture)?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_disconnected(&stderr) {
                return Err(AgentError::DeviceDisconnected(stderr));
            }
            return Err(AgentError::Capture(format!(
                "screencap exited {}: {stderr}",
                output.status
            )));
        }
        Frame::from_png(output.stdout)
    }

    async fn dispatch(&self, action: &Action) -> AgentResult<()> {
        let args: Vec<String> = match action {
            Action::Tap { x, y } => {
                vec!["shell".into(), "input".into(), "tap".into(), x.to_string(), y.to_string()]
            }
            Action::Swipe {
                x1,
                y1,
                x2,
                y2,
                duration_ms,
            } => vec![
                "shell".into(),
                "input".into(),
                "swipe".into(),
                x1.to_string(),
                y1.to_string(),
                x2.to_string(),
                y2.to_string(),
                duration_ms.to_string(),
            ],
            Action::InputText { text } => vec![
                "shell".into(),
                "input".into(),
                "text".into(),
                escape_input_text(text),
            ],
            Action::KeyEvent { keycode } => {
                vec!["shell".into(), "input".into(), "keyevent".into(), keycode.clone()]
            }
            Action::Wait { .. } => {
                tracing::debug!("wait action handled by the loop, nothing to dispatch");
                return Ok(());
            }
        };

        tracing::info!(action = %action.summary(), "dispatching input");
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec(&arg_refs).await.map_err(AgentError::Dispatch)?;
        if !output.status.success() {
            let stderr = stderr_of(&output);
            if is_disconnected(&stderr) {
                return Err(AgentError::DeviceDisconnected(stderr));
            }
            return Err(AgentError::Dispatch(format!(
                "input exited {}: {stderr}",
                output.status
            )));
        }
        Ok(())
    }
}

async fn run_adb(
    adb_path: &str,
    serial: Option<&str>,
    args: &[&str],
    timeout: Duration,
) -> Result<Output, String> {
    let mut cmd = Command::new(adb_path);
    if let Some(serial) = serial {
        cmd.arg("-s").arg(serial);
    }
    cmd.args(args);
    cmd.kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("failed to run {adb_path}: {e}")),
        Err(_) => Err(format!(
            "adb {} timed out after {}s",
            args.join(" "),
            timeout.as_secs()
        )),
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Markers adb prints when the device drops off the bus mid-command.
fn is_disconnected(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("device offline")
        || lower.contains("no devices")
        || lower.contains("unauthorized")
        || (lower.contains("device") && lower.contains("not found"))
        || lower.contains("connection reset")
}

/// Pick a serial from `adb devices` output. `want` pins a specific serial;
/// otherwise exactly one device in the `device` state must be attached.
fn select_device(listing: &str, want: Option<&str>) -> AgentResult<String> {
    let entries: Vec<(&str, &str)> = listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some(state)) => Some((serial, state)),
                _ => None,
            }
        })
        .collect();

    if let Some(want) = want {
        return match entries.iter().copied().find(|(serial, _)| *serial == want) {
            Some((serial, "device")) => Ok(serial.to_string()),
            Some((serial, state)) => Err(AgentError::DeviceUnavailable(format!(
                "device {serial} is in state '{state}'"
            ))),
            None => Err(AgentError::DeviceUnavailable(format!(
                "device {want} not attached"
            ))),
        };
    }

    let ready: Vec<&str> = entries
        .iter()
        .filter(|(_, state)| *state == "device")
        .map(|(serial, _)| *serial)
        .collect();

    match ready.as_slice() {
        [serial] => Ok(serial.to_string()),
        [] => {
            if entries.iter().any(|(_, state)| *state == "unauthorized") {
                Err(AgentError::DeviceUnavailable(
                    "device unauthorized; accept the debugging prompt on the device".into(),
                ))
            } else {
                Err(AgentError::DeviceUnavailable(
                    "no devices attached; is the device connected and adb running?".into(),
                ))
            }
        }
        many => Err(AgentError::DeviceUnavailable(format!(
            "multiple devices attached ({}); pass --serial",
            many.join(", ")
        ))),
    }
}

/// Parse `adb shell wm size` output. An `Override size` line wins over the
/// physical one, matching what the device actually renders.
fn parse_wm_size(stdout: &str) -> Option<(u32, u32)> {
    let mut physical = None;
    let mut overridden = None;
    for line in stdout.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("Physical size:") {
            physical = Some(rest);
        } else if let Some(rest) = line.strip_prefix("Override size:") {
            overridden = Some(rest);
        }
    }
    let raw = overridden.or(physical)?;
    let (w, h) = raw.trim().split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Escape text for `input text`, which goes through the device-side shell.
/// Spaces become `%s` and shell metacharacters are backslash-escaped.
fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            ' ' => out.push_str("%s"),
            '\\' | '\'' | '"' | '&' | '<' | '>' | '?' | '*' | '|' | '(' | ')' | ';' | '`'
            | '$' | '~' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wm_size_physical() {
        assert_eq!(
            parse_wm_size("Physical size: 1080x2400\n"),
            Some((1080, 2400))
        );
    }

    #[test]
    fn wm_size_override_wins() {
        let out = "Physical size: 1080x2400\nOverride size: 720x1600\n";
        assert_eq!(parse_wm_size(out), Some((720, 1600)));
    }

    #[test]
    fn wm_size_garbage_is_none() {
        assert_eq!(parse_wm_size("error: no devices/emulators found"), None);
    }

    #[test]
    fn select_single_ready_device() {
        let listing = "List of devices attached\nemulator-5554\tdevice\n";
        assert_eq!(select_device(listing, None).unwrap(), "emulator-5554");
    }

    #[test]
    fn select_no_devices() {
        let listing = "List of devices attached\n";
        let err = select_device(listing, None).unwrap_err();
        assert!(matches!(err, AgentError::DeviceUnavailable(_)));
    }

    #[test]
    fn select_unauthorized_device_mentions_prompt() {
        let listing = "List of devices attached\nR58M123456\tunauthorized\n";
        match select_device(listing, None) {
            Err(AgentError::DeviceUnavailable(msg)) => assert!(msg.contains("unauthorized")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn select_multiple_devices_requires_serial() {
        let listing =
            "List of devices attached\nemulator-5554\tdevice\nR58M123456\tdevice\n";
        match select_device(listing, None) {
            Err(AgentError::DeviceUnavailable(msg)) => assert!(msg.contains("--serial")),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(
            select_device(listing, Some("R58M123456")).unwrap(),
            "R58M123456"
        );
    }

    #[test]
    fn select_pinned_offline_device_fails() {
        let listing = "List of devices attached\nR58M123456\toffline\n";
        match select_device(listing, Some("R58M123456")) {
            Err(AgentError::DeviceUnavailable(msg)) => assert!(msg.contains("offline")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn input_text_escaping() {
        assert_eq!(escape_input_text("hello world"), "hello%sworld");
        assert_eq!(escape_input_text("a&b"), "a\\&b");
        assert_eq!(escape_input_text("it's"), "it\\'s");
        assert_eq!(escape_input_text("plain"), "plain");
    }

    #[test]
    fn disconnection_markers() {
        assert!(is_disconnected("error: device offline"));
        assert!(is_disconnected("error: device 'R58M' not found"));
        assert!(is_disconnected("error: no devices/emulators found"));
        assert!(!is_disconnected("Error: invalid arguments"));
    }
}
