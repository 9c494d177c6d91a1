//! CLI argument parsing with clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Android device automation agent.
///
/// Captures the device screen through adb, parses it into structured
/// elements with a local perception service, plans the next input and
/// dispatches it back to the device until the goal is reached.
#[derive(Debug, Parser)]
#[command(name = "droidpilot", version)]
pub struct Cli {
    /// Goal to accomplish: "tap:<label>", "type:<label>=<text>",
    /// "key:<keycode>", or free text (LLM planner). Prompted on stdin
    /// when omitted.
    pub goal: Option<String>,

    /// Path to config.toml [default: next to the executable or in the CWD]
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Device serial [default: the single authorized device]
    #[arg(short, long)]
    pub serial: Option<String>,

    /// Perception service endpoint override
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Planner backend
    #[arg(long, value_enum, default_value_t = PlannerKind::Rules)]
    pub planner: PlannerKind,

    /// Iteration cap override
    #[arg(long, value_name = "N")]
    pub max_steps: Option<u32>,

    /// Write each captured frame as a PNG into this directory
    #[arg(long, value_name = "DIR")]
    pub frame_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlannerKind {
    /// Deterministic planner driven by the goal grammar
    Rules,
    /// LLM-backed planner (requires an [llm] section in config.toml)
    Llm,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_goal_and_overrides() {
        let cli = Cli::parse_from([
            "droidpilot",
            "--serial",
            "emulator-5554",
            "--max-steps",
            "30",
            "tap:Settings",
        ]);
        assert_eq!(cli.goal.as_deref(), Some("tap:Settings"));
        assert_eq!(cli.serial.as_deref(), Some("emulator-5554"));
        assert_eq!(cli.max_steps, Some(30));
        assert_eq!(cli.planner, PlannerKind::Rules);
    }

    #[test]
    fn goal_is_optional() {
        let cli = Cli::parse_from(["droidpilot", "--planner", "llm"]);
        assert!(cli.goal.is_none());
        assert_eq!(cli.planner, PlannerKind::Llm);
    }
}
