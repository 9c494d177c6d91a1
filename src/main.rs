use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use droidpilot::cli::{Cli, PlannerKind};
use droidpilot::config;
use droidpilot::device::adb::AdbChannel;
use droidpilot::device::traits::DeviceChannel;
use droidpilot::engine::engine::ControlLoop;
use droidpilot::engine::state::Outcome;
use droidpilot::perception::omniparser::OmniParserClient;
use droidpilot::perception::traits::PerceptionClient;
use droidpilot::planner::llm::LlmPlanner;
use droidpilot::planner::rules::RulePlanner;
use droidpilot::planner::{ActionPlanner, Goal};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load .env file if present (ignore error if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut cfg = match config::load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            return 1;
        }
    };
    if let Some(serial) = cli.serial {
        cfg.device.serial = Some(serial);
    }
    if let Some(endpoint) = cli.endpoint {
        cfg.perception.endpoint = endpoint;
    }
    if let Some(max_steps) = cli.max_steps {
        cfg.agent.max_steps = max_steps;
    }
    if let Some(frame_dir) = cli.frame_dir {
        cfg.agent.frame_dir = Some(frame_dir);
    }

    let goal_text = match cli.goal {
        Some(goal) => goal,
        None => match prompt_goal() {
            Ok(goal) => goal,
            Err(e) => {
                tracing::error!(error = %e, "could not read goal from stdin");
                return 1;
            }
        },
    };
    if goal_text.trim().is_empty() {
        tracing::warn!("no goal entered, nothing to do");
        return 1;
    }
    let goal = Goal::parse(&goal_text);

    let planner: Arc<dyn ActionPlanner> = match cli.planner {
        PlannerKind::Rules => Arc::new(RulePlanner::new(cfg.agent.scroll_budget)),
        PlannerKind::Llm => match &cfg.llm {
            Some(llm_cfg) => Arc::new(LlmPlanner::new(llm_cfg)),
            None => {
                tracing::error!("--planner llm requires an [llm] section in config.toml");
                return 1;
            }
        },
    };

    let device: Arc<dyn DeviceChannel> = match AdbChannel::connect(&cfg.device).await {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            tracing::error!(error = %e, "device connection failed");
            return if e.is_device_fatal() { 3 } else { 1 };
        }
    };

    let perception: Arc<dyn PerceptionClient> = match OmniParserClient::new(&cfg.perception) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "could not build perception client");
            return 1;
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping after the current step");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let outcome = ControlLoop::new(device, perception, planner, goal, &cfg, stop)
        .run()
        .await;

    match &outcome {
        Outcome::Completed { summary } => tracing::info!(summary = %summary, "run complete"),
        Outcome::GoalUnreachable { reason } => tracing::warn!(reason = %reason, "goal unreachable"),
        Outcome::Failed { error } => tracing::error!(error = %error, "run failed"),
        Outcome::Cancelled => tracing::info!("run cancelled"),
    }
    outcome.exit_code()
}

fn prompt_goal() -> std::io::Result<String> {
    use std::io::{BufRead, Write};

    print!("Enter the task for the agent: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
