use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::device::traits::{Action, DeviceChannel};
use crate::engine::history::{HistoryEntry, SessionHistory};
use crate::engine::loop_control::LoopController;
use crate::engine::state::{LoopState, Outcome};
use crate::errors::{AgentError, AgentResult};
use crate::perception::traits::PerceptionClient;
use crate::perception::types::Frame;
use crate::planner::{ActionPlanner, Decision, Goal, PlanContext};

/// The observe-act cycle: capture → perceive → plan → act, repeated until
/// the goal resolves, the loop fails, or the step cap trips. Single
/// in-flight iteration; the device and perception connections are owned
/// exclusively for the lifetime of the run.
pub struct ControlLoop {
    device: Arc<dyn DeviceChannel>,
    perception: Arc<dyn PerceptionClient>,
    planner: Arc<dyn ActionPlanner>,
    goal: Goal,
    state: LoopState,
    ctrl: LoopController,
    history: SessionHistory,
    history_length: usize,
    settle: Duration,
    frame_dir: Option<PathBuf>,
    stop: Arc<AtomicBool>,
}

impl ControlLoop {
    pub fn new(
        device: Arc<dyn DeviceChannel>,
        perception: Arc<dyn PerceptionClient>,
        planner: Arc<dyn ActionPlanner>,
        goal: Goal,
        config: &AppConfig,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            device,
            perception,
            planner,
            goal,
            state: LoopState::Idle,
            ctrl: LoopController::new(
                config.agent.max_steps,
                config.agent.max_retries,
                config.agent.retry_base_delay_ms,
            ),
            history: SessionHistory::new(),
            history_length: config.agent.history_length,
            settle: Duration::from_millis(config.device.settle_ms),
            frame_dir: config.agent.frame_dir.clone(),
            stop,
        }
    }

    pub async fn run(mut self) -> Outcome {
        tracing::info!(
            session = %self.history.session_id,
            goal = %self.goal.describe(),
            "control loop starting"
        );

        loop {
            let state = std::mem::replace(&mut self.state, LoopState::Idle);
            tracing::debug!(state = state.name(), step = self.ctrl.steps(), "loop state");

            self.state = match state {
                LoopState::Idle => {
                    // Cancellation is cooperative: checked only between
                    // iterations so in-flight device I/O always completes.
                    if self.stop.load(Ordering::Relaxed) {
                        tracing::info!("stop requested, cancelling");
                        return Outcome::Cancelled;
                    }
                    if self.ctrl.step_limit_reached() {
                        tracing::warn!(steps = self.ctrl.steps(), "step limit reached");
                        return Outcome::Failed {
                            error: AgentError::StepLimit(self.ctrl.steps()),
                        };
                    }
                    LoopState::Capturing
                }

                LoopState::Capturing => match self.capture_with_retry().await {
                    Ok(frame) => {
                        self.dump_frame(&frame);
                        LoopState::Perceiving { frame }
                    }
                    Err(error) => LoopState::Failed { error },
                },

                LoopState::Perceiving { frame } => match self.perceive_with_retry(&frame).await {
                    Ok(elements) => {
                        tracing::info!(count = elements.len(), "frame parsed");
                        LoopState::Planning { frame, elements }
                    }
                    Err(error) => LoopState::Failed { error },
                },

                LoopState::Planning { frame, elements } => {
                    let history = self.history.recent(self.history_length);
                    let ctx = PlanContext {
                        goal: &self.goal,
                        frame: &frame,
                        elements: &elements,
                        history: &history,
                    };
                    match self.with_retry("planning", || self.planner.plan(&ctx)).await {
                        Ok(Decision::Act {
                            action,
                            tag,
                            reason,
                        }) => {
                            tracing::info!(
                                action = %action.summary(),
                                tag = %tag,
                                reason = %reason,
                                "planner decision"
                            );
                            LoopState::Acting {
                                frame,
                                action,
                                tag,
                                reason,
                            }
                        }
                        Ok(Decision::GoalReached { summary }) => LoopState::Completed { summary },
                        Ok(Decision::GoalUnreachable { reason }) => {
                            tracing::warn!(reason = %reason, "goal unreachable");
                            return Outcome::GoalUnreachable { reason };
                        }
                        Err(error) => LoopState::Failed { error },
                    }
                }

                LoopState::Acting {
                    frame,
                    action,
                    tag,
                    reason,
                } => {
                    let result = self.act(&action).await;
                    self.record_step(&tag, &action, result.is_ok(), &reason);
                    // The frame dies with the iteration that captured it.
                    drop(frame);

                    match result {
                        Ok(()) => {
                            self.ctrl.record_step();
                            if !matches!(action, Action::Wait { .. }) {
                                tokio::time::sleep(self.settle).await;
                            }
                            LoopState::Idle
                        }
                        Err(error) => LoopState::Failed { error },
                    }
                }

                LoopState::Completed { summary } => {
                    tracing::info!(summary = %summary, steps = self.ctrl.steps(), "goal reached");
                    return Outcome::Completed { summary };
                }

                LoopState::Failed { error } => {
                    tracing::error!(error = %error, "control loop failed");
                    return Outcome::Failed { error };
                }
            };
        }
    }

    async fn capture_with_retry(&self) -> AgentResult<Frame> {
        self.with_retry("capture", || self.device.capture_frame())
            .await
    }

    async fn perceive_with_retry(&self, frame: &Frame) -> AgentResult<Vec<crate::perception::types::Element>> {
        self.with_retry("perception", || self.perception.parse(frame))
            .await
    }

    /// Retry a transient failure up to the budget with exponential backoff.
    /// Non-retryable errors (device disconnection above all) pass straight
    /// through with zero additional attempts.
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> AgentResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AgentResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.ctrl.max_retries() => {
                    attempt += 1;
                    let delay = self.ctrl.backoff_delay(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "{} failed, retrying",
                        what
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn act(&self, action: &Action) -> AgentResult<()> {
        if let Action::Wait { ms } = action {
            tracing::info!(ms, "waiting");
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            return Ok(());
        }
        self.with_retry("dispatch", || self.device.dispatch(action))
            .await
    }

    fn record_step(&mut self, tag: &str, action: &Action, ok: bool, reason: &str) {
        let summary = action.summary();
        if self.history.last_summary() == Some(summary.as_str()) {
            tracing::warn!(summary = %summary, "same action dispatched twice in a row");
        }
        self.history.push(HistoryEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            step: self.ctrl.steps() + 1,
            tag: tag.to_string(),
            summary,
            ok,
            reason: Some(reason.to_string()),
        });
        let _ = self.history.flush();
    }

    fn dump_frame(&self, frame: &Frame) {
        let Some(dir) = &self.frame_dir else {
            return;
        };
        let path = dir.join(format!("step_{:03}.png", self.ctrl.steps() + 1));
        if let Err(e) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, &frame.png))
        {
            tracing::warn!(path = %path.display(), error = %e, "frame dump failed");
        }
    }
}
