use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::errors::AgentResult;
use crate::planner::StepRecord;

/// Full record of one loop step as persisted to the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: i64,
    pub step: u32,
    pub tag: String,
    pub summary: String,
    pub ok: bool,
    pub reason: Option<String>,
}

pub struct SessionHistory {
    pub session_id: String,
    entries: Vec<HistoryEntry>,
    file_path: std::path::PathBuf,
}

impl SessionHistory {
    pub fn new() -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let dir = sessions_dir();
        let file_path = dir.join(format!("session_{session_id}.jsonl"));
        Self {
            session_id,
            entries: Vec::new(),
            file_path,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Append the latest entry to the JSONL file.
    pub fn flush(&self) -> AgentResult<()> {
        if let Some(last) = self.entries.last() {
            let line = serde_json::to_string(last)?;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?;
            writeln!(file, "{}", line)?;
            tracing::debug!(path = %self.file_path.display(), "history entry flushed");
        }
        Ok(())
    }

    /// The most recent `limit` steps in planner form, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<StepRecord> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries
            .iter()
            .skip(skip)
            .map(|e| StepRecord {
                step: e.step,
                tag: e.tag.clone(),
                summary: e.summary.clone(),
                ok: e.ok,
            })
            .collect()
    }

    pub fn last_summary(&self) -> Option<&str> {
        self.entries.last().map(|e| e.summary.as_str())
    }
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform-local data dir (e.g. `~/.local/share/droidpilot/sessions`),
/// falling back to the current working directory.
fn sessions_dir() -> std::path::PathBuf {
    if let Some(base) = dirs::data_local_dir() {
        let d = base.join("droidpilot").join("sessions");
        if std::fs::create_dir_all(&d).is_ok() {
            return d;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(step: u32, tag: &str, summary: &str) -> HistoryEntry {
        HistoryEntry {
            ts: 0,
            step,
            tag: tag.into(),
            summary: summary.into(),
            ok: true,
            reason: None,
        }
    }

    #[test]
    fn recent_is_bounded_and_oldest_first() {
        let mut history = SessionHistory::new();
        for i in 1..=8 {
            history.push(entry(i, "scroll", &format!("swipe {i}")));
        }
        let recent = history.recent(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent.first().unwrap().step, 4);
        assert_eq!(recent.last().unwrap().step, 8);
    }

    #[test]
    fn last_summary_tracks_latest_entry() {
        let mut history = SessionHistory::new();
        assert!(history.last_summary().is_none());
        history.push(entry(1, "tap:Settings", "tap(10,20)"));
        assert_eq!(history.last_summary(), Some("tap(10,20)"));
    }
}
