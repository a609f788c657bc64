use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Entries kept in memory for inspection.
const RECENT_CAPACITY: usize = 1024;

/// One recorded action.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the action happened.
    pub timestamp: DateTime<Utc>,
    /// Round acted on, if any.
    pub schedule_id: Option<Uuid>,
    /// Its campaign.
    pub campaign_name: Option<String>,
    /// Action name such as `launch` or `cancel`.
    pub action: String,
    /// Action-specific payload.
    pub details: serde_json::Value,
    /// How the action ended.
    pub outcome: AuditOutcome,
}

/// Result of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// The action took effect.
    Success,
    /// The action was refused.
    Rejected,
    /// The action failed.
    Error,
}

/// Append-only audit log that records orchestrator actions.
pub struct AuditLog {
    tx: Option<mpsc::UnboundedSender<AuditEntry>>,
    recent: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLog {
    /// Create an AuditLog writing to `<log_dir>/audit.jsonl`.
    ///
    /// Spawns a background task that appends entries in order; must be
    /// called from within a tokio runtime.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditEntry>();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(dir = %log_dir.display(), error = %e, "Audit directory unavailable");
                return;
            }
            let log_file = log_dir.join("audit.jsonl");

            while let Some(entry) = rx.recv().await {
                let Ok(mut line) = serde_json::to_string(&entry) else {
                    continue;
                };
                line.push('\n');
                let written = async {
                    let mut file = tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&log_file)
                        .await?;
                    file.write_all(line.as_bytes()).await?;
                    file.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!(error = %e, "Failed to append audit entry");
                }
            }
        });

        Self {
            tx: Some(tx),
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// An audit log that only keeps recent entries in memory.
    pub fn in_memory() -> Self {
        Self {
            tx: None,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an entry in memory and, when configured, on disk.
    pub fn log(&self, entry: AuditEntry) {
        info!(
            schedule_id = ?entry.schedule_id,
            action = %entry.action,
            outcome = ?entry.outcome,
            "audit"
        );
        {
            let mut recent = self.recent.lock();
            if recent.len() == RECENT_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(entry.clone());
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(entry);
        }
    }

    /// Record an action against one round.
    pub fn log_action(
        &self,
        schedule_id: Uuid,
        campaign_name: &str,
        action: impl Into<String>,
        details: serde_json::Value,
        outcome: AuditOutcome,
    ) {
        self.log(AuditEntry {
            timestamp: Utc::now(),
            schedule_id: Some(schedule_id),
            campaign_name: Some(campaign_name.to_string()),
            action: action.into(),
            details,
            outcome,
        });
    }

    /// Most recent entries, oldest first.
    pub fn recent(&self) -> Vec<AuditEntry> {
        self.recent.lock().iter().cloned().collect()
    }

    /// Recent entries recorded for one round.
    pub fn entries_for(&self, schedule_id: Uuid) -> Vec<AuditEntry> {
        self.recent
            .lock()
            .iter()
            .filter(|e| e.schedule_id == Some(schedule_id))
            .cloned()
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::in_memory()
    }
}
