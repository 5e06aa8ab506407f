use crate::message::Message;
use chrono::{DateTime, Utc};
use log::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Log target for dead-lettered records, so they can be routed separately.
pub const DEAD_LETTER_TARGET: &str = "dead_letter";

#[derive(Debug, Serialize)]
struct DeadLetter<'a> {
    failed_at: DateTime<Utc>,
    reason: &'a str,
    message: &'a Message,
}

/// Append-only record of messages the persistence sink gave up on.
///
/// Every entry is logged at error level under [`DEAD_LETTER_TARGET`]; when a
/// file is configured the same JSON line is appended to it as well.
#[derive(Clone, Debug, Default)]
pub struct DeadLetterLog {
    path: Option<Arc<PathBuf>>,
    // Serializes appends so concurrent lines never interleave
    write_lock: Arc<Mutex<()>>,
}

impl DeadLetterLog {
    /// Log only, no file.
    pub fn log_only() -> Self {
        Self::default()
    }

    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(Arc::new(path.into())),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    pub async fn write(&self, message: &Message, reason: &str) {
        let entry = DeadLetter {
            failed_at: Utc::now(),
            reason,
            message,
        };

        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                // Still leave a trace of the message id
                error!(
                    target: DEAD_LETTER_TARGET,
                    "message {} dead-lettered ({reason}); entry not serializable: {e}",
                    message.id
                );
                return;
            }
        };

        error!(target: DEAD_LETTER_TARGET, "{line}");

        if let Some(path) = &self.path {
            if let Err(e) = self.append(path, &line).await {
                error!(
                    "Failed to append message {} to dead-letter file {}: {e}",
                    message.id,
                    path.display()
                );
            }
        }
    }

    async fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await
    }
}
