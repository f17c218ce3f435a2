//! Durable activity log.
//!
//! A batched, best-effort, append-only JSONL sink. Records are queued on
//! an unbounded channel and flushed on a short interval or when the batch
//! fills; write failures are logged and never block the pipeline.

use crate::events::Envelope;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const BATCH_SIZE: usize = 32;
const FLUSH_INTERVAL_MS: u64 = 2_000;

/// One activity record, serialized as a JSONL line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityRecord {
    Event {
        seq: u64,
        event: String,
        ts: String,
        data: Value,
    },
    RunStarted {
        run_id: String,
        source_url: String,
        ts: String,
    },
    RunStopped {
        run_id: String,
        reason: String,
        ts: String,
    },
    Action {
        run_id: String,
        action: String,
        claim_id: Option<String>,
        detail: Option<String>,
        ts: String,
    },
}

/// Cheap cloneable handle. A handle without a sink drops records.
#[derive(Debug, Clone, Default)]
pub struct ActivityHandle {
    tx: Option<mpsc::UnboundedSender<ActivityRecord>>,
}

impl ActivityHandle {
    /// A disabled handle; every record is dropped.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, record: ActivityRecord) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(record);
        }
    }

    pub fn record_envelope(&self, envelope: &Arc<Envelope>) {
        self.record(ActivityRecord::Event {
            seq: envelope.seq,
            event: envelope.event.clone(),
            ts: envelope.ts.clone(),
            data: envelope.data.clone(),
        });
    }
}

/// Spawn the batching writer task. Returns a handle producers clone.
pub fn spawn(path: Option<PathBuf>) -> ActivityHandle {
    let Some(path) = path else {
        return ActivityHandle::disabled();
    };
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(writer_task(path, rx));
    ActivityHandle { tx: Some(tx) }
}

async fn writer_task(path: PathBuf, mut rx: mpsc::UnboundedReceiver<ActivityRecord>) {
    let mut batch: Vec<ActivityRecord> = Vec::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(FLUSH_INTERVAL_MS));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            record = rx.recv() => {
                match record {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= BATCH_SIZE {
                            flush(&path, &mut batch).await;
                        }
                    }
                    None => {
                        flush(&path, &mut batch).await;
                        debug!("activity sink channel closed");
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                flush(&path, &mut batch).await;
            }
        }
    }
}

async fn flush(path: &PathBuf, batch: &mut Vec<ActivityRecord>) {
    if batch.is_empty() {
        return;
    }
    let mut lines = String::new();
    for record in batch.drain(..) {
        match serde_json::to_string(&record) {
            Ok(line) => {
                lines.push_str(&line);
                lines.push('\n');
            }
            Err(e) => warn!("activity record serialization failed: {e}"),
        }
    }

    let result = async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        warn!("activity log write failed: {e}");
    }
}
