//! Run-owner event hub.
//!
//! A single serialized task owns all shared run state: the claim map, the
//! recent-claim dedupe map, the bounded event history, the subscriber set
//! and the outgoing sequence counter. Every other worker interacts with
//! it by sending commands; claim mutations and envelope enrichment happen
//! in exactly one place.

use crate::activity::ActivityHandle;
use crate::claims::dedupe::RecentClaims;
use crate::claims::store::{ClaimEvent, ClaimStore, OperateError};
use crate::claims::types::{Claim, ClaimCandidate};
use crate::defaults;
use crate::events::{claim_event_data, Envelope, EventBody};
use chrono::{SecondsFormat, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

/// Replay batch plus a live receiver, handed to each new subscriber.
pub struct Subscription {
    pub replay: Vec<Arc<Envelope>>,
    pub live: broadcast::Receiver<Arc<Envelope>>,
}

enum HubCommand {
    Emit(EventBody),
    BeginRun {
        run_id: String,
        reply: oneshot::Sender<()>,
    },
    Detect {
        candidates: Vec<ClaimCandidate>,
        chunk_start_sec: f64,
        chunk_clock: String,
        reply: oneshot::Sender<Vec<Claim>>,
    },
    Approve {
        claim_id: String,
        expected_version: u64,
        reply: oneshot::Sender<Result<Claim, OperateError>>,
    },
    Reject {
        claim_id: String,
        expected_version: u64,
        reply: oneshot::Sender<Result<Claim, OperateError>>,
    },
    OverrideTag {
        claim_id: String,
        expected_version: u64,
        tag: String,
        reason: String,
        reply: oneshot::Sender<Result<Claim, OperateError>>,
    },
    EnsureExportable {
        claim_id: String,
        expected_version: u64,
        reply: oneshot::Sender<Result<Claim, OperateError>>,
    },
    GetClaim {
        claim_id: String,
        reply: oneshot::Sender<Option<Claim>>,
    },
    ListClaims {
        reply: oneshot::Sender<(Option<String>, Vec<Claim>)>,
    },
    Subscribe {
        last_seq: Option<u64>,
        reply: oneshot::Sender<Subscription>,
    },
}

/// Cheap cloneable handle to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Publish an event. Claim events run through the store merge rules;
    /// events for a different run are dropped.
    pub async fn emit(&self, body: EventBody) {
        let _ = self.tx.send(HubCommand::Emit(body)).await;
    }

    /// Start a new run: clears claims, dedupe state and history.
    pub async fn begin_run(&self, run_id: String) {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HubCommand::BeginRun { run_id, reply })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Promote detector candidates to claims. Duplicates within the recent
    /// window are dropped; the created snapshots come back in order.
    pub async fn detect(
        &self,
        candidates: Vec<ClaimCandidate>,
        chunk_start_sec: f64,
        chunk_clock: String,
    ) -> Vec<Claim> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HubCommand::Detect {
                candidates,
                chunk_start_sec,
                chunk_clock,
                reply,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn approve(
        &self,
        claim_id: String,
        expected_version: u64,
    ) -> Result<Claim, OperateError> {
        self.operate(|reply| HubCommand::Approve {
            claim_id,
            expected_version,
            reply,
        })
        .await
    }

    pub async fn reject(
        &self,
        claim_id: String,
        expected_version: u64,
    ) -> Result<Claim, OperateError> {
        self.operate(|reply| HubCommand::Reject {
            claim_id,
            expected_version,
            reply,
        })
        .await
    }

    pub async fn override_tag(
        &self,
        claim_id: String,
        expected_version: u64,
        tag: String,
        reason: String,
    ) -> Result<Claim, OperateError> {
        self.operate(|reply| HubCommand::OverrideTag {
            claim_id,
            expected_version,
            tag,
            reason,
            reply,
        })
        .await
    }

    pub async fn ensure_exportable(
        &self,
        claim_id: String,
        expected_version: u64,
    ) -> Result<Claim, OperateError> {
        self.operate(|reply| HubCommand::EnsureExportable {
            claim_id,
            expected_version,
            reply,
        })
        .await
    }

    async fn operate<F>(&self, build: F) -> Result<Claim, OperateError>
    where
        F: FnOnce(oneshot::Sender<Result<Claim, OperateError>>) -> HubCommand,
    {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(build(reply)).await.is_err() {
            return Err(OperateError::Unavailable);
        }
        rx.await.unwrap_or(Err(OperateError::Unavailable))
    }

    pub async fn get_claim(&self, claim_id: String) -> Option<Claim> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HubCommand::GetClaim { claim_id, reply })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Current run id (if any run ever started) and all claim snapshots.
    pub async fn list_claims(&self) -> (Option<String>, Vec<Claim>) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(HubCommand::ListClaims { reply }).await.is_err() {
            return (None, Vec::new());
        }
        rx.await.unwrap_or((None, Vec::new()))
    }

    /// Subscribe with optional Last-Event-ID replay.
    pub async fn subscribe(&self, last_seq: Option<u64>) -> Option<Subscription> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HubCommand::Subscribe { last_seq, reply })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok()
    }
}

struct HubState {
    run_id: Option<String>,
    claims: ClaimStore,
    recent: RecentClaims,
    claim_counter: u64,
    seq: u64,
    history: VecDeque<Arc<Envelope>>,
    broadcast: broadcast::Sender<Arc<Envelope>>,
    activity: ActivityHandle,
}

impl HubState {
    fn next_claim_id(&mut self) -> String {
        self.claim_counter += 1;
        let run_id = self.run_id.as_deref().unwrap_or("run");
        format!("{}-c{:04}", run_id, self.claim_counter)
    }

    fn envelope(&mut self, kind: &str, data: serde_json::Value) {
        self.seq += 1;
        let envelope = Arc::new(Envelope {
            seq: self.seq,
            event: kind.to_string(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
        });
        self.history.push_back(envelope.clone());
        while self.history.len() > defaults::EVENT_HISTORY_CAP {
            self.history.pop_front();
        }
        self.activity.record_envelope(&envelope);
        let _ = self.broadcast.send(envelope);
    }

    fn emit_claim(&mut self, event: &ClaimEvent, snapshot: &Claim) {
        self.envelope(event.kind(), claim_event_data(event, snapshot));
    }

    fn publish(&mut self, body: EventBody) {
        // Events from a previous run are dropped wholesale.
        if self.run_id.as_deref() != Some(body.run_id()) {
            debug!(kind = body.kind(), "dropping event for inactive run");
            return;
        }
        match body {
            EventBody::Claim(event) => match self.claims.apply(&event, Utc::now()) {
                Ok(snapshot) => self.emit_claim(&event, &snapshot),
                Err(e) => debug!(kind = event.kind(), "claim event dropped: {e:?}"),
            },
            other => {
                let data = other.data();
                self.envelope(other.kind(), data);
            }
        }
    }

    fn detect(
        &mut self,
        candidates: Vec<ClaimCandidate>,
        chunk_start_sec: f64,
        chunk_clock: String,
    ) -> Vec<Claim> {
        let Some(run_id) = self.run_id.clone() else {
            return Vec::new();
        };
        let mut created = Vec::new();
        for candidate in candidates {
            if !self.recent.insert(&candidate.text) {
                continue;
            }
            let claim_id = self.next_claim_id();
            let event = ClaimEvent::Detected {
                run_id: run_id.clone(),
                claim_id: claim_id.clone(),
                candidate,
                chunk_start_sec,
                chunk_clock: chunk_clock.clone(),
            };
            if let Ok(snapshot) = self.claims.apply(&event, Utc::now()) {
                self.emit_claim(&event, &snapshot);
                created.push(snapshot);
            }
        }
        created
    }

    fn subscription(&self, last_seq: Option<u64>) -> Subscription {
        let replay: Vec<Arc<Envelope>> = match last_seq {
            Some(last) => {
                let newer: Vec<Arc<Envelope>> = self
                    .history
                    .iter()
                    .filter(|e| e.seq > last)
                    .cloned()
                    .collect();
                // Keep the most recent cap so replay stays contiguous with
                // the live stream.
                let skip = newer.len().saturating_sub(defaults::EVENT_REPLAY_CAP);
                newer.into_iter().skip(skip).collect()
            }
            None => {
                let skip = self
                    .history
                    .len()
                    .saturating_sub(defaults::EVENT_REPLAY_DEFAULT);
                self.history.iter().skip(skip).cloned().collect()
            }
        };
        Subscription {
            replay,
            live: self.broadcast.subscribe(),
        }
    }
}

/// Spawn the hub task.
pub fn spawn(activity: ActivityHandle) -> HubHandle {
    let (tx, rx) = mpsc::channel(256);
    let (broadcast_tx, _) = broadcast::channel(512);
    let state = HubState {
        run_id: None,
        claims: ClaimStore::new(),
        recent: RecentClaims::default(),
        claim_counter: 0,
        seq: 0,
        history: VecDeque::new(),
        broadcast: broadcast_tx,
        activity,
    };
    tokio::spawn(hub_task(state, rx));
    HubHandle { tx }
}

async fn hub_task(mut state: HubState, mut rx: mpsc::Receiver<HubCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            HubCommand::Emit(body) => state.publish(body),
            HubCommand::BeginRun { run_id, reply } => {
                state.run_id = Some(run_id);
                state.claims.clear();
                state.recent.clear();
                state.claim_counter = 0;
                state.history.clear();
                let _ = reply.send(());
            }
            HubCommand::Detect {
                candidates,
                chunk_start_sec,
                chunk_clock,
                reply,
            } => {
                let created = state.detect(candidates, chunk_start_sec, chunk_clock);
                let _ = reply.send(created);
            }
            HubCommand::Approve {
                claim_id,
                expected_version,
                reply,
            } => {
                let result = state.claims.approve(&claim_id, expected_version, Utc::now());
                if let Ok(snapshot) = &result {
                    let event = ClaimEvent::OutputApproved {
                        run_id: snapshot.run_id.clone(),
                        claim_id,
                    };
                    let snapshot = snapshot.clone();
                    state.emit_claim(&event, &snapshot);
                }
                let _ = reply.send(result);
            }
            HubCommand::Reject {
                claim_id,
                expected_version,
                reply,
            } => {
                let result = state.claims.reject(&claim_id, expected_version, Utc::now());
                if let Ok(snapshot) = &result {
                    let event = ClaimEvent::OutputRejected {
                        run_id: snapshot.run_id.clone(),
                        claim_id,
                    };
                    let snapshot = snapshot.clone();
                    state.emit_claim(&event, &snapshot);
                }
                let _ = reply.send(result);
            }
            HubCommand::OverrideTag {
                claim_id,
                expected_version,
                tag,
                reason,
                reply,
            } => {
                let result = state
                    .claims
                    .override_tag(&claim_id, expected_version, &tag, &reason);
                if let Ok(snapshot) = &result {
                    // Tag overrides surface as claim.updated with the new
                    // snapshot embedded.
                    let data = serde_json::json!({
                        "runId": snapshot.run_id,
                        "claimId": claim_id,
                        "claim": snapshot,
                        "override": { "tag": tag, "reason": reason },
                    });
                    state.envelope("claim.updated", data);
                }
                let _ = reply.send(result);
            }
            HubCommand::EnsureExportable {
                claim_id,
                expected_version,
                reply,
            } => {
                let _ = reply.send(state.claims.ensure_exportable(&claim_id, expected_version));
            }
            HubCommand::GetClaim { claim_id, reply } => {
                let _ = reply.send(state.claims.get(&claim_id).cloned());
            }
            HubCommand::ListClaims { reply } => {
                let _ = reply.send((state.run_id.clone(), state.claims.list()));
            }
            HubCommand::Subscribe { last_seq, reply } => {
                let _ = reply.send(state.subscription(last_seq));
            }
        }
    }
}
