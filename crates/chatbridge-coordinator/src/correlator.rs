//! Request Correlator — the single-flight gate.
//!
//! At most one answer request is pending process-wide. A second `submit`
//! while one is pending fails with `Busy` and leaves the first untouched.
//! The pending request ends exactly once, whichever comes first:
//!
//! - a matching `chatGPTResponse` resolves it
//! - the timeout rejects it with `Timeout`
//! - a dispatch step (page, injection, send) rejects it with `Transport`
//!
//! Ending is idempotent and always cancels the timer. A reply arriving
//! after that finds no matching slot and is dropped with a warning.

use std::sync::{Arc, Mutex, MutexGuard};

use chatbridge_core::config::CoordinatorConfig;
use chatbridge_core::error::{BridgeError, Result};
use chatbridge_core::protocol::{ExtractorAck, ExtractorCommand};
use chatbridge_core::traits::{PageHost, PageKind};
use chatbridge_core::types::preview;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::pages::acquire_page;

/// The one in-flight request.
struct PendingRequest {
    id: String,
    reply: oneshot::Sender<Result<String>>,
    timer: Option<AbortHandle>,
    dispatch: Option<AbortHandle>,
}

impl PendingRequest {
    fn finish(self, outcome: Result<String>) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
        if let Some(dispatch) = &self.dispatch {
            dispatch.abort();
        }
        let _ = self.reply.send(outcome);
    }
}

/// What happened to an incoming reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMatch {
    /// Resolved the pending request.
    Matched,
    /// Nothing was pending; dropped.
    Orphan,
    /// Carried the id of an older request; dropped, pending request kept.
    Mismatched,
}

pub struct RequestCorrelator {
    slot: Mutex<Option<PendingRequest>>,
    host: Arc<dyn PageHost>,
    config: CoordinatorConfig,
}

impl RequestCorrelator {
    pub fn new(host: Arc<dyn PageHost>, config: CoordinatorConfig) -> Self {
        Self { slot: Mutex::new(None), host, config }
    }

    fn slot(&self) -> MutexGuard<'_, Option<PendingRequest>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot().is_some()
    }

    pub fn pending_id(&self) -> Option<String> {
        self.slot().as_ref().map(|p| p.id.clone())
    }

    /// Ask the answer service one question and wait for the reply.
    pub async fn submit(self: &Arc<Self>, question: String) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.slot();
            if slot.is_some() {
                tracing::warn!("⛔ Request rejected, another one is in flight");
                return Err(BridgeError::Busy);
            }
            *slot = Some(PendingRequest { id: id.clone(), reply: tx, timer: None, dispatch: None });
        }
        tracing::info!("🚀 Request {} accepted: {}", short(&id), preview(&question));

        let timeout = self.config.answer_timeout();
        let timer = {
            let this = Arc::clone(self);
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if this.reject(&id, BridgeError::Timeout(format!("no answer within {timeout:?}"))) {
                    tracing::warn!("⏰ Request {} timed out", short(&id));
                }
            })
        };
        let dispatch = {
            let this = Arc::clone(self);
            let id = id.clone();
            tokio::spawn(async move {
                if let Err(e) = this.dispatch(&id, question).await {
                    tracing::error!("❌ Request {} dispatch failed: {e}", short(&id));
                    let err = match e {
                        BridgeError::Duplicate(_) | BridgeError::Transport(_) => e,
                        other => BridgeError::Transport(other.to_string()),
                    };
                    this.reject(&id, err);
                }
            })
        };

        {
            let mut slot = self.slot();
            match slot.as_mut() {
                Some(pending) if pending.id == id => {
                    pending.timer = Some(timer.abort_handle());
                    pending.dispatch = Some(dispatch.abort_handle());
                }
                _ => timer.abort(),
            }
        }

        rx.await
            .unwrap_or_else(|_| Err(BridgeError::Transport("pending request dropped".into())))
    }

    /// Locate the page, inject a fresh extractor and hand it the question.
    async fn dispatch(&self, id: &str, question: String) -> Result<()> {
        let page = acquire_page(self.host.as_ref(), PageKind::AnswerService, &self.config).await?;
        let extractor = self.host.inject_extractor(page).await?;
        tokio::time::sleep(self.config.extractor_warmup()).await;
        let ack = extractor
            .request(ExtractorCommand::AskQuestion { request_id: id.to_string(), question })
            .await?;
        match ack {
            ExtractorAck::Processing => Ok(()),
            ExtractorAck::SkippedRecentDuplicate => {
                Err(BridgeError::Duplicate("extractor skipped a recent duplicate question".into()))
            }
        }
    }

    /// Feed a `chatGPTResponse` into the gate.
    pub fn resolve(&self, request_id: Option<&str>, answer: Option<String>, error: Option<String>) -> ReplyMatch {
        let pending = {
            let mut slot = self.slot();
            let Some(pending_id) = slot.as_ref().map(|p| p.id.clone()) else {
                tracing::warn!("⚠️ Received a response but no request is pending, discarding");
                return ReplyMatch::Orphan;
            };
            if let Some(rid) = request_id.filter(|rid| *rid != pending_id) {
                tracing::warn!("⚠️ Late response for {} while {} is pending, discarding", short(rid), short(&pending_id));
                return ReplyMatch::Mismatched;
            }
            slot.take()
        };
        if let Some(pending) = pending {
            tracing::info!("✅ Request {} answered", short(&pending.id));
            let outcome = match error {
                Some(message) => Err(BridgeError::Transport(message)),
                None => Ok(answer.unwrap_or_default()),
            };
            pending.finish(outcome);
        }
        ReplyMatch::Matched
    }

    /// End request `id` with an error. False if it was already gone.
    pub fn reject(&self, id: &str, err: BridgeError) -> bool {
        let pending = {
            let mut slot = self.slot();
            if slot.as_ref().is_some_and(|p| p.id == id) { slot.take() } else { None }
        };
        match pending {
            Some(p) => {
                p.finish(Err(err));
                true
            }
            None => false,
        }
    }
}

fn short(id: &str) -> &str {
    chatbridge_core::types::safe_truncate(id, 8)
}
