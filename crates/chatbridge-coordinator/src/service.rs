//! Coordinator context: message router around the correlator and settings.

use std::sync::{Arc, Mutex};

use chatbridge_core::activity::ActivityLog;
use chatbridge_core::bus::{BridgeMailbox, BridgePort};
use chatbridge_core::config::CoordinatorConfig;
use chatbridge_core::dedup::{dedup_key, DedupCache};
use chatbridge_core::error::{BridgeError, Result};
use chatbridge_core::protocol::{BridgeMessage, BridgeResponse};
use chatbridge_core::traits::{PageHost, PageKind};
use chatbridge_core::types::{preview, safe_truncate};
use tokio::task::JoinHandle;

use crate::correlator::{ReplyMatch, RequestCorrelator};
use crate::pages::acquire_page;
use crate::settings::SettingsService;

pub struct Coordinator {
    correlator: Arc<RequestCorrelator>,
    settings: Arc<SettingsService>,
    host: Arc<dyn PageHost>,
    config: CoordinatorConfig,
    /// Requests that recently produced an answer.
    recent: Mutex<DedupCache>,
    activity: ActivityLog,
}

impl Coordinator {
    pub fn new(host: Arc<dyn PageHost>, settings: Arc<SettingsService>, config: CoordinatorConfig) -> Self {
        let recent = Mutex::new(DedupCache::with_ttl(config.recently_submitted_ttl()));
        Self {
            correlator: Arc::new(RequestCorrelator::new(Arc::clone(&host), config.clone())),
            settings,
            host,
            config,
            recent,
            activity: ActivityLog::new(),
        }
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    pub fn settings(&self) -> &Arc<SettingsService> {
        &self.settings
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Run the context event loop. Each message is handled on its own task,
    /// so a long answer request never blocks settings or replies.
    pub fn spawn(self: Arc<Self>, mut mailbox: BridgeMailbox) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("🧭 Coordinator started");
            while let Some(envelope) = mailbox.recv().await {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    let (message, responder) = envelope.into_parts();
                    let response = this.handle(message).await;
                    responder.respond(response);
                });
            }
            tracing::info!("🧭 Coordinator stopped");
        })
    }

    pub async fn handle(&self, message: BridgeMessage) -> BridgeResponse {
        tracing::debug!("coordinator <- {}", message.action());
        match message {
            BridgeMessage::GetAnswer { question, conversation_id } => {
                match self.get_answer(&question, conversation_id.as_deref()).await {
                    Ok(answer) => BridgeResponse::Answer { answer },
                    Err(e) => BridgeResponse::error(&e),
                }
            }
            BridgeMessage::OpenConversationAndRespond { conversation_id, answer, sender } => {
                match self.open_and_respond(conversation_id, answer, sender).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        self.activity.error(format!("Could not hand answer to messaging page: {e}"));
                        BridgeResponse::error(&e)
                    }
                }
            }
            BridgeMessage::GetSettings => BridgeResponse::Settings(self.settings.get().await),
            BridgeMessage::SaveSettings { settings } => match self.settings.save(&settings).await {
                Ok(saved) => {
                    self.activity.info(format!(
                        "Settings saved (enabled: {}, partial: {})",
                        saved.is_enabled, saved.is_partial_automation
                    ));
                    BridgeResponse::status("saved")
                }
                Err(e) => BridgeResponse::error(&e),
            },
            BridgeMessage::ChatGptResponse { request_id, answer, error } => {
                match self.correlator.resolve(request_id.as_deref(), answer, error) {
                    ReplyMatch::Matched => BridgeResponse::status("received"),
                    ReplyMatch::Orphan | ReplyMatch::Mismatched => BridgeResponse::status("ignored"),
                }
            }
            BridgeMessage::GetActivityLog => BridgeResponse::Activity { entries: self.activity.entries() },
            msg @ (BridgeMessage::ClearCurrentResponse
            | BridgeMessage::ContinueScanning
            | BridgeMessage::ResetCaches) => self.broadcast(msg).await,
            other => BridgeResponse::error(&BridgeError::Other(format!(
                "{} is not handled by the coordinator",
                other.action()
            ))),
        }
    }

    async fn get_answer(&self, question: &str, conversation_id: Option<&str>) -> Result<String> {
        let key = dedup_key(conversation_id.unwrap_or_default(), question);
        {
            let mut recent = match self.recent.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            recent.purge_expired();
            if recent.contains(&key) {
                tracing::info!("🔁 Recently answered, skipping: {}", preview(question));
                return Err(BridgeError::Duplicate("question was answered recently".into()));
            }
        }

        match self.correlator.submit(question.to_string()).await {
            Ok(answer) => {
                if let Ok(mut recent) = self.recent.lock() {
                    recent.insert(key);
                }
                self.activity.success(format!("Answered: {}", safe_truncate(question.trim(), 80)));
                Ok(answer)
            }
            Err(e) => {
                match &e {
                    BridgeError::Busy => self.activity.warning("Request rejected: another one is in flight"),
                    BridgeError::Timeout(_) => self.activity.error("Answer request timed out"),
                    other => self.activity.error(format!("Answer request failed: {other}")),
                }
                Err(e)
            }
        }
    }

    async fn open_and_respond(
        &self,
        conversation_id: String,
        answer: String,
        sender: Option<String>,
    ) -> Result<BridgeResponse> {
        let page = acquire_page(self.host.as_ref(), PageKind::Messaging, &self.config).await?;
        let scanner = self.host.messaging_port(page).await?;
        let response = scanner
            .request(BridgeMessage::InjectResponse { conversation_id: conversation_id.clone(), answer, sender })
            .await?;
        self.activity.info(format!("Answer handed to conversation {conversation_id}"));
        Ok(response)
    }

    /// Forward a control message to every registered Scanner.
    async fn broadcast(&self, message: BridgeMessage) -> BridgeResponse {
        let page = match self.host.find_page(PageKind::Messaging).await {
            Ok(Some(page)) => page,
            Ok(None) => return BridgeResponse::error(&BridgeError::Transport("no messaging page open".into())),
            Err(e) => return BridgeResponse::error(&e),
        };
        let port: BridgePort = match self.host.messaging_port(page).await {
            Ok(port) => port,
            Err(e) => return BridgeResponse::error(&e),
        };
        match port.request(message).await {
            Ok(resp) => resp,
            Err(e) => BridgeResponse::error(&e),
        }
    }
}
