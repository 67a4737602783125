//! Answer Extractor context: message loop, duplicate guard, reporting.

use std::sync::{Arc, Mutex};

use chatbridge_core::bus::{BridgePort, ExtractorPort};
use chatbridge_core::config::ExtractorConfig;
use chatbridge_core::dedup::DedupCache;
use chatbridge_core::error::Result;
use chatbridge_core::protocol::{BridgeMessage, ExtractorAck, ExtractorCommand};
use chatbridge_core::traits::PageDriver;
use chatbridge_core::types::preview;

use crate::reply::extract_reply;
use crate::submit::{enter_text, locate_input, submit, SubmitOutcome};

/// Page-scoped extractor state. Each injection attaches a fresh context to it,
/// so the duplicate guard survives re-injection into the same page.
pub struct AnswerExtractor {
    driver: Arc<dyn PageDriver>,
    config: ExtractorConfig,
    coordinator: BridgePort,
    recent: Mutex<DedupCache>,
}

impl AnswerExtractor {
    pub fn new(driver: Arc<dyn PageDriver>, config: ExtractorConfig, coordinator: BridgePort) -> Self {
        let recent = Mutex::new(DedupCache::with_ttl(config.duplicate_window()));
        Self { driver, config, coordinator, recent }
    }

    /// Start a context serving this page and return its port.
    pub fn attach(self: &Arc<Self>) -> ExtractorPort {
        let (port, mut mailbox) = ExtractorPort::channel("answer-extractor", 8);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(mut envelope) = mailbox.recv().await {
                let ack = this.handle(envelope.message.clone());
                envelope.respond(ack);
            }
            tracing::debug!("answer extractor context closed");
        });
        port
    }

    /// Acknowledge a command; accepted questions run in the background.
    pub fn handle(self: &Arc<Self>, command: ExtractorCommand) -> ExtractorAck {
        let ExtractorCommand::AskQuestion { request_id, question } = command;
        if !self.remember(&question) {
            tracing::info!("🔁 Duplicate question within window, skipping: {}", preview(&question));
            return ExtractorAck::SkippedRecentDuplicate;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.submit_and_report(request_id, question).await });
        ExtractorAck::Processing
    }

    /// Returns false if the same question arrived within the window.
    fn remember(&self, question: &str) -> bool {
        let mut recent = match self.recent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        recent.purge_expired();
        recent.insert(question.trim())
    }

    async fn submit_and_report(&self, request_id: String, question: String) {
        let report = match self.ask(&question).await {
            Ok(answer) => {
                tracing::info!("📨 Reply extracted ({} chars)", answer.chars().count());
                BridgeMessage::ChatGptResponse { request_id: Some(request_id), answer: Some(answer), error: None }
            }
            Err(e) => {
                tracing::error!("❌ Extraction failed: {e}");
                BridgeMessage::ChatGptResponse { request_id: Some(request_id), answer: None, error: Some(e.to_string()) }
            }
        };
        if let Err(e) = self.coordinator.notify(report).await {
            tracing::warn!("⚠️ Could not report back to coordinator: {e}");
        }
    }

    /// Submit one question and read the reply. Empty reply is a valid result.
    pub async fn ask(&self, question: &str) -> Result<String> {
        let driver = self.driver.as_ref();
        tracing::info!("✍️ Submitting question: {}", preview(question));

        let input = locate_input(driver, &self.config).await?;
        enter_text(driver, input, question).await?;
        tokio::time::sleep(self.config.pre_submit()).await;

        match submit(driver, input, question, &self.config).await? {
            SubmitOutcome::Unknown => {
                tracing::warn!("⚠️ Submission could not be confirmed, reading the page anyway");
            }
            outcome => tracing::debug!("submission outcome: {outcome:?}"),
        }

        tokio::time::sleep(self.config.reply_settle()).await;
        extract_reply(driver, &self.config.locators).await
    }
}
