//! In-process bridge: Coordinator, Scanner and Answer Extractor contexts wired
//! over the message bus, driving simulated pages.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chatbridge_coordinator::{Coordinator, MemorySettingsStore, SettingsService};
use chatbridge_core::activity::ActivityEntry;
use chatbridge_core::bus::BridgePort;
use chatbridge_core::config::BridgeConfig;
use chatbridge_core::protocol::{BridgeMessage, BridgeResponse};
use chatbridge_core::traits::{PageDriver, SettingsStore};
use chatbridge_core::types::Settings;
use chatbridge_extractor::AnswerExtractor;
use chatbridge_scanner::Scanner;
use chatbridge_sim::{AnswerPageOptions, SimAnswerPage, SimHost, SimMessenger};
use tokio_stream::StreamExt;

/// Divide every timing in `config` by `factor`.
pub fn compressed(config: &BridgeConfig, factor: u64) -> BridgeConfig {
    let f = factor.max(1);
    let scale = |ms: u64| (ms / f).max(1);
    let mut c = config.clone();
    c.coordinator.answer_timeout_ms = scale(c.coordinator.answer_timeout_ms);
    c.coordinator.existing_page_load_ms = scale(c.coordinator.existing_page_load_ms);
    c.coordinator.new_page_load_ms = scale(c.coordinator.new_page_load_ms);
    c.coordinator.load_poll_ms = scale(c.coordinator.load_poll_ms);
    c.coordinator.extractor_warmup_ms = scale(c.coordinator.extractor_warmup_ms);
    c.coordinator.recently_submitted_ttl_ms = scale(c.coordinator.recently_submitted_ttl_ms);
    c.extractor.duplicate_window_ms = scale(c.extractor.duplicate_window_ms);
    c.extractor.primary_input_wait_ms = scale(c.extractor.primary_input_wait_ms);
    c.extractor.fallback_input_wait_ms = scale(c.extractor.fallback_input_wait_ms);
    c.extractor.pre_submit_ms = scale(c.extractor.pre_submit_ms);
    c.extractor.post_enter_ms = scale(c.extractor.post_enter_ms);
    c.extractor.reply_settle_ms = scale(c.extractor.reply_settle_ms);
    c.scanner.poll_ms = scale(c.scanner.poll_ms);
    c.scanner.inter_question_ms = scale(c.scanner.inter_question_ms);
    c.scanner.busy_grace_ms = scale(c.scanner.busy_grace_ms);
    c.scanner.resume_ms = scale(c.scanner.resume_ms);
    c.delivery.retry_backoff_ms = scale(c.delivery.retry_backoff_ms);
    c.delivery.draft_settle_ms = scale(c.delivery.draft_settle_ms);
    c
}

/// Canned knowledge base standing in for the answer service.
pub fn faq_responder(prompt: &str) -> String {
    let question = prompt.rsplit("Question:").next().unwrap_or(prompt).to_lowercase();
    if question.contains("ship") {
        "We ship nationwide within 3-5 business days.".into()
    } else if question.contains("open") || question.contains("hours") {
        "We are open 9:00-18:00, Monday to Saturday.".into()
    } else if question.contains("price") || question.contains("how much") {
        "Prices start at 199k. Reply with the product name for an exact quote.".into()
    } else {
        "NOTFOUND".into()
    }
}

/// All contexts of one bridge instance.
pub struct Bridge {
    pub coordinator_port: BridgePort,
    pub scanner: Arc<Scanner>,
    pub messenger: Arc<SimMessenger>,
    pub answer_page: Arc<SimAnswerPage>,
    pub host: Arc<SimHost>,
}

impl Bridge {
    /// Wire everything up and initialize the Scanner from `settings`.
    pub async fn launch(config: &BridgeConfig, settings: Settings) -> Result<Self> {
        let (coordinator_port, coordinator_mailbox) = BridgePort::channel("coordinator", 64);

        let answer_page = Arc::new(SimAnswerPage::new(
            config.extractor.locators.clone(),
            AnswerPageOptions::default(),
            faq_responder,
        ));
        let driver: Arc<dyn PageDriver> = answer_page.clone();
        let extractor = Arc::new(AnswerExtractor::new(driver, config.extractor.clone(), coordinator_port.clone()));
        let host = Arc::new(SimHost::new(move |_| Ok(extractor.attach())));
        host.set_new_page_load_polls(2);

        let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::with(settings));
        let service = Arc::new(SettingsService::load(Arc::clone(&store)).await?);
        let coordinator = Arc::new(Coordinator::new(host.clone(), service.clone(), config.coordinator.clone()));
        coordinator.spawn(coordinator_mailbox);

        let messenger = Arc::new(SimMessenger::new());
        let (scanner_port, scanner_mailbox) = BridgePort::channel("scanner", 64);
        let scanner = Arc::new(Scanner::new(
            messenger.clone(),
            coordinator_port.clone(),
            store,
            config.scanner.clone(),
            config.delivery.clone(),
        ));
        scanner.clone().spawn(scanner_mailbox);
        host.add_messaging_page(scanner_port.clone());
        service.subscribe(scanner_port);

        let mut updates = service.updates();
        tokio::spawn(async move {
            while let Some(s) = updates.next().await {
                tracing::debug!("settings now enabled={} partial={}", s.is_enabled, s.is_partial_automation);
            }
        });

        scanner.initialize().await;
        Ok(Self { coordinator_port, scanner, messenger, answer_page, host })
    }

    /// Press the partial-mode "continue" control through the Coordinator.
    pub async fn press_continue(&self) -> Result<BridgeResponse> {
        Ok(self.coordinator_port.request(BridgeMessage::ContinueScanning).await?)
    }

    pub async fn activity(&self) -> Result<Vec<ActivityEntry>> {
        match self.coordinator_port.request(BridgeMessage::GetActivityLog).await? {
            BridgeResponse::Activity { entries } => Ok(entries),
            other => anyhow::bail!("unexpected activity reply: {other:?}"),
        }
    }

    pub fn shutdown(&self) {
        self.scanner.stop();
    }
}

/// Scripted customer traffic: (offset, sender, text).
pub fn demo_traffic() -> Vec<(Duration, &'static str, &'static str)> {
    vec![
        (Duration::from_millis(0), "Lan Anh", "Hi, do you ship to Da Nang?"),
        (Duration::from_millis(100), "Minh", "What are your opening hours?"),
        (Duration::from_millis(2_000), "Quang", "Can I pay with crypto?"),
        (Duration::from_millis(4_000), "Thu", "How much is the blue jacket?"),
    ]
}
