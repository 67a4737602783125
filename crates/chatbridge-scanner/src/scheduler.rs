//! Automation-cycle scheduler.
//!
//! Backpressure comes from the delivery slot: while a job is staged or being
//! delivered, every cycle is a no-op. Within a cycle questions go to the
//! Coordinator strictly one at a time, and the first real answer ends the
//! cycle. Nothing here ever stops the polling loop except [`Scanner::stop`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chatbridge_core::bus::{BridgeMailbox, BridgePort};
use chatbridge_core::config::{DeliveryConfig, ScannerConfig};
use chatbridge_core::dedup::{dedup_key, DedupCache};
use chatbridge_core::error::{BridgeError, ErrorKind, Result};
use chatbridge_core::protocol::{BridgeMessage, BridgeResponse};
use chatbridge_core::traits::{MessagingSurface, SettingsStore};
use chatbridge_core::types::{format_prompt, preview, AnswerOutcome, DeliveryJob, Question, Settings};
use tokio::task::JoinHandle;

use crate::delivery::{AttemptResult, Delivered, DeliveryMachine, DeliverySlot, DeliveryState};

/// Why a cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Stopped,
    DeliveryPending,
    ScanInProgress,
    Disabled,
    /// Partial mode, waiting for the manual continue.
    AwaitingContinue,
}

/// Counters for one cycle that did scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub discovered: usize,
    pub submitted: usize,
    pub cached: usize,
    pub not_found: usize,
    pub failed: usize,
    pub staged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    Skipped(SkipReason),
    Scanned(CycleSummary),
}

struct ScannerState {
    running: bool,
    ready_to_scan: bool,
    scan_in_progress: bool,
    slot: DeliverySlot,
    delivery_state: DeliveryState,
    not_found: DedupCache,
    processed: DedupCache,
    /// conversation id → sender, learned while scanning.
    directory: HashMap<String, String>,
}

pub struct Scanner {
    surface: Arc<dyn MessagingSurface>,
    coordinator: BridgePort,
    settings: Arc<dyn SettingsStore>,
    config: ScannerConfig,
    machine: DeliveryMachine,
    state: Mutex<ScannerState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Clears `scan_in_progress` however the cycle exits.
struct ScanGuard<'a>(&'a Scanner);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.state().scan_in_progress = false;
    }
}

impl Scanner {
    pub fn new(
        surface: Arc<dyn MessagingSurface>,
        coordinator: BridgePort,
        settings: Arc<dyn SettingsStore>,
        config: ScannerConfig,
        delivery: DeliveryConfig,
    ) -> Self {
        Self {
            machine: DeliveryMachine::new(Arc::clone(&surface), delivery),
            surface,
            coordinator,
            settings,
            config,
            state: Mutex::new(ScannerState {
                running: false,
                ready_to_scan: true,
                scan_in_progress: false,
                slot: DeliverySlot::new(),
                delivery_state: DeliveryState::Idle,
                not_found: DedupCache::permanent(),
                processed: DedupCache::permanent(),
                directory: HashMap::new(),
            }),
            timer: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScannerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn is_ready_to_scan(&self) -> bool {
        self.state().ready_to_scan
    }

    pub fn delivery_pending(&self) -> bool {
        self.state().slot.is_busy()
    }

    pub fn delivery_state(&self) -> DeliveryState {
        self.state().delivery_state
    }

    pub fn staged_job(&self) -> Option<DeliveryJob> {
        self.state().slot.staged().cloned()
    }

    pub fn is_processed(&self, conversation_id: &str, text: &str) -> bool {
        self.state().processed.contains(&dedup_key(conversation_id, text))
    }

    pub fn is_not_found(&self, conversation_id: &str, text: &str) -> bool {
        self.state().not_found.contains(&dedup_key(conversation_id, text))
    }

    async fn current_settings(&self) -> Settings {
        match self.settings.load().await {
            Ok(s) => s.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("⚠️ Could not read settings, treating as disabled: {e}");
                Settings::default()
            }
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════

    /// Arm ready-to-scan, clear stale markers, start the periodic timer.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut state = self.state();
            state.running = true;
            state.ready_to_scan = true;
        }
        match self.surface.clear_pending_markers().await {
            Ok(n) if n > 0 => tracing::info!("🧹 Cleared {n} stale pending markers"),
            Ok(_) => {}
            Err(e) => tracing::warn!("⚠️ Could not clear pending markers: {e}"),
        }

        let this = Arc::clone(self);
        let poll = self.config.poll();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let cycle = Arc::clone(&this);
                tokio::spawn(async move { cycle.run_cycle().await });
            }
        });
        if let Some(old) = self.timer_slot().replace(handle) {
            old.abort();
        }
        tracing::info!("▶️ Scanner started (poll every {:?})", poll);
    }

    /// Cancel the timer and force-clear any staged delivery.
    pub fn stop(&self) {
        if let Some(handle) = self.timer_slot().take() {
            handle.abort();
        }
        let mut state = self.state();
        state.running = false;
        if state.slot.force_clear() {
            tracing::info!("🛑 Staged delivery discarded on stop");
        }
        state.delivery_state = DeliveryState::Idle;
        tracing::info!("⏹️ Scanner stopped");
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start if the stored settings say enabled.
    pub async fn initialize(self: &Arc<Self>) {
        if self.current_settings().await.is_enabled {
            self.start().await;
        } else {
            tracing::info!("💤 Automation disabled, scanner idle");
        }
    }

    fn schedule_cycle(self: &Arc<Self>, delay: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.run_cycle().await;
        });
    }

    // ═══════════════════════════════════════════════════════════
    // Cycle
    // ═══════════════════════════════════════════════════════════

    /// One automation cycle.
    pub async fn run_cycle(self: Arc<Self>) -> CycleReport {
        {
            let mut state = self.state();
            let skip = if !state.running {
                Some(SkipReason::Stopped)
            } else if state.slot.is_busy() {
                Some(SkipReason::DeliveryPending)
            } else if state.scan_in_progress {
                Some(SkipReason::ScanInProgress)
            } else {
                None
            };
            if let Some(reason) = skip {
                tracing::debug!("cycle skipped: {reason:?}");
                return CycleReport::Skipped(reason);
            }
            state.scan_in_progress = true;
        }
        let guard = ScanGuard(self.as_ref());

        let settings = self.current_settings().await;
        if !settings.is_enabled {
            return CycleReport::Skipped(SkipReason::Disabled);
        }
        {
            let mut state = self.state();
            if settings.is_partial_automation {
                if !state.ready_to_scan {
                    tracing::debug!("cycle skipped: waiting for continue");
                    return CycleReport::Skipped(SkipReason::AwaitingContinue);
                }
            } else {
                state.ready_to_scan = true;
            }
        }

        let questions = match self.surface.extract_questions().await {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!("⚠️ Question discovery failed: {e}");
                return CycleReport::Scanned(CycleSummary { failed: 1, ..Default::default() });
            }
        };
        if !questions.is_empty() {
            tracing::info!("🔎 Found {} question(s)", questions.len());
        }

        let summary = self.process_questions(questions).await;
        drop(guard);

        if summary.staged {
            let this = Arc::clone(&self);
            tokio::spawn(async move { this.run_delivery().await });
        }
        CycleReport::Scanned(summary)
    }

    async fn process_questions(&self, questions: Vec<Question>) -> CycleSummary {
        let mut summary = CycleSummary { discovered: questions.len(), ..Default::default() };

        for (idx, q) in questions.iter().enumerate() {
            if !self.is_running() {
                self.unmark_all(&questions[idx..]).await;
                break;
            }
            let key = dedup_key(&q.conversation_id, &q.text);
            let cached = {
                let mut state = self.state();
                state.directory.insert(q.conversation_id.clone(), q.sender.clone());
                state.not_found.contains(&key) || state.processed.contains(&key)
            };
            if cached {
                tracing::debug!("cached, skipping: {}", preview(&q.text));
                summary.cached += 1;
                self.unmark(q).await;
                continue;
            }

            if summary.submitted > 0 {
                tokio::time::sleep(self.config.inter_question()).await;
                if !self.is_running() {
                    self.unmark_all(&questions[idx..]).await;
                    break;
                }
            }
            summary.submitted += 1;

            let prompt = format_prompt(&self.config.prompt_template, &q.conversation_id, &q.text);
            tracing::info!("❓ Asking for {}: {}", q.sender, preview(&q.text));
            let response = self
                .coordinator
                .request(BridgeMessage::GetAnswer { question: prompt, conversation_id: Some(q.conversation_id.clone()) })
                .await;

            match response {
                Ok(BridgeResponse::Answer { answer }) => {
                    match AnswerOutcome::classify(&answer, &self.config.not_found_sentinel) {
                        AnswerOutcome::Reply(text) => {
                            let staged = {
                                let mut state = self.state();
                                if state.running {
                                    Some(state.slot.try_stage(DeliveryJob::new(q, text)))
                                } else {
                                    None
                                }
                            };
                            self.unmark(q).await;
                            match staged {
                                Some(Ok(_)) => {
                                    tracing::info!("📦 Answer staged for {}", q.sender);
                                    summary.staged = true;
                                }
                                Some(Err(e)) => tracing::warn!("⚠️ Could not stage answer for {}: {e}", q.sender),
                                None => tracing::info!("🛑 Scanner stopped while asking, dropping answer for {}", q.sender),
                            }
                            self.unmark_all(&questions[idx + 1..]).await;
                            break;
                        }
                        AnswerOutcome::NotFound => {
                            tracing::info!("🚫 No answer available for {}, suppressing", preview(&q.text));
                            self.state().not_found.insert(key);
                            summary.not_found += 1;
                            self.unmark(q).await;
                        }
                        AnswerOutcome::Empty => {
                            tracing::warn!("⚠️ Empty answer for {}", preview(&q.text));
                            summary.failed += 1;
                            self.unmark(q).await;
                        }
                    }
                }
                Ok(BridgeResponse::Error(err)) if err.kind == ErrorKind::Busy => {
                    tracing::info!("⏳ Coordinator busy, keeping marker for {:?}", self.config.busy_grace());
                    summary.failed += 1;
                    self.unmark_later(q);
                }
                Ok(BridgeResponse::Error(err)) => {
                    tracing::warn!("⚠️ Answer failed for {}: {}", q.sender, err);
                    summary.failed += 1;
                    self.unmark(q).await;
                }
                Ok(other) => {
                    tracing::warn!("⚠️ Unexpected reply to answer request: {other:?}");
                    summary.failed += 1;
                    self.unmark(q).await;
                }
                Err(e) => {
                    tracing::error!("❌ Coordinator unreachable: {e}");
                    summary.failed += 1;
                    self.unmark_all(&questions[idx..]).await;
                    break;
                }
            }
        }
        summary
    }

    async fn unmark(&self, q: &Question) {
        if let Err(e) = self.surface.unmark_pending(q.handle).await {
            tracing::debug!("unmark failed: {e}");
        }
    }

    async fn unmark_all(&self, questions: &[Question]) {
        for q in questions {
            self.unmark(q).await;
        }
    }

    fn unmark_later(&self, q: &Question) {
        let surface = Arc::clone(&self.surface);
        let handle = q.handle;
        let grace = self.config.busy_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = surface.unmark_pending(handle).await {
                tracing::debug!("delayed unmark failed: {e}");
            }
        });
    }

    // ═══════════════════════════════════════════════════════════
    // Delivery
    // ═══════════════════════════════════════════════════════════

    /// Drive the staged job to a terminal state, retrying with backoff.
    ///
    /// Every attempt first checks that the slot still holds the claimed job,
    /// so `stop`, `clearCurrentResponse` or `continueScanning` end the loop
    /// even during a backoff. A job staged by `injectResponse` runs while the
    /// scanner is stopped; scanned jobs are never staged once stopped.
    pub async fn run_delivery(self: Arc<Self>) {
        let Some((ticket, mut job)) = self.state().slot.begin() else { return };
        let max = self.machine.config().max_attempts;

        loop {
            let partial = self.current_settings().await.is_partial_automation;
            {
                let mut state = self.state();
                if !state.slot.owns(ticket) {
                    tracing::info!("🛑 Delivery to {} was reset before attempt {}", job.sender, job.retries + 1);
                    return;
                }
                state.delivery_state = DeliveryState::Locating;
            }
            let result = self.machine.attempt(&job, partial).await;

            let retry = {
                let mut state = self.state();
                if !state.slot.owns(ticket) {
                    tracing::info!("🛑 Delivery to {} was reset externally", job.sender);
                    return;
                }
                match result {
                    AttemptResult::Succeeded(outcome) => {
                        state.processed.insert(dedup_key(&job.conversation_id, &job.original_question_text));
                        if outcome == Delivered::Staged {
                            state.ready_to_scan = false;
                        }
                        state.slot.finish();
                        state.delivery_state = DeliveryState::Succeeded;
                        tracing::info!("✅ Delivery to {} finished: {outcome:?}", job.sender);
                        false
                    }
                    AttemptResult::Abandon(reason) => {
                        state.slot.finish();
                        state.delivery_state = DeliveryState::Abandoned;
                        tracing::info!(
                            "🗑️ {} ({}, {} of {max} retries used)",
                            BridgeError::from(reason),
                            job.sender,
                            job.retries
                        );
                        false
                    }
                    AttemptResult::Failed(e) if job.record_failure(max) => {
                        state.slot.finish();
                        state.delivery_state = DeliveryState::Abandoned;
                        tracing::warn!("🗑️ Delivery to {} abandoned after {} attempts: {e}", job.sender, job.retries);
                        false
                    }
                    AttemptResult::Failed(e) => {
                        state.slot.update(ticket, &job);
                        state.delivery_state = DeliveryState::Retrying;
                        tracing::warn!("🔁 Delivery to {} failed ({}/{max}), retrying: {e}", job.sender, job.retries);
                        true
                    }
                }
            };
            if !retry {
                break;
            }
            tokio::time::sleep(self.machine.config().retry_backoff()).await;
        }

        self.schedule_cycle(self.config.resume());
    }

    // ═══════════════════════════════════════════════════════════
    // External controls
    // ═══════════════════════════════════════════════════════════

    /// Manual "continue" in partial mode.
    pub async fn continue_scanning(self: &Arc<Self>) {
        {
            let mut state = self.state();
            state.ready_to_scan = true;
            state.slot.force_clear();
            state.delivery_state = DeliveryState::Idle;
        }
        if let Err(e) = self.surface.clear_pending_markers().await {
            tracing::debug!("marker cleanup failed: {e}");
        }
        if let Err(e) = self.surface.hide_continue_control().await {
            tracing::debug!("hide continue control failed: {e}");
        }
        tracing::info!("⏭️ Continue pressed, resuming scan");
        self.schedule_cycle(self.config.resume());
    }

    /// Reset the delivery state machine.
    pub fn clear_current_response(&self) -> bool {
        let mut state = self.state();
        state.delivery_state = DeliveryState::Idle;
        let cleared = state.slot.force_clear();
        if cleared {
            tracing::info!("🧽 Current response cleared");
        }
        cleared
    }

    /// Forget processed and not-found records.
    pub fn reset_caches(&self) {
        let mut state = self.state();
        state.processed.clear();
        state.not_found.clear();
        tracing::info!("🧹 Processed and not-found caches cleared");
    }

    /// Stage an answer pushed from outside (`openConversationAndRespond`).
    pub fn inject_response(
        self: &Arc<Self>,
        conversation_id: String,
        answer: String,
        sender: Option<String>,
    ) -> Result<()> {
        {
            let mut state = self.state();
            let sender = sender
                .or_else(|| state.directory.get(&conversation_id).cloned())
                .ok_or_else(|| BridgeError::Other(format!("unknown conversation {conversation_id}")))?;
            state.slot.try_stage(DeliveryJob {
                conversation_id,
                sender,
                original_question_text: String::new(),
                answer,
                retries: 0,
            })?;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_delivery().await });
        Ok(())
    }

    async fn on_settings_updated(self: &Arc<Self>) {
        let settings = self.current_settings().await;
        tracing::info!(
            "⚙️ Settings updated: enabled={}, partial={}",
            settings.is_enabled,
            settings.is_partial_automation
        );
        match (settings.is_enabled, self.is_running()) {
            (true, false) => self.start().await,
            (false, true) => self.stop(),
            _ => {}
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Context loop
    // ═══════════════════════════════════════════════════════════

    pub async fn handle(self: &Arc<Self>, message: BridgeMessage) -> BridgeResponse {
        match message {
            BridgeMessage::SettingsUpdated => {
                self.on_settings_updated().await;
                BridgeResponse::status("ok")
            }
            BridgeMessage::ClearCurrentResponse => {
                self.clear_current_response();
                BridgeResponse::status("cleared")
            }
            BridgeMessage::ContinueScanning => {
                self.continue_scanning().await;
                BridgeResponse::status("resumed")
            }
            BridgeMessage::ResetCaches => {
                self.reset_caches();
                BridgeResponse::status("reset")
            }
            BridgeMessage::InjectResponse { conversation_id, answer, sender } => {
                match self.inject_response(conversation_id, answer, sender) {
                    Ok(()) => BridgeResponse::status("staged"),
                    Err(e) => BridgeResponse::error(&e),
                }
            }
            other => BridgeResponse::error(&BridgeError::Other(format!(
                "{} is not handled by the scanner",
                other.action()
            ))),
        }
    }

    pub fn spawn(self: Arc<Self>, mut mailbox: BridgeMailbox) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = mailbox.recv().await {
                let this = Arc::clone(&self);
                tokio::spawn(async move {
                    let (message, responder) = envelope.into_parts();
                    let response = this.handle(message).await;
                    responder.respond(response);
                });
            }
            self.stop();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbridge_coordinator::MemorySettingsStore;
    use chatbridge_core::error::WireError;
    use chatbridge_sim::SimMessenger;
    use tokio::time::Instant;

    type Asked = Arc<Mutex<Vec<(String, Instant)>>>;

    const FULL: Settings = Settings { is_enabled: true, is_partial_automation: false };
    const PARTIAL: Settings = Settings { is_enabled: true, is_partial_automation: true };

    /// Coordinator stand-in answering each framed question after `delay`.
    fn coordinator<F>(delay: Duration, respond: F) -> (BridgePort, Asked)
    where
        F: Fn(&str) -> BridgeResponse + Send + Sync + 'static,
    {
        let (port, mut inbox) = BridgePort::channel("coordinator", 16);
        let asked: Asked = Arc::new(Mutex::new(Vec::new()));
        let log = asked.clone();
        let respond = Arc::new(respond);
        tokio::spawn(async move {
            while let Some(env) = inbox.recv().await {
                let (message, responder) = env.into_parts();
                if let BridgeMessage::GetAnswer { question, .. } = message {
                    log.lock().unwrap().push((question.clone(), Instant::now()));
                    let respond = respond.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        responder.respond(respond(&question));
                    });
                }
            }
        });
        (port, asked)
    }

    fn answer(text: &str) -> BridgeResponse {
        BridgeResponse::Answer { answer: text.into() }
    }

    fn scanner(m: &Arc<SimMessenger>, port: BridgePort, settings: Settings) -> Arc<Scanner> {
        let s = Arc::new(Scanner::new(
            m.clone(),
            port,
            Arc::new(MemorySettingsStore::with(settings)),
            ScannerConfig::default(),
            DeliveryConfig::default(),
        ));
        s.state().running = true;
        s
    }

    /// Wait until the staged delivery reaches a terminal state.
    async fn settle(s: &Arc<Scanner>) {
        for _ in 0..1_000 {
            if !s.delivery_pending() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("delivery never settled");
    }

    fn scanned(report: CycleReport) -> CycleSummary {
        match report {
            CycleReport::Scanned(summary) => summary,
            other => panic!("expected a scan, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_answer_stages_and_ends_cycle() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "How much is shipping?");
        m.customer_says("Bob", "Are you open on Sunday?");
        let (port, asked) = coordinator(Duration::from_secs(2), |q| answer(&format!("reply to {}", q.len())));
        let s = scanner(&m, port, FULL);

        let summary = scanned(s.clone().run_cycle().await);
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.submitted, 1);
        assert!(summary.staged);
        assert_eq!(asked.lock().unwrap().len(), 1);
        assert!(asked.lock().unwrap()[0].0.contains("How much is shipping?"));
        assert_eq!(m.pending_count(), 0);

        settle(&s).await;
        assert_eq!(m.sent().len(), 1);
        assert_eq!(m.sent()[0].0, "Alice");
        assert_eq!(asked.lock().unwrap().len(), 1);
        assert_eq!(s.delivery_state(), DeliveryState::Succeeded);

        // Resume cycle picks up Bob.
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle(&s).await;
        assert_eq!(asked.lock().unwrap().len(), 2);
        assert_eq!(m.sent()[1].0, "Bob");
        s.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_is_framed_with_conversation_id() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        let (port, asked) = coordinator(Duration::ZERO, |_| answer(""));
        let s = scanner(&m, port, FULL);
        s.clone().run_cycle().await;
        let prompt = asked.lock().unwrap()[0].0.clone();
        let conv = chatbridge_core::types::conversation_id_for_sender("Alice");
        assert_eq!(prompt, format!("Customer-id-{conv}\nQuestion: Hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_delivery_blocks_cycle() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        let (port, asked) = coordinator(Duration::ZERO, |_| answer("hello"));
        let s = scanner(&m, port, FULL);
        let q = Question::new("Zed", "old", chatbridge_core::traits::ElementHandle(99));
        s.state().slot.try_stage(DeliveryJob::new(&q, "x")).unwrap();

        for _ in 0..3 {
            assert_eq!(s.clone().run_cycle().await, CycleReport::Skipped(SkipReason::DeliveryPending));
        }
        assert_eq!(m.extract_calls(), 0);
        assert!(asked.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_and_stopped_skip() {
        let m = Arc::new(SimMessenger::new());
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("x"));
        let s = scanner(&m, port.clone(), Settings::default());
        assert_eq!(s.clone().run_cycle().await, CycleReport::Skipped(SkipReason::Disabled));
        assert!(!s.state().scan_in_progress);

        let stopped = scanner(&m, port, FULL);
        stopped.stop();
        assert_eq!(stopped.clone().run_cycle().await, CycleReport::Skipped(SkipReason::Stopped));
        assert_eq!(m.extract_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_permanent() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Do you sell rockets?");
        let (port, asked) = coordinator(Duration::ZERO, |_| answer("NOTFOUND"));
        let s = scanner(&m, port, FULL);

        let first = scanned(s.clone().run_cycle().await);
        assert_eq!(first.not_found, 1);
        assert!(!first.staged);
        for _ in 0..5 {
            let again = scanned(s.clone().run_cycle().await);
            assert_eq!(again.cached, 1);
            assert_eq!(again.submitted, 0);
        }
        assert_eq!(asked.lock().unwrap().len(), 1);
        let conv = chatbridge_core::types::conversation_id_for_sender("Alice");
        assert!(s.is_not_found(&conv, "Do you sell rockets?"));

        s.reset_caches();
        scanned(s.clone().run_cycle().await);
        assert_eq!(asked.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_keeps_marker_for_grace_period() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        let (port, _asked) = coordinator(Duration::ZERO, |_| {
            BridgeResponse::Error(WireError::new(ErrorKind::Busy, "busy"))
        });
        let s = scanner(&m, port, FULL);

        let summary = scanned(s.clone().run_cycle().await);
        assert_eq!(summary.failed, 1);
        assert_eq!(m.pending_count(), 1);
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(m.pending_count(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(m.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_questions_are_spaced_out() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "one");
        m.customer_says("Bob", "two");
        let (port, asked) = coordinator(Duration::from_secs(1), |_| answer("  "));
        let s = scanner(&m, port, FULL);

        let summary = scanned(s.clone().run_cycle().await);
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.failed, 2);
        let asked = asked.lock().unwrap();
        // 1s answer + 15s gap
        assert_eq!(asked[1].1 - asked[0].1, Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_unmarks_remaining() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "one");
        m.customer_says("Bob", "two");
        let (port, inbox) = BridgePort::channel("coordinator", 1);
        drop(inbox);
        let s = scanner(&m, port, FULL);

        let summary = scanned(s.clone().run_cycle().await);
        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(m.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_in_progress_guard() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "slow one");
        let (port, _asked) = coordinator(Duration::from_secs(30), |_| answer(""));
        let s = scanner(&m, port, FULL);

        let first = tokio::spawn(s.clone().run_cycle());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(s.clone().run_cycle().await, CycleReport::Skipped(SkipReason::ScanInProgress));
        scanned(first.await.unwrap());
        assert!(!s.state().scan_in_progress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_mode_waits_for_continue() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        let (port, asked) = coordinator(Duration::ZERO, |_| answer("Hello Alice"));
        let s = scanner(&m, port, PARTIAL);

        assert!(scanned(s.clone().run_cycle().await).staged);
        settle(&s).await;
        assert!(m.sent().is_empty());
        assert_eq!(m.draft("Alice").as_deref(), Some("Hello Alice"));
        assert!(m.continue_visible());
        assert!(!s.is_ready_to_scan());

        m.customer_says("Bob", "Hey");
        for _ in 0..3 {
            assert_eq!(s.clone().run_cycle().await, CycleReport::Skipped(SkipReason::AwaitingContinue));
        }
        assert_eq!(asked.lock().unwrap().len(), 1);

        s.continue_scanning().await;
        assert!(s.is_ready_to_scan());
        assert!(!m.continue_visible());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(asked.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_mode_rearms_ready_flag() {
        let m = Arc::new(SimMessenger::new());
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("x"));
        let s = scanner(&m, port, FULL);
        s.state().ready_to_scan = false;
        scanned(s.clone().run_cycle().await);
        assert!(s.is_ready_to_scan());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bound() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        m.fail_next_send(10);
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("Hello"));
        let s = scanner(&m, port, FULL);

        let start = Instant::now();
        assert!(scanned(s.clone().run_cycle().await).staged);
        settle(&s).await;
        let elapsed = start.elapsed();
        assert!(m.sent().is_empty());
        assert_eq!(s.delivery_state(), DeliveryState::Abandoned);
        // Two attempts, one backoff between them.
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(10));
        s.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        m.fail_next_compose(1);
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("Hello"));
        let s = scanner(&m, port, FULL);

        scanned(s.clone().run_cycle().await);
        settle(&s).await;
        assert_eq!(m.sent(), vec![("Alice".to_string(), "Hello".to_string())]);
        let conv = chatbridge_core::types::conversation_id_for_sender("Alice");
        assert!(s.is_processed(&conv, "Hi"));
        s.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_asking_drops_answer() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        let (port, asked) = coordinator(Duration::from_secs(5), |_| answer("Hello Alice"));
        let s = scanner(&m, port, FULL);

        let cycle = tokio::spawn(s.clone().run_cycle());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(asked.lock().unwrap().len(), 1);
        s.stop();

        let summary = scanned(cycle.await.unwrap());
        assert!(!summary.staged);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(m.sent().is_empty());
        assert_eq!(m.draft("Alice").as_deref(), Some(""));
        assert!(!s.delivery_pending());
        assert_eq!(m.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_during_backoff_cancels_retry() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        m.fail_next_compose(1);
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("Hello"));
        let s = scanner(&m, port, FULL);

        assert!(scanned(s.clone().run_cycle().await).staged);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(s.delivery_state(), DeliveryState::Retrying);
        assert!(s.clear_current_response());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(m.sent().is_empty());
        assert_eq!(m.draft("Alice").as_deref(), Some(""));
        assert_eq!(s.delivery_state(), DeliveryState::Idle);
        assert!(!s.delivery_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_backoff_cancels_retry() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        m.fail_next_send(1);
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("Hello"));
        let s = scanner(&m, port, FULL);

        assert!(scanned(s.clone().run_cycle().await).staged);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(s.delivery_state(), DeliveryState::Retrying);
        s.stop();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(m.sent().is_empty());
        assert_eq!(s.delivery_state(), DeliveryState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_retry_leaves_newer_job_alone() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        m.fail_next_compose(1);
        let calls = AtomicUsize::new(0);
        let (port, asked) = coordinator(Duration::ZERO, move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            answer(&format!("Hello v{n}"))
        });
        let s = scanner(&m, port, PARTIAL);

        assert!(scanned(s.clone().run_cycle().await).staged);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(s.delivery_state(), DeliveryState::Retrying);

        // The resumed cycle asks again and stages a second job while the
        // first delivery is still backing off.
        s.continue_scanning().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(asked.lock().unwrap().len(), 2);
        assert_eq!(m.draft("Alice").as_deref(), Some("Hello v2"));
        assert_eq!(s.delivery_state(), DeliveryState::Succeeded);
        assert!(!s.delivery_pending());
        assert!(m.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_history_is_still_answered() {
        let m = Arc::new(SimMessenger::new());
        m.add_conversation("Erin");
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("x"));
        let s = scanner(&m, port, PARTIAL);
        s.stop();

        s.inject_response("c-erin".into(), "Hello Erin".into(), Some("Erin".into())).unwrap();
        settle(&s).await;
        assert_eq!(s.delivery_state(), DeliveryState::Succeeded);
        assert_eq!(m.draft("Erin").as_deref(), Some("Hello Erin"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_reply_abandons_without_retry() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Bob", "Hi");
        m.operator_says("Bob", "Hi Bob, one moment");
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("x"));
        let s = scanner(&m, port, FULL);
        s.stop();

        let start = Instant::now();
        s.inject_response("c-bob".into(), "Hello".into(), Some("Bob".into())).unwrap();
        settle(&s).await;
        assert_eq!(s.delivery_state(), DeliveryState::Abandoned);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(m.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inject_response_uses_directory() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer(""));
        let s = scanner(&m, port, FULL);
        scanned(s.clone().run_cycle().await);
        s.stop();

        let conv = chatbridge_core::types::conversation_id_for_sender("Alice");
        assert!(s.inject_response("unknown".into(), "x".into(), None).is_err());
        s.inject_response(conv, "Manual answer".into(), None).unwrap();
        assert!(matches!(
            s.inject_response("other".into(), "y".into(), Some("Carol".into())),
            Err(BridgeError::SlotOccupied)
        ));
        settle(&s).await;
        assert_eq!(m.sent(), vec![("Alice".to_string(), "Manual answer".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_force_clears_staged_job() {
        let m = Arc::new(SimMessenger::new());
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("x"));
        let s = scanner(&m, port, FULL);
        let q = Question::new("Zed", "old", chatbridge_core::traits::ElementHandle(1));
        s.state().slot.try_stage(DeliveryJob::new(&q, "x")).unwrap();
        assert!(s.staged_job().is_some());
        s.stop();
        assert!(!s.delivery_pending());
        assert!(!s.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_current_response_message() {
        let m = Arc::new(SimMessenger::new());
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("x"));
        let s = scanner(&m, port, FULL);
        let q = Question::new("Zed", "old", chatbridge_core::traits::ElementHandle(1));
        s.state().slot.try_stage(DeliveryJob::new(&q, "x")).unwrap();
        assert_eq!(s.handle(BridgeMessage::ClearCurrentResponse).await, BridgeResponse::status("cleared"));
        assert!(!s.delivery_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_clears_stale_markers() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "Hi");
        m.extract_questions().await.unwrap();
        assert_eq!(m.pending_count(), 1);

        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("x"));
        let s = Arc::new(Scanner::new(
            m.clone(),
            port,
            Arc::new(MemorySettingsStore::new()),
            ScannerConfig::default(),
            DeliveryConfig::default(),
        ));
        s.start().await;
        assert!(s.is_running());
        assert_eq!(m.pending_count(), 0);
        s.stop();
        assert!(!s.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_updated_starts_and_stops() {
        let m = Arc::new(SimMessenger::new());
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("x"));
        let store = Arc::new(MemorySettingsStore::new());
        let s = Arc::new(Scanner::new(
            m.clone(),
            port,
            store.clone(),
            ScannerConfig::default(),
            DeliveryConfig::default(),
        ));
        s.initialize().await;
        assert!(!s.is_running());

        store.save(&FULL).await.unwrap();
        s.handle(BridgeMessage::SettingsUpdated).await;
        assert!(s.is_running());

        store.save(&Settings::default()).await.unwrap();
        s.handle(BridgeMessage::SettingsUpdated).await;
        assert!(!s.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_timer_drives_cycles() {
        let m = Arc::new(SimMessenger::new());
        let (port, _asked) = coordinator(Duration::ZERO, |_| answer("x"));
        let s = Arc::new(Scanner::new(
            m.clone(),
            port,
            Arc::new(MemorySettingsStore::with(FULL)),
            ScannerConfig::default(),
            DeliveryConfig::default(),
        ));
        s.start().await;
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(m.extract_calls(), 3);
        s.stop();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(m.extract_calls(), 3);
    }
}
