//! Delivery slot and state machine.
//!
//! The slot holds at most one staged [`DeliveryJob`] plus the in-progress
//! flag; the only way in is [`DeliverySlot::try_stage`], which hands out a
//! [`DeliveryTicket`] that a reset invalidates. The machine runs one
//! attempt of `Locating → VerifyingContext → Composing → VerifyingOutcome`
//! and reports how it ended. Retrying is the caller's loop.

use std::sync::Arc;

use chatbridge_core::config::DeliveryConfig;
use chatbridge_core::error::{BridgeError, Result};
use chatbridge_core::traits::{MessageAuthor, MessagingSurface};
use chatbridge_core::types::DeliveryJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Idle,
    Locating,
    VerifyingContext,
    Composing,
    VerifyingOutcome,
    Succeeded,
    Retrying,
    Abandoned,
}

/// Identifies one staged job. A reset or a newer job invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTicket(u64);

/// The single staged job and its in-progress flag.
#[derive(Debug, Default)]
pub struct DeliverySlot {
    job: Option<DeliveryJob>,
    in_progress: bool,
    generation: u64,
}

impl DeliverySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a job. Rejected while another job is staged or delivering.
    pub fn try_stage(&mut self, job: DeliveryJob) -> Result<DeliveryTicket> {
        if self.is_busy() {
            return Err(BridgeError::SlotOccupied);
        }
        self.generation += 1;
        self.job = Some(job);
        Ok(DeliveryTicket(self.generation))
    }

    /// Claim the staged job for delivery. `None` if nothing is staged or a
    /// delivery already runs.
    pub fn begin(&mut self) -> Option<(DeliveryTicket, DeliveryJob)> {
        if self.in_progress {
            return None;
        }
        let job = self.job.clone()?;
        self.in_progress = true;
        Some((DeliveryTicket(self.generation), job))
    }

    /// The job claimed with `ticket` is still the one being delivered.
    pub fn owns(&self, ticket: DeliveryTicket) -> bool {
        self.in_progress && self.job.is_some() && self.generation == ticket.0
    }

    /// Write back retry bookkeeping. Ignored once `ticket` went stale.
    pub fn update(&mut self, ticket: DeliveryTicket, job: &DeliveryJob) {
        if !self.owns(ticket) {
            return;
        }
        if let Some(staged) = self.job.as_mut() {
            staged.retries = job.retries;
        }
    }

    pub fn finish(&mut self) {
        self.job = None;
        self.in_progress = false;
    }

    /// Fail-safe reset. Returns whether anything was cleared.
    pub fn force_clear(&mut self) -> bool {
        let had = self.is_busy();
        self.finish();
        had
    }

    pub fn is_busy(&self) -> bool {
        self.job.is_some() || self.in_progress
    }

    pub fn staged(&self) -> Option<&DeliveryJob> {
        self.job.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivered {
    /// Full automation: send clicked.
    Sent,
    /// Partial automation: left in the input for a human.
    Staged,
    /// The customer could not be confirmed as the last author; nothing sent.
    SkippedStateChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    ConversationNotFound,
    /// The last message is not from the customer.
    NotAwaitingReply,
}

impl From<AbandonReason> for BridgeError {
    fn from(reason: AbandonReason) -> Self {
        let detail = match reason {
            AbandonReason::ConversationNotFound => "conversation not found",
            AbandonReason::NotAwaitingReply => "last message is not from the customer",
        };
        BridgeError::DeliveryAbandoned(detail.into())
    }
}

#[derive(Debug)]
pub enum AttemptResult {
    Succeeded(Delivered),
    Abandon(AbandonReason),
    Failed(BridgeError),
}

pub struct DeliveryMachine {
    surface: Arc<dyn MessagingSurface>,
    config: DeliveryConfig,
}

impl DeliveryMachine {
    pub fn new(surface: Arc<dyn MessagingSurface>, config: DeliveryConfig) -> Self {
        Self { surface, config }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// One pass through the states for `job`.
    pub async fn attempt(&self, job: &DeliveryJob, partial: bool) -> AttemptResult {
        match self.run(job, partial).await {
            Ok(result) => result,
            Err(e) => AttemptResult::Failed(e),
        }
    }

    async fn run(&self, job: &DeliveryJob, partial: bool) -> Result<AttemptResult> {
        let mut state = DeliveryState::Locating;
        tracing::debug!("delivery to {}: {state:?}", job.sender);
        let Some(conversation) = self.surface.find_conversation(&job.sender).await? else {
            tracing::warn!("🔍 Conversation with {} not found, abandoning", job.sender);
            return Ok(AttemptResult::Abandon(AbandonReason::ConversationNotFound));
        };
        self.surface.open_conversation(conversation).await?;

        state = DeliveryState::VerifyingContext;
        tracing::debug!("delivery to {}: {state:?}", job.sender);
        match self.surface.last_message_author().await? {
            Some(MessageAuthor::Automation) => {
                tracing::info!("↩️ Last message in {}'s conversation is not theirs, abandoning", job.sender);
                return Ok(AttemptResult::Abandon(AbandonReason::NotAwaitingReply));
            }
            Some(MessageAuthor::Sender) => {}
            None => tracing::warn!("⚠️ Could not read {}'s last message, composing anyway", job.sender),
        }

        state = DeliveryState::Composing;
        tracing::debug!("delivery to {}: {state:?}", job.sender);
        self.surface.compose_reply(&job.answer).await?;
        tokio::time::sleep(self.config.draft_settle()).await;

        state = DeliveryState::VerifyingOutcome;
        tracing::debug!("delivery to {}: {state:?}", job.sender);
        if partial {
            self.surface.show_continue_control().await?;
            tracing::info!("📝 Reply staged for {}, waiting for manual continue", job.sender);
            return Ok(AttemptResult::Succeeded(Delivered::Staged));
        }
        if self.surface.last_message_author().await? == Some(MessageAuthor::Sender) {
            self.surface.click_send().await?;
            tracing::info!("📤 Reply sent to {}", job.sender);
            Ok(AttemptResult::Succeeded(Delivered::Sent))
        } else {
            tracing::info!("↩️ {} got a reply meanwhile, not sending", job.sender);
            Ok(AttemptResult::Succeeded(Delivered::SkippedStateChanged))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbridge_core::traits::ElementHandle;
    use chatbridge_core::types::Question;
    use chatbridge_sim::SimMessenger;

    fn job(sender: &str) -> DeliveryJob {
        DeliveryJob::new(&Question::new(sender, "price?", ElementHandle(1)), "10$")
    }

    fn machine(m: &Arc<SimMessenger>) -> DeliveryMachine {
        DeliveryMachine::new(m.clone(), DeliveryConfig::default())
    }

    #[test]
    fn test_slot_single_job() {
        let mut slot = DeliverySlot::new();
        slot.try_stage(job("a")).unwrap();
        assert!(matches!(slot.try_stage(job("b")), Err(BridgeError::SlotOccupied)));
        assert_eq!(slot.staged().unwrap().sender, "a");

        let (ticket, mut claimed) = slot.begin().unwrap();
        assert!(slot.begin().is_none());
        assert!(slot.owns(ticket));
        assert!(matches!(slot.try_stage(job("b")), Err(BridgeError::SlotOccupied)));

        claimed.retries = 1;
        slot.update(ticket, &claimed);
        assert_eq!(slot.staged().unwrap().retries, 1);

        slot.finish();
        assert!(!slot.is_busy());
        slot.try_stage(job("b")).unwrap();
    }

    #[test]
    fn test_force_clear() {
        let mut slot = DeliverySlot::new();
        assert!(!slot.force_clear());
        slot.try_stage(job("a")).unwrap();
        let (ticket, _) = slot.begin().unwrap();
        assert!(slot.force_clear());
        assert!(!slot.owns(ticket));
        slot.update(ticket, &job("a"));
        assert!(slot.staged().is_none());
    }

    #[test]
    fn test_stale_ticket_never_owns_newer_job() {
        let mut slot = DeliverySlot::new();
        slot.try_stage(job("a")).unwrap();
        let (old, _) = slot.begin().unwrap();
        slot.force_clear();

        slot.try_stage(job("b")).unwrap();
        let (new, _) = slot.begin().unwrap();
        assert!(!slot.owns(old));
        assert!(slot.owns(new));

        let mut stale = job("a");
        stale.retries = 5;
        slot.update(old, &stale);
        assert_eq!(slot.staged().unwrap().retries, 0);
        assert_eq!(slot.staged().unwrap().sender, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_mode_sends() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "price?");
        let result = machine(&m).attempt(&job("Alice"), false).await;
        assert!(matches!(result, AttemptResult::Succeeded(Delivered::Sent)));
        assert_eq!(m.sent(), vec![("Alice".to_string(), "10$".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_mode_stages_draft() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Alice", "price?");
        let result = machine(&m).attempt(&job("Alice"), true).await;
        assert!(matches!(result, AttemptResult::Succeeded(Delivered::Staged)));
        assert!(m.sent().is_empty());
        assert_eq!(m.draft("Alice").as_deref(), Some("10$"));
        assert!(m.continue_visible());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_conversation_abandons() {
        let m = Arc::new(SimMessenger::new());
        let result = machine(&m).attempt(&job("Ghost"), false).await;
        assert!(matches!(result, AttemptResult::Abandon(AbandonReason::ConversationNotFound)));
    }

    #[test]
    fn test_abandon_reason_maps_to_error_kind() {
        let err = BridgeError::from(AbandonReason::NotAwaitingReply);
        assert_eq!(err.kind(), chatbridge_core::error::ErrorKind::DeliveryAbandoned);
        assert!(err.to_string().contains("not from the customer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operator_replied_abandons_without_compose() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Bob", "hi");
        m.operator_says("Bob", "hello, how can I help?");
        let result = machine(&m).attempt(&job("Bob"), false).await;
        assert!(matches!(result, AttemptResult::Abandon(AbandonReason::NotAwaitingReply)));
        assert_eq!(m.draft("Bob").as_deref(), Some(""));
        assert!(m.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_history_still_composes() {
        let m = Arc::new(SimMessenger::new());
        m.add_conversation("Erin");
        let result = machine(&m).attempt(&job("Erin"), true).await;
        assert!(matches!(result, AttemptResult::Succeeded(Delivered::Staged)));
        assert_eq!(m.draft("Erin").as_deref(), Some("10$"));

        let m = Arc::new(SimMessenger::new());
        m.add_conversation("Erin");
        let result = machine(&m).attempt(&job("Erin"), false).await;
        assert!(matches!(result, AttemptResult::Succeeded(Delivered::SkippedStateChanged)));
        assert_eq!(m.draft("Erin").as_deref(), Some("10$"));
        assert!(m.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compose_failure_is_retryable() {
        let m = Arc::new(SimMessenger::new());
        m.customer_says("Carol", "hi");
        m.fail_next_compose(1);
        let result = machine(&m).attempt(&job("Carol"), false).await;
        assert!(matches!(result, AttemptResult::Failed(BridgeError::Page(_))));
    }
}
