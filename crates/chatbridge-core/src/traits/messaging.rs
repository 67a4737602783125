//! Messaging page surface — where questions come from and answers go.

use async_trait::async_trait;

use crate::error::Result;
use crate::traits::page::ElementHandle;
use crate::types::Question;

/// Who wrote the latest message in the open conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAuthor {
    /// The customer who asked.
    Sender,
    /// Us (or a human operator on our side).
    Automation,
}

#[async_trait]
pub trait MessagingSurface: Send + Sync {
    /// Discover unanswered questions. Side effect: each returned item gets a
    /// pending marker on the page, and unrelated items may be marked read.
    async fn extract_questions(&self) -> Result<Vec<Question>>;

    /// Remove the pending marker from one discovered item.
    async fn unmark_pending(&self, handle: ElementHandle) -> Result<()>;

    /// Remove every pending marker. Returns how many were cleared.
    async fn clear_pending_markers(&self) -> Result<usize>;

    /// Find the visible conversation entry for a sender.
    async fn find_conversation(&self, sender: &str) -> Result<Option<ElementHandle>>;

    async fn open_conversation(&self, conversation: ElementHandle) -> Result<()>;

    /// `None` when the open conversation shows no messages.
    async fn last_message_author(&self) -> Result<Option<MessageAuthor>>;

    /// Put text into the reply input and verify it took.
    async fn compose_reply(&self, text: &str) -> Result<()>;

    async fn click_send(&self) -> Result<()>;

    /// Show the manual "continue scanning" control (partial mode).
    async fn show_continue_control(&self) -> Result<()>;

    async fn hide_continue_control(&self) -> Result<()>;
}
