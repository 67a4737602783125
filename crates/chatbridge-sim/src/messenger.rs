//! Simulated messaging page: a list of conversations with customers.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chatbridge_core::error::{BridgeError, Result};
use chatbridge_core::traits::{ElementHandle, MessageAuthor, MessagingSurface};
use chatbridge_core::types::Question;

#[derive(Debug, Clone)]
struct SimConversation {
    sender: String,
    handle: ElementHandle,
    messages: Vec<(MessageAuthor, String, ElementHandle)>,
    visible: bool,
    draft: String,
}

#[derive(Debug, Default)]
struct MessengerState {
    conversations: Vec<SimConversation>,
    open: Option<usize>,
    pending: HashSet<ElementHandle>,
    continue_visible: bool,
    next_handle: u64,
    compose_failures: u32,
    send_failures: u32,
    extract_failures: u32,
    sent: Vec<(String, String)>,
    extract_calls: u32,
}

impl MessengerState {
    fn handle(&mut self) -> ElementHandle {
        self.next_handle += 1;
        ElementHandle(self.next_handle)
    }

    fn conversation_mut(&mut self, sender: &str) -> &mut SimConversation {
        if let Some(idx) = self.conversations.iter().position(|c| c.sender == sender) {
            return &mut self.conversations[idx];
        }
        let handle = self.handle();
        self.conversations.push(SimConversation {
            sender: sender.to_string(),
            handle,
            messages: Vec::new(),
            visible: true,
            draft: String::new(),
        });
        let last = self.conversations.len() - 1;
        &mut self.conversations[last]
    }
}

#[derive(Debug, Default)]
pub struct SimMessenger {
    state: Mutex<MessengerState>,
}

impl SimMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MessengerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// A customer writes into their conversation (created on first message).
    pub fn customer_says(&self, sender: &str, text: &str) {
        self.push(sender, MessageAuthor::Sender, text);
    }

    /// Someone on our side writes, outside the automation.
    pub fn operator_says(&self, sender: &str, text: &str) {
        self.push(sender, MessageAuthor::Automation, text);
    }

    fn push(&self, sender: &str, author: MessageAuthor, text: &str) {
        let mut state = self.lock();
        let handle = state.handle();
        state.conversation_mut(sender).messages.push((author, text.to_string(), handle));
    }

    /// A conversation whose message rows are not rendered.
    pub fn add_conversation(&self, sender: &str) {
        self.lock().conversation_mut(sender);
    }

    /// Scroll a conversation out of the visible list.
    pub fn hide_conversation(&self, sender: &str) {
        self.lock().conversation_mut(sender).visible = false;
    }

    pub fn fail_next_compose(&self, times: u32) {
        self.lock().compose_failures = times;
    }

    pub fn fail_next_send(&self, times: u32) {
        self.lock().send_failures = times;
    }

    pub fn fail_next_extract(&self, times: u32) {
        self.lock().extract_failures = times;
    }

    /// Messages the automation actually sent, as (sender, text).
    pub fn sent(&self) -> Vec<(String, String)> {
        self.lock().sent.clone()
    }

    pub fn draft(&self, sender: &str) -> Option<String> {
        self.lock()
            .conversations
            .iter()
            .find(|c| c.sender == sender)
            .map(|c| c.draft.clone())
    }

    pub fn continue_visible(&self) -> bool {
        self.lock().continue_visible
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_pending(&self, handle: ElementHandle) -> bool {
        self.lock().pending.contains(&handle)
    }

    pub fn extract_calls(&self) -> u32 {
        self.lock().extract_calls
    }
}

#[async_trait]
impl MessagingSurface for SimMessenger {
    async fn extract_questions(&self) -> Result<Vec<Question>> {
        let mut state = self.lock();
        state.extract_calls += 1;
        if state.extract_failures > 0 {
            state.extract_failures -= 1;
            return Err(BridgeError::Page("message list not rendered".into()));
        }
        let mut found = Vec::new();
        for conv in state.conversations.iter().filter(|c| c.visible) {
            if let Some((MessageAuthor::Sender, text, handle)) = conv.messages.last() {
                if !state.pending.contains(handle) {
                    found.push(Question::new(conv.sender.clone(), text.clone(), *handle));
                }
            }
        }
        for q in &found {
            state.pending.insert(q.handle);
        }
        Ok(found)
    }

    async fn unmark_pending(&self, handle: ElementHandle) -> Result<()> {
        self.lock().pending.remove(&handle);
        Ok(())
    }

    async fn clear_pending_markers(&self) -> Result<usize> {
        let mut state = self.lock();
        let count = state.pending.len();
        state.pending.clear();
        Ok(count)
    }

    async fn find_conversation(&self, sender: &str) -> Result<Option<ElementHandle>> {
        Ok(self
            .lock()
            .conversations
            .iter()
            .find(|c| c.visible && c.sender == sender)
            .map(|c| c.handle))
    }

    async fn open_conversation(&self, conversation: ElementHandle) -> Result<()> {
        let mut state = self.lock();
        let idx = state
            .conversations
            .iter()
            .position(|c| c.handle == conversation)
            .ok_or_else(|| BridgeError::Page("conversation entry detached".into()))?;
        state.open = Some(idx);
        Ok(())
    }

    async fn last_message_author(&self) -> Result<Option<MessageAuthor>> {
        let state = self.lock();
        let conv = state
            .open
            .and_then(|i| state.conversations.get(i))
            .ok_or_else(|| BridgeError::Page("no conversation open".into()))?;
        Ok(conv.messages.last().map(|(author, _, _)| *author))
    }

    async fn compose_reply(&self, text: &str) -> Result<()> {
        let mut state = self.lock();
        if state.compose_failures > 0 {
            state.compose_failures -= 1;
            return Err(BridgeError::Page("reply input not found".into()));
        }
        let idx = state.open.ok_or_else(|| BridgeError::Page("no conversation open".into()))?;
        let conv = state
            .conversations
            .get_mut(idx)
            .ok_or_else(|| BridgeError::Page("open conversation vanished".into()))?;
        conv.draft = text.to_string();
        Ok(())
    }

    async fn click_send(&self) -> Result<()> {
        let mut state = self.lock();
        if state.send_failures > 0 {
            state.send_failures -= 1;
            return Err(BridgeError::Page("send button not found".into()));
        }
        let idx = state.open.ok_or_else(|| BridgeError::Page("no conversation open".into()))?;
        let handle = state.handle();
        let conv = state
            .conversations
            .get_mut(idx)
            .ok_or_else(|| BridgeError::Page("open conversation vanished".into()))?;
        let text = std::mem::take(&mut conv.draft);
        conv.messages.push((MessageAuthor::Automation, text.clone(), handle));
        let sender = conv.sender.clone();
        state.sent.push((sender, text));
        Ok(())
    }

    async fn show_continue_control(&self) -> Result<()> {
        self.lock().continue_visible = true;
        Ok(())
    }

    async fn hide_continue_control(&self) -> Result<()> {
        self.lock().continue_visible = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_extract_marks_pending_once() {
        let m = SimMessenger::new();
        m.customer_says("Alice", "Hi, price?");
        m.customer_says("Bob", "Open today?");
        m.operator_says("Bob", "Yes!");

        let first = m.extract_questions().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].sender, "Alice");
        assert!(m.is_pending(first[0].handle));

        let again = m.extract_questions().await.unwrap();
        assert!(again.is_empty());

        m.unmark_pending(first[0].handle).await.unwrap();
        assert_eq!(m.extract_questions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_appends_automation_message() {
        let m = SimMessenger::new();
        m.customer_says("Alice", "Hi");
        let conv = m.find_conversation("Alice").await.unwrap().unwrap();
        m.open_conversation(conv).await.unwrap();
        assert_eq!(m.last_message_author().await.unwrap(), Some(MessageAuthor::Sender));
        m.compose_reply("Hello Alice").await.unwrap();
        m.click_send().await.unwrap();
        assert_eq!(m.sent(), vec![("Alice".to_string(), "Hello Alice".to_string())]);
        assert_eq!(m.last_message_author().await.unwrap(), Some(MessageAuthor::Automation));
    }

    #[tokio::test]
    async fn test_hidden_conversation_not_found() {
        let m = SimMessenger::new();
        m.customer_says("Carol", "?");
        m.hide_conversation("Carol");
        assert!(m.find_conversation("Carol").await.unwrap().is_none());
        assert!(m.extract_questions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failure_knobs() {
        let m = SimMessenger::new();
        m.customer_says("Dan", "?");
        let conv = m.find_conversation("Dan").await.unwrap().unwrap();
        m.open_conversation(conv).await.unwrap();
        m.fail_next_compose(1);
        assert!(m.compose_reply("x").await.is_err());
        assert!(m.compose_reply("x").await.is_ok());
        m.fail_next_extract(1);
        assert!(m.extract_questions().await.is_err());
    }
}
