//! Simulated answer service page.
//!
//! Renders an input, a send control and the conversation turns the answer
//! service would show. Submitting (send click or Enter) consumes the input
//! text, asks the responder for a reply and renders it as the latest turn.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chatbridge_core::config::ExtractorLocators;
use chatbridge_core::error::{BridgeError, Result};
use chatbridge_core::traits::{ElementHandle, Locator, PageDriver};

use crate::dom::SimDom;

type Responder = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Which input element the page renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputVariant {
    /// Rich contenteditable editor.
    Primary,
    /// Plain textarea only.
    Fallback,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendControl {
    /// Present and clickable, matched by the n-th configured send locator.
    Enabled(usize),
    /// Present but disabled (page is busy generating).
    Disabled(usize),
    /// Present but every click throws.
    Broken(usize),
    Absent,
}

/// How replies are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyLayout {
    /// Turn article → assistant → body → paragraphs.
    Turns,
    /// Turn article → assistant → body with plain text, no paragraphs.
    BodyOnly,
    /// Assistant body with no turn articles around it.
    Bare,
    /// Nothing is rendered.
    Silent,
}

#[derive(Debug, Clone)]
pub struct AnswerPageOptions {
    pub input: InputVariant,
    pub send: SendControl,
    pub layout: ReplyLayout,
    pub enter_submits: bool,
    /// Number of queries before the input element starts matching.
    pub input_delay_queries: u32,
    /// `set_text` stores this instead of the requested text.
    pub garble_input: Option<String>,
}

impl Default for AnswerPageOptions {
    fn default() -> Self {
        Self {
            input: InputVariant::Primary,
            send: SendControl::Enabled(0),
            layout: ReplyLayout::Turns,
            enter_submits: true,
            input_delay_queries: 0,
            garble_input: None,
        }
    }
}

struct PageState {
    dom: SimDom,
    input: Option<ElementHandle>,
    send: Option<ElementHandle>,
    queries_seen: u32,
    submissions: Vec<String>,
    clicks: u32,
    enters: u32,
}

pub struct SimAnswerPage {
    state: Mutex<PageState>,
    options: AnswerPageOptions,
    locators: ExtractorLocators,
    responder: Responder,
}

impl SimAnswerPage {
    pub fn new<F>(locators: ExtractorLocators, options: AnswerPageOptions, responder: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let mut dom = SimDom::new();
        let input = match options.input {
            InputVariant::Primary => Some(dom.add(None, &[locators.primary_input.as_str()], "")),
            InputVariant::Fallback => Some(dom.add(None, &[locators.fallback_input.as_str()], "")),
            InputVariant::Missing => None,
        };
        let send = match options.send {
            SendControl::Enabled(i) | SendControl::Disabled(i) | SendControl::Broken(i) => {
                let selector = locators.send_controls.get(i).cloned().unwrap_or_default();
                let handle = dom.add(None, &[selector.as_str()], "Send");
                if let (SendControl::Disabled(_), Some(node)) = (options.send, dom.node_mut(handle)) {
                    node.enabled = false;
                }
                Some(handle)
            }
            SendControl::Absent => None,
        };
        Self {
            state: Mutex::new(PageState {
                dom,
                input,
                send,
                queries_seen: 0,
                submissions: Vec::new(),
                clicks: 0,
                enters: 0,
            }),
            options,
            locators,
            responder: Arc::new(responder),
        }
    }

    /// Page with default options and a fixed reply.
    pub fn answering(locators: ExtractorLocators, reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(locators, AnswerPageOptions::default(), move |_| reply.clone())
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Every prompt the page accepted, in order.
    pub fn submissions(&self) -> Vec<String> {
        self.lock().submissions.clone()
    }

    pub fn click_count(&self) -> u32 {
        self.lock().clicks
    }

    pub fn enter_count(&self) -> u32 {
        self.lock().enters
    }

    /// Render an older reply turn, as if left over from a previous question.
    pub fn seed_reply(&self, text: &str) {
        let mut state = self.lock();
        self.render_reply(&mut state, text);
    }

    fn submit(&self, state: &mut PageState) {
        let Some(input) = state.input else { return };
        let prompt = state.dom.text_content(input).unwrap_or_default();
        if prompt.trim().is_empty() {
            return;
        }
        if let Some(node) = state.dom.node_mut(input) {
            node.text.clear();
        }
        let reply = (self.responder)(&prompt);
        state.submissions.push(prompt);
        self.render_reply(state, &reply);
    }

    fn render_reply(&self, state: &mut PageState, reply: &str) {
        let loc = &self.locators;
        let dom = &mut state.dom;
        match self.options.layout {
            ReplyLayout::Turns => {
                let turn = dom.add(None, &[loc.conversation_turn.as_str()], "");
                let assistant = dom.add(Some(turn), &[loc.assistant_message.as_str()], "");
                let body = dom.add(Some(assistant), &[loc.reply_body.as_str(), loc.any_reply.as_str()], "");
                for line in reply.lines().filter(|l| !l.trim().is_empty()) {
                    dom.add(Some(body), &[loc.paragraph.as_str()], line);
                }
            }
            ReplyLayout::BodyOnly => {
                let turn = dom.add(None, &[loc.conversation_turn.as_str()], "");
                let assistant = dom.add(Some(turn), &[loc.assistant_message.as_str()], "");
                dom.add(Some(assistant), &[loc.reply_body.as_str(), loc.any_reply.as_str()], reply);
            }
            ReplyLayout::Bare => {
                dom.add(None, &[loc.any_reply.as_str()], reply);
            }
            ReplyLayout::Silent => {}
        }
    }
}

#[async_trait]
impl PageDriver for SimAnswerPage {
    async fn query(&self, scope: Option<ElementHandle>, locator: &Locator) -> Result<Option<ElementHandle>> {
        Ok(self.query_all(scope, locator).await?.into_iter().next())
    }

    async fn query_all(&self, scope: Option<ElementHandle>, locator: &Locator) -> Result<Vec<ElementHandle>> {
        let mut state = self.lock();
        state.queries_seen = state.queries_seen.saturating_add(1);
        let input_ready = state.queries_seen > self.options.input_delay_queries;
        let input = state.input;
        Ok(state
            .dom
            .query_all(scope, locator.as_str())
            .into_iter()
            .filter(|h| input_ready || Some(*h) != input)
            .collect())
    }

    async fn read_text(&self, element: ElementHandle) -> Result<String> {
        self.lock()
            .dom
            .text_content(element)
            .ok_or_else(|| BridgeError::Page(format!("element {} detached", element.0)))
    }

    async fn set_text(&self, element: ElementHandle, text: &str) -> Result<()> {
        let mut state = self.lock();
        let value = self.options.garble_input.clone().unwrap_or_else(|| text.to_string());
        let node = state
            .dom
            .node_mut(element)
            .ok_or_else(|| BridgeError::Page(format!("element {} detached", element.0)))?;
        node.text = value;
        Ok(())
    }

    async fn click(&self, element: ElementHandle) -> Result<()> {
        let mut state = self.lock();
        state.clicks += 1;
        if state.send == Some(element) {
            match self.options.send {
                SendControl::Broken(_) => return Err(BridgeError::Page("click intercepted".into())),
                SendControl::Disabled(_) => return Ok(()),
                _ => self.submit(&mut state),
            }
        }
        Ok(())
    }

    async fn press_enter(&self, element: ElementHandle) -> Result<()> {
        let mut state = self.lock();
        state.enters += 1;
        if self.options.enter_submits && state.input == Some(element) {
            self.submit(&mut state);
        }
        Ok(())
    }

    async fn is_enabled(&self, element: ElementHandle) -> Result<bool> {
        self.lock()
            .dom
            .node(element)
            .map(|n| n.enabled)
            .ok_or_else(|| BridgeError::Page(format!("element {} detached", element.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatbridge_core::traits::page::{attempt_click, locate_first_of, wait_for_element};
    use std::time::Duration;

    fn locators() -> ExtractorLocators {
        ExtractorLocators::default()
    }

    #[tokio::test]
    async fn test_click_submits_and_renders_turn() {
        let loc = locators();
        let page = SimAnswerPage::new(loc.clone(), AnswerPageOptions::default(), |q| format!("echo: {q}\nbye"));
        let input = page.query(None, &Locator::from(&loc.primary_input)).await.unwrap().unwrap();
        page.set_text(input, "hello").await.unwrap();
        let send = page.query(None, &Locator::from(&loc.send_controls[0])).await.unwrap().unwrap();
        page.click(send).await.unwrap();

        assert_eq!(page.submissions(), vec!["hello".to_string()]);
        assert_eq!(page.read_text(input).await.unwrap(), "");
        let turns = page.query_all(None, &Locator::from(&loc.conversation_turn)).await.unwrap();
        assert_eq!(turns.len(), 1);
        let paragraphs = page.query_all(Some(turns[0]), &Locator::from(&loc.paragraph)).await.unwrap();
        assert_eq!(paragraphs.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_delayed_input() {
        let loc = locators();
        let opts = AnswerPageOptions { input_delay_queries: 3, ..Default::default() };
        let page = SimAnswerPage::new(loc.clone(), opts, |_| String::new());
        let found = wait_for_element(&page, &Locator::from(&loc.primary_input), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_missing_input_times_out() {
        let loc = locators();
        let opts = AnswerPageOptions { input: InputVariant::Missing, ..Default::default() };
        let page = SimAnswerPage::new(loc.clone(), opts, |_| String::new());
        let found = wait_for_element(&page, &Locator::from(&loc.primary_input), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_locate_first_of_reports_index() {
        let loc = locators();
        let opts = AnswerPageOptions { send: SendControl::Enabled(3), ..Default::default() };
        let page = SimAnswerPage::new(loc.clone(), opts, |_| String::new());
        let (idx, _) = locate_first_of(&page, None, &loc.send_controls).await.unwrap().unwrap();
        assert_eq!(idx, 3);
    }

    #[tokio::test]
    async fn test_attempt_click_falls_back_to_keyboard() {
        let loc = locators();
        let opts = AnswerPageOptions { send: SendControl::Broken(0), ..Default::default() };
        let page = SimAnswerPage::new(loc.clone(), opts, |_| String::new());
        let send = page.query(None, &Locator::from(&loc.send_controls[0])).await.unwrap().unwrap();
        attempt_click(&page, send).await.unwrap();
        assert_eq!(page.click_count(), 1);
        assert_eq!(page.enter_count(), 1);
    }
}
