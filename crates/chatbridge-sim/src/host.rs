//! Simulated page host plus a scripted extractor for Coordinator tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chatbridge_core::bus::{BridgePort, ExtractorPort};
use chatbridge_core::error::{BridgeError, Result};
use chatbridge_core::protocol::{BridgeMessage, ExtractorAck, ExtractorCommand};
use chatbridge_core::traits::{PageHost, PageId, PageKind};

type Injector = Arc<dyn Fn(PageId) -> Result<ExtractorPort> + Send + Sync>;

#[derive(Debug, Clone)]
struct SimPage {
    kind: PageKind,
    /// Remaining `is_loaded` polls before the page reports loaded.
    loading_polls: u32,
    closed: bool,
}

#[derive(Default)]
struct HostState {
    pages: HashMap<PageId, SimPage>,
    messaging_ports: HashMap<PageId, BridgePort>,
    next_id: u64,
    opened: u32,
    activated: Vec<PageId>,
    injections: u32,
    /// Polls a newly opened page needs before it is loaded.
    new_page_load_polls: u32,
    close_new_pages_while_loading: bool,
    fail_injection: bool,
}

/// Page host whose extractor injection is supplied by the caller.
pub struct SimHost {
    state: Mutex<HostState>,
    injector: Injector,
}

impl SimHost {
    pub fn new<F>(injector: F) -> Self
    where
        F: Fn(PageId) -> Result<ExtractorPort> + Send + Sync + 'static,
    {
        Self { state: Mutex::new(HostState::default()), injector: Arc::new(injector) }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn insert_page(state: &mut HostState, kind: PageKind, loading_polls: u32) -> PageId {
        state.next_id += 1;
        let id = PageId(state.next_id);
        state.pages.insert(id, SimPage { kind, loading_polls, closed: false });
        id
    }

    /// Register an already-open, loaded answer service page.
    pub fn add_answer_page(&self) -> PageId {
        Self::insert_page(&mut self.lock(), PageKind::AnswerService, 0)
    }

    /// Register a messaging page whose Scanner listens on `port`.
    pub fn add_messaging_page(&self, port: BridgePort) -> PageId {
        let mut state = self.lock();
        let id = Self::insert_page(&mut state, PageKind::Messaging, 0);
        state.messaging_ports.insert(id, port);
        id
    }

    pub fn set_new_page_load_polls(&self, polls: u32) {
        self.lock().new_page_load_polls = polls;
    }

    /// Newly opened pages vanish before finishing their load.
    pub fn close_new_pages_while_loading(&self, close: bool) {
        self.lock().close_new_pages_while_loading = close;
    }

    pub fn fail_injection(&self, fail: bool) {
        self.lock().fail_injection = fail;
    }

    pub fn close_page(&self, page: PageId) {
        if let Some(p) = self.lock().pages.get_mut(&page) {
            p.closed = true;
        }
    }

    pub fn opened_count(&self) -> u32 {
        self.lock().opened
    }

    pub fn injection_count(&self) -> u32 {
        self.lock().injections
    }

    pub fn activated(&self) -> Vec<PageId> {
        self.lock().activated.clone()
    }
}

#[async_trait]
impl PageHost for SimHost {
    async fn find_page(&self, kind: PageKind) -> Result<Option<PageId>> {
        let state = self.lock();
        let mut ids: Vec<PageId> = state
            .pages
            .iter()
            .filter(|(_, p)| p.kind == kind && !p.closed)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.0);
        Ok(ids.first().copied())
    }

    async fn open_page(&self, kind: PageKind) -> Result<PageId> {
        let mut state = self.lock();
        state.opened += 1;
        let polls = state.new_page_load_polls;
        Ok(Self::insert_page(&mut state, kind, polls))
    }

    async fn activate(&self, page: PageId) -> Result<()> {
        let mut state = self.lock();
        if !state.pages.get(&page).is_some_and(|p| !p.closed) {
            return Err(BridgeError::Transport(format!("No tab with id: {}", page.0)));
        }
        state.activated.push(page);
        Ok(())
    }

    async fn is_loaded(&self, page: PageId) -> Result<bool> {
        let mut state = self.lock();
        let close_on_load = state.close_new_pages_while_loading;
        let p = state
            .pages
            .get_mut(&page)
            .filter(|p| !p.closed)
            .ok_or_else(|| BridgeError::Transport(format!("No tab with id: {}", page.0)))?;
        if p.loading_polls == 0 {
            return Ok(true);
        }
        if close_on_load {
            p.closed = true;
            return Err(BridgeError::Transport(format!("Tab {} closed while loading", page.0)));
        }
        p.loading_polls -= 1;
        Ok(false)
    }

    async fn inject_extractor(&self, page: PageId) -> Result<ExtractorPort> {
        {
            let mut state = self.lock();
            if state.fail_injection {
                return Err(BridgeError::Transport("Cannot access contents of the page".into()));
            }
            if !state.pages.get(&page).is_some_and(|p| !p.closed) {
                return Err(BridgeError::Transport(format!("No tab with id: {}", page.0)));
            }
            state.injections += 1;
        }
        (self.injector)(page)
    }

    async fn messaging_port(&self, page: PageId) -> Result<BridgePort> {
        self.lock()
            .messaging_ports
            .get(&page)
            .cloned()
            .ok_or_else(|| BridgeError::Transport(format!("No scanner listening in tab {}", page.0)))
    }
}

// ═══════════════════════════════════════════════════════════
// Scripted extractor
// ═══════════════════════════════════════════════════════════

/// What a scripted extractor does with a question.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Ack `processing`, then report the answer after `after`.
    Answer { after: Duration, text: String },
    Error { after: Duration, message: String },
    /// Same as `Answer` but without echoing the request id.
    AnonymousAnswer { after: Duration, text: String },
    /// Ack `processing` and never report.
    Silent,
    /// Ack `skipped_recent_duplicate`.
    Duplicate,
}

/// Spawn an extractor context that follows `script` and reports to `coordinator`.
pub fn scripted_extractor<F>(coordinator: BridgePort, script: F) -> ExtractorPort
where
    F: Fn(&str) -> ScriptedReply + Send + Sync + 'static,
{
    let (port, mut mailbox) = ExtractorPort::channel("scripted-extractor", 4);
    tokio::spawn(async move {
        while let Some(mut envelope) = mailbox.recv().await {
            let ExtractorCommand::AskQuestion { request_id, question } = envelope.message.clone();
            let (ack, report) = match script(&question) {
                ScriptedReply::Duplicate => (ExtractorAck::SkippedRecentDuplicate, None),
                ScriptedReply::Silent => (ExtractorAck::Processing, None),
                ScriptedReply::Answer { after, text } => (
                    ExtractorAck::Processing,
                    Some((after, BridgeMessage::ChatGptResponse {
                        request_id: Some(request_id),
                        answer: Some(text),
                        error: None,
                    })),
                ),
                ScriptedReply::AnonymousAnswer { after, text } => (
                    ExtractorAck::Processing,
                    Some((after, BridgeMessage::ChatGptResponse {
                        request_id: None,
                        answer: Some(text),
                        error: None,
                    })),
                ),
                ScriptedReply::Error { after, message } => (
                    ExtractorAck::Processing,
                    Some((after, BridgeMessage::ChatGptResponse {
                        request_id: Some(request_id),
                        answer: None,
                        error: Some(message),
                    })),
                ),
            };
            envelope.respond(ack);
            if let Some((after, message)) = report {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    if let Err(e) = coordinator.notify(message).await {
                        tracing::debug!("scripted extractor report dropped: {e}");
                    }
                });
            }
        }
    });
    port
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> SimHost {
        SimHost::new(|_| Err(BridgeError::Other("no extractor".into())))
    }

    #[tokio::test]
    async fn test_find_prefers_existing_page() {
        let h = host();
        assert!(h.find_page(PageKind::AnswerService).await.unwrap().is_none());
        let id = h.add_answer_page();
        assert_eq!(h.find_page(PageKind::AnswerService).await.unwrap(), Some(id));
        assert!(h.find_page(PageKind::Messaging).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_page_loads_after_polls() {
        let h = host();
        h.set_new_page_load_polls(2);
        let id = h.open_page(PageKind::AnswerService).await.unwrap();
        assert!(!h.is_loaded(id).await.unwrap());
        assert!(!h.is_loaded(id).await.unwrap());
        assert!(h.is_loaded(id).await.unwrap());
        assert_eq!(h.opened_count(), 1);
    }

    #[tokio::test]
    async fn test_closed_page_is_transport_error() {
        let h = host();
        let id = h.add_answer_page();
        h.close_page(id);
        assert!(matches!(h.is_loaded(id).await, Err(BridgeError::Transport(_))));
        assert!(matches!(h.activate(id).await, Err(BridgeError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_extractor_reports() {
        let (coordinator, mut inbox) = BridgePort::channel("coordinator", 4);
        let ext = scripted_extractor(coordinator, |q| ScriptedReply::Answer {
            after: Duration::from_secs(1),
            text: format!("re: {q}"),
        });
        let ack = ext
            .request(ExtractorCommand::AskQuestion { request_id: "r1".into(), question: "q".into() })
            .await
            .unwrap();
        assert_eq!(ack, ExtractorAck::Processing);
        let env = inbox.recv().await.unwrap();
        assert_eq!(
            env.message,
            BridgeMessage::ChatGptResponse {
                request_id: Some("r1".into()),
                answer: Some("re: q".into()),
                error: None
            }
        );
    }
}
