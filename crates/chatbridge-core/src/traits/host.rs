//! Page host — finds, opens and wires up pages for the Coordinator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bus::{BridgePort, ExtractorPort};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    AnswerService,
    Messaging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

#[async_trait]
pub trait PageHost: Send + Sync {
    /// An already-open page of this kind, if any.
    async fn find_page(&self, kind: PageKind) -> Result<Option<PageId>>;

    async fn open_page(&self, kind: PageKind) -> Result<PageId>;

    /// Bring the page to the foreground.
    async fn activate(&self, page: PageId) -> Result<()>;

    /// `Err(Transport)` once the page no longer exists.
    async fn is_loaded(&self, page: PageId) -> Result<bool>;

    /// Spawn a fresh Answer Extractor into the page and return its port.
    async fn inject_extractor(&self, page: PageId) -> Result<ExtractorPort>;

    /// Port of the Scanner running in a messaging page.
    async fn messaging_port(&self, page: PageId) -> Result<BridgePort>;
}
