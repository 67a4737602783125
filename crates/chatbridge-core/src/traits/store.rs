//! Settings persistence.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Settings;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// `None` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<Settings>>;

    async fn save(&self, settings: &Settings) -> Result<()>;
}
