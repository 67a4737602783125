//! Settings service and stores.
//!
//! The two user toggles are the only process-wide state read by several
//! contexts. Reads go through the store; the one write path is
//! [`SettingsService::save`], which persists and then pushes `settingsUpdated`
//! to every registered Scanner.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatbridge_core::bus::BridgePort;
use chatbridge_core::error::{BridgeError, Result};
use chatbridge_core::protocol::BridgeMessage;
use chatbridge_core::traits::SettingsStore;
use chatbridge_core::types::Settings;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Settings persisted as a small JSON file.
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn load(&self) -> Result<Option<Settings>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| BridgeError::Store(format!("Failed to read {}: {e}", self.path.display())))?;
        let settings = serde_json::from_str(&content)
            .map_err(|e| BridgeError::Store(format!("Failed to parse {}: {e}", self.path.display())))?;
        Ok(Some(settings))
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// In-memory store for tests and simulation.
#[derive(Default)]
pub struct MemorySettingsStore {
    value: Mutex<Option<Settings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(settings: Settings) -> Self {
        Self { value: Mutex::new(Some(settings)) }
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load(&self) -> Result<Option<Settings>> {
        Ok(*self.value.lock().map_err(|_| BridgeError::Store("settings lock poisoned".into()))?)
    }

    async fn save(&self, settings: &Settings) -> Result<()> {
        *self.value.lock().map_err(|_| BridgeError::Store("settings lock poisoned".into()))? = Some(*settings);
        Ok(())
    }
}

/// Owner of the user toggles inside the Coordinator.
pub struct SettingsService {
    store: Arc<dyn SettingsStore>,
    current: watch::Sender<Settings>,
    subscribers: Mutex<Vec<BridgePort>>,
}

impl SettingsService {
    /// Load the stored value (defaults if nothing saved yet).
    pub async fn load(store: Arc<dyn SettingsStore>) -> Result<Self> {
        let initial = store.load().await?.unwrap_or_default();
        tracing::info!(
            "⚙️ Settings loaded: enabled={}, partial={}",
            initial.is_enabled,
            initial.is_partial_automation
        );
        let (current, _) = watch::channel(initial);
        Ok(Self { store, current, subscribers: Mutex::new(Vec::new()) })
    }

    pub fn store(&self) -> Arc<dyn SettingsStore> {
        Arc::clone(&self.store)
    }

    /// Register a Scanner to receive `settingsUpdated`.
    pub fn subscribe(&self, port: BridgePort) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(port);
        }
    }

    /// Stored settings with missing keys filled by defaults.
    pub async fn get(&self) -> Settings {
        match self.store.load().await {
            Ok(Some(s)) => s,
            Ok(None) => Settings::default(),
            Err(e) => {
                tracing::warn!("⚠️ Settings read failed, using last known value: {e}");
                *self.current.borrow()
            }
        }
    }

    /// Coerce, persist, publish.
    pub async fn save(&self, raw: &serde_json::Value) -> Result<Settings> {
        let settings = Settings::coerce(raw);
        self.store.save(&settings).await?;
        self.current.send_replace(settings);
        tracing::info!(
            "💾 Settings saved: enabled={}, partial={}",
            settings.is_enabled,
            settings.is_partial_automation
        );

        let subscribers: Vec<BridgePort> = match self.subscribers.lock() {
            Ok(subs) => subs.clone(),
            Err(_) => Vec::new(),
        };
        let mut closed = Vec::new();
        for port in subscribers {
            if let Err(e) = port.notify(BridgeMessage::SettingsUpdated).await {
                tracing::debug!("settings push skipped: {e}");
                closed.push(port.name().to_string());
            }
        }
        if !closed.is_empty() {
            if let Ok(mut subs) = self.subscribers.lock() {
                subs.retain(|p| !closed.iter().any(|n| n == p.name()) && !p.is_closed());
            }
        }
        Ok(settings)
    }

    /// Latest value without touching the store.
    pub fn current(&self) -> Settings {
        *self.current.borrow()
    }

    /// Stream of settings values, starting with the current one.
    pub fn updates(&self) -> WatchStream<Settings> {
        WatchStream::new(self.current.subscribe())
    }
}
