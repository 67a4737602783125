//! ChatBridge configuration system.
//!
//! Timing bounds and page locators live in `~/.chatbridge/config.toml`.
//! The user toggles (enabled / partial automation) are NOT here; they belong
//! to the settings store so every context sees the same value.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Where the JSON settings store lives. `~` is expanded.
    #[serde(default = "default_settings_path")]
    pub settings_path: String,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

fn default_settings_path() -> String { "~/.chatbridge/settings.json".into() }

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
            coordinator: CoordinatorConfig::default(),
            extractor: ExtractorConfig::default(),
            scanner: ScannerConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load config from the default path (~/.chatbridge/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BridgeError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Resolved location of the settings store.
    pub fn settings_file(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.settings_path).to_string())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the ChatBridge home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".chatbridge")
    }
}

// ═══════════════════════════════════════════════════════════
// Coordinator
// ═══════════════════════════════════════════════════════════

/// Request correlator and page acquisition bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_answer_timeout_ms")]
    pub answer_timeout_ms: u64,
    /// Load bound for an answer page that was already open.
    #[serde(default = "default_existing_page_load_ms")]
    pub existing_page_load_ms: u64,
    #[serde(default = "default_new_page_load_ms")]
    pub new_page_load_ms: u64,
    #[serde(default = "default_load_poll_ms")]
    pub load_poll_ms: u64,
    /// Pause between injecting the extractor and sending it the question.
    #[serde(default = "default_extractor_warmup_ms")]
    pub extractor_warmup_ms: u64,
    #[serde(default = "default_recent_ttl_ms")]
    pub recently_submitted_ttl_ms: u64,
}

fn default_answer_timeout_ms() -> u64 { 60_000 }
fn default_existing_page_load_ms() -> u64 { 5_000 }
fn default_new_page_load_ms() -> u64 { 15_000 }
fn default_load_poll_ms() -> u64 { 250 }
fn default_extractor_warmup_ms() -> u64 { 500 }
fn default_recent_ttl_ms() -> u64 { 180_000 }

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            answer_timeout_ms: default_answer_timeout_ms(),
            existing_page_load_ms: default_existing_page_load_ms(),
            new_page_load_ms: default_new_page_load_ms(),
            load_poll_ms: default_load_poll_ms(),
            extractor_warmup_ms: default_extractor_warmup_ms(),
            recently_submitted_ttl_ms: default_recent_ttl_ms(),
        }
    }
}

impl CoordinatorConfig {
    pub fn answer_timeout(&self) -> Duration { Duration::from_millis(self.answer_timeout_ms) }
    pub fn existing_page_load(&self) -> Duration { Duration::from_millis(self.existing_page_load_ms) }
    pub fn new_page_load(&self) -> Duration { Duration::from_millis(self.new_page_load_ms) }
    pub fn load_poll(&self) -> Duration { Duration::from_millis(self.load_poll_ms) }
    pub fn extractor_warmup(&self) -> Duration { Duration::from_millis(self.extractor_warmup_ms) }
    pub fn recently_submitted_ttl(&self) -> Duration { Duration::from_millis(self.recently_submitted_ttl_ms) }
}

// ═══════════════════════════════════════════════════════════
// Extractor
// ═══════════════════════════════════════════════════════════

/// Answer page automation: waits and locators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_duplicate_window_ms")]
    pub duplicate_window_ms: u64,
    #[serde(default = "default_primary_input_wait_ms")]
    pub primary_input_wait_ms: u64,
    #[serde(default = "default_fallback_input_wait_ms")]
    pub fallback_input_wait_ms: u64,
    #[serde(default = "default_pre_submit_ms")]
    pub pre_submit_ms: u64,
    #[serde(default = "default_post_enter_ms")]
    pub post_enter_ms: u64,
    /// Time given to the answer service to generate its reply.
    #[serde(default = "default_reply_settle_ms")]
    pub reply_settle_ms: u64,
    #[serde(default)]
    pub locators: ExtractorLocators,
}

fn default_duplicate_window_ms() -> u64 { 5_000 }
fn default_primary_input_wait_ms() -> u64 { 10_000 }
fn default_fallback_input_wait_ms() -> u64 { 2_000 }
fn default_pre_submit_ms() -> u64 { 300 }
fn default_post_enter_ms() -> u64 { 750 }
fn default_reply_settle_ms() -> u64 { 10_000 }

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            duplicate_window_ms: default_duplicate_window_ms(),
            primary_input_wait_ms: default_primary_input_wait_ms(),
            fallback_input_wait_ms: default_fallback_input_wait_ms(),
            pre_submit_ms: default_pre_submit_ms(),
            post_enter_ms: default_post_enter_ms(),
            reply_settle_ms: default_reply_settle_ms(),
            locators: ExtractorLocators::default(),
        }
    }
}

impl ExtractorConfig {
    pub fn duplicate_window(&self) -> Duration { Duration::from_millis(self.duplicate_window_ms) }
    pub fn primary_input_wait(&self) -> Duration { Duration::from_millis(self.primary_input_wait_ms) }
    pub fn fallback_input_wait(&self) -> Duration { Duration::from_millis(self.fallback_input_wait_ms) }
    pub fn pre_submit(&self) -> Duration { Duration::from_millis(self.pre_submit_ms) }
    pub fn post_enter(&self) -> Duration { Duration::from_millis(self.post_enter_ms) }
    pub fn reply_settle(&self) -> Duration { Duration::from_millis(self.reply_settle_ms) }
}

/// Selectors for the answer service page. Ordered lists are tried first to last.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorLocators {
    #[serde(default = "default_primary_input")]
    pub primary_input: String,
    #[serde(default = "default_fallback_input")]
    pub fallback_input: String,
    #[serde(default = "default_send_controls")]
    pub send_controls: Vec<String>,
    #[serde(default = "default_turn")]
    pub conversation_turn: String,
    #[serde(default = "default_assistant")]
    pub assistant_message: String,
    #[serde(default = "default_reply_body")]
    pub reply_body: String,
    #[serde(default = "default_paragraph")]
    pub paragraph: String,
    #[serde(default = "default_any_reply")]
    pub any_reply: String,
}

fn default_primary_input() -> String { "div#prompt-textarea[contenteditable='true']".into() }
fn default_fallback_input() -> String { "textarea#prompt-textarea".into() }
fn default_send_controls() -> Vec<String> {
    vec![
        "button#composer-submit-button[data-testid='send-button']".into(),
        "button[data-testid='send-button']".into(),
        "button[aria-label*='Send']".into(),
        "button[aria-label*='Submit']".into(),
        "form button[type='submit']".into(),
    ]
}
fn default_turn() -> String { "article[data-testid^='conversation-turn-']".into() }
fn default_assistant() -> String { "div[data-message-author-role='assistant']".into() }
fn default_reply_body() -> String { "div.markdown".into() }
fn default_paragraph() -> String { "p".into() }
fn default_any_reply() -> String { "div[data-message-author-role='assistant'] div.markdown".into() }

impl Default for ExtractorLocators {
    fn default() -> Self {
        Self {
            primary_input: default_primary_input(),
            fallback_input: default_fallback_input(),
            send_controls: default_send_controls(),
            conversation_turn: default_turn(),
            assistant_message: default_assistant(),
            reply_body: default_reply_body(),
            paragraph: default_paragraph(),
            any_reply: default_any_reply(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Scanner & delivery
// ═══════════════════════════════════════════════════════════

/// Automation cycle scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_inter_question_ms")]
    pub inter_question_ms: u64,
    /// How long a busy-rejected question keeps its pending marker.
    #[serde(default = "default_busy_grace_ms")]
    pub busy_grace_ms: u64,
    #[serde(default = "default_resume_ms")]
    pub resume_ms: u64,
    /// Answers containing this text mean "no relevant answer".
    #[serde(default = "default_not_found_sentinel")]
    pub not_found_sentinel: String,
    /// `{conversation_id}` and `{question}` are substituted.
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

fn default_poll_ms() -> u64 { 5_000 }
fn default_inter_question_ms() -> u64 { 15_000 }
fn default_busy_grace_ms() -> u64 { 10_000 }
fn default_resume_ms() -> u64 { 500 }
fn default_not_found_sentinel() -> String { "NOTFOUND".into() }
fn default_prompt_template() -> String { "Customer-id-{conversation_id}\nQuestion: {question}".into() }

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            poll_ms: default_poll_ms(),
            inter_question_ms: default_inter_question_ms(),
            busy_grace_ms: default_busy_grace_ms(),
            resume_ms: default_resume_ms(),
            not_found_sentinel: default_not_found_sentinel(),
            prompt_template: default_prompt_template(),
        }
    }
}

impl ScannerConfig {
    pub fn poll(&self) -> Duration { Duration::from_millis(self.poll_ms) }
    pub fn inter_question(&self) -> Duration { Duration::from_millis(self.inter_question_ms) }
    pub fn busy_grace(&self) -> Duration { Duration::from_millis(self.busy_grace_ms) }
    pub fn resume(&self) -> Duration { Duration::from_millis(self.resume_ms) }
}

/// Delivery state machine bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_draft_settle_ms")]
    pub draft_settle_ms: u64,
}

fn default_max_attempts() -> u32 { 2 }
fn default_retry_backoff_ms() -> u64 { 5_000 }
fn default_draft_settle_ms() -> u64 { 500 }

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            draft_settle_ms: default_draft_settle_ms(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_backoff(&self) -> Duration { Duration::from_millis(self.retry_backoff_ms) }
    pub fn draft_settle(&self) -> Duration { Duration::from_millis(self.draft_settle_ms) }
}
