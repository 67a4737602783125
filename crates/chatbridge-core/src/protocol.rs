//! Inter-context message protocol.
//!
//! Every message between Scanner, Coordinator and Extractor is one of these
//! enums. The serde shape matches the JSON the contexts exchange:
//! requests are tagged by `action`, replies by `type`.

use serde::{Deserialize, Serialize};

use crate::activity::ActivityEntry;
use crate::error::WireError;
use crate::types::Settings;

/// Messages routed to the Coordinator or pushed to a Scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BridgeMessage {
    /// Scanner → Coordinator: obtain an answer for a framed question.
    #[serde(rename = "getAnswerFromChatGPT")]
    GetAnswer {
        question: String,
        #[serde(default, rename = "conversationId", skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    OpenConversationAndRespond {
        conversation_id: String,
        answer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    GetSettings,
    /// Raw payload; coerced to booleans on save.
    SaveSettings { settings: serde_json::Value },
    /// Extractor → Coordinator, fire-and-forget.
    #[serde(rename = "chatGPTResponse", rename_all = "camelCase")]
    ChatGptResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Coordinator → Scanners push.
    SettingsUpdated,
    ClearCurrentResponse,
    #[serde(rename_all = "camelCase")]
    InjectResponse {
        conversation_id: String,
        answer: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    ContinueScanning,
    ResetCaches,
    GetActivityLog,
}

impl BridgeMessage {
    /// Short name used in log lines.
    pub fn action(&self) -> &'static str {
        match self {
            Self::GetAnswer { .. } => "getAnswerFromChatGPT",
            Self::OpenConversationAndRespond { .. } => "openConversationAndRespond",
            Self::GetSettings => "getSettings",
            Self::SaveSettings { .. } => "saveSettings",
            Self::ChatGptResponse { .. } => "chatGPTResponse",
            Self::SettingsUpdated => "settingsUpdated",
            Self::ClearCurrentResponse => "clearCurrentResponse",
            Self::InjectResponse { .. } => "injectResponse",
            Self::ContinueScanning => "continueScanning",
            Self::ResetCaches => "resetCaches",
            Self::GetActivityLog => "getActivityLog",
        }
    }
}

/// Replies to a [`BridgeMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeResponse {
    Answer { answer: String },
    Error(WireError),
    Status { status: String },
    Settings(Settings),
    Activity { entries: Vec<ActivityEntry> },
}

impl BridgeResponse {
    pub fn status(status: impl Into<String>) -> Self {
        Self::Status { status: status.into() }
    }

    pub fn error(err: &crate::error::BridgeError) -> Self {
        Self::Error(err.to_wire())
    }
}

/// Coordinator → Extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ExtractorCommand {
    #[serde(rename_all = "camelCase")]
    AskQuestion { request_id: String, question: String },
}

/// Synchronous acknowledgement of an [`ExtractorCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorAck {
    Processing,
    SkippedRecentDuplicate,
}
