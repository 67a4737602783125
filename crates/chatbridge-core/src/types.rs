//! Shared domain types: settings, questions, delivery jobs, answer outcomes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::traits::page::ElementHandle;

/// User-facing toggles shared by every context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_partial_automation: bool,
}

impl Settings {
    /// Build settings from an untyped payload. Only a literal JSON `true`
    /// turns a toggle on; anything else, including `"true"` or `1`, is off.
    pub fn coerce(value: &serde_json::Value) -> Self {
        Self {
            is_enabled: is_true(value.get("isEnabled")),
            is_partial_automation: is_true(value.get("isPartialAutomation")),
        }
    }
}

fn is_true(value: Option<&serde_json::Value>) -> bool {
    matches!(value, Some(serde_json::Value::Bool(true)))
}

/// Derive a stable conversation id from a sender display name.
/// First 8 bytes of SHA-256, reduced to 10 decimal digits.
pub fn conversation_id_for_sender(sender: &str) -> String {
    let digest = Sha256::digest(sender.trim().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    format!("{:010}", u64::from_be_bytes(bytes) % 10_000_000_000)
}

/// A piece of discovered work. Owned by the Scanner; never serialized.
#[derive(Debug, Clone)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub sender: String,
    pub conversation_id: String,
    /// The discovered message element on the messaging page.
    pub handle: ElementHandle,
}

impl Question {
    pub fn new(sender: impl Into<String>, text: impl Into<String>, handle: ElementHandle) -> Self {
        let sender = sender.into();
        let conversation_id = conversation_id_for_sender(&sender);
        Self {
            id: format!("q-{conversation_id}"),
            text: text.into(),
            sender,
            conversation_id,
            handle,
        }
    }
}

/// The staged unit between "answer received" and "answer delivered".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryJob {
    pub conversation_id: String,
    pub sender: String,
    pub original_question_text: String,
    pub answer: String,
    pub retries: u32,
}

impl DeliveryJob {
    pub fn new(question: &Question, answer: impl Into<String>) -> Self {
        Self {
            conversation_id: question.conversation_id.clone(),
            sender: question.sender.clone(),
            original_question_text: question.text.clone(),
            answer: answer.into(),
            retries: 0,
        }
    }

    /// Count one failed attempt. Returns true once `max` is reached.
    pub fn record_failure(&mut self, max: u32) -> bool {
        self.retries = self.retries.saturating_add(1);
        self.retries >= max
    }
}

/// How the Scanner reads an answer returned by the Coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    Reply(String),
    /// The answer service explicitly had nothing relevant.
    NotFound,
    Empty,
}

impl AnswerOutcome {
    pub fn classify(answer: &str, sentinel: &str) -> Self {
        let trimmed = answer.trim();
        if trimmed.is_empty() {
            Self::Empty
        } else if !sentinel.is_empty() && trimmed.contains(sentinel) {
            Self::NotFound
        } else {
            Self::Reply(trimmed.to_string())
        }
    }
}

/// Frame a question for the answer service.
pub fn format_prompt(template: &str, conversation_id: &str, question: &str) -> String {
    template
        .replace("{conversation_id}", conversation_id)
        .replace("{question}", question)
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Short single-line rendering for log lines.
pub fn preview(s: &str) -> String {
    let flat = s.replace('\n', " ");
    let cut = safe_truncate(&flat, 60);
    if cut.len() < flat.len() {
        format!("{cut}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_is_stable() {
        let a = conversation_id_for_sender("Nguyen Van A");
        let b = conversation_id_for_sender("Nguyen Van A");
        let c = conversation_id_for_sender("Tran Thi B");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 10);
        assert!(a.chars().all(|ch| ch.is_ascii_digit()));
    }

    #[test]
    fn test_question_ids() {
        let q = Question::new("Alice", "Do you ship abroad?", ElementHandle(7));
        assert_eq!(q.id, format!("q-{}", q.conversation_id));
        assert_eq!(q.handle, ElementHandle(7));
    }

    #[test]
    fn test_settings_coercion() {
        let s = Settings::coerce(&serde_json::json!({"isEnabled": true, "isPartialAutomation": false}));
        assert_eq!(s, Settings { is_enabled: true, is_partial_automation: false });

        let s = Settings::coerce(&serde_json::json!({}));
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn test_settings_coercion_rejects_non_booleans() {
        let s = Settings::coerce(&serde_json::json!({"isEnabled": "false", "isPartialAutomation": 1}));
        assert_eq!(s, Settings::default());

        for raw in [serde_json::json!("true"), serde_json::json!("yes"), serde_json::json!(1), serde_json::json!({})] {
            let s = Settings::coerce(&serde_json::json!({"isEnabled": raw.clone()}));
            assert!(!s.is_enabled, "{raw} must not enable automation");
        }
    }

    #[test]
    fn test_settings_wire_names() {
        let json = serde_json::to_value(Settings { is_enabled: true, is_partial_automation: false }).unwrap();
        assert_eq!(json["isEnabled"], true);
        assert_eq!(json["isPartialAutomation"], false);
    }

    #[test]
    fn test_classify_answer() {
        assert_eq!(AnswerOutcome::classify("  ", "NOTFOUND"), AnswerOutcome::Empty);
        assert_eq!(AnswerOutcome::classify("Sorry, NOTFOUND.", "NOTFOUND"), AnswerOutcome::NotFound);
        assert_eq!(
            AnswerOutcome::classify(" We ship worldwide. ", "NOTFOUND"),
            AnswerOutcome::Reply("We ship worldwide.".into())
        );
    }

    #[test]
    fn test_retry_budget() {
        let q = Question::new("Bob", "Price?", ElementHandle(1));
        let mut job = DeliveryJob::new(&q, "10$");
        assert!(!job.record_failure(2));
        assert!(job.record_failure(2));
        assert_eq!(job.retries, 2);
    }

    #[test]
    fn test_format_prompt() {
        let p = format_prompt("Customer-id-{conversation_id}\nQuestion: {question}", "0123456789", "Hi");
        assert_eq!(p, "Customer-id-0123456789\nQuestion: Hi");
    }

    #[test]
    fn test_safe_truncate_utf8() {
        assert_eq!(safe_truncate("xin chào bạn", 7), "xin chà");
        assert_eq!(safe_truncate("abc", 10), "abc");
        let long = "ả".repeat(100);
        assert!(preview(&long).ends_with("..."));
    }
}
