// src/types/mod.rs - Message records and shared enhancer types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Chat message data record as the host widget hands it to its append function.
///
/// The host owns the record; the enhancer only rewrites `message` and `badges`
/// in place. Unknown fields ride along in `extra` so the host sees its record
/// unchanged apart from what the pipeline touched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_user_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badges: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// In-process "already evaluated" marker. Never serialized back to the host.
    #[serde(skip)]
    pub evaluated: bool,
}

impl MessageRecord {
    pub fn new(user_id: Option<&str>, username: Option<&str>, text: &str) -> Self {
        Self {
            system_user_id: user_id.map(|id| Value::String(id.to_string())),
            username: username.map(|name| Value::String(name.to_string())),
            message: Some(Value::String(text.to_string())),
            ..Default::default()
        }
    }

    /// Author id normalised to a string. Numeric ids become their decimal form.
    pub fn user_id(&self) -> Result<Option<String>, EnhancerError> {
        match &self.system_user_id {
            Some(value) => normalize_user_id(value),
            None => Ok(None),
        }
    }

    pub fn username(&self) -> Result<Option<String>, EnhancerError> {
        match &self.username {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(name)) if name.trim().is_empty() => Ok(None),
            Some(Value::String(name)) => Ok(Some(name.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(EnhancerError::PerMessageFault(format!(
                "username has unsupported type: {}",
                other
            ))),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(Value::as_str)
    }

    pub fn set_text(&mut self, text: String) {
        self.message = Some(Value::String(text));
    }

    /// Badge keys currently attached to the record. A missing or non-array
    /// `badges` field reads as an empty list.
    pub fn badge_list(&self) -> Vec<String> {
        match &self.badges {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn set_badges(&mut self, badges: Vec<String>) {
        self.badges = Some(Value::Array(badges.into_iter().map(Value::String).collect()));
    }
}

/// Normalise a user identifier coming from either a string or numeric source.
pub fn normalize_user_id(value: &Value) -> Result<Option<String>, EnhancerError> {
    match value {
        Value::Null => Ok(None),
        Value::String(id) => {
            let trimmed = id.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i.to_string()))
            } else if let Some(u) = n.as_u64() {
                Ok(Some(u.to_string()))
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(Some(format!("{}", f as i64))),
                    _ => Ok(Some(n.to_string())),
                }
            }
        }
        other => Err(EnhancerError::PerMessageFault(format!(
            "user id has unsupported type: {}",
            other
        ))),
    }
}

/// Lifecycle of a single message through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Unseen,
    Evaluated,
    Suppressed,
    Rendered,
}

/// What the pipeline did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Blocked author (or hidden by a filter); never shown.
    Suppressed,
    /// Filters, badge and emotes applied.
    Rendered,
    /// Evaluation failed; the message goes through untouched.
    PassedThrough,
    /// Already carried the processed marker; nothing was done.
    AlreadyEvaluated,
}

impl Outcome {
    pub fn is_visible(&self) -> bool {
        !matches!(self, Outcome::Suppressed)
    }
}

/// Error taxonomy for the enhancer. None of these ever reach the host page.
#[derive(Debug, Error)]
pub enum EnhancerError {
    #[error("stored state is corrupt: {0}")]
    PersistenceCorruption(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("emote provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("malformed filter spec '{spec}': {reason}")]
    MalformedFilterSpec { spec: String, reason: String },

    #[error("message evaluation failed: {0}")]
    PerMessageFault(String),

    #[error("chat container not found after {attempts} attempts")]
    HostNotFound { attempts: u32 },

    #[error("invalid configuration: {0}")]
    Config(String),
}
