use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pricing::Offer;
use crate::session::FinalizationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

/// How long the scheduler holds a message back before delivering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pace {
    /// Delivered as soon as it reaches the front of the queue.
    Immediate,
    /// Random "typing" latency.
    #[default]
    Typing,
    /// Fixed, longer delay used while quotes are being computed.
    Loading,
}

/// Structured data attached to a message for the front end to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MessagePayload {
    Offers(Vec<Offer>),
    Finalized(Box<FinalizationRecord>),
}

/// A transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    /// Quick-reply options valid as the next input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<MessagePayload>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(skip)]
    pub pace: Pace,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>, pace: Pace) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            options: Vec::new(),
            payload: None,
            is_error: false,
            pace,
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content, Pace::Typing)
    }

    /// Echo of what the user submitted; never delayed.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, Pace::Immediate)
    }

    pub fn error(content: impl Into<String>) -> Self {
        let mut message = Self::system(content);
        message.is_error = true;
        message
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_payload(mut self, payload: MessagePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn paced(mut self, pace: Pace) -> Self {
        self.pace = pace;
        self
    }
}
