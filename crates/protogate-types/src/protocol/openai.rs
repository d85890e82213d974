//! OpenAI ChatCompletions API types and the internal chunk model.

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// OpenAI message role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Incoming OpenAI-shaped chat completion request. Sampling parameters are
/// pass-through: absent values take documented upstream defaults at encode
/// time rather than being omitted ambiguously.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Boundary validation: reject structurally unusable requests before any
    /// credential or upstream work happens.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::Validation("model must not be empty".to_string()));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::Validation("messages must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Completion state attached to the final chunk of a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

impl FinishReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::Error => "error",
        }
    }
}

/// One decoded upstream frame: an incremental content delta tagged with its
/// role and conversation-turn key, plus an optional completion flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponseChunk {
    /// Conversation-turn key used to regroup interleaved upstream frames
    pub turn_key: u64,
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish: Option<FinishReason>,
}

impl ChatResponseChunk {
    pub fn delta(turn_key: u64, role: ChatRole, content: impl Into<String>) -> Self {
        Self { turn_key, role, content: content.into(), finish: None }
    }

    pub fn finished(turn_key: u64, role: ChatRole, finish: FinishReason) -> Self {
        Self { turn_key, role, content: String::new(), finish: Some(finish) }
    }
}
