//! Wire protocol types.

pub mod openai;

pub use openai::{
    ChatMessage, ChatRequest, ChatResponseChunk, ChatRole, FinishReason,
};
