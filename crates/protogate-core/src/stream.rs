//! Response stream reordering and SSE framing.
//!
//! The upstream interleaves frames from different conversation turns, so
//! content for one turn can arrive split around content for another. The
//! transform buffers per turn key and emits a turn as one coherent chunk
//! the moment its completion flag arrives (or the stream ends), which keeps
//! the OpenAI contract intact: concatenating the deltas for a role in
//! delivery order always reconstructs that role's full message.

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use protogate_types::error::GatewayError;
use protogate_types::protocol::{ChatMessage, ChatResponseChunk, ChatRole, FinishReason};
use serde_json::json;
use tracing::{debug, error};

/// Upstream silence beyond this window is treated as a transient failure.
pub const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(120);

struct TurnBuffer {
    key: u64,
    role: ChatRole,
    content: String,
}

/// Reorders interleaved upstream frames into turn-coherent chunks.
/// Purely synchronous; the async SSE adapter drives it.
#[derive(Default)]
pub struct StreamTransform {
    // First-appearance order; a finished turn is removed when emitted.
    pending: Vec<TurnBuffer>,
}

impl StreamTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded frame. Returns the completed turn when this frame
    /// carried its completion flag, `None` while the turn is still open.
    pub fn push(&mut self, frame: ChatResponseChunk) -> Option<ChatResponseChunk> {
        let position = match self.pending.iter().position(|t| t.key == frame.turn_key) {
            Some(position) => {
                self.pending[position].content.push_str(&frame.content);
                position
            }
            None => {
                self.pending.push(TurnBuffer {
                    key: frame.turn_key,
                    role: frame.role,
                    content: frame.content,
                });
                self.pending.len() - 1
            }
        };

        frame.finish.map(|finish| {
            let turn = self.pending.remove(position);
            ChatResponseChunk {
                turn_key: turn.key,
                role: turn.role,
                content: turn.content,
                finish: Some(finish),
            }
        })
    }

    /// Clean end of stream: flush every still-open turn in first-appearance
    /// order, each closed with `stop`.
    pub fn end(&mut self) -> Vec<ChatResponseChunk> {
        self.drain(FinishReason::Stop)
    }

    /// Mid-stream failure: flush accumulated partial content rather than
    /// silently truncating, with the last chunk carrying `error`.
    pub fn fail(&mut self) -> Vec<ChatResponseChunk> {
        self.drain(FinishReason::Error)
    }

    fn drain(&mut self, finish: FinishReason) -> Vec<ChatResponseChunk> {
        self.pending
            .drain(..)
            .map(|turn| ChatResponseChunk {
                turn_key: turn.key,
                role: turn.role,
                content: turn.content,
                finish: Some(finish),
            })
            .collect()
    }
}

/// Merge emitted turn chunks into whole messages, joining consecutive
/// chunks of the same role (the non-streaming response path).
pub fn merge_messages(chunks: &[ChatResponseChunk]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::new();
    for chunk in chunks {
        match messages.last_mut() {
            Some(last) if last.role == chunk.role => last.content.push_str(&chunk.content),
            _ => messages.push(ChatMessage::new(chunk.role, chunk.content.clone())),
        }
    }
    messages
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatResponseChunk, GatewayError>> + Send>>;
pub type SseStream = Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>;

/// Adapt a decoded upstream chunk stream into OpenAI SSE wire framing
/// (`data: <json>\n\n` per chunk, terminated by `data: [DONE]\n\n`).
///
/// Errors never abort the HTTP response mid-flight: partial content is
/// flushed, an error chunk is emitted, and the stream closes with the
/// normal sentinel so clients always see a well-formed SSE body.
pub fn openai_sse_stream(mut upstream: ChunkStream, model: String) -> SseStream {
    let stream_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created_ts = chrono::Utc::now().timestamp();

    let stream = async_stream::stream! {
        let mut transform = StreamTransform::new();
        let mut sent_role = false;

        loop {
            let next = tokio::time::timeout(INACTIVITY_TIMEOUT, upstream.next()).await;
            match next {
                Ok(Some(Ok(frame))) => {
                    if let Some(turn) = transform.push(frame) {
                        yield Ok(sse_chunk(&stream_id, created_ts, &model, &turn, !sent_role));
                        sent_role = true;
                    }
                }
                Ok(Some(Err(e))) => {
                    error!(code = e.code(), error = %e, "upstream stream failed mid-flight");
                    for turn in transform.fail() {
                        yield Ok(sse_chunk(&stream_id, created_ts, &model, &turn, !sent_role));
                        sent_role = true;
                    }
                    yield Ok(sse_error(&stream_id, created_ts, &model, &e));
                    yield Ok(Bytes::from("data: [DONE]\n\n"));
                    return;
                }
                Ok(None) => break,
                Err(_) => {
                    error!("upstream stream stalled past inactivity window");
                    let e = GatewayError::UpstreamUnavailable(
                        "upstream stream stalled".to_string(),
                    );
                    for turn in transform.fail() {
                        yield Ok(sse_chunk(&stream_id, created_ts, &model, &turn, !sent_role));
                        sent_role = true;
                    }
                    yield Ok(sse_error(&stream_id, created_ts, &model, &e));
                    yield Ok(Bytes::from("data: [DONE]\n\n"));
                    return;
                }
            }
        }

        for turn in transform.end() {
            yield Ok(sse_chunk(&stream_id, created_ts, &model, &turn, !sent_role));
            sent_role = true;
        }

        debug!(stream_id = %stream_id, "stream complete");
        yield Ok(Bytes::from("data: [DONE]\n\n"));
    };

    Box::pin(stream)
}

fn sse_chunk(
    stream_id: &str,
    created_ts: i64,
    model: &str,
    turn: &ChatResponseChunk,
    include_role: bool,
) -> Bytes {
    let mut delta = json!({ "content": turn.content });
    if include_role {
        delta["role"] = json!(turn.role.as_str());
    }

    let chunk = json!({
        "id": stream_id,
        "object": "chat.completion.chunk",
        "created": created_ts,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": turn.finish.map(|f| f.as_str())
        }]
    });

    Bytes::from(format!(
        "data: {}\n\n",
        serde_json::to_string(&chunk).unwrap_or_default()
    ))
}

fn sse_error(stream_id: &str, created_ts: i64, model: &str, e: &GatewayError) -> Bytes {
    let chunk = json!({
        "id": stream_id,
        "object": "chat.completion.chunk",
        "created": created_ts,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": {},
            "finish_reason": "error"
        }],
        "error": {
            "code": e.code(),
            "message": e.to_string()
        }
    });

    Bytes::from(format!(
        "data: {}\n\n",
        serde_json::to_string(&chunk).unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved_turns_reassemble_per_role() {
        let mut transform = StreamTransform::new();

        // {A:"He", B:"Hi", A:"llo"} with A=turn 0, B=turn 1.
        assert!(transform.push(ChatResponseChunk::delta(0, ChatRole::Assistant, "He")).is_none());
        assert!(transform.push(ChatResponseChunk::delta(1, ChatRole::User, "Hi")).is_none());
        assert!(transform.push(ChatResponseChunk::delta(0, ChatRole::Assistant, "llo")).is_none());

        let turn_a = transform
            .push(ChatResponseChunk::finished(0, ChatRole::Assistant, FinishReason::Stop))
            .unwrap();
        assert_eq!(turn_a.content, "Hello");
        assert_eq!(turn_a.role, ChatRole::Assistant);

        let rest = transform.end();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "Hi");
        assert_eq!(rest[0].role, ChatRole::User);
        assert_eq!(rest[0].finish, Some(FinishReason::Stop));
    }

    #[test]
    fn test_fail_flushes_partials_with_error_flag() {
        let mut transform = StreamTransform::new();
        transform.push(ChatResponseChunk::delta(0, ChatRole::Assistant, "partial"));

        let flushed = transform.fail();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].content, "partial");
        assert_eq!(flushed[0].finish, Some(FinishReason::Error));
    }

    #[test]
    fn test_merge_messages_joins_consecutive_roles() {
        let chunks = vec![
            ChatResponseChunk::delta(0, ChatRole::Assistant, "Hel"),
            ChatResponseChunk::delta(1, ChatRole::Assistant, "lo"),
            ChatResponseChunk::delta(2, ChatRole::User, "Hi"),
        ];
        let messages = merge_messages(&chunks);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(messages[1].content, "Hi");
    }

    #[tokio::test]
    async fn test_sse_stream_frames_and_done_sentinel() {
        let chunks: Vec<Result<ChatResponseChunk, GatewayError>> = vec![
            Ok(ChatResponseChunk::delta(0, ChatRole::Assistant, "Hel")),
            Ok(ChatResponseChunk::delta(0, ChatRole::Assistant, "lo")),
            Ok(ChatResponseChunk::finished(0, ChatRole::Assistant, FinishReason::Stop)),
        ];
        let upstream: ChunkStream = Box::pin(futures::stream::iter(chunks));

        let frames: Vec<_> = openai_sse_stream(upstream, "agent-default".to_string())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(frames.len(), 2);
        let first = String::from_utf8(frames[0].as_ref().unwrap().to_vec()).unwrap();
        assert!(first.starts_with("data: "));
        assert!(first.contains("\"content\":\"Hello\""));
        assert!(first.contains("\"role\":\"assistant\""));
        assert!(first.contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames[1].as_ref().unwrap().as_ref(), b"data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_sse_stream_error_flushes_partials_then_done() {
        let chunks: Vec<Result<ChatResponseChunk, GatewayError>> = vec![
            Ok(ChatResponseChunk::delta(0, ChatRole::Assistant, "part")),
            Err(GatewayError::UpstreamUnavailable("connection reset".to_string())),
        ];
        let upstream: ChunkStream = Box::pin(futures::stream::iter(chunks));

        let frames: Vec<_> = openai_sse_stream(upstream, "agent-default".to_string())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(frames.len(), 3);
        let partial = String::from_utf8(frames[0].as_ref().unwrap().to_vec()).unwrap();
        assert!(partial.contains("\"content\":\"part\""));
        assert!(partial.contains("\"finish_reason\":\"error\""));
        let error = String::from_utf8(frames[1].as_ref().unwrap().to_vec()).unwrap();
        assert!(error.contains("\"code\":\"upstream_unavailable\""));
        assert_eq!(frames[2].as_ref().unwrap().as_ref(), b"data: [DONE]\n\n");
    }
}
