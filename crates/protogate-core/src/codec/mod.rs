//! Bidirectional translation between the OpenAI chat-completion shape and
//! the upstream protobuf envelope.
//!
//! The envelope schema is owned entirely by this module; both the gateway
//! and the diagnostic `/encode` + `/decode` endpoints call the same
//! functions, so there is no shadow wire logic anywhere else.
//!
//! Request envelope:
//! ```text
//! message ChatTaskRequest {
//!     repeated Message messages = 1;   // { role=1, content=2, index=3 }
//!     Settings settings = 2;           // { model=1, temperature=2, top_p=3, max_tokens=4 }
//!     Metadata metadata = 3;           // { conversation_id=1, request_id=2 }
//! }
//! ```
//!
//! Response frames arrive length-prefixed (`varint len || frame`):
//! ```text
//! message ResponseFrame {
//!     uint64 turn_key = 1;
//!     uint32 role = 2;                 // 0 system, 1 user, 2 assistant
//!     string content = 3;
//!     uint32 finish = 4;               // 0 none, 1 stop, 2 length, 3 error
//! }
//! ```

pub mod wire;

use bytes::{Buf, BytesMut};
use protogate_types::error::CodecError;
use protogate_types::protocol::{ChatMessage, ChatRequest, ChatResponseChunk, ChatRole, FinishReason};

use wire::{put_double_field, put_msg_field, put_str_field, put_varint, put_varint_field, FieldIter};

// Documented upstream defaults for unset optional parameters. Encoding them
// explicitly keeps "unset" unambiguous on the wire.
const DEFAULT_TEMPERATURE: f64 = 1.0;
const DEFAULT_TOP_P: f64 = 1.0;
const DEFAULT_MAX_TOKENS: u32 = 0; // 0 = server-side default

const FIELD_MESSAGES: u32 = 1;
const FIELD_SETTINGS: u32 = 2;
const FIELD_METADATA: u32 = 3;

const MSG_ROLE: u32 = 1;
const MSG_CONTENT: u32 = 2;
const MSG_INDEX: u32 = 3;

const SET_MODEL: u32 = 1;
const SET_TEMPERATURE: u32 = 2;
const SET_TOP_P: u32 = 3;
const SET_MAX_TOKENS: u32 = 4;

const META_CONVERSATION_ID: u32 = 1;
const META_REQUEST_ID: u32 = 2;

const FRAME_TURN_KEY: u32 = 1;
const FRAME_ROLE: u32 = 2;
const FRAME_CONTENT: u32 = 3;
const FRAME_FINISH: u32 = 4;

/// Conversation/task identifiers carried in the envelope header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub conversation_id: String,
    pub request_id: String,
}

impl ConversationContext {
    /// Fresh identifiers for a new single-request conversation.
    pub fn fresh() -> Self {
        Self {
            conversation_id: format!("conv-{}", uuid::Uuid::new_v4()),
            request_id: format!("req-{}", uuid::Uuid::new_v4()),
        }
    }
}

/// The protobuf-encoded unit exchanged with the upstream service: opaque
/// payload bytes plus the typed header mirrored out for logging/routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEnvelope {
    pub conversation_id: String,
    pub request_id: String,
    pub payload: Vec<u8>,
}

/// Stateless encoder/decoder. Sole owner of the envelope wire shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtobufCodec;

impl ProtobufCodec {
    /// Encode an OpenAI-shaped request into the upstream envelope.
    ///
    /// Message ordering is preserved exactly as given; only the response
    /// path reorders. Unset sampling parameters take upstream defaults.
    pub fn encode(
        &self,
        request: &ChatRequest,
        context: &ConversationContext,
    ) -> Result<UpstreamEnvelope, CodecError> {
        request
            .validate()
            .map_err(|e| CodecError::malformed(e.to_string()))?;

        let mut payload = Vec::with_capacity(256);

        for (index, message) in request.messages.iter().enumerate() {
            let mut msg = Vec::with_capacity(message.content.len() + 16);
            put_varint_field(&mut msg, MSG_ROLE, role_to_wire(message.role));
            put_str_field(&mut msg, MSG_CONTENT, &message.content);
            put_varint_field(&mut msg, MSG_INDEX, index as u64);
            put_msg_field(&mut payload, FIELD_MESSAGES, &msg);
        }

        let mut settings = Vec::with_capacity(64);
        put_str_field(&mut settings, SET_MODEL, &request.model);
        put_double_field(
            &mut settings,
            SET_TEMPERATURE,
            request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        );
        put_double_field(&mut settings, SET_TOP_P, request.top_p.unwrap_or(DEFAULT_TOP_P));
        put_varint_field(
            &mut settings,
            SET_MAX_TOKENS,
            u64::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        put_msg_field(&mut payload, FIELD_SETTINGS, &settings);

        let mut metadata = Vec::with_capacity(96);
        put_str_field(&mut metadata, META_CONVERSATION_ID, &context.conversation_id);
        put_str_field(&mut metadata, META_REQUEST_ID, &context.request_id);
        put_msg_field(&mut payload, FIELD_METADATA, &metadata);

        Ok(UpstreamEnvelope {
            conversation_id: context.conversation_id.clone(),
            request_id: context.request_id.clone(),
            payload,
        })
    }

    /// Decode a request envelope back into the OpenAI shape (diagnostic
    /// `/decode` and the round-trip property). Unknown fields are skipped.
    pub fn decode_request(&self, payload: &[u8]) -> Result<ChatRequest, CodecError> {
        let mut messages: Vec<(u64, ChatMessage)> = Vec::new();
        let mut model: Option<String> = None;
        let mut temperature: Option<f64> = None;
        let mut top_p: Option<f64> = None;
        let mut max_tokens: Option<u32> = None;

        for field in FieldIter::new(payload) {
            let field = field?;
            match field.field {
                FIELD_MESSAGES => {
                    let msg_bytes = field.as_bytes()?;
                    let mut role: Option<ChatRole> = None;
                    let mut content: Option<String> = None;
                    let mut index: u64 = messages.len() as u64;
                    for inner in FieldIter::new(msg_bytes) {
                        let inner = inner?;
                        match inner.field {
                            MSG_ROLE => role = Some(role_from_wire(inner.as_varint()?)?),
                            MSG_CONTENT => content = Some(inner.as_str()?.to_string()),
                            MSG_INDEX => index = inner.as_varint()?,
                            _ => {} // schema evolves independently; skip
                        }
                    }
                    let role = role.ok_or_else(|| CodecError::missing("role"))?;
                    let content = content.ok_or_else(|| CodecError::missing("content"))?;
                    messages.push((index, ChatMessage { role, content }));
                }
                FIELD_SETTINGS => {
                    for inner in FieldIter::new(field.as_bytes()?) {
                        let inner = inner?;
                        match inner.field {
                            SET_MODEL => model = Some(inner.as_str()?.to_string()),
                            SET_TEMPERATURE => temperature = Some(inner.as_double()?),
                            SET_TOP_P => top_p = Some(inner.as_double()?),
                            SET_MAX_TOKENS => max_tokens = Some(inner.as_varint()? as u32),
                            _ => {}
                        }
                    }
                }
                FIELD_METADATA => {} // header is mirrored outside the payload
                _ => {}
            }
        }

        if messages.is_empty() {
            return Err(CodecError::missing("messages"));
        }
        messages.sort_by_key(|(index, _)| *index);

        Ok(ChatRequest {
            model: model.ok_or_else(|| CodecError::missing("model"))?,
            messages: messages.into_iter().map(|(_, m)| m).collect(),
            stream: false,
            temperature,
            top_p,
            max_tokens,
        })
    }

    /// Decode one response frame. Unknown or additional fields are ignored;
    /// a frame carrying neither content nor a finish flag is unusable for
    /// OpenAI-shape reconstruction and fails with `MissingField`.
    pub fn decode_frame(&self, frame: &[u8]) -> Result<ChatResponseChunk, CodecError> {
        let mut turn_key: u64 = 0;
        let mut role = ChatRole::Assistant;
        let mut content = String::new();
        let mut saw_content = false;
        let mut finish: Option<FinishReason> = None;

        for field in FieldIter::new(frame) {
            let field = field?;
            match field.field {
                FRAME_TURN_KEY => turn_key = field.as_varint()?,
                FRAME_ROLE => role = role_from_wire(field.as_varint()?)?,
                FRAME_CONTENT => {
                    content = field.as_str()?.to_string();
                    saw_content = true;
                }
                FRAME_FINISH => finish = finish_from_wire(field.as_varint()?),
                _ => {}
            }
        }

        if !saw_content && finish.is_none() {
            return Err(CodecError::missing("content"));
        }

        Ok(ChatResponseChunk { turn_key, role, content, finish })
    }

    /// Encode one response frame (used by tests and mock transports; the
    /// inverse of [`decode_frame`](Self::decode_frame)).
    pub fn encode_frame(&self, chunk: &ChatResponseChunk) -> Vec<u8> {
        let mut frame = Vec::with_capacity(chunk.content.len() + 16);
        put_varint_field(&mut frame, FRAME_TURN_KEY, chunk.turn_key);
        put_varint_field(&mut frame, FRAME_ROLE, role_to_wire(chunk.role));
        put_str_field(&mut frame, FRAME_CONTENT, &chunk.content);
        if let Some(finish) = chunk.finish {
            put_varint_field(&mut frame, FRAME_FINISH, finish_to_wire(finish));
        }
        frame
    }

    /// Decode a whole response body of length-prefixed frames at once
    /// (diagnostic `/decode` and the non-streaming path).
    pub fn decode_frames(&self, payload: &[u8]) -> Result<Vec<ChatResponseChunk>, CodecError> {
        let mut buffer = BytesMut::from(payload);
        let mut chunks = Vec::new();
        for frame in take_frames(&mut buffer)? {
            chunks.push(self.decode_frame(&frame)?);
        }
        if !buffer.is_empty() {
            return Err(CodecError::malformed("trailing bytes after last frame"));
        }
        Ok(chunks)
    }

    /// Length-prefix a sequence of frames into one body (mock transports).
    pub fn encode_frames(&self, chunks: &[ChatResponseChunk]) -> Vec<u8> {
        let mut body = Vec::new();
        for chunk in chunks {
            let frame = self.encode_frame(chunk);
            put_varint(&mut body, frame.len() as u64);
            body.extend_from_slice(&frame);
        }
        body
    }
}

/// Pull every *complete* `varint len || frame` unit out of `buffer`,
/// leaving any trailing partial frame in place for the next network chunk.
pub fn take_frames(buffer: &mut BytesMut) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut frames = Vec::new();
    loop {
        let (length, header_len) = match wire::read_varint(buffer, 0) {
            Ok(v) => v,
            Err(_) if buffer.len() < 10 => break, // incomplete length prefix
            Err(e) => return Err(e),
        };
        let length = length as usize;
        if length > 16 * 1024 * 1024 {
            return Err(CodecError::malformed("frame length exceeds 16 MiB cap"));
        }
        if buffer.len() < header_len + length {
            break; // frame body still in flight
        }
        buffer.advance(header_len);
        frames.push(buffer.split_to(length).to_vec());
    }
    Ok(frames)
}

fn role_to_wire(role: ChatRole) -> u64 {
    match role {
        ChatRole::System => 0,
        ChatRole::User => 1,
        ChatRole::Assistant => 2,
    }
}

fn role_from_wire(value: u64) -> Result<ChatRole, CodecError> {
    match value {
        0 => Ok(ChatRole::System),
        1 => Ok(ChatRole::User),
        2 => Ok(ChatRole::Assistant),
        other => Err(CodecError::malformed(format!("unknown role value: {}", other))),
    }
}

fn finish_to_wire(finish: FinishReason) -> u64 {
    match finish {
        FinishReason::Stop => 1,
        FinishReason::Length => 2,
        FinishReason::Error => 3,
    }
}

fn finish_from_wire(value: u64) -> Option<FinishReason> {
    match value {
        1 => Some(FinishReason::Stop),
        2 => Some(FinishReason::Length),
        3 => Some(FinishReason::Error),
        // 0 and anything the upstream adds later mean "not finished here"
        _ => None,
    }
}
