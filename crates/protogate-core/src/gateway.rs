//! End-to-end request orchestration.
//!
//! One `chat` call runs the full pipeline: select account, mint a bearer
//! token, encode, call upstream, decode and reframe the response. Failures
//! that another credential could absorb are retried internally with a
//! bounded budget; only exhausted avenues surface to the client.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use protogate_types::error::{AuthError, CodecError, GatewayError, Result};
use protogate_types::models::AuthToken;
use protogate_types::protocol::{ChatRequest, ChatRole, FinishReason};
use serde_json::json;
use tracing::{info, warn};

use crate::auth::TokenAuthenticator;
use crate::codec::{take_frames, ConversationContext, ProtobufCodec, UpstreamEnvelope};
use crate::monitor::{BridgeEvent, EventKind, SharedMonitor};
use crate::rotation::AccountRotator;
use crate::stream::{merge_messages, openai_sse_stream, ChunkStream, SseStream, StreamTransform};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Seam to the upstream chat endpoint. Production uses HTTP; tests swap in
/// a scripted transport.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Send one envelope and return the raw response byte stream
    /// (length-prefixed frames).
    async fn send(&self, envelope: &UpstreamEnvelope, bearer_token: &str) -> Result<ByteStream>;
}

/// Real transport: POST the envelope as a protobuf body, stream the reply.
pub struct HttpUpstreamTransport {
    http: reqwest::Client,
    chat_url: String,
}

impl HttpUpstreamTransport {
    pub fn new(http: reqwest::Client, chat_url: String) -> Self {
        Self { http, chat_url }
    }
}

#[async_trait]
impl UpstreamTransport for HttpUpstreamTransport {
    async fn send(&self, envelope: &UpstreamEnvelope, bearer_token: &str) -> Result<ByteStream> {
        let response = self
            .http
            .post(&self.chat_url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-protobuf")
            .header("x-request-id", &envelope.request_id)
            .bearer_auth(bearer_token)
            .body(envelope.payload.clone())
            .send()
            .await
            .map_err(|e| {
                GatewayError::UpstreamUnavailable(format!("upstream unreachable: {}", e))
            })?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => {}
            401 | 403 => {
                return Err(GatewayError::Auth(AuthError::Transient {
                    message: format!("upstream rejected bearer token ({})", status),
                }));
            }
            429 => {
                return Err(GatewayError::QuotaExhausted(
                    "upstream reported quota exhausted".to_string(),
                ));
            }
            _ => {
                return Err(GatewayError::UpstreamUnavailable(format!(
                    "upstream returned status {}",
                    status
                )));
            }
        }

        let stream = response.bytes_stream().map(|item| {
            item.map_err(|e| {
                GatewayError::UpstreamUnavailable(format!("upstream stream failed: {}", e))
            })
        });
        Ok(Box::pin(stream))
    }
}

/// What a chat call hands back to the HTTP layer.
pub enum GatewayResponse {
    /// SSE body for `stream: true`
    Stream(SseStream),
    /// Complete OpenAI completion object for `stream: false`
    Complete(serde_json::Value),
}

impl std::fmt::Debug for GatewayResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
        }
    }
}

/// The orchestrator. One instance per process, shared across requests.
pub struct BridgeGateway {
    transport: Arc<dyn UpstreamTransport>,
    authenticator: Arc<TokenAuthenticator>,
    rotator: AccountRotator,
    codec: ProtobufCodec,
    monitor: SharedMonitor,
    quota_threshold: i64,
}

impl BridgeGateway {
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        authenticator: Arc<TokenAuthenticator>,
        rotator: AccountRotator,
        monitor: SharedMonitor,
        quota_threshold: i64,
    ) -> Self {
        Self {
            transport,
            authenticator,
            rotator,
            codec: ProtobufCodec,
            monitor,
            quota_threshold,
        }
    }

    pub fn codec(&self) -> &ProtobufCodec {
        &self.codec
    }

    /// Serve one OpenAI-shaped chat request end to end.
    pub async fn chat(&self, request: ChatRequest) -> Result<GatewayResponse> {
        request.validate()?;

        let started = Instant::now();
        self.monitor
            .record(BridgeEvent::new(EventKind::RequestStarted).with_model(&request.model))
            .await;

        let result = self.chat_inner(&request).await;

        match &result {
            Ok(_) => {
                self.monitor
                    .record(
                        BridgeEvent::new(EventKind::RequestCompleted)
                            .with_model(&request.model)
                            .with_duration_ms(started.elapsed().as_millis() as u64),
                    )
                    .await;
            }
            Err(e) => {
                self.monitor
                    .record(
                        BridgeEvent::new(EventKind::RequestFailed)
                            .with_model(&request.model)
                            .with_detail(e.code()),
                    )
                    .await;
            }
        }
        result
    }

    async fn chat_inner(&self, request: &ChatRequest) -> Result<GatewayResponse> {
        let context = ConversationContext::fresh();
        let envelope = self.codec.encode(request, &context)?;

        // Bounded budgets: one rotation retry, one re-auth retry, one
        // transient upstream retry per client request.
        let mut rotation_budget = 1u8;
        let mut auth_budget = 1u8;
        let mut upstream_budget = 1u8;

        loop {
            let token = self.acquire_token(&mut rotation_budget).await?;

            match self.transport.send(&envelope, &token.token).await {
                Ok(bytes) => return self.respond(request, bytes).await,
                Err(GatewayError::QuotaExhausted(message)) => {
                    if let Some(email) = token.origin.account_email() {
                        self.monitor
                            .record(
                                BridgeEvent::new(EventKind::QuotaExhausted).with_account(email),
                            )
                            .await;
                        self.rotator.report_quota_exhausted(email).await?;
                    }
                    if rotation_budget > 0 {
                        rotation_budget -= 1;
                        info!("quota exhausted mid-request, retrying against next credential");
                        continue;
                    }
                    return Err(GatewayError::QuotaExhausted(message));
                }
                Err(GatewayError::Auth(auth_err)) => {
                    if auth_budget > 0 {
                        auth_budget -= 1;
                        if let Some(email) = token.origin.account_email() {
                            warn!(email, "upstream rejected token, forcing refresh and retrying");
                            match self.authenticator.force_refresh(email).await {
                                Ok(_) => {
                                    self.monitor
                                        .record(
                                            BridgeEvent::new(EventKind::TokenRefreshed)
                                                .with_account(email),
                                        )
                                        .await;
                                }
                                // A rejected refresh token is terminal for
                                // the account, not the request.
                                Err(GatewayError::Auth(AuthError::InvalidToken { .. }))
                                    if rotation_budget > 0 =>
                                {
                                    rotation_budget -= 1;
                                    self.rotator.report_invalid(email).await?;
                                    self.monitor
                                        .record(
                                            BridgeEvent::new(EventKind::AccountRotated)
                                                .with_account(email)
                                                .with_detail("auth_error"),
                                        )
                                        .await;
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        continue;
                    }
                    return Err(GatewayError::Auth(auth_err));
                }
                Err(GatewayError::UpstreamUnavailable(message)) => {
                    if upstream_budget > 0 {
                        upstream_budget -= 1;
                        warn!(detail = %message, "transient upstream failure, retrying once");
                        continue;
                    }
                    return Err(GatewayError::UpstreamUnavailable(message));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Pick a credential and mint its bearer token, demoting and advancing
    /// past accounts that fail. Falls back to anonymous when the pool is
    /// empty or fully demoted.
    async fn acquire_token(&self, rotation_budget: &mut u8) -> Result<AuthToken> {
        loop {
            let Some(account) = self.rotator.select_active().await else {
                return self.anonymous_fallback().await;
            };

            let token = match self.authenticator.token_for(&account).await {
                Ok(token) => token,
                Err(e) => {
                    match &e {
                        GatewayError::Auth(AuthError::InvalidToken { .. }) => {
                            self.rotator.report_invalid(&account.email).await?;
                        }
                        GatewayError::QuotaExhausted(_) => {
                            self.rotator.report_quota_exhausted(&account.email).await?;
                        }
                        // Already marked refresh_failed by the
                        // authenticator; selection skips it on its own.
                        _ => {}
                    }
                    if *rotation_budget > 0 {
                        *rotation_budget -= 1;
                        self.monitor
                            .record(
                                BridgeEvent::new(EventKind::AccountRotated)
                                    .with_account(&account.email)
                                    .with_detail(e.code()),
                            )
                            .await;
                        continue;
                    }
                    return Err(e);
                }
            };

            // Proactive demotion: rotate away before a doomed call when the
            // upstream-reported remaining quota sits under the threshold.
            if let Some(snapshot) = self
                .authenticator
                .maybe_probe_quota(&account, &token.token, self.quota_threshold)
                .await
            {
                if snapshot.is_low(self.quota_threshold) {
                    info!(
                        email = %account.email,
                        remaining = snapshot.remaining(),
                        "remaining quota under threshold, demoting proactively"
                    );
                    self.monitor
                        .record(
                            BridgeEvent::new(EventKind::QuotaExhausted)
                                .with_account(&account.email)
                                .with_detail("proactive"),
                        )
                        .await;
                    self.rotator.report_quota_exhausted(&account.email).await?;
                    continue;
                }
            }

            return Ok(token);
        }
    }

    async fn anonymous_fallback(&self) -> Result<AuthToken> {
        let pool_empty = self.authenticator.store().is_empty().await;
        match self.authenticator.anonymous_token().await {
            Ok(token) => Ok(token),
            // A configured-but-exhausted pool surfaces as quota exhaustion,
            // not as an anonymous-signup detail the client cannot act on.
            Err(e) if !pool_empty => Err(GatewayError::QuotaExhausted(format!(
                "all accounts exhausted and anonymous fallback failed: {}",
                e.code()
            ))),
            Err(e) => Err(e),
        }
    }

    async fn respond(&self, request: &ChatRequest, bytes: ByteStream) -> Result<GatewayResponse> {
        let chunks = decode_chunk_stream(self.codec, bytes);
        if request.stream {
            Ok(GatewayResponse::Stream(openai_sse_stream(chunks, request.model.clone())))
        } else {
            let completion = collect_completion(chunks, request.model.clone()).await?;
            Ok(GatewayResponse::Complete(completion))
        }
    }
}

/// Incrementally split the response byte stream into frames and decode each
/// into a chunk.
fn decode_chunk_stream(codec: ProtobufCodec, mut bytes: ByteStream) -> ChunkStream {
    let stream = async_stream::stream! {
        let mut buffer = BytesMut::new();
        while let Some(item) = bytes.next().await {
            match item {
                Ok(data) => {
                    buffer.extend_from_slice(&data);
                    match take_frames(&mut buffer) {
                        Ok(frames) => {
                            for frame in frames {
                                yield codec.decode_frame(&frame).map_err(GatewayError::from);
                            }
                        }
                        Err(e) => {
                            yield Err(GatewayError::from(e));
                            return;
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if !buffer.is_empty() {
            yield Err(GatewayError::from(CodecError::malformed(
                "truncated frame at end of stream",
            )));
        }
    };
    Box::pin(stream)
}

/// Drive the reorder transform to completion and build the single
/// completion object for `stream: false`.
async fn collect_completion(
    mut chunks: ChunkStream,
    model: String,
) -> Result<serde_json::Value> {
    let mut transform = StreamTransform::new();
    let mut turns = Vec::new();
    let mut finish = FinishReason::Stop;

    while let Some(item) = chunks.next().await {
        let frame = item?;
        if let Some(turn) = transform.push(frame) {
            if let Some(f) = turn.finish {
                finish = f;
            }
            turns.push(turn);
        }
    }
    turns.extend(transform.end());

    let content: String = merge_messages(&turns)
        .into_iter()
        .filter(|m| m.role == ChatRole::Assistant)
        .map(|m| m.content)
        .collect();

    Ok(json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": finish.as_str()
        }]
    }))
}
