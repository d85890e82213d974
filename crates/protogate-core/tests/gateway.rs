//! End-to-end gateway scenarios against a scripted upstream transport.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use protogate_core::gateway::{ByteStream, GatewayResponse, UpstreamTransport};
use protogate_core::{
    AccountRotator, AuthEndpoints, BridgeGateway, BridgeMonitor, CredentialStore, ProtobufCodec,
    TokenAuthenticator, UpstreamEnvelope,
};
use protogate_types::error::GatewayError;
use protogate_types::models::{Account, AccountStatus, CredentialSet};
use protogate_types::protocol::{
    ChatMessage, ChatRequest, ChatResponseChunk, ChatRole, FinishReason,
};
use tokio::sync::Mutex;

/// Transport that replays a scripted sequence of outcomes and records every
/// bearer token it was handed.
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Vec<u8>, GatewayError>>>,
    calls: AtomicUsize,
    bearers: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<Vec<u8>, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            bearers: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn send(
        &self,
        _envelope: &UpstreamEnvelope,
        bearer_token: &str,
    ) -> Result<ByteStream, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bearers.lock().await.push(bearer_token.to_string());

        let next = self.script.lock().await.pop_front().unwrap_or_else(|| {
            Err(GatewayError::UpstreamUnavailable("script exhausted".to_string()))
        });
        match next {
            Ok(body) => {
                let stream = futures::stream::once(async move { Ok(Bytes::from(body)) });
                Ok(Box::pin(stream))
            }
            Err(e) => Err(e),
        }
    }
}

/// Response body for one assistant turn saying `content` and stopping.
fn assistant_body(content: &str) -> Vec<u8> {
    let codec = ProtobufCodec;
    codec.encode_frames(&[
        ChatResponseChunk::delta(0, ChatRole::Assistant, content),
        ChatResponseChunk::finished(0, ChatRole::Assistant, FinishReason::Stop),
    ])
}

fn chat_request(stream: bool) -> ChatRequest {
    ChatRequest {
        model: "agent-default".to_string(),
        messages: vec![ChatMessage::new(ChatRole::User, "hi")],
        stream,
        temperature: None,
        top_p: None,
        max_tokens: None,
    }
}

/// Endpoints nothing should ever reach; any hit fails fast.
fn dead_endpoints() -> AuthEndpoints {
    AuthEndpoints {
        token_url: "http://127.0.0.1:9/token?key=test".to_string(),
        graphql_url: "http://127.0.0.1:9/graphql".to_string(),
        identity_url: "http://127.0.0.1:9/identity".to_string(),
    }
}

struct Fixture {
    store: Arc<CredentialStore>,
    _dir: tempfile::TempDir,
}

/// Store with the given accounts, each holding a fresh cached token
/// `at-<email>` so no refresh traffic is needed.
async fn seeded_store(emails: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");
    let set = CredentialSet::new(
        emails.iter().map(|e| Account::new(*e, format!("rt-{}", e))).collect(),
    );
    std::fs::write(&path, serde_json::to_string(&set).unwrap()).unwrap();

    let store = Arc::new(CredentialStore::load(&path).unwrap());
    let expiry = chrono::Utc::now().timestamp() + 3600;
    for email in emails {
        store.update_token(email, &format!("at-{}", email), expiry).await.unwrap();
    }
    Fixture { store, _dir: dir }
}

fn gateway(
    transport: Arc<ScriptedTransport>,
    store: Arc<CredentialStore>,
    endpoints: AuthEndpoints,
) -> BridgeGateway {
    let authenticator = Arc::new(TokenAuthenticator::new(
        reqwest::Client::new(),
        endpoints,
        store.clone(),
    ));
    BridgeGateway::new(
        transport,
        authenticator,
        AccountRotator::new(store),
        Arc::new(BridgeMonitor::new()),
        0,
    )
}

#[tokio::test]
async fn test_single_account_non_streaming_completion() {
    let fixture = seeded_store(&["a@x.io"]).await;
    let transport = ScriptedTransport::new(vec![Ok(assistant_body("Hello there"))]);
    let gateway = gateway(transport.clone(), fixture.store.clone(), dead_endpoints());

    let response = gateway.chat(chat_request(false)).await.unwrap();
    let GatewayResponse::Complete(completion) = response else {
        panic!("expected a complete response");
    };

    assert_eq!(completion["object"], "chat.completion");
    assert_eq!(completion["choices"][0]["message"]["role"], "assistant");
    assert_eq!(completion["choices"][0]["message"]["content"], "Hello there");
    assert_eq!(completion["choices"][0]["finish_reason"], "stop");

    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.bearers.lock().await.as_slice(), ["at-a@x.io"]);
}

#[tokio::test]
async fn test_quota_exhaustion_rotates_to_second_account() {
    let fixture = seeded_store(&["a@x.io", "b@x.io"]).await;
    let transport = ScriptedTransport::new(vec![
        Err(GatewayError::QuotaExhausted("upstream reported quota exhausted".to_string())),
        Ok(assistant_body("served by b")),
    ]);
    let gateway = gateway(transport.clone(), fixture.store.clone(), dead_endpoints());

    let response = gateway.chat(chat_request(false)).await.unwrap();
    let GatewayResponse::Complete(completion) = response else {
        panic!("expected a complete response");
    };
    assert_eq!(completion["choices"][0]["message"]["content"], "served by b");

    // The first account's demotion is persisted, not just in memory.
    assert_eq!(
        fixture.store.get("a@x.io").await.unwrap().status,
        AccountStatus::QuotaExhausted
    );
    assert_eq!(
        fixture.store.get("b@x.io").await.unwrap().status,
        AccountStatus::Available
    );
    assert_eq!(
        transport.bearers.lock().await.as_slice(),
        ["at-a@x.io", "at-b@x.io"]
    );
}

#[tokio::test]
async fn test_validation_error_makes_no_upstream_or_auth_calls() {
    let fixture = seeded_store(&["a@x.io"]).await;
    let transport = ScriptedTransport::new(vec![]);
    let gateway = gateway(transport.clone(), fixture.store.clone(), dead_endpoints());

    let request = ChatRequest {
        model: "agent-default".to_string(),
        messages: vec![],
        stream: false,
        temperature: None,
        top_p: None,
        max_tokens: None,
    };

    let err = gateway.chat(request).await.unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_exhausted_pool_without_fallback_surfaces_quota_error() {
    let fixture = seeded_store(&["a@x.io", "b@x.io"]).await;
    fixture.store.mark("a@x.io", AccountStatus::QuotaExhausted).await.unwrap();
    fixture.store.mark("b@x.io", AccountStatus::InvalidToken).await.unwrap();

    let transport = ScriptedTransport::new(vec![]);
    let gateway = gateway(transport.clone(), fixture.store.clone(), dead_endpoints());

    let err = gateway.chat(chat_request(false)).await.unwrap_err();
    assert!(matches!(err, GatewayError::QuotaExhausted(_)));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_upstream_401_forces_refresh_and_retries_once() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-refreshed",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let fixture = seeded_store(&["a@x.io"]).await;
    let transport = ScriptedTransport::new(vec![
        Err(GatewayError::Auth(protogate_types::error::AuthError::Transient {
            message: "upstream rejected bearer token (401)".to_string(),
        })),
        Ok(assistant_body("after refresh")),
    ]);
    let endpoints = AuthEndpoints {
        token_url: format!("{}/token?key=test", server.uri()),
        graphql_url: format!("{}/graphql", server.uri()),
        identity_url: format!("{}/identity", server.uri()),
    };
    let gateway = gateway(transport.clone(), fixture.store.clone(), endpoints);

    let response = gateway.chat(chat_request(false)).await.unwrap();
    let GatewayResponse::Complete(completion) = response else {
        panic!("expected a complete response");
    };
    assert_eq!(completion["choices"][0]["message"]["content"], "after refresh");
    assert_eq!(
        transport.bearers.lock().await.as_slice(),
        ["at-a@x.io", "at-refreshed"]
    );
}

#[tokio::test]
async fn test_rejected_refresh_token_rotates_to_next_account() {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fixture = seeded_store(&["a@x.io", "b@x.io"]).await;
    let transport = ScriptedTransport::new(vec![
        Err(GatewayError::Auth(protogate_types::error::AuthError::Transient {
            message: "upstream rejected bearer token (401)".to_string(),
        })),
        Ok(assistant_body("served by b")),
    ]);
    let endpoints = AuthEndpoints {
        token_url: format!("{}/token?key=test", server.uri()),
        graphql_url: format!("{}/graphql", server.uri()),
        identity_url: format!("{}/identity", server.uri()),
    };
    let gateway = gateway(transport.clone(), fixture.store.clone(), endpoints);

    let response = gateway.chat(chat_request(false)).await.unwrap();
    let GatewayResponse::Complete(completion) = response else {
        panic!("expected a complete response");
    };
    assert_eq!(completion["choices"][0]["message"]["content"], "served by b");

    // The dead account is marked terminally, the request still succeeded.
    assert_eq!(
        fixture.store.get("a@x.io").await.unwrap().status,
        AccountStatus::InvalidToken
    );
    assert_eq!(
        transport.bearers.lock().await.as_slice(),
        ["at-a@x.io", "at-b@x.io"]
    );
}

#[tokio::test]
async fn test_streaming_reorders_interleaved_turns() {
    let codec = ProtobufCodec;
    let body = codec.encode_frames(&[
        ChatResponseChunk::delta(0, ChatRole::Assistant, "He"),
        ChatResponseChunk::delta(1, ChatRole::Assistant, "Hi"),
        ChatResponseChunk::delta(0, ChatRole::Assistant, "llo"),
        ChatResponseChunk::finished(0, ChatRole::Assistant, FinishReason::Stop),
        ChatResponseChunk::finished(1, ChatRole::Assistant, FinishReason::Stop),
    ]);

    let fixture = seeded_store(&["a@x.io"]).await;
    let transport = ScriptedTransport::new(vec![Ok(body)]);
    let gateway = gateway(transport.clone(), fixture.store.clone(), dead_endpoints());

    let response = gateway.chat(chat_request(true)).await.unwrap();
    let GatewayResponse::Stream(stream) = response else {
        panic!("expected a streaming response");
    };

    let frames: Vec<String> = stream
        .map(|item| String::from_utf8(item.unwrap().to_vec()).unwrap())
        .collect::<Vec<_>>()
        .await;

    assert_eq!(frames.len(), 3);
    assert!(frames[0].contains("\"content\":\"Hello\""));
    assert!(frames[1].contains("\"content\":\"Hi\""));
    assert_eq!(frames[2], "data: [DONE]\n\n");
}
