//! # Protogate Core
//!
//! Bridge logic between the OpenAI Chat Completions wire protocol and a
//! protobuf-speaking upstream AI service:
//!
//! ```text
//! protogate-core/src/
//! ├── credentials.rs   # persisted account pool (flat JSON file)
//! ├── auth/            # token refresh, anonymous fallback, quota probe
//! ├── rotation.rs      # round-robin account selection with demotion
//! ├── codec/           # OpenAI JSON ⇄ upstream protobuf envelope
//! ├── stream.rs        # upstream frames → OpenAI SSE chunks (turn reorder)
//! ├── gateway.rs       # end-to-end request orchestration
//! └── monitor.rs       # event feed for the inspection WebSocket
//! ```

pub mod auth;
pub mod codec;
pub mod credentials;
pub mod gateway;
pub mod monitor;
pub mod rotation;
pub mod stream;

pub use auth::{AuthEndpoints, TokenAuthenticator};
pub use codec::{ConversationContext, ProtobufCodec, UpstreamEnvelope};
pub use credentials::CredentialStore;
pub use gateway::{BridgeGateway, GatewayResponse, HttpUpstreamTransport, UpstreamTransport};
pub use monitor::{BridgeEvent, BridgeMonitor, EventKind};
pub use rotation::AccountRotator;
pub use stream::StreamTransform;
