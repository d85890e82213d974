//! # Protogate Types
//!
//! Shared data models for the Protogate bridge: upstream accounts and
//! tokens, OpenAI-compatible protocol shapes, and the serializable error
//! taxonomy used across the gateway.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::{AuthError, CodecError, GatewayError};
pub use models::{Account, AccountStatus, AuthToken, CredentialSet, QuotaSnapshot, TokenOrigin};
