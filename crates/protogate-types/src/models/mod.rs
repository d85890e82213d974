//! Data models.

mod account;
mod quota;
mod token;

pub use account::{Account, AccountStatus, CredentialSet};
pub use quota::QuotaSnapshot;
pub use token::{AuthToken, TokenOrigin};
