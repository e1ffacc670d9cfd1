pub mod auth;
pub mod config;
pub mod error;
pub mod helper;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use auth::{CredentialBroker, IdentityAuthority, ResourceAuthority, TokenStore};
pub use config::Config;
pub use error::{BrokerError, FailureKind};
pub use types::{Credential, IdentityTokenPair, PersonalAccessToken, TargetResource, Token, TokenKind};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
