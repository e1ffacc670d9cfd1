// Credential broker and the authorities / stores it coordinates

pub mod broker;
pub mod keyring;
pub mod live_oauth;
pub mod memory;
pub mod store;
pub mod vso;

pub use broker::{BrokerSettings, CredentialBroker};
pub use keyring::KeyringStore;
pub use live_oauth::{CodePrompt, LiveAuthority, TerminalPrompt};
pub use memory::MemoryStore;
pub use store::TokenStore;
pub use vso::VsoAuthority;

use async_trait::async_trait;
use url::Url;

use crate::error::AuthorityError;
use crate::types::{IdentityTokenPair, PersonalAccessToken, TargetResource};

/// Identity provider that hands out access + refresh token pairs.
/// `Ok(None)` means no pair was produced (e.g. the user cancelled).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityAuthority: Send + Sync {
    /// Interactive acquisition; may prompt the user
    async fn acquire_interactive(
        &self,
        client_id: &str,
        resource: &str,
        redirect_uri: &Url,
        hint: &str,
    ) -> Result<Option<IdentityTokenPair>, AuthorityError>;

    /// Silent acquisition with a previously issued refresh token
    async fn acquire_by_refresh_token(
        &self,
        client_id: &str,
        resource: &str,
        refresh_token: &str,
    ) -> Result<Option<IdentityTokenPair>, AuthorityError>;
}

/// Service that trades an identity access token for a resource-scoped PAT
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceAuthority: Send + Sync {
    async fn exchange_for_pat(
        &self,
        target: &TargetResource,
        access_token: &str,
        compact: bool,
    ) -> Result<PersonalAccessToken, AuthorityError>;
}
