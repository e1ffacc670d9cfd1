/// Credential broker: turns identity logins into stored, resource-scoped PATs
///
/// Two entry points share one pipeline (validate → acquire → exchange → persist):
/// `interactive_login` prompts through the identity authority, `refresh_credentials`
/// silently reuses the stored refresh token. Both report a plain `bool`; the reason
/// for a failure is logged and available through the `*_outcome` variants.
use tracing::{debug, info, warn};
use url::Url;

use super::{IdentityAuthority, ResourceAuthority, TokenStore};
use crate::error::{BrokerError, FailureKind, Outcome};
use crate::types::{Credential, IdentityTokenPair, TargetResource, Token, TokenKind};

/// Fixed values handed to the identity authority on every acquisition
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub client_id: String,
    pub resource: String,
    pub redirect_uri: Url,
    /// Extra query parameters for interactive login (account type, presentation)
    pub login_hint: String,
}

pub struct CredentialBroker<S, I, R> {
    settings: BrokerSettings,
    pat_store: S,
    refresh_store: S,
    identity: I,
    resource: R,
}

impl<S, I, R> CredentialBroker<S, I, R>
where
    S: TokenStore,
    I: IdentityAuthority,
    R: ResourceAuthority,
{
    pub fn new(
        settings: BrokerSettings,
        pat_store: S,
        refresh_store: S,
        identity: I,
        resource: R,
    ) -> Self {
        Self {
            settings,
            pat_store,
            refresh_store,
            identity,
            resource,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    pub fn pat_store(&self) -> &S {
        &self.pat_store
    }

    pub fn refresh_store(&self) -> &S {
        &self.refresh_store
    }

    /// Log in interactively, store the refresh token, then exchange for a PAT.
    /// Only a malformed target is an error; every other failure is `Ok(false)`.
    pub async fn interactive_login(&self, target: &str, compact: bool) -> Result<bool, BrokerError> {
        let outcome = self.interactive_login_outcome(target, compact).await?;
        Ok(Self::project("interactive login", target, outcome))
    }

    /// Refresh silently with the stored refresh token. Never prompts.
    pub async fn refresh_credentials(&self, target: &str, compact: bool) -> Result<bool, BrokerError> {
        let outcome = self.refresh_credentials_outcome(target, compact).await?;
        Ok(Self::project("refresh", target, outcome))
    }

    pub async fn interactive_login_outcome(
        &self,
        target: &str,
        compact: bool,
    ) -> Result<Outcome, BrokerError> {
        let target = TargetResource::parse(target)?;

        let acquired = self
            .identity
            .acquire_interactive(
                &self.settings.client_id,
                &self.settings.resource,
                &self.settings.redirect_uri,
                &self.settings.login_hint,
            )
            .await;

        let tokens = match acquired {
            Ok(Some(tokens)) => tokens,
            Ok(None) => return Ok(Err(FailureKind::NoTokens)),
            Err(e) => return Ok(Err(e.into())),
        };

        // Persist before exchanging so a failed exchange still leaves the target refreshable
        if let Err(e) = self.refresh_store.write(&target, &Token::refresh(&tokens.refresh_token)) {
            warn!("Failed to store refresh token for {}: {:#}", target, e);
        }

        Ok(self.exchange_and_store(&target, &tokens, compact).await)
    }

    pub async fn refresh_credentials_outcome(
        &self,
        target: &str,
        compact: bool,
    ) -> Result<Outcome, BrokerError> {
        let target = TargetResource::parse(target)?;

        let refresh_token = match self.refresh_store.read(&target) {
            Ok(Some(token)) => token,
            Ok(None) => return Ok(Err(FailureKind::NoRefreshToken)),
            Err(e) => return Ok(Err(FailureKind::Store(e))),
        };

        let acquired = self
            .identity
            .acquire_by_refresh_token(
                &self.settings.client_id,
                &self.settings.resource,
                &refresh_token.value,
            )
            .await;

        // The stale refresh token stays put on failure; the next interactive login replaces it
        let tokens = match acquired {
            Ok(Some(tokens)) => tokens,
            Ok(None) => return Ok(Err(FailureKind::NoTokens)),
            Err(e) => return Ok(Err(e.into())),
        };

        Ok(self.exchange_and_store(&target, &tokens, compact).await)
    }

    /// Credentials for this account class only come from the authority flows.
    /// Always `false`, and the stores are never touched.
    pub fn set_credentials(&self, target: &str, _credential: &Credential) -> bool {
        let outcome: Outcome = Err(FailureKind::Unsupported(
            "credentials for identity-backed accounts cannot be set directly",
        ));
        Self::project("set credentials", target, outcome)
    }

    /// Stored PAT for `target` as a git credential. No network access.
    pub fn get_credentials(&self, target: &str) -> Result<Option<Credential>, BrokerError> {
        let target = TargetResource::parse(target)?;

        match self.pat_store.read(&target) {
            Ok(Some(token)) if token.kind != TokenKind::Refresh => Ok(Some(Credential::from(&token))),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("Failed to read stored PAT for {}: {:#}", target, e);
                Ok(None)
            }
        }
    }

    /// Forget the stored PAT for `target`, keeping the refresh token so the next
    /// `acquire` can mint a new PAT silently. Local only; nothing is revoked.
    pub fn delete_pat(&self, target: &str) -> Result<bool, BrokerError> {
        let target = TargetResource::parse(target)?;

        match self.pat_store.delete(&target) {
            Ok(removed) => {
                if removed {
                    info!("Removed stored PAT for {}", target);
                }
                Ok(removed)
            }
            Err(e) => {
                warn!("Failed to delete PAT for {}: {:#}", target, e);
                Ok(false)
            }
        }
    }

    /// Forget the stored PAT and refresh token for `target`. Local only; nothing is revoked.
    pub fn delete_credentials(&self, target: &str) -> Result<bool, BrokerError> {
        let target = TargetResource::parse(target)?;
        let mut removed = false;

        for (name, store) in [("PAT", &self.pat_store), ("refresh token", &self.refresh_store)] {
            match store.delete(&target) {
                Ok(deleted) => removed |= deleted,
                Err(e) => warn!("Failed to delete {} for {}: {:#}", name, target, e),
            }
        }

        if removed {
            info!("Removed stored credentials for {}", target);
        }
        Ok(removed)
    }

    /// Stored PAT first, then a silent refresh, then (if allowed) an interactive login
    pub async fn acquire(
        &self,
        target: &str,
        compact: bool,
        allow_prompt: bool,
    ) -> Result<Option<Credential>, BrokerError> {
        if let Some(credential) = self.get_credentials(target)? {
            debug!("Using stored PAT for {}", target);
            return Ok(Some(credential));
        }

        let obtained = self.refresh_credentials(target, compact).await?
            || (allow_prompt && self.interactive_login(target, compact).await?);

        if !obtained {
            return Ok(None);
        }
        self.get_credentials(target)
    }

    async fn exchange_and_store(
        &self,
        target: &TargetResource,
        tokens: &IdentityTokenPair,
        compact: bool,
    ) -> Outcome {
        let pat = self
            .resource
            .exchange_for_pat(target, &tokens.access_token, compact)
            .await?;

        self.pat_store
            .write(target, &Token::from(pat))
            .map_err(FailureKind::Store)?;

        debug!(compact, "Stored PAT for {}", target);
        Ok(())
    }

    fn project(operation: &str, target: &str, outcome: Outcome) -> bool {
        match outcome {
            Ok(()) => {
                info!("{} succeeded for {}", operation, target);
                true
            }
            Err(FailureKind::NoRefreshToken) => {
                debug!("{}: no refresh token stored for {}", operation, target);
                false
            }
            Err(FailureKind::Unsupported(reason)) => {
                debug!("{} unsupported for {}: {}", operation, target, reason);
                false
            }
            Err(e) => {
                warn!("{} failed for {}: {}", operation, target, e);
                false
            }
        }
    }
}
