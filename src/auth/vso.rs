/// Visual Studio Online session tokens: exchange an identity access token for a PAT
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ResourceAuthority;
use crate::error::AuthorityError;
use crate::types::{PersonalAccessToken, TargetResource};

pub const DEFAULT_IDENTITY_SERVICE: &str = "https://app.vssps.visualstudio.com";
pub const DEFAULT_TOKEN_SCOPE: &str = "vso.code_write vso.packaging";

const SESSION_TOKENS_PATH: &str = "/_apis/token/sessiontokens";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionTokenRequest<'a> {
    scope: &'a str,
    target_accounts: Option<Vec<String>>,
    display_name: String,
}

#[derive(Deserialize)]
struct SessionTokenResponse {
    #[serde(default)]
    token: Option<String>,
}

pub struct VsoAuthority {
    client: reqwest::Client,
    identity_service: String,
    token_scope: String,
}

impl Default for VsoAuthority {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_SERVICE, DEFAULT_TOKEN_SCOPE, Duration::from_secs(30))
    }
}

impl VsoAuthority {
    pub fn new(identity_service: &str, token_scope: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            identity_service: identity_service.trim_end_matches('/').to_string(),
            token_scope: token_scope.to_string(),
        }
    }

    /// Session token endpoint, asking for the compact token type when requested
    pub fn session_tokens_url(&self, compact: bool) -> String {
        let mut url = format!(
            "{}{}?api-version=1.0",
            self.identity_service, SESSION_TOKENS_PATH
        );
        if compact {
            url.push_str("&tokentype=compact");
        }
        url
    }

    fn display_name(target: &TargetResource) -> String {
        let machine = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string());
        format!("Git: {} on {}", target, machine)
    }
}

#[async_trait]
impl ResourceAuthority for VsoAuthority {
    async fn exchange_for_pat(
        &self,
        target: &TargetResource,
        access_token: &str,
        compact: bool,
    ) -> Result<PersonalAccessToken, AuthorityError> {
        let body = SessionTokenRequest {
            scope: &self.token_scope,
            target_accounts: None,
            display_name: Self::display_name(target),
        };

        let res = self
            .client
            .post(self.session_tokens_url(compact))
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .header("User-Agent", concat!("credbroker/", env!("CARGO_PKG_VERSION")))
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let error_text = res.text().await.unwrap_or_default();
            return Err(AuthorityError::Denied(format!(
                "PAT exchange refused ({}): {}",
                status, error_text
            )));
        }

        if !status.is_success() {
            let error_text = res.text().await?;
            return Err(anyhow!("PAT exchange failed ({}): {}", status, error_text).into());
        }

        let session: SessionTokenResponse = res
            .json()
            .await
            .context("Failed to parse session token response")?;

        match session.token {
            Some(token) if !token.is_empty() => Ok(PersonalAccessToken::new(token, compact)),
            _ => Err(anyhow!("Session token response carried no token").into()),
        }
    }
}
