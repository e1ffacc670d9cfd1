/// Microsoft Account (live.com) OAuth: PKCE authorization code flow + refresh grant
/// Login happens in the browser; the user pastes the resulting code back into the terminal.
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::IdentityAuthority;
use crate::error::AuthorityError;
use crate::types::IdentityTokenPair;

pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com/live.com";

/// OAuth error codes that mean the authority refused, rather than failed
const DENIED_ERRORS: &[&str] = &[
    "invalid_grant",
    "invalid_client",
    "invalid_request",
    "access_denied",
    "unauthorized_client",
    "interaction_required",
    "consent_required",
];

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[allow(dead_code)]
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Authorization request ready to be opened in a browser
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub code_verifier: String,
    pub state: String,
}

/// Source of the authorization code the user copies out of the browser
pub trait CodePrompt: Send + Sync {
    /// Blocking read of one line of user input
    fn read_code(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Prompts on the controlling terminal. stdin is never read: under git it carries
/// the credential request and is already at EOF by the time we prompt.
pub struct TerminalPrompt;

impl CodePrompt for TerminalPrompt {
    fn read_code(&self, prompt: &str) -> anyhow::Result<String> {
        let term = console::Term::stderr();
        if !term.is_term() {
            anyhow::bail!("No terminal available to read the authorization code");
        }

        let input = dialoguer::Input::<String>::new()
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text_on(&term)?;
        Ok(input)
    }
}

pub struct LiveAuthority {
    client: reqwest::Client,
    authority_host: String,
    open_browser: bool,
    prompt: Arc<dyn CodePrompt>,
}

impl Default for LiveAuthority {
    fn default() -> Self {
        Self::new(DEFAULT_AUTHORITY_HOST, Duration::from_secs(30))
    }
}

impl LiveAuthority {
    pub fn new(authority_host: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            open_browser: true,
            prompt: Arc::new(TerminalPrompt),
        }
    }

    /// Skip launching a browser; the URL is still printed
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Read the authorization code from `prompt` instead of the terminal
    pub fn with_prompt(mut self, prompt: impl CodePrompt + 'static) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/authorize", self.authority_host)
    }

    fn token_endpoint(&self) -> String {
        format!("{}/oauth2/token", self.authority_host)
    }

    /// Generate PKCE code verifier (43-128 characters per RFC 7636)
    fn generate_code_verifier() -> String {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut random_bytes = vec![0u8; 32]; // 32 bytes = 43 chars base64
        rng.fill_bytes(&mut random_bytes);
        URL_SAFE_NO_PAD.encode(random_bytes)
    }

    /// Generate PKCE code challenge (SHA-256 of verifier)
    fn generate_code_challenge(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    fn generate_state() -> String {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut random_bytes = vec![0u8; 16];
        rng.fill_bytes(&mut random_bytes);
        URL_SAFE_NO_PAD.encode(random_bytes)
    }

    /// Build the authorization URL. `hint` is appended verbatim as extra query parameters.
    pub fn build_auth_url(
        &self,
        client_id: &str,
        resource: &str,
        redirect_uri: &Url,
        hint: &str,
    ) -> AuthorizationRequest {
        let code_verifier = Self::generate_code_verifier();
        let code_challenge = Self::generate_code_challenge(&code_verifier);
        let state = Self::generate_state();

        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&resource={}&code_challenge={}&code_challenge_method=S256&state={}",
            self.authorize_endpoint(),
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri.as_str()),
            urlencoding::encode(resource),
            code_challenge,
            state
        );

        let hint = hint.trim_start_matches(['?', '&']);
        if !hint.is_empty() {
            url.push('&');
            url.push_str(hint);
        }

        AuthorizationRequest {
            url,
            code_verifier,
            state,
        }
    }

    /// Redeem an authorization code at the token endpoint
    pub async fn redeem_code(
        &self,
        client_id: &str,
        resource: &str,
        redirect_uri: &Url,
        code: &str,
        code_verifier: &str,
    ) -> Result<IdentityTokenPair, AuthorityError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("resource", resource),
            ("redirect_uri", redirect_uri.as_str()),
            ("code", code),
            ("code_verifier", code_verifier),
        ];

        let res = self
            .client
            .post(self.token_endpoint())
            .form(&params)
            .header("Accept", "application/json")
            .send()
            .await?;

        Self::read_token_response(res, None).await
    }

    /// Trade a refresh token for a fresh token pair
    pub async fn refresh(
        &self,
        client_id: &str,
        resource: &str,
        refresh_token: &str,
    ) -> Result<IdentityTokenPair, AuthorityError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("resource", resource),
            ("refresh_token", refresh_token),
        ];

        let res = self
            .client
            .post(self.token_endpoint())
            .form(&params)
            .header("Accept", "application/json")
            .send()
            .await?;

        // Authorities may omit the refresh token on renewal; the old one stays valid then
        Self::read_token_response(res, Some(refresh_token)).await
    }

    async fn read_token_response(
        res: reqwest::Response,
        fallback_refresh: Option<&str>,
    ) -> Result<IdentityTokenPair, AuthorityError> {
        let status = res.status();
        let text = res.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, &text));
        }

        let token_response: TokenResponse = serde_json::from_str(&text)
            .context("Failed to parse token response")?;

        let refresh_token = token_response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| fallback_refresh.map(str::to_string))
            .ok_or_else(|| anyhow!("Token response did not include a refresh token"))?;

        if token_response.access_token.is_empty() {
            return Err(anyhow!("Token response contained an empty access token").into());
        }

        Ok(IdentityTokenPair {
            access_token: token_response.access_token,
            refresh_token,
        })
    }

    /// Ask the user for the code shown after login. `None` when they enter nothing.
    async fn prompt_for_code(&self, request: &AuthorizationRequest) -> Result<Option<String>, AuthorityError> {
        let prompt = Arc::clone(&self.prompt);
        let input = tokio::task::spawn_blocking(move || {
            prompt.read_code("📋 Paste authorization code (or the full redirect URL)")
        })
        .await
        .context("Prompt task failed")?
        .context("Failed to read authorization code")?;

        parse_pasted_code(input.trim(), &request.state)
    }
}

/// Extract the authorization code from what the user pasted: a bare code,
/// `code#state`, or the redirect URL carrying `code` and `state` query parameters.
pub fn parse_pasted_code(input: &str, expected_state: &str) -> Result<Option<String>, AuthorityError> {
    if input.is_empty() {
        return Ok(None);
    }

    let as_url = if input.starts_with("http://") || input.starts_with("https://") {
        Url::parse(input).ok()
    } else {
        None
    };

    let (code, state) = if let Some(url) = as_url {
        let mut code = None;
        let mut state = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => return Err(AuthorityError::denied(value.into_owned())),
                _ => {}
            }
        }
        match code {
            Some(code) => (code, state),
            None => return Err(AuthorityError::denied("redirect URL carried no code")),
        }
    } else if let Some((code, state)) = input.split_once('#') {
        (code.to_string(), Some(state.to_string()))
    } else {
        (input.to_string(), None)
    };

    // Verify state (CSRF protection) whenever the user gave us one
    if let Some(state) = state {
        if state != expected_state {
            return Err(AuthorityError::denied("state mismatch"));
        }
    }

    Ok(Some(code))
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> AuthorityError {
    if let Ok(err) = serde_json::from_str::<OAuthErrorResponse>(body) {
        let message = match err.error_description {
            Some(desc) => format!("{}: {}", err.error, desc),
            None => err.error.clone(),
        };
        if DENIED_ERRORS.contains(&err.error.as_str()) {
            return AuthorityError::Denied(message);
        }
        return AuthorityError::Transient(anyhow!("Token endpoint returned {}: {}", status, message));
    }

    AuthorityError::Transient(anyhow!("Token endpoint returned {}: {}", status, body))
}

#[async_trait]
impl IdentityAuthority for LiveAuthority {
    async fn acquire_interactive(
        &self,
        client_id: &str,
        resource: &str,
        redirect_uri: &Url,
        hint: &str,
    ) -> Result<Option<IdentityTokenPair>, AuthorityError> {
        let request = self.build_auth_url(client_id, resource, redirect_uri, hint);

        eprintln!("\n🔐 Microsoft Account sign-in");
        eprintln!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        eprintln!("\n   {}\n", request.url);

        if self.open_browser {
            // Failing to launch a browser is fine; the URL is printed above
            let _ = opener::open(&request.url);
        }

        eprintln!("Steps:");
        eprintln!("  1. Sign in with your Microsoft account");
        eprintln!("  2. Copy the code from the final page (or its address)");
        eprintln!("  3. Paste it below; leave empty to cancel\n");

        let code = match self.prompt_for_code(&request).await? {
            Some(code) => code,
            None => {
                tracing::debug!("Interactive sign-in cancelled");
                return Ok(None);
            }
        };

        let pair = self
            .redeem_code(client_id, resource, redirect_uri, &code, &request.code_verifier)
            .await?;

        eprintln!("✅ Signed in");
        Ok(Some(pair))
    }

    async fn acquire_by_refresh_token(
        &self,
        client_id: &str,
        resource: &str,
        refresh_token: &str,
    ) -> Result<Option<IdentityTokenPair>, AuthorityError> {
        self.refresh(client_id, resource, refresh_token).await.map(Some)
    }
}
