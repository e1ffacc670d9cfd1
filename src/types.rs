use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::error::BrokerError;

/// Username git receives alongside a PAT; the VSO service ignores it.
pub const PAT_USERNAME: &str = "PersonalAccessToken";

/// A validated resource URL that credentials are obtained for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetResource(Url);

impl TargetResource {
    /// Parse and validate a target. Only absolute http(s) URLs with a host are accepted.
    pub fn parse(input: &str) -> Result<Self, BrokerError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(BrokerError::InvalidTarget {
                target: input.to_string(),
                reason: "target is empty".to_string(),
            });
        }

        let url = Url::parse(trimmed).map_err(|e| BrokerError::InvalidTarget {
            target: input.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(BrokerError::InvalidTarget {
                target: input.to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(Self(url)),
            _ => Err(BrokerError::InvalidTarget {
                target: input.to_string(),
                reason: "target has no host".to_string(),
            }),
        }
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// Key used for every store entry belonging to this target
    pub fn key(&self) -> String {
        self.0.as_str().trim_end_matches('/').to_string()
    }
}

impl fmt::Display for TargetResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Access + refresh token pair handed out by an identity authority
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityTokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for IdentityTokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityTokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Refresh,
    Personal,
    Compact,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Refresh => "refresh",
            TokenKind::Personal => "personal",
            TokenKind::Compact => "compact",
        }
    }
}

/// The unit persisted in a token store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    /// Unix timestamp of when the token was stored
    #[serde(default)]
    pub created_at: i64,
}

impl Token {
    pub fn new(kind: TokenKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn refresh(value: impl Into<String>) -> Self {
        Self::new(TokenKind::Refresh, value)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Resource-scoped token issued by a resource authority
#[derive(Clone, PartialEq, Eq)]
pub struct PersonalAccessToken {
    pub value: String,
    pub compact: bool,
}

impl PersonalAccessToken {
    pub fn new(value: impl Into<String>, compact: bool) -> Self {
        Self {
            value: value.into(),
            compact,
        }
    }
}

impl fmt::Debug for PersonalAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonalAccessToken")
            .field("value", &"<redacted>")
            .field("compact", &self.compact)
            .finish()
    }
}

impl From<PersonalAccessToken> for Token {
    fn from(pat: PersonalAccessToken) -> Self {
        let kind = if pat.compact {
            TokenKind::Compact
        } else {
            TokenKind::Personal
        };
        Token::new(kind, pat.value)
    }
}

/// Username/password pair handed back to git
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl From<&Token> for Credential {
    fn from(token: &Token) -> Self {
        Credential::new(PAT_USERNAME, token.value.clone())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
