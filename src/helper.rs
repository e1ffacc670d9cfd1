//! git credential-helper protocol
//!
//! git writes `key=value` lines terminated by a blank line (or EOF) to the helper's
//! stdin and reads the same format back from stdout for `get`.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use tracing::debug;

use crate::auth::{CredentialBroker, IdentityAuthority, ResourceAuthority, TokenStore};
use crate::types::Credential;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperCommand {
    Get,
    Store,
    Erase,
}

impl HelperCommand {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "get" => Some(HelperCommand::Get),
            "store" => Some(HelperCommand::Store),
            "erase" => Some(HelperCommand::Erase),
            _ => None,
        }
    }
}

/// Behaviour switches for `get`
#[derive(Debug, Clone, Copy)]
pub struct HelperOptions {
    pub compact: bool,
    pub interactive: bool,
}

/// Attributes git sent for one request
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HelperRequest {
    attributes: HashMap<String, String>,
}

impl HelperRequest {
    pub fn parse<R: BufRead>(reader: R) -> Result<Self> {
        let mut attributes = HashMap::new();

        for line in reader.lines() {
            let line = line.context("Failed to read credential request")?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                break;
            }
            // Lines without '=' are ignored, as git does
            if let Some((key, value)) = line.split_once('=') {
                attributes.insert(key.to_string(), value.to_string());
            }
        }

        Ok(Self { attributes })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Target URL: `url` if git sent one, else `protocol://host[/path]`.
    /// Missing pieces produce an unparseable target, which the broker rejects.
    pub fn target_url(&self) -> String {
        if let Some(url) = self.get("url") {
            return url.to_string();
        }

        let protocol = self.get("protocol").unwrap_or_default();
        let host = self.get("host").unwrap_or_default();
        match self.get("path").map(|p| p.trim_start_matches('/')) {
            Some(path) if !path.is_empty() => format!("{}://{}/{}", protocol, host, path),
            _ => format!("{}://{}", protocol, host),
        }
    }

    pub fn credential(&self) -> Option<Credential> {
        match (self.get("username"), self.get("password")) {
            (Some(username), Some(password)) => Some(Credential::new(username, password)),
            _ => None,
        }
    }
}

/// Render a credential the way git reads it back
pub fn render(credential: &Credential) -> String {
    format!(
        "username={}\npassword={}\n",
        credential.username, credential.password
    )
}

/// Execute one helper command against the broker, writing any reply to `out`
pub async fn run<S, I, R, W>(
    broker: &CredentialBroker<S, I, R>,
    command: HelperCommand,
    request: &HelperRequest,
    options: HelperOptions,
    out: &mut W,
) -> Result<()>
where
    S: TokenStore,
    I: IdentityAuthority,
    R: ResourceAuthority,
    W: Write,
{
    let target = request.target_url();
    debug!(?command, "credential helper request for {}", target);

    match command {
        HelperCommand::Get => {
            if let Some(credential) = broker
                .acquire(&target, options.compact, options.interactive)
                .await?
            {
                out.write_all(render(&credential).as_bytes())?;
                out.flush()?;
            }
        }
        HelperCommand::Store => {
            let credential = request.credential().unwrap_or_else(|| Credential::new("", ""));
            broker.set_credentials(&target, &credential);
        }
        // git erases a credential it just saw rejected; the refresh token can still mint a new one
        HelperCommand::Erase => {
            broker.delete_pat(&target)?;
        }
    }

    Ok(())
}
