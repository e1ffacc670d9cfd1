/// System keyring integration for PATs and refresh tokens
/// Uses native keyring: Secret Service (Linux), Keychain (macOS), Credential Manager (Windows)
use anyhow::{Context, Result};
use keyring::Entry;

use super::store::TokenStore;
use crate::types::{TargetResource, Token};

/// Keyring-backed token store. `namespace` separates key spaces (PATs vs refresh tokens)
/// inside one keyring service.
pub struct KeyringStore {
    service: String,
    namespace: String,
}

impl KeyringStore {
    pub fn new(service: &str, namespace: &str) -> Self {
        Self {
            service: service.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Keyring account name for a target
    pub fn account(&self, target: &TargetResource) -> String {
        format!("{}:{}", self.namespace, target.key())
    }

    fn entry(&self, target: &TargetResource) -> Result<Entry> {
        Entry::new(&self.service, &self.account(target))
            .with_context(|| format!("Failed to open keyring entry for {}", target))
    }
}

impl TokenStore for KeyringStore {
    fn read(&self, target: &TargetResource) -> Result<Option<Token>> {
        let entry = self.entry(target)?;
        match entry.get_password() {
            Ok(json) => {
                let token: Token = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt keyring entry for {}", target))?;
                Ok(Some(token))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, target: &TargetResource, token: &Token) -> Result<()> {
        let entry = self.entry(target)?;
        let json = serde_json::to_string(token)?;
        entry.set_password(&json)?;
        Ok(())
    }

    fn delete(&self, target: &TargetResource) -> Result<bool> {
        let entry = self.entry(target)?;
        match entry.delete_password() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false), // Already deleted
            Err(e) => Err(e.into()),
        }
    }
}
