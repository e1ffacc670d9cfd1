/// Token store capability: durable, per-target secret storage
use anyhow::Result;

use crate::types::{TargetResource, Token};

/// Keyed secret storage. Implementations must give atomic read/write per key;
/// callers may hit distinct keys concurrently.
#[cfg_attr(test, mockall::automock)]
pub trait TokenStore: Send + Sync {
    /// Read the token stored for `target`, `None` if absent
    fn read(&self, target: &TargetResource) -> Result<Option<Token>>;

    /// Store `token` for `target`, replacing any previous value
    fn write(&self, target: &TargetResource, token: &Token) -> Result<()>;

    /// Remove the token for `target`. Returns whether something was removed.
    fn delete(&self, target: &TargetResource) -> Result<bool>;
}
