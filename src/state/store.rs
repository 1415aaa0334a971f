//! State store trait definition.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::AppliedState;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the applied state.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<AppliedState>>;

    /// Saves the applied state.
    async fn save(&self, state: &AppliedState) -> Result<()>;

    /// Acquires the working-directory lock without waiting.
    ///
    /// Fails with `LockContention` if another unexpired lock is held.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases a lock this process holds.
    ///
    /// A lock taken over by another process is left in place.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;
}
