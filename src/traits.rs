//! Seams between the crawl pipeline and its collaborators: the network, storage and alerting

use async_trait::async_trait;

use crate::error::{PersistenceError, TransportError};
use crate::fetcher::Identity;
use crate::models::{
    ChangeRecord, GameEntity, GameIdentity, GameRecord, NewChangeRecord, Provider,
    SignificantChange,
};

/// Status and body of a completed HTTP exchange, whatever the status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// A single GET request, sent with the headers of the given identity.
///
/// Implementations must not retry or sleep; that policy belongs to the
/// [`Fetcher`](crate::fetcher::Fetcher).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, identity: &Identity) -> Result<RawResponse, TransportError>;
}

/// Repository over providers, games and the change history
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn find_provider_by_name(&self, name: &str) -> Result<Option<Provider>, PersistenceError>;

    /// Create a provider, or return the existing one if another writer got there first
    async fn create_provider(&self, name: &str) -> Result<Provider, PersistenceError>;

    async fn find_game_by_identity(
        &self,
        identity: &GameIdentity,
    ) -> Result<Option<GameEntity>, PersistenceError>;

    /// Insert the game, or overwrite the scraped fields of the existing one.
    ///
    /// # Returns
    /// * `Result<GameEntity, PersistenceError>` - The stored row after the write. A unique
    ///   constraint race surfaces as [`PersistenceError::Conflict`].
    async fn upsert_game(
        &self,
        identity: &GameIdentity,
        record: &GameRecord,
    ) -> Result<GameEntity, PersistenceError>;

    async fn insert_change_record(
        &self,
        change: &NewChangeRecord,
    ) -> Result<ChangeRecord, PersistenceError>;
}

/// Consumer of the significant changes found in one crawl run
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver the changes, in detection order. Failures are reported, never retried by the caller.
    async fn notify(&self, changes: &[SignificantChange]) -> anyhow::Result<()>;
}
