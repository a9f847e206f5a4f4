/*
   Persistence ports the partner-facing side of the engine depends on.
   Events have their own port, `webhook_events::EventStore`.
*/

use crate::domain::partner::{Partner, PartnerStatus, PartnerUpdate, StoredCredentials};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;
use webhook_events::StoreError;

/// Registry of partners and their hashed credentials.
#[async_trait]
pub trait PartnerRepository: Send + Sync {
    /// Fails with `Conflict` if the name or API key is already taken.
    async fn insert(&self, partner: Partner) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Partner>, StoreError>;

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Partner>, StoreError>;

    /// All partners, oldest registration first.
    async fn list(&self) -> Result<Vec<Partner>, StoreError>;

    /// Swap all three credential fields in one write. The old API key stops
    /// resolving as soon as this returns.
    async fn replace_credentials(
        &self,
        id: Uuid,
        credentials: StoredCredentials,
    ) -> Result<Partner, StoreError>;

    /// Apply profile changes in one write. A new name must still be unique.
    async fn update(&self, id: Uuid, changes: PartnerUpdate) -> Result<Partner, StoreError>;

    async fn update_status(&self, id: Uuid, status: PartnerStatus) -> Result<Partner, StoreError>;

    /// Remove the partner and retire its API key.
    async fn delete(&self, id: Uuid) -> Result<Partner, StoreError>;

    /// Bump `totalRequests` and set `lastActivity`.
    async fn record_activity(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError>;

    async fn increment_webhook_stats(&self, id: Uuid, success: bool) -> Result<(), StoreError>;
}
