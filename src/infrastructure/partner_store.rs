use crate::domain::{Partner, PartnerRepository, PartnerStatus, PartnerUpdate, StoredCredentials};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;
use webhook_events::StoreError;

#[derive(Debug, Default)]
struct Registry {
    partners: HashMap<Uuid, Partner>,
    by_api_key: HashMap<String, Uuid>,
}

impl Registry {
    fn get_mut(&mut self, id: Uuid) -> Result<&mut Partner, StoreError> {
        self.partners
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("partner {id}")))
    }
}

/// Process-local [`PartnerRepository`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryPartnerRepository {
    inner: Arc<RwLock<Registry>>,
}

impl InMemoryPartnerRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PartnerRepository for InMemoryPartnerRepository {
    async fn insert(&self, partner: Partner) -> Result<(), StoreError> {
        let mut registry = self.inner.write().await;

        if registry.partners.values().any(|p| p.name == partner.name) {
            return Err(StoreError::Conflict(format!(
                "a partner named \"{}\" already exists",
                partner.name
            )));
        }
        if registry.by_api_key.contains_key(&partner.api_key) {
            return Err(StoreError::Conflict("API key already issued".to_string()));
        }

        registry
            .by_api_key
            .insert(partner.api_key.clone(), partner.id);
        registry.partners.insert(partner.id, partner);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Partner>, StoreError> {
        Ok(self.inner.read().await.partners.get(&id).cloned())
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Partner>, StoreError> {
        let registry = self.inner.read().await;
        Ok(registry
            .by_api_key
            .get(api_key)
            .and_then(|id| registry.partners.get(id))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Partner>, StoreError> {
        let mut partners: Vec<Partner> = self.inner.read().await.partners.values().cloned().collect();
        partners.sort_by_key(|p| p.created_at);
        Ok(partners)
    }

    async fn replace_credentials(
        &self,
        id: Uuid,
        credentials: StoredCredentials,
    ) -> Result<Partner, StoreError> {
        let mut registry = self.inner.write().await;

        if registry
            .by_api_key
            .get(&credentials.api_key)
            .is_some_and(|owner| *owner != id)
        {
            return Err(StoreError::Conflict("API key already issued".to_string()));
        }

        let partner = registry.get_mut(id)?;
        let old_key = std::mem::replace(&mut partner.api_key, credentials.api_key.clone());
        partner.api_secret_hash = credentials.api_secret_hash;
        partner.webhook_secret_hash = credentials.webhook_secret_hash;
        let updated = partner.clone();

        registry.by_api_key.remove(&old_key);
        registry.by_api_key.insert(credentials.api_key, id);
        Ok(updated)
    }

    async fn update(&self, id: Uuid, changes: PartnerUpdate) -> Result<Partner, StoreError> {
        let mut registry = self.inner.write().await;

        if let Some(name) = changes.name.as_deref()
            && registry
                .partners
                .values()
                .any(|p| p.id != id && p.name == name)
        {
            return Err(StoreError::Conflict(format!(
                "a partner named \"{name}\" already exists"
            )));
        }

        let partner = registry.get_mut(id)?;
        changes.apply_to(partner);
        Ok(partner.clone())
    }

    async fn update_status(&self, id: Uuid, status: PartnerStatus) -> Result<Partner, StoreError> {
        let mut registry = self.inner.write().await;
        let partner = registry.get_mut(id)?;
        partner.status = status;
        Ok(partner.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<Partner, StoreError> {
        let mut registry = self.inner.write().await;
        let partner = registry
            .partners
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound(format!("partner {id}")))?;
        registry.by_api_key.remove(&partner.api_key);
        Ok(partner)
    }

    async fn record_activity(&self, id: Uuid, at: OffsetDateTime) -> Result<(), StoreError> {
        let mut registry = self.inner.write().await;
        let partner = registry.get_mut(id)?;
        partner.total_requests += 1;
        partner.last_activity = Some(at);
        Ok(())
    }

    async fn increment_webhook_stats(&self, id: Uuid, success: bool) -> Result<(), StoreError> {
        let mut registry = self.inner.write().await;
        let partner = registry.get_mut(id)?;
        if success {
            partner.successful_webhooks += 1;
        } else {
            partner.failed_webhooks += 1;
        }
        Ok(())
    }
}
