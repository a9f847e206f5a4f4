use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;
use webhook_events::{EventStore, InMemoryEventStore};

use crate::auth::{CredentialVault, HmacAuthenticator, NonceLedger};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::domain::PartnerRepository;
use crate::error::WebhookError;
use crate::infrastructure::InMemoryPartnerRepository;
use crate::outbound::webhook::{
    DeliveryWorker, EventEmitter, RetryScheduler, RetryStrategy, WebhookHttpClient,
};

/// Every component of the delivery engine, wired against one clock and one
/// pair of stores.
#[derive(Clone)]
pub struct Engine {
    pub clock: Arc<dyn Clock>,
    pub partners: Arc<dyn PartnerRepository>,
    pub events: Arc<dyn EventStore>,
    pub vault: Arc<CredentialVault>,
    pub nonces: Arc<NonceLedger>,
    pub authenticator: Arc<HmacAuthenticator>,
    pub worker: Arc<DeliveryWorker>,
    pub scheduler: Arc<RetryScheduler>,
    pub emitter: Arc<EventEmitter>,
}

impl Engine {
    /// In-memory stores and the system clock.
    pub fn new(config: &Config) -> Result<Self, WebhookError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self, WebhookError> {
        Self::with_stores(
            config,
            clock,
            Arc::new(InMemoryPartnerRepository::new()),
            Arc::new(InMemoryEventStore::new()),
        )
    }

    pub fn with_stores(
        config: &Config,
        clock: Arc<dyn Clock>,
        partners: Arc<dyn PartnerRepository>,
        events: Arc<dyn EventStore>,
    ) -> Result<Self, WebhookError> {
        let security = &config.security;
        let delivery = &config.delivery;

        let vault = Arc::new(CredentialVault::new(
            partners.clone(),
            security.environment,
            &security.secret_pepper,
            clock.clone(),
        ));
        let nonces = Arc::new(NonceLedger::new(
            security.nonce_ttl(),
            security.nonce_capacity,
            clock.clone(),
        ));
        let authenticator = Arc::new(HmacAuthenticator::new(
            partners.clone(),
            nonces.clone(),
            clock.clone(),
            security.timestamp_tolerance(),
        ));

        let http_client = WebhookHttpClient::new(delivery.timeout(), &delivery.user_agent)
            .map_err(|e| WebhookError::InvalidRequest(format!("HTTP client setup: {e}")))?;
        let worker = Arc::new(DeliveryWorker::new(
            events.clone(),
            partners.clone(),
            authenticator.clone(),
            Arc::new(http_client),
            RetryStrategy::from_secs(&delivery.backoff_secs),
            clock.clone(),
        ));
        let scheduler = Arc::new(RetryScheduler::new(
            events.clone(),
            worker.clone(),
            clock.clone(),
            delivery.retry_batch_size,
        ));
        let emitter = Arc::new(EventEmitter::new(
            events.clone(),
            partners.clone(),
            worker.clone(),
            clock.clone(),
        ));

        Ok(Self {
            clock,
            partners,
            events,
            vault,
            nonces,
            authenticator,
            worker,
            scheduler,
            emitter,
        })
    }

    /// Spawn the retry sweep and the nonce purge.
    pub fn start_background(&self, config: &Config) -> BackgroundTasks {
        info!("Starting background tasks");
        BackgroundTasks {
            handles: vec![
                self.scheduler
                    .clone()
                    .start(config.delivery.retry_interval()),
                self.nonces
                    .clone()
                    .start_sweeper(config.security.nonce_sweep_interval()),
            ],
        }
    }
}

/// Periodic tasks owned by a running engine. Dropping this aborts them.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}
