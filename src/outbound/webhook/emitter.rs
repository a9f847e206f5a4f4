use crate::clock::Clock;
use crate::domain::PartnerRepository;
use crate::error::WebhookError;
use crate::outbound::webhook::delivery_worker::DeliveryWorker;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use webhook_events::{
    DEFAULT_QUERY_LIMIT, Event, EventQuery, EventStats, EventStatus, EventStore, EventType,
    InsertOutcome,
};

/// Arguments to [`EventEmitter::emit`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitRequest {
    pub partner_id: Uuid,
    pub event_type: EventType,
    #[serde(default)]
    pub payload: Value,
    pub idempotency_key: Option<String>,
}

impl EmitRequest {
    pub fn new(partner_id: Uuid, event_type: EventType, payload: Value) -> Self {
        Self {
            partner_id,
            event_type,
            payload,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Entry point for everything that produces partner events.
///
/// `emit` returns once the event is stored; the first delivery attempt runs
/// on a spawned task and its outcome only shows up on the event itself.
pub struct EventEmitter {
    events: Arc<dyn EventStore>,
    partners: Arc<dyn PartnerRepository>,
    worker: Arc<DeliveryWorker>,
    clock: Arc<dyn Clock>,
}

impl EventEmitter {
    pub fn new(
        events: Arc<dyn EventStore>,
        partners: Arc<dyn PartnerRepository>,
        worker: Arc<DeliveryWorker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            partners,
            worker,
            clock,
        }
    }

    pub async fn emit(&self, request: EmitRequest) -> Result<Event, WebhookError> {
        if let Some(key) = request.idempotency_key.as_deref()
            && let Some(existing) = self.events.find_by_idempotency_key(key).await?
        {
            debug!(idempotency_key = %key, event_id = %existing.id, "Duplicate emit detected");
            return Ok(existing);
        }

        let partner = self
            .partners
            .get(request.partner_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(format!("partner {}", request.partner_id)))?;

        let event = Event::new(
            partner.id,
            request.event_type,
            request.payload,
            request.idempotency_key,
            partner.max_retries(),
            self.clock.now(),
        );

        // The store arbitrates concurrent emits that slipped past the check above.
        match self.events.insert(event).await? {
            InsertOutcome::Existing(existing) => Ok(existing),
            InsertOutcome::Created(created) => {
                info!(
                    event_id = %created.id,
                    partner_id = %partner.id,
                    event_type = %created.event_type,
                    "Event created"
                );
                self.spawn_delivery(created.id);
                Ok(created)
            }
        }
    }

    /// Emit one event to every active partner subscribed to `event_type`.
    /// A failure for one partner does not stop the others.
    pub async fn emit_to_subscribers(
        &self,
        event_type: EventType,
        payload: Value,
    ) -> Result<Vec<Event>, WebhookError> {
        let subscribers: Vec<_> = self
            .partners
            .list()
            .await?
            .into_iter()
            .filter(|p| p.is_active() && p.allows_event(event_type))
            .collect();

        let mut emitted = Vec::with_capacity(subscribers.len());
        for partner in subscribers {
            match self
                .emit(EmitRequest::new(partner.id, event_type, payload.clone()))
                .await
            {
                Ok(event) => emitted.push(event),
                Err(e) => warn!(
                    partner_id = %partner.id,
                    event_type = %event_type,
                    error = %e,
                    "Broadcast emit failed for partner"
                ),
            }
        }
        info!(event_type = %event_type, count = emitted.len(), "Event broadcast to subscribers");
        Ok(emitted)
    }

    pub async fn get_event(&self, event_id: Uuid) -> Result<Event, WebhookError> {
        self.events
            .get(event_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(format!("event {event_id}")))
    }

    pub async fn find_all(&self, query: &EventQuery) -> Result<Vec<Event>, WebhookError> {
        Ok(self.events.find_all(query).await?)
    }

    pub async fn get_stats(&self, partner_id: Option<Uuid>) -> Result<EventStats, WebhookError> {
        Ok(self.events.stats(partner_id).await?)
    }

    pub async fn get_dead_letter_queue(
        &self,
        partner_id: Option<Uuid>,
    ) -> Result<Vec<Event>, WebhookError> {
        let query = EventQuery {
            limit: Some(DEFAULT_QUERY_LIMIT),
            ..EventQuery::for_partner(partner_id).with_status(EventStatus::DeadLetter)
        };
        self.find_all(&query).await
    }

    /// Operator retry: rewind to `PENDING` with a fresh budget, attempt once
    /// and return the event as it stands afterwards.
    pub async fn retry_event(&self, event_id: Uuid) -> Result<Event, WebhookError> {
        let reset = self.events.reset_for_retry(event_id).await?;
        info!(event_id = %reset.id, partner_id = %reset.partner_id, "Manual retry requested");

        self.worker.deliver(event_id).await?;
        self.get_event(event_id).await
    }

    /// Attempt delivery now and report whether this call delivered it.
    pub async fn deliver_event(&self, event_id: Uuid) -> Result<bool, WebhookError> {
        self.worker.deliver(event_id).await
    }

    fn spawn_delivery(&self, event_id: Uuid) {
        let worker = self.worker.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.deliver(event_id).await {
                error!(event_id = %event_id, error = %e, "Immediate delivery errored");
            }
        });
    }
}
