//! # Event Store
use crate::error::StoreError;
use crate::event::{Event, EventStatus, EventType};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

/// Page size used when a query does not set one.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

// ============================================================================
// EventQuery
// ============================================================================

/// Filter criteria for listing events.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub partner_id: Option<Uuid>,
    pub status: Option<EventStatus>,
    pub event_type: Option<EventType>,
    /// Only events created at or after this instant.
    pub from: Option<OffsetDateTime>,
    /// Maximum number of events to return, [`DEFAULT_QUERY_LIMIT`] if unset.
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn for_partner(partner_id: Option<Uuid>) -> Self {
        Self {
            partner_id,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_QUERY_LIMIT)
    }

    /// Returns `true` if `event` matches all set filter criteria.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(partner_id) = self.partner_id
            && event.partner_id != partner_id
        {
            return false;
        }
        if let Some(status) = self.status
            && event.status != status
        {
            return false;
        }
        if let Some(event_type) = self.event_type
            && event.event_type != event_type
        {
            return false;
        }
        if let Some(from) = self.from
            && event.created_at < from
        {
            return false;
        }
        true
    }
}

// ============================================================================
// EventStats
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dead_letter: usize,
    /// Mean creation-to-delivery time over delivered events, rounded.
    pub avg_delivery_time_ms: u64,
}

impl EventStats {
    /// Fold a set of events into counters.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut stats = Self::default();
        let mut delivery_total_ms: i128 = 0;
        let mut delivery_samples: i128 = 0;

        for event in events {
            stats.total += 1;
            match event.status {
                EventStatus::Pending => stats.pending += 1,
                EventStatus::Processing => stats.processing += 1,
                EventStatus::Delivered => stats.delivered += 1,
                EventStatus::Failed => stats.failed += 1,
                EventStatus::DeadLetter => stats.dead_letter += 1,
            }
            if event.status == EventStatus::Delivered
                && let Some(ms) = event.delivery_time_ms()
            {
                delivery_total_ms += i128::from(ms);
                delivery_samples += 1;
            }
        }

        if delivery_samples > 0 {
            let avg = (delivery_total_ms + delivery_samples / 2) / delivery_samples;
            stats.avg_delivery_time_ms = avg.max(0) as u64;
        }
        stats
    }
}

// ============================================================================
// InsertOutcome
// ============================================================================

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The event was stored.
    Created(Event),
    /// An event with the same idempotency key already existed; it is
    /// returned unchanged and nothing was written.
    Existing(Event),
}

impl InsertOutcome {
    pub fn event(&self) -> &Event {
        match self {
            Self::Created(event) | Self::Existing(event) => event,
        }
    }

    pub fn into_event(self) -> Event {
        match self {
            Self::Created(event) | Self::Existing(event) => event,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

// ============================================================================
// EventStore trait
// ============================================================================

/// Durable record of emitted events and their delivery state.
///
/// Implementations must make [`EventStore::insert`] and
/// [`EventStore::claim`] atomic: the first enforces idempotency-key
/// uniqueness, the second is a compare-and-set on `status`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store a new event unless its idempotency key is already taken.
    async fn insert(&self, event: Event) -> Result<InsertOutcome, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Event>, StoreError>;

    /// Flip `PENDING|FAILED` to `PROCESSING` and return the claimed event.
    /// `None` if the event is already being processed or is terminal.
    async fn claim(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    /// Persist the outcome of a claimed attempt.
    async fn complete(&self, event: &Event) -> Result<(), StoreError>;

    /// Operator rewind to `PENDING` with `retry_count = 0`.
    async fn reset_for_retry(&self, id: Uuid) -> Result<Event, StoreError>;

    /// Matching events, newest first.
    async fn find_all(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError>;

    /// `FAILED` events whose `next_retry_at` is at or before `now`, oldest
    /// due first.
    async fn due_for_retry(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError>;

    async fn stats(&self, partner_id: Option<Uuid>) -> Result<EventStats, StoreError>;
}

// ============================================================================
// InMemoryEventStore
// ============================================================================

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<Uuid, Event>,
    by_idempotency_key: HashMap<String, Uuid>,
}

/// Process-local [`EventStore`]. A single mutex guards both the rows and the
/// idempotency index, which gives the atomicity the trait requires.
#[derive(Debug, Default, Clone)]
pub struct InMemoryEventStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Backend(format!("InMemoryEventStore lock poisoned: {e}")))
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert(&self, event: Event) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.lock()?;

        if let Some(existing_id) = inner.by_idempotency_key.get(&event.idempotency_key)
            && let Some(existing) = inner.events.get(existing_id)
        {
            debug!(
                idempotency_key = %event.idempotency_key,
                event_id = %existing.id,
                "Duplicate emit detected"
            );
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        if inner.events.contains_key(&event.id) {
            return Err(StoreError::Conflict(format!(
                "event {} already exists",
                event.id
            )));
        }

        inner
            .by_idempotency_key
            .insert(event.idempotency_key.clone(), event.id);
        inner.events.insert(event.id, event.clone());
        Ok(InsertOutcome::Created(event))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.lock()?.events.get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Event>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .by_idempotency_key
            .get(key)
            .and_then(|id| inner.events.get(id))
            .cloned())
    }

    async fn claim(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let mut inner = self.lock()?;
        let event = inner
            .events
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))?;

        if !event.status.is_claimable() {
            return Ok(None);
        }
        event.status = EventStatus::Processing;
        Ok(Some(event.clone()))
    }

    async fn complete(&self, event: &Event) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let stored = inner
            .events
            .get_mut(&event.id)
            .ok_or_else(|| StoreError::NotFound(format!("event {}", event.id)))?;

        if stored.status != EventStatus::Processing
            || !EventStatus::Processing.can_transition_to(event.status)
        {
            return Err(StoreError::InvalidState(format!(
                "event {} cannot move from {} to {}",
                event.id, stored.status, event.status
            )));
        }
        *stored = event.clone();
        Ok(())
    }

    async fn reset_for_retry(&self, id: Uuid) -> Result<Event, StoreError> {
        let mut inner = self.lock()?;
        let event = inner
            .events
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("event {id}")))?;

        match event.status {
            EventStatus::Delivered => Err(StoreError::InvalidState(format!(
                "event {id} was already delivered"
            ))),
            EventStatus::Processing => Err(StoreError::InvalidState(format!(
                "event {id} has a delivery attempt in progress"
            ))),
            _ => {
                event.reset_for_retry();
                Ok(event.clone())
            }
        }
    }

    async fn find_all(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let inner = self.lock()?;
        let mut results: Vec<Event> = inner
            .events
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(query.effective_limit());
        Ok(results)
    }

    async fn due_for_retry(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<Event>, StoreError> {
        let inner = self.lock()?;
        let mut due: Vec<Event> = inner
            .events
            .values()
            .filter(|e| {
                e.status == EventStatus::Failed && e.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();

        due.sort_by_key(|e| e.next_retry_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn stats(&self, partner_id: Option<Uuid>) -> Result<EventStats, StoreError> {
        let inner = self.lock()?;
        let filter = EventQuery::for_partner(partner_id);
        Ok(EventStats::from_events(
            inner.events.values().filter(|e| filter.matches(e)),
        ))
    }
}

// ============================================================================
// Tests
// ============================================================================
