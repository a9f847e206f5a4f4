//! # Event model
//!
//! An [`Event`] is the durable record of one business occurrence addressed to
//! one partner, together with everything known about its delivery.
use crate::error::ParseTagError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Version stamped into every payload envelope.
pub const SCHEMA_VERSION: &str = "1.0";

/// Retries granted when the partner has no retry policy of its own.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Key under which the delivery envelope is merged into the payload.
pub const META_KEY: &str = "_meta";

// ============================================================================
// EventStatus
// ============================================================================

/// Delivery state of an event.
///
/// ```text
/// PENDING ──► PROCESSING ──► DELIVERED
///                 │  ▲
///                 ▼  │
///               FAILED ─────► DEAD_LETTER
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
    DeadLetter,
}

impl EventStatus {
    pub const ALL: [EventStatus; 5] = [
        Self::Pending,
        Self::Processing,
        Self::Delivered,
        Self::Failed,
        Self::DeadLetter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// `DELIVERED` and `DEAD_LETTER` accept no further status writes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLetter)
    }

    /// States from which a delivery attempt may take ownership of the event.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// Forward transitions of the delivery state machine. The operator
    /// rewind to `PENDING` is deliberately not part of this relation.
    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Delivered)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::DeadLetter)
                | (Self::Failed, Self::Processing)
                | (Self::Failed, Self::DeadLetter)
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseTagError {
                kind: "event status",
                value: s.to_string(),
            })
    }
}

// ============================================================================
// EventType
// ============================================================================

/// Business occurrences a partner can be notified about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    // ── Parking ───────────────────────────────────────────────────────────
    #[serde(rename = "parking.reserved")]
    ParkingReserved,
    #[serde(rename = "parking.entered")]
    ParkingEntered,
    #[serde(rename = "parking.exited")]
    ParkingExited,
    #[serde(rename = "space.updated")]
    SpaceUpdated,

    // ── Payments ──────────────────────────────────────────────────────────
    #[serde(rename = "payment.success")]
    PaymentSuccess,
    #[serde(rename = "payment.failed")]
    PaymentFailed,
    #[serde(rename = "payment.refunded")]
    PaymentRefunded,

    // ── Partner lifecycle ─────────────────────────────────────────────────
    #[serde(rename = "partner.registered")]
    PartnerRegistered,
    #[serde(rename = "partner.updated")]
    PartnerUpdated,

    #[serde(rename = "custom")]
    Custom,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        Self::ParkingReserved,
        Self::ParkingEntered,
        Self::ParkingExited,
        Self::SpaceUpdated,
        Self::PaymentSuccess,
        Self::PaymentFailed,
        Self::PaymentRefunded,
        Self::PartnerRegistered,
        Self::PartnerUpdated,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParkingReserved => "parking.reserved",
            Self::ParkingEntered => "parking.entered",
            Self::ParkingExited => "parking.exited",
            Self::SpaceUpdated => "space.updated",
            Self::PaymentSuccess => "payment.success",
            Self::PaymentFailed => "payment.failed",
            Self::PaymentRefunded => "payment.refunded",
            Self::PartnerRegistered => "partner.registered",
            Self::PartnerUpdated => "partner.updated",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| ParseTagError {
                kind: "event type",
                value: s.to_string(),
            })
    }
}

// ============================================================================
// Delivery diagnostics
// ============================================================================

/// Snapshot of the partner endpoint's answer to the last attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResponse {
    pub status_code: u16,
    pub body: String,
    pub headers: BTreeMap<String, String>,
    pub duration_ms: u64,
}

impl DeliveryResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// One failed attempt, appended to [`Event::error_history`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub message: String,
    /// 1-based number of the attempt that failed.
    pub attempt: u32,
}

// ============================================================================
// Event
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub event_type: EventType,
    pub status: EventStatus,
    pub payload: Value,
    pub idempotency_key: String,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub next_retry_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub delivered_at: Option<OffsetDateTime>,
    pub response: Option<DeliveryResponse>,
    pub error_message: Option<String>,
    pub error_history: Vec<ErrorRecord>,
    pub schema_version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Event {
    /// Build a `PENDING` event and stamp its payload with the `_meta`
    /// envelope. A missing idempotency key is replaced by a fresh one.
    pub fn new(
        partner_id: Uuid,
        event_type: EventType,
        payload: Value,
        idempotency_key: Option<String>,
        max_retries: u32,
        created_at: OffsetDateTime,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            partner_id,
            event_type,
            status: EventStatus::Pending,
            payload: stamp_envelope(payload, id, created_at),
            idempotency_key: idempotency_key.unwrap_or_else(|| Uuid::new_v4().to_string()),
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            delivered_at: None,
            response: None,
            error_message: None,
            error_history: Vec::new(),
            schema_version: SCHEMA_VERSION.to_string(),
            created_at,
        }
    }

    /// 1-based number of the attempt currently being made.
    pub fn current_attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Whether a failed attempt now would exhaust the retry budget.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// `eventId` from the payload envelope.
    pub fn envelope_event_id(&self) -> Option<&str> {
        self.payload
            .get(META_KEY)
            .and_then(|meta| meta.get("eventId"))
            .and_then(Value::as_str)
    }

    pub fn mark_delivered(&mut self, at: OffsetDateTime, response: DeliveryResponse) {
        self.status = EventStatus::Delivered;
        self.delivered_at = Some(at);
        self.next_retry_at = None;
        self.response = Some(response);
    }

    /// Record a failed attempt and move to `FAILED` or `DEAD_LETTER`.
    ///
    /// `retry_delay` maps the new retry count to the wait before the next
    /// attempt. `retry_count` never grows past `max_retries`: the attempt made
    /// with `retry_count == max_retries` dead-letters the event.
    pub fn record_failure(
        &mut self,
        at: OffsetDateTime,
        message: impl Into<String>,
        response: Option<DeliveryResponse>,
        retry_delay: impl FnOnce(u32) -> Duration,
    ) -> EventStatus {
        let message = message.into();
        self.error_history.push(ErrorRecord {
            timestamp: at,
            message: message.clone(),
            attempt: self.current_attempt(),
        });
        self.error_message = Some(message);
        if response.is_some() {
            self.response = response;
        }

        if self.retries_exhausted() {
            self.status = EventStatus::DeadLetter;
            self.next_retry_at = None;
        } else {
            self.retry_count += 1;
            self.status = EventStatus::Failed;
            self.next_retry_at = Some(at + retry_delay(self.retry_count));
        }
        self.status
    }

    /// Operator rewind: back to `PENDING` with a fresh retry budget.
    pub fn reset_for_retry(&mut self) {
        self.status = EventStatus::Pending;
        self.retry_count = 0;
        self.next_retry_at = None;
    }

    /// Milliseconds between creation and successful delivery.
    pub fn delivery_time_ms(&self) -> Option<i64> {
        self.delivered_at
            .map(|delivered| (delivered - self.created_at).whole_milliseconds() as i64)
    }
}

/// Merge `{eventId, timestamp, version}` under `_meta`. Non-object payloads
/// are wrapped as `{"data": payload}` first so the envelope has a home.
pub fn stamp_envelope(payload: Value, event_id: Uuid, at: OffsetDateTime) -> Value {
    let mut object = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("data".to_string(), other);
            map
        }
    };

    let timestamp = at
        .format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string());
    object.insert(
        META_KEY.to_string(),
        json!({
            "eventId": event_id.to_string(),
            "timestamp": timestamp,
            "version": SCHEMA_VERSION,
        }),
    );
    Value::Object(object)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(retry_count: u32) -> Duration {
        let delays = [1, 5, 30, 300, 900];
        let idx = (retry_count.saturating_sub(1) as usize).min(delays.len() - 1);
        Duration::from_secs(delays[idx])
    }

    fn sample_event(max_retries: u32) -> Event {
        Event::new(
            Uuid::new_v4(),
            EventType::ParkingExited,
            json!({"ticketId": "TKT-1", "amount": 12}),
            None,
            max_retries,
            OffsetDateTime::now_utc(),
        )
    }

    #[test]
    fn new_event_is_pending_with_envelope() {
        let event = sample_event(5);

        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.schema_version, SCHEMA_VERSION);
        assert_eq!(event.payload["ticketId"], "TKT-1");
        assert_eq!(event.payload[META_KEY]["version"], SCHEMA_VERSION);
        assert_eq!(event.envelope_event_id(), Some(event.id.to_string().as_str()));
        assert!(!event.idempotency_key.is_empty());
    }

    #[test]
    fn caller_idempotency_key_is_kept() {
        let event = Event::new(
            Uuid::new_v4(),
            EventType::Custom,
            json!({}),
            Some("order-42".to_string()),
            5,
            OffsetDateTime::now_utc(),
        );
        assert_eq!(event.idempotency_key, "order-42");
    }

    #[test]
    fn non_object_payload_is_wrapped() {
        let stamped = stamp_envelope(json!([1, 2, 3]), Uuid::new_v4(), OffsetDateTime::now_utc());
        assert_eq!(stamped["data"], json!([1, 2, 3]));
        assert!(stamped[META_KEY].is_object());

        let stamped = stamp_envelope(Value::Null, Uuid::new_v4(), OffsetDateTime::now_utc());
        assert_eq!(stamped.as_object().map(|m| m.len()), Some(1));
    }

    #[test]
    fn status_machine_forward_edges() {
        use EventStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Delivered));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(DeadLetter));
        assert!(Failed.can_transition_to(Processing));
        assert!(Failed.can_transition_to(DeadLetter));

        // Nothing returns to PENDING and terminals stay put.
        for status in EventStatus::ALL {
            assert!(!status.can_transition_to(Pending));
            assert!(!Delivered.can_transition_to(status));
            assert!(!DeadLetter.can_transition_to(status));
        }
        assert!(!Pending.can_transition_to(Delivered));
    }

    #[test]
    fn failure_schedules_retry_with_backoff() {
        let mut event = sample_event(5);
        let at = OffsetDateTime::now_utc();

        let status = event.record_failure(at, "HTTP 500: boom", None, schedule);

        assert_eq!(status, EventStatus::Failed);
        assert_eq!(event.retry_count, 1);
        assert_eq!(event.next_retry_at, Some(at + Duration::from_secs(1)));
        assert_eq!(event.error_message.as_deref(), Some("HTTP 500: boom"));
        assert_eq!(event.error_history.len(), 1);
        assert_eq!(event.error_history[0].attempt, 1);
    }

    #[test]
    fn retry_count_never_exceeds_max_retries() {
        let mut event = sample_event(2);
        let at = OffsetDateTime::now_utc();

        assert_eq!(event.record_failure(at, "e1", None, schedule), EventStatus::Failed);
        assert_eq!(event.record_failure(at, "e2", None, schedule), EventStatus::Failed);
        assert_eq!(event.retry_count, 2);
        assert_eq!(event.next_retry_at, Some(at + Duration::from_secs(5)));

        assert_eq!(
            event.record_failure(at, "e3", None, schedule),
            EventStatus::DeadLetter
        );
        assert_eq!(event.retry_count, 2);
        assert!(event.next_retry_at.is_none());
        let attempts: Vec<u32> = event.error_history.iter().map(|e| e.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[test]
    fn zero_retry_budget_dead_letters_on_first_failure() {
        let mut event = sample_event(0);
        let status = event.record_failure(OffsetDateTime::now_utc(), "down", None, schedule);
        assert_eq!(status, EventStatus::DeadLetter);
        assert_eq!(event.retry_count, 0);
    }

    #[test]
    fn delivered_event_reports_delivery_time() {
        let mut event = sample_event(5);
        let at = event.created_at + Duration::from_millis(250);
        event.mark_delivered(
            at,
            DeliveryResponse {
                status_code: 204,
                ..Default::default()
            },
        );

        assert_eq!(event.status, EventStatus::Delivered);
        assert_eq!(event.delivery_time_ms(), Some(250));
    }

    #[test]
    fn reset_for_retry_rewinds_counters() {
        let mut event = sample_event(1);
        let at = OffsetDateTime::now_utc();
        event.record_failure(at, "e1", None, schedule);
        event.record_failure(at, "e2", None, schedule);
        assert_eq!(event.status, EventStatus::DeadLetter);

        event.reset_for_retry();

        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert!(event.next_retry_at.is_none());
        // History is append-only and survives the rewind.
        assert_eq!(event.error_history.len(), 2);
    }

    #[test]
    fn wire_names() -> Result<(), serde_json::Error> {
        assert_eq!(
            serde_json::to_string(&EventStatus::DeadLetter)?,
            r#""dead_letter""#
        );
        assert_eq!(
            serde_json::to_string(&EventType::PaymentSuccess)?,
            r#""payment.success""#
        );
        assert_eq!("space.updated".parse::<EventType>(), Ok(EventType::SpaceUpdated));
        assert!("parking.teleported".parse::<EventType>().is_err());
        assert_eq!("failed".parse::<EventStatus>(), Ok(EventStatus::Failed));
        Ok(())
    }
}
