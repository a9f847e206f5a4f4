use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;
use webhook_events::{DEFAULT_MAX_RETRIES, EventType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
    Active,
    Inactive,
    Suspended,
    Pending,
}

impl PartnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerStatus::Active => "active",
            PartnerStatus::Inactive => "inactive",
            PartnerStatus::Suspended => "suspended",
            PartnerStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for PartnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PartnerType {
    Hotel,
    TourOperator,
    Restaurant,
    ParkingApp,
    ReservationSystem,
    PaymentGateway,
    #[default]
    Other,
}

/// Event types a partner receives when registration does not say otherwise.
pub const DEFAULT_ALLOWED_EVENTS: [EventType; 6] = [
    EventType::ParkingReserved,
    EventType::ParkingEntered,
    EventType::ParkingExited,
    EventType::PaymentSuccess,
    EventType::PaymentFailed,
    EventType::SpaceUpdated,
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Kept for API compatibility; delivery uses the fixed backoff schedule.
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_multiplier: 2,
        }
    }
}

/// Stored with the partner, not enforced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 100,
            requests_per_day: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartnerConfig {
    pub allowed_events: HashSet<EventType>,
    pub retry_policy: RetryPolicy,
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub ip_whitelist: Vec<String>,
}

impl Default for PartnerConfig {
    fn default() -> Self {
        Self {
            allowed_events: DEFAULT_ALLOWED_EVENTS.into_iter().collect(),
            retry_policy: RetryPolicy::default(),
            rate_limit: RateLimit::default(),
            ip_whitelist: Vec::new(),
        }
    }
}

/// Config overrides; anything left out keeps its current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerConfigInput {
    pub allowed_events: Option<HashSet<EventType>>,
    pub retry_policy: Option<RetryPolicy>,
    pub rate_limit: Option<RateLimit>,
    pub ip_whitelist: Option<Vec<String>>,
}

impl PartnerConfigInput {
    pub fn resolve(self) -> PartnerConfig {
        let mut config = PartnerConfig::default();
        self.merge_into(&mut config);
        config
    }

    /// Overwrite only the sections that were supplied.
    pub fn merge_into(self, config: &mut PartnerConfig) {
        if let Some(allowed_events) = self.allowed_events {
            config.allowed_events = allowed_events;
        }
        if let Some(retry_policy) = self.retry_policy {
            config.retry_policy = retry_policy;
        }
        if let Some(rate_limit) = self.rate_limit {
            config.rate_limit = rate_limit;
        }
        if let Some(ip_whitelist) = self.ip_whitelist {
            config.ip_whitelist = ip_whitelist;
        }
    }
}

/// A registered B2B partner.
///
/// Only keyed hashes of the API and webhook secrets are kept, and they never
/// serialize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Partner {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub partner_type: PartnerType,
    pub status: PartnerStatus,
    pub api_key: String,
    #[serde(skip_serializing, default)]
    pub api_secret_hash: String,
    #[serde(skip_serializing, default)]
    pub webhook_secret_hash: String,
    pub webhook_url: Option<String>,
    pub config: PartnerConfig,
    pub email: Option<String>,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub metadata: Value,
    pub total_requests: u64,
    pub successful_webhooks: u64,
    pub failed_webhooks: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_activity: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Partner {
    pub fn is_active(&self) -> bool {
        self.status == PartnerStatus::Active
    }

    pub fn allows_event(&self, event_type: EventType) -> bool {
        self.config.allowed_events.contains(&event_type)
    }

    pub fn max_retries(&self) -> u32 {
        self.config.retry_policy.max_retries
    }
}

/// Registration request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPartner {
    pub name: String,
    #[serde(rename = "type", default)]
    pub partner_type: PartnerType,
    pub webhook_url: Option<String>,
    pub email: Option<String>,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    pub config: Option<PartnerConfigInput>,
    pub metadata: Option<Value>,
}

impl NewPartner {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partner_type: PartnerType::default(),
            webhook_url: None,
            email: None,
            contact_name: None,
            phone: None,
            config: None,
            metadata: None,
        }
    }

    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        let mut config = self.config.take().unwrap_or_default();
        config.retry_policy = Some(RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        });
        self.config = Some(config);
        self
    }

    pub fn with_allowed_events(mut self, events: impl IntoIterator<Item = EventType>) -> Self {
        let mut config = self.config.take().unwrap_or_default();
        config.allowed_events = Some(events.into_iter().collect());
        self.config = Some(config);
        self
    }
}

/// Profile changes. Credentials, status and counters are not reachable from
/// here; they have their own operations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerUpdate {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub partner_type: Option<PartnerType>,
    pub webhook_url: Option<String>,
    pub email: Option<String>,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    pub config: Option<PartnerConfigInput>,
    pub metadata: Option<Value>,
}

impl PartnerUpdate {
    pub fn with_webhook_url(mut self, url: impl Into<String>) -> Self {
        self.webhook_url = Some(url.into());
        self
    }

    pub fn apply_to(self, partner: &mut Partner) {
        if let Some(name) = self.name {
            partner.name = name;
        }
        if let Some(partner_type) = self.partner_type {
            partner.partner_type = partner_type;
        }
        if let Some(url) = self.webhook_url {
            partner.webhook_url = Some(url);
        }
        if let Some(email) = self.email {
            partner.email = Some(email);
        }
        if let Some(contact_name) = self.contact_name {
            partner.contact_name = Some(contact_name);
        }
        if let Some(phone) = self.phone {
            partner.phone = Some(phone);
        }
        if let Some(config) = self.config {
            config.merge_into(&mut partner.config);
        }
        if let Some(metadata) = self.metadata {
            partner.metadata = metadata;
        }
    }
}

/// Plaintext credentials, handed out exactly once.
#[derive(Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuedCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub webhook_secret: String,
}

impl fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .finish()
    }
}

/// What the registry persists in place of [`IssuedCredentials`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub api_key: String,
    pub api_secret_hash: String,
    pub webhook_secret_hash: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub credentials: IssuedCredentials,
    pub instructions: String,
}
