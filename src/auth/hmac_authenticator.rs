use crate::auth::hmac_signer::{HmacSigner, format_signature_header};
use crate::auth::nonce_ledger::{NonceError, NonceLedger};
use crate::clock::Clock;
use crate::domain::{Partner, PartnerRepository};
use crate::error::WebhookError;
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(5 * 60);

const OUTBOUND_NONCE_BYTES: usize = 16;

/// Why an inbound request was rejected. Callers outside the crate see a
/// plain 401; the variant is for logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid API key or inactive partner")]
    UnknownApiKey,

    #[error("timestamp out of range ({skew_secs}s skew)")]
    TimestampOutOfRange { skew_secs: u64 },

    #[error("malformed timestamp")]
    MalformedTimestamp,

    #[error("nonce already used")]
    NonceReused,

    #[error("too many outstanding nonces, retry later")]
    NonceLedgerFull,

    #[error("invalid HMAC signature")]
    InvalidSignature,

    #[error("missing header {0}")]
    MissingHeader(&'static str),
}

/// Headers for one outbound webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSignature {
    /// `sha256=<hex>`
    pub signature: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub nonce: String,
}

/// Signs outbound webhooks and authenticates inbound partner requests.
///
/// Outbound messages are keyed by the partner's webhook secret hash, inbound
/// by its API secret hash, so one leaked direction cannot forge the other.
pub struct HmacAuthenticator {
    partners: Arc<dyn PartnerRepository>,
    nonces: Arc<NonceLedger>,
    clock: Arc<dyn Clock>,
    tolerance: Duration,
}

impl HmacAuthenticator {
    pub fn new(
        partners: Arc<dyn PartnerRepository>,
        nonces: Arc<NonceLedger>,
        clock: Arc<dyn Clock>,
        tolerance: Duration,
    ) -> Self {
        Self {
            partners,
            nonces,
            clock,
            tolerance,
        }
    }

    /// Sign `payload` for delivery to `partner_id`.
    pub async fn sign(
        &self,
        partner_id: Uuid,
        payload: &Value,
    ) -> Result<OutboundSignature, WebhookError> {
        let partner = self
            .partners
            .get(partner_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(format!("partner {partner_id}")))?;
        let body = serde_json::to_vec(payload)
            .map_err(|e| WebhookError::InvalidRequest(format!("unserializable payload: {e}")))?;
        Ok(self.sign_for(&partner, &body))
    }

    /// Sign the exact bytes that will be sent.
    pub fn sign_for(&self, partner: &Partner, body: &[u8]) -> OutboundSignature {
        let timestamp = self.clock.unix_timestamp();
        let nonce = random_nonce();
        let signer = HmacSigner::new(&partner.webhook_secret_hash);
        let signature =
            signer.sign_parts(&[timestamp.to_string().as_bytes(), nonce.as_bytes(), body]);

        OutboundSignature {
            signature: format_signature_header(&signature),
            timestamp,
            nonce,
        }
    }

    /// Authenticate an inbound request. Checks run in order and stop at the
    /// first failure: partner lookup, timestamp window, nonce, signature.
    pub async fn verify(
        &self,
        api_key: &str,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        raw_body: &[u8],
    ) -> Result<Partner, WebhookError> {
        let result = self
            .check(api_key, signature, timestamp, nonce, raw_body)
            .await;

        match result {
            Ok(mut partner) => {
                let now = self.clock.now();
                if let Err(e) = self.partners.record_activity(partner.id, now).await {
                    warn!(partner_id = %partner.id, error = %e, "Failed to record partner activity");
                } else {
                    partner.total_requests += 1;
                    partner.last_activity = Some(now);
                }
                debug!(partner_id = %partner.id, "Inbound request authenticated");
                Ok(partner)
            }
            Err(WebhookError::Unauthorized(reason)) => {
                warn!(api_key = %api_key, reason = %reason, "Inbound request rejected");
                Err(WebhookError::Unauthorized(reason))
            }
            Err(other) => Err(other),
        }
    }

    async fn check(
        &self,
        api_key: &str,
        signature: &str,
        timestamp: &str,
        nonce: &str,
        raw_body: &[u8],
    ) -> Result<Partner, WebhookError> {
        let partner = self
            .partners
            .find_by_api_key(api_key)
            .await?
            .filter(Partner::is_active)
            .ok_or(AuthError::UnknownApiKey)?;

        let sent_at: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| AuthError::MalformedTimestamp)?;
        let skew_secs = self.clock.unix_timestamp().abs_diff(sent_at);
        if skew_secs > self.tolerance.as_secs() {
            return Err(AuthError::TimestampOutOfRange { skew_secs }.into());
        }

        self.nonces
            .try_record(api_key, nonce)
            .map_err(|e| match e {
                NonceError::Reused => AuthError::NonceReused,
                NonceError::LedgerFull => AuthError::NonceLedgerFull,
            })?;

        let signer = HmacSigner::new(&partner.api_secret_hash);
        if !signer.verify_parts(&[timestamp.as_bytes(), raw_body], signature) {
            return Err(AuthError::InvalidSignature.into());
        }

        Ok(partner)
    }
}

fn random_nonce() -> String {
    let mut bytes = [0u8; OUTBOUND_NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
