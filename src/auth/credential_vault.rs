use crate::auth::hmac_signer::HmacSigner;
use crate::clock::Clock;
use crate::domain::{
    IssuedCredentials, NewPartner, Partner, PartnerRepository, PartnerStatus, PartnerUpdate,
    Registration, StoredCredentials,
};
use crate::error::WebhookError;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const API_KEY_RANDOM_BYTES: usize = 24;
const API_SECRET_BYTES: usize = 32;
const WEBHOOK_SECRET_BYTES: usize = 24;

/// Environment tag embedded in API keys (`pk_test_…`, `pk_live_…`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeyEnvironment {
    #[default]
    Test,
    Live,
}

impl KeyEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyEnvironment::Test => "test",
            KeyEnvironment::Live => "live",
        }
    }
}

impl fmt::Display for KeyEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issues, hashes and rotates partner credentials.
///
/// Secrets leave the vault in plaintext exactly once, in the value returned
/// by [`CredentialVault::register`] or [`CredentialVault::rotate`]. The
/// registry only ever sees `HMAC-SHA256(pepper, secret)` as lowercase hex.
pub struct CredentialVault {
    partners: Arc<dyn PartnerRepository>,
    environment: KeyEnvironment,
    pepper: HmacSigner,
    clock: Arc<dyn Clock>,
}

impl CredentialVault {
    pub fn new(
        partners: Arc<dyn PartnerRepository>,
        environment: KeyEnvironment,
        pepper: &str,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            partners,
            environment,
            pepper: HmacSigner::new(pepper),
            clock,
        }
    }

    /// Keyed hash under which a secret is stored. The result doubles as the
    /// HMAC key for request signing in both directions.
    pub fn hash_secret(&self, secret: &str) -> String {
        self.pepper.sign_parts(&[secret.as_bytes()])
    }

    pub async fn register(&self, request: NewPartner) -> Result<Registration, WebhookError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(WebhookError::InvalidRequest(
                "partner name must not be empty".to_string(),
            ));
        }

        let (issued, stored) = self.issue();
        let partner = Partner {
            id: Uuid::new_v4(),
            name: name.clone(),
            partner_type: request.partner_type,
            status: PartnerStatus::Active,
            api_key: stored.api_key,
            api_secret_hash: stored.api_secret_hash,
            webhook_secret_hash: stored.webhook_secret_hash,
            webhook_url: request.webhook_url,
            config: request.config.unwrap_or_default().resolve(),
            email: request.email,
            contact_name: request.contact_name,
            phone: request.phone,
            metadata: request.metadata.unwrap_or(Value::Object(Default::default())),
            total_requests: 0,
            successful_webhooks: 0,
            failed_webhooks: 0,
            last_activity: None,
            created_at: self.clock.now(),
        };
        let id = partner.id;

        self.partners.insert(partner).await?;
        info!(partner_id = %id, name = %name, "Partner registered");

        Ok(Registration {
            id,
            name,
            instructions: usage_instructions(&issued.api_key),
            credentials: issued,
        })
    }

    /// Replace all three credentials at once. The previous key and secrets
    /// stop working immediately.
    pub async fn rotate(&self, partner_id: Uuid) -> Result<IssuedCredentials, WebhookError> {
        if self.partners.get(partner_id).await?.is_none() {
            return Err(WebhookError::NotFound(format!("partner {partner_id}")));
        }

        let (issued, stored) = self.issue();
        let partner = self.partners.replace_credentials(partner_id, stored).await?;
        info!(partner_id = %partner.id, name = %partner.name, "Partner credentials rotated");
        Ok(issued)
    }

    pub async fn list_partners(&self) -> Result<Vec<Partner>, WebhookError> {
        Ok(self.partners.list().await?)
    }

    pub async fn get_partner(&self, partner_id: Uuid) -> Result<Partner, WebhookError> {
        self.partners
            .get(partner_id)
            .await?
            .ok_or_else(|| WebhookError::NotFound(format!("partner {partner_id}")))
    }

    pub async fn update_status(
        &self,
        partner_id: Uuid,
        status: PartnerStatus,
    ) -> Result<Partner, WebhookError> {
        let partner = self.partners.update_status(partner_id, status).await?;
        info!(partner_id = %partner.id, status = %status, "Partner status updated");
        Ok(partner)
    }

    /// Edit the partner profile. Credentials only change through [`Self::rotate`].
    pub async fn update_partner(
        &self,
        partner_id: Uuid,
        mut changes: PartnerUpdate,
    ) -> Result<Partner, WebhookError> {
        if let Some(name) = changes.name.take() {
            let name = name.trim();
            if name.is_empty() {
                return Err(WebhookError::InvalidRequest(
                    "partner name must not be empty".to_string(),
                ));
            }
            changes.name = Some(name.to_string());
        }

        let partner = self.partners.update(partner_id, changes).await?;
        info!(partner_id = %partner.id, name = %partner.name, "Partner updated");
        Ok(partner)
    }

    /// Remove the partner. Its API key stops authenticating immediately and
    /// events still queued for it fail on their next attempt.
    pub async fn delete_partner(&self, partner_id: Uuid) -> Result<(), WebhookError> {
        let partner = self.partners.delete(partner_id).await?;
        info!(partner_id = %partner.id, name = %partner.name, "Partner deleted");
        Ok(())
    }

    fn issue(&self) -> (IssuedCredentials, StoredCredentials) {
        let api_key = format!(
            "pk_{}_{}",
            self.environment,
            random_token(API_KEY_RANDOM_BYTES)
        );
        let api_secret = random_token(API_SECRET_BYTES);
        let webhook_secret = random_token(WEBHOOK_SECRET_BYTES);

        let stored = StoredCredentials {
            api_key: api_key.clone(),
            api_secret_hash: self.hash_secret(&api_secret),
            webhook_secret_hash: self.hash_secret(&webhook_secret),
        };
        let issued = IssuedCredentials {
            api_key,
            api_secret,
            webhook_secret,
        };
        (issued, stored)
    }
}

/// `bytes` bytes from the OS CSPRNG, URL-safe base64 without padding.
fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn usage_instructions(api_key: &str) -> String {
    format!(
        "Store these credentials securely. The secrets are shown only once.\n\
         \n\
         Inbound requests must carry:\n\
         - X-API-Key: {api_key}\n\
         - X-Timestamp: <unix seconds>\n\
         - X-Nonce: <random string, never reused>\n\
         - X-Signature: sha256=<hex HMAC-SHA256 of \"<timestamp>.<raw body>\">\n\
         \n\
         Webhooks we send carry X-Webhook-Signature computed over \
         \"<timestamp>.<nonce>.<body>\" and the X-Webhook-Timestamp, \
         X-Webhook-Nonce, X-Webhook-Event and X-Webhook-Id headers.\n\
         Rotating credentials invalidates the current ones immediately."
    )
}
