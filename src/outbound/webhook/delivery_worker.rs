use crate::auth::HmacAuthenticator;
use crate::clock::Clock;
use crate::domain::{Partner, PartnerRepository};
use crate::error::WebhookError;
use crate::outbound::webhook::http_client::WebhookHttpClient;
use crate::outbound::webhook::retry_strategy::RetryStrategy;
use crate::outbound::webhook::schemas::{
    HEADER_EVENT, HEADER_ID, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use webhook_events::{DeliveryResponse, Event, EventStatus, EventStore};

/// Characters of a non-2xx response body kept in the failure message.
const ERROR_BODY_PREVIEW: usize = 200;

/// Makes exactly one delivery attempt per call.
///
/// The attempt is bracketed by an atomic claim (`PENDING|FAILED → PROCESSING`)
/// and a single `complete` write, so two callers racing on the same event
/// never both send it.
pub struct DeliveryWorker {
    events: Arc<dyn EventStore>,
    partners: Arc<dyn PartnerRepository>,
    authenticator: Arc<HmacAuthenticator>,
    http_client: Arc<WebhookHttpClient>,
    retry_strategy: RetryStrategy,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    pub fn new(
        events: Arc<dyn EventStore>,
        partners: Arc<dyn PartnerRepository>,
        authenticator: Arc<HmacAuthenticator>,
        http_client: Arc<WebhookHttpClient>,
        retry_strategy: RetryStrategy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            events,
            partners,
            authenticator,
            http_client,
            retry_strategy,
            clock,
        }
    }

    /// Attempt delivery of one event. Returns `true` only if this call
    /// delivered it.
    ///
    /// Unknown, terminal and already-claimed events are skipped with `false`.
    /// Delivery failures are recorded on the event, not returned.
    pub async fn deliver(&self, event_id: Uuid) -> Result<bool, WebhookError> {
        match self.events.get(event_id).await? {
            None => {
                debug!(event_id = %event_id, "Unknown event, nothing to deliver");
                return Ok(false);
            }
            Some(event) if event.status.is_terminal() => {
                debug!(event_id = %event_id, status = %event.status, "Event is terminal, skipping");
                return Ok(false);
            }
            Some(_) => {}
        }

        let Some(event) = self.events.claim(event_id).await? else {
            debug!(event_id = %event_id, "Event already claimed, skipping");
            return Ok(false);
        };

        debug!(
            event_id = %event.id,
            partner_id = %event.partner_id,
            attempt = event.current_attempt(),
            "Processing delivery"
        );

        match self.attempt(&event).await {
            Ok(response) if response.is_success() => self.succeed(event, response).await,
            Ok(response) => {
                let message = format!(
                    "HTTP {}: {}",
                    response.status_code,
                    preview(&response.body, ERROR_BODY_PREVIEW)
                );
                self.fail(event, message, Some(response)).await
            }
            Err(WebhookError::DeliveryFailure(message)) => self.fail(event, message, None).await,
            Err(other) => self.fail(event, other.to_string(), None).await,
        }
    }

    // ------------------------------------------------------------------------
    // Attempt
    // ------------------------------------------------------------------------

    async fn attempt(&self, event: &Event) -> Result<DeliveryResponse, WebhookError> {
        let partner = self.deliverable_partner(event.partner_id).await?;
        let Some(url) = partner.webhook_url.as_deref() else {
            return Err(WebhookError::DeliveryFailure(
                "partner has no webhook URL configured".to_string(),
            ));
        };

        let body = serde_json::to_vec(&event.payload).map_err(|e| {
            WebhookError::DeliveryFailure(format!("payload serialization failed: {e}"))
        })?;
        let signed = self.authenticator.sign_for(&partner, &body);

        let headers = [
            (HEADER_EVENT, event.event_type.to_string()),
            (HEADER_SIGNATURE, signed.signature),
            (HEADER_TIMESTAMP, signed.timestamp.to_string()),
            (HEADER_NONCE, signed.nonce),
            (HEADER_ID, event.id.to_string()),
        ];

        self.http_client
            .post_json(url, body, &headers)
            .await
            .map_err(|e| WebhookError::DeliveryFailure(e.to_string()))
    }

    async fn deliverable_partner(&self, partner_id: Uuid) -> Result<Partner, WebhookError> {
        let partner = self
            .partners
            .get(partner_id)
            .await
            .map_err(|e| WebhookError::DeliveryFailure(format!("partner lookup failed: {e}")))?
            .ok_or_else(|| {
                WebhookError::DeliveryFailure(format!("partner {partner_id} not found"))
            })?;

        if !partner.is_active() {
            return Err(WebhookError::DeliveryFailure(format!(
                "partner is not active ({})",
                partner.status
            )));
        }
        Ok(partner)
    }

    // ------------------------------------------------------------------------
    // Outcomes
    // ------------------------------------------------------------------------

    async fn succeed(
        &self,
        mut event: Event,
        response: DeliveryResponse,
    ) -> Result<bool, WebhookError> {
        let status_code = response.status_code;
        let duration_ms = response.duration_ms;
        event.mark_delivered(self.clock.now(), response);
        self.events.complete(&event).await?;

        info!(
            event_id = %event.id,
            partner_id = %event.partner_id,
            attempt = event.current_attempt(),
            status_code = status_code,
            duration_ms = duration_ms,
            "Webhook delivered successfully"
        );
        self.bump_partner_stats(event.partner_id, true).await;
        Ok(true)
    }

    async fn fail(
        &self,
        mut event: Event,
        message: String,
        response: Option<DeliveryResponse>,
    ) -> Result<bool, WebhookError> {
        let attempt = event.current_attempt();
        let status_code = response.as_ref().map(|r| r.status_code);
        let status = event.record_failure(self.clock.now(), message.clone(), response, |retry| {
            self.retry_strategy.delay_for(retry)
        });
        self.events.complete(&event).await?;

        if status == EventStatus::DeadLetter {
            error!(
                event_id = %event.id,
                partner_id = %event.partner_id,
                attempt = attempt,
                status_code = ?status_code,
                error = %message,
                "Webhook delivery exhausted retries, moved to dead letter"
            );
            self.bump_partner_stats(event.partner_id, false).await;
        } else {
            warn!(
                event_id = %event.id,
                partner_id = %event.partner_id,
                attempt = attempt,
                retry = event.retry_count,
                max_retries = event.max_retries,
                status_code = ?status_code,
                next_retry_at = ?event.next_retry_at,
                error = %message,
                "Webhook delivery failed, will retry"
            );
        }
        Ok(false)
    }

    async fn bump_partner_stats(&self, partner_id: Uuid, success: bool) {
        if let Err(e) = self
            .partners
            .increment_webhook_stats(partner_id, success)
            .await
        {
            warn!(partner_id = %partner_id, error = %e, "Failed to update partner webhook stats");
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn preview(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}
