use serde::Serialize;
use uuid::Uuid;

pub const HEADER_EVENT: &str = "X-Webhook-Event";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
pub const HEADER_NONCE: &str = "X-Webhook-Nonce";
pub const HEADER_ID: &str = "X-Webhook-Id";

/// Headers partners put on inbound requests.
pub const HEADER_API_KEY: &str = "X-API-Key";
pub const HEADER_INBOUND_SIGNATURE: &str = "X-Signature";
pub const HEADER_INBOUND_TIMESTAMP: &str = "X-Timestamp";
pub const HEADER_INBOUND_NONCE: &str = "X-Nonce";

pub const DEFAULT_USER_AGENT: &str = "B2B-Parking-Webhooks/1.0";

/// Outcome of a manual delivery trigger.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAck {
    pub success: bool,
    pub event_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delivery_ack_serialization() -> Result<(), serde_json::Error> {
        let event_id = Uuid::nil();
        let ack = DeliveryAck {
            success: true,
            event_id,
        };
        assert_eq!(
            serde_json::to_value(ack)?,
            json!({"success": true, "eventId": event_id.to_string()})
        );
        Ok(())
    }
}
