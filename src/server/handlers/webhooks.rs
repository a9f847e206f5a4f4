use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::outbound::webhook::schemas::HEADER_EVENT;
use crate::server::AppState;
use crate::server::handlers::partners::authenticate;
use crate::server::responses::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptAck {
    pub success: bool,
    pub message: &'static str,
    pub event_id: Option<String>,
}

/// Inbound partner webhook. Authentication runs over the exact bytes
/// received, before the body is parsed.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReceiptAck>, ApiError> {
    let partner = authenticate(&state, &headers, &body).await?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("body is not valid JSON: {e}")))?;
    let event_type = headers
        .get(HEADER_EVENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    info!(partner_id = %partner.id, partner = %partner.name, event_type = %event_type, "Webhook received");

    let event_id = payload
        .get("_meta")
        .and_then(|meta| meta.get("eventId"))
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Json(ReceiptAck {
        success: true,
        message: "webhook processed",
        event_id,
    }))
}
