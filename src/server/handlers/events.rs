use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;
use webhook_events::{Event, EventQuery, EventStats, EventStatus, EventType};

use crate::outbound::webhook::{DeliveryAck, EmitRequest};
use crate::server::AppState;
use crate::server::responses::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub partner_id: Option<Uuid>,
    pub status: Option<EventStatus>,
    pub event_type: Option<EventType>,
    /// RFC 3339.
    pub from_date: Option<String>,
    pub limit: Option<usize>,
}

impl ListParams {
    fn into_query(self) -> Result<EventQuery, ApiError> {
        let from = self
            .from_date
            .as_deref()
            .map(|raw| OffsetDateTime::parse(raw, &Rfc3339))
            .transpose()
            .map_err(|e| ApiError::bad_request(format!("fromDate must be RFC 3339: {e}")))?;

        Ok(EventQuery {
            partner_id: self.partner_id,
            status: self.status,
            event_type: self.event_type,
            from,
            limit: self.limit,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerFilter {
    pub partner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub event_type: EventType,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResult {
    pub count: usize,
    pub events: Vec<Event>,
}

pub async fn emit(
    State(state): State<AppState>,
    Json(request): Json<EmitRequest>,
) -> Result<(StatusCode, Json<Event>), ApiError> {
    let event = state.engine.emitter.emit(request).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn broadcast(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResult>, ApiError> {
    let events = state
        .engine
        .emitter
        .emit_to_subscribers(request.event_type, request.payload)
        .await?;
    Ok(Json(BroadcastResult {
        count: events.len(),
        events,
    }))
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let query = params.into_query()?;
    Ok(Json(state.engine.emitter.find_all(&query).await?))
}

pub async fn stats(
    State(state): State<AppState>,
    Query(filter): Query<PartnerFilter>,
) -> Result<Json<EventStats>, ApiError> {
    Ok(Json(state.engine.emitter.get_stats(filter.partner_id).await?))
}

pub async fn dead_letter(
    State(state): State<AppState>,
    Query(filter): Query<PartnerFilter>,
) -> Result<Json<Vec<Event>>, ApiError> {
    Ok(Json(
        state
            .engine
            .emitter
            .get_dead_letter_queue(filter.partner_id)
            .await?,
    ))
}

pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Event>, ApiError> {
    Ok(Json(state.engine.emitter.retry_event(id).await?))
}

pub async fn deliver(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryAck>, ApiError> {
    let success = state.engine.emitter.deliver_event(id).await?;
    Ok(Json(DeliveryAck {
        success,
        event_id: id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_parse_from_date() {
        let params = ListParams {
            from_date: Some("2024-05-01T10:00:00Z".to_string()),
            limit: Some(5),
            ..Default::default()
        };
        let query = params.into_query().expect("valid params");
        assert_eq!(query.from.map(|t| t.unix_timestamp()), Some(1_714_557_600));
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn test_list_params_reject_bad_date() {
        let params = ListParams {
            from_date: Some("yesterday".to_string()),
            ..Default::default()
        };
        assert!(params.into_query().is_err());
    }
}
