use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    IssuedCredentials, NewPartner, Partner, PartnerStatus, PartnerType, PartnerUpdate,
    Registration,
};
use crate::outbound::webhook::schemas::{
    HEADER_API_KEY, HEADER_INBOUND_NONCE, HEADER_INBOUND_SIGNATURE, HEADER_INBOUND_TIMESTAMP,
};
use crate::server::AppState;
use crate::server::responses::{ApiError, required_header};

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: PartnerStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatedCredentials {
    #[serde(flatten)]
    pub credentials: IssuedCredentials,
    pub warning: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub partner_type: PartnerType,
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub success: bool,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VerifiedAuth {
    pub success: bool,
    pub partner: PartnerSummary,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<NewPartner>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let registration = state.engine.vault.register(request).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

pub async fn list_partners(State(state): State<AppState>) -> Result<Json<Vec<Partner>>, ApiError> {
    Ok(Json(state.engine.vault.list_partners().await?))
}

pub async fn get_partner(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Partner>, ApiError> {
    Ok(Json(state.engine.vault.get_partner(id).await?))
}

pub async fn update_partner(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<PartnerUpdate>,
) -> Result<Json<Partner>, ApiError> {
    Ok(Json(state.engine.vault.update_partner(id, changes).await?))
}

pub async fn delete_partner(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Deleted>, ApiError> {
    state.engine.vault.delete_partner(id).await?;
    Ok(Json(Deleted {
        success: true,
        message: "partner deleted",
    }))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Partner>, ApiError> {
    Ok(Json(
        state.engine.vault.update_status(id, update.status).await?,
    ))
}

pub async fn rotate_credentials(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RotatedCredentials>, ApiError> {
    let credentials = state.engine.vault.rotate(id).await?;
    Ok(Json(RotatedCredentials {
        credentials,
        warning: "previous credentials are no longer valid",
    }))
}

pub async fn verify_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<VerifiedAuth>, ApiError> {
    let partner = authenticate(&state, &headers, &body).await?;
    Ok(Json(VerifiedAuth {
        success: true,
        partner: PartnerSummary {
            id: partner.id,
            name: partner.name,
            partner_type: partner.partner_type,
        },
    }))
}

/// Run inbound HMAC verification over the raw request body.
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Partner, ApiError> {
    let api_key = required_header(headers, HEADER_API_KEY)?;
    let signature = required_header(headers, HEADER_INBOUND_SIGNATURE)?;
    let timestamp = required_header(headers, HEADER_INBOUND_TIMESTAMP)?;
    let nonce = required_header(headers, HEADER_INBOUND_NONCE)?;

    Ok(state
        .engine
        .authenticator
        .verify(api_key, signature, timestamp, nonce, body)
        .await?)
}
