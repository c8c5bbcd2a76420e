use axum::{Extension, Json, extract::State};
use tracing::debug;

use tandem_types::api::{Claims, StatusResponse, UpdateStatusRequest};
use tandem_types::{MESSAGE_MAX_CHARS, WidgetSnapshot};

use crate::{ApiError, ApiState};

pub async fn update_status(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let message: String = req.message.chars().take(MESSAGE_MAX_CHARS).collect();
    let record = state
        .statuses
        .write_status(claims.sub, req.activity, req.emotion, &message)
        .await?;
    Ok(Json(record.into()))
}

pub async fn my_status(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Option<StatusResponse>>, ApiError> {
    let record = state.statuses.read_status(claims.sub).await?;
    Ok(Json(record.map(Into::into)))
}

/// `null` while unpaired or before the partner has a status.
pub async fn partner_status(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Option<StatusResponse>>, ApiError> {
    let Some(partner) = state.partner_of(claims.sub).await? else {
        return Ok(Json(None));
    };
    let record = state.statuses.read_status(partner).await?;
    Ok(Json(record.map(Into::into)))
}

/// The snapshot a widget on the caller's device would render.
pub async fn partner_widget(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Option<WidgetSnapshot>>, ApiError> {
    let Some(partner) = state.partner_of(claims.sub).await? else {
        debug!("{} has no partner; empty widget", claims.sub);
        return Ok(Json(None));
    };
    let identity = state.store.identity(partner).await.map_err(tandem_core::Error::from)?;
    let record = state.statuses.read_status(partner).await?;

    Ok(Json(match (identity, record) {
        (Some(identity), Some(record)) => Some(WidgetSnapshot::compose(&identity, &record)),
        _ => None,
    }))
}
