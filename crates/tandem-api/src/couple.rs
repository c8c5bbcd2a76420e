use axum::{Extension, Json, extract::State};

use tandem_types::api::{Claims, CoupleResponse, InviteResponse, JoinRequest};

use crate::{ApiError, ApiState};

pub async fn create_invite(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<InviteResponse>, ApiError> {
    let code = state.pairing.generate_invite_code(Some(claims.sub)).await?;
    Ok(Json(InviteResponse {
        invite_code: code.to_string(),
    }))
}

pub async fn join(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<CoupleResponse>, ApiError> {
    let couple = state.pairing.join_with_code(Some(claims.sub), &req.code).await?;
    Ok(Json(CoupleResponse::for_member(&couple, claims.sub)))
}

/// `null` when the caller has neither a pending nor a completed couple.
pub async fn get_couple(
    State(state): State<ApiState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Option<CoupleResponse>>, ApiError> {
    let couple = state.pairing.get_relation(claims.sub).await?;
    Ok(Json(
        couple.map(|c| CoupleResponse::for_member(&c, claims.sub)),
    ))
}
