use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use tandem_core::identity::{register_account, verify_credentials};
use tandem_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};

use crate::{ApiError, ApiState};

pub async fn register(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = register_account(
        state.store.as_ref(),
        &req.email,
        &req.password,
        &req.name,
        req.character,
    )
    .await?;

    let token = create_token(&state.jwt_secret, identity.id, &identity.name)?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id: identity.id,
            name: identity.name,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<ApiState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = verify_credentials(state.store.as_ref(), &req.email, &req.password).await?;
    let token = create_token(&state.jwt_secret, identity.id, &identity.name)?;
    info!("{} ({}) logged in", identity.name, identity.id);

    Ok(Json(AuthResponse {
        user_id: identity.id,
        name: identity.name,
        token,
    }))
}

pub fn create_token(secret: &str, user_id: Uuid, name: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
