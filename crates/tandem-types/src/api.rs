use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Activity, CharacterVariant, Couple, Emotion, StatusRecord};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub character: CharacterVariant,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

// -- Pairing --

#[derive(Debug, Serialize, Deserialize)]
pub struct InviteResponse {
    pub invite_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinRequest {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoupleResponse {
    pub id: String,
    pub partner_id: Option<Uuid>,
    pub invite_code: String,
    pub paired: bool,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CoupleResponse {
    pub fn for_member(couple: &Couple, member: Uuid) -> Self {
        Self {
            id: couple.id.clone(),
            partner_id: couple.partner_of(member),
            invite_code: couple.invite_code.to_string(),
            paired: !couple.is_pending(),
            created_at: couple.created_at,
            connected_at: couple.connected_at,
        }
    }
}

// -- Status --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    pub activity: Activity,
    pub emotion: Emotion,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub user_id: Uuid,
    pub activity: Activity,
    pub emotion: Emotion,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl From<StatusRecord> for StatusResponse {
    fn from(r: StatusRecord) -> Self {
        Self {
            user_id: r.owner_id,
            activity: r.activity,
            emotion: r.emotion,
            message: r.message,
            updated_at: r.updated_at,
        }
    }
}
