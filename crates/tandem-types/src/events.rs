use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Couple, StatusRecord};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, name: String },

    /// The caller's or the partner's status changed
    StatusUpdate { status: StatusRecord },

    /// The caller's couple changed (partner joined)
    CoupleUpdate { couple: Couple },

    /// The caller's pending couple was pruned
    CoupleRemoved { couple_id: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Ask the server to resend the current self and partner status
    Resync,
}
