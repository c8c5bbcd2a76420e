//! HTTP and WebSocket surface over `tandem-core`.

pub mod auth;
pub mod couple;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod status;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use uuid::Uuid;

use tandem_core::pairing::resolve_partner_id;
use tandem_core::{DocumentStore, PairingService, StatusStore};

pub use error::ApiError;

pub type ApiState = Arc<ApiStateInner>;

pub struct ApiStateInner {
    pub store: Arc<dyn DocumentStore>,
    pub pairing: PairingService,
    pub statuses: StatusStore,
    pub jwt_secret: String,
}

impl ApiStateInner {
    pub fn new(store: Arc<dyn DocumentStore>, jwt_secret: impl Into<String>) -> ApiState {
        Arc::new(Self {
            pairing: PairingService::new(store.clone()),
            statuses: StatusStore::new(store.clone()),
            store,
            jwt_secret: jwt_secret.into(),
        })
    }

    /// The completed partner of `user`, if any.
    pub async fn partner_of(&self, user: Uuid) -> tandem_core::Result<Option<Uuid>> {
        let couple = self.pairing.get_relation(user).await?;
        Ok(couple.and_then(|c| resolve_partner_id(&c, user)))
    }
}

/// All routes. CORS and request tracing are layered on by the binary.
pub fn router(state: ApiState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/couple", get(couple::get_couple))
        .route("/couple/invite", post(couple::create_invite))
        .route("/couple/join", post(couple::join))
        .route("/status", put(status::update_status))
        .route("/status/me", get(status::my_status))
        .route("/partner/status", get(status::partner_status))
        .route("/partner/widget", get(status::partner_widget))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(gateway::ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
}
