use std::net::SocketAddr;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tandem_api::{ApiStateInner, router};
use tandem_core::{Config, open_store};
use tandem_server::{init, shutdown_signal};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::from_env()?;
    if config.jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&config.jwt_secret.as_str()) {
        anyhow::bail!("TANDEM_JWT_SECRET is unset or still a placeholder; set it in .env and restart");
    }

    let store = open_store(&config)?;
    let state = ApiStateInner::new(store, config.jwt_secret.clone());

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Tandem server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
