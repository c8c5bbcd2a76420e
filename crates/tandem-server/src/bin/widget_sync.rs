//! Background widget refresh, independent of any interactive session.
//!
//! `tandem-widget-sync --once` performs a single run and exits non-zero if it
//! failed; without flags it repeats every `TANDEM_SYNC_INTERVAL_SECS`.

use std::sync::Arc;

use tracing::info;

use tandem_core::{
    BackgroundSyncResult, Config, FileLocalState, FileWidgetSurface, SyncBridge, open_store,
    run_background_sync,
};
use tandem_server::{init, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::from_env()?;
    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    let store = open_store(&config)?;
    let surface = Arc::new(FileWidgetSurface::new(&config.widget_dir));
    let local_state = Arc::new(FileLocalState::new(&config.local_state_path));

    if once {
        let result = run_background_sync(store.as_ref(), local_state.as_ref(), surface.as_ref()).await;
        info!("Background sync finished: {:?}", result);
        if result == BackgroundSyncResult::Failed {
            std::process::exit(1);
        }
        return Ok(());
    }

    let bridge = SyncBridge::new(store, surface, local_state, config.sync_debounce);
    tokio::select! {
        _ = bridge.run_periodic(config.sync_interval) => {}
        _ = shutdown_signal() => {}
    }
    Ok(())
}
