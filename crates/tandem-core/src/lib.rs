//! Tandem core: pairing two identities through an invite code, publishing
//! each member's status, and mirroring the partner's status into a slot an
//! out-of-process home-screen widget can render.
//!
//! Persistence sits behind [`store::DocumentStore`], with a durable SQLite
//! backend and an in-memory one selected once at startup.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod local_state;
pub mod pairing;
pub mod session;
pub mod state;
pub mod status;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod widget;

pub use config::{BackendKind, Config};
pub use error::{Error, Result};
pub use identity::{IdentityProvider, LocalIdentityProvider};
pub use local_state::{FileLocalState, LocalState, MemoryLocalState};
pub use pairing::PairingService;
pub use session::Session;
pub use state::{AppState, LocalStatus, PairingState};
pub use status::StatusStore;
pub use store::{DocumentStore, MemoryStore, SqliteStore, open_store};
pub use subscription::{CoupleListener, StatusListener, Subscription};
pub use sync::{BackgroundSyncResult, SyncBridge, SyncOutcome, run_background_sync};
pub use widget::{FileWidgetSurface, MemoryWidgetSurface, WidgetSurface};
