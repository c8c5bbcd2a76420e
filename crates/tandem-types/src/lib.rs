pub mod api;
pub mod events;
pub mod invite;
pub mod models;

pub use invite::InviteCode;
pub use models::{
    Activity, CharacterVariant, Couple, Emotion, Identity, MESSAGE_MAX_CHARS, StatusRecord,
    WidgetSnapshot,
};
