use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::invite::InviteCode;

/// Longest free-text status message a caller may publish, in characters.
pub const MESSAGE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterVariant {
    Male,
    Female,
}

impl CharacterVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }
}

impl FromStr for CharacterVariant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            other => Err(UnknownVariant {
                kind: "character",
                value: other.to_string(),
            }),
        }
    }
}

/// What a user is currently doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    #[default]
    Available,
    Busy,
    Studying,
    Working,
    Sleeping,
    Eating,
    Exercising,
    Custom,
}

impl Activity {
    pub const ALL: [Activity; 8] = [
        Self::Available,
        Self::Busy,
        Self::Studying,
        Self::Working,
        Self::Sleeping,
        Self::Eating,
        Self::Exercising,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Busy => "busy",
            Self::Studying => "studying",
            Self::Working => "working",
            Self::Sleeping => "sleeping",
            Self::Eating => "eating",
            Self::Exercising => "exercising",
            Self::Custom => "custom",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Available => "✨",
            Self::Busy => "💼",
            Self::Studying => "📚",
            Self::Working => "💻",
            Self::Sleeping => "😴",
            Self::Eating => "🍽️",
            Self::Exercising => "🏃",
            Self::Custom => "✏️",
        }
    }
}

impl FromStr for Activity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "activity",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Tired,
    Excited,
    #[default]
    Neutral,
    Love,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Self::Happy,
        Self::Sad,
        Self::Angry,
        Self::Tired,
        Self::Excited,
        Self::Neutral,
        Self::Love,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Tired => "tired",
            Self::Excited => "excited",
            Self::Neutral => "neutral",
            Self::Love => "love",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Happy => "😊",
            Self::Sad => "😢",
            Self::Angry => "😠",
            Self::Tired => "😫",
            Self::Excited => "🤩",
            Self::Neutral => "😐",
            Self::Love => "🥰",
        }
    }
}

impl FromStr for Emotion {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownVariant {
                kind: "emotion",
                value: s.to_string(),
            })
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signed-up user profile. Only `couple_id` ever changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub character: CharacterVariant,
    pub couple_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The pairing relation between two identities.
///
/// `second_member` is `None` while the invite is pending and is set exactly
/// once when another identity redeems `invite_code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Couple {
    pub id: String,
    pub first_member: Uuid,
    pub second_member: Option<Uuid>,
    pub invite_code: InviteCode,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl Couple {
    /// Couple ids are derived from the inviter and the mint time.
    pub fn derive_id(first_member: Uuid, created_at: DateTime<Utc>) -> String {
        format!("couple_{}_{}", first_member, created_at.timestamp_millis())
    }

    pub fn is_pending(&self) -> bool {
        self.second_member.is_none()
    }

    /// The other member of the couple, or `None` if `self_id` is not a member
    /// (or the couple is still pending).
    pub fn partner_of(&self, self_id: Uuid) -> Option<Uuid> {
        if self.first_member == self_id {
            self.second_member
        } else if self.second_member == Some(self_id) {
            Some(self.first_member)
        } else {
            None
        }
    }
}

/// Current status triplet published by one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub owner_id: Uuid,
    pub activity: Activity,
    pub emotion: Emotion,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn neutral(owner_id: Uuid, updated_at: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            activity: Activity::default(),
            emotion: Emotion::default(),
            message: String::new(),
            updated_at,
        }
    }
}

/// Denormalized partner status consumed by the home-screen widget.
/// Field names match what the native widget code reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSnapshot {
    pub name: String,
    pub status: Activity,
    pub emotion: Emotion,
    pub custom_message: String,
    pub character_type: CharacterVariant,
    /// Epoch milliseconds of the partner's last status write.
    pub updated_at: i64,
}

impl WidgetSnapshot {
    pub fn compose(partner: &Identity, status: &StatusRecord) -> Self {
        Self {
            name: partner.name.clone(),
            status: status.activity,
            emotion: status.emotion,
            custom_message: status.message.clone(),
            character_type: partner.character,
            updated_at: status.updated_at.timestamp_millis(),
        }
    }
}
