use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Invite code symbols. I, O, 0 and 1 are left out so codes can be read aloud.
pub const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InviteCodeError {
    #[error("invite code must be {CODE_LEN} characters, got {0}")]
    Length(usize),
    #[error("invite code contains invalid character '{0}'")]
    Symbol(char),
}

/// A six-symbol, uppercase-normalized invite code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InviteCode(String);

impl InviteCode {
    /// Draw a code uniformly from [`ALPHABET`].
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..CODE_LEN)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn random() -> Self {
        Self::generate(&mut rand::rng())
    }

    /// Normalize user input: surrounding whitespace is ignored and lookup is
    /// case-insensitive.
    pub fn parse(input: &str) -> Result<Self, InviteCodeError> {
        let upper = input.trim().to_ascii_uppercase();
        let len = upper.chars().count();
        if len != CODE_LEN {
            return Err(InviteCodeError::Length(len));
        }
        if let Some(bad) = upper.chars().find(|c| !c.is_ascii() || !ALPHABET.contains(&(*c as u8))) {
            return Err(InviteCodeError::Symbol(bad));
        }
        Ok(Self(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for InviteCode {
    type Err = InviteCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InviteCode {
    type Error = InviteCodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InviteCode> for String {
    fn from(code: InviteCode) -> Self {
        code.0
    }
}

impl fmt::Display for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
