use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced to callers of the pairing, status and session operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not signed in")]
    Unauthenticated,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("an account with this email already exists")]
    EmailTaken,

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("already connected with a partner")]
    AlreadyPaired,

    #[error("invalid invite code")]
    InvalidCode,

    #[error("cannot connect with your own invite code")]
    SelfPairing,

    #[error("this invite code has already been used")]
    CodeAlreadyUsed,

    #[error("profile not found for signed-in identity")]
    ProfileNotFound,

    /// Storage or network failure. Always safe to retry.
    #[error("backend unavailable: {0:#}")]
    RemoteUnavailable(anyhow::Error),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::RemoteUnavailable(e)
    }
}
