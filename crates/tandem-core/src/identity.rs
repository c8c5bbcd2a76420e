use std::sync::Arc;

use anyhow::anyhow;
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use tandem_types::{CharacterVariant, Identity};

use crate::error::{Error, Result};
use crate::store::{Account, DocumentStore, now_millis};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_NAME_CHARS: usize = 32;

/// Source of the authenticated identity for one device.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        character: CharacterVariant,
    ) -> Result<Identity>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;

    fn current_identity(&self) -> Option<Identity>;

    /// Fires on every sign-in and sign-out.
    fn watch(&self) -> watch::Receiver<Option<Identity>>;
}

/// Email/password accounts kept in the document store.
pub struct LocalIdentityProvider {
    store: Arc<dyn DocumentStore>,
    current: watch::Sender<Option<Identity>>,
}

impl LocalIdentityProvider {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (current, _) = watch::channel(None);
        Self { store, current }
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        character: CharacterVariant,
    ) -> Result<Identity> {
        let identity =
            register_account(self.store.as_ref(), email, password, display_name, character).await?;
        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let identity = verify_credentials(self.store.as_ref(), email, password).await?;
        self.current.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some(previous) = self.current.send_replace(None) {
            info!("{} signed out", previous.id);
        }
        Ok(())
    }

    fn current_identity(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }
}

/// Validate, hash and store a new account.
pub async fn register_account(
    store: &dyn DocumentStore,
    email: &str,
    password: &str,
    display_name: &str,
    character: CharacterVariant,
) -> Result<Identity> {
    let email = normalize_email(email);
    if !email.contains('@') {
        return Err(Error::InvalidProfile("email must contain '@'".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::InvalidProfile(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let name = display_name.trim();
    let name_len = name.chars().count();
    if name_len == 0 || name_len > MAX_NAME_CHARS {
        return Err(Error::InvalidProfile(format!(
            "name must be 1 to {} characters",
            MAX_NAME_CHARS
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("hash password: {}", e))?
        .to_string();

    let identity = Identity {
        id: Uuid::new_v4(),
        email,
        name: name.to_string(),
        character,
        couple_id: None,
        created_at: now_millis(),
    };
    let account = Account {
        identity: identity.clone(),
        password_hash,
    };
    if !store.insert_account(&account).await? {
        return Err(Error::EmailTaken);
    }

    info!("Registered {} ({})", identity.id, identity.name);
    Ok(identity)
}

/// Check an email/password pair. Unknown emails and wrong passwords are
/// indistinguishable to the caller.
pub async fn verify_credentials(
    store: &dyn DocumentStore,
    email: &str,
    password: &str,
) -> Result<Identity> {
    let account = store
        .account_by_email(&normalize_email(email))
        .await?
        .ok_or(Error::InvalidCredentials)?;

    let parsed = PasswordHash::new(&account.password_hash)
        .map_err(|e| anyhow!("stored hash for {} is unreadable: {}", account.identity.id, e))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| Error::InvalidCredentials)?;

    // Credentials live next to the profile, but the profile is re-read so
    // a signed-in caller always sees the latest couple id.
    let identity = resolve_profile(store, account.identity.id).await?;
    debug!("{} signed in", identity.id);
    Ok(identity)
}

/// Load the profile for an authenticated id. A missing profile after a
/// successful authentication is a consistency fault.
pub async fn resolve_profile(store: &dyn DocumentStore, id: Uuid) -> Result<Identity> {
    store.identity(id).await?.ok_or(Error::ProfileNotFound)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
