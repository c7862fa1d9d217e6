//! Back-office accounts: password hashing, temporary passwords, reset links
//! and the outgoing mail they trigger.

use std::sync::Arc;

use chrono::{Duration, Utc};
use nuancier_shared::constants::{MIN_PASSWORD_LEN, TEMP_PASSWORD_LEN};
use nuancier_shared::Role;
use nuancier_store::{Database, NewUser, User, UserId, UserPatch};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;

// ---------------------------------------------------------------------------
// Password hashing
// ---------------------------------------------------------------------------

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, ServerError>;

    /// `Ok(false)` on mismatch; `Err` only when `hash` cannot be parsed.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, ServerError>;
}

/// Argon2id with the crate's default parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Hasher;

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, ServerError> {
        use argon2::password_hash::{PasswordHasher as _, SaltString};
        use argon2::Argon2;

        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| ServerError::Internal(format!("salt encoding failed: {e}")))?;

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServerError::Internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, ServerError> {
        use argon2::password_hash::{PasswordHash, PasswordVerifier};
        use argon2::Argon2;

        let parsed = PasswordHash::new(hash)
            .map_err(|e| ServerError::Internal(format!("stored password hash is invalid: {e}")))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }
}

/// Reject passwords that are too short or made of digits only.
pub fn validate_password(password: &str) -> Result<(), ServerError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServerError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.chars().all(|c| c.is_ascii_digit()) {
        return Err(ServerError::BadRequest("password cannot be entirely numeric".into()));
    }
    Ok(())
}

fn temporary_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TEMP_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Raw reset token (sent by mail) and the digest kept in the database.
fn reset_token() -> (String, String) {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let token = hex::encode(raw);
    let digest = token_digest(&token);
    (token, digest)
}

fn token_digest(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Mailer: Send + Sync {
    fn send(&self, mail: &OutgoingMail) -> Result<(), ServerError>;
}

/// Writes every message to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, mail: &OutgoingMail) -> Result<(), ServerError> {
        info!(to = %mail.to, subject = %mail.subject, body = %mail.body, "outgoing mail");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

pub struct Accounts {
    db: Arc<Mutex<Database>>,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn Mailer>,
    config: Arc<ServerConfig>,
}

impl Accounts {
    pub fn new(
        db: Arc<Mutex<Database>>,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn Mailer>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            db,
            hasher,
            mailer,
            config,
        }
    }

    /// The active account behind `email`, as asserted by the upstream proxy.
    pub async fn signed_in(&self, email: &str) -> Result<User, ServerError> {
        let user = self.db.lock().await.find_user_by_email(email)?;
        match user {
            Some(user) if user.is_active => Ok(user),
            _ => Err(ServerError::Unauthorized),
        }
    }

    /// Create an admin for `email` when the database has no account at all.
    pub async fn bootstrap_admin(&self, email: &str) -> Result<Option<User>, ServerError> {
        if !self.db.lock().await.list_users()?.is_empty() {
            return Ok(None);
        }
        let user = self
            .create(NewAccount {
                email: email.to_string(),
                first_name: String::new(),
                last_name: String::new(),
                role: Role::Admin,
            })
            .await?;
        info!(user_id = %user.id, email = %user.email, "bootstrap administrator created");
        Ok(Some(user))
    }

    pub async fn list(&self) -> Result<Vec<User>, ServerError> {
        Ok(self.db.lock().await.list_users()?)
    }

    /// Drop reset links that can no longer be used.
    pub async fn purge_expired_tokens(&self) -> Result<usize, ServerError> {
        Ok(self.db.lock().await.purge_expired_reset_tokens(Utc::now())?)
    }

    /// Create an account with a temporary password and mail it to the user.
    pub async fn create(&self, account: NewAccount) -> Result<User, ServerError> {
        let password = temporary_password();
        let password_hash = self.hasher.hash(&password)?;

        let user = self.db.lock().await.create_user(&NewUser {
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            role: account.role,
            password_hash,
        })?;

        self.send_temporary_password(&user, &password, "Your account");
        Ok(user)
    }

    pub async fn update(&self, id: UserId, patch: &UserPatch) -> Result<User, ServerError> {
        Ok(self.db.lock().await.update_user(id, patch)?)
    }

    /// Replace the password of `id` by a fresh temporary one and mail it.
    pub async fn issue_temporary_password(&self, id: UserId) -> Result<User, ServerError> {
        let password = temporary_password();
        let password_hash = self.hasher.hash(&password)?;

        let user = {
            let mut db = self.db.lock().await;
            db.set_password(id, &password_hash, true)?;
            db.get_user(id)?
        };

        self.send_temporary_password(&user, &password, "Your password was reset");
        Ok(user)
    }

    pub async fn delete(&self, acting: &User, id: UserId) -> Result<(), ServerError> {
        if acting.id == id {
            return Err(ServerError::BadRequest("you cannot delete your own account".into()));
        }
        Ok(self.db.lock().await.delete_user(id)?)
    }

    /// Start the reset flow for `email`.  Unknown or inactive addresses are
    /// silently ignored so callers cannot probe for accounts.
    pub async fn forgot_password(&self, email: &str) -> Result<(), ServerError> {
        let (token, digest) = reset_token();
        let expires_at = Utc::now() + Duration::minutes(self.config.reset_token_ttl_minutes);

        let user = {
            let mut db = self.db.lock().await;
            let Some(user) = db.find_user_by_email(email)?.filter(|u| u.is_active) else {
                info!("password reset requested for an unknown address");
                return Ok(());
            };
            db.purge_expired_reset_tokens(Utc::now())?;
            db.create_reset_token(user.id, &digest, expires_at)?;
            user
        };

        let link = format!(
            "{}/password/reset?uid={}&token={}",
            self.config.public_base_url, user.id, token
        );
        self.deliver(OutgoingMail {
            from: self.config.mail_from.clone(),
            to: user.email.clone(),
            subject: format!("[{}] Password reset", self.config.site_name),
            body: format!(
                "Hello {},\n\nUse the link below to choose a new password. It expires in {} minutes.\n\n{}\n",
                display_name(&user),
                self.config.reset_token_ttl_minutes,
                link
            ),
        });
        Ok(())
    }

    /// Finish the reset flow: `token` must match a live token of `uid`.
    pub async fn reset_password(&self, uid: UserId, token: &str, new_password: &str) -> Result<(), ServerError> {
        validate_password(new_password)?;
        let invalid = || ServerError::BadRequest("reset link is invalid or has expired".into());

        let digest = token_digest(token);
        let password_hash = self.hasher.hash(new_password)?;
        let now = Utc::now();
        let mut db = self.db.lock().await;

        let candidates = db.active_reset_tokens(uid, now)?;
        let matched = candidates
            .iter()
            .find(|t| bool::from(t.token_hash.as_bytes().ct_eq(digest.as_bytes())))
            .ok_or_else(invalid)?;

        db.complete_password_reset(matched.id, uid, &password_hash, now)?;
        Ok(())
    }

    /// Voluntary or forced change.  The current password has to be supplied.
    pub async fn change_password(
        &self,
        user: &User,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ServerError> {
        if !self.hasher.verify(current_password, &user.password_hash)? {
            return Err(ServerError::BadRequest("current password is incorrect".into()));
        }
        validate_password(new_password)?;
        if current_password == new_password {
            return Err(ServerError::BadRequest(
                "new password must differ from the current one".into(),
            ));
        }

        let password_hash = self.hasher.hash(new_password)?;
        self.db.lock().await.set_password(user.id, &password_hash, false)?;
        Ok(())
    }

    fn send_temporary_password(&self, user: &User, password: &str, subject: &str) {
        self.deliver(OutgoingMail {
            from: self.config.mail_from.clone(),
            to: user.email.clone(),
            subject: format!("[{}] {}", self.config.site_name, subject),
            body: format!(
                "Hello {},\n\nSign in at {} with this temporary password:\n\n    {}\n\nYou will be asked to choose a new one.\n",
                display_name(user),
                self.config.public_base_url,
                password
            ),
        });
    }

    /// Mail failures never undo the account change that triggered them.
    fn deliver(&self, mail: OutgoingMail) {
        if let Err(e) = self.mailer.send(&mail) {
            warn!(to = %mail.to, error = %e, "mail delivery failed");
        }
    }
}

fn display_name(user: &User) -> String {
    let full = format!("{} {}", user.first_name, user.last_name);
    let full = full.trim();
    if full.is_empty() {
        user.username.clone()
    } else {
        full.to_string()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex as StdMutex;

    use super::*;

    /// Keeps every message for inspection.
    #[derive(Default)]
    pub struct RecordingMailer(pub StdMutex<Vec<OutgoingMail>>);

    impl RecordingMailer {
        pub fn last(&self) -> Option<OutgoingMail> {
            self.0.lock().unwrap().last().cloned()
        }
    }

    impl Mailer for RecordingMailer {
        fn send(&self, mail: &OutgoingMail) -> Result<(), ServerError> {
            self.0.lock().unwrap().push(mail.clone());
            Ok(())
        }
    }

    /// Pull the temporary password out of a welcome / reset mail.
    pub fn password_in(mail: &OutgoingMail) -> String {
        mail.body
            .lines()
            .find_map(|l| l.strip_prefix("    "))
            .unwrap()
            .to_string()
    }

    /// Pull the raw token out of a reset-link mail.
    pub fn token_in(mail: &OutgoingMail) -> String {
        mail.body
            .split("token=")
            .nth(1)
            .unwrap()
            .split_whitespace()
            .next()
            .unwrap()
            .to_string()
    }
}
