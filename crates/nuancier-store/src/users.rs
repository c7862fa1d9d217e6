//! Back-office accounts and password reset tokens.
//!
//! The store never sees a clear-text password or reset token: callers hand
//! over an argon2 PHC string and a BLAKE3 hex digest respectively.

use chrono::{DateTime, Utc};
use nuancier_shared::Role;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::database::{parse_column, parse_timestamp, Database};
use crate::error::{not_found, unique_violation, Result, StoreError};
use crate::models::{NewUser, ResetToken, User, UserId, UserPatch};

const USER_COLUMNS: &str = "id, email, username, first_name, last_name, role, is_active, \
                            must_change_password, password_hash, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create an account.  New accounts always have to pick their own
    /// password at first sign-in.
    pub fn create_user(&mut self, new: &NewUser) -> Result<User> {
        let email = normalize_email(&new.email)?;
        let username = email.split('@').next().unwrap_or_default().to_string();
        let created_at = Utc::now();

        let tx = self.write_tx()?;
        if find_by_email(&tx, &email)?.is_some() {
            return Err(StoreError::Conflict(format!("a user with email {email} already exists")));
        }
        tx.execute(
            "INSERT INTO users (email, username, first_name, last_name, role, is_active,
                                must_change_password, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 1, ?6, ?7)",
            params![
                email,
                username,
                new.first_name.trim(),
                new.last_name.trim(),
                new.role.as_str(),
                new.password_hash,
                created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| {
            let err = StoreError::from(e);
            match unique_violation(&err) {
                Some(_) => StoreError::Conflict(format!("a user with email {email} already exists")),
                None => err,
            }
        })?;
        let id = UserId(tx.last_insert_rowid());
        tx.commit()?;

        info!(user_id = %id, %email, role = %new.role, "user created");
        Ok(User {
            id,
            email,
            username,
            first_name: new.first_name.trim().to_string(),
            last_name: new.last_name.trim().to_string(),
            role: new.role,
            is_active: true,
            must_change_password: true,
            password_hash: new.password_hash.clone(),
            created_at,
        })
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        fetch_user(self.conn(), id)
    }

    /// Case-insensitive lookup by email.
    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        find_by_email(self.conn(), &email.trim().to_lowercase())
    }

    /// All accounts, ordered by last name, first name, then email.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY last_name, first_name, email"
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Edit names, role or active flag.  The last active admin can be
    /// neither demoted nor deactivated.
    pub fn update_user(&mut self, id: UserId, patch: &UserPatch) -> Result<User> {
        let tx = self.write_tx()?;
        let mut user = fetch_user(&tx, id)?;

        let loses_admin = user.role == Role::Admin
            && user.is_active
            && (patch.role.is_some_and(|r| r != Role::Admin) || patch.is_active == Some(false));
        if loses_admin {
            guard_last_admin(&tx, id, "demote or deactivate")?;
        }

        if let Some(first_name) = &patch.first_name {
            user.first_name = first_name.trim().to_string();
        }
        if let Some(last_name) = &patch.last_name {
            user.last_name = last_name.trim().to_string();
        }
        if let Some(role) = patch.role {
            user.role = role;
        }
        if let Some(is_active) = patch.is_active {
            user.is_active = is_active;
        }

        tx.execute(
            "UPDATE users SET first_name = ?1, last_name = ?2, role = ?3, is_active = ?4 WHERE id = ?5",
            params![user.first_name, user.last_name, user.role.as_str(), user.is_active, id],
        )?;
        tx.commit()?;
        Ok(user)
    }

    /// Replace the password hash.  `must_change` is set when an admin hands
    /// out a temporary password and cleared when the user picks their own.
    pub fn set_password(&mut self, id: UserId, password_hash: &str, must_change: bool) -> Result<()> {
        let tx = self.write_tx()?;
        fetch_user(&tx, id)?;
        tx.execute(
            "UPDATE users SET password_hash = ?1, must_change_password = ?2 WHERE id = ?3",
            params![password_hash, must_change, id],
        )?;
        tx.commit()?;
        info!(user_id = %id, must_change, "password updated");
        Ok(())
    }

    pub fn delete_user(&mut self, id: UserId) -> Result<()> {
        let tx = self.write_tx()?;
        let user = fetch_user(&tx, id)?;
        if user.role == Role::Admin && user.is_active {
            guard_last_admin(&tx, id, "delete")?;
        }
        tx.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        tx.commit()?;
        info!(user_id = %id, email = %user.email, "user deleted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reset tokens
    // ------------------------------------------------------------------

    pub fn create_reset_token(
        &mut self,
        user_id: UserId,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ResetToken> {
        let tx = self.write_tx()?;
        fetch_user(&tx, user_id)?;
        tx.execute(
            "INSERT INTO password_reset_tokens (user_id, token_hash, expires_at) VALUES (?1, ?2, ?3)",
            params![user_id, token_hash, expires_at.to_rfc3339()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(ResetToken {
            id,
            user_id,
            token_hash: token_hash.to_string(),
            expires_at,
            used_at: None,
        })
    }

    /// Unused tokens of `user_id` that are still valid at `now`.
    pub fn active_reset_tokens(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Vec<ResetToken>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, token_hash, expires_at, used_at FROM password_reset_tokens
             WHERE user_id = ?1 AND used_at IS NULL
             ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_token)?;

        let mut tokens = Vec::new();
        for token in rows {
            let token = token?;
            if token.expires_at > now {
                tokens.push(token);
            }
        }
        Ok(tokens)
    }

    /// Spend `token_id` and store the new password in one transaction.  Every
    /// other pending token of the user is spent as well.
    pub fn complete_password_reset(
        &mut self,
        token_id: i64,
        user_id: UserId,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.write_tx()?;
        let token = tx
            .query_row(
                "SELECT id, user_id, token_hash, expires_at, used_at FROM password_reset_tokens
                 WHERE id = ?1 AND user_id = ?2",
                params![token_id, user_id],
                row_to_token,
            )
            .map_err(not_found("reset token"))?;
        if token.used_at.is_some() || token.expires_at <= now {
            return Err(StoreError::Validation("reset link is invalid or has expired".into()));
        }

        tx.execute(
            "UPDATE password_reset_tokens SET used_at = ?1 WHERE user_id = ?2 AND used_at IS NULL",
            params![now.to_rfc3339(), user_id],
        )?;
        tx.execute(
            "UPDATE users SET password_hash = ?1, must_change_password = 0 WHERE id = ?2",
            params![password_hash, user_id],
        )?;
        tx.commit()?;

        info!(user_id = %user_id, "password reset completed");
        Ok(())
    }

    /// Drop tokens that expired before `now`.  Returns how many were removed.
    pub fn purge_expired_reset_tokens(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let tx = self.write_tx()?;
        let expired: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT id, expires_at FROM password_reset_tokens")?;
            let rows = stmt.query_map([], |row| {
                let raw: String = row.get(1)?;
                Ok((row.get::<_, i64>(0)?, parse_timestamp(1, &raw)?))
            })?;
            let mut ids = Vec::new();
            for row in rows {
                let (id, expires_at) = row?;
                if expires_at <= now {
                    ids.push(id);
                }
            }
            ids
        };
        for id in &expired {
            tx.execute("DELETE FROM password_reset_tokens WHERE id = ?1", params![id])?;
        }
        tx.commit()?;
        Ok(expired.len())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fetch_user(conn: &Connection, id: UserId) -> Result<User> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![id],
        row_to_user,
    )
    .map_err(not_found("user"))
}

fn find_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
        params![email],
        row_to_user,
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

/// Fail unless another active admin than `id` exists.
fn guard_last_admin(conn: &Connection, id: UserId, verb: &str) -> Result<()> {
    let others: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = 'ADMIN' AND is_active = 1 AND id <> ?1",
        params![id],
        |row| row.get(0),
    )?;
    if others == 0 {
        return Err(StoreError::IntegrityGuard(format!(
            "cannot {verb} the last active administrator"
        )));
    }
    Ok(())
}

fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') && !domain.contains('@') => {
            Ok(email)
        }
        _ => Err(StoreError::Validation(format!("{raw:?} is not a valid email address"))),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(5)?;
    let created_str: String = row.get(9)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        role: parse_column(5, &role)?,
        is_active: row.get(6)?,
        must_change_password: row.get(7)?,
        password_hash: row.get(8)?,
        created_at: parse_timestamp(9, &created_str)?,
    })
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResetToken> {
    let expires_str: String = row.get(3)?;
    let used_str: Option<String> = row.get(4)?;
    Ok(ResetToken {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token_hash: row.get(2)?,
        expires_at: parse_timestamp(3, &expires_str)?,
        used_at: used_str.map(|s| parse_timestamp(4, &s)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::database::test_support::open_temp;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            role,
            password_hash: "$argon2id$v=19$stub".into(),
        }
    }

    #[test]
    fn create_normalizes_email_and_forces_password_change() {
        let (mut db, _dir) = open_temp();
        let user = db.create_user(&new_user("  Ada@Example.COM ", Role::Manager)).unwrap();

        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.username, "ada");
        assert!(user.must_change_password);
        assert_eq!(db.find_user_by_email("ADA@example.com").unwrap().unwrap().id, user.id);
    }

    #[test]
    fn duplicate_email_conflicts() {
        let (mut db, _dir) = open_temp();
        db.create_user(&new_user("ada@example.com", Role::Manager)).unwrap();
        let err = db.create_user(&new_user("ADA@example.com", Role::Admin)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn malformed_email_is_rejected() {
        let (mut db, _dir) = open_temp();
        for email in ["", "ada", "@example.com", "ada@localhost"] {
            let err = db.create_user(&new_user(email, Role::Manager)).unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)), "{email:?}");
        }
    }

    #[test]
    fn last_admin_cannot_be_demoted_deactivated_or_deleted() {
        let (mut db, _dir) = open_temp();
        let admin = db.create_user(&new_user("root@example.com", Role::Admin)).unwrap();

        let demote = UserPatch {
            role: Some(Role::Manager),
            ..Default::default()
        };
        assert!(matches!(db.update_user(admin.id, &demote), Err(StoreError::IntegrityGuard(_))));
        let deactivate = UserPatch {
            is_active: Some(false),
            ..Default::default()
        };
        assert!(matches!(db.update_user(admin.id, &deactivate), Err(StoreError::IntegrityGuard(_))));
        assert!(matches!(db.delete_user(admin.id), Err(StoreError::IntegrityGuard(_))));

        db.create_user(&new_user("second@example.com", Role::Admin)).unwrap();
        let demoted = db.update_user(admin.id, &demote).unwrap();
        assert_eq!(demoted.role, Role::Manager);
        assert_eq!(db.get_user(admin.id).unwrap().role, Role::Manager);
    }

    #[test]
    fn managers_can_be_deleted_freely() {
        let (mut db, _dir) = open_temp();
        let manager = db.create_user(&new_user("m@example.com", Role::Manager)).unwrap();
        db.delete_user(manager.id).unwrap();
        assert!(matches!(db.get_user(manager.id), Err(StoreError::NotFound("user"))));
    }

    #[test]
    fn set_password_toggles_forced_change() {
        let (mut db, _dir) = open_temp();
        let user = db.create_user(&new_user("ada@example.com", Role::Manager)).unwrap();
        db.set_password(user.id, "$argon2id$new", false).unwrap();

        let stored = db.get_user(user.id).unwrap();
        assert!(!stored.must_change_password);
        assert_eq!(stored.password_hash, "$argon2id$new");
    }

    #[test]
    fn reset_tokens_are_single_use_and_expire() {
        let (mut db, _dir) = open_temp();
        let user = db.create_user(&new_user("ada@example.com", Role::Manager)).unwrap();
        let now = Utc::now();

        let expired = db.create_reset_token(user.id, "old", now - Duration::minutes(1)).unwrap();
        let live = db.create_reset_token(user.id, "live", now + Duration::minutes(60)).unwrap();

        let active = db.active_reset_tokens(user.id, now).unwrap();
        assert_eq!(active.iter().map(|t| t.id).collect::<Vec<_>>(), [live.id]);

        assert!(matches!(
            db.complete_password_reset(expired.id, user.id, "$argon2id$x", now),
            Err(StoreError::Validation(_))
        ));

        db.complete_password_reset(live.id, user.id, "$argon2id$reset", now).unwrap();
        let stored = db.get_user(user.id).unwrap();
        assert_eq!(stored.password_hash, "$argon2id$reset");
        assert!(!stored.must_change_password);

        assert!(db.active_reset_tokens(user.id, now).unwrap().is_empty());
        assert!(matches!(
            db.complete_password_reset(live.id, user.id, "$argon2id$again", now),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn purge_removes_only_expired_tokens() {
        let (mut db, _dir) = open_temp();
        let user = db.create_user(&new_user("ada@example.com", Role::Manager)).unwrap();
        let now = Utc::now();
        db.create_reset_token(user.id, "a", now - Duration::hours(2)).unwrap();
        db.create_reset_token(user.id, "b", now + Duration::hours(2)).unwrap();

        assert_eq!(db.purge_expired_reset_tokens(now).unwrap(), 1);
        assert_eq!(db.active_reset_tokens(user.id, now).unwrap().len(), 1);
    }
}
