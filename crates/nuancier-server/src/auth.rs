//! Request authentication.
//!
//! Sign-in happens at the reverse proxy in front of the server, which passes
//! the account email in a trusted header (`AUTH_EMAIL_HEADER`).  Here we only
//! map that email to an active account and check its role.

use axum::http::HeaderMap;
use nuancier_shared::{authorize, Action};
use nuancier_store::User;

use crate::accounts::Accounts;
use crate::error::ServerError;

/// The signed-in account, even when it still has to replace a temporary
/// password.  Only the password change endpoint accepts this.
pub async fn signed_in(accounts: &Accounts, headers: &HeaderMap, header: &str) -> Result<User, ServerError> {
    let email = headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ServerError::Unauthorized)?;

    accounts.signed_in(email).await
}

/// The signed-in account, allowed to perform `action`.
pub async fn staff(
    accounts: &Accounts,
    headers: &HeaderMap,
    header: &str,
    action: Action,
) -> Result<User, ServerError> {
    let user = signed_in(accounts, headers, header).await?;
    if user.must_change_password {
        return Err(ServerError::Forbidden(
            "password change required before anything else".into(),
        ));
    }
    authorize(user.role, action)?;
    Ok(user)
}
