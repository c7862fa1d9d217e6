//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use nuancier_shared::constants::{APP_NAME, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None`, i.e. the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Directory uploaded images are written under.
    /// Env: `MEDIA_ROOT`
    /// Default: `./media`
    pub media_root: PathBuf,

    /// URL prefix the media root is served from.
    /// Env: `MEDIA_BASE_URL`
    /// Default: `/media`
    pub media_base_url: String,

    /// Maximum size of one uploaded file, in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    pub max_upload_size: usize,

    /// Header carrying the email of the user signed in at the proxy.
    /// Env: `AUTH_EMAIL_HEADER`
    /// Default: `x-auth-email`
    pub auth_email_header: String,

    /// Absolute base used to build links in outgoing mail.
    /// Env: `PUBLIC_BASE_URL`
    pub public_base_url: String,

    /// Lifetime of a password reset link.
    /// Env: `RESET_TOKEN_TTL_MINUTES`
    /// Default: `60`
    pub reset_token_ttl_minutes: i64,

    /// Env: `MAIL_FROM`
    pub mail_from: String,

    /// Name used in mail subjects.
    /// Env: `SITE_NAME`
    pub site_name: String,

    /// Admin account created at startup while no account exists yet.
    /// Env: `BOOTSTRAP_ADMIN_EMAIL`
    /// Default: empty (no bootstrap).
    pub bootstrap_admin_email: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            media_root: PathBuf::from("./media"),
            media_base_url: "/media".to_string(),
            max_upload_size: 20 * 1024 * 1024, // 20 MiB
            auth_email_header: "x-auth-email".to_string(),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            reset_token_ttl_minutes: 60,
            mail_from: "no-reply@nuancier.local".to_string(),
            site_name: APP_NAME.to_string(),
            bootstrap_admin_email: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(path) = lookup("MEDIA_ROOT").filter(|p| !p.is_empty()) {
            config.media_root = PathBuf::from(path);
        }

        if let Some(url) = lookup("MEDIA_BASE_URL") {
            config.media_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(val) = lookup("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        if let Some(header) = lookup("AUTH_EMAIL_HEADER") {
            match axum::http::HeaderName::from_bytes(header.trim().as_bytes()) {
                Ok(name) => config.auth_email_header = name.as_str().to_string(),
                Err(_) => tracing::warn!(value = %header, "Invalid AUTH_EMAIL_HEADER, using default"),
            }
        }

        if let Some(url) = lookup("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(val) = lookup("RESET_TOKEN_TTL_MINUTES") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.reset_token_ttl_minutes = n,
                _ => tracing::warn!(value = %val, "Invalid RESET_TOKEN_TTL_MINUTES, using default"),
            }
        }

        if let Some(from) = lookup("MAIL_FROM") {
            config.mail_from = from;
        }

        if let Some(name) = lookup("SITE_NAME") {
            config.site_name = name;
        }

        if let Some(email) = lookup("BOOTSTRAP_ADMIN_EMAIL") {
            if !email.trim().is_empty() {
                config.bootstrap_admin_email = Some(email.trim().to_string());
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}
