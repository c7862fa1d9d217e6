//! # nuancier-store
//!
//! Catalog storage for Nuancier, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for groups,
//! colors, gallery images and back-office accounts.  Slug uniqueness,
//! position sequencing and the single-presentation-image rule are enforced
//! here, inside the write transaction of each operation.

pub mod catalog;
pub mod colors;
pub mod database;
pub mod groups;
pub mod images;
pub mod migrations;
pub mod models;
pub mod ordering;
pub mod presentation;
pub mod slugs;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use ordering::{parse_identity_list, SiblingScope};
pub use presentation::UrlResolver;
pub use slugs::SlugScope;
