//! Domain model structs persisted in the catalog database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer as JSON.

use std::fmt;

use chrono::{DateTime, Utc};
use nuancier_shared::constants::MAX_NAME_LEN;
use nuancier_shared::{Role, Section};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

entity_id!(
    /// Row id of a [`ColorGroup`].
    GroupId
);
entity_id!(
    /// Row id of a [`Color`].
    ColorId
);
entity_id!(
    /// Row id of a [`ColorImage`].
    ImageId
);
entity_id!(
    /// Row id of a [`User`].
    UserId
);

// ---------------------------------------------------------------------------
// ColorGroup
// ---------------------------------------------------------------------------

/// A named bucket of colors within one section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorGroup {
    pub id: GroupId,
    /// Display name.  Not unique: the same label may exist in several sections.
    pub name: String,
    /// Globally unique URL identifier.
    pub slug: String,
    /// Ordering key within the section, ties broken by name.
    pub position: i64,
    pub section: Section,
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub section: Section,
    /// Explicit position; appended after the last group of the section when `None`.
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub position: Option<i64>,
}

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// One swatch, optionally inside a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Color {
    pub id: ColorId,
    /// Owning group; `None` once the group has been deleted (or never set).
    pub group_id: Option<GroupId>,
    pub name: String,
    /// Unique within the group scope, not globally.
    pub slug: String,
    pub position: i64,
    pub clicks: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewColor {
    pub name: String,
    pub group_id: Option<GroupId>,
    pub position: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ColorPatch {
    pub name: Option<String>,
    pub position: Option<i64>,
    /// `Some(None)` moves the color out of any group.
    pub group: Option<Option<GroupId>>,
}

// ---------------------------------------------------------------------------
// ColorImage
// ---------------------------------------------------------------------------

/// One image of a color's gallery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorImage {
    pub id: ImageId,
    pub color_id: ColorId,
    /// Storage key relative to the media root.
    pub file_key: String,
    /// Cached public URL, refreshed after every write of the record.
    pub file_url: String,
    pub is_presentation: bool,
    /// Ordering key within the gallery, ties broken by id.
    pub position: i64,
    pub alt: String,
    pub created_at: DateTime<Utc>,
}

/// An already-stored file to attach to a color.
#[derive(Debug, Clone, Default)]
pub struct NewImage {
    pub file_key: String,
    pub alt: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImagePatch {
    pub alt: Option<String>,
    pub is_presentation: Option<bool>,
}

// ---------------------------------------------------------------------------
// Read models
// ---------------------------------------------------------------------------

/// A color as listed in the catalog: its presentation image and the size of
/// the remaining gallery.
#[derive(Debug, Clone, Serialize)]
pub struct ColorSummary {
    #[serde(flatten)]
    pub color: Color,
    pub group_slug: Option<String>,
    pub presentation: Option<ColorImage>,
    pub gallery_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupWithColors {
    #[serde(flatten)]
    pub group: ColorGroup,
    pub colors: Vec<ColorSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionCatalog {
    pub section: Section,
    pub label: &'static str,
    pub groups: Vec<GroupWithColors>,
}

/// Presentation image kept apart from the ordered gallery.
#[derive(Debug, Clone, Serialize)]
pub struct ColorGallery {
    pub color: Color,
    pub presentation: Option<ColorImage>,
    pub gallery: Vec<ColorImage>,
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A back-office account.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    /// Lower-cased, unique.
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    /// Set for new accounts and after an admin-triggered reset.
    pub must_change_password: bool,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

/// A pending (or spent) password reset.  Only the token hash is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetToken {
    pub id: i64,
    pub user_id: UserId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Input checks
// ---------------------------------------------------------------------------

/// Trim a display name and reject empty / oversized ones.
pub(crate) fn clean_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StoreError::Validation("name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(StoreError::Validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

/// Case-folded form used by the per-group name uniqueness index.
pub(crate) fn name_key(name: &str) -> String {
    name.to_lowercase()
}

pub(crate) fn check_position(position: Option<i64>) -> Result<()> {
    match position {
        Some(p) if p < 0 => Err(StoreError::Validation(
            "position must be a non-negative integer".into(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_name_trims_and_rejects_blank() {
        assert_eq!(clean_name("  Sky ").unwrap(), "Sky");
        assert!(matches!(clean_name("   "), Err(StoreError::Validation(_))));
        assert!(clean_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn name_key_folds_unicode() {
        assert_eq!(name_key("ÉCLAT"), name_key("éclat"));
    }

    #[test]
    fn ids_serialize_as_plain_integers() {
        let json = serde_json::to_string(&ColorId(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn password_hash_never_serialized() {
        let user = User {
            id: UserId(1),
            email: "a@b.c".into(),
            username: "a".into(),
            first_name: String::new(),
            last_name: String::new(),
            role: Role::Admin,
            is_active: true,
            must_change_password: false,
            password_hash: "$argon2id$secret".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "ADMIN");
    }
}
