//! Position sequencing for groups, colors and gallery images.
//!
//! Positions are only touched by creation ([`next_position`]) and explicit
//! reorders ([`reorder`]); renames never move anything.  Callers run both
//! inside their write transaction.

use std::collections::HashSet;

use nuancier_shared::Section;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::models::{ColorId, GroupId};

/// A set of siblings sharing one ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingScope {
    /// Groups of a section.
    Section(Section),
    /// Colors of a group; `None` is the groupless pseudo-scope.
    Group(Option<GroupId>),
    /// Non-presentation images of a color.
    Gallery(ColorId),
}

impl SiblingScope {
    /// Table, filter on `?1`, and the value bound to `?1`.
    fn parts(&self) -> (&'static str, &'static str, Value) {
        match self {
            SiblingScope::Section(section) => (
                "color_groups",
                "section = ?1",
                Value::Text(section.as_str().to_string()),
            ),
            SiblingScope::Group(group_id) => (
                "colors",
                "IFNULL(group_id, 0) = IFNULL(?1, 0)",
                group_id.map_or(Value::Null, |g| Value::Integer(g.0)),
            ),
            SiblingScope::Gallery(color_id) => (
                "color_images",
                "color_id = ?1 AND is_presentation = 0",
                Value::Integer(color_id.0),
            ),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            SiblingScope::Section(_) => "this section",
            SiblingScope::Group(_) => "this group",
            SiblingScope::Gallery(_) => "this color's gallery",
        }
    }
}

/// `max(position) + 1` over the scope, or `1` when it is empty.
pub fn next_position(conn: &Connection, scope: SiblingScope) -> Result<i64> {
    let (table, filter, value) = scope.parts();
    let max: Option<i64> = conn.query_row(
        &format!("SELECT MAX(position) FROM {table} WHERE {filter}"),
        params![value],
        |row| row.get(0),
    )?;
    Ok(max.map_or(1, |m| m + 1))
}

/// Assign `position = index` to every id of `ids`, in order.
///
/// The whole list is validated before anything is written: duplicates, ids
/// outside `scope` (including, for a gallery, the presentation image) make
/// the call fail with [`StoreError::Validation`] and leave every position
/// untouched.  Ids not listed keep their position.
pub fn reorder(conn: &Connection, scope: SiblingScope, ids: &[i64]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
        return Err(StoreError::Validation(format!(
            "id {dup} appears more than once in order"
        )));
    }

    let (table, filter, value) = scope.parts();
    let mut belongs = conn.prepare(&format!(
        "SELECT EXISTS(SELECT 1 FROM {table} WHERE {filter} AND id = ?2)"
    ))?;
    let mut foreign = Vec::new();
    for id in ids {
        let ok: bool = belongs.query_row(params![value, id], |row| row.get(0))?;
        if !ok {
            foreign.push(id.to_string());
        }
    }
    if !foreign.is_empty() {
        return Err(StoreError::Validation(format!(
            "ids [{}] do not belong to {}",
            foreign.join(", "),
            scope.describe()
        )));
    }

    let mut update = conn.prepare(&format!("UPDATE {table} SET position = ?1 WHERE id = ?2"))?;
    for (position, id) in ids.iter().enumerate() {
        update.execute(params![position as i64, id])?;
    }

    debug!(?scope, count = ids.len(), "reordered siblings");
    Ok(())
}

/// Read a reorder payload: it must be a JSON array of integers.
pub fn parse_identity_list(value: &serde_json::Value) -> Result<Vec<i64>> {
    let invalid = || StoreError::Validation("order must be a list of integers".into());
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|item| item.as_i64().ok_or_else(invalid))
        .collect()
}
