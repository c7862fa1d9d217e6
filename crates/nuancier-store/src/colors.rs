//! CRUD operations for [`Color`] records.
//!
//! A color's slug and case-folded name are unique within its group scope,
//! where "no group" is a scope of its own.  Names are checked up front so
//! the caller gets a [`StoreError::DuplicateName`]; the unique indexes catch
//! whatever slips past the check.

use chrono::Utc;
use nuancier_shared::slug::{self, SlugKind};
use rusqlite::{params, Connection};
use tracing::info;

use crate::database::{parse_timestamp, Database};
use crate::error::{not_found, unique_violation, Result, StoreError};
use crate::groups::fetch_group;
use crate::models::{check_position, clean_name, name_key, Color, ColorId, ColorPatch, GroupId, NewColor};
use crate::ordering::{self, SiblingScope};
use crate::slugs::{self, SlugScope};

const COLOR_COLUMNS: &str = "c.id, c.group_id, c.name, c.slug, c.position, c.clicks, c.created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new color under `new.group_id` (or without group).
    pub fn create_color(&mut self, new: &NewColor) -> Result<Color> {
        let name = clean_name(&new.name)?;
        check_position(new.position)?;

        let tx = self.write_tx()?;
        if let Some(group_id) = new.group_id {
            fetch_group(&tx, group_id)?;
        }
        ensure_name_free(&tx, new.group_id, &name, None)?;

        let position = match new.position {
            Some(p) => p,
            None => ordering::next_position(&tx, SiblingScope::Group(new.group_id))?,
        };
        let created_at = Utc::now();
        let key = name_key(&name);

        let base = slug::generate_base(&name, SlugKind::Color);
        let scope = SlugScope::Group(new.group_id);
        let (id, slug) = slugs::write_with_unique_slug(&*tx, &base, scope, None, |candidate| {
            tx.execute(
                "INSERT INTO colors (group_id, name, name_key, slug, position, clicks, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                params![new.group_id, name, key, candidate, position, created_at.to_rfc3339()],
            )
            .map_err(|e| duplicate_name_or(e.into(), &name))?;
            Ok(ColorId(tx.last_insert_rowid()))
        })?;
        tx.commit()?;

        info!(color_id = %id, %slug, group_id = ?new.group_id, "color created");
        Ok(Color {
            id,
            group_id: new.group_id,
            name,
            slug,
            position,
            clicks: 0,
            created_at,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_color(&self, id: ColorId) -> Result<Color> {
        fetch_color(self.conn(), id)
    }

    /// Colors of one group scope, ordered by position then name.
    pub fn list_colors(&self, group_id: Option<GroupId>) -> Result<Vec<Color>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLOR_COLUMNS} FROM colors c
             WHERE IFNULL(c.group_id, 0) = IFNULL(?1, 0)
             ORDER BY c.position ASC, c.name ASC"
        ))?;
        let rows = stmt.query_map(params![group_id], row_to_color)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Every color with its group's slug, ordered by group position, then
    /// position and name.  Groupless colors come last.
    pub fn list_all_colors(&self) -> Result<Vec<(Color, Option<String>)>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLOR_COLUMNS}, g.slug FROM colors c
             LEFT JOIN color_groups g ON g.id = c.group_id
             ORDER BY g.position IS NULL, g.position ASC, c.position ASC, c.name ASC"
        ))?;
        let rows = stmt.query_map([], |row| Ok((row_to_color(row)?, row.get(7)?)))?;

        let mut colors = Vec::new();
        for row in rows {
            colors.push(row?);
        }
        Ok(colors)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Rename, reposition or move a color.  The slug is recomputed when the
    /// name or the group scope changes and kept otherwise.
    pub fn update_color(&mut self, id: ColorId, patch: &ColorPatch) -> Result<Color> {
        let new_name = patch.name.as_deref().map(clean_name).transpose()?;
        check_position(patch.position)?;

        let tx = self.write_tx()?;
        let mut color = fetch_color(&tx, id)?;

        let group_id = patch.group.unwrap_or(color.group_id);
        if let Some(target) = group_id.filter(|_| group_id != color.group_id) {
            fetch_group(&tx, target)?;
        }
        let name = new_name.unwrap_or_else(|| color.name.clone());

        let scope_changed = group_id != color.group_id;
        let name_changed = name != color.name;

        if scope_changed || name_changed {
            ensure_name_free(&tx, group_id, &name, Some(id))?;
            let key = name_key(&name);
            let base = slug::generate_base(&name, SlugKind::Color);
            let (_, slug) =
                slugs::write_with_unique_slug(&*tx, &base, SlugScope::Group(group_id), Some(id.0), |candidate| {
                    tx.execute(
                        "UPDATE colors SET group_id = ?1, name = ?2, name_key = ?3, slug = ?4 WHERE id = ?5",
                        params![group_id, name, key, candidate, id],
                    )
                    .map_err(|e| duplicate_name_or(e.into(), &name))?;
                    Ok(())
                })?;
            if slug != color.slug {
                info!(color_id = %id, old_slug = %color.slug, new_slug = %slug, "color slug changed");
            }
            color.group_id = group_id;
            color.name = name;
            color.slug = slug;
        }

        if let Some(position) = patch.position {
            tx.execute(
                "UPDATE colors SET position = ?1 WHERE id = ?2",
                params![position, id],
            )?;
            color.position = position;
        }

        tx.commit()?;
        Ok(color)
    }

    /// Reorder the colors of a group; see [`ordering::reorder`].
    pub fn reorder_group_colors(&mut self, group_id: GroupId, ids: &[i64]) -> Result<()> {
        let tx = self.write_tx()?;
        fetch_group(&tx, group_id)?;
        ordering::reorder(&tx, SiblingScope::Group(Some(group_id)), ids)?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a color and, through ON DELETE CASCADE, its images.  Returns
    /// the storage keys of the removed images so their files can be released.
    pub fn delete_color(&mut self, id: ColorId) -> Result<Vec<String>> {
        let tx = self.write_tx()?;
        fetch_color(&tx, id)?;

        let file_keys: Vec<String> = {
            let mut stmt = tx.prepare("SELECT file_key FROM color_images WHERE color_id = ?1")?;
            let rows = stmt.query_map(params![id], |row| row.get(0))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        tx.execute("DELETE FROM colors WHERE id = ?1", params![id])?;
        tx.commit()?;

        info!(color_id = %id, images = file_keys.len(), "color deleted");
        Ok(file_keys)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn fetch_color(conn: &Connection, id: ColorId) -> Result<Color> {
    conn.query_row(
        &format!("SELECT {COLOR_COLUMNS} FROM colors c WHERE c.id = ?1"),
        params![id],
        row_to_color,
    )
    .map_err(not_found("color"))
}

fn ensure_name_free(
    conn: &Connection,
    group_id: Option<GroupId>,
    name: &str,
    exclude: Option<ColorId>,
) -> Result<()> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM colors
             WHERE IFNULL(group_id, 0) = IFNULL(?1, 0) AND name_key = ?2 AND id IS NOT ?3
         )",
        params![group_id, name_key(name), exclude],
        |row| row.get(0),
    )?;
    if taken {
        return Err(StoreError::DuplicateName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// A unique violation on the name index means a concurrent writer took the
/// name; anything else passes through (slug violations are retried upstream).
fn duplicate_name_or(err: StoreError, name: &str) -> StoreError {
    match unique_violation(&err) {
        Some(msg) if msg.contains("name") => StoreError::DuplicateName {
            name: name.to_string(),
        },
        _ => err,
    }
}

/// Map a `rusqlite::Row` to a [`Color`].
pub(crate) fn row_to_color(row: &rusqlite::Row<'_>) -> rusqlite::Result<Color> {
    let created_str: String = row.get(6)?;
    Ok(Color {
        id: row.get(0)?,
        group_id: row.get(1)?,
        name: row.get(2)?,
        slug: row.get(3)?,
        position: row.get(4)?,
        clicks: row.get(5)?,
        created_at: parse_timestamp(6, &created_str)?,
    })
}
