//! CRUD operations for [`ColorGroup`] records.

use nuancier_shared::constants::MAX_NAME_LEN;
use nuancier_shared::slug::{self, SlugKind};
use nuancier_shared::Section;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::database::{parse_column, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{check_position, clean_name, name_key, ColorGroup, GroupId, GroupPatch, NewGroup};
use crate::ordering::{self, SiblingScope};
use crate::slugs::{self, SlugScope};

const GROUP_COLUMNS: &str = "id, name, slug, position, section";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new group with a globally unique slug.  Without an explicit
    /// position the group goes after the last one of its section.
    pub fn create_group(&mut self, new: &NewGroup) -> Result<ColorGroup> {
        let name = clean_name(&new.name)?;
        check_position(new.position)?;

        let tx = self.write_tx()?;
        let position = match new.position {
            Some(p) => p,
            None => ordering::next_position(&tx, SiblingScope::Section(new.section))?,
        };

        let base = slug::generate_base(&name, SlugKind::Group);
        let (id, slug) = slugs::write_with_unique_slug(&*tx, &base, SlugScope::Global, None, |candidate| {
            tx.execute(
                "INSERT INTO color_groups (name, slug, position, section)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, candidate, position, new.section.as_str()],
            )?;
            Ok(GroupId(tx.last_insert_rowid()))
        })?;
        tx.commit()?;

        info!(group_id = %id, %slug, section = %new.section, "group created");
        Ok(ColorGroup {
            id,
            name,
            slug,
            position,
            section: new.section,
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_group(&self, id: GroupId) -> Result<ColorGroup> {
        fetch_group(self.conn(), id)
    }

    pub fn get_group_by_slug(&self, slug: &str) -> Result<ColorGroup> {
        self.conn()
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM color_groups WHERE slug = ?1"),
                params![slug],
                row_to_group,
            )
            .map_err(not_found("group"))
    }

    /// Groups of one section, ordered by position then name.
    pub fn list_groups(&self, section: Section) -> Result<Vec<ColorGroup>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {GROUP_COLUMNS} FROM color_groups
             WHERE section = ?1
             ORDER BY position ASC, name ASC"
        ))?;
        let rows = stmt.query_map(params![section.as_str()], row_to_group)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Every group, section by section in catalog order.
    pub fn list_all_groups(&self) -> Result<Vec<ColorGroup>> {
        let mut groups = Vec::new();
        for section in Section::ALL {
            groups.extend(self.list_groups(section)?);
        }
        Ok(groups)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Rename and/or move a group.  The slug is regenerated only when the
    /// name actually changes; the slugs of the group's colors are left alone.
    pub fn update_group(&mut self, id: GroupId, patch: &GroupPatch) -> Result<ColorGroup> {
        let new_name = patch.name.as_deref().map(clean_name).transpose()?;
        check_position(patch.position)?;

        let tx = self.write_tx()?;
        let mut group = fetch_group(&tx, id)?;

        if let Some(name) = new_name.filter(|n| *n != group.name) {
            let base = slug::generate_base(&name, SlugKind::Group);
            let (_, slug) =
                slugs::write_with_unique_slug(&*tx, &base, SlugScope::Global, Some(id.0), |candidate| {
                    tx.execute(
                        "UPDATE color_groups SET name = ?1, slug = ?2 WHERE id = ?3",
                        params![name, candidate, id],
                    )?;
                    Ok(())
                })?;
            info!(group_id = %id, old_slug = %group.slug, new_slug = %slug, "group renamed");
            group.name = name;
            group.slug = slug;
        }

        if let Some(position) = patch.position {
            tx.execute(
                "UPDATE color_groups SET position = ?1 WHERE id = ?2",
                params![position, id],
            )?;
            group.position = position;
        }

        tx.commit()?;
        Ok(group)
    }

    /// Reorder the groups of a section; see [`ordering::reorder`].
    pub fn reorder_groups(&mut self, section: Section, ids: &[i64]) -> Result<()> {
        let tx = self.write_tx()?;
        ordering::reorder(&tx, SiblingScope::Section(section), ids)?;
        tx.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a group.  Its colors survive without a group.
    ///
    /// Orphans join the groupless scope, which has its own slug and name
    /// uniqueness.  Their slugs are resolved again from the name in that
    /// scope, and colliding names get a ` (n)` suffix before the group row
    /// goes away.  Returns the number of
    /// orphaned colors.
    pub fn delete_group(&mut self, id: GroupId) -> Result<usize> {
        let tx = self.write_tx()?;
        fetch_group(&tx, id)?;

        let orphans: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, name FROM colors
                 WHERE group_id = ?1
                 ORDER BY position ASC, name ASC",
            )?;
            let rows = stmt.query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        for (color_id, name) in &orphans {
            let base = slug::generate_base(name, SlugKind::Color);
            let slug = slugs::resolve(&*tx, &base, SlugScope::Group(None), Some(*color_id))?;
            let name = free_groupless_name(&tx, name)?;
            tx.execute(
                "UPDATE colors SET group_id = NULL, name = ?1, name_key = ?2, slug = ?3 WHERE id = ?4",
                params![name, name_key(&name), slug, color_id],
            )?;
        }

        tx.execute("DELETE FROM color_groups WHERE id = ?1", params![id])?;
        tx.commit()?;

        info!(group_id = %id, orphaned = orphans.len(), "group deleted");
        Ok(orphans.len())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn fetch_group(conn: &Connection, id: GroupId) -> Result<ColorGroup> {
    conn.query_row(
        &format!("SELECT {GROUP_COLUMNS} FROM color_groups WHERE id = ?1"),
        params![id],
        row_to_group,
    )
    .map_err(not_found("group"))
}

/// `name`, or `name (2)`, `name (3)`, ... whichever is free among groupless
/// colors.  The stem is shortened so the result stays within `MAX_NAME_LEN`.
fn free_groupless_name(conn: &Connection, name: &str) -> Result<String> {
    let mut candidate = name.to_string();
    let mut n = 2;
    loop {
        let clash: Option<i64> = conn
            .query_row(
                "SELECT id FROM colors WHERE group_id IS NULL AND name_key = ?1",
                params![name_key(&candidate)],
                |row| row.get(0),
            )
            .optional()?;
        if clash.is_none() {
            return Ok(candidate);
        }
        candidate = with_counter(name, n);
        n += 1;
    }
}

fn with_counter(name: &str, n: u32) -> String {
    let suffix = format!(" ({n})");
    let room = MAX_NAME_LEN.saturating_sub(suffix.chars().count());
    let stem: String = name.chars().take(room).collect();
    format!("{}{suffix}", stem.trim_end())
}

/// Map a `rusqlite::Row` to a [`ColorGroup`].
pub(crate) fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<ColorGroup> {
    let section: String = row.get(4)?;
    Ok(ColorGroup {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        position: row.get(3)?,
        section: parse_column(4, &section)?,
    })
}
