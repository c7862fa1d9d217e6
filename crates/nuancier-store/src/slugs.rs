//! Slug uniqueness resolution.
//!
//! Given a base slug and a scope, find the first free identifier by probing
//! `base`, `base-2`, `base-3`, ...  The probe is only a pre-check: the unique
//! indexes on `color_groups(slug)` and `colors(IFNULL(group_id, 0), slug)`
//! stay authoritative, and [`write_with_unique_slug`] retries with the next
//! suffix when a write still hits them.

use nuancier_shared::slug;
use rusqlite::{params, Connection};
use tracing::{debug, warn};

use crate::error::{unique_violation, Result, StoreError};
use crate::models::GroupId;

/// Upper bound on write attempts after unique-constraint races.
pub const MAX_SLUG_ATTEMPTS: u32 = 5;

/// Where a slug has to be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlugScope {
    /// Across every color group, whatever the section.
    Global,
    /// Among the colors of one group; `None` is the groupless pseudo-scope.
    Group(Option<GroupId>),
}

/// Lookup over the slugs already present in a scope.
pub trait SlugLookup {
    /// Whether `candidate` is used in `scope` by a row other than `exclude`.
    fn slug_taken(&self, scope: SlugScope, candidate: &str, exclude: Option<i64>) -> Result<bool>;
}

impl SlugLookup for Connection {
    fn slug_taken(&self, scope: SlugScope, candidate: &str, exclude: Option<i64>) -> Result<bool> {
        let taken = match scope {
            SlugScope::Global => self.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM color_groups WHERE slug = ?1 AND id IS NOT ?2
                 )",
                params![candidate, exclude],
                |row| row.get(0),
            )?,
            SlugScope::Group(group_id) => self.query_row(
                "SELECT EXISTS(
                     SELECT 1 FROM colors
                     WHERE IFNULL(group_id, 0) = IFNULL(?1, 0) AND slug = ?2 AND id IS NOT ?3
                 )",
                params![group_id, candidate, exclude],
                |row| row.get(0),
            )?,
        };
        Ok(taken)
    }
}

/// First free slug for `base` in `scope`, ignoring the row `exclude` so that
/// re-saving an entity keeps its current slug.
pub fn resolve<L>(lookup: &L, base: &str, scope: SlugScope, exclude: Option<i64>) -> Result<String>
where
    L: SlugLookup + ?Sized,
{
    probe(lookup, base, scope, exclude, 1).map(|(candidate, _)| candidate)
}

/// Like [`resolve`], but starts probing at suffix `start` (1 = bare base).
pub fn resolve_from<L>(
    lookup: &L,
    base: &str,
    scope: SlugScope,
    exclude: Option<i64>,
    start: u32,
) -> Result<String>
where
    L: SlugLookup + ?Sized,
{
    probe(lookup, base, scope, exclude, start).map(|(candidate, _)| candidate)
}

fn probe<L>(
    lookup: &L,
    base: &str,
    scope: SlugScope,
    exclude: Option<i64>,
    start: u32,
) -> Result<(String, u32)>
where
    L: SlugLookup + ?Sized,
{
    let mut n = start.max(1);
    loop {
        let candidate = if n == 1 {
            base.to_string()
        } else {
            slug::suffixed(base, n)
        };
        if !lookup.slug_taken(scope, &candidate, exclude)? {
            if n > 1 {
                debug!(base, %candidate, ?scope, "slug collision resolved by suffix");
            }
            return Ok((candidate, n));
        }
        n += 1;
    }
}

/// Resolve a slug and hand it to `write`, retrying with the next suffix when
/// the write hits a slug unique constraint (a writer outside this lock got
/// there first).  Returns the write's output and the slug that was stored.
pub fn write_with_unique_slug<L, T, F>(
    lookup: &L,
    base: &str,
    scope: SlugScope,
    exclude: Option<i64>,
    mut write: F,
) -> Result<(T, String)>
where
    L: SlugLookup + ?Sized,
    F: FnMut(&str) -> Result<T>,
{
    let mut start = 1;
    for attempt in 1..=MAX_SLUG_ATTEMPTS {
        let (candidate, n) = probe(lookup, base, scope, exclude, start)?;
        match write(&candidate) {
            Ok(out) => return Ok((out, candidate)),
            Err(e) if is_slug_violation(&e) => {
                warn!(attempt, %candidate, ?scope, "slug taken concurrently, retrying");
                start = n + 1;
            }
            Err(e) => return Err(e),
        }
    }
    Err(StoreError::Conflict(format!(
        "could not claim a unique slug for {base:?} after {MAX_SLUG_ATTEMPTS} attempts"
    )))
}

fn is_slug_violation(err: &StoreError) -> bool {
    unique_violation(err).is_some_and(|msg| msg.contains("slug"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::database::test_support::open_temp;

    /// In-memory lookup: a flat set of taken slugs.
    struct Taken(HashSet<String>);

    impl SlugLookup for Taken {
        fn slug_taken(&self, _: SlugScope, candidate: &str, _: Option<i64>) -> Result<bool> {
            Ok(self.0.contains(candidate))
        }
    }

    /// A stale lookup that never sees anything, as if another writer had
    /// inserted between our check and our write.
    struct Blind;

    impl SlugLookup for Blind {
        fn slug_taken(&self, _: SlugScope, _: &str, _: Option<i64>) -> Result<bool> {
            Ok(false)
        }
    }

    fn taken(slugs: &[&str]) -> Taken {
        Taken(slugs.iter().map(|s| s.to_string()).collect())
    }

    fn slug_violation() -> StoreError {
        StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: color_groups.slug".into()),
        ))
    }

    #[test]
    fn free_base_is_returned_as_is() {
        let slug = resolve(&taken(&[]), "avocado", SlugScope::Global, None).unwrap();
        assert_eq!(slug, "avocado");
    }

    #[test]
    fn collisions_probe_incrementing_suffixes() {
        let lookup = taken(&["avocado", "avocado-2", "avocado-4"]);
        let slug = resolve(&lookup, "avocado", SlugScope::Global, None).unwrap();
        assert_eq!(slug, "avocado-3");
    }

    #[test]
    fn resolve_from_skips_lower_suffixes() {
        let slug = resolve_from(&taken(&[]), "sky", SlugScope::Global, None, 3).unwrap();
        assert_eq!(slug, "sky-3");
    }

    #[test]
    fn connection_lookup_respects_scope_and_exclusion() {
        let (db, _dir) = open_temp();
        let conn = db.conn();
        conn.execute_batch(
            "INSERT INTO color_groups (id, name, slug, section) VALUES (1, 'Blues', 'blues', 'facades');
             INSERT INTO colors (id, group_id, name, name_key, slug, created_at)
                 VALUES (10, 1, 'Sky', 'sky', 'sky', '2024-01-01T00:00:00Z');
             INSERT INTO colors (id, group_id, name, name_key, slug, created_at)
                 VALUES (11, NULL, 'Loose', 'loose', 'loose', '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        let in_blues = SlugScope::Group(Some(GroupId(1)));
        assert!(conn.slug_taken(in_blues, "sky", None).unwrap());
        assert!(!conn.slug_taken(in_blues, "sky", Some(10)).unwrap());
        assert!(!conn.slug_taken(SlugScope::Group(None), "sky", None).unwrap());
        assert!(conn.slug_taken(SlugScope::Group(None), "loose", None).unwrap());
        assert!(conn.slug_taken(SlugScope::Global, "blues", None).unwrap());
        assert!(!conn.slug_taken(SlugScope::Global, "blues", Some(1)).unwrap());
    }

    #[test]
    fn stale_precheck_retries_past_constraint() {
        let (db, _dir) = open_temp();
        let conn = db.conn();
        conn.execute_batch(
            "INSERT INTO color_groups (name, slug, section) VALUES ('Blues', 'blues', 'facades');
             INSERT INTO color_groups (name, slug, section) VALUES ('Blues', 'blues-2', 'plans');",
        )
        .unwrap();

        let (_, slug) = write_with_unique_slug(&Blind, "blues", SlugScope::Global, None, |candidate| {
            conn.execute(
                "INSERT INTO color_groups (name, slug, section) VALUES ('Blues', ?1, 'espaces')",
                params![candidate],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(slug, "blues-3");
    }

    #[test]
    fn stale_precheck_retries_past_color_slug_index() {
        let (db, _dir) = open_temp();
        let conn = db.conn();
        conn.execute_batch(
            "INSERT INTO color_groups (id, name, slug, section) VALUES (1, 'Blues', 'blues', 'facades');
             INSERT INTO colors (group_id, name, name_key, slug, created_at)
                 VALUES (1, 'Sky', 'sky', 'sky', '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        let scope = SlugScope::Group(Some(GroupId(1)));
        let (_, slug) = write_with_unique_slug(&Blind, "sky", scope, None, |candidate| {
            conn.execute(
                "INSERT INTO colors (group_id, name, name_key, slug, created_at)
                 VALUES (1, 'Sky!', 'sky!', ?1, '2024-01-01T00:00:00Z')",
                params![candidate],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(slug, "sky-2");
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut calls = 0;
        let result = write_with_unique_slug(&Blind, "blues", SlugScope::Global, None, |_| {
            calls += 1;
            Err::<(), _>(slug_violation())
        });

        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert_eq!(calls, MAX_SLUG_ATTEMPTS);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result = write_with_unique_slug(&Blind, "blues", SlugScope::Global, None, |_| {
            calls += 1;
            Err::<(), _>(StoreError::NotFound("group"))
        });

        assert!(matches!(result, Err(StoreError::NotFound("group"))));
        assert_eq!(calls, 1);
    }
}
