//! v001 -- Catalog schema.
//!
//! Creates `color_groups`, `colors` and `color_images` together with the
//! unique indexes that back slug and name uniqueness.  The groupless scope
//! is folded to `0` with `IFNULL` so that two colors without a group collide
//! exactly like two colors of the same group.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Color groups
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS color_groups (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT NOT NULL,
    slug     TEXT NOT NULL UNIQUE,                -- globally unique
    position INTEGER NOT NULL DEFAULT 0 CHECK (position >= 0),
    section  TEXT NOT NULL DEFAULT 'facades'
             CHECK (section IN ('facades', 'plans', 'espaces', 'ambiances'))
);

CREATE INDEX IF NOT EXISTS idx_color_groups_section_order
    ON color_groups(section, position, name);

-- ----------------------------------------------------------------
-- Colors
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS colors (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id   INTEGER,                           -- nullable FK -> color_groups(id)
    name       TEXT NOT NULL,
    name_key   TEXT NOT NULL,                     -- lower-cased name
    slug       TEXT NOT NULL,                     -- unique per group scope
    position   INTEGER NOT NULL DEFAULT 0 CHECK (position >= 0),
    clicks     INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,                     -- RFC-3339

    FOREIGN KEY (group_id) REFERENCES color_groups(id) ON DELETE SET NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uniq_color_slug_per_group
    ON colors(IFNULL(group_id, 0), slug);
CREATE UNIQUE INDEX IF NOT EXISTS uniq_color_name_ci_per_group
    ON colors(IFNULL(group_id, 0), name_key);
CREATE INDEX IF NOT EXISTS idx_colors_group_order
    ON colors(group_id, position, name);

-- ----------------------------------------------------------------
-- Color images
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS color_images (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    color_id        INTEGER NOT NULL,             -- FK -> colors(id)
    file_key        TEXT NOT NULL,                -- storage key under the media root
    file_url        TEXT NOT NULL DEFAULT '',     -- cached public URL
    is_presentation INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    position        INTEGER NOT NULL DEFAULT 0 CHECK (position >= 0),
    alt             TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL,

    FOREIGN KEY (color_id) REFERENCES colors(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_color_images_order
    ON color_images(color_id, position, id);
"#;

/// Apply the catalog migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
