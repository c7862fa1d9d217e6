//! Gallery images attached to a color.
//!
//! Files themselves live outside the database; the store only keeps their
//! storage key.  Every write goes through [`on_image_saved`] so that a color
//! never ends up with two presentation images.

use chrono::Utc;
use nuancier_shared::constants::MAX_ALT_LEN;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::colors::fetch_color;
use crate::database::{parse_timestamp, Database};
use crate::error::{not_found, Result, StoreError};
use crate::models::{ColorGallery, ColorId, ColorImage, ImageId, ImagePatch, NewImage};
use crate::ordering::{self, SiblingScope};
use crate::presentation::{on_image_saved, UrlResolver};

const IMAGE_COLUMNS: &str = "id, color_id, file_key, file_url, is_presentation, position, alt, created_at";

impl Database {
    /// Attach already-stored files to a color.
    ///
    /// With `is_presentation`, the first file becomes the presentation image
    /// at position 0 and replaces any previous one; every other file is
    /// appended to the gallery in the given order.
    pub fn add_images<U>(
        &mut self,
        color_id: ColorId,
        files: &[NewImage],
        is_presentation: bool,
        urls: &U,
    ) -> Result<Vec<ColorImage>>
    where
        U: UrlResolver + ?Sized,
    {
        if files.is_empty() {
            return Err(StoreError::Validation("no files provided".into()));
        }
        for file in files {
            check_alt(&file.alt)?;
        }

        let tx = self.write_tx()?;
        fetch_color(&tx, color_id)?;

        let mut saved = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            let presentation = is_presentation && index == 0;
            let position = if presentation {
                0
            } else {
                ordering::next_position(&tx, SiblingScope::Gallery(color_id))?
            };
            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO color_images (color_id, file_key, is_presentation, position, alt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![color_id, file.file_key, presentation, position, file.alt, created_at.to_rfc3339()],
            )?;

            let mut image = ColorImage {
                id: ImageId(tx.last_insert_rowid()),
                color_id,
                file_key: file.file_key.clone(),
                file_url: String::new(),
                is_presentation: presentation,
                position,
                alt: file.alt.clone(),
                created_at,
            };
            on_image_saved(&tx, &mut image, urls)?;
            saved.push(image);
        }
        tx.commit()?;

        info!(color_id = %color_id, count = saved.len(), is_presentation, "images added");
        Ok(saved)
    }

    pub fn get_image(&self, color_id: ColorId, image_id: ImageId) -> Result<ColorImage> {
        fetch_image(self.conn(), color_id, image_id)
    }

    /// Every image of a color, presentation included, by position then id.
    pub fn list_images(&self, color_id: ColorId) -> Result<Vec<ColorImage>> {
        self.query_images(color_id, "")
    }

    /// The non-presentation images, in gallery order.
    pub fn gallery(&self, color_id: ColorId) -> Result<Vec<ColorImage>> {
        self.query_images(color_id, "AND is_presentation = 0")
    }

    pub fn presentation_image(&self, color_id: ColorId) -> Result<Option<ColorImage>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {IMAGE_COLUMNS} FROM color_images
                     WHERE color_id = ?1 AND is_presentation = 1
                     ORDER BY id DESC LIMIT 1"
                ),
                params![color_id],
                row_to_image,
            )
            .optional()
            .map_err(StoreError::Sqlite)
    }

    pub fn gallery_count(&self, color_id: ColorId) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM color_images WHERE color_id = ?1 AND is_presentation = 0",
            params![color_id],
            |row| row.get(0),
        )?)
    }

    /// A color with its presentation image kept apart from the ordered gallery.
    pub fn color_gallery(&self, color_id: ColorId) -> Result<ColorGallery> {
        let color = self.get_color(color_id)?;
        Ok(ColorGallery {
            color,
            presentation: self.presentation_image(color_id)?,
            gallery: self.gallery(color_id)?,
        })
    }

    /// Make `image_id` the presentation image of `color_id`.  Its position is
    /// left as is.
    pub fn set_presentation<U>(&mut self, color_id: ColorId, image_id: ImageId, urls: &U) -> Result<ColorImage>
    where
        U: UrlResolver + ?Sized,
    {
        self.update_image(
            color_id,
            image_id,
            &ImagePatch {
                alt: None,
                is_presentation: Some(true),
            },
            urls,
        )
    }

    /// Change an image's alt text and/or presentation flag.  Clearing the
    /// flag does not promote another image.
    pub fn update_image<U>(
        &mut self,
        color_id: ColorId,
        image_id: ImageId,
        patch: &ImagePatch,
        urls: &U,
    ) -> Result<ColorImage>
    where
        U: UrlResolver + ?Sized,
    {
        if patch.alt.is_none() && patch.is_presentation.is_none() {
            return Err(StoreError::Validation("no changes provided".into()));
        }
        if let Some(alt) = &patch.alt {
            check_alt(alt)?;
        }

        let tx = self.write_tx()?;
        let mut image = fetch_image(&tx, color_id, image_id)?;
        if let Some(alt) = &patch.alt {
            image.alt = alt.clone();
        }
        if let Some(flag) = patch.is_presentation {
            image.is_presentation = flag;
        }
        tx.execute(
            "UPDATE color_images SET alt = ?1, is_presentation = ?2 WHERE id = ?3",
            params![image.alt, image.is_presentation, image.id],
        )?;
        on_image_saved(&tx, &mut image, urls)?;
        tx.commit()?;

        if patch.is_presentation == Some(true) {
            info!(color_id = %color_id, image_id = %image_id, "presentation image set");
        }
        Ok(image)
    }

    /// Reorder the gallery of a color.  The presentation image is not part
    /// of the gallery and cannot appear in `ids`.
    pub fn reorder_gallery(&mut self, color_id: ColorId, ids: &[i64]) -> Result<()> {
        let tx = self.write_tx()?;
        fetch_color(&tx, color_id)?;
        ordering::reorder(&tx, SiblingScope::Gallery(color_id), ids)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete one image and return its storage key.
    pub fn delete_image(&mut self, color_id: ColorId, image_id: ImageId) -> Result<String> {
        let tx = self.write_tx()?;
        let image = fetch_image(&tx, color_id, image_id)?;
        tx.execute("DELETE FROM color_images WHERE id = ?1", params![image.id])?;
        tx.commit()?;

        info!(color_id = %color_id, image_id = %image_id, was_presentation = image.is_presentation, "image deleted");
        Ok(image.file_key)
    }

    fn query_images(&self, color_id: ColorId, extra: &str) -> Result<Vec<ColorImage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {IMAGE_COLUMNS} FROM color_images
             WHERE color_id = ?1 {extra}
             ORDER BY position ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![color_id], row_to_image)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

/// Scoped lookup: an image id under the wrong color is simply not found.
fn fetch_image(conn: &Connection, color_id: ColorId, image_id: ImageId) -> Result<ColorImage> {
    conn.query_row(
        &format!("SELECT {IMAGE_COLUMNS} FROM color_images WHERE id = ?1 AND color_id = ?2"),
        params![image_id, color_id],
        row_to_image,
    )
    .map_err(not_found("image"))
}

fn check_alt(alt: &str) -> Result<()> {
    if alt.chars().count() > MAX_ALT_LEN {
        return Err(StoreError::Validation(format!(
            "alt must be at most {MAX_ALT_LEN} characters"
        )));
    }
    Ok(())
}

pub(crate) fn row_to_image(row: &rusqlite::Row<'_>) -> rusqlite::Result<ColorImage> {
    let created_str: String = row.get(7)?;
    Ok(ColorImage {
        id: row.get(0)?,
        color_id: row.get(1)?,
        file_key: row.get(2)?,
        file_url: row.get(3)?,
        is_presentation: row.get(4)?,
        position: row.get(5)?,
        alt: row.get(6)?,
        created_at: parse_timestamp(7, &created_str)?,
    })
}
