//! Post-write step for image records.
//!
//! Every persist of a [`ColorImage`] is followed, inside the same
//! transaction, by [`on_image_saved`]: it keeps at most one presentation
//! image per color and refreshes the cached public URL.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::Result;
use crate::models::ColorImage;

/// Turns a storage key into the public URL clients should fetch.
pub trait UrlResolver {
    fn url_for(&self, file_key: &str) -> String;
}

/// Run after `image` has been written.
///
/// When `image` is flagged as presentation, the flag is cleared on every
/// other image of the same color in one statement.  A non-presentation save
/// never promotes another image, so a color may be left without one.
pub fn on_image_saved<U>(conn: &Connection, image: &mut ColorImage, urls: &U) -> Result<()>
where
    U: UrlResolver + ?Sized,
{
    if image.is_presentation {
        let demoted = conn.execute(
            "UPDATE color_images SET is_presentation = 0
             WHERE color_id = ?1 AND id <> ?2 AND is_presentation = 1",
            params![image.color_id, image.id],
        )?;
        if demoted > 0 {
            debug!(color_id = %image.color_id, image_id = %image.id, demoted, "presentation image replaced");
        }
    }

    let url = urls.url_for(&image.file_key);
    if url != image.file_url {
        conn.execute(
            "UPDATE color_images SET file_url = ?1 WHERE id = ?2",
            params![url, image.id],
        )?;
        image.file_url = url;
    }
    Ok(())
}
