//! Catalog operations as seen from the HTTP layer: store calls plus the media
//! files that go with them.

use std::sync::Arc;

use bytes::Bytes;
use nuancier_shared::Section;
use nuancier_store::{
    Color, ColorGallery, ColorGroup, ColorId, ColorImage, ColorPatch, ColorSummary, Database,
    GroupPatch, ImageId, ImagePatch, NewColor, NewGroup, NewImage, SectionCatalog,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::ServerError;
use crate::media_store::MediaStore;

/// One file received in a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

#[derive(Clone)]
pub struct Catalog {
    db: Arc<Mutex<Database>>,
    media: Arc<MediaStore>,
}

impl Catalog {
    pub fn new(db: Arc<Mutex<Database>>, media: Arc<MediaStore>) -> Self {
        Self { db, media }
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    pub async fn overview(&self) -> Result<Vec<SectionCatalog>, ServerError> {
        Ok(self.db.lock().await.catalog_overview()?)
    }

    pub async fn groups(&self, section: Section) -> Result<Vec<ColorGroup>, ServerError> {
        Ok(self.db.lock().await.list_groups(section)?)
    }

    pub async fn all_groups(&self) -> Result<Vec<ColorGroup>, ServerError> {
        Ok(self.db.lock().await.list_all_groups()?)
    }

    pub async fn create_group(&self, new: &NewGroup) -> Result<ColorGroup, ServerError> {
        Ok(self.db.lock().await.create_group(new)?)
    }

    pub async fn update_group(&self, slug: &str, patch: &GroupPatch) -> Result<ColorGroup, ServerError> {
        let mut db = self.db.lock().await;
        let group = db.get_group_by_slug(slug)?;
        Ok(db.update_group(group.id, patch)?)
    }

    /// Returns how many colors lost their group.
    pub async fn delete_group(&self, slug: &str) -> Result<usize, ServerError> {
        let mut db = self.db.lock().await;
        let group = db.get_group_by_slug(slug)?;
        Ok(db.delete_group(group.id)?)
    }

    pub async fn reorder_groups(&self, section: Section, ids: &[i64]) -> Result<(), ServerError> {
        Ok(self.db.lock().await.reorder_groups(section, ids)?)
    }

    // ------------------------------------------------------------------
    // Colors
    // ------------------------------------------------------------------

    pub async fn colors(&self) -> Result<Vec<ColorSummary>, ServerError> {
        Ok(self.db.lock().await.color_summaries()?)
    }

    pub async fn create_color(&self, group_slug: &str, name: &str) -> Result<Color, ServerError> {
        let mut db = self.db.lock().await;
        let group = db.get_group_by_slug(group_slug)?;
        Ok(db.create_color(&NewColor {
            name: name.to_string(),
            group_id: Some(group.id),
            position: None,
        })?)
    }

    /// `group_slug`: `None` keeps the group, `Some(None)` detaches the color.
    pub async fn update_color(
        &self,
        id: ColorId,
        name: Option<String>,
        position: Option<i64>,
        group_slug: Option<Option<String>>,
    ) -> Result<Color, ServerError> {
        let mut db = self.db.lock().await;
        let group = match group_slug {
            None => None,
            Some(None) => Some(None),
            Some(Some(slug)) => Some(Some(db.get_group_by_slug(&slug)?.id)),
        };
        Ok(db.update_color(
            id,
            &ColorPatch {
                name,
                position,
                group,
            },
        )?)
    }

    pub async fn reorder_group_colors(&self, group_slug: &str, ids: &[i64]) -> Result<(), ServerError> {
        let mut db = self.db.lock().await;
        let group = db.get_group_by_slug(group_slug)?;
        Ok(db.reorder_group_colors(group.id, ids)?)
    }

    /// Delete the color, its images, then their files.
    pub async fn delete_color(&self, id: ColorId) -> Result<(), ServerError> {
        let keys = self.db.lock().await.delete_color(id)?;
        self.media.release_all(&keys).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------

    pub async fn gallery(&self, id: ColorId) -> Result<ColorGallery, ServerError> {
        Ok(self.db.lock().await.color_gallery(id)?)
    }

    /// Write the files, then record them.  Files already written are removed
    /// again if anything after them fails.
    pub async fn upload_images(
        &self,
        id: ColorId,
        files: Vec<UploadedFile>,
        is_presentation: bool,
    ) -> Result<Vec<ColorImage>, ServerError> {
        if files.is_empty() {
            return Err(ServerError::BadRequest("no files provided".into()));
        }
        for file in &files {
            self.media.check_size(file.data.len())?;
        }
        let color = self.db.lock().await.get_color(id)?;

        let mut stored: Vec<String> = Vec::with_capacity(files.len());
        for file in &files {
            match self.media.store(&color.slug, &file.file_name, &file.data).await {
                Ok(key) => stored.push(key),
                Err(e) => {
                    self.media.release_all(&stored).await;
                    return Err(e);
                }
            }
        }

        let new_images: Vec<NewImage> = stored
            .iter()
            .map(|key| NewImage {
                file_key: key.clone(),
                alt: String::new(),
            })
            .collect();
        let saved = self
            .db
            .lock()
            .await
            .add_images(id, &new_images, is_presentation, self.media.as_ref());
        match saved {
            Ok(images) => {
                info!(color_id = %id, count = images.len(), "gallery upload stored");
                Ok(images)
            }
            Err(e) => {
                warn!(color_id = %id, error = %e, "gallery upload rejected, removing files");
                self.media.release_all(&stored).await;
                Err(e.into())
            }
        }
    }

    pub async fn reorder_gallery(&self, id: ColorId, ids: &[i64]) -> Result<(), ServerError> {
        Ok(self.db.lock().await.reorder_gallery(id, ids)?)
    }

    pub async fn set_presentation(&self, id: ColorId, image_id: ImageId) -> Result<ColorImage, ServerError> {
        Ok(self
            .db
            .lock()
            .await
            .set_presentation(id, image_id, self.media.as_ref())?)
    }

    pub async fn update_image(
        &self,
        id: ColorId,
        image_id: ImageId,
        patch: &ImagePatch,
    ) -> Result<ColorImage, ServerError> {
        Ok(self
            .db
            .lock()
            .await
            .update_image(id, image_id, patch, self.media.as_ref())?)
    }

    pub async fn delete_image(&self, id: ColorId, image_id: ImageId) -> Result<(), ServerError> {
        let key = self.db.lock().await.delete_image(id, image_id)?;
        self.media.release_all(&[key]).await;
        Ok(())
    }
}
