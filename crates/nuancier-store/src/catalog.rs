//! Read-side assembly of the public catalog.

use nuancier_shared::Section;

use crate::database::Database;
use crate::error::Result;
use crate::models::{Color, ColorSummary, GroupWithColors, SectionCatalog};

impl Database {
    /// Sections in catalog order, each with its groups, their colors and the
    /// colors' presentation images.  Groupless colors are not part of it.
    pub fn catalog_overview(&self) -> Result<Vec<SectionCatalog>> {
        let mut sections = Vec::with_capacity(Section::ALL.len());
        for section in Section::ALL {
            let mut groups = Vec::new();
            for group in self.list_groups(section)? {
                let colors = self
                    .list_colors(Some(group.id))?
                    .into_iter()
                    .map(|color| self.summarize(color, Some(group.slug.clone())))
                    .collect::<Result<Vec<_>>>()?;
                groups.push(GroupWithColors { group, colors });
            }
            sections.push(SectionCatalog {
                section,
                label: section.label(),
                groups,
            });
        }
        Ok(sections)
    }

    /// Every color as a summary; see [`Database::list_all_colors`] for the order.
    pub fn color_summaries(&self) -> Result<Vec<ColorSummary>> {
        self.list_all_colors()?
            .into_iter()
            .map(|(color, group_slug)| self.summarize(color, group_slug))
            .collect()
    }

    fn summarize(&self, color: Color, group_slug: Option<String>) -> Result<ColorSummary> {
        Ok(ColorSummary {
            presentation: self.presentation_image(color.id)?,
            gallery_count: self.gallery_count(color.id)?,
            group_slug,
            color,
        })
    }
}
