use crate::model::{GroupId, ImageId, OmitReason, PageId, PlacementId, TextureProperties};
use crate::palette_image::PaletteImage;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// The images of one group that share a set of texture properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub group: GroupId,
    pub properties: TextureProperties,
    pub images: Vec<ImageId>,
    /// Placements waiting for the next `page_place_all`.
    #[serde(skip)]
    pub(crate) assigned: Vec<PlacementId>,
}

impl Page {
    pub fn new(group: GroupId, properties: TextureProperties) -> Self {
        Self {
            group,
            properties,
            images: Vec::new(),
            assigned: Vec::new(),
        }
    }
}

impl Session {
    /// The page of `group` for textures with `properties`, created on first use.
    pub fn get_page(&mut self, group: GroupId, properties: TextureProperties) -> PageId {
        if let Some(&page) = self.groups[group].pages.get(&properties) {
            return page;
        }
        let page = self.pages.insert(Page::new(group, properties));
        self.groups[group].pages.insert(properties, page);
        page
    }

    pub fn page_assign(&mut self, page: PageId, placement: PlacementId) {
        self.pages[page].assigned.push(placement);
    }

    /// Packs every assigned placement, biggest first.
    pub fn page_place_all(&mut self, page: PageId) {
        let mut assigned = std::mem::take(&mut self.pages[page].assigned);
        self.sort_by_size(&mut assigned);
        for pid in assigned {
            self.page_place(page, pid);
        }
        for iid in self.pages[page].images.clone() {
            self.check_solitary(iid);
        }
    }

    /// Tries each existing image in turn, then a fresh one. A placement that
    /// does not fit even an empty image is flagged `Size`.
    pub fn page_place(&mut self, page: PageId, pid: PlacementId) -> bool {
        for iid in self.pages[page].images.clone() {
            if self.place_in_image(iid, pid) {
                return true;
            }
        }

        let (group, properties) = (self.pages[page].group, self.pages[page].properties);
        let index = self.pages[page].images.len() as u32;
        let iid = self.images.insert(PaletteImage::new(
            group,
            page,
            properties,
            index,
            self.config.palette_width,
            self.config.palette_height,
        ));
        if self.place_in_image(iid, pid) {
            self.pages[page].images.push(iid);
            self.setup_filename(iid);
            debug!(image = %self.images[iid].basename, "new palette image");
            true
        } else {
            self.images.remove(iid);
            let p = &mut self.placements[pid];
            p.omit_reason = OmitReason::Size;
            warn!(texture = %self.textures[p.texture].name, "texture does not fit an empty palette image");
            false
        }
    }

    pub fn page_optimal_resize(&mut self, page: PageId) {
        for iid in self.pages[page].images.clone() {
            self.optimal_resize(iid);
        }
    }

    /// Drops every image of the page, sending their placements back to `Working`.
    pub fn reset_page(&mut self, page: PageId) {
        let images = std::mem::take(&mut self.pages[page].images);
        for iid in images {
            self.reset_image(iid);
            self.retired_images.extend(self.images[iid].filename.clone());
            self.images.remove(iid);
        }
    }

    /// Sends every `Working` placement of `group` to its page, then packs
    /// each page.
    pub fn group_place_all(&mut self, group: GroupId) {
        let working: Vec<PlacementId> = self.groups[group]
            .placements
            .iter()
            .copied()
            .filter(|&pid| self.placements[pid].omit_reason == OmitReason::Working)
            .collect();
        for pid in working {
            let properties = self.textures[self.placements[pid].texture].properties;
            let page = self.get_page(group, properties);
            self.page_assign(page, pid);
        }
        let pages: Vec<PageId> = self.groups[group].pages.values().copied().collect();
        for page in pages {
            self.page_place_all(page);
        }
    }
}
