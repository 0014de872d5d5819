//! Manual labeling of an image for contribution.

use image::{DynamicImage, RgbaImage};

use crate::category::TrashCategory;
use crate::client::{Contribution, LabelData};
use crate::detection::BoundingBox;
use crate::error::{Error, Result};
use crate::media::EncodedImage;
use crate::overlay::draw_user_boxes;

#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub category: TrashCategory,
    pub bbox: BoundingBox,
}

/// Collects user-drawn boxes over one image.
#[derive(Debug)]
pub struct Labeler {
    image: EncodedImage,
    selected: TrashCategory,
    labels: Vec<Label>,
    drag_start: Option<(f32, f32)>,
}

impl Labeler {
    pub fn new(image: EncodedImage) -> Self {
        Self {
            image,
            selected: TrashCategory::Plastic,
            labels: Vec::new(),
            drag_start: None,
        }
    }

    /// Choose the category for the next box. Only known categories can be
    /// used as training labels.
    pub fn select(&mut self, category: TrashCategory) -> Result<()> {
        if !category.is_recognized() {
            return Err(Error::InvalidLabel(format!(
                "'{}' is not a known category",
                category
            )));
        }
        self.selected = category;
        Ok(())
    }

    pub fn selected(&self) -> &TrashCategory {
        &self.selected
    }

    pub fn begin_drag(&mut self, x: f32, y: f32) {
        self.drag_start = Some((x, y));
    }

    /// Finish a drag and add its box with the selected category.
    pub fn end_drag(&mut self, x: f32, y: f32) -> Result<&Label> {
        let (start_x, start_y) = self
            .drag_start
            .take()
            .ok_or_else(|| Error::InvalidLabel("no drag in progress".to_string()))?;
        self.add_corners(start_x, start_y, x, y)
    }

    /// Add a box from two opposite corners, in any order.
    pub fn add_corners(&mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Result<&Label> {
        let bbox = BoundingBox::from_corners(x1, y1, x2, y2);
        if !bbox.is_finite() || bbox.area() <= 0.0 {
            return Err(Error::InvalidLabel(format!(
                "box ({}, {}) to ({}, {}) has no area",
                x1, y1, x2, y2
            )));
        }
        self.labels.push(Label {
            category: self.selected.clone(),
            bbox,
        });
        log::debug!("added {} label, {} total", self.selected, self.labels.len());
        Ok(&self.labels[self.labels.len() - 1])
    }

    pub fn undo(&mut self) -> Option<Label> {
        self.labels.pop()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
        self.drag_start = None;
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Body for the contribute endpoint. Fails when there is nothing to send.
    pub fn contribution(&self) -> Result<Contribution> {
        if self.labels.is_empty() {
            return Err(Error::InvalidLabel("no labels to contribute".to_string()));
        }
        Ok(Contribution {
            image: self.image.as_str().to_string(),
            labels: self
                .labels
                .iter()
                .map(|label| LabelData {
                    trash_type: label.category.clone(),
                    bbox: label.bbox,
                })
                .collect(),
        })
    }

    /// Image with the current boxes drawn in category colors.
    pub fn preview(&self, image: &DynamicImage) -> RgbaImage {
        let mut canvas = image.to_rgba8();
        let boxes: Vec<(TrashCategory, BoundingBox)> = self
            .labels
            .iter()
            .map(|label| (label.category.clone(), label.bbox))
            .collect();
        draw_user_boxes(&mut canvas, &boxes);
        canvas
    }
}
