//! Detection overlay rendering.
//!
//! Boxes arrive in the detector's reference frame (640x640 by default). They
//! are mapped onto the displayed frame with a uniform scale and centering
//! offsets, so the overlay letterboxes instead of stretching.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, Pixel, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};

use crate::category::TrashCategory;
use crate::detection::{BoundingBox, Detection, FrameSize};
use crate::error::{Error, Result};

pub const LABEL_HEIGHT: f32 = 20.0;
pub const LABEL_PADDING: f32 = 4.0;
pub const LABEL_ALPHA: f32 = 0.7;
pub const BOX_THICKNESS: u32 = 2;
const DEFAULT_FONT_PX: f32 = 14.0;
/// Average advance of a glyph relative to its pixel height, used when no font
/// is loaded.
const ESTIMATED_ADVANCE: f32 = 0.6;
/// Pixel coordinates are clamped to this magnitude before integer
/// conversion so edge arithmetic cannot overflow.
const COORD_LIMIT: f64 = 1.0e9;

/// Scale and centering offsets from reference frame to source frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Letterbox {
    pub fn fit(source: FrameSize, reference: FrameSize) -> Self {
        if reference.width == 0 || reference.height == 0 {
            return Self {
                scale: 0.0,
                offset_x: source.width as f32 / 2.0,
                offset_y: source.height as f32 / 2.0,
            };
        }
        let scale = (source.width as f32 / reference.width as f32)
            .min(source.height as f32 / reference.height as f32);
        Self {
            scale,
            offset_x: (source.width as f32 - reference.width as f32 * scale) / 2.0,
            offset_y: (source.height as f32 - reference.height as f32 * scale) / 2.0,
        }
    }

    pub fn map(&self, bbox: &BoundingBox) -> ScreenRect {
        ScreenRect {
            x: bbox.x * self.scale + self.offset_x,
            y: bbox.y * self.scale + self.offset_y,
            width: bbox.width * self.scale,
            height: bbox.height * self.scale,
        }
    }
}

/// Rectangle in source-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScreenRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ScreenRect {
    /// Whole-pixel bounds of the rectangle, or `None` when it is degenerate
    /// or falls entirely outside a `width` x `height` canvas.
    fn to_pixels(self, width: u32, height: u32) -> Option<PixelRect> {
        let w = f64::from(self.width).round();
        let h = f64::from(self.height).round();
        if !(w >= 1.0 && h >= 1.0) || !self.x.is_finite() || !self.y.is_finite() {
            return None;
        }
        let left = f64::from(self.x).round().clamp(-COORD_LIMIT, COORD_LIMIT);
        let top = f64::from(self.y).round().clamp(-COORD_LIMIT, COORD_LIMIT);
        let rect = PixelRect {
            left: left as i64,
            top: top as i64,
            right: (left + w.min(2.0 * COORD_LIMIT)) as i64 - 1,
            bottom: (top + h.min(2.0 * COORD_LIMIT)) as i64 - 1,
        };
        let visible = rect.right >= 0
            && rect.bottom >= 0
            && rect.left < i64::from(width)
            && rect.top < i64::from(height);
        visible.then_some(rect)
    }
}

/// Inclusive pixel bounds. May extend past the canvas; drawing clips.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PixelRect {
    left: i64,
    top: i64,
    right: i64,
    bottom: i64,
}

/// Label background placement for a box.
///
/// The background is centered over the box and clamped to its horizontal
/// extent. It sits above the box unless that would leave the surface, in
/// which case it goes inside the top edge.
pub fn place_label(rect: &ScreenRect, text_width: f32) -> ScreenRect {
    let width = text_width + LABEL_PADDING * 2.0;
    let centered = rect.x + (rect.width - width) / 2.0;
    let max_x = rect.x + rect.width - width;
    let x = if max_x < rect.x {
        rect.x
    } else {
        centered.clamp(rect.x, max_x)
    };
    let y = if rect.y >= LABEL_HEIGHT {
        rect.y - LABEL_HEIGHT
    } else {
        rect.y
    };
    ScreenRect {
        x,
        y,
        width,
        height: LABEL_HEIGHT,
    }
}

/// Text shown above a box.
pub fn label_text(detection: &Detection) -> String {
    format!("{} {}%", detection.category, detection.percent())
}

/// Font used for label text.
pub struct LabelFont {
    font: FontVec,
    scale: PxScale,
}

impl LabelFont {
    pub fn load(path: &Path, px: f32) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| Error::Config(format!("invalid font {}: {}", path.display(), e)))?;
        Ok(Self {
            font,
            scale: PxScale::from(px),
        })
    }
}

/// Draws detection boxes onto an RGBA surface.
pub struct OverlayRenderer {
    font: Option<LabelFont>,
    font_px: f32,
}

impl OverlayRenderer {
    pub fn new(font: Option<LabelFont>) -> Self {
        let font_px = font.as_ref().map(|f| f.scale.y).unwrap_or(DEFAULT_FONT_PX);
        Self { font, font_px }
    }

    /// Renderer that estimates label widths and draws no glyphs.
    pub fn without_font() -> Self {
        Self::new(None)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn measure(&self, text: &str) -> f32 {
        match &self.font {
            Some(font) => text_size(font.scale, &font.font, text).0 as f32,
            None => text.chars().count() as f32 * self.font_px * ESTIMATED_ADVANCE,
        }
    }

    /// Draw `detections` onto `canvas`, which already holds the frame or a
    /// cleared overlay. Returns the rectangles drawn, in detection order.
    pub fn draw(
        &self,
        canvas: &mut RgbaImage,
        detections: &[Detection],
        reference: FrameSize,
    ) -> Vec<ScreenRect> {
        let (width, height) = canvas.dimensions();
        let letterbox = Letterbox::fit(FrameSize::new(width, height), reference);
        let mut drawn = Vec::with_capacity(detections.len());

        for detection in detections {
            let Some(bbox) = detection.bbox.as_ref() else {
                continue;
            };
            let rect = letterbox.map(bbox);
            let Some(outline) = rect.to_pixels(width, height) else {
                continue;
            };
            let color = detection.category.color();
            draw_outline(canvas, outline, rgba(color, 1.0));

            let text = label_text(detection);
            let label = place_label(&rect, self.measure(&text));
            let Some(background) = label.to_pixels(width, height) else {
                drawn.push(rect);
                continue;
            };
            fill_blended(canvas, background, rgba(color, LABEL_ALPHA));
            if let Some(font) = &self.font {
                let text_rgb = detection.category.text_color();
                let text_y = label.y + (LABEL_HEIGHT - font.scale.y) / 2.0;
                draw_text_mut(
                    canvas,
                    rgba(text_rgb, 1.0),
                    (label.x + LABEL_PADDING).round() as i32,
                    text_y.round() as i32,
                    font.scale,
                    &font.font,
                    &text,
                );
            }
            drawn.push(rect);
        }
        drawn
    }

    /// Draw detections onto a copy of a still image.
    pub fn annotate_image(
        &self,
        image: &DynamicImage,
        detections: &[Detection],
        reference: FrameSize,
    ) -> RgbaImage {
        let mut canvas = image.to_rgba8();
        self.draw(&mut canvas, detections, reference);
        canvas
    }
}

/// Transparent layer aligned with a displayed frame.
///
/// Each `render` starts from a cleared layer, so boxes never accumulate
/// across frames.
pub struct OverlaySurface {
    layer: RgbaImage,
    reference: FrameSize,
    boxes: Vec<ScreenRect>,
}

impl OverlaySurface {
    pub fn new(source: FrameSize, reference: FrameSize) -> Self {
        Self {
            layer: RgbaImage::new(source.width, source.height),
            reference,
            boxes: Vec::new(),
        }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.layer.width(), self.layer.height())
    }

    /// Match the layer to a new frame size. Clears the layer.
    pub fn resize(&mut self, source: FrameSize) {
        if self.size() != source {
            self.layer = RgbaImage::new(source.width, source.height);
        }
        self.clear();
    }

    pub fn clear(&mut self) {
        for pixel in self.layer.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
        self.boxes.clear();
    }

    pub fn render(&mut self, renderer: &OverlayRenderer, detections: &[Detection]) {
        self.clear();
        self.boxes = renderer.draw(&mut self.layer, detections, self.reference);
    }

    /// Rectangles from the last render.
    pub fn boxes(&self) -> &[ScreenRect] {
        &self.boxes
    }

    pub fn layer(&self) -> &RgbaImage {
        &self.layer
    }

    pub fn is_blank(&self) -> bool {
        self.boxes.is_empty() && self.layer.pixels().all(|p| p.0[3] == 0)
    }
}

/// Draw the label preview for user-drawn boxes, which are in image pixels.
pub fn draw_user_boxes(canvas: &mut RgbaImage, boxes: &[(TrashCategory, BoundingBox)]) {
    let (width, height) = canvas.dimensions();
    for (category, bbox) in boxes {
        let rect = ScreenRect {
            x: bbox.x,
            y: bbox.y,
            width: bbox.width,
            height: bbox.height,
        };
        if let Some(outline) = rect.to_pixels(width, height) {
            draw_outline(canvas, outline, rgba(category.color(), 1.0));
            fill_blended(canvas, outline, rgba(category.color(), 0.2));
        }
    }
}

fn rgba(rgb: [u8; 3], alpha: f32) -> Rgba<u8> {
    Rgba([rgb[0], rgb[1], rgb[2], (alpha.clamp(0.0, 1.0) * 255.0).round() as u8])
}

/// Draw a `BOX_THICKNESS` outline growing inward, clipped to the canvas.
fn draw_outline(canvas: &mut RgbaImage, rect: PixelRect, color: Rgba<u8>) {
    for inset in 0..i64::from(BOX_THICKNESS) {
        let (left, top) = (rect.left + inset, rect.top + inset);
        let (right, bottom) = (rect.right - inset, rect.bottom - inset);
        if left > right || top > bottom {
            break;
        }
        draw_row(canvas, top, left, right, color);
        draw_row(canvas, bottom, left, right, color);
        draw_column(canvas, left, top, bottom, color);
        draw_column(canvas, right, top, bottom, color);
    }
}

fn draw_row(canvas: &mut RgbaImage, y: i64, x0: i64, x1: i64, color: Rgba<u8>) {
    let (width, height) = canvas.dimensions();
    if y < 0 || y >= i64::from(height) {
        return;
    }
    let Some((x0, x1)) = clip_span(x0, x1, width) else {
        return;
    };
    for x in x0..=x1 {
        canvas.put_pixel(x, y as u32, color);
    }
}

fn draw_column(canvas: &mut RgbaImage, x: i64, y0: i64, y1: i64, color: Rgba<u8>) {
    let (width, height) = canvas.dimensions();
    if x < 0 || x >= i64::from(width) {
        return;
    }
    let Some((y0, y1)) = clip_span(y0, y1, height) else {
        return;
    };
    for y in y0..=y1 {
        canvas.put_pixel(x as u32, y, color);
    }
}

/// Inclusive span clipped to `0..len`.
fn clip_span(start: i64, end: i64, len: u32) -> Option<(u32, u32)> {
    let start = start.max(0);
    let end = end.min(i64::from(len) - 1);
    (start <= end).then_some((start as u32, end as u32))
}

fn fill_blended(canvas: &mut RgbaImage, rect: PixelRect, color: Rgba<u8>) {
    let (width, height) = canvas.dimensions();
    let (Some((x0, x1)), Some((y0, y1))) = (
        clip_span(rect.left, rect.right, width),
        clip_span(rect.top, rect.bottom, height),
    ) else {
        return;
    };
    for y in y0..=y1 {
        for x in x0..=x1 {
            canvas.get_pixel_mut(x, y).blend(&color);
        }
    }
}
