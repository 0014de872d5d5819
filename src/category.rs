//! Trash categories and their display styling.
//!
//! The detector emits one of six categories, either by name or by class index.
//! Anything else is kept as `TrashCategory::Unrecognized` with the raw label so
//! callers can see it instead of having it silently folded into `Other`.

use serde::{Serialize, Serializer};
use std::fmt;

/// Known categories in model class-index order.
pub const KNOWN_CATEGORIES: [TrashCategory; 6] = [
    TrashCategory::Food,
    TrashCategory::Glass,
    TrashCategory::Metal,
    TrashCategory::Other,
    TrashCategory::Paper,
    TrashCategory::Plastic,
];

/// Luma above which label text is drawn black instead of white.
pub const CONTRAST_THRESHOLD: f32 = 125.0;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TrashCategory {
    Food,
    Glass,
    Metal,
    Other,
    Paper,
    Plastic,
    /// Label the client does not know. Holds the label as received.
    Unrecognized(String),
}

/// Display styling for one category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CategoryStyle {
    /// Box and label background color.
    pub color: [u8; 3],
    /// Icon identifier for front ends.
    pub icon: &'static str,
}

const FOOD_STYLE: CategoryStyle = CategoryStyle {
    color: [0xFF, 0xA5, 0x00],
    icon: "pizza",
};
const GLASS_STYLE: CategoryStyle = CategoryStyle {
    color: [0xFF, 0xFF, 0x00],
    icon: "wine",
};
const METAL_STYLE: CategoryStyle = CategoryStyle {
    color: [0x80, 0x00, 0x80],
    icon: "wrench",
};
const OTHER_STYLE: CategoryStyle = CategoryStyle {
    color: [0x00, 0x00, 0xFF],
    icon: "trash",
};
const PAPER_STYLE: CategoryStyle = CategoryStyle {
    color: [0xFF, 0x00, 0x00],
    icon: "newspaper",
};
const PLASTIC_STYLE: CategoryStyle = CategoryStyle {
    color: [0x00, 0x80, 0x00],
    icon: "waves",
};
const UNRECOGNIZED_STYLE: CategoryStyle = CategoryStyle {
    color: [0x00, 0xFF, 0x00],
    icon: "trash",
};

impl TrashCategory {
    /// Parse a category label. Case-insensitive, surrounding whitespace ignored.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "food" => TrashCategory::Food,
            "glass" => TrashCategory::Glass,
            "metal" => TrashCategory::Metal,
            "other" => TrashCategory::Other,
            "paper" => TrashCategory::Paper,
            "plastic" => TrashCategory::Plastic,
            _ => TrashCategory::Unrecognized(label.trim().to_string()),
        }
    }

    /// Map a model class index to a category.
    pub fn from_class_index(index: u64) -> Self {
        usize::try_from(index)
            .ok()
            .and_then(|i| KNOWN_CATEGORIES.get(i))
            .cloned()
            .unwrap_or_else(|| TrashCategory::Unrecognized(format!("class:{}", index)))
    }

    /// Lowercase identifier, also used as the grouping key for aggregation.
    pub fn id(&self) -> String {
        match self {
            TrashCategory::Food => "food".to_string(),
            TrashCategory::Glass => "glass".to_string(),
            TrashCategory::Metal => "metal".to_string(),
            TrashCategory::Other => "other".to_string(),
            TrashCategory::Paper => "paper".to_string(),
            TrashCategory::Plastic => "plastic".to_string(),
            TrashCategory::Unrecognized(label) => label.to_lowercase(),
        }
    }

    /// Dictionary key prefix for localized name, description and guide.
    pub fn message_key(&self) -> &'static str {
        match self {
            TrashCategory::Food => "trashes.food",
            TrashCategory::Glass => "trashes.glass",
            TrashCategory::Metal => "trashes.metal",
            TrashCategory::Other => "trashes.other",
            TrashCategory::Paper => "trashes.paper",
            TrashCategory::Plastic => "trashes.plastic",
            TrashCategory::Unrecognized(_) => "trashes.unknown",
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, TrashCategory::Unrecognized(_))
    }

    pub fn style(&self) -> CategoryStyle {
        match self {
            TrashCategory::Food => FOOD_STYLE,
            TrashCategory::Glass => GLASS_STYLE,
            TrashCategory::Metal => METAL_STYLE,
            TrashCategory::Other => OTHER_STYLE,
            TrashCategory::Paper => PAPER_STYLE,
            TrashCategory::Plastic => PLASTIC_STYLE,
            TrashCategory::Unrecognized(_) => UNRECOGNIZED_STYLE,
        }
    }

    pub fn color(&self) -> [u8; 3] {
        self.style().color
    }

    /// Label text color that stays readable on top of `color()`.
    pub fn text_color(&self) -> [u8; 3] {
        text_color(self.color())
    }
}

impl fmt::Display for TrashCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrashCategory::Food => f.write_str("Food"),
            TrashCategory::Glass => f.write_str("Glass"),
            TrashCategory::Metal => f.write_str("Metal"),
            TrashCategory::Other => f.write_str("Other"),
            TrashCategory::Paper => f.write_str("Paper"),
            TrashCategory::Plastic => f.write_str("Plastic"),
            TrashCategory::Unrecognized(label) => f.write_str(label),
        }
    }
}

impl Serialize for TrashCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Perceptual brightness (ITU-R BT.601 weights).
pub fn luma(rgb: [u8; 3]) -> f32 {
    0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32
}

/// Black on bright backgrounds, white on dark ones.
pub fn text_color(background: [u8; 3]) -> [u8; 3] {
    if luma(background) > CONTRAST_THRESHOLD {
        [0, 0, 0]
    } else {
        [255, 255, 255]
    }
}

/// Parse `#RRGGBB`.
pub fn parse_hex_color(hex: &str) -> Option<[u8; 3]> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16).ok();
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

/// Convert `#RRGGBB` into a CSS `rgba(...)` string.
pub fn hex_to_rgba(hex: &str, alpha: f32) -> Option<String> {
    let [r, g, b] = parse_hex_color(hex)?;
    Some(format!("rgba({}, {}, {}, {})", r, g, b, alpha.clamp(0.0, 1.0)))
}
