//! trashlens
//!
//! Client for a trash-classification service: submit photos, videos or a live
//! camera feed, draw the returned detections, and find where to dispose of
//! what was found.
//!
//! # Module Structure
//!
//! - `category`: the closed set of trash categories and their colors
//! - `detection`: wire types for detections and bounding boxes
//! - `media`: file validation and data-URL encoding
//! - `client`: HTTP calls to the inference service
//! - `session`: current result, capture tickets and history
//! - `overlay`: letterboxed box and label rendering
//! - `camera`, `live`: frame sources and the streaming session
//! - `aggregate`: one summary entry per category
//! - `disposal`, `route`: nearby collection points and walking directions
//! - `guide`, `i18n`: localized disposal guidance
//! - `labeler`: user-drawn boxes for contribution
//! - `config`: file and environment configuration

pub mod aggregate;
pub mod camera;
pub mod category;
pub mod client;
pub mod config;
pub mod detection;
pub mod disposal;
pub mod error;
pub mod guide;
pub mod i18n;
pub mod labeler;
pub mod live;
pub mod media;
pub mod notice;
pub mod overlay;
pub mod route;
pub mod session;

pub use aggregate::aggregate;
pub use category::TrashCategory;
pub use client::{Contribution, Feedback, HttpBackend, InferenceBackend};
pub use detection::{BoundingBox, Detection, FrameSize};
pub use disposal::{nearby, DisposalPoint, GeoPoint, LocationFix};
pub use error::{Error, ErrorKind, Result};
pub use i18n::{Catalog, Locale};
pub use live::{LiveConfig, LiveSession};
pub use media::{EncodedImage, MediaFile};
pub use overlay::{OverlayRenderer, OverlaySurface};
pub use session::{CaptureTicket, DetectionSession, ProcessedMedia};
