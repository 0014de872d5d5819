//! Detection session: current result, processing flag and recent history.
//!
//! Each submission takes a `CaptureTicket`. Only the newest ticket may
//! settle the session, so a slow response can never overwrite a newer one.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::aggregate::aggregate;
use crate::client::InferenceBackend;
use crate::detection::Detection;
use crate::error::Result;
use crate::media::{self, EncodedImage, MediaFile};

pub const HISTORY_CAPACITY: usize = 5;

/// One processed submission.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMedia {
    pub id: String,
    /// Submitted image as a data URL (for video, the frame's original).
    pub original_image: String,
    pub processed_image: String,
    pub detections: Vec<Detection>,
    pub timestamp: DateTime<Utc>,
}

impl ProcessedMedia {
    pub fn new(
        ticket: CaptureTicket,
        original_image: String,
        processed_image: String,
        detections: Vec<Detection>,
    ) -> Self {
        let timestamp = Utc::now();
        Self {
            id: format!("{}-{}", timestamp.timestamp_millis(), ticket.id()),
            original_image,
            processed_image,
            detections,
            timestamp,
        }
    }

    /// One entry per category, highest confidence kept.
    pub fn summary(&self) -> Vec<Detection> {
        aggregate(&self.detections)
    }

    /// Write the processed image to `dir` as `trash-detection-<id>.<ext>`.
    pub fn save_processed(&self, dir: &Path) -> Result<PathBuf> {
        let (mime, bytes) = media::decode_data_url(&self.processed_image)?;
        let path = dir.join(format!(
            "trash-detection-{}.{}",
            self.id,
            media::extension_for(&mime)
        ));
        std::fs::write(&path, bytes)?;
        log::info!("saved processed result {} to {}", self.id, path.display());
        Ok(path)
    }
}

/// Most-recent-first list of accepted results.
#[derive(Clone, Debug)]
pub struct History {
    entries: VecDeque<ProcessedMedia>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, media: ProcessedMedia) {
        self.entries.push_front(media);
        self.entries.truncate(self.capacity);
    }

    pub fn latest(&self) -> Option<&ProcessedMedia> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessedMedia> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

/// Proof of which submission a response belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureTicket(u64);

impl CaptureTicket {
    pub fn id(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct DetectionSession {
    last_ticket: u64,
    pending: Option<u64>,
    current: Option<ProcessedMedia>,
    history: History,
}

impl DetectionSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a submission. Clears the current result.
    pub fn begin(&mut self) -> CaptureTicket {
        self.last_ticket += 1;
        self.pending = Some(self.last_ticket);
        self.current = None;
        CaptureTicket(self.last_ticket)
    }

    /// Accept a result if `ticket` is still the newest. Returns `false` for
    /// stale responses, which are dropped.
    pub fn complete(&mut self, ticket: CaptureTicket, media: ProcessedMedia) -> bool {
        if !self.settle(ticket) {
            log::debug!("discarding stale result for capture {}", ticket.id());
            return false;
        }
        self.history.push(media.clone());
        self.current = Some(media);
        true
    }

    /// End a submission without a result.
    pub fn fail(&mut self, ticket: CaptureTicket) -> bool {
        self.settle(ticket)
    }

    /// Drop the current result and invalidate outstanding tickets.
    pub fn reset(&mut self) {
        self.pending = None;
        self.current = None;
    }

    /// Run one backend call under a fresh ticket. The processing flag is
    /// cleared on success, empty result and error alike.
    pub fn run_capture<F>(&mut self, call: F) -> Result<Option<&ProcessedMedia>>
    where
        F: FnOnce(CaptureTicket) -> Result<Option<ProcessedMedia>>,
    {
        let ticket = self.begin();
        match call(ticket) {
            Ok(Some(media)) => {
                if self.complete(ticket, media) {
                    Ok(self.current.as_ref())
                } else {
                    Ok(None)
                }
            }
            Ok(None) => {
                self.fail(ticket);
                Ok(None)
            }
            Err(err) => {
                self.fail(ticket);
                Err(err)
            }
        }
    }

    /// Validate, encode and submit an image. Validation errors are returned
    /// before any state change or network call.
    pub fn process_image(
        &mut self,
        backend: &dyn InferenceBackend,
        file: &MediaFile,
    ) -> Result<Option<&ProcessedMedia>> {
        let image = media::capture_image(file)?;
        self.run_capture(|ticket| {
            let inference = backend.infer_image(&image)?;
            Ok(Some(ProcessedMedia::new(
                ticket,
                image.into_string(),
                inference.processed_image,
                inference.detections,
            )))
        })
    }

    /// Submit a video. The last returned frame becomes the result; no frames
    /// means no result.
    pub fn process_video(
        &mut self,
        backend: &dyn InferenceBackend,
        file: MediaFile,
    ) -> Result<Option<&ProcessedMedia>> {
        let video = media::capture_video(file)?;
        self.run_capture(|ticket| {
            let frames = backend.infer_video(&video)?;
            Ok(frames.into_iter().last().map(|frame| {
                ProcessedMedia::new(ticket, frame.original, frame.processed, frame.detections)
            }))
        })
    }

    pub fn is_processing(&self) -> bool {
        self.pending.is_some()
    }

    pub fn current(&self) -> Option<&ProcessedMedia> {
        self.current.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Original image of the current result, for feedback and labeling.
    pub fn current_original(&self) -> Option<EncodedImage> {
        self.current
            .as_ref()
            .map(|media| EncodedImage::from_data_url(media.original_image.clone()))
    }

    fn settle(&mut self, ticket: CaptureTicket) -> bool {
        if self.pending == Some(ticket.id()) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}
