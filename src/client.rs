//! HTTP client for the inference service.
//!
//! All calls are blocking. Non-2xx responses become `Error::Backend` and are
//! never retried here; the session decides what the user sees.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::category::TrashCategory;
use crate::detection::{BoundingBox, Detection};
use crate::error::{Error, Result};
use crate::media::{EncodedImage, VideoBlob};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const BOUNDARY_PREFIX: &str = "----trashlens";

/// Processed image plus what was found in it.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageInference {
    /// Annotated image as a data URL. Falls back to the submitted image.
    pub processed_image: String,
    pub detections: Vec<Detection>,
}

/// One frame of a processed video.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct VideoFrame {
    pub original: String,
    pub processed: String,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(rename = "processedImage")]
    processed_image: Option<String>,
    image: Option<String>,
    #[serde(default)]
    detections: Vec<Detection>,
}

#[derive(Deserialize)]
struct VideoResponse {
    #[serde(default)]
    frames: Vec<VideoFrame>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    image: &'a str,
}

/// Correctness feedback on a processed result.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub image_id: String,
    pub original_image: String,
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Feedback {
    /// Blank comments are dropped from the request.
    pub fn new(
        image_id: impl Into<String>,
        original_image: impl Into<String>,
        is_correct: bool,
        comment: Option<&str>,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            original_image: original_image.into(),
            is_correct,
            comment: comment
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        }
    }
}

/// One user-drawn box in a contribution.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelData {
    pub trash_type: TrashCategory,
    pub bbox: BoundingBox,
}

/// Labeled image contributed for training.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Contribution {
    pub image: String,
    pub labels: Vec<LabelData>,
}

/// The inference service as seen by the session.
pub trait InferenceBackend: Send + Sync {
    fn infer_image(&self, image: &EncodedImage) -> Result<ImageInference>;

    /// Frames in the order the service returned them.
    fn infer_video(&self, video: &VideoBlob) -> Result<Vec<VideoFrame>>;

    fn submit_feedback(&self, feedback: &Feedback) -> Result<()>;

    fn contribute(&self, contribution: &Contribution) -> Result<()>;
}

/// `InferenceBackend` over HTTP.
pub struct HttpBackend {
    base: Url,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("backend url {}: {}", base_url, e)))?;
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { base, agent })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Config(format!("endpoint {}: {}", path, e)))
    }

    fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<ureq::Response> {
        let url = self.endpoint(path)?;
        let payload = serde_json::to_string(body)?;
        log::debug!("POST {} ({} bytes)", url, payload.len());
        let response = self
            .agent
            .post(url.as_str())
            .set("Content-Type", "application/json")
            .send_string(&payload)?;
        Ok(response)
    }
}

impl InferenceBackend for HttpBackend {
    fn infer_image(&self, image: &EncodedImage) -> Result<ImageInference> {
        let response = self.post_json(
            "inference-image",
            &ImageRequest {
                image: image.as_str(),
            },
        )?;
        let body: ImageResponse = read_json(response)?;
        let processed_image = body
            .processed_image
            .or(body.image)
            .unwrap_or_else(|| image.as_str().to_string());
        log::info!("image inference returned {} detections", body.detections.len());
        Ok(ImageInference {
            processed_image,
            detections: body.detections,
        })
    }

    fn infer_video(&self, video: &VideoBlob) -> Result<Vec<VideoFrame>> {
        let url = self.endpoint("inference-video")?;
        let seed = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
        let boundary = multipart_boundary(&video.bytes, seed);
        let body = multipart_body(&boundary, "video", video);
        log::debug!("POST {} ({} bytes multipart)", url, body.len());
        let response = self
            .agent
            .post(url.as_str())
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body)?;
        let body: VideoResponse = read_json(response)?;
        log::info!("video inference returned {} frames", body.frames.len());
        Ok(body.frames)
    }

    fn submit_feedback(&self, feedback: &Feedback) -> Result<()> {
        self.post_json("feedback", feedback)?;
        log::info!("feedback sent for {}", feedback.image_id);
        Ok(())
    }

    fn contribute(&self, contribution: &Contribution) -> Result<()> {
        self.post_json("contribute", contribution)?;
        log::info!("contributed {} labels", contribution.labels.len());
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(response: ureq::Response) -> Result<T> {
    let text = response
        .into_string()
        .map_err(|e| Error::Decode(format!("unreadable response body: {}", e)))?;
    Ok(serde_json::from_str(&text)?)
}

/// Boundary derived from `seed` and the payload length that does not occur
/// in the payload.
fn multipart_boundary(payload: &[u8], seed: u64) -> String {
    let mut attempt = 0u64;
    loop {
        let boundary = format!(
            "{}-{:016x}-{:x}-{:x}",
            BOUNDARY_PREFIX,
            seed,
            payload.len(),
            attempt
        );
        let bytes = boundary.as_bytes();
        if !payload.windows(bytes.len()).any(|window| window == bytes) {
            return boundary;
        }
        attempt += 1;
    }
}

/// Single-file `multipart/form-data` body.
fn multipart_body(boundary: &str, field: &str, video: &VideoBlob) -> Vec<u8> {
    let file_name = if video.name.is_empty() {
        "video"
    } else {
        video.name.as_str()
    };
    let mut body = Vec::with_capacity(video.bytes.len() + 256);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field,
            file_name.replace('"', "")
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", video.mime).as_bytes());
    body.extend_from_slice(&video.bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
