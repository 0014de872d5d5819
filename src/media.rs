//! Media capture: validation and transport encoding.
//!
//! Images travel as base64 data URLs, videos as raw bytes. Type checks run
//! before anything touches the network.

use std::io::Cursor;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};

use crate::error::{Error, Result};

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_VIDEO_BYTES: usize = 100 * 1024 * 1024;

/// A file picked or dropped by the user.
#[derive(Clone, Debug)]
pub struct MediaFile {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, mime, bytes))
    }
}

/// Image ready for transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    data_url: String,
}

impl EncodedImage {
    pub fn from_bytes(mime: &str, bytes: &[u8]) -> Self {
        Self {
            data_url: encode_data_url(mime, bytes),
        }
    }

    /// Wrap an existing data URL (e.g. from a backend response).
    pub fn from_data_url(data_url: impl Into<String>) -> Self {
        Self {
            data_url: data_url.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.data_url
    }

    pub fn into_string(self) -> String {
        self.data_url
    }

    pub fn decode(&self) -> Result<(String, Vec<u8>)> {
        decode_data_url(&self.data_url)
    }

    pub fn to_image(&self) -> Result<DynamicImage> {
        let (_, bytes) = self.decode()?;
        Ok(image::load_from_memory(&bytes)?)
    }
}

/// Video passed through untouched.
#[derive(Clone, Debug)]
pub struct VideoBlob {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Validate an image file and encode it as a data URL.
pub fn capture_image(file: &MediaFile) -> Result<EncodedImage> {
    require_kind(&file.mime, "image")?;
    require_size(file.bytes.len(), MAX_IMAGE_BYTES)?;
    log::debug!("captured image {} ({} bytes, {})", file.name, file.bytes.len(), file.mime);
    Ok(EncodedImage::from_bytes(&file.mime, &file.bytes))
}

/// Validate a video file. No client-side transcoding.
pub fn capture_video(file: MediaFile) -> Result<VideoBlob> {
    require_kind(&file.mime, "video")?;
    require_size(file.bytes.len(), MAX_VIDEO_BYTES)?;
    log::debug!("captured video {} ({} bytes, {})", file.name, file.bytes.len(), file.mime);
    Ok(VideoBlob {
        name: file.name,
        mime: file.mime,
        bytes: file.bytes,
    })
}

/// Encode a camera still as a JPEG data URL.
pub fn encode_frame(frame: &RgbImage, quality: u8) -> Result<EncodedImage> {
    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut jpeg), quality.clamp(1, 100));
    frame.write_with_encoder(encoder)?;
    Ok(EncodedImage::from_bytes("image/jpeg", &jpeg))
}

pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Split a base64 data URL into MIME type and bytes.
pub fn decode_data_url(data_url: &str) -> Result<(String, Vec<u8>)> {
    let rest = data_url
        .strip_prefix("data:")
        .ok_or_else(|| Error::Decode("not a data url".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::Decode("data url has no payload".to_string()))?;
    let mime = meta
        .strip_suffix(";base64")
        .ok_or_else(|| Error::Decode("data url is not base64 encoded".to_string()))?;
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Decode(format!("invalid base64 payload: {}", e)))?;
    Ok((mime.to_string(), bytes))
}

/// File extension for a MIME type, used when saving results.
pub fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    }
}

fn require_kind(mime: &str, expected: &'static str) -> Result<()> {
    let is_kind = mime
        .split_once('/')
        .map(|(top, _)| top.eq_ignore_ascii_case(expected))
        .unwrap_or(false);
    if is_kind {
        Ok(())
    } else {
        Err(Error::UnsupportedMedia {
            mime: mime.to_string(),
            expected,
        })
    }
}

fn require_size(size: usize, max: usize) -> Result<()> {
    if size > max {
        return Err(Error::MediaTooLarge { size, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_is_encoded_as_data_url() {
        let file = MediaFile::new("a.png", "image/png", vec![1, 2, 3]);
        let encoded = capture_image(&file).unwrap();
        assert_eq!(encoded.as_str(), "data:image/png;base64,AQID");
        assert_eq!(encoded.decode().unwrap(), ("image/png".to_string(), vec![1, 2, 3]));
    }

    #[test]
    fn text_is_not_an_image() {
        let file = MediaFile::new("notes.txt", "text/plain", b"hello".to_vec());
        let err = capture_image(&file).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMedia { expected: "image", .. }));
    }

    #[test]
    fn image_is_not_a_video() {
        let file = MediaFile::new("a.png", "image/png", vec![0]);
        assert!(capture_video(file).is_err());
        let file = MediaFile::new("a.mp4", "video/mp4", vec![0]);
        assert_eq!(capture_video(file).unwrap().bytes, vec![0]);
    }

    #[test]
    fn oversized_image_is_rejected() {
        let file = MediaFile::new("big.png", "image/png", vec![0; MAX_IMAGE_BYTES + 1]);
        assert!(matches!(capture_image(&file), Err(Error::MediaTooLarge { .. })));
    }

    #[test]
    fn mime_is_guessed_from_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.JPG");
        std::fs::write(&path, [0xFF, 0xD8]).unwrap();
        let file = MediaFile::from_path(&path).unwrap();
        assert_eq!(file.mime, "image/jpeg");
        assert_eq!(file.name, "photo.JPG");
    }

    #[test]
    fn malformed_data_urls_fail_to_decode() {
        assert!(decode_data_url("image/png;base64,AQID").is_err());
        assert!(decode_data_url("data:image/png,AQID").is_err());
        assert!(decode_data_url("data:image/png;base64,!!").is_err());
    }

    #[test]
    fn frames_encode_as_jpeg() {
        let frame = RgbImage::from_pixel(8, 8, image::Rgb([200, 10, 10]));
        let encoded = encode_frame(&frame, 80).unwrap();
        assert!(encoded.as_str().starts_with("data:image/jpeg;base64,"));
        let decoded = encoded.to_image().unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
    }
}
