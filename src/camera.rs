//! Camera sources for live detection.
//!
//! - `stub://<name>`: synthetic frames, for tests and demos
//! - `http(s)://`: cameras serving MJPEG streams or single JPEG snapshots
//!
//! Sources only hand out the latest still. Pacing is the live session's job.

use std::io::Read;
use std::time::Duration;

use image::{Rgb, RgbImage};
use url::Url;

use crate::error::{Error, Result};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const STUB_WIDTH: u32 = 640;
const STUB_HEIGHT: u32 = 480;
/// Connect and read timeout for HTTP cameras. A stalled camera fails the
/// capture after this long instead of blocking the live worker.
pub const DEFAULT_CAMERA_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that can produce a still frame on demand.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    /// Capture the current frame.
    fn capture(&mut self) -> Result<RgbImage>;

    fn frames_captured(&self) -> u64;
}

/// Open a camera by URL. `timeout` bounds every network read of HTTP
/// cameras.
pub fn open(url: &str, timeout: Duration) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(url)));
    }
    let parsed = Url::parse(url).map_err(|e| Error::Config(format!("camera url {}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(Box::new(HttpCamera::connect(url, timeout)?)),
        other => Err(Error::Config(format!(
            "unsupported camera scheme '{}'; expected stub, http or https",
            other
        ))),
    }
}

/// Moving gradient frames with no real camera behind them.
pub struct SyntheticCamera {
    name: String,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frame_count: 0,
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture(&mut self) -> Result<RgbImage> {
        self.frame_count += 1;
        let shift = self.frame_count as u32;
        Ok(RgbImage::from_fn(STUB_WIDTH, STUB_HEIGHT, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        }))
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

/// HTTP camera. Multipart responses are read as an MJPEG stream; anything
/// else is treated as a snapshot endpoint and fetched once per capture.
pub struct HttpCamera {
    url: String,
    agent: ureq::Agent,
    stream: Option<MjpegStream>,
    frame_count: u64,
}

impl HttpCamera {
    pub fn connect(url: &str, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(Error::Config("camera timeout must be greater than zero".to_string()));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .build();
        let response = agent.get(url).call()?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        let stream = if content_type.contains("multipart") {
            Some(MjpegStream::new(response.into_reader()))
        } else {
            None
        };
        log::info!(
            "camera {} connected ({})",
            url,
            if stream.is_some() { "mjpeg" } else { "snapshot" }
        );
        Ok(Self {
            url: url.to_string(),
            agent,
            stream,
            frame_count: 0,
        })
    }
}

impl FrameSource for HttpCamera {
    fn name(&self) -> &str {
        &self.url
    }

    fn capture(&mut self) -> Result<RgbImage> {
        let jpeg = match self.stream.as_mut() {
            Some(stream) => stream.read_next_jpeg()?,
            None => fetch_snapshot(&self.agent, &self.url)?,
        };
        let frame = image::load_from_memory(&jpeg)?.into_rgb8();
        self.frame_count += 1;
        Ok(frame)
    }

    fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk)?;
            if read == 0 {
                return Err(Error::Channel("mjpeg stream ended".to_string()));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_snapshot(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent.get(url).call()?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64 + 1)
        .read_to_end(&mut bytes)?;
    if bytes.is_empty() {
        return Err(Error::Decode("empty jpeg snapshot".to_string()));
    }
    if bytes.len() > MAX_JPEG_BYTES {
        return Err(Error::MediaTooLarge {
            size: bytes.len(),
            max: MAX_JPEG_BYTES,
        });
    }
    Ok(bytes)
}

/// Start (SOI) and end-exclusive (past EOI) of the first complete JPEG.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_frames_change_between_captures() {
        let mut camera = SyntheticCamera::new("stub://desk");
        let a = camera.capture().unwrap();
        let b = camera.capture().unwrap();
        assert_eq!(a.dimensions(), (STUB_WIDTH, STUB_HEIGHT));
        assert_ne!(a.get_pixel(0, 0), b.get_pixel(0, 0));
        assert_eq!(camera.frames_captured(), 2);
    }

    #[test]
    fn open_rejects_unknown_schemes() {
        assert!(open("rtsp://camera", DEFAULT_CAMERA_TIMEOUT).is_err());
        assert_eq!(open("stub://x", DEFAULT_CAMERA_TIMEOUT).unwrap().name(), "stub://x");
    }

    #[test]
    fn finds_jpeg_between_markers() {
        let buffer = [0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x33];
        assert_eq!(find_jpeg_bounds(&buffer), Some((1, 7)));
        assert_eq!(find_jpeg_bounds(&buffer[..5]), None);
    }

    #[test]
    fn stalled_mjpeg_camera_times_out() {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request);
            let head = "HTTP/1.1 200 OK\r\n\
                        Content-Type: multipart/x-mixed-replace; boundary=f\r\n\r\n--f\r\n";
            stream.write_all(head.as_bytes()).unwrap();
            std::thread::sleep(Duration::from_secs(3));
        });

        let mut camera =
            HttpCamera::connect(&format!("http://{}/stream", addr), Duration::from_millis(200))
                .unwrap();
        let started = std::time::Instant::now();
        assert!(camera.capture().is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
        server.join().unwrap();
    }

    #[test]
    fn mjpeg_stream_yields_consecutive_frames() {
        let body: Vec<u8> = [
            b"--frame\r\n".as_slice(),
            &[0xFF, 0xD8, 0xAA, 0xFF, 0xD9],
            b"\r\n--frame\r\n",
            &[0xFF, 0xD8, 0xBB, 0xFF, 0xD9],
        ]
        .concat();
        let mut stream = MjpegStream::new(Box::new(std::io::Cursor::new(body)));
        assert_eq!(stream.read_next_jpeg().unwrap(), vec![0xFF, 0xD8, 0xAA, 0xFF, 0xD9]);
        assert_eq!(stream.read_next_jpeg().unwrap(), vec![0xFF, 0xD8, 0xBB, 0xFF, 0xD9]);
        assert!(stream.read_next_jpeg().is_err());
    }
}
