//! Live detection over a persistent channel.
//!
//! A `LiveSession` owns at most one worker thread. The worker captures a
//! frame on every tick, sends it over the channel and forwards whatever
//! detections the server has pushed to a `FrameSink`. Starting a new stream
//! stops the previous one first; stopping (or dropping the session) joins
//! the worker, which closes the channel and clears the sink.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::camera::FrameSource;
use crate::detection::{Detection, FrameSize};
use crate::error::{Error, Result};
use crate::media::{encode_frame, EncodedImage};
use crate::notice::{Notice, Notifier};
use crate::overlay::{OverlayRenderer, OverlaySurface};

pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8000/ws/detect";
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(200);
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Upper bound on how long the worker waits between stop-flag checks.
const IDLE_SLICE: Duration = Duration::from_millis(10);
const READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Bidirectional detection channel.
pub trait DetectionChannel: Send {
    fn send_frame(&mut self, frame: &EncodedImage) -> Result<()>;

    /// Detection batches pushed since the last poll. Must not block for
    /// longer than a few milliseconds.
    fn poll(&mut self) -> Result<Vec<Vec<Detection>>>;

    fn close(&mut self);
}

/// Opens channels. One call per stream.
pub trait ChannelConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn DetectionChannel>>;
}

/// Receives detections for the frame they belong to.
pub trait FrameSink: Send {
    fn show(&mut self, frame: FrameSize, detections: &[Detection]);

    fn clear(&mut self);
}

#[derive(Serialize)]
struct FrameMessage<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct DetectionMessage {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// Parse one server push.
pub fn parse_detections(payload: &[u8]) -> Result<Vec<Detection>> {
    let message: DetectionMessage = serde_json::from_slice(payload)?;
    Ok(message.detections)
}

/// WebSocket channel.
pub struct WsChannel {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl WsChannel {
    pub fn connect(url: &str) -> Result<Self> {
        let (socket, response) = tungstenite::connect(url)?;
        set_read_timeout(socket.get_ref(), READ_TIMEOUT)?;
        log::info!("detection channel open: {} ({})", url, response.status());
        Ok(Self {
            socket,
            closed: false,
        })
    }
}

/// `poll` relies on reads timing out, for plain and TLS sockets alike.
fn set_read_timeout(stream: &MaybeTlsStream<TcpStream>, timeout: Duration) -> Result<()> {
    match stream {
        MaybeTlsStream::Plain(tcp) => tcp.set_read_timeout(Some(timeout))?,
        MaybeTlsStream::Rustls(tls) => tls.get_ref().set_read_timeout(Some(timeout))?,
        _ => return Err(Error::Channel("unsupported websocket transport".to_string())),
    }
    Ok(())
}

impl DetectionChannel for WsChannel {
    fn send_frame(&mut self, frame: &EncodedImage) -> Result<()> {
        let payload = serde_json::to_string(&FrameMessage {
            image: frame.as_str(),
        })?;
        self.socket.send(Message::Text(payload))?;
        Ok(())
    }

    fn poll(&mut self) -> Result<Vec<Vec<Detection>>> {
        let mut batches = Vec::new();
        loop {
            match self.socket.read() {
                Ok(Message::Text(text)) => batches.push(parse_detections(text.as_bytes())?),
                Ok(Message::Binary(bytes)) => batches.push(parse_detections(&bytes)?),
                Ok(Message::Close(_)) => {
                    self.closed = true;
                    return Err(Error::Channel("closed by server".to_string()));
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(err))
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Ok(batches)
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.socket.close(None) {
            log::debug!("close handshake failed: {}", err);
            return;
        }
        // Drain until the server acknowledges or the read times out.
        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            match self.socket.read() {
                Ok(_) => continue,
                Err(tungstenite::Error::Io(err))
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(_) => break,
            }
        }
    }
}

/// Connects `WsChannel`s to a fixed URL.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ChannelConnector for WsConnector {
    fn connect(&self) -> Result<Box<dyn DetectionChannel>> {
        Ok(Box::new(WsChannel::connect(&self.url)?))
    }
}

/// Renders pushed detections onto a shared overlay surface.
pub struct OverlaySink {
    renderer: OverlayRenderer,
    surface: Arc<Mutex<OverlaySurface>>,
}

impl OverlaySink {
    pub fn new(renderer: OverlayRenderer, surface: Arc<Mutex<OverlaySurface>>) -> Self {
        Self { renderer, surface }
    }
}

impl FrameSink for OverlaySink {
    fn show(&mut self, frame: FrameSize, detections: &[Detection]) {
        let Ok(mut surface) = self.surface.lock() else {
            log::error!("overlay surface lock poisoned");
            return;
        };
        if surface.size() != frame {
            surface.resize(frame);
        }
        surface.render(&self.renderer, detections);
    }

    fn clear(&mut self) {
        match self.surface.lock() {
            Ok(mut surface) => surface.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LiveConfig {
    pub interval: Duration,
    pub jpeg_quality: u8,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_FRAME_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Counters for the current stream.
#[derive(Debug, Default)]
pub struct LiveStats {
    frames_sent: AtomicU64,
    batches_received: AtomicU64,
}

impl LiveStats {
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn batches_received(&self) -> u64 {
        self.batches_received.load(Ordering::Relaxed)
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    stats: Arc<LiveStats>,
}

pub struct LiveSession {
    connector: Arc<dyn ChannelConnector>,
    notifier: Arc<dyn Notifier>,
    config: LiveConfig,
    worker: Option<Worker>,
}

impl LiveSession {
    pub fn new(
        connector: Arc<dyn ChannelConnector>,
        notifier: Arc<dyn Notifier>,
        config: LiveConfig,
    ) -> Self {
        Self {
            connector,
            notifier,
            config,
            worker: None,
        }
    }

    /// Start streaming from `camera`. Any running stream is stopped first.
    /// A channel that cannot be opened is reported and returned as an error.
    pub fn start(&mut self, camera: Box<dyn FrameSource>, sink: Box<dyn FrameSink>) -> Result<()> {
        self.stop();
        if self.config.interval.is_zero() {
            return Err(Error::Config("frame interval must be greater than zero".to_string()));
        }
        let channel = match self.connector.connect() {
            Ok(channel) => channel,
            Err(err) => {
                self.notifier
                    .notify(Notice::error(format!("could not open detection channel: {}", err)));
                return Err(err);
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(LiveStats::default());
        let loop_state = StreamLoop {
            camera,
            channel,
            sink,
            notifier: self.notifier.clone(),
            stop: stop.clone(),
            stats: stats.clone(),
            config: self.config.clone(),
        };
        let handle = thread::Builder::new()
            .name("live-detect".to_string())
            .spawn(move || loop_state.run())?;
        log::info!(
            "live detection started, one frame every {} ms",
            self.config.interval.as_millis()
        );
        self.worker = Some(Worker {
            stop,
            handle,
            stats,
        });
        Ok(())
    }

    /// Stop the stream and wait for its teardown. No-op when idle.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::SeqCst);
        if worker.handle.join().is_err() {
            log::error!("live detection worker panicked");
        }
        log::info!(
            "live detection stopped after {} frames",
            worker.stats.frames_sent()
        );
    }

    /// Whether a worker is running. Becomes false on its own after a
    /// channel error.
    pub fn is_active(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> Option<Arc<LiveStats>> {
        self.worker.as_ref().map(|worker| worker.stats.clone())
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StreamLoop {
    camera: Box<dyn FrameSource>,
    channel: Box<dyn DetectionChannel>,
    sink: Box<dyn FrameSink>,
    notifier: Arc<dyn Notifier>,
    stop: Arc<AtomicBool>,
    stats: Arc<LiveStats>,
    config: LiveConfig,
}

impl StreamLoop {
    fn run(mut self) {
        if let Err(err) = self.pump() {
            log::warn!("live detection ended: {}", err);
            self.notifier
                .notify(Notice::error(format!("live detection stopped: {}", err)));
        }
        self.channel.close();
        self.sink.clear();
    }

    fn pump(&mut self) -> Result<()> {
        let mut frame_size = FrameSize::default();
        let mut next_tick = Instant::now();
        while !self.stop.load(Ordering::SeqCst) {
            if Instant::now() >= next_tick {
                next_tick += self.config.interval;
                // Skip missed ticks instead of bursting to catch up.
                let now = Instant::now();
                if next_tick < now {
                    next_tick = now + self.config.interval;
                }
                let frame = self.camera.capture()?;
                frame_size = FrameSize::new(frame.width(), frame.height());
                let encoded = encode_frame(&frame, self.config.jpeg_quality)?;
                self.channel.send_frame(&encoded)?;
                self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
            }

            for detections in self.channel.poll()? {
                self.stats.batches_received.fetch_add(1, Ordering::Relaxed);
                self.sink.show(frame_size, &detections);
            }

            let wait = next_tick.saturating_duration_since(Instant::now());
            thread::sleep(wait.min(IDLE_SLICE));
        }
        Ok(())
    }
}
