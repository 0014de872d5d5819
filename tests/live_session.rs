use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use trashlens::camera::{self, FrameSource, SyntheticCamera};
use trashlens::live::{ChannelConnector, DetectionChannel, FrameSink, LiveConfig, LiveSession};
use trashlens::media::EncodedImage;
use trashlens::notice::{NoticeLevel, NoticeLog};
use trashlens::{BoundingBox, Detection, Error, FrameSize, TrashCategory};

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    open: AtomicUsize,
    /// Frames sent, indexed by connection number.
    sent: Mutex<Vec<usize>>,
    shown: AtomicUsize,
    cleared: AtomicUsize,
}

impl Counters {
    fn sent_on(&self, channel: usize) -> usize {
        self.sent.lock().unwrap()[channel]
    }
}

struct FakeConnector {
    counters: Arc<Counters>,
    /// Polls after which every channel fails.
    fail_after: Option<usize>,
    refuse: AtomicBool,
}

impl FakeConnector {
    fn new(counters: Arc<Counters>) -> Self {
        Self {
            counters,
            fail_after: None,
            refuse: AtomicBool::new(false),
        }
    }
}

impl ChannelConnector for FakeConnector {
    fn connect(&self) -> trashlens::Result<Box<dyn DetectionChannel>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Channel("connection refused".to_string()));
        }
        let id = self.counters.connects.fetch_add(1, Ordering::SeqCst);
        self.counters.open.fetch_add(1, Ordering::SeqCst);
        self.counters.sent.lock().unwrap().push(0);
        Ok(Box::new(FakeChannel {
            id,
            counters: self.counters.clone(),
            pending: 0,
            polls: 0,
            fail_after: self.fail_after,
            closed: false,
        }))
    }
}

struct FakeChannel {
    id: usize,
    counters: Arc<Counters>,
    pending: usize,
    polls: usize,
    fail_after: Option<usize>,
    closed: bool,
}

impl DetectionChannel for FakeChannel {
    fn send_frame(&mut self, frame: &EncodedImage) -> trashlens::Result<()> {
        assert!(frame.as_str().starts_with("data:image/jpeg;base64,"));
        self.counters.sent.lock().unwrap()[self.id] += 1;
        self.pending += 1;
        Ok(())
    }

    fn poll(&mut self) -> trashlens::Result<Vec<Vec<Detection>>> {
        self.polls += 1;
        if self.fail_after.is_some_and(|limit| self.polls > limit) {
            return Err(Error::Channel("connection reset".to_string()));
        }
        let batches = (0..self.pending)
            .map(|_| {
                vec![Detection::new(
                    TrashCategory::Paper,
                    0.8,
                    Some(BoundingBox::new(10.0, 10.0, 100.0, 100.0)),
                )]
            })
            .collect();
        self.pending = 0;
        Ok(batches)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeChannel {
    fn drop(&mut self) {
        self.close();
    }
}

struct CountingSink {
    counters: Arc<Counters>,
}

impl FrameSink for CountingSink {
    fn show(&mut self, frame: FrameSize, detections: &[Detection]) {
        assert_eq!(frame, FrameSize::new(640, 480));
        assert_eq!(detections.len(), 1);
        self.counters.shown.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&mut self) {
        self.counters.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

fn camera() -> Box<dyn FrameSource> {
    Box::new(SyntheticCamera::new("stub://test"))
}

fn sink(counters: &Arc<Counters>) -> Box<dyn FrameSink> {
    Box::new(CountingSink {
        counters: counters.clone(),
    })
}

fn fast() -> LiveConfig {
    LiveConfig {
        interval: Duration::from_millis(20),
        jpeg_quality: 50,
    }
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn starting_twice_leaves_one_channel_and_one_ticker() {
    let counters = Arc::new(Counters::default());
    let connector = Arc::new(FakeConnector::new(counters.clone()));
    let mut live = LiveSession::new(connector, Arc::new(NoticeLog::new()), fast());

    live.start(camera(), sink(&counters)).unwrap();
    wait_until("first frame", || counters.sent_on(0) >= 1);

    live.start(camera(), sink(&counters)).unwrap();
    assert_eq!(counters.connects.load(Ordering::SeqCst), 2);
    assert_eq!(counters.open.load(Ordering::SeqCst), 1);
    // The first stream's sink was cleared on teardown.
    assert_eq!(counters.cleared.load(Ordering::SeqCst), 1);

    let first_stream_frames = counters.sent_on(0);
    wait_until("second stream frames", || counters.sent_on(1) >= 3);
    assert_eq!(counters.sent_on(0), first_stream_frames);
    assert!(live.is_active());
    assert!(counters.shown.load(Ordering::SeqCst) >= 1);

    live.stop();
    assert!(!live.is_active());
    assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    assert_eq!(counters.cleared.load(Ordering::SeqCst), 2);
}

#[test]
fn dropping_the_session_closes_the_channel() {
    let counters = Arc::new(Counters::default());
    let connector = Arc::new(FakeConnector::new(counters.clone()));
    {
        let mut live = LiveSession::new(connector, Arc::new(NoticeLog::new()), fast());
        live.start(camera(), sink(&counters)).unwrap();
        wait_until("a frame", || counters.sent_on(0) >= 1);
    }
    assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    assert_eq!(counters.cleared.load(Ordering::SeqCst), 1);
}

#[test]
fn channel_error_notifies_and_ends_the_stream() {
    let counters = Arc::new(Counters::default());
    let connector = Arc::new(FakeConnector {
        fail_after: Some(3),
        ..FakeConnector::new(counters.clone())
    });
    let notices = Arc::new(NoticeLog::new());
    let mut live = LiveSession::new(connector, notices.clone(), fast());

    live.start(camera(), sink(&counters)).unwrap();
    wait_until("stream to end", || !live.is_active());

    assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    assert_eq!(counters.cleared.load(Ordering::SeqCst), 1);
    let notices = notices.drain();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert!(notices[0].message.contains("connection reset"));
    // No reconnect.
    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
    live.stop();
}

#[test]
fn refused_connection_is_reported() {
    let counters = Arc::new(Counters::default());
    let connector = Arc::new(FakeConnector::new(counters.clone()));
    connector.refuse.store(true, Ordering::SeqCst);
    let notices = Arc::new(NoticeLog::new());
    let mut live = LiveSession::new(connector, notices.clone(), fast());

    let err = live.start(camera(), sink(&counters)).unwrap_err();
    assert!(matches!(err, Error::Channel(_)));
    assert!(!live.is_active());
    assert_eq!(notices.drain().len(), 1);
}

#[test]
fn zero_interval_is_rejected() {
    let counters = Arc::new(Counters::default());
    let connector = Arc::new(FakeConnector::new(counters.clone()));
    let mut live = LiveSession::new(
        connector,
        Arc::new(NoticeLog::new()),
        LiveConfig {
            interval: Duration::ZERO,
            jpeg_quality: 50,
        },
    );
    assert!(live.start(camera(), sink(&counters)).is_err());
    assert_eq!(counters.connects.load(Ordering::SeqCst), 0);
}

#[test]
fn stalled_http_camera_does_not_block_stop() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    // Sends the stream headers and one boundary, then goes quiet.
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = [0u8; 1024];
        let _ = stream.read(&mut request);
        let head = "HTTP/1.1 200 OK\r\n\
                    Content-Type: multipart/x-mixed-replace; boundary=f\r\n\r\n--f\r\n";
        stream.write_all(head.as_bytes()).unwrap();
        std::thread::sleep(Duration::from_secs(3));
    });

    let counters = Arc::new(Counters::default());
    let connector = Arc::new(FakeConnector::new(counters.clone()));
    let notices = Arc::new(NoticeLog::new());
    let mut live = LiveSession::new(connector, notices.clone(), fast());
    let source = camera::open(&format!("http://{}/stream", addr), Duration::from_millis(300))
        .unwrap();
    live.start(source, sink(&counters)).unwrap();
    std::thread::sleep(Duration::from_millis(300));

    let started = Instant::now();
    live.stop();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!live.is_active());
    assert_eq!(counters.open.load(Ordering::SeqCst), 0);
    assert_eq!(counters.sent_on(0), 0);
    assert_eq!(notices.drain()[0].level, NoticeLevel::Error);
    server.join().unwrap();
}
