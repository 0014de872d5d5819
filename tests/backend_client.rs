use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use trashlens::client::{
    Contribution, Feedback, HttpBackend, ImageInference, InferenceBackend, VideoFrame,
};
use trashlens::media::{EncodedImage, MediaFile, VideoBlob};
use trashlens::{DetectionSession, Error, ErrorKind, TrashCategory};

struct Recorded {
    method: String,
    path: String,
    content_type: String,
    body: Vec<u8>,
}

/// Serve one canned response per connection, in order, and hand back what
/// each request looked like.
fn serve(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<Recorded>>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let handle = thread::spawn(move || {
        let mut recorded = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().expect("accept");
            recorded.push(read_request(&mut stream));
            let reply = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                if status < 400 { "OK" } else { "Error" },
                body.len(),
                body
            );
            stream.write_all(reply.as_bytes()).expect("reply");
        }
        recorded
    });
    (format!("http://{}", addr), handle)
}

fn read_request(stream: &mut TcpStream) -> Recorded {
    let mut reader = BufReader::new(stream.try_clone().expect("clone"));
    let mut request_line = String::new();
    reader.read_line(&mut request_line).expect("request line");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut content_type = String::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("header");
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().expect("content length");
            } else if name.eq_ignore_ascii_case("content-type") {
                content_type = value.trim().to_string();
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("body");
    Recorded {
        method,
        path,
        content_type,
        body,
    }
}

fn backend(base: &str) -> HttpBackend {
    HttpBackend::new(base, Duration::from_secs(5)).expect("backend")
}

fn png_file() -> MediaFile {
    MediaFile::new("bottle.png", "image/png", vec![1, 2, 3])
}

#[test]
fn image_submission_updates_session_and_history() {
    let (base, server) = serve(vec![(
        200,
        r#"{"processedImage":"data:image/png;base64,BAUG","detections":[
            {"trashType":5,"confidence":0.9,"bbox":[0,0,10,10]},
            {"trashType":"plastic","confidence":0.95,"bbox":[5,5,10,10]},
            {"trashType":"glass","confidence":0.4}
        ]}"#,
    )]);
    let backend = backend(&base);
    let mut session = DetectionSession::new();

    let media = session
        .process_image(&backend, &png_file())
        .expect("process")
        .cloned()
        .expect("result");

    assert_eq!(media.processed_image, "data:image/png;base64,BAUG");
    assert_eq!(media.original_image, "data:image/png;base64,AQID");
    let summary = media.summary();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].category, TrashCategory::Plastic);
    assert!((summary[0].confidence - 0.95).abs() < 1e-6);
    assert!(!session.is_processing());
    assert_eq!(session.history().len(), 1);

    let requests = server.join().expect("server");
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/inference-image");
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json");
    assert_eq!(body["image"], "data:image/png;base64,AQID");
}

#[test]
fn missing_processed_image_falls_back() {
    let (base, server) = serve(vec![
        (200, r#"{"image":"data:image/png;base64,CCCC","detections":[]}"#),
        (200, r#"{"detections":[]}"#),
    ]);
    let backend = backend(&base);
    let image = EncodedImage::from_bytes("image/png", &[9]);

    let ImageInference {
        processed_image, ..
    } = backend.infer_image(&image).expect("first");
    assert_eq!(processed_image, "data:image/png;base64,CCCC");

    let inference = backend.infer_image(&image).expect("second");
    assert_eq!(inference.processed_image, image.as_str());
    server.join().expect("server");
}

#[test]
fn backend_error_is_reported_and_clears_processing() {
    let (base, server) = serve(vec![(500, r#"{"detail":"model crashed"}"#)]);
    let backend = backend(&base);
    let mut session = DetectionSession::new();

    let err = session.process_image(&backend, &png_file()).unwrap_err();
    assert!(matches!(err, Error::Backend { status: 500, .. }), "{:?}", err);
    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(!session.is_processing());
    assert!(session.current().is_none());
    assert!(session.history().is_empty());
    server.join().expect("server");
}

#[test]
fn unreachable_backend_is_a_network_error() {
    // Bind then drop to get a port nothing listens on.
    let port = TcpListener::bind("127.0.0.1:0")
        .expect("bind")
        .local_addr()
        .expect("addr")
        .port();
    let backend = backend(&format!("http://127.0.0.1:{}", port));
    let err = backend
        .infer_image(&EncodedImage::from_bytes("image/png", &[0]))
        .unwrap_err();
    assert!(matches!(err, Error::Http { .. }), "{:?}", err);
}

#[derive(Default)]
struct CountingBackend {
    calls: AtomicUsize,
}

impl InferenceBackend for CountingBackend {
    fn infer_image(&self, image: &EncodedImage) -> trashlens::Result<ImageInference> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ImageInference {
            processed_image: image.as_str().to_string(),
            detections: Vec::new(),
        })
    }

    fn infer_video(&self, _video: &VideoBlob) -> trashlens::Result<Vec<VideoFrame>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }

    fn submit_feedback(&self, _feedback: &Feedback) -> trashlens::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn contribute(&self, _contribution: &Contribution) -> trashlens::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn text_file_is_rejected_before_any_network_call() {
    let backend = CountingBackend::default();
    let mut session = DetectionSession::new();
    let notes = MediaFile::new("notes.txt", "text/plain", b"not an image".to_vec());

    let err = session.process_image(&backend, &notes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    assert!(!session.is_processing());

    let err = session.process_video(&backend, notes).unwrap_err();
    assert!(matches!(err, Error::UnsupportedMedia { expected: "video", .. }));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn video_uses_last_frame_and_multipart_upload() {
    let (base, server) = serve(vec![
        (
            200,
            r#"{"frames":[
                {"original":"data:image/jpeg;base64,AA==","processed":"data:image/jpeg;base64,AQ==","detections":[]},
                {"original":"data:image/jpeg;base64,Ag==","processed":"data:image/jpeg;base64,Aw==","detections":[{"trashType":1,"confidence":0.7}]}
            ]}"#,
        ),
        (200, r#"{"frames":[]}"#),
    ]);
    let backend = backend(&base);
    let mut session = DetectionSession::new();
    let clip = || MediaFile::new("clip.mp4", "video/mp4", vec![0, 0, 0, 0x18]);

    let media = session
        .process_video(&backend, clip())
        .expect("process")
        .cloned()
        .expect("result");
    assert_eq!(media.processed_image, "data:image/jpeg;base64,Aw==");
    assert_eq!(media.original_image, "data:image/jpeg;base64,Ag==");
    assert_eq!(media.detections[0].category, TrashCategory::Glass);

    let empty = session.process_video(&backend, clip()).expect("empty");
    assert!(empty.is_none());
    assert!(!session.is_processing());
    assert_eq!(session.history().len(), 1);

    let requests = server.join().expect("server");
    assert_eq!(requests[0].path, "/inference-video");
    assert!(requests[0].content_type.starts_with("multipart/form-data; boundary="));
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("name=\"video\"; filename=\"clip.mp4\""));
}

#[test]
fn feedback_and_contribution_bodies() {
    let (base, server) = serve(vec![(200, "{}"), (204, "")]);
    let backend = backend(&base);

    backend
        .submit_feedback(&Feedback::new("171-1", "data:image/png;base64,AQID", true, Some("")))
        .expect("feedback");

    let mut labeler =
        trashlens::labeler::Labeler::new(EncodedImage::from_data_url("data:image/png;base64,AQID"));
    labeler.select(TrashCategory::Metal).expect("select");
    labeler.add_corners(40.0, 30.0, 10.0, 10.0).expect("label");
    backend
        .contribute(&labeler.contribution().expect("contribution"))
        .expect("contribute");

    let requests = server.join().expect("server");
    assert_eq!(requests[0].path, "/feedback");
    let feedback: serde_json::Value = serde_json::from_slice(&requests[0].body).expect("json");
    assert_eq!(
        feedback,
        serde_json::json!({
            "imageId": "171-1",
            "originalImage": "data:image/png;base64,AQID",
            "isCorrect": true
        })
    );

    assert_eq!(requests[1].path, "/contribute");
    let contribution: serde_json::Value = serde_json::from_slice(&requests[1].body).expect("json");
    assert_eq!(contribution["labels"][0]["trashType"], "Metal");
    assert_eq!(
        contribution["labels"][0]["bbox"],
        serde_json::json!([10.0, 10.0, 30.0, 20.0])
    );
}
