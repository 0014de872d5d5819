use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use trashlens::config::ClientConfig;
use trashlens::i18n::Locale;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "TRASHLENS_CONFIG",
        "TRASHLENS_BACKEND_URL",
        "TRASHLENS_WS_URL",
        "TRASHLENS_CAMERA_URL",
        "TRASHLENS_FRAME_INTERVAL_MS",
        "TRASHLENS_LOCALE",
        "TRASHLENS_FONT_PATH",
        "TRASHLENS_MAX_DISTANCE_KM",
        "TRASHLENS_MAPBOX_TOKEN",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(toml: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = ClientConfig::load().expect("load config");
    assert_eq!(cfg.backend_url, "http://127.0.0.1:8000");
    assert_eq!(cfg.live.ws_url, "ws://127.0.0.1:8000/ws/detect");
    assert_eq!(cfg.live.frame_interval, Duration::from_millis(200));
    assert_eq!(cfg.live.camera_timeout, Duration::from_secs(5));
    assert_eq!(cfg.overlay.reference_size, 640);
    assert_eq!(cfg.max_distance_km, 10.0);
    assert_eq!(cfg.locale, Locale::En);
    assert!(cfg.mapbox_token.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        r#"
        [backend]
        url = "http://detector.local:9000"
        timeout_secs = 15

        [live]
        ws_url = "ws://detector.local:9000/ws/detect"
        frame_interval_ms = 500
        camera_timeout_ms = 1500
        jpeg_quality = 70

        [overlay]
        reference_size = 416

        [disposal]
        max_distance_km = 3.5

        [i18n]
        locale = "vi"
        "#,
    );

    std::env::set_var("TRASHLENS_CONFIG", file.path());
    std::env::set_var("TRASHLENS_FRAME_INTERVAL_MS", "250");
    std::env::set_var("TRASHLENS_MAPBOX_TOKEN", "pk.test");

    let cfg = ClientConfig::load().expect("load config");

    assert_eq!(cfg.backend_url, "http://detector.local:9000");
    assert_eq!(cfg.request_timeout, Duration::from_secs(15));
    assert_eq!(cfg.live.ws_url, "ws://detector.local:9000/ws/detect");
    assert_eq!(cfg.live.frame_interval, Duration::from_millis(250));
    assert_eq!(cfg.live.jpeg_quality, 70);
    assert_eq!(cfg.live.camera_timeout, Duration::from_millis(1500));
    assert_eq!(cfg.overlay.reference_size, 416);
    assert_eq!(cfg.max_distance_km, 3.5);
    assert_eq!(cfg.locale, Locale::Vi);
    assert_eq!(cfg.mapbox_token.as_deref(), Some("pk.test"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("TRASHLENS_FRAME_INTERVAL_MS", "0");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("TRASHLENS_LOCALE", "fr");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("TRASHLENS_MAX_DISTANCE_KM", "-1");
    assert!(ClientConfig::load().is_err());
    clear_env();

    std::env::set_var("TRASHLENS_WS_URL", "http://not-a-websocket");
    assert!(ClientConfig::load().is_err());
    clear_env();

    let file = write_config("[live]\ncamera_timeout_ms = 0\n");
    std::env::set_var("TRASHLENS_CONFIG", file.path());
    assert!(ClientConfig::load().is_err());
    clear_env();

    let file = write_config("[live]\nframe_rate = 5\n");
    std::env::set_var("TRASHLENS_CONFIG", file.path());
    let err = ClientConfig::load().unwrap_err();
    assert!(err.to_string().contains("invalid config file"), "{}", err);
    clear_env();
}
