//! Client configuration: TOML file, environment overrides, validation.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::disposal::DEFAULT_MAX_DISTANCE_KM;
use crate::i18n::Locale;

const DEFAULT_BACKEND_URL: &str = crate::client::DEFAULT_BACKEND_URL;
const DEFAULT_WS_URL: &str = crate::live::DEFAULT_WS_URL;
const DEFAULT_CAMERA_URL: &str = "stub://webcam";
const DEFAULT_DIRECTIONS_URL: &str = crate::route::DEFAULT_DIRECTIONS_URL;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 200;
const DEFAULT_CAMERA_TIMEOUT: Duration = crate::camera::DEFAULT_CAMERA_TIMEOUT;
const DEFAULT_JPEG_QUALITY: u8 = crate::live::DEFAULT_JPEG_QUALITY;
const DEFAULT_FONT_PX: f32 = 14.0;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClientConfigFile {
    backend: Option<BackendConfigFile>,
    live: Option<LiveConfigFile>,
    overlay: Option<OverlayConfigFile>,
    disposal: Option<DisposalConfigFile>,
    directions: Option<DirectionsConfigFile>,
    i18n: Option<I18nConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct BackendConfigFile {
    url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct LiveConfigFile {
    ws_url: Option<String>,
    camera_url: Option<String>,
    camera_timeout_ms: Option<u64>,
    frame_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    font_path: Option<PathBuf>,
    font_px: Option<f32>,
    reference_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisposalConfigFile {
    max_distance_km: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DirectionsConfigFile {
    url: Option<String>,
    mapbox_token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct I18nConfigFile {
    locale: Option<String>,
    dictionary: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub backend_url: String,
    pub request_timeout: Duration,
    pub live: LiveSettings,
    pub overlay: OverlaySettings,
    pub max_distance_km: f64,
    pub directions_url: String,
    pub mapbox_token: Option<String>,
    pub locale: Locale,
    /// Extra messages merged over the active locale.
    pub dictionary_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub ws_url: String,
    pub camera_url: String,
    /// Connect and read timeout for HTTP cameras.
    pub camera_timeout: Duration,
    pub frame_interval: Duration,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    pub font_path: Option<PathBuf>,
    pub font_px: f32,
    pub reference_size: u32,
}

impl ClientConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRASHLENS_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ClientConfigFile) -> Result<Self> {
        let backend = file.backend.unwrap_or_default();
        let live = file.live.unwrap_or_default();
        let overlay = file.overlay.unwrap_or_default();
        let directions = file.directions.unwrap_or_default();
        let i18n = file.i18n.unwrap_or_default();
        let locale = match i18n.locale.as_deref() {
            Some(code) => code.parse()?,
            None => Locale::default(),
        };
        Ok(Self {
            backend_url: backend
                .url
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
            request_timeout: Duration::from_secs(
                backend.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            live: LiveSettings {
                ws_url: live.ws_url.unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
                camera_url: live
                    .camera_url
                    .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
                camera_timeout: live
                    .camera_timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_CAMERA_TIMEOUT),
                frame_interval: Duration::from_millis(
                    live.frame_interval_ms.unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
                ),
                jpeg_quality: live.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            overlay: OverlaySettings {
                font_path: overlay.font_path,
                font_px: overlay.font_px.unwrap_or(DEFAULT_FONT_PX),
                reference_size: overlay
                    .reference_size
                    .unwrap_or(crate::detection::DEFAULT_REFERENCE_SIZE),
            },
            max_distance_km: file
                .disposal
                .and_then(|disposal| disposal.max_distance_km)
                .unwrap_or(DEFAULT_MAX_DISTANCE_KM),
            directions_url: directions
                .url
                .unwrap_or_else(|| DEFAULT_DIRECTIONS_URL.to_string()),
            mapbox_token: directions.mapbox_token,
            locale,
            dictionary_path: i18n.dictionary,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_value("TRASHLENS_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(url) = env_value("TRASHLENS_WS_URL") {
            self.live.ws_url = url;
        }
        if let Some(url) = env_value("TRASHLENS_CAMERA_URL") {
            self.live.camera_url = url;
        }
        if let Some(interval) = env_value("TRASHLENS_FRAME_INTERVAL_MS") {
            let millis: u64 = interval.parse().map_err(|_| {
                anyhow!("TRASHLENS_FRAME_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.live.frame_interval = Duration::from_millis(millis);
        }
        if let Some(locale) = env_value("TRASHLENS_LOCALE") {
            self.locale = locale.parse()?;
        }
        if let Some(path) = env_value("TRASHLENS_FONT_PATH") {
            self.overlay.font_path = Some(PathBuf::from(path));
        }
        if let Some(distance) = env_value("TRASHLENS_MAX_DISTANCE_KM") {
            self.max_distance_km = distance
                .parse()
                .map_err(|_| anyhow!("TRASHLENS_MAX_DISTANCE_KM must be a number of kilometres"))?;
        }
        if let Some(token) = env_value("TRASHLENS_MAPBOX_TOKEN") {
            self.mapbox_token = Some(token);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.live.frame_interval.is_zero() {
            return Err(anyhow!("frame interval must be greater than zero"));
        }
        if self.live.camera_timeout.is_zero() {
            return Err(anyhow!("camera timeout must be greater than zero"));
        }
        if !(1..=100).contains(&self.live.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be between 1 and 100"));
        }
        if !self.max_distance_km.is_finite() || self.max_distance_km <= 0.0 {
            return Err(anyhow!("max distance must be a positive number of kilometres"));
        }
        if self.overlay.reference_size == 0 {
            return Err(anyhow!("reference frame size must be greater than zero"));
        }
        if !self.overlay.font_px.is_finite() || self.overlay.font_px <= 0.0 {
            return Err(anyhow!("font size must be positive"));
        }
        if self.request_timeout.is_zero() {
            return Err(anyhow!("request timeout must be greater than zero"));
        }
        for (name, value, schemes) in [
            ("backend url", &self.backend_url, &["http", "https"][..]),
            ("websocket url", &self.live.ws_url, &["ws", "wss"][..]),
            ("directions url", &self.directions_url, &["http", "https"][..]),
        ] {
            let url = url::Url::parse(value)
                .with_context(|| format!("invalid {} '{}'", name, value))?;
            if !schemes.contains(&url.scheme()) {
                return Err(anyhow!(
                    "{} '{}' must use one of: {}",
                    name,
                    value,
                    schemes.join(", ")
                ));
            }
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<ClientConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
