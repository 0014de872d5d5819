//! trashlens - detect trash in photos, videos or a live camera and find out
//! where it goes

use anyhow::{anyhow, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use trashlens::camera;
use trashlens::category::KNOWN_CATEGORIES;
use trashlens::client::{Feedback, HttpBackend, InferenceBackend};
use trashlens::config::ClientConfig;
use trashlens::disposal::{known_points, nearby, LocationFix};
use trashlens::guide::guide_for;
use trashlens::i18n::{Catalog, Dictionary};
use trashlens::labeler::Labeler;
use trashlens::live::{LiveConfig, LiveSession, OverlaySink, WsConnector};
use trashlens::media::{capture_image, MediaFile};
use trashlens::notice::{Notice, Notifier};
use trashlens::overlay::{LabelFont, OverlayRenderer, OverlaySurface};
use trashlens::route::{MapboxDirections, RoutePlanner, RouteStatus};
use trashlens::session::{DetectionSession, ProcessedMedia};
use trashlens::{Error, FrameSize, TrashCategory};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Message language (en|vi). Overrides TRASHLENS_LOCALE and the config file.
    #[arg(long, global = true)]
    locale: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, global = true, env = "TRASHLENS_UI", default_value = "auto", value_name = "MODE")]
    ui: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect trash in a photo.
    Image {
        path: PathBuf,
        /// Save the processed image into this directory.
        #[arg(long)]
        save_dir: Option<PathBuf>,
        /// Draw the detections onto the photo locally and write a PNG here.
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Detect trash in a video. The last processed frame is the result.
    Video {
        path: PathBuf,
        /// Save the processed frame into this directory.
        #[arg(long)]
        save_dir: Option<PathBuf>,
    },
    /// Stream camera frames for live detection until Ctrl-C.
    Live {
        /// Camera URL: stub://<name>, or an http(s) MJPEG or snapshot endpoint.
        #[arg(long)]
        camera: Option<String>,
        /// Stop after this many seconds.
        #[arg(long)]
        seconds: Option<u64>,
        /// Write the last overlay layer here as PNG before stopping.
        #[arg(long)]
        overlay_out: Option<PathBuf>,
    },
    /// List disposal points near a position.
    Nearby {
        #[command(flatten)]
        position: Position,
        /// Search radius (defaults to the configured radius).
        #[arg(long)]
        radius_km: Option<f64>,
    },
    /// Walking directions to a disposal point.
    Route {
        /// Disposal point id, as listed by `nearby`.
        #[arg(long)]
        point: String,
        #[command(flatten)]
        position: Position,
    },
    /// Tell the service whether a detection was right.
    Feedback {
        /// The image that was submitted.
        image: PathBuf,
        /// Result id printed by `image` or `video`.
        #[arg(long)]
        image_id: String,
        /// Mark the detection as wrong.
        #[arg(long)]
        incorrect: bool,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Contribute hand-drawn labels for a photo.
    Contribute {
        image: PathBuf,
        /// A labeled box as two opposite corners in image pixels.
        #[arg(long = "label", value_name = "CATEGORY:X1,Y1,X2,Y2", required = true)]
        labels: Vec<String>,
        /// Write a PNG preview of the labels here.
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Show disposal guidance for one category, or all of them.
    Guide { category: Option<String> },
}

#[derive(ClapArgs, Debug)]
struct Position {
    /// Your latitude. Without both coordinates the default location is used.
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    /// Your longitude.
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
}

impl Position {
    fn resolve(&self) -> LocationFix {
        LocationFix::resolve(self.lat.zip(self.lon))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut config = ClientConfig::load()?;
    if let Some(code) = &args.locale {
        config.locale = code.parse()?;
    }
    let catalog = load_catalog(&config)?;

    match args.command {
        Command::Image {
            path,
            save_dir,
            annotate,
        } => run_image(&config, &catalog, &ui, &path, save_dir.as_deref(), annotate.as_deref()),
        Command::Video { path, save_dir } => {
            run_video(&config, &catalog, &ui, &path, save_dir.as_deref())
        }
        Command::Live {
            camera,
            seconds,
            overlay_out,
        } => run_live(&config, &catalog, &ui, camera, seconds, overlay_out.as_deref()),
        Command::Nearby {
            position,
            radius_km,
        } => run_nearby(&config, &catalog, &ui, &position, radius_km),
        Command::Route { point, position } => run_route(&config, &catalog, &ui, &point, &position),
        Command::Feedback {
            image,
            image_id,
            incorrect,
            comment,
        } => run_feedback(&config, &catalog, &ui, &image, image_id, incorrect, comment),
        Command::Contribute {
            image,
            labels,
            preview,
        } => run_contribute(&config, &catalog, &ui, &image, &labels, preview.as_deref()),
        Command::Guide { category } => {
            run_guide(&catalog, category.as_deref());
            Ok(())
        }
    }
}

fn load_catalog(config: &ClientConfig) -> Result<Catalog> {
    let mut catalog = Catalog::builtin(config.locale)?;
    if let Some(path) = &config.dictionary_path {
        let dictionary = Dictionary::from_file(path)
            .with_context(|| format!("failed to load dictionary {}", path.display()))?;
        catalog.extend(config.locale, dictionary);
    }
    Ok(catalog)
}

fn backend(config: &ClientConfig) -> Result<HttpBackend> {
    Ok(HttpBackend::new(&config.backend_url, config.request_timeout)?)
}

fn renderer(config: &ClientConfig) -> Result<OverlayRenderer> {
    let font = match &config.overlay.font_path {
        Some(path) => Some(LabelFont::load(path, config.overlay.font_px)?),
        None => {
            log::debug!("no label font configured; labels are drawn without text");
            None
        }
    };
    Ok(OverlayRenderer::new(font))
}

fn read_media(path: &Path) -> Result<MediaFile> {
    MediaFile::from_path(path).with_context(|| format!("failed to read {}", path.display()))
}

/// User-facing message for a failed submission.
fn describe(catalog: &Catalog, err: &Error) -> String {
    match err {
        Error::UnsupportedMedia {
            expected: "video", ..
        } => catalog.t("upload.invalidVideo"),
        Error::UnsupportedMedia { .. } => catalog.t("upload.invalidImage"),
        Error::MediaTooLarge { size, max } => catalog.t_with(
            "upload.tooLarge",
            &[("size", &size.to_string()), ("max", &max.to_string())],
        ),
        other => catalog.t_with("results.failed", &[("reason", &other.to_string())]),
    }
}

fn run_image(
    config: &ClientConfig,
    catalog: &Catalog,
    ui: &ui::Ui,
    path: &Path,
    save_dir: Option<&Path>,
    annotate: Option<&Path>,
) -> Result<()> {
    let backend = backend(config)?;
    let file = read_media(path)?;
    let mut session = DetectionSession::new();
    let stage = ui.stage(&catalog.t("results.detecting"));
    let result = match session.process_image(&backend, &file) {
        Ok(result) => result.cloned(),
        Err(err) => {
            stage.fail();
            let message = describe(catalog, &err);
            return Err(anyhow::Error::new(err).context(message));
        }
    };
    drop(stage);

    let Some(media) = result else {
        return Ok(());
    };
    print_result(catalog, &media);
    if let Some(dir) = save_dir {
        save_result(catalog, ui, &media, dir)?;
    }
    if let Some(out) = annotate {
        let original = trashlens::EncodedImage::from_data_url(media.original_image.clone());
        let image = original.to_image()?;
        let canvas = renderer(config)?.annotate_image(
            &image,
            &media.detections,
            FrameSize::square(config.overlay.reference_size),
        );
        canvas
            .save(out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        ui.notify(Notice::success(
            catalog.t_with("results.saved", &[("path", &out.display().to_string())]),
        ));
    }
    Ok(())
}

fn run_video(
    config: &ClientConfig,
    catalog: &Catalog,
    ui: &ui::Ui,
    path: &Path,
    save_dir: Option<&Path>,
) -> Result<()> {
    let backend = backend(config)?;
    let file = read_media(path)?;
    let mut session = DetectionSession::new();
    let stage = ui.stage(&catalog.t("results.detecting"));
    let result = match session.process_video(&backend, file) {
        Ok(result) => result.cloned(),
        Err(err) => {
            stage.fail();
            let message = describe(catalog, &err);
            return Err(anyhow::Error::new(err).context(message));
        }
    };
    drop(stage);

    match result {
        Some(media) => {
            print_result(catalog, &media);
            if let Some(dir) = save_dir {
                save_result(catalog, ui, &media, dir)?;
            }
        }
        None => ui.notify(Notice::warning(catalog.t("results.noFrames"))),
    }
    Ok(())
}

fn print_result(catalog: &Catalog, media: &ProcessedMedia) {
    println!("{}: {}", catalog.t("results.title"), media.id);
    let summary = media.summary();
    if summary.is_empty() {
        println!("  {}", catalog.t("results.summary.empty"));
        return;
    }
    println!("{}", catalog.t("results.summary.title"));
    for detection in &summary {
        let guide = guide_for(&detection.category, catalog);
        println!(
            "  {} ({})",
            guide.name,
            catalog.t_with(
                "results.summary.confidence",
                &[("value", &detection.percent().to_string())]
            )
        );
        println!("    {}", guide.instructions);
    }
}

fn save_result(catalog: &Catalog, ui: &ui::Ui, media: &ProcessedMedia, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let path = media.save_processed(dir)?;
    ui.notify(Notice::success(
        catalog.t_with("results.saved", &[("path", &path.display().to_string())]),
    ));
    Ok(())
}

fn run_live(
    config: &ClientConfig,
    catalog: &Catalog,
    ui: &ui::Ui,
    camera_url: Option<String>,
    seconds: Option<u64>,
    overlay_out: Option<&Path>,
) -> Result<()> {
    let camera_url = camera_url.unwrap_or_else(|| config.live.camera_url.clone());
    let source = camera::open(&camera_url, config.live.camera_timeout)?;
    let notifier: Arc<dyn Notifier> = Arc::new(ui.clone());
    let connector = Arc::new(WsConnector::new(config.live.ws_url.clone()));
    let mut live = LiveSession::new(
        connector,
        notifier.clone(),
        LiveConfig {
            interval: config.live.frame_interval,
            jpeg_quality: config.live.jpeg_quality,
        },
    );
    let surface = Arc::new(Mutex::new(OverlaySurface::new(
        FrameSize::default(),
        FrameSize::square(config.overlay.reference_size),
    )));
    let sink = OverlaySink::new(renderer(config)?, surface.clone());
    live.start(source, Box::new(sink)).map_err(|err| {
        anyhow::Error::new(err).context(format!("live detection via {}", config.live.ws_url))
    })?;

    let fps = 1000.0 / config.live.frame_interval.as_millis().max(1) as f64;
    notifier.notify(Notice::success(
        catalog.t_with("live.started", &[("fps", &format!("{:.1}", fps))]),
    ));

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    let deadline = seconds.map(|secs| Instant::now() + Duration::from_secs(secs));
    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        // A channel error stops the worker on its own and has been reported.
        if !live.is_active() {
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
    }

    if let Some(out) = overlay_out {
        let surface = surface
            .lock()
            .map_err(|_| anyhow!("overlay surface lock poisoned"))?;
        surface
            .layer()
            .save(out)
            .with_context(|| format!("failed to write {}", out.display()))?;
    }
    let frames = live.stats().map(|stats| stats.frames_sent()).unwrap_or(0);
    live.stop();
    log::info!("sent {} frames", frames);
    notifier.notify(Notice::success(catalog.t("live.stopped")));
    Ok(())
}

fn run_nearby(
    config: &ClientConfig,
    catalog: &Catalog,
    ui: &ui::Ui,
    position: &Position,
    radius_km: Option<f64>,
) -> Result<()> {
    let fix = position.resolve();
    if let Some(reason) = fix.warning() {
        ui.notify(Notice::warning(format!(
            "{} ({})",
            catalog.t("map.locationFallback"),
            reason
        )));
    }
    let user = fix.point();
    let radius = radius_km.unwrap_or(config.max_distance_km);
    let points = nearby(user.latitude, user.longitude, &known_points(), radius)?;

    println!("{}", catalog.t("map.title"));
    println!(
        "  {}: {:.4}, {:.4}",
        catalog.t("map.userLocation"),
        user.latitude,
        user.longitude
    );
    if points.is_empty() {
        println!(
            "  {}",
            catalog.t_with("map.none", &[("radius", &radius.to_string())])
        );
    }
    for point in &points {
        println!(
            "  [{}] {} ({}) {}",
            point.id,
            point.name,
            point.kind,
            catalog.t_with("map.distance", &[("value", &format!("{:.2}", point.distance))])
        );
        println!("      {}", point.address);
        println!(
            "      {} {}",
            catalog.t("map.acceptedMaterials"),
            point.accepted_types.join(", ")
        );
    }
    Ok(())
}

fn run_route(
    config: &ClientConfig,
    catalog: &Catalog,
    ui: &ui::Ui,
    point_id: &str,
    position: &Position,
) -> Result<()> {
    let token = config
        .mapbox_token
        .clone()
        .ok_or_else(|| anyhow!("TRASHLENS_MAPBOX_TOKEN must be set for directions"))?;
    let point = known_points()
        .into_iter()
        .find(|point| point.id == point_id)
        .ok_or_else(|| anyhow!("unknown disposal point '{}'", point_id))?;
    let fix = position.resolve();
    if let Some(reason) = fix.warning() {
        ui.notify(Notice::warning(format!(
            "{} ({})",
            catalog.t("map.locationFallback"),
            reason
        )));
    }

    let mut planner = RoutePlanner::new(Box::new(MapboxDirections::new(
        &config.directions_url,
        &token,
        config.request_timeout,
    )));
    let status = {
        let _stage = ui.stage(&catalog.t("map.getDirections"));
        planner.select(fix.point(), point)
    };
    match status {
        RouteStatus::Found => {
            if let Some(route) = planner.route() {
                println!("{}", serde_json::to_string_pretty(route)?);
            }
            Ok(())
        }
        RouteStatus::NotFound => {
            ui.notify(Notice::warning(catalog.t("map.noRoute")));
            Ok(())
        }
        RouteStatus::Failed(reason) => {
            Err(anyhow!("{} ({})", catalog.t("map.routeFailed"), reason))
        }
    }
}

fn run_feedback(
    config: &ClientConfig,
    catalog: &Catalog,
    ui: &ui::Ui,
    image: &Path,
    image_id: String,
    incorrect: bool,
    comment: Option<String>,
) -> Result<()> {
    let original = capture_image(&read_media(image)?)?;
    let feedback = Feedback::new(image_id, original.into_string(), !incorrect, comment.as_deref());
    let backend = backend(config)?;
    {
        let stage = ui.stage(&catalog.t("results.feedback.submit"));
        if let Err(err) = backend.submit_feedback(&feedback) {
            stage.fail();
            let message =
                catalog.t_with("results.feedback.failed", &[("reason", &err.to_string())]);
            return Err(anyhow::Error::new(err).context(message));
        }
    }
    ui.notify(Notice::success(catalog.t("results.feedback.thanks")));
    Ok(())
}

fn run_contribute(
    config: &ClientConfig,
    catalog: &Catalog,
    ui: &ui::Ui,
    image: &Path,
    labels: &[String],
    preview: Option<&Path>,
) -> Result<()> {
    let encoded = capture_image(&read_media(image)?)?;
    let mut labeler = Labeler::new(encoded.clone());
    for raw in labels {
        let (category, [x1, y1, x2, y2]) = parse_label(raw)?;
        labeler.select(category)?;
        labeler
            .add_corners(x1, y1, x2, y2)
            .with_context(|| format!("label '{}'", raw))?;
    }
    if let Some(out) = preview {
        labeler
            .preview(&encoded.to_image()?)
            .save(out)
            .with_context(|| format!("failed to write {}", out.display()))?;
    }

    let contribution = labeler.contribution()?;
    let backend = backend(config)?;
    {
        let _stage = ui.stage(&catalog.t("label.saveLabel"));
        backend.contribute(&contribution)?;
    }
    ui.notify(Notice::success(catalog.t("label.saved")));
    Ok(())
}

/// Parse `category:x1,y1,x2,y2`.
fn parse_label(raw: &str) -> Result<(TrashCategory, [f32; 4])> {
    let (category, corners) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("label '{}' must look like CATEGORY:X1,Y1,X2,Y2", raw))?;
    let values = corners
        .split(',')
        .map(|value| value.trim().parse::<f32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("label '{}' has a bad coordinate: {}", raw, e))?;
    let corners: [f32; 4] = values
        .try_into()
        .map_err(|_| anyhow!("label '{}' needs exactly four coordinates", raw))?;
    Ok((TrashCategory::parse(category), corners))
}

fn run_guide(catalog: &Catalog, category: Option<&str>) {
    let categories = match category {
        Some(label) => vec![TrashCategory::parse(label)],
        None => KNOWN_CATEGORIES.to_vec(),
    };
    for category in &categories {
        let guide = guide_for(category, catalog);
        println!("{}", guide.name);
        println!("  {}", guide.description);
        println!("  {}", guide.instructions);
        for reference in guide.references {
            println!("  {}", reference);
        }
    }
}
