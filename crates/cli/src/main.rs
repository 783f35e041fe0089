use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use crowdsight_core::demographics::domain::category_aggregator::CategoryAggregator;
use crowdsight_core::demographics::domain::category_publisher::{
    CategoryPublisher, FanoutCategoryPublisher,
};
use crowdsight_core::demographics::infrastructure::channel_category_publisher::ChannelCategoryPublisher;
use crowdsight_core::demographics::infrastructure::json_file_category_publisher::JsonFileCategoryPublisher;
use crowdsight_core::detection::domain::face_analyzer::FaceAnalyzer;
use crowdsight_core::detection::infrastructure::ffmpeg_frame_source::FfmpegFrameSource;
use crowdsight_core::detection::infrastructure::log_overlay_renderer::LogOverlayRenderer;
use crowdsight_core::detection::infrastructure::onnx_face_analyzer::{
    OnnxFaceAnalyzer, OnnxModelPaths, DEFAULT_CONFIDENCE,
};
use crowdsight_core::detection::infrastructure::replay_face_analyzer::ReplayFaceAnalyzer;
use crowdsight_core::recognition::domain::descriptor_matcher::DescriptorMatcher;
use crowdsight_core::recognition::domain::identity_store::IdentityStore;
use crowdsight_core::recognition::domain::registration_coordinator::RegistrationCoordinator;
use crowdsight_core::recognition::infrastructure::http_identity_store::HttpIdentityStore;
use crowdsight_core::recognition::infrastructure::json_file_identity_store::JsonFileIdentityStore;
use crowdsight_core::scheduling::detection_scheduler::DetectionScheduler;
use crowdsight_core::scheduling::frame_clock::{run_loop, FrameClock};
use crowdsight_core::scheduling::loop_logger::SummaryLoopLogger;
use crowdsight_core::shared::config::DetectionConfig;
use crowdsight_core::shared::constants::{DESCRIPTOR_MODEL, FACE_MODEL, GENDER_AGE_MODEL};
use crowdsight_core::shared::model_resolver::{self, ModelSpec, ProgressFn};

/// Recognizes returning faces in a video feed and publishes the dominant
/// audience age category.
#[derive(Parser)]
#[command(name = "crowdsight")]
struct Cli {
    /// Video file, or a capture device when --format is given
    /// (e.g. /dev/video0 with v4l2).
    input: String,

    /// ffmpeg input device format for live capture (v4l2, avfoundation, dshow).
    #[arg(long)]
    format: Option<String>,

    /// Base URL of an HTTP identity store (users.json, register_new, save).
    #[arg(long, conflicts_with = "store_file")]
    store_url: Option<String>,

    /// JSON file used as the identity store.
    #[arg(long)]
    store_file: Option<PathBuf>,

    /// Also write every dominant-category update to this JSON file.
    #[arg(long)]
    publish_file: Option<PathBuf>,

    /// Replay recorded face analyses from a JSON file instead of running models.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Directory to look in for model files before downloading them.
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Config file (default: the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum descriptor distance accepted as a match (default: the
    /// descriptor model's recommendation).
    #[arg(long)]
    threshold: Option<f64>,

    /// Minimum spacing between registrations, in milliseconds.
    #[arg(long)]
    cooldown_ms: Option<u64>,

    /// Minimum spacing between detections, in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// How far back observations count toward the dominant category, in milliseconds.
    #[arg(long)]
    window_ms: Option<u64>,

    /// Face detection confidence threshold (0.0-1.0).
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f64,

    /// Stop after this many seconds.
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    validate(&cli)?;
    let config = load_config(&cli)?;

    let store = open_store(&cli)?;
    let threshold = config.resolved_match_threshold(descriptor_threshold(&cli));
    log::info!("Match threshold: {threshold}");
    let mut matcher = DescriptorMatcher::new(threshold);
    match store.list_identities() {
        Ok(identities) => {
            log::info!("Loaded {} known identities", identities.len());
            matcher.replace_snapshot(identities);
        }
        Err(e) => log::warn!("Starting with no known identities: {e}"),
    }

    let analyzer = build_analyzer(&cli)?;
    let publisher = build_publisher(&cli);

    let mut scheduler = DetectionScheduler::new(
        analyzer,
        matcher,
        RegistrationCoordinator::new(store, config.registration_cooldown()),
        CategoryAggregator::new(config.window_horizon(), config.dominance_percent),
        publisher,
        config.detection_interval(),
    )
    .with_logger(Box::new(SummaryLoopLogger::new()));

    let mut source = FfmpegFrameSource::open(&cli.input, cli.format.as_deref());
    let mut overlay = LogOverlayRenderer::new();
    let mut clock = FrameClock::new(config.frame_rate_hz);
    let deadline = cli
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let stop = install_stop_handler()?;

    let report = run_loop(
        &mut scheduler,
        &source,
        &mut overlay,
        &mut clock,
        &stop,
        deadline,
    );
    source.stop();
    log::info!(
        "Processed {} batches over {} ticks; {} identities known",
        report.batches,
        report.ticks,
        scheduler.matcher().identity_count()
    );
    scheduler.shutdown();
    Ok(())
}

/// Replayed descriptors come from an unknown model, so only the bundled
/// descriptor model contributes a recommended threshold.
fn descriptor_threshold(cli: &Cli) -> Option<f64> {
    if cli.replay.is_some() {
        None
    } else {
        DESCRIPTOR_MODEL.recommended_threshold
    }
}

/// Ctrl+C asks the loop to stop, so the last batch is applied and pending
/// registrations are saved before exit.
fn install_stop_handler() -> Result<Arc<AtomicBool>, Box<dyn std::error::Error>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || request_stop(&flag))
        .map_err(|e| format!("failed to set Ctrl+C handler: {e}"))?;
    Ok(stop)
}

fn request_stop(flag: &AtomicBool) {
    if !flag.swap(true, Ordering::SeqCst) {
        eprintln!("\nStopping, finishing pending work...");
    }
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.format.is_none() && !Path::new(&cli.input).exists() {
        return Err(format!("Input file not found: {}", cli.input).into());
    }
    if !(0.0..=1.0).contains(&cli.confidence) {
        return Err(format!(
            "Confidence must be between 0.0 and 1.0, got {}",
            cli.confidence
        )
        .into());
    }
    if let Some(replay) = &cli.replay {
        if !replay.exists() {
            return Err(format!("Replay file not found: {}", replay.display()).into());
        }
    }
    Ok(())
}

/// Config file values, overridden by any flags given on the command line.
fn load_config(cli: &Cli) -> Result<DetectionConfig, Box<dyn std::error::Error>> {
    let mut config = match cli.config.clone().or_else(DetectionConfig::default_path) {
        Some(path) => DetectionConfig::load(&path)?,
        None => DetectionConfig::default(),
    };
    if let Some(threshold) = cli.threshold {
        config.match_threshold = Some(threshold);
    }
    if let Some(ms) = cli.cooldown_ms {
        config.registration_cooldown_ms = ms;
    }
    if let Some(ms) = cli.interval_ms {
        config.detection_interval_ms = ms;
    }
    if let Some(ms) = cli.window_ms {
        config.window_horizon_ms = ms;
    }
    config.validate()?;
    log::debug!("Effective config: {config:?}");
    Ok(config)
}

fn open_store(cli: &Cli) -> Result<Arc<dyn IdentityStore>, Box<dyn std::error::Error>> {
    if let Some(url) = &cli.store_url {
        log::info!("Using identity store at {url}");
        return Ok(Arc::new(HttpIdentityStore::new(url)?));
    }
    let path = match &cli.store_file {
        Some(path) => path.clone(),
        None => JsonFileIdentityStore::default_path()
            .ok_or("Cannot determine a data directory; pass --store-file")?,
    };
    log::info!("Using identity store file {}", path.display());
    Ok(Arc::new(JsonFileIdentityStore::open(&path)?))
}

fn build_analyzer(cli: &Cli) -> Result<Box<dyn FaceAnalyzer>, Box<dyn std::error::Error>> {
    if let Some(path) = &cli.replay {
        let analyzer = ReplayFaceAnalyzer::load(path)?;
        log::info!(
            "Replaying {} recorded frames from {}",
            analyzer.recorded_frames(),
            path.display()
        );
        return Ok(Box::new(analyzer));
    }

    let detector = resolve_model(FACE_MODEL, cli)?;
    let descriptor = resolve_model(DESCRIPTOR_MODEL, cli)?;
    let gender_age = resolve_model(GENDER_AGE_MODEL, cli)?;
    let analyzer = OnnxFaceAnalyzer::new(
        OnnxModelPaths {
            detector: &detector,
            descriptor: &descriptor,
            gender_age: &gender_age,
        },
        cli.confidence,
    )?;
    Ok(Box::new(analyzer))
}

fn resolve_model(spec: ModelSpec, cli: &Cli) -> Result<PathBuf, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {}", spec.name);
    let progress: ProgressFn = Box::new(download_progress);
    let path = model_resolver::resolve(spec, cli.models_dir.as_deref(), Some(&progress))?;
    Ok(path)
}

/// In-process listener that logs every update, plus the optional file.
fn build_publisher(cli: &Cli) -> Box<dyn CategoryPublisher> {
    let mut channel = ChannelCategoryPublisher::default();
    let updates = channel.subscribe();
    let name = channel.name().to_string();
    std::thread::spawn(move || {
        for update in updates {
            match serde_json::to_string(&update) {
                Ok(json) => log::info!("{name}: {json}"),
                Err(e) => log::warn!("Cannot encode category update: {e}"),
            }
        }
    });

    let mut publishers: Vec<Box<dyn CategoryPublisher>> = vec![Box::new(channel)];
    if let Some(path) = &cli.publish_file {
        publishers.push(Box::new(JsonFileCategoryPublisher::new(path)));
    }
    Box::new(FanoutCategoryPublisher::new(publishers))
}

fn download_progress(name: &str, downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading {name}... {pct}%");
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\rDownloading {name}... {downloaded} bytes");
    }
}
