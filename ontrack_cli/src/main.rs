use std::ffi::OsString;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use ontrack::{
    FrameSource, ObjectDimensions, Region, TrackerConfig, TrackingSession, Trajectory,
    TrajectoryRecorder, VideoSink, metrics,
};

#[cfg(feature = "opencv")]
mod capture;

#[derive(Parser, Debug)]
#[command(name = "ontrack", version, about = "Track a single moving animal and analyse its trajectory")]
struct Args {
    /// TOML file with tuning overrides (falls back to $ONTRACK_CONFIG).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Track the largest moving object and write <OUTPUT_BASE>.txt
    Track {
        kind: SessionKind,
        /// Camera index (live) or recording path (rec).
        source: String,
        /// Output files are named after this path.
        output_base: PathBuf,
        /// Larger physical dimension of the object, as seen by the camera.
        #[arg(long)]
        larger: f64,
        /// Smaller physical dimension of the object.
        #[arg(long)]
        smaller: f64,
        /// Skip the annotated video.
        #[arg(long)]
        no_video: bool,
        /// Show the annotated frames while tracking.
        #[arg(long)]
        preview: bool,
        /// Frame rate; required for image-sequence recordings.
        #[arg(long, env = "ONTRACK_FPS")]
        fps: Option<f64>,
    },

    /// Compute metrics over a recorded trajectory
    Metrics {
        trajectory: PathBuf,
        /// Total distance travelled.
        #[arg(long)]
        displacement: bool,
        /// Region x1,x2,y1,y2 for the time spent inside it.
        #[arg(long, value_name = "X1,X2,Y1,Y2", allow_hyphen_values = true)]
        inside: Option<Region>,
        /// Region x1,x2,y1,y2 for the time spent outside it.
        #[arg(long, value_name = "X1,X2,Y1,Y2", allow_hyphen_values = true)]
        outside: Option<Region>,
    },

    /// Preview a camera with axis guides to find its index
    #[cfg(feature = "opencv")]
    CamTest { index: i32 },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SessionKind {
    Live,
    Rec,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Track {
            kind,
            source,
            output_base,
            larger,
            smaller,
            no_video,
            preview,
            fps,
        } => {
            let config = TrackerConfig::load(args.config.as_deref()).context("loading configuration")?;
            let dimensions = ObjectDimensions { larger, smaller };
            let options = TrackOptions {
                write_video: config.output.write_video && !no_video,
                preview,
            };
            cmd_track(&config, kind, &source, &output_base, dimensions, fps, options)
        }
        Command::Metrics {
            trajectory,
            displacement,
            inside,
            outside,
        } => cmd_metrics(&trajectory, displacement, inside.as_ref(), outside.as_ref()),
        #[cfg(feature = "opencv")]
        Command::CamTest { index } => {
            let config = TrackerConfig::load(args.config.as_deref()).context("loading configuration")?;
            cmd_cam_test(&config, index)
        }
    }
}

struct TrackOptions {
    write_video: bool,
    preview: bool,
}

fn cmd_track(
    config: &TrackerConfig,
    kind: SessionKind,
    source: &str,
    output_base: &Path,
    dimensions: ObjectDimensions,
    fps: Option<f64>,
    options: TrackOptions,
) -> Result<()> {
    // The source is opened first: nothing is written for an unusable input.
    let mut source = open_source(kind, source, fps)?;
    let resolution = source.resolution();
    let mut session = TrackingSession::from_config(config, resolution, dimensions)
        .context("setting up the tracking session")?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("installing the Ctrl-C handler")?;

    let (mut recorder, mut sinks) =
        open_outputs(config, output_base, &options, source.frame_rate(), resolution, &cancel)?;
    let trajectory_path = with_suffix(output_base, ".txt");

    log::info!("press Ctrl-C to stop tracking");
    let summary = session
        .run(source.as_mut(), &mut recorder, &mut sinks, &cancel)
        .with_context(|| format!("tracking into {}", trajectory_path.display()))?;
    println!("{summary}");
    Ok(())
}

/// Opens the video sinks, then the trajectory file. A refused sink leaves no
/// `<output_base>.txt` behind.
fn open_outputs(
    config: &TrackerConfig,
    output_base: &Path,
    options: &TrackOptions,
    frame_rate: f64,
    resolution: (u32, u32),
    cancel: &Arc<AtomicBool>,
) -> Result<(TrajectoryRecorder<BufWriter<File>>, Vec<Box<dyn VideoSink>>)> {
    let mut sinks: Vec<Box<dyn VideoSink>> = Vec::new();
    if options.write_video {
        sinks.push(open_video_sink(output_base, frame_rate, resolution)?);
    }
    if options.preview {
        if let Some(window) = open_preview(config, cancel.clone())? {
            sinks.push(window);
        }
    }
    let recorder = TrajectoryRecorder::create(with_suffix(output_base, ".txt"))?;
    Ok((recorder, sinks))
}

fn cmd_metrics(
    path: &Path,
    displacement: bool,
    inside: Option<&Region>,
    outside: Option<&Region>,
) -> Result<()> {
    let trajectory =
        Trajectory::load(path).with_context(|| format!("loading trajectory {}", path.display()))?;

    if !displacement && inside.is_none() && outside.is_none() {
        println!("displacement: {:.2}", metrics::displacement(&trajectory));
        println!("duration: {:.2} s", trajectory.duration());
        return Ok(());
    }
    if displacement {
        println!("displacement: {:.2}", metrics::displacement(&trajectory));
    }
    if let Some(region) = inside {
        println!("time inside: {:.2} s", metrics::time_inside_region(&trajectory, region));
    }
    if let Some(region) = outside {
        println!("time outside: {:.2} s", metrics::time_outside_region(&trajectory, region));
    }
    Ok(())
}

#[cfg(feature = "opencv")]
fn cmd_cam_test(config: &TrackerConfig, index: i32) -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("installing the Ctrl-C handler")?;
    log::info!("showing camera {index}; press q to stop");
    let annotator = ontrack::core_modules::annotation::Annotator::from_config(&config.output)?;
    let shown = capture::cam_test(index, annotator, cancel)
        .with_context(|| format!("previewing camera {index}"))?;
    log::info!("{shown} frames shown");
    Ok(())
}

#[cfg(feature = "opencv")]
fn open_source(kind: SessionKind, source: &str, fps: Option<f64>) -> Result<Box<dyn FrameSource>> {
    let opened = match kind {
        SessionKind::Live => {
            let index: i32 = source
                .parse()
                .with_context(|| format!("camera index must be a non-negative integer, got {source:?}"))?;
            capture::OpenCvSource::camera(index, fps)?
        }
        SessionKind::Rec => {
            let path = Path::new(source);
            if path.is_dir() {
                return image_sequence(path, fps);
            }
            capture::OpenCvSource::file(path, fps)?
        }
    };
    Ok(Box::new(opened))
}

#[cfg(not(feature = "opencv"))]
fn open_source(kind: SessionKind, source: &str, fps: Option<f64>) -> Result<Box<dyn FrameSource>> {
    match kind {
        SessionKind::Live => Err(anyhow!(
            "live capture needs a build with the `opencv` feature"
        )),
        SessionKind::Rec => image_sequence(Path::new(source), fps),
    }
}

fn image_sequence(path: &Path, fps: Option<f64>) -> Result<Box<dyn FrameSource>> {
    let fps = fps.ok_or_else(|| anyhow!("--fps is required for an image-sequence recording"))?;
    let source = ontrack::ImageSequenceSource::open(path, fps)
        .with_context(|| format!("opening recording {}", path.display()))?;
    Ok(Box::new(source))
}

#[cfg(feature = "opencv")]
fn open_video_sink(base: &Path, fps: f64, resolution: (u32, u32)) -> Result<Box<dyn VideoSink>> {
    Ok(Box::new(capture::Mp4Sink::create(&with_suffix(base, ".mp4"), fps, resolution)?))
}

#[cfg(not(feature = "opencv"))]
fn open_video_sink(base: &Path, _fps: f64, _resolution: (u32, u32)) -> Result<Box<dyn VideoSink>> {
    Ok(Box::new(ontrack::ImageSequenceSink::create(with_suffix(base, "_frames"))?))
}

#[cfg(feature = "opencv")]
fn open_preview(config: &TrackerConfig, cancel: Arc<AtomicBool>) -> Result<Option<Box<dyn VideoSink>>> {
    let annotator = ontrack::core_modules::annotation::Annotator::from_config(&config.output)?;
    let window = capture::PreviewWindow::open(annotator, cancel)?;
    Ok(Some(Box::new(window)))
}

#[cfg(not(feature = "opencv"))]
fn open_preview(_config: &TrackerConfig, _cancel: Arc<AtomicBool>) -> Result<Option<Box<dyn VideoSink>>> {
    log::warn!("--preview needs a build with the `opencv` feature; continuing without it");
    Ok(None)
}

/// `base` with `suffix` appended to its last component (`run1` -> `run1.txt`).
fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
