use anyhow::{bail, Context, Result};
use burn::tensor::backend::AutodiffBackend;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use radiance_data::{AssetQueue, FrameSource, LoadEvent, TransformsFile};
use radiance_train::dataset::rank_views;
use radiance_train::loss::psnr_from_mse;
use radiance_train::{CameraPose, PreviewImage, SceneSession, StepOutcome, TrainConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "radiance")]
#[command(about = "Online radiance field trainer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show transform metadata and validate every pose
    Info {
        /// Path to transforms.json
        #[arg(short, long)]
        data: PathBuf,

        /// Radius of the orbit camera used for the nearest-view listing
        #[arg(long, default_value = "4.0")]
        orbit_radius: f32,
    },

    /// Load training images, train for a number of steps and write previews
    Train(TrainArgs),
}

#[derive(Args)]
struct TrainArgs {
    /// Path to transforms.json
    #[arg(short, long)]
    data: PathBuf,

    /// Number of frames to load (default: all)
    #[arg(long)]
    images: Option<usize>,

    #[arg(long, default_value = "1000")]
    steps: usize,

    /// JSON training configuration
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    resolution: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(short, long, default_value = "preview.png")]
    output: PathBuf,

    /// Render a turntable of this many frames after training
    #[arg(long, default_value = "0")]
    orbit_frames: usize,

    #[arg(long, default_value = "orbit")]
    orbit_dir: PathBuf,

    #[arg(long, default_value = "4.0")]
    orbit_radius: f32,

    /// Tensor backend: ndarray, wgpu
    #[arg(long, default_value = "ndarray")]
    backend: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { data, orbit_radius } => info(&data, orbit_radius),
        Commands::Train(args) => match args.backend.as_str() {
            "ndarray" => {
                use burn::backend::{Autodiff, NdArray};
                run_training::<Autodiff<NdArray>>(args, Default::default())
            }
            #[cfg(feature = "wgpu")]
            "wgpu" => {
                use burn::backend::wgpu::WgpuDevice;
                use burn::backend::{Autodiff, Wgpu};
                run_training::<Autodiff<Wgpu>>(args, WgpuDevice::default())
            }
            #[cfg(not(feature = "wgpu"))]
            "wgpu" => {
                bail!("wgpu backend not available. Rebuild with --features wgpu");
            }
            other => {
                bail!("Unknown backend '{}'. Use: ndarray, wgpu", other);
            }
        },
    }
}

fn info(data: &Path, orbit_radius: f32) -> Result<()> {
    let transforms = TransformsFile::load(data)?;
    let tolerance = TrainConfig::default().pose_tolerance;
    let base = radiance_data::transforms::base_dir(data);

    println!("Transform metadata: {}", data.display());
    println!("  Frames:            {}", transforms.len());
    println!(
        "  Half FOV (x):      {:.4} rad ({:.2}°)",
        transforms.camera_angle_x,
        transforms.camera_angle_x.to_degrees()
    );

    let mut poses = Vec::new();
    for i in 0..transforms.len() {
        match transforms.pose(i, tolerance) {
            Ok(pose) => {
                let path = transforms.image_path(&base, i);
                let status = if path.exists() { "" } else { "  (missing)" };
                println!(
                    "  [{:3}] |t| = {:.3}  {}{}",
                    i,
                    pose.position().length(),
                    path.display(),
                    status
                );
                poses.push((i, pose));
            }
            Err(e) => println!("  [{:3}] invalid: {:#}", i, e),
        }
    }
    println!("  Valid poses:       {}/{}", poses.len(), transforms.len());

    if !poses.is_empty() {
        let orbit = CameraPose::orbit(0.0, orbit_radius)?;
        let ranked = rank_views(poses.iter().map(|(_, p)| p), orbit.position());
        let nearest: Vec<usize> = ranked.iter().take(3).map(|&r| poses[r].0).collect();
        println!("  Nearest to orbit:  {:?}", nearest);
    }
    Ok(())
}

fn load_config(args: &TrainArgs) -> Result<TrainConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => TrainConfig::default(),
    };
    if let Some(resolution) = args.resolution {
        config.resolution = resolution;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(lr) = args.learning_rate {
        config.learning_rate = lr;
    }
    Ok(config)
}

fn run_training<B: AutodiffBackend>(args: TrainArgs, device: B::Device) -> Result<()> {
    let config = load_config(&args)?;
    let source = FrameSource::open(&args.data, config.resolution, config.pose_tolerance)?;
    let expected = args.images.map_or(source.len(), |n| n.min(source.len()));
    if expected == 0 {
        bail!("No frames to train on in {}", args.data.display());
    }
    let half_fov_x = source.transforms.camera_angle_x;

    let mut session = SceneSession::<B>::new(config, half_fov_x, expected, device)?;
    let mut queue = AssetQueue::spawn(source)?;
    queue.request(Some(expected));

    while !session.is_ready() {
        match queue.recv() {
            Some(LoadEvent::Loaded { example, .. }) => {
                session.register(example)?;
            }
            Some(LoadEvent::Failed { index, error }) => {
                bail!("Frame {} could not be loaded: {}", index, error);
            }
            Some(LoadEvent::Exhausted) => {}
            None => bail!(
                "Asset queue stopped after {} of {} frames",
                session.dataset().len(),
                expected
            ),
        }
    }
    drop(queue);

    let camera = *session
        .dataset()
        .get(0)
        .context("Dataset is empty")?
        .pose();

    let pb = ProgressBar::new(args.steps as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed}] [{bar:30}] {pos}/{len} loss={msg}")?,
    );

    let mut diverged = 0usize;
    session.start_burst(args.steps);
    while session.burst().is_running() {
        let report = session.tick(&camera)?;
        if let Some(StepOutcome::Trained { loss, .. }) = report.step {
            pb.set_message(format!("{:.5}", loss));
        }
        if report.diverged {
            diverged += 1;
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");
    if diverged > 0 {
        tracing::warn!("{} of {} steps were discarded", diverged, args.steps);
    }

    session.update_view(&camera, true)?;
    write_preview(session.preview(), &args.output)?;
    log_psnr(&session, &camera)?;
    tracing::info!("Preview written to {}", args.output.display());

    if args.orbit_frames > 0 {
        std::fs::create_dir_all(&args.orbit_dir)
            .with_context(|| format!("Failed to create {}", args.orbit_dir.display()))?;
        for k in 0..args.orbit_frames {
            let t = std::f32::consts::TAU * k as f32 / args.orbit_frames as f32;
            let pose = CameraPose::orbit(t, args.orbit_radius)?;
            session.update_view(&pose, false)?;
            write_preview(
                session.preview(),
                &args.orbit_dir.join(format!("frame_{:04}.png", k)),
            )?;
        }
        tracing::info!(
            "Wrote {} turntable frames to {}",
            args.orbit_frames,
            args.orbit_dir.display()
        );
    }

    Ok(())
}

fn log_psnr<B: AutodiffBackend>(session: &SceneSession<B>, camera: &CameraPose) -> Result<()> {
    let dataset = session.dataset();
    let Some(&nearest) = dataset.nearest_views(camera.position()).first() else {
        return Ok(());
    };
    let example = dataset.get(nearest).context("Nearest view out of range")?;
    let mse = session.trainer().evaluate(example, dataset.half_fov_x())?;
    tracing::info!(
        "Nearest training view {}: MSE {:.5}, PSNR {:.2} dB",
        nearest,
        mse,
        psnr_from_mse(mse, 2.0)
    );
    Ok(())
}

fn write_preview(preview: &PreviewImage, path: &Path) -> Result<()> {
    let side = preview.resolution() as u32;
    let image = image::RgbaImage::from_raw(side, side, preview.to_rgba8())
        .context("Preview buffer does not match its resolution")?;
    image
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
