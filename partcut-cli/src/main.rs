// partcut command line interface
// Watch a capture folder or segment a single image into body-part cutouts

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use partcut_eye::{Device, ProcessReport, SegmentationService, ServiceConfig};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Time the queue gets to drain after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "partcut")]
#[command(about = "Body-part cutouts for captured photographs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Also append logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a folder and write cutouts for every new capture
    Watch {
        /// Folder the capture UI writes into
        #[arg(long)]
        watch_dir: Option<PathBuf>,

        /// Root of the region-keyed output tree
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Path to the ONNX body-part model
        #[arg(long)]
        model_path: Option<PathBuf>,

        /// Inference device (auto, cpu, cuda)
        #[arg(long)]
        device: Option<Device>,

        /// Configuration file path
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Also process captures already in the folder
        #[arg(long)]
        process_existing: bool,
    },

    /// Segment one image and exit
    Segment {
        /// Image to segment
        image: PathBuf,

        /// Root of the region-keyed output tree
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Path to the ONNX body-part model
        #[arg(long)]
        model_path: Option<PathBuf>,

        /// Inference device (auto, cpu, cuda)
        #[arg(long)]
        device: Option<Device>,

        /// Configuration file path
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Watch {
            watch_dir,
            output_dir,
            model_path,
            device,
            config,
            process_existing,
        } => {
            let mut config = load_config(config.as_deref())?;
            apply_overrides(&mut config, model_path, device);
            if let Some(dir) = watch_dir {
                config.watch.input_dir = dir;
            }
            if let Some(dir) = output_dir {
                config.output.output_dir = dir;
            }
            config.watch.process_existing |= process_existing;
            run_watch(config).await?;
        }
        Commands::Segment {
            image,
            output_dir,
            model_path,
            device,
            config,
            json,
        } => {
            let mut config = load_config(config.as_deref())?;
            apply_overrides(&mut config, model_path, device);
            if let Some(dir) = output_dir {
                config.output.output_dir = dir;
            }
            run_segment(config, image, json).await?;
        }
    }

    Ok(())
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            builder
                .with_ansi(false)
                .with_writer(std::io::stdout.and(Mutex::new(file)))
                .init();
        }
        None => builder.init(),
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ServiceConfig> {
    match path {
        Some(path) => {
            let config = ServiceConfig::from_toml_file(path)?;
            info!("Loaded configuration from {:?}", path);
            Ok(config)
        }
        None => Ok(ServiceConfig::default()),
    }
}

fn apply_overrides(config: &mut ServiceConfig, model_path: Option<PathBuf>, device: Option<Device>) {
    if let Some(path) = model_path {
        config.classifier.model_path = path;
    }
    if let Some(device) = device {
        config.classifier.device = device;
    }
}

async fn run_watch(config: ServiceConfig) -> Result<()> {
    let input = config.watch.input_dir.clone();
    let output = config.output.output_dir.clone();

    if !input.exists() {
        std::fs::create_dir_all(&input)
            .with_context(|| format!("Failed to create watch folder {:?}", input))?;
        info!("Created watch folder {:?}", input);
    }

    let service = SegmentationService::initialize(config).context("Failed to start segmentation service")?;
    service.start_watching(&input, &output)?;

    info!("Watching {:?}, writing cutouts to {:?}", input, output);
    info!("Press Ctrl+C to stop");
    wait_for_shutdown().await;

    info!("Shutting down...");
    if !service.shutdown(SHUTDOWN_GRACE).await {
        warn!("Exiting with {} captures still queued", service.queue().pending_len());
    }
    info!("Processed {} captures", service.queue().processed_count());
    Ok(())
}

async fn run_segment(config: ServiceConfig, image: PathBuf, json: bool) -> Result<()> {
    if !image.is_file() {
        anyhow::bail!("Image not found: {:?}", image);
    }
    let output = config.output.output_dir.clone();

    let report = tokio::task::spawn_blocking(move || -> Result<ProcessReport> {
        let service = SegmentationService::initialize(config)?;
        Ok(service.process_file(&image, &output)?)
    })
    .await
    .context("Segmentation task failed")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if !report.is_complete() {
        anyhow::bail!("{} regions could not be written", report.failed_regions.len());
    }
    Ok(())
}

fn print_report(report: &ProcessReport) {
    println!("Source: {}", report.source.display());
    println!("Elapsed: {} ms", report.elapsed_ms);
    for artifact in &report.artifacts {
        println!(
            "  {:<10} {:>8} px  {}",
            artifact.region.name(),
            artifact.pixel_count,
            artifact.path.display()
        );
    }
    for failure in &report.failed_regions {
        println!("  {:<10} FAILED   {}", failure.region.name(), failure.reason);
    }
    if let Some(path) = &report.label_map {
        println!("Label map: {}", path.display());
    }
}

/// Wait for shutdown signal
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
