//! Basic example of using partcut-eye
//!
//! Usage: cargo run --example watch_folder -- <model.onnx> [captures] [output]

use partcut_eye::{SegmentationService, ServiceConfig};
use std::path::PathBuf;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let model_path = args
        .next()
        .ok_or("Usage: watch_folder <model.onnx> [captures] [output]")?;
    let input = PathBuf::from(args.next().unwrap_or_else(|| "captures".to_string()));
    let output = PathBuf::from(args.next().unwrap_or_else(|| "output".to_string()));

    let mut config = ServiceConfig::default();
    config.classifier.model_path = PathBuf::from(model_path);

    let service = SegmentationService::initialize(config)
        .map_err(|e| format!("Failed to initialize: {}", e))?;
    std::fs::create_dir_all(&input)?;
    service.start_watching(&input, &output)?;

    println!("Watching {:?}, cutouts go to {:?}", input, output);
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;

    if !service.shutdown(Duration::from_secs(5)).await {
        eprintln!("Queue did not drain in time");
    }
    println!("Processed {} captures", service.queue().processed_count());
    Ok(())
}
