mod cli;
mod error;
mod ivf;
mod pipeline;
mod recognition;
mod run_artifacts;
mod run_context;

use anyhow::Result;
use cli::Args;
use pipeline::orchestrator::run;
use pipeline::scoring::FfmpegScorer;
use recognition::tesseract::TesseractRecognizer;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse_args();
    let options = args.run_options();

    let recognizer = Arc::new(TesseractRecognizer::new(&args.ffmpeg, &args.tesseract));
    let scorer = FfmpegScorer::new(options.scorer.clone());

    let report = run(&args.root, &options, recognizer, &scorer).await?;
    for (name, pooled) in &report {
        tracing::info!(
            "{}: min {:.3} max {:.3} mean {:.3} harmonic mean {:.3}",
            name,
            pooled.min,
            pooled.max,
            pooled.mean,
            pooled.harmonic_mean
        );
    }

    Ok(())
}
