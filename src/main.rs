//! Fraud + Receipt Gateway - Main Entry Point
//!
//! Reads scoring requests as JSON lines, scores each transaction, extracts
//! merchant and total from its receipt, and writes one JSON line per request
//! in input order.

use anyhow::{Context, Result};
use clap::Parser;
use fraud_receipt_gateway::{
    config::{AppConfig, LoggingConfig},
    metrics::{MetricsReporter, PipelineMetrics},
    models::ScoringArtifacts,
    pipeline::{ScoringPipeline, ScoringRequest},
    receipt::{build_recognizer, ReceiptProcessor},
    PipelineError,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "fraud-receipt-gateway",
    version,
    about = "Score transactions and extract receipt fields from JSON-lines requests"
)]
struct Cli {
    /// Configuration file (default: config/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON-lines request file (default: stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => AppConfig::load()?,
    };
    init_logging(&config.logging);

    info!("Starting Fraud + Receipt Gateway");
    info!(
        "Risk levels: medium>={:.2}, high>={:.2}",
        config.detection.risk_levels.medium, config.detection.risk_levels.high
    );

    let artifacts = ScoringArtifacts::load(&config.artifacts)?;
    let recognizer = build_recognizer(&config.ocr)?;
    info!("OCR engine initialized: {}", recognizer.name());

    let metrics = Arc::new(PipelineMetrics::new());
    let pipeline = Arc::new(ScoringPipeline::new(
        artifacts,
        config.detection.risk_levels.clone(),
        ReceiptProcessor::new(recognizer),
        metrics.clone(),
    ));

    if config.pipeline.metrics_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.pipeline.metrics_interval_secs);
        tokio::spawn(reporter.start());
    }

    let workers = config.pipeline.workers.max(1);
    info!("Processing requests with {} parallel workers", workers);

    match &cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            run(BufReader::new(file), pipeline, workers).await?;
        }
        None => run(BufReader::new(tokio::io::stdin()), pipeline, workers).await?,
    }

    info!("Gateway shutting down...");
    metrics.print_summary();

    Ok(())
}

/// Process every request line, at most `workers` at a time.
///
/// Handles are queued in input order and a single writer awaits them in that
/// order, so output lines match input lines one to one.
async fn run<R>(input: R, pipeline: Arc<ScoringPipeline>, workers: usize) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let semaphore = Arc::new(Semaphore::new(workers));
    let (tx, mut rx) = mpsc::channel::<JoinHandle<Value>>(workers * 2);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(handle) = rx.recv().await {
            let output = match handle.await {
                Ok(output) => output,
                Err(e) => {
                    error!(error = %e, "Request task failed");
                    error_line(&PipelineError::Extraction(format!("Request task failed: {}", e)))
                }
            };
            stdout.write_all(output.to_string().as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.flush().await
    });

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request line")? {
        if line.trim().is_empty() {
            continue;
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker semaphore closed")?;
        let pipeline = pipeline.clone();

        let handle = tokio::spawn(async move {
            let output = match serde_json::from_str::<ScoringRequest>(&line) {
                Ok(request) => match pipeline.process(&request).await {
                    Ok(result) => serde_json::to_value(&result).unwrap_or_else(|e| {
                        error_line(&PipelineError::Scoring(format!(
                            "Failed to serialize result: {}",
                            e
                        )))
                    }),
                    Err(e) => error_line(&e),
                },
                Err(e) => {
                    let err = PipelineError::Validation(format!("Malformed request: {}", e));
                    pipeline.metrics().record_failure(&err);
                    error_line(&err)
                }
            };

            // Release permit when done
            drop(permit);
            output
        });

        if tx.send(handle).await.is_err() {
            break;
        }
    }

    drop(tx);
    writer
        .await
        .context("Output writer panicked")?
        .context("Failed to write results")?;

    Ok(())
}

fn error_line(err: &PipelineError) -> Value {
    json!({ "error": { "kind": err.kind(), "message": err.message() } })
}

/// Logs go to stderr; stdout carries the result lines.
fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fraud_receipt_gateway={}", config.level)));

    if config.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
