//! CLI binary for docmill.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig` and prints run results.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use docmill::{
    ConversionConfig, Converter, DeviceClass, HttpAnalysisBackend, ParseMethod,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI definition ───────────────────────────────────────────────────────

/// Convert documents to Markdown through a batched analysis backend.
#[derive(Parser, Debug)]
#[command(name = "docmill", version, about)]
struct Cli {
    /// Input file, or directory whose immediate children are converted.
    input: PathBuf,

    /// Output root directory.
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Analysis method: auto, text, or ocr.
    #[arg(short, long, default_value = "auto", value_parser = ParseMethod::from_str)]
    method: ParseMethod,

    /// Document language hint.
    #[arg(short, long, default_value = "en")]
    lang: String,

    /// First page to keep (0-indexed).
    #[arg(long, default_value_t = 0)]
    start_page: usize,

    /// Last page to keep (0-indexed, inclusive; default: last page).
    #[arg(long)]
    end_page: Option<usize>,

    /// Disable formula parsing.
    #[arg(long)]
    no_formula: bool,

    /// Disable table parsing.
    #[arg(long)]
    no_table: bool,

    /// Device class override: cpu, cuda, mps, or npu.
    #[arg(long, value_parser = DeviceClass::from_str)]
    device: Option<DeviceClass>,

    /// Capacity budget override (units).
    #[arg(long)]
    capacity: Option<u32>,

    /// Analysis backend base URL.
    #[arg(long, env = "DOCMILL_BACKEND_URL", default_value = "http://localhost:8008")]
    backend_url: String,

    /// Classify, trim, and dispatch, but discard all output.
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging (-v: debug, -vv: trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut builder = ConversionConfig::builder()
        .method(cli.method)
        .language(&cli.lang)
        .page_range(cli.start_page, cli.end_page)
        .formula_enable(!cli.no_formula)
        .table_enable(!cli.no_table)
        .dry_run(cli.dry_run);
    if let Some(device) = cli.device {
        builder = builder.device_mode(device);
    }
    if let Some(capacity) = cli.capacity {
        builder = builder.capacity_budget(capacity);
    }
    let config = builder.build().context("invalid configuration")?;

    let backend = Arc::new(HttpAnalysisBackend::new(cli.backend_url.clone()));
    let converter = Converter::new(config, backend);
    let plan = converter.plan();

    eprintln!(
        "{} {} {}",
        bold("docmill"),
        dim(&format!("device={} capacity={}", plan.device, plan.capacity_budget)),
        dim(&format!("backend={}", cli.backend_url)),
    );

    let bar = spinner(&format!("Converting {}", cli.input.display()));
    let result = converter.convert(&cli.input, &cli.output).await;
    bar.finish_and_clear();

    let output = result.with_context(|| format!("conversion of '{}' failed", cli.input.display()))?;

    if output.is_empty() {
        eprintln!(
            "{} no accepted documents at {}",
            yellow("warning:"),
            cli.input.display()
        );
        return Ok(());
    }

    for record in &output.records {
        eprintln!(
            "  {} {} {}",
            green("✓"),
            record.document_name,
            dim(&record.content_file_path.display().to_string()),
        );
    }

    let s = &output.stats;
    eprintln!(
        "{} {} converted, {} skipped in {:.1}s {}",
        bold("done:"),
        s.converted_documents,
        s.skipped_documents,
        s.total_duration_ms as f64 / 1000.0,
        dim(&format!(
            "(backend {:.1}s, write {:.1}s)",
            s.dispatch_duration_ms as f64 / 1000.0,
            s.materialize_duration_ms as f64 / 1000.0
        )),
    );

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "docmill=info",
        1 => "docmill=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn spinner(msg: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(msg.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}
