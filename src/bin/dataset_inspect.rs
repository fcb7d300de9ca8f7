//! Dataset Inspection Tool
//!
//! CLI tool to check recorded orderbook CSV datasets before serving them:
//! list files, summarize one, dump its cumulative timeline, print a row's
//! trace payload, and verify timestamp quality.
//!
//! Usage:
//!   cargo run --release --bin dataset_inspect -- --data-dir ./data files
//!   cargo run --release --bin dataset_inspect -- info btc_15m.csv
//!   cargo run --release --bin dataset_inspect -- row btc_15m.csv 120
//!   cargo run --release --bin dataset_inspect -- verify --all

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use fastscan_backend::playback::trace::{level_column, Book, Side, BOOK_DEPTH};
use fastscan_backend::playback::{Dataset, DatasetStore, TraceExtractor};

/// Dataset Inspection Tool for orderbook playback recordings
#[derive(Parser, Debug)]
#[command(name = "dataset_inspect")]
#[command(about = "Inspect and verify CSV orderbook datasets for timeline playback")]
struct Cli {
    /// Directory holding the CSV datasets
    #[arg(short, long, env = "FASTSCAN_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List CSV datasets in the data directory
    Files,

    /// Show rows, columns, time range and fingerprint
    Info { filename: String },

    /// Print cumulative timeline offsets
    Timeline {
        filename: String,

        /// Only print the first N rows
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print one row's trace payload as JSON
    Row {
        filename: String,
        row: usize,

        /// Order size to bar length multiplier
        #[arg(long, default_value = "1.0")]
        bar_scale_coeff: f64,
    },

    /// Verify timestamps and book columns
    Verify {
        /// Dataset to verify (otherwise --all)
        filename: Option<String>,

        /// Verify every dataset in the directory
        #[arg(long)]
        all: bool,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = DatasetStore::new(cli.data_dir.clone());

    match cli.command {
        Commands::Files => list_files(&store)?,
        Commands::Info { filename } => show_info(&store, &filename)?,
        Commands::Timeline { filename, limit } => show_timeline(&store, &filename, limit)?,
        Commands::Row {
            filename,
            row,
            bar_scale_coeff,
        } => show_row(&store, &filename, row, bar_scale_coeff)?,
        Commands::Verify {
            filename,
            all,
            json,
        } => {
            let files = match (filename, all) {
                (Some(f), _) => vec![f],
                (None, true) => store.list_files().with_context(|| {
                    format!("Failed to read data directory {:?}", cli.data_dir)
                })?,
                (None, false) => anyhow::bail!("pass a filename or --all"),
            };
            verify(&store, &files, json)?;
        }
    }

    Ok(())
}

fn load(store: &DatasetStore, filename: &str) -> Result<std::sync::Arc<Dataset>> {
    store
        .get(filename)
        .with_context(|| format!("Failed to load {}", filename))
}

fn list_files(store: &DatasetStore) -> Result<()> {
    let files = store
        .list_files()
        .with_context(|| format!("Failed to read data directory {:?}", store.data_dir()))?;

    println!("=== Datasets in {:?} ===\n", store.data_dir());
    if files.is_empty() {
        println!("No CSV files found.");
    }
    for f in files {
        println!("  {}", f);
    }
    Ok(())
}

fn show_info(store: &DatasetStore, filename: &str) -> Result<()> {
    let info = load(store, filename)?.info();
    println!("=== {} ===\n", info.filename);
    println!("  Rows:        {}", info.rows);
    println!("  Columns:     {}", info.columns);
    println!("  Start:       {}", info.time_start);
    println!("  End:         {}", info.time_end);
    println!("  Span:        {:.3}s", info.duration_ms / 1000.0);
    println!("  Fingerprint: {}", info.fingerprint);
    Ok(())
}

fn show_timeline(store: &DatasetStore, filename: &str, limit: Option<usize>) -> Result<()> {
    let dataset = load(store, filename)?;
    let offsets = dataset.timeline().offsets();
    let shown = limit.unwrap_or(offsets.len()).min(offsets.len());

    println!("{:>8} {:>14} {:>26}", "Row", "Offset (ms)", "Timestamp");
    println!("{}", "-".repeat(50));
    for (row, offset) in offsets.iter().take(shown).enumerate() {
        println!(
            "{:>8} {:>14.1} {:>26}",
            row,
            offset,
            dataset.timestamp_label(row)
        );
    }
    if shown < offsets.len() {
        println!("... {} more rows", offsets.len() - shown);
    }
    Ok(())
}

fn show_row(store: &DatasetStore, filename: &str, row: usize, coeff: f64) -> Result<()> {
    let dataset = load(store, filename)?;
    let trace = TraceExtractor::new(coeff)
        .extract(&dataset, row)
        .with_context(|| format!("Failed to extract row {} of {}", row, filename))?;
    println!("{}", serde_json::to_string_pretty(&trace)?);
    Ok(())
}

#[derive(Debug, Default, Serialize)]
struct VerifyReport {
    filename: String,
    rows: usize,
    has_timestamps: bool,
    missing_timestamps: usize,
    backward_steps: usize,
    duplicate_steps: usize,
    largest_gap_ms: f64,
    missing_book_columns: Vec<String>,
}

impl VerifyReport {
    fn is_clean(&self) -> bool {
        self.has_timestamps
            && self.missing_timestamps == 0
            && self.backward_steps == 0
            && self.missing_book_columns.is_empty()
    }
}

fn verify_dataset(dataset: &Dataset) -> VerifyReport {
    let raw = dataset.raw_timestamps_ms();
    let mut report = VerifyReport {
        filename: dataset.id().to_string(),
        rows: dataset.len(),
        has_timestamps: raw.iter().any(Option::is_some),
        missing_timestamps: raw.iter().filter(|t| t.is_none()).count(),
        ..VerifyReport::default()
    };

    let mut prev: Option<f64> = None;
    for ts in raw.into_iter().flatten() {
        if let Some(p) = prev {
            let delta = ts - p;
            if delta < 0.0 {
                report.backward_steps += 1;
            } else if delta == 0.0 {
                report.duplicate_steps += 1;
            } else if delta > report.largest_gap_ms {
                report.largest_gap_ms = delta;
            }
        }
        prev = Some(ts);
    }

    for book in [Book::Up, Book::Down] {
        for side in [Side::Bid, Side::Ask] {
            for level in 1..=BOOK_DEPTH {
                for field in ["price", "size"] {
                    let name = level_column(book, side, level, field);
                    if !dataset.has_column(&name) {
                        report.missing_book_columns.push(name);
                    }
                }
            }
        }
    }

    report
}

fn verify(store: &DatasetStore, files: &[String], json: bool) -> Result<()> {
    let mut reports = Vec::with_capacity(files.len());
    for f in files {
        reports.push(verify_dataset(&*load(store, f)?));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for r in &reports {
        let status = if r.is_clean() { "OK" } else { "WARN" };
        println!("=== {} [{}] ===", r.filename, status);
        println!("  Rows:               {}", r.rows);
        println!("  Has timestamps:     {}", r.has_timestamps);
        println!("  Missing timestamps: {}", r.missing_timestamps);
        println!("  Backward steps:     {}", r.backward_steps);
        println!("  Duplicate steps:    {}", r.duplicate_steps);
        println!("  Largest gap:        {:.1} ms", r.largest_gap_ms);
        if !r.missing_book_columns.is_empty() {
            println!(
                "  Missing book columns ({}): {}",
                r.missing_book_columns.len(),
                r.missing_book_columns.join(", ")
            );
        }
        println!();
    }
    Ok(())
}
