//! Batch processing command for multiple text files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use tplex_core::models::result::{ExtractionResult, ExtractionStatus};
use tplex_core::values::parse_number;
use tplex_core::Engine;

use super::{format_result, load_config, load_engine, OutputFormat};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Template file or directory (default: from config)
    #[arg(short, long)]
    templates: Option<PathBuf>,

    /// Only consider templates of this issuer
    #[arg(long)]
    issuer: Option<String>,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Number of parallel workers
    #[arg(short = 'j', long, default_value = "4")]
    jobs: usize,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

/// Result of processing a single file.
struct ProcessResult {
    index: usize,
    path: PathBuf,
    result: Option<ExtractionResult>,
    error: Option<String>,
    processing_time_ms: u64,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    let mut files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    let engine = load_engine(&config, args.templates.as_deref())?;

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    let semaphore = Arc::new(Semaphore::new(args.jobs.max(1)));
    let mut tasks = JoinSet::new();
    for (index, path) in files.into_iter().enumerate() {
        let permit = semaphore.clone().acquire_owned().await?;
        let engine = engine.clone();
        let issuer = args.issuer.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            process_single_file(index, path, &engine, issuer.as_deref())
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let processed = joined?;
        if let Some(error_msg) = &processed.error {
            if args.continue_on_error {
                warn!("Failed to process {}: {}", processed.path.display(), error_msg);
            } else {
                error!("Failed to process {}: {}", processed.path.display(), error_msg);
                pb.abandon();
                anyhow::bail!("Processing failed: {}", error_msg);
            }
        }
        results.push(processed);
        pb.inc(1);
    }
    pb.finish_with_message("Complete");

    results.sort_by_key(|r| r.index);

    let successful: Vec<_> = results.iter().filter(|r| r.result.is_some()).collect();
    let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();

    if let Some(output_dir) = &args.output_dir {
        let paths: Vec<&Path> = results.iter().map(|r| r.path.as_path()).collect();
        let names = output_names(&paths);
        for processed in &successful {
            if let Some(result) = &processed.result {
                let output_path = output_dir.join(format!(
                    "{}.{}",
                    names[processed.index],
                    args.format.extension()
                ));

                fs::write(&output_path, format_result(result, args.format, false)?)?;
                debug!("Wrote output to {}", output_path.display());
            }
        }
    }

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let count = |status: ExtractionStatus| {
        successful
            .iter()
            .filter(|r| r.result.as_ref().is_some_and(|res| res.status == status))
            .count()
    };

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    println!(
        "   {} matched, {} partial, {} ambiguous, {} unmatched, {} failed",
        style(count(ExtractionStatus::Matched)).green(),
        style(count(ExtractionStatus::RequiredFieldMissing)).yellow(),
        style(count(ExtractionStatus::Ambiguous)).yellow(),
        style(count(ExtractionStatus::Unmatched)).dim(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for processed in &failed {
            println!(
                "  - {}: {}",
                processed.path.display(),
                processed.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

fn process_single_file(
    index: usize,
    path: PathBuf,
    engine: &Engine,
    issuer: Option<&str>,
) -> ProcessResult {
    let file_start = Instant::now();
    let outcome = fs::read_to_string(&path).map(|text| match issuer {
        Some(issuer) => engine.process_for_issuer(&text, issuer),
        None => engine.process(&text),
    });
    let processing_time_ms = file_start.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => ProcessResult {
            index,
            path,
            result: Some(result),
            error: None,
            processing_time_ms,
        },
        Err(e) => ProcessResult {
            index,
            path,
            result: None,
            error: Some(e.to_string()),
            processing_time_ms,
        },
    }
}

/// Output file stem per input, in input order. Inputs sharing a stem are
/// told apart by their position.
fn output_names(paths: &[&Path]) -> Vec<String> {
    let stems: Vec<&str> = paths
        .iter()
        .map(|p| p.file_stem().and_then(|s| s.to_str()).unwrap_or("document"))
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for stem in &stems {
        *counts.entry(*stem).or_default() += 1;
    }

    stems
        .iter()
        .enumerate()
        .map(|(index, stem)| {
            if counts[stem] > 1 {
                format!("{}_{}", stem, index + 1)
            } else {
                stem.to_string()
            }
        })
        .collect()
}

fn write_summary(path: &Path, results: &[ProcessResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "template_id",
        "issuer",
        "document_number",
        "amount",
        "missing_fields",
        "degraded",
        "processing_time_ms",
        "error",
    ])?;

    for processed in results {
        let filename = processed
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("");

        if let Some(result) = &processed.result {
            let amount = result
                .text_value("amount")
                .map(|raw| {
                    parse_number(raw)
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| raw.to_string())
                })
                .unwrap_or_default();

            wtr.write_record([
                filename,
                result.status.as_str(),
                result.template_id().unwrap_or(""),
                result.template.as_ref().map(|t| t.issuer.as_str()).unwrap_or(""),
                result.text_value("document_number").unwrap_or(""),
                amount.as_str(),
                result.missing_fields.join(";").as_str(),
                if result.degraded { "true" } else { "false" },
                processed.processing_time_ms.to_string().as_str(),
                "",
            ])?;
        } else {
            wtr.write_record([
                filename,
                "error",
                "",
                "",
                "",
                "",
                "",
                "",
                processed.processing_time_ms.to_string().as_str(),
                processed.error.as_deref().unwrap_or(""),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}
