//! Extract command - resolve and extract a single text file.

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;

use clap::Args;
use console::style;
use tracing::{debug, info};

use tplex_core::models::result::ExtractionStatus;

use super::{format_result, load_config, load_engine, OutputFormat};

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Input text file, or '-' for stdin
    #[arg(required = true)]
    input: PathBuf,

    /// Template file or directory (default: from config)
    #[arg(short, long)]
    templates: Option<PathBuf>,

    /// Only consider templates of this issuer
    #[arg(long)]
    issuer: Option<String>,

    /// Apply this template directly instead of resolving
    #[arg(long, conflicts_with = "issuer")]
    template_id: Option<String>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Include the normalized text in text output
    #[arg(long)]
    show_text: bool,
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let start = Instant::now();
    let config = load_config(config_path)?;

    let text = if args.input.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        if !args.input.exists() {
            anyhow::bail!("Input file not found: {}", args.input.display());
        }
        fs::read_to_string(&args.input)?
    };

    info!("Processing {}", args.input.display());
    let engine = load_engine(&config, args.templates.as_deref())?;

    let result = match (&args.template_id, &args.issuer) {
        (Some(id), _) => engine
            .process_with_template(&text, id)
            .ok_or_else(|| anyhow::anyhow!("Template not found: {}", id))?,
        (None, Some(issuer)) => engine.process_for_issuer(&text, issuer),
        (None, None) => engine.process(&text),
    };

    let output = format_result(&result, args.format, args.show_text)?;

    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        println!("{}", output);
    }

    match result.status {
        ExtractionStatus::Unmatched => {
            eprintln!("{} No template matched", style("ℹ").blue());
        }
        ExtractionStatus::Ambiguous => {
            eprintln!(
                "{} Ambiguous match: {}",
                style("⚠").yellow(),
                result.candidates.join(", ")
            );
        }
        ExtractionStatus::RequiredFieldMissing => {
            eprintln!(
                "{} Missing required fields: {}",
                style("⚠").yellow(),
                result.missing_fields.join(", ")
            );
        }
        ExtractionStatus::Matched => {}
    }

    debug!("Total processing time: {:?}", start.elapsed());

    Ok(())
}
