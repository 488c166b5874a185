//! Subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod extract;
pub mod templates;

use std::path::{Path, PathBuf};

use console::style;
use tplex_core::models::config::TplexConfig;
use tplex_core::models::result::{ExtractionResult, FieldResult};
use tplex_core::template::{Catalog, CatalogLoader, LoadReport};
use tplex_core::Engine;

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output, one row per field
    Csv,
    /// Plain text summary
    Text,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
        }
    }
}

/// Default location of the user configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tplex")
        .join("config.json")
}

/// Load the explicit config file, else the user config file, else defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<TplexConfig> {
    if let Some(path) = config_path {
        return Ok(TplexConfig::from_file(Path::new(path))?);
    }
    let default_path = default_config_path();
    if default_path.exists() {
        Ok(TplexConfig::from_file(&default_path)?)
    } else {
        Ok(TplexConfig::default())
    }
}

/// Load the catalog from `templates` or the configured template directory.
///
/// Rejected templates are listed on stderr; in strict mode they fail the load.
pub fn load_catalog(
    config: &TplexConfig,
    templates: Option<&Path>,
) -> anyhow::Result<(Catalog, LoadReport)> {
    let dir = templates.unwrap_or(&config.catalog.template_dir);
    if !dir.exists() {
        anyhow::bail!("Template directory not found: {}", dir.display());
    }

    let mut loader = CatalogLoader::new(config);
    if dir.is_dir() {
        loader.add_dir(dir)?;
    } else {
        loader.add_file(dir)?;
    }
    let (catalog, report) = loader.build()?;

    for rejected in &report.rejected {
        eprintln!("{} Rejected {}", style("⚠").yellow(), rejected);
    }
    Ok((catalog, report))
}

/// Build an engine on the loaded catalog.
pub fn load_engine(config: &TplexConfig, templates: Option<&Path>) -> anyhow::Result<Engine> {
    let (catalog, _) = load_catalog(config, templates)?;
    if catalog.is_empty() {
        anyhow::bail!("No valid templates found");
    }
    Ok(Engine::new(catalog, config.engine.clone()))
}

/// Render a result in the requested format.
pub fn format_result(
    result: &ExtractionResult,
    format: OutputFormat,
    show_text: bool,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Csv => format_result_csv(result),
        OutputFormat::Text => Ok(format_result_text(result, show_text)),
    }
}

fn field_status(result: &FieldResult) -> &'static str {
    match result {
        FieldResult::Found { .. } => "found",
        FieldResult::NotFound => "not_found",
        FieldResult::Conflicting { .. } => "conflicting",
    }
}

fn field_value(result: &FieldResult) -> String {
    match result {
        FieldResult::Found { value, .. } => value.to_string(),
        FieldResult::NotFound => String::new(),
        FieldResult::Conflicting { values } => values.join("; "),
    }
}

fn format_result_csv(result: &ExtractionResult) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(["template_id", "status", "field", "field_status", "value"])?;

    let template_id = result.template_id().unwrap_or("");
    for (name, field) in &result.fields {
        wtr.write_record([
            template_id,
            result.status.as_str(),
            name.as_str(),
            field_status(field),
            field_value(field).as_str(),
        ])?;
    }

    let data = String::from_utf8(wtr.into_inner()?)?;
    Ok(data)
}

fn format_result_text(result: &ExtractionResult, show_text: bool) -> String {
    let mut output = String::new();

    output.push_str(&format!("Status: {}\n", result.status));
    if let (Some(id), Some(info)) = (result.template_id(), &result.template) {
        output.push_str(&format!("Template: {} ({}, {})\n", id, info.name, info.issuer));
        output.push_str(&format!("Kind: {}\n", info.kind.as_str()));
        if !info.categories.is_empty() {
            let categories: Vec<&str> = info.categories.iter().map(|c| c.as_str()).collect();
            output.push_str(&format!("Categories: {}\n", categories.join(", ")));
        }
    }
    if !result.candidates.is_empty() {
        output.push_str(&format!("Candidates: {}\n", result.candidates.join(", ")));
    }

    if !result.fields.is_empty() {
        output.push_str("\nFields:\n");
        for (name, field) in &result.fields {
            match field {
                FieldResult::Found { .. } => {
                    output.push_str(&format!("  {}: {}\n", name, field_value(field)))
                }
                FieldResult::NotFound => output.push_str(&format!("  {}: -\n", name)),
                FieldResult::Conflicting { .. } => output.push_str(&format!(
                    "  {}: conflicting values ({})\n",
                    name,
                    field_value(field)
                )),
            }
        }
    }

    if !result.missing_fields.is_empty() {
        output.push_str(&format!("\nMissing: {}\n", result.missing_fields.join(", ")));
    }
    if result.degraded {
        output.push_str(&format!(
            "\nDegraded: {} budget failure(s)\n",
            result.degradations.len()
        ));
    }
    if show_text {
        output.push_str("\nText:\n");
        output.push_str(&result.text);
        output.push('\n');
    }

    output
}
