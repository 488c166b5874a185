//! Templates command - inspect and validate the template catalog.

use std::fs;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use console::style;

use tplex_core::template::Template;
use tplex_core::Resolver;

use super::{load_catalog, load_config};

/// Arguments for the templates command.
#[derive(Args)]
pub struct TemplatesArgs {
    /// Template file or directory (default: from config)
    #[arg(short, long, global = true)]
    templates: Option<PathBuf>,

    #[command(subcommand)]
    command: TemplatesCommand,
}

#[derive(Subcommand)]
enum TemplatesCommand {
    /// List loaded templates
    List {
        /// Only list templates of this issuer
        #[arg(long)]
        issuer: Option<String>,
    },

    /// Load every template and report rejected ones
    Validate,

    /// Show one template
    Show {
        /// Template id
        id: String,
    },

    /// Show which templates accept a text file
    Candidates {
        /// Input text file
        input: PathBuf,

        /// Only consider templates of this issuer
        #[arg(long)]
        issuer: Option<String>,
    },
}

pub async fn run(args: TemplatesArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let templates = args.templates.as_deref();

    match args.command {
        TemplatesCommand::List { issuer } => {
            let (catalog, _) = load_catalog(&config, templates)?;
            let listed: Vec<&Template> = match &issuer {
                Some(issuer) => catalog.templates_for_issuer(issuer),
                None => catalog.iter().collect(),
            };
            for template in &listed {
                println!(
                    "{:<16} {:<12} {:<7} {}",
                    template.id(),
                    template.issuer(),
                    template.kind().as_str(),
                    template.name()
                );
            }
            println!();
            println!("{} {} template(s)", style("ℹ").blue(), listed.len());
        }
        TemplatesCommand::Validate => {
            let (_, report) = load_catalog(&config, templates)?;
            if report.is_clean() {
                println!(
                    "{} All {} template(s) are valid",
                    style("✓").green(),
                    report.loaded
                );
            } else {
                anyhow::bail!(
                    "{} template(s) rejected, {} loaded",
                    report.rejected.len(),
                    report.loaded
                );
            }
        }
        TemplatesCommand::Show { id } => {
            let (catalog, _) = load_catalog(&config, templates)?;
            let template = catalog
                .get(&id)
                .ok_or_else(|| anyhow::anyhow!("Template not found: {}", id))?;
            print!("{}", describe(template));
        }
        TemplatesCommand::Candidates { input, issuer } => {
            let (catalog, _) = load_catalog(&config, templates)?;
            let text = fs::read_to_string(&input)?;

            let candidates = match &issuer {
                Some(issuer) => catalog.candidates_for_issuer(&text, issuer),
                None => catalog.candidates_for(&text),
            };
            for template in &candidates {
                println!("{} {}", template.id(), template.name());
            }

            let resolver = Resolver::new(config.engine.prefer_specific);
            let outcome = match &issuer {
                Some(issuer) => resolver.resolve_for_issuer(&catalog, &text, issuer),
                None => resolver.resolve(&catalog, &text),
            };
            match outcome.template() {
                Some(template) => {
                    println!("{} Resolves to {}", style("✓").green(), template.id())
                }
                None if candidates.is_empty() => {
                    println!("{} No template matches", style("ℹ").blue())
                }
                None => println!("{} Ambiguous", style("⚠").yellow()),
            }
        }
    }

    Ok(())
}

fn describe(template: &Template) -> String {
    let mut output = String::new();

    output.push_str(&format!("Template: {}\n", template.id()));
    output.push_str(&format!("Issuer:   {}\n", template.issuer()));
    output.push_str(&format!("Name:     {}\n", template.name()));
    output.push_str(&format!("Kind:     {}\n", template.kind().as_str()));
    if !template.categories().is_empty() {
        let categories: Vec<&str> = template.categories().iter().map(|c| c.as_str()).collect();
        output.push_str(&format!("Category: {}\n", categories.join(", ")));
    }

    output.push_str("\nInclusive keywords:\n");
    for keyword in template.inclusive_keywords() {
        output.push_str(&format!("  {}\n", keyword.pattern()));
    }
    if !template.exclusive_keywords().is_empty() {
        output.push_str("Exclusive keywords:\n");
        for keyword in template.exclusive_keywords() {
            output.push_str(&format!("  {}\n", keyword.pattern()));
        }
    }

    output.push_str("\nFields:\n");
    for field in template.fields() {
        let mut flags = Vec::new();
        if field.is_optional() {
            flags.push("optional");
        }
        if field.is_repeating() {
            flags.push("repeating");
        }
        if field.is_unique() {
            flags.push("unique");
        }
        output.push_str(&format!("  {}", field.name()));
        if !flags.is_empty() {
            output.push_str(&format!(" [{}]", flags.join(", ")));
        }
        output.push('\n');
        for pattern in field.patterns() {
            output.push_str(&format!("    {}\n", pattern.as_str()));
        }
    }

    if !template.rules().is_empty() {
        output.push_str(&format!("\nReplace rules: {}\n", template.rules().len()));
        for (index, rule) in template.rules().rules().iter().enumerate() {
            output.push_str(&format!("  #{} {}\n", index, rule.pattern().as_str()));
        }
    }

    output
}
