use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use argus_client::ReqwestTransport;
use argus_core::engine::TracingReporter;
use argus_core::http::TransportConfig;
use argus_core::step::{ScrapeConfig, ScrapingStep, StepKind};
use argus_core::template::find_variables;
use argus_core::{ScrapeEngine, ScrapingResult};
use argus_sinks::format_summary;

#[derive(Parser)]
#[command(name = "argus", version, about = "Declarative web-scraping engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a scrape configuration once
    Run {
        /// Path to the JSON scrape configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Write flattened results as CSV to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seed env-namespace variables (KEY=VALUE, repeatable)
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,

        /// Print the full result payload as JSON instead of a summary
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Check a configuration without fetching anything
    Validate {
        /// Path to the JSON scrape configuration
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("argus=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output,
            vars,
            json,
        } => {
            let config = load_config(&config)?;
            cmd_run(config, output.as_deref(), vars.into_iter().collect(), json).await?;
        }
        Commands::Validate { config } => {
            let config = load_config(&config)?;
            cmd_validate(&config)?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<ScrapeConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse scrape config {}", path.display()))
}

/// KEY=VALUE parser for --var.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("invalid KEY=VALUE pair: '{s}'"))
}

async fn cmd_run(
    config: ScrapeConfig,
    output: Option<&Path>,
    vars: HashMap<String, String>,
    json: bool,
) -> Result<()> {
    let transport_config = match &config.http {
        Some(overrides) => TransportConfig::default().apply(overrides),
        None => TransportConfig::default(),
    };
    let transport =
        ReqwestTransport::new(transport_config).context("Failed to build HTTP transport")?;

    let name = config.name.clone();
    let mut engine = ScrapeEngine::new(config, transport).with_env(vars);
    let result = engine.run(&TracingReporter).await?;

    if let Some(path) = output {
        write_csv_file(&result, path)?;
        tracing::info!(path = %path.display(), "Wrote CSV export");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", format_summary(&name, &result, None));
        for error in &result.errors {
            eprintln!("  error in '{}': {}", error.step, error.message);
        }
    }

    if !result.success {
        anyhow::bail!("scrape finished with {} error(s)", result.errors.len());
    }
    Ok(())
}

fn write_csv_file(result: &ScrapingResult, path: &Path) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create output file {}", path.display()))?;
    argus_sinks::write_csv(result, file).context("Failed to write CSV export")?;
    Ok(())
}

fn cmd_validate(config: &ScrapeConfig) -> Result<()> {
    url::Url::parse(&config.start_url)
        .with_context(|| format!("start_url is not a valid URL: {}", config.start_url))?;
    if config.steps.is_empty() {
        anyhow::bail!("config '{}' has no steps", config.name);
    }

    let mut templates = 0usize;
    collect_templates(&config.steps, &mut templates);
    println!(
        "OK: '{}' — {} top-level step(s), {} template expression(s)",
        config.name,
        config.steps.len(),
        templates
    );
    Ok(())
}

/// Count template expressions across the step tree (sanity output only).
fn collect_templates(steps: &[ScrapingStep], count: &mut usize) {
    for step in steps {
        match &step.kind {
            StepKind::Request { url, method, .. } => {
                *count += find_variables(url).len() + find_variables(method).len();
            }
            StepKind::Save { value, .. } => *count += find_variables(value).len(),
            StepKind::Condition { when, then, otherwise } => {
                *count += find_variables(when).len();
                collect_templates(then, count);
                collect_templates(otherwise, count);
            }
            StepKind::Paginate { steps, .. } | StepKind::Loop { steps, .. } => {
                collect_templates(steps, count);
            }
            StepKind::Extract { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const CONFIG: &str = r#"{
        "name": "demo",
        "start_url": "https://example.com/list",
        "steps": [
            {"name": "fetch", "type": "request", "url": "${url.full}"},
            {"name": "grab", "type": "extract", "rules": [
                {"name": "title", "type": "structured-markup", "selector": "h1"}
            ]}
        ]
    }"#;

    #[test]
    fn test_load_and_validate_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.name, "demo");
        cmd_validate(&config).unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_steps() {
        let config = ScrapeConfig::new("empty", "https://example.com");
        assert!(cmd_validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = ScrapeConfig::new("bad", "not a url");
        config.steps.push(ScrapingStep::new(
            "save",
            StepKind::Save {
                value: "x".into(),
                target: "y".into(),
            },
        ));
        assert!(cmd_validate(&config).is_err());
    }

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("API_KEY=secret").unwrap(),
            ("API_KEY".to_string(), "secret".to_string())
        );
        assert!(parse_key_val("no-equals").is_err());
    }
}
