/*
 * main.rs
 * Copyright (c) 2025 Posit, PBC
 *
 * Command-line renderer for view templates
 */

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quarto_view_template::{
    Engine, EngineConfig, RenderOptions, RuntimeMode, TemplateContext, Value,
};

#[derive(Parser, Debug)]
#[command(name = "view-template")]
#[command(about = "Render a view template to standard output")]
struct Args {
    /// Template name, resolved under the template root
    #[arg(value_name = "TEMPLATE")]
    template: String,

    /// Engine configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Template root directory (overrides the config file)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Directory for compiled templates
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Always compile from source; never read or write the cache
    #[arg(long)]
    no_cache: bool,

    /// Remove every cached template before rendering
    #[arg(long)]
    clear_cache: bool,

    /// Development mode: undefined references are errors
    #[arg(long)]
    dev: bool,

    /// Variables as a JSON object
    #[arg(long, value_name = "JSON")]
    vars: Option<String>,

    /// A single variable; the value is parsed as JSON when possible
    /// (can be specified multiple times)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    var: Vec<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarto_view_template=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(root) = args.root.clone() {
        config.template_root = root;
    }
    if let Some(cache_dir) = args.cache_dir.clone() {
        config.cache_root = Some(cache_dir);
    }
    if args.dev {
        config.mode = RuntimeMode::Development;
    }

    let engine = Engine::new(config);
    if args.clear_cache {
        let removed = engine.clear_cache()?;
        tracing::info!(removed, "Cleared template cache");
    }

    let variables = parse_variables(&args)?;
    let options = RenderOptions {
        use_cache: !args.no_cache,
    };
    let output = engine
        .render_with_options(&args.template, &variables, options)
        .with_context(|| format!("Failed to render template: {}", args.template))?;
    print!("{output}");

    Ok(())
}

fn parse_variables(args: &Args) -> Result<TemplateContext> {
    let mut variables = match &args.vars {
        Some(json) => {
            let value: serde_json::Value =
                serde_json::from_str(json).context("--vars is not valid JSON")?;
            TemplateContext::try_from(value).map_err(anyhow::Error::msg)?
        }
        None => TemplateContext::new(),
    };

    for pair in &args.var {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("--var expects KEY=VALUE, got {pair:?}"))?;
        let value = serde_json::from_str::<serde_json::Value>(raw)
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(raw));
        variables.insert(key.trim(), value);
    }
    Ok(variables)
}
