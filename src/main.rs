use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use commcoach_core::config::{self, Config};
use commcoach_core::types::{GenerationConfig, ProviderId};
use commcoach_core::AppContext;

#[derive(Parser)]
#[command(
    name = "commcoach",
    about = "CommCoach AI - multi-provider AI router",
    version = commcoach_core::VERSION,
)]
struct Cli {
    /// Config file (default: ~/.commcoach/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate free text through the router
    Generate {
        /// Prompt text
        #[arg(required = true)]
        prompt: Vec<String>,
        #[command(flatten)]
        options: GenerationArgs,
    },
    /// Generate JSON matching a schema
    Structured {
        /// Path to a JSON schema file
        #[arg(short, long)]
        schema: PathBuf,
        /// Prompt text
        #[arg(required = true)]
        prompt: Vec<String>,
        #[command(flatten)]
        options: GenerationArgs,
    },
    /// Show provider configuration, default priority and limits.
    /// Each invocation starts a fresh router, so this is not live health or spend
    Status,
    /// Check which providers are reachable
    Probe,
    /// Write a default config file
    Init,
}

#[derive(Args)]
struct GenerationArgs {
    /// Model hint; ignored by providers that don't serve it
    #[arg(short, long)]
    model: Option<String>,
    /// System instruction
    #[arg(long)]
    system: Option<String>,
    /// Sampling temperature (0.0 - 2.0)
    #[arg(short, long)]
    temperature: Option<f64>,
    /// Maximum output tokens
    #[arg(long)]
    max_tokens: Option<u32>,
}

impl From<GenerationArgs> for GenerationConfig {
    fn from(args: GenerationArgs) -> Self {
        GenerationConfig {
            temperature: args.temperature,
            max_output_tokens: args.max_tokens,
            system_instruction: args.system,
            model: args.model,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("commcoach=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Generate { prompt, options } => {
            cmd_generate(load(config_path), prompt.join(" "), options.into(), cli.json).await?
        }
        Commands::Structured { schema, prompt, options } => {
            cmd_structured(load(config_path), schema, prompt.join(" "), options.into(), cli.json).await?
        }
        Commands::Status => cmd_status(load(config_path), cli.json)?,
        Commands::Probe => cmd_probe(load(config_path), cli.json).await?,
        Commands::Init => cmd_init(config_path)?,
    }

    Ok(())
}

fn load(config_path: Option<&Path>) -> Config {
    let cfg = config::load_config_from_env(config_path);
    for id in ProviderId::ALL {
        if !cfg.is_configured(id) {
            tracing::debug!("Provider {} is not configured; it will be skipped", id);
        }
    }
    cfg
}

// ====== Commands ======

async fn cmd_generate(cfg: Config, prompt: String, gen: GenerationConfig, json: bool) -> Result<()> {
    let ctx = AppContext::new(cfg);
    let result = ctx.router.generate_content(prompt, &gen).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.text);
        eprintln!(
            "\n[{} / {}{}, ${:.6}]",
            result.provider,
            result.model,
            if result.fallback_used { ", fallback" } else { "" },
            result.cost
        );
    }
    Ok(())
}

async fn cmd_structured(
    cfg: Config,
    schema_path: PathBuf,
    prompt: String,
    gen: GenerationConfig,
    json: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(&schema_path)
        .with_context(|| format!("Failed to read schema {}", schema_path.display()))?;
    let schema: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("Schema {} is not valid JSON", schema_path.display()))?;

    let ctx = AppContext::new(cfg);
    let result = ctx.router.generate_structured_content(prompt, &schema, &gen).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&result.value)?);
        eprintln!("\n[{} / {}]", result.provider, result.model);
    }
    Ok(())
}

fn cmd_status(cfg: Config, json: bool) -> Result<()> {
    let ctx = AppContext::new(cfg);
    let status = ctx.router.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("CommCoach AI router v{}\n", commcoach_core::VERSION);
    for p in &status.providers {
        let model = &ctx.config.provider(p.provider).model;
        let state = match (p.configured, p.health.healthy) {
            (false, _) => "not configured".to_string(),
            (true, true) => "✓ healthy".to_string(),
            (true, false) => format!("✗ open ({} failures)", p.health.consecutive_failures),
        };
        println!("{:<11} {:<34} {}", p.provider.to_string(), model, state);
    }

    let priority: Vec<String> = status.priority.iter().map(ProviderId::to_string).collect();
    println!(
        "\nPriority: {}",
        if priority.is_empty() { "none".to_string() } else { priority.join(" -> ") }
    );
    println!(
        "Gemini quota: {}/{} per minute, {}/{} per day",
        status.rate_limit.per_minute,
        status.rate_limit.per_minute_limit,
        status.rate_limit.per_day,
        status.rate_limit.per_day_limit
    );
    println!("Spend: ${:.6}", status.total_cost_usd);
    Ok(())
}

async fn cmd_probe(cfg: Config, json: bool) -> Result<()> {
    let ctx = AppContext::new(cfg);
    let probes = ctx.router.check_availability().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&probes)?);
        return Ok(());
    }

    for id in ProviderId::ALL {
        let line = match probes.get(&id) {
            Some(true) => "✓ reachable",
            Some(false) => "✗ unreachable",
            None => "not configured",
        };
        println!("{:<11} {}", id.to_string(), line);
    }
    Ok(())
}

fn cmd_init(config_path: Option<&Path>) -> Result<()> {
    let path = config_path.map(Path::to_path_buf).unwrap_or_else(config::get_config_path);

    if path.exists() {
        println!("Config already exists at {}", path.display());
        println!("Delete it first to re-initialize.");
        return Ok(());
    }

    config::save_config(&Config::default(), Some(&path))?;
    println!("Created config at {}", path.display());
    println!("\nNext steps:");
    println!("  1. Add at least one provider to {}", path.display());
    println!("     (or export GEMINI_API_KEY, OLLAMA_BASE_URL, OPENROUTER_API_KEY)");
    println!("  2. Try it: commcoach generate \"Give me feedback on my opening line\"");
    Ok(())
}
