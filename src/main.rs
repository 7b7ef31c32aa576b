//! kernel-pool CLI - Validate Ollama pool configuration.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kernel_pool::{Config, HttpClientCache, Kernel, KernelPool, KernelPoolOllamaExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "kernel-pool")]
#[command(version)]
#[command(about = "Rate-limited kernel pool for Ollama model backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "kernel-pool.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register every configured backend and build its kernel
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# kernel-pool configuration file

[pool]
endpoint = "http://localhost:11434"
timeout_secs = 300

[backends.chat]
model = "llama3.2"
kind = "chat"
requests_per_second = 2
requests_per_minute = 60
temperature = 0.7
max_tokens = 1024

[backends.writer]
model = "llama3.2"
kind = "completion"
requests_per_day = 5000
tokens_per_day = 2000000

[backends.embed]
model = "nomic-embed-text"
kind = "embedding"
# endpoint = "http://gpu-box:11434"
# api_key_env = "OLLAMA_API_KEY"
"#;
    println!("{example}");
}

async fn validate(config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)
        .with_context(|| format!("Failed to load config from {config_path:?}"))?;

    let pool = KernelPool::new();
    let clients = Arc::new(HttpClientCache::new());
    let registered = pool
        .register_ollama_config(&config, &clients)
        .context("Invalid backend configuration")?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut failed = Vec::new();
    for key in pool.keys() {
        match pool.get_or_create_handle(&key, &cancel).await {
            Ok(kernel) => info!(
                key = %key,
                kind = %kernel.kind(),
                model = %kernel.model_id(),
                "Kernel OK"
            ),
            Err(e) => {
                warn!(key = %key, error = %e, "Kernel failed");
                failed.push(key);
            }
        }
    }

    println!("\n=== Kernel Pool ===");
    println!("Backends:    {registered}");
    println!("Built:       {}", registered - failed.len());
    println!("Clients:     {}", clients.len());
    if !failed.is_empty() {
        println!("Failed:      {}", failed.join(", "));
        bail!("{} of {registered} backends failed to build", failed.len());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => print_example_config(),
        Commands::Validate => validate(&cli.config).await?,
    }

    Ok(())
}
