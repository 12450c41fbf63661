//! assetcache - host runner for the BitMerchant offline asset cache.
//!
//! Plays the part of the browser runtime: registers the cache manager
//! against a real origin, dispatches install/activate, and routes single
//! requests through the fetch interceptor.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use assetcache_core::{
    ActivateOutcome, CacheConfig, CacheStorage, DiskStorage, HttpNetwork, InstallReport,
    LifecycleState, Method, OfflineCache, Registration, Request,
};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "assetcache", version, about = "Offline asset cache for the BitMerchant web app")]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, env = "ASSETCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Origin the assets are served from
    #[arg(long, global = true, env = "ASSETCACHE_ORIGIN")]
    origin: Option<String>,

    /// Directory holding cache generations
    #[arg(long, global = true, env = "ASSETCACHE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Override the generation name from the config
    #[arg(long, global = true, env = "ASSETCACHE_GENERATION")]
    generation: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install and activate the configured generation
    Register,
    /// Install the configured generation without activating it
    Install,
    /// Activate a previously installed generation
    Activate,
    /// Route one request through the interceptor
    Fetch {
        /// Absolute URL or path relative to the origin
        url: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// Treat the request as a page navigation
        #[arg(long)]
        document: bool,
    },
    /// Show generations, the current pointer and stored entries
    Status,
    /// Delete the configured generation
    Unregister,
    /// Write the default config file
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so the file writer flushes.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    Ok(guard)
}

fn load_config(cli: &Cli) -> Result<CacheConfig> {
    let mut config = CacheConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(ref origin) = cli.origin {
        config.origin = origin.clone();
    }
    if let Some(ref generation) = cli.generation {
        config.generation = generation.clone();
    }
    config.validate().context("Invalid config")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;

    if let Command::InitConfig { force } = cli.command {
        return init_config(cli.config.as_deref(), force);
    }

    let config = load_config(&cli)?;
    let cache_dir = match cli.cache_dir.clone() {
        Some(dir) => dir,
        None => CacheConfig::default_cache_dir()?,
    };
    info!(
        generation = %config.generation,
        origin = %config.origin,
        ?cache_dir,
        "assetcache starting"
    );

    let storage = Arc::new(
        DiskStorage::new(cache_dir)
            .await
            .context("Failed to open cache directory")?,
    );
    let network = Arc::new(
        HttpNetwork::new(
            config.origin_url()?,
            Duration::from_secs(config.request_timeout_secs),
        )
        .context("Failed to create HTTP client")?,
    );
    let cache = OfflineCache::new(&config, storage.clone(), network)?;

    match cli.command {
        Command::Register => register(&cache).await,
        Command::Install => install(&cache).await,
        Command::Activate => activate(&cache).await,
        Command::Fetch {
            url,
            method,
            document,
        } => fetch(&cache, &config, &url, &method, document).await,
        Command::Status => status(&*storage, &config).await,
        Command::Unregister => unregister(&cache).await,
        Command::InitConfig { .. } => Ok(()),
    }
}

fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => CacheConfig::default_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    CacheConfig::default().save(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn print_install(report: &InstallReport) {
    println!(
        "Installed {}: {} required, {} best-effort cached",
        report.generation, report.required_stored, report.best_effort_stored
    );
    for url in &report.best_effort_failed {
        println!("  skipped {}", url);
    }
}

fn print_activation(outcome: &ActivateOutcome) {
    match outcome {
        ActivateOutcome::Activated(report) => {
            println!(
                "Activated {}: {} stale generation(s) deleted, {} consumer(s) claimed",
                report.generation,
                report.deleted.len(),
                report.claimed
            );
            for name in &report.retained {
                println!("  could not delete {}", name);
            }
        }
        ActivateOutcome::Waiting { consumers } => {
            println!("Waiting: {} consumer(s) still on the previous generation", consumers);
        }
    }
}

async fn register(cache: &OfflineCache) -> Result<()> {
    match cache.register().await.context("Registration failed")? {
        Registration::Resumed { generation } => println!("{} is already current", generation),
        Registration::Installed {
            install,
            activation,
        } => {
            print_install(&install);
            print_activation(&activation);
        }
    }
    Ok(())
}

async fn install(cache: &OfflineCache) -> Result<()> {
    cache.controller().restore().await?;
    let report = cache.controller().install().await.context("Install failed")?;
    print_install(&report);
    Ok(())
}

async fn activate(cache: &OfflineCache) -> Result<()> {
    let state = cache.controller().restore().await?;
    if state != LifecycleState::Installed {
        anyhow::bail!(
            "Nothing to activate: {} is {}",
            cache.controller().generation(),
            state
        );
    }
    let outcome = cache.controller().activate().await.context("Activation failed")?;
    print_activation(&outcome);
    Ok(())
}

async fn fetch(
    cache: &OfflineCache,
    config: &CacheConfig,
    url: &str,
    method: &str,
    document: bool,
) -> Result<()> {
    cache.controller().restore().await?;

    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid method: {}", method))?;
    let url = config.resolve(url)?;
    let request = if document {
        Request::navigate(url)
    } else {
        Request::get(url)
    };
    let request = request.with_method(method);

    let result = cache.fetch(&request).await;
    cache.flush().await;

    let (source, response) = result.with_context(|| format!("Failed to fetch {}", request.url))?;
    println!(
        "{} {} -> {} ({} bytes, from {})",
        request.method,
        request.url,
        response.status,
        response.body.len(),
        source
    );
    Ok(())
}

async fn status(storage: &dyn CacheStorage, config: &CacheConfig) -> Result<()> {
    let current = storage.current_generation().await?;
    println!("Configured generation: {}", config.generation);
    println!("Current generation:    {}", current.as_deref().unwrap_or("none"));

    let generations = storage.generations().await?;
    if generations.is_empty() {
        println!("No generations stored");
    }
    for name in generations {
        let entries = storage.entries(&name).await?;
        let marker = if current.as_deref() == Some(name.as_str()) { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, entries.len());
        for entry in entries {
            println!(
                "    {:>3} {:>8}  {}  {}",
                entry.status,
                entry.bytes,
                entry.stored_at.format("%Y-%m-%d %H:%M:%S"),
                entry.key
            );
        }
    }
    Ok(())
}

async fn unregister(cache: &OfflineCache) -> Result<()> {
    cache.controller().restore().await?;
    let deleted = cache.controller().unregister().await?;
    if deleted {
        println!("Deleted {}", cache.controller().generation());
    } else {
        println!("{} was not installed", cache.controller().generation());
    }
    Ok(())
}
