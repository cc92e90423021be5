//! cachewarden - versioned request cache with offline fallbacks
//!
//! Deploys a configured version into the disk cache and sends one-off requests
//! through it, the way a hosting application would.

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cachewarden::cache::GenerationName;
use cachewarden::cli::{build_request, Cli, Command};
use cachewarden::notify::LogSink;
use cachewarden::{
    CacheStore, Config, DiskStore, HttpFetcher, Instance, LifecycleController, Request, Scope,
    VersionToken,
};

/// Initialises logging: `--verbose` enables INFO, otherwise RUST_LOG or WARN
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Opens the disk store, preferring the CLI override, then the config file, then XDG
fn open_store(cli: &Cli, config: &Config) -> Result<Arc<DiskStore>, Box<dyn Error>> {
    let store = match cli.cache_dir.clone().or_else(|| config.cache_dir.clone()) {
        Some(dir) => DiskStore::with_dir(dir),
        None => DiskStore::new().ok_or("Cannot determine a cache directory; set cache_dir")?,
    };
    Ok(Arc::new(store))
}

fn instance(config: Config, token: VersionToken, store: Arc<DiskStore>) -> Result<Instance, Box<dyn Error>> {
    let fetcher = match config.request_timeout() {
        Some(timeout) => HttpFetcher::with_timeout(timeout)?,
        None => HttpFetcher::new(),
    };
    let scope = Scope::with_retry_capacity(config.retry_queue_capacity);
    Ok(Instance {
        config,
        token,
        store,
        fetcher: Arc::new(fetcher),
        sink: Arc::new(LogSink),
        scope,
    })
}

async fn deploy(config: Config, token: VersionToken, store: Arc<DiskStore>) -> Result<(), Box<dyn Error>> {
    let handle = LifecycleController::spawn(instance(config, token, store)?)?;

    let installed = handle.install().await?;
    println!("Installed {} ({} assets)", installed.generation, installed.assets);

    let activated = handle.activate().await?;
    for name in &activated.deleted {
        println!("Deleted {}", name);
    }
    println!("Active version {}", handle.token());
    Ok(())
}

async fn fetch(
    config: Config,
    token: VersionToken,
    store: Arc<DiskStore>,
    request: Request,
) -> Result<(), Box<dyn Error>> {
    let handle = LifecycleController::restore(instance(config, token, store)?).await?;

    let response = handle.fetch(request).await?;
    handle.settle().await?;

    println!("HTTP {}", response.status);
    for (name, value) in &response.headers {
        println!("{}: {}", name, value);
    }
    println!();
    println!("{} bytes", response.body.len());
    Ok(())
}

async fn list_generations(store: &DiskStore, current: Option<&VersionToken>) -> Result<(), Box<dyn Error>> {
    let names = store.generation_names().await?;
    if names.is_empty() {
        println!("No cache generations");
        return Ok(());
    }

    for name in names {
        let entries = store.keys(&name).await?.len();
        let marker = match (GenerationName::parse(&name), current) {
            (Some(generation), Some(token)) if generation.token() == token => "*",
            _ => " ",
        };
        println!("{} {}\t{} entries", marker, name, entries);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = Config::load(&cli.config)?;
    let store = open_store(&cli, &config)?;

    match &cli.command {
        Command::Deploy => {
            let token = config.version_token(cli.version_token.clone())?;
            deploy(config, token, store).await
        }
        Command::Fetch {
            url,
            navigate,
            method,
            data,
        } => {
            let request = build_request(url, *navigate, method, data.as_deref())?;
            let token = config.version_token(cli.version_token.clone())?;
            fetch(config, token, store, request).await
        }
        Command::Generations => {
            let current = config.version_token(cli.version_token.clone()).ok();
            list_generations(&store, current.as_ref()).await
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
