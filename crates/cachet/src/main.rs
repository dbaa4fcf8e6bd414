//! Cachet - declarative read-through cache over a key-value store

use anyhow::{Context, Result};
use cachet_core::{
    CacheService, CacheableOp, KeyArg, KeySpaceRegistry, PayloadFormat, Reconciler,
    WritePipeline, parse_expiry, parse_schedule, spawn_reconciler_task,
};
use cachet_store::{CacheStore, MemoryStore, RedisStore};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::{Config, LoggingConfig, StoreKind};

/// Cachet - declarative read-through cache over a key-value store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/cachet.toml", env = "CACHET_CONFIG")]
    config: String,

    /// Store URL, overriding the configuration
    #[arg(long, env = "CACHET_STORE_URL")]
    store_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the reconciler on its schedule until interrupted
    Serve,
    /// Show the payload stored under a key
    Get { key: String },
    /// Cache a JSON value as the result of an operation call
    Put {
        operation: String,
        /// Value to cache, as JSON
        value: String,
        args: Vec<String>,
        /// Cache name; configured defaults apply when unset
        #[arg(long)]
        cache: Option<String>,
        /// Key template, e.g. `order:{0}`
        #[arg(long)]
        key: Option<String>,
        /// Expiry literal, e.g. `1D2H`
        #[arg(long)]
        expire: Option<String>,
    },
    /// Evict individual keys
    Evict {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Evict every key recorded under a cache name
    EvictCache { name: String },
    /// Run one reconciliation sweep now
    Sweep {
        /// Also drop the member sets of these cache names
        #[arg(long = "cache")]
        caches: Vec<String>,
    },
    /// Print the key generated for an operation call
    Key {
        cache: String,
        operation: String,
        args: Vec<String>,
    },
    /// Print how an expiry literal is interpreted
    Expiry { literal: String },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(url) = args.store_url {
        config.store.url = url;
    }

    // Initialize logging
    init_logging(&config.logging);

    match args.command {
        Command::Serve => serve(&config).await,
        Command::Get { key } => get(&config, &key).await,
        Command::Put {
            operation,
            value,
            args,
            cache,
            key,
            expire,
        } => {
            let mut op = CacheableOp::new(operation.clone(), operation);
            op.cache_name = cache;
            op.key = key;
            op.expire = expire;
            put(&config, op, &value, args).await
        }
        Command::Evict { keys } => {
            let registry = open_registry(&config).await?;
            let deleted = registry.evict_keys(&keys).await?;
            println!("Evicted {} of {} keys", deleted, keys.len());
            Ok(())
        }
        Command::EvictCache { name } => {
            let registry = open_registry(&config).await?;
            let deleted = registry.evict_cache_name(&name).await?;
            println!("Evicted {} entries from cache {}", deleted, name);
            Ok(())
        }
        Command::Sweep { caches } => {
            let registry = open_registry(&config).await?;
            for cache in &caches {
                let address = registry.member_set_address(cache);
                registry.touched().insert(&address);
            }
            let stats = Reconciler::new(registry).sweep().await;
            println!(
                "Swept {} member sets ({} failed), reverse index {}",
                stats.addresses,
                stats.failed,
                if stats.reverse_index_cleared {
                    "cleared"
                } else {
                    "kept"
                }
            );
            Ok(())
        }
        Command::Key {
            cache,
            operation,
            args,
        } => {
            let args: Vec<KeyArg> = args.into_iter().map(KeyArg::from).collect();
            println!("{}", config.key_generator().generate(&cache, &operation, &args));
            Ok(())
        }
        Command::Expiry { literal } => {
            let expiry = parse_expiry(&literal);
            match expiry.ttl() {
                Some(ttl) => println!("{} ({} seconds)", expiry, ttl.as_secs()),
                None => println!("{}", expiry),
            }
            Ok(())
        }
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Run the reconciler until a shutdown signal arrives
async fn serve(config: &Config) -> Result<()> {
    info!("Starting Cachet v{}", env!("CARGO_PKG_VERSION"));

    if let Some(address) = &config.metrics.prometheus_address {
        let addr: SocketAddr = address
            .parse()
            .with_context(|| format!("Invalid Prometheus address: {}", address))?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics on {}", addr);
    }

    let registry = open_registry(config).await?;

    let reconciler_task = if config.reconciler.enabled {
        let schedule = parse_schedule(&config.reconciler.schedule)?;
        let reconciler = Arc::new(Reconciler::new(registry.clone()));
        Some(spawn_reconciler_task(reconciler, schedule))
    } else {
        warn!("Reconciler disabled; registry bookkeeping will grow without bound");
        None
    };

    shutdown_signal().await;

    if let Some(task) = reconciler_task {
        task.abort();
    }

    info!("Cachet stopped");
    Ok(())
}

/// Print a stored payload and what it decodes to
async fn get(config: &Config, key: &str) -> Result<()> {
    let store = open_store(config).await?;
    let Some(payload) = store.get(key).await? else {
        println!("(miss)");
        return Ok(());
    };

    println!("{}", payload);
    let format = match PayloadFormat::of(&payload) {
        Some(PayloadFormat::Text) => "A (JSON)",
        Some(PayloadFormat::Binary) => "B (binary map)",
        None => {
            println!("(empty payload)");
            return Ok(());
        }
    };
    println!("format {}", format);

    // Maps with non-string keys have no JSON form
    match config.codec().decode::<serde_json::Value>(&payload) {
        Ok(Some(value)) => println!("{}", serde_json::to_string_pretty(&value)?),
        Ok(None) => {}
        Err(e) => println!("(not representable as JSON: {})", e),
    }
    Ok(())
}

/// Write one value through the cache write path and report the outcome
async fn put(config: &Config, op: CacheableOp, value: &str, args: Vec<String>) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(value).context("Value must be valid JSON")?;
    let args: Vec<KeyArg> = args.into_iter().map(KeyArg::from).collect();

    let registry = open_registry(config).await?;
    let pipeline = Arc::new(WritePipeline::new(config.pipeline_config()));
    let service = CacheService::new(registry, pipeline)
        .with_codec(config.codec())
        .with_key_generator(config.key_generator())
        .with_defaults(config.defaults.clone());

    let written = service.put_now(&op, &args, &value).await;
    service.shutdown().await;

    match written.context("Failed to write cache entry")? {
        Some(target) => println!(
            "{} (cache {}, expiry {})",
            target.key, target.cache_name, target.expiry
        ),
        None => println!("Value is empty, nothing cached"),
    }
    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match config.store.kind {
        StoreKind::Redis => Arc::new(
            RedisStore::connect(&config.store.url)
                .await
                .context("Failed to connect to store")?,
        ),
        StoreKind::Memory => {
            warn!("Using the in-process memory store; nothing is shared or persisted");
            Arc::new(MemoryStore::new())
        }
    };
    Ok(store)
}

async fn open_registry(config: &Config) -> Result<Arc<KeySpaceRegistry>> {
    let store = open_store(config).await?;
    Ok(Arc::new(KeySpaceRegistry::new(
        store,
        config.registry_config(),
    )))
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Logs go to stderr so command output stays clean
    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
