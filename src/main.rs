use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use paygate::application::scheduler::SchedulerConfig;
use paygate::application::service::{PaymentService, Ports};
use paygate::config::{EngineConfig, GatewayConfig, RetentionPolicy};
use paygate::domain::keyspace::{KeySpace, Seed};
use paygate::domain::ports::{IndexAllocatorRef, PaymentStoreRef};
use paygate::infrastructure::in_memory::InMemoryStore;
use paygate::infrastructure::node_rpc::NodeRpcClient;
use paygate::infrastructure::price::HttpPriceOracle;
#[cfg(feature = "storage-rocksdb")]
use paygate::infrastructure::rocksdb::RocksDBStore;
use paygate::infrastructure::token::HmacTokenCodec;
use paygate::interfaces::csv::payment_writer::PaymentWriter;
use paygate::interfaces::http;
use poem::Server;
use poem::listener::TcpListener;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter (e.g. `info`, `paygate=debug`). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve(ServeArgs),
    /// Print all active payments as CSV.
    Active {
        /// Path to persistent database (optional). If provided, uses RocksDB.
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Hex-encoded 32-byte master seed.
    #[arg(long, env = "PAYGATE_SEED", hide_env_values = true)]
    seed: String,

    #[arg(long, env = "PAYGATE_TOKEN_SECRET", hide_env_values = true)]
    token_secret: String,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: String,

    #[arg(long, default_value = "http://127.0.0.1:7076")]
    node_url: String,

    #[arg(long, default_value = "https://api.coingecko.com/api/v3")]
    price_url: String,

    /// Coin id used for price lookups.
    #[arg(long, default_value = "nano")]
    coin_id: String,

    #[arg(long, default_value_t = 10)]
    upstream_timeout_secs: u64,

    #[arg(long, default_value_t = 5000)]
    check_interval_ms: u64,

    #[arg(long, default_value_t = 30000)]
    max_check_interval_ms: u64,

    #[arg(long, default_value_t = 3600)]
    payment_timeout_secs: u64,

    /// Delete finished payments after this many seconds. Kept forever if unset.
    #[arg(long)]
    retention_secs: Option<u64>,

    /// Enables the /admin routes (HTTP Basic, user `admin`).
    #[arg(long, env = "PAYGATE_ADMIN_PASSWORD", hide_env_values = true)]
    admin_password: Option<String>,
}

impl ServeArgs {
    fn to_config(&self) -> Result<GatewayConfig> {
        let config = GatewayConfig {
            seed: Seed::from_hex(&self.seed).into_diagnostic()?,
            token_secret: self.token_secret.clone(),
            listen: self.listen.clone(),
            node_url: self.node_url.clone(),
            price_url: self.price_url.clone(),
            coin_id: self.coin_id.clone(),
            upstream_timeout: Duration::from_secs(self.upstream_timeout_secs),
            admin_password: self.admin_password.clone(),
            engine: EngineConfig {
                scheduler: SchedulerConfig {
                    check_interval: Duration::from_millis(self.check_interval_ms),
                    max_check_interval: Duration::from_millis(self.max_check_interval_ms),
                    payment_timeout: Duration::from_secs(self.payment_timeout_secs),
                },
                retention: match self.retention_secs {
                    Some(secs) => RetentionPolicy::DeleteAfter(Duration::from_secs(secs)),
                    None => RetentionPolicy::KeepForever,
                },
            },
        };
        config.validate().into_diagnostic()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Active { db_path } => active(db_path).await,
    }
}

fn in_memory() -> (PaymentStoreRef, IndexAllocatorRef) {
    let store = InMemoryStore::new();
    (Arc::new(store.clone()), Arc::new(store))
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<(PaymentStoreRef, IndexAllocatorRef)> {
    match db_path {
        Some(path) => {
            // Use persistent storage (RocksDB)
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<(PaymentStoreRef, IndexAllocatorRef)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.to_config()?;
    let (store, allocator) = open_store(args.db_path)?;

    let ports = Ports {
        store,
        allocator,
        ledger: Arc::new(
            NodeRpcClient::new(&config.node_url, config.upstream_timeout).into_diagnostic()?,
        ),
        oracle: Arc::new(
            HttpPriceOracle::new(&config.price_url, &config.coin_id, config.upstream_timeout)
                .into_diagnostic()?,
        ),
        tokens: Arc::new(HmacTokenCodec::new(config.token_secret.as_bytes()).into_diagnostic()?),
    };
    let service = Arc::new(PaymentService::new(
        KeySpace::new(config.seed.clone()),
        ports,
        config.engine.clone(),
    ));
    service.resume().await.into_diagnostic()?;

    let sweeper = match config.engine.retention {
        RetentionPolicy::DeleteAfter(_) => {
            let every = config.engine.scheduler.check_interval * 12;
            let service = service.clone();
            Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(every);
                loop {
                    ticker.tick().await;
                    if let Err(e) = service.sweep_retention(Utc::now()).await {
                        warn!(error = %e, "retention sweep failed");
                    }
                }
            }))
        }
        RetentionPolicy::KeepForever => None,
    };

    let app = http::routes(service.clone(), config.admin_password.clone());
    info!(listen = %config.listen, "gateway listening");
    Server::new(TcpListener::bind(config.listen.clone()))
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
            },
            Some(Duration::from_secs(5)),
        )
        .await
        .into_diagnostic()?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    service.shutdown().await;
    info!("gateway stopped");
    Ok(())
}

async fn active(db_path: Option<PathBuf>) -> Result<()> {
    let (store, _) = open_store(db_path)?;
    let payments = store.list_active().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(payments).into_diagnostic()?;
    Ok(())
}
