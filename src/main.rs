use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use tokagg_rs::api::{create_router, AppState};
use tokagg_rs::cache::SnapshotCache;
use tokagg_rs::clock::{Clock, SystemClock};
use tokagg_rs::config::{Backend, Settings};
use tokagg_rs::market_data::delta::DeltaBroadcaster;
use tokagg_rs::persist::memory::MemoryStore;
use tokagg_rs::persist::sled_store::SledStore;
use tokagg_rs::persist::KvStore;
use tokagg_rs::telemetry;
use tokagg_rs::worker::{run_once_and_publish, spawn_delta_forwarder, spawn_refresh_loop};

#[derive(Parser, Debug)]
#[command(author, version, about = "Token market-data aggregation and caching service")]
struct Args {
    /// TOML settings file (default: ./tokagg.toml when present)
    #[arg(long, env = "TOKAGG_CONFIG")]
    config: Option<PathBuf>,

    /// Override server.bind
    #[arg(long)]
    bind: Option<String>,

    /// Run a single aggregation cycle, publish its deltas, print its summary and exit
    #[arg(long)]
    once: bool,
}

fn open_store(settings: &Settings, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn KvStore>> {
    let kv: Arc<dyn KvStore> = match settings.storage.backend {
        Backend::Memory => Arc::new(MemoryStore::new(clock)),
        Backend::Sled => Arc::new(SledStore::open(&settings.storage.path, clock)?),
    };
    Ok(kv)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
        settings.validate()?;
    }

    telemetry::init_tracing(&settings.server.log_filter);
    info!(chain = %settings.chain_id, backend = ?settings.storage.backend, "starting tokagg");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let kv = open_store(&settings, clock.clone())?;
    let aggregator = Arc::new(settings.build_aggregator(clock.clone()));
    let cache = Arc::new(SnapshotCache::new(aggregator, kv.clone(), clock, settings.cache_config()));
    let broadcaster = Arc::new(DeltaBroadcaster::new(kv.clone(), settings.broadcast_config()));

    if args.once {
        let summary = run_once_and_publish(&cache, &broadcaster).await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        if !summary.success {
            anyhow::bail!("aggregation cycle failed");
        }
        return Ok(());
    }

    telemetry::init_metrics(settings.metrics_addr()?)?;

    let forwarder = spawn_delta_forwarder(&cache, broadcaster.clone());
    let refresher = spawn_refresh_loop(cache.clone(), settings.refresh_interval());

    let app = create_router(AppState::new(cache, kv, broadcaster));
    let addr = settings.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresher.abort();
    forwarder.abort();
    Ok(())
}
