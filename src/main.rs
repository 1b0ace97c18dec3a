//! agentgate - session-affinity router and sandbox lifecycle manager.
//!
//! Usage:
//!   agentgate serve [--port 8080] [--runtime-api-url http://...]

use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use url::Url;

use agentgate::config::{
    Config, DEFAULT_GC_BATCH_SIZE, DEFAULT_GC_INTERVAL_SECS, DEFAULT_INACTIVITY_TTL_SECS,
    DEFAULT_MAX_CONCURRENT_REQUESTS, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_SESSION_TTL_SECS,
};
use agentgate::gc::GarbageCollector;
use agentgate::router;
use agentgate::runtime::RuntimeApiClient;
use agentgate::session::SessionManager;
use agentgate::state::AppState;
use agentgate::store::{MemoryStore, Store};

#[derive(Parser, Debug)]
#[command(name = "agentgate")]
#[command(about = "Session-affinity router for AI agent sandboxes")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the router and garbage collector
    Serve {
        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Base URL of the workload-manager runtime API
        #[arg(long, default_value = "http://localhost:9090")]
        runtime_api_url: String,

        /// Maximum in-flight proxied requests
        #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_REQUESTS)]
        max_concurrent_requests: usize,

        /// Absolute sandbox lifetime in seconds
        #[arg(long, default_value_t = DEFAULT_SESSION_TTL_SECS)]
        session_ttl_secs: u64,

        /// Idle seconds before a sandbox is reclaimable
        #[arg(long, default_value_t = DEFAULT_INACTIVITY_TTL_SECS)]
        inactivity_ttl_secs: u64,

        /// Seconds between collector sweeps
        #[arg(long, default_value_t = DEFAULT_GC_INTERVAL_SECS)]
        gc_interval_secs: u64,

        /// Candidates fetched per index per sweep
        #[arg(long, default_value_t = DEFAULT_GC_BATCH_SIZE)]
        gc_batch_size: usize,

        /// Downstream request timeout in seconds
        #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
        request_timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    match args.command {
        Commands::Serve {
            port,
            runtime_api_url,
            max_concurrent_requests,
            session_ttl_secs,
            inactivity_ttl_secs,
            gc_interval_secs,
            gc_batch_size,
            request_timeout_secs,
        } => {
            let config = Config {
                port,
                max_concurrent_requests,
                session_ttl: Duration::from_secs(session_ttl_secs),
                inactivity_ttl: Duration::from_secs(inactivity_ttl_secs),
                gc_interval: Duration::from_secs(gc_interval_secs),
                gc_batch_size,
                request_timeout: Duration::from_secs(request_timeout_secs),
                runtime_api_url,
            };
            if let Err(e) = serve(config).await {
                eprintln!("Error: {}", e);
                exit(1);
            }
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // One pooled client shared by the proxy path and the runtime API.
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;

    let base_url = Url::parse(&config.runtime_api_url)?;
    let runtime = Arc::new(RuntimeApiClient::new(client.clone(), base_url));
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        runtime.clone(),
        config.session_ttl,
    ));

    let collector = Arc::new(GarbageCollector::new(
        store.clone(),
        runtime,
        config.inactivity_ttl,
        config.gc_batch_size,
    ));
    tokio::spawn(collector.run(config.gc_interval));

    let state = AppState::new(store, sessions, client, config.max_concurrent_requests);
    router::serve(config.port, state).await?;
    Ok(())
}
