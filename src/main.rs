//! CTIForge
//!
//! Classify threat indicators, enrich them across intelligence providers,
//! and persist normalized risk assessments.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod enrichment;
mod models;
mod storage;

use api::{create_router, AppState};
use enrichment::dns::SystemResolver;
use enrichment::hybrid::HybridAnalysisAdapter;
use enrichment::urlscan::UrlscanAdapter;
use enrichment::virustotal::VirusTotalAdapter;
use enrichment::AnalysisEngine;
use storage::RiskRepo;

/// CTIForge
#[derive(Parser, Debug)]
#[command(name = "ctiforge")]
#[command(about = "Classify, enrich, and persist threat indicator risk assessments")]
struct Args {
    /// Server host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// VirusTotal API key
    #[arg(long, env = "VIRUSTOTAL_API_KEY")]
    virustotal_api_key: Option<String>,

    /// Hybrid Analysis API key
    #[arg(long, env = "HYBRID_API_KEY")]
    hybrid_api_key: Option<String>,

    /// urlscan.io API key (search works without one)
    #[arg(long, env = "URLSCAN_API_KEY")]
    urlscan_api_key: Option<String>,

    /// API key required from callers of the analyze endpoints
    #[arg(long, env = "SERVICE_API_KEY")]
    service_api_key: Option<String>,

    /// Run database migrations
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ctiforge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting CTIForge");

    // Connect to database
    let repo = RiskRepo::new(&args.database_url)
        .await
        .context("Failed to connect to database")?;

    // Run migrations if requested
    if args.migrate {
        tracing::info!("Running database migrations...");
        repo.migrate().await?;
        tracing::info!("Migrations complete");
    }

    for (provider, configured) in [
        ("virustotal", args.virustotal_api_key.is_some()),
        ("hybrid", args.hybrid_api_key.is_some()),
        ("urlscan", args.urlscan_api_key.is_some()),
    ] {
        tracing::info!(provider, configured, "Provider registered");
    }

    // Adapters are always registered; a missing key surfaces per request as
    // a distinct failure outcome instead of disabling the provider.
    let resolver = Arc::new(SystemResolver::new());
    let mut engine = AnalysisEngine::new(Arc::new(repo));
    engine.add_provider(Arc::new(VirusTotalAdapter::new(
        args.virustotal_api_key,
        resolver,
    )));
    engine.add_provider(Arc::new(HybridAnalysisAdapter::new(args.hybrid_api_key)));
    engine.add_provider(Arc::new(UrlscanAdapter::new(args.urlscan_api_key)));

    // Create application state
    let state = Arc::new(AppState {
        engine,
        api_key: args.service_api_key,
    });

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Create router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
