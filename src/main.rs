//! Sonargate -- metered proxy for the Perplexity Sonar API.
//!
//! This is the application entry point. It wires together all modules:
//!   - Configuration loading
//!   - Database initialization (job-record store)
//!   - Upstream client + ledger gateway construction
//!   - Operation orchestrator
//!   - HTTP server with the tool routes
//!   - Graceful shutdown on SIGTERM / SIGINT

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use sonargate::AppState;
use sonargate::api;
use sonargate::config::Config;
use sonargate::db::Database;
use sonargate::ledger::HttpLedger;
use sonargate::meter::{Meter, MeterSettings};
use sonargate::store::SqliteJobStore;
use sonargate::upstream::SonarClient;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("sonargate.toml");

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("sonargate {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    CliArgs { config_path }
}

fn print_usage() {
    println!(
        "\
sonargate {version} -- metered Perplexity Sonar proxy

USAGE:
    sonargate [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: sonargate.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    SONARGATE_CONFIG       Alternative to --config flag
    PERPLEXITY_API_KEY     Bearer credential for the upstream API
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // 1. Parse CLI arguments
    let cli = parse_args();

    // Allow SONARGATE_CONFIG env var as alternative to --config flag
    let config_path = std::env::var("SONARGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    // 2. Load configuration
    let config = Config::load(&config_path)?;
    config.validate()?;

    // 3. Initialize tracing/logging
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting sonargate"
    );

    if config.upstream.api_key.is_none() {
        tracing::warn!(
            "No Perplexity API key configured -- operations will fail until \
             PERPLEXITY_API_KEY is set"
        );
    }

    // 4. Open the job-record database
    let db = Database::open(&config.store.path)?;
    tracing::info!(path = %config.store.path.display(), "Database opened");

    // 5. Construct the protocol components
    let upstream = SonarClient::new(
        config.upstream.base_url.clone(),
        config.upstream.api_key.clone(),
    )
    .with_stream_deadline(Duration::from_secs(config.upstream.stream_deadline_secs));

    let ledger = HttpLedger::new(
        config.ledger.base_url.clone(),
        config.ledger.vendor_id.clone(),
    );

    let store = SqliteJobStore::new(db);

    let meter = Meter::new(
        Arc::new(upstream),
        Arc::new(ledger),
        Arc::new(store),
        MeterSettings {
            ask_model: config.upstream.ask_model.clone(),
            deep_research_model: config.upstream.deep_research_model.clone(),
            default_max_tokens: config.upstream.default_max_tokens,
        },
    );

    // 6. Build shared application state
    let state = AppState {
        config: Arc::new(config.clone()),
        meter: Arc::new(meter),
    };

    // 7. Build the router
    let app = build_app(state);

    // 8. Bind and serve
    let listen_addr = config.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down gracefully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Router assembly
// ---------------------------------------------------------------------------

/// Build the application router with all middleware layers.
fn build_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();
    let trace = TraceLayer::new_for_http();

    api::build_api_router()
        .layer(propagate_id)
        .layer(request_id)
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

/// Build the CORS layer from config.
fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        // Default: allow all origins for development convenience
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        // Set the sonargate crate to the configured level, dependencies to warn
        EnvFilter::new(format!("sonargate={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
