//! kindred-server - REST API server binary.

use std::net::SocketAddr;

use kindred_core::RuntimeConfig;
use kindred_llm::GeneratorConfig;
use kindred_server::{create_runtime, create_server, create_server_with_auth, ApiKey, AppState};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::from_default_env()
        .add_directive(Level::INFO.into())
        .add_directive("kindred_server=debug".parse()?);

    if std::env::var("KINDRED_LOG_JSON").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing()?;

    // Get configuration from environment
    let host = std::env::var("KINDRED_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("KINDRED_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;
    let require_auth = std::env::var("KINDRED_REQUIRE_AUTH").is_ok();
    let autostart = std::env::var("KINDRED_AUTOSTART")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);

    let runtime = create_runtime(RuntimeConfig::from_env()?, GeneratorConfig::from_env())?;
    let state = AppState::new(runtime);

    if autostart {
        state.runtime().start().await?;
        info!("Response scheduler started");
    }

    // Create server with or without auth
    let app = match (require_auth, ApiKey::from_env()) {
        (true, Some(key)) => {
            info!("Authentication enabled");
            create_server_with_auth(state.clone(), key)
        }
        (true, None) => {
            return Err("KINDRED_REQUIRE_AUTH is set but KINDRED_API_KEY is empty".into());
        }
        (false, _) => {
            info!("Authentication disabled");
            create_server(state.clone())
        }
    };

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting kindred-server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping scheduler...");
        })
        .await?;

    if let Err(e) = state.runtime().stop().await {
        warn!(error = %e, "Scheduler did not stop cleanly");
    }

    info!("Server stopped cleanly");
    Ok(())
}
