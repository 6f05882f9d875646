use transcribe_gate::{app, build_state_from_env};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise structured logging. Reads RUST_LOG environment variable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let state = build_state_from_env().await?;

    // Fail fast when the backend's external tools are missing.
    if let Err(e) = state.transcriber.initialize().await {
        tracing::error!(error = %e, "transcriber failed to initialize");
        return Err(e.into());
    }

    let addr = format!("{}:{}", state.config.host, state.config.port);
    tracing::info!(
        max_concurrent_jobs = state.admission.capacity(),
        admission_timeout_ms = state.admission.timeout().as_millis() as u64,
        max_file_size_bytes = state.validator.max_bytes(),
        memory_threshold = state.resource_guard.threshold(),
        auth = state.config.auth_enabled(),
        "admission pipeline configured"
    );
    let app = app(state);

    // Run the server with graceful shutdown on Ctrl+C
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
