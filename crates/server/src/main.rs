//! Voxline Server Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voxline_config::{load_settings, Settings};
use voxline_engine::{build_engine, services, DIContainer, EventBus, TransportRegistry};
use voxline_server::{create_router, register_providers, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults.
    let env = std::env::var("VOXLINE_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            // Tracing is not up yet.
            eprintln!("Warning: failed to load config: {err}. Using defaults.");
            Settings::default()
        }
    };
    let settings = Arc::new(settings);

    init_tracing(&settings);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = env.as_deref().unwrap_or("default"),
        "starting voxline server"
    );

    let container = Arc::new(DIContainer::new());
    let bus = Arc::new(EventBus::new());
    let transport = Arc::new(TransportRegistry::new());

    register_providers(&container, &bus, &transport, &settings)?;

    let handles = build_engine(
        container.clone(),
        bus.clone(),
        transport.clone(),
        settings.clone(),
    );
    // Tools enqueue audio through the orchestrator; expose it for lookup.
    container.register_instance(
        services::TTS_ORCHESTRATOR,
        handles.orchestrator.clone(),
    );

    let state = AppState::new(settings.clone(), handles);
    let app = create_router(state.clone());

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!(%addr, ws_path = %settings.server.ws_path, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Tear every live session down before exiting.
    for session_id in state.session_manager.session_ids() {
        state.session_manager.destroy_session(&session_id).await;
    }

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("voxline={}", settings.observability.log_level).into());

    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
