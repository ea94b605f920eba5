use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quizbuzz::{
    api, auth, buzz,
    config::ServerConfig,
    questions::QuestionBank,
    state::SessionState,
    types::SessionConfig,
    ws,
};

/// Log a startup failure and exit before any socket is accepting
fn fatal(context: &str, e: impl std::fmt::Display) -> ! {
    tracing::error!("{}: {}", context, e);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quizbuzz=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting quiz coordinator...");

    let server_config =
        ServerConfig::from_env().unwrap_or_else(|e| fatal("Invalid server configuration", e));
    let session_config =
        SessionConfig::from_env().unwrap_or_else(|e| fatal("Invalid session configuration", e));
    let auth_config = Arc::new(auth::AuthConfig::from_env());

    let questions = QuestionBank::from_file(&server_config.questions_path)
        .unwrap_or_else(|e| fatal("Failed to load questions", e));
    tracing::info!(
        "Poll window {}s, answer window {}s, scoring {:?}, duplicate identities: {:?}",
        session_config.poll_seconds,
        session_config.answer_seconds,
        session_config.scoring,
        session_config.duplicate_policy
    );

    let udp = tokio::net::UdpSocket::bind(server_config.buzz_addr())
        .await
        .unwrap_or_else(|e| fatal("Failed to bind buzz socket", e));
    let listener = tokio::net::TcpListener::bind(server_config.http_addr())
        .await
        .unwrap_or_else(|e| fatal("Failed to bind HTTP listener", e));

    let state = Arc::new(SessionState::new(session_config, questions));
    state.set_buzz_port(server_config.buzz_port);
    if let Err(e) = state.open_lobby().await {
        fatal("Failed to open lobby", e);
    }

    let buzz_listener = buzz::spawn_buzz_listener(udp, state.clone());

    // Protected host routes (with HTTP Basic Auth)
    let host_routes = Router::new()
        .route("/host/ws", get(ws::host_ws_handler))
        .route("/api/host/start", post(api::host_start))
        .route("/api/host/stop", post(api::host_stop))
        .route("/api/host/kick/{identity}", post(api::host_kick))
        .layer(middleware::from_fn_with_state(
            auth_config.clone(),
            auth::host_auth_middleware,
        ));

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/session", get(api::get_session))
        .route("/api/scores", get(api::get_scores))
        .merge(host_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    tracing::info!("Listening on http://{}", server_config.http_addr());
    tracing::info!("Participants join at ws://{}/ws", server_config.http_addr());

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown requested");
    });
    if let Err(e) = serve.await {
        tracing::error!("Server error: {}", e);
    }

    if let Err(e) = state.stop_session("process shutdown").await {
        tracing::error!("Failed to stop session cleanly: {}", e);
    }
    if let Err(e) = buzz_listener.await {
        tracing::error!("Buzz listener panicked: {}", e);
    }
    tracing::info!("Bye");
}
