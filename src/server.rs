mod handlers;
mod responses;

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::engine::{BackgroundTasks, Engine};
use crate::server::handlers::{events, health::health_check, partners, webhooks};
use axum::http::Method;
use axum::{
    Router,
    routing::{get, patch, post},
};
use color_eyre::eyre::{Context, Result};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
/// The global application state shared between all request handlers.
pub(crate) struct AppState {
    pub(crate) engine: Engine,
}

pub struct Server {
    router: Router,
    listener: TcpListener,
    local_addr: SocketAddr,
    engine: Engine,
    background: BackgroundTasks,
}

impl Server {
    /// Creates a new HTTP server backed by in-memory stores.
    pub async fn new(config: &Config) -> Result<Self> {
        let engine = Engine::new(config).wrap_err("Failed to build delivery engine")?;
        Self::with_engine(config, engine).await
    }

    /// Creates a new HTTP server around an existing engine and starts its
    /// background tasks.
    pub async fn with_engine(config: &Config, engine: Engine) -> Result<Self> {
        let trace_layer =
            TraceLayer::new_for_http().make_span_with(|request: &'_ axum::extract::Request<_>| {
                let uri = request.uri().to_string();
                tracing::info_span!("request", method = %request.method(), uri)
            });

        let cors_layer = CorsLayer::new()
            .allow_origin(Any)
            .allow_headers(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ]);

        let state = AppState {
            engine: engine.clone(),
        };

        let router = Router::new()
            .route("/health", get(health_check))
            .route("/partners", get(partners::list_partners))
            .route("/partners/register", post(partners::register))
            .route("/partners/verify-auth", post(partners::verify_auth))
            .route(
                "/partners/{id}",
                get(partners::get_partner)
                    .patch(partners::update_partner)
                    .delete(partners::delete_partner),
            )
            .route("/partners/{id}/status", patch(partners::update_status))
            .route(
                "/partners/{id}/rotate-credentials",
                post(partners::rotate_credentials),
            )
            .route("/webhooks/receive", post(webhooks::receive))
            .route("/events", get(events::list_events))
            .route("/events/emit", post(events::emit))
            .route("/events/broadcast", post(events::broadcast))
            .route("/events/stats", get(events::stats))
            .route("/events/dead-letter", get(events::dead_letter))
            .route("/events/{id}/retry", post(events::retry))
            .route("/events/{id}/deliver", post(events::deliver))
            .layer(cors_layer)
            .layer(trace_layer)
            .with_state(state);

        let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))
            .await
            .wrap_err_with(|| format!("Failed to bind to port {}", config.server.port))?;
        let local_addr = listener.local_addr()?;

        let background = engine.start_background(config);

        Ok(Self {
            router,
            listener,
            local_addr,
            engine,
            background,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Runs the HTTP server until Ctrl-C. Background tasks stop with it.
    pub async fn run(self) -> Result<()> {
        let Self {
            router,
            listener,
            local_addr,
            background,
            ..
        } = self;

        tracing::info!("Server listening on {}", local_addr);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        drop(background);
        tracing::info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
