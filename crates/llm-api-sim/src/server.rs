// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! HTTP surface of the simulator
//!
//! Every request other than `GET /health` goes through the
//! [`DispatcherChain`]; requests nobody claims get a 404.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::to_bytes,
    extract::{Request, State},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::config::SimConfig;
use crate::dispatch::{DispatcherChain, InboundRequest};
use crate::error::Result;

#[derive(Clone)]
struct AppState {
    chain: Arc<DispatcherChain>,
    max_body_size: usize,
}

/// Simulator HTTP server
pub struct SimServer {
    config: Arc<SimConfig>,
    app: Router,
}

impl SimServer {
    /// Server with the OpenAI-style and Anthropic-style endpoints
    pub fn new(config: SimConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let chain = DispatcherChain::standard(config.clone());
        Ok(Self::with_chain(config, chain))
    }

    /// Server answering through a caller-assembled chain
    pub fn with_chain(config: Arc<SimConfig>, chain: DispatcherChain) -> Self {
        let app = Self::build_app(&config, chain);
        Self { config, app }
    }

    fn build_app(config: &SimConfig, chain: DispatcherChain) -> Router {
        let state = AppState {
            chain: Arc::new(chain),
            max_body_size: config.server.max_body_size,
        };

        let middleware_stack = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http());

        let router = Router::new()
            .route("/health", get(health))
            .fallback(simulate)
            .with_state(state)
            .layer(middleware_stack);

        if config.server.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }

    /// Serve until the process is stopped
    pub async fn run(self) -> Result<()> {
        let addr = self.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("LLM API simulator listening on {}", listener.local_addr()?);
        axum::serve(listener, self.app).await?;
        Ok(())
    }
}

/// Bind `config.server` (port 0 picks a free port) and serve in the background
pub async fn spawn(config: SimConfig) -> Result<RunningServer> {
    let server = SimServer::new(config)?;
    let listener = tokio::net::TcpListener::bind(server.bind_addr()).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let app = server.app;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    info!("LLM API simulator listening on {}", local_addr);
    Ok(RunningServer {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        handle: Some(handle),
    })
}

/// Handle to a server started with [`spawn`]; dropping it stops the server
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<std::io::Result<()>>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://host:port`, without a trailing slash
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await.map_err(std::io::Error::other)??;
        }
        Ok(())
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn simulate(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let inbound = match to_bytes(body, state.max_body_size).await {
        Ok(bytes) => InboundRequest::new(parts.method, parts.uri, parts.headers, bytes),
        Err(err) => InboundRequest::new(parts.method, parts.uri, parts.headers, Vec::new())
            .with_body_error(format!(
                "could not read request body (limit {} bytes): {}",
                state.max_body_size, err
            )),
    };
    state.chain.dispatch(&inbound).into_response()
}
