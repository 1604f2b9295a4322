//! HTTP admission API.
//!
//! Endpoints:
//! - POST /v1/ratelimit/check - admission decision
//! - POST /v1/rules, GET /v1/rules, DELETE /v1/rules - rule management
//! - GET /metrics - Prometheus format metrics
//! - GET /health - liveness, never touches the store

mod routes;

pub use routes::{route, CheckResponse, RuleId};

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::service::AdmissionService;

/// Everything a request handler needs.
pub struct ApiState {
    pub service: AdmissionService,
    pub max_body_bytes: usize,
}

/// Bind the API on `addr` and serve until the process exits.
pub async fn run_http_server(addr: SocketAddr, state: Arc<ApiState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Admission API listening on http://{}", listener.local_addr()?);
    serve(listener, state).await
}

/// Serve HTTP/1 connections accepted from `listener`.
pub async fn serve(listener: TcpListener, state: Arc<ApiState>) -> std::io::Result<()> {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to accept HTTP connection: {}", e);
                continue;
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);

            let service = service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(route(&state, req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("HTTP connection error from {}: {}", remote_addr, e);
            }
        });
    }
}
