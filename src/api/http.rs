//! HTTP API Server
//!
//! The gated service endpoint plus status and health queries. Handlers
//! only read the leadership gate and the candidate handle; they never
//! mutate election state.

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::election::{CandidateHandle, CandidateNode, LeadershipGate, Role};
use crate::error::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Leadership gate written by the election loop
    pub gate: Arc<LeadershipGate>,
    /// Candidate node handle for status reporting
    pub candidate: CandidateHandle,
    /// When this process started serving
    pub started_at: DateTime<Utc>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, gate: Arc<LeadershipGate>, candidate: CandidateHandle) -> Self {
        let state = Arc::new(AppState {
            gate,
            candidate,
            started_at: Utc::now(),
        });

        Self { config, state }
    }

    /// Create the router
    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/", get(handle_root))
            .route("/status", get(handle_status))
            .route("/health", get(handle_health))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let app = Self::create_router(Arc::clone(&self.state));

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Response Types ============

/// Status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub role: Role,
    pub is_leader: bool,
    pub candidate_node: Option<CandidateNode>,
    pub uptime_seconds: u64,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub role: Role,
}

// ============ Handlers ============

async fn handle_root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.gate.is_leader() {
        "hello from leader"
    } else {
        "hello from follower"
    }
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let role = state.gate.role();
    let candidate_node = state.candidate.read().await.clone();
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(StatusResponse {
        role,
        is_leader: role == Role::Leader,
        candidate_node,
        uptime_seconds,
    })
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        role: state.gate.role(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::RwLock;

    fn test_state(leader: bool, node: Option<CandidateNode>) -> Arc<AppState> {
        let gate = Arc::new(LeadershipGate::new());
        if leader {
            gate.transition(Role::Leader);
        }
        Arc::new(AppState {
            gate,
            candidate: Arc::new(RwLock::new(node)),
            started_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_router_serves_gated_body() {
        let node = CandidateNode {
            path: "/api-leader/node-0000000002".to_string(),
            created_at: Utc::now(),
        };
        let state = test_state(false, Some(node));
        let app = HttpServer::create_router(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let body = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "hello from follower");

        let status: serde_json::Value = reqwest::get(format!("http://{}/status", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["is_leader"], serde_json::json!(false));
        assert_eq!(status["role"], serde_json::json!("Follower"));
        assert_eq!(
            status["candidate_node"]["path"],
            serde_json::json!("/api-leader/node-0000000002")
        );

        // The body flips with the gate, nothing else restarts
        state.gate.transition(Role::Leader);
        let body = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "hello from leader");

        let health: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["healthy"], serde_json::json!(true));
    }
}
