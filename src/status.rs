//! Daemon counters and the optional read-only `/status` endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::gate::AcquisitionGate;
use crate::shutdown::Shutdown;

/// Phase of the trigger controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BurstState {
    Idle,
    Configuring,
    Triggering,
    Draining,
}

/// Shared daemon state
pub struct DaemonStatus {
    burst_state: RwLock<BurstState>,
    current_prefix: RwLock<Option<String>>,
    bursts_completed: RwLock<u64>,
    frames_saved: RwLock<u64>,
    watchdog_trips: RwLock<u64>,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            burst_state: RwLock::new(BurstState::Idle),
            current_prefix: RwLock::new(None),
            bursts_completed: RwLock::new(0),
            frames_saved: RwLock::new(0),
            watchdog_trips: RwLock::new(0),
        }
    }
}

impl DaemonStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn burst_state(&self) -> BurstState {
        *self.burst_state.read()
    }

    pub fn set_burst_state(&self, state: BurstState) {
        *self.burst_state.write() = state;
    }

    pub fn burst_started(&self, prefix: &str) {
        *self.current_prefix.write() = Some(prefix.to_string());
    }

    pub fn current_prefix(&self) -> Option<String> {
        self.current_prefix.read().clone()
    }

    pub fn burst_finished(&self) {
        *self.current_prefix.write() = None;
        *self.bursts_completed.write() += 1;
        self.set_burst_state(BurstState::Idle);
    }

    pub fn frame_saved(&self) {
        *self.frames_saved.write() += 1;
    }

    pub fn watchdog_tripped(&self) {
        *self.watchdog_trips.write() += 1;
    }

    pub fn bursts_completed(&self) -> u64 {
        *self.bursts_completed.read()
    }

    pub fn frames_saved(&self) -> u64 {
        *self.frames_saved.read()
    }

    pub fn watchdog_trips(&self) -> u64 {
        *self.watchdog_trips.read()
    }
}

#[derive(Clone)]
struct StatusState {
    status: Arc<DaemonStatus>,
    gate: Arc<AcquisitionGate>,
}

pub fn router(status: Arc<DaemonStatus>, gate: Arc<AcquisitionGate>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .with_state(StatusState { status, gate })
}

/// Serve `/status` until shutdown.
pub async fn serve(
    addr: SocketAddr,
    status: Arc<DaemonStatus>,
    gate: Arc<AcquisitionGate>,
    shutdown: Shutdown,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind status endpoint {}", addr))?;
    info!("Status endpoint on http://{}/status", addr);
    axum::serve(listener, router(status, gate))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    Ok(())
}

async fn status_handler(State(state): State<StatusState>) -> Json<serde_json::Value> {
    let status = &state.status;
    Json(serde_json::json!({
        "state": status.burst_state(),
        "prefix": status.current_prefix(),
        "armed": state.gate.is_armed(),
        "accepted": state.gate.accepted(),
        "bursts_completed": status.bursts_completed(),
        "frames_saved": status.frames_saved(),
        "watchdog_trips": status.watchdog_trips(),
    }))
}
