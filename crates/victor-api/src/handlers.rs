//! Operator control surface handlers — thin wrappers over the shared
//! [`PairingControl`]/[`EventLog`] handles that `victord`'s session
//! executor also touches.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use victor_core::control::PairingControl;
use victor_core::events::{EventLog, UpwardEvent};

#[derive(Clone)]
pub struct ApiState {
    pub events: EventLog,
    pub control: PairingControl,
    pub robot_name: String,
    pub robot_pubkey: [u8; 32],
}

// ── /pairing/begin ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PairingBeginResponse {
    pub armed: bool,
}

pub async fn handle_pairing_begin(State(state): State<ApiState>) -> Json<PairingBeginResponse> {
    state.control.arm();
    tracing::info!("pairing mode armed via API");
    Json(PairingBeginResponse { armed: true })
}

// ── /pairing/stop ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PairingStopResponse {
    pub armed: bool,
}

pub async fn handle_pairing_stop(State(state): State<ApiState>) -> Json<PairingStopResponse> {
    state.control.disarm();
    state.events.push(UpwardEvent::StopPairing {
        reason: "stopped by operator".to_string(),
    });
    tracing::info!("pairing mode disarmed via API");
    Json(PairingStopResponse { armed: false })
}

// ── /pairing/status ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PairingStatusResponse {
    pub robot_name: String,
    pub robot_pubkey: String,
    pub armed: bool,
    pub state: String,
    pub conn_type: Option<String>,
    pub peer_pubkey: Option<String>,
    pub challenge_attempts: u32,
    pub abnormality_count: u32,
    pub total_pairing_attempts: u32,
    pub channel_encrypted: bool,
}

pub async fn handle_pairing_status(State(state): State<ApiState>) -> Json<PairingStatusResponse> {
    let status = state.control.status();
    Json(PairingStatusResponse {
        robot_name: state.robot_name,
        robot_pubkey: hex::encode(state.robot_pubkey),
        armed: state.control.is_armed(),
        state: status.state,
        conn_type: status.conn_type,
        peer_pubkey: status.peer_pubkey,
        challenge_attempts: status.challenge_attempts,
        abnormality_count: status.abnormality_count,
        total_pairing_attempts: status.total_pairing_attempts,
        channel_encrypted: status.channel_encrypted,
    })
}

// ── /pairing/events ───────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct PairingEventsResponse {
    pub events: Vec<UpwardEvent>,
}

pub async fn handle_pairing_events(State(state): State<ApiState>) -> Json<PairingEventsResponse> {
    Json(PairingEventsResponse {
        events: state.events.snapshot(),
    })
}

// ── /ota/progress ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct OtaProgressRequest {
    pub percent: u8,
}

#[derive(Serialize)]
pub struct OtaProgressResponse {
    pub recorded: bool,
}

pub async fn handle_ota_progress(
    State(state): State<ApiState>,
    Json(req): Json<OtaProgressRequest>,
) -> Json<OtaProgressResponse> {
    state.events.push(UpwardEvent::OtaUpdateRequest {
        percent: req.percent,
    });
    tracing::debug!(percent = req.percent, "ota progress passed through");
    Json(OtaProgressResponse { recorded: true })
}
