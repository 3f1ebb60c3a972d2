//! begin-pairing, stop-pairing, status, events commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct PairingBeginResponse {
    armed: bool,
}

#[derive(Deserialize)]
struct PairingStopResponse {
    armed: bool,
}

#[derive(Deserialize)]
struct PairingStatusResponse {
    robot_name: String,
    robot_pubkey: String,
    armed: bool,
    state: String,
    conn_type: Option<String>,
    peer_pubkey: Option<String>,
    challenge_attempts: u32,
    abnormality_count: u32,
    total_pairing_attempts: u32,
    channel_encrypted: bool,
}

#[derive(Deserialize)]
struct PairingEventsResponse {
    events: Vec<UpwardEventJson>,
}

#[derive(Deserialize)]
#[serde(tag = "kind")]
#[allow(dead_code)]
enum UpwardEventJson {
    UpdatedPin { pin: String },
    CompletedPairing { peer_pubkey: String, reconnection: bool },
    StopPairing { reason: String },
    OtaUpdateRequest { percent: u8 },
}

#[derive(Serialize)]
struct OtaProgressRequest {
    percent: u8,
}

#[derive(Deserialize)]
struct OtaProgressResponse {
    recorded: bool,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_begin_pairing(port: u16) -> Result<()> {
    let resp: PairingBeginResponse =
        post_json(&format!("{}/pairing/begin", base_url(port))).await?;
    println!("Pairing mode armed: {}", resp.armed);
    Ok(())
}

pub async fn cmd_stop_pairing(port: u16) -> Result<()> {
    let resp: PairingStopResponse = post_json(&format!("{}/pairing/stop", base_url(port))).await?;
    println!("Pairing mode armed: {}", resp.armed);
    Ok(())
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: PairingStatusResponse =
        get_json(&format!("{}/pairing/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  {}", resp.robot_name);
    println!("═══════════════════════════════════════");
    println!("  pubkey         : {}", resp.robot_pubkey);
    println!("  pairing armed  : {}", resp.armed);
    println!("  state          : {}", resp.state);
    if let Some(conn_type) = &resp.conn_type {
        println!("  conn type      : {conn_type}");
    }
    if let Some(peer) = &resp.peer_pubkey {
        println!("  peer pubkey    : {peer}");
    }
    println!("  channel        : {}", if resp.channel_encrypted { "encrypted" } else { "plaintext" });
    println!("  attempts       : {} total, {} challenge, {} abnormal",
        resp.total_pairing_attempts, resp.challenge_attempts, resp.abnormality_count);

    Ok(())
}

pub async fn cmd_events(port: u16) -> Result<()> {
    let resp: PairingEventsResponse =
        get_json(&format!("{}/pairing/events", base_url(port))).await?;

    if resp.events.is_empty() {
        println!("No events recorded yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Pairing Events ({})", resp.events.len());
    println!("═══════════════════════════════════════");
    for event in &resp.events {
        match event {
            UpwardEventJson::UpdatedPin { pin } => println!("  updated_pin       pin={pin}"),
            UpwardEventJson::CompletedPairing { peer_pubkey, reconnection } => println!(
                "  completed_pairing peer={peer_pubkey} reconnection={reconnection}"
            ),
            UpwardEventJson::StopPairing { reason } => println!("  stop_pairing      reason={reason}"),
            UpwardEventJson::OtaUpdateRequest { percent } => {
                println!("  ota_update_request percent={percent}")
            }
        }
    }

    Ok(())
}

pub async fn cmd_ota_progress(port: u16, percent: u8) -> Result<()> {
    let resp: OtaProgressResponse = super::http::post_json_body(
        &format!("{}/ota/progress", base_url(port)),
        &OtaProgressRequest { percent },
    )
    .await?;
    println!("OTA progress recorded: {}", resp.recorded);
    Ok(())
}
