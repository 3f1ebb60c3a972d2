//! victord — the BLE pairing daemon.

mod session;
mod transport;

use anyhow::Result;

use victor_core::config::VictorConfig;
use victor_core::control::PairingControl;
use victor_core::events::EventLog;
use victor_core::keyring::Keyring;

use session::{run_session, KeyringStore};
use transport::{Transport, TcpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = VictorConfig::load()?;

    let mut keyring = Keyring::load(&config.identity.keyring_path);
    let name = keyring.ensure_name().to_string();
    keyring
        .save(&config.identity.keyring_path)
        .unwrap_or_else(|e| tracing::warn!(error = %e, "failed to persist freshly provisioned keyring"));
    tracing::info!(name, pubkey = hex::encode(keyring.identity.public), "victord starting");

    let identity = keyring.identity.clone();
    let store = KeyringStore::new(keyring, config.identity.keyring_path.clone());

    let events = EventLog::new();
    let control = PairingControl::new();

    let api_state = victor_api::ApiState {
        events: events.clone(),
        control: control.clone(),
        robot_name: name,
        robot_pubkey: identity.public,
    };
    let api_port = config.api.port;
    let api_task = tokio::spawn(victor_api::serve(api_state, api_port));

    let accept_task = tokio::spawn(accept_loop(config, identity, store, control, events));

    tokio::select! {
        r = api_task => tracing::error!(?r, "control API task exited"),
        r = accept_task => tracing::error!(?r, "accept loop exited"),
    }

    Ok(())
}

async fn accept_loop(
    config: VictorConfig,
    identity: victor_core::crypto::Keypair,
    store: KeyringStore,
    control: PairingControl,
    events: EventLog,
) -> Result<()> {
    let mut transport = TcpTransport::bind(&config.transport.listen_addr).await?;
    tracing::info!(addr = %config.transport.listen_addr, "BLE transport listening");

    // All pairing sessions share one keyring and must be serialized through
    // it, so there is exactly one session executor live at a time — matching
    // the real hardware, which only ever has one BLE central connected.
    let store = std::sync::Arc::new(tokio::sync::Mutex::new(store));

    loop {
        let conn = match transport.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept BLE connection");
                continue;
            }
        };
        tracing::info!(peer = %conn.peer, "BLE connection accepted");

        let identity = identity.clone();
        let policy = config.pairing.clone();
        let control = control.clone();
        let events = events.clone();
        let store = store.clone();

        tokio::spawn(async move {
            let mut guard = store.lock().await;
            run_session(conn, identity, policy, control, &mut *guard, &events).await;
        });
    }
}
