//! End-to-end pairing scenarios, run directly against `victor-core` with no
//! real sockets and no daemon process — a companion device is played by
//! hand, mirroring the robot's own key derivation, and every message crosses
//! the fragmenter/reassembler pair exactly as it would over a real BLE
//! characteristic.

use std::collections::HashMap;

use victor_core::config::PairingConfig;
use victor_core::control::PairingControl;
use victor_core::crypto::Keypair;
use victor_core::events::{EventLog, UpwardEvent};
use victor_core::fragment::{self, FeedOutcome, Reassembler};
use victor_core::keyex;
use victor_core::keyring::{ClientRecord, Keyring};
use victor_core::pairing::{ClientStore, PairingError, PairingEvent, PairingSession, State};
use victor_core::record::RecordLayer;
use victor_core::wire::{
    ConnType, HandshakeMessage, RtsAck, RtsChallengeMessage, RtsConnRequest, RtsMessage,
    RtsNonceMessage, ACK_NONCE_MESSAGE, RtsConnResponse,
};

const MAX_MESSAGE_LEN: usize = 4096;

/// Round-trips `msg` through `fragment::send` and a fresh [`Reassembler`],
/// standing in for one hop over the BLE characteristic.
fn over_the_wire(msg: &[u8]) -> Vec<u8> {
    let mut reassembler = Reassembler::new(MAX_MESSAGE_LEN);
    let mut out = None;
    for buf in fragment::send(msg) {
        match reassembler.feed(&buf) {
            FeedOutcome::Complete(whole) => {
                assert!(out.is_none(), "delivered twice");
                out = Some(whole);
            }
            FeedOutcome::Pending => {}
            FeedOutcome::Abnormality => panic!("unexpected abnormality crossing the wire"),
        }
    }
    out.expect("message never completed reassembly")
}

#[derive(Default)]
struct InMemoryStore(HashMap<[u8; 32], ([u8; 32], [u8; 32])>);

impl ClientStore for InMemoryStore {
    fn lookup(&self, pk_client: &[u8; 32]) -> Option<([u8; 32], [u8; 32])> {
        self.0.get(pk_client).copied()
    }

    fn upsert(&mut self, record: ClientRecord) {
        self.0
            .insert(record.pk_client, (record.sk_rx, record.sk_tx));
    }
}

fn handshake_bytes() -> Vec<u8> {
    HandshakeMessage::new(3).as_bytes().to_vec()
}

/// Decode a `ConnResponse`/`NonceMessage` reply pair as the session emits it.
fn split_conn_reply(event: PairingEvent) -> (RtsConnResponse, RtsNonceMessage) {
    match event {
        PairingEvent::Reply(mut msgs) => {
            assert_eq!(msgs.len(), 2);
            let nonce_bytes = over_the_wire(&msgs.pop().unwrap());
            let resp_bytes = over_the_wire(&msgs.pop().unwrap());
            let resp = match RtsMessage::decode(&resp_bytes).unwrap() {
                RtsMessage::ConnResponse(m) => m,
                other => panic!("wrong variant: {other:?}"),
            };
            let nonce = match RtsMessage::decode(&nonce_bytes).unwrap() {
                RtsMessage::NonceMessage(m) => m,
                other => panic!("wrong variant: {other:?}"),
            };
            (resp, nonce)
        }
        _ => panic!("expected a two-message reply"),
    }
}

// ── Scenario A: happy-path first-time pair ───────────────────────────────────

#[test]
fn scenario_a_happy_path_first_time_pair() {
    let robot_identity = Keypair::generate();
    let device_identity = Keypair::generate();
    let mut store = InMemoryStore::default();
    let control = PairingControl::new();
    let events = EventLog::new();

    control.arm();

    let mut session = PairingSession::new(robot_identity, PairingConfig::default());
    session.begin();
    session.set_pairing_armed(control.is_armed());

    let hs_reply = session
        .handle_handshake(&over_the_wire(&handshake_bytes()))
        .unwrap();
    assert_eq!(session.state(), State::AwaitingPublicKey);
    let _ = over_the_wire(&hs_reply);

    let conn_req = RtsMessage::ConnRequest(RtsConnRequest {
        pk: device_identity.public,
    })
    .encode();
    let event = session
        .handle_rts(&over_the_wire(&conn_req), &mut store)
        .unwrap();
    let (conn_response, nonce_message) = split_conn_reply(event);
    assert_eq!(conn_response.conn_type, ConnType::FirstTimePair as u8);

    let pin = session.pin().expect("pin generated for first-time pair");
    events.push(UpwardEvent::UpdatedPin {
        pin: String::from_utf8_lossy(&pin).to_string(),
    });

    let device_keys =
        keyex::derive_device_keys(&device_identity, &conn_response.pk, &pin).unwrap();
    let mut device_record = RecordLayer::new(
        device_keys.sk_tx,
        device_keys.sk_rx,
        nonce_message.to_robot_nonce,
        nonce_message.to_device_nonce,
    );

    let ack = RtsMessage::Ack(RtsAck {
        ack_type: ACK_NONCE_MESSAGE,
    })
    .encode();
    let event = session
        .handle_rts(&over_the_wire(&ack), &mut store)
        .unwrap();
    let challenge_ciphertext = match event {
        PairingEvent::Reply(mut msgs) => over_the_wire(&msgs.pop().unwrap()),
        _ => panic!("expected challenge ciphertext"),
    };
    assert_eq!(session.state(), State::AwaitingChallengeResponse);

    let challenge_plaintext = device_record.decrypt(&challenge_ciphertext).unwrap();
    let challenge = match RtsMessage::decode(&challenge_plaintext).unwrap() {
        RtsMessage::ChallengeMessage(m) => m,
        other => panic!("wrong variant: {other:?}"),
    };

    let reply_plaintext = RtsMessage::ChallengeMessage(RtsChallengeMessage {
        number: challenge.number.wrapping_add(1),
    })
    .encode();
    let reply_ciphertext = device_record.encrypt(&reply_plaintext).unwrap();
    let event = session
        .handle_rts(&over_the_wire(&reply_ciphertext), &mut store)
        .unwrap();

    let completed = match event {
        PairingEvent::Completed(c) => c,
        _ => panic!("expected pairing to complete"),
    };
    assert_eq!(completed.conn_type, ConnType::FirstTimePair);
    assert_eq!(completed.peer_pk, device_identity.public);
    assert!(completed.pin.is_some());

    events.push(UpwardEvent::CompletedPairing {
        peer_pubkey: hex::encode(completed.peer_pk),
        reconnection: false,
    });

    assert_eq!(session.state(), State::ConfirmedSharedSecret);
    assert!(store.lookup(&device_identity.public).is_some());
    assert_eq!(events.snapshot().len(), 2);
}

// ── Scenario B: reconnection ─────────────────────────────────────────────────

#[test]
fn scenario_b_reconnection_skips_the_pin() {
    let robot_identity = Keypair::generate();
    let device_identity = Keypair::generate();
    let mut store = InMemoryStore::default();

    // The robot's stored view: sk_rx/sk_tx from the device's perspective are
    // swapped relative to what the robot itself used to derive them, exactly
    // as `ClientStore::upsert` stores them in a prior session.
    let first_pin = *b"482913";
    let robot_keys =
        keyex::derive_robot_keys(&robot_identity, &device_identity.public, &first_pin).unwrap();
    store.upsert(ClientRecord {
        pk_client: device_identity.public,
        sk_rx: robot_keys.sk_rx,
        sk_tx: robot_keys.sk_tx,
    });

    // Config with pairing mode *not* armed — reconnections must not need it.
    let mut policy = PairingConfig::default();
    policy.require_pairing_mode = true;
    let mut session = PairingSession::new(robot_identity, policy);
    session.begin();
    session.set_pairing_armed(false);

    session
        .handle_handshake(&over_the_wire(&handshake_bytes()))
        .unwrap();

    let conn_req = RtsMessage::ConnRequest(RtsConnRequest {
        pk: device_identity.public,
    })
    .encode();
    let event = session
        .handle_rts(&over_the_wire(&conn_req), &mut store)
        .unwrap();
    let (conn_response, nonce_message) = split_conn_reply(event);
    assert_eq!(conn_response.conn_type, ConnType::Reconnection as u8);
    assert!(session.pin().is_none());

    let device_keys =
        keyex::derive_device_keys(&device_identity, &conn_response.pk, &first_pin).unwrap();
    let mut device_record = RecordLayer::new(
        device_keys.sk_tx,
        device_keys.sk_rx,
        nonce_message.to_robot_nonce,
        nonce_message.to_device_nonce,
    );

    let ack = RtsMessage::Ack(RtsAck {
        ack_type: ACK_NONCE_MESSAGE,
    })
    .encode();
    let event = session
        .handle_rts(&over_the_wire(&ack), &mut store)
        .unwrap();
    let challenge_ciphertext = match event {
        PairingEvent::Reply(mut msgs) => over_the_wire(&msgs.pop().unwrap()),
        _ => panic!("expected challenge ciphertext"),
    };

    let challenge_plaintext = device_record.decrypt(&challenge_ciphertext).unwrap();
    let challenge = match RtsMessage::decode(&challenge_plaintext).unwrap() {
        RtsMessage::ChallengeMessage(m) => m,
        other => panic!("wrong variant: {other:?}"),
    };
    let reply_ciphertext = device_record
        .encrypt(
            &RtsMessage::ChallengeMessage(RtsChallengeMessage {
                number: challenge.number.wrapping_add(1),
            })
            .encode(),
        )
        .unwrap();
    let event = session
        .handle_rts(&over_the_wire(&reply_ciphertext), &mut store)
        .unwrap();

    match event {
        PairingEvent::Completed(completed) => {
            assert_eq!(completed.conn_type, ConnType::Reconnection);
            assert!(completed.pin.is_none());
        }
        _ => panic!("expected reconnection to complete"),
    }
}

// ── Scenario C: wrong PIN restarts pairing, three times is fatal ───────────

#[test]
fn scenario_c_wrong_pin_restarts_until_cap_then_drops() {
    let robot_identity = Keypair::generate();
    let mut store = InMemoryStore::default();
    let policy = PairingConfig::default();
    let max_restarts = policy.max_restarts;

    let mut session = PairingSession::new(robot_identity, policy);
    session.set_pairing_armed(true);

    // Each mistyped-PIN attempt restarts pairing back to step 2 with a fresh
    // handshake, PIN and challenge — so every loop iteration re-pairs from
    // scratch rather than retrying in place.
    for attempt in 1..=max_restarts {
        session.begin();
        session.handle_handshake(&handshake_bytes()).unwrap();

        let device_identity = Keypair::generate();
        let conn_req = RtsMessage::ConnRequest(RtsConnRequest {
            pk: device_identity.public,
        })
        .encode();
        let event = session.handle_rts(&conn_req, &mut store).unwrap();
        let (conn_response, nonce_message) = split_conn_reply(event);

        let pin = session.pin().unwrap();
        let device_keys =
            keyex::derive_device_keys(&device_identity, &conn_response.pk, &pin).unwrap();
        let device_record = RecordLayer::new(
            device_keys.sk_tx,
            device_keys.sk_rx,
            nonce_message.to_robot_nonce,
            nonce_message.to_device_nonce,
        );

        let ack = RtsMessage::Ack(RtsAck {
            ack_type: ACK_NONCE_MESSAGE,
        })
        .encode();
        session.handle_rts(&ack, &mut store).unwrap();

        // Deliberately echo back the wrong number instead of number + 1 —
        // stands in for a mistyped PIN on the companion app.
        let bogus = RtsMessage::ChallengeMessage(RtsChallengeMessage { number: 0 }).encode();
        let ciphertext = device_record.encrypt(&bogus).unwrap();
        let result = session.handle_rts(&ciphertext, &mut store);

        if attempt < max_restarts {
            assert!(matches!(result.unwrap(), PairingEvent::Restarted));
            assert_eq!(session.state(), State::AwaitingHandshake);
        } else {
            assert!(matches!(result.unwrap_err(), PairingError::TooManyRestarts));
        }
    }

    assert_eq!(session.total_pairing_attempts(), max_restarts);
    assert_eq!(session.challenge_attempts(), max_restarts);
    assert_eq!(session.abnormality_count(), max_restarts);
}

// ── Scenario D: version mismatch ─────────────────────────────────────────────

#[test]
fn scenario_d_version_mismatch_is_rejected() {
    let robot_identity = Keypair::generate();
    let mut session = PairingSession::new(robot_identity, PairingConfig::default());
    session.begin();

    let legacy = HandshakeMessage::new(2).as_bytes().to_vec();
    let err = session
        .handle_handshake(&over_the_wire(&legacy))
        .unwrap_err();
    assert!(matches!(err, PairingError::UnsupportedVersion(2)));
    // The session never advances past AwaitingHandshake for a rejected version.
    assert_eq!(session.state(), State::AwaitingHandshake);
}

// ── Scenario E: torn-write recovery ──────────────────────────────────────────

#[test]
fn scenario_e_torn_write_forces_a_fresh_first_time_pair() {
    let path = std::env::temp_dir().join(format!(
        "victor-integration-torn-write-{}-{}",
        std::process::id(),
        rand::random::<u32>()
    ));

    let robot_identity = Keypair::generate();
    let device_identity = Keypair::generate();

    // First session: complete a first-time pair and persist it.
    let mut keyring = Keyring::load(&path);
    keyring.ensure_name();
    let mut store = MemoryBackedKeyring::new(keyring, path.clone());

    let mut session = PairingSession::new(robot_identity.clone(), PairingConfig::default());
    session.begin();
    session.set_pairing_armed(true);
    session.handle_handshake(&handshake_bytes()).unwrap();

    let conn_req = RtsMessage::ConnRequest(RtsConnRequest {
        pk: device_identity.public,
    })
    .encode();
    let event = session.handle_rts(&conn_req, &mut store).unwrap();
    let (conn_response, nonce_message) = split_conn_reply(event);
    let pin = session.pin().unwrap();

    let device_keys =
        keyex::derive_device_keys(&device_identity, &conn_response.pk, &pin).unwrap();
    let mut device_record = RecordLayer::new(
        device_keys.sk_tx,
        device_keys.sk_rx,
        nonce_message.to_robot_nonce,
        nonce_message.to_device_nonce,
    );

    let ack = RtsMessage::Ack(RtsAck {
        ack_type: ACK_NONCE_MESSAGE,
    })
    .encode();
    let event = session.handle_rts(&ack, &mut store).unwrap();
    let challenge_ciphertext = match event {
        PairingEvent::Reply(mut msgs) => msgs.pop().unwrap(),
        _ => panic!("expected challenge ciphertext"),
    };
    let challenge_plaintext = device_record.decrypt(&challenge_ciphertext).unwrap();
    let challenge = match RtsMessage::decode(&challenge_plaintext).unwrap() {
        RtsMessage::ChallengeMessage(m) => m,
        other => panic!("wrong variant: {other:?}"),
    };
    let reply_ciphertext = device_record
        .encrypt(
            &RtsMessage::ChallengeMessage(RtsChallengeMessage {
                number: challenge.number.wrapping_add(1),
            })
            .encode(),
        )
        .unwrap();
    session.handle_rts(&reply_ciphertext, &mut store).unwrap();
    assert!(store.lookup(&device_identity.public).is_some());

    // Simulate power loss mid-write: truncate the persisted keyring file.
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    // Reload: the corrupted file falls back to a fresh keyring, so the
    // previously paired device is no longer recognized.
    let reloaded = Keyring::load(&path);
    assert!(reloaded.clients.is_empty());
    assert_ne!(reloaded.identity.public, robot_identity.public);

    let mut second_store = MemoryBackedKeyring::new(reloaded, path.clone());
    let mut second_session =
        PairingSession::new(Keypair::generate(), PairingConfig::default());
    second_session.begin();
    second_session.set_pairing_armed(true);
    second_session.handle_handshake(&handshake_bytes()).unwrap();
    let event = second_session
        .handle_rts(&conn_req_for(&device_identity), &mut second_store)
        .unwrap();
    let (conn_response, _) = split_conn_reply(event);
    assert_eq!(conn_response.conn_type, ConnType::FirstTimePair as u8);

    let _ = std::fs::remove_file(&path);
}

fn conn_req_for(device_identity: &Keypair) -> Vec<u8> {
    RtsMessage::ConnRequest(RtsConnRequest {
        pk: device_identity.public,
    })
    .encode()
}

/// Local adapter from the on-disk keyring to [`ClientStore`], mirroring
/// `victord`'s own adapter closely enough to exercise real persistence in
/// this crate's tests without depending on the `victord` binary crate.
struct MemoryBackedKeyring {
    keyring: Keyring,
    path: std::path::PathBuf,
}

impl MemoryBackedKeyring {
    fn new(keyring: Keyring, path: std::path::PathBuf) -> Self {
        Self { keyring, path }
    }
}

impl ClientStore for MemoryBackedKeyring {
    fn lookup(&self, pk_client: &[u8; 32]) -> Option<([u8; 32], [u8; 32])> {
        self.keyring
            .clients
            .iter()
            .find(|c| &c.pk_client == pk_client)
            .map(|c| (c.sk_rx, c.sk_tx))
    }

    fn upsert(&mut self, record: ClientRecord) {
        match self
            .keyring
            .clients
            .iter_mut()
            .find(|c| c.pk_client == record.pk_client)
        {
            Some(existing) => *existing = record,
            None => self.keyring.clients.push(record),
        }
        self.keyring.save(&self.path).expect("keyring save failed");
    }
}

// ── Scenario F: nonce monotonicity under decrypt failure ────────────────────

#[test]
fn scenario_f_tampered_ciphertext_never_advances_the_rx_nonce() {
    let robot_identity = Keypair::generate();
    let device_identity = Keypair::generate();
    let mut store = InMemoryStore::default();

    let mut session = PairingSession::new(robot_identity, PairingConfig::default());
    session.begin();
    session.set_pairing_armed(true);
    session.handle_handshake(&handshake_bytes()).unwrap();

    let conn_req = RtsMessage::ConnRequest(RtsConnRequest {
        pk: device_identity.public,
    })
    .encode();
    let event = session.handle_rts(&conn_req, &mut store).unwrap();
    let (conn_response, nonce_message) = split_conn_reply(event);
    let pin = session.pin().unwrap();

    let device_keys =
        keyex::derive_device_keys(&device_identity, &conn_response.pk, &pin).unwrap();
    let mut device_record = RecordLayer::new(
        device_keys.sk_tx,
        device_keys.sk_rx,
        nonce_message.to_robot_nonce,
        nonce_message.to_device_nonce,
    );

    let ack = RtsMessage::Ack(RtsAck {
        ack_type: ACK_NONCE_MESSAGE,
    })
    .encode();
    let event = session.handle_rts(&ack, &mut store).unwrap();
    let challenge_ciphertext = match event {
        PairingEvent::Reply(mut msgs) => msgs.pop().unwrap(),
        _ => panic!("expected challenge ciphertext"),
    };
    let challenge_plaintext = device_record.decrypt(&challenge_ciphertext).unwrap();
    let challenge = match RtsMessage::decode(&challenge_plaintext).unwrap() {
        RtsMessage::ChallengeMessage(m) => m,
        other => panic!("wrong variant: {other:?}"),
    };

    let good_reply = RtsMessage::ChallengeMessage(RtsChallengeMessage {
        number: challenge.number.wrapping_add(1),
    })
    .encode();
    // Garbage of the right shape, never actually encrypted — so the
    // device's own nonce counter is untouched by these failed attempts.
    let tampered = vec![0xaau8; good_reply.len() + 16];

    for attempt in 1..=4u32 {
        let err = session.handle_rts(&tampered, &mut store).unwrap_err();
        assert!(matches!(err, PairingError::ChallengeFailed));
        assert_eq!(session.state(), State::AwaitingChallengeResponse);
        // Each failed decrypt is counted on its own cap, independent of the
        // wrong-reply (restart) path, and stays under max_challenge_attempts
        // so the legitimate reply below can still land.
        assert_eq!(session.challenge_attempts(), attempt);
        assert!(session.challenge_attempts() < PairingConfig::default().max_challenge_attempts);
    }

    // A correctly encrypted reply against the *original* robot nonce still
    // completes — the robot's rx nonce truly never advanced.
    let fresh_reply_ciphertext = device_record.encrypt(&good_reply).unwrap();
    let event = session
        .handle_rts(&fresh_reply_ciphertext, &mut store)
        .unwrap();
    assert!(matches!(event, PairingEvent::Completed(_)));
}
