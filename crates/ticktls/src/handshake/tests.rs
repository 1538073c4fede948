//! Scenario tests: full handshakes against a scripted peer.
//!
//! The "server" here is test code computing its flights with fixed p256
//! scalars and the reference PRF, so every engine output (ClientHello,
//! ClientKeyExchange, Finished verify-data) can be checked against an
//! independently derived expectation.

use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{FieldBytes, NonZeroScalar, PublicKey};
use sha2::{Digest, Sha256};

use crate::alert::AlertDescription;
use crate::config::{ConnectionConfig, PskIdentity};
use crate::diag::{ErrorId, FunctionId};
use crate::handshake::HandshakeState;
use crate::provider::fake::FakePki;
use crate::provider::prf::prf_sha256;
use crate::provider::software::SoftwareProvider;
use crate::provider::{CertVerdict, CryptoProvider, OcspVerdict};
use crate::suite::{CipherSuite, CipherWorker, NamedCurve, SignatureScheme};
use crate::Engine;
use ticktls_types::{ConnectionId, KeyElement, KeyId};

const SERVER_RANDOM: [u8; 32] = [0x42; 32];
const SIGN_SCALAR: [u8; 32] = [7; 32];
const EPH_SCALAR: [u8; 32] = [9; 32];
const CERT_DER: &[u8] = &[0x30, 0x82, 0x01, 0x0A, 0xDE, 0xAD, 0xBE, 0xEF];

fn scalar(bytes: &[u8; 32]) -> NonZeroScalar {
    Option::<NonZeroScalar>::from(NonZeroScalar::from_repr(*FieldBytes::from_slice(bytes)))
        .unwrap()
}

fn point_of(bytes: &[u8; 32]) -> Vec<u8> {
    PublicKey::from_secret_scalar(&scalar(bytes))
        .to_encoded_point(false)
        .as_bytes()
        .to_vec()
}

fn msg(ty: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![ty];
    out.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(body);
    out
}

fn server_hello(suite: u16, ack_status: bool) -> Vec<u8> {
    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&SERVER_RANDOM);
    body.push(0);
    body.extend_from_slice(&suite.to_be_bytes());
    body.push(0);
    if ack_status {
        body.extend_from_slice(&[0x00, 0x04, 0x00, 0x05, 0x00, 0x00]);
    }
    msg(2, &body)
}

fn certificate_msg(chain: &[&[u8]]) -> Vec<u8> {
    let total: usize = chain.iter().map(|c| 3 + c.len()).sum();
    let mut body = Vec::new();
    body.extend_from_slice(&(total as u32).to_be_bytes()[1..]);
    for cert in chain {
        body.extend_from_slice(&(cert.len() as u32).to_be_bytes()[1..]);
        body.extend_from_slice(cert);
    }
    msg(11, &body)
}

fn ske_ecdhe_msg(client_random: &[u8; 32]) -> Vec<u8> {
    let eph_point = point_of(&EPH_SCALAR);
    let mut params = vec![3, 0x00, 0x17, eph_point.len() as u8];
    params.extend_from_slice(&eph_point);

    let mut signed = Vec::new();
    signed.extend_from_slice(client_random);
    signed.extend_from_slice(&SERVER_RANDOM);
    signed.extend_from_slice(&params);

    let signing_key = SigningKey::from_bytes(FieldBytes::from_slice(&SIGN_SCALAR)).unwrap();
    let sig: Signature = signing_key.sign(&signed);
    let der = sig.to_der();

    let mut body = params;
    body.extend_from_slice(&[0x04, 0x03]);
    body.extend_from_slice(&(der.as_bytes().len() as u16).to_be_bytes());
    body.extend_from_slice(der.as_bytes());
    msg(12, &body)
}

fn ecdhe_worker() -> CipherWorker {
    CipherWorker {
        suite: CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        curve: NamedCurve::SECP256R1,
        signature_algorithm: SignatureScheme::ECDSA_SECP256R1_SHA256,
    }
}

fn ecdhe_config() -> ConnectionConfig {
    ConnectionConfig::builder().worker(ecdhe_worker()).build().unwrap()
}

fn ecdhe_engine(config: ConnectionConfig) -> (Engine, ConnectionId) {
    let pki = FakePki::valid(point_of(&SIGN_SCALAR));
    let mut engine = Engine::new(Box::new(SoftwareProvider::new()), Box::new(pki), 1);
    let id = engine.allocate(config).unwrap();
    engine.start(id);
    engine.handshake_tick(id);
    (engine, id)
}

fn run_ticks(engine: &mut Engine, id: ConnectionId, n: usize) {
    for _ in 0..n {
        engine.handshake_tick(id);
        engine.background_tick();
    }
}

fn client_random_from_hello(hello: &[u8]) -> [u8; 32] {
    let mut random = [0u8; 32];
    random.copy_from_slice(&hello[6..38]);
    random
}

/// Split the pending TX region into handshake messages.
fn split_messages(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let len = u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]) as usize;
        out.push((bytes[0], bytes[4..4 + len].to_vec()));
        bytes = &bytes[4 + len..];
    }
    out
}

#[test]
fn test_ecdhe_handshake_end_to_end() {
    let (mut engine, id) = ecdhe_engine(ecdhe_config());

    let client_hello = engine.pending_transmit(id).to_vec();
    assert_eq!(client_hello[0], 1);
    let client_random = client_random_from_hello(&client_hello);
    engine.mark_transmitted(id, client_hello.len());

    // Server flight one.
    let sh = server_hello(0xC02B, false);
    let cert = certificate_msg(&[CERT_DER]);
    let ske = ske_ecdhe_msg(&client_random);
    let shd = msg(14, &[]);
    let mut flight = sh.clone();
    flight.extend_from_slice(&cert);
    flight.extend_from_slice(&ske);
    flight.extend_from_slice(&shd);
    engine.on_handshake_bytes(id, &flight);

    run_ticks(&mut engine, id, 64);

    // Client flight two: ClientKeyExchange, then Finished after the CCS.
    assert!(engine.take_ccs_ready(id));
    let flight_two = split_messages(engine.pending_transmit(id));
    assert_eq!(flight_two.len(), 2);
    let (cke_ty, cke_body) = &flight_two[0];
    let (fin_ty, fin_body) = &flight_two[1];
    assert_eq!(*cke_ty, 16);
    assert_eq!(*fin_ty, 20);

    // Recompute the client's verify-data from the server's side.
    assert_eq!(cke_body[0] as usize, cke_body.len() - 1);
    let client_point = PublicKey::from_sec1_bytes(&cke_body[1..]).unwrap();
    let premaster =
        p256::ecdh::diffie_hellman(scalar(&EPH_SCALAR), client_point.as_affine());

    let mut randoms = Vec::new();
    randoms.extend_from_slice(&client_random);
    randoms.extend_from_slice(&SERVER_RANDOM);
    let mut master = [0u8; 48];
    prf_sha256(
        premaster.raw_secret_bytes(),
        "master secret",
        &randoms,
        &mut master,
    )
    .unwrap();

    let mut transcript = client_hello.clone();
    transcript.extend_from_slice(&sh);
    transcript.extend_from_slice(&cert);
    transcript.extend_from_slice(&ske);
    transcript.extend_from_slice(&shd);
    transcript.extend_from_slice(&msg(16, cke_body));

    let digest = Sha256::digest(&transcript);
    let mut expected = [0u8; 12];
    prf_sha256(&master, "client finished", &digest, &mut expected).unwrap();
    assert_eq!(fin_body.as_slice(), &expected);

    // Server flight two.
    transcript.extend_from_slice(&msg(20, fin_body));
    let digest = Sha256::digest(&transcript);
    let mut server_vd = [0u8; 12];
    prf_sha256(&master, "server finished", &digest, &mut server_vd).unwrap();

    engine.on_change_cipher_spec(id);
    engine.on_handshake_bytes(id, &msg(20, &server_vd));
    run_ticks(&mut engine, id, 16);

    assert_eq!(engine.state(id), Some(&HandshakeState::Done));
    assert!(engine.is_established(id));
    assert!(engine.close_request(id).is_none());
}

#[test]
fn test_ecdhe_wrong_server_finished_aborts_with_decrypt_error() {
    let (mut engine, id) = ecdhe_engine(ecdhe_config());
    let client_hello = engine.pending_transmit(id).to_vec();
    let client_random = client_random_from_hello(&client_hello);
    engine.mark_transmitted(id, client_hello.len());

    let mut flight = server_hello(0xC02B, false);
    flight.extend_from_slice(&certificate_msg(&[CERT_DER]));
    flight.extend_from_slice(&ske_ecdhe_msg(&client_random));
    flight.extend_from_slice(&msg(14, &[]));
    engine.on_handshake_bytes(id, &flight);
    run_ticks(&mut engine, id, 64);
    assert!(engine.take_ccs_ready(id));

    engine.on_change_cipher_spec(id);
    engine.on_handshake_bytes(id, &msg(20, &[0xAA; 12]));
    run_ticks(&mut engine, id, 16);

    assert_eq!(engine.state(id), Some(&HandshakeState::Abort));
    assert_eq!(
        engine.close_request(id).map(|a| a.description),
        Some(AlertDescription::DecryptError)
    );
    assert!(!engine.is_established(id));
}

#[test]
fn test_psk_hint_selects_identity_over_default() {
    let psk_key = KeyId(40);
    let psk_bytes = [0x5A; 16];

    let mut provider = SoftwareProvider::new();
    provider
        .key_element_set(psk_key, KeyElement::Secret, &psk_bytes)
        .unwrap();
    provider.key_set_valid(psk_key).unwrap();

    let config = ConnectionConfig::builder()
        .worker(CipherWorker {
            suite: CipherSuite::TLS_PSK_WITH_AES_128_GCM_SHA256,
            curve: NamedCurve::SECP256R1,
            signature_algorithm: SignatureScheme::ECDSA_SECP256R1_SHA256,
        })
        .psk_identity(PskIdentity {
            hint: b"alpha".to_vec(),
            identity: b"client-alpha".to_vec(),
            key: KeyId(39),
        })
        .psk_identity(PskIdentity {
            hint: b"beta".to_vec(),
            identity: b"client-beta".to_vec(),
            key: psk_key,
        })
        .default_psk(0)
        .build()
        .unwrap();

    let pki = FakePki::valid(point_of(&SIGN_SCALAR));
    let mut engine = Engine::new(Box::new(provider), Box::new(pki), 1);
    let id = engine.allocate(config).unwrap();
    engine.start(id);
    engine.handshake_tick(id);

    let client_hello = engine.pending_transmit(id).to_vec();
    engine.mark_transmitted(id, client_hello.len());

    // Hint "beta" must select identity index 1, not the default 0.
    let mut ske_body = (b"beta".len() as u16).to_be_bytes().to_vec();
    ske_body.extend_from_slice(b"beta");
    let sh = server_hello(0x00A8, false);
    let ske = msg(12, &ske_body);
    let shd = msg(14, &[]);
    let mut flight = sh.clone();
    flight.extend_from_slice(&ske);
    flight.extend_from_slice(&shd);
    engine.on_handshake_bytes(id, &flight);
    run_ticks(&mut engine, id, 64);

    assert!(engine.take_ccs_ready(id));
    let flight_two = split_messages(engine.pending_transmit(id));
    let (cke_ty, cke_body) = &flight_two[0];
    assert_eq!(*cke_ty, 16);
    assert_eq!(&cke_body[..2], &(12u16).to_be_bytes());
    assert_eq!(&cke_body[2..], b"client-beta");

    // Finish the handshake with the RFC 4279 premaster.
    let mut premaster = Vec::new();
    premaster.extend_from_slice(&16u16.to_be_bytes());
    premaster.extend_from_slice(&[0u8; 16]);
    premaster.extend_from_slice(&16u16.to_be_bytes());
    premaster.extend_from_slice(&psk_bytes);

    let client_random = client_random_from_hello(&client_hello);
    let mut randoms = Vec::new();
    randoms.extend_from_slice(&client_random);
    randoms.extend_from_slice(&SERVER_RANDOM);
    let mut master = [0u8; 48];
    prf_sha256(&premaster, "master secret", &randoms, &mut master).unwrap();

    let mut transcript = client_hello.clone();
    transcript.extend_from_slice(&sh);
    transcript.extend_from_slice(&ske);
    transcript.extend_from_slice(&shd);
    transcript.extend_from_slice(&msg(16, cke_body));
    let (fin_ty, fin_body) = &flight_two[1];
    assert_eq!(*fin_ty, 20);

    let digest = Sha256::digest(&transcript);
    let mut expected = [0u8; 12];
    prf_sha256(&master, "client finished", &digest, &mut expected).unwrap();
    assert_eq!(fin_body.as_slice(), &expected);

    transcript.extend_from_slice(&msg(20, fin_body));
    let digest = Sha256::digest(&transcript);
    let mut server_vd = [0u8; 12];
    prf_sha256(&master, "server finished", &digest, &mut server_vd).unwrap();

    engine.on_change_cipher_spec(id);
    engine.on_handshake_bytes(id, &msg(20, &server_vd));
    run_ticks(&mut engine, id, 16);
    assert_eq!(engine.state(id), Some(&HandshakeState::Done));
}

#[test]
fn test_out_of_order_deliveries_abort_with_unexpected_message() {
    // Each delivery schedule violates the required order somewhere.
    let schedules: &[&dyn Fn(&[u8; 32]) -> Vec<u8>] = &[
        // ServerHelloDone before ServerHello.
        &|_: &[u8; 32]| msg(14, &[]),
        // Finished directly after ServerHello.
        &|_: &[u8; 32]| {
            let mut flight = server_hello(0xC02B, false);
            flight.extend_from_slice(&msg(20, &[0u8; 12]));
            flight
        },
        // ServerHelloDone without the mandatory ServerKeyExchange.
        &|_: &[u8; 32]| {
            let mut flight = server_hello(0xC02B, false);
            flight.extend_from_slice(&certificate_msg(&[CERT_DER]));
            flight.extend_from_slice(&msg(14, &[]));
            flight
        },
        // CertificateRequest before the Certificate.
        &|_: &[u8; 32]| {
            let mut flight = server_hello(0xC02B, false);
            flight.extend_from_slice(&msg(13, &[0, 0, 0, 0, 0]));
            flight.extend_from_slice(&msg(14, &[]));
            flight
        },
    ];

    for schedule in schedules {
        let (mut engine, id) = ecdhe_engine(ecdhe_config());
        let client_hello = engine.pending_transmit(id).to_vec();
        let client_random = client_random_from_hello(&client_hello);
        engine.on_handshake_bytes(id, &schedule(&client_random));
        run_ticks(&mut engine, id, 32);

        assert_eq!(engine.state(id), Some(&HandshakeState::Abort));
        assert_eq!(
            engine.close_request(id).map(|a| a.description),
            Some(AlertDescription::UnexpectedMessage)
        );
    }
}

#[test]
fn test_reentry_is_idempotent_while_async_pending() {
    let (mut engine, id) = ecdhe_engine(ecdhe_config());
    let client_hello = engine.pending_transmit(id).to_vec();
    let client_random = client_random_from_hello(&client_hello);

    let mut flight = server_hello(0xC02B, false);
    flight.extend_from_slice(&certificate_msg(&[CERT_DER]));
    flight.extend_from_slice(&ske_ecdhe_msg(&client_random));
    flight.extend_from_slice(&msg(14, &[]));
    engine.on_handshake_bytes(id, &flight);

    // Advance until the signature-verification job is pending, without
    // ever running the background tick.
    for _ in 0..8 {
        engine.handshake_tick(id);
    }
    let state = engine.state(id).cloned();
    let pending = engine.pending_transmit(id).to_vec();

    // Further ticks must not observably change anything.
    for _ in 0..8 {
        engine.handshake_tick(id);
    }
    assert_eq!(engine.state(id).cloned(), state);
    assert_eq!(engine.pending_transmit(id), pending.as_slice());

    // Once the background tick runs, progress resumes.
    run_ticks(&mut engine, id, 64);
    assert!(engine.take_ccs_ready(id));
}

#[test]
fn test_malformed_certificate_chain_aborts() {
    let (mut engine, id) = ecdhe_engine(ecdhe_config());
    let client_hello = engine.pending_transmit(id).to_vec();
    engine.mark_transmitted(id, client_hello.len());

    // Inner certificate length runs past the declared list length.
    let mut body = vec![0, 0, 5];
    body.extend_from_slice(&[0, 0, 99, 0x30, 0x82]);
    let mut flight = server_hello(0xC02B, false);
    flight.extend_from_slice(&msg(11, &body));
    engine.on_handshake_bytes(id, &flight);
    run_ticks(&mut engine, id, 16);

    assert_eq!(engine.state(id), Some(&HandshakeState::Abort));
    assert_eq!(
        engine.close_request(id).map(|a| a.description),
        Some(AlertDescription::DecodeError)
    );
}

#[test]
fn test_revoked_ocsp_staple_aborts() {
    let mut pki = FakePki::valid(point_of(&SIGN_SCALAR));
    pki.ocsp = OcspVerdict::Revoked;
    let mut engine = Engine::new(Box::new(SoftwareProvider::new()), Box::new(pki), 1);
    let config = ConnectionConfig::builder()
        .worker(ecdhe_worker())
        .send_status_request(true)
        .build()
        .unwrap();
    let id = engine.allocate(config).unwrap();
    engine.start(id);
    engine.handshake_tick(id);

    let client_hello = engine.pending_transmit(id).to_vec();
    let client_random = client_random_from_hello(&client_hello);

    let mut status_body = vec![1, 0, 0, 4];
    status_body.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    let mut flight = server_hello(0xC02B, true);
    flight.extend_from_slice(&certificate_msg(&[CERT_DER]));
    flight.extend_from_slice(&msg(22, &status_body));
    flight.extend_from_slice(&ske_ecdhe_msg(&client_random));
    flight.extend_from_slice(&msg(14, &[]));
    engine.on_handshake_bytes(id, &flight);
    run_ticks(&mut engine, id, 32);

    assert_eq!(engine.state(id), Some(&HandshakeState::Abort));
    assert_eq!(
        engine.close_request(id).map(|a| a.description),
        Some(AlertDescription::BadCertificateStatusResponse)
    );
}

#[test]
fn test_unsolicited_certificate_status_aborts() {
    let (mut engine, id) = ecdhe_engine(ecdhe_config());
    let client_hello = engine.pending_transmit(id).to_vec();
    let client_random = client_random_from_hello(&client_hello);

    // The client never sent status_request; the server staples anyway.
    let mut status_body = vec![1, 0, 0, 4];
    status_body.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    let mut flight = server_hello(0xC02B, false);
    flight.extend_from_slice(&certificate_msg(&[CERT_DER]));
    flight.extend_from_slice(&msg(22, &status_body));
    flight.extend_from_slice(&ske_ecdhe_msg(&client_random));
    engine.on_handshake_bytes(id, &flight);
    // No ServerHelloDone: the staple must be rejected on sight, not at
    // the end-of-flight sweep.
    run_ticks(&mut engine, id, 16);

    assert_eq!(engine.state(id), Some(&HandshakeState::Abort));
    assert_eq!(
        engine.close_request(id).map(|a| a.description),
        Some(AlertDescription::UnexpectedMessage)
    );
}

#[test]
fn test_certificate_status_after_server_key_exchange_aborts() {
    let pki = FakePki::valid(point_of(&SIGN_SCALAR));
    let mut engine = Engine::new(Box::new(SoftwareProvider::new()), Box::new(pki), 1);
    let config = ConnectionConfig::builder()
        .worker(ecdhe_worker())
        .send_status_request(true)
        .build()
        .unwrap();
    let id = engine.allocate(config).unwrap();
    engine.start(id);
    engine.handshake_tick(id);

    let client_hello = engine.pending_transmit(id).to_vec();
    let client_random = client_random_from_hello(&client_hello);

    // Acknowledged status_request, but the staple trails the
    // ServerKeyExchange instead of following the Certificate.
    let mut status_body = vec![1, 0, 0, 4];
    status_body.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    let mut flight = server_hello(0xC02B, true);
    flight.extend_from_slice(&certificate_msg(&[CERT_DER]));
    flight.extend_from_slice(&ske_ecdhe_msg(&client_random));
    flight.extend_from_slice(&msg(22, &status_body));
    engine.on_handshake_bytes(id, &flight);
    run_ticks(&mut engine, id, 16);

    assert_eq!(engine.state(id), Some(&HandshakeState::Abort));
    assert_eq!(
        engine.close_request(id).map(|a| a.description),
        Some(AlertDescription::UnexpectedMessage)
    );
}

#[test]
fn test_invalid_chain_reports_from_cert_gate() {
    let mut pki = FakePki::valid(point_of(&SIGN_SCALAR));
    pki.default_status = CertVerdict::Invalid;
    let mut engine = Engine::new(Box::new(SoftwareProvider::new()), Box::new(pki), 1);
    let id = engine.allocate(ecdhe_config()).unwrap();
    engine.start(id);
    engine.handshake_tick(id);

    let client_hello = engine.pending_transmit(id).to_vec();
    let client_random = client_random_from_hello(&client_hello);
    let mut flight = server_hello(0xC02B, false);
    flight.extend_from_slice(&certificate_msg(&[CERT_DER]));
    flight.extend_from_slice(&ske_ecdhe_msg(&client_random));
    flight.extend_from_slice(&msg(14, &[]));
    engine.on_handshake_bytes(id, &flight);
    run_ticks(&mut engine, id, 32);

    assert_eq!(engine.state(id), Some(&HandshakeState::Abort));
    assert_eq!(
        engine.close_request(id).map(|a| a.description),
        Some(AlertDescription::UnknownCa)
    );
    // The diagnostic names the chain gate as the reporting site.
    let records: Vec<_> = engine.diag().records().copied().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].function, FunctionId::CertGate);
    assert_eq!(records[0].error, ErrorId::ChainInvalid);
}

#[test]
fn test_ccs_before_client_finished_aborts() {
    let (mut engine, id) = ecdhe_engine(ecdhe_config());
    engine.on_change_cipher_spec(id);
    assert_eq!(engine.state(id), Some(&HandshakeState::Abort));
    assert_eq!(
        engine.close_request(id).map(|a| a.description),
        Some(AlertDescription::UnexpectedMessage)
    );
}

#[test]
fn test_no_shared_cipher_suite_aborts_with_handshake_failure() {
    let (mut engine, id) = ecdhe_engine(ecdhe_config());
    // Server picks a CBC suite the client never offered.
    engine.on_handshake_bytes(id, &server_hello(0xC023, false));
    run_ticks(&mut engine, id, 4);

    assert_eq!(engine.state(id), Some(&HandshakeState::Abort));
    assert_eq!(
        engine.close_request(id).map(|a| a.description),
        Some(AlertDescription::HandshakeFailure)
    );
}
