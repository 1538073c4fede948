//! The client handshake state machine.
//!
//! One advance call per scheduler tick. Within a tick the machine runs a
//! bounded dispatch loop: each step either transitions and continues,
//! suspends (`WaitCycle` for missing bytes, `AsyncPending` for a
//! deferred job), or fails into Abort with a fatal alert.

use subtle::ConstantTimeEq;

use crate::alert::{alert_for, Alert};
use crate::certgate;
use crate::codec::hello::{decode_server_hello, encode_client_hello, ClientHelloParams};
use crate::codec::tls12::{
    begin_certificate_verify, decode_certificate, decode_certificate_request,
    decode_certificate_status, decode_finished, decode_server_hello_done,
    decode_server_key_exchange_ecdhe, decode_server_key_exchange_psk, encode_certificate,
    encode_client_key_exchange_ecc, encode_client_key_exchange_psk, encode_finished,
};
use crate::codec::HandshakeType;
use crate::conn::Connection;
use crate::diag::{DiagRecord, DiagSink, ErrorId, FunctionId};
use crate::dispatch::{AsyncJob, JobOutput};
use crate::handshake::{
    AsyncContext, CertificateSub, CkeSub, CvSub, FinSub, HandshakeState, ServerFinSub, SkePayload,
    SkeSub,
};
use crate::keys::install_session_keys;
use crate::provider::{CryptoProvider, PkiService, VerifyOutcome};
use crate::suite::{
    suite_params, CipherSuite, KeyExchangeMethod, NamedCurve, SignatureScheme, SuiteParams,
};
use ticktls_types::{CertId, Direction, KeyElement, TlsError};

/// Upper bound on state transitions within one tick. The machine either
/// converges or suspends well below this; the bound keeps a logic defect
/// from turning into an unbounded loop on the real-time path.
const MAX_STEPS_PER_TICK: usize = 16;

/// Mutable view of the engine's collaborators handed to each step.
pub struct EngineCx<'a> {
    pub provider: &'a mut dyn CryptoProvider,
    pub pki: &'a mut dyn PkiService,
    pub diag: &'a mut dyn DiagSink,
}

enum Progress {
    Continue,
    Suspend,
}

/// Advance one connection's handshake by at most one tick's worth of work.
pub fn handshake_tick(cx: &mut EngineCx<'_>, conn: &mut Connection) {
    match conn.async_ctx {
        // Idempotent while the deferred job is in flight: no observable
        // state change.
        AsyncContext::AsyncPending => return,
        AsyncContext::WaitCycle => conn.async_ctx = AsyncContext::NoAsync,
        AsyncContext::NoAsync | AsyncContext::Done => {}
    }
    if conn.state == HandshakeState::Idle || conn.state.is_terminal() {
        return;
    }

    for _ in 0..MAX_STEPS_PER_TICK {
        match step(cx, conn) {
            Ok(Progress::Continue) => {
                if conn.state.is_terminal() {
                    break;
                }
            }
            Ok(Progress::Suspend) => break,
            Err(err) => {
                let site = failure_site(&conn.state);
                abort(cx.diag, conn, &err, site);
                break;
            }
        }
    }
}

/// Reporting site for a failed step. The chain-gate and key-install
/// steps carry their own function ids; every other step reports as the
/// handshake tick itself.
fn failure_site(state: &HandshakeState) -> FunctionId {
    match state {
        HandshakeState::WaitCertificate(CertificateSub::Load)
        | HandshakeState::WaitCertificate(CertificateSub::TriggerVerify)
        | HandshakeState::WaitServerKeyExchange(SkeSub::AwaitChain(_))
        | HandshakeState::SendClientKeyExchange(CkeSub::PollChain) => FunctionId::CertGate,
        HandshakeState::SendClientKeyExchange(CkeSub::KeyBlock) => FunctionId::KeyInstall,
        _ => FunctionId::HandshakeTick,
    }
}

/// Funnel a handshake failure into Abort: structured diagnostic, fatal
/// alert, close request.
pub(crate) fn abort(
    diag: &mut dyn DiagSink,
    conn: &mut Connection,
    err: &TlsError,
    function: FunctionId,
) {
    diag.report(DiagRecord {
        function,
        error: ErrorId::from_error(err),
        connection: conn.id,
    });
    conn.close_request = alert_for(err).map(Alert::fatal);
    conn.state = HandshakeState::Abort;
    // A job already in flight is left to finish on the background tick;
    // its result is discarded there.
    if conn.async_ctx != AsyncContext::AsyncPending {
        conn.async_ctx = AsyncContext::NoAsync;
    }
    conn.job_result = None;
}

fn wait(conn: &mut Connection) -> Result<Progress, TlsError> {
    conn.async_ctx = AsyncContext::WaitCycle;
    Ok(Progress::Suspend)
}

fn defer(conn: &mut Connection, job: AsyncJob) -> Result<Progress, TlsError> {
    conn.pending_job = Some(job);
    conn.async_ctx = AsyncContext::AsyncPending;
    Ok(Progress::Suspend)
}

fn take_result(conn: &mut Connection) -> Option<JobOutput> {
    if conn.async_ctx == AsyncContext::Done {
        conn.async_ctx = AsyncContext::NoAsync;
        conn.job_result.take()
    } else {
        None
    }
}

fn negotiated_suite(conn: &Connection) -> Result<(CipherSuite, SuiteParams), TlsError> {
    let suite = conn
        .suite
        .ok_or(TlsError::Internal("suite not negotiated"))?;
    let params = suite_params(suite).ok_or(TlsError::Internal("unknown negotiated suite"))?;
    Ok((suite, params))
}

fn active_worker(conn: &Connection) -> Result<crate::suite::CipherWorker, TlsError> {
    conn.active_worker
        .ok_or(TlsError::Internal("no active cipher worker"))
}

fn leaf_slot(conn: &Connection) -> Result<CertId, TlsError> {
    conn.config
        .cert_slots
        .first()
        .copied()
        .ok_or(TlsError::Internal("no certificate slots configured"))
}

fn commit_tx(conn: &mut Connection, offset: usize, len: usize) {
    conn.transcript.record(Direction::Tx, offset, len);
    conn.tx_committed = offset + len;
}

fn step(cx: &mut EngineCx<'_>, conn: &mut Connection) -> Result<Progress, TlsError> {
    match conn.state.clone() {
        HandshakeState::Idle
        | HandshakeState::Done
        | HandshakeState::Abort => Ok(Progress::Suspend),

        HandshakeState::SendClientHello => send_client_hello(cx, conn),
        HandshakeState::WaitServerHello => wait_server_hello(conn),
        HandshakeState::WaitCertificate(sub) => wait_certificate(cx, conn, sub),
        HandshakeState::WaitCertificateStatus => wait_certificate_status(conn),
        HandshakeState::WaitServerKeyExchange(sub) => wait_server_key_exchange(cx, conn, sub),
        HandshakeState::WaitCertificateRequest => wait_certificate_request(conn),
        HandshakeState::WaitServerHelloDone => wait_server_hello_done(conn),
        HandshakeState::SendClientCertificate => send_client_certificate(conn),
        HandshakeState::SendClientKeyExchange(sub) => send_client_key_exchange(cx, conn, sub),
        HandshakeState::SendCertificateVerify(sub) => send_certificate_verify(conn, sub),
        HandshakeState::SendChangeCipherSpec => send_change_cipher_spec(conn),
        HandshakeState::SendClientFinished(FinSub::VerifyData) => send_client_finished(conn),
        HandshakeState::WaitServerCcs => wait_server_ccs(conn),
        HandshakeState::WaitServerFinished(sub) => wait_server_finished(conn, sub),
        HandshakeState::Finalizing => finalize(cx, conn),
    }
}

// ---------------------------------------------------------------------------
// Client flight one
// ---------------------------------------------------------------------------

fn send_client_hello(cx: &mut EngineCx<'_>, conn: &mut Connection) -> Result<Progress, TlsError> {
    cx.provider.random(&mut conn.client_random)?;

    // Offer lists in worker order, deduplicated.
    let mut suites: Vec<CipherSuite> = Vec::new();
    let mut groups: Vec<NamedCurve> = Vec::new();
    let mut sig_algs: Vec<SignatureScheme> = Vec::new();
    for worker in &conn.config.workers {
        if !suites.contains(&worker.suite) {
            suites.push(worker.suite);
        }
        let ecc = suite_params(worker.suite)
            .is_some_and(|p| p.key_exchange.uses_certificate());
        if ecc {
            if !groups.contains(&worker.curve) {
                groups.push(worker.curve);
            }
            if !sig_algs.contains(&worker.signature_algorithm) {
                sig_algs.push(worker.signature_algorithm);
            }
        }
    }

    let (offset, len) = encode_client_hello(
        &mut conn.tx,
        &ClientHelloParams {
            random: &conn.client_random,
            suites: &suites,
            groups: &groups,
            signature_algorithms: &sig_algs,
            status_request: conn.config.send_status_request,
        },
    )?;
    commit_tx(conn, offset, len);
    conn.state = HandshakeState::WaitServerHello;
    Ok(Progress::Continue)
}

fn wait_server_hello(conn: &mut Connection) -> Result<Progress, TlsError> {
    const LATER: &[HandshakeType] = &[
        HandshakeType::Certificate,
        HandshakeType::CertificateStatus,
        HandshakeType::ServerKeyExchange,
        HandshakeType::CertificateRequest,
        HandshakeType::ServerHelloDone,
        HandshakeType::Finished,
    ];
    let Some((offset, total)) = conn.rx_messages.take(HandshakeType::ServerHello) else {
        if conn.rx_messages.any_present(LATER) {
            return Err(TlsError::UnexpectedMessage("message before server hello"));
        }
        return wait(conn);
    };

    let sh = decode_server_hello(conn.rx.slice(offset + 4, total - 4))?;
    if !conn.config.workers.iter().any(|w| w.suite == sh.suite) {
        return Err(TlsError::NoSharedCipherSuite);
    }
    let params = suite_params(sh.suite).ok_or(TlsError::NoSharedCipherSuite)?;
    if sh.status_request_acked && !conn.config.send_status_request {
        return Err(TlsError::Decode("unsolicited status_request acknowledgement"));
    }

    conn.server_random = sh.server_random;
    conn.suite = Some(sh.suite);
    conn.key_exchange = Some(params.key_exchange);
    conn.status_request_acked = sh.status_request_acked;
    conn.transcript.record(Direction::Rx, offset, total);

    if params.key_exchange.uses_certificate() {
        conn.state = HandshakeState::WaitCertificate(CertificateSub::Extract);
    } else {
        // PSK has no certificate phase; the worker is the suite match.
        conn.active_worker = conn
            .config
            .workers
            .iter()
            .find(|w| w.suite == sh.suite)
            .copied();
        conn.state = HandshakeState::WaitServerKeyExchange(SkeSub::Locate);
    }
    Ok(Progress::Continue)
}

// ---------------------------------------------------------------------------
// Certificate intake
// ---------------------------------------------------------------------------

fn wait_certificate(
    cx: &mut EngineCx<'_>,
    conn: &mut Connection,
    sub: CertificateSub,
) -> Result<Progress, TlsError> {
    match sub {
        CertificateSub::Extract => {
            const LATER: &[HandshakeType] = &[
                HandshakeType::CertificateStatus,
                HandshakeType::ServerKeyExchange,
                HandshakeType::CertificateRequest,
                HandshakeType::ServerHelloDone,
                HandshakeType::Finished,
            ];
            let Some((offset, total)) = conn.rx_messages.take(HandshakeType::Certificate) else {
                if conn.rx_messages.any_present(LATER) {
                    return Err(TlsError::UnexpectedMessage("message before certificate"));
                }
                return wait(conn);
            };
            let chain = decode_certificate(conn.rx.slice(offset + 4, total - 4))?;
            conn.chain_entries = chain
                .entries
                .iter()
                .map(|(rel, len)| (offset + 4 + rel, *len))
                .collect();
            conn.transcript.record(Direction::Rx, offset, total);
            conn.state = HandshakeState::WaitCertificate(CertificateSub::Load);
            Ok(Progress::Continue)
        }
        CertificateSub::Load => {
            certgate::load_chain(cx.pki, &conn.config.cert_slots, &conn.rx, &conn.chain_entries)?;
            conn.leaf_curve = Some(cx.pki.certificate_curve(leaf_slot(conn)?)?);
            conn.state = HandshakeState::WaitCertificate(CertificateSub::TriggerVerify);
            Ok(Progress::Continue)
        }
        CertificateSub::TriggerVerify => {
            certgate::trigger_verification(cx.pki, conn.config.certificate_group())?;
            conn.state = HandshakeState::WaitCertificate(CertificateSub::SelectWorker);
            Ok(Progress::Continue)
        }
        CertificateSub::SelectWorker => {
            let (suite, _) = negotiated_suite(conn)?;
            let curve = conn
                .leaf_curve
                .ok_or(TlsError::Internal("leaf curve not recorded"))?;
            let mut matches = conn
                .config
                .workers
                .iter()
                .filter(|w| w.suite == suite && w.curve == curve);
            let worker = matches.next();
            let ambiguous = matches.next().is_some();
            conn.active_worker = match (worker, ambiguous) {
                (Some(worker), false) => Some(*worker),
                (Some(_), true) => {
                    return Err(ticktls_types::ConfigError::AmbiguousWorker {
                        suite: suite.0,
                        curve: curve.0,
                    }
                    .into());
                }
                (None, _) => {
                    return Err(ticktls_types::ConfigError::NoWorkerForCertificate {
                        suite: suite.0,
                        curve: curve.0,
                    }
                    .into());
                }
            };
            conn.state = if conn.status_request_acked {
                HandshakeState::WaitCertificateStatus
            } else {
                HandshakeState::WaitServerKeyExchange(SkeSub::Locate)
            };
            Ok(Progress::Continue)
        }
    }
}

fn wait_certificate_status(conn: &mut Connection) -> Result<Progress, TlsError> {
    const LATER: &[HandshakeType] = &[
        HandshakeType::ServerKeyExchange,
        HandshakeType::CertificateRequest,
        HandshakeType::ServerHelloDone,
    ];
    if let Some(out) = take_result(conn) {
        let JobOutput::Ocsp(verdict) = out else {
            return Err(TlsError::Internal("unexpected job result"));
        };
        conn.ocsp_verdict = Some(verdict);
        // The verdict also gates chain acceptance later; a bad staple is
        // fatal right away.
        if verdict != crate::provider::OcspVerdict::Good {
            return Err(TlsError::BadCertificateStatus("stapled response rejected"));
        }
        conn.state = HandshakeState::WaitServerKeyExchange(SkeSub::Locate);
        return Ok(Progress::Continue);
    }

    if let Some((offset, total)) = conn.rx_messages.peek(HandshakeType::CertificateStatus) {
        // RFC 6066: the staple directly follows Certificate. RX offsets
        // reflect delivery order, so a later-window message sitting at a
        // smaller offset means the staple arrived out of order.
        let inverted = LATER
            .iter()
            .any(|ty| conn.rx_messages.peek(*ty).is_some_and(|(o, _)| o < offset));
        if inverted {
            return Err(TlsError::UnexpectedMessage(
                "certificate status after its window",
            ));
        }
        conn.rx_messages.take(HandshakeType::CertificateStatus);
        let (rel, len) = decode_certificate_status(conn.rx.slice(offset + 4, total - 4))?;
        conn.transcript.record(Direction::Rx, offset, total);
        let cert = leaf_slot(conn)?;
        return defer(
            conn,
            AsyncJob::ValidateOcsp {
                cert,
                response: (offset + 4 + rel, len),
            },
        );
    }

    // The server may acknowledge status_request and still not staple.
    if conn.rx_messages.any_present(LATER) {
        conn.state = HandshakeState::WaitServerKeyExchange(SkeSub::Locate);
        return Ok(Progress::Continue);
    }
    wait(conn)
}

// ---------------------------------------------------------------------------
// ServerKeyExchange
// ---------------------------------------------------------------------------

fn wait_server_key_exchange(
    cx: &mut EngineCx<'_>,
    conn: &mut Connection,
    sub: SkeSub,
) -> Result<Progress, TlsError> {
    // A staple marker surviving to this point is either unsolicited or
    // arrived after ServerKeyExchange.
    if conn.rx_messages.peek(HandshakeType::CertificateStatus).is_some() {
        return Err(TlsError::UnexpectedMessage(
            "certificate status outside its window",
        ));
    }
    let kx = conn
        .key_exchange
        .ok_or(TlsError::Internal("key exchange method not set"))?;
    match kx {
        KeyExchangeMethod::Psk => ske_psk(conn),
        KeyExchangeMethod::Ecdh => {
            // Static ECDH carries no ServerKeyExchange at all.
            if conn.rx_messages.peek(HandshakeType::ServerKeyExchange).is_some() {
                return Err(TlsError::UnexpectedMessage(
                    "server key exchange with static key exchange",
                ));
            }
            conn.state = HandshakeState::WaitCertificateRequest;
            Ok(Progress::Continue)
        }
        KeyExchangeMethod::Ecdhe => ske_ecdhe(cx, conn, sub),
    }
}

fn ske_psk(conn: &mut Connection) -> Result<Progress, TlsError> {
    if let Some((offset, total)) = conn.rx_messages.take(HandshakeType::ServerKeyExchange) {
        let hint = decode_server_key_exchange_psk(conn.rx.slice(offset + 4, total - 4))?;
        // A zero-length hint is accepted and ignored; a non-matching
        // hint falls back to the configured default identity.
        let index = if hint.is_empty() {
            conn.config.default_psk
        } else {
            conn.config
                .psk_identities
                .iter()
                .position(|entry| entry.hint.as_slice() == hint)
                .unwrap_or(conn.config.default_psk)
        };
        conn.active_psk = Some(index);
        conn.transcript.record(Direction::Rx, offset, total);
        conn.state = HandshakeState::WaitServerHelloDone;
        return Ok(Progress::Continue);
    }

    // The hint message is optional for PSK.
    if conn
        .rx_messages
        .any_present(&[HandshakeType::ServerHelloDone, HandshakeType::Finished])
    {
        conn.active_psk = Some(conn.config.default_psk);
        conn.state = HandshakeState::WaitServerHelloDone;
        return Ok(Progress::Continue);
    }
    wait(conn)
}

fn ske_ecdhe(
    cx: &mut EngineCx<'_>,
    conn: &mut Connection,
    sub: SkeSub,
) -> Result<Progress, TlsError> {
    match sub {
        SkeSub::Locate => {
            let Some((offset, total)) = conn.rx_messages.take(HandshakeType::ServerKeyExchange)
            else {
                if conn.rx_messages.any_present(&[
                    HandshakeType::CertificateRequest,
                    HandshakeType::ServerHelloDone,
                    HandshakeType::Finished,
                ]) {
                    return Err(TlsError::UnexpectedMessage("server key exchange missing"));
                }
                return wait(conn);
            };
            let worker = active_worker(conn)?;
            let ske = decode_server_key_exchange_ecdhe(
                conn.rx.slice(offset + 4, total - 4),
                worker.curve,
                worker.signature_algorithm,
            )?;
            conn.transcript.record(Direction::Rx, offset, total);
            let payload = SkePayload {
                params: (offset + 4 + ske.params.0, ske.params.1),
                signature: (offset + 4 + ske.signature.0, ske.signature.1),
                point: ske.point,
            };
            conn.state = HandshakeState::WaitServerKeyExchange(SkeSub::AwaitChain(payload));
            Ok(Progress::Continue)
        }
        SkeSub::AwaitChain(payload) => {
            if certgate::poll_completion(&*cx.pki, conn.config.certificate_group()) {
                return wait(conn);
            }
            certgate::map_result(
                &*cx.pki,
                &conn.config.cert_slots,
                conn.chain_entries.len(),
                conn.ocsp_verdict,
            )?;
            // Only now may the leaf key be used to check the signature.
            let leaf_public = cx.pki.public_key(leaf_slot(conn)?)?;
            cx.provider.key_element_set(
                conn.config.keys.peer_public,
                KeyElement::PublicValue,
                &leaf_public,
            )?;
            cx.provider.key_set_valid(conn.config.keys.peer_public)?;

            let job = AsyncJob::VerifySke {
                params: payload.params,
                signature: payload.signature,
            };
            conn.state = HandshakeState::WaitServerKeyExchange(SkeSub::Verify(payload));
            defer(conn, job)
        }
        SkeSub::Verify(payload) => {
            let Some(out) = take_result(conn) else {
                return Ok(Progress::Suspend);
            };
            let JobOutput::Verify(outcome) = out else {
                return Err(TlsError::Internal("unexpected job result"));
            };
            match outcome {
                VerifyOutcome::Accepted => {
                    conn.peer_kx_point = Some(payload.point);
                    conn.state = HandshakeState::WaitCertificateRequest;
                    Ok(Progress::Continue)
                }
                VerifyOutcome::Rejected => Err(TlsError::DecryptError(
                    "server key exchange signature rejected",
                )),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CertificateRequest / ServerHelloDone
// ---------------------------------------------------------------------------

fn wait_certificate_request(conn: &mut Connection) -> Result<Progress, TlsError> {
    if conn.rx_messages.peek(HandshakeType::CertificateStatus).is_some() {
        return Err(TlsError::UnexpectedMessage(
            "certificate status outside its window",
        ));
    }
    if let Some((offset, total)) = conn.rx_messages.take(HandshakeType::CertificateRequest) {
        // Fully parsed; the contents matter only under client auth.
        let request = decode_certificate_request(conn.rx.slice(offset + 4, total - 4))?;
        if conn.config.client_auth && request.sig_algs.is_empty() {
            return Err(TlsError::Decode("certificate request without algorithms"));
        }
        conn.cert_request_received = true;
        conn.transcript.record(Direction::Rx, offset, total);
        conn.state = HandshakeState::WaitServerHelloDone;
        return Ok(Progress::Continue);
    }
    if conn
        .rx_messages
        .any_present(&[HandshakeType::ServerHelloDone, HandshakeType::Finished])
    {
        conn.state = HandshakeState::WaitServerHelloDone;
        return Ok(Progress::Continue);
    }
    wait(conn)
}

fn wait_server_hello_done(conn: &mut Connection) -> Result<Progress, TlsError> {
    let Some((offset, total)) = conn.rx_messages.take(HandshakeType::ServerHelloDone) else {
        if conn.rx_messages.peek(HandshakeType::Finished).is_some() {
            return Err(TlsError::UnexpectedMessage("finished before server hello done"));
        }
        if conn.rx_messages.peek(HandshakeType::CertificateStatus).is_some() {
            return Err(TlsError::UnexpectedMessage(
                "certificate status outside its window",
            ));
        }
        return wait(conn);
    };
    // Any server-flight message still unconsumed arrived outside its
    // window.
    if conn.rx_messages.any_present(&[
        HandshakeType::ServerHello,
        HandshakeType::Certificate,
        HandshakeType::CertificateStatus,
        HandshakeType::ServerKeyExchange,
        HandshakeType::CertificateRequest,
    ]) {
        return Err(TlsError::UnexpectedMessage("message after its window"));
    }
    decode_server_hello_done(conn.rx.slice(offset + 4, total - 4))?;
    conn.transcript.record(Direction::Rx, offset, total);

    conn.state = if conn.cert_request_received && conn.config.client_auth {
        HandshakeState::SendClientCertificate
    } else {
        HandshakeState::SendClientKeyExchange(initial_cke_sub(conn)?)
    };
    Ok(Progress::Continue)
}

fn initial_cke_sub(conn: &Connection) -> Result<CkeSub, TlsError> {
    let kx = conn
        .key_exchange
        .ok_or(TlsError::Internal("key exchange method not set"))?;
    Ok(match kx {
        KeyExchangeMethod::Ecdh => CkeSub::PollChain,
        KeyExchangeMethod::Ecdhe => CkeSub::PublicValue,
        KeyExchangeMethod::Psk => CkeSub::Encode(Vec::new()),
    })
}

// ---------------------------------------------------------------------------
// Client flight two
// ---------------------------------------------------------------------------

fn send_client_certificate(conn: &mut Connection) -> Result<Progress, TlsError> {
    let (offset, len) = encode_certificate(&mut conn.tx, &conn.config.client_cert_chain)?;
    commit_tx(conn, offset, len);
    conn.client_cert_sent = !conn.config.client_cert_chain.is_empty();
    conn.state = HandshakeState::SendClientKeyExchange(initial_cke_sub(conn)?);
    Ok(Progress::Continue)
}

fn send_client_key_exchange(
    cx: &mut EngineCx<'_>,
    conn: &mut Connection,
    sub: CkeSub,
) -> Result<Progress, TlsError> {
    let kx = conn
        .key_exchange
        .ok_or(TlsError::Internal("key exchange method not set"))?;
    match sub {
        CkeSub::PollChain => {
            if certgate::poll_completion(&*cx.pki, conn.config.certificate_group()) {
                return wait(conn);
            }
            certgate::map_result(
                &*cx.pki,
                &conn.config.cert_slots,
                conn.chain_entries.len(),
                conn.ocsp_verdict,
            )?;
            // Static ECDH: the certificate key is the peer value.
            let leaf_public = cx.pki.public_key(leaf_slot(conn)?)?;
            cx.provider.key_element_set(
                conn.config.keys.peer_public,
                KeyElement::PublicValue,
                &leaf_public,
            )?;
            cx.provider.key_set_valid(conn.config.keys.peer_public)?;
            conn.peer_kx_point = Some(leaf_public);
            conn.state = HandshakeState::SendClientKeyExchange(CkeSub::PublicValue);
            Ok(Progress::Continue)
        }
        CkeSub::PublicValue => {
            let worker = active_worker(conn)?;
            let mut point = [0u8; 97];
            let len = cx.provider.key_exchange_calc_public_value(
                conn.config.jobs.key_exchange,
                conn.config.keys.own_key_exchange,
                worker.curve,
                &mut point,
            )?;
            conn.state =
                HandshakeState::SendClientKeyExchange(CkeSub::Encode(point[..len].to_vec()));
            Ok(Progress::Continue)
        }
        CkeSub::Encode(point) => {
            let job = match kx {
                KeyExchangeMethod::Ecdhe | KeyExchangeMethod::Ecdh => {
                    let (offset, len) = encode_client_key_exchange_ecc(&mut conn.tx, &point)?;
                    commit_tx(conn, offset, len);
                    let peer_point = conn
                        .peer_kx_point
                        .clone()
                        .ok_or(TlsError::Internal("peer key exchange value missing"))?;
                    AsyncJob::DeriveSharedSecret { peer_point }
                }
                KeyExchangeMethod::Psk => {
                    let index = conn.active_psk.unwrap_or(conn.config.default_psk);
                    let entry = conn
                        .config
                        .psk_identities
                        .get(index)
                        .ok_or(TlsError::Internal("psk identity index out of range"))?;
                    let psk = entry.key;
                    let (offset, len) =
                        encode_client_key_exchange_psk(&mut conn.tx, &conn.config.psk_identities[index].identity)?;
                    commit_tx(conn, offset, len);
                    AsyncJob::DerivePskPremaster { psk }
                }
            };
            conn.state = HandshakeState::SendClientKeyExchange(CkeSub::Premaster);
            defer(conn, job)
        }
        CkeSub::Premaster => {
            let Some(out) = take_result(conn) else {
                return Ok(Progress::Suspend);
            };
            let JobOutput::Done = out else {
                return Err(TlsError::Internal("unexpected job result"));
            };
            conn.state = HandshakeState::SendClientKeyExchange(CkeSub::MasterSecret);
            defer(conn, AsyncJob::DeriveMasterSecret)
        }
        CkeSub::MasterSecret => {
            let Some(out) = take_result(conn) else {
                return Ok(Progress::Suspend);
            };
            let JobOutput::Done = out else {
                return Err(TlsError::Internal("unexpected job result"));
            };
            let (_, params) = negotiated_suite(conn)?;
            conn.state = HandshakeState::SendClientKeyExchange(CkeSub::KeyBlock);
            defer(
                conn,
                AsyncJob::DeriveKeyBlock {
                    len: params.key_block_len(),
                },
            )
        }
        CkeSub::KeyBlock => {
            let Some(out) = take_result(conn) else {
                return Ok(Progress::Suspend);
            };
            let JobOutput::Done = out else {
                return Err(TlsError::Internal("unexpected job result"));
            };
            let (_, params) = negotiated_suite(conn)?;
            install_session_keys(cx.provider, &conn.config.keys, &params)?;
            conn.state = if conn.client_cert_sent {
                HandshakeState::SendCertificateVerify(CvSub::Encode)
            } else {
                HandshakeState::SendChangeCipherSpec
            };
            Ok(Progress::Continue)
        }
    }
}

fn send_certificate_verify(conn: &mut Connection, sub: CvSub) -> Result<Progress, TlsError> {
    match sub {
        CvSub::Encode => {
            let worker = active_worker(conn)?;
            let (msg, length_slot) =
                begin_certificate_verify(&mut conn.tx, worker.signature_algorithm)?;
            conn.state = HandshakeState::SendCertificateVerify(CvSub::Sign {
                header: msg.header,
                length_slot,
            });
            defer(conn, AsyncJob::SignCertificateVerify)
        }
        CvSub::Sign {
            header,
            length_slot,
        } => {
            let Some(out) = take_result(conn) else {
                return Ok(Progress::Suspend);
            };
            let JobOutput::Signature(signature) = out else {
                return Err(TlsError::Internal("unexpected job result"));
            };
            conn.tx.push_slice(&signature)?;
            conn.tx.put_u16(length_slot, signature.len() as u16);
            let (offset, len) = conn
                .tx
                .finish_message(crate::buffer::MsgStart { header });
            commit_tx(conn, offset, len);
            conn.state = HandshakeState::SendChangeCipherSpec;
            Ok(Progress::Continue)
        }
    }
}

fn send_change_cipher_spec(conn: &mut Connection) -> Result<Progress, TlsError> {
    conn.ccs_tx_ready = true;
    conn.state = HandshakeState::SendClientFinished(FinSub::VerifyData);
    defer(conn, AsyncJob::ClientFinishedData)
}

fn send_client_finished(conn: &mut Connection) -> Result<Progress, TlsError> {
    let Some(out) = take_result(conn) else {
        return Ok(Progress::Suspend);
    };
    let JobOutput::VerifyData(verify_data) = out else {
        return Err(TlsError::Internal("unexpected job result"));
    };
    let (offset, len) = encode_finished(&mut conn.tx, &verify_data)?;
    commit_tx(conn, offset, len);
    conn.ccs_receivable = true;
    conn.state = HandshakeState::WaitServerCcs;
    Ok(Progress::Continue)
}

// ---------------------------------------------------------------------------
// Server flight two
// ---------------------------------------------------------------------------

fn wait_server_ccs(conn: &mut Connection) -> Result<Progress, TlsError> {
    if !conn.ccs_received {
        if conn.rx_messages.peek(HandshakeType::Finished).is_some() {
            return Err(TlsError::UnexpectedMessage("finished before change cipher spec"));
        }
        return wait(conn);
    }
    // The comparison target includes the client's own Finished, so the
    // expected verify-data can be computed as soon as CCS arrives.
    conn.state = HandshakeState::WaitServerFinished(ServerFinSub::Compute);
    defer(conn, AsyncJob::ServerFinishedData)
}

fn wait_server_finished(conn: &mut Connection, sub: ServerFinSub) -> Result<Progress, TlsError> {
    match sub {
        ServerFinSub::Compute => {
            let Some(out) = take_result(conn) else {
                return Ok(Progress::Suspend);
            };
            let JobOutput::VerifyData(expected) = out else {
                return Err(TlsError::Internal("unexpected job result"));
            };
            conn.state = HandshakeState::WaitServerFinished(ServerFinSub::Compare(expected));
            Ok(Progress::Continue)
        }
        ServerFinSub::Compare(expected) => {
            let Some((offset, total)) = conn.rx_messages.take(HandshakeType::Finished) else {
                return wait(conn);
            };
            let received = decode_finished(conn.rx.slice(offset + 4, total - 4))?;
            if !bool::from(received.ct_eq(&expected)) {
                return Err(TlsError::DecryptError("finished verify data mismatch"));
            }
            conn.state = HandshakeState::Finalizing;
            Ok(Progress::Continue)
        }
    }
}

fn finalize(cx: &mut EngineCx<'_>, conn: &mut Connection) -> Result<Progress, TlsError> {
    if conn
        .key_exchange
        .is_some_and(|kx| kx.uses_certificate())
    {
        cx.pki.clear_group(conn.config.certificate_group())?;
    }
    // The premaster has served its purpose.
    cx.provider.key_clear(conn.config.keys.premaster);

    conn.rx_messages.clear();
    conn.transcript.clear();
    conn.rx.reset();
    conn.chain_entries.clear();
    conn.peer_kx_point = None;

    conn.established = true;
    conn.state = HandshakeState::Done;
    Ok(Progress::Suspend)
}
