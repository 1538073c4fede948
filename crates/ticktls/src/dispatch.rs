//! Async job dispatcher.
//!
//! The state machine never calls expensive crypto directly. It stores
//! one trigger (at most one live per connection), flips the async
//! context to `AsyncPending`, and returns; the background tick executes
//! the job synchronously through the provider and flips to `Done`.
//! In-order execution within a connection follows from the one-live-job
//! invariant. Failures funnel through [`handle_async_error`].

use crate::alert::{alert_for, Alert};
use crate::conn::Connection;
use crate::diag::{DiagRecord, DiagSink, ErrorId, FunctionId};
use crate::handshake::{AsyncContext, HandshakeState};
use crate::provider::{CryptoProvider, OcspVerdict, PkiService, VerifyOutcome};
use crate::transcript::hash_transcript;
use ticktls_types::{CertId, CryptoMode, KeyId, TlsError};

pub const MASTER_SECRET_LABEL: &str = "master secret";
pub const KEY_EXPANSION_LABEL: &str = "key expansion";
pub const CLIENT_FINISHED_LABEL: &str = "client finished";
pub const SERVER_FINISHED_LABEL: &str = "server finished";

pub const MASTER_SECRET_LEN: usize = 48;

/// Deferred job trigger set. Ranges are absolute offsets into the
/// connection's RX region, resolved when the job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncJob {
    /// Validate the stapled OCSP response for the leaf certificate.
    ValidateOcsp { cert: CertId, response: (usize, usize) },
    /// Verify the ServerKeyExchange signature over
    /// `client_random || server_random || params`.
    VerifySke { params: (usize, usize), signature: (usize, usize) },
    /// ECDH premaster from our ephemeral secret and the peer point.
    DeriveSharedSecret { peer_point: Vec<u8> },
    /// RFC 4279 plain-PSK premaster from the active identity's key.
    DerivePskPremaster { psk: KeyId },
    DeriveMasterSecret,
    DeriveKeyBlock { len: usize },
    /// Sign the transcript for CertificateVerify.
    SignCertificateVerify,
    /// Verify-data for the client's own Finished.
    ClientFinishedData,
    /// Expected verify-data for the server's Finished.
    ServerFinishedData,
}

/// Result of a completed job, held until the state machine consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutput {
    Done,
    Verify(VerifyOutcome),
    VerifyData([u8; 12]),
    Signature(Vec<u8>),
    Ocsp(OcspVerdict),
}

/// Execute one job synchronously. Called only from the background tick.
pub fn run_job(
    provider: &mut dyn CryptoProvider,
    pki: &mut dyn PkiService,
    conn: &Connection,
    job: &AsyncJob,
) -> Result<JobOutput, TlsError> {
    let keys = &conn.config.keys;
    let jobs = &conn.config.jobs;
    match job {
        AsyncJob::ValidateOcsp { cert, response } => {
            let bytes = conn.rx.slice(response.0, response.1);
            let verdict = pki.service_ocsp(*cert, bytes)?;
            Ok(JobOutput::Ocsp(verdict))
        }
        AsyncJob::VerifySke { params, signature } => {
            // client_random(32) || server_random(32) || params (at most a
            // P-384 point plus framing).
            let mut signed = [0u8; 192];
            let params_bytes = conn.rx.slice(params.0, params.1);
            let total = 64 + params_bytes.len();
            if total > signed.len() {
                return Err(TlsError::Decode("server key exchange params too long"));
            }
            signed[..32].copy_from_slice(&conn.client_random);
            signed[32..64].copy_from_slice(&conn.server_random);
            signed[64..total].copy_from_slice(params_bytes);

            let outcome = provider.signature_verify(
                jobs.verify,
                keys.peer_public,
                CryptoMode::SingleCall,
                &signed[..total],
                conn.rx.slice(signature.0, signature.1),
            )?;
            Ok(JobOutput::Verify(outcome))
        }
        AsyncJob::DeriveSharedSecret { peer_point } => {
            provider.key_exchange_calc_shared_secret(
                jobs.key_exchange,
                keys.own_key_exchange,
                peer_point,
                keys.premaster,
            )?;
            Ok(JobOutput::Done)
        }
        AsyncJob::DerivePskPremaster { psk } => {
            provider.derive_psk_premaster(jobs.derive, *psk, keys.premaster)?;
            Ok(JobOutput::Done)
        }
        AsyncJob::DeriveMasterSecret => {
            let mut seed = [0u8; 64];
            seed[..32].copy_from_slice(&conn.client_random);
            seed[32..].copy_from_slice(&conn.server_random);
            provider.tls12_prf_derive(
                jobs.derive,
                keys.premaster,
                MASTER_SECRET_LABEL,
                &seed,
                keys.master,
                MASTER_SECRET_LEN,
            )?;
            Ok(JobOutput::Done)
        }
        AsyncJob::DeriveKeyBlock { len } => {
            // Key expansion swaps the random order.
            let mut seed = [0u8; 64];
            seed[..32].copy_from_slice(&conn.server_random);
            seed[32..].copy_from_slice(&conn.client_random);
            provider.tls12_prf_derive(
                jobs.derive,
                keys.master,
                KEY_EXPANSION_LABEL,
                &seed,
                keys.key_block,
                *len,
            )?;
            Ok(JobOutput::Done)
        }
        AsyncJob::SignCertificateVerify => {
            provider.signature_generate(
                jobs.sign,
                keys.client_sign,
                CryptoMode::Start,
                &[],
                &mut [],
            )?;
            for span in conn.transcript.spans() {
                let region = match span.dir {
                    ticktls_types::Direction::Tx => &conn.tx,
                    ticktls_types::Direction::Rx => &conn.rx,
                };
                provider.signature_generate(
                    jobs.sign,
                    keys.client_sign,
                    CryptoMode::Update,
                    region.slice(span.offset, span.len),
                    &mut [],
                )?;
            }
            let mut sig = [0u8; 128];
            let len = provider.signature_generate(
                jobs.sign,
                keys.client_sign,
                CryptoMode::Finish,
                &[],
                &mut sig,
            )?;
            Ok(JobOutput::Signature(sig[..len].to_vec()))
        }
        AsyncJob::ClientFinishedData => finished_data(provider, conn, CLIENT_FINISHED_LABEL),
        AsyncJob::ServerFinishedData => finished_data(provider, conn, SERVER_FINISHED_LABEL),
    }
}

fn finished_data(
    provider: &mut dyn CryptoProvider,
    conn: &Connection,
    label: &str,
) -> Result<JobOutput, TlsError> {
    let mut digest = [0u8; 32];
    hash_transcript(
        provider,
        conn.config.jobs.transcript_hash,
        &conn.tx,
        &conn.rx,
        conn.transcript.spans(),
        &mut digest,
    )?;
    let mut verify_data = [0u8; 12];
    provider.tls12_prf_compute(
        conn.config.jobs.derive,
        conn.config.keys.master,
        label,
        &digest,
        &mut verify_data,
    )?;
    Ok(JobOutput::VerifyData(verify_data))
}

/// Single funnel for deferred-job failures: structured diagnostic, fatal
/// alert, Abort.
pub fn handle_async_error(diag: &mut dyn DiagSink, conn: &mut Connection, err: &TlsError) {
    diag.report(DiagRecord {
        function: FunctionId::BackgroundTick,
        error: ErrorId::from_error(err),
        connection: conn.id,
    });
    conn.close_request = alert_for(err).map(Alert::fatal);
    conn.state = HandshakeState::Abort;
    conn.async_ctx = AsyncContext::NoAsync;
    conn.pending_job = None;
    conn.job_result = None;
}

/// Execute the one in-flight job of `conn`, if any.
///
/// A job still pending when Abort was requested runs to completion here;
/// its result is discarded instead of stored.
pub fn background_step(
    provider: &mut dyn CryptoProvider,
    pki: &mut dyn PkiService,
    diag: &mut dyn DiagSink,
    conn: &mut Connection,
) {
    if conn.async_ctx != AsyncContext::AsyncPending {
        return;
    }
    let Some(job) = conn.pending_job.take() else {
        return;
    };
    match run_job(provider, pki, conn, &job) {
        Ok(output) => {
            if conn.state == HandshakeState::Abort {
                conn.async_ctx = AsyncContext::NoAsync;
                return;
            }
            conn.job_result = Some(output);
            conn.async_ctx = AsyncContext::Done;
        }
        Err(err) => {
            if conn.state == HandshakeState::Abort {
                conn.async_ctx = AsyncContext::NoAsync;
                return;
            }
            handle_async_error(diag, conn, &err);
        }
    }
}
