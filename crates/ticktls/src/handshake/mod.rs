//! Handshake state machine: states, sub-states, async context.
//!
//! The client machine is an explicit enum with per-state sub-state
//! payloads. The engine advances it at most once per scheduler tick;
//! the only suspension points are `AsyncContext::AsyncPending` (a
//! deferred crypto job is in flight) and `AsyncContext::WaitCycle`
//! (more received bytes are needed).

pub mod client;

#[cfg(test)]
mod tests;

pub use client::{handshake_tick, EngineCx};

/// Async-context state of one connection.
///
/// At most one deferred job is live per connection; these four states
/// are the entire hand-off protocol between the handshake tick and the
/// background tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncContext {
    /// No deferred work outstanding.
    NoAsync,
    /// A job is queued or running on the background tick. The handshake
    /// tick returns without observable state change until it completes.
    AsyncPending,
    /// Waiting for more received data; markers are re-checked next tick.
    WaitCycle,
    /// The deferred job completed; its result is waiting to be consumed.
    Done,
}

/// Sub-state of certificate chain intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateSub {
    /// Parse the Certificate message into chain entries.
    Extract,
    /// Store the DER certificates into PKI service slots.
    Load,
    /// Start asynchronous group verification.
    TriggerVerify,
    /// Pick the cipher worker matching (suite, leaf curve).
    SelectWorker,
}

/// Decoded ServerKeyExchange fields carried across ticks. Ranges are
/// absolute offsets into the RX region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkePayload {
    pub params: (usize, usize),
    pub signature: (usize, usize),
    /// Server ephemeral public point, uncompressed SEC1.
    pub point: Vec<u8>,
}

/// Sub-state of ServerKeyExchange handling (ECDHE path).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkeSub {
    /// Waiting for the message to arrive, then decode it.
    Locate,
    /// Decoded; waiting for chain verification so the leaf public key
    /// may be used.
    AwaitChain(SkePayload),
    /// Deferred signature verification in flight.
    Verify(SkePayload),
}

/// Sub-state of ClientKeyExchange production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CkeSub {
    /// Static-ECDH only: chain verification must complete before the
    /// certificate public key becomes the peer value.
    PollChain,
    /// Generate the ephemeral key pair and its public point.
    PublicValue,
    /// Encode the message (point or PSK identity).
    Encode(Vec<u8>),
    /// Deferred premaster derivation in flight.
    Premaster,
    /// Deferred master-secret derivation in flight.
    MasterSecret,
    /// Deferred key-block derivation in flight.
    KeyBlock,
}

/// Sub-state of CertificateVerify production. Offsets point at the open
/// message header and the reserved signature-length slot in TX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvSub {
    Encode,
    Sign { header: usize, length_slot: usize },
}

/// Sub-state of client Finished production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinSub {
    /// Deferred verify-data computation in flight.
    VerifyData,
}

/// Sub-state of server Finished consumption. The expected verify-data
/// is computed as soon as the server CCS arrives and held until the
/// Finished message itself is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFinSub {
    Compute,
    Compare([u8; 12]),
}

/// Top-level client handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    SendClientHello,
    WaitServerHello,
    WaitCertificate(CertificateSub),
    WaitCertificateStatus,
    WaitServerKeyExchange(SkeSub),
    WaitCertificateRequest,
    WaitServerHelloDone,
    SendClientCertificate,
    SendClientKeyExchange(CkeSub),
    SendCertificateVerify(CvSub),
    SendChangeCipherSpec,
    SendClientFinished(FinSub),
    WaitServerCcs,
    WaitServerFinished(ServerFinSub),
    Finalizing,
    Done,
    /// Terminal failure state: nothing is produced or consumed after.
    Abort,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Done | HandshakeState::Abort)
    }
}
