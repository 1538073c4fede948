//! Error taxonomy for the handshake engine and its collaborators.
//!
//! Every failure ultimately funnels into one of two terminal actions:
//! abort-with-alert (protocol and crypto failures) or the dedicated
//! invalid-configuration handler (build/config defects, no wire alert).

use crate::{CertId, GroupId, JobId, KeyId};

/// Crypto provider call failures.
///
/// A provider failure is never retried; the handshake aborts with an
/// `internal_error` alert.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown key handle {0:?}")]
    UnknownKey(KeyId),
    #[error("unknown job handle {0:?}")]
    UnknownJob(JobId),
    #[error("key {0:?} not marked valid")]
    KeyNotValid(KeyId),
    #[error("key {0:?} missing requested element")]
    ElementMissing(KeyId),
    #[error("element copy range out of bounds")]
    CopyRangeExceeded,
    #[error("output buffer too small: need {need}, got {got}")]
    OutputTooSmall { need: usize, got: usize },
    #[error("malformed public value")]
    InvalidPublicValue,
    #[error("random generation failed")]
    RandomFailed,
    #[error("job in wrong streaming state")]
    JobStateMismatch,
    #[error("unsupported curve")]
    UnsupportedCurve,
    #[error("signing failed")]
    SignFailed,
}

/// PKI service call failures.
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    #[error("unknown certificate slot {0:?}")]
    UnknownCertificate(CertId),
    #[error("unknown certificate group {0:?}")]
    UnknownGroup(GroupId),
    #[error("certificate slot capacity exhausted")]
    SlotExhausted,
    #[error("trust anchor not found for group {0:?}")]
    TrustAnchorMissing(GroupId),
    #[error("verification already running for group {0:?}")]
    GroupBusy(GroupId),
}

/// Static configuration defects.
///
/// These signal a build/config error, not a runtime peer defect, and are
/// reported through a dedicated handler distinct from wire alerts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no cipher worker configured")]
    NoCipherWorker,
    #[error("no cipher worker matches suite {suite:#06x} and curve {curve:#06x}")]
    NoWorkerForCertificate { suite: u16, curve: u16 },
    #[error("more than one cipher worker matches suite {suite:#06x} and curve {curve:#06x}")]
    AmbiguousWorker { suite: u16, curve: u16 },
    #[error("exactly one remote certificate group required, got {0}")]
    CertificateGroupCount(usize),
    #[error("no certificate slots configured for received chain")]
    NoCertificateSlots,
    #[error("PSK worker configured without a PSK identity table")]
    NoPskIdentity,
    #[error("default PSK identity index {0} out of range")]
    DefaultPskOutOfRange(usize),
    #[error("connection slot capacity exhausted")]
    NoFreeConnection,
}

/// Handshake engine errors. Each variant maps to a fatal TLS alert, except
/// `Config`, which is routed to the invalid-configuration handler.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("decode error: {0}")]
    Decode(&'static str),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(&'static str),
    #[error("bad certificate status response: {0}")]
    BadCertificateStatus(&'static str),
    #[error("peer cryptographic check failed: {0}")]
    DecryptError(&'static str),
    #[error("certificate chain rejected: {0}")]
    UnknownCa(&'static str),
    #[error("no shared cipher suite")]
    NoSharedCipherSuite,
    #[error("transmit region exhausted")]
    TransmitOverflow,
    /// A defensive internal-state check fired. Reachable only through a
    /// logic defect, never through peer data.
    #[error("internal state error: {0}")]
    Internal(&'static str),
    #[error("crypto provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("pki service: {0}")]
    Pki(#[from] PkiError),
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
}
