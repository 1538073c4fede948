#![forbid(unsafe_code)]
#![doc = "Shared handle types and error taxonomy for the ticktls handshake engine."]

pub mod error;

pub use error::{ConfigError, PkiError, ProviderError, TlsError};

/// Identifies one TLS connection slot in the connection registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u8);

/// Opaque handle into the crypto provider's key store.
///
/// Key material never leaves the provider through this handle; the engine
/// only names keys, it does not read them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub u16);

/// Opaque handle naming one crypto provider job slot.
///
/// Streaming operations (START/UPDATE/FINISH) accumulate state under the
/// job handle between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u16);

/// Identifies one certificate slot in the PKI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CertId(pub u16);

/// Identifies one certificate group in the PKI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u16);

/// Call mode for job-based crypto primitives.
///
/// Streaming modes exist because the handshake transcript spans two
/// physical buffers (sent messages in TX, received messages in RX) in
/// exchange order; the provider accumulates across non-contiguous regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMode {
    Start,
    Update,
    Finish,
    SingleCall,
}

/// Element of a stored key. A key handle can carry more than one element
/// (e.g. a private scalar and the matching public value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyElement {
    /// Secret key material (scalar, symmetric key, PSK, derived block).
    Secret,
    /// Public value (EC point, SEC1 encoding).
    PublicValue,
    /// Implicit IV material for AEAD suites.
    Iv,
}

/// Transfer direction from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Tx,
    Rx,
}
