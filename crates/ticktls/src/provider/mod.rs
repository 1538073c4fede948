//! Collaborator traits: the job-based crypto provider and the polled PKI
//! service.
//!
//! Both collaborators are synchronous per call; the engine keeps them off
//! the real-time path by invoking the expensive calls only from the
//! background tick. Serialization of a shared hardware engine across
//! connections is the provider's contract, not this engine's.

pub mod prf;
pub mod software;

#[cfg(test)]
pub mod fake;

use crate::suite::NamedCurve;
use ticktls_types::{CertId, CryptoMode, GroupId, JobId, KeyElement, KeyId, PkiError, ProviderError};

/// Outcome of a signature or MAC verification.
///
/// Rejection is a result, not an error: a provider call that completed
/// but did not accept the peer's value returns `Rejected`, which the
/// state machine maps to a `decrypt_error` alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Accepted,
    Rejected,
}

/// Per-certificate validation verdict from the PKI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertVerdict {
    /// Verification has not completed for this certificate.
    Unknown,
    Valid,
    Invalid,
}

/// Outcome of servicing an OCSP response for one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspVerdict {
    Good,
    Revoked,
    /// The response itself was malformed or the exchange failed.
    Malformed,
}

/// Job-based cryptographic primitive provider with key-store semantics.
///
/// Key handles are opaque; material is written through elements and a key
/// becomes usable only once `key_set_valid` is called. Streaming calls
/// (`Start`/`Update`/`Finish`) accumulate under the job handle so the
/// engine can feed transcript data from non-contiguous buffer regions.
pub trait CryptoProvider {
    fn random(&mut self, out: &mut [u8]) -> Result<(), ProviderError>;

    /// Streaming hash. The digest is written to `out` on `Finish` or
    /// `SingleCall`; the return value is the digest length (0 otherwise).
    fn hash(
        &mut self,
        job: JobId,
        mode: CryptoMode,
        input: &[u8],
        out: &mut [u8],
    ) -> Result<usize, ProviderError>;

    /// Streaming signature verification against `key`'s public value.
    /// `signature` is only inspected on `Finish`/`SingleCall`.
    fn signature_verify(
        &mut self,
        job: JobId,
        key: KeyId,
        mode: CryptoMode,
        data: &[u8],
        signature: &[u8],
    ) -> Result<VerifyOutcome, ProviderError>;

    /// Streaming signature generation with `key`'s secret. The signature
    /// is written to `out` on `Finish`/`SingleCall`; returns its length.
    fn signature_generate(
        &mut self,
        job: JobId,
        key: KeyId,
        mode: CryptoMode,
        data: &[u8],
        out: &mut [u8],
    ) -> Result<usize, ProviderError>;

    /// Generate an ephemeral key pair under `own` for `curve` and write
    /// the uncompressed public point to `out`, returning its length.
    fn key_exchange_calc_public_value(
        &mut self,
        job: JobId,
        own: KeyId,
        curve: NamedCurve,
        out: &mut [u8],
    ) -> Result<usize, ProviderError>;

    /// Compute the ECDH shared secret from `own`'s secret and the peer's
    /// uncompressed point, storing the premaster under `premaster`.
    fn key_exchange_calc_shared_secret(
        &mut self,
        job: JobId,
        own: KeyId,
        peer_public: &[u8],
        premaster: KeyId,
    ) -> Result<(), ProviderError>;

    /// Build the RFC 4279 §2 plain-PSK premaster secret from the PSK
    /// stored under `psk`, storing it under `premaster`.
    fn derive_psk_premaster(
        &mut self,
        job: JobId,
        psk: KeyId,
        premaster: KeyId,
    ) -> Result<(), ProviderError>;

    /// TLS 1.2 PRF (RFC 5246 §5), output written into the key store.
    fn tls12_prf_derive(
        &mut self,
        job: JobId,
        secret: KeyId,
        label: &str,
        seed: &[u8],
        out_key: KeyId,
        out_len: usize,
    ) -> Result<(), ProviderError>;

    /// TLS 1.2 PRF, output written to a caller buffer (verify-data).
    fn tls12_prf_compute(
        &mut self,
        job: JobId,
        secret: KeyId,
        label: &str,
        seed: &[u8],
        out: &mut [u8],
    ) -> Result<(), ProviderError>;

    fn key_element_set(
        &mut self,
        key: KeyId,
        element: KeyElement,
        data: &[u8],
    ) -> Result<(), ProviderError>;

    /// Copy `length` bytes between key elements without exposing the
    /// material to the caller. Used to slice the key block.
    fn key_element_copy_partial(
        &mut self,
        src: KeyId,
        src_element: KeyElement,
        src_offset: usize,
        dst: KeyId,
        dst_element: KeyElement,
        dst_offset: usize,
        length: usize,
    ) -> Result<(), ProviderError>;

    /// Mark a fully populated key usable. Partially copied material must
    /// never be marked valid.
    fn key_set_valid(&mut self, key: KeyId) -> Result<(), ProviderError>;

    fn key_is_valid(&self, key: KeyId) -> bool;

    /// Remove all elements and the valid mark from a key handle.
    fn key_clear(&mut self, key: KeyId);
}

/// Polled certificate/PKI service.
///
/// Chain verification is started once per handshake (`verify_group`) and
/// completed asynchronously; the engine polls `is_busy` every tick.
pub trait PkiService {
    fn set_certificate(&mut self, cert: CertId, der: &[u8]) -> Result<(), PkiError>;

    /// Curve of the certificate's public key.
    fn certificate_curve(&self, cert: CertId) -> Result<NamedCurve, PkiError>;

    /// The certificate's public key as an uncompressed SEC1 point.
    fn public_key(&self, cert: CertId) -> Result<Vec<u8>, PkiError>;

    /// Start asynchronous verification of the group. A failed start is an
    /// immediate validation failure, not deferred.
    fn verify_group(&mut self, group: GroupId) -> Result<(), PkiError>;

    fn is_busy(&self, group: GroupId) -> bool;

    fn certificate_status(&self, cert: CertId) -> Result<CertVerdict, PkiError>;

    /// Validate an OCSP response for `cert`. CPU-heavy; only called from
    /// the background tick.
    fn service_ocsp(&mut self, cert: CertId, response: &[u8]) -> Result<OcspVerdict, PkiError>;

    /// Remove the loaded chain. Called at handshake finalize to minimize
    /// residual key material exposure.
    fn clear_group(&mut self, group: GroupId) -> Result<(), PkiError>;
}
