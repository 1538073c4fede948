//! Certificate chain gate.
//!
//! Loads the received chain into PKI service slots, triggers the
//! one-time asynchronous group verification, polls completion, and maps
//! the combined chain + leaf-OCSP outcome to accept/reject. Only after a
//! successful combined verdict may the leaf public key be used for
//! ServerKeyExchange signature verification (ECDHE) or premaster
//! computation (ECDH).

use crate::buffer::HsBuffer;
use crate::provider::{CertVerdict, OcspVerdict, PkiService};
use ticktls_types::{CertId, GroupId, TlsError};

/// Store each DER certificate of the received chain into the configured
/// slots, leaf first. Returns the number of slots used.
pub fn load_chain(
    pki: &mut dyn PkiService,
    slots: &[CertId],
    rx: &HsBuffer,
    entries: &[(usize, usize)],
) -> Result<usize, TlsError> {
    if entries.len() > slots.len() {
        return Err(TlsError::UnknownCa("chain longer than configured slots"));
    }
    for (slot, (offset, len)) in slots.iter().zip(entries) {
        pki.set_certificate(*slot, rx.slice(*offset, *len))?;
    }
    Ok(entries.len())
}

/// Start asynchronous verification. A failed start is an immediate
/// validation failure, not deferred.
pub fn trigger_verification(pki: &mut dyn PkiService, group: GroupId) -> Result<(), TlsError> {
    pki.verify_group(group)
        .map_err(|_| TlsError::UnknownCa("verification start failed"))
}

/// True while verification is still running; re-polled every tick.
pub fn poll_completion(pki: &dyn PkiService, group: GroupId) -> bool {
    pki.is_busy(group)
}

/// Map the finished verification to a verdict.
///
/// Every loaded certificate must report `Valid`. When status_request was
/// negotiated and an OCSP verdict exists, anything but `Good` downgrades
/// an otherwise-valid chain.
pub fn map_result(
    pki: &dyn PkiService,
    slots: &[CertId],
    used: usize,
    ocsp: Option<OcspVerdict>,
) -> Result<(), TlsError> {
    for slot in &slots[..used] {
        match pki.certificate_status(*slot)? {
            CertVerdict::Valid => {}
            CertVerdict::Unknown => {
                return Err(TlsError::UnknownCa("verification incomplete"));
            }
            CertVerdict::Invalid => {
                return Err(TlsError::UnknownCa("certificate rejected"));
            }
        }
    }
    match ocsp {
        None | Some(OcspVerdict::Good) => Ok(()),
        Some(OcspVerdict::Revoked) => {
            Err(TlsError::BadCertificateStatus("leaf certificate revoked"))
        }
        Some(OcspVerdict::Malformed) => {
            Err(TlsError::BadCertificateStatus("ocsp response rejected"))
        }
    }
}
