//! Post-hello TLS 1.2 handshake messages, client role.
//!
//! Decoders return field ranges relative to the message body where the
//! bytes are consumed later by streaming crypto jobs (ServerKeyExchange
//! params and signature), and owned copies only for short fields.

use super::{HandshakeType, Reader};
use crate::buffer::{HsBuffer, MsgStart};
use crate::suite::{NamedCurve, SignatureScheme};
use ticktls_types::TlsError;

/// SEC1 uncompressed point format byte.
pub const UNCOMPRESSED_POINT: u8 = 0x04;

/// RFC 8422 §5.4 curve type: named_curve.
pub const CURVE_TYPE_NAMED: u8 = 3;

const CERT_STATUS_TYPE_OCSP: u8 = 1;

/// Finished verify-data length, fixed in TLS 1.2.
pub const VERIFY_DATA_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Certificate
// ---------------------------------------------------------------------------

/// Structural view of a received Certificate message: one `(offset, len)`
/// per DER certificate, relative to the message body, leaf first.
/// Content validation is the PKI service's job.
#[derive(Debug)]
pub struct CertificateChain {
    pub entries: Vec<(usize, usize)>,
}

pub fn decode_certificate(body: &[u8]) -> Result<CertificateChain, TlsError> {
    let mut r = Reader::new(body);
    let total_len = r.u24()? as usize;
    if total_len != r.remaining() {
        return Err(TlsError::Decode("certificate list length mismatch"));
    }

    let mut entries = Vec::new();
    while r.remaining() > 0 {
        let cert_len = r.u24()? as usize;
        if cert_len == 0 {
            return Err(TlsError::Decode("zero-length certificate entry"));
        }
        let offset = r.pos();
        r.take(cert_len)?;
        entries.push((offset, cert_len));
    }
    r.expect_end()?;

    if entries.is_empty() {
        return Err(TlsError::Decode("empty certificate chain"));
    }
    Ok(CertificateChain { entries })
}

/// Encode the client Certificate message. An empty `chain` produces the
/// legal empty-list message sent when the server requested a certificate
/// the client cannot supply.
pub fn encode_certificate(
    tx: &mut HsBuffer,
    chain: &[Vec<u8>],
) -> Result<(usize, usize), TlsError> {
    let msg = tx.begin_message(HandshakeType::Certificate as u8)?;
    let total: usize = chain.iter().map(|c| 3 + c.len()).sum();
    tx.push_u24(total as u32)?;
    for cert in chain {
        tx.push_u24(cert.len() as u32)?;
        tx.push_slice(cert)?;
    }
    Ok(tx.finish_message(msg))
}

// ---------------------------------------------------------------------------
// CertificateStatus (RFC 6066 §8)
// ---------------------------------------------------------------------------

/// `(offset, len)` of the OCSP response within the message body.
pub fn decode_certificate_status(body: &[u8]) -> Result<(usize, usize), TlsError> {
    let mut r = Reader::new(body);
    if r.u8()? != CERT_STATUS_TYPE_OCSP {
        return Err(TlsError::BadCertificateStatus("status type is not ocsp"));
    }
    let len = r.u24()? as usize;
    if len == 0 {
        return Err(TlsError::BadCertificateStatus("empty ocsp response"));
    }
    let offset = r.pos();
    r.take(len)?;
    r.expect_end()?;
    Ok((offset, len))
}

// ---------------------------------------------------------------------------
// ServerKeyExchange
// ---------------------------------------------------------------------------

/// Decoded ECDHE ServerKeyExchange (RFC 8422 §5.4).
#[derive(Debug)]
pub struct EcdheServerKeyExchange {
    /// `(offset, len)` of the ServerECDHParams bytes, relative to the
    /// body. Input to the signature check together with the randoms.
    pub params: (usize, usize),
    /// Server's ephemeral public key, normalized to an uncompressed SEC1
    /// point with the leading format byte.
    pub point: Vec<u8>,
    /// `(offset, len)` of the signature bytes, relative to the body.
    pub signature: (usize, usize),
}

/// Decode an ECDHE ServerKeyExchange body.
///
/// The curve is not negotiated here: it must equal the curve bound to the
/// selected certificate's public key, and the signature algorithm must
/// equal the active worker's. Both are validation inputs, not outputs.
pub fn decode_server_key_exchange_ecdhe(
    body: &[u8],
    expected_curve: NamedCurve,
    expected_sig: SignatureScheme,
) -> Result<EcdheServerKeyExchange, TlsError> {
    let mut r = Reader::new(body);

    if r.u8()? != CURVE_TYPE_NAMED {
        return Err(TlsError::Decode("curve type is not named_curve"));
    }
    let curve = NamedCurve(r.u16()?);
    if curve != expected_curve {
        return Err(TlsError::Decode("curve does not match certificate key"));
    }

    let point_len = r.u8()? as usize;
    let raw_len = 2 * expected_curve.coordinate_len();
    let point = if point_len == raw_len {
        // Raw X || Y without the format byte; normalize.
        let mut point = Vec::with_capacity(1 + raw_len);
        point.push(UNCOMPRESSED_POINT);
        point.extend_from_slice(r.take(point_len)?);
        point
    } else if point_len == raw_len + 1 {
        let bytes = r.take(point_len)?;
        if bytes[0] != UNCOMPRESSED_POINT {
            return Err(TlsError::Decode("point format byte is not uncompressed"));
        }
        bytes.to_vec()
    } else {
        return Err(TlsError::Decode("point length does not match curve"));
    };
    let params = (0, r.pos());

    let sig_alg = SignatureScheme(r.u16()?);
    if sig_alg != expected_sig {
        return Err(TlsError::Decode("signature algorithm mismatch"));
    }
    let sig_len = r.u16()? as usize;
    if sig_len == 0 {
        return Err(TlsError::Decode("empty signature"));
    }
    let sig_offset = r.pos();
    r.take(sig_len)?;
    r.expect_end()?;

    Ok(EcdheServerKeyExchange {
        params,
        point,
        signature: (sig_offset, sig_len),
    })
}

/// Decode a PSK ServerKeyExchange body, returning the identity hint.
///
/// A zero-length hint is accepted and ignored (interoperability-driven
/// choice: some servers send an empty hint rather than omitting the
/// message).
pub fn decode_server_key_exchange_psk(body: &[u8]) -> Result<&[u8], TlsError> {
    let mut r = Reader::new(body);
    let hint_len = r.u16()? as usize;
    let hint = r.take(hint_len)?;
    r.expect_end()?;
    Ok(hint)
}

// ---------------------------------------------------------------------------
// CertificateRequest (RFC 5246 §7.4.4)
// ---------------------------------------------------------------------------

/// Parsed CertificateRequest. The caller retains it only when client
/// authentication is configured; otherwise it is parsed and discarded.
#[derive(Debug)]
pub struct CertificateRequest {
    pub cert_types: Vec<u8>,
    pub sig_algs: Vec<SignatureScheme>,
    pub ca_name_count: usize,
}

pub fn decode_certificate_request(body: &[u8]) -> Result<CertificateRequest, TlsError> {
    let mut r = Reader::new(body);

    let types_len = r.u8()? as usize;
    let cert_types = r.take(types_len)?.to_vec();

    let algs_len = r.u16()? as usize;
    if algs_len % 2 != 0 {
        return Err(TlsError::Decode("odd signature algorithm list length"));
    }
    let algs = r.take(algs_len)?;
    let sig_algs = algs
        .chunks_exact(2)
        .map(|pair| SignatureScheme(u16::from_be_bytes([pair[0], pair[1]])))
        .collect();

    let ca_total = r.u16()? as usize;
    let ca_end = r.pos() + ca_total;
    let mut ca_name_count = 0;
    while r.pos() < ca_end {
        let dn_len = r.u16()? as usize;
        if r.pos() + dn_len > ca_end {
            return Err(TlsError::Decode("distinguished name exceeds list"));
        }
        r.take(dn_len)?;
        ca_name_count += 1;
    }
    if r.pos() != ca_end {
        return Err(TlsError::Decode("distinguished name list length mismatch"));
    }
    r.expect_end()?;

    Ok(CertificateRequest {
        cert_types,
        sig_algs,
        ca_name_count,
    })
}

// ---------------------------------------------------------------------------
// ServerHelloDone / Finished
// ---------------------------------------------------------------------------

/// ServerHelloDone carries no body; any other declared length is a
/// decode error.
pub fn decode_server_hello_done(body: &[u8]) -> Result<(), TlsError> {
    if !body.is_empty() {
        return Err(TlsError::Decode("server hello done body not empty"));
    }
    Ok(())
}

pub fn decode_finished(body: &[u8]) -> Result<[u8; VERIFY_DATA_LEN], TlsError> {
    if body.len() != VERIFY_DATA_LEN {
        return Err(TlsError::Decode("finished verify data is not 12 bytes"));
    }
    let mut verify_data = [0u8; VERIFY_DATA_LEN];
    verify_data.copy_from_slice(body);
    Ok(verify_data)
}

pub fn encode_finished(
    tx: &mut HsBuffer,
    verify_data: &[u8; VERIFY_DATA_LEN],
) -> Result<(usize, usize), TlsError> {
    let msg = tx.begin_message(HandshakeType::Finished as u8)?;
    tx.push_slice(verify_data)?;
    Ok(tx.finish_message(msg))
}

// ---------------------------------------------------------------------------
// ClientKeyExchange / CertificateVerify
// ---------------------------------------------------------------------------

/// Encode an ECDHE/ECDH ClientKeyExchange carrying the client's
/// uncompressed public point.
pub fn encode_client_key_exchange_ecc(
    tx: &mut HsBuffer,
    point: &[u8],
) -> Result<(usize, usize), TlsError> {
    let msg = tx.begin_message(HandshakeType::ClientKeyExchange as u8)?;
    tx.push_u8(point.len() as u8)?;
    tx.push_slice(point)?;
    Ok(tx.finish_message(msg))
}

/// Encode a PSK ClientKeyExchange carrying the selected identity.
pub fn encode_client_key_exchange_psk(
    tx: &mut HsBuffer,
    identity: &[u8],
) -> Result<(usize, usize), TlsError> {
    let msg = tx.begin_message(HandshakeType::ClientKeyExchange as u8)?;
    tx.push_u16(identity.len() as u16)?;
    tx.push_slice(identity)?;
    Ok(tx.finish_message(msg))
}

/// Begin a CertificateVerify message: signature algorithm plus a reserved
/// 2-byte signature-length slot, patched once the deferred signing job
/// completes. Returns the message handle and the slot offset.
pub fn begin_certificate_verify(
    tx: &mut HsBuffer,
    sig_alg: SignatureScheme,
) -> Result<(MsgStart, usize), TlsError> {
    let msg = tx.begin_message(HandshakeType::CertificateVerify as u8)?;
    tx.push_u16(sig_alg.0)?;
    let slot = tx.reserve_u16()?;
    Ok((msg, slot))
}
