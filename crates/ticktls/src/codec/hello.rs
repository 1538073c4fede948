//! ClientHello encoding and ServerHello decoding.

use super::{HandshakeType, Reader};
use crate::buffer::HsBuffer;
use crate::suite::{CipherSuite, NamedCurve, SignatureScheme};
use ticktls_types::TlsError;

pub const TLS12_VERSION: u16 = 0x0303;

// Extension type codes used by the client.
pub const EXT_STATUS_REQUEST: u16 = 0x0005;
pub const EXT_SUPPORTED_GROUPS: u16 = 0x000A;
pub const EXT_EC_POINT_FORMATS: u16 = 0x000B;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000D;

const CERT_STATUS_TYPE_OCSP: u8 = 1;

/// Fields the client offers in its ClientHello.
pub struct ClientHelloParams<'a> {
    pub random: &'a [u8; 32],
    pub suites: &'a [CipherSuite],
    pub groups: &'a [NamedCurve],
    pub signature_algorithms: &'a [SignatureScheme],
    pub status_request: bool,
}

/// Encode a ClientHello into the TX region, returning the message's
/// `(offset, total_len)` for the transcript span list.
pub fn encode_client_hello(
    tx: &mut HsBuffer,
    params: &ClientHelloParams<'_>,
) -> Result<(usize, usize), TlsError> {
    let msg = tx.begin_message(HandshakeType::ClientHello as u8)?;

    tx.push_u16(TLS12_VERSION)?;
    tx.push_slice(params.random)?;
    // Empty session id: no resumption support.
    tx.push_u8(0)?;

    tx.push_u16((params.suites.len() * 2) as u16)?;
    for suite in params.suites {
        tx.push_u16(suite.0)?;
    }

    // Null compression only.
    tx.push_u8(1)?;
    tx.push_u8(0)?;

    // Extensions block, length patched after the fact.
    let ext_len_slot = tx.reserve_u16()?;

    tx.push_u16(EXT_SUPPORTED_GROUPS)?;
    tx.push_u16((2 + params.groups.len() * 2) as u16)?;
    tx.push_u16((params.groups.len() * 2) as u16)?;
    for group in params.groups {
        tx.push_u16(group.0)?;
    }

    tx.push_u16(EXT_EC_POINT_FORMATS)?;
    tx.push_u16(2)?;
    tx.push_u8(1)?;
    // uncompressed(0) only
    tx.push_u8(0)?;

    tx.push_u16(EXT_SIGNATURE_ALGORITHMS)?;
    tx.push_u16((2 + params.signature_algorithms.len() * 2) as u16)?;
    tx.push_u16((params.signature_algorithms.len() * 2) as u16)?;
    for alg in params.signature_algorithms {
        tx.push_u16(alg.0)?;
    }

    if params.status_request {
        // RFC 6066 §8: ocsp(1), empty responder list, empty extensions.
        tx.push_u16(EXT_STATUS_REQUEST)?;
        tx.push_u16(5)?;
        tx.push_u8(CERT_STATUS_TYPE_OCSP)?;
        tx.push_u16(0)?;
        tx.push_u16(0)?;
    }

    let ext_len = tx.write_pos() - ext_len_slot - 2;
    tx.put_u16(ext_len_slot, ext_len as u16);

    Ok(tx.finish_message(msg))
}

/// Decoded ServerHello fields the client acts on.
#[derive(Debug)]
pub struct ServerHello {
    pub server_random: [u8; 32],
    pub suite: CipherSuite,
    /// The server acknowledged our status_request offer.
    pub status_request_acked: bool,
}

/// Decode a ServerHello body.
pub fn decode_server_hello(body: &[u8]) -> Result<ServerHello, TlsError> {
    let mut r = Reader::new(body);

    if r.u16()? != TLS12_VERSION {
        return Err(TlsError::Decode("server version is not TLS 1.2"));
    }

    let mut server_random = [0u8; 32];
    server_random.copy_from_slice(r.take(32)?);

    let session_id_len = r.u8()? as usize;
    if session_id_len > 32 {
        return Err(TlsError::Decode("session id longer than 32 bytes"));
    }
    r.take(session_id_len)?;

    let suite = CipherSuite(r.u16()?);

    if r.u8()? != 0 {
        return Err(TlsError::Decode("non-null compression selected"));
    }

    let mut status_request_acked = false;
    if r.remaining() > 0 {
        let ext_total = r.u16()? as usize;
        if ext_total != r.remaining() {
            return Err(TlsError::Decode("extension block length mismatch"));
        }
        while r.remaining() > 0 {
            let ext_type = r.u16()?;
            let ext_len = r.u16()? as usize;
            let data = r.take(ext_len)?;
            match ext_type {
                EXT_STATUS_REQUEST => {
                    // RFC 6066: the acknowledgement is empty.
                    if !data.is_empty() {
                        return Err(TlsError::Decode("status_request ack not empty"));
                    }
                    status_request_acked = true;
                }
                // Unknown extensions are skipped by length.
                _ => {}
            }
        }
    }
    r.expect_end()?;

    Ok(ServerHello {
        server_random,
        suite,
        status_request_acked,
    })
}
