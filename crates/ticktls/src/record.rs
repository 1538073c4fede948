//! Handshake record demultiplexer.
//!
//! The record layer (out of scope) delivers plaintext handshake bytes
//! and the ChangeCipherSpec signal. This module appends the bytes to the
//! RX region, walks complete `type(1) | length(3) | body` messages, and
//! records one arrival marker per message type in the descriptor table.
//! Parsing never advances past the bound of the currently-known message
//! length; a partial message simply waits for more bytes.

use crate::buffer::is_index_in_range;
use crate::codec::{HandshakeType, HANDSHAKE_HEADER_LEN};
use crate::conn::Connection;
use ticktls_types::TlsError;

/// Per-message-type arrival markers: `(offset, total_len)` into the RX
/// region, absent until the demultiplexer records arrival.
#[derive(Debug, Default)]
pub struct RxMessages {
    slots: [Option<(usize, usize)>; 11],
}

impl RxMessages {
    fn index(ty: HandshakeType) -> usize {
        match ty {
            HandshakeType::HelloRequest => 0,
            HandshakeType::ClientHello => 1,
            HandshakeType::ServerHello => 2,
            HandshakeType::Certificate => 3,
            HandshakeType::ServerKeyExchange => 4,
            HandshakeType::CertificateRequest => 5,
            HandshakeType::ServerHelloDone => 6,
            HandshakeType::CertificateVerify => 7,
            HandshakeType::ClientKeyExchange => 8,
            HandshakeType::Finished => 9,
            HandshakeType::CertificateStatus => 10,
        }
    }

    /// Record arrival. A second message of the same type within one
    /// handshake is a protocol violation.
    pub fn record(&mut self, ty: HandshakeType, offset: usize, len: usize) -> Result<(), TlsError> {
        let slot = &mut self.slots[Self::index(ty)];
        if slot.is_some() {
            return Err(TlsError::UnexpectedMessage("duplicate handshake message"));
        }
        *slot = Some((offset, len));
        Ok(())
    }

    pub fn peek(&self, ty: HandshakeType) -> Option<(usize, usize)> {
        self.slots[Self::index(ty)]
    }

    /// Consume the marker for `ty`, if present.
    pub fn take(&mut self, ty: HandshakeType) -> Option<(usize, usize)> {
        self.slots[Self::index(ty)].take()
    }

    pub fn any_present(&self, types: &[HandshakeType]) -> bool {
        types.iter().any(|ty| self.peek(*ty).is_some())
    }

    pub fn clear(&mut self) {
        self.slots = Default::default();
    }
}

/// Ingest plaintext handshake bytes and demultiplex complete messages
/// into the descriptor table.
pub fn ingest_handshake(conn: &mut Connection, bytes: &[u8]) -> Result<(), TlsError> {
    conn.rx.ingest(bytes)?;
    demux(conn)
}

fn demux(conn: &mut Connection) -> Result<(), TlsError> {
    loop {
        let cursor = conn.rx.read_pos();
        let available = conn.rx.write_pos() - cursor;
        if available < HANDSHAKE_HEADER_LEN {
            return Ok(());
        }

        let ty_byte = conn.rx.get_u8(cursor);
        let body_len = conn.rx.get_u24(cursor + 1) as usize;
        let total = HANDSHAKE_HEADER_LEN + body_len;

        // A message that can never fit the region is fatal now, not
        // after the region fills up.
        if !is_index_in_range(cursor, total, conn.rx.end()) {
            return Err(TlsError::Decode("message exceeds receive region"));
        }
        if total > available {
            // Partial message: wait for more bytes.
            return Ok(());
        }

        let Some(ty) = HandshakeType::from_u8(ty_byte) else {
            return Err(TlsError::Decode("unknown handshake message type"));
        };

        match ty {
            // HelloRequest during an in-progress handshake is ignored
            // (RFC 5246 §7.4.1.1); it gets no marker and no transcript
            // span.
            HandshakeType::HelloRequest => {
                if body_len != 0 {
                    return Err(TlsError::Decode("hello request body not empty"));
                }
            }
            _ => conn.rx_messages.record(ty, cursor, total)?,
        }
        conn.rx.advance_read(total)?;
    }
}

/// Ingest the ChangeCipherSpec signal. Only legal inside the receivable
/// window (after the client's own Finished is on the wire).
pub fn ingest_ccs(conn: &mut Connection) -> Result<(), TlsError> {
    if !conn.ccs_receivable {
        return Err(TlsError::UnexpectedMessage("change cipher spec outside window"));
    }
    conn.ccs_receivable = false;
    conn.ccs_received = true;
    Ok(())
}
