//! Handshake message codec.
//!
//! One encode/decode pair per TLS 1.2 handshake message relevant to the
//! client role (RFC 5246 §7.4 grammar). Encoders write into the TX region
//! through the wire buffer manager; decoders read one already-located
//! message body and enforce per-field range checks plus the
//! exact-consumption invariant (unconsumed trailing bytes are themselves
//! a decode error).

pub mod hello;
pub mod tls12;

use crate::buffer::is_index_in_range;
use ticktls_types::TlsError;

/// TLS handshake message types (RFC 5246 §7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    HelloRequest = 0,
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerKeyExchange = 12,
    CertificateRequest = 13,
    ServerHelloDone = 14,
    CertificateVerify = 15,
    ClientKeyExchange = 16,
    Finished = 20,
    CertificateStatus = 22,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(HandshakeType::HelloRequest),
            1 => Some(HandshakeType::ClientHello),
            2 => Some(HandshakeType::ServerHello),
            11 => Some(HandshakeType::Certificate),
            12 => Some(HandshakeType::ServerKeyExchange),
            13 => Some(HandshakeType::CertificateRequest),
            14 => Some(HandshakeType::ServerHelloDone),
            15 => Some(HandshakeType::CertificateVerify),
            16 => Some(HandshakeType::ClientKeyExchange),
            20 => Some(HandshakeType::Finished),
            22 => Some(HandshakeType::CertificateStatus),
            _ => None,
        }
    }
}

/// Length of the `type(1) + length(3)` handshake header.
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// The single legal ChangeCipherSpec payload byte.
pub const CCS_PAYLOAD: u8 = 0x01;

/// Bounds-checked sequential reader over one message body.
///
/// Every variable-length access goes through [`is_index_in_range`];
/// [`Reader::expect_end`] enforces exact consumption.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], TlsError> {
        if !is_index_in_range(self.pos, len, self.buf.len()) {
            return Err(TlsError::Decode("field extends past message end"));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, TlsError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, TlsError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u24(&mut self) -> Result<u32, TlsError> {
        let b = self.take(3)?;
        Ok(u32::from_be_bytes([0, b[0], b[1], b[2]]))
    }

    /// Exact-consumption check: trailing bytes after all fields are
    /// parsed are a decode error.
    pub fn expect_end(&self) -> Result<(), TlsError> {
        if self.pos != self.buf.len() {
            return Err(TlsError::Decode("trailing bytes after message fields"));
        }
        Ok(())
    }
}
