//! Wire buffer manager: bounds-checked access to the fixed-capacity
//! handshake regions.
//!
//! Each connection owns one TX and one RX region, allocated once at
//! connection allocation and never resized. Cursors track progress:
//!
//! ```text
//! TX:  0 <= read <= write <= end      (read = drained by transport)
//! RX:  0 <= parse <= write <= end     (write = ingested from record layer)
//! ```
//!
//! TLS handshake headers are `type(1) + length(3)` prefixing a body whose
//! size is not known until encoding completes, so the TX path writes a
//! zeroed length field ahead and patches it afterwards
//! (`begin_message`/`finish_message`).

use std::cell::Cell;
use ticktls_types::TlsError;

/// True iff `start + length <= end`, without overflow.
///
/// Mandatory gate before every variable-length read: lengths arrive from
/// the network and must never be trusted without this check.
pub fn is_index_in_range(start: usize, length: usize, end: usize) -> bool {
    start.checked_add(length).is_some_and(|needed| needed <= end)
}

/// Handle for an in-progress TX handshake message, created by
/// [`HsBuffer::begin_message`] and consumed by [`HsBuffer::finish_message`].
#[derive(Debug, Clone, Copy)]
pub struct MsgStart {
    /// Offset of the message header (type byte) in the region.
    pub header: usize,
}

/// One fixed-capacity handshake byte region with cursors.
#[derive(Debug)]
pub struct HsBuffer {
    data: Vec<u8>,
    read: usize,
    write: usize,
    /// Defensive-check failures observed since the last drain. These can
    /// only fire on internal logic errors; the accessor substitutes a safe
    /// default instead of faulting.
    check_failures: Cell<u32>,
}

impl HsBuffer {
    /// Allocate a region of `capacity` bytes. This is the only allocation
    /// the buffer ever performs.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            read: 0,
            write: 0,
            check_failures: Cell::new(0),
        }
    }

    pub fn end(&self) -> usize {
        self.data.len()
    }

    pub fn read_pos(&self) -> usize {
        self.read
    }

    pub fn write_pos(&self) -> usize {
        self.write
    }

    /// Reset both cursors and scrub the region. Used at handshake finalize
    /// and connection free so no handshake bytes outlive the handshake.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.read = 0;
        self.write = 0;
    }

    /// Number of defensive-check failures since the last call, clearing
    /// the counter. The engine forwards a nonzero count to the
    /// diagnostics sink as a runtime-check failure.
    pub fn take_check_failures(&self) -> u32 {
        self.check_failures.replace(0)
    }

    fn check_fail(&self) {
        self.check_failures.set(self.check_failures.get().saturating_add(1));
    }

    // -----------------------------------------------------------------
    // Absolute-offset access. Callers must have range-validated the
    // offset already; the checks here are defense in depth.
    // -----------------------------------------------------------------

    pub fn get_u8(&self, offset: usize) -> u8 {
        if !is_index_in_range(offset, 1, self.data.len()) {
            self.check_fail();
            return 0;
        }
        self.data[offset]
    }

    pub fn get_u16(&self, offset: usize) -> u16 {
        if !is_index_in_range(offset, 2, self.data.len()) {
            self.check_fail();
            return 0;
        }
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    pub fn get_u24(&self, offset: usize) -> u32 {
        if !is_index_in_range(offset, 3, self.data.len()) {
            self.check_fail();
            return 0;
        }
        u32::from_be_bytes([
            0,
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    pub fn get_u32(&self, offset: usize) -> u32 {
        if !is_index_in_range(offset, 4, self.data.len()) {
            self.check_fail();
            return 0;
        }
        u32::from_be_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    pub fn put_u8(&mut self, offset: usize, value: u8) {
        if !is_index_in_range(offset, 1, self.data.len()) {
            self.check_fail();
            return;
        }
        self.data[offset] = value;
    }

    pub fn put_u16(&mut self, offset: usize, value: u16) {
        if !is_index_in_range(offset, 2, self.data.len()) {
            self.check_fail();
            return;
        }
        self.data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn put_u24(&mut self, offset: usize, value: u32) {
        if !is_index_in_range(offset, 3, self.data.len()) {
            self.check_fail();
            return;
        }
        self.data[offset..offset + 3].copy_from_slice(&value.to_be_bytes()[1..]);
    }

    pub fn put_u32(&mut self, offset: usize, value: u32) {
        if !is_index_in_range(offset, 4, self.data.len()) {
            self.check_fail();
            return;
        }
        self.data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    /// Borrow `len` bytes at `offset`. Out-of-range requests return an
    /// empty slice and count a check failure.
    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        if !is_index_in_range(offset, len, self.data.len()) {
            self.check_fail();
            return &[];
        }
        &self.data[offset..offset + len]
    }

    // -----------------------------------------------------------------
    // TX append path
    // -----------------------------------------------------------------

    pub fn push_u8(&mut self, value: u8) -> Result<(), TlsError> {
        self.push_slice(&[value])
    }

    pub fn push_u16(&mut self, value: u16) -> Result<(), TlsError> {
        self.push_slice(&value.to_be_bytes())
    }

    pub fn push_u24(&mut self, value: u32) -> Result<(), TlsError> {
        self.push_slice(&value.to_be_bytes()[1..])
    }

    pub fn push_slice(&mut self, bytes: &[u8]) -> Result<(), TlsError> {
        if !is_index_in_range(self.write, bytes.len(), self.data.len()) {
            return Err(TlsError::TransmitOverflow);
        }
        self.data[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
        Ok(())
    }

    /// Write a handshake header with a zeroed 3-byte length field, to be
    /// patched by [`finish_message`](Self::finish_message).
    pub fn begin_message(&mut self, msg_type: u8) -> Result<MsgStart, TlsError> {
        let header = self.write;
        self.push_u8(msg_type)?;
        self.push_u24(0)?;
        Ok(MsgStart { header })
    }

    /// Patch the header length field of `start` with the body length
    /// written since `begin_message`. Returns `(header_offset, total_len)`
    /// of the completed message for the transcript span list.
    pub fn finish_message(&mut self, start: MsgStart) -> (usize, usize) {
        let body_len = self.write - start.header - 4;
        self.put_u24(start.header + 1, body_len as u32);
        (start.header, self.write - start.header)
    }

    /// Reserve a zeroed 2-byte slot at the write cursor, returning its
    /// offset for a later [`patch_u16`](Self::put_u16). Used for the
    /// CertificateVerify signature length, which is unknown until the
    /// deferred signing job completes.
    pub fn reserve_u16(&mut self) -> Result<usize, TlsError> {
        let offset = self.write;
        self.push_u16(0)?;
        Ok(offset)
    }

    /// Advance the read cursor over `n` drained bytes.
    pub fn advance_read(&mut self, n: usize) -> Result<(), TlsError> {
        if !is_index_in_range(self.read, n, self.write) {
            return Err(TlsError::Decode("read cursor past write cursor"));
        }
        self.read += n;
        Ok(())
    }

    /// Bytes written but not yet drained (TX) or ingested but not yet
    /// consumed (RX).
    pub fn unread(&self) -> &[u8] {
        &self.data[self.read..self.write]
    }

    // -----------------------------------------------------------------
    // RX ingest path
    // -----------------------------------------------------------------

    /// Append received bytes at the write cursor.
    pub fn ingest(&mut self, bytes: &[u8]) -> Result<(), TlsError> {
        if !is_index_in_range(self.write, bytes.len(), self.data.len()) {
            return Err(TlsError::Decode("receive region exhausted"));
        }
        self.data[self.write..self.write + bytes.len()].copy_from_slice(bytes);
        self.write += bytes.len();
        Ok(())
    }
}
