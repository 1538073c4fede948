//! Handshake transcript: span list plus streaming hash through the
//! provider.
//!
//! The transcript is not copied anywhere. Each handshake message, sent
//! or received, is recorded as a `(direction, offset, length)` span into
//! the connection's TX or RX region, in exchange order. Hashing streams
//! the spans through a provider job, which is why the provider carries
//! Start/Update/Finish call modes at all.

use crate::buffer::HsBuffer;
use crate::provider::CryptoProvider;
use ticktls_types::{CryptoMode, Direction, JobId, ProviderError};

/// One handshake message in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub dir: Direction,
    pub offset: usize,
    pub len: usize,
}

/// Ordered span list for one connection.
#[derive(Debug, Default)]
pub struct Transcript {
    spans: Vec<Span>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, dir: Direction, offset: usize, len: usize) {
        self.spans.push(Span { dir, offset, len });
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Cleared at handshake finalize; the regions themselves are scrubbed
    /// separately.
    pub fn clear(&mut self) {
        self.spans.clear();
    }
}

/// Stream every recorded span through a hash job and write the digest to
/// `out`, returning the digest length.
pub fn hash_transcript(
    provider: &mut dyn CryptoProvider,
    job: JobId,
    tx: &HsBuffer,
    rx: &HsBuffer,
    spans: &[Span],
    out: &mut [u8],
) -> Result<usize, ProviderError> {
    provider.hash(job, CryptoMode::Start, &[], &mut [])?;
    for span in spans {
        let region = match span.dir {
            Direction::Tx => tx,
            Direction::Rx => rx,
        };
        provider.hash(job, CryptoMode::Update, region.slice(span.offset, span.len), &mut [])?;
    }
    provider.hash(job, CryptoMode::Finish, &[], out)
}
