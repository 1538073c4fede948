//! Structured diagnostics sink.
//!
//! A failed handshake surfaces to the application only as "connection
//! failed"; the richer (function id, error id, connection id) record is
//! retrievable from the sink separately.

use std::collections::VecDeque;
use ticktls_types::{ConnectionId, TlsError};

/// Reporting site of a diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionId {
    HandshakeTick = 1,
    BackgroundTick = 2,
    RecordIngest = 3,
    KeyInstall = 4,
    CertGate = 5,
    Allocate = 6,
    Buffer = 7,
}

/// Classified failure cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorId {
    DecodeError = 1,
    UnexpectedMessage = 2,
    BadCertificateStatus = 3,
    CryptoReject = 4,
    ProviderFailure = 5,
    ChainInvalid = 6,
    NoSharedSuite = 7,
    InvalidConfig = 8,
    RuntimeCheckFailure = 9,
    TransmitOverflow = 10,
}

impl ErrorId {
    pub fn from_error(err: &TlsError) -> Self {
        match err {
            TlsError::Decode(_) => ErrorId::DecodeError,
            TlsError::UnexpectedMessage(_) => ErrorId::UnexpectedMessage,
            TlsError::BadCertificateStatus(_) => ErrorId::BadCertificateStatus,
            TlsError::DecryptError(_) => ErrorId::CryptoReject,
            TlsError::UnknownCa(_) => ErrorId::ChainInvalid,
            TlsError::NoSharedCipherSuite => ErrorId::NoSharedSuite,
            TlsError::TransmitOverflow => ErrorId::TransmitOverflow,
            TlsError::Internal(_) => ErrorId::RuntimeCheckFailure,
            TlsError::Provider(_) | TlsError::Pki(_) => ErrorId::ProviderFailure,
            TlsError::Config(_) => ErrorId::InvalidConfig,
        }
    }
}

/// One structured user-error record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagRecord {
    pub function: FunctionId,
    pub error: ErrorId,
    pub connection: ConnectionId,
}

/// Receiver for structured user-error and runtime-check reports.
pub trait DiagSink {
    fn report(&mut self, record: DiagRecord);

    /// A compiled-in defensive check fired. The caller substituted a safe
    /// default; this report exists so the defect is not silent.
    fn runtime_check_failure(&mut self, function: FunctionId, connection: ConnectionId) {
        self.report(DiagRecord {
            function,
            error: ErrorId::RuntimeCheckFailure,
            connection,
        });
    }
}

/// Bounded in-memory sink with a retrieval API. When full, the oldest
/// record is dropped.
#[derive(Debug)]
pub struct MemoryDiagSink {
    records: VecDeque<DiagRecord>,
    capacity: usize,
}

impl MemoryDiagSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn records(&self) -> impl Iterator<Item = &DiagRecord> {
        self.records.iter()
    }

    pub fn take_records(&mut self) -> Vec<DiagRecord> {
        self.records.drain(..).collect()
    }
}

impl Default for MemoryDiagSink {
    fn default() -> Self {
        Self::new(32)
    }
}

impl DiagSink for MemoryDiagSink {
    fn report(&mut self, record: DiagRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
}
