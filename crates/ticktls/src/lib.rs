#![forbid(unsafe_code)]
//! Client-side TLS 1.2 handshake engine for tick-scheduled stacks.
//!
//! The handshake runs as an explicit, resumable state machine over
//! fixed-capacity pre-allocated buffers: no blocking I/O, no OS thread
//! per connection. A cyclic scheduler drives [`Engine::handshake_tick`]
//! per connection at a fixed rate; the lower-priority
//! [`Engine::background_tick`] executes the expensive crypto jobs
//! (signatures, key derivation, OCSP) off the real-time path. Transport,
//! record-layer crypto, certificate validation, and the crypto
//! primitives themselves are collaborators behind traits.

pub mod alert;
pub mod buffer;
pub mod certgate;
pub mod codec;
pub mod config;
pub mod conn;
pub mod diag;
pub mod dispatch;
pub mod handshake;
pub mod keys;
pub mod provider;
pub mod record;
pub mod suite;
pub mod transcript;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use config::{ConnectionConfig, JobHandles, KeyHandles, PskIdentity};
pub use diag::{DiagRecord, DiagSink, ErrorId, FunctionId, MemoryDiagSink};
pub use handshake::HandshakeState;
pub use provider::{CryptoProvider, PkiService};
pub use suite::{CipherSuite, CipherWorker, NamedCurve, SignatureScheme};
pub use ticktls_types::{
    CertId, ConfigError, ConnectionId, GroupId, JobId, KeyId, PkiError, ProviderError, TlsError,
};

use conn::ConnectionRegistry;
use handshake::EngineCx;

/// The handshake engine: connection registry plus collaborators.
///
/// The diagnostics sink is a type parameter so an embedding can supply
/// its own reporting channel; the default keeps records in memory behind
/// a retrieval API.
pub struct Engine<D: DiagSink = MemoryDiagSink> {
    conns: ConnectionRegistry,
    provider: Box<dyn CryptoProvider>,
    pki: Box<dyn PkiService>,
    diag: D,
}

impl Engine<MemoryDiagSink> {
    pub fn new(
        provider: Box<dyn CryptoProvider>,
        pki: Box<dyn PkiService>,
        max_connections: usize,
    ) -> Self {
        Self::with_diag(provider, pki, max_connections, MemoryDiagSink::default())
    }
}

impl<D: DiagSink> Engine<D> {
    pub fn with_diag(
        provider: Box<dyn CryptoProvider>,
        pki: Box<dyn PkiService>,
        max_connections: usize,
        diag: D,
    ) -> Self {
        Self {
            conns: ConnectionRegistry::new(max_connections),
            provider,
            pki,
            diag,
        }
    }

    /// Bind a validated configuration to a free connection slot.
    pub fn allocate(&mut self, config: ConnectionConfig) -> Result<ConnectionId, ConfigError> {
        self.conns.allocate(config).inspect_err(|_| {
            // No slot was bound; the record carries the sentinel id.
            self.diag.report(DiagRecord {
                function: FunctionId::Allocate,
                error: ErrorId::InvalidConfig,
                connection: ConnectionId(u8::MAX),
            });
        })
    }

    /// Release a connection slot, scrubbing its buffers.
    pub fn free(&mut self, id: ConnectionId) {
        self.conns.free(id);
    }

    /// Begin the handshake: the next tick produces the ClientHello.
    pub fn start(&mut self, id: ConnectionId) {
        if let Some(conn) = self.conns.get_mut(id) {
            if conn.state == HandshakeState::Idle {
                conn.state = HandshakeState::SendClientHello;
            }
        }
    }

    /// Ingest plaintext handshake bytes delivered by the record layer.
    pub fn on_handshake_bytes(&mut self, id: ConnectionId, bytes: &[u8]) {
        let Some(conn) = self.conns.get_mut(id) else {
            return;
        };
        if conn.state.is_terminal() {
            return;
        }
        if let Err(err) = record::ingest_handshake(conn, bytes) {
            handshake::client::abort(&mut self.diag, conn, &err, FunctionId::RecordIngest);
        }
    }

    /// Ingest the peer's ChangeCipherSpec signal.
    pub fn on_change_cipher_spec(&mut self, id: ConnectionId) {
        let Some(conn) = self.conns.get_mut(id) else {
            return;
        };
        if conn.state.is_terminal() {
            return;
        }
        if let Err(err) = record::ingest_ccs(conn) {
            handshake::client::abort(&mut self.diag, conn, &err, FunctionId::RecordIngest);
        }
    }

    /// Advance one connection's handshake. Called once per connection
    /// per scheduler tick.
    pub fn handshake_tick(&mut self, id: ConnectionId) {
        let Some(conn) = self.conns.get_mut(id) else {
            return;
        };
        let mut cx = EngineCx {
            provider: self.provider.as_mut(),
            pki: self.pki.as_mut(),
            diag: &mut self.diag,
        };
        handshake::handshake_tick(&mut cx, conn);

        let failures = conn.tx.take_check_failures() + conn.rx.take_check_failures();
        if failures > 0 {
            self.diag.runtime_check_failure(FunctionId::Buffer, id);
        }
    }

    /// Execute at most one deferred job per connection. Called from the
    /// low-priority background slot.
    pub fn background_tick(&mut self) {
        for conn in self.conns.iter_mut() {
            dispatch::background_step(
                self.provider.as_mut(),
                self.pki.as_mut(),
                &mut self.diag,
                conn,
            );
        }
    }

    /// Completed handshake bytes ready for the transport to send.
    pub fn pending_transmit(&self, id: ConnectionId) -> &[u8] {
        self.conns.get(id).map_or(&[], |conn| conn.pending_transmit())
    }

    /// The transport drained `n` bytes of the pending region.
    pub fn mark_transmitted(&mut self, id: ConnectionId, n: usize) {
        let Some(conn) = self.conns.get_mut(id) else {
            return;
        };
        let pending = conn.tx_committed - conn.tx.read_pos();
        if n > pending || conn.tx.advance_read(n).is_err() {
            self.diag.runtime_check_failure(FunctionId::Buffer, id);
        }
    }

    /// True once, when the client ChangeCipherSpec must go on the wire
    /// (before the bytes of the Finished message that follow it).
    pub fn take_ccs_ready(&mut self, id: ConnectionId) -> bool {
        self.conns.get_mut(id).is_some_and(|conn| {
            let ready = conn.ccs_tx_ready;
            conn.ccs_tx_ready = false;
            ready
        })
    }

    /// Fatal alert to emit alongside closing the transport, if any.
    pub fn close_request(&self, id: ConnectionId) -> Option<Alert> {
        self.conns.get(id).and_then(|conn| conn.close_request)
    }

    pub fn state(&self, id: ConnectionId) -> Option<&HandshakeState> {
        self.conns.get(id).map(|conn| &conn.state)
    }

    pub fn is_established(&self, id: ConnectionId) -> bool {
        self.conns.get(id).is_some_and(|conn| conn.established)
    }

    /// The diagnostics sink, for retrieval-style sinks.
    pub fn diag(&self) -> &D {
        &self.diag
    }

    pub fn diag_mut(&mut self) -> &mut D {
        &mut self.diag
    }
}
