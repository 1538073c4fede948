//! Connection state and the connection registry.
//!
//! One `Connection` per TCP socket engaged in TLS, held in a
//! connection-indexed slot array behind allocate/free accessors. All
//! buffers are allocated once here; nothing grows during the handshake.

use crate::alert::Alert;
use crate::buffer::HsBuffer;
use crate::config::ConnectionConfig;
use crate::dispatch::{AsyncJob, JobOutput};
use crate::handshake::{AsyncContext, HandshakeState};
use crate::provider::OcspVerdict;
use crate::record::RxMessages;
use crate::suite::{CipherSuite, CipherWorker, KeyExchangeMethod, NamedCurve};
use crate::transcript::Transcript;
use ticktls_types::{ConfigError, ConnectionId};

/// Complete per-connection handshake state.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub config: ConnectionConfig,

    pub state: HandshakeState,
    pub async_ctx: AsyncContext,
    /// The one in-flight deferred job, executed by the background tick.
    pub pending_job: Option<AsyncJob>,
    /// Result of the completed job, consumed by the state machine.
    pub job_result: Option<JobOutput>,

    pub tx: HsBuffer,
    pub rx: HsBuffer,
    /// End of the last completed TX message; the transport drains only
    /// up to here, never into a message still being built.
    pub tx_committed: usize,
    pub rx_messages: RxMessages,
    pub transcript: Transcript,

    pub client_random: [u8; 32],
    pub server_random: [u8; 32],

    /// Fixed at ServerHello.
    pub suite: Option<CipherSuite>,
    pub key_exchange: Option<KeyExchangeMethod>,
    /// Selected once the leaf certificate's curve is known (ECC), or at
    /// ServerHello (PSK).
    pub active_worker: Option<CipherWorker>,
    /// Active PSK identity table index.
    pub active_psk: Option<usize>,

    /// The server acknowledged our status_request offer.
    pub status_request_acked: bool,
    pub ocsp_verdict: Option<OcspVerdict>,

    /// Received chain: absolute `(offset, len)` per DER cert in RX,
    /// leaf first.
    pub chain_entries: Vec<(usize, usize)>,
    pub leaf_curve: Option<NamedCurve>,
    /// Server key-exchange public point (ECDHE) or certificate public
    /// key (ECDH), uncompressed SEC1.
    pub peer_kx_point: Option<Vec<u8>>,

    pub cert_request_received: bool,
    /// A non-empty client Certificate went out, so CertificateVerify
    /// must follow.
    pub client_cert_sent: bool,

    /// Client CCS produced, to be fetched by the record layer.
    pub ccs_tx_ready: bool,
    pub ccs_receivable: bool,
    pub ccs_received: bool,

    pub established: bool,
    /// Fatal alert surfaced to the transport alongside the close request.
    pub close_request: Option<Alert>,
}

impl Connection {
    pub fn new(id: ConnectionId, config: ConnectionConfig) -> Self {
        let tx = HsBuffer::new(config.tx_capacity);
        let rx = HsBuffer::new(config.rx_capacity);
        Self {
            id,
            config,
            state: HandshakeState::Idle,
            async_ctx: AsyncContext::NoAsync,
            pending_job: None,
            job_result: None,
            tx,
            rx,
            tx_committed: 0,
            rx_messages: RxMessages::default(),
            transcript: Transcript::new(),
            client_random: [0; 32],
            server_random: [0; 32],
            suite: None,
            key_exchange: None,
            active_worker: None,
            active_psk: None,
            status_request_acked: false,
            ocsp_verdict: None,
            chain_entries: Vec::new(),
            leaf_curve: None,
            peer_kx_point: None,
            cert_request_received: false,
            client_cert_sent: false,
            ccs_tx_ready: false,
            ccs_receivable: false,
            ccs_received: false,
            established: false,
            close_request: None,
        }
    }

    /// Completed TX bytes not yet drained by the transport.
    pub fn pending_transmit(&self) -> &[u8] {
        self.tx.slice(self.tx.read_pos(), self.tx_committed - self.tx.read_pos())
    }
}

/// Fixed-capacity slot array of connections. Slot index is the
/// connection id; no ambient globals.
#[derive(Debug)]
pub struct ConnectionRegistry {
    slots: Vec<Option<Connection>>,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Bind a validated configuration to a free slot.
    pub fn allocate(&mut self, config: ConnectionConfig) -> Result<ConnectionId, ConfigError> {
        let free = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(ConfigError::NoFreeConnection)?;
        let id = ConnectionId(free as u8);
        self.slots[free] = Some(Connection::new(id, config));
        Ok(id)
    }

    /// Release a slot, scrubbing its buffers.
    pub fn free(&mut self, id: ConnectionId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize) {
            if let Some(conn) = slot.as_mut() {
                conn.tx.reset();
                conn.rx.reset();
            }
            *slot = None;
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }
}
