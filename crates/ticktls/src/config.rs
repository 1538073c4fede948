//! Per-connection static configuration.
//!
//! Everything a connection needs is bound at allocation time: the cipher
//! workers it may use, the PSK identity table, the key and job handles in
//! the crypto provider, and the remote certificate group in the PKI
//! service. The engine never invents handles at runtime.

use crate::suite::{CipherWorker, KeyExchangeMethod};
use ticktls_types::{CertId, ConfigError, GroupId, JobId, KeyId};
use zeroize::Zeroize;

/// Key handles assigned to one connection in the provider's key store.
#[derive(Debug, Clone, Copy)]
pub struct KeyHandles {
    pub premaster: KeyId,
    pub master: KeyId,
    pub key_block: KeyId,
    pub tx_mac: KeyId,
    pub rx_mac: KeyId,
    pub tx_cipher: KeyId,
    pub rx_cipher: KeyId,
    pub tx_iv: KeyId,
    pub rx_iv: KeyId,
    /// Ephemeral key-exchange key pair.
    pub own_key_exchange: KeyId,
    /// Peer leaf public key, installed from the PKI service.
    pub peer_public: KeyId,
    /// Client-authentication signing key (when client auth is configured).
    pub client_sign: KeyId,
}

impl KeyHandles {
    /// Sequential handles starting at `base`, for single-connection use.
    pub fn sequential(base: u16) -> Self {
        Self {
            premaster: KeyId(base),
            master: KeyId(base + 1),
            key_block: KeyId(base + 2),
            tx_mac: KeyId(base + 3),
            rx_mac: KeyId(base + 4),
            tx_cipher: KeyId(base + 5),
            rx_cipher: KeyId(base + 6),
            tx_iv: KeyId(base + 7),
            rx_iv: KeyId(base + 8),
            own_key_exchange: KeyId(base + 9),
            peer_public: KeyId(base + 10),
            client_sign: KeyId(base + 11),
        }
    }
}

/// Job handles assigned to one connection.
#[derive(Debug, Clone, Copy)]
pub struct JobHandles {
    pub transcript_hash: JobId,
    pub verify: JobId,
    pub sign: JobId,
    pub key_exchange: JobId,
    pub derive: JobId,
}

impl JobHandles {
    pub fn sequential(base: u16) -> Self {
        Self {
            transcript_hash: JobId(base),
            verify: JobId(base + 1),
            sign: JobId(base + 2),
            key_exchange: JobId(base + 3),
            derive: JobId(base + 4),
        }
    }
}

/// One PSK identity table entry.
#[derive(Debug, Clone)]
pub struct PskIdentity {
    /// Hint the server may send to select this identity.
    pub hint: Vec<u8>,
    /// Identity bytes sent in ClientKeyExchange.
    pub identity: Vec<u8>,
    /// Key-store handle of the PSK itself.
    pub key: KeyId,
}

impl Drop for PskIdentity {
    fn drop(&mut self) {
        self.hint.zeroize();
        self.identity.zeroize();
    }
}

/// Static configuration for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub workers: Vec<CipherWorker>,
    pub psk_identities: Vec<PskIdentity>,
    /// Fallback identity index when no hint matches.
    pub default_psk: usize,
    pub keys: KeyHandles,
    pub jobs: JobHandles,
    /// Remote certificate group; exactly one entry is valid configuration.
    pub cert_groups: Vec<GroupId>,
    /// PKI slots for the received chain, leaf first.
    pub cert_slots: Vec<CertId>,
    pub client_auth: bool,
    /// DER chain sent in the client Certificate message under client auth.
    pub client_cert_chain: Vec<Vec<u8>>,
    /// Offer the status_request extension (RFC 6066 OCSP stapling).
    pub send_status_request: bool,
    pub tx_capacity: usize,
    pub rx_capacity: usize,
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// The single configured certificate group.
    pub fn certificate_group(&self) -> GroupId {
        self.cert_groups[0]
    }

    fn has_ecc_worker(&self) -> bool {
        self.workers.iter().any(|w| {
            crate::suite::suite_params(w.suite)
                .is_some_and(|p| p.key_exchange.uses_certificate())
        })
    }

    fn has_psk_worker(&self) -> bool {
        self.workers.iter().any(|w| {
            crate::suite::suite_params(w.suite)
                .is_some_and(|p| p.key_exchange == KeyExchangeMethod::Psk)
        })
    }
}

/// Builder with defaults suitable for a single-connection engine.
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl Default for ConnectionConfigBuilder {
    fn default() -> Self {
        Self {
            config: ConnectionConfig {
                workers: Vec::new(),
                psk_identities: Vec::new(),
                default_psk: 0,
                keys: KeyHandles::sequential(1),
                jobs: JobHandles::sequential(1),
                cert_groups: vec![GroupId(1)],
                cert_slots: (1..=4).map(CertId).collect(),
                client_auth: false,
                client_cert_chain: Vec::new(),
                send_status_request: false,
                tx_capacity: 2048,
                rx_capacity: 8192,
            },
        }
    }
}

impl ConnectionConfigBuilder {
    pub fn worker(mut self, worker: CipherWorker) -> Self {
        self.config.workers.push(worker);
        self
    }

    pub fn psk_identity(mut self, identity: PskIdentity) -> Self {
        self.config.psk_identities.push(identity);
        self
    }

    pub fn default_psk(mut self, index: usize) -> Self {
        self.config.default_psk = index;
        self
    }

    pub fn keys(mut self, keys: KeyHandles) -> Self {
        self.config.keys = keys;
        self
    }

    pub fn jobs(mut self, jobs: JobHandles) -> Self {
        self.config.jobs = jobs;
        self
    }

    pub fn cert_groups(mut self, groups: Vec<GroupId>) -> Self {
        self.config.cert_groups = groups;
        self
    }

    pub fn cert_slots(mut self, slots: Vec<CertId>) -> Self {
        self.config.cert_slots = slots;
        self
    }

    pub fn client_auth(mut self, chain: Vec<Vec<u8>>) -> Self {
        self.config.client_auth = true;
        self.config.client_cert_chain = chain;
        self
    }

    pub fn send_status_request(mut self, enabled: bool) -> Self {
        self.config.send_status_request = enabled;
        self
    }

    pub fn buffer_capacity(mut self, tx: usize, rx: usize) -> Self {
        self.config.tx_capacity = tx;
        self.config.rx_capacity = rx;
        self
    }

    pub fn build(self) -> Result<ConnectionConfig, ConfigError> {
        let config = self.config;
        if config.workers.is_empty() {
            return Err(ConfigError::NoCipherWorker);
        }
        if config.has_ecc_worker() {
            if config.cert_groups.len() != 1 {
                return Err(ConfigError::CertificateGroupCount(config.cert_groups.len()));
            }
            if config.cert_slots.is_empty() {
                return Err(ConfigError::NoCertificateSlots);
            }
        }
        if config.has_psk_worker() {
            if config.psk_identities.is_empty() {
                return Err(ConfigError::NoPskIdentity);
            }
            if config.default_psk >= config.psk_identities.len() {
                return Err(ConfigError::DefaultPskOutOfRange(config.default_psk));
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::{CipherSuite, NamedCurve, SignatureScheme};

    fn ecdhe_worker() -> CipherWorker {
        CipherWorker {
            suite: CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
            curve: NamedCurve::SECP256R1,
            signature_algorithm: SignatureScheme::ECDSA_SECP256R1_SHA256,
        }
    }

    fn psk_worker() -> CipherWorker {
        CipherWorker {
            suite: CipherSuite::TLS_PSK_WITH_AES_128_GCM_SHA256,
            curve: NamedCurve::SECP256R1,
            signature_algorithm: SignatureScheme::ECDSA_SECP256R1_SHA256,
        }
    }

    #[test]
    fn test_builder_requires_a_worker() {
        assert!(matches!(
            ConnectionConfig::builder().build(),
            Err(ConfigError::NoCipherWorker)
        ));
    }

    #[test]
    fn test_builder_rejects_multiple_groups_for_ecc() {
        let result = ConnectionConfig::builder()
            .worker(ecdhe_worker())
            .cert_groups(vec![GroupId(1), GroupId(2)])
            .build();
        assert!(matches!(result, Err(ConfigError::CertificateGroupCount(2))));
    }

    #[test]
    fn test_builder_rejects_psk_without_identity_table() {
        let result = ConnectionConfig::builder().worker(psk_worker()).build();
        assert!(matches!(result, Err(ConfigError::NoPskIdentity)));
    }

    #[test]
    fn test_builder_rejects_default_psk_out_of_range() {
        let result = ConnectionConfig::builder()
            .worker(psk_worker())
            .psk_identity(PskIdentity {
                hint: vec![],
                identity: b"client".to_vec(),
                key: KeyId(20),
            })
            .default_psk(1)
            .build();
        assert!(matches!(result, Err(ConfigError::DefaultPskOutOfRange(1))));
    }

    #[test]
    fn test_builder_defaults_are_valid_for_ecdhe() {
        let config = ConnectionConfig::builder().worker(ecdhe_worker()).build().unwrap();
        assert_eq!(config.cert_groups.len(), 1);
        assert!(!config.client_auth);
        assert!(!config.send_status_request);
    }
}
