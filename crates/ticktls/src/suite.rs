//! Cipher suites, named curves, signature schemes, and cipher workers.
//!
//! A cipher worker is a statically configured (suite, curve) pairing.
//! Negotiation is two-phase: the suite is fixed at ServerHello, but the
//! active worker is only selected once the leaf certificate's curve is
//! known, which is what allows multiple curves to share one suite code
//! point.

/// TLS cipher suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    pub const TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02B);
    pub const TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256: Self = Self(0xC023);
    pub const TLS_ECDHE_ECDSA_WITH_NULL_SHA: Self = Self(0xC006);
    pub const TLS_ECDH_ECDSA_WITH_AES_128_GCM_SHA256: Self = Self(0xC02D);
    pub const TLS_PSK_WITH_AES_128_GCM_SHA256: Self = Self(0x00A8);
    pub const TLS_PSK_WITH_AES_128_CBC_SHA256: Self = Self(0x00AE);
    pub const TLS_PSK_WITH_NULL_SHA256: Self = Self(0x00B0);
}

/// Named elliptic curve (RFC 8422 NamedCurve registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamedCurve(pub u16);

impl NamedCurve {
    pub const SECP256R1: Self = Self(0x0017);
    pub const SECP384R1: Self = Self(0x0018);

    /// Length of one field element (coordinate) in bytes.
    pub fn coordinate_len(&self) -> usize {
        match *self {
            NamedCurve::SECP384R1 => 48,
            _ => 32,
        }
    }

    /// Length of an uncompressed point including the 0x04 format byte.
    pub fn point_len(&self) -> usize {
        1 + 2 * self.coordinate_len()
    }
}

/// Signature-and-hash algorithm identifier (RFC 5246 §7.4.1.4.1 pair,
/// big-endian packed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
    pub const ECDSA_SECP256R1_SHA256: Self = Self(0x0403);
    pub const ECDSA_SECP384R1_SHA384: Self = Self(0x0503);
}

/// Key exchange method implied by the negotiated suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeMethod {
    /// Ephemeral ECDH, server parameters signed in ServerKeyExchange.
    Ecdhe,
    /// Static ECDH against the certificate key; no ServerKeyExchange.
    Ecdh,
    /// Pre-shared key; ServerKeyExchange (if present) carries a hint only.
    Psk,
}

impl KeyExchangeMethod {
    pub fn uses_certificate(&self) -> bool {
        !matches!(self, KeyExchangeMethod::Psk)
    }
}

/// Cipher streaming mode, selecting the key-block install profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingMode {
    /// Block cipher with a separate MAC key (e.g. AES-128-CBC + HMAC).
    BlockMac,
    /// Authenticated cipher, implicit IV from the key block.
    Aead,
    /// NULL cipher, MAC keys only (debug/test profile).
    NullCipher,
}

/// Per-suite parameters driving key derivation and installation.
#[derive(Debug, Clone, Copy)]
pub struct SuiteParams {
    pub key_exchange: KeyExchangeMethod,
    pub mode: StreamingMode,
    pub mac_key_len: usize,
    pub cipher_key_len: usize,
    pub fixed_iv_len: usize,
}

impl SuiteParams {
    /// Total key-block length for this profile's layout.
    pub fn key_block_len(&self) -> usize {
        match self.mode {
            StreamingMode::BlockMac => 2 * self.mac_key_len + 2 * self.cipher_key_len,
            StreamingMode::Aead => 2 * self.cipher_key_len + 2 * self.fixed_iv_len,
            StreamingMode::NullCipher => 2 * self.mac_key_len,
        }
    }
}

/// Look up the parameters of a supported suite.
pub fn suite_params(suite: CipherSuite) -> Option<SuiteParams> {
    let params = match suite {
        CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => SuiteParams {
            key_exchange: KeyExchangeMethod::Ecdhe,
            mode: StreamingMode::Aead,
            mac_key_len: 0,
            cipher_key_len: 16,
            fixed_iv_len: 4,
        },
        CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256 => SuiteParams {
            key_exchange: KeyExchangeMethod::Ecdhe,
            mode: StreamingMode::BlockMac,
            mac_key_len: 32,
            cipher_key_len: 16,
            fixed_iv_len: 0,
        },
        CipherSuite::TLS_ECDHE_ECDSA_WITH_NULL_SHA => SuiteParams {
            key_exchange: KeyExchangeMethod::Ecdhe,
            mode: StreamingMode::NullCipher,
            mac_key_len: 20,
            cipher_key_len: 0,
            fixed_iv_len: 0,
        },
        CipherSuite::TLS_ECDH_ECDSA_WITH_AES_128_GCM_SHA256 => SuiteParams {
            key_exchange: KeyExchangeMethod::Ecdh,
            mode: StreamingMode::Aead,
            mac_key_len: 0,
            cipher_key_len: 16,
            fixed_iv_len: 4,
        },
        CipherSuite::TLS_PSK_WITH_AES_128_GCM_SHA256 => SuiteParams {
            key_exchange: KeyExchangeMethod::Psk,
            mode: StreamingMode::Aead,
            mac_key_len: 0,
            cipher_key_len: 16,
            fixed_iv_len: 4,
        },
        CipherSuite::TLS_PSK_WITH_AES_128_CBC_SHA256 => SuiteParams {
            key_exchange: KeyExchangeMethod::Psk,
            mode: StreamingMode::BlockMac,
            mac_key_len: 32,
            cipher_key_len: 16,
            fixed_iv_len: 0,
        },
        CipherSuite::TLS_PSK_WITH_NULL_SHA256 => SuiteParams {
            key_exchange: KeyExchangeMethod::Psk,
            mode: StreamingMode::NullCipher,
            mac_key_len: 32,
            cipher_key_len: 0,
            fixed_iv_len: 0,
        },
        _ => return None,
    };
    Some(params)
}

/// One statically configured (suite, curve) pairing usable by a
/// connection. For PSK suites the curve field is unused.
#[derive(Debug, Clone, Copy)]
pub struct CipherWorker {
    pub suite: CipherSuite,
    pub curve: NamedCurve,
    pub signature_algorithm: SignatureScheme,
}
