//! Key-block slicing and session-key installation.
//!
//! The key block derived under its provider handle is never read by the
//! engine; each segment is a partial element copy into the destination
//! key handle followed by set-valid. Layouts by streaming profile
//! (client = TX):
//!
//! ```text
//! BlockMac:   [TX MAC][RX MAC][TX cipher][RX cipher]
//! Aead:       [TX cipher][RX cipher][TX IV][RX IV]
//! NullCipher: [TX MAC][RX MAC]
//! ```

use crate::config::KeyHandles;
use crate::provider::CryptoProvider;
use crate::suite::{StreamingMode, SuiteParams};
use ticktls_types::{KeyElement, KeyId, TlsError};

struct Segment {
    dst: KeyId,
    element: KeyElement,
    len: usize,
}

fn layout(keys: &KeyHandles, params: &SuiteParams) -> Vec<Segment> {
    let mac = |dst| Segment {
        dst,
        element: KeyElement::Secret,
        len: params.mac_key_len,
    };
    let cipher = |dst| Segment {
        dst,
        element: KeyElement::Secret,
        len: params.cipher_key_len,
    };
    let iv = |dst| Segment {
        dst,
        element: KeyElement::Iv,
        len: params.fixed_iv_len,
    };
    match params.mode {
        StreamingMode::BlockMac => vec![
            mac(keys.tx_mac),
            mac(keys.rx_mac),
            cipher(keys.tx_cipher),
            cipher(keys.rx_cipher),
        ],
        StreamingMode::Aead => vec![
            cipher(keys.tx_cipher),
            cipher(keys.rx_cipher),
            iv(keys.tx_iv),
            iv(keys.rx_iv),
        ],
        StreamingMode::NullCipher => vec![mac(keys.tx_mac), mac(keys.rx_mac)],
    }
}

/// Slice the key block into the session key handles.
///
/// Every segment is attempted even after a failure; a failed copy leaves
/// its destination invalid and fails the installation as a whole.
pub fn install_session_keys(
    provider: &mut dyn CryptoProvider,
    keys: &KeyHandles,
    params: &SuiteParams,
) -> Result<(), TlsError> {
    let mut offset = 0;
    let mut first_failure = None;
    for segment in layout(keys, params) {
        provider.key_clear(segment.dst);
        let copied = provider.key_element_copy_partial(
            keys.key_block,
            KeyElement::Secret,
            offset,
            segment.dst,
            segment.element,
            0,
            segment.len,
        );
        let installed = copied.and_then(|()| provider.key_set_valid(segment.dst));
        if let Err(err) = installed {
            // Destination stays invalid; keep going so every defect is
            // attempted and the first cause is reported.
            provider.key_clear(segment.dst);
            first_failure.get_or_insert(err);
        }
        offset += segment.len;
    }
    match first_failure {
        None => Ok(()),
        Some(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::software::SoftwareProvider;
    use crate::suite::{suite_params, CipherSuite};

    fn provider_with_key_block(len: usize) -> (SoftwareProvider, KeyHandles) {
        let keys = KeyHandles::sequential(1);
        let mut provider = SoftwareProvider::new();
        let block: Vec<u8> = (0..len as u8).collect();
        provider
            .key_element_set(keys.key_block, KeyElement::Secret, &block)
            .unwrap();
        provider.key_set_valid(keys.key_block).unwrap();
        (provider, keys)
    }

    #[test]
    fn test_aead_profile_installs_cipher_and_iv_keys() {
        let params = suite_params(CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256).unwrap();
        let (mut provider, keys) = provider_with_key_block(params.key_block_len());
        install_session_keys(&mut provider, &keys, &params).unwrap();

        assert!(provider.key_is_valid(keys.tx_cipher));
        assert!(provider.key_is_valid(keys.rx_cipher));
        assert!(provider.key_is_valid(keys.tx_iv));
        assert!(provider.key_is_valid(keys.rx_iv));
        // No MAC keys in the AEAD layout.
        assert!(!provider.key_is_valid(keys.tx_mac));
        assert!(!provider.key_is_valid(keys.rx_mac));
    }

    #[test]
    fn test_block_mac_profile_installs_mac_then_cipher_keys() {
        let params = suite_params(CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256).unwrap();
        let (mut provider, keys) = provider_with_key_block(params.key_block_len());
        install_session_keys(&mut provider, &keys, &params).unwrap();

        assert!(provider.key_is_valid(keys.tx_mac));
        assert!(provider.key_is_valid(keys.rx_mac));
        assert!(provider.key_is_valid(keys.tx_cipher));
        assert!(provider.key_is_valid(keys.rx_cipher));
        assert!(!provider.key_is_valid(keys.tx_iv));
    }

    #[test]
    fn test_null_cipher_profile_installs_mac_keys_only() {
        let params = suite_params(CipherSuite::TLS_ECDHE_ECDSA_WITH_NULL_SHA).unwrap();
        let (mut provider, keys) = provider_with_key_block(params.key_block_len());
        install_session_keys(&mut provider, &keys, &params).unwrap();

        assert!(provider.key_is_valid(keys.tx_mac));
        assert!(provider.key_is_valid(keys.rx_mac));
        assert!(!provider.key_is_valid(keys.tx_cipher));
        assert!(!provider.key_is_valid(keys.rx_cipher));
    }

    #[test]
    fn test_short_key_block_fails_without_valid_keys() {
        let params = suite_params(CipherSuite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256).unwrap();
        // One byte short: the final segment copy must fail.
        let (mut provider, keys) = provider_with_key_block(params.key_block_len() - 1);
        assert!(install_session_keys(&mut provider, &keys, &params).is_err());
        // The failed destination was never marked valid.
        assert!(!provider.key_is_valid(keys.rx_iv));
        // Earlier segments still installed.
        assert!(provider.key_is_valid(keys.tx_cipher));
    }
}
