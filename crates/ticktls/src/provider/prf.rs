//! TLS 1.2 PRF (RFC 5246 §5) over HMAC-SHA256.
//!
//! ```text
//! PRF(secret, label, seed) = P_SHA256(secret, label + seed)
//!
//! P_hash(secret, seed) = HMAC_hash(secret, A(1) + seed) ||
//!                        HMAC_hash(secret, A(2) + seed) || ...
//! A(0) = seed
//! A(i) = HMAC_hash(secret, A(i-1))
//! ```

use hmac::{Hmac, Mac};
use sha2::Sha256;
use ticktls_types::ProviderError;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(secret: &[u8], data: &[&[u8]]) -> Result<[u8; 32], ProviderError> {
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| ProviderError::JobStateMismatch)?;
    for part in data {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Derive `out.len()` bytes from `secret`, `label`, and `seed`.
pub fn prf_sha256(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    out: &mut [u8],
) -> Result<(), ProviderError> {
    // A(0) = label + seed
    let mut a = hmac_sha256(secret, &[label.as_bytes(), seed])?;

    let mut written = 0;
    while written < out.len() {
        let mut block = hmac_sha256(secret, &[a.as_slice(), label.as_bytes(), seed])?;
        let take = (out.len() - written).min(block.len());
        out[written..written + take].copy_from_slice(&block[..take]);
        written += take;
        block.zeroize();

        a = hmac_sha256(secret, &[a.as_slice()])?;
    }
    a.zeroize();
    Ok(())
}
