//! Software reference implementation of the crypto provider.
//!
//! Backed by `sha2`/`hmac` for hashing and the PRF, `p256` for ECDH and
//! ECDSA, and `getrandom` for randomness. Key material lives in an
//! in-memory key store keyed by opaque handles; every entry is scrubbed
//! on removal and drop.

use std::collections::HashMap;

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{FieldBytes, NonZeroScalar, PublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use super::{CryptoProvider, VerifyOutcome};
use crate::provider::prf::prf_sha256;
use crate::suite::NamedCurve;
use ticktls_types::{CryptoMode, JobId, KeyElement, KeyId, ProviderError};

/// One key-store entry: elements plus the valid mark.
#[derive(Default)]
struct KeyEntry {
    elements: HashMap<KeyElement, Vec<u8>>,
    valid: bool,
}

impl Drop for KeyEntry {
    fn drop(&mut self) {
        for material in self.elements.values_mut() {
            material.zeroize();
        }
    }
}

/// Streaming state accumulated under a job handle.
enum JobState {
    Hash(Sha256),
    /// Signature jobs buffer their input; p256 hashes internally at the
    /// final call.
    Collect(Vec<u8>),
}

impl Drop for JobState {
    fn drop(&mut self) {
        if let JobState::Collect(data) = self {
            data.zeroize();
        }
    }
}

/// In-memory software crypto provider.
#[derive(Default)]
pub struct SoftwareProvider {
    keys: HashMap<KeyId, KeyEntry>,
    jobs: HashMap<JobId, JobState>,
}

impl SoftwareProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn element(&self, key: KeyId, element: KeyElement) -> Result<&[u8], ProviderError> {
        let entry = self.keys.get(&key).ok_or(ProviderError::UnknownKey(key))?;
        entry
            .elements
            .get(&element)
            .map(Vec::as_slice)
            .ok_or(ProviderError::ElementMissing(key))
    }

    fn valid_element(&self, key: KeyId, element: KeyElement) -> Result<&[u8], ProviderError> {
        let entry = self.keys.get(&key).ok_or(ProviderError::UnknownKey(key))?;
        if !entry.valid {
            return Err(ProviderError::KeyNotValid(key));
        }
        entry
            .elements
            .get(&element)
            .map(Vec::as_slice)
            .ok_or(ProviderError::ElementMissing(key))
    }

    fn store(&mut self, key: KeyId, element: KeyElement, material: Vec<u8>, valid: bool) {
        let entry = self.keys.entry(key).or_default();
        if let Some(mut old) = entry.elements.insert(element, material) {
            old.zeroize();
        }
        entry.valid = valid;
    }

    /// Collect streamed bytes for a signature job, returning the full
    /// message on the final call.
    fn collect_job(
        &mut self,
        job: JobId,
        mode: CryptoMode,
        data: &[u8],
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        match mode {
            CryptoMode::SingleCall => Ok(Some(data.to_vec())),
            CryptoMode::Start => {
                self.jobs.insert(job, JobState::Collect(data.to_vec()));
                Ok(None)
            }
            CryptoMode::Update => match self.jobs.get_mut(&job) {
                Some(JobState::Collect(buf)) => {
                    buf.extend_from_slice(data);
                    Ok(None)
                }
                Some(_) => Err(ProviderError::JobStateMismatch),
                None => Err(ProviderError::UnknownJob(job)),
            },
            CryptoMode::Finish => match self.jobs.remove(&job) {
                Some(JobState::Collect(ref buf)) => {
                    let mut message = buf.clone();
                    message.extend_from_slice(data);
                    Ok(Some(message))
                }
                Some(_) => Err(ProviderError::JobStateMismatch),
                None => Err(ProviderError::UnknownJob(job)),
            },
        }
    }

    fn generate_scalar(&mut self) -> Result<NonZeroScalar, ProviderError> {
        // Rejection-sample until the bytes form a valid nonzero scalar.
        for _ in 0..64 {
            let mut bytes = FieldBytes::default();
            getrandom::getrandom(&mut bytes).map_err(|_| ProviderError::RandomFailed)?;
            let scalar = Option::<NonZeroScalar>::from(NonZeroScalar::from_repr(bytes));
            if let Some(scalar) = scalar {
                return Ok(scalar);
            }
        }
        Err(ProviderError::RandomFailed)
    }
}

impl CryptoProvider for SoftwareProvider {
    fn random(&mut self, out: &mut [u8]) -> Result<(), ProviderError> {
        getrandom::getrandom(out).map_err(|_| ProviderError::RandomFailed)
    }

    fn hash(
        &mut self,
        job: JobId,
        mode: CryptoMode,
        input: &[u8],
        out: &mut [u8],
    ) -> Result<usize, ProviderError> {
        let finish = |digest: Sha256, out: &mut [u8]| -> Result<usize, ProviderError> {
            let result = digest.finalize();
            if out.len() < result.len() {
                return Err(ProviderError::OutputTooSmall {
                    need: result.len(),
                    got: out.len(),
                });
            }
            out[..result.len()].copy_from_slice(&result);
            Ok(result.len())
        };

        match mode {
            CryptoMode::SingleCall => {
                let mut digest = Sha256::new();
                digest.update(input);
                finish(digest, out)
            }
            CryptoMode::Start => {
                let mut digest = Sha256::new();
                digest.update(input);
                self.jobs.insert(job, JobState::Hash(digest));
                Ok(0)
            }
            CryptoMode::Update => match self.jobs.get_mut(&job) {
                Some(JobState::Hash(digest)) => {
                    digest.update(input);
                    Ok(0)
                }
                Some(_) => Err(ProviderError::JobStateMismatch),
                None => Err(ProviderError::UnknownJob(job)),
            },
            CryptoMode::Finish => match self.jobs.remove(&job) {
                Some(JobState::Hash(ref mut digest)) => {
                    digest.update(input);
                    finish(digest.clone(), out)
                }
                Some(_) => Err(ProviderError::JobStateMismatch),
                None => Err(ProviderError::UnknownJob(job)),
            },
        }
    }

    fn signature_verify(
        &mut self,
        job: JobId,
        key: KeyId,
        mode: CryptoMode,
        data: &[u8],
        signature: &[u8],
    ) -> Result<VerifyOutcome, ProviderError> {
        let Some(message) = self.collect_job(job, mode, data)? else {
            return Ok(VerifyOutcome::Accepted);
        };
        let point = self.valid_element(key, KeyElement::PublicValue)?;
        let verifying_key = VerifyingKey::from_sec1_bytes(point)
            .map_err(|_| ProviderError::InvalidPublicValue)?;
        // A malformed or mismatching signature is a rejection, not a
        // provider failure.
        let Ok(sig) = Signature::from_der(signature) else {
            return Ok(VerifyOutcome::Rejected);
        };
        match verifying_key.verify(&message, &sig) {
            Ok(()) => Ok(VerifyOutcome::Accepted),
            Err(_) => Ok(VerifyOutcome::Rejected),
        }
    }

    fn signature_generate(
        &mut self,
        job: JobId,
        key: KeyId,
        mode: CryptoMode,
        data: &[u8],
        out: &mut [u8],
    ) -> Result<usize, ProviderError> {
        let Some(message) = self.collect_job(job, mode, data)? else {
            return Ok(0);
        };
        let secret = self.valid_element(key, KeyElement::Secret)?;
        if secret.len() != 32 {
            return Err(ProviderError::SignFailed);
        }
        let signing_key = SigningKey::from_bytes(FieldBytes::from_slice(secret))
            .map_err(|_| ProviderError::SignFailed)?;
        let sig: Signature = signing_key.sign(&message);
        let der = sig.to_der();
        let der_bytes = der.as_bytes();
        if out.len() < der_bytes.len() {
            return Err(ProviderError::OutputTooSmall {
                need: der_bytes.len(),
                got: out.len(),
            });
        }
        out[..der_bytes.len()].copy_from_slice(der_bytes);
        Ok(der_bytes.len())
    }

    fn key_exchange_calc_public_value(
        &mut self,
        _job: JobId,
        own: KeyId,
        curve: NamedCurve,
        out: &mut [u8],
    ) -> Result<usize, ProviderError> {
        if curve != NamedCurve::SECP256R1 {
            return Err(ProviderError::UnsupportedCurve);
        }
        let scalar = self.generate_scalar()?;
        let public = PublicKey::from_secret_scalar(&scalar);
        let point = public.to_encoded_point(false);
        let bytes = point.as_bytes();
        if out.len() < bytes.len() {
            return Err(ProviderError::OutputTooSmall {
                need: bytes.len(),
                got: out.len(),
            });
        }
        out[..bytes.len()].copy_from_slice(bytes);

        let mut repr: Vec<u8> = FieldBytes::from(scalar).to_vec();
        self.store(own, KeyElement::Secret, repr.clone(), true);
        repr.zeroize();
        Ok(bytes.len())
    }

    fn key_exchange_calc_shared_secret(
        &mut self,
        _job: JobId,
        own: KeyId,
        peer_public: &[u8],
        premaster: KeyId,
    ) -> Result<(), ProviderError> {
        let secret = self.valid_element(own, KeyElement::Secret)?;
        let scalar =
            Option::<NonZeroScalar>::from(NonZeroScalar::from_repr(*FieldBytes::from_slice(
                secret,
            )))
            .ok_or(ProviderError::ElementMissing(own))?;
        let peer = PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| ProviderError::InvalidPublicValue)?;
        let shared = p256::ecdh::diffie_hellman(scalar, peer.as_affine());
        self.store(
            premaster,
            KeyElement::Secret,
            shared.raw_secret_bytes().to_vec(),
            true,
        );
        Ok(())
    }

    fn derive_psk_premaster(
        &mut self,
        _job: JobId,
        psk: KeyId,
        premaster: KeyId,
    ) -> Result<(), ProviderError> {
        let psk_material = self.valid_element(psk, KeyElement::Secret)?;
        let n = psk_material.len();
        // RFC 4279 §2: other_secret for plain PSK is N zero bytes.
        let mut pms = Vec::with_capacity(4 + 2 * n);
        pms.extend_from_slice(&(n as u16).to_be_bytes());
        pms.extend_from_slice(&vec![0u8; n]);
        pms.extend_from_slice(&(n as u16).to_be_bytes());
        pms.extend_from_slice(psk_material);
        self.store(premaster, KeyElement::Secret, pms, true);
        Ok(())
    }

    fn tls12_prf_derive(
        &mut self,
        _job: JobId,
        secret: KeyId,
        label: &str,
        seed: &[u8],
        out_key: KeyId,
        out_len: usize,
    ) -> Result<(), ProviderError> {
        let secret_material = self.valid_element(secret, KeyElement::Secret)?;
        let mut output = vec![0u8; out_len];
        prf_sha256(secret_material, label, seed, &mut output)?;
        self.store(out_key, KeyElement::Secret, output, true);
        Ok(())
    }

    fn tls12_prf_compute(
        &mut self,
        _job: JobId,
        secret: KeyId,
        label: &str,
        seed: &[u8],
        out: &mut [u8],
    ) -> Result<(), ProviderError> {
        let secret_material = self.valid_element(secret, KeyElement::Secret)?;
        prf_sha256(secret_material, label, seed, out)
    }

    fn key_element_set(
        &mut self,
        key: KeyId,
        element: KeyElement,
        data: &[u8],
    ) -> Result<(), ProviderError> {
        let entry = self.keys.entry(key).or_default();
        if let Some(mut old) = entry.elements.insert(element, data.to_vec()) {
            old.zeroize();
        }
        Ok(())
    }

    fn key_element_copy_partial(
        &mut self,
        src: KeyId,
        src_element: KeyElement,
        src_offset: usize,
        dst: KeyId,
        dst_element: KeyElement,
        dst_offset: usize,
        length: usize,
    ) -> Result<(), ProviderError> {
        let material = self.element(src, src_element)?;
        let end = src_offset
            .checked_add(length)
            .ok_or(ProviderError::CopyRangeExceeded)?;
        if end > material.len() {
            return Err(ProviderError::CopyRangeExceeded);
        }
        let segment = material[src_offset..end].to_vec();

        let entry = self.keys.entry(dst).or_default();
        let target = entry.elements.entry(dst_element).or_default();
        if target.len() < dst_offset + length {
            target.resize(dst_offset + length, 0);
        }
        target[dst_offset..dst_offset + length].copy_from_slice(&segment);
        Ok(())
    }

    fn key_set_valid(&mut self, key: KeyId) -> Result<(), ProviderError> {
        let entry = self.keys.get_mut(&key).ok_or(ProviderError::UnknownKey(key))?;
        if entry.elements.is_empty() {
            return Err(ProviderError::ElementMissing(key));
        }
        entry.valid = true;
        Ok(())
    }

    fn key_is_valid(&self, key: KeyId) -> bool {
        self.keys.get(&key).is_some_and(|entry| entry.valid)
    }

    fn key_clear(&mut self, key: KeyId) {
        // Drop scrubs the material.
        self.keys.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: JobId = JobId(1);
    const KEY_A: KeyId = KeyId(1);
    const KEY_B: KeyId = KeyId(2);
    const KEY_C: KeyId = KeyId(3);

    #[test]
    fn test_streaming_hash_matches_single_call() {
        let mut provider = SoftwareProvider::new();
        let mut streamed = [0u8; 32];
        let mut single = [0u8; 32];

        provider
            .hash(JOB, CryptoMode::Start, b"hello ", &mut [])
            .unwrap();
        provider
            .hash(JOB, CryptoMode::Update, b"wor", &mut [])
            .unwrap();
        let n = provider
            .hash(JOB, CryptoMode::Finish, b"ld", &mut streamed)
            .unwrap();
        assert_eq!(n, 32);

        provider
            .hash(JOB, CryptoMode::SingleCall, b"hello world", &mut single)
            .unwrap();
        assert_eq!(streamed, single);
    }

    #[test]
    fn test_sign_then_verify_roundtrip() {
        let mut provider = SoftwareProvider::new();
        // Fixed signing scalar; matching public point for verification.
        let scalar_bytes = [7u8; 32];
        provider
            .key_element_set(KEY_A, KeyElement::Secret, &scalar_bytes)
            .unwrap();
        provider.key_set_valid(KEY_A).unwrap();

        let scalar = Option::<NonZeroScalar>::from(NonZeroScalar::from_repr(
            *FieldBytes::from_slice(&scalar_bytes),
        ))
        .unwrap();
        let public = PublicKey::from_secret_scalar(&scalar);
        let point = public.to_encoded_point(false);
        provider
            .key_element_set(KEY_B, KeyElement::PublicValue, point.as_bytes())
            .unwrap();
        provider.key_set_valid(KEY_B).unwrap();

        let mut sig = [0u8; 80];
        provider
            .signature_generate(JOB, KEY_A, CryptoMode::Start, b"part one ", &mut [])
            .unwrap();
        let sig_len = provider
            .signature_generate(JOB, KEY_A, CryptoMode::Finish, b"part two", &mut sig)
            .unwrap();
        assert!(sig_len > 0);

        let outcome = provider
            .signature_verify(
                JOB,
                KEY_B,
                CryptoMode::SingleCall,
                b"part one part two",
                &sig[..sig_len],
            )
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::Accepted);

        let outcome = provider
            .signature_verify(
                JOB,
                KEY_B,
                CryptoMode::SingleCall,
                b"tampered message",
                &sig[..sig_len],
            )
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::Rejected);
    }

    #[test]
    fn test_malformed_der_signature_is_rejected_not_an_error() {
        let mut provider = SoftwareProvider::new();
        let scalar = Option::<NonZeroScalar>::from(NonZeroScalar::from_repr(
            *FieldBytes::from_slice(&[9u8; 32]),
        ))
        .unwrap();
        let point = PublicKey::from_secret_scalar(&scalar).to_encoded_point(false);
        provider
            .key_element_set(KEY_B, KeyElement::PublicValue, point.as_bytes())
            .unwrap();
        provider.key_set_valid(KEY_B).unwrap();

        let outcome = provider
            .signature_verify(JOB, KEY_B, CryptoMode::SingleCall, b"data", &[0xFF; 8])
            .unwrap();
        assert_eq!(outcome, VerifyOutcome::Rejected);
    }

    #[test]
    fn test_ecdh_shared_secret_agreement() {
        let mut alice = SoftwareProvider::new();
        let mut bob = SoftwareProvider::new();

        let mut alice_point = [0u8; 65];
        let mut bob_point = [0u8; 65];
        alice
            .key_exchange_calc_public_value(JOB, KEY_A, NamedCurve::SECP256R1, &mut alice_point)
            .unwrap();
        bob.key_exchange_calc_public_value(JOB, KEY_A, NamedCurve::SECP256R1, &mut bob_point)
            .unwrap();

        alice
            .key_exchange_calc_shared_secret(JOB, KEY_A, &bob_point, KEY_C)
            .unwrap();
        bob.key_exchange_calc_shared_secret(JOB, KEY_A, &alice_point, KEY_C)
            .unwrap();

        // Same premaster on both sides: deriving with it must agree.
        let mut a_out = [0u8; 48];
        let mut b_out = [0u8; 48];
        alice
            .tls12_prf_compute(JOB, KEY_C, "master secret", b"seed", &mut a_out)
            .unwrap();
        bob.tls12_prf_compute(JOB, KEY_C, "master secret", b"seed", &mut b_out)
            .unwrap();
        assert_eq!(a_out, b_out);
    }

    #[test]
    fn test_unsupported_curve_rejected() {
        let mut provider = SoftwareProvider::new();
        let mut out = [0u8; 97];
        assert!(matches!(
            provider.key_exchange_calc_public_value(JOB, KEY_A, NamedCurve::SECP384R1, &mut out),
            Err(ProviderError::UnsupportedCurve)
        ));
    }

    #[test]
    fn test_psk_premaster_layout() {
        let mut provider = SoftwareProvider::new();
        provider
            .key_element_set(KEY_A, KeyElement::Secret, &[0xAA, 0xBB, 0xCC])
            .unwrap();
        provider.key_set_valid(KEY_A).unwrap();
        provider.derive_psk_premaster(JOB, KEY_A, KEY_B).unwrap();

        let pms = provider.element(KEY_B, KeyElement::Secret).unwrap();
        assert_eq!(pms, &[0, 3, 0, 0, 0, 0, 3, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_copy_partial_bounds() {
        let mut provider = SoftwareProvider::new();
        provider
            .key_element_set(KEY_A, KeyElement::Secret, &[1, 2, 3, 4])
            .unwrap();
        assert!(matches!(
            provider.key_element_copy_partial(
                KEY_A,
                KeyElement::Secret,
                2,
                KEY_B,
                KeyElement::Secret,
                0,
                3
            ),
            Err(ProviderError::CopyRangeExceeded)
        ));
        provider
            .key_element_copy_partial(KEY_A, KeyElement::Secret, 1, KEY_B, KeyElement::Secret, 0, 3)
            .unwrap();
        assert_eq!(provider.element(KEY_B, KeyElement::Secret).unwrap(), &[2, 3, 4]);
    }

    #[test]
    fn test_key_not_valid_until_marked() {
        let mut provider = SoftwareProvider::new();
        provider
            .key_element_set(KEY_A, KeyElement::Secret, &[1; 16])
            .unwrap();
        assert!(!provider.key_is_valid(KEY_A));
        assert!(matches!(
            provider.tls12_prf_compute(JOB, KEY_A, "label", b"seed", &mut [0u8; 4]),
            Err(ProviderError::KeyNotValid(_))
        ));
        provider.key_set_valid(KEY_A).unwrap();
        assert!(provider.key_is_valid(KEY_A));
    }

    #[test]
    fn test_key_clear_invalidates() {
        let mut provider = SoftwareProvider::new();
        provider
            .key_element_set(KEY_A, KeyElement::Secret, &[1; 16])
            .unwrap();
        provider.key_set_valid(KEY_A).unwrap();
        provider.key_clear(KEY_A);
        assert!(!provider.key_is_valid(KEY_A));
    }
}
