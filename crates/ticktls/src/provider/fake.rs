//! Scripted PKI service fake for tests.

use std::cell::Cell;
use std::collections::HashMap;

use super::{CertVerdict, OcspVerdict, PkiService};
use crate::suite::NamedCurve;
use ticktls_types::{CertId, GroupId, PkiError};

/// A PKI service whose answers are scripted by the test.
pub struct FakePki {
    pub curve: NamedCurve,
    /// Uncompressed SEC1 point reported as the leaf public key.
    pub leaf_public: Vec<u8>,
    /// Chain verification outcome per slot; `default_status` otherwise.
    pub statuses: HashMap<CertId, CertVerdict>,
    pub default_status: CertVerdict,
    pub ocsp: OcspVerdict,
    /// Number of `is_busy` polls that still report busy.
    pub busy_polls: Cell<u32>,
    /// Make `verify_group` fail at start (trust anchor missing).
    pub fail_verify_start: bool,

    pub stored: Vec<(CertId, Vec<u8>)>,
    pub verify_started: bool,
    pub cleared_groups: Vec<GroupId>,
}

impl FakePki {
    pub fn valid(leaf_public: Vec<u8>) -> Self {
        Self {
            curve: NamedCurve::SECP256R1,
            leaf_public,
            statuses: HashMap::new(),
            default_status: CertVerdict::Valid,
            ocsp: OcspVerdict::Good,
            busy_polls: Cell::new(0),
            fail_verify_start: false,
            stored: Vec::new(),
            verify_started: false,
            cleared_groups: Vec::new(),
        }
    }
}

impl PkiService for FakePki {
    fn set_certificate(&mut self, cert: CertId, der: &[u8]) -> Result<(), PkiError> {
        self.stored.push((cert, der.to_vec()));
        Ok(())
    }

    fn certificate_curve(&self, _cert: CertId) -> Result<NamedCurve, PkiError> {
        Ok(self.curve)
    }

    fn public_key(&self, _cert: CertId) -> Result<Vec<u8>, PkiError> {
        Ok(self.leaf_public.clone())
    }

    fn verify_group(&mut self, group: GroupId) -> Result<(), PkiError> {
        if self.fail_verify_start {
            return Err(PkiError::TrustAnchorMissing(group));
        }
        self.verify_started = true;
        Ok(())
    }

    fn is_busy(&self, _group: GroupId) -> bool {
        let remaining = self.busy_polls.get();
        if remaining > 0 {
            self.busy_polls.set(remaining - 1);
            return true;
        }
        false
    }

    fn certificate_status(&self, cert: CertId) -> Result<CertVerdict, PkiError> {
        Ok(self.statuses.get(&cert).copied().unwrap_or(self.default_status))
    }

    fn service_ocsp(&mut self, _cert: CertId, _response: &[u8]) -> Result<OcspVerdict, PkiError> {
        Ok(self.ocsp)
    }

    fn clear_group(&mut self, group: GroupId) -> Result<(), PkiError> {
        self.cleared_groups.push(group);
        self.stored.clear();
        Ok(())
    }
}
