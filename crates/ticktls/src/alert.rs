//! TLS alert encoding and the error-to-alert mapping.

use ticktls_types::TlsError;

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

/// Alert description codes used by the client handshake (RFC 5246 §7.2
/// registry values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    HandshakeFailure = 40,
    UnknownCa = 48,
    DecodeError = 50,
    DecryptError = 51,
    InternalError = 80,
    BadCertificateStatusResponse = 113,
}

impl AlertDescription {
    /// Convert from u8 to AlertDescription.
    pub fn from_u8(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(AlertDescription::CloseNotify),
            10 => Ok(AlertDescription::UnexpectedMessage),
            40 => Ok(AlertDescription::HandshakeFailure),
            48 => Ok(AlertDescription::UnknownCa),
            50 => Ok(AlertDescription::DecodeError),
            51 => Ok(AlertDescription::DecryptError),
            80 => Ok(AlertDescription::InternalError),
            113 => Ok(AlertDescription::BadCertificateStatusResponse),
            _ => Err(v),
        }
    }
}

/// A TLS alert, surfaced to the transport alongside the close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub fn fatal(description: AlertDescription) -> Self {
        Self {
            level: AlertLevel::Fatal,
            description,
        }
    }

    /// Encode as the 2-byte alert record payload.
    pub fn encode(&self) -> [u8; 2] {
        [self.level as u8, self.description as u8]
    }
}

/// The fatal alert a handshake error maps to.
///
/// `Config` errors return `None`: configuration defects are a build-time
/// problem and are reported through the diagnostics sink, not on the wire.
pub fn alert_for(err: &TlsError) -> Option<AlertDescription> {
    match err {
        TlsError::Decode(_) => Some(AlertDescription::DecodeError),
        TlsError::UnexpectedMessage(_) => Some(AlertDescription::UnexpectedMessage),
        TlsError::BadCertificateStatus(_) => Some(AlertDescription::BadCertificateStatusResponse),
        TlsError::DecryptError(_) => Some(AlertDescription::DecryptError),
        TlsError::UnknownCa(_) => Some(AlertDescription::UnknownCa),
        TlsError::NoSharedCipherSuite => Some(AlertDescription::HandshakeFailure),
        TlsError::TransmitOverflow
        | TlsError::Internal(_)
        | TlsError::Provider(_)
        | TlsError::Pki(_) => Some(AlertDescription::InternalError),
        TlsError::Config(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticktls_types::{ConfigError, ProviderError};

    #[test]
    fn test_alert_encode() {
        let alert = Alert::fatal(AlertDescription::DecodeError);
        assert_eq!(alert.encode(), [2, 50]);
    }

    #[test]
    fn test_alert_description_from_u8_roundtrip() {
        for code in [0u8, 10, 40, 48, 50, 51, 80, 113] {
            let desc = AlertDescription::from_u8(code).unwrap();
            assert_eq!(desc as u8, code);
        }
        assert!(AlertDescription::from_u8(255).is_err());
    }

    #[test]
    fn test_alert_mapping() {
        assert_eq!(
            alert_for(&TlsError::Decode("x")),
            Some(AlertDescription::DecodeError)
        );
        assert_eq!(
            alert_for(&TlsError::UnexpectedMessage("x")),
            Some(AlertDescription::UnexpectedMessage)
        );
        assert_eq!(
            alert_for(&TlsError::DecryptError("x")),
            Some(AlertDescription::DecryptError)
        );
        assert_eq!(
            alert_for(&TlsError::Provider(ProviderError::RandomFailed)),
            Some(AlertDescription::InternalError)
        );
        // Configuration defects never produce a wire alert.
        assert_eq!(
            alert_for(&TlsError::Config(ConfigError::NoCipherWorker)),
            None
        );
    }
}
