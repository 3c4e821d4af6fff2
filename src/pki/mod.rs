//! Certificate authority material for admission webhook TLS
//!
//! The controller only needs a narrow slice of PKI: generate a self-signed
//! CA, read one back from its PEM encoding, and tell how long it has left.
//! Leaf certificates are issued elsewhere.
//!
//! # Storage layout
//!
//! A CA is persisted in a Secret under two fixed keys:
//! - [`CA_CERT_KEY`] - PEM certificate, also distributed as the webhook CA bundle
//! - [`CA_KEY_KEY`] - PEM private key

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::ByteString;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyPair,
    KeyUsagePurpose,
};
use thiserror::Error;
use time::OffsetDateTime;
use x509_parser::prelude::{FromDer, X509Certificate};

#[cfg(test)]
use mockall::automock;

/// Secret key holding the PEM-encoded CA certificate
pub const CA_CERT_KEY: &str = "ca.crt";

/// Secret key holding the PEM-encoded CA private key
pub const CA_KEY_KEY: &str = "ca.key";

/// Default CA validity (one year)
pub const DEFAULT_CA_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Longest CA validity accepted (100 years)
pub const MAX_CA_VALIDITY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// PKI errors
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate generation failed
    #[error("certificate generation failed: {0}")]
    CertificateGenerationFailed(String),

    /// Key generation failed
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Certificate parsing error
    #[error("certificate parsing error: {0}")]
    ParseError(String),

    /// CA is past its notAfter
    #[error("CA expired at {not_after}")]
    Expired {
        /// Expiry of the CA certificate
        not_after: OffsetDateTime,
    },
}

/// Result type for PKI operations
pub type Result<T> = std::result::Result<T, PkiError>;

/// Parse PEM-encoded data and return the DER bytes
pub fn parse_pem(pem_data: &str) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data.as_bytes())
        .map_err(|e| PkiError::ParseError(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Source of the current time
///
/// Injected so reconciliation can be evaluated at fixed instants in tests.
pub trait Clock: Send + Sync {
    /// Current time in UTC
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A CA key pair with its certificate and validity window
#[derive(Clone, PartialEq)]
pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Load a CA from PEM, validating both halves and reading its validity
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        KeyPair::from_pem(key_pem)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA key: {}", e)))?;

        let der = parse_pem(cert_pem)?;
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| PkiError::ParseError(format!("failed to parse CA cert: {}", e)))?;
        let validity = cert.validity();

        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            not_before: validity.not_before.to_datetime(),
            not_after: validity.not_after.to_datetime(),
        })
    }

    /// Read a CA out of Secret data
    ///
    /// Returns `Ok(None)` when either key is absent or empty: there is no CA
    /// yet and one must be generated. Present but undecodable material is an
    /// error, since overwriting it silently would hide a corrupted Secret.
    pub fn from_secret_data(data: Option<&BTreeMap<String, ByteString>>) -> Result<Option<Self>> {
        let Some(data) = data else {
            return Ok(None);
        };
        let (Some(cert), Some(key)) = (data.get(CA_CERT_KEY), data.get(CA_KEY_KEY)) else {
            return Ok(None);
        };
        if cert.0.is_empty() || key.0.is_empty() {
            return Ok(None);
        }

        let cert_pem = std::str::from_utf8(&cert.0)
            .map_err(|e| PkiError::ParseError(format!("CA cert is not UTF-8: {}", e)))?;
        let key_pem = std::str::from_utf8(&key.0)
            .map_err(|e| PkiError::ParseError(format!("CA key is not UTF-8: {}", e)))?;

        Self::from_pem(cert_pem, key_pem).map(Some)
    }

    /// Secret data for persisting this CA
    pub fn to_secret_data(&self) -> BTreeMap<String, ByteString> {
        BTreeMap::from([
            (
                CA_CERT_KEY.to_string(),
                ByteString(self.cert_pem.as_bytes().to_vec()),
            ),
            (
                CA_KEY_KEY.to_string(),
                ByteString(self.key_pem.as_bytes().to_vec()),
            ),
        ])
    }

    /// Get the CA certificate in PEM format
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Get the CA private key in PEM format
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Bundle handed to webhook clients so they trust certs signed by this CA
    pub fn ca_bundle(&self) -> &[u8] {
        self.cert_pem.as_bytes()
    }

    /// Start of the validity window, i.e. the whole-second issuance instant
    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    /// Expiry of the CA certificate
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// Time left until expiry, or [`PkiError::Expired`] once `now >= notAfter`
    pub fn expires_in(&self, now: OffsetDateTime) -> Result<Duration> {
        let remaining = self.not_after - now;
        if remaining <= time::Duration::ZERO {
            return Err(PkiError::Expired {
                not_after: self.not_after,
            });
        }
        Ok(remaining.unsigned_abs())
    }
}

/// Produces fresh CAs on demand
#[cfg_attr(test, automock)]
pub trait CaGenerator: Send + Sync {
    /// Generate a new CA valid from `now`
    fn generate(&self, now: OffsetDateTime) -> Result<CertificateAuthority>;
}

/// Self-signed CA generator backed by rcgen
#[derive(Debug, Clone)]
pub struct RcgenCaGenerator {
    common_name: String,
    organization: String,
    validity: Duration,
}

impl RcgenCaGenerator {
    /// Create a generator issuing CAs with the given subject and validity
    pub fn new(
        common_name: impl Into<String>,
        organization: impl Into<String>,
        validity: Duration,
    ) -> Self {
        Self {
            common_name: common_name.into(),
            organization: organization.into(),
            validity,
        }
    }
}

impl CaGenerator for RcgenCaGenerator {
    fn generate(&self, now: OffsetDateTime) -> Result<CertificateAuthority> {
        // X.509 validity has second precision
        let not_before = now.replace_nanosecond(0).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("invalid generation time: {}", e))
        })?;
        let validity = time::Duration::try_from(self.validity).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("validity out of range: {}", e))
        })?;
        let not_after = not_before.checked_add(validity).ok_or_else(|| {
            PkiError::CertificateGenerationFailed(format!(
                "validity of {}s from {} overflows the X.509 time range",
                self.validity.as_secs(),
                not_before
            ))
        })?;

        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(self.common_name.clone()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(self.organization.clone()),
        );
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = not_before;
        params.not_after = not_after;

        let key_pair = KeyPair::generate().map_err(|e| {
            PkiError::KeyGenerationFailed(format!("failed to generate CA key: {}", e))
        })?;

        let cert = params.self_signed(&key_pair).map_err(|e| {
            PkiError::CertificateGenerationFailed(format!("failed to create CA cert: {}", e))
        })?;

        Ok(CertificateAuthority {
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            not_before,
            not_after,
        })
    }
}
