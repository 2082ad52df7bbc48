//! PKCS#12 signing identity loading.
//!
//! Parses a `.p12` container into the signing certificate and private key
//! and extracts the identity attributes the rest of the pipeline needs:
//! Common Name, Organization, Team Identifier (the subject OU), and the
//! validity window.
//!
//! The first certificate and the first private key found in the container
//! are paired. Containers holding several identities are not disambiguated,
//! and a key that does not belong to the certificate is reported through
//! [`CertificateInfo::key_matches`] rather than rejected.
//!
//! # Examples
//!
//! ```no_run
//! use ipasign::crypto::CertificateInfo;
//!
//! let p12 = std::fs::read("identity.p12")?;
//! let info = CertificateInfo::from_p12(&p12, "password")?;
//! println!("{} ({}) valid={}", info.common_name, info.team_id, info.is_valid);
//! # Ok::<(), ipasign::Error>(())
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::x509::{X509NameRef, X509};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::fmt;

/// Placeholder for subject attributes the certificate does not carry.
pub const UNKNOWN: &str = "Unknown";

/// Signing identity decoded from a PKCS#12 container.
///
/// Read-only once built. The validity flag is computed against the clock at
/// parse time and is not re-evaluated later in the same job.
///
/// # Security
///
/// The private key is sensitive; the `Debug` impl omits it and
/// [`CertificateInfo::summary`] is the form that leaves the process.
pub struct CertificateInfo {
    /// X.509 signing certificate.
    pub certificate: X509,
    /// Private key paired with the certificate.
    pub private_key: PKey<Private>,
    /// Subject CN, or [`UNKNOWN`].
    pub common_name: String,
    /// Subject O, or [`UNKNOWN`].
    pub organization: String,
    /// Apple Team ID from the subject OU, or [`UNKNOWN`].
    pub team_id: String,
    /// Start of the validity window.
    pub not_before: DateTime<Utc>,
    /// End of the validity window.
    pub not_after: DateTime<Utc>,
    /// `not_before <= now <= not_after` at parse time.
    pub is_valid: bool,
    /// Upper-case hex SHA-1 of the certificate DER.
    pub fingerprint: String,
    /// Whether the private key matches the certificate's public key.
    pub key_matches: bool,
}

/// Serializable view of a [`CertificateInfo`], without key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSummary {
    pub common_name: String,
    pub organization: String,
    pub team_id: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_valid: bool,
    pub fingerprint: String,
}

impl CertificateInfo {
    /// Load an identity from PKCS#12 bytes.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPassword`] if the container's MAC does not verify
    ///   with `password`.
    /// - [`Error::MalformedCertificate`] if the bytes are not PKCS#12, or no
    ///   certificate/key pair is present.
    pub fn from_p12(p12_data: &[u8], password: &str) -> Result<Self> {
        let pkcs12 = Pkcs12::from_der(p12_data)
            .map_err(|e| Error::MalformedCertificate(format!("Invalid PKCS#12: {}", e)))?;

        let parsed = pkcs12.parse2(password).map_err(classify_parse_error)?;

        let certificate = parsed
            .cert
            .ok_or_else(|| Error::MalformedCertificate("No certificate in PKCS#12".into()))?;

        let private_key = parsed
            .pkey
            .ok_or_else(|| Error::MalformedCertificate("No private key in PKCS#12".into()))?;

        Self::from_parts(certificate, private_key)
    }

    /// Build from an already decoded certificate and key.
    pub fn from_parts(certificate: X509, private_key: PKey<Private>) -> Result<Self> {
        let subject = certificate.subject_name();
        let common_name = subject_entry(subject, Nid::COMMONNAME).unwrap_or_else(|| UNKNOWN.into());
        let organization =
            subject_entry(subject, Nid::ORGANIZATIONNAME).unwrap_or_else(|| UNKNOWN.into());
        let team_id =
            subject_entry(subject, Nid::ORGANIZATIONALUNITNAME).unwrap_or_else(|| UNKNOWN.into());

        let not_before = asn1_to_datetime(certificate.not_before())?;
        let not_after = asn1_to_datetime(certificate.not_after())?;
        let now = Utc::now();
        let is_valid = not_before <= now && now <= not_after;

        let der = certificate
            .to_der()
            .map_err(|e| Error::MalformedCertificate(format!("Failed to encode certificate: {}", e)))?;
        let fingerprint = sha1_fingerprint(&der);

        let key_matches = certificate
            .public_key()
            .map(|public| private_key.public_eq(&public))
            .unwrap_or(false);

        Ok(Self {
            certificate,
            private_key,
            common_name,
            organization,
            team_id,
            not_before,
            not_after,
            is_valid,
            fingerprint,
            key_matches,
        })
    }

    /// Serializable identity attributes.
    pub fn summary(&self) -> CertificateSummary {
        CertificateSummary {
            common_name: self.common_name.clone(),
            organization: self.organization.clone(),
            team_id: self.team_id.clone(),
            not_before: self.not_before,
            not_after: self.not_after,
            is_valid: self.is_valid,
            fingerprint: self.fingerprint.clone(),
        }
    }
}

impl fmt::Debug for CertificateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateInfo")
            .field("common_name", &self.common_name)
            .field("organization", &self.organization)
            .field("team_id", &self.team_id)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("is_valid", &self.is_valid)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Upper-case hex SHA-1 over DER bytes, the form Apple tooling prints.
pub fn sha1_fingerprint(der: &[u8]) -> String {
    hex::encode_upper(Sha1::digest(der))
}

/// OpenSSL reports a wrong password as a MAC verification failure.
fn classify_parse_error(stack: ErrorStack) -> Error {
    let mac_failure = stack
        .errors()
        .iter()
        .any(|e| e.reason().is_some_and(|r| r.contains("mac verify failure")));

    if mac_failure {
        Error::InvalidPassword
    } else {
        Error::MalformedCertificate(format!("Failed to parse PKCS#12: {}", stack))
    }
}

fn subject_entry(name: &X509NameRef, nid: Nid) -> Option<String> {
    name.entries_by_nid(nid)
        .find_map(|entry| entry.data().as_utf8().ok().map(|s| s.to_string()))
}

fn asn1_to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)
        .map_err(|e| Error::Internal(format!("Failed to build epoch: {}", e)))?;
    let diff = epoch
        .diff(time)
        .map_err(|e| Error::MalformedCertificate(format!("Invalid validity time: {}", e)))?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);

    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| Error::MalformedCertificate(format!("Validity time out of range: {}", time)))
}
