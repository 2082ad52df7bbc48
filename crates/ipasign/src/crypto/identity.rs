//! Certificate / provisioning profile compatibility checks.
//!
//! A mismatch is never fatal. The pipeline logs it and carries on, so ad-hoc
//! and self-signed workflows are not blocked by strict validation.

use super::{CertificateInfo, ProvisionInfo};
use serde::Serialize;
use tracing::warn;

/// Outcome of comparing a signing identity with a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    pub team_matches: bool,
    pub certificate_valid: bool,
    pub provision_valid: bool,
    /// The certificate is one of the profile's `DeveloperCertificates`.
    ///
    /// Informational only; does not feed [`MatchReport::matches`].
    pub certificate_embedded: bool,
}

impl MatchReport {
    /// Compare `cert` against `provision`, logging each failed check.
    pub fn evaluate(cert: &CertificateInfo, provision: &ProvisionInfo) -> Self {
        let team_matches = cert.team_id == provision.team_id;
        if !team_matches {
            warn!(
                certificate_team = %cert.team_id,
                provision_team = %provision.team_id,
                "Team ID mismatch between certificate and provisioning profile"
            );
        }

        if !cert.is_valid {
            warn!(not_after = %cert.not_after, "Certificate is outside its validity window");
        }

        if !provision.is_valid {
            warn!(expiration = %provision.expiration_date, "Provisioning profile has expired");
        }

        let certificate_embedded = provision
            .certificate_fingerprints
            .iter()
            .any(|fp| fp == &cert.fingerprint);

        Self {
            team_matches,
            certificate_valid: cert.is_valid,
            provision_valid: provision.is_valid,
            certificate_embedded,
        }
    }

    /// Team IDs agree and both artifacts are within their validity windows.
    pub fn matches(&self) -> bool {
        self.team_matches && self.certificate_valid && self.provision_valid
    }
}

/// Whether `cert` may be used with `provision`.
///
/// Pure predicate; failed checks are logged as warnings.
pub fn matches(cert: &CertificateInfo, provision: &ProvisionInfo) -> bool {
    MatchReport::evaluate(cert, provision).matches()
}
