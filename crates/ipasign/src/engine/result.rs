//! Output of a successful signing run.

use crate::crypto::{CertificateSummary, MatchReport, ProvisionInfo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

pub const DEFAULT_BUNDLE_NAME: &str = "Signed App";
pub const DEFAULT_BUNDLE_ID: &str = "com.example.signedapp";
pub const DEFAULT_BUNDLE_VERSION: &str = "1.0.0";

/// Metadata reported for the signed app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub bundle_name: String,
    pub bundle_id: String,
    pub bundle_version: String,
    pub file_size: u64,
    pub signed_at: DateTime<Utc>,
}

impl ResultMetadata {
    /// Resolve each field from the first present source.
    ///
    /// `from_bundle` is what `Info.plist` reads after mutation, `from_request`
    /// what the caller submitted; defaults fill whatever is left.
    pub fn resolve(
        from_bundle: [Option<&str>; 3],
        from_request: [Option<&str>; 3],
        file_size: u64,
        signed_at: DateTime<Utc>,
    ) -> Self {
        let pick = |i: usize, default: &str| {
            from_bundle[i]
                .or(from_request[i])
                .unwrap_or(default)
                .to_string()
        };

        Self {
            bundle_name: pick(0, DEFAULT_BUNDLE_NAME),
            bundle_id: pick(1, DEFAULT_BUNDLE_ID),
            bundle_version: pick(2, DEFAULT_BUNDLE_VERSION),
            file_size,
            signed_at,
        }
    }
}

/// Everything a caller needs to fetch and install the signed archive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningResult {
    /// Server-relative download path, `/jobs/{jobId}/output/{file}`.
    pub signed_ipa_url: String,
    /// `itms-services://` link pointing at the job's manifest.
    pub install_link: String,
    pub metadata: ResultMetadata,
    /// Hex SHA-256 of the output archive.
    pub sha256: String,
    pub binaries_signed: usize,
    pub certificate: CertificateSummary,
    pub provision: ProvisionInfo,
    pub identity_match: MatchReport,
    #[serde(skip)]
    pub output_path: PathBuf,
    #[serde(skip)]
    pub file_name: String,
}
