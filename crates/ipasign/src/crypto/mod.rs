//! Signing identity and provisioning profile handling.

pub mod cert;
pub mod identity;
pub mod provision;

pub use cert::{CertificateInfo, CertificateSummary};
pub use identity::MatchReport;
pub use provision::{extract_embedded_plist, ProvisionInfo};
