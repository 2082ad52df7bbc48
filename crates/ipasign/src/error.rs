//! Error types for ipasign operations.
//!
//! This module defines the [`enum@Error`] enum covering every failure a
//! re-signing job can hit: submission validation, malformed input artifacts,
//! remote fetch failures, structurally invalid packages, and lookups against
//! the job store.
//!
//! Errors raised inside the pipeline never reach the HTTP layer directly.
//! The job runner records them on the job (`error` carries the display text,
//! `errorKind` carries [`Error::kind`]) and the job transitions to `failed`.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error

use thiserror::Error;

/// Error type for ipasign operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
///
/// # Examples
///
/// ```no_run
/// use ipasign::{crypto::CertificateInfo, Error};
///
/// let blob = std::fs::read("identity.p12")?;
/// match CertificateInfo::from_p12(&blob, "secret") {
///     Ok(info) => println!("team: {}", info.team_id),
///     Err(Error::InvalidPassword) => eprintln!("wrong password"),
///     Err(e) => eprintln!("other error: {e}"),
/// }
/// # Ok::<(), ipasign::Error>(())
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// A required submission input is missing or inconsistent.
    ///
    /// Raised synchronously by [`crate::job::JobRunner::submit`]; no job
    /// record is created when this is returned.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A property list or provisioning profile could not be decoded.
    #[error("Format error: {0}")]
    Format(String),

    /// The input is not a readable ZIP container.
    #[error("Corrupt archive: {0}")]
    CorruptArchive(#[from] zip::result::ZipError),

    /// The PKCS#12 blob is unreadable or lacks a certificate/key pair.
    #[error("Malformed certificate: {0}")]
    MalformedCertificate(String),

    /// Incorrect password for the PKCS#12 container.
    #[error("Invalid password for PKCS#12")]
    InvalidPassword,

    /// Fetching a remote IPA failed (transport error or non-2xx status).
    #[error("Download failed: {0}")]
    Download(String),

    /// The archive is a ZIP but not a usable IPA.
    ///
    /// Missing `Payload/`, missing `.app` bundle, or missing `Info.plist`.
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    /// No job with the given identifier exists (or it has no result yet).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested transition is illegal for the job's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A Mach-O binary could not be parsed while thinning.
    #[error("Invalid Mach-O: {0}")]
    MachO(String),

    /// The job was cancelled or timed out while the pipeline was running.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// I/O operation failed.
    ///
    /// Occurs when reading inputs, writing the scratch tree, or writing
    /// the output archive.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for failures that fit no other category.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable identifier for this error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Format(_) => "format",
            Error::CorruptArchive(_) => "corrupt_archive",
            Error::MalformedCertificate(_) => "malformed_certificate",
            Error::InvalidPassword => "invalid_password",
            Error::Download(_) => "download",
            Error::InvalidPackage(_) => "invalid_package",
            Error::NotFound(_) => "not_found",
            Error::InvalidState(_) => "invalid_state",
            Error::MachO(_) => "macho",
            Error::Cancelled(_) => "cancelled",
            Error::Io(_) => "io",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<plist::Error> for Error {
    fn from(e: plist::Error) -> Self {
        Error::Format(e.to_string())
    }
}
