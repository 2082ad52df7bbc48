//! Per-job inputs: uploaded files, raw request parameters, and the options
//! snapshot derived from them.

use crate::ipa::CompressionLevel;
use crate::{Error, Result};
use secrecy::SecretString;
use std::fmt;
use std::path::PathBuf;

/// Files staged on disk for one job.
#[derive(Debug, Clone, Default)]
pub struct SigningInputFiles {
    /// Uploaded IPA. Takes precedence over [`SigningParams::ipa_url`].
    pub ipa: Option<PathBuf>,
    pub p12: Option<PathBuf>,
    pub provision: Option<PathBuf>,
    /// Dynamic libraries injected into the bundle's `Tweaks/` directory.
    pub tweaks: Vec<PathBuf>,
    /// Files copied into the bundle root.
    pub resources: Vec<PathBuf>,
    pub icon: Option<PathBuf>,
    pub custom_plist: Option<PathBuf>,
    /// Entitlements document; wins over [`SigningParams::entitlements`].
    pub entitlements: Option<PathBuf>,
}

impl SigningInputFiles {
    /// Check that a job could be started from these inputs.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when the P12 or provisioning profile is missing,
    /// or there is neither an uploaded IPA nor a remote URL.
    pub fn validate(&self, params: &SigningParams) -> Result<()> {
        if self.p12.is_none() {
            return Err(Error::Validation("P12 certificate is required".into()));
        }
        if self.provision.is_none() {
            return Err(Error::Validation("Provisioning profile is required".into()));
        }
        if self.ipa.is_none() && params.ipa_url().is_none() {
            return Err(Error::Validation("IPA file or IPA URL is required".into()));
        }
        Ok(())
    }

    pub fn has_injections(&self) -> bool {
        !self.tweaks.is_empty()
            || !self.resources.is_empty()
            || self.icon.is_some()
            || self.custom_plist.is_some()
    }
}

/// Raw request parameters as received from the caller.
///
/// Empty strings are treated as absent when [`SigningOptions`] are built.
#[derive(Default)]
pub struct SigningParams {
    pub ipa_url: Option<String>,
    pub password: Option<SecretString>,
    pub bundle_id: Option<String>,
    pub bundle_name: Option<String>,
    pub bundle_version: Option<String>,
    pub minimum_os_version: Option<String>,
    /// Entitlements as JSON or plist text.
    pub entitlements: Option<String>,
    pub zip_level: Option<u32>,
    pub remove_watch: bool,
    pub remove_extensions: bool,
    pub remove_supported_devices: bool,
    pub enable_documents: bool,
    pub thin_binaries: bool,
    pub weak: bool,
    pub adhoc: bool,
    pub debug: bool,
}

impl SigningParams {
    pub fn ipa_url(&self) -> Option<&str> {
        non_empty(&self.ipa_url)
    }
}

impl fmt::Debug for SigningParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningParams")
            .field("ipa_url", &self.ipa_url)
            .field("bundle_id", &self.bundle_id)
            .field("bundle_name", &self.bundle_name)
            .field("bundle_version", &self.bundle_version)
            .field("minimum_os_version", &self.minimum_os_version)
            .field("zip_level", &self.zip_level)
            .finish_non_exhaustive()
    }
}

/// Immutable option snapshot applied to one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningOptions {
    pub bundle_id: Option<String>,
    pub bundle_name: Option<String>,
    pub bundle_version: Option<String>,
    pub minimum_os_version: Option<String>,
    pub remove_watch: bool,
    pub remove_extensions: bool,
    pub remove_supported_devices: bool,
    pub enable_documents: bool,
    pub thin_binaries: bool,
    pub weak: bool,
    pub adhoc: bool,
    pub debug: bool,
    pub custom_entitlements: Option<String>,
    pub compression_level: Option<CompressionLevel>,
}

impl SigningOptions {
    pub fn from_params(params: &SigningParams) -> Self {
        let owned = |value: &Option<String>| non_empty(value).map(str::to_string);

        Self {
            bundle_id: owned(&params.bundle_id),
            bundle_name: owned(&params.bundle_name),
            bundle_version: owned(&params.bundle_version),
            minimum_os_version: owned(&params.minimum_os_version),
            remove_watch: params.remove_watch,
            remove_extensions: params.remove_extensions,
            remove_supported_devices: params.remove_supported_devices,
            enable_documents: params.enable_documents,
            thin_binaries: params.thin_binaries,
            weak: params.weak,
            adhoc: params.adhoc,
            debug: params.debug,
            custom_entitlements: owned(&params.entitlements),
            compression_level: params.zip_level.map(CompressionLevel::new),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
