//! `Info.plist` rewriting and optional component removal.

use crate::engine::SigningOptions;
use crate::ipa::INFO_PLIST;
use crate::plist_codec::{self, PlistFormat};
use crate::{Error, Result};
use plist::{Dictionary, Value};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `Info.plist` keys that tie the app to a Watch companion.
const WATCH_KEYS: &[&str] = &["WKWatchKitApp", "WKCompanionAppBundleIdentifier"];

/// Bundle sub-directories holding app extensions.
const EXTENSION_DIRS: &[&str] = &["PlugIns", "Extensions"];

/// Bundle sub-directory holding an embedded Watch app.
const WATCH_DIR: &str = "Watch";

/// Metadata read back from `Info.plist` after mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub bundle_id: Option<String>,
    /// `CFBundleDisplayName`, falling back to `CFBundleName`.
    pub bundle_name: Option<String>,
    pub bundle_version: Option<String>,
    pub short_version: Option<String>,
    pub minimum_os_version: Option<String>,
    pub executable: Option<String>,
}

impl BundleMetadata {
    fn from_info(dict: &Dictionary) -> Self {
        let get = |key: &str| {
            plist_codec::get_string(dict, key)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            bundle_id: get("CFBundleIdentifier"),
            bundle_name: get("CFBundleDisplayName").or_else(|| get("CFBundleName")),
            bundle_version: get("CFBundleVersion"),
            short_version: get("CFBundleShortVersionString"),
            minimum_os_version: get("MinimumOSVersion"),
            executable: get("CFBundleExecutable"),
        }
    }
}

/// Applies [`SigningOptions`] to an extracted `.app` directory.
pub struct BundleMutator {
    bundle_path: PathBuf,
}

impl BundleMutator {
    pub fn new(bundle_path: impl AsRef<Path>) -> Self {
        Self {
            bundle_path: bundle_path.as_ref().to_path_buf(),
        }
    }

    pub fn bundle_path(&self) -> &Path {
        &self.bundle_path
    }

    fn info_plist_path(&self) -> PathBuf {
        self.bundle_path.join(INFO_PLIST)
    }

    /// Decode the bundle's `Info.plist` together with its on-disk format.
    pub fn read_info(&self) -> Result<(Dictionary, PlistFormat)> {
        let path = self.info_plist_path();
        let data = fs::read(&path).map_err(|e| {
            Error::InvalidPackage(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let format = PlistFormat::detect(&data);
        let dict = plist_codec::parse_dictionary(&data)?;
        Ok((dict, format))
    }

    /// Rewrite `Info.plist` and drop optional components.
    ///
    /// Only overrides that are set are written; unset overrides leave the
    /// existing value in place. The plist is written back in the format it
    /// was read in. Returns the metadata as it reads after the rewrite.
    pub fn apply(&self, options: &SigningOptions) -> Result<BundleMetadata> {
        let (mut info, format) = self.read_info()?;

        if let Some(ref bundle_id) = options.bundle_id {
            set_string(&mut info, "CFBundleIdentifier", bundle_id);
            info!(%bundle_id, "Changed bundle identifier");
        }

        if let Some(ref name) = options.bundle_name {
            set_string(&mut info, "CFBundleDisplayName", name);
            set_string(&mut info, "CFBundleName", name);
            info!(%name, "Changed bundle name");
        }

        if let Some(ref version) = options.bundle_version {
            set_string(&mut info, "CFBundleVersion", version);
            set_string(&mut info, "CFBundleShortVersionString", version);
            info!(%version, "Changed bundle version");
        }

        if let Some(ref minimum_os) = options.minimum_os_version {
            set_string(&mut info, "MinimumOSVersion", minimum_os);
            info!(%minimum_os, "Changed minimum OS version");
        }

        if options.remove_watch {
            for key in WATCH_KEYS {
                info.remove(key);
            }
            self.remove_dir(WATCH_DIR)?;
            info!("Removed Watch support");
        }

        if options.remove_supported_devices {
            info.remove("UISupportedDevices");
        }

        if options.enable_documents {
            info.insert("UIFileSharingEnabled".into(), Value::Boolean(true));
            info.insert("UISupportsDocumentBrowser".into(), Value::Boolean(true));
        }

        if options.remove_extensions {
            for dir in EXTENSION_DIRS {
                self.remove_dir(dir)?;
            }
            info!("Removed app extensions");
        }

        let bytes = plist_codec::serialize(&Value::Dictionary(info.clone()), format)?;
        fs::write(self.info_plist_path(), bytes)?;
        debug!(path = %self.info_plist_path().display(), "Updated Info.plist");

        Ok(BundleMetadata::from_info(&info))
    }

    fn remove_dir(&self, name: &str) -> Result<()> {
        let path = self.bundle_path.join(name);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
            debug!(path = %path.display(), "Removed directory");
        }
        Ok(())
    }
}

fn set_string(dict: &mut Dictionary, key: &str, value: &str) {
    dict.insert(key.to_string(), Value::String(value.to_string()));
}
