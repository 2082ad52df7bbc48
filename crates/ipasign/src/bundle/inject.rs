//! Provisioning, entitlements and asset injection into an extracted bundle.

use crate::crypto::ProvisionInfo;
use crate::plist_codec;
use crate::{Error, Result};
use plist::{Dictionary, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the embedded provisioning profile inside a bundle.
pub const EMBEDDED_PROVISION: &str = "embedded.mobileprovision";

/// File name of the entitlements document written next to it.
pub const ENTITLEMENTS_FILE: &str = "entitlements.plist";

/// Bundle sub-directory that receives injected dynamic libraries.
pub const TWEAKS_DIR: &str = "Tweaks";

/// Icon asset overwritten by a custom icon upload.
pub const ICON_FILE: &str = "AppIcon60x60@2x.png";

/// Copy the provisioning profile into the bundle verbatim.
pub fn install_provision(bundle: &Path, profile: &Path) -> Result<PathBuf> {
    let dest = bundle.join(EMBEDDED_PROVISION);
    fs::copy(profile, &dest)?;
    debug!(path = %dest.display(), "Installed provisioning profile");
    Ok(dest)
}

/// Minimal entitlements derived from a provisioning profile.
///
/// `get-task-allow` is only set for debug builds.
pub fn default_entitlements(provision: &ProvisionInfo, debug: bool) -> Dictionary {
    let team = &provision.team_id;

    let mut dict = Dictionary::new();
    dict.insert(
        "application-identifier".into(),
        Value::String(format!("{}.{}", team, provision.app_id)),
    );
    dict.insert(
        "com.apple.developer.team-identifier".into(),
        Value::String(team.clone()),
    );
    dict.insert("get-task-allow".into(), Value::Boolean(debug));
    dict.insert(
        "keychain-access-groups".into(),
        Value::Array(vec![Value::String(format!("{}.*", team))]),
    );
    dict
}

/// Parse a caller-supplied entitlements payload.
///
/// Accepts a plist document (XML or binary) or a JSON object.
pub fn parse_entitlements(data: &[u8]) -> Result<Dictionary> {
    let trimmed = data.trim_ascii_start();
    if trimmed.starts_with(b"{") {
        let json: serde_json::Value = serde_json::from_slice(trimmed)
            .map_err(|e| Error::Format(format!("Invalid entitlements JSON: {}", e)))?;
        return match plist_codec::from_json(&json)? {
            Value::Dictionary(dict) => Ok(dict),
            _ => Err(Error::Format("Entitlements must be a dictionary".into())),
        };
    }

    plist_codec::parse_dictionary(data)
}

/// Pick the entitlements for this job.
///
/// An uploaded entitlements file wins over the text field; an invalid
/// payload is logged and skipped. Falls back to [`default_entitlements`].
pub fn resolve_entitlements(
    custom_file: Option<&Path>,
    custom_text: Option<&str>,
    provision: &ProvisionInfo,
    debug: bool,
) -> Dictionary {
    if let Some(path) = custom_file {
        match fs::read(path)
            .map_err(Error::from)
            .and_then(|data| parse_entitlements(&data))
        {
            Ok(dict) => {
                info!(path = %path.display(), "Using custom entitlements file");
                return dict;
            }
            Err(e) => warn!(error = %e, "Ignoring invalid custom entitlements file"),
        }
    }

    if let Some(text) = custom_text.filter(|t| !t.trim().is_empty()) {
        match parse_entitlements(text.as_bytes()) {
            Ok(dict) => {
                info!("Using custom entitlements");
                return dict;
            }
            Err(e) => warn!(error = %e, "Ignoring invalid custom entitlements"),
        }
    }

    default_entitlements(provision, debug)
}

/// Serialize `entitlements` into the bundle as an XML plist.
pub fn write_entitlements(bundle: &Path, entitlements: &Dictionary) -> Result<PathBuf> {
    let dest = bundle.join(ENTITLEMENTS_FILE);
    let bytes = plist_codec::to_xml(&Value::Dictionary(entitlements.clone()))?;
    fs::write(&dest, bytes)?;
    Ok(dest)
}

/// Copy dynamic libraries into the bundle's [`TWEAKS_DIR`].
pub fn inject_tweaks(bundle: &Path, tweaks: &[PathBuf]) -> Result<Vec<PathBuf>> {
    if tweaks.is_empty() {
        return Ok(Vec::new());
    }

    let dir = bundle.join(TWEAKS_DIR);
    fs::create_dir_all(&dir)?;
    copy_into(&dir, tweaks)
}

/// Copy resource files into the bundle root.
pub fn copy_resources(bundle: &Path, resources: &[PathBuf]) -> Result<Vec<PathBuf>> {
    copy_into(bundle, resources)
}

/// Overwrite the bundle's primary icon.
pub fn install_icon(bundle: &Path, icon: &Path) -> Result<PathBuf> {
    let dest = bundle.join(ICON_FILE);
    fs::copy(icon, &dest)?;
    info!("Replaced app icon");
    Ok(dest)
}

/// Hook for a caller-supplied plist.
///
/// Accepted and checked for readability but not merged into the bundle.
pub fn apply_custom_plist(_bundle: &Path, plist: &Path) -> Result<()> {
    if !plist.is_file() {
        return Err(Error::Validation(format!(
            "Custom plist not found: {}",
            plist.display()
        )));
    }
    info!(path = %plist.display(), "Custom plist received; merging is not supported, left unchanged");
    Ok(())
}

fn copy_into(dir: &Path, files: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut copied = Vec::with_capacity(files.len());
    for file in files {
        let name = file.file_name().ok_or_else(|| {
            Error::Validation(format!("Injected path has no file name: {}", file.display()))
        })?;
        let dest = dir.join(name);
        fs::copy(file, &dest)?;
        debug!(path = %dest.display(), "Injected file");
        copied.push(dest);
    }
    Ok(copied)
}
