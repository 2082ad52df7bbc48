//! Mobile provisioning profile parsing.
//!
//! A `.mobileprovision` file is a CMS `SignedData` envelope whose content is
//! an XML plist. [`extract_embedded_plist`] isolates that plist by its
//! textual boundaries; the CMS signature itself is not verified, so a
//! profile is trusted as far as its bytes are.
//!
//! Profile plist keys consumed:
//!
//! | Key | Field |
//! |-----|-------|
//! | `Name` | [`ProvisionInfo::name`] |
//! | `UUID` | [`ProvisionInfo::uuid`] |
//! | `TeamIdentifier` | [`ProvisionInfo::team_id`] (string, or first array element) |
//! | `Entitlements.application-identifier` / `AppIDName` | [`ProvisionInfo::app_id`] |
//! | `ProvisionedDevices` | [`ProvisionInfo::devices`] (absent = universal) |
//! | `DeveloperCertificates` | [`ProvisionInfo::certificate_fingerprints`] |
//! | `ExpirationDate` | [`ProvisionInfo::expiration_date`] (absent = already expired) |

use crate::crypto::cert::sha1_fingerprint;
use crate::plist_codec;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};
use serde::Serialize;
use std::time::SystemTime;

const XML_DECL: &[u8] = b"<?xml";
const PLIST_OPEN: &[u8] = b"<plist";
const PLIST_CLOSE: &[u8] = b"</plist>";

/// Structured view of a provisioning profile.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionInfo {
    pub name: String,
    pub uuid: String,
    pub team_id: String,
    /// App identifier without the team prefix, e.g. `com.example.demo` or `*`.
    pub app_id: String,
    /// Human-readable App ID name.
    pub app_id_name: String,
    /// Provisioned device UDIDs; empty means the profile is not device-bound.
    pub devices: Vec<String>,
    /// Enterprise profiles that install on any device.
    pub provisions_all_devices: bool,
    pub platforms: Vec<String>,
    /// Upper-case hex SHA-1 of each embedded developer certificate.
    pub certificate_fingerprints: Vec<String>,
    #[serde(skip)]
    pub entitlements: Dictionary,
    pub creation_date: Option<DateTime<Utc>>,
    pub expiration_date: DateTime<Utc>,
    /// `now < expiration_date` at parse time.
    pub is_valid: bool,
}

impl ProvisionInfo {
    /// Parse profile bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if no embedded plist is found or it does not
    /// decode to a dictionary.
    pub fn parse(profile: &[u8]) -> Result<Self> {
        let plist_bytes = extract_embedded_plist(profile)?;
        let dict = plist_codec::parse_dictionary(plist_bytes)
            .map_err(|e| Error::Format(format!("Invalid provisioning profile: {}", e)))?;

        Ok(Self::from_dictionary(&dict))
    }

    fn from_dictionary(dict: &Dictionary) -> Self {
        let string = |key: &str| plist_codec::get_string(dict, key).unwrap_or_default().to_string();

        let team_id = match dict.get("TeamIdentifier") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .find_map(Value::as_string)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };

        let entitlements = dict
            .get("Entitlements")
            .and_then(Value::as_dictionary)
            .cloned()
            .unwrap_or_default();

        let app_id_name = string("AppIDName");
        let app_id = plist_codec::get_string(&entitlements, "application-identifier")
            .map(|full| strip_app_id_prefix(full).to_string())
            .unwrap_or_else(|| app_id_name.clone());

        let certificate_fingerprints = dict
            .get("DeveloperCertificates")
            .and_then(Value::as_array)
            .map(|certs| {
                certs
                    .iter()
                    .filter_map(Value::as_data)
                    .map(sha1_fingerprint)
                    .collect()
            })
            .unwrap_or_default();

        let expiration_date = date_value(dict, "ExpirationDate").unwrap_or_else(Utc::now);
        let is_valid = Utc::now() < expiration_date;

        let name = plist_codec::get_string(dict, "Name")
            .unwrap_or(crate::crypto::cert::UNKNOWN)
            .to_string();

        Self {
            name,
            uuid: string("UUID"),
            team_id,
            app_id,
            app_id_name,
            devices: string_array(dict, "ProvisionedDevices"),
            provisions_all_devices: dict
                .get("ProvisionsAllDevices")
                .and_then(Value::as_boolean)
                .unwrap_or(false),
            platforms: string_array(dict, "Platform"),
            certificate_fingerprints,
            entitlements,
            creation_date: date_value(dict, "CreationDate"),
            expiration_date,
            is_valid,
        }
    }
}

/// Locate the plist document embedded in a signed profile container.
///
/// The document starts at the `<?xml` declaration preceding `<plist` (or at
/// `<plist` itself) and ends after the last `</plist>`.
pub fn extract_embedded_plist(data: &[u8]) -> Result<&[u8]> {
    let plist_open = find(data, PLIST_OPEN)
        .ok_or_else(|| Error::Format("No plist found in provisioning profile".into()))?;

    let start = find(&data[..plist_open], XML_DECL).unwrap_or(plist_open);

    let end = rfind(data, PLIST_CLOSE)
        .map(|p| p + PLIST_CLOSE.len())
        .filter(|&end| end > plist_open)
        .ok_or_else(|| Error::Format("Unterminated plist in provisioning profile".into()))?;

    Ok(&data[start..end])
}

/// `TEAMID.com.example.app` -> `com.example.app`.
fn strip_app_id_prefix(full: &str) -> &str {
    full.split_once('.').map(|(_, rest)| rest).unwrap_or(full)
}

fn string_array(dict: &Dictionary, key: &str) -> Vec<String> {
    dict.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_string)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn date_value(dict: &Dictionary, key: &str) -> Option<DateTime<Utc>> {
    dict.get(key)
        .and_then(Value::as_date)
        .map(|d| DateTime::<Utc>::from(SystemTime::from(d)))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
