//! Over-the-air install manifest.
//!
//! iOS fetches this plist when a user taps an `itms-services://` link. The
//! document layout is fixed:
//!
//! ```text
//! items = [ {
//!     assets   = [ { kind = "software-package", url = <absolute IPA URL> } ]
//!     metadata = { bundle-identifier, bundle-version, kind = "software", title, subtitle }
//! } ]
//! ```

use crate::engine::ResultMetadata;
use crate::plist_codec;
use crate::Result;
use plist::{Dictionary, Value};

pub const SUBTITLE: &str = "Re-signed with ipasign";

/// Render the manifest for an IPA served at `ipa_url`.
///
/// Output is deterministic for identical inputs.
pub fn render_manifest(ipa_url: &str, metadata: &ResultMetadata) -> Result<Vec<u8>> {
    let mut asset = Dictionary::new();
    asset.insert("kind".into(), Value::String("software-package".into()));
    asset.insert("url".into(), Value::String(ipa_url.into()));

    let mut meta = Dictionary::new();
    meta.insert(
        "bundle-identifier".into(),
        Value::String(metadata.bundle_id.clone()),
    );
    meta.insert(
        "bundle-version".into(),
        Value::String(metadata.bundle_version.clone()),
    );
    meta.insert("kind".into(), Value::String("software".into()));
    meta.insert("title".into(), Value::String(metadata.bundle_name.clone()));
    meta.insert("subtitle".into(), Value::String(SUBTITLE.into()));

    let mut item = Dictionary::new();
    item.insert("assets".into(), Value::Array(vec![Value::Dictionary(asset)]));
    item.insert("metadata".into(), Value::Dictionary(meta));

    let mut root = Dictionary::new();
    root.insert("items".into(), Value::Array(vec![Value::Dictionary(item)]));

    plist_codec::to_xml(&Value::Dictionary(root))
}

/// Join a base URL and a server-relative path with exactly one slash.
pub fn absolute_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
