//! IPA container handling.
//!
//! An IPA is a ZIP archive with the application bundle at
//! `Payload/<Name>.app/`. This module extracts archives into a scratch tree,
//! locates the bundle, and builds reproducible archives back from a tree.

pub mod archive;
pub mod extract;

pub use archive::{build_from_directory, write_archive, CompressionLevel};
pub use extract::{
    extract_all, extract_ipa, find_app_bundle, list_entries, validate_ipa, INFO_PLIST,
    PAYLOAD_DIR,
};
