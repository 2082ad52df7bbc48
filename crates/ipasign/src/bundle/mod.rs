//! Modification of an extracted `.app` bundle.
//!
//! This module provides functionality to:
//! - Rewrite `Info.plist` from [`SigningOptions`](crate::engine::SigningOptions) overrides
//! - Strip optional components (Watch companion, app extensions)
//! - Install the provisioning profile and entitlements
//! - Inject tweaks, resources and a custom icon
//! - Thin universal binaries to arm64
//!
//! # Examples
//!
//! ```no_run
//! use ipasign::bundle::BundleMutator;
//! use ipasign::engine::SigningOptions;
//!
//! let options = SigningOptions {
//!     bundle_version: Some("2.0".into()),
//!     ..SigningOptions::default()
//! };
//! let metadata = BundleMutator::new("/tmp/job/Payload/Demo.app").apply(&options)?;
//! println!("{:?}", metadata.bundle_version);
//! # Ok::<(), ipasign::Error>(())
//! ```

pub mod inject;
pub mod mutator;
pub mod thin;

pub use mutator::{BundleMetadata, BundleMutator};
