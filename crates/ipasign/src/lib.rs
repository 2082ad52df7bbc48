//! Re-signing service core for iOS application archives.
//!
//! Takes an IPA, a PKCS#12 signing identity and a provisioning profile, and
//! produces a modified, re-signed, installable IPA. Jobs run in the
//! background and report progress through a shared [`job::JobStore`].
//!
//! Binary signing is delegated to a [`signer::BinarySigner`]; the default
//! [`signer::MarkerSigner`] only appends an identifying trailer and does not
//! produce an Apple code signature.
//!
//! # Examples
//!
//! ```no_run
//! use ipasign::engine::{EngineConfig, SigningEngine, SigningInputFiles, SigningParams};
//! use ipasign::job::{JobRunner, JobStore};
//! use std::time::Duration;
//!
//! # async fn example() -> ipasign::Result<()> {
//! let engine = SigningEngine::new(EngineConfig::new().work_root("uploads"));
//! let runner = JobRunner::new(engine, JobStore::new());
//!
//! let files = SigningInputFiles {
//!     ipa: Some("app.ipa".into()),
//!     p12: Some("identity.p12".into()),
//!     provision: Some("profile.mobileprovision".into()),
//!     ..SigningInputFiles::default()
//! };
//! let job_id = runner.submit(files, SigningParams::default())?;
//! let done = runner.wait(&job_id, Duration::from_millis(200)).await?;
//! println!("{:?}: {}", done.status, done.message);
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod ipa;
pub mod job;
pub mod manifest;
pub mod plist_codec;
pub mod signer;

#[cfg(test)]
mod testutil;

pub use engine::{EngineConfig, SigningEngine, SigningInputFiles, SigningOptions, SigningParams};
pub use error::Error;
pub use job::{JobRunner, JobStatus, JobStore, RunnerConfig, SigningProgress};

pub type Result<T> = std::result::Result<T, Error>;
