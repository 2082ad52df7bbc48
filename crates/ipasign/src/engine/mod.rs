//! The re-signing pipeline.
//!
//! [`SigningEngine::run`] takes one job from staged input files to a signed
//! archive on disk. Stages run strictly in [`Stage`] order and each one is
//! announced to a [`ProgressReporter`] before it starts. A reporter that
//! returns an error stops the pipeline at that stage boundary; the job runner
//! uses this to abort cancelled or timed-out jobs.
//!
//! # On-disk layout
//!
//! Everything a job touches lives under `{work_root}/jobs/{job_id}/`:
//!
//! | Path | Contents |
//! |------|----------|
//! | `input/` | Uploaded files (written by the caller) |
//! | `downloaded.ipa` | Remote IPA, when no file was uploaded |
//! | `extracted/` | Scratch tree (`Payload/<Name>.app`) |
//! | `output/<name>-signed.ipa` | The signed archive |
//!
//! # Examples
//!
//! ```no_run
//! use ipasign::engine::{EngineConfig, SigningEngine, SigningInputFiles, SigningParams, Stage};
//!
//! let engine = SigningEngine::new(EngineConfig::new().work_root("/var/lib/ipasign"));
//! let files = SigningInputFiles {
//!     ipa: Some("app.ipa".into()),
//!     p12: Some("identity.p12".into()),
//!     provision: Some("profile.mobileprovision".into()),
//!     ..SigningInputFiles::default()
//! };
//! let report = |stage: Stage, message: &str| {
//!     println!("{:>3}% {}", stage.progress(), message);
//!     Ok::<(), ipasign::Error>(())
//! };
//! let result = engine.run("job-1", &files, &SigningParams::default(), &report)?;
//! println!("{}", result.signed_ipa_url);
//! # Ok::<(), ipasign::Error>(())
//! ```

mod download;
mod options;
mod result;

pub use download::fetch_ipa;
pub use options::{SigningInputFiles, SigningOptions, SigningParams};
pub use result::{
    ResultMetadata, SigningResult, DEFAULT_BUNDLE_ID, DEFAULT_BUNDLE_NAME, DEFAULT_BUNDLE_VERSION,
};

use crate::bundle::{inject, thin, BundleMutator};
use crate::crypto::{CertificateInfo, MatchReport, ProvisionInfo};
use crate::ipa::{self, CompressionLevel};
use crate::signer::{self, BinarySigner, MarkerSigner, SigningIdentity};
use crate::{Error, Result};
use chrono::Utc;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Initializing,
    AcquiringInput,
    Extracting,
    Mutating,
    InstallingProvision,
    InjectingAssets,
    SigningBinaries,
    Repackaging,
    Done,
}

impl Stage {
    /// Job progress percentage reported when the stage starts.
    pub fn progress(self) -> u8 {
        match self {
            Stage::Initializing => 5,
            Stage::AcquiringInput => 15,
            Stage::Extracting => 35,
            Stage::Mutating => 55,
            Stage::InstallingProvision => 60,
            Stage::InjectingAssets => 65,
            Stage::SigningBinaries => 75,
            Stage::Repackaging => 95,
            Stage::Done => 100,
        }
    }
}

/// Receives stage transitions. Returning an error aborts the run.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, stage: Stage, message: &str) -> Result<()>;
}

impl<F> ProgressReporter for F
where
    F: Fn(Stage, &str) -> Result<()> + Send + Sync,
{
    fn report(&self, stage: Stage, message: &str) -> Result<()> {
        self(stage, message)
    }
}

/// Engine configuration.
///
/// Builder-style; every setter consumes and returns `self`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    work_root: PathBuf,
    public_base_url: String,
    compression_level: CompressionLevel,
    keep_scratch: bool,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            work_root: PathBuf::from("uploads"),
            public_base_url: "http://localhost:8080".to_string(),
            compression_level: CompressionLevel::DEFAULT,
            keep_scratch: true,
        }
    }

    /// Directory under which per-job directories are created.
    pub fn work_root(mut self, path: impl AsRef<Path>) -> Self {
        self.work_root = path.as_ref().to_path_buf();
        self
    }

    /// Absolute base URL used in install links and manifests.
    pub fn public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Default archive compression when the job does not set one (0-9).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = CompressionLevel::new(level);
        self
    }

    /// Keep the extracted scratch tree after a successful run.
    pub fn keep_scratch(mut self, keep: bool) -> Self {
        self.keep_scratch = keep;
        self
    }

    pub fn work_root_path(&self) -> &Path {
        &self.work_root
    }

    pub fn base_url(&self) -> &str {
        &self.public_base_url
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.work_root.join("jobs").join(job_id)
    }

    /// Where callers stage uploaded files for `job_id`.
    pub fn input_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("input")
    }

    pub fn output_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("output")
    }

    fn scratch_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("extracted")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the signing pipeline for one job at a time.
///
/// The engine holds no per-job state and can be shared across threads.
pub struct SigningEngine {
    config: EngineConfig,
    signer: Option<Arc<dyn BinarySigner>>,
}

impl SigningEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            signer: None,
        }
    }

    /// Replace the default [`MarkerSigner`].
    pub fn with_signer(mut self, signer: Arc<dyn BinarySigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the full pipeline for `job_id`.
    ///
    /// Blocking; performs filesystem, archive and network I/O.
    ///
    /// # Errors
    ///
    /// Any stage failure aborts the remaining stages. No output path is
    /// returned on failure; the scratch tree is left in place.
    pub fn run(
        &self,
        job_id: &str,
        files: &SigningInputFiles,
        params: &SigningParams,
        progress: &dyn ProgressReporter,
    ) -> Result<SigningResult> {
        files.validate(params)?;
        let options = SigningOptions::from_params(params);
        let job_dir = self.config.job_dir(job_id);
        fs::create_dir_all(&job_dir)?;

        progress.report(Stage::Initializing, "Processing certificates...")?;
        let (certificate, provision) = load_identity(files, params)?;
        let identity_match = MatchReport::evaluate(&certificate, &provision);
        info!(
            %job_id,
            common_name = %certificate.common_name,
            team_id = %certificate.team_id,
            profile = %provision.name,
            "Loaded signing identity"
        );

        let ipa_path = match (&files.ipa, params.ipa_url()) {
            (Some(path), _) => {
                progress.report(Stage::AcquiringInput, "Reading uploaded IPA...")?;
                path.clone()
            }
            (None, Some(url)) => {
                progress.report(Stage::AcquiringInput, "Downloading IPA...")?;
                let dest = job_dir.join("downloaded.ipa");
                fetch_ipa(url, &dest)?;
                dest
            }
            (None, None) => {
                return Err(Error::Validation("IPA file or IPA URL is required".into()))
            }
        };
        ipa::validate_ipa(&ipa_path)?;

        progress.report(Stage::Extracting, "Extracting IPA contents...")?;
        let scratch = self.config.scratch_dir(job_id);
        if scratch.exists() {
            fs::remove_dir_all(&scratch)?;
        }
        let bundle = ipa::extract_ipa(&ipa_path, &scratch)?;
        info!(%job_id, bundle = %bundle.display(), "Extracted IPA");

        progress.report(Stage::Mutating, "Applying modifications...")?;
        let bundle_metadata = BundleMutator::new(&bundle).apply(&options)?;
        if options.thin_binaries {
            let thinned = thin::thin_bundle(&bundle)?;
            info!(%job_id, count = thinned.len(), "Thinned binaries to arm64");
        }

        progress.report(Stage::InstallingProvision, "Installing provisioning profile...")?;
        if let Some(ref profile) = files.provision {
            inject::install_provision(&bundle, profile)?;
        }
        let entitlements = inject::resolve_entitlements(
            files.entitlements.as_deref(),
            options.custom_entitlements.as_deref(),
            &provision,
            options.debug,
        );
        inject::write_entitlements(&bundle, &entitlements)?;

        if files.has_injections() {
            progress.report(Stage::InjectingAssets, "Injecting additional files...")?;
            inject_assets(&bundle, files)?;
        }

        progress.report(Stage::SigningBinaries, "Signing binaries...")?;
        let signed_at = Utc::now();
        let identity = if options.adhoc {
            SigningIdentity::adhoc(certificate.team_id.clone())
        } else {
            SigningIdentity::from_certificate(&certificate)
        };
        let marker;
        let binary_signer: &dyn BinarySigner = match self.signer {
            Some(ref custom) => custom.as_ref(),
            None => {
                marker = MarkerSigner::new(signed_at);
                &marker
            }
        };
        let binaries_signed = signer::sign_bundle(binary_signer, &bundle, &identity, options.weak)?;
        info!(%job_id, binaries_signed, "Signed binaries");

        progress.report(Stage::Repackaging, "Finalizing signed IPA...")?;
        let file_name = output_file_name(bundle_metadata.bundle_name.as_deref());
        let output_path = self.config.output_dir(job_id).join(&file_name);
        let level = options
            .compression_level
            .unwrap_or(self.config.compression_level);
        let file_size = ipa::write_archive(&scratch, &output_path, level)?;
        let sha256 = file_sha256(&output_path)?;

        if !self.config.keep_scratch {
            if let Err(e) = fs::remove_dir_all(&scratch) {
                warn!(%job_id, error = %e, "Failed to remove scratch directory");
            }
        }

        let metadata = ResultMetadata::resolve(
            [
                bundle_metadata.bundle_name.as_deref(),
                bundle_metadata.bundle_id.as_deref(),
                bundle_metadata.bundle_version.as_deref(),
            ],
            [
                options.bundle_name.as_deref(),
                options.bundle_id.as_deref(),
                options.bundle_version.as_deref(),
            ],
            file_size,
            signed_at,
        );

        info!(
            %job_id,
            bundle_id = %metadata.bundle_id,
            bundle_version = %metadata.bundle_version,
            size = file_size,
            path = %output_path.display(),
            "Created signed IPA"
        );

        let result = SigningResult {
            signed_ipa_url: format!("/jobs/{}/output/{}", job_id, file_name),
            install_link: format!(
                "itms-services://?action=download-manifest&url={}/api/manifest/{}",
                self.config.public_base_url, job_id
            ),
            metadata,
            sha256,
            binaries_signed,
            certificate: certificate.summary(),
            provision,
            identity_match,
            output_path,
            file_name,
        };

        progress.report(Stage::Done, "Signing completed successfully")?;
        Ok(result)
    }
}

fn load_identity(
    files: &SigningInputFiles,
    params: &SigningParams,
) -> Result<(CertificateInfo, ProvisionInfo)> {
    let p12_path = files
        .p12
        .as_ref()
        .ok_or_else(|| Error::Validation("P12 certificate is required".into()))?;
    let provision_path = files
        .provision
        .as_ref()
        .ok_or_else(|| Error::Validation("Provisioning profile is required".into()))?;

    let password = params
        .password
        .as_ref()
        .map(|p| p.expose_secret().as_str())
        .unwrap_or("");
    let certificate = CertificateInfo::from_p12(&fs::read(p12_path)?, password)?;
    let provision = ProvisionInfo::parse(&fs::read(provision_path)?)?;

    Ok((certificate, provision))
}

fn inject_assets(bundle: &Path, files: &SigningInputFiles) -> Result<()> {
    let tweaks = inject::inject_tweaks(bundle, &files.tweaks)?;
    let resources = inject::copy_resources(bundle, &files.resources)?;
    if let Some(ref icon) = files.icon {
        inject::install_icon(bundle, icon)?;
    }
    if let Some(ref plist) = files.custom_plist {
        inject::apply_custom_plist(bundle, plist)?;
    }
    info!(
        tweaks = tweaks.len(),
        resources = resources.len(),
        "Injected additional files"
    );
    Ok(())
}

/// `<name>-signed.ipa`, with anything outside `[A-Za-z0-9._-]` replaced.
fn output_file_name(bundle_name: Option<&str>) -> String {
    let stem: String = bundle_name
        .unwrap_or("signed")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let stem = stem.trim_start_matches('.');
    if stem.is_empty() {
        "signed-signed.ipa".to_string()
    } else {
        format!("{}-signed.ipa", stem)
    }
}

fn file_sha256(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
