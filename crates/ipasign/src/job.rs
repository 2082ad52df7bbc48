//! Job bookkeeping and background execution.
//!
//! [`JobStore`] is the only state shared between jobs: a map from job ID to
//! its [`SigningProgress`] record. Each record has a single writer, the
//! background task of that job, plus any number of readers.
//!
//! [`JobRunner`] validates submissions, inserts the `pending` record and
//! spawns one task per job. The task moves [`SigningEngine::run`] onto the
//! blocking pool so downloads and archive work never stall other jobs.
//!
//! A record becomes terminal (`completed` or `failed`) exactly once. Later
//! writes are ignored, which is how cancellation and timeouts win over a
//! pipeline that is still running: its next stage report is refused and the
//! run aborts.

use crate::engine::{
    ProgressReporter, SigningEngine, SigningInputFiles, SigningParams, SigningResult, Stage,
};
use crate::manifest;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_JOB_ID_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Snapshot of one job as seen by pollers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningProgress {
    pub job_id: String,
    pub status: JobStatus,
    /// Percentage in `0..=100`; never decreases.
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SigningResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SigningProgress {
    pub fn pending(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            progress: 0,
            message: "Job queued for processing".to_string(),
            result: None,
            error: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn fail(&mut self, message: &str, err: &Error) {
        self.status = JobStatus::Failed;
        self.message = message.to_string();
        self.error = Some(err.to_string());
        self.error_kind = Some(err.kind().to_string());
        self.updated_at = Utc::now();
    }
}

/// Concurrent map of job records.
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, SigningProgress>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] if a record with the same ID exists.
    pub fn insert(&self, record: SigningProgress) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&record.job_id) {
            return Err(Error::Validation(format!(
                "Job {} already exists",
                record.job_id
            )));
        }
        jobs.insert(record.job_id.clone(), record);
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<SigningProgress> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update<T>(&self, job_id: &str, f: impl FnOnce(&mut SigningProgress) -> Result<T>) -> Result<T> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::NotFound(format!("Job {} not found", job_id)))?;
        f(record)
    }

    /// Record that `job_id` entered `stage`.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] once the record is terminal, so the caller stops.
    pub fn advance(&self, job_id: &str, stage: Stage, message: &str) -> Result<()> {
        self.update(job_id, |record| {
            if record.status.is_terminal() {
                return Err(Error::Cancelled(format!(
                    "Job {} is already {}",
                    job_id,
                    status_name(record.status)
                )));
            }
            record.status = JobStatus::Processing;
            record.progress = record.progress.max(stage.progress()).min(99);
            record.message = message.to_string();
            record.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Mark `job_id` completed. Returns `false` if it was already terminal.
    pub fn complete(&self, job_id: &str, result: SigningResult) -> Result<bool> {
        self.update(job_id, |record| {
            if record.status.is_terminal() {
                return Ok(false);
            }
            record.status = JobStatus::Completed;
            record.progress = 100;
            record.message = "Signing completed successfully".to_string();
            record.result = Some(result);
            record.updated_at = Utc::now();
            Ok(true)
        })
    }

    /// Mark `job_id` failed with `err`. Returns `false` if it was already terminal.
    pub fn fail(&self, job_id: &str, message: &str, err: &Error) -> Result<bool> {
        self.update(job_id, |record| {
            if record.status.is_terminal() {
                return Ok(false);
            }
            record.fail(message, err);
            Ok(true)
        })
    }

    /// Cancel a `pending` or `processing` job.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] if the job is already terminal; the record is
    /// left untouched.
    pub fn cancel(&self, job_id: &str) -> Result<SigningProgress> {
        self.update(job_id, |record| {
            if record.status.is_terminal() {
                return Err(Error::InvalidState(format!(
                    "Cannot cancel job that is already {}",
                    status_name(record.status)
                )));
            }
            record.fail(
                "Job cancelled by user",
                &Error::Cancelled("cancelled by user".into()),
            );
            Ok(record.clone())
        })
    }
}

fn status_name(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Processing => "processing",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

/// Job identifiers become path components, so only `[A-Za-z0-9_-]` is allowed.
pub fn validate_job_id(job_id: &str) -> Result<()> {
    let valid = !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LEN
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("Invalid job ID: {:?}", job_id)))
    }
}

/// Runner configuration.
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    job_timeout: Option<Duration>,
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail jobs still running after `timeout`.
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.job_timeout
    }
}

/// Submits jobs and answers queries about them.
#[derive(Clone)]
pub struct JobRunner {
    store: JobStore,
    engine: Arc<SigningEngine>,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(engine: SigningEngine, store: JobStore) -> Self {
        Self {
            store,
            engine: Arc::new(engine),
            config: RunnerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn engine(&self) -> &SigningEngine {
        &self.engine
    }

    /// Submit a job under a fresh UUID.
    pub fn submit(&self, files: SigningInputFiles, params: SigningParams) -> Result<String> {
        self.submit_with_id(Uuid::new_v4().to_string(), files, params)
    }

    /// Submit a job under a caller-chosen ID.
    ///
    /// Validation happens before the record is created, so a rejected
    /// submission leaves no trace in the store. Must be called from within a
    /// Tokio runtime.
    pub fn submit_with_id(
        &self,
        job_id: impl Into<String>,
        files: SigningInputFiles,
        params: SigningParams,
    ) -> Result<String> {
        let job_id = job_id.into();
        validate_job_id(&job_id)?;
        files.validate(&params)?;
        let handle = Handle::try_current()
            .map_err(|e| Error::Internal(format!("No async runtime available: {}", e)))?;

        self.store.insert(SigningProgress::pending(&job_id))?;
        info!(%job_id, "Job submitted");

        let runner = self.clone();
        let id = job_id.clone();
        handle.spawn(async move { runner.drive(id, files, params).await });

        Ok(job_id)
    }

    async fn drive(self, job_id: String, files: SigningInputFiles, params: SigningParams) {
        let engine = Arc::clone(&self.engine);
        let reporter = StoreReporter {
            store: self.store.clone(),
            job_id: job_id.clone(),
        };
        let id = job_id.clone();
        let task =
            tokio::task::spawn_blocking(move || engine.run(&id, &files, &params, &reporter));

        let joined = match self.config.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(%job_id, ?limit, "Job timed out");
                    let err = Error::Cancelled(format!("timed out after {}s", limit.as_secs()));
                    self.record_failure(&job_id, "Signing timed out", &err);
                    return;
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(result)) => match self.store.complete(&job_id, result) {
                Ok(true) => info!(%job_id, "Job completed"),
                Ok(false) => info!(%job_id, "Job finished after it was cancelled; result dropped"),
                Err(e) => error!(%job_id, error = %e, "Failed to record result"),
            },
            Ok(Err(Error::Cancelled(reason))) => {
                info!(%job_id, %reason, "Job stopped");
            }
            Ok(Err(e)) => {
                error!(%job_id, error = %e, "Job failed");
                self.record_failure(&job_id, "Signing failed", &e);
            }
            Err(join_err) => {
                error!(%job_id, error = %join_err, "Job task aborted");
                let err = Error::Internal(format!("Signing task aborted: {}", join_err));
                self.record_failure(&job_id, "Signing failed", &err);
            }
        }
    }

    fn record_failure(&self, job_id: &str, message: &str, err: &Error) {
        if let Err(e) = self.store.fail(job_id, message, err) {
            error!(%job_id, error = %e, "Failed to record failure");
        }
    }

    pub fn get_progress(&self, job_id: &str) -> Result<SigningProgress> {
        self.store.get(job_id)
    }

    pub fn cancel(&self, job_id: &str) -> Result<SigningProgress> {
        let record = self.store.cancel(job_id)?;
        info!(%job_id, "Job cancelled");
        Ok(record)
    }

    /// OTA manifest for a completed job.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the job is unknown or has no result yet.
    pub fn manifest(&self, job_id: &str) -> Result<Vec<u8>> {
        let record = self.store.get(job_id)?;
        let result = record
            .result
            .ok_or_else(|| Error::NotFound(format!("Signed app not found for job {}", job_id)))?;
        let url = manifest::absolute_url(self.engine.config().base_url(), &result.signed_ipa_url);
        manifest::render_manifest(&url, &result.metadata)
    }

    /// Poll until `job_id` is terminal.
    pub async fn wait(&self, job_id: &str, interval: Duration) -> Result<SigningProgress> {
        loop {
            let record = self.store.get(job_id)?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// Writes stage transitions into the store for one job.
struct StoreReporter {
    store: JobStore,
    job_id: String,
}

impl ProgressReporter for StoreReporter {
    fn report(&self, stage: Stage, message: &str) -> Result<()> {
        if stage == Stage::Done {
            return Ok(());
        }
        self.store.advance(&self.job_id, stage, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CertificateInfo, MatchReport, ProvisionInfo};
    use crate::engine::{EngineConfig, ResultMetadata};
    use crate::testutil::{generate_ec_key, make_profile, self_signed_cert, CertSpec};

    fn sample_result() -> SigningResult {
        let key = generate_ec_key();
        let cert = self_signed_cert(&key, &CertSpec::default());
        let certificate = CertificateInfo::from_parts(cert, key).unwrap();
        let provision = ProvisionInfo::parse(&make_profile("ABC123", Some(30), &[])).unwrap();
        let identity_match = MatchReport::evaluate(&certificate, &provision);

        SigningResult {
            signed_ipa_url: "/out/demo.ipa".into(),
            install_link: "itms-services://?action=download-manifest&url=x".into(),
            metadata: ResultMetadata {
                bundle_name: "Demo".into(),
                bundle_id: "com.example.demo".into(),
                bundle_version: "2.0".into(),
                file_size: 10,
                signed_at: Utc::now(),
            },
            sha256: String::new(),
            binaries_signed: 1,
            certificate: certificate.summary(),
            provision,
            identity_match,
            output_path: "demo.ipa".into(),
            file_name: "demo.ipa".into(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let store = JobStore::new();
        store.insert(SigningProgress::pending("job-1")).unwrap();

        let record = store.get("job-1").unwrap();
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.progress, 0);
        assert!(matches!(store.get("job-2"), Err(Error::NotFound(_))));
        assert!(matches!(
            store.insert(SigningProgress::pending("job-1")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_progress_never_decreases() {
        let store = JobStore::new();
        store.insert(SigningProgress::pending("job")).unwrap();

        store.advance("job", Stage::SigningBinaries, "Signing").unwrap();
        store.advance("job", Stage::Extracting, "Late update").unwrap();

        let record = store.get("job").unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress, Stage::SigningBinaries.progress());
    }

    #[test]
    fn test_cancel_pending_job() {
        let store = JobStore::new();
        store.insert(SigningProgress::pending("job")).unwrap();

        let record = store.cancel("job").unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.message.to_lowercase().contains("cancelled"));
        assert_eq!(record.error_kind.as_deref(), Some("cancelled"));

        assert!(matches!(
            store.advance("job", Stage::Mutating, "ignored"),
            Err(Error::Cancelled(_))
        ));
        assert!(!store.fail("job", "Signing failed", &Error::Internal("x".into())).unwrap());
        assert_eq!(store.get("job").unwrap().message, "Job cancelled by user");
    }

    #[test]
    fn test_cancel_completed_job_is_rejected() {
        let store = JobStore::new();
        store.insert(SigningProgress::pending("job")).unwrap();
        assert!(store.complete("job", sample_result()).unwrap());

        assert!(matches!(store.cancel("job"), Err(Error::InvalidState(_))));

        let record = store.get("job").unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(
            record.result.unwrap().metadata.bundle_version,
            "2.0"
        );
    }

    #[test]
    fn test_terminal_state_is_final() {
        let store = JobStore::new();
        store.insert(SigningProgress::pending("job")).unwrap();
        assert!(store
            .fail("job", "Signing failed", &Error::InvalidPassword)
            .unwrap());

        assert!(!store.complete("job", sample_result()).unwrap());
        let record = store.get("job").unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Invalid password for PKCS#12"));
        assert_eq!(record.error_kind.as_deref(), Some("invalid_password"));
        assert!(record.result.is_none());
    }

    #[test]
    fn test_validate_job_id() {
        assert!(validate_job_id("0b9e7f8e-1c2d-4e5f-9a0b-123456789abc").is_ok());
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../etc").is_err());
        assert!(validate_job_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_progress_serializes_for_pollers() {
        let json = serde_json::to_value(SigningProgress::pending("job")).unwrap();
        assert_eq!(json["jobId"], "job");
        assert_eq!(json["status"], "pending");
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_rejected_submission_creates_no_record() {
        let runner = JobRunner::new(SigningEngine::new(EngineConfig::new()), JobStore::new());
        let files = SigningInputFiles {
            ipa: Some("app.ipa".into()),
            p12: Some("id.p12".into()),
            ..SigningInputFiles::default()
        };

        let err = runner
            .submit_with_id("job-1", files, SigningParams::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(runner.store().is_empty());
        assert!(matches!(runner.get_progress("job-1"), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_manifest_requires_result() {
        let store = JobStore::new();
        store.insert(SigningProgress::pending("job")).unwrap();
        let runner = JobRunner::new(SigningEngine::new(EngineConfig::new()), store.clone());

        assert!(matches!(runner.manifest("job"), Err(Error::NotFound(_))));

        store.complete("job", sample_result()).unwrap();
        let manifest = String::from_utf8(runner.manifest("job").unwrap()).unwrap();
        assert!(manifest.contains("http://localhost:8080/out/demo.ipa"));
        assert!(manifest.contains("com.example.demo"));
    }
}
