//! Remote IPA acquisition.

use crate::{Error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Stream `url` to `dest`, returning the number of bytes written.
///
/// Must not be called from an async context; the pipeline runs on a blocking
/// worker thread.
///
/// # Errors
///
/// [`Error::Download`] on transport failure or a non-2xx status. A partially
/// written `dest` is removed.
pub fn fetch_ipa(url: &str, dest: &Path) -> Result<u64> {
    info!(%url, "Downloading IPA");

    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("ipasign/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(None)
        .build()
        .map_err(|e| Error::Download(format!("Failed to build HTTP client: {}", e)))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| Error::Download(format!("Failed to download IPA: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Download(format!(
            "Failed to download IPA: HTTP {}",
            status
        )));
    }

    let mut file = File::create(dest)?;
    let written = match response.copy_to(&mut file) {
        Ok(n) => n,
        Err(e) => {
            drop(file);
            let _ = fs::remove_file(dest);
            return Err(Error::Download(format!("Failed to read IPA body: {}", e)));
        }
    };
    file.flush()?;

    info!(bytes = written, path = %dest.display(), "Downloaded IPA");
    Ok(written)
}
