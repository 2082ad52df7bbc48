//! Binary signing seam.
//!
//! [`BinarySigner`] is the single point where a binary inside the bundle is
//! signed. The shipped implementation, [`MarkerSigner`], does not produce an
//! Apple code signature; it appends an identifying trailer to each binary.
//! A real Mach-O/CMS signer slots in by implementing the trait.
//!
//! Binaries are discovered with [`discover_binaries`] and signed deepest
//! bundle first, so frameworks and extensions are done before the app that
//! contains them.

use crate::crypto::CertificateInfo;
use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Identity recorded for ad-hoc signatures.
pub const ADHOC_IDENTITY: &str = "-";

const CODE_SIGNATURE_DIR: &str = "_CodeSignature";

/// Who a binary is signed as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    pub common_name: String,
    pub team_id: String,
}

impl SigningIdentity {
    pub fn from_certificate(cert: &CertificateInfo) -> Self {
        Self {
            common_name: cert.common_name.clone(),
            team_id: cert.team_id.clone(),
        }
    }

    /// Ad-hoc identity that keeps the certificate's team ID.
    pub fn adhoc(team_id: impl Into<String>) -> Self {
        Self {
            common_name: ADHOC_IDENTITY.to_string(),
            team_id: team_id.into(),
        }
    }
}

/// Signs one binary in place.
pub trait BinarySigner: Send + Sync {
    fn sign(&self, binary: &Path, identity: &SigningIdentity) -> Result<()>;
}

/// Placeholder signer that appends a text trailer to each binary.
///
/// The trailer names the identity, team and signing time. The binary is not
/// a validly signed Mach-O afterwards.
#[derive(Debug, Clone)]
pub struct MarkerSigner {
    signed_at: DateTime<Utc>,
}

impl MarkerSigner {
    pub fn new(signed_at: DateTime<Utc>) -> Self {
        Self { signed_at }
    }

    pub fn marker(&self, identity: &SigningIdentity) -> String {
        format!(
            "\n# SIGNED WITH: {}\n# TEAM ID: {}\n# DATE: {}\n",
            identity.common_name,
            identity.team_id,
            self.signed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

impl Default for MarkerSigner {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl BinarySigner for MarkerSigner {
    fn sign(&self, binary: &Path, identity: &SigningIdentity) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(binary)?;
        file.write_all(self.marker(identity).as_bytes())?;
        Ok(())
    }
}

/// Find every binary in `bundle` that needs signing.
///
/// A file is a binary when it starts with a Mach-O magic, has a `.dylib`
/// extension, or carries an executable permission bit. `_CodeSignature`
/// contents and symlinks are skipped. Results are ordered by bundle depth,
/// deepest first, then by path.
pub fn discover_binaries(bundle: &Path) -> Result<Vec<PathBuf>> {
    if !bundle.is_dir() {
        return Err(Error::InvalidPackage(format!(
            "Bundle not found: {}",
            bundle.display()
        )));
    }

    let mut binaries: Vec<(usize, PathBuf)> = Vec::new();
    for entry in WalkDir::new(bundle)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != CODE_SIGNATURE_DIR)
    {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && is_binary(entry.path()) {
            let depth = bundle_depth(entry.path(), bundle);
            binaries.push((depth, entry.into_path()));
        }
    }

    binaries.sort_by(|(da, pa), (db, pb)| db.cmp(da).then_with(|| pa.cmp(pb)));

    Ok(binaries.into_iter().map(|(_, path)| path).collect())
}

/// Sign every binary in `bundle`.
///
/// With `weak`, a binary that fails to sign is logged and skipped; otherwise
/// the first failure aborts. Returns the number of binaries signed.
pub fn sign_bundle(
    signer: &dyn BinarySigner,
    bundle: &Path,
    identity: &SigningIdentity,
    weak: bool,
) -> Result<usize> {
    let mut signed = 0;

    for binary in discover_binaries(bundle)? {
        match signer.sign(&binary, identity) {
            Ok(()) => {
                debug!(path = %binary.display(), "Signed binary");
                signed += 1;
            }
            Err(e) if weak => {
                warn!(path = %binary.display(), error = %e, "Skipping binary that failed to sign");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(signed)
}

fn is_binary(path: &Path) -> bool {
    if path.extension().is_some_and(|ext| ext == "dylib") {
        return true;
    }
    if is_executable(path) {
        return true;
    }
    has_macho_magic(path)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    false
}

fn has_macho_magic(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    let read = fs::File::open(path).and_then(|mut f| f.read_exact(&mut magic));
    read.is_ok()
        && matches!(
            magic,
            [0xfe, 0xed, 0xfa, 0xce]
                | [0xfe, 0xed, 0xfa, 0xcf]
                | [0xce, 0xfa, 0xed, 0xfe]
                | [0xcf, 0xfa, 0xed, 0xfe]
                | [0xca, 0xfe, 0xba, 0xbe]
                | [0xbe, 0xba, 0xfe, 0xca]
        )
}

/// Number of nested bundle directories between `root` and `path`.
fn bundle_depth(path: &Path, root: &Path) -> usize {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .parent()
        .map(|dir| {
            dir.iter()
                .filter(|c| {
                    let c = c.to_string_lossy();
                    c.ends_with(".app") || c.ends_with(".framework") || c.ends_with(".appex")
                })
                .count()
        })
        .unwrap_or(0)
}
