//! Repackaging a signed bundle tree into an IPA.
//!
//! The walk is lexicographic, every entry carries the same fixed timestamp,
//! and permissions come from the filesystem, so two builds of identical
//! trees are byte-identical. Symlinks inside frameworks are stored as
//! symlinks. [`extract`](super::extract) is the inverse.
//!
//! ```no_run
//! use ipasign::ipa::{write_archive, CompressionLevel};
//!
//! // `extracted/` holds `Payload/Demo.app/...`
//! let size = write_archive("extracted", "Demo-signed.ipa", CompressionLevel::DEFAULT)?;
//! println!("wrote {size} bytes");
//! # Ok::<(), ipasign::Error>(())
//! ```

use crate::{Error, Result};
use std::fs::{self, File};
use std::io::{self, Cursor, Seek, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

/// Deflate level for the signed archive, `0` meaning stored.
///
/// Jobs pass the form's `zipLevel` here; anything above 9 is clamped.
///
/// ```
/// use ipasign::ipa::CompressionLevel;
///
/// assert_eq!(CompressionLevel::new(3).level(), 3);
/// assert_eq!(CompressionLevel::new(42), CompressionLevel::MAX);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    pub const NONE: CompressionLevel = CompressionLevel(0);
    pub const DEFAULT: CompressionLevel = CompressionLevel(6);
    pub const MAX: CompressionLevel = CompressionLevel(9);

    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(Self::MAX.0))
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }

    fn file_options(&self) -> SimpleFileOptions {
        let options = SimpleFileOptions::default().last_modified_time(DateTime::default());
        if self.0 == 0 {
            options.compression_method(CompressionMethod::Stored)
        } else {
            options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.0 as i64))
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// Builds an archive of `src_dir` in memory.
///
/// Entry names are relative to `src_dir` (the directory itself is not an
/// entry), so building from an extracted IPA root yields `Payload/...`.
///
/// # Errors
///
/// Returns [`Error::Io`] if `src_dir` is missing or unreadable, and
/// [`Error::CorruptArchive`] if the ZIP writer fails.
pub fn build_from_directory(src_dir: impl AsRef<Path>, level: CompressionLevel) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_tree(src_dir.as_ref(), &mut cursor, level)?;
    Ok(cursor.into_inner())
}

/// Builds an archive of `src_dir` and writes it to `output_path`.
///
/// The archive is staged in a hidden temporary file next to `output_path`
/// and renamed into place only once it is complete; on error nothing is left
/// at `output_path`. Parent directories are created as needed. Returns the
/// size in bytes of the written archive.
pub fn write_archive(
    src_dir: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    level: CompressionLevel,
) -> Result<u64> {
    let output_path = output_path.as_ref();
    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    write_tree(src_dir.as_ref(), staged.as_file_mut(), level)?;
    staged.as_file_mut().flush()?;
    let size = staged.as_file().metadata()?.len();

    staged
        .persist(output_path)
        .map_err(|e| Error::Io(e.error))?;

    Ok(size)
}

fn write_tree<W: Write + Seek>(src_dir: &Path, writer: W, level: CompressionLevel) -> Result<()> {
    if !src_dir.exists() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Directory not found: {}", src_dir.display()),
        )));
    }

    if !src_dir.is_dir() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Not a directory: {}", src_dir.display()),
        )));
    }

    let mut zip = ZipWriter::new(writer);
    let options = level.file_options();

    for entry in WalkDir::new(src_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| Error::Io(io::Error::other(format!("Failed to walk directory: {}", e))))?;

        let path = entry.path();
        let relative_path = path.strip_prefix(src_dir).map_err(|_| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Failed to compute relative path",
            ))
        })?;
        let archive_path = archive_name(relative_path);

        let metadata = fs::symlink_metadata(path)?;

        #[cfg(unix)]
        let options = {
            use std::os::unix::fs::PermissionsExt;
            options.unix_permissions(metadata.permissions().mode() & 0o7777)
        };

        if metadata.is_dir() {
            zip.add_directory(format!("{}/", archive_path), options)?;
        } else if metadata.file_type().is_symlink() {
            let target = fs::read_link(path)?;
            zip.add_symlink(archive_path, target.to_string_lossy(), options)?;
        } else {
            zip.start_file(archive_path, options)?;
            let mut file = File::open(path)?;
            io::copy(&mut file, &mut zip)?;
        }
    }

    zip.finish()?;

    Ok(())
}

/// Forward-slash archive name for a relative path, independent of host separators.
fn archive_name(relative_path: &Path) -> String {
    relative_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
