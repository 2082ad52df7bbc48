//! Unpacking uploaded IPAs into a job's scratch tree.
//!
//! An IPA is a ZIP whose single meaningful top-level folder is `Payload/`,
//! holding one `<Name>.app` bundle. [`extract_ipa`] unpacks the archive and
//! hands back that bundle path; [`validate_ipa`] is the cheap pre-check run
//! before any work is scheduled.

use crate::{Error, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Folder inside an IPA that holds the application bundle.
pub const PAYLOAD_DIR: &str = "Payload";

/// Bundle metadata file every `.app` must carry.
pub const INFO_PLIST: &str = "Info.plist";

/// A file entry queued for the parallel write pass.
struct ExtractEntry {
    index: usize,
    outpath: PathBuf,
    is_symlink: bool,
    unix_mode: Option<u32>,
}

/// Extract every entry of a ZIP archive into `dest_dir`.
///
/// Directories are created first, then file bodies are written in parallel.
/// Unix permission bits and symlinks are restored where the host supports
/// them. Entries whose names would escape `dest_dir` are skipped.
///
/// # Errors
///
/// Returns [`Error::CorruptArchive`] if the file is not a valid ZIP, and
/// [`Error::Io`] if the archive is missing or a write fails.
pub fn extract_all(archive_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<()> {
    let archive_path = archive_path.as_ref();
    let dest_dir = dest_dir.as_ref();

    if !archive_path.exists() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Archive not found: {}", archive_path.display()),
        )));
    }

    let file = File::open(archive_path)?;
    // The archive is private to the job's scratch tree and not modified while mapped.
    let mmap = unsafe { Mmap::map(&file)? };

    let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;

    fs::create_dir_all(dest_dir)?;

    let mut entries: Vec<ExtractEntry> = Vec::with_capacity(archive.len());
    let mut dirs_to_create: Vec<PathBuf> = Vec::new();

    for i in 0..archive.len() {
        let file = archive.by_index(i)?;

        let outpath = match file.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => continue,
        };

        let unix_mode = file.unix_mode();
        let is_symlink = unix_mode
            .map(|mode| (mode & 0o170000) == 0o120000)
            .unwrap_or(false);

        if file.is_dir() {
            dirs_to_create.push(outpath);
            continue;
        }

        if let Some(parent) = outpath.parent() {
            dirs_to_create.push(parent.to_path_buf());
        }
        entries.push(ExtractEntry {
            index: i,
            outpath,
            is_symlink,
            unix_mode,
        });
    }

    dirs_to_create.sort();
    dirs_to_create.dedup();
    for dir in &dirs_to_create {
        fs::create_dir_all(dir)?;
    }

    entries.par_iter().try_for_each(|entry| -> Result<()> {
        let mut archive = ZipArchive::new(Cursor::new(&mmap[..]))?;
        let mut file = archive.by_index(entry.index)?;

        #[cfg(unix)]
        if entry.is_symlink {
            let mut target = String::new();
            file.read_to_string(&mut target)?;

            if entry.outpath.symlink_metadata().is_ok() {
                let _ = fs::remove_file(&entry.outpath);
            }

            std::os::unix::fs::symlink(&target, &entry.outpath)?;
            return Ok(());
        }

        let mut outfile = File::create(&entry.outpath)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode {
                let perms = mode & 0o7777;
                if perms != 0 {
                    fs::set_permissions(&entry.outpath, fs::Permissions::from_mode(perms))?;
                }
            }
        }

        Ok(())
    })?;

    // Directory modes are applied last so a read-only directory does not block its own children.
    #[cfg(unix)]
    for i in 0..archive.len() {
        use std::os::unix::fs::PermissionsExt;
        let file = archive.by_index(i)?;
        if !file.is_dir() {
            continue;
        }
        if let (Some(path), Some(mode)) = (file.enclosed_name(), file.unix_mode()) {
            let perms = mode & 0o7777;
            if perms & 0o700 == 0o700 {
                fs::set_permissions(dest_dir.join(path), fs::Permissions::from_mode(perms))?;
            }
        }
    }

    Ok(())
}

/// List entry names of an archive in archive order.
pub fn list_entries(archive_path: impl AsRef<Path>) -> Result<Vec<String>> {
    let file = File::open(archive_path.as_ref())?;
    let archive = ZipArchive::new(file)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

/// Extract an IPA and return the path of its `.app` bundle.
///
/// # Errors
///
/// On top of [`extract_all`]'s errors, returns [`Error::InvalidPackage`]
/// when the extracted tree has no usable bundle (see [`find_app_bundle`]).
pub fn extract_ipa(ipa_path: impl AsRef<Path>, dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    extract_all(ipa_path, dest_dir)?;
    find_app_bundle(dest_dir)
}

/// Find the `.app` bundle inside `Payload/`.
///
/// When several bundles are present the lexicographically first one is
/// used. The bundle must contain an `Info.plist`.
pub fn find_app_bundle(dest_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let payload_dir = dest_dir.as_ref().join(PAYLOAD_DIR);

    if !payload_dir.is_dir() {
        return Err(Error::InvalidPackage("No Payload directory found in IPA".into()));
    }

    let mut bundles = Vec::new();
    for entry in fs::read_dir(&payload_dir)? {
        let path = entry?.path();
        if path.is_dir() && path.extension().is_some_and(|ext| ext == "app") {
            bundles.push(path);
        }
    }
    bundles.sort();

    let bundle = bundles
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidPackage("No .app bundle found in Payload/".into()))?;

    if !bundle.join(INFO_PLIST).is_file() {
        return Err(Error::InvalidPackage(format!(
            "No Info.plist found in {}",
            bundle.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        )));
    }

    Ok(bundle)
}

/// Validate that a path looks like a ZIP file.
///
/// Checks that the file exists and starts with the `PK` signature.
pub fn validate_ipa(ipa_path: impl AsRef<Path>) -> Result<()> {
    let ipa_path = ipa_path.as_ref();

    if !ipa_path.exists() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("IPA file not found: {}", ipa_path.display()),
        )));
    }

    let mut file = File::open(ipa_path)?;
    let mut magic = [0u8; 2];
    if file.read_exact(&mut magic).is_err() || &magic != b"PK" {
        return Err(Error::CorruptArchive(zip::result::ZipError::InvalidArchive(
            "Not a valid ZIP/IPA file".into(),
        )));
    }

    Ok(())
}
