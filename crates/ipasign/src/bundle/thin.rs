//! Reduce universal (fat) Mach-O binaries to their arm64 slice.

use crate::{Error, Result};
use goblin::mach::cputype::CPU_TYPE_ARM64;
use goblin::mach::fat::FAT_MAGIC;
use goblin::mach::Mach;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Rewrite `path` with only its arm64 slice.
///
/// Returns `false` (and leaves the file alone) for thin binaries, non Mach-O
/// files, and fat binaries without an arm64 slice.
pub fn thin_to_arm64(path: &Path) -> Result<bool> {
    if !has_fat_magic(path) {
        return Ok(false);
    }

    let data = fs::read(path)?;
    let fat = match Mach::parse(&data) {
        Ok(Mach::Fat(fat)) => fat,
        Ok(_) => return Ok(false),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Not a Mach-O, skipping");
            return Ok(false);
        }
    };

    for (i, arch) in fat.iter_arches().enumerate() {
        let arch = arch.map_err(|e| Error::MachO(format!("Fat arch {}: {}", i, e)))?;
        if arch.cputype != CPU_TYPE_ARM64 {
            continue;
        }

        let start = arch.offset as usize;
        let end = start + arch.size as usize;
        let slice = data.get(start..end).ok_or_else(|| {
            Error::MachO(format!("arm64 slice out of bounds in {}", path.display()))
        })?;

        fs::write(path, slice)?;
        debug!(path = %path.display(), size = slice.len(), "Thinned to arm64");
        return Ok(true);
    }

    Ok(false)
}

/// Thin every fat binary in the bundle. Returns the rewritten paths.
pub fn thin_bundle(bundle: &Path) -> Result<Vec<PathBuf>> {
    let mut thinned = Vec::new();

    for entry in WalkDir::new(bundle).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() && thin_to_arm64(entry.path())? {
            thinned.push(entry.into_path());
        }
    }

    Ok(thinned)
}

fn has_fat_magic(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| u32::from_be_bytes(magic) == FAT_MAGIC)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use goblin::mach::cputype::CPU_TYPE_X86_64;
    use tempfile::TempDir;

    /// Universal binary with one x86_64 and one arm64 slice of opaque bytes.
    fn fat_binary(x86: &[u8], arm: &[u8]) -> Vec<u8> {
        let x86_offset = 0x1000u32;
        let arm_offset = 0x2000u32;

        let mut data = Vec::new();
        data.extend_from_slice(&FAT_MAGIC.to_be_bytes());
        data.extend_from_slice(&2u32.to_be_bytes());
        for (cpu, offset, len) in [
            (CPU_TYPE_X86_64, x86_offset, x86.len()),
            (CPU_TYPE_ARM64, arm_offset, arm.len()),
        ] {
            data.extend_from_slice(&cpu.to_be_bytes());
            data.extend_from_slice(&0u32.to_be_bytes());
            data.extend_from_slice(&offset.to_be_bytes());
            data.extend_from_slice(&(len as u32).to_be_bytes());
            data.extend_from_slice(&12u32.to_be_bytes());
        }
        data.resize(x86_offset as usize, 0);
        data.extend_from_slice(x86);
        data.resize(arm_offset as usize, 0);
        data.extend_from_slice(arm);
        data
    }

    #[test]
    fn test_thin_keeps_arm64_slice() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("Demo");
        fs::write(&path, fat_binary(b"intel-code", b"arm-code")).unwrap();

        assert!(thin_to_arm64(&path).unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"arm-code");
    }

    #[test]
    fn test_thin_skips_non_fat_files() {
        let temp_dir = TempDir::new().unwrap();
        let thin = temp_dir.path().join("thin");
        fs::write(&thin, [0xcf, 0xfa, 0xed, 0xfe, 0, 0, 0, 0]).unwrap();
        let text = temp_dir.path().join("README");
        fs::write(&text, b"hello").unwrap();

        assert!(!thin_to_arm64(&thin).unwrap());
        assert!(!thin_to_arm64(&text).unwrap());
        assert_eq!(fs::read(&text).unwrap(), b"hello");
    }

    #[test]
    fn test_thin_bundle_walks_tree() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = temp_dir.path().join("Demo.app");
        fs::create_dir_all(bundle.join("Frameworks")).unwrap();
        fs::write(bundle.join("Demo"), fat_binary(b"a", b"b")).unwrap();
        fs::write(bundle.join("Frameworks/libx.dylib"), fat_binary(b"c", b"d")).unwrap();
        fs::write(bundle.join("Info.plist"), b"<plist/>").unwrap();

        let thinned = thin_bundle(&bundle).unwrap();
        assert_eq!(thinned.len(), 2);
        assert_eq!(fs::read(bundle.join("Frameworks/libx.dylib")).unwrap(), b"d");
    }

    #[test]
    #[cfg(unix)]
    fn test_thin_bundle_reports_unreadable_dirs() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let bundle = temp_dir.path().join("Demo.app");
        let locked = bundle.join("Frameworks");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("libx.dylib"), fat_binary(b"c", b"d")).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let readable = fs::read_dir(&locked).is_ok();

        let result = thin_bundle(&bundle);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        if !readable {
            assert!(matches!(result, Err(Error::Io(_))));
        }
    }
}
