//! Archive extraction into a staging directory.
//!
//! Dispatch is by file extension: `.zip` is read in-process, `.tar`,
//! `.tar.gz` and `.tgz` go through the system `tar`. Anything else fails
//! closed. A failed extraction may leave `dest` partially populated; the
//! caller discards the whole staging session.

use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarGz => "tar.gz",
        }
    }
}

/// Unpack `archive` into `dest` (created if needed)
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    let kind = ArchiveKind::from_path(archive).ok_or_else(|| {
        UpdateError::PackageFormat(format!(
            "unsupported archive type: {}",
            archive.display()
        ))
    })?;

    fs::create_dir_all(dest).map_err(|e| UpdateError::filesystem(dest, e))?;
    info!("extracting {} archive {} -> {}", kind.as_str(), archive.display(), dest.display());

    match kind {
        ArchiveKind::Zip => extract_zip(archive, dest),
        ArchiveKind::Tar => extract_tar(archive, dest, false),
        ArchiveKind::TarGz => extract_tar(archive, dest, true),
    }
}

/// Boolean form of [`extract`]; the reason is logged
pub fn extract_ok(archive: &Path, dest: &Path) -> bool {
    match extract(archive, dest) {
        Ok(()) => true,
        Err(e) => {
            warn!("extraction failed: {}", e);
            false
        }
    }
}

fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive).map_err(|e| UpdateError::filesystem(archive, e))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| UpdateError::PackageFormat(format!("unreadable zip: {}", e)))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| UpdateError::PackageFormat(format!("zip entry {}: {}", i, e)))?;

        // Rejects absolute paths and `..` components
        let relative = match entry.enclosed_name() {
            Some(p) => p.to_owned(),
            None => {
                return Err(UpdateError::PackageFormat(format!(
                    "zip entry escapes destination: {}",
                    entry.name()
                )))
            }
        };
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| UpdateError::filesystem(&out_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| UpdateError::filesystem(parent, e))?;
        }
        let mut out =
            fs::File::create(&out_path).map_err(|e| UpdateError::filesystem(&out_path, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| UpdateError::filesystem(&out_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(|e| UpdateError::filesystem(&out_path, e))?;
            }
        }
        debug!("unzipped {}", relative.display());
    }

    Ok(())
}

fn extract_tar(archive: &Path, dest: &Path, gzip: bool) -> Result<()> {
    let flags = if gzip { "-xzf" } else { "-xf" };
    let output = Command::new("tar")
        .arg(flags)
        .arg(archive)
        .arg("-C")
        .arg(dest)
        .output()
        .map_err(|e| UpdateError::filesystem(archive, format!("cannot run tar: {}", e)))?;

    if !output.status.success() {
        return Err(UpdateError::PackageFormat(format!(
            "tar exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, data) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, FileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_kind_dispatch() {
        assert_eq!(ArchiveKind::from_path(Path::new("a.zip")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("a.ZIP")), Some(ArchiveKind::Zip));
        assert_eq!(ArchiveKind::from_path(Path::new("a.tar")), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::from_path(Path::new("a.tar.gz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path(Path::new("a.tgz")), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_path(Path::new("a.rar")), None);
        assert_eq!(ArchiveKind::from_path(Path::new("a.gz")), None);
        assert_eq!(ArchiveKind::from_path(Path::new("package")), None);
    }

    #[test]
    fn test_unknown_extension_fails_closed() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("pkg.7z");
        fs::write(&archive, b"whatever").unwrap();
        let err = extract(&archive, &temp.path().join("out")).unwrap_err();
        assert_eq!(err.kind(), "PackageFormatError");
        assert!(!extract_ok(&archive, &temp.path().join("out")));
    }

    #[test]
    fn test_extract_zip() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("pkg.zip");
        write_zip(
            &archive,
            &[
                ("app/", b""),
                ("app/index.php", b"<?php echo 1;"),
                ("app/lib/core.php", b"core"),
            ],
        );

        let dest = temp.path().join("out");
        extract(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("app/index.php")).unwrap(), b"<?php echo 1;");
        assert_eq!(fs::read(dest.join("app/lib/core.php")).unwrap(), b"core");
    }

    #[test]
    fn test_zip_slip_rejected() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.zip");
        write_zip(&archive, &[("../escaped.txt", b"boom")]);

        let dest = temp.path().join("out");
        let err = extract(&archive, &dest).unwrap_err();
        assert_eq!(err.kind(), "PackageFormatError");
        assert!(!temp.path().join("escaped.txt").exists());
    }

    #[test]
    fn test_corrupt_zip() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("pkg.zip");
        fs::write(&archive, b"this is not a zip file").unwrap();
        assert!(extract(&archive, &temp.path().join("out")).is_err());
    }

    #[test]
    fn test_extract_tar_gz() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("release-2.1.0/app")).unwrap();
        fs::write(src.join("release-2.1.0/app/index.php"), b"v2").unwrap();

        let archive = temp.path().join("pkg.tgz");
        let status = Command::new("tar")
            .arg("-czf")
            .arg(&archive)
            .arg("-C")
            .arg(&src)
            .arg("release-2.1.0")
            .status()
            .unwrap();
        assert!(status.success());

        let dest = temp.path().join("out");
        extract(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("release-2.1.0/app/index.php")).unwrap(), b"v2");
    }

    #[test]
    fn test_corrupt_tar() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("pkg.tar.gz");
        fs::write(&archive, b"not gzip at all").unwrap();
        let err = extract(&archive, &temp.path().join("out")).unwrap_err();
        assert_eq!(err.kind(), "PackageFormatError");
    }
}
