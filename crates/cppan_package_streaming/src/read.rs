//! Functions that enable extracting an archive from objects that implement
//! the [`std::io::Read`] trait.

use std::{
    io::Read,
    path::{Component, Path, PathBuf},
};

use crate::ExtractError;

/// Returns the `.tar.gz` as a decompressed `tar::Archive`. The archive can
/// be used to extract the files from it, or perform introspection.
pub fn stream_tar_gz(reader: impl Read) -> tar::Archive<impl Read + Sized> {
    tar::Archive::new(flate2::read::GzDecoder::new(reader))
}

/// Reduces an archive entry path to the components that are safe to create
/// under the destination. `.` and `..` and absolute prefixes are dropped;
/// `None` means nothing usable remains.
pub(crate) fn sanitize_entry_path(path: &Path) -> Option<PathBuf> {
    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => sanitized.push(c),
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
            }
        }
    }
    if sanitized.as_os_str().is_empty() {
        None
    } else {
        Some(sanitized)
    }
}

/// Extracts the contents of a `.tar.gz` package archive.
///
/// Symlink and hardlink entries fail the whole extraction; entries whose
/// paths would escape `destination` are skipped.
pub fn extract_tar_gz(reader: impl Read, destination: &Path) -> Result<(), ExtractError> {
    fs_err::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    let mut archive = stream_tar_gz(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();

        match entry.header().entry_type() {
            tar::EntryType::Regular | tar::EntryType::Directory => {}
            tar::EntryType::Symlink | tar::EntryType::Link => {
                return Err(ExtractError::SymlinkRefused(
                    entry_path.display().to_string(),
                ));
            }
            // Fifos, char devices and the like have no place in a source
            // archive.
            _ => {
                tracing::warn!("skipping special archive entry {}", entry_path.display());
                continue;
            }
        }

        let Some(relative) = sanitize_entry_path(&entry_path) else {
            tracing::warn!("skipping archive entry {}", entry_path.display());
            continue;
        };
        let target = destination.join(relative);

        if entry.header().entry_type() == tar::EntryType::Directory {
            fs_err::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }
    Ok(())
}

/// Extracts the contents of a `.zip` archive with the same path hygiene as
/// [`extract_tar_gz`].
pub fn extract_zip(reader: impl Read + std::io::Seek, destination: &Path) -> Result<(), ExtractError> {
    fs_err::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    let mut archive = zip::ZipArchive::new(reader)?;
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;

        // S_IFLNK in the external attributes marks a symlink entry.
        if file
            .unix_mode()
            .is_some_and(|mode| mode & 0o170000 == 0o120000)
        {
            return Err(ExtractError::SymlinkRefused(file.name().to_owned()));
        }

        let Some(relative) = file
            .enclosed_name()
            .and_then(|p| sanitize_entry_path(&p))
        else {
            tracing::warn!("skipping archive entry {}", file.name());
            continue;
        };
        let target = destination.join(relative);

        if file.is_dir() {
            fs_err::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let mut out = fs_err::File::create(&target)?;
        std::io::copy(&mut file, &mut out)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    fn tar_gz_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, path, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn extracts_regular_entries() {
        let archive = tar_gz_with(&[("cppan.yml", "files: src\n"), ("src/lib.cpp", "int x;")]);
        let dir = tempfile::tempdir().unwrap();
        extract_tar_gz(Cursor::new(archive), dir.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("cppan.yml")).unwrap(),
            "files: src\n"
        );
        assert!(dir.path().join("src/lib.cpp").is_file());
    }

    #[test]
    fn drops_escaping_paths() {
        let archive = tar_gz_with(&[("../escape.txt", "nope"), ("ok.txt", "yes")]);
        let dir = tempfile::tempdir().unwrap();
        extract_tar_gz(Cursor::new(archive), dir.path()).unwrap();

        assert!(dir.path().join("ok.txt").is_file());
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
        // The escaping entry lands under the destination instead.
        assert!(dir.path().join("escape.txt").is_file());
    }

    #[test]
    fn refuses_symlinks() {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        builder
            .append_link(&mut header, "link", "/etc/passwd")
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let err = extract_tar_gz(Cursor::new(archive), dir.path()).unwrap_err();
        assert!(matches!(err, ExtractError::SymlinkRefused(_)));
    }

    #[test]
    fn sanitizes_paths() {
        assert_eq!(
            sanitize_entry_path(Path::new("a/./b/../c")),
            Some(PathBuf::from("a/b/c"))
        );
        assert_eq!(
            sanitize_entry_path(Path::new("/abs/path")),
            Some(PathBuf::from("abs/path"))
        );
        assert_eq!(sanitize_entry_path(Path::new("..")), None);
    }
}
