//! Functions to extract archives from the filesystem and to rearrange the
//! unpacked tree.

use std::path::Path;

use crate::{read, ExtractError};

/// Extracts an archive, dispatching on its file extension. `.tar.gz` (and
/// `.tgz`) and `.zip` are the formats packages are published in.
pub fn extract(archive: &Path, destination: &Path) -> Result<(), ExtractError> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive, destination)
    } else if name.ends_with(".zip") {
        extract_zip(archive, destination)
    } else {
        Err(ExtractError::UnsupportedArchiveType(name))
    }
}

/// Extracts a `.tar.gz` archive file.
pub fn extract_tar_gz(archive: &Path, destination: &Path) -> Result<(), ExtractError> {
    let file = fs_err::File::open(archive)?;
    read::extract_tar_gz(std::io::BufReader::new(file), destination)
}

/// Extracts a `.zip` archive file.
pub fn extract_zip(archive: &Path, destination: &Path) -> Result<(), ExtractError> {
    let file = fs_err::File::open(archive)?;
    read::extract_zip(std::io::BufReader::new(file), destination)
}

/// Moves every top-level entry of `dir` into the subdirectory `unpack_dir`,
/// except for entries named in `keep` (the spec file stays at the root so
/// the package remains loadable).
///
/// Projects declare this relocation when their build expects the sources one
/// level down from where the archive puts them.
pub fn relocate_into_subdirectory(
    dir: &Path,
    unpack_dir: &str,
    keep: &[&str],
) -> Result<(), ExtractError> {
    let target = dir.join(unpack_dir);
    if target.exists() {
        return Err(ExtractError::UnpackDirectoryExists(unpack_dir.to_owned()));
    }
    fs_err::create_dir_all(&target)?;

    for entry in fs_err::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if entry.path() == target || keep.iter().any(|k| name.to_string_lossy() == *k) {
            continue;
        }
        fs_err::rename(entry.path(), target.join(&name))?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn relocates_all_but_kept_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cppan.yml"), "files: src\n").unwrap();
        std::fs::write(dir.path().join("a.cpp"), "").unwrap();
        std::fs::create_dir(dir.path().join("include")).unwrap();
        std::fs::write(dir.path().join("include/a.h"), "").unwrap();

        relocate_into_subdirectory(dir.path(), "src", &["cppan.yml"]).unwrap();

        assert!(dir.path().join("cppan.yml").is_file());
        assert!(dir.path().join("src/a.cpp").is_file());
        assert!(dir.path().join("src/include/a.h").is_file());
        assert!(!dir.path().join("a.cpp").exists());
    }

    #[test]
    fn refuses_existing_unpack_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        let err = relocate_into_subdirectory(dir.path(), "src", &[]).unwrap_err();
        assert!(matches!(err, ExtractError::UnpackDirectoryExists(_)));
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("pkg.rar");
        std::fs::write(&archive, "").unwrap();
        let err = extract(&archive, dir.path()).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedArchiveType(_)));
    }
}
