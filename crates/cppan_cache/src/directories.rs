use std::path::{Path, PathBuf};

use cppan_types::Package;

/// The derived directory layout under one storage root:
///
/// ```text
/// <storage>/
///   bin/ cfg/ etc/ exp/ lib/ obj/ src/ tmp/ usr/
///   etc/database/            # both SQLite databases and the mirror
///   etc/locks/               # advisory lock files
///   etc/stamps/packages/     # per-package fetch stamps
/// ```
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Directories {
    /// The storage root everything below hangs off.
    pub storage_dir: PathBuf,
    /// Built executables.
    pub storage_dir_bin: PathBuf,
    /// Generated configs.
    pub storage_dir_cfg: PathBuf,
    /// Databases, locks, stamps and other bookkeeping.
    pub storage_dir_etc: PathBuf,
    /// Exported build-system artifacts.
    pub storage_dir_exp: PathBuf,
    /// Built libraries.
    pub storage_dir_lib: PathBuf,
    /// Per-package build trees.
    pub storage_dir_obj: PathBuf,
    /// Unpacked package sources.
    pub storage_dir_src: PathBuf,
    /// Scratch space; safe to wipe.
    pub storage_dir_tmp: PathBuf,
    /// User-provided overlays.
    pub storage_dir_usr: PathBuf,
}

impl Directories {
    /// Derives the full layout from a storage root.
    pub fn from_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        let storage_dir = storage_dir.into();
        let sub = |name: &str| storage_dir.join(name);
        Directories {
            storage_dir_bin: sub("bin"),
            storage_dir_cfg: sub("cfg"),
            storage_dir_etc: sub("etc"),
            storage_dir_exp: sub("exp"),
            storage_dir_lib: sub("lib"),
            storage_dir_obj: sub("obj"),
            storage_dir_src: sub("src"),
            storage_dir_tmp: sub("tmp"),
            storage_dir_usr: sub("usr"),
            storage_dir,
        }
    }

    /// The per-user default storage root (`~/.cppan/storage`).
    pub fn default_user() -> std::io::Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "cannot determine the home directory",
            )
        })?;
        Ok(Self::from_storage_dir(home.join(".cppan").join("storage")))
    }

    /// Creates every directory of the layout.
    pub fn create_all(&self) -> std::io::Result<()> {
        for dir in [
            &self.storage_dir,
            &self.storage_dir_bin,
            &self.storage_dir_cfg,
            &self.storage_dir_etc,
            &self.storage_dir_exp,
            &self.storage_dir_lib,
            &self.storage_dir_obj,
            &self.storage_dir_src,
            &self.storage_dir_tmp,
            &self.storage_dir_usr,
            &self.database_dir(),
            &self.locks_dir(),
            &self.package_stamps_dir(),
        ] {
            fs_err::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Where both SQLite databases and the catalog mirror live.
    pub fn database_dir(&self) -> PathBuf {
        self.storage_dir_etc.join("database")
    }

    /// Where advisory lock files live.
    pub fn locks_dir(&self) -> PathBuf {
        self.storage_dir_etc.join("locks")
    }

    /// Where per-package fetch stamps live.
    pub fn package_stamps_dir(&self) -> PathBuf {
        self.storage_dir_etc.join("stamps").join("packages")
    }

    /// The stamp file recording the sha256 a package was last fetched as.
    pub fn package_stamp_file(&self, package: &Package) -> PathBuf {
        let mut path = self.package_stamps_dir().join(package.hash_path());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.set_file_name(format!("{name}.sha256"));
        path
    }

    /// The unpacked source tree of a package.
    pub fn source_dir(&self, package: &Package) -> PathBuf {
        self.storage_dir_src.join(package.hash_path())
    }

    /// The build tree of a package.
    pub fn object_dir(&self, package: &Package) -> PathBuf {
        self.storage_dir_obj.join(package.hash_path())
    }

    /// The download scratch directory.
    pub fn download_tmp_dir(&self) -> PathBuf {
        self.storage_dir_tmp.join("dl")
    }

    /// True when `path` is inside `root`.
    pub fn is_under_root(path: &Path, root: &Path) -> bool {
        path.starts_with(root)
    }
}

#[cfg(test)]
mod test {
    use cppan_types::Version;

    use super::*;

    #[test]
    fn layout_is_derived_from_root() {
        let dirs = Directories::from_storage_dir("/stor");
        assert_eq!(dirs.storage_dir_src, PathBuf::from("/stor/src"));
        assert_eq!(dirs.database_dir(), PathBuf::from("/stor/etc/database"));
        assert_eq!(dirs.locks_dir(), PathBuf::from("/stor/etc/locks"));
    }

    #[test]
    fn stamp_file_is_sharded_and_suffixed() {
        let dirs = Directories::from_storage_dir("/stor");
        let pkg = Package::new("org.foo.bar".parse().unwrap(), Version::number(1, 2, 3));
        let stamp = dirs.package_stamp_file(&pkg);
        assert!(stamp.starts_with("/stor/etc/stamps/packages"));
        assert!(stamp.to_string_lossy().ends_with(".sha256"));
        assert!(stamp
            .parent()
            .unwrap()
            .ends_with(pkg.hash_path().parent().unwrap()));
    }
}
