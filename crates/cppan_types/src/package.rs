use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    path::PathBuf,
    str::FromStr,
    sync::OnceLock,
};

use cppan_digest::{sha256_hex, shorten_hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{PackageFlags, PackagePath, Version};

/// A requested or resolved package: a package path, a version (or version
/// predicate) and its flags.
///
/// Identity is the `(path, version)` pair; flags and the memoized names do
/// not take part in comparisons. The derived `target_name` and content hash
/// are computed lazily and cached because they are requested for every
/// package on every run.
#[derive(Clone, Debug, Default)]
pub struct Package {
    /// The hierarchical identifier of the package.
    pub path: PackagePath,
    /// The version or version predicate.
    pub version: Version,
    /// Aspect flags, merged from the project row and the requesting edge.
    pub flags: PackageFlags,

    target_name: OnceLock<String>,
    hash: OnceLock<String>,
}

/// A set of named version predicates, keyed by the textual package path.
pub type Packages = BTreeMap<String, Package>;

/// An ordered set of packages.
pub type PackagesSet = BTreeSet<Package>;

/// An error returned when a `path-version` target name cannot be split back
/// into a [`Package`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseTargetNameError {
    /// The target name contains no `-` separator.
    #[error("target name '{0}' has no version suffix")]
    MissingVersion(String),

    /// The path or version part failed to parse.
    #[error("invalid target name '{0}': {1}")]
    Invalid(String, String),
}

impl Package {
    /// Constructs a package from its parts.
    pub fn new(path: PackagePath, version: Version) -> Self {
        Package {
            path,
            version,
            flags: PackageFlags::empty(),
            target_name: OnceLock::new(),
            hash: OnceLock::new(),
        }
    }

    /// Constructs a package with flags.
    pub fn with_flags(path: PackagePath, version: Version, flags: PackageFlags) -> Self {
        Package {
            flags,
            ..Package::new(path, version)
        }
    }

    /// True when either part of the identity is unusable.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty() || !self.version.is_valid()
    }

    /// True for local, on-disk projects.
    pub fn is_local(&self) -> bool {
        self.flags.contains(PackageFlags::LOCAL_PROJECT) || self.path.is_loc()
    }

    /// The build-system target name: `{path}-{version}`, or the bare path
    /// when the version predicate is `*`.
    pub fn target_name(&self) -> &str {
        self.target_name.get_or_init(|| {
            let v = self.version.to_string();
            if v == "*" {
                self.path.to_string()
            } else {
                format!("{}-{}", self.path, v)
            }
        })
    }

    /// The target name with every `.` replaced by `_`, usable as a variable
    /// or cache-key name in generated build files.
    pub fn variable_name(&self) -> String {
        self.target_name().replace('.', "_")
    }

    /// The content hash of the package tuple: the hex sha256 of
    /// `"{path}/{version}"`.
    pub fn hash(&self) -> &str {
        self.hash
            .get_or_init(|| sha256_hex(format!("{}/{}", self.path, self.version.to_version_string())))
    }

    /// The first eight hex characters of [`Package::hash`].
    pub fn short_hash(&self) -> &str {
        shorten_hash(self.hash())
    }

    /// The relative storage location of this package, derived from the short
    /// hash: `hh / hh / rest`.
    pub fn hash_path(&self) -> PathBuf {
        let h = self.short_hash();
        let mut p = PathBuf::new();
        p.push(&h[0..2]);
        p.push(&h[2..4]);
        p.push(&h[4..]);
        p
    }
}

impl Display for Package {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target_name())
    }
}

impl FromStr for Package {
    type Err = ParseTargetNameError;

    /// Splits a `path-version` target name back into a package.
    fn from_str(target: &str) -> Result<Self, Self::Err> {
        let (path, version) = target
            .rsplit_once('-')
            .ok_or_else(|| ParseTargetNameError::MissingVersion(target.to_owned()))?;
        let path: PackagePath = path
            .parse()
            .map_err(|e: crate::ParsePackagePathError| {
                ParseTargetNameError::Invalid(target.to_owned(), e.to_string())
            })?;
        let version: Version = version
            .parse()
            .map_err(|e: crate::ParseVersionError| {
                ParseTargetNameError::Invalid(target.to_owned(), e.to_string())
            })?;
        Ok(Package::new(path, version))
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.version == other.version
    }
}

impl Eq for Package {}

impl PartialOrd for Package {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Package {
    fn cmp(&self, other: &Self) -> Ordering {
        (&self.path, &self.version).cmp(&(&other.path, &other.version))
    }
}

impl Hash for Package {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.version.hash(state);
    }
}

impl Serialize for Package {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.target_name().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Package {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use cppan_digest::sha256_hex;

    use super::*;

    fn package(path: &str, version: &str) -> Package {
        Package::new(path.parse().unwrap(), version.parse().unwrap())
    }

    #[test]
    fn target_name_forms() {
        assert_eq!(package("org.foo.bar", "1.2.3").target_name(), "org.foo.bar-1.2.3");
        assert_eq!(package("org.foo.bar", "master").target_name(), "org.foo.bar-master");
        assert_eq!(package("org.foo.bar", "*").target_name(), "org.foo.bar");
        assert_eq!(
            package("org.foo.bar", "1.2.3").variable_name(),
            "org_foo_bar-1.2.3"
        );
    }

    #[test]
    fn hash_is_sha256_of_path_slash_version() {
        let p = package("org.foo.bar", "1.2.3");
        assert_eq!(p.hash(), sha256_hex("org.foo.bar/1.2.3"));
        assert_eq!(p.short_hash(), &p.hash()[..8]);
    }

    #[test]
    fn hash_path_shards() {
        let p = package("org.foo.bar", "1.2.3");
        let h = p.short_hash().to_owned();
        assert_eq!(
            p.hash_path(),
            PathBuf::from(&h[0..2]).join(&h[2..4]).join(&h[4..])
        );
    }

    #[test]
    fn identity_ignores_flags() {
        let a = package("org.foo.bar", "1.2.3");
        let mut b = package("org.foo.bar", "1.2.3");
        b.flags.insert(PackageFlags::EXECUTABLE);
        assert_eq!(a, b);
    }

    #[test]
    fn round_trips_target_name() {
        let p = package("org.foo.bar", "1.2.3");
        let q: Package = p.target_name().parse().unwrap();
        assert_eq!(p, q);

        assert!(matches!(
            "noversion".parse::<Package>(),
            Err(ParseTargetNameError::MissingVersion(_))
        ));
    }
}
