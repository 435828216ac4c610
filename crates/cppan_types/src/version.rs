use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    path::PathBuf,
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The pseudo version assigned to packages that are loaded from the local
/// filesystem instead of a remote. It behaves like a branch.
pub const LOCAL_VERSION_NAME: &str = "local";

/// A version literal or predicate.
///
/// Versions double as predicates: a fully specified `1.2.3` only matches
/// itself while `1.2` (stored with an unspecified patch) matches any `1.2.x`.
/// Unspecified numeric fields are represented by `-1` so that `1.*.*` is
/// representable as `(1, -1, -1)`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Version {
    /// Matches any version (`*`).
    Any,
    /// Matches the exact version that is already selected (`=`).
    Equal,
    /// A numeric version, possibly with unspecified trailing fields.
    Number {
        /// Major version number, `-1` when unspecified.
        major: i32,
        /// Minor version number, `-1` when unspecified.
        minor: i32,
        /// Patch version number, `-1` when unspecified.
        patch: i32,
    },
    /// A named branch.
    Branch(String),
}

impl Default for Version {
    fn default() -> Self {
        Version::Any
    }
}

/// An error that can occur when parsing a [`Version`] from a string.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseVersionError {
    /// The string is neither a wildcard, a numeric version nor a valid branch
    /// name.
    #[error("'{0}' is not a valid version or branch name")]
    InvalidVersion(String),

    /// A branch name must start with a letter or underscore and may only
    /// contain letters, digits, `_` and `-`.
    #[error("branch name '{0}' must match [A-Za-z_][A-Za-z0-9_-]*")]
    InvalidBranchName(String),

    /// `0.0.0` is not a usable version.
    #[error("version cannot be 0.0.0")]
    NullVersion,
}

fn is_valid_branch_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Version {
    /// Constructs a numeric version. Unspecified fields are `-1`.
    pub fn number(major: i32, minor: i32, patch: i32) -> Self {
        Version::Number {
            major,
            minor,
            patch,
        }
    }

    /// Constructs a branch version without validating the name.
    pub fn branch(name: impl Into<String>) -> Self {
        Version::Branch(name.into())
    }

    /// The pseudo version of local, on-disk projects.
    pub fn local() -> Self {
        Version::Branch(LOCAL_VERSION_NAME.to_owned())
    }

    /// True if this is the `local` pseudo version.
    pub fn is_local(&self) -> bool {
        matches!(self, Version::Branch(b) if b == LOCAL_VERSION_NAME)
    }

    /// True if this version refers to a branch.
    pub fn is_branch(&self) -> bool {
        matches!(self, Version::Branch(_))
    }

    /// True for anything that is not a branch.
    pub fn is_version(&self) -> bool {
        !self.is_branch()
    }

    /// True if every numeric field is specified, or the version is a branch.
    /// Only concrete versions can appear in the catalog or on disk.
    pub fn is_concrete(&self) -> bool {
        match self {
            Version::Branch(_) => true,
            Version::Number {
                major,
                minor,
                patch,
            } => *major != -1 && *minor != -1 && *patch != -1,
            Version::Any | Version::Equal => false,
        }
    }

    /// Checks structural validity: a valid branch name, or numeric fields
    /// that are at least `-1` and not all zero.
    pub fn is_valid(&self) -> bool {
        match self {
            Version::Branch(b) => is_valid_branch_name(b),
            Version::Number {
                major,
                minor,
                patch,
            } => {
                !(*major == 0 && *minor == 0 && *patch == 0)
                    && *major >= -1
                    && *minor >= -1
                    && *patch >= -1
            }
            Version::Any | Version::Equal => true,
        }
    }

    /// The upgrade ("can-be") relation: true iff `rhs` is concrete and every
    /// specified field of `self` equals the corresponding field of `rhs`.
    /// Branches only match themselves.
    pub fn can_be(&self, rhs: &Version) -> bool {
        if self == rhs {
            return true;
        }
        let (major, minor, patch) = match self {
            Version::Any => return true,
            Version::Equal | Version::Branch(_) => return false,
            Version::Number {
                major,
                minor,
                patch,
            } => (*major, *minor, *patch),
        };
        let Version::Number {
            major: rhs_major,
            minor: rhs_minor,
            ..
        } = rhs
        else {
            return false;
        };

        // *.*.* can be anything
        if major == -1 && minor == -1 && patch == -1 {
            return true;
        }
        // 1.*.* matches any 1.x.y
        if major == *rhs_major && minor == -1 && patch == -1 {
            return true;
        }
        // 1.2.* matches any 1.2.x
        if major == *rhs_major && minor == *rhs_minor && patch == -1 {
            return true;
        }
        false
    }

    /// Renders the full version string: the branch name or `major.minor.patch`.
    /// This is the form that takes part in package hashes; wildcards render as
    /// their predicate form.
    pub fn to_version_string(&self) -> String {
        match self {
            Version::Any => "*".to_owned(),
            Version::Equal => "=".to_owned(),
            Version::Branch(b) => b.clone(),
            Version::Number {
                major,
                minor,
                patch,
            } => format!("{major}.{minor}.{patch}"),
        }
    }

    /// Maps the version to a relative filesystem path: one component per
    /// numeric field, or the branch name.
    pub fn to_path(&self) -> PathBuf {
        match self {
            Version::Branch(b) => PathBuf::from(b),
            Version::Number {
                major,
                minor,
                patch,
            } => [major, minor, patch].iter().map(|n| n.to_string()).collect(),
            Version::Any | Version::Equal => PathBuf::from(self.to_string()),
        }
    }

    fn sort_key(&self) -> (u8, &str, (i32, i32, i32)) {
        match self {
            Version::Branch(b) => (0, b.as_str(), (0, 0, 0)),
            Version::Number {
                major,
                minor,
                patch,
            } => (1, "", (*major, *minor, *patch)),
            Version::Any | Version::Equal => (1, "", (-1, -1, -1)),
        }
    }
}

impl Display for Version {
    /// Renders the most compact predicate form: `*`, `=`, a branch name, or a
    /// numeric version with unspecified trailing fields dropped.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Version::Any => write!(f, "*"),
            Version::Equal => write!(f, "="),
            Version::Branch(b) => write!(f, "{b}"),
            Version::Number {
                major,
                minor,
                patch,
            } => {
                if *major == -1 && *minor == -1 && *patch == -1 {
                    return write!(f, "*");
                }
                write!(f, "{major}")?;
                if *minor != -1 {
                    write!(f, ".{minor}")?;
                }
                if *patch != -1 {
                    write!(f, ".{patch}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "*" => return Ok(Version::Any),
            "=" => return Ok(Version::Equal),
            _ => {}
        }

        let parts: Vec<&str> = s.split('.').collect();
        if parts.len() <= 3 && parts.iter().all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())) {
            let mut fields = [-1i32; 3];
            for (field, part) in fields.iter_mut().zip(&parts) {
                *field = part
                    .parse()
                    .map_err(|_| ParseVersionError::InvalidVersion(s.to_owned()))?;
            }
            let version = Version::number(fields[0], fields[1], fields[2]);
            if !version.is_valid() {
                return Err(ParseVersionError::NullVersion);
            }
            return Ok(version);
        }

        if is_valid_branch_name(s) {
            Ok(Version::Branch(s.to_owned()))
        } else if parts.len() > 1 {
            Err(ParseVersionError::InvalidVersion(s.to_owned()))
        } else {
            Err(ParseVersionError::InvalidBranchName(s.to_owned()))
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    /// Branches sort lexicographically and before numeric versions; numeric
    /// versions sort by `(major, minor, patch)`.
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl Serialize for Version {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
