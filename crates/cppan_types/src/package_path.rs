use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    path::PathBuf,
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Maximum length of the textual form of a package path.
const MAX_PACKAGE_PATH_LENGTH: usize = 2048;

/// The well known first elements of an absolute package path.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Namespace {
    /// Company projects (`com.`).
    Com,
    /// Open source projects (`org.`).
    Org,
    /// Private projects (`pvt.`).
    Pvt,
    /// Local, on-disk projects (`loc.`).
    Loc,
}

impl Namespace {
    /// The path element this namespace is written as.
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Com => "com",
            Namespace::Org => "org",
            Namespace::Pvt => "pvt",
            Namespace::Loc => "loc",
        }
    }

    fn from_element(e: &str) -> Option<Self> {
        match e {
            "com" => Some(Namespace::Com),
            "org" => Some(Namespace::Org),
            "pvt" => Some(Namespace::Pvt),
            "loc" => Some(Namespace::Loc),
            _ => None,
        }
    }

    // Display rank: loc and pvt sort before org, org before everything else.
    fn sort_rank(self) -> u8 {
        match self {
            Namespace::Loc => 0,
            Namespace::Pvt => 1,
            Namespace::Org => 2,
            Namespace::Com => 3,
        }
    }
}

/// An error that can occur when parsing a [`PackagePath`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParsePackagePathError {
    /// The textual form exceeds 2048 characters.
    #[error("package path is too long (must be <= {MAX_PACKAGE_PATH_LENGTH})")]
    TooLong,

    /// An element contains a character outside `[A-Za-z0-9_]`.
    #[error("invalid character in package path '{0}'")]
    InvalidCharacter(String),

    /// Two consecutive dots, or a leading/trailing dot.
    #[error("empty element in package path '{0}'")]
    EmptyElement(String),
}

/// A hierarchical, dotted package identifier like `org.boost.smart_ptr`.
///
/// Elements are lower-cased on construction so two paths that differ only in
/// case compare equal. The first element, when drawn from the fixed
/// [`Namespace`] set, makes the path absolute.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct PackagePath {
    elements: Vec<String>,
}

impl PackagePath {
    /// Returns the empty path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a path rooted at the given namespace.
    pub fn from_namespace(ns: Namespace) -> Self {
        Self {
            elements: vec![ns.as_str().to_owned()],
        }
    }

    /// The individual path elements.
    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    /// True if the path has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// The number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// The namespace of the path, if its first element is one.
    pub fn namespace(&self) -> Option<Namespace> {
        self.elements.first().and_then(|e| Namespace::from_element(e))
    }

    /// True if the first element is a known namespace.
    pub fn has_namespace(&self) -> bool {
        self.namespace().is_some()
    }

    /// True if the path lives in the `loc` namespace.
    pub fn is_loc(&self) -> bool {
        self.namespace() == Some(Namespace::Loc)
    }

    /// The owner element (the element right after the namespace), if present.
    pub fn owner(&self) -> Option<&str> {
        self.elements.get(1).map(String::as_str)
    }

    /// The last element of the path.
    pub fn name(&self) -> Option<&str> {
        self.elements.last().map(String::as_str)
    }

    /// Everything after the owner element.
    pub fn tail(&self) -> PackagePath {
        if self.elements.len() < 2 {
            return PackagePath::new();
        }
        PackagePath {
            elements: self.elements[2..].to_vec(),
        }
    }

    /// The path without its last element.
    pub fn parent(&self) -> PackagePath {
        let mut p = self.clone();
        p.elements.pop();
        p
    }

    /// A path is absolute when it has a namespace and names at least an
    /// owner. When a user name is given the owner must match it and there
    /// must be at least one further element.
    pub fn is_absolute(&self, user: Option<&str>) -> bool {
        if !self.has_namespace() {
            return false;
        }
        match user {
            None => self.elements.len() > 1,
            Some(user) => self.elements.len() > 2 && self.elements[1] == user,
        }
    }

    /// The complement of [`PackagePath::is_absolute`]. Relative paths must be
    /// rebased against a root project before use.
    pub fn is_relative(&self, user: Option<&str>) -> bool {
        !self.is_absolute(user)
    }

    /// True if this path is a strict prefix of `rhs` by element sequence.
    pub fn is_root_of(&self, rhs: &PackagePath) -> bool {
        if self.elements.len() >= rhs.elements.len() {
            return false;
        }
        self.elements
            .iter()
            .zip(&rhs.elements)
            .all(|(a, b)| a == b)
    }

    /// The suffix of this path after `root`, or the empty path when `root`
    /// is not a strict prefix of this path.
    pub fn back(&self, root: &PackagePath) -> PackagePath {
        if !root.is_root_of(self) {
            return PackagePath::new();
        }
        PackagePath {
            elements: self.elements[root.elements.len()..].to_vec(),
        }
    }

    /// Appends a single element. The element is validated and lower-cased
    /// like during parsing.
    pub fn push(&mut self, element: &str) -> Result<(), ParsePackagePathError> {
        if element.is_empty() {
            return Err(ParsePackagePathError::EmptyElement(element.to_owned()));
        }
        if !element
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ParsePackagePathError::InvalidCharacter(element.to_owned()));
        }
        self.elements.push(element.to_ascii_lowercase());
        Ok(())
    }

    /// Returns a new path with `element` appended.
    pub fn join(&self, element: &str) -> Result<PackagePath, ParsePackagePathError> {
        let mut p = self.clone();
        p.push(element)?;
        Ok(p)
    }

    /// Returns a new path with all elements of `other` appended.
    pub fn joined(&self, other: &PackagePath) -> PackagePath {
        let mut p = self.clone();
        p.elements.extend(other.elements.iter().cloned());
        p
    }

    /// Returns the sub-path `[start, end)`; `end == None` means "to the end".
    pub fn slice(&self, start: usize, end: Option<usize>) -> PackagePath {
        let end = end.unwrap_or(self.elements.len()).min(self.elements.len());
        let start = start.min(end);
        PackagePath {
            elements: self.elements[start..end].to_vec(),
        }
    }

    /// Maps the path to a relative filesystem path. The owner element is
    /// split into `first-char / first-two-chars / element` shards to bound
    /// the directory fan-out of popular namespaces.
    pub fn to_fs_path(&self) -> PathBuf {
        let mut p = PathBuf::new();
        for (i, e) in self.elements.iter().enumerate() {
            if i == 1 {
                p.push(&e[..e.len().min(1)]);
                p.push(&e[..e.len().min(2)]);
            }
            p.push(e);
        }
        p
    }
}

impl Display for PackagePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.elements.join("."))
    }
}

impl FromStr for PackagePath {
    type Err = ParsePackagePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(PackagePath::new());
        }
        if s.len() > MAX_PACKAGE_PATH_LENGTH {
            return Err(ParsePackagePathError::TooLong);
        }
        let mut path = PackagePath::new();
        for element in s.split('.') {
            if element.is_empty() {
                return Err(ParsePackagePathError::EmptyElement(s.to_owned()));
            }
            path.push(element)
                .map_err(|_| ParsePackagePathError::InvalidCharacter(s.to_owned()))?;
        }
        Ok(path)
    }
}

impl PartialOrd for PackagePath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackagePath {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = |p: &PackagePath| p.namespace().map_or(u8::MAX, Namespace::sort_rank);
        rank(self)
            .cmp(&rank(other))
            .then_with(|| self.elements.cmp(&other.elements))
    }
}

impl Serialize for PackagePath {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackagePath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
