use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::{
    PackageFlags, PackagePath, ParseVersionError, Settings, Source, Version,
};

/// The name of the project specification file.
pub const CPPAN_FILENAME: &str = "cppan.yml";

/// An error produced while interpreting a project spec.
#[derive(Debug, Error)]
pub enum SpecError {
    /// The YAML failed to parse or did not match the schema.
    #[error("failed to parse project spec")]
    Parse(#[from] serde_yaml::Error),

    /// A dependency entry carried an invalid version predicate.
    #[error("invalid version for dependency '{0}'")]
    InvalidDependencyVersion(String, #[source] ParseVersionError),
}

/// A YAML value that is either a single string or a sequence of strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringOrSeq {
    /// A single entry.
    One(String),
    /// Multiple entries.
    Many(Vec<String>),
}

impl StringOrSeq {
    /// Normalizes to a vector.
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrSeq::One(s) => vec![s],
            StringOrSeq::Many(v) => v,
        }
    }

    /// Iterates the entries without consuming.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        match self {
            StringOrSeq::One(s) => std::slice::from_ref(s).iter(),
            StringOrSeq::Many(v) => v.iter(),
        }
        .map(String::as_str)
    }
}

impl Default for StringOrSeq {
    fn default() -> Self {
        StringOrSeq::Many(Vec::new())
    }
}

/// The kind of artifact a project builds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A library (`l`, `lib`, `library`).
    #[default]
    Library,
    /// An executable (`e`, `exe`, `executable`).
    Executable,
}

impl<'de> Deserialize<'de> for TargetKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "l" | "lib" | "library" => Ok(TargetKind::Library),
            "e" | "exe" | "executable" => Ok(TargetKind::Executable),
            other => Err(serde::de::Error::custom(format!(
                "unknown project type '{other}'"
            ))),
        }
    }
}

/// The flavor of a library target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    /// A static library.
    #[default]
    Static,
    /// A shared library.
    Shared,
    /// A plugin-style module.
    Module,
}

/// A C or C++ language level: either a plain number or a named draft level
/// like `1z` or `2x`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LanguageStandard {
    /// A numeric standard such as `11`, `14`, `17`.
    Number(u32),
    /// A named draft level such as `1z` or `2x`.
    Named(String),
}

/// Public and private include directories of a target.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IncludeDirectories {
    /// Directories exported to dependents.
    pub public: Option<StringOrSeq>,
    /// Directories used only when building the target itself.
    pub private: Option<StringOrSeq>,
}

/// Textual patches applied to the unpacked sources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Patch {
    /// Plain `from -> to` replacements applied to every source file.
    pub replace_in_files: BTreeMap<String, String>,
}

/// Per-variant build options (`any`, `static`, `shared`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionSet {
    /// Preprocessor definitions.
    pub definitions: Option<StringOrSeq>,
    /// Additional include directories.
    pub include_directories: Option<StringOrSeq>,
    /// Raw compile options.
    pub compile_options: Option<StringOrSeq>,
    /// Raw link options.
    pub link_options: Option<StringOrSeq>,
    /// Libraries linked into the target.
    pub link_libraries: Option<StringOrSeq>,
}

/// A single dependency declaration: either a bare version predicate string or
/// a detailed form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyDecl {
    /// `name: "1.2"`.
    Version(String),
    /// `name: { version: "1.2", private: true }`.
    Detailed {
        /// The version predicate; `*` when omitted.
        version: Option<String>,
        /// Marks the edge private to this target.
        #[serde(default)]
        private: bool,
        /// Only the include directories of the dependency are consumed.
        #[serde(default)]
        include_directories_only: bool,
    },
}

impl DependencyDecl {
    /// The version predicate of this declaration.
    pub fn version(&self) -> Result<Version, ParseVersionError> {
        match self {
            DependencyDecl::Version(v) => v.parse(),
            DependencyDecl::Detailed { version, .. } => match version {
                Some(v) => v.parse(),
                None => Ok(Version::Any),
            },
        }
    }

    /// The edge flags of this declaration.
    pub fn flags(&self) -> PackageFlags {
        let mut flags = PackageFlags::empty();
        if let DependencyDecl::Detailed {
            private,
            include_directories_only,
            ..
        } = self
        {
            flags.set(PackageFlags::PRIVATE_DEPENDENCY, *private);
            flags.set(
                PackageFlags::INCLUDE_DIRECTORIES_ONLY,
                *include_directories_only,
            );
        }
        flags
    }
}

/// The `dependencies` key: a map of declarations or a bare list of names
/// (which all default to the `*` predicate).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependenciesDecl {
    /// `dependencies: { a: "1", b: { version: "2" } }`.
    Map(BTreeMap<String, DependencyDecl>),
    /// `dependencies: [a, b]`.
    Seq(Vec<String>),
    /// `dependencies:` with no value.
    Empty,
}

impl DependenciesDecl {
    /// Normalizes all forms into `(name, declaration)` pairs.
    pub fn entries(&self) -> Vec<(String, DependencyDecl)> {
        match self {
            DependenciesDecl::Map(map) => map
                .iter()
                .map(|(name, decl)| (name.clone(), decl.clone()))
                .collect(),
            DependenciesDecl::Seq(names) => names
                .iter()
                .map(|name| (name.clone(), DependencyDecl::Version("*".to_owned())))
                .collect(),
            DependenciesDecl::Empty => Vec::new(),
        }
    }
}

impl Default for DependenciesDecl {
    fn default() -> Self {
        DependenciesDecl::Map(BTreeMap::new())
    }
}

/// The per-target part of a project spec.
///
/// The same keys appear at the top level of `cppan.yml` (single-project
/// specs) and below each entry of the `projects` map.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    /// Project version.
    pub version: Option<Version>,
    /// Where the sources come from.
    pub source: Option<Source>,
    /// Target kind, `library` when omitted.
    #[serde(rename = "type")]
    pub ty: Option<TargetKind>,
    /// Library flavor.
    pub library_type: Option<LibraryKind>,
    /// The project only ships headers.
    pub header_only: Option<bool>,
    /// Source file selection.
    pub files: Option<StringOrSeq>,
    /// Additional build-only sources.
    pub build: Option<StringOrSeq>,
    /// Files excluded from the published archive.
    pub exclude_from_package: Option<StringOrSeq>,
    /// Files excluded from the build.
    pub exclude_from_build: Option<StringOrSeq>,
    /// Include directories of the target.
    pub include_directories: IncludeDirectories,
    /// Per-variant build options keyed by `any`, `static` or `shared`.
    pub options: BTreeMap<String, OptionSet>,
    /// Textual patches applied after unpack.
    pub patch: Patch,
    /// C standard level.
    pub c_standard: Option<LanguageStandard>,
    /// C++ standard level.
    pub cxx_standard: Option<LanguageStandard>,
    /// Read the file list from a `BUILD`/`BUILD.bazel` file.
    pub import_from_bazel: bool,
    /// Directory, relative to the project root, the sources live in.
    pub root_directory: Option<String>,
    /// Move all unpacked files into this subdirectory after unpack.
    pub unpack_directory: Option<String>,
    /// Build-system configure checks, keyed by check kind.
    pub checks: BTreeMap<String, BTreeSet<String>>,
    /// Dependency edges of this target.
    #[serde(alias = "deps")]
    pub dependencies: DependenciesDecl,
}

impl Project {
    /// Applies the flags implied by this project's declaration.
    pub fn apply_flags(&self, flags: &mut PackageFlags) {
        if self.ty == Some(TargetKind::Executable) {
            flags.insert(PackageFlags::EXECUTABLE);
        }
        if self.header_only == Some(true) {
            flags.insert(PackageFlags::HEADER_ONLY);
        }
    }

    /// Merges the configure checks of `other` into this project.
    pub fn merge_checks(&mut self, other: &Project) {
        for (kind, entries) in &other.checks {
            self.checks
                .entry(kind.clone())
                .or_default()
                .extend(entries.iter().cloned());
        }
    }
}

/// A complete `cppan.yml` document.
///
/// Single-project specs put the [`Project`] keys at the top level; multi
/// project specs add a `projects` map whose entries inherit nothing from the
/// root (matching the historical loader).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSpec {
    /// Namespace used to rebase relative dependency paths.
    pub root_project: Option<PackagePath>,
    /// Subprojects keyed by their relative name.
    pub projects: BTreeMap<String, Project>,
    /// Per-invocation overrides.
    pub local_settings: Option<Settings>,
    /// The root (default) project of the spec.
    #[serde(flatten)]
    pub root: Project,
}

impl ProjectSpec {
    /// Parses a spec from YAML text.
    pub fn from_yaml_str(s: &str) -> Result<Self, SpecError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// True when the spec declares subprojects.
    pub fn has_subprojects(&self) -> bool {
        !self.projects.is_empty()
    }

    /// The projects of this spec: the named subprojects, or the root project
    /// under the empty name.
    pub fn projects(&self) -> Vec<(String, &Project)> {
        if self.projects.is_empty() {
            vec![(String::new(), &self.root)]
        } else {
            self.projects
                .iter()
                .map(|(name, project)| (name.clone(), project))
                .collect()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_single_project_spec() {
        let spec = ProjectSpec::from_yaml_str(
            r#"
version: 1.2.3
type: lib
files: src/.*
dependencies:
  org.foo.bar: "1"
  org.foo.baz:
    version: "2.1"
    private: true
"#,
        )
        .unwrap();

        assert!(!spec.has_subprojects());
        assert_eq!(spec.root.version, Some(Version::number(1, 2, 3)));
        assert_eq!(spec.root.ty, Some(TargetKind::Library));

        let entries = spec.root.dependencies.entries();
        assert_eq!(entries.len(), 2);
        let (name, decl) = &entries[1];
        assert_eq!(name, "org.foo.baz");
        assert_eq!(decl.version().unwrap(), Version::number(2, 1, -1));
        assert!(decl.flags().contains(PackageFlags::PRIVATE_DEPENDENCY));
    }

    #[test]
    fn parses_subprojects_and_seq_dependencies() {
        let spec = ProjectSpec::from_yaml_str(
            r#"
root_project: pvt.someone
projects:
  alpha:
    type: exe
    dependencies: [org.a.b, org.c.d]
  beta:
    unpack_directory: src
"#,
        )
        .unwrap();

        assert!(spec.has_subprojects());
        let projects = spec.projects();
        assert_eq!(projects.len(), 2);
        let alpha = &spec.projects["alpha"];
        assert_eq!(alpha.ty, Some(TargetKind::Executable));
        let entries = alpha.dependencies.entries();
        assert!(entries
            .iter()
            .all(|(_, decl)| decl.version().unwrap() == Version::Any));
        assert_eq!(
            spec.projects["beta"].unpack_directory.as_deref(),
            Some("src")
        );
    }

    #[test]
    fn parses_options_and_standards() {
        let spec = ProjectSpec::from_yaml_str(
            r#"
cxx_standard: 1z
options:
  any:
    definitions: FOO=1
  shared:
    definitions: [BAR=1, BAZ=1]
"#,
        )
        .unwrap();

        assert_eq!(
            spec.root.cxx_standard,
            Some(LanguageStandard::Named("1z".to_owned()))
        );
        let any = &spec.root.options["any"];
        assert_eq!(
            any.definitions,
            Some(StringOrSeq::One("FOO=1".to_owned()))
        );
    }

    #[test]
    fn executable_kind_sets_flags() {
        let mut flags = PackageFlags::empty();
        let project = Project {
            ty: Some(TargetKind::Executable),
            ..Project::default()
        };
        project.apply_flags(&mut flags);
        assert!(flags.contains(PackageFlags::EXECUTABLE));
    }
}
