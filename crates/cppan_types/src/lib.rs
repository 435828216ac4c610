#![deny(missing_docs)]

//! `cppan_types` contains the data models shared by the cppan crates:
//! version predicates, hierarchical package paths, package identities and
//! the `cppan.yml` project specification. The crate itself only parses and
//! compares; everything stateful lives in the higher level crates.

mod dependency;
mod flags;
mod package;
mod package_path;
mod project;
mod settings;
mod source;
mod version;

pub use dependency::{IdDependencies, ProjectId, ProjectType, ProjectVersionId, ResolvedDependency};
pub use flags::PackageFlags;
pub use package::{Package, Packages, PackagesSet, ParseTargetNameError};
pub use package_path::{Namespace, PackagePath, ParsePackagePathError};
pub use project::{
    DependenciesDecl, DependencyDecl, IncludeDirectories, LanguageStandard, LibraryKind,
    OptionSet, Patch, Project, ProjectSpec, SpecError, StringOrSeq, TargetKind, CPPAN_FILENAME,
};
pub use settings::{RemoteSpec, Settings, DEFAULT_REMOTE_NAME};
pub use source::{ParseSourceError, Source};
pub use version::{ParseVersionError, Version, LOCAL_VERSION_NAME};
