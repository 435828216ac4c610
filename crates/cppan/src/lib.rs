#![deny(missing_docs)]

//! The top layer of cppan: loading project specs (from directories, files,
//! embedded source comments or URLs), the per-process [`PackageStore`] that
//! owns every loaded config and its resolved edges, package cleaning and the
//! seam the build-system generator plugs into.

mod clean;
mod config;
mod generator;
mod spec;
mod store;

use std::path::PathBuf;

pub use clean::{clean_packages, clean_packages_set, CleanTarget};
pub use config::Config;
pub use generator::{Generator, MetaGenerator};
pub use spec::extract_comments;
pub use store::{PackageConfig, PackageStore};

/// A failure in the top layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The given path is neither a spec file, a directory with one, nor a
    /// source file with an embedded spec.
    #[error("no spec found in '{}' (expected cppan.yml or main.cpp)", .0.display())]
    UnknownSpec(PathBuf),

    /// The spec path does not exist at all.
    #[error("file or directory does not exist: '{}'", .0.display())]
    Missing(PathBuf),

    /// The spec was found but failed to parse.
    #[error(transparent)]
    Spec(#[from] cppan_types::SpecError),

    /// A dependency of a local project could not be bound after resolution.
    #[error("{parent}: cannot find a match for dependency '{dependency}'")]
    DependencyNotFound {
        /// The requesting target.
        parent: String,
        /// The dependency that stayed unbound.
        dependency: String,
    },

    /// A package in the store never got a config attached.
    #[error("config was not created for target: {0}")]
    MissingConfig(String),

    /// Resolution or fetching failed.
    #[error(transparent)]
    Resolve(#[from] cppan_resolve::ResolveError),

    /// Storage bookkeeping failed.
    #[error(transparent)]
    Cache(#[from] cppan_cache::CacheError),

    /// A database operation failed.
    #[error(transparent)]
    Database(#[from] cppan_database::DatabaseError),

    /// Downloading a spec by URL failed.
    #[error(transparent)]
    Download(#[from] cppan_package_streaming::reqwest::DownloadError),

    /// An invalid clean pattern.
    #[error("invalid package pattern")]
    Pattern(#[from] regex::Error),

    /// A filesystem operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
