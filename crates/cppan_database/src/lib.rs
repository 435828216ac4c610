#![deny(missing_docs)]

//! The two local SQLite databases of cppan.
//!
//! The **packages database** ([`PackagesDatabase`]) is a read-mostly mirror
//! of the remote package graph, refreshed on a TTL from a git repository or a
//! zipped archive of CSV files. The **service database**
//! ([`ServiceDatabase`]) holds local process state: the installed set, file
//! stamps, config caches and startup bookkeeping.
//!
//! SQLite connections are guarded by a mutex because the bundled build is not
//! assumed to be reentrant; all queries are short and local so the coarse
//! lock is not a bottleneck.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use chrono::{DateTime, Utc};
use cppan_types::PackagePath;
use thiserror::Error;
use url::Url;

mod packages;
mod service;
mod tables;

pub use packages::{CatalogSource, PackagesDatabase};
pub use service::{ServiceDatabase, StartupAction};

/// Compile-time schema version of the packages database. The mirror bundle
/// carries its own `schema.version`; mismatches are fatal in one direction or
/// the other (see [`DatabaseError::SchemaTooNew`] and
/// [`DatabaseError::SchemaTooOld`]).
pub const PACKAGES_DB_SCHEMA_VERSION: i64 = 1;

/// Name of the schema version file inside the mirror bundle.
pub const PACKAGES_DB_SCHEMA_VERSION_FILE: &str = "schema.version";

/// Name of the data version file inside the mirror bundle.
pub const PACKAGES_DB_VERSION_FILE: &str = "db.version";

/// Name of the sidecar file recording the last successful mirror time.
pub const PACKAGES_DB_DOWNLOAD_TIME_FILE: &str = "packages.time";

/// How long a mirrored catalog is considered fresh.
pub const PACKAGES_DB_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

pub(crate) const PACKAGES_DB_NAME: &str = "packages.db";
pub(crate) const SERVICE_DB_NAME: &str = "service.db";
pub(crate) const DB_REPO_DIR_NAME: &str = "repository";

/// File mtimes recorded by the access table, keyed by path. The value is the
/// mtime in nanoseconds since the unix epoch.
pub type Stamps = BTreeMap<PathBuf, i64>;

/// The instant this process started resolving, used to detect catalog rows
/// that were published too close to the last mirror refresh.
pub fn process_start_time() -> DateTime<Utc> {
    static TSTART: OnceLock<DateTime<Utc>> = OnceLock::new();
    *TSTART.get_or_init(Utc::now)
}

/// An error produced by either database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The catalog has no project with the given path.
    #[error("package '{0}' not found in the catalog")]
    PackageNotFound(PackagePath),

    /// A root project expanded to zero buildable children.
    #[error("root project '{0}' is empty")]
    RootProjectEmpty(PackagePath),

    /// The requested version predicate matches no catalog row.
    #[error("no such version/branch '{version}' for project '{path}'")]
    VersionNotFound {
        /// The project that was looked up.
        path: PackagePath,
        /// The predicate, in compact form.
        version: String,
    },

    /// The selected catalog row was published within the young-package
    /// window; the caller must re-resolve against the remote.
    #[error("package '{0}' is young and must be retrieved from the server")]
    YoungPackage(PackagePath),

    /// The mirror bundle's schema is newer than this client understands.
    #[error(
        "the catalog schema ({remote}) is newer than this client ({client}); \
         please upgrade the client"
    )]
    SchemaTooNew {
        /// Schema version of the mirror bundle.
        remote: i64,
        /// Schema version compiled into the client.
        client: i64,
    },

    /// The mirror bundle's schema is older than this client.
    #[error(
        "the catalog schema ({remote}) is older than this client ({client}); \
         please wait for the server upgrade"
    )]
    SchemaTooOld {
        /// Schema version of the mirror bundle.
        remote: i64,
        /// Schema version compiled into the client.
        client: i64,
    },

    /// A mirror CSV or sidecar file was missing or unreadable.
    #[error("cannot read mirror file '{}'", .1.display())]
    MirrorFile(#[source] std::io::Error, PathBuf),

    /// Downloading the mirror failed.
    #[error("failed to download the catalog mirror")]
    MirrorDownload(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The external git transport exited with a failure.
    #[error("git {0} failed with {1}")]
    GitTransport(String, std::process::ExitStatus),

    /// An underlying SQLite failure.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// An underlying filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads the schema version file from a mirror directory.
pub fn read_packages_db_schema_version(dir: &Path) -> Result<i64, DatabaseError> {
    read_version_file(&dir.join(PACKAGES_DB_SCHEMA_VERSION_FILE))
}

/// Reads the data version file from a mirror directory.
pub fn read_packages_db_version(dir: &Path) -> Result<i64, DatabaseError> {
    read_version_file(&dir.join(PACKAGES_DB_VERSION_FILE))
}

fn read_version_file(path: &Path) -> Result<i64, DatabaseError> {
    let contents = fs_err::read_to_string(path)
        .map_err(|e| DatabaseError::MirrorFile(e, path.to_path_buf()))?;
    contents.trim().parse().map_err(|_| {
        DatabaseError::MirrorFile(
            std::io::Error::new(std::io::ErrorKind::InvalidData, "not an integer"),
            path.to_path_buf(),
        )
    })
}

/// The default public catalog location.
pub fn default_catalog_source() -> CatalogSource {
    const DB_REPO_URL: &str = "https://github.com/cppan/database";
    CatalogSource {
        git_url: DB_REPO_URL.to_owned(),
        master_archive_url: Url::parse(&format!("{DB_REPO_URL}/archive/master.zip"))
            .expect("static url is valid"),
        version_url: Url::parse(&format!(
            "https://raw.githubusercontent.com/cppan/database/master/{PACKAGES_DB_VERSION_FILE}"
        ))
        .expect("static url is valid"),
    }
}
