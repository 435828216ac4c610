use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{NaiveDateTime, Utc};
use cppan_types::{
    IdDependencies, Package, PackageFlags, PackagePath, Packages, PackagesSet, ProjectType,
    ProjectVersionId, ResolvedDependency, Version,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use url::Url;

use crate::{
    process_start_time, read_packages_db_schema_version, read_packages_db_version,
    tables::DATA_TABLES, DatabaseError, ServiceDatabase, DB_REPO_DIR_NAME, PACKAGES_DB_NAME,
    PACKAGES_DB_DOWNLOAD_TIME_FILE, PACKAGES_DB_REFRESH_INTERVAL, PACKAGES_DB_SCHEMA_VERSION,
};

/// Where the catalog mirror is fetched from.
#[derive(Clone, Debug)]
pub struct CatalogSource {
    /// Git repository holding the CSV bundle.
    pub git_url: String,
    /// Zipped archive of the repository's master branch, used when no git
    /// binary is available.
    pub master_archive_url: Url,
    /// Raw URL of the bundle's `db.version` file, used to decide whether a
    /// stale mirror actually changed.
    pub version_url: Url,
}

/// The local SQLite mirror of the remote package graph.
///
/// After [`PackagesDatabase::open`] the connection is read-only; resolution
/// never mutates the catalog.
#[derive(Debug)]
pub struct PackagesDatabase {
    conn: Mutex<Connection>,
    path: PathBuf,
    db_dir: PathBuf,
    db_repo_dir: PathBuf,
}

/// One matched `ProjectVersions` row.
struct VersionRow {
    id: ProjectVersionId,
    major: i64,
    minor: i64,
    patch: i64,
    branch: Option<String>,
    flags: u64,
    sha256: String,
    created: Option<String>,
}

impl VersionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(VersionRow {
            id: row.get::<_, i64>(0)? as ProjectVersionId,
            major: row.get::<_, Option<i64>>(1)?.unwrap_or(-1),
            minor: row.get::<_, Option<i64>>(2)?.unwrap_or(-1),
            patch: row.get::<_, Option<i64>>(3)?.unwrap_or(-1),
            branch: row.get(4)?,
            flags: row.get::<_, i64>(5)? as u64,
            sha256: row.get(6)?,
            created: row.get(7)?,
        })
    }

    fn version(&self) -> Version {
        match &self.branch {
            Some(branch) => Version::branch(branch.clone()),
            None => Version::number(self.major as i32, self.minor as i32, self.patch as i32),
        }
    }
}

const VERSION_ROW_SELECT: &str =
    "SELECT id, major, minor, patch, branch, flags, sha256, created FROM ProjectVersions WHERE ";

impl PackagesDatabase {
    /// Opens the catalog under the full refresh policy: create and mirror on
    /// first use, re-mirror when the TTL expired and the remote data version
    /// advanced. The connection ends up read-only.
    pub async fn open(
        db_dir: &Path,
        service: &ServiceDatabase,
        client: &reqwest_middleware::ClientWithMiddleware,
        source: &CatalogSource,
    ) -> Result<Self, DatabaseError> {
        let (mut db, created) = Self::create(db_dir)?;

        if created {
            tracing::info!("packages database was not found");
            db.download(client, source).await?;
            db.load(service, false)?;
        } else if db.is_current_db_old()? {
            tracing::debug!("checking remote catalog version");
            let version_remote = match fetch_remote_db_version(client, source).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("couldn't download db version file: {e}");
                    0
                }
            };
            if version_remote > read_packages_db_version(&db.db_repo_dir).unwrap_or(0) {
                db.download(client, source).await?;
                db.load(service, true)?;
            }
        }

        db.reopen_read_only()?;
        Ok(db)
    }

    /// Opens the catalog assuming an already-present, fresh mirror directory
    /// (`<db_dir>/repository`). Used by tests and by tooling that prepares
    /// the mirror out of band.
    pub fn open_from_mirror(
        db_dir: &Path,
        service: &ServiceDatabase,
    ) -> Result<Self, DatabaseError> {
        let (mut db, _created) = Self::create(db_dir)?;
        db.load(service, true)?;
        db.write_download_time()?;
        db.reopen_read_only()?;
        Ok(db)
    }

    fn create(db_dir: &Path) -> Result<(Self, bool), DatabaseError> {
        fs_err::create_dir_all(db_dir)?;
        let path = db_dir.join(PACKAGES_DB_NAME);
        let created = !path.exists();
        let conn = Connection::open(&path)?;
        if created {
            for td in DATA_TABLES {
                conn.execute_batch(td.sql)?;
            }
        }
        Ok((
            PackagesDatabase {
                conn: Mutex::new(conn),
                path,
                db_dir: db_dir.to_path_buf(),
                db_repo_dir: db_dir.join(DB_REPO_DIR_NAME),
            },
            created,
        ))
    }

    fn reopen_read_only(&mut self) -> Result<(), DatabaseError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        *self.conn.lock() = conn;
        Ok(())
    }

    /// The mirror directory holding the CSV bundle.
    pub fn repo_dir(&self) -> &Path {
        &self.db_repo_dir
    }

    /// Mirrors the remote catalog into the repository directory, preferring
    /// a native shallow git transport and falling back to a zip download.
    async fn download(
        &self,
        client: &reqwest_middleware::ClientWithMiddleware,
        source: &CatalogSource,
    ) -> Result<(), DatabaseError> {
        tracing::info!("downloading catalog");
        fs_err::create_dir_all(&self.db_repo_dir)?;

        if which::which("git").is_ok() {
            self.download_via_git(source).await?;
        } else {
            self.download_via_archive(client, source).await?;
        }

        self.write_download_time()
    }

    async fn download_via_git(&self, source: &CatalogSource) -> Result<(), DatabaseError> {
        let git = |args: &[&str]| {
            let mut cmd = tokio::process::Command::new("git");
            cmd.arg("-C").arg(&self.db_repo_dir).args(args);
            let rendered = args.join(" ");
            async move {
                let status = cmd.status().await?;
                if !status.success() {
                    return Err(DatabaseError::GitTransport(rendered, status));
                }
                Ok(())
            }
        };

        if !self.db_repo_dir.join(".git").exists() {
            git(&["init", "."]).await?;
            git(&["remote", "add", "github", &source.git_url]).await?;
            git(&["fetch", "--depth", "1", "github", "master"]).await?;
            git(&["reset", "--hard", "FETCH_HEAD"]).await?;
        } else {
            git(&["pull", "github", "master"]).await?;
        }
        Ok(())
    }

    async fn download_via_archive(
        &self,
        client: &reqwest_middleware::ClientWithMiddleware,
        source: &CatalogSource,
    ) -> Result<(), DatabaseError> {
        let tmp = tempfile::tempdir_in(&self.db_dir)?;
        let archive = tmp.path().join("master.zip");
        cppan_package_streaming::reqwest::download_to_path(
            client,
            source.master_archive_url.clone(),
            &archive,
            1_000_000_000,
        )
        .await
        .map_err(|e| DatabaseError::MirrorDownload(Box::new(e)))?;

        let unpack_dir = tmp.path().join("unpacked");
        cppan_package_streaming::fs::extract_zip(&archive, &unpack_dir)
            .map_err(|e| DatabaseError::MirrorDownload(Box::new(e)))?;

        // The github archive wraps everything in a `<repo>-master/` prefix;
        // flatten by file name.
        for entry in walkdir::WalkDir::new(&unpack_dir) {
            let entry = entry.map_err(|e| DatabaseError::MirrorDownload(Box::new(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let target = self.db_repo_dir.join(entry.file_name());
            fs_err::copy(entry.path(), &target)?;
        }
        Ok(())
    }

    /// Streams the mirrored CSV files into the data tables inside one
    /// transaction. `drop` wipes the previous contents first (used when
    /// re-mirroring over existing data).
    fn load(&self, service: &ServiceDatabase, drop: bool) -> Result<(), DatabaseError> {
        let schema_version = read_packages_db_schema_version(&self.db_repo_dir).unwrap_or(0);
        if schema_version != 0 && schema_version != PACKAGES_DB_SCHEMA_VERSION {
            return if schema_version > PACKAGES_DB_SCHEMA_VERSION {
                Err(DatabaseError::SchemaTooNew {
                    remote: schema_version,
                    client: PACKAGES_DB_SCHEMA_VERSION,
                })
            } else {
                Err(DatabaseError::SchemaTooOld {
                    remote: schema_version,
                    client: PACKAGES_DB_SCHEMA_VERSION,
                })
            };
        }
        if schema_version > service.packages_db_schema_version()? {
            self.recreate()?;
            service.set_packages_db_schema_version(schema_version)?;
        }

        let mut conn = self.conn.lock();
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let tx = conn.transaction()?;

        for td in DATA_TABLES {
            if drop {
                tx.execute(&format!("DELETE FROM {}", td.name), [])?;
            }

            let n_cols = tx
                .prepare(&format!("SELECT * FROM {} LIMIT 0", td.name))?
                .column_count();
            let placeholders = vec!["?"; n_cols].join(", ");
            let mut insert =
                tx.prepare(&format!("INSERT INTO {} VALUES ({placeholders})", td.name))?;

            let csv = self.db_repo_dir.join(format!("{}.csv", td.name));
            let contents = fs_err::read_to_string(&csv)
                .map_err(|e| DatabaseError::MirrorFile(e, csv.clone()))?;
            for line in contents.lines() {
                if line.is_empty() {
                    continue;
                }
                let values = line
                    .split(';')
                    .map(|field| {
                        if field.is_empty() {
                            rusqlite::types::Value::Null
                        } else {
                            rusqlite::types::Value::Text(field.to_owned())
                        }
                    })
                    .chain(std::iter::repeat(rusqlite::types::Value::Null))
                    .take(n_cols);
                insert.execute(rusqlite::params_from_iter(values))?;
            }
            std::mem::drop(insert);
        }

        tx.commit()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    fn recreate(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        for td in DATA_TABLES {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\";", td.name))?;
            conn.execute_batch(td.sql)?;
        }
        Ok(())
    }

    fn write_download_time(&self) -> Result<(), DatabaseError> {
        fs_err::write(
            self.db_dir.join(PACKAGES_DB_DOWNLOAD_TIME_FILE),
            Utc::now().timestamp().to_string(),
        )?;
        Ok(())
    }

    fn read_download_time(&self) -> i64 {
        fs_err::read_to_string(self.db_dir.join(PACKAGES_DB_DOWNLOAD_TIME_FILE))
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    fn is_current_db_old(&self) -> Result<bool, DatabaseError> {
        let age = Utc::now().timestamp() - self.read_download_time();
        Ok(age > PACKAGES_DB_REFRESH_INTERVAL.as_secs() as i64)
    }

    /// Closes the requested predicates to a deterministic id-keyed set with
    /// transitive edges. See the crate docs for the matching rules; the
    /// traversal memoizes on the version id so shared subgraphs and cycles
    /// are visited once.
    pub fn find_dependencies(
        &self,
        deps: &Packages,
        young_window: Duration,
    ) -> Result<IdDependencies, DatabaseError> {
        let conn = self.conn.lock();
        let mut all = IdDependencies::new();

        for dep in deps.values() {
            if dep.is_local() {
                continue;
            }

            let project: Option<(i64, i64, i64)> = conn
                .query_row(
                    "SELECT id, type_id, flags FROM Projects WHERE path = ?1",
                    params![dep.path.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((project_id, type_id, project_flags)) = project else {
                return Err(DatabaseError::PackageNotFound(dep.path.clone()));
            };

            if ProjectType::from_type_id(type_id) == Some(ProjectType::RootProject) {
                // Root projects have no artifact; their buildable children
                // are the real units.
                let mut stmt = conn.prepare(
                    "SELECT id, path, flags FROM Projects \
                     WHERE path LIKE ?1 AND type_id IN (1, 2) ORDER BY path",
                )?;
                let children: Vec<(i64, String, i64)> = stmt
                    .query_map(params![format!("{}.%", dep.path)], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<Result<_, _>>()?;
                if children.is_empty() {
                    return Err(DatabaseError::RootProjectEmpty(dep.path.clone()));
                }
                for (child_id, child_path, child_flags) in children {
                    let child_path: PackagePath = child_path.parse().map_err(|_| {
                        DatabaseError::PackageNotFound(dep.path.clone())
                    })?;
                    self.resolve_project(
                        &conn,
                        child_id,
                        child_path,
                        &dep.version,
                        child_flags as u64,
                        &mut all,
                        young_window,
                    )?;
                }
            } else {
                self.resolve_project(
                    &conn,
                    project_id,
                    dep.path.clone(),
                    &dep.version,
                    project_flags as u64,
                    &mut all,
                    young_window,
                )?;
            }
        }

        Ok(all)
    }

    /// Selects the concrete version for one directly requested project and
    /// recurses into its dependencies.
    #[allow(clippy::too_many_arguments)]
    fn resolve_project(
        &self,
        conn: &Connection,
        project_id: i64,
        path: PackagePath,
        predicate: &Version,
        project_flags: u64,
        all: &mut IdDependencies,
        young_window: Duration,
    ) -> Result<(), DatabaseError> {
        let row = self.exact_project_version(conn, project_id, &path, predicate)?;
        check_version_age(&row, &path, young_window)?;

        if let Some(existing) = all.get_mut(&row.id) {
            existing
                .package
                .flags
                .insert(PackageFlags::DIRECT_DEPENDENCY);
            return Ok(());
        }

        let project_flags = PackageFlags::from_bits(project_flags);
        let mut flags = project_flags | PackageFlags::from_bits(row.flags);
        flags.insert(PackageFlags::DIRECT_DEPENDENCY);

        let mut node = ResolvedDependency::new(
            Package::with_flags(path, row.version(), flags),
            row.id,
            row.sha256.clone(),
        );
        node.project_flags = project_flags;
        let id = row.id;
        all.insert(id, node);

        let dependency_ids = self.project_dependencies(conn, id, all, young_window)?;
        all.get_mut(&id)
            .expect("node was inserted above")
            .dependency_ids = dependency_ids;
        Ok(())
    }

    /// Collects and recursively resolves the dependency edges of one project
    /// version. Nodes are inserted into `all` before recursing so cyclic
    /// graphs terminate.
    fn project_dependencies(
        &self,
        conn: &Connection,
        version_id: ProjectVersionId,
        all: &mut IdDependencies,
        young_window: Duration,
    ) -> Result<BTreeSet<ProjectVersionId>, DatabaseError> {
        struct EdgeRow {
            project_id: i64,
            path: String,
            predicate: String,
            project_flags: u64,
            edge_flags: u64,
        }

        let edges: Vec<EdgeRow> = {
            let mut stmt = conn.prepare(
                "SELECT Projects.id, path, version, Projects.flags, \
                        ProjectVersionDependencies.flags \
                 FROM ProjectVersionDependencies \
                 JOIN Projects ON project_dependency_id = Projects.id \
                 WHERE project_version_id = ?1 ORDER BY path",
            )?;
            let rows = stmt.query_map(params![version_id as i64], |row| {
                Ok(EdgeRow {
                    project_id: row.get(0)?,
                    path: row.get(1)?,
                    predicate: row.get(2)?,
                    project_flags: row.get::<_, i64>(3)? as u64,
                    edge_flags: row.get::<_, i64>(4)? as u64,
                })
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let mut ids = BTreeSet::new();
        for edge in edges {
            let path: PackagePath = edge.path.parse().map_err(|_| {
                DatabaseError::VersionNotFound {
                    path: PackagePath::new(),
                    version: edge.predicate.clone(),
                }
            })?;
            let predicate: Version =
                edge.predicate
                    .parse()
                    .map_err(|_| DatabaseError::VersionNotFound {
                        path: path.clone(),
                        version: edge.predicate.clone(),
                    })?;

            let row = self.exact_project_version(conn, edge.project_id, &path, &predicate)?;
            check_version_age(&row, &path, young_window)?;
            ids.insert(row.id);

            if all.contains_key(&row.id) {
                continue;
            }

            // Both raw flag sets are kept on the node; the package carries
            // their OR, which is what the build consumes.
            let project_flags = PackageFlags::from_bits(edge.project_flags);
            let edge_flags = PackageFlags::from_bits(edge.edge_flags);
            let flags = project_flags | edge_flags | PackageFlags::from_bits(row.flags);

            let mut node = ResolvedDependency::new(
                Package::with_flags(path, row.version(), flags),
                row.id,
                row.sha256.clone(),
            );
            node.project_flags = project_flags;
            node.edge_flags = edge_flags;
            let id = row.id;
            all.insert(id, node);

            let dependency_ids = self.project_dependencies(conn, id, all, young_window)?;
            all.get_mut(&id)
                .expect("node was inserted above")
                .dependency_ids = dependency_ids;
        }
        Ok(ids)
    }

    /// Tiered version matching: an exact triple first, then progressively
    /// wider wildcards, but never wider than the predicate allows.
    fn exact_project_version(
        &self,
        conn: &Connection,
        project_id: i64,
        path: &PackagePath,
        predicate: &Version,
    ) -> Result<VersionRow, DatabaseError> {
        let not_found = || DatabaseError::VersionNotFound {
            path: path.clone(),
            version: predicate.to_string(),
        };

        if let Version::Branch(branch) = predicate {
            let query = format!("{VERSION_ROW_SELECT} project_id = ?1 AND branch = ?2");
            return conn
                .query_row(&query, params![project_id, branch], VersionRow::from_row)
                .optional()?
                .ok_or_else(not_found);
        }

        let (major, minor, patch) = match predicate {
            Version::Number {
                major,
                minor,
                patch,
            } => (*major, *minor, *patch),
            _ => (-1, -1, -1),
        };

        if patch != -1 {
            let query = format!(
                "{VERSION_ROW_SELECT} project_id = ?1 AND major = ?2 AND minor = ?3 \
                 AND patch = ?4 AND branch IS NULL"
            );
            return conn
                .query_row(
                    &query,
                    params![project_id, major, minor, patch],
                    VersionRow::from_row,
                )
                .optional()?
                .ok_or_else(not_found);
        }

        if minor != -1 {
            let query = format!(
                "{VERSION_ROW_SELECT} project_id = ?1 AND major = ?2 AND minor = ?3 \
                 AND branch IS NULL ORDER BY major DESC, minor DESC, patch DESC LIMIT 1"
            );
            return conn
                .query_row(&query, params![project_id, major, minor], VersionRow::from_row)
                .optional()?
                .ok_or_else(not_found);
        }

        if major != -1 {
            let query = format!(
                "{VERSION_ROW_SELECT} project_id = ?1 AND major = ?2 \
                 AND branch IS NULL ORDER BY major DESC, minor DESC, patch DESC LIMIT 1"
            );
            return conn
                .query_row(&query, params![project_id, major], VersionRow::from_row)
                .optional()?
                .ok_or_else(not_found);
        }

        let query = format!(
            "{VERSION_ROW_SELECT} project_id = ?1 AND branch IS NULL \
             ORDER BY major DESC, minor DESC, patch DESC LIMIT 1"
        );
        conn.query_row(&query, params![project_id], VersionRow::from_row)
            .optional()?
            .ok_or_else(not_found)
    }

    /// Resolves a predicate to the concrete version the catalog would select,
    /// without touching dependencies.
    pub fn exact_version_for_package(&self, package: &Package) -> Result<Version, DatabaseError> {
        let conn = self.conn.lock();
        let project_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM Projects WHERE path = ?1",
                params![package.path.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let project_id =
            project_id.ok_or_else(|| DatabaseError::PackageNotFound(package.path.clone()))?;
        let row =
            self.exact_project_version(&conn, project_id, &package.path, &package.version)?;
        Ok(row.version())
    }

    /// All versions the catalog knows for a project, branches first.
    pub fn versions_for_package(
        &self,
        path: &PackagePath,
    ) -> Result<Vec<Version>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT major, minor, patch, branch FROM ProjectVersions \
             JOIN Projects ON ProjectVersions.project_id = Projects.id \
             WHERE Projects.path = ?1 \
             ORDER BY branch, major, minor, patch",
        )?;
        let rows = stmt.query_map(params![path.to_string()], |row| {
            Ok((
                row.get::<_, Option<i64>>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut versions = Vec::new();
        for row in rows {
            let (major, minor, patch, branch) = row?;
            versions.push(match branch {
                Some(branch) => Version::branch(branch),
                None => Version::number(
                    major.unwrap_or(-1) as i32,
                    minor.unwrap_or(-1) as i32,
                    patch.unwrap_or(-1) as i32,
                ),
            });
        }
        Ok(versions)
    }

    /// Project paths matching a substring, every buildable project when the
    /// pattern is empty.
    pub fn matching_packages(&self, pattern: &str) -> Result<Vec<PackagePath>, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT path FROM Projects WHERE type_id <> 3 AND path LIKE ?1 ORDER BY path",
        )?;
        let rows = stmt.query_map(params![format!("%{pattern}%")], |row| {
            row.get::<_, String>(0)
        })?;

        let mut paths = Vec::new();
        for row in rows {
            if let Ok(path) = row?.parse() {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    /// Lists matching packages together with all their known versions.
    pub fn list_packages(
        &self,
        pattern: &str,
    ) -> Result<Vec<(PackagePath, Vec<Version>)>, DatabaseError> {
        let paths = self.matching_packages(pattern)?;
        paths
            .into_iter()
            .map(|path| {
                let versions = self.versions_for_package(&path)?;
                Ok((path, versions))
            })
            .collect()
    }

    /// Concrete package versions that directly depend on any of `pkgs`.
    pub fn dependent_packages(&self, pkgs: &PackagesSet) -> Result<PackagesSet, DatabaseError> {
        let conn = self.conn.lock();
        let mut dependents = PackagesSet::new();
        for pkg in pkgs {
            let project_id: Option<i64> = conn
                .query_row(
                    "SELECT id FROM Projects WHERE path = ?1",
                    params![pkg.path.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(project_id) = project_id else {
                continue;
            };

            let mut stmt = conn.prepare(
                "SELECT Projects.path, v.major, v.minor, v.patch, v.branch \
                 FROM ProjectVersionDependencies d \
                 JOIN ProjectVersions v ON d.project_version_id = v.id \
                 JOIN Projects ON v.project_id = Projects.id \
                 WHERE d.project_dependency_id = ?1",
            )?;
            let rows = stmt.query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?;
            for row in rows {
                let (path, major, minor, patch, branch) = row?;
                let Ok(path) = path.parse::<PackagePath>() else {
                    continue;
                };
                let version = match branch {
                    Some(branch) => Version::branch(branch),
                    None => Version::number(
                        major.unwrap_or(-1) as i32,
                        minor.unwrap_or(-1) as i32,
                        patch.unwrap_or(-1) as i32,
                    ),
                };
                dependents.insert(Package::new(path, version));
            }
        }
        Ok(dependents)
    }

    /// The transitive closure of [`PackagesDatabase::dependent_packages`].
    pub fn transitive_dependent_packages(
        &self,
        pkgs: &PackagesSet,
    ) -> Result<PackagesSet, DatabaseError> {
        let mut result = PackagesSet::new();
        let mut frontier = pkgs.clone();
        while !frontier.is_empty() {
            let next = self.dependent_packages(&frontier)?;
            frontier = next.difference(&result).cloned().collect();
            result.extend(frontier.iter().cloned());
        }
        Ok(result)
    }
}

/// Rejects rows published within the young-package window, counted back from
/// the moment this process started. A fresh row may still be missing from
/// other mirrors, so the caller re-resolves against the server.
fn check_version_age(
    row: &VersionRow,
    path: &PackagePath,
    window: Duration,
) -> Result<(), DatabaseError> {
    if window.is_zero() {
        return Ok(());
    }
    let Some(created) = row.created.as_deref() else {
        return Ok(());
    };
    let created = NaiveDateTime::parse_from_str(created, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(created, "%Y-%m-%dT%H:%M:%S"));
    let Ok(created) = created else {
        return Ok(());
    };
    let age = process_start_time().naive_utc() - created;
    if age < chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero()) {
        return Err(DatabaseError::YoungPackage(path.clone()));
    }
    Ok(())
}

async fn fetch_remote_db_version(
    client: &reqwest_middleware::ClientWithMiddleware,
    source: &CatalogSource,
) -> Result<i64, Box<dyn std::error::Error + Send + Sync>> {
    let response = client.get(source.version_url.clone()).send().await?;
    let text = response.error_for_status()?.text().await?;
    Ok(text.trim().parse()?)
}
