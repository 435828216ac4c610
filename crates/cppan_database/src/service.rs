use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use cppan_digest::sha256_hex;
use cppan_types::{Package, PackagesSet};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{tables::service_tables, DatabaseError, Stamps, SERVICE_DB_NAME};

/// One-shot maintenance performed when a new client version first touches an
/// existing service database. Append only; ids are recorded in the
/// `StartupActions` table once performed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StartupAction {
    /// Remove every generated config from the storage.
    ClearCache,
    /// Drop the cached config hashes.
    ClearConfigHashes,
    /// Recreate service tables whose schema fingerprint changed.
    CheckSchema,
}

impl StartupAction {
    fn code(self) -> i64 {
        match self {
            StartupAction::ClearCache => 0,
            StartupAction::ClearConfigHashes => 1 << 0,
            StartupAction::CheckSchema => 1 << 1,
        }
    }
}

// (id, action): the id makes re-running an action under a new id possible.
const STARTUP_ACTIONS: &[(i64, StartupAction)] = &[
    (1, StartupAction::ClearCache),
    (2, StartupAction::ClearConfigHashes),
    (4, StartupAction::CheckSchema),
];

/// The local process-state database.
///
/// All operations take the connection mutex for their whole duration; no
/// method holds it across a call into other crates.
pub struct ServiceDatabase {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl ServiceDatabase {
    /// Opens (creating if necessary) the service database in `db_dir` and
    /// performs the per-run bookkeeping: table creation, client stamp check
    /// and the run counter.
    ///
    /// `client_stamp` identifies the running client build; when it differs
    /// from the recorded one the file stamps are invalidated wholesale.
    pub fn open(db_dir: &Path, client_stamp: &str) -> Result<Self, DatabaseError> {
        fs_err::create_dir_all(db_dir)?;
        let path = db_dir.join(SERVICE_DB_NAME);
        let conn = Connection::open(&path)?;
        let db = ServiceDatabase {
            conn: Mutex::new(conn),
            path,
        };
        db.create_tables()?;
        db.check_stamp(client_stamp)?;
        db.increase_number_of_runs()?;
        Ok(db)
    }

    /// The location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates missing tables and fingerprints them. Safe to call on every
    /// run.
    fn create_tables(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        let tables = service_tables();

        let table_exists = |conn: &Connection, name: &str| -> Result<bool, rusqlite::Error> {
            conn.query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
        };

        // TableHashes first, out of order, so the fingerprints of the other
        // tables have somewhere to go.
        for (name, sql) in tables
            .iter()
            .filter(|(name, _)| name == "TableHashes")
            .chain(tables.iter().filter(|(name, _)| name != "TableHashes"))
        {
            if table_exists(&conn, name)? {
                continue;
            }
            conn.execute_batch(sql)?;
            set_table_hash(&conn, name, &sha256_hex(sql))?;
        }
        Ok(())
    }

    /// Performs the startup actions a new client version owes once. Failures
    /// are logged and swallowed; startup maintenance must not block a run.
    /// Returns the actions that were actually performed so the caller can
    /// react to the ones that touch the storage (e.g. `ClearCache`).
    pub fn perform_startup_actions(&self) -> Vec<StartupAction> {
        let mut performed = Vec::new();
        for (id, action) in STARTUP_ACTIONS {
            let done = match self.is_action_performed(*id, *action) {
                Ok(done) => done,
                Err(e) => {
                    tracing::warn!("could not check startup action state: {e}");
                    continue;
                }
            };
            if done || performed.contains(action) {
                continue;
            }
            if performed.is_empty() {
                tracing::info!("performing actions for the new client version");
            }
            if let Err(e) = self.run_startup_action(*action) {
                tracing::warn!("startup action failed: {e}");
                continue;
            }
            if let Err(e) = self.set_action_performed(*id, *action) {
                tracing::warn!("could not record startup action: {e}");
            }
            performed.push(*action);
        }
        performed
    }

    fn run_startup_action(&self, action: StartupAction) -> Result<(), DatabaseError> {
        match action {
            // The caller owns the storage directories; it reacts to the
            // returned action.
            StartupAction::ClearCache => Ok(()),
            StartupAction::ClearConfigHashes => self.clear_config_hashes(),
            StartupAction::CheckSchema => self.check_schema(),
        }
    }

    /// Recreates every service table whose creation SQL no longer matches
    /// its recorded fingerprint. The table contents are dropped; service
    /// data is always reconstructible.
    fn check_schema(&self) -> Result<(), DatabaseError> {
        self.create_tables()?;
        let conn = self.conn.lock();
        for (name, sql) in service_tables() {
            let hash = sha256_hex(&sql);
            let recorded: Option<String> = conn
                .query_row(
                    "SELECT hash FROM TableHashes WHERE tbl = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;
            if recorded.as_deref() == Some(hash.as_str()) {
                continue;
            }
            tracing::debug!("service table {name} changed, recreating");
            conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{name}\";"))?;
            conn.execute_batch(&sql)?;
            set_table_hash(&conn, &name, &hash)?;
        }
        Ok(())
    }

    fn is_action_performed(&self, id: i64, action: StartupAction) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM StartupActions WHERE id = ?1 AND action = ?2",
            params![id, action.code()],
            |row| row.get(0),
        )?;
        Ok(n == 1)
    }

    fn set_action_performed(&self, id: i64, action: StartupAction) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO StartupActions (id, action) VALUES (?1, ?2)",
            params![id, action.code()],
        )?;
        Ok(())
    }

    /// Compares the recorded client stamp with the running one; a change
    /// invalidates all file stamps (generated files may have a new format).
    fn check_stamp(&self, client_stamp: &str) -> Result<(), DatabaseError> {
        let recorded: Option<String> = {
            let conn = self.conn.lock();
            conn.query_row("SELECT stamp FROM ClientStamp", [], |row| row.get(0))
                .optional()?
        };

        match recorded {
            Some(s) if s == client_stamp => return Ok(()),
            Some(_) => {
                let conn = self.conn.lock();
                conn.execute("UPDATE ClientStamp SET stamp = ?1", params![client_stamp])?;
            }
            None => {
                let conn = self.conn.lock();
                conn.execute("INSERT INTO ClientStamp VALUES (?1)", params![client_stamp])?;
            }
        }
        self.clear_file_stamps()
    }

    /// The number of completed runs so far.
    pub fn number_of_runs(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT n_runs FROM NRuns", [], |row| row.get(0))?)
    }

    fn increase_number_of_runs(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute("UPDATE NRuns SET n_runs = n_runs + 1", [])?;
        Ok(())
    }

    /// The packages-db schema version recorded at the last successful load.
    pub fn packages_db_schema_version(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT version FROM PackagesDbSchemaVersion", [], |row| {
            row.get(0)
        })?)
    }

    /// Records the packages-db schema version after a reload.
    pub fn set_packages_db_schema_version(&self, version: i64) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE PackagesDbSchemaVersion SET version = ?1",
            params![version],
        )?;
        Ok(())
    }

    /// Looks up a cached generated config by the hash of the settings that
    /// produced it.
    pub fn config_by_hash(&self, settings_hash: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT config FROM ConfigHashes WHERE hash = ?1",
                params![settings_hash],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Caches a generated config under its settings hash.
    pub fn add_config_hash(
        &self,
        settings_hash: &str,
        config: &str,
        config_hash: &str,
    ) -> Result<(), DatabaseError> {
        if config.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "REPLACE INTO ConfigHashes VALUES (?1, ?2, ?3)",
            params![settings_hash, config, config_hash],
        )?;
        Ok(())
    }

    /// Drops the whole config cache.
    pub fn clear_config_hashes(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM ConfigHashes", [])?;
        Ok(())
    }

    /// Records the dependency-set hash of a package.
    pub fn set_package_dependencies_hash(
        &self,
        package: &Package,
        hash: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            "REPLACE INTO PackageDependenciesHashes VALUES (?1, ?2)",
            params![package.target_name(), hash],
        )?;
        Ok(())
    }

    /// True if the recorded dependency-set hash of `package` equals `hash`.
    pub fn has_package_dependencies_hash(
        &self,
        package: &Package,
        hash: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT count(*) FROM PackageDependenciesHashes \
             WHERE package = ?1 AND dependencies = ?2",
            params![package.target_name(), hash],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Registers a package as installed (unpacked into the storage).
    pub fn add_installed_package(&self, package: &Package) -> Result<(), DatabaseError> {
        let fs_hash = package.short_hash().to_owned();
        if self.installed_package_hash(package)?.as_deref() == Some(fs_hash.as_str()) {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "REPLACE INTO InstalledPackages (package, version, hash) VALUES (?1, ?2, ?3)",
            params![
                package.path.to_string(),
                package.version.to_version_string(),
                fs_hash
            ],
        )?;
        Ok(())
    }

    /// Removes a package from the installed set.
    pub fn remove_installed_package(&self, package: &Package) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM InstalledPackages WHERE package = ?1 AND version = ?2",
            params![
                package.path.to_string(),
                package.version.to_version_string()
            ],
        )?;
        Ok(())
    }

    /// The recorded filesystem hash of an installed package, if any.
    pub fn installed_package_hash(
        &self,
        package: &Package,
    ) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT hash FROM InstalledPackages WHERE package = ?1 AND version = ?2",
                params![
                    package.path.to_string(),
                    package.version.to_version_string()
                ],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// All installed packages.
    pub fn installed_packages(&self) -> Result<PackagesSet, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT package, version FROM InstalledPackages")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut packages = PackagesSet::new();
        for row in rows {
            let (path, version) = row?;
            let (Ok(path), Ok(version)) = (path.parse(), version.parse()) else {
                // A corrupt row must not wedge every future run.
                tracing::warn!("skipping malformed installed package row: {path}");
                continue;
            };
            packages.insert(Package::new(path, version));
        }
        Ok(packages)
    }

    /// All recorded file stamps.
    pub fn file_stamps(&self) -> Result<Stamps, DatabaseError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT file, stamp FROM FileStamps")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut stamps = Stamps::new();
        for row in rows {
            let (file, stamp) = row?;
            stamps.insert(PathBuf::from(file), stamp);
        }
        Ok(stamps)
    }

    /// Replaces the recorded file stamps with `stamps`.
    pub fn set_file_stamps(&self, stamps: &Stamps) -> Result<(), DatabaseError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (file, stamp) in stamps {
            tx.execute(
                "REPLACE INTO FileStamps VALUES (?1, ?2)",
                params![file.to_string_lossy(), stamp],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Drops all recorded file stamps.
    pub fn clear_file_stamps(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM FileStamps", [])?;
        Ok(())
    }

    /// When the client last checked for its own updates.
    pub fn last_client_update_check(&self) -> Result<DateTime<Utc>, DatabaseError> {
        let conn = self.conn.lock();
        let timestamp: i64 =
            conn.query_row("SELECT timestamp FROM NextClientVersionCheck", [], |row| {
                row.get(0)
            })?;
        Ok(Utc
            .timestamp_opt(timestamp, 0)
            .single()
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid")))
    }

    /// Records `now` as the last client update check.
    pub fn set_last_client_update_check(&self) -> Result<(), DatabaseError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE NextClientVersionCheck SET timestamp = ?1",
            params![Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

fn set_table_hash(conn: &Connection, table: &str, hash: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "REPLACE INTO TableHashes VALUES (?1, ?2)",
        params![table, hash],
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use cppan_types::Version;

    use super::*;

    fn open_db(dir: &Path) -> ServiceDatabase {
        ServiceDatabase::open(dir, "test-stamp").unwrap()
    }

    fn package(path: &str, version: &str) -> Package {
        Package::new(path.parse().unwrap(), version.parse().unwrap())
    }

    #[test]
    fn creates_tables_and_counts_runs() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = open_db(dir.path());
            assert_eq!(db.number_of_runs().unwrap(), 1);
        }
        let db = open_db(dir.path());
        assert_eq!(db.number_of_runs().unwrap(), 2);
    }

    #[test]
    fn stamp_change_clears_file_stamps() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = ServiceDatabase::open(dir.path(), "stamp-a").unwrap();
            let mut stamps = Stamps::new();
            stamps.insert(PathBuf::from("/tmp/x"), 42);
            db.set_file_stamps(&stamps).unwrap();
            assert_eq!(db.file_stamps().unwrap().len(), 1);
        }
        // Same stamp: stamps survive.
        {
            let db = ServiceDatabase::open(dir.path(), "stamp-a").unwrap();
            assert_eq!(db.file_stamps().unwrap().len(), 1);
        }
        // New client stamp: stamps are invalidated.
        let db = ServiceDatabase::open(dir.path(), "stamp-b").unwrap();
        assert!(db.file_stamps().unwrap().is_empty());
    }

    #[test]
    fn installed_packages_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());

        let pkg = package("org.foo.bar", "1.2.3");
        db.add_installed_package(&pkg).unwrap();
        assert_eq!(
            db.installed_package_hash(&pkg).unwrap().as_deref(),
            Some(pkg.short_hash())
        );

        let installed = db.installed_packages().unwrap();
        assert!(installed.contains(&pkg));
        assert_eq!(
            installed.iter().next().unwrap().version,
            Version::number(1, 2, 3)
        );

        db.remove_installed_package(&pkg).unwrap();
        assert!(db.installed_packages().unwrap().is_empty());
    }

    #[test]
    fn dependency_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());

        let pkg = package("org.foo.bar", "1.2.3");
        assert!(!db.has_package_dependencies_hash(&pkg, "h1").unwrap());
        db.set_package_dependencies_hash(&pkg, "h1").unwrap();
        assert!(db.has_package_dependencies_hash(&pkg, "h1").unwrap());
        assert!(!db.has_package_dependencies_hash(&pkg, "h2").unwrap());
    }

    #[test]
    fn startup_actions_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        let first = db.perform_startup_actions();
        assert!(first.contains(&StartupAction::ClearCache));
        let second = db.perform_startup_actions();
        assert!(second.is_empty());
    }

    #[test]
    fn config_hash_cache() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());

        assert_eq!(db.config_by_hash("s1").unwrap(), None);
        db.add_config_hash("s1", "config-text", "c1").unwrap();
        assert_eq!(
            db.config_by_hash("s1").unwrap().as_deref(),
            Some("config-text")
        );
        db.clear_config_hashes().unwrap();
        assert_eq!(db.config_by_hash("s1").unwrap(), None);
    }
}
