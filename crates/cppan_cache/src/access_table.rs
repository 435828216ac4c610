use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::UNIX_EPOCH,
};

use cppan_database::{ServiceDatabase, Stamps};
use parking_lot::Mutex;

use crate::{CacheError, Directories};

struct AccessData {
    stamps: Stamps,
    do_not_update: bool,
    refs: usize,
    db: Option<Arc<ServiceDatabase>>,
}

// One table per process; cross-process consistency comes from persisting
// into the service database at last release and reloading at first
// acquisition.
static DATA: Mutex<AccessData> = Mutex::new(AccessData {
    stamps: BTreeMap::new(),
    do_not_update: false,
    refs: 0,
    db: None,
});

/// The cross-run oracle for "is this generated file still current".
///
/// Every file written through the table records its mtime; a later run asks
/// [`AccessTable::must_update_contents`] before regenerating. Acquisitions
/// are reference counted: the first loads the stamps from the service
/// database, the last persists them back.
pub struct AccessTable {
    etc_dir: PathBuf,
}

impl AccessTable {
    /// Acquires the process-wide table. `etc_dir` is the storage's etc
    /// directory; only files under it participate in stamp tracking.
    pub fn new(etc_dir: PathBuf, db: Arc<ServiceDatabase>) -> Result<Self, CacheError> {
        let mut data = DATA.lock();
        if data.refs == 0 {
            data.stamps = db.file_stamps()?;
            data.db = Some(db);
        }
        data.refs += 1;
        Ok(AccessTable { etc_dir })
    }

    /// Globally suppresses refresh semantics: existing files are reported as
    /// current regardless of their stamps. Used by read-only passes that
    /// must not rebuild derived files.
    pub fn do_not_update_files(v: bool) {
        DATA.lock().do_not_update = v;
    }

    /// True while updates are suppressed.
    pub fn updates_disabled() -> bool {
        DATA.lock().do_not_update
    }

    /// True iff the file does not exist, or updates are enabled and the
    /// recorded mtime differs from the on-disk mtime. Files outside the etc
    /// root are never considered current.
    pub fn must_update_contents(&self, p: &Path) -> bool {
        if !p.exists() {
            return true;
        }
        let data = DATA.lock();
        if data.do_not_update {
            return false;
        }
        if !Directories::is_under_root(p, &self.etc_dir) {
            return true;
        }
        match (mtime_nanos(p).ok(), data.stamps.get(p)) {
            (Some(current), Some(recorded)) => current != *recorded,
            _ => true,
        }
    }

    /// Writes `s` to `p` only if the contents differ, then records the new
    /// mtime.
    pub fn update_contents(&self, p: &Path, s: &str) -> Result<(), CacheError> {
        write_file_if_different(p, s)?;
        let mtime = mtime_nanos(p)?;
        DATA.lock().stamps.insert(p.to_path_buf(), mtime);
        Ok(())
    }

    /// The gated write: files outside the etc root are written-if-different
    /// unconditionally, files inside only when
    /// [`AccessTable::must_update_contents`] says so.
    pub fn write_if_older(&self, p: &Path, s: &str) -> Result<(), CacheError> {
        if !Directories::is_under_root(p, &self.etc_dir) {
            write_file_if_different(p, s)?;
            return Ok(());
        }
        if self.must_update_contents(p) {
            self.update_contents(p, s)?;
        }
        Ok(())
    }

    /// Drops every recorded entry under `root`.
    pub fn remove(&self, root: &Path) {
        DATA.lock()
            .stamps
            .retain(|p, _| !Directories::is_under_root(p, root));
    }

    /// Drops every recorded entry, in memory and in the service database.
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut data = DATA.lock();
        data.stamps.clear();
        if let Some(db) = &data.db {
            db.clear_file_stamps()?;
        }
        Ok(())
    }
}

impl Drop for AccessTable {
    fn drop(&mut self) {
        let mut data = DATA.lock();
        data.refs -= 1;
        if data.refs > 0 {
            return;
        }
        if let Some(db) = data.db.take() {
            if let Err(e) = db.set_file_stamps(&data.stamps) {
                tracing::warn!("could not persist file stamps: {e}");
            }
        }
    }
}

fn mtime_nanos(p: &Path) -> std::io::Result<i64> {
    let modified = fs_err::metadata(p)?.modified()?;
    let nanos = modified
        .duration_since(UNIX_EPOCH)
        .map_err(std::io::Error::other)?
        .as_nanos();
    Ok(nanos as i64)
}

fn write_file_if_different(p: &Path, s: &str) -> std::io::Result<()> {
    if let Ok(existing) = std::fs::read_to_string(p) {
        if existing == s {
            return Ok(());
        }
    }
    if let Some(parent) = p.parent() {
        fs_err::create_dir_all(parent)?;
    }
    fs_err::write(p, s)
}

#[cfg(test)]
mod test {
    use filetime::{set_file_mtime, FileTime};

    use super::*;

    // The table state is process-wide, so the whole lifecycle is exercised
    // in a single test.
    #[test]
    fn access_table_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let etc = dir.path().join("etc");
        std::fs::create_dir_all(&etc).unwrap();
        let db = Arc::new(ServiceDatabase::open(&dir.path().join("db"), "stamp").unwrap());

        let generated = etc.join("meta/config.cmake");
        {
            let table = AccessTable::new(etc.clone(), db.clone()).unwrap();

            // Missing file must be (re)generated.
            assert!(table.must_update_contents(&generated));
            table.update_contents(&generated, "contents v1").unwrap();
            assert!(!table.must_update_contents(&generated));

            // An external mtime change invalidates the entry.
            set_file_mtime(&generated, FileTime::from_unix_time(1, 0)).unwrap();
            assert!(table.must_update_contents(&generated));
            table.update_contents(&generated, "contents v1").unwrap();
            assert!(!table.must_update_contents(&generated));

            // Files outside the etc root bypass stamping entirely.
            let outside = dir.path().join("outside.txt");
            table.write_if_older(&outside, "hello").unwrap();
            assert_eq!(std::fs::read_to_string(&outside).unwrap(), "hello");
            assert!(table.must_update_contents(&outside));

            // Suppressed updates report existing files as current.
            AccessTable::do_not_update_files(true);
            set_file_mtime(&generated, FileTime::from_unix_time(2, 0)).unwrap();
            assert!(!table.must_update_contents(&generated));
            AccessTable::do_not_update_files(false);
            assert!(table.must_update_contents(&generated));

            // remove() forgets a subtree.
            table.update_contents(&generated, "contents v1").unwrap();
            table.remove(&etc.join("meta"));
            assert!(table.must_update_contents(&generated));

            table.update_contents(&generated, "contents v2").unwrap();
        }

        // Last release persisted the stamps.
        assert!(!db.file_stamps().unwrap().is_empty());

        // A fresh acquisition sees the persisted state.
        {
            let table = AccessTable::new(etc.clone(), db.clone()).unwrap();
            assert!(!table.must_update_contents(&generated));
            table.clear().unwrap();
            assert!(table.must_update_contents(&generated));
        }
        assert!(db.file_stamps().unwrap().is_empty());
    }
}
