//! Behavior of the catalog against a seeded mirror directory.

use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use cppan_database::{DatabaseError, PackagesDatabase, ServiceDatabase};
use cppan_types::{Package, PackageFlags, Packages, PackagesSet, Version};

const OLD: &str = "2016-01-01 00:00:00";
const NO_WINDOW: Duration = Duration::ZERO;

struct Fixture {
    _dir: tempfile::TempDir,
    _service: ServiceDatabase,
}

impl Fixture {
    /// Seeds `<db>/repository` with the given CSV rows and loads them.
    fn new(projects: &str, versions: &str, edges: &str) -> (Self, PackagesDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("database");
        let repo = db_dir.join("repository");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("Projects.csv"), projects).unwrap();
        std::fs::write(repo.join("ProjectVersions.csv"), versions).unwrap();
        std::fs::write(repo.join("ProjectVersionDependencies.csv"), edges).unwrap();
        std::fs::write(repo.join("schema.version"), "1").unwrap();
        std::fs::write(repo.join("db.version"), "1").unwrap();

        let service = ServiceDatabase::open(&db_dir, "test").unwrap();
        let packages = PackagesDatabase::open_from_mirror(&db_dir, &service).unwrap();
        (
            Fixture {
                _dir: dir,
                _service: service,
            },
            packages,
        )
    }
}

fn requested(path: &str, version: &str) -> Packages {
    let mut deps = Packages::new();
    deps.insert(
        path.to_owned(),
        Package::new(path.parse().unwrap(), version.parse().unwrap()),
    );
    deps
}

fn version_fixture() -> (Fixture, PackagesDatabase) {
    Fixture::new(
        "1;org.foo.bar;1;0\n",
        &format!(
            "10;1;1;0;0;;0;{OLD};h100\n\
             11;1;1;2;3;;0;{OLD};h123\n\
             12;1;1;2;4;;0;{OLD};h124\n\
             13;1;2;0;0;;0;{OLD};h200\n\
             14;1;;;;master;0;{OLD};hmaster\n"
        ),
        "",
    )
}

#[test]
fn tiered_version_matching() {
    let (_fx, db) = version_fixture();

    let cases = [
        ("1", Version::number(1, 2, 4), "h124"),
        ("1.2", Version::number(1, 2, 4), "h124"),
        ("1.2.3", Version::number(1, 2, 3), "h123"),
        ("*", Version::number(2, 0, 0), "h200"),
        ("master", Version::branch("master"), "hmaster"),
    ];
    for (predicate, expected_version, expected_hash) in cases {
        let resolved = db
            .find_dependencies(&requested("org.foo.bar", predicate), NO_WINDOW)
            .unwrap();
        assert_eq!(resolved.len(), 1, "predicate {predicate}");
        let dep = resolved.values().next().unwrap();
        assert_eq!(dep.package.version, expected_version, "predicate {predicate}");
        assert_eq!(dep.sha256, expected_hash, "predicate {predicate}");
        assert!(dep.is_direct());
    }
}

#[test]
fn version_not_found() {
    let (_fx, db) = version_fixture();

    assert_matches!(
        db.find_dependencies(&requested("org.foo.bar", "1.3"), NO_WINDOW),
        Err(DatabaseError::VersionNotFound { version, .. }) if version == "1.3"
    );
    assert_matches!(
        db.find_dependencies(&requested("org.foo.bar", "1.2.9"), NO_WINDOW),
        Err(DatabaseError::VersionNotFound { .. })
    );
    assert_matches!(
        db.find_dependencies(&requested("org.foo.bar", "develop"), NO_WINDOW),
        Err(DatabaseError::VersionNotFound { .. })
    );
}

#[test]
fn missing_package() {
    let (_fx, db) = version_fixture();
    assert_matches!(
        db.find_dependencies(&requested("org.no.such", "1"), NO_WINDOW),
        Err(DatabaseError::PackageNotFound(path)) if path.to_string() == "org.no.such"
    );
}

#[test]
fn root_project_expansion() {
    let (_fx, db) = Fixture::new(
        "1;org.foo;3;0\n\
         2;org.foo.a;1;0\n\
         3;org.foo.b;2;0\n\
         4;org.foo.docs;4;0\n",
        &format!(
            "20;2;1;0;0;;0;{OLD};ha\n\
             21;3;1;0;0;;0;{OLD};hb\n"
        ),
        "",
    );

    let resolved = db
        .find_dependencies(&requested("org.foo", "1"), NO_WINDOW)
        .unwrap();
    let paths: Vec<String> = resolved
        .values()
        .map(|d| d.package.path.to_string())
        .collect();
    assert_eq!(paths, ["org.foo.a", "org.foo.b"]);
    assert!(resolved.values().all(|d| d.is_direct()));
}

#[test]
fn empty_root_project() {
    let (_fx, db) = Fixture::new("1;org.foo;3;0\n", "", "");
    assert_matches!(
        db.find_dependencies(&requested("org.foo", "1"), NO_WINDOW),
        Err(DatabaseError::RootProjectEmpty(_))
    );
}

#[test]
fn transitive_edges_with_cycle_and_flag_merge() {
    // a -> b (private edge), b -> c and back to a (cycle).
    let private = PackageFlags::PRIVATE_DEPENDENCY.bits();
    let (_fx, db) = Fixture::new(
        "1;org.x.a;1;0\n\
         2;org.x.b;1;0\n\
         3;org.x.c;1;1\n",
        &format!(
            "10;1;1;0;0;;0;{OLD};ha\n\
             11;2;1;0;0;;0;{OLD};hb\n\
             12;3;1;0;0;;0;{OLD};hc\n"
        ),
        &format!(
            "10;2;1;{private}\n\
             11;3;*;0\n\
             11;1;1;0\n"
        ),
    );

    let resolved = db
        .find_dependencies(&requested("org.x.a", "1"), NO_WINDOW)
        .unwrap();
    assert_eq!(resolved.len(), 3);

    let a = &resolved[&10];
    let b = &resolved[&11];
    let c = &resolved[&12];

    assert_eq!(a.dependency_ids.iter().copied().collect::<Vec<_>>(), [11]);
    assert_eq!(
        b.dependency_ids.iter().copied().collect::<Vec<_>>(),
        [10, 12]
    );

    // The edge flags are OR-merged into the merged package flags but stay
    // visible separately.
    assert!(b.package.flags.contains(PackageFlags::PRIVATE_DEPENDENCY));
    assert_eq!(b.edge_flags, PackageFlags::PRIVATE_DEPENDENCY);
    assert_eq!(b.project_flags, PackageFlags::empty());

    // Project-row flags propagate too (org.x.c has header_only set).
    assert!(c.package.flags.contains(PackageFlags::HEADER_ONLY));

    // Self edges are filtered by the accessor.
    let b_children: Vec<_> = b.dependencies(&resolved).map(|d| d.id).collect();
    assert_eq!(b_children, [10, 12]);
}

#[test]
fn resolution_is_deterministic() {
    let (_fx, db) = version_fixture();
    let first = db
        .find_dependencies(&requested("org.foo.bar", "1"), NO_WINDOW)
        .unwrap();
    let second = db
        .find_dependencies(&requested("org.foo.bar", "1"), NO_WINDOW)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn young_package_forces_remote_recheck() {
    let fresh = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let (_fx, db) = Fixture::new(
        "1;org.foo.bar;1;0\n",
        &format!("10;1;1;2;3;;0;{fresh};h123\n"),
        "",
    );

    assert_matches!(
        db.find_dependencies(&requested("org.foo.bar", "1.2.3"), Duration::from_secs(1800)),
        Err(DatabaseError::YoungPackage(_))
    );
    // With the window disabled the same row resolves.
    assert!(db
        .find_dependencies(&requested("org.foo.bar", "1.2.3"), NO_WINDOW)
        .is_ok());
}

#[test]
fn local_predicates_are_skipped() {
    let (_fx, db) = version_fixture();
    let mut deps = Packages::new();
    let mut local = Package::new("loc.abcd1234.tool".parse().unwrap(), Version::local());
    local.flags.insert(PackageFlags::LOCAL_PROJECT);
    deps.insert(local.path.to_string(), local);
    assert!(db.find_dependencies(&deps, NO_WINDOW).unwrap().is_empty());
}

#[test]
fn dependent_packages_queries() {
    let private = 0;
    let (_fx, db) = Fixture::new(
        "1;org.x.a;1;0\n\
         2;org.x.b;1;0\n\
         3;org.x.c;1;0\n",
        &format!(
            "10;1;1;0;0;;0;{OLD};ha\n\
             11;2;1;0;0;;0;{OLD};hb\n\
             12;3;1;0;0;;0;{OLD};hc\n"
        ),
        // a depends on b, b depends on c.
        &format!("10;2;1;{private}\n11;3;1;{private}\n"),
    );

    let c = Package::new("org.x.c".parse().unwrap(), Version::number(1, 0, 0));
    let mut set = PackagesSet::new();
    set.insert(c);

    let direct = db.dependent_packages(&set).unwrap();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct.iter().next().unwrap().path.to_string(), "org.x.b");

    let transitive = db.transitive_dependent_packages(&set).unwrap();
    let paths: Vec<String> = transitive.iter().map(|p| p.path.to_string()).collect();
    assert_eq!(paths, ["org.x.a", "org.x.b"]);
}

#[test]
fn list_and_versions() {
    let (_fx, db) = version_fixture();

    let versions = db
        .versions_for_package(&"org.foo.bar".parse().unwrap())
        .unwrap();
    assert_eq!(versions.len(), 5);
    assert!(versions.contains(&Version::branch("master")));

    let listed = db.list_packages("foo").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0.to_string(), "org.foo.bar");
    assert!(db.list_packages("nothing-here").unwrap().is_empty());
}

#[test]
fn stale_schema_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db_dir = dir.path().join("database");
    let repo = db_dir.join("repository");
    std::fs::create_dir_all(&repo).unwrap();
    for table in [
        "Projects",
        "ProjectVersions",
        "ProjectVersionDependencies",
    ] {
        std::fs::write(repo.join(format!("{table}.csv")), "").unwrap();
    }
    std::fs::write(repo.join("schema.version"), "2").unwrap();

    let service = ServiceDatabase::open(&db_dir, "test").unwrap();
    assert_matches!(
        PackagesDatabase::open_from_mirror(&db_dir, &service),
        Err(DatabaseError::SchemaTooNew { remote: 2, client: 1 })
    );
}
