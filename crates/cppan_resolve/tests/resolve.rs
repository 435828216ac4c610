//! End-to-end resolution against a loopback remote: local-catalog fetch,
//! stale-hash fallback to the server and cross-task fetch coalescing.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{extract::State, routing::get, routing::post, Json, Router};
use cppan_digest::sha256_hex;
use cppan_networking::{Remote, SourceProvider};
use cppan_resolve::{Context, Resolver};
use cppan_types::{Package, Packages, RemoteSpec, Settings, Version};

/// A deterministic package archive: a spec file plus one source file.
fn archive_bytes() -> Vec<u8> {
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
        Vec::new(),
        flate2::Compression::default(),
    ));
    for (path, contents) in [
        ("cppan.yml", "files: bar.cpp\n"),
        ("bar.cpp", "int bar() { return 42; }\n"),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

#[derive(Clone)]
struct ServerState {
    archive: Arc<Vec<u8>>,
    archive_downloads: Arc<AtomicUsize>,
    find_dependencies_response: Arc<serde_json::Value>,
}

/// Serves the archive under every `/data/...` path and answers
/// `find_dependencies` with a canned response.
async fn spawn_server(state: ServerState) -> String {
    async fn serve_archive(State(state): State<ServerState>) -> Vec<u8> {
        state.archive_downloads.fetch_add(1, Ordering::SeqCst);
        state.archive.as_ref().clone()
    }
    async fn serve_deps(State(state): State<ServerState>) -> Json<serde_json::Value> {
        Json(state.find_dependencies_response.as_ref().clone())
    }

    let app = Router::new()
        .route("/api/find_dependencies", post(serve_deps))
        .route("/data/{*path}", get(serve_archive))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

/// Seeds the catalog mirror so the context can open it without a network
/// round trip.
fn seed_catalog(storage: &Path, sha256: &str) {
    let db_dir = storage.join("etc/database");
    let repo = db_dir.join("repository");
    std::fs::create_dir_all(&repo).unwrap();
    std::fs::write(repo.join("Projects.csv"), "1;org.foo.bar;1;0\n").unwrap();
    std::fs::write(
        repo.join("ProjectVersions.csv"),
        format!(
            "10;1;1;0;0;;0;2016-01-01 00:00:00;unused0\n\
             11;1;1;2;3;;0;2016-01-01 00:00:00;unused1\n\
             12;1;1;2;4;;0;2016-01-01 00:00:00;{sha256}\n\
             13;1;2;0;0;;0;2016-01-01 00:00:00;unused2\n"
        ),
    )
    .unwrap();
    std::fs::write(repo.join("ProjectVersionDependencies.csv"), "").unwrap();
    std::fs::write(repo.join("schema.version"), "1").unwrap();
    std::fs::write(repo.join("db.version"), "1").unwrap();

    let service = cppan_database::ServiceDatabase::open(&db_dir, "seed").unwrap();
    cppan_database::PackagesDatabase::open_from_mirror(&db_dir, &service).unwrap();
}

/// A context whose only remote is the loopback server, with the github
/// mirror provider removed so nothing leaves the machine.
fn context_for(storage: PathBuf, server_url: &str) -> Context {
    let spec = RemoteSpec {
        url: server_url.parse().unwrap(),
        ..RemoteSpec::default()
    };
    let settings = Settings {
        storage_dir: Some(storage),
        young_package_window: Duration::ZERO,
        remotes: vec![spec.clone()],
        ..Settings::default()
    };
    let mut ctx = Context::new(settings).unwrap();
    ctx.remotes = vec![Remote {
        spec,
        primary_sources: Vec::new(),
        default_source: SourceProvider::DataDir,
        additional_sources: Vec::new(),
    }];
    ctx
}

fn requested(path: &str, version: &str) -> Packages {
    let mut deps = Packages::new();
    deps.insert(
        path.to_owned(),
        Package::new(path.parse().unwrap(), version.parse().unwrap()),
    );
    deps
}

#[tokio::test(flavor = "multi_thread")]
async fn resolves_and_fetches_from_local_catalog() {
    let archive = archive_bytes();
    let sha256 = sha256_hex(&archive);
    let state = ServerState {
        archive: Arc::new(archive),
        archive_downloads: Arc::new(AtomicUsize::new(0)),
        find_dependencies_response: Arc::new(serde_json::json!({})),
    };
    let url = spawn_server(state.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path(), &sha256);
    let ctx = context_for(dir.path().to_path_buf(), &url);

    let mut resolver = Resolver::new(&ctx);
    resolver
        .resolve_dependencies(&requested("org.foo.bar", "1"))
        .await
        .unwrap();

    // The predicate selected the best 1.x version.
    let requested_pkg = Package::new(
        "org.foo.bar".parse().unwrap(),
        Version::number(1, -1, -1),
    );
    let selected = &resolver.resolved[&requested_pkg];
    assert_eq!(selected.package.version, Version::number(1, 2, 4));
    assert_eq!(selected.sha256, sha256);

    // The tree was unpacked, stamped and registered.
    let source_dir = ctx.dirs.source_dir(&selected.package);
    assert!(source_dir.join("cppan.yml").is_file());
    assert!(source_dir.join("bar.cpp").is_file());
    assert_eq!(
        cppan_cache::read_stamp(&ctx.dirs.package_stamp_file(&selected.package)).as_deref(),
        Some(sha256.as_str())
    );
    assert_eq!(
        ctx.service_db
            .installed_package_hash(&selected.package)
            .unwrap()
            .as_deref(),
        Some(selected.package.short_hash())
    );
    assert_eq!(state.archive_downloads.load(Ordering::SeqCst), 1);

    // A second pass is a no-op: the stamp matches, nothing is re-downloaded.
    let mut resolver = Resolver::new(&ctx);
    resolver
        .resolve_dependencies(&requested("org.foo.bar", "1"))
        .await
        .unwrap();
    assert_eq!(resolver.downloads, 0);
    assert_eq!(state.archive_downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_local_hash_falls_back_to_remote() {
    let archive = archive_bytes();
    let sha256 = sha256_hex(&archive);
    let state = ServerState {
        archive: Arc::new(archive),
        archive_downloads: Arc::new(AtomicUsize::new(0)),
        find_dependencies_response: Arc::new(serde_json::json!({
            "api": 1,
            "packages": {
                "org.foo.bar": {
                    "id": 12,
                    "version": "1.2.4",
                    "flags": 512,
                    "hash": sha256,
                }
            }
        })),
    };
    let url = spawn_server(state.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    // The mirror promises a hash the archive will not match.
    seed_catalog(dir.path(), "0000000000000000000000000000000000000000000000000000000000000000");
    let ctx = context_for(dir.path().to_path_buf(), &url);

    let mut resolver = Resolver::new(&ctx);
    resolver
        .resolve_dependencies(&requested("org.foo.bar", "1.2.4"))
        .await
        .unwrap();

    let requested_pkg = Package::new(
        "org.foo.bar".parse().unwrap(),
        Version::number(1, 2, 4),
    );
    let selected = &resolver.resolved[&requested_pkg];
    assert_eq!(selected.sha256, sha256);
    assert!(ctx.dirs.source_dir(&selected.package).join("bar.cpp").is_file());

    // One wasted transfer against the stale hash, one verified one.
    assert_eq!(state.archive_downloads.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_fetches_coalesce() {
    let archive = archive_bytes();
    let sha256 = sha256_hex(&archive);
    let state = ServerState {
        archive: Arc::new(archive),
        archive_downloads: Arc::new(AtomicUsize::new(0)),
        find_dependencies_response: Arc::new(serde_json::json!({})),
    };
    let url = spawn_server(state.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    seed_catalog(dir.path(), &sha256);
    let ctx = Arc::new(context_for(dir.path().to_path_buf(), &url));

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let mut resolver = Resolver::new(&ctx);
                resolver
                    .resolve_dependencies(&requested("org.foo.bar", "1.2.4"))
                    .await
                    .map(|()| resolver.downloads)
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Exactly one of the racers transferred the archive; the loser waited on
    // the fetch lock and took the winner's tree.
    assert_eq!(state.archive_downloads.load(Ordering::SeqCst), 1);
    let pkg = Package::new("org.foo.bar".parse().unwrap(), Version::number(1, 2, 4));
    assert!(ctx.dirs.source_dir(&pkg).join("bar.cpp").is_file());
}
