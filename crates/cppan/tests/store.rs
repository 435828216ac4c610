//! Store behavior over purely local projects: spec loading, local
//! dependency binding and dependency-change tracking across runs.

use std::path::Path;

use cppan::{Config, MetaGenerator, PackageStore};
use cppan_resolve::Context;
use cppan_types::{PackageFlags, Settings};

fn context(storage: &Path) -> Context {
    let settings = Settings {
        storage_dir: Some(storage.to_path_buf()),
        ..Settings::default()
    };
    Context::new(settings).unwrap()
}

async fn run_process(
    ctx: &Context,
    project_dir: &Path,
) -> (PackageStore, Config, cppan_types::PackagesSet) {
    let mut store = PackageStore::new();
    let (packages, conf, _sname) = store
        .read_packages_from_file(ctx, project_dir, None, true)
        .await
        .unwrap();
    let root = conf.clone();
    store
        .process(ctx, project_dir, root, &MetaGenerator)
        .await
        .unwrap();
    (store, conf, packages)
}

#[tokio::test(flavor = "multi_thread")]
async fn local_projects_bind_without_a_remote() {
    let storage = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    std::fs::write(
        project.path().join("cppan.yml"),
        r#"
projects:
  app:
    type: exe
    dependencies: [lib1]
  lib1:
    type: lib
"#,
    )
    .unwrap();

    let ctx = context(storage.path());
    let (store, conf, packages) = run_process(&ctx, project.path()).await;

    assert_eq!(packages.len(), 2);
    let app = packages
        .iter()
        .find(|p| p.path.name() == Some("app"))
        .unwrap();
    let lib = packages
        .iter()
        .find(|p| p.path.name() == Some("lib1"))
        .unwrap();
    assert!(app.flags.contains(PackageFlags::EXECUTABLE));
    assert!(app.flags.contains(PackageFlags::LOCAL_PROJECT));
    assert!(app.version.is_local());

    // The relative dependency was rebased under the synthetic local path
    // and bound to the sibling project.
    let app_config = store.get(app).unwrap();
    assert_eq!(app_config.dependencies.len(), 1);
    let bound = app_config.dependencies.values().next().unwrap();
    assert_eq!(&bound.path, &lib.path);
    assert!(conf.package.path.is_root_of(&bound.path));

    // Both projects are registered as installed and as local packages.
    assert!(store.has_local_package(&app.path));
    let installed = ctx.service_db.installed_packages().unwrap();
    assert!(installed.contains(app));
    assert!(installed.contains(lib));

    // The generator ran for the root.
    assert!(project.path().join("cppan/targets.txt").is_file());
}

#[tokio::test(flavor = "multi_thread")]
async fn dependency_change_cleans_outputs() {
    let storage = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let spec_with_dep = |dep: &str| {
        format!(
            r#"
projects:
  app:
    type: exe
    dependencies: [{dep}]
  lib1:
    type: lib
  lib2:
    type: lib
"#
        )
    };
    std::fs::write(project.path().join("cppan.yml"), spec_with_dep("lib1")).unwrap();

    let ctx = context(storage.path());
    let (_, _, packages) = run_process(&ctx, project.path()).await;
    let app = packages
        .iter()
        .find(|p| p.path.name() == Some("app"))
        .unwrap()
        .clone();

    // Plant a binary output from "the previous build".
    let bin = ctx
        .dirs
        .storage_dir_bin
        .join(format!("{}.exe", app.target_name()));
    std::fs::create_dir_all(&ctx.dirs.storage_dir_bin).unwrap();
    std::fs::write(&bin, "old binary").unwrap();

    // Same spec again: the dependency set hash matches, outputs survive.
    let (_, _, _) = run_process(&ctx, project.path()).await;
    assert!(bin.exists());

    // Edited spec: app now depends on lib2. The store must detect the
    // changed set and clean app's outputs.
    std::fs::write(project.path().join("cppan.yml"), spec_with_dep("lib2")).unwrap();
    let (store, _, _) = run_process(&ctx, project.path()).await;
    assert!(!bin.exists());
    assert!(store.rebuild_configs());
}
