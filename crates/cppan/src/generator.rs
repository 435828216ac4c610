use std::{fmt::Write as _, path::Path};

use cppan_cache::AccessTable;
use cppan_resolve::Context;
use cppan_types::Package;

use crate::{Config, Error, PackageStore};

/// The seam the build-system emitter plugs into. The store drives one
/// [`Generator::generate_package`] per resolved package and one
/// [`Generator::generate_meta`] for the root; everything the generator
/// writes goes through the [`AccessTable`] so unchanged files are left
/// untouched across runs.
pub trait Generator {
    /// Emits the per-package build files into the package's object dir.
    fn generate_package(
        &self,
        ctx: &Context,
        store: &PackageStore,
        package: &Package,
        access: &AccessTable,
    ) -> Result<(), Error>;

    /// Emits the root meta file binding the root config to its resolved
    /// dependency set.
    fn generate_meta(
        &self,
        ctx: &Context,
        root: &Config,
        cwd: &Path,
        access: &AccessTable,
    ) -> Result<(), Error>;

    /// Removes the exported artifacts of one package so they are rebuilt.
    fn clear_export(&self, object_dir: &Path) -> Result<(), Error>;
}

/// The built-in generator: deterministic meta files describing each target
/// and its direct dependencies. The real emitter replaces this with full
/// build-system output; the store's contract is identical either way.
#[derive(Debug, Default)]
pub struct MetaGenerator;

impl MetaGenerator {
    fn render(&self, store: &PackageStore, package: &Package) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "target: {}", package.target_name());
        let _ = writeln!(out, "variable: {}", package.variable_name());
        let _ = writeln!(out, "hash: {}", package.short_hash());
        if let Some(pc) = store.get(package) {
            for dep in pc.dependencies.values() {
                let _ = writeln!(out, "dependency: {}", dep.target_name());
            }
        }
        out
    }
}

impl Generator for MetaGenerator {
    fn generate_package(
        &self,
        ctx: &Context,
        store: &PackageStore,
        package: &Package,
        access: &AccessTable,
    ) -> Result<(), Error> {
        let meta = ctx.dirs.object_dir(package).join("meta").join("targets.txt");
        access.write_if_older(&meta, &self.render(store, package))?;
        Ok(())
    }

    fn generate_meta(
        &self,
        _ctx: &Context,
        root: &Config,
        cwd: &Path,
        access: &AccessTable,
    ) -> Result<(), Error> {
        let meta = cwd.join("cppan").join("targets.txt");
        let mut out = String::new();
        let _ = writeln!(out, "root: {}", root.package.target_name());
        for (name, project) in root.spec.projects() {
            let _ = writeln!(
                out,
                "project: {} ({:?})",
                if name.is_empty() { "<root>" } else { &name },
                project.ty.unwrap_or_default()
            );
        }
        access.write_if_older(&meta, &out)?;
        Ok(())
    }

    fn clear_export(&self, object_dir: &Path) -> Result<(), Error> {
        let exports = object_dir.join("exports");
        if exports.exists() {
            fs_err::remove_dir_all(&exports)?;
        }
        Ok(())
    }
}
