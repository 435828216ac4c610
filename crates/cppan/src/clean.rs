use std::{
    ops::{BitOr, BitOrAssign},
    path::Path,
};

use cppan_resolve::Context;
use cppan_types::PackagesSet;
use regex::Regex;

use crate::Error;

/// Which artifacts of a package to remove.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CleanTarget(u32);

impl CleanTarget {
    /// The unpacked source tree.
    pub const SRC: CleanTarget = CleanTarget(1 << 0);
    /// The build tree.
    pub const OBJ: CleanTarget = CleanTarget(1 << 1);
    /// Built libraries.
    pub const LIB: CleanTarget = CleanTarget(1 << 2);
    /// Built executables.
    pub const BIN: CleanTarget = CleanTarget(1 << 3);
    /// Exported build-system artifacts.
    pub const EXP: CleanTarget = CleanTarget(1 << 4);

    /// Everything.
    pub const ALL: CleanTarget = CleanTarget(0b11111);
    /// Everything except the sources; dependents are rebuilt but not
    /// refetched.
    pub const ALL_EXCEPT_SRC: CleanTarget =
        CleanTarget(Self::ALL.0 & !Self::SRC.0);

    /// True if every target of `other` is selected.
    pub fn contains(self, other: CleanTarget) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CleanTarget {
    type Output = CleanTarget;

    fn bitor(self, rhs: Self) -> Self::Output {
        CleanTarget(self.0 | rhs.0)
    }
}

impl BitOrAssign for CleanTarget {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Removes the artifacts of every installed package whose target name
/// matches `pattern`, then rebuild-cleans their transitive dependents
/// (restricted to installed packages, with `Bin|Lib|Obj|Exp` only).
pub async fn clean_packages(
    ctx: &Context,
    pattern: &str,
    targets: CleanTarget,
) -> Result<(), Error> {
    let re = Regex::new(pattern)?;

    let installed = ctx.service_db.installed_packages()?;
    let matched: PackagesSet = installed
        .iter()
        .filter(|p| re.is_match(p.target_name()))
        .cloned()
        .collect();

    let mut dependents = ctx.catalog().await?.transitive_dependent_packages(&matched)?;
    dependents.retain(|p| installed.contains(p) && !matched.contains(p));

    for pkg in matched.iter().chain(dependents.iter()) {
        if targets == CleanTarget::ALL {
            tracing::info!("cleaning: {}...", pkg.target_name());
        }
    }

    clean_packages_set(ctx, &matched, targets)?;
    clean_packages_set(
        ctx,
        &dependents,
        CleanTarget::BIN | CleanTarget::LIB | CleanTarget::OBJ | CleanTarget::EXP,
    )?;
    Ok(())
}

/// Removes the selected artifacts of the given packages and drops their
/// installed rows.
pub fn clean_packages_set(
    ctx: &Context,
    pkgs: &PackagesSet,
    targets: CleanTarget,
) -> Result<(), Error> {
    for pkg in pkgs {
        if targets.contains(CleanTarget::SRC) {
            remove_dir(&ctx.dirs.source_dir(pkg))?;
            // The stamp belongs to the tree; a stale stamp would make the
            // next run skip the refetch.
            let stamp = ctx.dirs.package_stamp_file(pkg);
            if stamp.exists() {
                fs_err::remove_file(&stamp)?;
            }
        }
        if targets.contains(CleanTarget::OBJ) {
            remove_dir(&ctx.dirs.object_dir(pkg))?;
        }
        if targets.contains(CleanTarget::LIB) {
            remove_files_like(&ctx.dirs.storage_dir_lib, pkg.target_name())?;
        }
        if targets.contains(CleanTarget::BIN) {
            remove_files_like(&ctx.dirs.storage_dir_bin, pkg.target_name())?;
        }
    }

    if targets.contains(CleanTarget::EXP) {
        remove_files_with_extension(&ctx.dirs.storage_dir_exp, "cmake")?;
    }

    for pkg in pkgs {
        ctx.service_db.remove_installed_package(pkg)?;
    }
    Ok(())
}

fn remove_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        fs_err::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Removes every regular file under `dir` whose name contains `needle`.
fn remove_files_like(dir: &Path, needle: &str) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().contains(needle) {
            fs_err::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn remove_files_with_extension(dir: &Path, extension: &str) -> std::io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().is_some_and(|e| e == extension) {
            fs_err::remove_file(entry.path())?;
        }
    }
    Ok(())
}
