use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use cppan_cache::AccessTable;
use cppan_digest::{sha256_hex, sha256_short};
use cppan_resolve::{Context, Resolver};
use cppan_types::{
    IdDependencies, Package, PackageFlags, PackagePath, Packages, PackagesSet, Version,
    CPPAN_FILENAME,
};

use crate::{
    clean::{clean_packages_set, CleanTarget},
    spec::spec_from_comments,
    Config, Error, Generator,
};

/// A loaded config together with its dependency edges: the edges as declared
/// by the spec, and the same edges bound to concrete packages after
/// resolution.
#[derive(Clone, Debug, Default)]
pub struct PackageConfig {
    /// The loaded spec.
    pub config: Config,
    /// Dependency predicates as declared (relative paths already rebased).
    pub declared: Packages,
    /// Dependencies bound to concrete packages; empty until resolution.
    pub dependencies: Packages,
}

/// The in-process registry of every loaded spec and its resolved edges.
///
/// One store lives for one process; it memoizes resolutions, tracks whether
/// any package's dependency set changed since the last run and drives the
/// generator over the final graph.
#[derive(Default)]
pub struct PackageStore {
    packages: BTreeMap<Package, PackageConfig>,
    /// Requested predicate -> its resolution, shared across configs.
    pub resolved_packages: BTreeMap<Package, cppan_types::ResolvedDependency>,
    /// The union of all id-keyed resolution results of this process.
    download_dependencies: IdDependencies,
    local_packages: BTreeMap<PackagePath, PathBuf>,
    deps_changed: bool,
    downloads: usize,
    processing: bool,
}

impl PackageStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The config of a package, if one is loaded.
    pub fn get(&self, package: &Package) -> Option<&PackageConfig> {
        self.packages.get(package)
    }

    /// Every loaded package with its config, skipping the placeholder empty
    /// package.
    pub fn iter(&self) -> impl Iterator<Item = (&Package, &PackageConfig)> {
        self.packages.iter().filter(|(p, _)| !p.is_empty())
    }

    /// True when this process downloaded anything or changed any dependency
    /// set; generated configs can no longer be trusted wholesale.
    pub fn rebuild_configs(&self) -> bool {
        self.deps_changed || self.downloads > 0
    }

    /// True if `path` names a local (on-disk) project of this run.
    pub fn has_local_package(&self, path: &PackagePath) -> bool {
        self.local_packages.contains_key(path)
    }

    /// The source root of a local project.
    pub fn local_package_dir(&self, path: &PackagePath) -> Option<&PathBuf> {
        self.local_packages.get(path)
    }

    /// Inserts a config under its bound package.
    pub fn add_config(&mut self, config: Config) -> &mut PackageConfig {
        let package = config.package.clone();
        let entry = self.packages.entry(package).or_default();
        entry.config = config;
        entry
    }

    /// Loads a spec from `path` and registers every project it defines as a
    /// local package.
    ///
    /// `path` may be a directory (looked up for `cppan.yml`, then
    /// `main.cpp`), a regular file (the spec itself, or a source file whose
    /// block comments embed the spec), or an http(s) URL which is downloaded
    /// into the current directory first. Local projects get a synthetic path
    /// `loc.<hash>.<name>` with the `local` pseudo version.
    pub async fn read_packages_from_file(
        &mut self,
        ctx: &Context,
        path: &Path,
        config_name: Option<&str>,
        direct: bool,
    ) -> Result<(PackagesSet, Config, String), Error> {
        let path = self.download_spec_if_url(ctx, path).await?;
        let path = fs_err::canonicalize(&path).map_err(|_| Error::Missing(path.clone()))?;

        let (mut conf, sname, cpp_fn) = load_spec(&path)?;
        if let Some(config_name) = config_name {
            let settings = conf.spec.local_settings.get_or_insert_with(Default::default);
            settings.current_build = Some(config_name.to_owned());
        }

        // The synthetic local namespace: loc.<short hash of the absolute
        // path>.<sanitized name>. Keyed by path so two checkouts of the same
        // project do not collide.
        let mut pname = path.to_string_lossy().into_owned();
        if cfg!(target_os = "windows") {
            // Prevent different project names for lower/upper case folders.
            pname = pname.to_lowercase();
        }
        let sname: String = sname
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();

        let mut ppath = PackagePath::from_namespace(cppan_types::Namespace::Loc);
        ppath.push(&sha256_short(pname)).expect("short hashes are valid elements");
        ppath.push(&sname).expect("the name was sanitized above");

        let mut root_flags = PackageFlags::LOCAL_PROJECT;
        root_flags.set(PackageFlags::DIRECT_DEPENDENCY, direct);
        conf.set_package(Package::with_flags(
            ppath.clone(),
            Version::local(),
            root_flags,
        ));

        let source_root = if path.is_file() {
            path.parent().map(Path::to_path_buf).unwrap_or_default()
        } else {
            path.clone()
        };

        let mut packages = PackagesSet::new();
        for (name, mut config) in conf.split() {
            let mut pkg_path = ppath.clone();
            if !name.is_empty() {
                let name_path: PackagePath = name
                    .parse()
                    .map_err(|_| Error::MissingConfig(name.clone()))?;
                pkg_path = pkg_path.joined(&name_path);
            }

            let mut flags = root_flags;
            config.default_project().apply_flags(&mut flags);
            let package = Package::with_flags(pkg_path, Version::local(), flags);
            config.set_package(package.clone());

            let root_directory = match &config.default_project().root_directory {
                Some(sub) => source_root.join(sub),
                None => source_root.clone(),
            };
            self.local_packages
                .insert(package.path.clone(), root_directory);

            // A source file named on the command line becomes the project's
            // single source.
            if let Some(cpp_fn) = &cpp_fn {
                if config.default_project().files.is_none() {
                    config.default_project_mut().files = Some(cppan_types::StringOrSeq::One(
                        cpp_fn
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                    ));
                }
            }

            let mut declared = config.file_dependencies()?;
            Config::rebase_relative_dependencies(&mut declared, &ppath);

            let entry = self.add_config(config);
            entry.declared = declared;

            packages.insert(package);
        }

        self.write_index(ctx)?;
        Ok((packages, conf, sname))
    }

    async fn download_spec_if_url(&self, ctx: &Context, path: &Path) -> Result<PathBuf, Error> {
        let text = path.to_string_lossy();
        if !text.starts_with("http://") && !text.starts_with("https://") {
            return Ok(path.to_path_buf());
        }
        let url: url::Url = text
            .parse()
            .map_err(|_| Error::Missing(path.to_path_buf()))?;
        let file_name = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or(CPPAN_FILENAME)
            .to_owned();
        let destination = PathBuf::from(file_name);
        cppan_package_streaming::reqwest::download_to_path(
            &ctx.client,
            url,
            &destination,
            ctx.settings.max_archive_size,
        )
        .await?;
        Ok(destination)
    }

    /// Resolves the declared dependencies of one loaded package and binds
    /// them. Memoized: a package with bound dependencies is not resolved
    /// again, and predicates resolved earlier in the process are reused.
    pub async fn resolve_dependencies(
        &mut self,
        ctx: &Context,
        package: &Package,
    ) -> Result<(), Error> {
        let pc = self
            .packages
            .get(package)
            .ok_or_else(|| Error::MissingConfig(package.target_name().to_owned()))?;
        if !pc.dependencies.is_empty() {
            return Ok(());
        }
        let declared = pc.declared.clone();

        let mut bound = Packages::new();
        let mut to_resolve = Packages::new();
        for (key, dep) in declared {
            if dep.is_local() {
                bound.insert(key, dep);
            } else if let Some(resolved) = self.resolved_packages.get(&dep) {
                bound.insert(
                    resolved.package.path.to_string(),
                    resolved.package.clone(),
                );
            } else {
                to_resolve.insert(key, dep);
            }
        }

        if !to_resolve.is_empty() {
            let mut resolver = Resolver::new(ctx);
            resolver.resolve_dependencies(&to_resolve).await?;
            self.downloads += resolver.downloads;
            self.resolved_packages.extend(
                resolver
                    .resolved
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            self.download_dependencies
                .extend(resolver.download_dependencies().clone());

            self.load_resolved_configs(ctx)?;
            bind_resolved(package, &to_resolve, &self.download_dependencies, &mut bound)?;
        }

        self.packages
            .get_mut(package)
            .expect("looked up above")
            .dependencies = bound;
        Ok(())
    }

    /// Reads the specs of every package the resolver brought in, attaching
    /// configs and declared edges for them. A package whose unpacked tree
    /// lost its spec file is removed so the next run refetches it.
    fn load_resolved_configs(&mut self, ctx: &Context) -> Result<(), Error> {
        let nodes: Vec<cppan_types::ResolvedDependency> =
            self.download_dependencies.values().cloned().collect();
        for node in nodes {
            if node.package.is_local() || self.packages.contains_key(&node.package) {
                continue;
            }
            let source_dir = ctx.dirs.source_dir(&node.package);
            if !source_dir.exists() {
                tracing::debug!("source dir does not exist: {}", node.package.target_name());
                continue;
            }
            if !source_dir.join(CPPAN_FILENAME).exists() {
                // Without a spec the tree is unusable; drop it so the next
                // run starts clean.
                fs_err::remove_dir_all(&source_dir)?;
                return Err(Error::UnknownSpec(source_dir));
            }

            let mut config = match Config::from_dir(&source_dir) {
                Ok(config) => config,
                Err(e) => {
                    // A broken spec cannot be fixed by this run either.
                    fs_err::remove_dir_all(&source_dir)?;
                    return Err(e);
                }
            };
            config.created = true;
            config.set_package(node.package.clone());

            let project = config.project_for(&node.package.path).clone();
            let mut declared = Packages::new();
            for (name, decl) in project.dependencies.entries() {
                let Ok(dep_path) = name.parse::<PackagePath>() else {
                    continue;
                };
                let Ok(version) = decl.version() else {
                    continue;
                };
                let dep = Package::with_flags(dep_path, version, decl.flags());
                declared.insert(dep.path.to_string(), dep);
            }

            let entry = self.add_config(config);
            entry.declared = declared;

            // Bind immediately from the id graph; the node's edges are
            // already closed.
            let mut dependencies = Packages::new();
            for child in node.dependencies(&self.download_dependencies) {
                dependencies.insert(child.package.path.to_string(), child.package.clone());
            }
            self.packages
                .get_mut(&node.package)
                .expect("inserted above")
                .dependencies = dependencies;
        }
        Ok(())
    }

    /// The full pass: resolve everything, settle flags, refresh the access
    /// table and drive the generator over every package and the root.
    pub async fn process(
        &mut self,
        ctx: &Context,
        root_path: &Path,
        root: Config,
        generator: &dyn Generator,
    ) -> Result<(), Error> {
        if self.processing {
            return Ok(());
        }
        self.processing = true;
        let result = self.process_inner(ctx, root_path, root, generator).await;
        self.processing = false;
        result
    }

    async fn process_inner(
        &mut self,
        ctx: &Context,
        root_path: &Path,
        root: Config,
        generator: &dyn Generator,
    ) -> Result<(), Error> {
        let root_package = root.package.clone();
        self.add_config(root);

        let loaded: Vec<Package> = self.packages.keys().cloned().collect();
        for package in loaded {
            self.resolve_dependencies(ctx, &package).await?;
        }

        self.settle_local_dependency_flags()?;

        // Cleaning inside the change check drops installed rows, so the
        // index is written afterwards.
        self.check_deps_changed(ctx, generator)?;
        self.write_index(ctx)?;

        let access = AccessTable::new(
            ctx.dirs.storage_dir_etc.clone(),
            ctx.service_db.clone(),
        )?;
        // Downloads may have replaced any number of specs; without knowing
        // which generated files they influence, start the emit phase from a
        // clean table.
        if self.rebuild_configs() {
            access.clear()?;
        }

        // The root aggregates the configure checks of the whole graph.
        let merged_checks: Vec<cppan_types::Project> = self
            .iter()
            .filter(|(p, _)| **p != root_package)
            .map(|(_, pc)| pc.config.default_project().clone())
            .collect();
        if let Some(root_pc) = self.packages.get_mut(&root_package) {
            for project in &merged_checks {
                root_pc
                    .config
                    .default_project_mut()
                    .merge_checks(project);
            }
        }

        let all: Vec<Package> = self.iter().map(|(p, _)| p.clone()).collect();
        for package in &all {
            generator.generate_package(ctx, self, package, &access)?;
        }

        let root_config = self
            .packages
            .get(&root_package)
            .ok_or_else(|| Error::MissingConfig(root_package.target_name().to_owned()))?
            .config
            .clone();
        generator.generate_meta(ctx, &root_config, root_path, &access)?;
        Ok(())
    }

    /// Local projects declare edges to other store packages; after
    /// resolution the store entries carry the authoritative flags. Copy them
    /// over, preserving the edge-local aspects (private, include-dirs-only)
    /// as an OR of both sides.
    fn settle_local_dependency_flags(&mut self) -> Result<(), Error> {
        let locals: Vec<Package> = self
            .packages
            .keys()
            .filter(|p| p.flags.contains(PackageFlags::LOCAL_PROJECT))
            .cloned()
            .collect();

        for local in locals {
            let deps = self.packages[&local].dependencies.clone();
            let mut updated = Packages::new();
            for (key, mut dep) in deps {
                let Some((store_pkg, _)) = self.packages.get_key_value(&dep) else {
                    return Err(Error::DependencyNotFound {
                        parent: local.target_name().to_owned(),
                        dependency: dep.target_name().to_owned(),
                    });
                };
                let include_only = dep.flags.contains(PackageFlags::INCLUDE_DIRECTORIES_ONLY)
                    || store_pkg.flags.contains(PackageFlags::INCLUDE_DIRECTORIES_ONLY);
                let private = dep.flags.contains(PackageFlags::PRIVATE_DEPENDENCY)
                    || store_pkg.flags.contains(PackageFlags::PRIVATE_DEPENDENCY);
                dep.flags = store_pkg.flags;
                dep.flags
                    .set(PackageFlags::INCLUDE_DIRECTORIES_ONLY, include_only);
                dep.flags.set(PackageFlags::PRIVATE_DEPENDENCY, private);
                updated.insert(key, dep);
            }
            self.packages
                .get_mut(&local)
                .expect("key from the same map")
                .dependencies = updated;
        }
        Ok(())
    }

    /// Hashes every package's bound dependency set and compares it with the
    /// recorded one. A difference marks the package deps-changed: its
    /// exports are purged and its binary outputs removed so the build
    /// relinks against the new set.
    fn check_deps_changed(
        &mut self,
        ctx: &Context,
        generator: &dyn Generator,
    ) -> Result<(), Error> {
        if self.deps_changed {
            return Ok(());
        }

        let snapshots: Vec<(Package, String)> = self
            .iter()
            .map(|(package, pc)| {
                let mut joined = String::new();
                for dep in pc.dependencies.values() {
                    joined.push_str(dep.target_name());
                    joined.push(';');
                }
                (package.clone(), sha256_hex(joined))
            })
            .collect();

        for (package, hash) in snapshots {
            if ctx
                .service_db
                .has_package_dependencies_hash(&package, &hash)?
            {
                continue;
            }
            self.deps_changed = true;

            generator.clear_export(&ctx.dirs.object_dir(&package))?;
            let mut set = PackagesSet::new();
            set.insert(package.clone());
            clean_packages_set(ctx, &set, CleanTarget::LIB | CleanTarget::BIN)?;
            ctx.service_db
                .set_package_dependencies_hash(&package, &hash)?;
        }
        Ok(())
    }

    /// Records every loaded package in the installed index.
    pub fn write_index(&self, ctx: &Context) -> Result<(), Error> {
        for (package, _) in self.iter() {
            ctx.service_db.add_installed_package(package)?;
        }
        Ok(())
    }
}

/// Binds the predicates of one requesting package against the direct
/// resolutions, expanding root predicates into their children.
fn bind_resolved(
    parent: &Package,
    requested: &Packages,
    all: &IdDependencies,
    bound: &mut Packages,
) -> Result<(), Error> {
    for dep in requested.values() {
        if let Some(exact) = all
            .values()
            .filter(|r| r.is_direct())
            .find(|r| r.package.path == dep.path)
        {
            bound.insert(exact.package.path.to_string(), exact.package.clone());
            continue;
        }
        let children: Vec<&cppan_types::ResolvedDependency> = all
            .values()
            .filter(|r| r.is_direct() && dep.path.is_root_of(&r.package.path))
            .collect();
        if children.is_empty() {
            return Err(Error::DependencyNotFound {
                parent: parent.target_name().to_owned(),
                dependency: dep.target_name().to_owned(),
            });
        }
        for child in children {
            bound.insert(child.package.path.to_string(), child.package.clone());
        }
    }
    Ok(())
}

fn load_spec(path: &Path) -> Result<(Config, String, Option<PathBuf>), Error> {
    if path.is_file() {
        if path.file_name().is_some_and(|n| n == CPPAN_FILENAME) {
            let dir = path.parent().unwrap_or(Path::new("."));
            let sname = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok((Config::from_dir(dir)?, sname, None));
        }
        let contents = fs_err::read_to_string(path)?;
        let spec = spec_from_comments(&contents)
            .ok_or_else(|| Error::UnknownSpec(path.to_path_buf()))?;
        let sname = path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok((Config::from_spec(spec), sname, Some(path.to_path_buf())));
    }

    if path.is_dir() {
        let sname = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if path.join(CPPAN_FILENAME).exists() {
            return Ok((Config::from_dir(path)?, sname, None));
        }
        let main = path.join("main.cpp");
        if main.exists() {
            let contents = fs_err::read_to_string(&main)?;
            let spec = spec_from_comments(&contents)
                .ok_or_else(|| Error::UnknownSpec(main.clone()))?;
            return Ok((
                Config::from_spec(spec),
                main.file_stem()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                Some(main),
            ));
        }
        tracing::debug!(
            "no candidates (cppan.yml or main.cpp) in {}; assuming the default config",
            path.display()
        );
        return Ok((Config::default(), sname, None));
    }

    Err(Error::Missing(path.to_path_buf()))
}
