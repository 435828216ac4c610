use std::path::{Path, PathBuf};

use cppan_types::{
    Package, PackageFlags, Packages, Project, ProjectSpec, SpecError, CPPAN_FILENAME,
};

use crate::Error;

/// One loaded spec bound to the package it describes.
///
/// A config freshly read from disk has an empty [`Config::package`]; the
/// store binds it via [`Config::set_package`] once the identity is known
/// (local synthetic path, or the resolved catalog package).
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// The parsed spec.
    pub spec: ProjectSpec,
    /// The package this config belongs to.
    pub package: Package,
    /// Where the spec was loaded from.
    pub dir: PathBuf,
    /// True when the package was downloaded during this run, which forces
    /// regeneration of its derived files.
    pub created: bool,
}

impl Config {
    /// Loads the spec file from a directory.
    pub fn from_dir(dir: &Path) -> Result<Self, Error> {
        let file = dir.join(CPPAN_FILENAME);
        let contents = fs_err::read_to_string(&file)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.dir = dir.to_path_buf();
        Ok(config)
    }

    /// Parses a spec from YAML text.
    pub fn from_yaml_str(s: &str) -> Result<Self, SpecError> {
        Ok(Config {
            spec: ProjectSpec::from_yaml_str(s)?,
            ..Config::default()
        })
    }

    /// Wraps an already-parsed spec.
    pub fn from_spec(spec: ProjectSpec) -> Self {
        Config {
            spec,
            ..Config::default()
        }
    }

    /// Binds this config to a package and memoizes the derived names.
    pub fn set_package(&mut self, package: Package) {
        self.package = package;
    }

    /// The root project of the spec.
    pub fn default_project(&self) -> &Project {
        &self.spec.root
    }

    /// The project responsible for `path`: the subproject whose name equals
    /// the last path element, or the root project.
    pub fn project_for(&self, path: &cppan_types::PackagePath) -> &Project {
        path.name()
            .and_then(|name| self.spec.projects.get(name))
            .unwrap_or(&self.spec.root)
    }

    /// Mutable access to the root project.
    pub fn default_project_mut(&mut self) -> &mut Project {
        &mut self.spec.root
    }

    /// Splits a multi-project spec into one config per project. Single
    /// project specs yield themselves. The subproject name is returned with
    /// each config so the caller can extend the package path.
    pub fn split(&self) -> Vec<(String, Config)> {
        if !self.spec.has_subprojects() {
            return vec![(String::new(), self.clone())];
        }
        self.spec
            .projects
            .iter()
            .map(|(name, project)| {
                let spec = ProjectSpec {
                    root_project: self.spec.root_project.clone(),
                    projects: Default::default(),
                    local_settings: self.spec.local_settings.clone(),
                    root: project.clone(),
                };
                let mut config = Config::from_spec(spec);
                config.dir.clone_from(&self.dir);
                (name.clone(), config)
            })
            .collect()
    }

    /// The dependency edges declared by this config's root project, as
    /// predicate packages keyed by their textual path.
    pub fn file_dependencies(&self) -> Result<Packages, Error> {
        let mut packages = Packages::new();
        for (name, decl) in self.default_project().dependencies.entries() {
            let path: cppan_types::PackagePath = name.parse().map_err(|_| {
                Error::DependencyNotFound {
                    parent: self.package.target_name().to_owned(),
                    dependency: name.clone(),
                }
            })?;
            let version = decl
                .version()
                .map_err(|e| SpecError::InvalidDependencyVersion(name.clone(), e))?;
            let package = Package::with_flags(path, version, decl.flags());
            packages.insert(package.path.to_string(), package);
        }
        Ok(packages)
    }

    /// Rebases every relative dependency under `root`, giving it the local
    /// pseudo version. Local projects declare their siblings this way.
    pub fn rebase_relative_dependencies(
        deps: &mut Packages,
        root: &cppan_types::PackagePath,
    ) {
        let relative: Vec<String> = deps
            .iter()
            .filter(|(_, d)| d.path.is_relative(None))
            .map(|(k, _)| k.clone())
            .collect();
        for key in relative {
            let Some(dep) = deps.remove(&key) else {
                continue;
            };
            let mut package = Package::with_flags(
                root.joined(&dep.path),
                cppan_types::Version::local(),
                dep.flags,
            );
            package.flags.insert(PackageFlags::LOCAL_PROJECT);
            deps.insert(package.path.to_string(), package);
        }
    }
}

#[cfg(test)]
mod test {
    use cppan_types::Version;

    use super::*;

    #[test]
    fn splits_multi_project_specs() {
        let config = Config::from_yaml_str(
            r#"
root_project: pvt.someone
projects:
  alpha:
    type: exe
  beta:
    type: lib
"#,
        )
        .unwrap();

        let parts = config.split();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, "alpha");
        assert!(parts
            .iter()
            .all(|(_, c)| !c.spec.has_subprojects()));
    }

    #[test]
    fn file_dependencies_parse_decls() {
        let config = Config::from_yaml_str(
            r#"
dependencies:
  org.foo.bar: "1.2"
  org.foo.baz:
    version: "2"
    private: true
"#,
        )
        .unwrap();

        let deps = config.file_dependencies().unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(
            deps["org.foo.bar"].version,
            Version::number(1, 2, -1)
        );
        assert!(deps["org.foo.baz"]
            .flags
            .contains(PackageFlags::PRIVATE_DEPENDENCY));
    }

    #[test]
    fn rebases_relative_dependencies() {
        let config = Config::from_yaml_str("dependencies: [my.helper]\n").unwrap();
        let mut deps = config.file_dependencies().unwrap();
        let root: cppan_types::PackagePath = "loc.abcd1234.tool".parse().unwrap();
        Config::rebase_relative_dependencies(&mut deps, &root);

        let dep = &deps["loc.abcd1234.tool.my.helper"];
        assert!(dep.version.is_local());
        assert!(dep.flags.contains(PackageFlags::LOCAL_PROJECT));
    }
}
