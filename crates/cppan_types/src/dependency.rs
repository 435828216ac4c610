use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Package, PackageFlags};

/// Row id of a project in the catalog.
pub type ProjectId = u64;

/// Row id of a concrete project version in the catalog.
pub type ProjectVersionId = u64;

/// The kind of a catalog project.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    /// A buildable library.
    Library,
    /// A buildable executable.
    Executable,
    /// A grouping node without an artifact; resolution expands it to its
    /// children.
    RootProject,
    /// A plain directory node.
    Directory,
}

impl ProjectType {
    /// The integer stored in the `Projects.type_id` column.
    pub fn type_id(self) -> i64 {
        match self {
            ProjectType::Library => 1,
            ProjectType::Executable => 2,
            ProjectType::RootProject => 3,
            ProjectType::Directory => 4,
        }
    }

    /// Inverse of [`ProjectType::type_id`].
    pub fn from_type_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(ProjectType::Library),
            2 => Some(ProjectType::Executable),
            3 => Some(ProjectType::RootProject),
            4 => Some(ProjectType::Directory),
            _ => None,
        }
    }
}

/// A package selected during resolution, together with its catalog identity
/// and its outgoing edges.
///
/// The dependency graph shares subtrees and may contain cycles between
/// catalog ids, so nodes are owned by an [`IdDependencies`] map and edges are
/// ids into that map rather than owning references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// The concrete package. Its `flags` carry the OR of the project row
    /// flags and the requesting edge flags.
    pub package: Package,
    /// The catalog id of the selected project version.
    pub id: ProjectVersionId,
    /// The expected sha256 of the source archive, as recorded in the catalog.
    pub sha256: String,
    /// The raw flags of the project row, before merging.
    pub project_flags: PackageFlags,
    /// The raw flags of the edge that requested this dependency, before
    /// merging. Zero for directly requested packages.
    pub edge_flags: PackageFlags,
    /// Catalog ids of the dependencies of this package.
    pub dependency_ids: BTreeSet<ProjectVersionId>,
    /// Name of the remote this dependency was resolved against.
    pub remote: Option<String>,
}

impl ResolvedDependency {
    /// Constructs a dependency with no edges.
    pub fn new(package: Package, id: ProjectVersionId, sha256: String) -> Self {
        ResolvedDependency {
            package,
            id,
            sha256,
            project_flags: PackageFlags::empty(),
            edge_flags: PackageFlags::empty(),
            dependency_ids: BTreeSet::new(),
            remote: None,
        }
    }

    /// True when this dependency was requested by the user rather than pulled
    /// in transitively.
    pub fn is_direct(&self) -> bool {
        self.package.flags.contains(PackageFlags::DIRECT_DEPENDENCY)
    }

    /// Resolves this node's edges against the owning map, returning the
    /// child packages in deterministic order. The node itself is skipped so
    /// self-edges cannot recurse.
    pub fn dependencies<'a>(
        &'a self,
        all: &'a IdDependencies,
    ) -> impl Iterator<Item = &'a ResolvedDependency> + 'a {
        self.dependency_ids
            .iter()
            .filter(|id| **id != self.id)
            .filter_map(|id| all.get(id))
    }
}

/// The closed resolution result: every selected project version keyed by its
/// catalog id. Edges between [`ResolvedDependency`] values are ids into this
/// map.
pub type IdDependencies = BTreeMap<ProjectVersionId, ResolvedDependency>;

#[cfg(test)]
mod test {
    use super::*;
    use crate::Version;

    #[test]
    fn type_id_round_trips() {
        for ty in [
            ProjectType::Library,
            ProjectType::Executable,
            ProjectType::RootProject,
            ProjectType::Directory,
        ] {
            assert_eq!(ProjectType::from_type_id(ty.type_id()), Some(ty));
        }
        assert_eq!(ProjectType::from_type_id(0), None);
    }

    #[test]
    fn dependencies_skip_self_and_missing() {
        let pkg = Package::new("org.a.b".parse().unwrap(), Version::number(1, 0, 0));
        let mut dep = ResolvedDependency::new(pkg.clone(), 1, String::new());
        dep.dependency_ids = [1, 2, 99].into_iter().collect();

        let child = ResolvedDependency::new(
            Package::new("org.a.c".parse().unwrap(), Version::number(1, 0, 0)),
            2,
            String::new(),
        );
        let mut all = IdDependencies::new();
        all.insert(1, dep.clone());
        all.insert(2, child);

        let resolved: Vec<_> = dep.dependencies(&all).map(|d| d.id).collect();
        assert_eq!(resolved, vec![2]);
    }
}
