use std::collections::BTreeMap;

use cppan_database::DatabaseError;
use cppan_networking::{ApiClient, ApiError};
use cppan_types::{
    IdDependencies, Package, Packages, PackagesSet, ResolvedDependency,
};

use crate::{fetch, Context, FetchError};

/// A terminal resolution failure.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Neither the local catalog nor any remote produced an answer.
    #[error("dependencies were not resolved by any remote")]
    DependencyNotResolved,

    /// The local catalog failed in a way that is not recoverable by asking
    /// the remote (schema skew, broken mirror).
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The last remote attempt failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The fetch pipeline failed terminally.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Storage bookkeeping failed.
    #[error(transparent)]
    Cache(#[from] cppan_cache::CacheError),

    /// A filesystem operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The dual-strategy resolver: local catalog first, remote API second, with
/// one retry when the local data turns out stale mid-fetch.
pub struct Resolver<'a> {
    ctx: &'a Context,
    query_local_db: bool,
    download_dependencies: IdDependencies,
    /// Requested package -> its resolution, filled by
    /// [`Resolver::resolve_dependencies`].
    pub resolved: BTreeMap<Package, ResolvedDependency>,
    /// Number of archives downloaded by the last pass.
    pub downloads: usize,
}

impl<'a> Resolver<'a> {
    /// Constructs a resolver over `ctx`. `force_server_query` in the
    /// settings skips the local catalog for the whole pass.
    pub fn new(ctx: &'a Context) -> Self {
        Resolver {
            ctx,
            query_local_db: !ctx.settings.force_server_query,
            download_dependencies: IdDependencies::new(),
            resolved: BTreeMap::new(),
            downloads: 0,
        }
    }

    /// The full id-keyed set selected by the last pass, including transitive
    /// dependencies.
    pub fn download_dependencies(&self) -> &IdDependencies {
        &self.download_dependencies
    }

    /// Closes `dependencies` to concrete packages and brings every selected
    /// archive into the storage. Local packages are skipped; everything else
    /// lands in [`Resolver::resolved`].
    pub async fn resolve_dependencies(
        &mut self,
        dependencies: &Packages,
    ) -> Result<(), ResolveError> {
        let deps: Packages = dependencies
            .iter()
            .filter(|(_, d)| !d.is_local())
            .map(|(k, d)| (k.clone(), d.clone()))
            .collect();
        if deps.is_empty() {
            return Ok(());
        }

        self.resolve_and_fetch(&deps).await?;

        // Bind the requested predicates to their selections. A predicate
        // naming a root project matches every expanded child.
        for requested in deps.values() {
            for selected in self.download_dependencies.values() {
                if !selected.is_direct() {
                    continue;
                }
                if requested.path == selected.package.path {
                    self.resolved.insert(requested.clone(), selected.clone());
                } else if requested.path.is_root_of(&selected.package.path) {
                    self.resolved
                        .insert(selected.package.clone(), selected.clone());
                }
            }
        }
        Ok(())
    }

    /// Two attempts: local catalog then remote, where a stale-mirror signal
    /// during fetching downgrades the process to remote-only and retries
    /// once.
    async fn resolve_and_fetch(&mut self, deps: &Packages) -> Result<(), ResolveError> {
        let mut attempts = if self.query_local_db { 2 } else { 1 };
        loop {
            attempts -= 1;

            if self.query_local_db {
                match self.resolve_local(deps).await {
                    Ok(resolved) => self.download_dependencies = resolved,
                    Err(e) => {
                        // Any local miss (young row, unknown package, stale
                        // schema data) is worth one server round trip.
                        tracing::warn!("cannot resolve from the local catalog: {e}");
                        self.query_local_db = false;
                        self.download_dependencies = self.resolve_remote(deps).await?;
                    }
                }
            } else {
                self.download_dependencies = self.resolve_remote(deps).await?;
            }

            match fetch::download_and_unpack(self.ctx, &self.download_dependencies, self.query_local_db)
                .await
            {
                Ok(count) => {
                    self.downloads += count;
                    return Ok(());
                }
                Err(FetchError::LocalDbHash(package)) if attempts > 0 => {
                    tracing::warn!(
                        "local catalog data caused issues for {package}, trying the remote"
                    );
                    self.query_local_db = false;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn resolve_local(&self, deps: &Packages) -> Result<IdDependencies, ResolveError> {
        let catalog = self.ctx.catalog().await?;
        let mut resolved =
            catalog.find_dependencies(deps, self.ctx.settings.young_package_window)?;

        // The catalog rows carry no remote; archives of locally resolved
        // packages come from the first configured remote.
        let remote_name = self.ctx.remotes.first().map(|r| r.name().to_owned());
        for dep in resolved.values_mut() {
            dep.remote.clone_from(&remote_name);
        }
        Ok(resolved)
    }

    /// Tries every configured remote in order; the first answer wins.
    async fn resolve_remote(&self, deps: &Packages) -> Result<IdDependencies, ResolveError> {
        let mut last_error = None;
        for remote in &self.ctx.remotes {
            if self.ctx.remotes.len() > 1 {
                tracing::info!("trying {} remote", remote.name());
            }
            let api = ApiClient::new(self.ctx.client.clone(), remote.clone());
            match api.find_dependencies(deps).await {
                Ok(resolved) => return Ok(resolved),
                Err(e) => {
                    tracing::warn!("{e}");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e.into()),
            None => Err(ResolveError::DependencyNotResolved),
        }
    }
}

/// Resolves a bare `path[-version]` target name, defaulting the version to
/// `*` and retrying with the `master` branch when the latest numeric version
/// cannot be found. Returns the requested package and everything resolution
/// selected.
pub async fn resolve_dependency(
    ctx: &Context,
    target: &str,
) -> Result<(Package, PackagesSet), ResolveError> {
    let (package, versionless) = match target.parse::<Package>() {
        Ok(package) => (package, false),
        Err(_) => (format!("{target}-*").parse().map_err(|_| {
            ResolveError::DependencyNotResolved
        })?, true),
    };

    let mut deps = Packages::new();
    deps.insert(package.path.to_string(), package.clone());

    let mut resolver = Resolver::new(ctx);
    match resolver.resolve_dependencies(&deps).await {
        Ok(()) => {}
        Err(e) if versionless => {
            tracing::debug!("{target}-* failed ({e}), trying the master branch");
            let master: Package = format!("{target}-master")
                .parse()
                .map_err(|_| ResolveError::DependencyNotResolved)?;
            let mut deps = Packages::new();
            deps.insert(master.path.to_string(), master.clone());
            resolver = Resolver::new(ctx);
            resolver.resolve_dependencies(&deps).await?;
            return Ok((
                master,
                resolver.resolved.values().map(|d| d.package.clone()).collect(),
            ));
        }
        Err(e) => return Err(e),
    }

    Ok((
        package,
        resolver.resolved.values().map(|d| d.package.clone()).collect(),
    ))
}
