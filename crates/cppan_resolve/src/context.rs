use std::sync::Arc;

use cppan_cache::Directories;
use cppan_database::{default_catalog_source, PackagesDatabase, ServiceDatabase};
use cppan_networking::Remote;
use cppan_types::Settings;

use crate::ResolveError;

/// The stamp identifying this client build. A change invalidates generated
/// file stamps across runs.
pub(crate) const CLIENT_STAMP: &str = concat!("cppan ", env!("CARGO_PKG_VERSION"));

/// Everything a resolution pass needs, constructed once at process start and
/// passed by reference: the storage layout, the user settings, the service
/// database, the HTTP client and the configured remotes.
pub struct Context {
    /// The storage directory layout.
    pub dirs: Directories,
    /// Effective settings of this invocation.
    pub settings: Settings,
    /// The local process-state database.
    pub service_db: Arc<ServiceDatabase>,
    /// The shared HTTP client.
    pub client: reqwest_middleware::ClientWithMiddleware,
    /// The configured remotes, in order of preference.
    pub remotes: Vec<Remote>,

    catalog: tokio::sync::OnceCell<Arc<PackagesDatabase>>,
}

impl Context {
    /// Builds a context from settings. The storage root comes from the
    /// settings or falls back to the per-user default; the layout is created
    /// eagerly.
    pub fn new(settings: Settings) -> Result<Self, ResolveError> {
        let dirs = match &settings.storage_dir {
            Some(dir) => Directories::from_storage_dir(dir.clone()),
            None => Directories::default_user()?,
        };
        dirs.create_all()?;

        let service_db = Arc::new(ServiceDatabase::open(&dirs.database_dir(), CLIENT_STAMP)?);
        let remotes = settings
            .remotes
            .iter()
            .cloned()
            .map(Remote::from_spec)
            .collect();

        Ok(Context {
            dirs,
            settings,
            service_db,
            client: cppan_networking::default_client(),
            remotes,
            catalog: tokio::sync::OnceCell::new(),
        })
    }

    /// The catalog mirror, opened lazily under its refresh policy. The first
    /// call may download the mirror; later calls are free.
    pub async fn catalog(&self) -> Result<&Arc<PackagesDatabase>, ResolveError> {
        self.catalog
            .get_or_try_init(|| async {
                PackagesDatabase::open(
                    &self.dirs.database_dir(),
                    &self.service_db,
                    &self.client,
                    &default_catalog_source(),
                )
                .await
                .map(Arc::new)
                .map_err(ResolveError::from)
            })
            .await
    }

    /// The remote a dependency was resolved against, falling back to the
    /// first configured remote.
    pub fn remote_by_name(&self, name: Option<&str>) -> Option<&Remote> {
        match name {
            Some(name) => self
                .remotes
                .iter()
                .find(|r| r.name() == name)
                .or_else(|| self.remotes.first()),
            None => self.remotes.first(),
        }
    }
}
