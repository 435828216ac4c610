use std::sync::atomic::{AtomicBool, Ordering};

use cppan_cache::{read_stamp, write_stamp, CacheError, FileLock};
use cppan_networking::ApiClient;
use cppan_package_streaming::{reqwest::DownloadError, ExtractError};
use cppan_types::{IdDependencies, ProjectSpec, ResolvedDependency, CPPAN_FILENAME};
use futures::{StreamExt, TryStreamExt};

use crate::Context;

/// A failure of the fetch pipeline for one dependency.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// No URL provider produced an archive matching the hash the local
    /// catalog promised. The mirror may simply be stale, so the resolver
    /// retries remotely before declaring the archive bad.
    #[error("hashes do not match for package: {0}")]
    LocalDbHash(String),

    /// No URL provider produced an archive matching the hash the remote
    /// itself promised.
    #[error("hashes do not match for package: {0}")]
    BadArchiveHash(String),

    /// The dependency was resolved against a remote this process does not
    /// know.
    #[error("no remote configured for package: {0}")]
    NoRemote(String),

    /// A transfer failed in a way that is not a hash mismatch.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Unpacking the verified archive failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Locking or stamping failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Recording the installed package failed.
    #[error(transparent)]
    Database(#[from] cppan_database::DatabaseError),

    /// A filesystem operation outside the archive layer failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fetches, verifies and unpacks every dependency of `deps` with bounded
/// parallelism. Returns the number of archives actually downloaded.
///
/// `query_local_db` states where the expected hashes came from; it decides
/// whether a mismatch is retryable ([`FetchError::LocalDbHash`]) or fatal.
pub(crate) async fn download_and_unpack(
    ctx: &Context,
    deps: &IdDependencies,
    query_local_db: bool,
) -> Result<usize, FetchError> {
    if deps.is_empty() {
        return Ok(0);
    }

    let downloaded: Vec<bool> = futures::stream::iter(deps.values().cloned())
        .map(|dep| fetch_one(ctx, dep, query_local_db))
        .buffer_unordered(ctx.settings.max_download_threads.max(1))
        .try_collect()
        .await?;
    let count = downloaded.into_iter().filter(|d| *d).count();

    send_telemetry(ctx, deps, query_local_db, count);
    Ok(count)
}

/// Stages 1-8 for one dependency; strictly sequential within the package,
/// serialized across processes by the per-package file lock.
async fn fetch_one(
    ctx: &Context,
    dep: ResolvedDependency,
    query_local_db: bool,
) -> Result<bool, FetchError> {
    if dep.package.is_local() {
        return Ok(false);
    }

    let source_dir = ctx.dirs.source_dir(&dep.package);
    let stamp_file = ctx.dirs.package_stamp_file(&dep.package);

    // Stage 1: freshness. The stamp holds the hash of what was unpacked
    // last; only a matching stamp next to an existing tree skips the fetch.
    let must_download =
        dep.sha256.is_empty() || read_stamp(&stamp_file).as_deref() != Some(dep.sha256.as_str());
    if source_dir.exists() && !must_download {
        return Ok(false);
    }

    // Stage 2: the fetch lock. Losing the race means somebody else is
    // already fetching; wait for them and take their result.
    let lock_path = FileLock::lock_path(
        &ctx.dirs.locks_dir(),
        &stamp_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    let lock = match FileLock::try_acquire(&lock_path)? {
        Some(lock) => lock,
        None => {
            let _wait = FileLock::acquire(&lock_path).await?;
            return Ok(false);
        }
    };

    tracing::info!("downloading: {}...", dep.package.target_name());

    // Stages 3-5: provider selection, transfer and verification. The first
    // provider whose archive hashes to the catalog value wins.
    let remote = ctx
        .remote_by_name(dep.remote.as_deref())
        .ok_or_else(|| FetchError::NoRemote(dep.package.target_name().to_owned()))?;
    let archive = ctx
        .dirs
        .download_tmp_dir()
        .join(format!("{}.tar.gz", dep.package.target_name()));

    let mut verified = false;
    for url in remote.source_urls(&dep.package, ctx.settings.try_only_first) {
        match cppan_package_streaming::reqwest::download_to_path(
            &ctx.client,
            url.clone(),
            &archive,
            ctx.settings.max_archive_size,
        )
        .await
        {
            Ok(hashes) if hashes.sha256 == dep.sha256 => {
                verified = true;
                break;
            }
            Ok(hashes) => {
                tracing::warn!(
                    "hash mismatch from {url}: expected {}, got {}",
                    dep.sha256,
                    hashes.sha256
                );
            }
            Err(e) => {
                tracing::warn!("download from {url} failed: {e}");
            }
        }
    }
    if !verified {
        let _ = fs_err::remove_file(&archive);
        // Hashes from the local mirror can be stale within the refresh
        // window; a server answer settles it.
        return Err(if query_local_db {
            FetchError::LocalDbHash(dep.package.target_name().to_owned())
        } else {
            FetchError::BadArchiveHash(dep.package.target_name().to_owned())
        });
    }

    // Stage 6: drop the previous version of the tree.
    if source_dir.exists() {
        fs_err::remove_dir_all(&source_dir)?;
    }
    let object_dir = ctx.dirs.object_dir(&dep.package);
    if object_dir.exists() {
        fs_err::remove_dir_all(&object_dir)?;
    }
    ctx.service_db.remove_installed_package(&dep.package)?;

    // Stage 7: unpack, then the optional relocation the spec file asks for.
    // A failure rolls both the archive and the partial tree back so the next
    // run starts from stage 3.
    tracing::info!("unpacking : {}...", dep.package.target_name());
    let unpack = {
        let archive = archive.clone();
        let source_dir = source_dir.clone();
        tokio::task::spawn_blocking(move || {
            cppan_package_streaming::fs::extract(&archive, &source_dir)
        })
        .await
        .map_err(|e| std::io::Error::other(e))?
    };
    let unpack = unpack.and_then(|()| apply_unpack_directory(&dep, &source_dir));
    if let Err(e) = unpack {
        let _ = fs_err::remove_file(&archive);
        let _ = fs_err::remove_dir_all(&source_dir);
        return Err(e.into());
    }
    fs_err::remove_file(&archive)?;

    // Stage 8: stamp and register, only now that the tree is complete.
    write_stamp(&stamp_file, &dep.sha256)?;
    ctx.service_db.add_installed_package(&dep.package)?;

    drop(lock);
    Ok(true)
}

/// Applies the `unpack_directory` relocation declared by the unpacked spec,
/// if any.
fn apply_unpack_directory(
    dep: &ResolvedDependency,
    source_dir: &std::path::Path,
) -> Result<(), ExtractError> {
    let spec_file = source_dir.join(CPPAN_FILENAME);
    let Ok(contents) = std::fs::read_to_string(&spec_file) else {
        return Ok(());
    };
    let Ok(spec) = ProjectSpec::from_yaml_str(&contents) else {
        // A broken spec surfaces later, when the package is loaded.
        return Ok(());
    };

    let project = dep
        .package
        .path
        .name()
        .and_then(|name| spec.projects.get(name))
        .unwrap_or(&spec.root);
    let Some(unpack_dir) = &project.unpack_directory else {
        return Ok(());
    };
    cppan_package_streaming::fs::relocate_into_subdirectory(
        source_dir,
        unpack_dir,
        &[CPPAN_FILENAME],
    )
}

/// Posts the download list and the once-per-process client-call marker.
/// Both are fire-and-forget; failures never affect the resolution outcome.
fn send_telemetry(ctx: &Context, deps: &IdDependencies, query_local_db: bool, downloads: usize) {
    static CLIENT_CALL_SENT: AtomicBool = AtomicBool::new(false);

    let Some(remote) = ctx.remotes.first() else {
        return;
    };
    let api = ApiClient::new(ctx.client.clone(), remote.clone());

    if query_local_db && downloads > 0 {
        let ids: Vec<_> = deps.keys().copied().collect();
        let api = ApiClient::new(ctx.client.clone(), remote.clone());
        tokio::spawn(async move { api.add_downloads(&ids).await });
    }

    if !CLIENT_CALL_SENT.swap(true, Ordering::SeqCst) {
        tokio::spawn(async move { api.add_client_call().await });
    }
}
