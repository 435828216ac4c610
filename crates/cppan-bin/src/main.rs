use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use cppan::{clean_packages, CleanTarget, MetaGenerator, PackageStore};
use cppan_cache::AccessTable;
use cppan_database::StartupAction;
use cppan_resolve::Context;
use cppan_types::{ProjectSpec, Settings, CPPAN_FILENAME};
use tracing_subscriber::{filter::LevelFilter, util::SubscriberInitExt, EnvFilter};

/// Command line options of the `cppan` client.
#[derive(Debug, Parser)]
#[clap(author, version, about = "C/C++ package manager", long_about = None)]
struct Opt {
    /// Path to a spec file, a directory containing one, or a URL.
    path: Option<PathBuf>,

    /// Resolve, generate and hand the project over to the external build.
    #[clap(long, value_name = "PATH", conflicts_with_all = ["build_only", "rebuild", "generate"])]
    build: Option<PathBuf>,

    /// Like --build, but without refreshing generated files.
    #[clap(long, value_name = "PATH")]
    build_only: Option<PathBuf>,

    /// Clean the project's generated state first, then build.
    #[clap(long, value_name = "PATH")]
    rebuild: Option<PathBuf>,

    /// Resolve dependencies and generate the build tree only.
    #[clap(long, value_name = "PATH")]
    generate: Option<PathBuf>,

    /// Remove generated configs of packages matching the regex (all by
    /// default).
    #[clap(long, value_name = "REGEX", num_args = 0..=1, default_missing_value = ".*")]
    clear_cache: Option<String>,

    /// Remove the cached config-variable hashes matching the regex.
    #[clap(long, value_name = "REGEX", num_args = 0..=1, default_missing_value = ".*")]
    clear_vars_cache: Option<String>,

    /// Run as if started in this directory.
    #[clap(long, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Name of the build configuration to generate.
    #[clap(long, value_name = "NAME")]
    config: Option<String>,

    /// Path to a settings file overriding the user settings.
    #[clap(long, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// Log verbose.
    #[clap(short, long)]
    verbose: bool,
}

fn main() {
    let num_cores = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(2)
        .max(2);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cores / 2)
        .max_blocking_threads(num_cores)
        .enable_all()
        .build()
        .expect("the runtime configuration is static");

    if let Err(e) = runtime.block_on(async_main()) {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn async_main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let default_filter = if opt.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_filter.into())
                .from_env()?,
        )
        .without_time()
        .finish()
        .try_init()?;

    if let Some(dir) = &opt.dir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot change into '{}'", dir.display()))?;
    }

    // The first positional argument doubles as a tiny subcommand surface.
    if opt.path.as_deref() == Some(Path::new("init")) {
        return init_spec();
    }

    let mut settings = load_settings(opt.settings.as_deref())?;

    // The spec path, from whichever flag carries it.
    let rebuild = opt.rebuild.is_some();
    let build_only = opt.build_only.is_some();
    let spec_path = opt
        .build
        .clone()
        .or(opt.build_only.clone())
        .or(opt.rebuild.clone())
        .or(opt.generate.clone())
        .or(opt.path.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    // Per-invocation overrides from the spec itself apply before anything
    // touches the storage.
    if let Some(local) = peek_local_settings(&spec_path) {
        settings.merge_local(&local);
    }

    let ctx = Context::new(settings)?;
    react_to_startup_actions(&ctx);
    check_for_client_updates(&ctx);

    if let Some(pattern) = &opt.clear_cache {
        clean_packages(&ctx, pattern, CleanTarget::ALL_EXCEPT_SRC).await?;
        return Ok(());
    }
    if let Some(pattern) = &opt.clear_vars_cache {
        // Config hashes are keyed by settings hash, not by package; a
        // pattern other than "match everything" cannot be honored.
        if pattern != ".*" {
            tracing::warn!("--clear-vars-cache clears the whole cache");
        }
        ctx.service_db.clear_config_hashes()?;
        return Ok(());
    }

    if build_only {
        AccessTable::do_not_update_files(true);
    }

    let mut store = PackageStore::new();
    let (packages, conf, _name) = store
        .read_packages_from_file(&ctx, &spec_path, opt.config.as_deref(), true)
        .await?;

    if rebuild {
        cppan::clean_packages_set(&ctx, &packages, CleanTarget::ALL_EXCEPT_SRC)?;
    }

    let cwd = std::env::current_dir()?;
    let root = conf.clone();
    store.process(&ctx, &cwd, root, &MetaGenerator).await?;

    tracing::info!("generated into '{}'", cwd.join("cppan").display());
    Ok(())
}

/// Writes a starter spec into the current directory.
fn init_spec() -> anyhow::Result<()> {
    let path = Path::new(CPPAN_FILENAME);
    if path.exists() {
        anyhow::bail!("'{CPPAN_FILENAME}' already exists");
    }
    fs_err::write(
        path,
        "files: src\n\
         dependencies:\n",
    )?;
    tracing::info!("wrote {CPPAN_FILENAME}");
    Ok(())
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let contents = fs_err::read_to_string(path)?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("cannot parse settings file '{}'", path.display()))
}

/// Reads `local_settings` out of the spec before the storage is opened, so
/// storage-affecting overrides (like `storage_dir`) take effect.
fn peek_local_settings(path: &Path) -> Option<Settings> {
    let file = if path.is_dir() {
        path.join(CPPAN_FILENAME)
    } else {
        path.to_path_buf()
    };
    if file.file_name()? != CPPAN_FILENAME {
        return None;
    }
    let contents = std::fs::read_to_string(&file).ok()?;
    ProjectSpec::from_yaml_str(&contents).ok()?.local_settings
}

/// Notes that the client looked for its own updates, at most once every
/// three hours. The lookup itself lives in the self-upgrade path; failures
/// here must never affect the run.
fn check_for_client_updates(ctx: &Context) {
    const CHECK_INTERVAL_SECS: i64 = 3 * 3600;

    let Ok(last) = ctx.service_db.last_client_update_check() else {
        return;
    };
    let elapsed = chrono::Utc::now()
        .signed_duration_since(last)
        .num_seconds();
    if elapsed < CHECK_INTERVAL_SECS {
        return;
    }
    if let Err(e) = ctx.service_db.set_last_client_update_check() {
        tracing::debug!("could not record the update check: {e}");
    }
}

/// Handles the storage-touching startup actions the service database
/// reports for a new client version.
fn react_to_startup_actions(ctx: &Context) {
    for action in ctx.service_db.perform_startup_actions() {
        if action == StartupAction::ClearCache {
            for dir in [&ctx.dirs.storage_dir_cfg, &ctx.dirs.storage_dir_exp] {
                if dir.exists() {
                    if let Err(e) = fs_err::remove_dir_all(dir) {
                        tracing::warn!("could not clear '{}': {e}", dir.display());
                    }
                    let _ = fs_err::create_dir_all(dir);
                }
            }
        }
    }
}
