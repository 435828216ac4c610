use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

/// Name of the implicit first remote.
pub const DEFAULT_REMOTE_NAME: &str = "origin";

const DEFAULT_REMOTE_URL: &str = "https://cppan.org/";

/// A named source of the catalog and of package archives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSpec {
    /// Display name of the remote.
    pub name: String,
    /// Base URL of the remote API and data directory.
    pub url: Url,
    /// Path component under which archives are served.
    pub data_dir: String,
    /// Optional user for authenticated calls.
    pub user: Option<String>,
    /// Optional token for authenticated calls.
    pub token: Option<String>,
}

impl Default for RemoteSpec {
    fn default() -> Self {
        RemoteSpec {
            name: DEFAULT_REMOTE_NAME.to_owned(),
            url: Url::parse(DEFAULT_REMOTE_URL).expect("default remote url is valid"),
            data_dir: "data".to_owned(),
            user: None,
            token: None,
        }
    }
}

/// User and per-invocation settings consumed by the core.
///
/// Settings deserialize from the user settings file and from the
/// `local_settings` key of a project spec; the local form overrides the user
/// form field by field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the package storage; a platform default is derived when
    /// absent.
    pub storage_dir: Option<PathBuf>,
    /// Name of the build configuration to generate.
    pub current_build: Option<String>,
    /// Skip the local catalog and always ask the remote.
    pub force_server_query: bool,
    /// Parallelism of the fetch pipeline.
    pub max_download_threads: usize,
    /// Re-verify every downloaded archive against its published spec.
    pub verify_all: bool,
    /// Restrict archive downloads to the first URL provider. Used by smoke
    /// tests against a single mirror.
    pub try_only_first: bool,
    /// Maximum accepted archive size in bytes.
    pub max_archive_size: u64,
    /// Catalog rows younger than this window (counted from process start)
    /// force a remote re-check. Twice the mirror TTL by default; the factor
    /// is a heuristic against publishes racing the mirror, not an invariant.
    #[serde(rename = "young_package_window_minutes", with = "minutes")]
    pub young_package_window: Duration,
    /// The remotes to resolve against, in order of preference.
    pub remotes: Vec<RemoteSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            storage_dir: None,
            current_build: None,
            force_server_query: false,
            max_download_threads: 4,
            verify_all: false,
            try_only_first: false,
            max_archive_size: 1_000_000_000,
            young_package_window: Duration::from_secs(30 * 60),
            remotes: vec![RemoteSpec::default()],
        }
    }
}

impl Settings {
    /// Overlays `local` on top of `self`, field by field. Only fields the
    /// local form actually sets (differ from the defaults) win.
    pub fn merge_local(&mut self, local: &Settings) {
        let defaults = Settings::default();
        if local.storage_dir.is_some() {
            self.storage_dir.clone_from(&local.storage_dir);
        }
        if local.current_build.is_some() {
            self.current_build.clone_from(&local.current_build);
        }
        if local.force_server_query != defaults.force_server_query {
            self.force_server_query = local.force_server_query;
        }
        if local.max_download_threads != defaults.max_download_threads {
            self.max_download_threads = local.max_download_threads;
        }
        if local.verify_all != defaults.verify_all {
            self.verify_all = local.verify_all;
        }
        if local.try_only_first != defaults.try_only_first {
            self.try_only_first = local.try_only_first;
        }
        if local.max_archive_size != defaults.max_archive_size {
            self.max_archive_size = local.max_archive_size;
        }
        if local.young_package_window != defaults.young_package_window {
            self.young_package_window = local.young_package_window;
        }
        if local.remotes != defaults.remotes {
            self.remotes.clone_from(&local.remotes);
        }
    }
}

mod minutes {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs() / 60)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let minutes = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(minutes * 60))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_download_threads, 4);
        assert_eq!(settings.max_archive_size, 1_000_000_000);
        assert_eq!(settings.young_package_window, Duration::from_secs(1800));
        assert_eq!(settings.remotes.len(), 1);
        assert_eq!(settings.remotes[0].name, DEFAULT_REMOTE_NAME);
    }

    #[test]
    fn parses_and_merges_local_settings() {
        let local: Settings = serde_yaml::from_str(
            r#"
force_server_query: true
max_download_threads: 8
young_package_window_minutes: 45
"#,
        )
        .unwrap();

        let mut settings = Settings::default();
        settings.merge_local(&local);
        assert!(settings.force_server_query);
        assert_eq!(settings.max_download_threads, 8);
        assert_eq!(
            settings.young_package_window,
            Duration::from_secs(45 * 60)
        );
        assert_eq!(settings.remotes, Settings::default().remotes);
    }
}
