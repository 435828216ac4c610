use cppan_types::{Package, RemoteSpec};
use url::Url;

/// The file name every package archive is served under.
pub const ARCHIVE_FILE_NAME: &str = "cppan.tar.gz";

/// A way to derive the archive URL of a package from a remote.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SourceProvider {
    /// `{url}/{data_dir}/{sharded fs path}/{version}.tar.gz` on the remote
    /// itself.
    DataDir,
    /// The github content mirror, keyed by the package hash.
    GithubMirror,
}

impl SourceProvider {
    /// The archive URL this provider yields for `package`.
    pub fn url(&self, remote: &RemoteSpec, package: &Package) -> Result<Url, url::ParseError> {
        match self {
            SourceProvider::DataDir => {
                let fs_path = package
                    .path
                    .to_fs_path()
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let path = format!(
                    "{}/{}/{}/{}.tar.gz",
                    remote.url.as_str().trim_end_matches('/'),
                    remote.data_dir,
                    fs_path,
                    package.version.to_version_string(),
                );
                Url::parse(&path)
            }
            SourceProvider::GithubMirror => Url::parse(&format!(
                "https://github.com/cppan-packages/{}/raw/master/{ARCHIVE_FILE_NAME}",
                package.hash()
            )),
        }
    }
}

/// A named source of the catalog and of package archives, with its ordered
/// URL providers.
#[derive(Clone, Debug)]
pub struct Remote {
    /// Connection data of the remote.
    pub spec: RemoteSpec,
    /// Providers tried before the default one.
    pub primary_sources: Vec<SourceProvider>,
    /// The provider of last resort before the additional ones; always
    /// present.
    pub default_source: SourceProvider,
    /// Providers tried after the default one.
    pub additional_sources: Vec<SourceProvider>,
}

impl Remote {
    /// The provider stack of a stock remote: the github mirror first, then
    /// the remote's own data directory.
    pub fn from_spec(spec: RemoteSpec) -> Self {
        Remote {
            spec,
            primary_sources: vec![SourceProvider::GithubMirror],
            default_source: SourceProvider::DataDir,
            additional_sources: Vec::new(),
        }
    }

    /// The name of the remote.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The candidate archive URLs for `package`, in provider order.
    /// `try_only_first` restricts the list to the first provider; smoke
    /// tests use it to pin a single mirror.
    pub fn source_urls(&self, package: &Package, try_only_first: bool) -> Vec<Url> {
        let providers = self
            .primary_sources
            .iter()
            .chain(std::iter::once(&self.default_source))
            .chain(self.additional_sources.iter());

        let mut urls = Vec::new();
        for provider in providers {
            match provider.url(&self.spec, package) {
                Ok(url) => urls.push(url),
                Err(e) => {
                    tracing::warn!("skipping unusable source url for {package}: {e}");
                }
            }
            if try_only_first {
                break;
            }
        }
        urls
    }
}

#[cfg(test)]
mod test {
    use cppan_types::Version;

    use super::*;

    fn package() -> Package {
        Package::new(
            "org.foo.bar".parse().unwrap(),
            Version::number(1, 2, 3),
        )
    }

    #[test]
    fn data_dir_provider_shards_path() {
        let remote = RemoteSpec::default();
        let url = SourceProvider::DataDir.url(&remote, &package()).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cppan.org/data/org/f/fo/foo/bar/1.2.3.tar.gz"
        );
    }

    #[test]
    fn github_provider_uses_package_hash() {
        let remote = RemoteSpec::default();
        let pkg = package();
        let url = SourceProvider::GithubMirror.url(&remote, &pkg).unwrap();
        assert!(url.as_str().contains(pkg.hash()));
        assert!(url.as_str().ends_with(ARCHIVE_FILE_NAME));
    }

    #[test]
    fn try_only_first_limits_providers() {
        let remote = Remote::from_spec(RemoteSpec::default());
        assert_eq!(remote.source_urls(&package(), false).len(), 2);
        assert_eq!(remote.source_urls(&package(), true).len(), 1);
    }
}
