use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use url::Url;

/// Where the original sources of a project come from.
///
/// In `cppan.yml` the source is written as a flat map, e.g.
///
/// ```yaml
/// source:
///   git: https://github.com/org/repo
///   tag: v1.2.3
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "RawSource")]
pub enum Source {
    /// A git repository, optionally pinned to a tag, branch or commit.
    Git {
        /// Clone URL of the repository.
        url: String,
        /// Tag to check out.
        tag: Option<String>,
        /// Branch to check out.
        branch: Option<String>,
        /// Commit to check out.
        commit: Option<String>,
    },
    /// A single downloadable archive.
    RemoteFile {
        /// URL of the archive.
        url: Url,
    },
    /// A list of individual downloadable files.
    RemoteFiles {
        /// URLs of the files.
        urls: Vec<Url>,
    },
}

/// An error produced when the `source` map does not describe exactly one
/// source kind.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseSourceError {
    /// None of `git`, `remote`, `remote_files` was present.
    #[error("source must define one of: git, remote, remote_files")]
    MissingKind,

    /// More than one of the source kinds was present.
    #[error("source defines more than one of: git, remote, remote_files")]
    AmbiguousKind,

    /// `tag`, `branch` and `commit` are mutually exclusive refs.
    #[error("git source may pin at most one of: tag, branch, commit")]
    ConflictingGitRefs,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct RawSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    git: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_files: Option<Vec<Url>>,
}

impl From<Source> for RawSource {
    fn from(source: Source) -> Self {
        match source {
            Source::Git {
                url,
                tag,
                branch,
                commit,
            } => RawSource {
                git: Some(url),
                tag,
                branch,
                commit,
                ..RawSource::default()
            },
            Source::RemoteFile { url } => RawSource {
                remote: Some(url),
                ..RawSource::default()
            },
            Source::RemoteFiles { urls } => RawSource {
                remote_files: Some(urls),
                ..RawSource::default()
            },
        }
    }
}

impl TryFrom<RawSource> for Source {
    type Error = ParseSourceError;

    fn try_from(raw: RawSource) -> Result<Self, Self::Error> {
        let kinds = usize::from(raw.git.is_some())
            + usize::from(raw.remote.is_some())
            + usize::from(raw.remote_files.is_some());
        match kinds {
            0 => return Err(ParseSourceError::MissingKind),
            1 => {}
            _ => return Err(ParseSourceError::AmbiguousKind),
        }

        if let Some(url) = raw.git {
            let refs = usize::from(raw.tag.is_some())
                + usize::from(raw.branch.is_some())
                + usize::from(raw.commit.is_some());
            if refs > 1 {
                return Err(ParseSourceError::ConflictingGitRefs);
            }
            return Ok(Source::Git {
                url,
                tag: raw.tag,
                branch: raw.branch,
                commit: raw.commit,
            });
        }
        if let Some(url) = raw.remote {
            return Ok(Source::RemoteFile { url });
        }
        Ok(Source::RemoteFiles {
            urls: raw.remote_files.unwrap_or_default(),
        })
    }
}

impl<'de> Deserialize<'de> for Source {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawSource::deserialize(deserializer)?;
        Source::try_from(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_git_source() {
        let source: Source =
            serde_yaml::from_str("git: https://github.com/org/repo\ntag: v1.2.3\n").unwrap();
        assert_eq!(
            source,
            Source::Git {
                url: "https://github.com/org/repo".to_owned(),
                tag: Some("v1.2.3".to_owned()),
                branch: None,
                commit: None,
            }
        );
    }

    #[test]
    fn parses_remote_file() {
        let source: Source =
            serde_yaml::from_str("remote: https://example.org/a.tar.gz\n").unwrap();
        assert_matches!(source, Source::RemoteFile { .. });
    }

    #[test]
    fn rejects_ambiguous_source() {
        let result: Result<Source, _> = serde_yaml::from_str(
            "git: https://github.com/org/repo\nremote: https://example.org/a.tar.gz\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_conflicting_refs() {
        let result: Result<Source, _> = serde_yaml::from_str(
            "git: https://github.com/org/repo\ntag: a\nbranch: b\n",
        );
        assert!(result.is_err());
    }
}
