use std::{collections::BTreeMap, time::Duration};

use cppan_types::{
    IdDependencies, Package, PackageFlags, Packages, ProjectVersionId, ResolvedDependency,
};
use serde::{Deserialize, Serialize};

use crate::{ApiError, Remote};

/// The protocol level this client speaks. The server's level must be equal,
/// or at most one ahead of ours minus one; anything else is a fatal skew.
pub const CURRENT_API_LEVEL: i64 = 1;

#[derive(Serialize)]
struct FindDependenciesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<Auth<'a>>,
    project_tree: BTreeMap<String, RequestedVersion>,
}

#[derive(Serialize)]
struct Auth<'a> {
    user: &'a str,
    token: &'a str,
}

#[derive(Serialize)]
struct RequestedVersion {
    version: String,
}

#[derive(Deserialize)]
struct FindDependenciesResponse {
    #[serde(default)]
    api: Option<i64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    info: Option<String>,
    #[serde(default)]
    packages: BTreeMap<String, ResponsePackage>,
}

#[derive(Deserialize)]
struct ResponsePackage {
    id: ProjectVersionId,
    version: String,
    #[serde(default)]
    flags: u64,
    #[serde(default, alias = "sha256")]
    hash: Option<String>,
    #[serde(default)]
    dependencies: Vec<ProjectVersionId>,
}

/// A client of one remote's HTTP API.
pub struct ApiClient {
    client: reqwest_middleware::ClientWithMiddleware,
    remote: Remote,
}

impl ApiClient {
    /// Constructs a client for the given remote.
    pub fn new(client: reqwest_middleware::ClientWithMiddleware, remote: Remote) -> Self {
        ApiClient { client, remote }
    }

    /// The remote this client talks to.
    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/api/{name}",
            self.remote.spec.url.as_str().trim_end_matches('/')
        )
    }

    /// Posts the predicate tree to `/api/find_dependencies` and converts the
    /// flat id-keyed answer into an [`IdDependencies`] set.
    ///
    /// Transport failures retry up to three times with halving timeouts
    /// (10 s, 5 s, 2.5 s); protocol failures are terminal immediately.
    pub async fn find_dependencies(&self, deps: &Packages) -> Result<IdDependencies, ApiError> {
        let request = FindDependenciesRequest {
            auth: match (&self.remote.spec.user, &self.remote.spec.token) {
                (Some(user), Some(token)) => Some(Auth {
                    user: user.as_str(),
                    token: token.as_str(),
                }),
                _ => None,
            },
            project_tree: deps
                .values()
                .filter(|d| !d.is_local())
                .map(|d| {
                    (
                        d.path.to_string(),
                        RequestedVersion {
                            version: d.version.to_string(),
                        },
                    )
                })
                .collect(),
        };

        tracing::info!("requesting dependency list from {}", self.remote.name());
        let mut timeout = Duration::from_secs(10);
        let mut tries = 3;
        let response = loop {
            match self.post_find_dependencies(&request, timeout).await {
                Ok(response) => break response,
                Err(e) if tries > 1 => {
                    tries -= 1;
                    timeout /= 2;
                    tracing::info!("retrying ({e})");
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(info) = &response.info {
            tracing::info!("{info}");
        }
        if let Some(error) = response.error {
            return Err(ApiError::Remote(error));
        }

        match response.api {
            None | Some(0) => return Err(ApiError::MissingApiLevel),
            Some(api) if api > CURRENT_API_LEVEL => {
                return Err(ApiError::ClientTooOld { server: api })
            }
            Some(api) if api < CURRENT_API_LEVEL - 1 => {
                return Err(ApiError::ServerTooOld { server: api })
            }
            Some(_) => {}
        }

        let mut resolved = IdDependencies::new();
        for (path, package) in response.packages {
            let Ok(path) = path.parse::<cppan_types::PackagePath>() else {
                tracing::warn!("ignoring package with malformed path '{path}'");
                continue;
            };
            let Ok(version) = package.version.parse() else {
                tracing::warn!("ignoring package '{path}' with malformed version");
                continue;
            };
            let mut node = ResolvedDependency::new(
                Package::with_flags(path, version, PackageFlags::from_bits(package.flags)),
                package.id,
                package.hash.unwrap_or_default(),
            );
            node.project_flags = PackageFlags::from_bits(package.flags);
            node.dependency_ids = package.dependencies.into_iter().collect();
            node.remote = Some(self.remote.name().to_owned());
            resolved.insert(package.id, node);
        }

        self.check_all_resolved(deps, &resolved)?;
        Ok(resolved)
    }

    /// Every requested package must appear in the answer, except a single
    /// root predicate whose children were expanded instead.
    fn check_all_resolved(
        &self,
        deps: &Packages,
        resolved: &IdDependencies,
    ) -> Result<(), ApiError> {
        let mut unresolved: Vec<&Package> = deps
            .values()
            .filter(|d| !d.is_local())
            .filter(|d| resolved.values().all(|r| r.package.path != d.path))
            .collect();

        if unresolved.len() == 1 {
            let root = unresolved[0];
            if resolved
                .values()
                .any(|r| root.path.is_root_of(&r.package.path))
            {
                tracing::warn!(
                    "skipping unresolved project: {}; probably this is intended",
                    root.target_name()
                );
                unresolved.clear();
            }
        }

        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Unresolved(
                unresolved
                    .iter()
                    .map(|d| d.target_name().to_owned())
                    .collect(),
            ))
        }
    }

    async fn post_find_dependencies(
        &self,
        request: &FindDependenciesRequest<'_>,
        timeout: Duration,
    ) -> Result<FindDependenciesResponse, ApiError> {
        let response = self
            .client
            .post(self.endpoint("find_dependencies"))
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(ApiError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }
        response.json().await.map_err(ApiError::Malformed)
    }

    /// Reports the ids that were just downloaded. Fire and forget: every
    /// failure is logged and swallowed, the resolution outcome never depends
    /// on this call.
    pub async fn add_downloads(&self, ids: &[ProjectVersionId]) {
        #[derive(Serialize)]
        struct AddDownloads<'a> {
            vids: &'a [ProjectVersionId],
        }

        let result = self
            .client
            .post(self.endpoint("add_downloads"))
            .json(&AddDownloads { vids: ids })
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!("add_downloads telemetry failed: {e}");
        }
    }

    /// Marks one client invocation. Fire and forget, like
    /// [`ApiClient::add_downloads`].
    pub async fn add_client_call(&self) {
        let result = self
            .client
            .post(self.endpoint("add_client_call"))
            .json(&serde_json::json!({}))
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!("add_client_call telemetry failed: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use axum::{routing::post, Json, Router};
    use cppan_types::{RemoteSpec, Version};

    use super::*;
    use crate::default_client;

    async fn serve(response: serde_json::Value) -> String {
        let app = Router::new().route(
            "/api/find_dependencies",
            post(move || async move { Json(response) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn client_for(url: &str) -> ApiClient {
        let spec = RemoteSpec {
            url: url.parse().unwrap(),
            ..RemoteSpec::default()
        };
        ApiClient::new(default_client(), Remote::from_spec(spec))
    }

    fn requested(path: &str, version: &str) -> Packages {
        let mut deps = Packages::new();
        deps.insert(
            path.to_owned(),
            Package::new(path.parse().unwrap(), version.parse().unwrap()),
        );
        deps
    }

    #[tokio::test]
    async fn resolves_packages_from_response() {
        let url = serve(serde_json::json!({
            "api": 1,
            "packages": {
                "org.foo.bar": {
                    "id": 10,
                    "version": "1.2.3",
                    "flags": 512,
                    "hash": "abc",
                    "dependencies": [11]
                },
                "org.foo.baz": {
                    "id": 11,
                    "version": "2.0.0",
                    "hash": "def"
                }
            }
        }))
        .await;

        let api = client_for(&url);
        let resolved = api
            .find_dependencies(&requested("org.foo.bar", "1"))
            .await
            .unwrap();

        assert_eq!(resolved.len(), 2);
        let bar = &resolved[&10];
        assert_eq!(bar.package.version, Version::number(1, 2, 3));
        assert_eq!(bar.sha256, "abc");
        assert!(bar.package.flags.contains(PackageFlags::DIRECT_DEPENDENCY));
        assert_eq!(
            bar.dependency_ids.iter().copied().collect::<Vec<_>>(),
            vec![11]
        );
        assert_eq!(bar.remote.as_deref(), Some("origin"));
    }

    #[tokio::test]
    async fn rejects_api_skew() {
        let url = serve(serde_json::json!({ "api": 2, "packages": {} })).await;
        let api = client_for(&url);
        let err = api
            .find_dependencies(&requested("org.foo.bar", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ClientTooOld { server: 2 }));
    }

    #[tokio::test]
    async fn rejects_missing_api_level() {
        let url = serve(serde_json::json!({ "packages": {} })).await;
        let api = client_for(&url);
        let err = api
            .find_dependencies(&requested("org.foo.bar", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingApiLevel));
    }

    #[tokio::test]
    async fn reports_unresolved_packages() {
        let url = serve(serde_json::json!({ "api": 1, "packages": {} })).await;
        let api = client_for(&url);
        let err = api
            .find_dependencies(&requested("org.foo.bar", "1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unresolved(names) if names == ["org.foo.bar-1"]));
    }
}
