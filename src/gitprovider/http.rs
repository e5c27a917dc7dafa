//! REST-backed provider gateway for GitHub and Gitea/Forgejo.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{GitProviderGateway, GitRepository, Provider, ProviderKind, parse_repo_url};
use crate::GitProviderConfig;
use crate::error::{PrebuildError, Result};

const USER_AGENT: &str = concat!("prebuild_automation/", env!("CARGO_PKG_VERSION"));
const GITHUB_HOST: &str = "github.com";
const GITHUB_API_URL: &str = "https://api.github.com";

pub struct HttpGitProviderGateway {
    client: reqwest::Client,
    providers: Vec<GitProviderConfig>,
    webhook_endpoint: String,
    webhook_secret: Option<String>,
}

impl HttpGitProviderGateway {
    pub fn new(
        providers: Vec<GitProviderConfig>,
        webhook_endpoint: String,
        webhook_secret: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PrebuildError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            providers,
            webhook_endpoint,
            webhook_secret,
        })
    }

    fn provider_config(&self, provider: &Provider) -> Option<&GitProviderConfig> {
        self.providers.iter().find(|p| p.id == provider.id)
    }

    fn request(
        &self,
        provider: &Provider,
        method: Method,
        segments: &[&str],
    ) -> Result<RequestBuilder> {
        let url = endpoint(&provider.api_url, segments)?;
        let mut builder = self.client.request(method, url);

        builder = match provider.kind {
            ProviderKind::Github => builder.header("Accept", "application/vnd.github+json"),
            ProviderKind::Gitea => builder.header("Accept", "application/json"),
        };

        let token = self
            .provider_config(provider)
            .and_then(|p| p.token_env.as_deref())
            .and_then(|var| std::env::var(var).ok())
            .filter(|t| !t.is_empty());

        Ok(match (token, provider.kind) {
            (Some(token), ProviderKind::Github) => {
                builder.header("Authorization", format!("Bearer {}", token))
            }
            (Some(token), ProviderKind::Gitea) => {
                builder.header("Authorization", format!("token {}", token))
            }
            (None, _) => builder,
        })
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| PrebuildError::Gateway(format!("{} request failed: {}", what, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PrebuildError::Gateway(format!(
                "{} returned {}: {}",
                what, status, body
            )));
        }

        Ok(resp)
    }

    async fn send_json(&self, builder: RequestBuilder, what: &str) -> Result<Value> {
        self.send(builder, what)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| PrebuildError::Gateway(format!("Failed to parse {} response: {}", what, e)))
    }
}

/// Append path segments to the provider API root, percent-encoding each one
fn endpoint(api_url: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(api_url).map_err(|e| {
        PrebuildError::Config(format!("Invalid provider api_url '{}': {}", api_url, e))
    })?;
    url.path_segments_mut()
        .map_err(|_| {
            PrebuildError::Config(format!("Provider api_url '{}' cannot take a path", api_url))
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Distance field differs between GitHub (`ahead_by`) and Gitea (`total_commits`)
fn commits_from_compare(kind: ProviderKind, body: &Value) -> Option<u32> {
    let field = match kind {
        ProviderKind::Github => "ahead_by",
        ProviderKind::Gitea => "total_commits",
    };
    body.get(field)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

fn branch_head_sha(kind: ProviderKind, body: &Value) -> Option<String> {
    let commit = body.get("commit")?;
    let sha = match kind {
        ProviderKind::Github => commit.get("sha"),
        ProviderKind::Gitea => commit.get("id").or_else(|| commit.get("sha")),
    };
    sha.and_then(Value::as_str).map(String::from)
}

fn webhook_payload(kind: ProviderKind, endpoint: &str, secret: Option<&str>) -> Value {
    let mut config = json!({
        "url": endpoint,
        "content_type": "json",
    });
    if let Some(secret) = secret {
        config["secret"] = json!(secret);
    }

    match kind {
        ProviderKind::Github => json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": config,
        }),
        ProviderKind::Gitea => json!({
            "type": "gitea",
            "active": true,
            "events": ["push"],
            "config": config,
        }),
    }
}

#[async_trait]
impl GitProviderGateway for HttpGitProviderGateway {
    async fn resolve_provider(&self, url: &str) -> Result<Provider> {
        let location = parse_repo_url(url)?;

        if let Some(config) = self.providers.iter().find(|p| p.host == location.host) {
            return Ok(Provider {
                id: config.id.clone(),
                kind: config.kind,
                host: config.host.clone(),
                api_url: config.api_url.clone(),
            });
        }

        if location.host == GITHUB_HOST {
            debug!("No provider configured for github.com, using public defaults");
            return Ok(Provider {
                id: "github".to_string(),
                kind: ProviderKind::Github,
                host: GITHUB_HOST.to_string(),
                api_url: GITHUB_API_URL.to_string(),
            });
        }

        Err(PrebuildError::provider_resolution(
            url,
            format!("no git provider configured for host '{}'", location.host),
        ))
    }

    async fn get_repository_context(
        &self,
        provider: &Provider,
        url: &str,
    ) -> Result<GitRepository> {
        let location = parse_repo_url(url)?;
        let repo_path = ["repos", location.owner.as_str(), location.name.as_str()];

        let repo = self
            .send_json(
                self.request(provider, Method::GET, &repo_path)?,
                "repository lookup",
            )
            .await?;
        let branch = repo
            .get("default_branch")
            .and_then(Value::as_str)
            .unwrap_or("main")
            .to_string();

        let branch_info = self
            .send_json(
                self.request(
                    provider,
                    Method::GET,
                    &[
                        "repos",
                        location.owner.as_str(),
                        location.name.as_str(),
                        "branches",
                        branch.as_str(),
                    ],
                )?,
                "branch lookup",
            )
            .await?;
        let sha = branch_head_sha(provider.kind, &branch_info).unwrap_or_default();

        Ok(GitRepository {
            url: url.to_string(),
            owner: location.owner,
            name: location.name,
            branch,
            sha,
        })
    }

    async fn get_commits_range(
        &self,
        provider: &Provider,
        repository: &GitRepository,
        from_sha: &str,
        to_sha: &str,
    ) -> Result<u32> {
        let range = format!("{}...{}", from_sha, to_sha);
        let path = [
            "repos",
            repository.owner.as_str(),
            repository.name.as_str(),
            "compare",
            range.as_str(),
        ];
        let body = self
            .send_json(self.request(provider, Method::GET, &path)?, "commit compare")
            .await?;

        commits_from_compare(provider.kind, &body).ok_or_else(|| {
            PrebuildError::Gateway(format!(
                "commit compare for {}/{} returned no commit count",
                repository.owner, repository.name
            ))
        })
    }

    async fn register_webhook(
        &self,
        provider: &Provider,
        repository: &GitRepository,
    ) -> Result<String> {
        let path = ["repos", repository.owner.as_str(), repository.name.as_str(), "hooks"];
        let payload = webhook_payload(
            provider.kind,
            &self.webhook_endpoint,
            self.webhook_secret.as_deref(),
        );

        let body = self
            .send_json(
                self.request(provider, Method::POST, &path)?.json(&payload),
                "webhook registration",
            )
            .await?;

        let id = body
            .get("id")
            .and_then(|v| {
                v.as_u64()
                    .map(|n| n.to_string())
                    .or_else(|| v.as_str().map(String::from))
            })
            .ok_or_else(|| {
                PrebuildError::Gateway("webhook registration returned no id".to_string())
            })?;

        info!(
            provider = %provider.id,
            repository = %repository.url,
            webhook_id = %id,
            "Registered prebuild webhook"
        );
        Ok(id)
    }

    async fn deregister_webhook(
        &self,
        provider: &Provider,
        repository: &GitRepository,
        webhook_id: &str,
    ) -> Result<()> {
        let path = [
            "repos",
            repository.owner.as_str(),
            repository.name.as_str(),
            "hooks",
            webhook_id,
        ];
        let resp = self
            .request(provider, Method::DELETE, &path)?
            .send()
            .await
            .map_err(|e| PrebuildError::Gateway(format!("webhook removal request failed: {}", e)))?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                warn!(webhook_id, repository = %repository.url, "Webhook already gone");
                Ok(())
            }
            status => Err(PrebuildError::Gateway(format!(
                "webhook removal returned {}",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway(providers: Vec<GitProviderConfig>) -> HttpGitProviderGateway {
        HttpGitProviderGateway::new(
            providers,
            "https://prebuilds.example.com/webhook/git-event".into(),
            Some("s3cret".into()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_configured_host_before_public_default() {
        let gw = gateway(vec![GitProviderConfig {
            id: "internal".into(),
            kind: ProviderKind::Gitea,
            host: "git.acme.dev".into(),
            api_url: "https://git.acme.dev/api/v1".into(),
            token_env: None,
        }]);

        let provider = gw
            .resolve_provider("https://git.acme.dev/platform/api.git")
            .await
            .unwrap();
        assert_eq!(provider.id, "internal");
        assert_eq!(provider.kind, ProviderKind::Gitea);

        let github = gw
            .resolve_provider("https://github.com/daytonaio/daytona.git")
            .await
            .unwrap();
        assert_eq!(github.api_url, GITHUB_API_URL);
    }

    #[tokio::test]
    async fn unknown_host_fails_resolution() {
        let gw = gateway(Vec::new());
        let err = gw
            .resolve_provider("https://bitbucket.org/acme/api.git")
            .await
            .unwrap_err();
        assert!(matches!(err, PrebuildError::ProviderResolution { .. }));
    }

    #[test]
    fn endpoint_encodes_each_segment() {
        let url = endpoint(
            "https://git.acme.dev/api/v1/",
            &["repos", "acme", "api", "branches", "feature/x"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://git.acme.dev/api/v1/repos/acme/api/branches/feature%2Fx"
        );

        let github = endpoint(GITHUB_API_URL, &["repos", "acme", "api", "hooks"]).unwrap();
        assert_eq!(github.as_str(), "https://api.github.com/repos/acme/api/hooks");

        assert!(matches!(
            endpoint("not a url", &["repos"]),
            Err(PrebuildError::Config(_))
        ));
    }

    #[test]
    fn compare_count_depends_on_provider_kind() {
        let github = json!({ "ahead_by": 3, "total_commits": 9 });
        let gitea = json!({ "total_commits": 4 });

        assert_eq!(commits_from_compare(ProviderKind::Github, &github), Some(3));
        assert_eq!(commits_from_compare(ProviderKind::Gitea, &gitea), Some(4));
        assert_eq!(commits_from_compare(ProviderKind::Github, &gitea), None);
    }

    #[test]
    fn branch_sha_is_read_per_provider() {
        let github = json!({ "commit": { "sha": "abc" } });
        let gitea = json!({ "commit": { "id": "def" } });

        assert_eq!(branch_head_sha(ProviderKind::Github, &github).as_deref(), Some("abc"));
        assert_eq!(branch_head_sha(ProviderKind::Gitea, &gitea).as_deref(), Some("def"));
    }

    #[test]
    fn webhook_payload_subscribes_to_push_with_secret() {
        let payload = webhook_payload(ProviderKind::Github, "https://hook", Some("s"));
        assert_eq!(payload["name"], "web");
        assert_eq!(payload["events"], json!(["push"]));
        assert_eq!(payload["config"]["secret"], "s");

        let gitea = webhook_payload(ProviderKind::Gitea, "https://hook", None);
        assert_eq!(gitea["type"], "gitea");
        assert!(gitea["config"].get("secret").is_none());
    }
}
