//! Test doubles for the gateway traits plus per-scenario fixture builders.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::build::{Build, BuildCreationData, BuildFilter, BuildGateway, BuildState};
use crate::db::{PrebuildStore, SqlPrebuildStore, init_memory_db};
use crate::error::{ItemFailure, PrebuildError, Result};
use crate::gitprovider::{GitProviderGateway, GitRepository, Provider, ProviderKind, parse_repo_url};
use crate::prebuild::PrebuildConfig;
use crate::template::{WorkspaceTemplate, WorkspaceTemplateFilter};

pub const REPO_URL: &str = "https://github.com/daytonaio/daytona.git";

#[derive(Default)]
struct GitState {
    unresolvable: HashSet<String>,
    distance: u32,
    fail_commits_range: bool,
    fail_deregister: bool,
    next_hook: u32,
    active_hooks: Vec<(String, String)>,
    deregistered: Vec<String>,
    commit_queries: Vec<(String, String)>,
}

/// Records every call and answers with configured values
#[derive(Default)]
pub struct FakeGitProvider {
    state: Mutex<GitState>,
}

impl FakeGitProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_distance(&self, distance: u32) {
        self.state.lock().unwrap().distance = distance;
    }

    pub fn fail_commits_range(&self) {
        self.state.lock().unwrap().fail_commits_range = true;
    }

    pub fn fail_deregister(&self) {
        self.state.lock().unwrap().fail_deregister = true;
    }

    pub fn make_unresolvable(&self, url: &str) {
        self.state.lock().unwrap().unresolvable.insert(url.to_string());
    }

    /// Webhook ids currently registered for a repository URL
    pub fn active_hooks(&self, url: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .active_hooks
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn registrations(&self) -> u32 {
        self.state.lock().unwrap().next_hook
    }

    pub fn deregistered(&self) -> Vec<String> {
        self.state.lock().unwrap().deregistered.clone()
    }

    pub fn commit_queries(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().commit_queries.clone()
    }
}

#[async_trait]
impl GitProviderGateway for FakeGitProvider {
    async fn resolve_provider(&self, url: &str) -> Result<Provider> {
        if self.state.lock().unwrap().unresolvable.contains(url) {
            return Err(PrebuildError::provider_resolution(url, "no provider for host"));
        }
        Ok(Provider {
            id: "github".into(),
            kind: ProviderKind::Github,
            host: "github.com".into(),
            api_url: "https://api.github.com".into(),
        })
    }

    async fn get_repository_context(
        &self,
        _provider: &Provider,
        url: &str,
    ) -> Result<GitRepository> {
        let location = parse_repo_url(url)?;
        Ok(GitRepository {
            url: url.to_string(),
            owner: location.owner,
            name: location.name,
            branch: "main".into(),
            sha: "sha1".into(),
        })
    }

    async fn get_commits_range(
        &self,
        _provider: &Provider,
        _repository: &GitRepository,
        from_sha: &str,
        to_sha: &str,
    ) -> Result<u32> {
        let mut state = self.state.lock().unwrap();
        state
            .commit_queries
            .push((from_sha.to_string(), to_sha.to_string()));
        if state.fail_commits_range {
            return Err(PrebuildError::Gateway("compare endpoint unavailable".into()));
        }
        Ok(state.distance)
    }

    async fn register_webhook(
        &self,
        _provider: &Provider,
        repository: &GitRepository,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.next_hook += 1;
        let id = format!("webhook-{}", state.next_hook);
        state.active_hooks.push((repository.url.clone(), id.clone()));
        Ok(id)
    }

    async fn deregister_webhook(
        &self,
        _provider: &Provider,
        repository: &GitRepository,
        webhook_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deregister {
            return Err(PrebuildError::Gateway("provider returned 500".into()));
        }
        let before = state.active_hooks.len();
        state
            .active_hooks
            .retain(|(url, id)| !(url == &repository.url && id == webhook_id));
        if state.active_hooks.len() == before {
            return Err(PrebuildError::NotFound(format!(
                "webhook {} on {}",
                webhook_id, repository.url
            )));
        }
        state.deregistered.push(webhook_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct BuildLedger {
    builds: Vec<Build>,
    created: Vec<BuildCreationData>,
    fail_create_for: HashSet<String>,
    fail_mark_for: HashSet<String>,
    mark_calls: Vec<(BuildFilter, bool)>,
}

/// In-memory build gateway with injectable per-item failures
#[derive(Default)]
pub struct InMemoryBuildGateway {
    state: Mutex<BuildLedger>,
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

impl InMemoryBuildGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a build created `hours_ago` hours before [`base_time`]
    pub fn seed(&self, id: &str, prebuild_id: &str, state: BuildState, hours_ago: i64, sha: &str) {
        let created_at = base_time() - Duration::hours(hours_ago);
        self.state.lock().unwrap().builds.push(Build {
            id: id.into(),
            prebuild_id: prebuild_id.into(),
            repository: GitRepository {
                url: REPO_URL.into(),
                owner: "daytonaio".into(),
                name: "daytona".into(),
                branch: "main".into(),
                sha: sha.into(),
            },
            state,
            image: "daytonaio/workspace:latest".into(),
            user: "daytona".into(),
            created_at,
            updated_at: created_at,
        });
    }

    pub fn fail_create_for(&self, prebuild_id: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_create_for
            .insert(prebuild_id.into());
    }

    pub fn fail_mark_for(&self, build_id: &str) {
        self.state.lock().unwrap().fail_mark_for.insert(build_id.into());
    }

    pub fn created(&self) -> Vec<BuildCreationData> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn mark_calls(&self) -> Vec<(BuildFilter, bool)> {
        self.state.lock().unwrap().mark_calls.clone()
    }

    pub fn state_of(&self, id: &str) -> Option<BuildState> {
        self.state
            .lock()
            .unwrap()
            .builds
            .iter()
            .find(|b| b.id == id)
            .map(|b| b.state)
    }

    fn matching(builds: &[Build], filter: &BuildFilter) -> Vec<Build> {
        let mut found: Vec<Build> = builds.iter().filter(|b| filter.matches(b)).cloned().collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        found
    }
}

#[async_trait]
impl BuildGateway for InMemoryBuildGateway {
    async fn create(&self, data: BuildCreationData) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create_for.contains(&data.prebuild_id) {
            return Err(PrebuildError::Database("build table is locked".into()));
        }
        let id = format!("build-{}", state.builds.len() + 1);
        let created_at = base_time() + Duration::minutes(state.builds.len() as i64 + 1);
        state.builds.push(Build {
            id: id.clone(),
            prebuild_id: data.prebuild_id.clone(),
            repository: data.repository.clone(),
            state: BuildState::Pending,
            image: data.image.clone(),
            user: data.user.clone(),
            created_at,
            updated_at: created_at,
        });
        state.created.push(data);
        Ok(id)
    }

    async fn find(&self, filter: &BuildFilter) -> Result<Option<Build>> {
        let state = self.state.lock().unwrap();
        let found = Self::matching(&state.builds, filter);
        Ok(if filter.wants_newest() {
            found.last().cloned()
        } else {
            found.first().cloned()
        })
    }

    async fn list(&self, filter: &BuildFilter) -> Result<Vec<Build>> {
        let state = self.state.lock().unwrap();
        Ok(Self::matching(&state.builds, filter))
    }

    async fn mark_for_deletion(&self, filter: &BuildFilter, force: bool) -> Vec<ItemFailure> {
        let mut state = self.state.lock().unwrap();
        state.mark_calls.push((filter.clone(), force));

        let targets: Vec<String> = Self::matching(&state.builds, filter)
            .into_iter()
            .filter(|b| !matches!(b.state, BuildState::Deleting | BuildState::Deleted))
            .map(|b| b.id)
            .collect();

        let mut failures = Vec::new();
        for id in targets {
            if state.fail_mark_for.contains(&id) {
                failures.push(ItemFailure::new(
                    id.clone(),
                    PrebuildError::Database("row is locked".into()),
                ));
                continue;
            }
            if let Some(build) = state.builds.iter_mut().find(|b| b.id == id) {
                build.state = BuildState::Deleting;
            }
        }
        failures
    }
}

/// Fresh store plus gateway doubles for one scenario
pub struct Harness {
    pub store: Arc<SqlPrebuildStore>,
    pub git: Arc<FakeGitProvider>,
    pub builds: Arc<InMemoryBuildGateway>,
}

impl Harness {
    pub async fn new() -> Self {
        let pool = init_memory_db().await.expect("in-memory database");
        Self {
            store: Arc::new(SqlPrebuildStore::new(pool)),
            git: Arc::new(FakeGitProvider::new()),
            builds: Arc::new(InMemoryBuildGateway::new()),
        }
    }

    pub async fn add_template(&self, name: &str, url: &str) -> WorkspaceTemplate {
        let template = WorkspaceTemplate {
            name: name.into(),
            repository_url: url.into(),
            image: "daytonaio/workspace:latest".into(),
            user: "daytona".into(),
            build_config: None,
        };
        self.store.save_template(&template).await.expect("save template");
        template
    }

    pub async fn add_prebuild(
        &self,
        template: &str,
        id: &str,
        branch: &str,
        commit_interval: Option<u32>,
        retention: u32,
        trigger_files: &[&str],
    ) -> PrebuildConfig {
        let repository_url = self
            .store
            .find_templates(&WorkspaceTemplateFilter::by_name(template))
            .await
            .expect("find template")
            .into_iter()
            .next()
            .map(|t| t.repository_url)
            .unwrap_or_default();
        let prebuild = PrebuildConfig {
            id: id.into(),
            workspace_template_name: template.into(),
            branch: branch.into(),
            commit_interval,
            retention,
            trigger_files: trigger_files.iter().map(|f| f.to_string()).collect(),
            repository_url,
            webhook_id: Some("webhook-seeded".into()),
        };
        self.store.save_prebuild(&prebuild).await.expect("save prebuild");
        prebuild
    }
}
