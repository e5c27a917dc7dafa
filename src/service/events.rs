use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::build::{BuildCreationData, BuildFilter, BuildGateway};
use crate::cancel::guarded;
use crate::db::PrebuildStore;
use crate::error::{ItemFailure, PrebuildError, Result, collect_failures};
use crate::gitprovider::{GitProviderGateway, GitRepository, Provider};
use crate::prebuild::PrebuildConfig;
use crate::template::{WorkspaceTemplate, WorkspaceTemplateFilter};
use crate::webhook::GitEventData;

/// Why a matched prebuild did or did not trigger a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    FileMatch,
    /// No earlier build exists for the prebuild
    Bootstrap,
    CommitInterval { distance: u32 },
    Skip,
}

impl TriggerDecision {
    pub fn triggers(self) -> bool {
        !matches!(self, TriggerDecision::Skip)
    }
}

impl fmt::Display for TriggerDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerDecision::FileMatch => f.write_str("trigger file changed"),
            TriggerDecision::Bootstrap => f.write_str("no previous build"),
            TriggerDecision::CommitInterval { distance } => {
                write!(f, "{} commit(s) since last build", distance)
            }
            TriggerDecision::Skip => f.write_str("no rule satisfied"),
        }
    }
}

/// Turns inbound push events into prebuild builds
pub struct GitEventProcessor {
    store: Arc<dyn PrebuildStore>,
    git: Arc<dyn GitProviderGateway>,
    builds: Arc<dyn BuildGateway>,
    gateway_timeout: Duration,
}

impl GitEventProcessor {
    pub fn new(
        store: Arc<dyn PrebuildStore>,
        git: Arc<dyn GitProviderGateway>,
        builds: Arc<dyn BuildGateway>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            store,
            git,
            builds,
            gateway_timeout,
        }
    }

    pub async fn process_git_event(
        &self,
        event: &GitEventData,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let (provider, context) = self.resolve(&event.url, cancel).await?;

        let matched = self.matching_configs(event).await?;
        if matched.is_empty() {
            debug!(repository = %event.url, branch = %event.branch, "No prebuilds match event");
            return Ok(());
        }
        info!(
            repository = %event.url,
            branch = %event.branch,
            sha = %event.sha,
            prebuilds = matched.len(),
            "Evaluating prebuilds for git event"
        );

        let mut failures = Vec::new();
        for (template, prebuild) in &matched {
            // Each config gets its own token. A parent cancellation that lands while
            // this config is in flight aborts only this config.
            let item_cancel = CancellationToken::new();
            let watch_parent = !cancel.is_cancelled();
            let work = self.evaluate_and_create(
                &provider,
                &context,
                event,
                template,
                prebuild,
                &item_cancel,
            );
            tokio::pin!(work);
            let outcome = tokio::select! {
                res = &mut work => res,
                _ = cancel.cancelled(), if watch_parent => {
                    item_cancel.cancel();
                    work.await
                }
            };
            if let Err(e) = outcome {
                warn!(prebuild_id = %prebuild.id, "Prebuild trigger failed: {}", e);
                failures.push(ItemFailure::new(prebuild.id.clone(), e));
            }
        }

        collect_failures("prebuild trigger", failures)
    }

    async fn resolve(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(Provider, GitRepository)> {
        let resolved = async {
            let provider = guarded(
                cancel,
                self.gateway_timeout,
                "provider resolution",
                self.git.resolve_provider(url),
            )
            .await?;
            let context = guarded(
                cancel,
                self.gateway_timeout,
                "repository lookup",
                self.git.get_repository_context(&provider, url),
            )
            .await?;
            Ok::<_, PrebuildError>((provider, context))
        }
        .await;

        resolved.map_err(|e| match e {
            PrebuildError::Cancelled(_) | PrebuildError::ProviderResolution { .. } => e,
            other => PrebuildError::provider_resolution(url, other),
        })
    }

    /// Configs on the event's repository and branch, in (id, template) order
    async fn matching_configs(
        &self,
        event: &GitEventData,
    ) -> Result<Vec<(WorkspaceTemplate, PrebuildConfig)>> {
        let mut matched = Vec::new();
        for template in self
            .store
            .find_templates(&WorkspaceTemplateFilter::by_url(&event.url))
            .await?
        {
            for prebuild in self.store.list_prebuilds(Some(&template.name)).await? {
                if prebuild.branch == event.branch {
                    matched.push((template.clone(), prebuild));
                }
            }
        }
        matched.sort_by(|(ta, a), (tb, b)| a.id.cmp(&b.id).then_with(|| ta.name.cmp(&tb.name)));
        Ok(matched)
    }

    async fn evaluate_and_create(
        &self,
        provider: &Provider,
        context: &GitRepository,
        event: &GitEventData,
        template: &WorkspaceTemplate,
        prebuild: &PrebuildConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let decision = self.evaluate(provider, context, event, prebuild, cancel).await?;
        if !decision.triggers() {
            debug!(prebuild_id = %prebuild.id, %decision, "Prebuild not triggered");
            return Ok(());
        }

        let data = BuildCreationData {
            prebuild_id: prebuild.id.clone(),
            repository: GitRepository {
                url: event.url.clone(),
                branch: event.branch.clone(),
                sha: event.sha.clone(),
                ..context.clone()
            },
            user: template.user.clone(),
            image: template.image.clone(),
        };
        let build_id = guarded(
            cancel,
            self.gateway_timeout,
            "build creation",
            self.builds.create(data),
        )
        .await?;

        info!(
            prebuild_id = %prebuild.id,
            template = %template.name,
            build_id = %build_id,
            %decision,
            "Triggered prebuild"
        );
        Ok(())
    }

    async fn evaluate(
        &self,
        provider: &Provider,
        context: &GitRepository,
        event: &GitEventData,
        prebuild: &PrebuildConfig,
        cancel: &CancellationToken,
    ) -> Result<TriggerDecision> {
        if prebuild.matches_trigger_files(&event.affected_files) {
            return Ok(TriggerDecision::FileMatch);
        }

        let Some(interval) = prebuild.commit_interval else {
            return Ok(TriggerDecision::Skip);
        };

        let newest = guarded(
            cancel,
            self.gateway_timeout,
            "previous build lookup",
            self.builds
                .find(&BuildFilter::newest_for_prebuild(prebuild.id.clone())),
        )
        .await?;
        let Some(previous) = newest else {
            return Ok(TriggerDecision::Bootstrap);
        };

        let distance = guarded(
            cancel,
            self.gateway_timeout,
            "commit range lookup",
            self.git.get_commits_range(
                provider,
                context,
                &previous.repository.sha,
                &event.sha,
            ),
        )
        .await?;

        Ok(if distance >= interval {
            TriggerDecision::CommitInterval { distance }
        } else {
            TriggerDecision::Skip
        })
    }
}
