use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::build::{BuildFilter, BuildGateway, BuildState};
use crate::cancel::guarded;
use crate::db::PrebuildStore;
use crate::error::{PrebuildError, Result, collect_failures};
use crate::gitprovider::GitProviderGateway;
use crate::prebuild::{CreatePrebuildSpec, PrebuildConfig, PrebuildDTO, PrebuildFilter};
use crate::template::{WorkspaceTemplate, WorkspaceTemplateFilter};

/// Owns the lifecycle of prebuild configs and the webhooks they rely on
pub struct PrebuildConfigManager {
    store: Arc<dyn PrebuildStore>,
    git: Arc<dyn GitProviderGateway>,
    builds: Arc<dyn BuildGateway>,
    gateway_timeout: Duration,
}

impl PrebuildConfigManager {
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

    async fn template(&self, name: &str) -> Result<WorkspaceTemplate> {
        self.store
            .find_templates(&WorkspaceTemplateFilter::by_name(name))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PrebuildError::NotFound(format!("workspace template '{}'", name)))
    }

    /// Every config, across templates, whose webhook lives on `url`
    async fn configs_on_repository(&self, url: &str) -> Result<Vec<PrebuildConfig>> {
        Ok(self
            .store
            .list_prebuilds(None)
            .await?
            .into_iter()
            .filter(|p| p.repository_url == url)
            .collect())
    }

    /// Create or update a prebuild on a template, registering a webhook if the repository has none
    pub async fn set(
        &self,
        template_name: &str,
        spec: CreatePrebuildSpec,
        cancel: &CancellationToken,
    ) -> Result<PrebuildDTO> {
        let validated = spec.validate()?;
        let template = self.template(template_name).await?;
        let siblings = self.store.list_prebuilds(Some(template_name)).await?;

        let existing = spec
            .id
            .as_ref()
            .and_then(|id| siblings.iter().find(|p| p.id == *id))
            .cloned();

        if let Some(taken) = siblings.iter().find(|p| {
            p.branch == validated.branch && existing.as_ref().is_none_or(|e| e.id != p.id)
        }) {
            return Err(PrebuildError::Conflict(format!(
                "prebuild '{}' already covers branch '{}' on template '{}'",
                taken.id, taken.branch, template_name
            )));
        }

        let mut prebuild = match existing {
            Some(mut prebuild) => {
                debug!(prebuild_id = %prebuild.id, "Updating existing prebuild");
                prebuild.apply(validated);
                prebuild
            }
            None => PrebuildConfig::new(
                template_name.to_string(),
                template.repository_url.clone(),
                validated,
            ),
        };

        let url = &template.repository_url;
        let provider = guarded(
            cancel,
            self.gateway_timeout,
            "provider resolution",
            self.git.resolve_provider(url),
        )
        .await?;
        let repository = guarded(
            cancel,
            self.gateway_timeout,
            "repository lookup",
            self.git.get_repository_context(&provider, url),
        )
        .await?;

        // The template moved to another repository; the old webhook is released after the save
        let moved_from = (prebuild.repository_url != *url).then(|| {
            let old_url = std::mem::replace(&mut prebuild.repository_url, url.clone());
            (old_url, prebuild.webhook_id.take())
        });

        if prebuild.webhook_id.is_none() {
            let shared = self
                .configs_on_repository(url)
                .await?
                .into_iter()
                .find_map(|p| p.webhook_id);

            prebuild.webhook_id = match shared {
                Some(id) => Some(id),
                None => Some(
                    guarded(
                        cancel,
                        self.gateway_timeout,
                        "webhook registration",
                        self.git.register_webhook(&provider, &repository),
                    )
                    .await?,
                ),
            };
        }

        self.store.save_prebuild(&prebuild).await?;
        info!(
            template = %template_name,
            prebuild_id = %prebuild.id,
            branch = %prebuild.branch,
            "Saved prebuild"
        );

        if let Some((old_url, Some(old_hook))) = moved_from {
            info!(
                prebuild_id = %prebuild.id,
                from = %old_url,
                to = %url,
                "Prebuild repository changed"
            );
            self.release_webhook(&old_url, &old_hook, cancel).await;
        }
        Ok(prebuild.to_dto())
    }

    /// Find exactly one prebuild; the template filter must select a single template
    pub async fn find(
        &self,
        template_filter: &WorkspaceTemplateFilter,
        prebuild_filter: &PrebuildFilter,
    ) -> Result<PrebuildDTO> {
        let templates = self.store.find_templates(template_filter).await?;
        let template = match templates.as_slice() {
            [template] => template,
            [] => {
                return Err(PrebuildError::NotFound(
                    "no workspace template matches the filter".into(),
                ));
            }
            _ => {
                return Err(PrebuildError::NotFound(format!(
                    "{} workspace templates match the filter, expected one",
                    templates.len()
                )));
            }
        };

        self.store
            .list_prebuilds(Some(&template.name))
            .await?
            .into_iter()
            .find(|p| prebuild_filter.matches(p))
            .map(|p| p.to_dto())
            .ok_or_else(|| {
                PrebuildError::NotFound(format!("prebuild on template '{}'", template.name))
            })
    }

    pub async fn list(
        &self,
        template_filter: &WorkspaceTemplateFilter,
        prebuild_filter: &PrebuildFilter,
    ) -> Result<Vec<PrebuildDTO>> {
        let mut dtos = Vec::new();
        for template in self.store.find_templates(template_filter).await? {
            dtos.extend(
                self.store
                    .list_prebuilds(Some(&template.name))
                    .await?
                    .iter()
                    .filter(|p| prebuild_filter.matches(p))
                    .map(PrebuildConfig::to_dto),
            );
        }
        Ok(dtos)
    }

    /// Remove a prebuild; without `force`, live builds block the delete
    pub async fn delete(
        &self,
        template_name: &str,
        id: &str,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.template(template_name).await?;
        let prebuild = self
            .store
            .find_prebuild(template_name, id)
            .await?
            .ok_or_else(|| {
                PrebuildError::NotFound(format!("prebuild '{}' on template '{}'", id, template_name))
            })?;

        if !force {
            let live = guarded(
                cancel,
                self.gateway_timeout,
                "live build lookup",
                self.builds
                    .list(&BuildFilter::by_prebuild(id).with_states(&BuildState::LIVE)),
            )
            .await?;
            if !live.is_empty() {
                return Err(PrebuildError::Conflict(format!(
                    "prebuild '{}' still has {} pending or running build(s)",
                    id,
                    live.len()
                )));
            }
        }

        let marked = guarded(cancel, self.gateway_timeout, "build retirement", async {
            Ok::<_, PrebuildError>(
                self.builds
                    .mark_for_deletion(&BuildFilter::by_prebuild(id), force)
                    .await,
            )
        })
        .await;
        match marked {
            Ok(failures) if failures.is_empty() => {}
            Ok(failures) if !force => {
                return collect_failures("marking prebuild builds for deletion", failures);
            }
            Ok(failures) => {
                for failure in failures {
                    warn!(prebuild_id = %id, "Ignoring build retirement failure: {}", failure);
                }
            }
            Err(e) if !force => return Err(e),
            Err(e) => warn!(prebuild_id = %id, "Ignoring build retirement failure: {}", e),
        }

        if !self.store.delete_prebuild(template_name, id).await? {
            return Err(PrebuildError::NotFound(format!(
                "prebuild '{}' on template '{}'",
                id, template_name
            )));
        }
        info!(template = %template_name, prebuild_id = %id, force, "Deleted prebuild");

        if let Some(webhook_id) = &prebuild.webhook_id {
            self.release_webhook(&prebuild.repository_url, webhook_id, cancel)
                .await;
        }
        Ok(())
    }

    /// Deregister the repository webhook once no config uses the repository; failures are only logged
    async fn release_webhook(&self, url: &str, webhook_id: &str, cancel: &CancellationToken) {
        match self.configs_on_repository(url).await {
            Ok(remaining) if !remaining.is_empty() => {
                debug!(
                    repository = %url,
                    remaining = remaining.len(),
                    "Webhook still in use"
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(repository = %url, "Could not check for sibling prebuilds: {}", e);
                return;
            }
        }

        let result = async {
            let provider = guarded(
                cancel,
                self.gateway_timeout,
                "provider resolution",
                self.git.resolve_provider(url),
            )
            .await?;
            let repository = guarded(
                cancel,
                self.gateway_timeout,
                "repository lookup",
                self.git.get_repository_context(&provider, url),
            )
            .await?;
            guarded(
                cancel,
                self.gateway_timeout,
                "webhook removal",
                self.git.deregister_webhook(&provider, &repository, webhook_id),
            )
            .await
        }
        .await;

        match result {
            Ok(()) => info!(repository = %url, webhook_id, "Deregistered prebuild webhook"),
            Err(e) => error!(
                repository = %url,
                webhook_id,
                "Failed to deregister prebuild webhook: {}",
                e
            ),
        }
    }
}
