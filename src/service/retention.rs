use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::build::{Build, BuildFilter, BuildGateway, BuildState};
use crate::cancel::guarded;
use crate::db::PrebuildStore;
use crate::error::{ItemFailure, PrebuildError, Result, collect_failures};

/// Retires published prebuild builds beyond each config's retention
pub struct RetentionEnforcer {
    store: Arc<dyn PrebuildStore>,
    builds: Arc<dyn BuildGateway>,
    gateway_timeout: Duration,
}

/// The oldest builds of a group that exceed `retention`; `group` must be sorted oldest first
fn surplus(group: &[Build], retention: u32) -> &[Build] {
    let excess = group.len().saturating_sub(retention as usize);
    &group[..excess]
}

impl RetentionEnforcer {
    pub fn new(
        store: Arc<dyn PrebuildStore>,
        builds: Arc<dyn BuildGateway>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            store,
            builds,
            gateway_timeout,
        }
    }

    pub async fn enforce_retention_policy(
        &self,
        filter: Option<BuildFilter>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let filter = BuildFilter {
            states: Some(vec![BuildState::Published]),
            get_newest: None,
            ..filter.unwrap_or_default()
        };
        let published = guarded(
            cancel,
            self.gateway_timeout,
            "published build lookup",
            self.builds.list(&filter),
        )
        .await?;

        let mut groups: BTreeMap<String, Vec<Build>> = BTreeMap::new();
        for build in published {
            if build.prebuild_id.is_empty() {
                continue;
            }
            groups.entry(build.prebuild_id.clone()).or_default().push(build);
        }
        if groups.is_empty() {
            debug!("No published prebuild builds to check");
            return Ok(());
        }

        let retention: HashMap<String, u32> = self
            .store
            .list_prebuilds(None)
            .await?
            .into_iter()
            .map(|p| (p.id, p.retention))
            .collect();

        let mut failures = Vec::new();
        for (prebuild_id, mut group) in groups {
            let Some(&keep) = retention.get(&prebuild_id) else {
                warn!(prebuild_id = %prebuild_id, builds = group.len(), "Builds reference a missing prebuild, skipping");
                continue;
            };
            group.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

            let retired = surplus(&group, keep);
            if retired.is_empty() {
                continue;
            }
            info!(
                prebuild_id = %prebuild_id,
                published = group.len(),
                retention = keep,
                retiring = retired.len(),
                "Enforcing prebuild retention"
            );

            for build in retired {
                let marked = guarded(cancel, self.gateway_timeout, "build retirement", async {
                    Ok::<_, PrebuildError>(
                        self.builds
                            .mark_for_deletion(&BuildFilter::by_id(build.id.clone()), false)
                            .await,
                    )
                })
                .await;
                match marked {
                    Ok(item_failures) => failures.extend(item_failures),
                    Err(e) => failures.push(ItemFailure::new(build.id.clone(), e)),
                }
            }
        }

        collect_failures("retention enforcement", failures)
    }
}
