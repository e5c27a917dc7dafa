use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ItemFailure, PrebuildError, Result};
use crate::gitprovider::GitRepository;

/// Lifecycle state of a build record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BuildState {
    Pending,
    Running,
    Published,
    Error,
    Deleting,
    Deleted,
}

impl BuildState {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildState::Pending => "pending",
            BuildState::Running => "running",
            BuildState::Published => "published",
            BuildState::Error => "error",
            BuildState::Deleting => "deleting",
            BuildState::Deleted => "deleted",
        }
    }

    /// Builds still doing work; these block a non-forced prebuild delete
    pub const LIVE: [BuildState; 2] = [BuildState::Pending, BuildState::Running];
}

impl std::str::FromStr for BuildState {
    type Err = PrebuildError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(BuildState::Pending),
            "running" => Ok(BuildState::Running),
            "published" => Ok(BuildState::Published),
            "error" => Ok(BuildState::Error),
            "deleting" => Ok(BuildState::Deleting),
            "deleted" => Ok(BuildState::Deleted),
            other => Err(PrebuildError::Validation(format!(
                "unknown build state '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A workspace image build; prebuild builds carry a back-reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Build {
    pub id: String,
    /// Empty for builds that were not triggered by a prebuild
    pub prebuild_id: String,
    pub repository: GitRepository,
    pub state: BuildState,
    pub image: String,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the event processor asks the build gateway to create
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildCreationData {
    pub prebuild_id: String,
    pub repository: GitRepository,
    pub user: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildFilter {
    pub id: Option<String>,
    pub prebuild_ids: Option<Vec<String>>,
    pub states: Option<Vec<BuildState>>,
    /// Return only the most recently created match
    pub get_newest: Option<bool>,
}

impl BuildFilter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn by_prebuild(prebuild_id: impl Into<String>) -> Self {
        Self {
            prebuild_ids: Some(vec![prebuild_id.into()]),
            ..Self::default()
        }
    }

    pub fn newest_for_prebuild(prebuild_id: impl Into<String>) -> Self {
        Self {
            get_newest: Some(true),
            ..Self::by_prebuild(prebuild_id)
        }
    }

    pub fn with_states(mut self, states: &[BuildState]) -> Self {
        self.states = Some(states.to_vec());
        self
    }

    pub fn wants_newest(&self) -> bool {
        self.get_newest.unwrap_or(false)
    }

    pub fn matches(&self, build: &Build) -> bool {
        self.id.as_ref().is_none_or(|id| *id == build.id)
            && self
                .prebuild_ids
                .as_ref()
                .is_none_or(|ids| ids.iter().any(|id| *id == build.prebuild_id))
            && self
                .states
                .as_ref()
                .is_none_or(|states| states.contains(&build.state))
    }
}

/// Storage-side build operations the services depend on
#[async_trait]
pub trait BuildGateway: Send + Sync {
    /// Create a pending build and return its id.
    async fn create(&self, data: BuildCreationData) -> Result<String>;

    async fn find(&self, filter: &BuildFilter) -> Result<Option<Build>>;

    async fn list(&self, filter: &BuildFilter) -> Result<Vec<Build>>;

    /// Mark every matching build for deletion; one failure per build that could not be marked.
    async fn mark_for_deletion(&self, filter: &BuildFilter, force: bool) -> Vec<ItemFailure>;
}
