use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PrebuildError, Result};

/// A trigger policy bound to one workspace template and one branch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrebuildConfig {
    pub id: String,
    pub workspace_template_name: String,
    pub branch: String,
    /// `None` disables the commit-count rule; `Some(0)` fires on every push
    pub commit_interval: Option<u32>,
    pub retention: u32,
    pub trigger_files: Vec<String>,
    /// Repository the webhook was registered on
    #[serde(default)]
    pub repository_url: String,
    pub webhook_id: Option<String>,
}

impl PrebuildConfig {
    /// Create a config with a freshly generated id
    pub fn new(workspace_template_name: String, repository_url: String, spec: ValidatedSpec) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            workspace_template_name,
            branch: spec.branch,
            commit_interval: spec.commit_interval,
            retention: spec.retention,
            trigger_files: spec.trigger_files,
            repository_url,
            webhook_id: None,
        }
    }

    /// Overwrite the policy fields, keeping id and webhook handle
    pub fn apply(&mut self, spec: ValidatedSpec) {
        self.branch = spec.branch;
        self.commit_interval = spec.commit_interval;
        self.retention = spec.retention;
        self.trigger_files = spec.trigger_files;
    }

    /// True when any configured trigger file was touched by the push
    pub fn matches_trigger_files(&self, affected_files: &[String]) -> bool {
        !self.trigger_files.is_empty()
            && self
                .trigger_files
                .iter()
                .any(|f| affected_files.iter().any(|a| a == f))
    }

    pub fn to_dto(&self) -> PrebuildDTO {
        PrebuildDTO {
            workspace_template_name: self.workspace_template_name.clone(),
            id: self.id.clone(),
            branch: self.branch.clone(),
            commit_interval: self.commit_interval,
            retention: self.retention,
            trigger_files: self.trigger_files.clone(),
        }
    }
}

/// Request body for creating or updating a prebuild
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreatePrebuildSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub branch: String,
    #[serde(default)]
    pub commit_interval: Option<i64>,
    pub retention: i64,
    #[serde(default)]
    pub trigger_files: Vec<String>,
}

/// A spec whose numeric fields have been range checked
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSpec {
    pub branch: String,
    pub commit_interval: Option<u32>,
    pub retention: u32,
    pub trigger_files: Vec<String>,
}

impl CreatePrebuildSpec {
    pub fn validate(&self) -> Result<ValidatedSpec> {
        let branch = self.branch.trim();
        if branch.is_empty() {
            return Err(PrebuildError::Validation("branch must not be empty".into()));
        }

        let retention = u32::try_from(self.retention).map_err(|_| {
            PrebuildError::Validation(format!(
                "retention must be a non-negative integer, got {}",
                self.retention
            ))
        })?;

        let commit_interval = self
            .commit_interval
            .map(|interval| {
                u32::try_from(interval).map_err(|_| {
                    PrebuildError::Validation(format!(
                        "commit interval must be a non-negative integer, got {}",
                        interval
                    ))
                })
            })
            .transpose()?;

        let mut trigger_files: Vec<String> = Vec::with_capacity(self.trigger_files.len());
        for file in &self.trigger_files {
            let file = file.trim();
            if file.is_empty() {
                return Err(PrebuildError::Validation(
                    "trigger files must not contain empty paths".into(),
                ));
            }
            if !trigger_files.iter().any(|f| f == file) {
                trigger_files.push(file.to_string());
            }
        }

        Ok(ValidatedSpec {
            branch: branch.to_string(),
            commit_interval,
            retention,
            trigger_files,
        })
    }
}

/// Public projection of a prebuild config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrebuildDTO {
    pub workspace_template_name: String,
    pub id: String,
    pub branch: String,
    pub commit_interval: Option<u32>,
    pub retention: u32,
    pub trigger_files: Vec<String>,
}

/// Selects prebuilds within a template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrebuildFilter {
    pub id: Option<String>,
    pub branch: Option<String>,
}

impl PrebuildFilter {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, prebuild: &PrebuildConfig) -> bool {
        self.id.as_ref().is_none_or(|id| *id == prebuild.id)
            && self.branch.as_ref().is_none_or(|b| *b == prebuild.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(retention: i64, commit_interval: Option<i64>) -> CreatePrebuildSpec {
        CreatePrebuildSpec {
            id: None,
            branch: "main".into(),
            commit_interval,
            retention,
            trigger_files: vec!["Dockerfile".into()],
        }
    }

    #[test]
    fn negative_retention_is_rejected() {
        let err = spec(-1, Some(3)).validate().unwrap_err();
        assert!(matches!(err, PrebuildError::Validation(_)));
    }

    #[test]
    fn negative_commit_interval_is_rejected() {
        let err = spec(3, Some(-2)).validate().unwrap_err();
        assert!(matches!(err, PrebuildError::Validation(_)));
    }

    #[test]
    fn commit_interval_keeps_absent_and_zero_apart() {
        assert_eq!(spec(1, None).validate().unwrap().commit_interval, None);
        assert_eq!(spec(1, Some(0)).validate().unwrap().commit_interval, Some(0));
        assert_eq!(spec(1, Some(5)).validate().unwrap().commit_interval, Some(5));
    }

    #[test]
    fn trigger_files_are_deduplicated_in_order() {
        let mut s = spec(2, None);
        s.trigger_files = vec!["b".into(), "a".into(), "b".into(), " a ".into()];
        assert_eq!(s.validate().unwrap().trigger_files, vec!["b", "a"]);

        s.trigger_files = vec!["ok".into(), "  ".into()];
        assert!(s.validate().is_err());
    }

    #[test]
    fn blank_branch_is_rejected() {
        let mut s = spec(2, None);
        s.branch = "   ".into();
        assert!(matches!(
            s.validate().unwrap_err(),
            PrebuildError::Validation(_)
        ));
    }

    #[test]
    fn trigger_file_match_requires_intersection() {
        let config = PrebuildConfig::new(
            "api".into(),
            "https://github.com/acme/api".into(),
            ValidatedSpec {
                branch: "main".into(),
                commit_interval: None,
                retention: 1,
                trigger_files: vec!["file1".into(), "file2".into()],
            },
        );

        assert!(config.matches_trigger_files(&["src/lib.rs".into(), "file1".into()]));
        assert!(!config.matches_trigger_files(&["src/lib.rs".into()]));
        assert!(!config.matches_trigger_files(&[]));
    }
}
