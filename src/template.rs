use serde::{Deserialize, Serialize};

/// A workspace template that prebuilds are attached to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceTemplate {
    pub name: String,
    pub repository_url: String,
    pub image: String,
    pub user: String,
    #[serde(default)]
    pub build_config: Option<String>,
}

/// Selects workspace templates; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceTemplateFilter {
    pub name: Option<String>,
    pub repository_url: Option<String>,
}

impl WorkspaceTemplateFilter {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_url(url: impl Into<String>) -> Self {
        Self {
            repository_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, template: &WorkspaceTemplate) -> bool {
        self.name.as_ref().is_none_or(|n| *n == template.name)
            && self
                .repository_url
                .as_ref()
                .is_none_or(|u| *u == template.repository_url)
    }
}
