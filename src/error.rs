use std::fmt;
use std::io;

/// Custom error type for prebuild automation operations
#[derive(Debug, thiserror::Error)]
pub enum PrebuildError {
    #[error("Could not resolve a git provider for '{url}': {message}")]
    ProviderResolution { url: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("Git provider request failed: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl PrebuildError {
    pub fn provider_resolution(url: impl Into<String>, message: impl fmt::Display) -> Self {
        PrebuildError::ProviderResolution {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

/// One failed item of a batch operation
#[derive(Debug)]
pub struct ItemFailure {
    pub item_id: String,
    pub cause: Box<PrebuildError>,
}

impl ItemFailure {
    pub fn new(item_id: impl Into<String>, cause: PrebuildError) -> Self {
        Self {
            item_id: item_id.into(),
            cause: Box::new(cause),
        }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item_id, self.cause)
    }
}

/// Failures collected from a batch where every item was attempted
#[derive(Debug)]
pub struct AggregateError {
    pub operation: String,
    pub failures: Vec<ItemFailure>,
}

impl AggregateError {
    pub fn new(operation: impl Into<String>, failures: Vec<ItemFailure>) -> Self {
        Self {
            operation: operation.into(),
            failures,
        }
    }

    /// Ids of the items that failed, in the order they were attempted
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.item_id.as_str()).collect()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed for {} item(s)",
            self.operation,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Turns a list of collected failures into `Ok(())` or an aggregate error
pub fn collect_failures(operation: &str, failures: Vec<ItemFailure>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(AggregateError::new(operation, failures).into())
    }
}

/// Helper type for Results that use PrebuildError
pub type Result<T> = std::result::Result<T, PrebuildError>;
