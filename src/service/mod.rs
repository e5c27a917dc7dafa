pub mod events;
pub mod manager;
pub mod retention;

pub use events::{GitEventProcessor, TriggerDecision};
pub use manager::PrebuildConfigManager;
pub use retention::RetentionEnforcer;
