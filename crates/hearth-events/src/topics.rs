//! Canonical telemetry topic constants.
//!
//! Centralized so producers and listeners stay in sync. Keep this list
//! alphabetized within sections and favor dot.case names.

// Layout load pipeline
pub const TOPIC_LOAD_CANCELLED: &str = "layout.load.cancelled";
pub const TOPIC_LOAD_COMMITTED: &str = "layout.load.committed";
pub const TOPIC_ROW_DROPPED: &str = "layout.row.dropped";

// Persisted store
pub const TOPIC_MIGRATION_FAILED: &str = "layout.migration.failed";
pub const TOPIC_STORE_RESET: &str = "layout.store.reset";

// Incremental model maintenance
pub const TOPIC_APPS_CHANGED: &str = "apps.inventory.changed";
pub const TOPIC_TASK_COMPLETED: &str = "model.task.completed";
