use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use hearth_model::{AppEntry, ItemInfo, ProfileHandle, ScreenId};

/// One installable widget provider, as published to consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WidgetProviderInfo {
    pub provider: String,
    pub profile: ProfileHandle,
    pub label: String,
    pub span_x: i32,
    pub span_y: i32,
}

/// Capability set implemented by the view layer. Every method defaults to a
/// no-op so consumers implement only what they render. All payloads are
/// value snapshots; dispatches are already epoch-filtered by the publisher.
///
/// Within one load the dispatch order is fixed: screens, items and the
/// string cache first, then all-apps, then widgets, then the completion
/// signal. Later phases' UI assumes earlier ones already rendered.
pub trait ShellCallbacks: Send + Sync {
    fn bind_screens(&self, _screens: &[ScreenId]) {}

    /// Freshly loaded or newly added items.
    fn bind_items(&self, _items: &[ItemInfo], _force_animate: bool) {}

    /// Items whose persisted attributes changed (title, placement).
    fn bind_items_modified(&self, _items: &[ItemInfo]) {}

    /// Items whose runtime state changed (flags, progress).
    fn bind_items_updated(&self, _items: &[ItemInfo]) {}

    /// Workspace items pointing at the given packages were removed.
    fn bind_workspace_components_removed(&self, _packages: &[String], _profile: ProfileHandle) {}

    fn bind_all_applications(&self, _apps: &[AppEntry], _flags: u32) {}

    fn bind_all_widgets(&self, _widgets: &[WidgetProviderInfo]) {}

    fn bind_incremental_download_progress(&self, _app: &AppEntry) {}

    fn bind_string_cache(&self, _cache: &HashMap<String, String>) {}

    fn on_initial_bind_complete(&self, _bound_screens: &[ScreenId]) {}
}
