use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use hearth_model::{ComponentKey, ProfileHandle};

pub use hearth_events::callbacks::WidgetProviderInfo;

/// One OS profile visible to the shell. The serial number is what layout
/// rows persist; the handle is the live identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub serial: i64,
    pub handle: ProfileHandle,
    pub quiet: bool,
    pub label: String,
}

/// One launchable activity as reported by the OS.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfo {
    pub component: ComponentKey,
    pub profile: ProfileHandle,
    pub title: String,
    pub suspended: bool,
    pub archived: bool,
}

/// One pinned deep shortcut.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShortcutInfo {
    pub package: String,
    pub shortcut_id: String,
    pub profile: ProfileHandle,
    pub title: String,
    /// Web fallback URI, when the shortcut has one.
    pub url: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum InventoryError {
    /// The profile is (still) locked; callers keep rows and retry later.
    #[error("profile {0:?} is locked")]
    ProfileLocked(ProfileHandle),
    #[error("inventory unavailable: {0}")]
    Unavailable(String),
}

/// Live OS inventory collaborator. Consumed, never produced: the host
/// environment owns the ground truth and mutates it without notice.
///
/// All methods are blocking and are only ever called from the serialized
/// background worker, never while a model lock is held.
pub trait OsInventory: Send + Sync {
    fn profiles(&self) -> Vec<ProfileInfo>;

    fn list_activities(&self, profile: ProfileHandle) -> Vec<ActivityInfo>;

    fn resolve_activity(
        &self,
        component: &ComponentKey,
        profile: ProfileHandle,
    ) -> Option<ActivityInfo>;

    /// Pinned shortcuts for a profile. `Err(ProfileLocked)` means the
    /// profile is transiently unavailable and nothing may be dropped.
    fn query_pinned_shortcuts(
        &self,
        profile: ProfileHandle,
    ) -> Result<Vec<ShortcutInfo>, InventoryError>;

    fn is_package_enabled(&self, package: &str, profile: ProfileHandle) -> bool;

    fn list_widget_providers(&self, profile: ProfileHandle) -> Vec<WidgetProviderInfo>;

    /// Packages currently being installed, mapped to progress percent.
    fn active_install_sessions(&self) -> HashMap<String, u8>;

    /// Optional display-name suggestion for a folder holding the given
    /// packages.
    fn suggest_folder_name(&self, _packages: &[String]) -> Option<String> {
        None
    }
}
