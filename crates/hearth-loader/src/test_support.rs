//! In-memory fakes for exercising the loader pipeline without an OS.
//!
//! Compiled unconditionally so integration tests and embedders' harnesses
//! can drive the pipeline against scripted inventory state.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hearth_events::callbacks::{ShellCallbacks, WidgetProviderInfo};
use hearth_events::Bus;
use hearth_model::{
    AppEntry, AppsList, CanonicalModel, ComponentKey, GridSpec, ItemInfo, ProfileHandle, ScreenId,
};
use hearth_store::LayoutStore;

use crate::binder::Binder;
use crate::inventory::{
    ActivityInfo, InventoryError, OsInventory, ProfileInfo, ShortcutInfo,
};
use crate::loader::IdleGate;
use crate::ShellContext;

#[derive(Default)]
struct FakeState {
    profiles: Vec<ProfileInfo>,
    activities: Vec<ActivityInfo>,
    shortcuts: Vec<ShortcutInfo>,
    widgets: Vec<WidgetProviderInfo>,
    sessions: HashMap<String, u8>,
    locked: HashSet<i64>,
    disabled: HashSet<String>,
    folder_suggestion: Option<String>,
}

/// Scripted [`OsInventory`]. Interior mutability lets a test reshape the
/// device state between loads through a shared reference.
#[derive(Default)]
pub struct FakeInventory {
    state: Mutex<FakeState>,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fake with one unlocked profile: serial 0, handle 0, label
    /// "Personal".
    pub fn with_default_profile() -> Self {
        let fake = Self::new();
        fake.add_profile(0, 0, "Personal");
        fake
    }

    pub fn add_profile(&self, serial: i64, handle: i64, label: &str) {
        self.state.lock().unwrap().profiles.push(ProfileInfo {
            serial,
            handle: ProfileHandle(handle),
            quiet: false,
            label: label.to_string(),
        });
    }

    pub fn set_quiet(&self, handle: i64, quiet: bool) {
        let mut state = self.state.lock().unwrap();
        for p in &mut state.profiles {
            if p.handle == ProfileHandle(handle) {
                p.quiet = quiet;
            }
        }
    }

    /// Register an activity under the default profile (handle 0).
    pub fn add_activity(&self, package: &str, class: &str, title: &str) {
        self.add_activity_for(0, package, class, title);
    }

    pub fn add_activity_for(&self, handle: i64, package: &str, class: &str, title: &str) {
        self.state.lock().unwrap().activities.push(ActivityInfo {
            component: ComponentKey::new(package, class),
            profile: ProfileHandle(handle),
            title: title.to_string(),
            suspended: false,
            archived: false,
        });
    }

    pub fn remove_package(&self, package: &str) {
        let mut state = self.state.lock().unwrap();
        state.activities.retain(|a| a.component.package != package);
        state.shortcuts.retain(|s| s.package != package);
        state.widgets.retain(|w| {
            w.provider.split('/').next() != Some(package)
        });
    }

    pub fn add_shortcut(&self, package: &str, shortcut_id: &str, title: &str, url: Option<&str>) {
        self.state.lock().unwrap().shortcuts.push(ShortcutInfo {
            package: package.to_string(),
            shortcut_id: shortcut_id.to_string(),
            profile: ProfileHandle(0),
            title: title.to_string(),
            url: url.map(|u| u.to_string()),
        });
    }

    pub fn add_widget_provider(&self, provider: &str, label: &str) {
        self.state.lock().unwrap().widgets.push(WidgetProviderInfo {
            provider: provider.to_string(),
            profile: ProfileHandle(0),
            label: label.to_string(),
            span_x: 2,
            span_y: 2,
        });
    }

    pub fn set_install_session(&self, package: &str, progress: u8) {
        self.state
            .lock()
            .unwrap()
            .sessions
            .insert(package.to_string(), progress);
    }

    pub fn clear_install_session(&self, package: &str) {
        self.state.lock().unwrap().sessions.remove(package);
    }

    /// Make `query_pinned_shortcuts` fail with `ProfileLocked` for a serial.
    pub fn lock_profile(&self, serial: i64) {
        self.state.lock().unwrap().locked.insert(serial);
    }

    pub fn disable_package(&self, package: &str) {
        self.state
            .lock()
            .unwrap()
            .disabled
            .insert(package.to_string());
    }

    pub fn set_folder_suggestion(&self, name: &str) {
        self.state.lock().unwrap().folder_suggestion = Some(name.to_string());
    }
}

impl OsInventory for FakeInventory {
    fn profiles(&self) -> Vec<ProfileInfo> {
        self.state.lock().unwrap().profiles.clone()
    }

    fn list_activities(&self, profile: ProfileHandle) -> Vec<ActivityInfo> {
        self.state
            .lock()
            .unwrap()
            .activities
            .iter()
            .filter(|a| a.profile == profile)
            .cloned()
            .collect()
    }

    fn resolve_activity(
        &self,
        component: &ComponentKey,
        profile: ProfileHandle,
    ) -> Option<ActivityInfo> {
        self.state
            .lock()
            .unwrap()
            .activities
            .iter()
            .find(|a| a.component == *component && a.profile == profile)
            .cloned()
    }

    fn query_pinned_shortcuts(
        &self,
        profile: ProfileHandle,
    ) -> Result<Vec<ShortcutInfo>, InventoryError> {
        let state = self.state.lock().unwrap();
        let locked = state
            .profiles
            .iter()
            .any(|p| p.handle == profile && state.locked.contains(&p.serial));
        if locked {
            return Err(InventoryError::ProfileLocked(profile));
        }
        Ok(state
            .shortcuts
            .iter()
            .filter(|s| s.profile == profile)
            .cloned()
            .collect())
    }

    fn is_package_enabled(&self, package: &str, profile: ProfileHandle) -> bool {
        let state = self.state.lock().unwrap();
        !state.disabled.contains(package)
            && state
                .activities
                .iter()
                .any(|a| a.component.package == package && a.profile == profile)
    }

    fn list_widget_providers(&self, profile: ProfileHandle) -> Vec<WidgetProviderInfo> {
        self.state
            .lock()
            .unwrap()
            .widgets
            .iter()
            .filter(|w| w.profile == profile)
            .cloned()
            .collect()
    }

    fn active_install_sessions(&self) -> HashMap<String, u8> {
        self.state.lock().unwrap().sessions.clone()
    }

    fn suggest_folder_name(&self, _packages: &[String]) -> Option<String> {
        self.state.lock().unwrap().folder_suggestion.clone()
    }
}

/// Records every dispatch it receives, in order.
#[derive(Default)]
pub struct RecordingCallbacks {
    pub order: Mutex<Vec<&'static str>>,
    pub screens: Mutex<Vec<ScreenId>>,
    pub items: Mutex<Vec<ItemInfo>>,
    pub modified: Mutex<Vec<ItemInfo>>,
    pub updated: Mutex<Vec<ItemInfo>>,
    pub removed_packages: Mutex<Vec<String>>,
    pub apps: Mutex<Vec<AppEntry>>,
    pub widgets: Mutex<Vec<WidgetProviderInfo>>,
    pub progress: Mutex<Vec<(String, u8)>>,
    pub string_cache: Mutex<HashMap<String, String>>,
    pub complete: AtomicBool,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, what: &'static str) {
        self.order.lock().unwrap().push(what);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn item_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.items.lock().unwrap().iter().map(|i| i.id).collect();
        ids.sort_unstable();
        ids
    }
}

impl ShellCallbacks for RecordingCallbacks {
    fn bind_screens(&self, screens: &[ScreenId]) {
        self.record("screens");
        *self.screens.lock().unwrap() = screens.to_vec();
    }

    fn bind_items(&self, items: &[ItemInfo], _force_animate: bool) {
        self.record("items");
        *self.items.lock().unwrap() = items.to_vec();
    }

    fn bind_items_modified(&self, items: &[ItemInfo]) {
        self.record("items-modified");
        self.modified.lock().unwrap().extend(items.iter().cloned());
    }

    fn bind_items_updated(&self, items: &[ItemInfo]) {
        self.record("items-updated");
        self.updated.lock().unwrap().extend(items.iter().cloned());
    }

    fn bind_workspace_components_removed(&self, packages: &[String], _profile: ProfileHandle) {
        self.record("components-removed");
        self.removed_packages
            .lock()
            .unwrap()
            .extend(packages.iter().cloned());
    }

    fn bind_all_applications(&self, apps: &[AppEntry], _flags: u32) {
        self.record("all-apps");
        *self.apps.lock().unwrap() = apps.to_vec();
    }

    fn bind_all_widgets(&self, widgets: &[WidgetProviderInfo]) {
        self.record("widgets");
        *self.widgets.lock().unwrap() = widgets.to_vec();
    }

    fn bind_incremental_download_progress(&self, app: &AppEntry) {
        self.record("progress");
        self.progress
            .lock()
            .unwrap()
            .push((app.component.package.clone(), app.progress));
    }

    fn bind_string_cache(&self, cache: &HashMap<String, String>) {
        self.record("string-cache");
        *self.string_cache.lock().unwrap() = cache.clone();
    }

    fn on_initial_bind_complete(&self, _bound_screens: &[ScreenId]) {
        self.record("complete");
        self.complete.store(true, Ordering::SeqCst);
    }
}

/// A [`ShellContext`] over a fresh store in `dir`, with no worker attached.
/// Unit tests drive tasks and loads on it directly.
pub fn context_with(
    dir: &Path,
    inventory: Arc<FakeInventory>,
) -> anyhow::Result<Arc<ShellContext>> {
    let store = LayoutStore::open(dir)?;
    let model = Arc::new(CanonicalModel::new());
    let binder = Arc::new(Binder::new(model.clone()));
    Ok(Arc::new(ShellContext {
        grid: GridSpec::default(),
        store,
        inventory,
        model,
        apps: Arc::new(AppsList::new()),
        binder,
        bus: Bus::default(),
        idle: Arc::new(IdleGate::default()),
    }))
}
