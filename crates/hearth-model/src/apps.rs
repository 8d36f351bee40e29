use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::items::{ComponentKey, ProfileHandle};

/// Flags applying to the all-apps list as a whole.
pub mod list_flags {
    /// At least one profile is currently in quiet mode.
    pub const QUIET_MODE: u32 = 1 << 0;
    /// A work profile exists on the device.
    pub const HAS_WORK_PROFILE: u32 = 1 << 1;
}

/// One installed launchable activity for one profile. Entries are replaced
/// atomically; title, section and flags never mutate independently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppEntry {
    pub component: ComponentKey,
    pub profile: ProfileHandle,
    pub title: String,
    pub section: String,
    pub flags: u32,
    pub progress: u8,
}

impl AppEntry {
    pub fn new(component: ComponentKey, profile: ProfileHandle, title: impl Into<String>) -> Self {
        let title = title.into();
        let section = section_name(&title);
        Self {
            component,
            profile,
            title,
            section,
            flags: 0,
            progress: 100,
        }
    }

    fn key(&self) -> (&ComponentKey, ProfileHandle) {
        (&self.component, self.profile)
    }
}

/// Locale-aware fast-scroll bucket for a title: digits map to `#`, ASCII
/// letters to their uppercase letter, anything else to its first character.
pub fn section_name(title: &str) -> String {
    let first = title.trim().chars().next();
    match first {
        None => "#".to_string(),
        Some(c) if c.is_ascii_digit() => "#".to_string(),
        Some(c) if c.is_ascii_alphabetic() => c.to_ascii_uppercase().to_string(),
        Some(c) => c.to_uppercase().to_string(),
    }
}

#[derive(Default)]
struct AppsInner {
    /// Sorted by (component, profile) for binary search.
    entries: Vec<AppEntry>,
    list_flags: u32,
    changed: bool,
}

impl AppsInner {
    fn index_of(&self, component: &ComponentKey, profile: ProfileHandle) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.key().cmp(&(component, profile)))
    }
}

/// The all-apps inventory: every launchable activity, independent of
/// workspace placement. Guarded by its own lock with the same discipline as
/// the canonical model (never held across blocking calls).
#[derive(Default)]
pub struct AppsList {
    inner: Mutex<AppsInner>,
}

impl AppsList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry; a no-op if the (component, profile) key exists.
    pub fn add(&self, entry: AppEntry) {
        let mut inner = self.inner.lock().expect("apps lock");
        match inner.index_of(&entry.component, entry.profile) {
            Ok(_) => {}
            Err(pos) => {
                inner.entries.insert(pos, entry);
                inner.changed = true;
            }
        }
    }

    /// Replace the whole inventory in one step (used by the load pass).
    pub fn set_all(&self, mut entries: Vec<AppEntry>) {
        entries.sort_by(|a, b| a.key().cmp(&b.key()));
        entries.dedup_by(|a, b| a.key() == b.key());
        let mut inner = self.inner.lock().expect("apps lock");
        inner.entries = entries;
        inner.changed = true;
    }

    pub fn get(&self, component: &ComponentKey, profile: ProfileHandle) -> Option<AppEntry> {
        let inner = self.inner.lock().expect("apps lock");
        inner
            .index_of(component, profile)
            .ok()
            .map(|i| inner.entries[i].clone())
    }

    /// Remove every entry of `package` for `profile`; returns the removed
    /// entries.
    pub fn remove_package(&self, package: &str, profile: ProfileHandle) -> Vec<AppEntry> {
        let mut inner = self.inner.lock().expect("apps lock");
        let mut removed = Vec::new();
        inner.entries.retain(|e| {
            if e.profile == profile && e.component.package == package {
                removed.push(e.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            inner.changed = true;
        }
        removed
    }

    /// Apply `update` to every entry of `package` for `profile`; returns the
    /// entries that actually changed.
    pub fn update_package(
        &self,
        package: &str,
        profile: ProfileHandle,
        mut update: impl FnMut(&mut AppEntry),
    ) -> Vec<AppEntry> {
        let mut inner = self.inner.lock().expect("apps lock");
        let mut changed = Vec::new();
        for entry in inner
            .entries
            .iter_mut()
            .filter(|e| e.profile == profile && e.component.package == package)
        {
            let before = entry.clone();
            update(entry);
            if *entry != before {
                changed.push(entry.clone());
            }
        }
        if !changed.is_empty() {
            inner.changed = true;
        }
        changed
    }

    /// Recompute every section bucket, e.g. after a locale change.
    pub fn update_section_names(&self) {
        let mut inner = self.inner.lock().expect("apps lock");
        let mut any = false;
        for entry in inner.entries.iter_mut() {
            let section = section_name(&entry.title);
            if entry.section != section {
                entry.section = section;
                any = true;
            }
        }
        if any {
            inner.changed = true;
        }
    }

    /// Toggle per-entry flag bits for one profile (quiet-mode flips).
    pub fn set_profile_flags(&self, profile: ProfileHandle, mask: u32, enabled: bool) {
        let mut inner = self.inner.lock().expect("apps lock");
        let mut any = false;
        for entry in inner.entries.iter_mut().filter(|e| e.profile == profile) {
            let before = entry.flags;
            if enabled {
                entry.flags |= mask;
            } else {
                entry.flags &= !mask;
            }
            any |= entry.flags != before;
        }
        if any {
            inner.changed = true;
        }
    }

    /// Toggle list-wide flag bits.
    pub fn set_flags(&self, mask: u32, enabled: bool) {
        let mut inner = self.inner.lock().expect("apps lock");
        let before = inner.list_flags;
        if enabled {
            inner.list_flags |= mask;
        } else {
            inner.list_flags &= !mask;
        }
        if inner.list_flags != before {
            inner.changed = true;
        }
    }

    /// Sole re-publish signal. Every mutating operation above sets the flag;
    /// a false negative here would leave consumers stale.
    pub fn get_and_reset_change_flag(&self) -> bool {
        let mut inner = self.inner.lock().expect("apps lock");
        std::mem::take(&mut inner.changed)
    }

    /// Value copy of the list plus its flags, for publishing.
    pub fn snapshot(&self) -> (Vec<AppEntry>, u32) {
        let inner = self.inner.lock().expect("apps lock");
        (inner.entries.clone(), inner.list_flags)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("apps lock").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("apps lock");
        if !inner.entries.is_empty() {
            inner.entries.clear();
            inner.changed = true;
        }
    }
}
