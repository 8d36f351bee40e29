use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::items::{
    is_root_container, ItemId, ItemInfo, ItemVariant, ProfileHandle, ScreenId, CONTAINER_DESKTOP,
};

/// Immutable value copy of the workspace handed to consumers. Items are
/// cloned under the model lock, so later in-place mutation of the canonical
/// entities can never be observed through a snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub epoch: i64,
    pub items: Vec<ItemInfo>,
    pub screens: Vec<ScreenId>,
    pub extra_items: Vec<ItemInfo>,
    pub deep_shortcut_counts: HashMap<String, u32>,
    pub string_cache: HashMap<String, String>,
}

#[derive(Default)]
struct ModelInner {
    items: HashMap<ItemId, ItemInfo>,
    /// Items living in fixed auxiliary containers (not grid-placed).
    extra_items: Vec<ItemId>,
    /// Pinned deep-shortcut count per `package#serial` key.
    deep_shortcut_counts: HashMap<String, u32>,
    /// Cached display strings (profile labels and similar).
    string_cache: HashMap<String, String>,
    bind_epoch: i64,
}

/// The single authoritative in-memory map of materialized layout entities.
/// One coarse lock serializes every mutation and every snapshot copy; the
/// lock is never held across blocking store or OS calls.
#[derive(Default)]
pub struct CanonicalModel {
    inner: Mutex<ModelInner>,
}

pub fn shortcut_count_key(package: &str, profile: ProfileHandle) -> String {
    format!("{}#{}", package, profile.0)
}

impl CanonicalModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entity and auxiliary index. Always safe to call; the
    /// bind-epoch is preserved so stale publishes keep being rejected.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("model lock");
        inner.items.clear();
        inner.extra_items.clear();
        inner.deep_shortcut_counts.clear();
        inner.string_cache.clear();
    }

    /// Index an item. A non-root container that is not (yet) a collection in
    /// the map is tolerated as a forward reference and only logged.
    pub fn add_item(&self, item: ItemInfo, is_new: bool) {
        let mut inner = self.inner.lock().expect("model lock");
        if !is_root_container(item.container) {
            match inner.items.get_mut(&item.container) {
                Some(parent) => {
                    if let ItemVariant::Collection { children, .. } = &mut parent.variant {
                        if !children.contains(&item.id) {
                            children.push(item.id);
                        }
                    } else {
                        tracing::warn!(
                            item = item.id,
                            container = item.container,
                            "container resolves to a leaf item; indexing anyway"
                        );
                    }
                }
                None => {
                    tracing::warn!(
                        item = item.id,
                        container = item.container,
                        new = is_new,
                        "container not present yet; indexing as forward reference"
                    );
                }
            }
        }
        inner.items.insert(item.id, item);
    }

    /// Remove the given ids from the map and detach them from any parent
    /// collection. Returns the removed entities (value copies).
    pub fn remove_items(&self, ids: &[ItemId]) -> Vec<ItemInfo> {
        let mut inner = self.inner.lock().expect("model lock");
        let mut removed = Vec::new();
        for id in ids {
            if let Some(item) = inner.items.remove(id) {
                removed.push(item);
            }
            inner.extra_items.retain(|e| e != id);
        }
        for parent in inner.items.values_mut() {
            if let ItemVariant::Collection { children, .. } = &mut parent.variant {
                children.retain(|c| !ids.contains(c));
            }
        }
        removed
    }

    pub fn get_item(&self, id: ItemId) -> Option<ItemInfo> {
        self.inner
            .lock()
            .expect("model lock")
            .items
            .get(&id)
            .cloned()
    }

    pub fn item_count(&self) -> usize {
        self.inner.lock().expect("model lock").items.len()
    }

    /// Visit every item under the lock.
    pub fn for_each_item(&self, mut visit: impl FnMut(&ItemInfo)) {
        let inner = self.inner.lock().expect("model lock");
        for item in inner.items.values() {
            visit(item);
        }
    }

    /// Mutate items matching `select`; returns value copies of the items
    /// that were actually changed.
    pub fn update_items(
        &self,
        mut select: impl FnMut(&ItemInfo) -> bool,
        mut update: impl FnMut(&mut ItemInfo),
    ) -> Vec<ItemInfo> {
        let mut inner = self.inner.lock().expect("model lock");
        let mut changed = Vec::new();
        for item in inner.items.values_mut() {
            if select(item) {
                let before = item.clone();
                update(item);
                if *item != before {
                    changed.push(item.clone());
                }
            }
        }
        changed
    }

    /// Ids of items matching a predicate (no lock held by the caller while
    /// acting on the result).
    pub fn collect_ids(&self, mut select: impl FnMut(&ItemInfo) -> bool) -> Vec<ItemId> {
        let inner = self.inner.lock().expect("model lock");
        let mut ids: Vec<ItemId> = inner
            .items
            .values()
            .filter(|i| select(i))
            .map(|i| i.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Sorted distinct ids of screens carrying desktop items.
    pub fn collect_screen_ids(&self) -> Vec<ScreenId> {
        let inner = self.inner.lock().expect("model lock");
        let mut screens: Vec<ScreenId> = inner
            .items
            .values()
            .filter(|i| i.container == CONTAINER_DESKTOP)
            .map(|i| i.screen)
            .collect();
        screens.sort_unstable();
        screens.dedup();
        screens
    }

    pub fn current_epoch(&self) -> i64 {
        self.inner.lock().expect("model lock").bind_epoch
    }

    pub fn get_and_increment_bind_epoch(&self) -> i64 {
        let mut inner = self.inner.lock().expect("model lock");
        inner.bind_epoch += 1;
        inner.bind_epoch
    }

    /// Atomically replace the model contents with a staged load result and
    /// increment the bind-epoch. Every mutation becomes visible under the
    /// same lock acquisition that bumps the epoch.
    pub fn commit_load(
        &self,
        items: HashMap<ItemId, ItemInfo>,
        extra_items: Vec<ItemId>,
        string_cache: HashMap<String, String>,
    ) -> i64 {
        let mut inner = self.inner.lock().expect("model lock");
        inner.items = items;
        inner.extra_items = extra_items;
        inner.string_cache = string_cache;
        inner.deep_shortcut_counts.clear();
        inner.bind_epoch += 1;
        inner.bind_epoch
    }

    pub fn set_deep_shortcut_counts(&self, counts: HashMap<String, u32>) {
        self.inner.lock().expect("model lock").deep_shortcut_counts = counts;
    }

    pub fn set_string_cache(&self, cache: HashMap<String, String>) {
        self.inner.lock().expect("model lock").string_cache = cache;
    }

    pub fn string_cache(&self) -> HashMap<String, String> {
        self.inner.lock().expect("model lock").string_cache.clone()
    }

    /// Deep value copy for publishing, taken in one lock acquisition.
    pub fn snapshot(&self) -> WorkspaceSnapshot {
        let inner = self.inner.lock().expect("model lock");
        let mut items: Vec<ItemInfo> = inner.items.values().cloned().collect();
        items.sort_by_key(|i| (i.container, i.screen, i.cell_y, i.cell_x, i.id));
        let mut screens: Vec<ScreenId> = items
            .iter()
            .filter(|i| i.container == CONTAINER_DESKTOP)
            .map(|i| i.screen)
            .collect();
        screens.sort_unstable();
        screens.dedup();
        let extra_items = inner
            .extra_items
            .iter()
            .filter_map(|id| inner.items.get(id).cloned())
            .collect();
        WorkspaceSnapshot {
            epoch: inner.bind_epoch,
            items,
            screens,
            extra_items,
            deep_shortcut_counts: inner.deep_shortcut_counts.clone(),
            string_cache: inner.string_cache.clone(),
        }
    }

    /// Depth of the container chain above `id`; `None` when a cycle or an
    /// unterminated chain is detected within the hop bound.
    pub fn container_depth(&self, id: ItemId) -> Option<usize> {
        let inner = self.inner.lock().expect("model lock");
        let mut depth = 0usize;
        let mut current = id;
        // Containers only nest one level in practice; eight hops is already
        // far beyond any legal layout.
        for _ in 0..8 {
            let item = inner.items.get(&current)?;
            if is_root_container(item.container) {
                return Some(depth);
            }
            if item.container == current {
                return None;
            }
            depth += 1;
            current = item.container;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{
        ComponentKey, CollectionKind, ProfileHandle, CONTAINER_DESKTOP, CONTAINER_HOTSEAT,
    };

    fn app(id: ItemId, screen: ScreenId, x: i32, y: i32) -> ItemInfo {
        ItemInfo {
            id,
            container: CONTAINER_DESKTOP,
            screen,
            cell_x: x,
            cell_y: y,
            span_x: 1,
            span_y: 1,
            profile: ProfileHandle(0),
            title: Some(format!("app-{id}")),
            status: 0,
            restore_flags: 0,
            progress: 100,
            icon: None,
            variant: ItemVariant::App {
                component: ComponentKey::new(format!("com.app{id}"), "Main"),
            },
        }
    }

    fn folder(id: ItemId, children: Vec<ItemId>) -> ItemInfo {
        let mut item = app(id, 0, 3, 3);
        item.variant = ItemVariant::Collection {
            kind: CollectionKind::Folder,
            children,
            pending: false,
        };
        item
    }

    #[test]
    fn add_item_attaches_children_to_collections() {
        let model = CanonicalModel::new();
        model.add_item(folder(10, vec![]), false);
        let mut child = app(11, 0, 0, 0);
        child.container = 10;
        model.add_item(child, false);
        match model.get_item(10).unwrap().variant {
            ItemVariant::Collection { children, .. } => assert_eq!(children, vec![11]),
            other => panic!("expected collection, got {other:?}"),
        }
    }

    #[test]
    fn add_item_tolerates_forward_references() {
        let model = CanonicalModel::new();
        let mut child = app(11, 0, 0, 0);
        child.container = 77;
        model.add_item(child, false);
        // The child is indexed even though container 77 does not exist.
        assert!(model.get_item(11).is_some());
    }

    #[test]
    fn remove_items_detaches_from_parents() {
        let model = CanonicalModel::new();
        model.add_item(folder(10, vec![]), false);
        for id in [11, 12] {
            let mut child = app(id, 0, 0, 0);
            child.container = 10;
            model.add_item(child, false);
        }
        let removed = model.remove_items(&[11]);
        assert_eq!(removed.len(), 1);
        match model.get_item(10).unwrap().variant {
            ItemVariant::Collection { children, .. } => assert_eq!(children, vec![12]),
            other => panic!("expected collection, got {other:?}"),
        }
        // Removing an absent id is a no-op.
        assert!(model.remove_items(&[11]).is_empty());
    }

    #[test]
    fn commit_load_is_atomic_with_epoch_bump() {
        let model = CanonicalModel::new();
        let before = model.current_epoch();
        let mut staged = HashMap::new();
        staged.insert(1, app(1, 0, 0, 0));
        staged.insert(2, app(2, 1, 2, 2));
        let epoch = model.commit_load(staged, Vec::new(), HashMap::new());
        assert_eq!(epoch, before + 1);
        let snap = model.snapshot();
        assert_eq!(snap.epoch, epoch);
        assert_eq!(snap.items.len(), 2);
        assert_eq!(snap.screens, vec![0, 1]);
    }

    #[test]
    fn snapshot_is_a_value_copy() {
        let model = CanonicalModel::new();
        model.add_item(app(1, 0, 0, 0), false);
        let snap = model.snapshot();
        model.update_items(|i| i.id == 1, |i| i.title = Some("renamed".into()));
        assert_eq!(snap.items[0].title.as_deref(), Some("app-1"));
        assert_eq!(
            model.get_item(1).unwrap().title.as_deref(),
            Some("renamed")
        );
    }

    #[test]
    fn screen_ids_exclude_hotseat() {
        let model = CanonicalModel::new();
        model.add_item(app(1, 3, 0, 0), false);
        let mut hotseat = app(2, 0, 0, 0);
        hotseat.container = CONTAINER_HOTSEAT;
        model.add_item(hotseat, false);
        assert_eq!(model.collect_screen_ids(), vec![3]);
    }

    #[test]
    fn container_depth_detects_cycles() {
        let model = CanonicalModel::new();
        model.add_item(app(1, 0, 0, 0), false);
        assert_eq!(model.container_depth(1), Some(0));

        model.add_item(folder(10, vec![]), false);
        let mut child = app(11, 0, 0, 0);
        child.container = 10;
        model.add_item(child, false);
        assert_eq!(model.container_depth(11), Some(1));

        // Self-referential container never terminates.
        let mut cyclic = folder(20, vec![]);
        cyclic.container = 20;
        model.add_item(cyclic, false);
        assert_eq!(model.container_depth(20), None);
    }

    #[test]
    fn clear_preserves_epoch() {
        let model = CanonicalModel::new();
        model.commit_load(HashMap::new(), Vec::new(), HashMap::new());
        let epoch = model.current_epoch();
        model.clear();
        assert_eq!(model.current_epoch(), epoch);
        assert_eq!(model.item_count(), 0);
    }
}
