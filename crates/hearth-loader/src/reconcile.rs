use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use hearth_model::{
    flags, is_root_container, restore, CollectionKind, ComponentKey, GridOccupancy, GridSpec,
    ItemId, ItemInfo, ItemKind, ItemVariant, ProfileHandle, CONTAINER_DESKTOP, CONTAINER_HOTSEAT,
};
use hearth_store::LayoutRow;

use crate::inventory::{OsInventory, ProfileInfo, WidgetProviderInfo};

/// Why a persisted row was marked for deletion during reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    ProfileGone,
    TargetMissing,
    Overlap,
    OutOfBounds,
    MalformedIntent,
    UnknownKind,
    IdCollision,
    DanglingContainer,
    EmptyCollection,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::ProfileGone => "profile-gone",
            DropReason::TargetMissing => "target-missing",
            DropReason::Overlap => "overlap",
            DropReason::OutOfBounds => "out-of-bounds",
            DropReason::MalformedIntent => "malformed-intent",
            DropReason::UnknownKind => "unknown-kind",
            DropReason::IdCollision => "id-collision",
            DropReason::DanglingContainer => "dangling-container",
            DropReason::EmptyCollection => "empty-collection",
        }
    }
}

/// Persisted intent payload of a deep shortcut row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShortcutIntent {
    pub package: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ShortcutIntent {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Result of one full reconciliation pass over the persisted rows.
pub struct ReconcileOutcome {
    /// Materialized entities, staged for an atomic model commit.
    pub items: HashMap<ItemId, ItemInfo>,
    /// Items living in fixed auxiliary containers.
    pub extra_items: Vec<ItemId>,
    /// Rows to delete from the store, with the defect that doomed them.
    pub dropped: Vec<(ItemId, DropReason)>,
    /// Rows that resolved successfully and may shed their restore flags.
    pub restored_cleared: Vec<ItemId>,
}

/// Walks persisted rows one at a time and either materializes a typed model
/// entity or marks the row for deletion. Placement is validated against a
/// per-screen occupancy grid; forward references to not-yet-read collection
/// rows become pending placeholders.
pub struct RowReconciler<'a> {
    inventory: &'a dyn OsInventory,
    grid: GridSpec,
    profiles: HashMap<i64, ProfileInfo>,
    sessions: HashMap<String, u8>,
    widget_providers: HashMap<ProfileHandle, Vec<WidgetProviderInfo>>,
    occupancy: GridOccupancy,
    items: HashMap<ItemId, ItemInfo>,
    extra_items: Vec<ItemId>,
    dropped: Vec<(ItemId, DropReason)>,
    restored_cleared: Vec<ItemId>,
}

impl<'a> RowReconciler<'a> {
    pub fn new(inventory: &'a dyn OsInventory, grid: GridSpec) -> Self {
        let profiles = inventory
            .profiles()
            .into_iter()
            .map(|p| (p.serial, p))
            .collect();
        let sessions = inventory.active_install_sessions();
        Self {
            inventory,
            grid,
            profiles,
            sessions,
            widget_providers: HashMap::new(),
            occupancy: GridOccupancy::new(),
            items: HashMap::new(),
            extra_items: Vec::new(),
            dropped: Vec::new(),
            restored_cleared: Vec::new(),
        }
    }

    /// Reconcile a single persisted row against the live inventory.
    pub fn reconcile(&mut self, row: LayoutRow) {
        let id = row.id;
        match self.materialize(row) {
            Ok(item) => self.place(item),
            Err(reason) => self.drop_row(id, reason),
        }
    }

    fn drop_row(&mut self, id: ItemId, reason: DropReason) {
        tracing::info!(id, reason = reason.as_str(), "dropping layout row");
        self.dropped.push((id, reason));
    }

    fn materialize(&mut self, row: LayoutRow) -> Result<ItemInfo, DropReason> {
        let kind = ItemKind::from_tag(row.item_type).ok_or(DropReason::UnknownKind)?;
        if row.container == row.id {
            return Err(DropReason::DanglingContainer);
        }
        let profile = self
            .profiles
            .get(&row.profile_serial)
            .ok_or(DropReason::ProfileGone)?
            .clone();

        let mut item = ItemInfo {
            id: row.id,
            container: row.container,
            screen: row.screen,
            cell_x: row.cell_x,
            cell_y: row.cell_y,
            span_x: row.span_x,
            span_y: row.span_y,
            profile: profile.handle,
            title: row.title.clone(),
            status: 0,
            restore_flags: row.restore_flags,
            progress: 100,
            icon: row.icon.clone(),
            variant: ItemVariant::Collection {
                kind: CollectionKind::Folder,
                children: Vec::new(),
                pending: false,
            },
        };
        if profile.quiet {
            item.set_flag(flags::DISABLED_QUIET_PROFILE, true);
        }

        match kind {
            ItemKind::Application => {
                let raw = row.intent.as_deref().ok_or(DropReason::MalformedIntent)?;
                let component =
                    ComponentKey::parse_flat(raw).ok_or(DropReason::MalformedIntent)?;
                match self.inventory.resolve_activity(&component, profile.handle) {
                    Some(activity) => {
                        item.title = Some(activity.title);
                        item.set_flag(flags::DISABLED_SUSPENDED, activity.suspended);
                        item.set_flag(flags::ARCHIVED, activity.archived);
                        if row.restore_flags != 0 {
                            self.restored_cleared.push(row.id);
                        }
                    }
                    None => self.make_provisional(&mut item, &component.package, &row)?,
                }
                item.variant = ItemVariant::App { component };
            }
            ItemKind::DeepShortcut => {
                let raw = row.intent.as_deref().ok_or(DropReason::MalformedIntent)?;
                let intent = ShortcutIntent::decode(raw).ok_or(DropReason::MalformedIntent)?;
                if self
                    .inventory
                    .is_package_enabled(&intent.package, profile.handle)
                {
                    if row.restore_flags != 0 {
                        self.restored_cleared.push(row.id);
                    }
                } else {
                    self.make_provisional(&mut item, &intent.package, &row)?;
                }
                item.variant = ItemVariant::DeepShortcut {
                    package: intent.package,
                    shortcut_id: intent.id,
                    url: intent.url,
                };
            }
            ItemKind::Widget => {
                let provider = row.provider.clone().ok_or(DropReason::MalformedIntent)?;
                let package = provider
                    .split('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                let known = self
                    .providers_for(profile.handle)
                    .iter()
                    .any(|w| w.provider == provider);
                if known {
                    if row.restore_flags != 0 {
                        self.restored_cleared.push(row.id);
                    }
                } else {
                    self.make_provisional(&mut item, &package, &row)?;
                }
                item.variant = ItemVariant::Widget { provider };
            }
            ItemKind::Folder | ItemKind::AppPair => {
                let collection_kind = if kind == ItemKind::Folder {
                    CollectionKind::Folder
                } else {
                    CollectionKind::AppPair
                };
                item.variant = ItemVariant::Collection {
                    kind: collection_kind,
                    children: Vec::new(),
                    pending: false,
                };
            }
        }
        Ok(item)
    }

    /// An unresolved target is kept as a promise placeholder only when a
    /// pending install justifies it: an active session, a promise UI that
    /// has not been shown yet, or an archived-style icon blob to draw.
    fn make_provisional(
        &mut self,
        item: &mut ItemInfo,
        package: &str,
        row: &LayoutRow,
    ) -> Result<(), DropReason> {
        if row.restore_flags & restore::PENDING_INSTALL == 0 {
            // not awaiting an install at all
            return Err(DropReason::TargetMissing);
        }
        let session = self.sessions.get(package).copied();
        let keep = session.is_some()
            || row.restore_flags & restore::UI_NOT_READY != 0
            || row.icon.is_some();
        if !keep {
            return Err(DropReason::TargetMissing);
        }
        item.set_flag(flags::PROMISE, true);
        item.set_flag(flags::RESTORED, true);
        item.progress = session.unwrap_or(0);
        if item.title.is_none() {
            item.title = Some(package.to_string());
        }
        Ok(())
    }

    fn providers_for(&mut self, profile: ProfileHandle) -> &Vec<WidgetProviderInfo> {
        let inventory = self.inventory;
        self.widget_providers
            .entry(profile)
            .or_insert_with(|| inventory.list_widget_providers(profile))
    }

    /// Place a materialized item: validate root-container placements against
    /// the occupancy grid, route auxiliary containers to the extras index,
    /// and wire collection membership (creating forward-reference
    /// placeholders as needed).
    fn place(&mut self, item: ItemInfo) {
        let id = item.id;

        // A collection row may finalize a placeholder created by an earlier
        // child row; anything else landing on an occupied id is a defect.
        if let Some(existing) = self.items.get(&id) {
            let placeholder = matches!(
                existing.variant,
                ItemVariant::Collection { pending: true, .. }
            );
            if !(placeholder && item.is_collection()) {
                self.drop_row(id, DropReason::IdCollision);
                return;
            }
        }

        if is_root_container(item.container) {
            if let Err(err) = self.occupancy.check_and_reserve(&self.grid, &item) {
                let reason = match err {
                    hearth_model::PlacementError::Overlap { .. }
                    | hearth_model::PlacementError::HotseatOccupied { .. } => DropReason::Overlap,
                    _ => DropReason::OutOfBounds,
                };
                self.drop_row(id, reason);
                return;
            }
        } else if item.container < CONTAINER_HOTSEAT {
            // Fixed auxiliary container: not grid-placed.
            self.extra_items.push(id);
        } else {
            self.attach_to_parent(&item);
        }

        match self.items.get_mut(&id) {
            Some(existing) => {
                // Finalize the placeholder in place, keeping gathered children.
                let children = match &existing.variant {
                    ItemVariant::Collection { children, .. } => children.clone(),
                    _ => Vec::new(),
                };
                let mut finalized = item;
                if let ItemVariant::Collection {
                    children: c,
                    pending,
                    ..
                } = &mut finalized.variant
                {
                    *c = children;
                    *pending = false;
                }
                *existing = finalized;
            }
            None => {
                self.items.insert(id, item);
            }
        }
    }

    fn attach_to_parent(&mut self, item: &ItemInfo) {
        let parent_id = item.container;
        let parent = self.items.entry(parent_id).or_insert_with(|| ItemInfo {
            id: parent_id,
            container: CONTAINER_DESKTOP,
            screen: 0,
            cell_x: 0,
            cell_y: 0,
            span_x: 1,
            span_y: 1,
            profile: item.profile,
            title: None,
            status: 0,
            restore_flags: 0,
            progress: 100,
            icon: None,
            variant: ItemVariant::Collection {
                kind: CollectionKind::Folder,
                children: Vec::new(),
                pending: true,
            },
        });
        if let ItemVariant::Collection { children, .. } = &mut parent.variant {
            if !children.contains(&item.id) {
                children.push(item.id);
            }
        } else {
            tracing::warn!(
                item = item.id,
                container = parent_id,
                "container resolves to a leaf item"
            );
        }
    }

    /// Whether a container chain reaches DESKTOP/HOTSEAT within the hop
    /// bound. A missing parent is a dangling reference, not a cycle, and is
    /// tolerated the way purged placeholders are.
    fn chain_reaches_root(&self, mut container: ItemId) -> bool {
        for _ in 0..8 {
            if is_root_container(container) {
                return true;
            }
            match self.items.get(&container) {
                Some(parent) => container = parent.container,
                None => return true,
            }
        }
        false
    }

    /// Close the pass: purge placeholders that never saw their defining row
    /// and collections left empty, then hand back the staged outcome.
    pub fn finish(mut self) -> ReconcileOutcome {
        // Placeholders whose defining row never appeared: the collection is
        // purged and its would-be children are left unparented (tolerated by
        // the model as dangling container references).
        let pending: Vec<ItemId> = self
            .items
            .values()
            .filter(|i| matches!(i.variant, ItemVariant::Collection { pending: true, .. }))
            .map(|i| i.id)
            .collect();
        for id in pending {
            tracing::info!(id, "purging unresolved collection placeholder");
            self.items.remove(&id);
        }

        // Collections whose container chain never terminates at a root
        // (mutually-referencing folder rows) would loop forever in
        // consumers; their rows are deleted.
        let cyclic: Vec<ItemId> = self
            .items
            .values()
            .filter(|i| i.is_collection() && !self.chain_reaches_root(i.container))
            .map(|i| i.id)
            .collect();
        for id in cyclic {
            self.items.remove(&id);
            self.drop_row(id, DropReason::DanglingContainer);
        }

        // Empty collections are deleted outright; their rows existed, so the
        // deletion is also persisted. Running this twice is a no-op.
        let empty: Vec<ItemId> = self
            .items
            .values()
            .filter(|i| {
                matches!(
                    &i.variant,
                    ItemVariant::Collection { children, .. } if children.is_empty()
                )
            })
            .map(|i| i.id)
            .collect();
        for id in empty {
            self.items.remove(&id);
            self.drop_row(id, DropReason::EmptyCollection);
        }

        self.restored_cleared.sort_unstable();
        self.restored_cleared.dedup();
        let items = &self.items;
        self.extra_items.retain(|id| items.contains_key(id));

        ReconcileOutcome {
            items: self.items,
            extra_items: self.extra_items,
            dropped: self.dropped,
            restored_cleared: self.restored_cleared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeInventory;
    use hearth_model::ItemKind;
    use hearth_store::LayoutRow;

    fn app_row(id: ItemId, x: i32, y: i32, intent: &str) -> LayoutRow {
        let mut row = LayoutRow::new(ItemKind::Application.tag(), CONTAINER_DESKTOP, 0);
        row.id = id;
        row.cell_x = x;
        row.cell_y = y;
        row.intent = Some(intent.into());
        row
    }

    fn run(inventory: &FakeInventory, rows: Vec<LayoutRow>) -> ReconcileOutcome {
        let mut recon = RowReconciler::new(inventory, GridSpec::default());
        for row in rows {
            recon.reconcile(row);
        }
        recon.finish()
    }

    #[test]
    fn resolved_app_rows_materialize_with_live_title() {
        let inventory = FakeInventory::with_default_profile();
        inventory.add_activity("com.mail", "Inbox", "Mail");
        let out = run(&inventory, vec![app_row(1, 0, 0, "com.mail/Inbox")]);
        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[&1].title.as_deref(), Some("Mail"));
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn overlapping_rows_keep_first_drop_second() {
        let inventory = FakeInventory::with_default_profile();
        inventory.add_activity("com.a", "Main", "A");
        inventory.add_activity("com.b", "Main", "B");
        let out = run(
            &inventory,
            vec![
                app_row(1, 0, 0, "com.a/Main"),
                app_row(2, 0, 0, "com.b/Main"),
            ],
        );
        assert!(out.items.contains_key(&1));
        assert!(!out.items.contains_key(&2));
        assert_eq!(out.dropped, vec![(2, DropReason::Overlap)]);
    }

    #[test]
    fn missing_profile_marks_row_for_deletion() {
        let inventory = FakeInventory::with_default_profile();
        inventory.add_activity("com.a", "Main", "A");
        let mut row = app_row(1, 0, 0, "com.a/Main");
        row.profile_serial = 99;
        let out = run(&inventory, vec![row]);
        assert!(out.items.is_empty());
        assert_eq!(out.dropped, vec![(1, DropReason::ProfileGone)]);
    }

    #[test]
    fn unresolved_target_without_restore_hint_is_dropped() {
        let inventory = FakeInventory::with_default_profile();
        let out = run(&inventory, vec![app_row(1, 0, 0, "com.gone/Main")]);
        assert_eq!(out.dropped, vec![(1, DropReason::TargetMissing)]);
    }

    #[test]
    fn pending_install_with_session_becomes_promise_item() {
        let inventory = FakeInventory::with_default_profile();
        inventory.set_install_session("com.new", 40);
        let mut row = app_row(1, 0, 0, "com.new/Main");
        row.restore_flags = restore::PENDING_INSTALL;
        let out = run(&inventory, vec![row]);
        let item = &out.items[&1];
        assert!(item.has_flag(flags::PROMISE));
        assert_eq!(item.progress, 40);
        assert_eq!(item.title.as_deref(), Some("com.new"));
        // Still pending: restore flags are not cleared yet.
        assert!(out.restored_cleared.is_empty());
    }

    #[test]
    fn forward_referenced_folder_is_finalized_by_its_row() {
        let inventory = FakeInventory::with_default_profile();
        inventory.add_activity("com.a", "Main", "A");
        inventory.add_activity("com.b", "Main", "B");

        let mut child_a = app_row(1, 0, 0, "com.a/Main");
        child_a.container = 10;
        let mut child_b = app_row(2, 1, 0, "com.b/Main");
        child_b.container = 10;
        let mut folder = LayoutRow::new(ItemKind::Folder.tag(), CONTAINER_DESKTOP, 0);
        folder.id = 10;
        folder.cell_x = 2;
        folder.cell_y = 2;
        folder.title = Some("Stuff".into());

        let out = run(&inventory, vec![child_a, child_b, folder]);
        let folder = &out.items[&10];
        assert_eq!(folder.title.as_deref(), Some("Stuff"));
        match &folder.variant {
            ItemVariant::Collection {
                children, pending, ..
            } => {
                assert!(!pending);
                assert_eq!(children, &vec![1, 2]);
            }
            other => panic!("expected collection, got {other:?}"),
        }
    }

    #[test]
    fn never_finalized_placeholder_is_purged_children_kept() {
        let inventory = FakeInventory::with_default_profile();
        inventory.add_activity("com.a", "Main", "A");
        let mut child = app_row(1, 0, 0, "com.a/Main");
        child.container = 77;
        let out = run(&inventory, vec![child]);
        assert!(!out.items.contains_key(&77));
        assert!(out.items.contains_key(&1));
        // The placeholder had no persisted row, so nothing is deleted for it.
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn empty_collection_purge_is_idempotent() {
        let inventory = FakeInventory::with_default_profile();
        let mut folder = LayoutRow::new(ItemKind::Folder.tag(), CONTAINER_DESKTOP, 0);
        folder.id = 10;
        let out = run(&inventory, vec![folder.clone()]);
        assert!(out.items.is_empty());
        assert_eq!(out.dropped, vec![(10, DropReason::EmptyCollection)]);

        // Second pass over the same (already-empty) store state.
        let out2 = run(&inventory, vec![folder]);
        assert_eq!(out2.dropped, vec![(10, DropReason::EmptyCollection)]);
        assert_eq!(
            out.items.keys().collect::<Vec<_>>(),
            out2.items.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn mutually_referencing_folders_are_dropped() {
        let inventory = FakeInventory::with_default_profile();
        let mut first = LayoutRow::new(ItemKind::Folder.tag(), 20, 0);
        first.id = 10;
        let mut second = LayoutRow::new(ItemKind::Folder.tag(), 10, 0);
        second.id = 20;

        let out = run(&inventory, vec![first, second]);
        assert!(out.items.is_empty());
        let mut dropped: Vec<ItemId> = out.dropped.iter().map(|(id, _)| *id).collect();
        dropped.sort_unstable();
        assert_eq!(dropped, vec![10, 20]);
        assert!(out
            .dropped
            .iter()
            .all(|(_, reason)| matches!(reason, DropReason::DanglingContainer)));
    }

    #[test]
    fn nested_collections_that_reach_a_root_are_kept() {
        let inventory = FakeInventory::with_default_profile();
        let mut outer = LayoutRow::new(ItemKind::Folder.tag(), CONTAINER_DESKTOP, 0);
        outer.id = 10;
        let mut inner = LayoutRow::new(ItemKind::AppPair.tag(), 10, 0);
        inner.id = 20;

        let out = run(&inventory, vec![outer, inner]);
        // The chain 20 -> 10 -> DESKTOP terminates, so neither is a cycle
        // defect; the empty inner pair is purged on its own merits.
        assert!(out.items.contains_key(&10));
        assert_eq!(out.dropped, vec![(20, DropReason::EmptyCollection)]);
    }

    #[test]
    fn oversized_hotseat_rank_is_dropped_not_truncated() {
        let inventory = FakeInventory::with_default_profile();
        inventory.add_activity("com.a", "Main", "A");
        inventory.add_activity("com.b", "Main", "B");

        let mut pinned = app_row(1, 0, 0, "com.a/Main");
        pinned.container = CONTAINER_HOTSEAT;
        pinned.screen = 0;
        // A defective rank past i32::MAX must not wrap back onto rank 0.
        let mut defective = app_row(2, 0, 0, "com.b/Main");
        defective.container = CONTAINER_HOTSEAT;
        defective.screen = 1 << 32;

        let out = run(&inventory, vec![pinned, defective]);
        assert!(out.items.contains_key(&1));
        assert_eq!(out.dropped, vec![(2, DropReason::OutOfBounds)]);
    }

    #[test]
    fn encoded_shortcut_intents_materialize_round_trip() {
        let inventory = FakeInventory::with_default_profile();
        inventory.add_activity("com.chat", "Main", "Chat");
        let intent = ShortcutIntent {
            package: "com.chat".into(),
            id: "compose".into(),
            url: None,
        };
        let mut row = LayoutRow::new(ItemKind::DeepShortcut.tag(), CONTAINER_DESKTOP, 0);
        row.id = 1;
        row.intent = Some(intent.encode());

        let out = run(&inventory, vec![row]);
        match &out.items[&1].variant {
            ItemVariant::DeepShortcut {
                package,
                shortcut_id,
                url,
            } => {
                assert_eq!(package, "com.chat");
                assert_eq!(shortcut_id, "compose");
                assert!(url.is_none());
            }
            other => panic!("expected deep shortcut, got {other:?}"),
        }
        assert!(out.dropped.is_empty());
    }

    #[test]
    fn self_referential_container_is_rejected() {
        let inventory = FakeInventory::with_default_profile();
        let mut folder = LayoutRow::new(ItemKind::Folder.tag(), 10, 0);
        folder.id = 10;
        let out = run(&inventory, vec![folder]);
        assert_eq!(out.dropped, vec![(10, DropReason::DanglingContainer)]);
    }

    #[test]
    fn unknown_kind_tag_is_a_row_defect() {
        let inventory = FakeInventory::with_default_profile();
        let mut row = LayoutRow::new(999, CONTAINER_DESKTOP, 0);
        row.id = 5;
        let out = run(&inventory, vec![row]);
        assert_eq!(out.dropped, vec![(5, DropReason::UnknownKind)]);
    }

    #[test]
    fn restored_rows_that_resolve_are_queued_for_flag_clear() {
        let inventory = FakeInventory::with_default_profile();
        inventory.add_activity("com.a", "Main", "A");
        let mut row = app_row(1, 0, 0, "com.a/Main");
        row.restore_flags = restore::PENDING_INSTALL;
        let out = run(&inventory, vec![row]);
        assert_eq!(out.restored_cleared, vec![1]);
        assert!(!out.items[&1].has_flag(flags::PROMISE));
    }
}
