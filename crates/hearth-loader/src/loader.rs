use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio::sync::Notify;

use hearth_events::topics;
use hearth_model::model::shortcut_count_key;
use hearth_model::{apps::list_flags, AppEntry, ItemVariant};

use crate::inventory::InventoryError;
use crate::reconcile::RowReconciler;
use crate::ShellContext;

/// Phases of one full load. The loader only ever moves forward through
/// these, or sideways into `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoaderState {
    Idle,
    LoadingWorkspace,
    WaitingIdle1,
    LoadingAllApps,
    WaitingIdle2,
    LoadingShortcuts,
    WaitingIdle3,
    LoadingWidgets,
    LoadingFolderNames,
    Committed,
    Cancelled,
}

impl LoaderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoaderState::Idle => "idle",
            LoaderState::LoadingWorkspace => "loading_workspace",
            LoaderState::WaitingIdle1 => "waiting_idle_1",
            LoaderState::LoadingAllApps => "loading_all_apps",
            LoaderState::WaitingIdle2 => "waiting_idle_2",
            LoaderState::LoadingShortcuts => "loading_shortcuts",
            LoaderState::WaitingIdle3 => "waiting_idle_3",
            LoaderState::LoadingWidgets => "loading_widgets",
            LoaderState::LoadingFolderNames => "loading_folder_names",
            LoaderState::Committed => "committed",
            LoaderState::Cancelled => "cancelled",
        }
    }
}

/// Cooperative cancellation token shared between the facade and one
/// in-flight load. Checked between rows and between phases; there is no
/// preemption.
pub struct CancelFlag {
    cancelled: AtomicBool,
    finished: AtomicBool,
    done: Notify,
}

impl CancelFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            done: Notify::new(),
        })
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Mark the load as unwound (committed or aborted) and wake waiters.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.done.notify_waiters();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Wait until the load acknowledged the cancellation by unwinding.
    /// Polled with a short budget so a wakeup racing the registration can
    /// never be missed.
    pub async fn wait_finished(&self) {
        while !self.is_finished() {
            let _ = tokio::time::timeout(Duration::from_millis(20), self.done.notified()).await;
        }
    }
}

/// Gate the consumer side taps whenever its scheduler drains. The loader
/// waits on it between phases, bounded so a silent consumer cannot stall
/// the pipeline.
#[derive(Default)]
pub struct IdleGate {
    notify: Notify,
}

impl IdleGate {
    pub fn notify_idle(&self) {
        self.notify.notify_waiters();
    }

    pub async fn wait(&self, budget: Duration) {
        let _ = tokio::time::timeout(budget, self.notify.notified()).await;
    }
}

fn idle_yield_budget() -> Duration {
    let ms: u64 = std::env::var("HEARTH_IDLE_YIELD_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);
    Duration::from_millis(ms)
}

pub enum LoadOutcome {
    Committed { epoch: i64 },
    Cancelled,
}

/// Drives one multi-phase load: workspace rows, the all-apps inventory,
/// pinned shortcuts, widget providers, and folder-name suggestions, with a
/// bounded cooperative yield between phases and a cancellation check
/// between every row.
///
/// Nothing touches the canonical model until the workspace phase commits
/// its staged result; cancellation before that point discards the staging
/// wholesale.
pub struct LoaderTask {
    ctx: Arc<ShellContext>,
    cancel: Arc<CancelFlag>,
    state: LoaderState,
}

impl LoaderTask {
    pub fn new(ctx: Arc<ShellContext>, cancel: Arc<CancelFlag>) -> Self {
        Self {
            ctx,
            cancel,
            state: LoaderState::Idle,
        }
    }

    fn transition(&mut self, next: LoaderState) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "loader");
        self.state = next;
    }

    fn cancelled(&mut self) -> bool {
        if self.cancel.is_cancelled() {
            self.transition(LoaderState::Cancelled);
            true
        } else {
            false
        }
    }

    pub async fn run(mut self) -> Result<LoadOutcome> {
        let outcome = self.run_inner().await;
        if matches!(outcome, Ok(LoadOutcome::Cancelled)) {
            self.ctx
                .bus
                .publish(topics::TOPIC_LOAD_CANCELLED, &json!({}));
        }
        outcome
    }

    async fn run_inner(&mut self) -> Result<LoadOutcome> {
        let ctx = self.ctx.clone();
        let budget = idle_yield_budget();

        // Phase 1: workspace rows.
        self.transition(LoaderState::LoadingWorkspace);
        let rows = ctx.store.query_all()?;
        let mut reconciler = RowReconciler::new(ctx.inventory.as_ref(), ctx.grid);
        for row in rows {
            if self.cancelled() {
                return Ok(LoadOutcome::Cancelled);
            }
            reconciler.reconcile(row);
        }
        let outcome = reconciler.finish();
        if self.cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }

        // Persist the repair decisions before anything is published.
        let drop_ids: Vec<_> = outcome.dropped.iter().map(|(id, _)| *id).collect();
        for (id, reason) in &outcome.dropped {
            ctx.bus.publish(
                topics::TOPIC_ROW_DROPPED,
                &json!({"id": id, "reason": reason.as_str()}),
            );
        }
        ctx.store.delete_ids(&drop_ids)?;
        ctx.store.clear_restore_flags(&outcome.restored_cleared)?;

        let profiles = ctx.inventory.profiles();
        let mut string_cache: HashMap<String, String> = HashMap::new();
        for p in &profiles {
            string_cache.insert(format!("profile.{}.label", p.serial), p.label.clone());
        }

        // Commit: staged items become the model, atomically with the epoch
        // bump. Everything published below carries this epoch.
        let epoch = ctx
            .model
            .commit_load(outcome.items, outcome.extra_items, string_cache);
        let snapshot = ctx.model.snapshot();
        ctx.binder
            .publish(epoch, |cb| cb.bind_screens(&snapshot.screens));
        ctx.binder
            .publish(epoch, |cb| cb.bind_items(&snapshot.items, false));
        ctx.binder
            .publish(epoch, |cb| cb.bind_string_cache(&snapshot.string_cache));

        self.transition(LoaderState::WaitingIdle1);
        ctx.idle.wait(budget).await;
        if self.cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }

        // Phase 2: all-apps inventory.
        self.transition(LoaderState::LoadingAllApps);
        let mut entries: Vec<AppEntry> = Vec::new();
        let mut any_quiet = false;
        let mut has_work_profile = false;
        for p in &profiles {
            any_quiet |= p.quiet;
            has_work_profile |= p.serial != 0;
            for activity in ctx.inventory.list_activities(p.handle) {
                if self.cancelled() {
                    return Ok(LoadOutcome::Cancelled);
                }
                let mut entry = AppEntry::new(activity.component, p.handle, activity.title);
                if p.quiet {
                    entry.flags |= hearth_model::flags::DISABLED_QUIET_PROFILE;
                }
                entries.push(entry);
            }
        }
        ctx.apps.set_all(entries);
        ctx.apps.set_flags(list_flags::QUIET_MODE, any_quiet);
        ctx.apps
            .set_flags(list_flags::HAS_WORK_PROFILE, has_work_profile);
        if ctx.apps.get_and_reset_change_flag() {
            let (apps, app_flags) = ctx.apps.snapshot();
            ctx.binder
                .publish(epoch, |cb| cb.bind_all_applications(&apps, app_flags));
        }

        self.transition(LoaderState::WaitingIdle2);
        ctx.idle.wait(budget).await;
        if self.cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }

        // Phase 3: pinned deep shortcuts. A locked profile keeps whatever
        // was there; nothing is dropped on transient failure.
        self.transition(LoaderState::LoadingShortcuts);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for p in &profiles {
            match ctx.inventory.query_pinned_shortcuts(p.handle) {
                Ok(shortcuts) => {
                    for s in shortcuts {
                        *counts
                            .entry(shortcut_count_key(&s.package, p.handle))
                            .or_insert(0) += 1;
                    }
                }
                Err(InventoryError::ProfileLocked(handle)) => {
                    tracing::debug!(?handle, "profile still locked; keeping shortcut state");
                }
                Err(err) => {
                    tracing::warn!(%err, "pinned shortcut query failed");
                }
            }
        }
        ctx.model.set_deep_shortcut_counts(counts);

        self.transition(LoaderState::WaitingIdle3);
        ctx.idle.wait(budget).await;
        if self.cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }

        // Phase 4: widget providers.
        self.transition(LoaderState::LoadingWidgets);
        let mut widgets = Vec::new();
        for p in &profiles {
            widgets.extend(ctx.inventory.list_widget_providers(p.handle));
        }
        ctx.binder.publish(epoch, |cb| cb.bind_all_widgets(&widgets));

        // Phase 5: display-name suggestions for untitled folders.
        self.transition(LoaderState::LoadingFolderNames);
        let renamed = self.suggest_folder_names();
        if !renamed.is_empty() {
            ctx.binder
                .publish(epoch, |cb| cb.bind_items_modified(&renamed));
        }

        self.transition(LoaderState::Committed);
        ctx.binder
            .publish(epoch, |cb| cb.on_initial_bind_complete(&snapshot.screens));
        ctx.bus.publish(
            topics::TOPIC_LOAD_COMMITTED,
            &json!({"epoch": epoch, "items": snapshot.items.len()}),
        );
        Ok(LoadOutcome::Committed { epoch })
    }

    /// Ask the inventory for names of folders that have none, based on the
    /// packages inside. Returns value copies of the renamed folders.
    fn suggest_folder_names(&self) -> Vec<hearth_model::ItemInfo> {
        let ctx = &self.ctx;
        let mut untitled: Vec<(i64, Vec<i64>)> = Vec::new();
        ctx.model.for_each_item(|item| {
            if item.title.is_none() {
                if let ItemVariant::Collection { children, .. } = &item.variant {
                    untitled.push((item.id, children.clone()));
                }
            }
        });
        let mut renamed = Vec::new();
        for (folder_id, children) in untitled {
            let packages: Vec<String> = children
                .iter()
                .filter_map(|child| ctx.model.get_item(*child))
                .filter_map(|child| child.package().map(|p| p.to_string()))
                .collect();
            if let Some(name) = ctx.inventory.suggest_folder_name(&packages) {
                renamed.extend(ctx.model.update_items(
                    |i| i.id == folder_id,
                    |i| i.title = Some(name.clone()),
                ));
            }
        }
        renamed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_state_slugs_are_stable() {
        assert_eq!(LoaderState::Idle.as_str(), "idle");
        assert_eq!(LoaderState::LoadingWorkspace.as_str(), "loading_workspace");
        assert_eq!(LoaderState::Committed.as_str(), "committed");
        assert_eq!(LoaderState::Cancelled.as_str(), "cancelled");
    }

    #[tokio::test]
    async fn cancel_flag_handshake() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());

        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.wait_finished().await });
        flag.finish();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait_finished must resolve after finish")
            .unwrap();
    }

    #[tokio::test]
    async fn idle_gate_wait_is_bounded() {
        let gate = IdleGate::default();
        let start = std::time::Instant::now();
        gate.wait(Duration::from_millis(20)).await;
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
