//! Background loading and reconciliation pipeline for the Hearth shell.
//!
//! One serialized worker owns every model mutation: full multi-phase loads
//! (workspace rows, all-apps, shortcuts, widgets, folder names) and the
//! incremental update tasks that keep the model current between loads. The
//! facade type, [`ShellModel`], is what an embedding shell holds on to.

pub mod binder;
pub mod inventory;
pub mod loader;
pub mod queue;
pub mod reconcile;
pub mod tasks;
pub mod test_support;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::json;
use tokio::task::JoinHandle;

use hearth_events::{topics, Bus};
use hearth_model::{AppsList, CanonicalModel, GridSpec};
use hearth_store::LayoutStore;

pub use binder::Binder;
pub use inventory::{ActivityInfo, InventoryError, OsInventory, ProfileInfo, ShortcutInfo};
pub use loader::{CancelFlag, IdleGate, LoadOutcome, LoaderState, LoaderTask};
pub use queue::{Job, JobQueue, PRIORITY_RELOAD, PRIORITY_TASK};
pub use reconcile::{DropReason, ReconcileOutcome, RowReconciler, ShortcutIntent};
pub use tasks::{
    InstallProgressTask, ModelTask, PackageAddedTask, PackageRemovedTask, PackageUpdatedTask,
    ProfileAvailabilityTask,
};

/// Everything a load or task needs, shared by reference with the worker.
/// The inventory is only ever called from the worker, never under the model
/// lock.
pub struct ShellContext {
    pub grid: GridSpec,
    pub store: LayoutStore,
    pub inventory: Arc<dyn OsInventory>,
    pub model: Arc<CanonicalModel>,
    pub apps: Arc<AppsList>,
    pub binder: Arc<Binder>,
    pub bus: Bus,
    pub idle: Arc<IdleGate>,
}

/// Facade owning the store, the canonical model, and the single background
/// worker that serializes loads and update tasks.
pub struct ShellModel {
    ctx: Arc<ShellContext>,
    queue: JobQueue,
    current_load: Mutex<Option<Arc<CancelFlag>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ShellModel {
    /// Open (or create) the layout store under `dir`, reconcile any grid
    /// dimension change, and spawn the worker. Must be called from within a
    /// tokio runtime.
    pub fn new(
        dir: &Path,
        grid: GridSpec,
        inventory: Arc<dyn OsInventory>,
        bus: Bus,
    ) -> Result<Self> {
        let store = LayoutStore::open(dir)?;
        reconcile_grid_change(&store, &grid, &bus)?;

        let model = Arc::new(CanonicalModel::new());
        let binder = Arc::new(Binder::new(model.clone()));
        let ctx = Arc::new(ShellContext {
            grid,
            store,
            inventory,
            model,
            apps: Arc::new(AppsList::new()),
            binder,
            bus,
            idle: Arc::new(IdleGate::default()),
        });
        let queue = JobQueue::new();
        let worker = tokio::spawn(worker_loop(ctx.clone(), queue.clone()));
        Ok(Self {
            ctx,
            queue,
            current_load: Mutex::new(None),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn context(&self) -> &Arc<ShellContext> {
        &self.ctx
    }

    pub fn model(&self) -> &Arc<CanonicalModel> {
        &self.ctx.model
    }

    pub fn apps(&self) -> &Arc<AppsList> {
        &self.ctx.apps
    }

    pub fn register_callbacks(&self, cb: Arc<dyn hearth_events::callbacks::ShellCallbacks>) {
        self.ctx.binder.register(cb);
    }

    pub fn unregister_callbacks(&self, cb: &Arc<dyn hearth_events::callbacks::ShellCallbacks>) {
        self.ctx.binder.unregister(cb);
    }

    /// The consumer's scheduler drained; let a waiting load move to its next
    /// phase early.
    pub fn notify_ui_idle(&self) {
        self.ctx.idle.notify_idle();
    }

    /// Request a full reload. Any in-flight load is cancelled; the new one
    /// jumps ahead of queued update tasks. Returns the new load's cancel
    /// flag so callers can await or cancel it.
    pub async fn start_load(&self) -> Arc<CancelFlag> {
        let cancel = CancelFlag::new();
        {
            let mut current = self.current_load.lock().expect("load lock");
            if let Some(previous) = current.replace(cancel.clone()) {
                previous.cancel();
            }
        }
        self.queue
            .enqueue(PRIORITY_RELOAD, Job::Reload(cancel.clone()))
            .await;
        cancel
    }

    pub async fn enqueue_task(&self, task: Box<dyn ModelTask + Send>) {
        self.queue.enqueue(PRIORITY_TASK, Job::Task(task)).await;
    }

    /// Cancel any in-flight load, stop the queue, and wait for the worker
    /// to drain. Idempotent.
    pub async fn shutdown(&self) {
        let current = self.current_load.lock().expect("load lock").take();
        if let Some(cancel) = current {
            cancel.cancel();
        }
        self.queue.stop();
        let handle = self.worker.lock().expect("worker lock").take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(%err, "worker join failed");
            }
        }
    }
}

/// The single consumer of the job queue. Reloads and tasks run strictly
/// serially here; nothing else ever mutates the model.
async fn worker_loop(ctx: Arc<ShellContext>, queue: JobQueue) {
    while let Some(job) = queue.dequeue().await {
        match job {
            Job::Reload(cancel) => {
                if cancel.is_cancelled() {
                    cancel.finish();
                    continue;
                }
                let load = LoaderTask::new(ctx.clone(), cancel.clone());
                match load.run().await {
                    Ok(LoadOutcome::Committed { epoch }) => {
                        tracing::info!(epoch, "load committed");
                    }
                    Ok(LoadOutcome::Cancelled) => {
                        tracing::info!("load cancelled");
                    }
                    Err(err) => {
                        tracing::error!(%err, "load failed");
                    }
                }
                cancel.finish();
            }
            Job::Task(task) => {
                let name = task.name();
                match task.execute(&ctx) {
                    Ok(()) => {
                        ctx.bus
                            .publish(topics::TOPIC_TASK_COMPLETED, &json!({"task": name}));
                    }
                    Err(err) => {
                        tracing::error!(task = name, %err, "model task failed");
                    }
                }
            }
        }
    }
}

/// Bring a persisted layout forward across a grid dimension change. First
/// mismatch attempts an in-place migration; a failed or repeated attempt
/// resets the store to an empty layout rather than looping.
fn reconcile_grid_change(store: &LayoutStore, grid: &GridSpec, bus: &Bus) -> Result<()> {
    let persisted = match store.grid_spec()? {
        None => {
            store.set_grid_spec(grid)?;
            return Ok(());
        }
        Some(p) if p == *grid => return Ok(()),
        Some(p) => p,
    };

    if store.migration_attempted(&persisted, grid)? {
        tracing::warn!(
            ?persisted,
            to = ?grid,
            "grid migration already attempted; resetting layout"
        );
        store.reset()?;
        store.set_grid_spec(grid)?;
        bus.publish(topics::TOPIC_STORE_RESET, &json!({"reason": "migration_retry"}));
        return Ok(());
    }

    match store.migrate(&persisted, grid) {
        Ok(report) => {
            tracing::info!(kept = report.kept, dropped = report.dropped, "grid migrated");
        }
        Err(err) => {
            tracing::warn!(%err, "grid migration failed; resetting layout");
            bus.publish(
                topics::TOPIC_MIGRATION_FAILED,
                &json!({"error": err.to_string()}),
            );
            store.reset()?;
            store.set_grid_spec(grid)?;
            bus.publish(topics::TOPIC_STORE_RESET, &json!({"reason": "migration_failed"}));
        }
    }
    Ok(())
}
