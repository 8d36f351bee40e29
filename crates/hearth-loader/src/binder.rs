use std::sync::{Arc, Mutex};

use hearth_events::callbacks::ShellCallbacks;
use hearth_model::CanonicalModel;

/// Dispatches prepared snapshots to registered callback consumers,
/// discarding anything computed under a superseded bind-epoch.
pub struct Binder {
    model: Arc<CanonicalModel>,
    callbacks: Mutex<Vec<Arc<dyn ShellCallbacks>>>,
}

impl Binder {
    pub fn new(model: Arc<CanonicalModel>) -> Self {
        Self {
            model,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, cb: Arc<dyn ShellCallbacks>) {
        let mut cbs = self.callbacks.lock().expect("callbacks lock");
        if !cbs.iter().any(|existing| Arc::ptr_eq(existing, &cb)) {
            cbs.push(cb);
        }
    }

    pub fn unregister(&self, cb: &Arc<dyn ShellCallbacks>) {
        self.callbacks
            .lock()
            .expect("callbacks lock")
            .retain(|existing| !Arc::ptr_eq(existing, cb));
    }

    /// Dispatch to every consumer iff `epoch` is still the current
    /// bind-epoch. Returns false when the dispatch was dropped as stale.
    pub fn publish(&self, epoch: i64, dispatch: impl Fn(&dyn ShellCallbacks)) -> bool {
        let current = self.model.current_epoch();
        if epoch != current {
            tracing::debug!(epoch, current, "dropping stale dispatch");
            return false;
        }
        let cbs = self.callbacks.lock().expect("callbacks lock").clone();
        for cb in cbs {
            dispatch(cb.as_ref());
        }
        true
    }
}
