use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::loader::CancelFlag;
use crate::tasks::ModelTask;

/// A reload supersedes accumulated incremental deltas, so it jumps ahead of
/// queued tasks.
pub const PRIORITY_RELOAD: i32 = -10;
pub const PRIORITY_TASK: i32 = 0;

pub enum Job {
    Reload(Arc<CancelFlag>),
    Task(Box<dyn ModelTask + Send>),
}

/// FIFO lanes keyed by priority; the lowest key drains first. One consumer
/// (the background worker) executes jobs strictly serially.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    lanes: Mutex<BTreeMap<i32, VecDeque<Job>>>,
    notify: Notify,
    stopped: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                lanes: Mutex::new(BTreeMap::new()),
                notify: Notify::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub async fn enqueue(&self, priority: i32, job: Job) {
        {
            let mut lanes = self.inner.lanes.lock().await;
            lanes.entry(priority).or_insert_with(VecDeque::new).push_back(job);
        }
        self.inner.notify.notify_one();
    }

    /// Next job in priority-then-FIFO order; `None` once the queue has been
    /// stopped and drained of nothing further.
    pub async fn dequeue(&self) -> Option<Job> {
        loop {
            if self.inner.stopped.load(Ordering::SeqCst) {
                return None;
            }
            let job = {
                let mut lanes = self.inner.lanes.lock().await;
                let mut selected = None;
                let mut empty_key = None;
                for (priority, lane) in lanes.iter_mut() {
                    if let Some(job) = lane.pop_front() {
                        if lane.is_empty() {
                            empty_key = Some(*priority);
                        }
                        selected = Some(job);
                        break;
                    }
                }
                if let Some(key) = empty_key {
                    lanes.remove(&key);
                }
                selected
            };
            if let Some(job) = job {
                return Some(job);
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShellContext;

    struct NamedTask(&'static str);

    impl ModelTask for NamedTask {
        fn name(&self) -> &'static str {
            self.0
        }
        fn execute(&self, _ctx: &ShellContext) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn task(name: &'static str) -> Job {
        Job::Task(Box::new(NamedTask(name)))
    }

    fn job_name(job: &Job) -> &'static str {
        match job {
            Job::Reload(_) => "reload",
            Job::Task(t) => t.name(),
        }
    }

    #[tokio::test]
    async fn reload_jumps_ahead_of_queued_tasks() {
        let queue = JobQueue::new();
        queue.enqueue(PRIORITY_TASK, task("first")).await;
        queue.enqueue(PRIORITY_TASK, task("second")).await;
        queue
            .enqueue(PRIORITY_RELOAD, Job::Reload(CancelFlag::new()))
            .await;

        let order: Vec<&str> = [
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
            queue.dequeue().await.unwrap(),
        ]
        .iter()
        .map(job_name)
        .collect();
        assert_eq!(order, vec!["reload", "first", "second"]);
    }

    #[tokio::test]
    async fn same_priority_preserves_fifo_order() {
        let queue = JobQueue::new();
        for name in ["a", "b", "c"] {
            queue.enqueue(PRIORITY_TASK, task(name)).await;
        }
        for expected in ["a", "b", "c"] {
            let job = queue.dequeue().await.unwrap();
            assert_eq!(job_name(&job), expected);
        }
    }

    #[tokio::test]
    async fn stop_wakes_a_blocked_consumer() {
        let queue = JobQueue::new();
        let waiter = queue.clone();
        let handle = tokio::spawn(async move { waiter.dequeue().await.is_none() });
        tokio::task::yield_now().await;
        queue.stop();
        assert!(handle.await.unwrap());
    }
}
