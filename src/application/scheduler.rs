use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

type Registry = Mutex<HashMap<u64, AbortHandle>>;

/// Owns every background task the client spawns so they can be cancelled
/// together on teardown. Tasks deregister themselves when they finish.
#[derive(Debug, Default)]
pub struct TaskScheduler {
    tasks: Arc<Registry>,
    next_id: AtomicU64,
}

#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    abort: AbortHandle,
    registry: Weak<Registry>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    pub fn cancel(&self) {
        self.abort.abort();
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(&self.id);
        }
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<u64, AbortHandle>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `tick` every `period`, first after one full period. The callback
    /// receives the 1-based tick count and stops the task by returning
    /// `ControlFlow::Break`.
    pub fn spawn_periodic<F>(&self, period: Duration, mut tick: F) -> TaskHandle
    where
        F: FnMut(u64) -> ControlFlow<()> + Send + 'static,
    {
        self.spawn_registered(move || async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut count = 0u64;
            loop {
                ticker.tick().await;
                count += 1;
                if tick(count).is_break() {
                    break;
                }
            }
        })
    }

    pub fn spawn_once<Fut>(&self, future: Fut) -> TaskHandle
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_registered(move || future)
    }

    fn spawn_registered<M, Fut>(&self, make: M) -> TaskHandle
    where
        M: FnOnce() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let registry = Arc::downgrade(&self.tasks);
        let task_registry = registry.clone();
        let future = make();

        // Held across spawn so a task that finishes immediately cannot
        // deregister before it is registered.
        let mut tasks = lock(&self.tasks);
        let join = tokio::spawn(async move {
            future.await;
            if let Some(registry) = task_registry.upgrade() {
                lock(&registry).remove(&id);
            }
        });
        let abort = join.abort_handle();
        tasks.insert(id, abort.clone());
        drop(tasks);

        TaskHandle {
            id,
            abort,
            registry,
        }
    }

    pub fn active_tasks(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn shutdown(&self) {
        let drained: Vec<AbortHandle> = lock(&self.tasks).drain().map(|(_, abort)| abort).collect();
        if !drained.is_empty() {
            tracing::debug!(tasks = drained.len(), "cancelling background tasks");
        }
        for abort in drained {
            abort.abort();
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
