use std::{
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
};

use parking_lot::{Condvar, Mutex};

use crate::{
    Exception, Fiber, Gil, Globals, InstanceCreateInfo, Pool, Task, Value, gil::GIL,
    task::Settled,
};

/// Shared state of an instance: the pools and the bookkeeping of
/// background tasks. Every runtime locks the same process-wide GIL.
pub struct Runtime {
    pub(crate) gil: &'static Gil,
    pub(crate) pool: Pool,
    pub(crate) settled: Settled,
    pub(crate) max_depth: usize,
    activity: Activity,
    /// Globals of dropped instances, kept until no task can reach them.
    retired: Mutex<Vec<Globals>>,
    task_stack_size: Option<usize>,
    next_fiber: AtomicU64,
    next_task: AtomicU64,
}

impl Runtime {
    pub(crate) fn new(info: &InstanceCreateInfo) -> Arc<Self> {
        Arc::new(Self {
            gil: &GIL,
            pool: Pool::new(info.pool),
            settled: Settled::default(),
            max_depth: info.max_depth,
            activity: Activity::default(),
            retired: Mutex::new(Vec::new()),
            task_stack_size: info.task_stack_size,
            next_fiber: AtomicU64::new(0),
            next_task: AtomicU64::new(0),
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Takes a fiber from the pool. The GIL must be held while it runs.
    pub(crate) fn fiber(self: &Arc<Self>) -> Fiber {
        let id = self.next_fiber.fetch_add(1, Ordering::Relaxed);
        Fiber::new(id, self.pool.stack(), Arc::clone(self))
    }

    pub(crate) fn retire(&self, fiber: Fiber) {
        log::trace!("retiring fiber #{}", fiber.id());
        self.pool.retire_stack(fiber.into_stack());
    }

    /// Starts `callee(args)` on a new thread and returns its task handle.
    pub(crate) fn spawn(self: &Arc<Self>, callee: Value, args: Vec<Value>) -> Result<Arc<Task>, Exception> {
        let task = Arc::new(Task::new(self.next_task.fetch_add(1, Ordering::Relaxed)));
        let active = Active::enter(Arc::clone(self));
        let runtime = Arc::clone(self);
        let handle = Arc::clone(&task);

        let mut builder = thread::Builder::new().name(format!("weft-task-{}", task.id()));
        if let Some(size) = self.task_stack_size {
            builder = builder.stack_size(size);
        }
        builder
            .spawn(move || {
                let outcome = runtime.run_task(&callee, args);
                drop(callee);
                handle.settle(outcome);
                runtime.settled.notify();
                drop(active);
                runtime.release_globals();
            })
            .map_err(|e| Exception::runtime(format!("failed to start task: {e}")))?;

        log::trace!("spawned task #{}", task.id());
        Ok(task)
    }

    fn run_task(self: &Arc<Self>, callee: &Value, args: Vec<Value>) -> Result<Value, Exception> {
        let _gil = self.gil.acquire();
        let mut fiber = self.fiber();
        match panic::catch_unwind(AssertUnwindSafe(|| fiber.call_value(callee, args))) {
            Ok(outcome) => {
                self.retire(fiber);
                outcome
            }
            Err(_) => {
                log::warn!("task on fiber #{} panicked", fiber.id());
                Err(Exception::runtime("task panicked"))
            }
        }
    }

    /// Number of spawned tasks that have not settled yet.
    pub fn active_tasks(&self) -> usize {
        *self.activity.count.lock()
    }

    /// Blocks until every spawned task has settled. Must be called without
    /// holding the GIL.
    pub fn wait_for_no_activity(&self) {
        let mut count = self.activity.count.lock();
        while *count > 0 {
            self.activity.idle.wait(&mut count);
        }
    }

    /// Takes over the globals of a dropped instance. They are cleared once
    /// every task has settled. Must be called without holding the GIL.
    pub(crate) fn retire_globals(&self, globals: Globals) {
        self.retired.lock().push(globals);
        self.release_globals();
    }

    fn release_globals(&self) {
        let retired = {
            let count = self.activity.count.lock();
            if *count > 0 {
                return;
            }
            mem::take(&mut *self.retired.lock())
        };
        if retired.is_empty() {
            return;
        }
        let _gil = self.gil.acquire();
        for globals in &retired {
            globals.clear_values();
        }
        log::debug!("released {} retired global table(s)", retired.len());
        drop(retired);
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("gil", &self.gil)
            .field("pool", &self.pool)
            .field("max_depth", &self.max_depth)
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Activity {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Marks one task in flight until dropped.
struct Active(Arc<Runtime>);

impl Active {
    fn enter(runtime: Arc<Runtime>) -> Self {
        *runtime.activity.count.lock() += 1;
        Self(runtime)
    }
}

impl Drop for Active {
    fn drop(&mut self) {
        let activity = &self.0.activity;
        let mut count = activity.count.lock();
        *count -= 1;
        if *count == 0 {
            activity.idle.notify_all();
        }
    }
}
