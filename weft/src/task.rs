use std::{mem, sync::Arc};

use parking_lot::{Condvar, Mutex};

use crate::{Exception, Value};

#[derive(Debug)]
enum TaskState {
    Pending,
    Settled(Result<Value, Exception>),
    Consumed,
}

enum Poll {
    Ready(Result<Value, Exception>),
    Pending,
    Consumed,
}

/// Handle to the result of a `go` call.
///
/// The outcome can be taken exactly once; awaiting it a second time fails
/// with a "finished task" error.
#[derive(Debug)]
pub struct Task {
    id: u64,
    state: Mutex<TaskState>,
    done: Condvar,
}

impl Task {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(TaskState::Pending),
            done: Condvar::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// True once the spawned call returned or raised.
    pub fn is_finished(&self) -> bool {
        !matches!(*self.state.lock(), TaskState::Pending)
    }

    pub(crate) fn settle(&self, outcome: Result<Value, Exception>) {
        let mut state = self.state.lock();
        *state = TaskState::Settled(outcome);
        self.done.notify_all();
    }

    /// Blocks until the task finished and takes its outcome.
    pub(crate) fn wait(&self) -> Result<Value, Exception> {
        let mut state = self.state.lock();
        while matches!(*state, TaskState::Pending) {
            self.done.wait(&mut state);
        }
        match mem::replace(&mut *state, TaskState::Consumed) {
            TaskState::Settled(outcome) => outcome,
            _ => Err(Exception::finished_task()),
        }
    }

    fn poll(&self) -> Poll {
        let mut state = self.state.lock();
        match &*state {
            TaskState::Pending => Poll::Pending,
            TaskState::Consumed => Poll::Consumed,
            TaskState::Settled(_) => match mem::replace(&mut *state, TaskState::Consumed) {
                TaskState::Settled(outcome) => Poll::Ready(outcome),
                _ => Poll::Consumed,
            },
        }
    }
}

/// Runtime-wide broadcast fired whenever any task settles.
#[derive(Debug, Default)]
pub(crate) struct Settled {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl Settled {
    pub(crate) fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    pub(crate) fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.changed.notify_all();
    }

    fn wait_past(&self, seen: u64) {
        let mut generation = self.generation.lock();
        while *generation == seen {
            self.changed.wait(&mut generation);
        }
    }
}

/// Waits for every task and returns their results in order. Fails with the
/// first error by position; every task is consumed either way.
pub(crate) fn wait_all(tasks: &[Arc<Task>]) -> Result<Value, Exception> {
    let outcomes: Vec<_> = tasks.iter().map(|task| task.wait()).collect();
    let values = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;
    Ok(Value::array(values))
}

/// Takes the outcome of the first task found finished, scanning in order.
/// Tasks that were already consumed are skipped; the others stay untouched.
pub(crate) fn wait_any(tasks: &[Arc<Task>], settled: &Settled) -> Result<Value, Exception> {
    if tasks.is_empty() {
        return Err(Exception::runtime("await.any needs at least one task"));
    }
    loop {
        let seen = settled.generation();
        let mut pending = false;
        for task in tasks {
            match task.poll() {
                Poll::Ready(outcome) => return outcome,
                Poll::Pending => pending = true,
                Poll::Consumed => {}
            }
        }
        if !pending {
            return Err(Exception::finished_task());
        }
        settled.wait_past(seen);
    }
}
