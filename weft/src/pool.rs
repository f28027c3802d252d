use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;

use crate::{Slot, Value};

#[derive(Debug, Clone, Copy)]
pub struct PoolCreateInfo {
    /// Free cells kept around for reuse.
    pub max_cells: usize,
    /// Idle fiber stacks kept around for reuse.
    pub max_stacks: usize,
    /// Initial capacity of a freshly allocated fiber stack.
    pub stack_capacity: usize,
}

impl Default for PoolCreateInfo {
    fn default() -> Self {
        Self {
            max_cells: 4096,
            max_stacks: 64,
            stack_capacity: 256,
        }
    }
}

/// Recycles value cells and fiber stacks between calls and tasks.
///
/// A cell is only ever taken back when nothing else holds it, so a cell
/// captured by a closure is never handed out twice.
#[derive(Debug)]
pub struct Pool {
    info: PoolCreateInfo,
    cells: Mutex<Vec<Arc<Slot>>>,
    stacks: Mutex<Vec<Vec<Arc<Slot>>>>,
    reused: AtomicUsize,
}

impl Pool {
    pub fn new(info: PoolCreateInfo) -> Self {
        Self {
            info,
            cells: Mutex::new(Vec::new()),
            stacks: Mutex::new(Vec::new()),
            reused: AtomicUsize::new(0),
        }
    }

    pub(crate) fn cell(&self, value: Value) -> Arc<Slot> {
        let recycled = self.cells.lock().pop();
        match recycled {
            Some(cell) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                cell.set(value);
                cell
            }
            None => Arc::new(Slot::new(value)),
        }
    }

    /// Grows `stack` to `len` with null cells.
    pub(crate) fn extend(&self, stack: &mut Vec<Arc<Slot>>, len: usize) {
        if stack.len() >= len {
            return;
        }
        let mut free = self.cells.lock();
        while stack.len() < len {
            match free.pop() {
                Some(cell) => {
                    self.reused.fetch_add(1, Ordering::Relaxed);
                    stack.push(cell);
                }
                None => stack.push(Arc::new(Slot::new(Value::Null))),
            }
        }
    }

    pub(crate) fn recycle(&self, cells: impl IntoIterator<Item = Arc<Slot>>) {
        let mut free = self.cells.lock();
        for cell in cells {
            if free.len() >= self.info.max_cells || Arc::strong_count(&cell) != 1 {
                continue;
            }
            cell.set(Value::Null);
            free.push(cell);
        }
    }

    pub(crate) fn stack(&self) -> Vec<Arc<Slot>> {
        self.stacks
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.info.stack_capacity))
    }

    pub(crate) fn retire_stack(&self, mut stack: Vec<Arc<Slot>>) {
        self.recycle(stack.drain(..));
        let mut stacks = self.stacks.lock();
        if stacks.len() < self.info.max_stacks {
            stacks.push(stack);
        }
    }

    pub fn free_cells(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn idle_stacks(&self) -> usize {
        self.stacks.lock().len()
    }

    /// Number of times a pooled cell was handed out instead of allocated.
    pub fn reused_cells(&self) -> usize {
        self.reused.load(Ordering::Relaxed)
    }
}
