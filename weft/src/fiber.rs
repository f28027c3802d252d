//! Fiber: the execution context of compiled code.
//!
//! A fiber owns a stack of value cells. Each call occupies a window of that
//! stack starting at `base`; compiled code addresses locals relative to it.
//! Calls run on the native stack through the compiled closures, so deep
//! recursion grows the native stack on demand.
use std::{fmt, mem, sync::Arc};

use crate::{
    Exception, NativeFn, Runtime, Slot, Task, UserFn, Value,
    task::{wait_all, wait_any},
};

const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Non-local exit out of compiled code.
#[derive(Debug)]
pub enum Signal {
    /// `return` unwinding to the innermost call boundary.
    Return(Value),
    Raise(Box<Exception>),
}

impl From<Exception> for Signal {
    fn from(exception: Exception) -> Self {
        Signal::Raise(Box::new(exception))
    }
}

pub type Flow = Result<Value, Signal>;

/// A compiled node.
pub type Code = Box<dyn Fn(&mut Fiber) -> Flow + Send + Sync>;

/// What a call evaluates to when its body finishes without `return`.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Fallthrough {
    Null,
    LastValue,
}

pub struct Fiber {
    id: u64,
    stack: Vec<Arc<Slot>>,
    base: usize,
    depth: usize,
    current: Option<Arc<UserFn>>,
    runtime: Arc<Runtime>,
}

impl Fiber {
    pub(crate) fn new(id: u64, stack: Vec<Arc<Slot>>, runtime: Arc<Runtime>) -> Self {
        Self {
            id,
            stack,
            base: 0,
            depth: 0,
            current: None,
            runtime,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub(crate) fn into_stack(self) -> Vec<Arc<Slot>> {
        self.stack
    }

    /// The function whose frame is on top.
    #[inline]
    pub(crate) fn current(&self) -> Option<&Arc<UserFn>> {
        self.current.as_ref()
    }

    #[inline]
    pub(crate) fn local(&self, index: usize) -> Value {
        self.stack[self.base + index].get()
    }

    #[inline]
    pub(crate) fn set_local(&self, index: usize, value: Value) {
        self.stack[self.base + index].set(value);
    }

    /// Binds a fresh variable. A cell still referenced by a closure is left
    /// to that closure and replaced, so every declaration gets its own cell.
    pub(crate) fn declare_local(&mut self, index: usize, value: Value) {
        let cell = &mut self.stack[self.base + index];
        if Arc::strong_count(cell) > 1 {
            *cell = Arc::new(Slot::new(value));
        } else {
            cell.set(value);
        }
    }

    pub(crate) fn local_cell(&self, index: usize) -> Arc<Slot> {
        Arc::clone(&self.stack[self.base + index])
    }

    pub(crate) fn captured_cell(&self, index: usize) -> Result<&Arc<Slot>, Exception> {
        self.current
            .as_ref()
            .and_then(|f| f.capture(index))
            .ok_or_else(|| Exception::runtime(format!("missing captured variable #{index}")))
    }

    #[inline]
    pub(crate) fn captured(&self, index: usize) -> Result<Value, Exception> {
        self.captured_cell(index).map(|cell| cell.get())
    }

    pub(crate) fn set_captured(&self, index: usize, value: Value) -> Result<(), Exception> {
        self.captured_cell(index).map(|cell| cell.set(value))
    }

    /// Runs `f` with the GIL released. `f` must not touch any value cell.
    pub fn without_gil<T>(&self, f: impl FnOnce() -> T) -> T {
        // SAFETY: a fiber only runs on the thread that holds the GIL
        unsafe { self.runtime.gil.released(f) }
    }

    fn push_argument(&mut self, value: Value) {
        let cell = self.runtime.pool.cell(value);
        self.stack.push(cell);
    }

    fn unwind_to(&mut self, start: usize) {
        let pool = &self.runtime.pool;
        pool.recycle(self.stack.drain(start..));
    }

    /// Evaluates `args` into a new frame and calls `callee`. Arity must
    /// already match.
    pub(crate) fn call_compiled(&mut self, callee: &Arc<UserFn>, args: &[Code]) -> Flow {
        let start = self.stack.len();
        for arg in args {
            match arg(self) {
                Ok(value) => self.push_argument(value),
                Err(signal) => {
                    self.unwind_to(start);
                    return Err(signal);
                }
            }
        }
        Ok(self.enter(callee, start, Fallthrough::Null)?)
    }

    pub fn call_user_fn(&mut self, callee: &Arc<UserFn>, args: Vec<Value>) -> Result<Value, Exception> {
        if args.len() != callee.arity() {
            return Err(Exception::arity(callee.name(), callee.arity(), args.len()));
        }
        let start = self.stack.len();
        for arg in args {
            self.push_argument(arg);
        }
        self.enter(callee, start, Fallthrough::Null)
    }

    pub(crate) fn call_native(&mut self, native: &NativeFn, args: Vec<Value>) -> Result<Value, Exception> {
        let mut result = if native.is_blocking() {
            self.without_gil(|| native.invoke(args))
        } else {
            native.invoke(args)
        };
        if let Err(e) = &mut result {
            e.unwound_through(native.name());
        }
        result
    }

    /// Calls any callable value.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, Exception> {
        match callee {
            Value::UserFn(f) => self.call_user_fn(f, args),
            Value::NativeFn(native) => self.call_native(native, args),
            other => Err(Exception::not_callable(other.type_name())),
        }
    }

    /// Runs a compiled unit; it evaluates to its last statement.
    pub(crate) fn run_unit(&mut self, unit: &Arc<UserFn>) -> Result<Value, Exception> {
        let start = self.stack.len();
        self.enter(unit, start, Fallthrough::LastValue)
    }

    fn enter(
        &mut self,
        callee: &Arc<UserFn>,
        start: usize,
        fallthrough: Fallthrough,
    ) -> Result<Value, Exception> {
        let info = callee.info();
        let Some(layout) = info.layout() else {
            self.unwind_to(start);
            return Err(Exception::runtime(format!(
                "function `{}` is not compiled",
                info.display_name()
            )));
        };
        if self.depth >= self.runtime.max_depth {
            self.unwind_to(start);
            return Err(Exception::stack_overflow(self.runtime.max_depth));
        }

        self.runtime.pool.extend(&mut self.stack, start + layout.capacity);
        let saved_base = mem::replace(&mut self.base, start);
        let saved_current = self.current.replace(Arc::clone(callee));
        self.depth += 1;

        let flow = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || (layout.body)(self));

        self.depth -= 1;
        self.release(start, &layout.recyclable_mask);
        self.base = saved_base;
        self.current = saved_current;

        match flow {
            Ok(value) if fallthrough == Fallthrough::LastValue => Ok(value),
            Ok(_) => Ok(Value::Null),
            Err(Signal::Return(value)) => Ok(value),
            Err(Signal::Raise(mut e)) => {
                e.unwound_through(info.display_name());
                Err(*e)
            }
        }
    }

    /// Pops a frame. Cells the layout marks recyclable go back to the pool,
    /// all others are dropped.
    fn release(&mut self, start: usize, recyclable: &[bool]) {
        let pool = &self.runtime.pool;
        let frame = self.stack.drain(start..).enumerate();
        pool.recycle(frame.filter_map(|(i, cell)| {
            recyclable.get(i).copied().unwrap_or(false).then_some(cell)
        }));
    }

    pub(crate) fn await_task(&self, task: &Task) -> Result<Value, Exception> {
        self.without_gil(|| task.wait())
    }

    pub(crate) fn await_all(&self, tasks: &[Arc<Task>]) -> Result<Value, Exception> {
        self.without_gil(|| wait_all(tasks))
    }

    pub(crate) fn await_any(&self, tasks: &[Arc<Task>]) -> Result<Value, Exception> {
        let settled = &self.runtime.settled;
        self.without_gil(|| wait_any(tasks, settled))
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("stack", &self.stack.len())
            .field("base", &self.base)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}
