use std::{
    cell::UnsafeCell,
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{Code, Error, Instance, Value};

/// Upper bound on declared parameters of a single function.
pub const MAX_PARAMS: usize = 255;

/// A boxed, shared, mutable value cell.
///
/// Locals live in slots on a fiber stack; a slot captured by a closure
/// outlives the frame that created it.
pub(crate) struct Slot(UnsafeCell<Value>);

// SAFETY: slots are only read or written by a thread holding the GIL, which
// serializes every access.
unsafe impl Sync for Slot {}

impl Slot {
    pub(crate) fn new(value: Value) -> Self {
        Self(UnsafeCell::new(value))
    }

    #[inline]
    pub(crate) fn get(&self) -> Value {
        // SAFETY: GIL is held, no reference into the cell outlives this call
        unsafe { (*self.0.get()).clone() }
    }

    #[inline]
    pub(crate) fn set(&self, value: Value) {
        // SAFETY: GIL is held, no reference into the cell outlives this call
        let old = unsafe { std::mem::replace(&mut *self.0.get(), value) };
        drop(old);
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Slot")
    }
}

/// How a closure obtains one of its captured cells when instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// A local slot of the immediately enclosing frame.
    Local(usize),
    /// A capture of the immediately enclosing function.
    Outer(usize),
}

/// Compiled frame shape of a function, published once its body is compiled.
pub struct FrameLayout {
    pub captures: Vec<Capture>,
    pub recyclable: Vec<usize>,
    pub capacity: usize,
    pub(crate) recyclable_mask: Box<[bool]>,
    pub(crate) body: Code,
}

impl FrameLayout {
    pub(crate) fn new(
        captures: Vec<Capture>,
        recyclable: Vec<usize>,
        capacity: usize,
        body: Code,
    ) -> Self {
        let mut mask = vec![false; capacity];
        for &index in &recyclable {
            mask[index] = true;
        }
        Self {
            captures,
            recyclable,
            capacity,
            recyclable_mask: mask.into_boxed_slice(),
            body,
        }
    }

    pub fn is_recyclable(&self, index: usize) -> bool {
        self.recyclable_mask.get(index).copied().unwrap_or(false)
    }
}

impl fmt::Debug for FrameLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLayout")
            .field("captures", &self.captures)
            .field("recyclable", &self.recyclable)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Static descriptor of a function, shared by all of its instantiations.
#[derive(Debug)]
pub struct FuncInfo {
    name: Option<String>,
    params: Vec<String>,
    layout: OnceLock<FrameLayout>,
}

impl FuncInfo {
    pub(crate) fn new(name: Option<String>, params: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            name,
            params,
            layout: OnceLock::new(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn layout(&self) -> Option<&FrameLayout> {
        self.layout.get()
    }

    pub(crate) fn publish(&self, layout: FrameLayout) {
        let published = self.layout.set(layout).is_ok();
        debug_assert!(published, "{} compiled twice", self.display_name());
    }
}

/// A function value: a descriptor plus the cells it captured.
#[derive(Debug)]
pub struct UserFn {
    info: Arc<FuncInfo>,
    captures: Box<[Arc<Slot>]>,
}

impl UserFn {
    pub(crate) fn new(info: Arc<FuncInfo>, captures: Vec<Arc<Slot>>) -> Arc<Self> {
        Arc::new(Self {
            info,
            captures: captures.into_boxed_slice(),
        })
    }

    pub fn info(&self) -> &Arc<FuncInfo> {
        &self.info
    }

    pub fn name(&self) -> Option<&str> {
        self.info.name()
    }

    pub fn arity(&self) -> usize {
        self.info.arity()
    }

    #[inline]
    pub(crate) fn capture(&self, index: usize) -> Option<&Arc<Slot>> {
        self.captures.get(index)
    }

    /// Calls the function from the host. Acquires the GIL, so it must not
    /// be used from inside a native function.
    pub fn call(self: &Arc<Self>, instance: &Instance, args: Vec<Value>) -> Result<Value, Error> {
        instance.call(&Value::UserFn(Arc::clone(self)), args)
    }
}
