//! Compile-time name resolution.
//!
//! Every function being compiled owns a [`FunctionScope`] holding a stack of
//! block tables. A name is looked up innermost first, walking outward
//! through enclosing functions and finally the root (global) table, which
//! persists across compilation units.
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use crate::{Capture, CompileError, FuncInfo, Slot, UserFn, Value};

/// `scroll` value of a root binding.
pub const ROOT: isize = -1;

/// Where a name was found: `scroll` counts function frames outward from
/// the current one, or is [`ROOT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingRef {
    pub index: usize,
    pub scroll: isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Var,
    Function,
}

#[derive(Debug)]
pub enum GlobalKind {
    Builtin(Value),
    Var,
    /// A top-level function; its value is fixed at compile time.
    Function(Arc<UserFn>),
}

#[derive(Debug)]
pub struct Global {
    pub name: String,
    pub(crate) slot: Arc<Slot>,
    pub kind: GlobalKind,
    pub initialized: bool,
}

/// The root table.
#[derive(Debug, Default)]
pub struct Globals {
    entries: Vec<Global>,
    by_name: HashMap<String, usize>,
}

impl Globals {
    pub fn declare(
        &mut self,
        name: &str,
        kind: GlobalKind,
        initialized: bool,
    ) -> Result<usize, CompileError> {
        if self.by_name.contains_key(name) {
            return Err(CompileError::DoubleDeclaration { name: name.into() });
        }
        let value = match &kind {
            GlobalKind::Builtin(value) => value.clone(),
            GlobalKind::Function(f) => Value::UserFn(Arc::clone(f)),
            GlobalKind::Var => Value::Null,
        };
        let index = self.entries.len();
        self.entries.push(Global {
            name: name.into(),
            slot: Arc::new(Slot::new(value)),
            kind,
            initialized,
        });
        self.by_name.insert(name.into(), index);
        Ok(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, index: usize) -> Option<&Global> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current value of a global. The GIL must be held.
    pub(crate) fn value(&self, name: &str) -> Option<Value> {
        self.index_of(name).map(|i| self.entries[i].slot.get())
    }

    /// Drops every entry declared at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        for global in self.entries.drain(len..) {
            self.by_name.remove(&global.name);
        }
    }

    /// Resets every slot to null. The GIL must be held.
    pub(crate) fn clear_values(&self) {
        for global in &self.entries {
            global.slot.set(Value::Null);
        }
    }

    fn mark_initialized(&mut self, index: usize) {
        if let Some(global) = self.entries.get_mut(index) {
            global.initialized = true;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Local {
    index: usize,
    kind: BindingKind,
}

#[derive(Debug)]
struct BlockTable {
    names: HashMap<String, Local>,
    start: usize,
}

/// Binding site of a declared function, used to recognize self-calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Root(usize),
    Frame { depth: usize, index: usize },
}

#[derive(Debug)]
struct FunctionScope {
    info: Arc<FuncInfo>,
    site: Option<Site>,
    unit: bool,
    blocks: Vec<BlockTable>,
    next: usize,
    high_water: usize,
    escaped: BTreeSet<usize>,
    captures: Vec<Capture>,
    capture_ids: HashMap<(usize, usize), usize>,
}

impl FunctionScope {
    fn new(info: Arc<FuncInfo>, site: Option<Site>, unit: bool) -> Self {
        Self {
            info,
            site,
            unit,
            blocks: vec![BlockTable {
                names: HashMap::new(),
                start: 0,
            }],
            next: 0,
            high_water: 0,
            escaped: BTreeSet::new(),
            captures: Vec::new(),
            capture_ids: HashMap::new(),
        }
    }

    fn find(&self, name: &str) -> Option<Local> {
        self.blocks
            .iter()
            .rev()
            .find_map(|block| block.names.get(name).copied())
    }
}

/// How compiled code reaches a resolved name.
#[derive(Debug)]
pub(crate) enum Access {
    Builtin(Value),
    Global(Arc<Slot>),
    Local(usize),
    Capture(usize),
}

#[derive(Debug)]
pub(crate) struct Resolved {
    pub(crate) access: Access,
    pub(crate) mutable: bool,
}

pub(crate) enum Declared {
    Global(Arc<Slot>),
    Local(usize),
}

/// Frame shape of a closed function scope.
#[derive(Debug)]
pub struct Closed {
    pub captures: Vec<Capture>,
    pub recyclable: Vec<usize>,
    pub capacity: usize,
}

pub(crate) struct Resolver<'g> {
    globals: &'g mut Globals,
    frames: Vec<FunctionScope>,
    mark: usize,
}

impl<'g> Resolver<'g> {
    pub fn new(globals: &'g mut Globals) -> Self {
        let mark = globals.len();
        Self {
            globals,
            frames: Vec::new(),
            mark,
        }
    }

    pub fn globals(&self) -> &Globals {
        self.globals
    }

    /// Forgets every global declared since this resolver was created.
    pub fn rollback(&mut self) {
        self.globals.truncate(self.mark);
    }

    fn current(&self) -> &FunctionScope {
        &self.frames[self.frames.len() - 1]
    }

    fn current_mut(&mut self) -> &mut FunctionScope {
        let top = self.frames.len() - 1;
        &mut self.frames[top]
    }

    pub fn current_info(&self) -> &Arc<FuncInfo> {
        &self.current().info
    }

    /// True directly inside the outermost block of a unit, where
    /// declarations bind globals.
    pub fn at_top_level(&self) -> bool {
        let frame = self.current();
        frame.unit && frame.blocks.len() == 1
    }

    pub fn open_unit(&mut self, info: Arc<FuncInfo>) {
        self.frames.push(FunctionScope::new(info, None, true));
    }

    pub fn open_function(&mut self, info: Arc<FuncInfo>, site: Option<Site>) {
        self.frames.push(FunctionScope::new(info, site, false));
    }

    pub fn close_function(&mut self) -> Closed {
        let Some(frame) = self.frames.pop() else {
            return Closed {
                captures: Vec::new(),
                recyclable: Vec::new(),
                capacity: 0,
            };
        };
        let capacity = frame.high_water.max(frame.next);
        let recyclable = (0..capacity)
            .filter(|i| !frame.escaped.contains(i))
            .collect();
        Closed {
            captures: frame.captures,
            recyclable,
            capacity,
        }
    }

    pub fn open_block(&mut self) {
        let frame = self.current_mut();
        let start = frame.next;
        frame.blocks.push(BlockTable {
            names: HashMap::new(),
            start,
        });
    }

    /// Pops a block. Its slots stay allocated.
    pub fn close_block(&mut self) {
        let frame = self.current_mut();
        if frame.blocks.len() > 1 {
            frame.blocks.pop();
        }
    }

    /// Empties the current block and hands its slots to a sibling branch.
    pub fn reuse_block(&mut self) {
        let frame = self.current_mut();
        frame.high_water = frame.high_water.max(frame.next);
        if let Some(block) = frame.blocks.last_mut() {
            block.names.clear();
            frame.next = block.start;
        }
    }

    /// Declares a top-level name of the unit ahead of compiling it.
    pub fn hoist(&mut self, name: &str, kind: GlobalKind) -> Result<usize, CompileError> {
        let initialized = matches!(kind, GlobalKind::Function(_));
        self.globals.declare(name, kind, initialized)
    }

    pub fn declare(&mut self, name: &str, kind: BindingKind) -> Result<Declared, CompileError> {
        if self.at_top_level() {
            let index = match self.globals.index_of(name) {
                Some(index) if index >= self.mark => index,
                _ => self.globals.declare(name, GlobalKind::Var, false)?,
            };
            self.globals.mark_initialized(index);
            let slot = Arc::clone(&self.globals.entries[index].slot);
            return Ok(Declared::Global(slot));
        }

        let frame = self.current_mut();
        let index = frame.next;
        let Some(block) = frame.blocks.last_mut() else {
            return Err(CompileError::Unreachable { name: name.into() });
        };
        if block.names.contains_key(name) {
            return Err(CompileError::DoubleDeclaration { name: name.into() });
        }
        block.names.insert(name.into(), Local { index, kind });
        frame.next += 1;
        frame.high_water = frame.high_water.max(frame.next);
        Ok(Declared::Local(index))
    }

    fn find(&self, name: &str) -> Option<(BindingRef, BindingKind)> {
        for (scroll, frame) in self.frames.iter().rev().enumerate() {
            if let Some(local) = frame.find(name) {
                let binding = BindingRef {
                    index: local.index,
                    scroll: scroll as isize,
                };
                return Some((binding, local.kind));
            }
        }
        let index = self.globals.index_of(name)?;
        let kind = match self.globals.entries[index].kind {
            GlobalKind::Var => BindingKind::Var,
            GlobalKind::Builtin(_) | GlobalKind::Function(_) => BindingKind::Function,
        };
        Some((BindingRef { index, scroll: ROOT }, kind))
    }

    /// Finds `name` without side effects.
    pub fn lookup(&self, name: &str) -> Option<BindingRef> {
        self.find(name).map(|(binding, _)| binding)
    }

    /// Finds `name` and marks it escaping when it belongs to an enclosing
    /// function.
    pub fn reach(&mut self, name: &str) -> Option<(BindingRef, BindingKind)> {
        let (binding, kind) = self.find(name)?;
        if binding.scroll > 0 {
            let owner = self.frames.len() - 1 - binding.scroll as usize;
            self.frames[owner].escaped.insert(binding.index);
        }
        Some((binding, kind))
    }

    pub fn resolve(&mut self, name: &str) -> Result<Resolved, CompileError> {
        let Some((binding, kind)) = self.reach(name) else {
            return Err(CompileError::Unreachable { name: name.into() });
        };
        let mutable = kind == BindingKind::Var;
        let access = match binding.scroll {
            ROOT => {
                let global = &self.globals.entries[binding.index];
                if !global.initialized && self.current().unit {
                    return Err(CompileError::Uninitialized { name: name.into() });
                }
                match &global.kind {
                    GlobalKind::Builtin(value) => Access::Builtin(value.clone()),
                    _ => Access::Global(Arc::clone(&global.slot)),
                }
            }
            0 => Access::Local(binding.index),
            scroll => {
                let top = self.frames.len() - 1;
                let owner = top - scroll as usize;
                Access::Capture(self.capture(top, owner, binding.index))
            }
        };
        Ok(Resolved { access, mutable })
    }

    /// Capture index in frame `at` of slot `index` owned by frame `owner`,
    /// threading it through every frame in between.
    fn capture(&mut self, at: usize, owner: usize, index: usize) -> usize {
        if let Some(&id) = self.frames[at].capture_ids.get(&(owner, index)) {
            return id;
        }
        let capture = if at - 1 == owner {
            Capture::Local(index)
        } else {
            Capture::Outer(self.capture(at - 1, owner, index))
        };
        let frame = &mut self.frames[at];
        let id = frame.captures.len();
        frame.captures.push(capture);
        frame.capture_ids.insert((owner, index), id);
        id
    }

    /// Site a local function declaration at `index` binds in the current
    /// frame.
    pub fn local_site(&self, index: usize) -> Site {
        Site::Frame {
            depth: self.frames.len() - 1,
            index,
        }
    }

    /// True when `name` refers to the function currently being compiled.
    pub fn is_self_call(&self, name: &str) -> bool {
        let Some(own) = self.current().site else {
            return false;
        };
        let top = self.frames.len() - 1;
        match self.find(name) {
            Some((binding, BindingKind::Function)) => {
                let site = match binding.scroll {
                    ROOT => Site::Root(binding.index),
                    scroll => Site::Frame {
                        depth: top - scroll as usize,
                        index: binding.index,
                    },
                };
                site == own
            }
            _ => false,
        }
    }

    /// The top-level function `name` is statically bound to, if any.
    pub fn static_function(&self, name: &str) -> Option<Arc<UserFn>> {
        let binding = self.lookup(name)?;
        if binding.scroll != ROOT {
            return None;
        }
        match &self.globals.entries[binding.index].kind {
            GlobalKind::Function(f) => Some(Arc::clone(f)),
            _ => None,
        }
    }
}
