use std::{mem, sync::Arc};

use parking_lot::Mutex;

use crate::{
    Compiler, Error, Globals, NativeFn, PoolCreateInfo, Runtime, Value, ast::Node,
    scope::GlobalKind,
};

#[derive(Debug, Clone)]
pub struct InstanceCreateInfo {
    /// Values bound in the root scope before any unit is compiled.
    pub builtins: Vec<(String, Value)>,
    pub optimize: bool,
    /// Deepest call nesting before a stack overflow error is raised.
    pub max_depth: usize,
    /// Native stack size of task threads, the platform default if `None`.
    pub task_stack_size: Option<usize>,
    pub pool: PoolCreateInfo,
}

impl Default for InstanceCreateInfo {
    fn default() -> Self {
        Self {
            builtins: Vec::new(),
            optimize: true,
            max_depth: 10_000,
            task_stack_size: None,
            pool: PoolCreateInfo::default(),
        }
    }
}

impl InstanceCreateInfo {
    #[must_use]
    pub fn with_builtin(mut self, name: impl Into<String>, value: Value) -> Self {
        self.builtins.push((name.into(), value));
        self
    }

    /// Binds a native function under its own name.
    #[must_use]
    pub fn with_native(self, native: NativeFn) -> Self {
        let name = native.name().to_string();
        self.with_builtin(name, Value::native_fn(native))
    }

    #[must_use]
    pub fn with_natives(self, natives: impl IntoIterator<Item = NativeFn>) -> Self {
        natives.into_iter().fold(self, Self::with_native)
    }

    /// The default builtins: `print`, `len`, `str`, `type_of`, `array`
    /// and `sleep`.
    #[must_use]
    pub fn with_defaults(self) -> Self {
        self.with_natives(crate::builtin::defaults())
    }
}

/// An embedded interpreter.
///
/// Globals persist across evaluated units. Every entry point takes the GIL
/// for as long as language code runs on the calling thread, so none of them
/// may be called from inside a native function. The same holds for
/// dropping an instance.
pub struct Instance {
    runtime: Arc<Runtime>,
    globals: Mutex<Globals>,
    optimize: bool,
}

impl Instance {
    pub fn new(info: InstanceCreateInfo) -> Result<Self, Error> {
        let mut globals = Globals::default();
        for (name, value) in &info.builtins {
            globals
                .declare(name, GlobalKind::Builtin(value.clone()), true)
                .map_err(|_| Error::DuplicateBuiltin(name.clone()))?;
        }
        log::debug!(
            "instance created with {} builtin(s), optimize: {}",
            globals.len(),
            info.optimize
        );
        Ok(Self {
            runtime: Runtime::new(&info),
            globals: Mutex::new(globals),
            optimize: info.optimize,
        })
    }

    pub fn optimize(&self) -> bool {
        self.optimize
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Compiles and runs one unit, returning the value of its last
    /// statement.
    pub fn evaluate(&self, unit: &Node) -> Result<Value, Error> {
        let _gil = self.runtime.gil.acquire();
        let code = {
            let mut globals = self.globals.lock();
            Compiler::new(&mut globals, self.optimize).compile_unit(unit)?
        };
        let mut fiber = self.runtime.fiber();
        let result = fiber.run_unit(&code);
        self.runtime.retire(fiber);
        Ok(result?)
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        let _gil = self.runtime.gil.acquire();
        self.globals.lock().value(name)
    }

    /// Calls a function value with already evaluated arguments.
    pub fn call(&self, callee: &Value, args: Vec<Value>) -> Result<Value, Error> {
        let _gil = self.runtime.gil.acquire();
        let mut fiber = self.runtime.fiber();
        let result = fiber.call_value(callee, args);
        self.runtime.retire(fiber);
        Ok(result?)
    }

    /// Calls the global function `main`.
    pub fn call_main(&self, args: Vec<Value>) -> Result<Value, Error> {
        let main = self
            .get_global("main")
            .ok_or_else(|| Error::EntryPointNotFound("main".into()))?;
        self.call(&main, args)
    }

    /// Blocks until every task started with `go` has finished.
    pub fn wait_for_no_activity(&self) {
        self.runtime.wait_for_no_activity();
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // functions stored in globals reference the globals they read, so
        // the slots are cleared to break those cycles; tasks still running
        // keep them alive until they settle
        let globals = mem::take(self.globals.get_mut());
        self.runtime.retire_globals(globals);
    }
}
