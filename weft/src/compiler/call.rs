use std::sync::Arc;

use super::Compiler;
use crate::{
    CompileError, Exception, Fiber, FuncInfo, Signal, UserFn, Value, ast::Node, fiber::Code,
};

impl Compiler<'_> {
    /// Three call paths: a function calling itself, a call of a statically
    /// known top-level function, and the general dynamic call. The first two
    /// are only taken when optimizing.
    pub(super) fn call(&mut self, callee: &Node, args: &[Node]) -> Result<Code, CompileError> {
        if self.optimize {
            if let Node::Ident(name) = callee {
                if self.scopes.is_self_call(name) {
                    let info = Arc::clone(self.scopes.current_info());
                    let args = self.nodes(args)?;
                    return Ok(self_call(&info, args));
                }
                if let Some(target) = self.scopes.static_function(name) {
                    let args = self.nodes(args)?;
                    return Ok(static_call(&target, args));
                }
            }
        }
        let callee = self.node(callee)?;
        let args = self.nodes(args)?;
        Ok(dynamic_call(callee, args))
    }

    pub(super) fn go(&mut self, call: &Node) -> Result<Code, CompileError> {
        let Node::Call { callee, args } = call else {
            return Err(CompileError::GoWithoutCall);
        };
        let callee = self.node(callee)?;
        let args = self.nodes(args)?.into_boxed_slice();
        Ok(Box::new(move |f| {
            let target = callee(f)?;
            let values = evaluate(f, &args)?;
            check_spawnable(&target, values.len())?;
            let task = f.runtime().spawn(target, values)?;
            Ok(Value::Task(task))
        }))
    }
}

fn arity_error(name: Option<&str>, expected: usize, got: usize) -> Code {
    let error = Exception::arity(name, expected, got);
    Box::new(move |_| Err(error.clone().into()))
}

fn self_call(info: &FuncInfo, args: Vec<Code>) -> Code {
    if args.len() != info.arity() {
        return arity_error(info.name(), info.arity(), args.len());
    }
    let args = args.into_boxed_slice();
    Box::new(move |f| {
        let Some(callee) = f.current().cloned() else {
            return Err(Exception::runtime("recursive call outside of its function").into());
        };
        f.call_compiled(&callee, &args)
    })
}

/// The target is held weakly: globals own their functions.
fn static_call(target: &Arc<UserFn>, args: Vec<Code>) -> Code {
    if args.len() != target.arity() {
        return arity_error(target.name(), target.arity(), args.len());
    }
    let target = Arc::downgrade(target);
    let args = args.into_boxed_slice();
    Box::new(move |f| {
        let Some(callee) = target.upgrade() else {
            return Err(Exception::runtime("called function was discarded").into());
        };
        f.call_compiled(&callee, &args)
    })
}

fn dynamic_call(callee: Code, args: Vec<Code>) -> Code {
    let args = args.into_boxed_slice();
    Box::new(move |f| {
        let target = callee(f)?;
        match &target {
            Value::UserFn(function) => {
                if function.arity() != args.len() {
                    let error = Exception::arity(function.name(), function.arity(), args.len());
                    return Err(error.into());
                }
                f.call_compiled(function, &args)
            }
            Value::NativeFn(native) => {
                let values = evaluate(f, &args)?;
                Ok(f.call_native(native, values)?)
            }
            other => Err(Exception::not_callable(other.type_name()).into()),
        }
    })
}

fn evaluate(f: &mut Fiber, args: &[Code]) -> Result<Vec<Value>, Signal> {
    args.iter().map(|arg| arg(f)).collect()
}

fn check_spawnable(target: &Value, argc: usize) -> Result<(), Exception> {
    let (name, arity) = match target {
        Value::UserFn(function) => (function.name(), Some(function.arity())),
        Value::NativeFn(native) => (Some(native.name()), native.arity()),
        other => return Err(Exception::not_callable(other.type_name())),
    };
    match arity {
        Some(expected) if expected != argc => Err(Exception::arity(name, expected, argc)),
        _ => Ok(()),
    }
}
