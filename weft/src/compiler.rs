//! Compiles a syntax tree into a tree of closures.
//!
//! Each node becomes a [`Code`] closure that, given a fiber, evaluates the
//! node. Names are resolved once at compile time into direct slot accesses,
//! so running code never looks anything up by name.
use std::{slice, sync::Arc};

use crate::{
    CompileError, Exception, FrameLayout, FuncInfo, Globals, Signal, Task, UserFn, Value,
    ast::{Function, Literal, Node},
    fiber::Code,
    scope::{Access, BindingKind, Declared, GlobalKind, Resolver},
};

mod call;
mod function;
mod ops;

pub use ops::binary;

pub struct Compiler<'g> {
    scopes: Resolver<'g>,
    optimize: bool,
}

#[derive(Clone, Copy)]
enum AwaitMode {
    All,
    Any,
}

impl<'g> Compiler<'g> {
    /// `optimize` enables the direct call paths and operator
    /// specialization; the observable behavior is the same either way.
    pub fn new(globals: &'g mut Globals, optimize: bool) -> Self {
        Self {
            scopes: Resolver::new(globals),
            optimize,
        }
    }

    /// Compiles a unit into a function of no arguments. On failure every
    /// global the unit declared is forgotten again.
    pub fn compile_unit(mut self, unit: &Node) -> Result<Arc<UserFn>, CompileError> {
        let result = self.unit(unit);
        if result.is_err() {
            self.scopes.rollback();
        }
        result
    }

    fn unit(&mut self, unit: &Node) -> Result<Arc<UserFn>, CompileError> {
        let statements = match unit {
            Node::Block(statements) => statements.as_slice(),
            other => slice::from_ref(other),
        };
        let info = FuncInfo::new(Some("<unit>".into()), Vec::new());
        self.scopes.open_unit(Arc::clone(&info));
        self.hoist(statements)?;
        let body = self.sequence(statements)?;
        let closed = self.scopes.close_function();
        info.publish(FrameLayout::new(
            closed.captures,
            closed.recyclable,
            closed.capacity,
            body,
        ));
        Ok(UserFn::new(info, Vec::new()))
    }

    /// Declares the unit's top-level names so that functions can refer to
    /// globals declared further down.
    fn hoist(&mut self, statements: &[Node]) -> Result<(), CompileError> {
        for statement in statements {
            match statement {
                Node::FnDecl(Function {
                    name: Some(name),
                    params,
                    ..
                }) => {
                    let info = FuncInfo::new(Some(name.clone()), params.clone());
                    let function = UserFn::new(info, Vec::new());
                    self.scopes.hoist(name, GlobalKind::Function(function))?;
                }
                Node::Declare { name, .. } => {
                    self.scopes.hoist(name, GlobalKind::Var)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn node(&mut self, node: &Node) -> Result<Code, CompileError> {
        match node {
            Node::Literal(literal) => Ok(constant(literal_value(literal))),
            Node::Ident(name) => self.read(name),
            Node::Declare { name, value } => self.declare(name, value),
            Node::Assign { name, value } => self.assign(name, value),
            Node::Block(statements) => self.block(statements),
            Node::If {
                cond,
                then,
                otherwise,
            } => self.conditional(cond, then, otherwise.as_deref()),
            Node::While { cond, body } => self.while_loop(cond, body),
            Node::FnDecl(function) => self.fn_decl(function),
            Node::Lambda(function) => self.lambda(function),
            Node::Call { callee, args } => self.call(callee, args),
            Node::Field { target, name } => self.field(target, name),
            Node::Go(call) => self.go(call),
            Node::Await(task) => self.await_one(task),
            Node::AwaitAll(tasks) => self.await_many(tasks, AwaitMode::All),
            Node::AwaitAny(tasks) => self.await_many(tasks, AwaitMode::Any),
            Node::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            Node::Unary { op, operand } => self.unary(*op, operand),
            Node::Return(value) => self.ret(value.as_deref()),
        }
    }

    fn nodes(&mut self, nodes: &[Node]) -> Result<Vec<Code>, CompileError> {
        nodes.iter().map(|node| self.node(node)).collect()
    }

    /// Statements in the current block; evaluates to the last one.
    fn sequence(&mut self, statements: &[Node]) -> Result<Code, CompileError> {
        let mut codes = self.nodes(statements)?;
        if codes.len() == 1 && self.optimize {
            if let Some(code) = codes.pop() {
                return Ok(code);
            }
        }
        if codes.is_empty() {
            return Ok(constant(Value::Null));
        }
        let codes = codes.into_boxed_slice();
        Ok(Box::new(move |f| {
            let mut last = Value::Null;
            for code in codes.iter() {
                last = code(f)?;
            }
            Ok(last)
        }))
    }

    fn block(&mut self, statements: &[Node]) -> Result<Code, CompileError> {
        if self.optimize {
            if let [only @ Node::Return(_)] = statements {
                return self.node(only);
            }
        }
        self.scopes.open_block();
        let body = self.sequence(statements);
        self.scopes.close_block();
        body
    }

    /// A branch body, compiled into the block its construct opened.
    fn branch(&mut self, node: &Node) -> Result<Code, CompileError> {
        match node {
            Node::Block(statements) => self.sequence(statements),
            other => self.node(other),
        }
    }

    fn read(&mut self, name: &str) -> Result<Code, CompileError> {
        let resolved = self.scopes.resolve(name)?;
        Ok(read_access(resolved.access))
    }

    fn declare(&mut self, name: &str, value: &Node) -> Result<Code, CompileError> {
        let value = self.node(value)?;
        Ok(match self.scopes.declare(name, BindingKind::Var)? {
            Declared::Global(slot) => Box::new(move |f| {
                slot.set(value(f)?);
                Ok(Value::Null)
            }),
            Declared::Local(index) => Box::new(move |f| {
                let value = value(f)?;
                f.declare_local(index, value);
                Ok(Value::Null)
            }),
        })
    }

    fn assign(&mut self, name: &str, value: &Node) -> Result<Code, CompileError> {
        let value = self.node(value)?;
        let resolved = self.scopes.resolve(name)?;
        if !resolved.mutable {
            return Err(CompileError::Immutable { name: name.into() });
        }
        Ok(match resolved.access {
            Access::Global(slot) => Box::new(move |f| {
                slot.set(value(f)?);
                Ok(Value::Null)
            }),
            Access::Local(index) => Box::new(move |f| {
                let value = value(f)?;
                f.set_local(index, value);
                Ok(Value::Null)
            }),
            Access::Capture(index) => Box::new(move |f| {
                let value = value(f)?;
                f.set_captured(index, value)?;
                Ok(Value::Null)
            }),
            Access::Builtin(_) => return Err(CompileError::Immutable { name: name.into() }),
        })
    }

    fn conditional(
        &mut self,
        cond: &Node,
        then: &Node,
        otherwise: Option<&Node>,
    ) -> Result<Code, CompileError> {
        let cond = self.node(cond)?;
        self.scopes.open_block();
        let then = self.branch(then);
        self.scopes.reuse_block();
        let otherwise = otherwise.map(|node| self.branch(node)).transpose();
        self.scopes.close_block();
        let (then, otherwise) = (then?, otherwise?);

        Ok(match otherwise {
            Some(otherwise) => Box::new(move |f| {
                if cond(f)?.is_truthy() {
                    then(f)
                } else {
                    otherwise(f)
                }
            }),
            None => Box::new(move |f| {
                if cond(f)?.is_truthy() {
                    then(f)
                } else {
                    Ok(Value::Null)
                }
            }),
        })
    }

    fn while_loop(&mut self, cond: &Node, body: &Node) -> Result<Code, CompileError> {
        let cond = self.node(cond)?;
        let body = self.node(body)?;
        Ok(Box::new(move |f| {
            while cond(f)?.is_truthy() {
                body(f)?;
            }
            Ok(Value::Null)
        }))
    }

    fn field(&mut self, target: &Node, name: &str) -> Result<Code, CompileError> {
        let target = self.node(target)?;
        let name = name.to_string();
        Ok(Box::new(move |f| {
            let target = target(f)?;
            Ok(field(&target, &name)?)
        }))
    }

    fn await_one(&mut self, operand: &Node) -> Result<Code, CompileError> {
        let operand = self.node(operand)?;
        Ok(Box::new(move |f| match operand(f)? {
            Value::Task(task) => Ok(f.await_task(&task)?),
            other => Err(not_a_task(&other).into()),
        }))
    }

    fn await_many(&mut self, operands: &[Node], mode: AwaitMode) -> Result<Code, CompileError> {
        let operands = self.nodes(operands)?.into_boxed_slice();
        Ok(Box::new(move |f| {
            let mut tasks = Vec::with_capacity(operands.len());
            for operand in operands.iter() {
                collect_tasks(operand(f)?, &mut tasks)?;
            }
            let outcome = match mode {
                AwaitMode::All => f.await_all(&tasks),
                AwaitMode::Any => f.await_any(&tasks),
            };
            Ok(outcome?)
        }))
    }

    fn ret(&mut self, value: Option<&Node>) -> Result<Code, CompileError> {
        let Some(value) = value else {
            return Ok(Box::new(|_| Err(Signal::Return(Value::Null))));
        };
        if self.optimize {
            match value {
                Node::Literal(literal) => {
                    let value = literal_value(literal);
                    return Ok(Box::new(move |_| Err(Signal::Return(value.clone()))));
                }
                Node::Ident(name) => {
                    let resolved = self.scopes.resolve(name)?;
                    if let Access::Local(index) = resolved.access {
                        return Ok(Box::new(move |f| Err(Signal::Return(f.local(index)))));
                    }
                    let read = read_access(resolved.access);
                    return Ok(Box::new(move |f| Err(Signal::Return(read(f)?))));
                }
                _ => {}
            }
        }
        let value = self.node(value)?;
        Ok(Box::new(move |f| Err(Signal::Return(value(f)?))))
    }
}

pub(crate) fn constant(value: Value) -> Code {
    Box::new(move |_| Ok(value.clone()))
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(x) => Value::Float(*x),
        Literal::Str(s) => Value::from(s.as_str()),
    }
}

fn read_access(access: Access) -> Code {
    match access {
        Access::Builtin(value) => constant(value),
        Access::Global(slot) => Box::new(move |_| Ok(slot.get())),
        Access::Local(index) => Box::new(move |f| Ok(f.local(index))),
        Access::Capture(index) => Box::new(move |f| Ok(f.captured(index)?)),
    }
}

fn field(target: &Value, name: &str) -> Result<Value, Exception> {
    match target {
        Value::Package(package) => package.get(name).cloned().ok_or_else(|| {
            Exception::runtime(format!("package `{}` has no member `{name}`", package.name))
        }),
        Value::Custom(custom) => custom.field(name).ok_or_else(|| {
            Exception::runtime(format!("`{}` has no field `{name}`", custom.type_name()))
        }),
        other => Err(Exception::type_error(format!(
            "cannot access field `{name}` on a value of type `{}`",
            other.type_name()
        ))),
    }
}

fn not_a_task(value: &Value) -> Exception {
    Exception::type_error(format!("cannot await a value of type `{}`", value.type_name()))
}

/// Tasks from an await operand; arrays contribute their elements.
fn collect_tasks(value: Value, tasks: &mut Vec<Arc<Task>>) -> Result<(), Exception> {
    match value {
        Value::Task(task) => tasks.push(task),
        Value::Array(items) => {
            for item in items.iter() {
                match item {
                    Value::Task(task) => tasks.push(Arc::clone(task)),
                    other => return Err(not_a_task(other)),
                }
            }
        }
        other => return Err(not_a_task(&other)),
    }
    Ok(())
}
