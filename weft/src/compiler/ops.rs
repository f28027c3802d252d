use super::{Compiler, constant, read_access};
use crate::{
    CompileError, Exception, Value,
    ast::{BinOp, Node, UnOp},
    fiber::Code,
    scope::Access,
};

type Kernel = fn(f64, f64) -> Value;

/// An operand as seen by operator specialization.
enum Operand {
    Local(usize),
    Number(f64),
    Code(Code),
}

impl Operand {
    fn into_code(self) -> Code {
        match self {
            Operand::Local(index) => Box::new(move |f| Ok(f.local(index))),
            Operand::Number(x) => constant(Value::Float(x)),
            Operand::Code(code) => code,
        }
    }
}

impl Compiler<'_> {
    pub(super) fn binary(&mut self, op: BinOp, lhs: &Node, rhs: &Node) -> Result<Code, CompileError> {
        match op {
            BinOp::And => {
                let (lhs, rhs) = (self.node(lhs)?, self.node(rhs)?);
                Ok(Box::new(move |f| {
                    Ok(Value::Bool(lhs(f)?.is_truthy() && rhs(f)?.is_truthy()))
                }))
            }
            BinOp::Or => {
                let (lhs, rhs) = (self.node(lhs)?, self.node(rhs)?);
                Ok(Box::new(move |f| {
                    Ok(Value::Bool(lhs(f)?.is_truthy() || rhs(f)?.is_truthy()))
                }))
            }
            _ => {
                let lhs = self.operand(lhs)?;
                let rhs = self.operand(rhs)?;
                Ok(specialize(op, lhs, rhs))
            }
        }
    }

    pub(super) fn unary(&mut self, op: UnOp, operand: &Node) -> Result<Code, CompileError> {
        if self.optimize {
            if let (UnOp::Neg, Some(x)) = (op, operand.as_number()) {
                return Ok(constant(Value::Float(-x)));
            }
        }
        let operand = self.node(operand)?;
        Ok(match op {
            UnOp::Neg => Box::new(move |f| match operand(f)? {
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(Exception::type_error(format!(
                    "operator `-` not supported for `{}`",
                    other.type_name()
                ))
                .into()),
            }),
            UnOp::Not => Box::new(move |f| Ok(Value::Bool(!operand(f)?.is_truthy()))),
        })
    }

    fn operand(&mut self, node: &Node) -> Result<Operand, CompileError> {
        if self.optimize {
            if let Some(x) = node.as_number() {
                return Ok(Operand::Number(x));
            }
            if let Node::Ident(name) = node {
                let resolved = self.scopes.resolve(name)?;
                return Ok(match resolved.access {
                    Access::Local(index) => Operand::Local(index),
                    access => Operand::Code(read_access(access)),
                });
            }
        }
        Ok(Operand::Code(self.node(node)?))
    }
}

fn specialize(op: BinOp, lhs: Operand, rhs: Operand) -> Code {
    let Some(kernel) = float_kernel(op) else {
        return generic(op, lhs.into_code(), rhs.into_code());
    };
    match (lhs, rhs) {
        (Operand::Number(a), Operand::Number(b)) => constant(kernel(a, b)),
        (Operand::Local(a), Operand::Number(b)) => Box::new(move |f| match f.local(a) {
            Value::Float(x) => Ok(kernel(x, b)),
            other => Ok(binary(op, other, Value::Float(b))?),
        }),
        (Operand::Number(a), Operand::Local(b)) => Box::new(move |f| match f.local(b) {
            Value::Float(y) => Ok(kernel(a, y)),
            other => Ok(binary(op, Value::Float(a), other)?),
        }),
        (Operand::Local(a), Operand::Local(b)) => Box::new(move |f| match (f.local(a), f.local(b)) {
            (Value::Float(x), Value::Float(y)) => Ok(kernel(x, y)),
            (x, y) => Ok(binary(op, x, y)?),
        }),
        (lhs, rhs) => generic(op, lhs.into_code(), rhs.into_code()),
    }
}

fn generic(op: BinOp, lhs: Code, rhs: Code) -> Code {
    Box::new(move |f| {
        let a = lhs(f)?;
        let b = rhs(f)?;
        Ok(binary(op, a, b)?)
    })
}

fn float_kernel(op: BinOp) -> Option<Kernel> {
    let kernel: Kernel = match op {
        BinOp::Add => |a: f64, b: f64| Value::Float(a + b),
        BinOp::Sub => |a: f64, b: f64| Value::Float(a - b),
        BinOp::Mul => |a: f64, b: f64| Value::Float(a * b),
        BinOp::Div => |a: f64, b: f64| Value::Float(a / b),
        BinOp::Mod => |a: f64, b: f64| Value::Float(a % b),
        BinOp::Eq => |a: f64, b: f64| Value::Bool(a == b),
        BinOp::Ne => |a: f64, b: f64| Value::Bool(a != b),
        BinOp::Lt => |a: f64, b: f64| Value::Bool(a < b),
        BinOp::Le => |a: f64, b: f64| Value::Bool(a <= b),
        BinOp::Gt => |a: f64, b: f64| Value::Bool(a > b),
        BinOp::Ge => |a: f64, b: f64| Value::Bool(a >= b),
        BinOp::And | BinOp::Or => return None,
    };
    Some(kernel)
}

/// Applies a binary operator to two values.
pub fn binary(op: BinOp, lhs: Value, rhs: Value) -> Result<Value, Exception> {
    match op {
        BinOp::Eq => return Ok(Value::Bool(lhs.equals(&rhs))),
        BinOp::Ne => return Ok(Value::Bool(!lhs.equals(&rhs))),
        BinOp::And => return Ok(Value::Bool(lhs.is_truthy() && rhs.is_truthy())),
        BinOp::Or => return Ok(Value::Bool(lhs.is_truthy() || rhs.is_truthy())),
        _ => {}
    }
    match (&lhs, &rhs) {
        (Value::Float(a), Value::Float(b)) => {
            if let Some(kernel) = float_kernel(op) {
                return Ok(kernel(*a, *b));
            }
        }
        (Value::String(a), Value::String(b)) => match op {
            BinOp::Add => return Ok(Value::string(format!("{a}{b}"))),
            BinOp::Lt => return Ok(Value::Bool(a < b)),
            BinOp::Le => return Ok(Value::Bool(a <= b)),
            BinOp::Gt => return Ok(Value::Bool(a > b)),
            BinOp::Ge => return Ok(Value::Bool(a >= b)),
            _ => {}
        },
        _ => {}
    }
    Err(Exception::type_error(format!(
        "operator `{}` not supported between `{}` and `{}`",
        op.symbol(),
        lhs.type_name(),
        rhs.type_name()
    )))
}
