//! Syntax tree consumed by the compiler.
//!
//! The tree is produced elsewhere (a parser, or built by hand through the
//! constructor helpers below); the compiler only relies on its shape.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

/// A function declaration or literal.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Box<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Literal(Literal),
    Ident(String),
    /// `name := value`
    Declare { name: String, value: Box<Node> },
    /// `name = value`
    Assign { name: String, value: Box<Node> },
    Block(Vec<Node>),
    If {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Option<Box<Node>>,
    },
    While { cond: Box<Node>, body: Box<Node> },
    /// `fn name(params) { body }` as a statement; binds `name`.
    FnDecl(Function),
    /// Function expression, optionally named for traces.
    Lambda(Function),
    Call { callee: Box<Node>, args: Vec<Node> },
    Field { target: Box<Node>, name: String },
    Go(Box<Node>),
    Await(Box<Node>),
    AwaitAll(Vec<Node>),
    AwaitAny(Vec<Node>),
    Binary {
        op: BinOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Unary { op: UnOp, operand: Box<Node> },
    Return(Option<Box<Node>>),
}

impl Node {
    pub fn null() -> Self {
        Node::Literal(Literal::Null)
    }

    pub fn boolean(value: bool) -> Self {
        Node::Literal(Literal::Bool(value))
    }

    pub fn num(value: f64) -> Self {
        Node::Literal(Literal::Number(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Node::Literal(Literal::Str(value.into()))
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Node::Ident(name.into())
    }

    pub fn declare(name: impl Into<String>, value: Node) -> Self {
        Node::Declare {
            name: name.into(),
            value: Box::new(value),
        }
    }

    pub fn assign(name: impl Into<String>, value: Node) -> Self {
        Node::Assign {
            name: name.into(),
            value: Box::new(value),
        }
    }

    pub fn block(statements: Vec<Node>) -> Self {
        Node::Block(statements)
    }

    pub fn if_else(cond: Node, then: Node, otherwise: Option<Node>) -> Self {
        Node::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        }
    }

    pub fn while_loop(cond: Node, body: Node) -> Self {
        Node::While {
            cond: Box::new(cond),
            body: Box::new(body),
        }
    }

    pub fn fn_decl(name: impl Into<String>, params: &[&str], body: Node) -> Self {
        Node::FnDecl(Function {
            name: Some(name.into()),
            params: params.iter().map(|p| (*p).to_string()).collect(),
            body: Box::new(body),
        })
    }

    pub fn lambda(params: &[&str], body: Node) -> Self {
        Node::Lambda(Function {
            name: None,
            params: params.iter().map(|p| (*p).to_string()).collect(),
            body: Box::new(body),
        })
    }

    pub fn call(callee: Node, args: Vec<Node>) -> Self {
        Node::Call {
            callee: Box::new(callee),
            args,
        }
    }

    /// Call of a named binding, `name(args)`.
    pub fn call_named(name: impl Into<String>, args: Vec<Node>) -> Self {
        Node::call(Node::Ident(name.into()), args)
    }

    pub fn field(target: Node, name: impl Into<String>) -> Self {
        Node::Field {
            target: Box::new(target),
            name: name.into(),
        }
    }

    pub fn go(call: Node) -> Self {
        Node::Go(Box::new(call))
    }

    pub fn await_task(task: Node) -> Self {
        Node::Await(Box::new(task))
    }

    pub fn binary(op: BinOp, lhs: Node, rhs: Node) -> Self {
        Node::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnOp, operand: Node) -> Self {
        Node::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn ret(value: Node) -> Self {
        Node::Return(Some(Box::new(value)))
    }

    pub fn ret_none() -> Self {
        Node::Return(None)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Node::Literal(Literal::Number(x)) => Some(*x),
            _ => None,
        }
    }
}
