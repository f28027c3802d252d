use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    RuntimeError,
    TypeError,
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionKind::RuntimeError => write!(f, "RuntimeError"),
            ExceptionKind::TypeError => write!(f, "TypeError"),
        }
    }
}

/// A run-time failure raised by language code or a native function.
///
/// `trace` collects the names of the functions the exception unwound
/// through, innermost first.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct Exception {
    pub kind: ExceptionKind,
    pub message: String,
    pub trace: Vec<String>,
}

impl Exception {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ExceptionKind::RuntimeError,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self {
            kind: ExceptionKind::TypeError,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    pub fn arity(name: Option<&str>, expected: usize, got: usize) -> Self {
        let message = match name {
            Some(name) => {
                format!("function `{name}` expects {expected} argument(s), got {got}")
            }
            None => format!("anonymous function expects {expected} argument(s), got {got}"),
        };
        Self::runtime(message)
    }

    pub fn not_callable(type_name: &str) -> Self {
        Self::type_error(format!("value of type `{type_name}` is not callable"))
    }

    pub fn finished_task() -> Self {
        Self::runtime("cannot await a finished task")
    }

    pub fn stack_overflow(limit: usize) -> Self {
        Self::runtime(format!("stack overflow: call depth exceeded {limit}"))
    }

    pub(crate) fn unwound_through(&mut self, name: &str) {
        self.trace.push(name.to_string());
    }

    /// Message followed by one `at` line per unwound call.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        for frame in &self.trace {
            out.push_str("\n    at ");
            out.push_str(frame);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("`{name}` is already declared in this block")]
    DoubleDeclaration { name: String },
    #[error("unreachable symbol `{name}`")]
    Unreachable { name: String },
    #[error("global `{name}` is used before it is initialized")]
    Uninitialized { name: String },
    #[error("function `{name}` declares {count} parameters, at most {max} are allowed")]
    TooManyParameters {
        name: String,
        count: usize,
        max: usize,
    },
    #[error("cannot assign to `{name}`: it is not a variable")]
    Immutable { name: String },
    #[error("`go` expects a call expression")]
    GoWithoutCall,
}

/// Errors surfaced to the embedding host.
#[derive(Debug, Error)]
pub enum Error {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
    #[error("{}", .0.report())]
    Runtime(#[from] Exception),
    #[error("entry point `{0}` not found")]
    EntryPointNotFound(String),
    #[error("builtin `{0}` is registered twice")]
    DuplicateBuiltin(String),
}

impl Error {
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Error::Runtime(e) => Some(e),
            _ => None,
        }
    }
}
