pub mod ast;
pub mod builtin;
mod compiler;
mod error;
mod fiber;
mod function;
mod gil;
mod instance;
mod native;
mod pool;
mod runtime;
pub mod scope;
mod task;
mod value;

pub use ast::{BinOp, Literal, Node, UnOp};
pub use compiler::{Compiler, binary};
pub use error::*;
pub use fiber::{Code, Fiber, Flow, Signal};
pub use function::*;
pub use gil::{Gil, GilGuard};
pub use instance::*;
pub use native::*;
pub use pool::*;
pub use runtime::Runtime;
pub use scope::Globals;
pub use task::Task;
pub use value::*;
