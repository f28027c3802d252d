//! Value: every runtime value of the language.
//!
//! Scalars (`bool`, `f64`) live inline in the enum, everything else is a
//! reference to shared heap data. Values are cheap to clone; only the
//! boxed cells of locals and globals ([`crate::Slot`]) are ever mutated.
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

use crate::{NativeFn, Task, UserFn};

/// Host-defined value type.
pub trait CustomValue: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    fn as_any(&self) -> &dyn Any;

    fn is_truthy(&self) -> bool {
        true
    }

    /// Equality against another custom value. Values of different host
    /// types should compare unequal.
    fn equals(&self, _other: &dyn CustomValue) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("<{}>", self.type_name())
    }

    /// Field access `value.name`.
    fn field(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// A named bag of members, reachable through field access.
#[derive(Debug, Default)]
pub struct Package {
    pub name: String,
    members: HashMap<String, Value>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.members.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.members.get(name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Float(f64),
    String(Arc<str>),
    UserFn(Arc<UserFn>),
    NativeFn(Arc<NativeFn>),
    Array(Arc<[Value]>),
    Task(Arc<Task>),
    Package(Arc<Package>),
    Buffer(Arc<[u8]>),
    Custom(Arc<dyn CustomValue>),
}

impl Value {
    pub const fn bool(value: bool) -> Self {
        Value::Bool(value)
    }

    pub const fn float(value: f64) -> Self {
        Value::Float(value)
    }

    pub fn string(value: impl Into<Arc<str>>) -> Self {
        Value::String(value.into())
    }

    pub fn user_fn(value: Arc<UserFn>) -> Self {
        Value::UserFn(value)
    }

    pub fn native_fn(value: NativeFn) -> Self {
        Value::NativeFn(Arc::new(value))
    }

    pub fn array(values: impl Into<Arc<[Value]>>) -> Self {
        Value::Array(values.into())
    }

    pub fn task(task: Arc<Task>) -> Self {
        Value::Task(task)
    }

    pub fn package(package: Package) -> Self {
        Value::Package(Arc::new(package))
    }

    pub fn buffer(bytes: impl Into<Arc<[u8]>>) -> Self {
        Value::Buffer(bytes.into())
    }

    pub fn custom(value: impl CustomValue + 'static) -> Self {
        Value::Custom(Arc::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_user_fn(&self) -> Option<&Arc<UserFn>> {
        match self {
            Value::UserFn(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_native_fn(&self) -> Option<&Arc<NativeFn>> {
        match self {
            Value::NativeFn(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&Arc<Task>> {
        match self {
            Value::Task(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_package(&self) -> Option<&Package> {
        match self {
            Value::Package(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&[u8]> {
        match self {
            Value::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_custom(&self) -> Option<&Arc<dyn CustomValue>> {
        match self {
            Value::Custom(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Float(x) => *x != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Buffer(bytes) => !bytes.is_empty(),
            Value::UserFn(_) | Value::NativeFn(_) | Value::Task(_) | Value::Package(_) => true,
            Value::Custom(c) => c.is_truthy(),
        }
    }

    /// Language-level equality: scalars and strings by value, every other
    /// reference kind by identity, custom values through their own hook.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::UserFn(a), Value::UserFn(b)) => Arc::ptr_eq(a, b),
            (Value::NativeFn(a), Value::NativeFn(b)) => Arc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Task(a), Value::Task(b)) => Arc::ptr_eq(a, b),
            (Value::Package(a), Value::Package(b)) => Arc::ptr_eq(a, b),
            (Value::Buffer(a), Value::Buffer(b)) => Arc::ptr_eq(a, b),
            (Value::Custom(a), Value::Custom(b)) => a.equals(b.as_ref()),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::UserFn(_) => "function",
            Value::NativeFn(_) => "native function",
            Value::Array(_) => "array",
            Value::Task(_) => "task",
            Value::Package(_) => "package",
            Value::Buffer(_) => "buffer",
            Value::Custom(c) => c.type_name(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s}"),
            Value::UserFn(func) => match func.name() {
                Some(name) => write!(f, "<fn {name}>"),
                None => write!(f, "<fn>"),
            },
            Value::NativeFn(func) => write!(f, "<native fn {}>", func.name()),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Task(task) => write!(f, "<task #{}>", task.id()),
            Value::Package(p) => write!(f, "<package {}>", p.name),
            Value::Buffer(bytes) => write!(f, "<buffer {} bytes>", bytes.len()),
            Value::Custom(c) => write!(f, "{}", c.describe()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::Array(values.into())
    }
}
