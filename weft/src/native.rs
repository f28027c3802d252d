//! Host functions callable from language code.
//!
//! Any Rust function or closure taking up to six [`Value`]s, or a single
//! `&[Value]` for a variable argument list, and returning [`NativeResult`]
//! can be registered:
//!
//! ```ignore
//! fn add(a: Value, b: Value) -> NativeResult { ... }
//! let add = NativeFn::new("add", add);
//! let add = native!(add);
//! ```
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crate::{Exception, Value};

pub type NativeResult = Result<Value, Exception>;

type Fixed<A> = Arc<dyn Fn(A) -> NativeResult + Send + Sync>;

/// Call shape of a native function.
#[derive(Clone)]
pub enum NativeBody {
    Arity0(Arc<dyn Fn() -> NativeResult + Send + Sync>),
    Arity1(Fixed<Value>),
    Arity2(Arc<dyn Fn(Value, Value) -> NativeResult + Send + Sync>),
    Arity3(Arc<dyn Fn(Value, Value, Value) -> NativeResult + Send + Sync>),
    Arity4(Arc<dyn Fn(Value, Value, Value, Value) -> NativeResult + Send + Sync>),
    Arity5(Arc<dyn Fn(Value, Value, Value, Value, Value) -> NativeResult + Send + Sync>),
    Arity6(
        Arc<dyn Fn(Value, Value, Value, Value, Value, Value) -> NativeResult + Send + Sync>,
    ),
    Variadic(Arc<dyn Fn(&[Value]) -> NativeResult + Send + Sync>),
}

impl NativeBody {
    /// `None` for variadic functions.
    pub fn arity(&self) -> Option<usize> {
        match self {
            NativeBody::Arity0(_) => Some(0),
            NativeBody::Arity1(_) => Some(1),
            NativeBody::Arity2(_) => Some(2),
            NativeBody::Arity3(_) => Some(3),
            NativeBody::Arity4(_) => Some(4),
            NativeBody::Arity5(_) => Some(5),
            NativeBody::Arity6(_) => Some(6),
            NativeBody::Variadic(_) => None,
        }
    }

    fn dispatch(&self, args: Vec<Value>) -> NativeResult {
        if let NativeBody::Variadic(f) = self {
            return f(&args);
        }
        let mut args = args.into_iter();
        let mut next = move || args.next().unwrap_or_default();
        match self {
            NativeBody::Arity0(f) => f(),
            NativeBody::Arity1(f) => f(next()),
            NativeBody::Arity2(f) => f(next(), next()),
            NativeBody::Arity3(f) => f(next(), next(), next()),
            NativeBody::Arity4(f) => f(next(), next(), next(), next()),
            NativeBody::Arity5(f) => f(next(), next(), next(), next(), next()),
            NativeBody::Arity6(f) => f(next(), next(), next(), next(), next(), next()),
            NativeBody::Variadic(_) => Ok(Value::Null),
        }
    }
}

/// Marker for functions taking the whole argument list as a slice.
pub struct Rest;

/// Conversion of a Rust callable into a [`NativeBody`]. `Args` only
/// disambiguates the call shapes.
pub trait IntoNative<Args> {
    fn into_native(self) -> NativeBody;
}

macro_rules! impl_into_native {
    ($variant:ident; $($arg:ty),*) => {
        impl<F> IntoNative<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> NativeResult + Send + Sync + 'static,
        {
            fn into_native(self) -> NativeBody {
                NativeBody::$variant(Arc::new(self))
            }
        }
    };
}

impl_into_native!(Arity0;);
impl_into_native!(Arity1; Value);
impl_into_native!(Arity2; Value, Value);
impl_into_native!(Arity3; Value, Value, Value);
impl_into_native!(Arity4; Value, Value, Value, Value);
impl_into_native!(Arity5; Value, Value, Value, Value, Value);
impl_into_native!(Arity6; Value, Value, Value, Value, Value, Value);

impl<F> IntoNative<Rest> for F
where
    F: Fn(&[Value]) -> NativeResult + Send + Sync + 'static,
{
    fn into_native(self) -> NativeBody {
        NativeBody::Variadic(Arc::new(self))
    }
}

pub struct NativeFn {
    name: String,
    body: NativeBody,
    blocking: bool,
}

impl NativeFn {
    pub fn new<Args>(name: impl Into<String>, f: impl IntoNative<Args>) -> Self {
        Self {
            name: name.into(),
            body: f.into_native(),
            blocking: false,
        }
    }

    /// Marks the function as blocking: it runs with the GIL released, so it
    /// must not call back into the instance.
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Option<usize> {
        self.body.arity()
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Calls the function. A panic inside it is turned into a runtime error.
    pub fn invoke(&self, args: Vec<Value>) -> NativeResult {
        if let Some(arity) = self.arity() {
            if args.len() != arity {
                return Err(Exception::runtime(format!(
                    "native function `{}` expects {arity} argument(s), got {}",
                    self.name,
                    args.len()
                )));
            }
        }
        match panic::catch_unwind(AssertUnwindSafe(|| self.body.dispatch(args))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                log::warn!("native function `{}` panicked: {message}", self.name);
                Err(Exception::runtime(format!(
                    "native function `{}` panicked: {message}",
                    self.name
                )))
            }
        }
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn")
            .field("name", &self.name)
            .field("arity", &self.arity())
            .field("blocking", &self.blocking)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Registration name for a function path: whitespace removed, crate and
/// `builtin` prefixes stripped.
pub fn native_name(path: &str) -> String {
    let compact: String = path.chars().filter(|c| !c.is_whitespace()).collect();
    let trimmed = compact
        .trim_start_matches("crate::")
        .trim_start_matches("weft::");
    trimmed
        .strip_prefix("builtin::")
        .unwrap_or(trimmed)
        .to_string()
}

/// Wraps a function path in a [`NativeFn`] named after the path.
#[macro_export]
macro_rules! native {
    ($path:path) => {
        $crate::NativeFn::new($crate::native_name(stringify!($path)), $path)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(a: Value, b: Value, c: Value) -> NativeResult {
        let total: f64 = [a, b, c].iter().filter_map(Value::as_float).sum();
        Ok(Value::float(total))
    }

    fn count(args: &[Value]) -> NativeResult {
        Ok(Value::float(args.len() as f64))
    }

    #[test]
    fn fixed_arity_dispatch() {
        let f = NativeFn::new("sum", sum);
        assert_eq!(f.arity(), Some(3));
        let result = f.invoke(vec![Value::float(1.0), Value::float(2.0), Value::float(3.0)]);
        assert_eq!(result, Ok(Value::float(6.0)));
    }

    #[test]
    fn variadic_dispatch() {
        let f = NativeFn::new("count", count);
        assert_eq!(f.arity(), None);
        assert_eq!(f.invoke(Vec::new()), Ok(Value::float(0.0)));
        assert_eq!(f.invoke(vec![Value::Null; 9]), Ok(Value::float(9.0)));
    }

    #[test]
    fn closures_of_every_shape_register() {
        let zero = NativeFn::new("zero", || -> NativeResult { Ok(Value::float(0.0)) });
        let six = NativeFn::new(
            "six",
            |a: Value, _: Value, _: Value, _: Value, _: Value, f: Value| -> NativeResult {
                Ok(Value::array(vec![a, f]))
            },
        );
        assert_eq!(zero.invoke(Vec::new()), Ok(Value::float(0.0)));
        assert_eq!(six.arity(), Some(6));
        let args = (0..6).map(|i| Value::float(f64::from(i))).collect();
        let pair = six.invoke(args).unwrap();
        assert_eq!(pair.as_array().unwrap()[1], Value::float(5.0));
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let f = NativeFn::new("sum", sum);
        let err = f.invoke(vec![Value::Null]).unwrap_err();
        assert!(err.message.contains("expects 3"));
    }

    #[test]
    fn panic_becomes_runtime_error() {
        let f = NativeFn::new("explode", |_: Value| -> NativeResult { panic!("kaboom") });
        let err = f.invoke(vec![Value::Null]).unwrap_err();
        assert!(err.message.contains("kaboom"));
        assert!(err.message.contains("explode"));
    }

    #[test]
    fn macro_names_function_after_path() {
        assert_eq!(native!(sum).name(), "sum");
        assert_eq!(native!(crate::native::tests::count).name(), "native::tests::count");
        assert_eq!(native_name("crate :: builtin :: print"), "print");
        assert_eq!(native_name("weft::builtin::len"), "len");
        assert_eq!(native_name("io::read"), "io::read");
    }

    #[test]
    fn blocking_flag() {
        let f = NativeFn::new("count", count).blocking();
        assert!(f.is_blocking());
        assert!(!NativeFn::new("count", count).is_blocking());
    }
}
