use std::sync::Arc;

use super::{Compiler, constant};
use crate::{
    Capture, CompileError, Exception, FrameLayout, FuncInfo, MAX_PARAMS, UserFn, Value,
    ast::Function,
    fiber::Code,
    scope::{BindingKind, Declared, GlobalKind, Site},
};

impl Compiler<'_> {
    pub(super) fn lambda(&mut self, function: &Function) -> Result<Code, CompileError> {
        let info = FuncInfo::new(function.name.clone(), function.params.clone());
        self.function(&info, function, None)?;
        Ok(instantiate(info))
    }

    pub(super) fn fn_decl(&mut self, function: &Function) -> Result<Code, CompileError> {
        let Some(name) = function.name.as_deref() else {
            return self.lambda(function);
        };
        if self.scopes.at_top_level() {
            return self.global_fn(name, function);
        }

        let Declared::Local(index) = self.scopes.declare(name, BindingKind::Function)? else {
            return Err(CompileError::Unreachable { name: name.into() });
        };
        let site = self.scopes.local_site(index);
        let info = FuncInfo::new(Some(name.into()), function.params.clone());
        self.function(&info, function, Some(site))?;
        let make = instantiate(info);
        Ok(Box::new(move |f| {
            // fresh cell first, so the closure captures its own binding
            f.declare_local(index, Value::Null);
            let value = make(f)?;
            f.set_local(index, value);
            Ok(Value::Null)
        }))
    }

    /// Top-level functions were bound while hoisting; only the body is
    /// left to compile.
    fn global_fn(&mut self, name: &str, function: &Function) -> Result<Code, CompileError> {
        let globals = self.scopes.globals();
        let hoisted = globals.index_of(name).and_then(|index| {
            match globals.get(index).map(|global| &global.kind) {
                Some(GlobalKind::Function(f)) => Some((index, Arc::clone(f))),
                _ => None,
            }
        });
        let Some((index, target)) = hoisted else {
            return Err(CompileError::Unreachable { name: name.into() });
        };
        self.function(target.info(), function, Some(Site::Root(index)))?;
        Ok(constant(Value::Null))
    }

    fn function(
        &mut self,
        info: &Arc<FuncInfo>,
        function: &Function,
        site: Option<Site>,
    ) -> Result<(), CompileError> {
        if function.params.len() > MAX_PARAMS {
            return Err(CompileError::TooManyParameters {
                name: info.display_name().into(),
                count: function.params.len(),
                max: MAX_PARAMS,
            });
        }
        self.scopes.open_function(Arc::clone(info), site);
        for param in &function.params {
            self.scopes.declare(param, BindingKind::Var)?;
        }
        let body = self.branch(&function.body)?;
        let closed = self.scopes.close_function();
        log::debug!(
            "compiled `{}`: {} slot(s), {} capture(s), {} recyclable",
            info.display_name(),
            closed.capacity,
            closed.captures.len(),
            closed.recyclable.len()
        );
        info.publish(FrameLayout::new(
            closed.captures,
            closed.recyclable,
            closed.capacity,
            body,
        ));
        Ok(())
    }
}

/// Code creating a new closure over the current frame.
fn instantiate(info: Arc<FuncInfo>) -> Code {
    let captures: Box<[Capture]> = info
        .layout()
        .map(|layout| layout.captures.clone().into_boxed_slice())
        .unwrap_or_default();
    Box::new(move |f| {
        let cells = captures
            .iter()
            .map(|capture| match *capture {
                Capture::Local(index) => Ok(f.local_cell(index)),
                Capture::Outer(index) => f.captured_cell(index).map(Arc::clone),
            })
            .collect::<Result<Vec<_>, Exception>>()?;
        Ok(Value::UserFn(UserFn::new(Arc::clone(&info), cells)))
    })
}
