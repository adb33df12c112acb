//! Built-in models of library classes
//!
//! A wrapper replaces the fields of a library class with its own encoding
//! (a length and a character array for strings, a begin/end window over a
//! storage array for lists), interprets the class's methods on that encoding
//! and turns a solved encoding back into ordinary constructor and mutator
//! calls.

pub mod list;
pub mod string;

use serde::{Deserialize, Serialize};

use crate::engine::EngineContext;
use crate::error::EngineError;
use crate::expr::Expr;
use crate::program::builtins::{ARRAY_LIST_CLASS, LIST_INTERFACE};
use crate::program::{MethodRef, Type, STRING_CLASS};
use crate::resolver::{ConcreteModel, ModelId, Resolver};
use crate::traverser::Step;
use crate::value::{ReferenceValue, SymbolicValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperKind {
    String,
    List,
}

/// Wrapper modelling objects of `ty`, if any.
pub fn wrapper_kind(ty: &Type) -> Option<WrapperKind> {
    match ty.class_name()? {
        STRING_CLASS => Some(WrapperKind::String),
        LIST_INTERFACE | ARRAY_LIST_CLASS => Some(WrapperKind::List),
        _ => None,
    }
}

/// Outcome of a wrapped method call.
#[derive(Debug)]
pub(crate) enum Invocation {
    /// The call returns this value (`None` for `void`) and the step goes on
    Value(Option<SymbolicValue>),
    /// Not modelled; the result is an unconstrained value of the return type
    Unbounded,
}

pub(crate) trait Wrapper: Sync {
    fn kind(&self) -> WrapperKind;

    /// Constraints every non-null input object of this kind satisfies.
    fn input_invariants(&self, ctx: &EngineContext, addr: &Expr) -> Vec<Expr>;

    fn invoke(
        &self,
        step: &mut Step<'_>,
        receiver: &ReferenceValue,
        method: &MethodRef,
        args: &[SymbolicValue],
    ) -> Result<Invocation, EngineError>;

    /// Concrete model of the object at `addr`, already registered as `id`.
    fn resolve(&self, resolver: &mut Resolver<'_>, addr: &Expr, id: ModelId) -> ConcreteModel;
}

pub(crate) fn lookup(kind: WrapperKind) -> &'static dyn Wrapper {
    match kind {
        WrapperKind::String => &string::StringWrapper,
        WrapperKind::List => &list::ListWrapper,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_kinds() {
        assert_eq!(wrapper_kind(&Type::class(STRING_CLASS)), Some(WrapperKind::String));
        assert_eq!(wrapper_kind(&Type::class(ARRAY_LIST_CLASS)), Some(WrapperKind::List));
        assert_eq!(wrapper_kind(&Type::class(LIST_INTERFACE)), Some(WrapperKind::List));
        assert_eq!(wrapper_kind(&Type::class("demo.Point")), None);
        assert_eq!(wrapper_kind(&Type::Int), None);
        assert_eq!(lookup(WrapperKind::List).kind(), WrapperKind::List);
    }
}
