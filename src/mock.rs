//! Mock decisions and mock bookkeeping
//!
//! A mocked object has no fields of its own: every call on it yields a fresh
//! symbolic value, recorded per method in call order so the resolver can
//! replay the answers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::expr::Expr;
use crate::program::{builtins, FieldRef, Program, Type, OBJECT_CLASS, STRING_CLASS};
use crate::value::SymbolicValue;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockStrategy {
    #[default]
    NoMocks,
    /// Mock classes outside the package of the class under test
    OtherPackages,
    /// Mock every class except the class under test
    OtherClasses,
}

/// What the traverser knows when it is about to create an object.
#[derive(Debug, Clone, Copy)]
pub struct MockContext<'a> {
    pub program: &'a Program,
    pub class_under_test: &'a str,
}

pub trait MockPolicy {
    fn should_mock(&self, ty: &Type, ctx: &MockContext<'_>) -> bool;
}

impl MockPolicy for MockStrategy {
    fn should_mock(&self, ty: &Type, ctx: &MockContext<'_>) -> bool {
        let Some(class) = ty.class_name() else {
            return false;
        };
        if class == ctx.class_under_test || !is_mockable(class, ctx.program) {
            return false;
        }
        match self {
            MockStrategy::NoMocks => false,
            MockStrategy::OtherPackages => ty.package() != Type::class(ctx.class_under_test).package(),
            MockStrategy::OtherClasses => true,
        }
    }
}

fn is_mockable(class: &str, program: &Program) -> bool {
    if class == OBJECT_CLASS || class == STRING_CLASS || builtins::unboxed_type(class).is_some() {
        return false;
    }
    match program.class(class) {
        Some(def) => !def.library && !def.is_enum(),
        None => false,
    }
}

/// Why an address is a mock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MockInfo {
    /// A parameter or unbounded object chosen for mocking
    Object { class: String, addr: Expr },
    /// Value of a field of a mocked or speculatively mocked owner
    Field {
        class: String,
        field: FieldRef,
        addr: Expr,
        owner: Option<Expr>,
    },
    /// An object created by `new` inside the method under test
    NewInstance {
        class: String,
        addr: Expr,
        caller: String,
    },
}

impl MockInfo {
    pub fn addr(&self) -> &Expr {
        match self {
            MockInfo::Object { addr, .. }
            | MockInfo::Field { addr, .. }
            | MockInfo::NewInstance { addr, .. } => addr,
        }
    }

    pub fn class(&self) -> &str {
        match self {
            MockInfo::Object { class, .. }
            | MockInfo::Field { class, .. }
            | MockInfo::NewInstance { class, .. } => class,
        }
    }
}

/// One answer of a mocked method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MockExecutableInstance {
    pub id: u64,
    pub value: SymbolicValue,
}

/// A mock with the answers recorded so far, keyed by method signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockInfoEnriched {
    pub info: MockInfo,
    pub executables: BTreeMap<String, Vec<MockExecutableInstance>>,
}

impl MockInfoEnriched {
    pub fn new(info: MockInfo) -> Self {
        Self {
            info,
            executables: BTreeMap::new(),
        }
    }

    pub fn with_call(info: MockInfo, method: String, call: MockExecutableInstance) -> Self {
        let mut enriched = Self::new(info);
        enriched.executables.insert(method, vec![call]);
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::update::merge_mock_infos;
    use crate::value::PrimitiveValue;

    fn program() -> Program {
        Program::from_json(
            r#"{"classes":[
                {"name":"app.Service"},
                {"name":"app.Repo"},
                {"name":"db.Client"},
                {"name":"app.Color","kind":"enum","enum_constants":["RED"]}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_strategies() {
        let program = program();
        let ctx = MockContext {
            program: &program,
            class_under_test: "app.Service",
        };
        let repo = Type::class("app.Repo");
        let client = Type::class("db.Client");

        assert!(!MockStrategy::NoMocks.should_mock(&client, &ctx));
        assert!(MockStrategy::OtherPackages.should_mock(&client, &ctx));
        assert!(!MockStrategy::OtherPackages.should_mock(&repo, &ctx));
        assert!(MockStrategy::OtherClasses.should_mock(&repo, &ctx));
        assert!(!MockStrategy::OtherClasses.should_mock(&Type::class("app.Service"), &ctx));
    }

    #[test]
    fn test_library_enum_and_arrays_never_mocked() {
        let program = program();
        let ctx = MockContext {
            program: &program,
            class_under_test: "app.Service",
        };
        let strategy = MockStrategy::OtherClasses;
        assert!(!strategy.should_mock(&Type::class(STRING_CLASS), &ctx));
        assert!(!strategy.should_mock(&Type::class("app.Color"), &ctx));
        assert!(!strategy.should_mock(&Type::array_of(Type::class("app.Repo")), &ctx));
    }

    #[test]
    fn test_merge_appends_calls() {
        let info = MockInfo::Object {
            class: "db.Client".into(),
            addr: Expr::addr(-3),
        };
        let call = |id| MockExecutableInstance {
            id,
            value: SymbolicValue::Primitive(PrimitiveValue::int(id as i32)),
        };
        let merged = merge_mock_infos(
            vec![MockInfoEnriched::with_call(info.clone(), "get()".into(), call(1))],
            vec![MockInfoEnriched::with_call(info, "get()".into(), call(2))],
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].executables["get()"].len(), 2);
    }
}
