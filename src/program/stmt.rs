//! Instruction-level statements of a method body

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::Type;

/// Index of a statement inside its body
pub type StmtIndex = usize;

/// Reference to a field through its declaring (or a subclass) type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    pub class: String,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
}

/// Reference to a method by owner, name and parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    #[serde(default)]
    pub params: Vec<Type>,
    #[serde(default = "void_type")]
    pub ret: Type,
}

pub(crate) fn void_type() -> Type {
    Type::Void
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        write!(f, "{}.{}({})", self.class, self.name, params.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Null,
    Str(String),
    /// Class literal, e.g. `Foo.class`
    Class(Type),
}

impl Constant {
    pub fn ty(&self) -> Type {
        match self {
            Constant::Boolean(_) => Type::Boolean,
            Constant::Byte(_) => Type::Byte,
            Constant::Short(_) => Type::Short,
            Constant::Char(_) => Type::Char,
            Constant::Int(_) => Type::Int,
            Constant::Long(_) => Type::Long,
            Constant::Null => Type::Null,
            Constant::Str(_) => Type::class(super::types::STRING_CLASS),
            Constant::Class(_) => Type::class(super::types::CLASS_CLASS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Local(String),
    Const(Constant),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
    /// Three-way comparison producing -1, 0 or 1
    Cmp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CondOp {
    pub fn negate(self) -> Self {
        match self {
            CondOp::Eq => CondOp::Ne,
            CondOp::Ne => CondOp::Eq,
            CondOp::Lt => CondOp::Ge,
            CondOp::Le => CondOp::Gt,
            CondOp::Gt => CondOp::Le,
            CondOp::Ge => CondOp::Lt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub op: CondOp,
    pub lhs: Operand,
    pub rhs: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeKind {
    Static,
    Virtual,
    Interface,
    /// Constructors, private and `super` calls
    Special,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeExpr {
    pub kind: InvokeKind,
    pub method: MethodRef,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdentityRef {
    This,
    Parameter { index: usize },
    CaughtException,
}

/// Left-hand side of an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Place {
    Local(String),
    Field { base: String, field: FieldRef },
    Static(FieldRef),
    Element { base: String, index: Operand },
}

/// Right-hand side of an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rvalue {
    Use(Operand),
    Binary { op: BinOp, lhs: Operand, rhs: Operand },
    Neg(Operand),
    Cast { ty: Type, value: Operand },
    InstanceOf { ty: Type, value: Operand },
    New { class: String },
    NewArray { element: Type, size: Operand },
    NewMultiArray { ty: Type, sizes: Vec<Operand> },
    Length(Operand),
    Field { base: String, field: FieldRef },
    Static(FieldRef),
    Element { base: String, index: Operand },
    Invoke(InvokeExpr),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Stmt {
    Identity { local: String, value: IdentityRef },
    Assign { target: Place, value: Rvalue },
    If { cond: Condition, target: StmtIndex },
    Goto { target: StmtIndex },
    Switch { key: Operand, cases: Vec<(i64, StmtIndex)>, default: StmtIndex },
    Invoke { call: InvokeExpr },
    Return { #[serde(default)] value: Option<Operand> },
    Throw { value: Operand },
    Nop,
}

impl Stmt {
    /// Whether control may continue with the next statement in the body.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Stmt::Goto { .. } | Stmt::Switch { .. } | Stmt::Return { .. } | Stmt::Throw { .. }
        )
    }

    /// Explicit jump targets of this statement.
    pub fn jump_targets(&self) -> Vec<StmtIndex> {
        match self {
            Stmt::If { target, .. } | Stmt::Goto { target } => vec![*target],
            Stmt::Switch { cases, default, .. } => {
                let mut targets: Vec<StmtIndex> = cases.iter().map(|(_, t)| *t).collect();
                targets.push(*default);
                targets
            }
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Identity { local, value } => write!(f, "{} := {:?}", local, value),
            Stmt::Assign { target, value } => write!(f, "{:?} = {:?}", target, value),
            Stmt::If { cond, target } => write!(
                f,
                "if {:?} {:?} {:?} goto {}",
                cond.lhs, cond.op, cond.rhs, target
            ),
            Stmt::Goto { target } => write!(f, "goto {}", target),
            Stmt::Switch { key, cases, default } => {
                write!(f, "switch {:?} {:?} default {}", key, cases, default)
            }
            Stmt::Invoke { call } => write!(f, "invoke {}", call.method),
            Stmt::Return { value: Some(v) } => write!(f, "return {:?}", v),
            Stmt::Return { value: None } => write!(f, "return"),
            Stmt::Throw { value } => write!(f, "throw {:?}", value),
            Stmt::Nop => write!(f, "nop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stmt_json_shape() {
        let json = r#"{"op":"if","cond":{"op":"lt","lhs":{"local":"i"},"rhs":{"const":{"int":3}}},"target":7}"#;
        let stmt: Stmt = serde_json::from_str(json).unwrap();
        assert_eq!(stmt.jump_targets(), vec![7]);
        assert!(stmt.falls_through());
    }

    #[test]
    fn test_return_without_value() {
        let stmt: Stmt = serde_json::from_str(r#"{"op":"return"}"#).unwrap();
        assert_eq!(stmt, Stmt::Return { value: None });
        assert!(!stmt.falls_through());
    }

    #[test]
    fn test_negate_is_involution() {
        for op in [CondOp::Eq, CondOp::Ne, CondOp::Lt, CondOp::Le, CondOp::Gt, CondOp::Ge] {
            assert_eq!(op.negate().negate(), op);
        }
    }
}
