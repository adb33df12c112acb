//! Concrete models handed to test emission

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::program::Type;
use crate::state::FailureKind;

/// Identifier of a model that can be referenced from elsewhere in the same
/// resolved state.
pub type ModelId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Char(char),
    Str(String),
}

/// A call reproducing part of an object through its public API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<ConcreteModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConcreteModel {
    Null {
        #[serde(rename = "type")]
        ty: Type,
    },
    Primitive {
        #[serde(rename = "type")]
        ty: Type,
        value: Literal,
    },
    Void,
    Array {
        id: ModelId,
        #[serde(rename = "type")]
        ty: Type,
        length: usize,
        elements: Vec<ConcreteModel>,
    },
    Composite {
        id: ModelId,
        #[serde(rename = "type")]
        ty: Type,
        fields: BTreeMap<String, ConcreteModel>,
        /// Answers of a mock, per method, in call order
        mocks: BTreeMap<String, Vec<ConcreteModel>>,
        is_mock: bool,
    },
    Enum {
        #[serde(rename = "type")]
        ty: Type,
        name: String,
        ordinal: usize,
    },
    ClassRef {
        #[serde(rename = "type")]
        ty: Type,
    },
    Assemble {
        id: ModelId,
        #[serde(rename = "type")]
        ty: Type,
        instantiation: MethodCall,
        modifications: Vec<MethodCall>,
    },
    /// The model already built under `id`: an alias or a cycle
    Ref { id: ModelId },
}

impl ConcreteModel {
    pub fn is_null(&self) -> bool {
        matches!(self, ConcreteModel::Null { .. })
    }

    pub fn id(&self) -> Option<ModelId> {
        match self {
            ConcreteModel::Array { id, .. }
            | ConcreteModel::Composite { id, .. }
            | ConcreteModel::Assemble { id, .. }
            | ConcreteModel::Ref { id } => Some(*id),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConcreteModel::Primitive {
                value: Literal::Int(v),
                ..
            } => Some(*v),
            _ => None,
        }
    }
}

/// Inputs or outputs of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub this: Option<ConcreteModel>,
    pub params: Vec<ConcreteModel>,
    /// Static fields keyed by `Class.field`
    pub statics: BTreeMap<String, ConcreteModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        value: ConcreteModel,
    },
    Failure {
        exception: String,
        kind: FailureKind,
        in_nested_method: bool,
        model: ConcreteModel,
    },
}

/// An object the method under test creates that the test has to mock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationHint {
    pub class: String,
    /// Statement creating the instance
    pub caller: String,
    pub mock: ConcreteModel,
}

/// One path turned into concrete values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedExecution {
    pub method: String,
    pub path_id: String,
    pub before: StateModel,
    pub after: StateModel,
    pub result: ExecutionOutcome,
    pub instrumentation: Vec<InstrumentationHint>,
    /// Statements a concrete run reported as covered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coverage: Vec<String>,
}
