//! From a solver model back to concrete objects
//!
//! A [`Resolver`] reads one memory snapshot through one satisfying model.
//! Every object gets an id the moment it is first reached, before its fields
//! or cells are read; a second visit yields [`ConcreteModel::Ref`], so cyclic
//! and aliased heaps resolve to finite models. Whatever cannot be given a
//! concrete type resolves to null.

pub mod model;

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::engine::EngineContext;
use crate::expr::{to_unsigned, wrap, Expr, ADDR_BITS};
use crate::memory::{array_length, ChunkDescriptor, Memory, MemoryState};
use crate::mock::{MockInfo, MockInfoEnriched};
use crate::program::builtins::unboxed_type;
use crate::program::{FieldRef, Type, CONSTRUCTOR};
use crate::solver::SatModel;
use crate::state::{ExecutionState, MethodResult};
use crate::value::{ConcreteHint, ReferenceValue, SymbolicValue};
use crate::wrappers::{self, wrapper_kind, WrapperKind};

pub use model::{
    ConcreteModel, ExecutionOutcome, InstrumentationHint, Literal, MethodCall, ModelId,
    ResolvedExecution, StateModel,
};

pub struct Resolver<'a> {
    ctx: &'a EngineContext,
    model: &'a SatModel,
    memory: &'a Memory,
    snapshot: MemoryState,
    built: HashMap<i128, ModelId>,
    /// Models without identity, such as strings, reused as values
    plain: HashMap<i128, ConcreteModel>,
    next_id: ModelId,
    read_fields: HashMap<i128, Vec<FieldRef>>,
    mocks: HashMap<i128, &'a MockInfoEnriched>,
}

impl<'a> Resolver<'a> {
    pub fn new(ctx: &'a EngineContext, model: &'a SatModel, memory: &'a Memory, snapshot: MemoryState) -> Self {
        let read_fields = memory.initialized_fields(|addr| model.eval_int(addr));
        let mocks = memory
            .mocks()
            .map(|m| (model.eval_int(m.info.addr()), m))
            .collect();
        Self {
            ctx,
            model,
            memory,
            snapshot,
            built: HashMap::new(),
            plain: HashMap::new(),
            next_id: 0,
            read_fields,
            mocks,
        }
    }

    pub fn ctx(&self) -> &'a EngineContext {
        self.ctx
    }

    pub fn eval_int(&self, expr: &Expr) -> i128 {
        self.model.eval_int(expr)
    }

    pub fn eval_bool(&self, expr: &Expr) -> bool {
        self.model.eval_bool(expr)
    }

    /// Cell of `chunk` at `addr` in the snapshot being resolved.
    pub fn cell(&self, chunk: &ChunkDescriptor, addr: &Expr) -> Expr {
        self.memory.find_array(chunk, &self.snapshot).select(addr)
    }

    /// Reads `value` in `snapshot` instead of the resolver's own.
    pub fn resolve_in(&mut self, value: &SymbolicValue, snapshot: MemoryState) -> ConcreteModel {
        let saved = std::mem::replace(&mut self.snapshot, snapshot);
        let model = self.resolve(value);
        self.snapshot = saved;
        model
    }

    pub fn resolve(&mut self, value: &SymbolicValue) -> ConcreteModel {
        match value {
            SymbolicValue::Primitive(p) => self.primitive(&p.ty, &p.expr),
            SymbolicValue::Object(r) | SymbolicValue::Array(r) => self.resolve_value(r),
        }
    }

    fn primitive(&self, ty: &Type, expr: &Expr) -> ConcreteModel {
        let value = match ty {
            Type::Boolean => Literal::Bool(self.eval_bool(expr)),
            Type::Char => {
                let code = to_unsigned(self.eval_int(expr), 16) as u32;
                Literal::Char(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
            }
            _ => {
                let bits = ty.bit_width().unwrap_or(32);
                Literal::Int(wrap(self.eval_int(expr), bits) as i64)
            }
        };
        ConcreteModel::Primitive {
            ty: ty.clone(),
            value,
        }
    }

    fn resolve_value(&mut self, value: &ReferenceValue) -> ConcreteModel {
        if let Some(ConcreteHint::ClassRef(ty)) = &value.concrete {
            return ConcreteModel::ClassRef { ty: ty.clone() };
        }
        let declared = match &value.concrete {
            Some(ConcreteHint::Wrapper(_)) => value.storage.least_common.clone(),
            _ => value.ty().clone(),
        };
        self.resolve_reference(&value.addr, &declared)
    }

    /// Model of the object at `addr` declared as `declared`.
    pub fn resolve_reference(&mut self, addr: &Expr, declared: &Type) -> ConcreteModel {
        let concrete = wrap(self.eval_int(addr), ADDR_BITS);
        if concrete == 0 {
            return ConcreteModel::Null { ty: declared.clone() };
        }
        if let Some(id) = self.built.get(&concrete) {
            return ConcreteModel::Ref { id: *id };
        }
        if let Some(model) = self.plain.get(&concrete) {
            return model.clone();
        }
        if let Some(mock) = self.mocks.get(&concrete).copied() {
            return self.resolve_mock(concrete, mock);
        }
        if let Some(model) = self.resolve_enum(concrete, declared) {
            return model;
        }
        let addr_const = Expr::addr(concrete as i32);
        let hinted = match self.memory.take_concrete(&addr_const, &self.snapshot) {
            Some(ConcreteHint::Wrapper(kind)) => Some(*kind),
            Some(ConcreteHint::ClassRef(ty)) => return ConcreteModel::ClassRef { ty: ty.clone() },
            None => None,
        };
        if let Some(kind) = hinted.or_else(|| wrapper_kind(declared)) {
            return self.resolve_wrapper(concrete, addr, kind);
        }

        if !self.eval_bool(&self.memory.is_touched(addr)) {
            return ConcreteModel::Null { ty: declared.clone() };
        }
        let Some(ty) = self.concrete_type(addr, declared) else {
            debug!(addr = concrete, declared = %declared, "no concrete type, resolving to null");
            return ConcreteModel::Null { ty: declared.clone() };
        };
        if let Some(kind) = wrapper_kind(&ty) {
            return self.resolve_wrapper(concrete, addr, kind);
        }
        if ty.is_array() {
            self.resolve_array(concrete, addr, ty)
        } else {
            self.resolve_object(concrete, addr, ty)
        }
    }

    fn resolve_wrapper(&mut self, concrete: i128, addr: &Expr, kind: WrapperKind) -> ConcreteModel {
        let id = self.register(concrete);
        let model = wrappers::lookup(kind).resolve(self, addr, id);
        if model.id() != Some(id) {
            self.built.remove(&concrete);
            self.plain.insert(concrete, model.clone());
        }
        model
    }

    fn register(&mut self, concrete: i128) -> ModelId {
        let id = self.next_id;
        self.next_id += 1;
        self.built.insert(concrete, id);
        id
    }

    /// The most specific instantiable type the model allows.
    fn concrete_type(&self, addr: &Expr, declared: &Type) -> Option<Type> {
        let registry = self.ctx.types.registry();
        let id = self.eval_int(&registry.sym_type_id(addr)) as i32;
        let dims = self.eval_int(&registry.sym_num_dimensions(addr)) as i32;
        let evaluated = registry
            .type_by_id(id, dims)
            .filter(|t| self.ctx.types.is_subtype(t, declared));
        let evaluated = evaluated.unwrap_or_else(|| declared.clone());
        if evaluated.is_array() {
            return Some(evaluated);
        }
        self.ctx
            .types
            .find_any_concrete_inheritor_including_or_default(&evaluated, declared)
    }

    fn resolve_enum(&self, concrete: i128, declared: &Type) -> Option<ConcreteModel> {
        let class = self.ctx.program.class(declared.class_name()?)?;
        if !class.is_enum() {
            return None;
        }
        class.enum_constants.iter().enumerate().find_map(|(ordinal, name)| {
            let addr = self.ctx.counters.enum_constant_addr(&class.name, ordinal);
            (addr as i128 == concrete).then(|| ConcreteModel::Enum {
                ty: declared.clone(),
                name: name.clone(),
                ordinal,
            })
        })
    }

    fn resolve_mock(&mut self, concrete: i128, mock: &'a MockInfoEnriched) -> ConcreteModel {
        let id = self.register(concrete);
        let mut mocks = BTreeMap::new();
        for (method, calls) in &mock.executables {
            let answers = calls.iter().map(|call| self.resolve(&call.value)).collect();
            mocks.insert(method.clone(), answers);
        }
        ConcreteModel::Composite {
            id,
            ty: Type::class(mock.info.class()),
            fields: BTreeMap::new(),
            mocks,
            is_mock: true,
        }
    }

    fn resolve_array(&mut self, concrete: i128, addr: &Expr, ty: Type) -> ConcreteModel {
        let id = self.register(concrete);
        let length = self
            .eval_int(&array_length(addr))
            .clamp(0, self.ctx.config.hard_max_array_size as i128) as usize;
        let element = ty.element_type().cloned().unwrap_or_else(Type::object);
        let cells = self.cell(&self.ctx.chunks.array(&ty), addr);
        let elements = (0..length)
            .map(|i| {
                let cell = cells.select(&Expr::int32(i as i32));
                if element.is_primitive() {
                    self.primitive(&element, &cell)
                } else {
                    self.resolve_reference(&cell, &element)
                }
            })
            .collect();
        ConcreteModel::Array {
            id,
            ty,
            length,
            elements,
        }
    }

    fn resolve_object(&mut self, concrete: i128, addr: &Expr, ty: Type) -> ConcreteModel {
        let id = self.register(concrete);
        if let Some(class) = ty.class_name() {
            if let Some(primitive) = unboxed_type(class) {
                return self.resolve_boxed(id, addr, class, primitive);
            }
        }
        let mut fields = BTreeMap::new();
        let read = self.read_fields.get(&concrete).cloned().unwrap_or_default();
        for field in read {
            let cell = self.cell(&self.ctx.chunks.field(&field), addr);
            let model = if field.ty.is_primitive() {
                self.primitive(&field.ty, &cell)
            } else {
                self.resolve_reference(&cell, &field.ty)
            };
            fields.insert(field.name.clone(), model);
        }
        ConcreteModel::Composite {
            id,
            ty,
            fields,
            mocks: BTreeMap::new(),
            is_mock: false,
        }
    }

    /// Boxed primitives are rebuilt with their constructor.
    fn resolve_boxed(&mut self, id: ModelId, addr: &Expr, class: &str, primitive: Type) -> ConcreteModel {
        let field = FieldRef {
            class: class.to_string(),
            name: "value".to_string(),
            ty: primitive.clone(),
        };
        let value = self.primitive(&primitive, &self.cell(&self.ctx.chunks.field(&field), addr));
        ConcreteModel::Assemble {
            id,
            ty: Type::class(class),
            instantiation: MethodCall {
                method: format!("{class}.{CONSTRUCTOR}({primitive})"),
                args: vec![value],
            },
            modifications: Vec::new(),
        }
    }
}

/// Before and after models of a terminal state under `model`.
pub fn resolve_execution(ctx: &EngineContext, state: &ExecutionState, model: &SatModel) -> ResolvedExecution {
    let memory = &state.symbolic.memory;
    let inputs = &state.inputs;

    let mut before = Resolver::new(ctx, model, memory, MemoryState::Initial);
    let mut before_state = StateModel {
        this: inputs.this.as_ref().map(|v| before.resolve(v)),
        params: inputs.params.iter().map(|v| before.resolve(v)).collect(),
        statics: BTreeMap::new(),
    };

    let mut after = Resolver::new(ctx, model, memory, MemoryState::Current);
    let mut after_state = StateModel {
        this: inputs.this.as_ref().map(|v| after.resolve(v)),
        params: inputs.params.iter().map(|v| after.resolve(v)).collect(),
        statics: BTreeMap::new(),
    };

    for (field, states) in memory.static_fields() {
        let key = format!("{}.{}", field.class, field.name);
        let first = before.resolve_in(&states.before, MemoryState::StaticInitial(field.clone()));
        before_state.statics.insert(key.clone(), first);
        after_state.statics.insert(key, after.resolve(&states.after));
    }

    let result = match &state.result {
        Some(MethodResult::Success(Some(value))) => ExecutionOutcome::Success {
            value: after.resolve(value),
        },
        Some(MethodResult::Success(None)) | None => ExecutionOutcome::Success {
            value: ConcreteModel::Void,
        },
        Some(MethodResult::Failure(failure)) => ExecutionOutcome::Failure {
            exception: failure.class.clone(),
            kind: failure.kind,
            in_nested_method: failure.in_nested_method,
            model: after.resolve(&failure.exception),
        },
    };

    let instrumentation = memory
        .mocks()
        .filter_map(|m| match &m.info {
            MockInfo::NewInstance { class, caller, addr } => Some(InstrumentationHint {
                class: class.clone(),
                caller: caller.clone(),
                mock: after.resolve_reference(addr, &Type::class(class)),
            }),
            _ => None,
        })
        .collect();

    let method = ctx
        .program
        .method(state.frames().next().map(|f| f.method).unwrap_or(state.stmt.method))
        .to_string();
    ResolvedExecution {
        method,
        path_id: state.path_id(),
        before: before_state,
        after: after_state,
        result,
        instrumentation,
        coverage: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Key, Sort, Value};
    use crate::memory::MemoryUpdate;
    use crate::program::Program;
    use crate::solver::Model;
    use crate::config::EngineConfig;
    use std::sync::Arc;

    /// Model answering fixed cells and zero elsewhere.
    #[derive(Debug, Default)]
    struct Fixed(HashMap<Key, Value>);

    impl Model for Fixed {
        fn value_of(&self, key: &Key, sort: &Sort) -> Value {
            self.0.get(key).cloned().unwrap_or_else(|| sort.default_value())
        }
    }

    fn cell(array: &str, index: i128) -> Key {
        Key::Cell {
            array: array.to_string(),
            path: vec![index],
        }
    }

    fn int(value: i128) -> Value {
        Value::Int { value, bits: 32 }
    }

    fn context() -> EngineContext {
        let program = Program::from_json(
            r#"{"classes":[{"name":"demo.Node","fields":[
                {"name":"next","type":"demo.Node"},
                {"name":"value","type":"int"}
            ]}]}"#,
        )
        .unwrap();
        EngineContext::new(Arc::new(program), EngineConfig::default())
    }

    fn next_field() -> FieldRef {
        FieldRef {
            class: "demo.Node".to_string(),
            name: "next".to_string(),
            ty: Type::class("demo.Node"),
        }
    }

    #[test]
    fn test_untouched_address_resolves_to_null() {
        let ctx = context();
        let node = Type::class("demo.Node");
        let mut values = HashMap::new();
        values.insert(Key::Scalar("p".to_string()), int(-3));
        values.insert(cell(crate::types::TYPE_ID_ARRAY, -3), int(ctx.types.registry().type_id(&node) as i128));
        let model = SatModel::new(Box::new(Fixed(values)));
        let memory = Memory::new();
        let mut resolver = Resolver::new(&ctx, &model, &memory, MemoryState::Initial);
        let resolved = resolver.resolve_reference(&Expr::var("p", Sort::BitVec(32)), &node);
        assert!(resolved.is_null());
    }

    #[test]
    fn test_self_reference_resolves_to_a_cycle() {
        let ctx = context();
        let node = Type::class("demo.Node");
        let p = Expr::var("p", Sort::BitVec(32));
        let chunk = ctx.chunks.field(&next_field());
        let mut update = MemoryUpdate::touch_address(p.clone());
        update += MemoryUpdate::touch_chunk(chunk.clone());
        update += MemoryUpdate::read_field(p.clone(), next_field());
        let memory = Memory::new().update(&update);

        let mut values = HashMap::new();
        values.insert(Key::Scalar("p".to_string()), int(-1));
        values.insert(cell(&chunk.name, -1), int(-1));
        values.insert(cell(crate::types::TYPE_ID_ARRAY, -1), int(ctx.types.registry().type_id(&node) as i128));
        let model = SatModel::new(Box::new(Fixed(values)));

        let mut resolver = Resolver::new(&ctx, &model, &memory, MemoryState::Initial);
        match resolver.resolve_reference(&p, &node) {
            ConcreteModel::Composite { id, fields, .. } => {
                assert_eq!(fields.get("next"), Some(&ConcreteModel::Ref { id }));
            }
            other => panic!("expected an object, got {:?}", other),
        }
    }

    #[test]
    fn test_primitive_models_are_sign_normalized() {
        let ctx = context();
        let mut values = HashMap::new();
        values.insert(Key::Scalar("b".to_string()), Value::Int { value: -1, bits: 8 });
        values.insert(Key::Scalar("c".to_string()), Value::Int { value: 65, bits: 16 });
        let model = SatModel::new(Box::new(Fixed(values)));
        let memory = Memory::new();
        let mut resolver = Resolver::new(&ctx, &model, &memory, MemoryState::Current);
        let b = SymbolicValue::primitive(Type::Byte, Expr::var("b", Sort::BitVec(8)));
        let c = SymbolicValue::primitive(Type::Char, Expr::var("c", Sort::BitVec(16)));
        assert_eq!(resolver.resolve(&b).as_int(), Some(-1));
        assert_eq!(
            resolver.resolve(&c),
            ConcreteModel::Primitive {
                ty: Type::Char,
                value: Literal::Char('A')
            }
        );
    }
}
