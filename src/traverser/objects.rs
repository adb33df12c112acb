// Heap access: object creation, fields, statics, arrays and type checks

use super::Step;
use crate::error::EngineError;
use crate::expr::{Expr, Sort, ADDR_BITS};
use crate::memory::{array_length, ChunkDescriptor, MemoryState, MemoryUpdate, StaticFieldUpdate};
use crate::mock::{MockInfo, MockInfoEnriched};
use crate::program::builtins::{
    ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, ARRAY_STORE_EXCEPTION, CLASS_CAST_EXCEPTION,
    NEGATIVE_ARRAY_SIZE_EXCEPTION,
};
use crate::program::{FieldRef, InvokeKind, Place, Rvalue, Stmt, Type, ENUM_CLASS};
use crate::state::{FailureKind, Frame};
use crate::value::{default_expr, ConcreteHint, PrimitiveValue, ReferenceValue, SymbolicValue, TypeStorage};
use crate::wrappers::{self, wrapper_kind};

/// Field every enum constant stores its ordinal in.
pub(crate) fn ordinal_field() -> FieldRef {
    FieldRef {
        class: ENUM_CLASS.to_string(),
        name: "ordinal".to_string(),
        ty: Type::Int,
    }
}

impl<'a> Step<'a> {
    pub(crate) fn fresh_addr(&self) -> i32 {
        if self.in_static_initializer() {
            self.ctx.counters.new_static_addr()
        } else {
            self.ctx.counters.new_addr()
        }
    }

    /// Wrapper invariants of `addr` were already asserted on this path.
    pub(crate) fn is_visited(&self, addr: &Expr) -> bool {
        self.queued.memory.visited.contains(addr) || self.memory().is_visited(addr).is_true()
    }

    /// Object the program receives from outside: a parameter, a field of an
    /// input, a result of a call without a body.
    ///
    /// `origin` names the field and owner the value was read from.
    pub(crate) fn create_input_object(
        &mut self,
        addr: Expr,
        declared: &Type,
        origin: Option<(&FieldRef, &Expr)>,
    ) -> SymbolicValue {
        let ctx = self.ctx;
        let registry = ctx.types.registry();
        self.queued.memory.touched_addresses.push(addr.clone());
        let not_null = addr.ne(&Expr::null());

        if let Some(kind) = wrapper_kind(declared) {
            let storage = TypeStorage::exact(declared.clone());
            if !self.is_visited(&addr) {
                self.queue_hard(registry.type_constraint(&addr, &storage).all());
                let invariants = wrappers::lookup(kind).input_invariants(self.ctx, &addr);
                self.queue_hard(not_null.implies(&Expr::and(invariants)));
                self.queued.memory.visited.push(addr.clone());
            }
            self.queued
                .memory
                .concrete
                .insert(addr.clone(), ConcreteHint::Wrapper(kind));
            let value = ReferenceValue::new(storage, addr).with_concrete(ConcreteHint::Wrapper(kind));
            return SymbolicValue::Object(value);
        }

        if let Some(class) = declared.class_name() {
            if self.ctx.program.class(class).is_some_and(|c| c.is_enum()) {
                return self.create_enum_input(addr, class);
            }
            if self.ctx.should_mock(declared, self.class_under_test()) {
                let info = match origin {
                    Some((field, owner)) => MockInfo::Field {
                        class: class.to_string(),
                        field: field.clone(),
                        addr: addr.clone(),
                        owner: Some(owner.clone()),
                    },
                    None => MockInfo::Object {
                        class: class.to_string(),
                        addr: addr.clone(),
                    },
                };
                self.queue_hard(Expr::or([
                    addr.eq(&Expr::null()),
                    Expr::and([registry.is_mock(&addr), registry.has_type(&addr, declared)]),
                ]));
                self.queued
                    .memory
                    .addr_to_mock_info
                    .insert(addr.clone(), info.clone());
                self.queued.memory.mock_infos.push(MockInfoEnriched::new(info));
                return SymbolicValue::reference(TypeStorage::exact(declared.clone()), addr);
            }
        }

        let storage = self.ctx.types.construct_type_storage(declared, false);
        if storage.is_empty() {
            self.queue_hard(addr.eq(&Expr::null()));
            return SymbolicValue::null(declared.clone());
        }
        self.queue_hard(registry.type_constraint(&addr, &storage).all());
        if declared.is_array() {
            let length = array_length(&addr);
            let bound = Expr::int32(self.ctx.config.soft_max_array_size);
            self.queue_hard(not_null.implies(&Expr::and([
                length.ge(&Expr::int32(0)),
                length.le(&bound),
            ])));
            self.queue_soft(not_null.implies(&length.le(&Expr::int32(2))));
            self.queued
                .memory
                .addr_to_array_type
                .insert(addr.clone(), declared.clone());
        }
        SymbolicValue::reference(storage, addr)
    }

    /// An enum input is null or one of the constants.
    fn create_enum_input(&mut self, addr: Expr, class: &str) -> SymbolicValue {
        let count = self
            .ctx
            .program
            .class(class)
            .map(|c| c.enum_constants.len())
            .unwrap_or(0);
        let mut options = vec![addr.eq(&Expr::null())];
        for ordinal in 0..count {
            let constant = self.enum_constant(class, ordinal);
            options.push(addr.eq(&constant.addr));
        }
        self.queue_hard(Expr::or(options));
        let value = ReferenceValue::new(TypeStorage::exact(Type::class(class)), addr);
        self.queued.memory.symbolic_enum_values.push(value.clone());
        SymbolicValue::Object(value)
    }

    /// Constant `ordinal` of enum `class` at its fixed address.
    pub(crate) fn enum_constant(&mut self, class: &str, ordinal: usize) -> ReferenceValue {
        let ty = Type::class(class);
        let addr = Expr::addr(self.ctx.counters.enum_constant_addr(class, ordinal));
        let chunk = self.ctx.chunks.field(&ordinal_field());
        let known = self.memory().field_value(chunk.id, &addr).is_some()
            || self.queued.memory.field_values.contains_key(&(chunk.id, addr.clone()));
        if !known {
            self.queue_hard(self.ctx.types.registry().has_type(&addr, &ty));
            let ordinal = PrimitiveValue::int(ordinal as i32);
            self.queued.memory += MemoryUpdate::store(chunk.clone(), addr.clone(), ordinal.expr.clone());
            self.queued
                .memory
                .field_values
                .insert((chunk.id, addr.clone()), SymbolicValue::Primitive(ordinal));
        }
        ReferenceValue::new(TypeStorage::exact(ty), addr)
    }

    fn enum_constant_ordinal(&self, field: &FieldRef) -> Option<usize> {
        let class = self.ctx.program.class(&field.class)?;
        if !class.is_enum() {
            return None;
        }
        class.enum_constants.iter().position(|c| c == &field.name)
    }

    /// The field as declared, looked up from the class it was accessed
    /// through.
    fn declared_field(&self, field: &FieldRef) -> FieldRef {
        match self.ctx.program.resolve_field(&field.class, &field.name) {
            Some((owner, def)) => FieldRef {
                class: owner.to_string(),
                name: field.name.clone(),
                ty: def.ty.clone(),
            },
            None => field.clone(),
        }
    }

    /// Value of `field` at `owner`, given the cell `selected` from the current
    /// memory. A value cached for the same cell keeps its type storage.
    fn field_value(
        &mut self,
        chunk: &ChunkDescriptor,
        owner: &Expr,
        selected: Expr,
        field: &FieldRef,
    ) -> SymbolicValue {
        let key = (chunk.id, owner.clone());
        let cached = self
            .queued
            .memory
            .field_values
            .get(&key)
            .or_else(|| self.memory().field_value(chunk.id, owner));
        if let Some(cached) = cached {
            if cached.expr() == &selected {
                return cached.clone();
            }
        }
        let value = if field.ty.is_primitive() {
            SymbolicValue::primitive(field.ty.clone(), selected)
        } else {
            self.queue_hard(chunk.initial_array().select(owner).le(&Expr::null()));
            self.create_input_object(selected, &field.ty, Some((field, owner)))
        };
        self.queued.memory.field_values.insert(key, value.clone());
        value
    }

    pub(crate) fn read_field(
        &mut self,
        base: &ReferenceValue,
        field: &FieldRef,
    ) -> Result<SymbolicValue, EngineError> {
        self.null_check(&base.addr)?;
        let field = self.declared_field(field);
        let chunk = self.ctx.chunks.field(&field);
        let selected = self
            .memory()
            .find_array(&chunk, &MemoryState::Current)
            .select(&base.addr);
        self.queued.memory += MemoryUpdate::touch_chunk(chunk.clone());
        self.queued.memory += MemoryUpdate::read_field(base.addr.clone(), field.clone());
        let value = self.field_value(&chunk, &base.addr, selected, &field);
        if self.speculatively_not_null(&field) {
            self.queued
                .memory
                .speculatively_not_null
                .push(value.expr().clone());
        }
        Ok(value)
    }

    /// Final reference fields of library classes are assumed to be set, so
    /// dereferencing them never forks a NullPointerException.
    fn speculatively_not_null(&self, field: &FieldRef) -> bool {
        if field.ty.is_primitive() {
            return false;
        }
        let library = self
            .ctx
            .program
            .class(&field.class)
            .is_some_and(|c| c.library);
        let is_final = self
            .ctx
            .program
            .resolve_field(&field.class, &field.name)
            .is_some_and(|(_, def)| def.is_final);
        library && is_final
    }

    pub(crate) fn write_field(
        &mut self,
        base: &ReferenceValue,
        field: &FieldRef,
        value: SymbolicValue,
    ) -> Result<(), EngineError> {
        self.null_check(&base.addr)?;
        let field = self.declared_field(field);
        let value = coerce(value, &field.ty);
        let chunk = self.ctx.chunks.field(&field);
        self.queued.memory +=
            MemoryUpdate::store(chunk.clone(), base.addr.clone(), value.expr().clone());
        self.queued
            .memory
            .field_values
            .insert((chunk.id, base.addr.clone()), value);
        Ok(())
    }

    /// Object holding the static fields of `class`.
    pub(crate) fn static_instance(&self, class: &str) -> ReferenceValue {
        match self.memory().static_instance(class) {
            Some(instance) => instance.clone(),
            None => ReferenceValue::new(
                TypeStorage::exact(Type::class(class)),
                Expr::addr(self.ctx.counters.static_instance_addr(class)),
            ),
        }
    }

    pub(crate) fn read_static(&mut self, field: &FieldRef) -> Result<SymbolicValue, EngineError> {
        let field = self.declared_field(field);
        if let Some(ordinal) = self.enum_constant_ordinal(&field) {
            return Ok(SymbolicValue::Object(self.enum_constant(&field.class, ordinal)));
        }
        let instance = self.static_instance(&field.class);
        let chunk = self.ctx.chunks.field(&field);
        let selected = self
            .memory()
            .find_array(&chunk, &MemoryState::Current)
            .select(&instance.addr);
        self.queued.memory += MemoryUpdate::touch_chunk(chunk.clone());
        let value = self.field_value(&chunk, &instance.addr, selected, &field);
        if !self.in_static_initializer() {
            self.queued.memory.static_field_updates.push(StaticFieldUpdate {
                field: field.clone(),
                value: value.clone(),
            });
            self.queued.memory.meaningful_static_fields.insert(field);
        }
        Ok(value)
    }

    pub(crate) fn write_static(&mut self, field: &FieldRef, value: SymbolicValue) -> Result<(), EngineError> {
        let field = self.declared_field(field);
        let value = coerce(value, &field.ty);
        let instance = self.static_instance(&field.class);
        let chunk = self.ctx.chunks.field(&field);
        self.queued.memory +=
            MemoryUpdate::store(chunk.clone(), instance.addr.clone(), value.expr().clone());
        self.queued
            .memory
            .field_values
            .insert((chunk.id, instance.addr.clone()), value.clone());
        if self.in_static_initializer() {
            self.queued.memory.initialized_static_fields.insert(field);
        } else {
            self.queued
                .memory
                .static_field_updates
                .push(StaticFieldUpdate { field: field.clone(), value });
            self.queued.memory.meaningful_static_fields.insert(field);
        }
        Ok(())
    }

    /// Classes `stmt` needs initialized before it runs.
    fn classes_to_initialize(&self, stmt: &Stmt) -> Vec<String> {
        let program = &self.ctx.program;
        let static_owner = |field: &FieldRef| {
            program
                .resolve_field(&field.class, &field.name)
                .map(|(owner, _)| owner.to_string())
                .unwrap_or_else(|| field.class.clone())
        };
        let call_owner = |kind: InvokeKind, class: &str, name: &str, params: &[Type]| {
            (kind == InvokeKind::Static).then(|| {
                program
                    .resolve_method(class, name, params)
                    .map(|id| program.method(id).class.clone())
                    .unwrap_or_else(|| class.to_string())
            })
        };
        let mut classes = Vec::new();
        match stmt {
            Stmt::Assign { target, value } => {
                if let Place::Static(field) = target {
                    classes.push(static_owner(field));
                }
                match value {
                    Rvalue::Static(field) => classes.push(static_owner(field)),
                    Rvalue::New { class } => classes.push(class.clone()),
                    Rvalue::Invoke(call) => classes.extend(call_owner(
                        call.kind,
                        &call.method.class,
                        &call.method.name,
                        &call.method.params,
                    )),
                    _ => {}
                }
            }
            Stmt::Invoke { call } => classes.extend(call_owner(
                call.kind,
                &call.method.class,
                &call.method.name,
                &call.method.params,
            )),
            _ => {}
        }
        classes
    }

    /// Marks the classes `stmt` needs as initialized, superclasses first.
    /// Returns false when a static initializer was entered instead; the
    /// statement runs again once it returns.
    pub(crate) fn initialize_classes(&mut self, stmt: &Stmt) -> Result<bool, EngineError> {
        for class in self.classes_to_initialize(stmt) {
            let chain: Vec<String> = self
                .ctx
                .program
                .superclass_chain(&class)
                .map(|c| c.name.clone())
                .collect();
            for name in chain.iter().rev() {
                if self.memory().is_class_initialized(name)
                    || self.queued.memory.static_instance_storage.contains_key(name)
                {
                    continue;
                }
                let instance = self.static_instance(name);
                self.queued
                    .memory
                    .static_instance_storage
                    .insert(name.clone(), instance);
                if let Some(clinit) = self.ctx.program.static_initializer(name) {
                    let entry = self.ctx.graph(clinit)?.entry();
                    let frame = Frame::static_initializer(clinit, self.state.stmt, name);
                    let id = self.ctx.counters.state_id();
                    self.out.push(self.state.push(id, entry, frame, &self.queued));
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    pub(crate) fn new_object(&mut self, class: &str) -> Result<SymbolicValue, EngineError> {
        let instantiable = self
            .ctx
            .program
            .class(class)
            .map(|c| c.is_instantiable())
            .ok_or_else(|| self.unsupported(format!("`new` of unknown class {class}")))?;
        if !instantiable {
            return Err(self.unsupported(format!("`new` of abstract type {class}")));
        }
        let ty = Type::class(class);
        let addr = Expr::addr(self.fresh_addr());
        let storage = TypeStorage::exact(ty.clone());
        let constraint = self
            .ctx
            .types
            .registry()
            .type_constraint(&addr, &storage)
            .is_constraint();
        self.queue_hard(constraint);
        self.queued.memory.touched_addresses.push(addr.clone());
        let value = ReferenceValue::new(storage, addr.clone());

        if let Some(kind) = wrapper_kind(&ty) {
            self.queued
                .memory
                .concrete
                .insert(addr, ConcreteHint::Wrapper(kind));
            return Ok(SymbolicValue::Object(value.with_concrete(ConcreteHint::Wrapper(kind))));
        }

        let mocked = !self.in_static_initializer()
            && self.ctx.config.mock_new_instances.iter().any(|c| c == class);
        if mocked {
            let info = MockInfo::NewInstance {
                class: class.to_string(),
                addr: addr.clone(),
                caller: self.location(),
            };
            self.queued.memory.addr_to_mock_info.insert(addr, info.clone());
            self.queued.memory.mock_infos.push(MockInfoEnriched::new(info));
            return Ok(SymbolicValue::Object(value));
        }

        for (owner, def) in self.ctx.program.instance_fields(class) {
            let field = FieldRef {
                class: owner.to_string(),
                name: def.name.clone(),
                ty: def.ty.clone(),
            };
            let chunk = self.ctx.chunks.field(&field);
            self.queued.memory += MemoryUpdate::store(chunk, addr.clone(), default_expr(&def.ty));
        }
        Ok(SymbolicValue::Object(value))
    }

    /// `new T[n]...`; every dimension but the last must have a concrete size.
    pub(crate) fn new_array(
        &mut self,
        ty: &Type,
        sizes: &[SymbolicValue],
    ) -> Result<SymbolicValue, EngineError> {
        let (first, rest) = sizes
            .split_first()
            .ok_or_else(|| self.invariant("array creation without a size"))?;
        let element = ty
            .element_type()
            .cloned()
            .ok_or_else(|| self.invariant(format!("`{ty}` is not an array type")))?;
        let size = self.int_value(first)?;
        self.implicit_failure(
            size.lt(&Expr::int32(0)),
            NEGATIVE_ARRAY_SIZE_EXCEPTION,
            FailureKind::Implicit,
        )?;
        let soft = self.ctx.config.soft_max_array_size;
        let bound = match size.as_int() {
            Some(n) => n.clamp(soft as i128, self.ctx.config.hard_max_array_size as i128) as i32,
            None => soft,
        };
        self.queue_hard(size.le(&Expr::int32(bound)));
        if self.is_dead() {
            return Ok(SymbolicValue::null(ty.clone()));
        }

        let addr = Expr::addr(self.fresh_addr());
        let storage = TypeStorage::exact(ty.clone());
        let constraint = self
            .ctx
            .types
            .registry()
            .type_constraint(&addr, &storage)
            .is_constraint();
        self.queue_hard(constraint);
        self.queue_hard(array_length(&addr).eq(&size));
        self.queued.memory.touched_addresses.push(addr.clone());
        self.queued
            .memory
            .addr_to_array_type
            .insert(addr.clone(), ty.clone());

        let mut cells = Expr::const_array(Sort::BitVec(ADDR_BITS), default_expr(&element));
        if !rest.is_empty() {
            let n = size
                .as_int()
                .ok_or_else(|| self.unsupported("multi-dimensional array with a symbolic size"))?;
            for i in 0..n {
                let inner = self.new_array(&element, rest)?;
                cells = cells.store(&Expr::int32(i as i32), inner.expr());
            }
        }
        self.queued.memory += MemoryUpdate::store(self.ctx.chunks.array(ty), addr.clone(), cells);
        Ok(SymbolicValue::reference(storage, addr))
    }

    fn array_type_of(&self, base: &ReferenceValue) -> Result<(Type, Type), EngineError> {
        let ty = base.ty().clone();
        match ty.element_type().cloned() {
            Some(element) => Ok((ty, element)),
            None => Err(self.invariant(format!("element access on non-array `{ty}`"))),
        }
    }

    fn bounds_check(&mut self, base: &ReferenceValue, index: &Expr) -> Result<(), EngineError> {
        let length = array_length(&base.addr);
        let outside = Expr::or([index.lt(&Expr::int32(0)), index.ge(&length)]);
        self.implicit_failure(outside, ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, FailureKind::Implicit)
    }

    pub(crate) fn array_length(&mut self, array: &SymbolicValue) -> Result<SymbolicValue, EngineError> {
        let base = array
            .as_reference()
            .ok_or_else(|| self.invariant("length of a primitive"))?
            .clone();
        self.null_check(&base.addr)?;
        Ok(SymbolicValue::primitive(Type::Int, array_length(&base.addr)))
    }

    pub(crate) fn read_element(
        &mut self,
        base: &ReferenceValue,
        index: &SymbolicValue,
    ) -> Result<SymbolicValue, EngineError> {
        let (ty, element) = self.array_type_of(base)?;
        let index = self.int_value(index)?;
        self.null_check(&base.addr)?;
        self.bounds_check(base, &index)?;
        let chunk = self.ctx.chunks.array(&ty);
        let cells = self
            .memory()
            .find_array(&chunk, &MemoryState::Current)
            .select(&base.addr);
        self.queued.memory += MemoryUpdate::touch_chunk(chunk.clone());
        let value = cells.select(&index);
        if element.is_primitive() {
            return Ok(SymbolicValue::primitive(element, value));
        }
        let key = (chunk.id, value.clone());
        let known = self
            .queued
            .memory
            .element_values
            .get(&key)
            .or_else(|| self.memory().element_value(chunk.id, &value));
        if let Some(known) = known {
            return Ok(known.clone());
        }
        let initial = chunk.initial_array().select(&base.addr).select(&index);
        self.queue_hard(initial.le(&Expr::null()));
        let read = self.create_input_object(value, &element, None);
        self.queued.memory.element_values.insert(key, read.clone());
        Ok(read)
    }

    pub(crate) fn write_element(
        &mut self,
        base: &ReferenceValue,
        index: &SymbolicValue,
        value: SymbolicValue,
    ) -> Result<(), EngineError> {
        let (ty, element) = self.array_type_of(base)?;
        let index = self.int_value(index)?;
        self.null_check(&base.addr)?;
        self.bounds_check(base, &index)?;
        if let Some(stored) = value.as_reference() {
            self.array_store_check(base, stored)?;
        }
        let value = coerce(value, &element);
        let chunk = self.ctx.chunks.array(&ty);
        if !element.is_primitive() {
            self.queued
                .memory
                .element_values
                .insert((chunk.id, value.expr().clone()), value.clone());
        }
        let cells = self
            .memory()
            .find_array(&chunk, &MemoryState::Current)
            .select(&base.addr);
        let cells = cells.store(&index, value.expr());
        self.queued.memory += MemoryUpdate::store(chunk, base.addr.clone(), cells);
        Ok(())
    }

    /// A reference stored into an array must fit the runtime element type.
    fn array_store_check(&mut self, base: &ReferenceValue, value: &ReferenceValue) -> Result<(), EngineError> {
        let registry = self.ctx.types.registry();
        let mut failing = Vec::new();
        for array_ty in &base.storage.possible {
            let Some(element) = array_ty.element_type() else {
                continue;
            };
            let fits: Vec<Type> = value
                .storage
                .possible
                .iter()
                .filter(|t| self.ctx.types.is_subtype(t, element))
                .cloned()
                .collect();
            if fits.len() == value.storage.possible.len() {
                continue;
            }
            let storage = TypeStorage::new(element.clone(), fits);
            let fits = registry.type_constraint(&value.addr, &storage).is;
            failing.push(Expr::and([registry.has_type(&base.addr, array_ty), fits.not()]));
        }
        if failing.is_empty() {
            return Ok(());
        }
        let cond = Expr::and([value.addr.ne(&Expr::null()), Expr::or(failing)]);
        self.implicit_failure(cond, ARRAY_STORE_EXCEPTION, FailureKind::Implicit)
    }

    pub(crate) fn cast(&mut self, value: &SymbolicValue, ty: &Type) -> Result<SymbolicValue, EngineError> {
        let reference = match value {
            SymbolicValue::Primitive(p) if ty.is_primitive() => {
                return Ok(SymbolicValue::Primitive(p.cast(ty)));
            }
            SymbolicValue::Primitive(p) => {
                return Err(self.invariant(format!("cast of {} to {ty}", p.ty)));
            }
            SymbolicValue::Object(r) | SymbolicValue::Array(r) => r,
        };
        let narrowed = self.ctx.types.down_cast(reference, ty);
        if narrowed.storage.possible.len() < reference.storage.possible.len() {
            let is = self
                .ctx
                .types
                .registry()
                .type_constraint(&reference.addr, &narrowed.storage)
                .is;
            let cond = Expr::and([reference.addr.ne(&Expr::null()), is.not()]);
            self.implicit_failure(cond, CLASS_CAST_EXCEPTION, FailureKind::Implicit)?;
        }
        let mut cast = narrowed;
        if cast.storage.is_empty() {
            cast.storage = TypeStorage::exact(ty.clone());
        }
        Ok(match cast.ty().is_array() {
            true => SymbolicValue::Array(cast),
            false => SymbolicValue::Object(cast),
        })
    }

    pub(crate) fn instance_of(&mut self, value: &SymbolicValue, ty: &Type) -> Result<PrimitiveValue, EngineError> {
        let reference = value
            .as_reference()
            .ok_or_else(|| self.invariant("instanceof on a primitive"))?;
        let narrowed = self.ctx.types.down_cast(reference, ty);
        let not_null = reference.addr.ne(&Expr::null());
        let holds = if narrowed.storage.is_empty() {
            Expr::bool(false)
        } else if narrowed.storage.possible.len() == reference.storage.possible.len() {
            not_null
        } else {
            let is = self
                .ctx
                .types
                .registry()
                .type_constraint(&reference.addr, &narrowed.storage)
                .is;
            Expr::and([not_null, is])
        };
        Ok(PrimitiveValue::new(Type::Boolean, holds))
    }
}

/// Converts primitives stored into a slot of another primitive type.
pub(super) fn coerce(value: SymbolicValue, ty: &Type) -> SymbolicValue {
    match value {
        SymbolicValue::Primitive(p) if ty.is_primitive() && &p.ty != ty => {
            SymbolicValue::Primitive(p.cast(ty))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{context, run_to_end};
    use crate::program::builtins::{ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, NULL_POINTER_EXCEPTION};
    use crate::state::MethodResult;

    fn failures(states: &[crate::state::ExecutionState]) -> Vec<String> {
        let mut classes: Vec<String> = states
            .iter()
            .filter_map(|s| match &s.result {
                Some(MethodResult::Failure(f)) => Some(f.class.clone()),
                _ => None,
            })
            .collect();
        classes.sort();
        classes
    }

    #[test]
    fn test_field_read_forks_null_pointer() {
        let ctx = context(
            r#"{"classes":[{"name":"demo.Box","fields":[{"name":"v","type":"int"}],"methods":[
                {"name":"get","params":["demo.Box"],"ret":"int","static":true,"body":{"stmts":[
                    {"op":"identity","local":"b","value":{"kind":"parameter","index":0}},
                    {"op":"assign","target":{"local":"x"},"value":{"field":{"base":"b","field":{"class":"demo.Box","name":"v","type":"int"}}}},
                    {"op":"return","value":{"local":"x"}}
                ]}}
            ]}]}"#,
        );
        let done = run_to_end(&ctx, "demo.Box.get");
        assert_eq!(done.len(), 2);
        assert_eq!(failures(&done), vec![NULL_POINTER_EXCEPTION.to_string()]);
    }

    #[test]
    fn test_array_read_forks_bounds_and_null() {
        let ctx = context(
            r#"{"classes":[{"name":"demo.A","methods":[
                {"name":"first","params":["int[]"],"ret":"int","static":true,"body":{"stmts":[
                    {"op":"identity","local":"a","value":{"kind":"parameter","index":0}},
                    {"op":"assign","target":{"local":"x"},"value":{"element":{"base":"a","index":{"const":{"int":0}}}}},
                    {"op":"return","value":{"local":"x"}}
                ]}}
            ]}]}"#,
        );
        let done = run_to_end(&ctx, "demo.A.first");
        assert_eq!(done.len(), 3);
        assert_eq!(
            failures(&done),
            vec![
                ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION.to_string(),
                NULL_POINTER_EXCEPTION.to_string()
            ]
        );
    }

    #[test]
    fn test_new_object_fields_start_at_default() {
        let ctx = context(
            r#"{"classes":[{"name":"demo.C","fields":[{"name":"n","type":"int"}],"methods":[
                {"name":"fresh","ret":"int","static":true,"body":{"stmts":[
                    {"op":"assign","target":{"local":"c"},"value":{"new":{"class":"demo.C"}}},
                    {"op":"assign","target":{"local":"x"},"value":{"field":{"base":"c","field":{"class":"demo.C","name":"n","type":"int"}}}},
                    {"op":"return","value":{"local":"x"}}
                ]}}
            ]}]}"#,
        );
        let done = run_to_end(&ctx, "demo.C.fresh");
        assert_eq!(done.len(), 1);
        match &done[0].result {
            Some(MethodResult::Success(Some(v))) => assert_eq!(v.expr().as_int(), Some(0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_static_initializer_runs_before_first_access() {
        let ctx = context(
            r#"{"classes":[{"name":"demo.S","fields":[{"name":"k","type":"int","static":true}],"methods":[
                {"name":"<clinit>","static":true,"body":{"stmts":[
                    {"op":"assign","target":{"static":{"class":"demo.S","name":"k","type":"int"}},"value":{"use":{"const":{"int":7}}}},
                    {"op":"return"}
                ]}},
                {"name":"read","ret":"int","static":true,"body":{"stmts":[
                    {"op":"assign","target":{"local":"x"},"value":{"static":{"class":"demo.S","name":"k","type":"int"}}},
                    {"op":"return","value":{"local":"x"}}
                ]}}
            ]}]}"#,
        );
        let done = run_to_end(&ctx, "demo.S.read");
        assert_eq!(done.len(), 1);
        match &done[0].result {
            Some(MethodResult::Success(Some(v))) => assert_eq!(v.expr().as_int(), Some(7)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(done[0].symbolic.memory.static_fields().len(), 1);
    }
}
