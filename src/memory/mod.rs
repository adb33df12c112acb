//! Chunked symbolic heap
//!
//! The heap is split into chunks, one per field and one per array element
//! kind. Each chunk is an array expression from addresses to values. A
//! [`Memory`] keeps the initial and the current array of every chunk it has
//! seen plus the bookkeeping the resolver needs. It is immutable: `update`
//! returns a new memory sharing everything unchanged with the old one.

pub mod locals;
pub mod update;

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::expr::{Expr, Sort, ADDR_BITS};
use crate::mock::{MockInfo, MockInfoEnriched};
use crate::program::{FieldRef, Type};
use crate::value::{sort_of, ConcreteHint, ReferenceValue, SymbolicValue};

pub use locals::{LocalMemory, LocalMemoryUpdate};
pub use update::{
    FieldStates, InstanceFieldRead, MemoryUpdate, NamedStore, StaticFieldUpdate,
};

/// Index-based chunk identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u32);

/// A chunk with the name and value sort of its backing array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkDescriptor {
    pub id: ChunkId,
    pub name: Arc<str>,
    pub value_sort: Sort,
}

impl ChunkDescriptor {
    pub fn sort(&self) -> Sort {
        Sort::array(Sort::BitVec(ADDR_BITS), self.value_sort.clone())
    }

    /// Unconstrained array the chunk holds before any store.
    pub fn initial_array(&self) -> Expr {
        Expr::var(self.name.to_string(), self.sort())
    }
}

pub const REF_ARRAYS_CHUNK: &str = "RefValues_Arrays";
pub const MULTI_ARRAYS_CHUNK: &str = "Multi_Arrays";
pub const ARRAYS_LENGTH: &str = "arraysLength";
pub const CLASS_REF_TYPE_CHUNK: &str = "classRefType";
pub const CLASS_REF_DIMENSIONS_CHUNK: &str = "classRefNumDimensions";

/// Interns chunk descriptors for one run.
#[derive(Debug, Default)]
pub struct ChunkRegistry {
    chunks: RefCell<HashMap<String, ChunkDescriptor>>,
}

impl ChunkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk(&self, name: &str, value_sort: Sort) -> ChunkDescriptor {
        let mut chunks = self.chunks.borrow_mut();
        let next = ChunkId(chunks.len() as u32);
        chunks
            .entry(name.to_string())
            .or_insert_with(|| ChunkDescriptor {
                id: next,
                name: Arc::from(name),
                value_sort,
            })
            .clone()
    }

    pub fn field(&self, field: &FieldRef) -> ChunkDescriptor {
        self.chunk(
            &format!("{}.{}", field.class, field.name),
            sort_of(&field.ty),
        )
    }

    /// Chunk holding the element arrays of arrays of type `array_type`.
    pub fn array(&self, array_type: &Type) -> ChunkDescriptor {
        let element = array_type.element_type().cloned().unwrap_or_else(Type::object);
        let cells = Sort::array(Sort::BitVec(ADDR_BITS), sort_of(&element));
        if element.is_primitive() {
            self.chunk(&format!("{}_Arrays", element), cells)
        } else if array_type.num_dimensions() > 1 {
            self.chunk(MULTI_ARRAYS_CHUNK, cells)
        } else {
            self.chunk(REF_ARRAYS_CHUNK, cells)
        }
    }

    pub fn class_ref_type(&self) -> ChunkDescriptor {
        self.chunk(CLASS_REF_TYPE_CHUNK, Sort::BitVec(32))
    }

    pub fn class_ref_dimensions(&self) -> ChunkDescriptor {
        self.chunk(CLASS_REF_DIMENSIONS_CHUNK, Sort::BitVec(32))
    }
}

/// Length of the array at `addr`. Lengths are never stored: every address
/// is fresh, so a `new` array constrains its own cell.
pub fn array_length(addr: &Expr) -> Expr {
    Expr::var(
        ARRAYS_LENGTH,
        Sort::array(Sort::BitVec(ADDR_BITS), Sort::BitVec(32)),
    )
    .select(addr)
}

/// Snapshot a chunk array is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryState {
    Initial,
    Current,
    /// Memory at the first write of a static field
    StaticInitial(FieldRef),
}

fn flag_array() -> Expr {
    Expr::const_array(Sort::BitVec(ADDR_BITS), Expr::bool(false))
}

#[derive(Debug, Clone)]
pub struct Memory {
    initial: im::HashMap<ChunkId, Expr>,
    current: im::HashMap<ChunkId, Expr>,
    static_initial: im::HashMap<FieldRef, im::HashMap<ChunkId, Expr>>,
    concrete: im::HashMap<Expr, ConcreteHint>,
    mock_infos: im::Vector<MockInfoEnriched>,
    static_instance_storage: im::HashMap<String, ReferenceValue>,
    initialized_static_fields: im::HashSet<FieldRef>,
    static_fields_states: im::HashMap<FieldRef, FieldStates>,
    meaningful_static_fields: im::HashSet<FieldRef>,
    addr_to_array_type: im::HashMap<Expr, Type>,
    addr_to_mock_info: im::HashMap<Expr, MockInfo>,
    visited: Expr,
    touched: Expr,
    instance_field_reads: im::HashSet<InstanceFieldRead>,
    speculatively_not_null: Expr,
    symbolic_enum_values: im::Vector<ReferenceValue>,
    field_values: im::HashMap<(ChunkId, Expr), SymbolicValue>,
    element_values: im::HashMap<(ChunkId, Expr), SymbolicValue>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            initial: im::HashMap::new(),
            current: im::HashMap::new(),
            static_initial: im::HashMap::new(),
            concrete: im::HashMap::new(),
            mock_infos: im::Vector::new(),
            static_instance_storage: im::HashMap::new(),
            initialized_static_fields: im::HashSet::new(),
            static_fields_states: im::HashMap::new(),
            meaningful_static_fields: im::HashSet::new(),
            addr_to_array_type: im::HashMap::new(),
            addr_to_mock_info: im::HashMap::new(),
            visited: flag_array(),
            touched: flag_array(),
            instance_field_reads: im::HashSet::new(),
            speculatively_not_null: flag_array(),
            symbolic_enum_values: im::Vector::new(),
            field_values: im::HashMap::new(),
            element_values: im::HashMap::new(),
        }
    }
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Array of `chunk` in the given snapshot; the unconstrained initial array
    /// when the chunk was never touched.
    pub fn find_array(&self, chunk: &ChunkDescriptor, state: &MemoryState) -> Expr {
        let found = match state {
            MemoryState::Initial => self.initial.get(&chunk.id),
            MemoryState::Current => self.current.get(&chunk.id),
            MemoryState::StaticInitial(field) => self
                .static_initial
                .get(field)
                .and_then(|arrays| arrays.get(&chunk.id)),
        };
        found.cloned().unwrap_or_else(|| chunk.initial_array())
    }

    pub fn update(&self, update: &MemoryUpdate) -> Memory {
        let mut initial = self.initial.clone();
        let mut current = self.current.clone();
        for chunk in &update.touched_chunks {
            if !current.contains_key(&chunk.id) {
                let array = chunk.initial_array();
                initial.insert(chunk.id, array.clone());
                current.insert(chunk.id, array);
            }
        }
        for store in &update.stores {
            let array = match current.get(&store.chunk.id) {
                Some(array) => array.clone(),
                None => {
                    let array = store.chunk.initial_array();
                    initial.insert(store.chunk.id, array.clone());
                    array
                }
            };
            current.insert(store.chunk.id, array.store(&store.index, &store.value));
        }

        let mut states = self.static_fields_states.clone();
        if let Some(class) = &update.class_to_clear_statics {
            states.retain(|field, _| &field.class != class);
        }
        let mut static_initial = self.static_initial.clone();
        for (field, (first, last)) in update::first_and_last(&update.static_field_updates) {
            let next = match states.get(&field) {
                Some(previous) => FieldStates {
                    before: previous.before.clone(),
                    after: last,
                },
                None => {
                    static_initial.insert(field.clone(), self.current.clone());
                    FieldStates {
                        before: first,
                        after: last,
                    }
                }
            };
            states.insert(field, next);
        }

        let visited = update
            .visited
            .iter()
            .fold(self.visited.clone(), |acc, addr| acc.store(addr, &Expr::bool(true)));
        let touched = update
            .touched_addresses
            .iter()
            .fold(self.touched.clone(), |acc, addr| acc.store(addr, &Expr::bool(true)));
        let speculatively_not_null = update
            .speculatively_not_null
            .iter()
            .fold(self.speculatively_not_null.clone(), |acc, addr| {
                acc.store(addr, &Expr::bool(true))
            });

        let mock_infos = update::merge_mock_infos(
            self.mock_infos.iter().cloned().collect(),
            update.mock_infos.clone(),
        );

        let mut next = self.clone();
        next.initial = initial;
        next.current = current;
        next.static_initial = static_initial;
        next.concrete.extend(update.concrete.clone());
        next.mock_infos = mock_infos.into_iter().collect();
        next.static_instance_storage
            .extend(update.static_instance_storage.clone());
        next.initialized_static_fields
            .extend(update.initialized_static_fields.iter().cloned());
        next.static_fields_states = states;
        next.meaningful_static_fields
            .extend(update.meaningful_static_fields.iter().cloned());
        next.addr_to_array_type
            .extend(update.addr_to_array_type.clone());
        next.addr_to_mock_info.extend(update.addr_to_mock_info.clone());
        next.visited = visited;
        next.touched = touched;
        next.instance_field_reads
            .extend(update.instance_field_reads.iter().cloned());
        next.speculatively_not_null = speculatively_not_null;
        next.symbolic_enum_values
            .extend(update.symbolic_enum_values.iter().cloned());
        next.field_values.extend(update.field_values.clone());
        next.element_values.extend(update.element_values.clone());
        next
    }

    /// Fields read during execution, grouped by the mapped object address.
    pub fn initialized_fields<T, F>(&self, mut map_addr: F) -> HashMap<T, Vec<FieldRef>>
    where
        T: Eq + Hash,
        F: FnMut(&Expr) -> T,
    {
        let mut grouped: HashMap<T, Vec<FieldRef>> = HashMap::new();
        for read in &self.instance_field_reads {
            let fields = grouped.entry(map_addr(&read.addr)).or_default();
            if !fields.contains(&read.field) {
                fields.push(read.field.clone());
            }
        }
        grouped
    }

    pub fn is_visited(&self, addr: &Expr) -> Expr {
        self.visited.select(addr)
    }

    pub fn is_touched(&self, addr: &Expr) -> Expr {
        self.touched.select(addr)
    }

    pub fn is_speculatively_not_null(&self, addr: &Expr) -> Expr {
        self.speculatively_not_null.select(addr)
    }

    /// Initial arrays of every touched chunk.
    pub fn initial_arrays(&self) -> impl Iterator<Item = &Expr> {
        self.initial.values()
    }

    /// Concrete hint known for `addr`; nothing is known before execution.
    pub fn take_concrete(&self, addr: &Expr, state: &MemoryState) -> Option<&ConcreteHint> {
        match state {
            MemoryState::Current => self.concrete.get(addr),
            _ => None,
        }
    }

    pub fn is_class_initialized(&self, class: &str) -> bool {
        self.static_instance_storage.contains_key(class)
    }

    /// True once a static initializer has assigned `field`.
    pub fn is_field_initialized(&self, field: &FieldRef) -> bool {
        self.initialized_static_fields.contains(field)
    }

    pub fn static_instance(&self, class: &str) -> Option<&ReferenceValue> {
        self.static_instance_storage.get(class)
    }

    pub fn array_type(&self, addr: &Expr) -> Option<&Type> {
        self.addr_to_array_type.get(addr)
    }

    /// Addresses of every array allocated or received as input.
    pub fn array_addresses(&self) -> impl Iterator<Item = &Expr> {
        self.addr_to_array_type.keys()
    }

    pub fn instance_field_reads(&self) -> impl Iterator<Item = &InstanceFieldRead> {
        self.instance_field_reads.iter()
    }

    pub fn mock_info(&self, addr: &Expr) -> Option<&MockInfo> {
        self.addr_to_mock_info.get(addr)
    }

    pub fn mocks(&self) -> impl Iterator<Item = &MockInfoEnriched> {
        self.mock_infos.iter()
    }

    /// Static fields touched outside static initializers, with their history.
    pub fn static_fields(&self) -> Vec<(&FieldRef, &FieldStates)> {
        let mut fields: Vec<_> = self
            .static_fields_states
            .iter()
            .filter(|(field, _)| self.meaningful_static_fields.contains(*field))
            .collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        fields
    }

    pub fn symbolic_enum_values(&self, class: &str) -> Vec<&ReferenceValue> {
        self.symbolic_enum_values
            .iter()
            .filter(|v| v.ty().class_name() == Some(class))
            .collect()
    }

    pub fn field_value(&self, chunk: ChunkId, addr: &Expr) -> Option<&SymbolicValue> {
        self.field_values.get(&(chunk, addr.clone()))
    }

    /// A reference the routine stored into a cell of `chunk`, by its address.
    pub fn element_value(&self, chunk: ChunkId, addr: &Expr) -> Option<&SymbolicValue> {
        self.element_values.get(&(chunk, addr.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PrimitiveValue;

    fn count_field() -> FieldRef {
        FieldRef {
            class: "demo.A".into(),
            name: "count".into(),
            ty: Type::Int,
        }
    }

    #[test]
    fn test_untouched_chunk_is_same_in_both_snapshots() {
        let chunks = ChunkRegistry::new();
        let chunk = chunks.field(&count_field());
        let memory = Memory::new().update(&MemoryUpdate::touch_chunk(chunk.clone()));
        assert_eq!(
            memory.find_array(&chunk, &MemoryState::Initial),
            memory.find_array(&chunk, &MemoryState::Current)
        );
    }

    #[test]
    fn test_store_changes_current_only() {
        let chunks = ChunkRegistry::new();
        let chunk = chunks.field(&count_field());
        let addr = Expr::addr(3);
        let memory = Memory::new().update(&MemoryUpdate::store(
            chunk.clone(),
            addr.clone(),
            Expr::int32(7),
        ));
        let current = memory.find_array(&chunk, &MemoryState::Current);
        assert_eq!(current.select(&addr).as_int(), Some(7));
        let initial = memory.find_array(&chunk, &MemoryState::Initial);
        assert_eq!(initial, chunk.initial_array());
        assert_eq!(memory.initial_arrays().count(), 1);
    }

    #[test]
    fn test_registry_interns_chunks() {
        let chunks = ChunkRegistry::new();
        let a = chunks.field(&count_field());
        let b = chunks.field(&count_field());
        assert_eq!(a, b);
        let ints = chunks.array(&Type::array_of(Type::Int));
        assert_eq!(&*ints.name, "int_Arrays");
        let refs = chunks.array(&Type::array_of(Type::object()));
        assert_eq!(&*refs.name, REF_ARRAYS_CHUNK);
        let multi = chunks.array(&Type::Int.make_array(2));
        assert_eq!(&*multi.name, MULTI_ARRAYS_CHUNK);
        assert_ne!(ints.id, refs.id);
    }

    #[test]
    fn test_static_history_and_clear() {
        let field = count_field();
        let write = |v: i32| StaticFieldUpdate {
            field: field.clone(),
            value: SymbolicValue::Primitive(PrimitiveValue::int(v)),
        };
        let mut first = MemoryUpdate::default();
        first.static_field_updates = vec![write(1), write(2)];
        first.meaningful_static_fields.insert(field.clone());
        let memory = Memory::new().update(&first);

        let mut second = MemoryUpdate::default();
        second.static_field_updates = vec![write(5)];
        let memory = memory.update(&second);
        let (_, states) = memory.static_fields()[0];
        assert_eq!(states.before.expr().as_int(), Some(1));
        assert_eq!(states.after.expr().as_int(), Some(5));

        let mut clear = MemoryUpdate::default();
        clear.class_to_clear_statics = Some("demo.A".into());
        clear.static_field_updates = vec![write(9)];
        let memory = memory.update(&clear);
        let (_, states) = memory.static_fields()[0];
        assert_eq!(states.before.expr().as_int(), Some(9));
    }

    #[test]
    fn test_touched_addresses() {
        let memory = Memory::new().update(&MemoryUpdate::touch_address(Expr::addr(4)));
        assert!(memory.is_touched(&Expr::addr(4)).is_true());
        assert!(memory.is_touched(&Expr::addr(5)).is_false());
    }

    #[test]
    fn test_visited_and_not_null_markers() {
        let mut update = MemoryUpdate::default();
        update.visited.push(Expr::addr(2));
        update.speculatively_not_null.push(Expr::addr(3));
        let memory = Memory::new().update(&update);
        assert!(memory.is_visited(&Expr::addr(2)).is_true());
        assert!(memory.is_visited(&Expr::addr(3)).is_false());
        assert!(memory.is_speculatively_not_null(&Expr::addr(3)).is_true());
    }

    #[test]
    fn test_static_initializer_marks_field() {
        let mut update = MemoryUpdate::default();
        update.initialized_static_fields.insert(count_field());
        let memory = Memory::new().update(&update);
        assert!(memory.is_field_initialized(&count_field()));
        assert!(!Memory::new().is_field_initialized(&count_field()));
    }

    #[test]
    fn test_initialized_fields_grouped() {
        let mut update = MemoryUpdate::read_field(Expr::addr(1), count_field());
        update += MemoryUpdate::read_field(Expr::addr(1), count_field());
        let memory = Memory::new().update(&update);
        let fields = memory.initialized_fields(|addr| addr.as_int());
        assert_eq!(fields[&Some(1)].len(), 1);
    }
}
