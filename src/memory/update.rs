//! Diff records folded into memory

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::AddAssign;

use super::{ChunkDescriptor, ChunkId};
use crate::expr::Expr;
use crate::mock::{MockInfo, MockInfoEnriched};
use crate::program::{FieldRef, Type};
use crate::value::{ConcreteHint, ReferenceValue, SymbolicValue};

/// A store of `value` at `index` of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedStore {
    pub chunk: ChunkDescriptor,
    pub index: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFieldUpdate {
    pub field: FieldRef,
    pub value: SymbolicValue,
}

/// Field of an object read during execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceFieldRead {
    pub addr: Expr,
    pub field: FieldRef,
}

/// Values of a static field before the first and after the last write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldStates {
    pub before: SymbolicValue,
    pub after: SymbolicValue,
}

/// Everything one instruction (or one finished call) changes in memory.
///
/// Updates concatenate with `+=`; list-like parts keep their order so that
/// static field history can tell first from last writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub stores: Vec<NamedStore>,
    pub touched_chunks: Vec<ChunkDescriptor>,
    pub concrete: HashMap<Expr, ConcreteHint>,
    pub mock_infos: Vec<MockInfoEnriched>,
    pub static_instance_storage: HashMap<String, ReferenceValue>,
    pub initialized_static_fields: HashSet<FieldRef>,
    pub static_field_updates: Vec<StaticFieldUpdate>,
    pub meaningful_static_fields: HashSet<FieldRef>,
    pub addr_to_array_type: HashMap<Expr, Type>,
    pub addr_to_mock_info: HashMap<Expr, MockInfo>,
    pub visited: Vec<Expr>,
    pub touched_addresses: Vec<Expr>,
    pub class_to_clear_statics: Option<String>,
    pub instance_field_reads: Vec<InstanceFieldRead>,
    pub speculatively_not_null: Vec<Expr>,
    pub symbolic_enum_values: Vec<ReferenceValue>,
    /// Values last written to or read from a field cell
    pub field_values: HashMap<(ChunkId, Expr), SymbolicValue>,
    /// References stored into array cells, keyed by the stored address
    pub element_values: HashMap<(ChunkId, Expr), SymbolicValue>,
}

impl MemoryUpdate {
    pub fn store(chunk: ChunkDescriptor, index: Expr, value: Expr) -> Self {
        Self {
            touched_chunks: vec![chunk.clone()],
            stores: vec![NamedStore {
                chunk,
                index,
                value,
            }],
            ..Default::default()
        }
    }

    pub fn touch_chunk(chunk: ChunkDescriptor) -> Self {
        Self {
            touched_chunks: vec![chunk],
            ..Default::default()
        }
    }

    pub fn touch_address(addr: Expr) -> Self {
        Self {
            touched_addresses: vec![addr],
            ..Default::default()
        }
    }

    pub fn read_field(addr: Expr, field: FieldRef) -> Self {
        Self {
            instance_field_reads: vec![InstanceFieldRead { addr, field }],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
            && self.touched_chunks.is_empty()
            && self.concrete.is_empty()
            && self.mock_infos.is_empty()
            && self.static_instance_storage.is_empty()
            && self.initialized_static_fields.is_empty()
            && self.static_field_updates.is_empty()
            && self.meaningful_static_fields.is_empty()
            && self.addr_to_array_type.is_empty()
            && self.addr_to_mock_info.is_empty()
            && self.visited.is_empty()
            && self.touched_addresses.is_empty()
            && self.class_to_clear_statics.is_none()
            && self.instance_field_reads.is_empty()
            && self.speculatively_not_null.is_empty()
            && self.symbolic_enum_values.is_empty()
            && self.field_values.is_empty()
            && self.element_values.is_empty()
    }
}

impl AddAssign for MemoryUpdate {
    fn add_assign(&mut self, other: MemoryUpdate) {
        self.stores.extend(other.stores);
        self.touched_chunks.extend(other.touched_chunks);
        self.concrete.extend(other.concrete);
        self.mock_infos = merge_mock_infos(std::mem::take(&mut self.mock_infos), other.mock_infos);
        self.static_instance_storage
            .extend(other.static_instance_storage);
        self.initialized_static_fields
            .extend(other.initialized_static_fields);
        self.static_field_updates.extend(other.static_field_updates);
        self.meaningful_static_fields
            .extend(other.meaningful_static_fields);
        self.addr_to_array_type.extend(other.addr_to_array_type);
        self.addr_to_mock_info.extend(other.addr_to_mock_info);
        self.visited.extend(other.visited);
        self.touched_addresses.extend(other.touched_addresses);
        if other.class_to_clear_statics.is_some() {
            self.class_to_clear_statics = other.class_to_clear_statics;
        }
        self.instance_field_reads.extend(other.instance_field_reads);
        self.speculatively_not_null
            .extend(other.speculatively_not_null);
        self.symbolic_enum_values.extend(other.symbolic_enum_values);
        self.field_values.extend(other.field_values);
        self.element_values.extend(other.element_values);
    }
}

/// Merges mock records by address, appending executable instances.
pub fn merge_mock_infos(
    mut base: Vec<MockInfoEnriched>,
    update: Vec<MockInfoEnriched>,
) -> Vec<MockInfoEnriched> {
    for info in update {
        match base.iter_mut().find(|m| m.info.addr() == info.info.addr()) {
            Some(existing) => {
                for (method, calls) in info.executables {
                    existing.executables.entry(method).or_default().extend(calls);
                }
            }
            None => base.push(info),
        }
    }
    base
}

/// Collapses updates to the first and last value written to each field.
pub(crate) fn first_and_last(
    updates: &[StaticFieldUpdate],
) -> BTreeMap<FieldRef, (SymbolicValue, SymbolicValue)> {
    let mut grouped: BTreeMap<FieldRef, (SymbolicValue, SymbolicValue)> = BTreeMap::new();
    for update in updates {
        grouped
            .entry(update.field.clone())
            .and_modify(|(_, last)| *last = update.value.clone())
            .or_insert_with(|| (update.value.clone(), update.value.clone()));
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Type;
    use crate::value::PrimitiveValue;

    fn field() -> FieldRef {
        FieldRef {
            class: "demo.A".into(),
            name: "count".into(),
            ty: Type::Int,
        }
    }

    #[test]
    fn test_first_and_last_collapse() {
        let updates: Vec<StaticFieldUpdate> = [1, 2, 3]
            .into_iter()
            .map(|v| StaticFieldUpdate {
                field: field(),
                value: SymbolicValue::Primitive(PrimitiveValue::int(v)),
            })
            .collect();
        let grouped = first_and_last(&updates);
        let (first, last) = &grouped[&field()];
        assert_eq!(first.expr().as_int(), Some(1));
        assert_eq!(last.expr().as_int(), Some(3));
    }

    #[test]
    fn test_add_assign_keeps_order() {
        let mut a = MemoryUpdate::touch_address(Expr::addr(1));
        a += MemoryUpdate::touch_address(Expr::addr(2));
        assert_eq!(a.touched_addresses, vec![Expr::addr(1), Expr::addr(2)]);
        assert!(!a.is_empty());
        assert!(MemoryUpdate::default().is_empty());
    }
}
