//! Local variables of one call frame

use std::collections::HashMap;

use crate::value::SymbolicValue;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalMemory {
    locals: im::HashMap<String, SymbolicValue>,
}

/// Local writes of one step; `None` removes the binding.
#[derive(Debug, Clone, Default)]
pub struct LocalMemoryUpdate {
    pub locals: HashMap<String, Option<SymbolicValue>>,
}

impl LocalMemoryUpdate {
    pub fn set(local: impl Into<String>, value: SymbolicValue) -> Self {
        Self {
            locals: HashMap::from([(local.into(), Some(value))]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }
}

impl std::ops::AddAssign for LocalMemoryUpdate {
    fn add_assign(&mut self, other: LocalMemoryUpdate) {
        self.locals.extend(other.locals);
    }
}

impl LocalMemory {
    pub fn local(&self, name: &str) -> Option<&SymbolicValue> {
        self.locals.get(name)
    }

    pub fn update(&self, update: &LocalMemoryUpdate) -> LocalMemory {
        let mut locals = self.locals.clone();
        for (name, value) in &update.locals {
            match value {
                Some(value) => {
                    locals.insert(name.clone(), value.clone());
                }
                None => {
                    locals.remove(name);
                }
            }
        }
        LocalMemory { locals }
    }

    pub fn values(&self) -> impl Iterator<Item = &SymbolicValue> {
        self.locals.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PrimitiveValue;

    #[test]
    fn test_update_is_persistent() {
        let base = LocalMemory::default();
        let one = base.update(&LocalMemoryUpdate::set(
            "x",
            SymbolicValue::Primitive(PrimitiveValue::int(1)),
        ));
        assert!(base.local("x").is_none());
        assert_eq!(one.local("x").and_then(|v| v.expr().as_int()), Some(1));

        let mut removal = LocalMemoryUpdate::default();
        removal.locals.insert("x".into(), None);
        assert!(one.update(&removal).local("x").is_none());
    }
}
