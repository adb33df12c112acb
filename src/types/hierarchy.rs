//! Class hierarchy of a loaded program

use std::collections::{BTreeSet, HashMap};

use crate::program::{Program, Type, OBJECT_CLASS};

/// Ancestor and inheritor sets of every class, computed once per program.
#[derive(Debug, Clone, Default)]
pub struct Hierarchy {
    ancestors: HashMap<String, BTreeSet<String>>,
    inheritors: HashMap<String, BTreeSet<String>>,
}

impl Hierarchy {
    pub fn build(program: &Program) -> Self {
        let mut ancestors: HashMap<String, BTreeSet<String>> = HashMap::new();
        for class in program.classes() {
            let mut seen = BTreeSet::new();
            let mut pending = vec![class.name.clone()];
            while let Some(name) = pending.pop() {
                if !seen.insert(name.clone()) {
                    continue;
                }
                if let Some(def) = program.class(&name) {
                    pending.extend(def.super_class.iter().cloned());
                    pending.extend(def.interfaces.iter().cloned());
                }
            }
            seen.insert(OBJECT_CLASS.to_string());
            ancestors.insert(class.name.clone(), seen);
        }

        let mut inheritors: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (class, supers) in &ancestors {
            for ancestor in supers {
                inheritors
                    .entry(ancestor.clone())
                    .or_default()
                    .insert(class.clone());
            }
        }
        Self {
            ancestors,
            inheritors,
        }
    }

    /// The class itself and everything below it.
    pub fn inheritors(&self, class: &str) -> impl Iterator<Item = &str> {
        self.inheritors
            .get(class)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// The class itself and everything above it.
    pub fn ancestors(&self, class: &str) -> impl Iterator<Item = &str> {
        self.ancestors
            .get(class)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        sup == OBJECT_CLASS
            || self
                .ancestors
                .get(sub)
                .is_some_and(|supers| supers.contains(sup))
    }

    /// Java assignability between reference types, with covariant arrays.
    pub fn is_subtype(&self, sub: &Type, sup: &Type) -> bool {
        if sub == sup {
            return true;
        }
        match (sub, sup) {
            (Type::Null, t) => t.is_reference(),
            (_, t) if t.is_object() => sub.is_reference(),
            (Type::Class(a), Type::Class(b)) => self.is_subclass(a, b),
            (Type::Array(a), Type::Array(b)) => {
                if a.is_primitive() || b.is_primitive() {
                    a == b
                } else {
                    self.is_subtype(a, b)
                }
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> Hierarchy {
        let program = Program::from_json(
            r#"{"classes":[
                {"name":"demo.Shape","kind":"interface"},
                {"name":"demo.Base","kind":"abstract","interfaces":["demo.Shape"]},
                {"name":"demo.Square","super":"demo.Base"},
                {"name":"demo.Circle","interfaces":["demo.Shape"]}
            ]}"#,
        )
        .unwrap();
        Hierarchy::build(&program)
    }

    #[test]
    fn test_inheritors_include_interface_implementors() {
        let h = hierarchy();
        let shapes: Vec<&str> = h.inheritors("demo.Shape").collect();
        assert_eq!(
            shapes,
            vec!["demo.Base", "demo.Circle", "demo.Shape", "demo.Square"]
        );
        assert!(h.ancestors("demo.Square").any(|a| a == "demo.Shape"));
    }

    #[test]
    fn test_array_covariance() {
        let h = hierarchy();
        let squares = Type::array_of(Type::class("demo.Square"));
        let shapes = Type::array_of(Type::class("demo.Shape"));
        assert!(h.is_subtype(&squares, &shapes));
        assert!(!h.is_subtype(&shapes, &squares));
        assert!(h.is_subtype(&Type::array_of(Type::Int), &Type::object()));
        assert!(!h.is_subtype(&Type::array_of(Type::Int), &Type::array_of(Type::object())));
        assert!(h.is_subtype(&Type::Int.make_array(2), &Type::array_of(Type::object())));
        assert!(h.is_subtype(&Type::Null, &squares));
    }
}
