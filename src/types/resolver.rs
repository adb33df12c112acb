//! Possible runtime types of declared types

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{Hierarchy, TypeRegistry};
use crate::program::types::PRIMITIVE_TYPES;
use crate::program::{Program, Type};
use crate::value::{ConcreteHint, ReferenceValue, TypeStorage};
use crate::wrappers;

/// How many of the best rated types are offered when one has to be picked.
pub const NUMBER_OF_PREFERRED_TYPES: usize = 3;

#[derive(Debug)]
pub struct TypeResolver {
    program: Arc<Program>,
    hierarchy: Hierarchy,
    registry: TypeRegistry,
}

impl TypeResolver {
    pub fn new(program: Arc<Program>) -> Self {
        let hierarchy = Hierarchy::build(&program);
        let registry = TypeRegistry::new(&program);
        Self {
            program,
            hierarchy,
            registry,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn is_subtype(&self, sub: &Type, sup: &Type) -> bool {
        self.hierarchy.is_subtype(sub, sup)
    }

    /// A class an object can have at run time: instantiable and not modeled by
    /// a wrapper.
    fn is_appropriate(&self, class: &str) -> bool {
        self.program
            .class(class)
            .is_some_and(|def| def.is_instantiable())
            && wrappers::wrapper_kind(&Type::class(class)).is_none()
    }

    fn is_inappropriate(&self, ty: &Type) -> bool {
        match ty.base_type() {
            Type::Class(name) if !ty.is_array() => !self.is_appropriate(name),
            Type::Class(name) => self.program.class(name).is_none(),
            _ => false,
        }
    }

    /// Type storage of a value declared as `ty`.
    ///
    /// With `use_exact` the storage holds `ty` alone, as for objects created
    /// by `new`. Otherwise it holds every appropriate inheritor; arrays keep
    /// abstract element types since `Shape[]` can be instantiated.
    pub fn construct_type_storage(&self, ty: &Type, use_exact: bool) -> TypeStorage {
        if use_exact || ty.is_primitive() {
            return TypeStorage::exact(ty.clone());
        }
        let dims = ty.num_dimensions();
        let possible: BTreeSet<Type> = match ty.base_type() {
            Type::Class(name) => {
                let mut possible: BTreeSet<Type> = self
                    .hierarchy
                    .inheritors(name)
                    .filter(|inheritor| dims > 0 || self.is_appropriate(inheritor))
                    .map(|inheritor| Type::class(inheritor).make_array(dims))
                    .collect();
                if ty.base_type().is_object() {
                    possible.extend(
                        PRIMITIVE_TYPES
                            .iter()
                            .map(|p| p.clone().make_array(dims + 1)),
                    );
                }
                possible
            }
            base => BTreeSet::from([base.clone().make_array(dims)]),
        };
        TypeStorage::new(ty.clone(), possible)
    }

    /// Storage over an explicit candidate set, dropping types no object can
    /// have.
    pub fn construct_type_storage_from(
        &self,
        ty: &Type,
        possible: impl IntoIterator<Item = Type>,
    ) -> TypeStorage {
        TypeStorage::new(
            ty.clone(),
            possible.into_iter().filter(|t| !self.is_inappropriate(t)),
        )
    }

    /// Narrows `value` to the types assignable to `target`. An empty result
    /// means the value can only be null.
    pub fn down_cast(&self, value: &ReferenceValue, target: &Type) -> ReferenceValue {
        if let Some(ConcreteHint::Wrapper(kind)) = &value.concrete {
            if wrappers::wrapper_kind(target) == Some(*kind) {
                let storage = TypeStorage::new(target.clone(), value.storage.possible.clone());
                return value.clone().with_storage(storage);
            }
        }
        let possible: Vec<Type> = value
            .storage
            .possible
            .iter()
            .filter(|t| self.is_subtype(t, target))
            .cloned()
            .collect();
        let storage = self.construct_type_storage_from(target, possible);
        let mut cast = value.clone().with_storage(storage);
        if cast.storage.is_empty() {
            cast.concrete = None;
        }
        cast
    }

    /// The `take` best rated types, best first; ties broken by name.
    pub fn find_top_rated_types<'a>(
        &self,
        types: impl IntoIterator<Item = &'a Type>,
        take: usize,
    ) -> Vec<Type> {
        let mut rated: Vec<(i64, &Type)> = types
            .into_iter()
            .map(|t| (self.registry.rating(t), t))
            .collect();
        rated.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        rated.into_iter().take(take).map(|(_, t)| t.clone()).collect()
    }

    fn find_any_concrete_inheritor_including(&self, ty: &Type) -> Option<Type> {
        let name = ty.class_name()?;
        if self.is_appropriate(name) {
            return Some(ty.clone());
        }
        let candidates: Vec<Type> = self
            .hierarchy
            .inheritors(name)
            .filter(|c| self.is_appropriate(c))
            .map(Type::class)
            .collect();
        self.find_top_rated_types(&candidates, 1).into_iter().next()
    }

    /// A concrete class for an object whose evaluated type is `evaluated`,
    /// falling back to inheritors of `default`.
    pub fn find_any_concrete_inheritor_including_or_default(
        &self,
        evaluated: &Type,
        default: &Type,
    ) -> Option<Type> {
        self.find_any_concrete_inheritor_including(evaluated)
            .or_else(|| self.find_any_concrete_inheritor_including(default))
    }
}
