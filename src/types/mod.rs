//! Symbolic type encoding
//!
//! Every address has a type id and a number of array dimensions, both read
//! from global uninterpreted arrays. A reference value's [`TypeStorage`]
//! becomes a disjunction over these two cells. Ids are dense: 0 means "no
//! type" (null), primitives follow, then every class of the program.

pub mod hierarchy;
pub mod resolver;

use std::cell::RefCell;
use std::collections::HashMap;

use crate::expr::{Expr, Sort, ADDR_BITS};
use crate::program::types::PRIMITIVE_TYPES;
use crate::program::{Program, Type};
use crate::value::TypeStorage;

pub use hierarchy::Hierarchy;
pub use resolver::{TypeResolver, NUMBER_OF_PREFERRED_TYPES};

pub const EMPTY_TYPE_ID: i32 = 0;
pub const MAX_NUM_DIMENSIONS: i32 = 4;

pub const TYPE_ID_ARRAY: &str = "addrToTypeId";
const NUM_DIMENSIONS_ARRAY: &str = "addrToNumDimensions";
const IS_MOCK_ARRAY: &str = "isMock";

/// First address handed out to class references.
const CLASS_REF_BASE: i32 = -16_777_216;

/// The three parts of a type constraint for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeConstraint {
    /// The address has one of the possible types
    pub is: Expr,
    /// The address is null
    pub null: Expr,
    /// Type id and dimensions are a valid encoding
    pub correctness: Expr,
}

impl TypeConstraint {
    /// `(is or null) and correctness`: use when the value may be null.
    pub fn all(&self) -> Expr {
        Expr::and([self.is_or_null(), self.correctness.clone()])
    }

    pub fn is_or_null(&self) -> Expr {
        Expr::or([self.is.clone(), self.null.clone()])
    }

    /// `is and correctness`: use for freshly created objects.
    pub fn is_constraint(&self) -> Expr {
        Expr::and([self.is.clone(), self.correctness.clone()])
    }
}

/// Dense type ids and per-type ratings for one program.
#[derive(Debug)]
pub struct TypeRegistry {
    ids: HashMap<Type, i32>,
    by_id: Vec<Type>,
    ratings: RefCell<HashMap<Type, i64>>,
    bonus: RefCell<HashMap<Type, i64>>,
    class_refs: RefCell<HashMap<Type, i32>>,
    public: HashMap<String, bool>,
}

impl TypeRegistry {
    pub fn new(program: &Program) -> Self {
        let mut by_id = vec![Type::Void];
        by_id.extend(PRIMITIVE_TYPES.iter().cloned());
        let mut public = HashMap::new();
        for class in program.classes() {
            by_id.push(Type::class(&class.name));
            public.insert(class.name.clone(), class.public);
        }
        let ids = by_id
            .iter()
            .enumerate()
            .skip(1)
            .map(|(id, ty)| (ty.clone(), id as i32))
            .collect();
        Self {
            ids,
            by_id,
            ratings: RefCell::new(HashMap::new()),
            bonus: RefCell::new(HashMap::new()),
            class_refs: RefCell::new(HashMap::new()),
            public,
        }
    }

    pub fn number_of_types(&self) -> i32 {
        self.by_id.len() as i32 - 1
    }

    /// Id of the base type of `ty`; 0 when unknown.
    pub fn type_id(&self, ty: &Type) -> i32 {
        self.ids.get(ty.base_type()).copied().unwrap_or(EMPTY_TYPE_ID)
    }

    /// Reverse of the (type id, dimensions) encoding.
    pub fn type_by_id(&self, id: i32, dims: i32) -> Option<Type> {
        if id <= EMPTY_TYPE_ID || !(0..=MAX_NUM_DIMENSIONS).contains(&dims) {
            return None;
        }
        let base = self.by_id.get(id as usize)?.clone();
        if base.is_primitive() && dims == 0 {
            return None;
        }
        Some(base.make_array(dims as u32))
    }

    pub fn sym_type_id(&self, addr: &Expr) -> Expr {
        Expr::var(TYPE_ID_ARRAY, Sort::array(Sort::BitVec(ADDR_BITS), Sort::BitVec(32))).select(addr)
    }

    pub fn sym_num_dimensions(&self, addr: &Expr) -> Expr {
        Expr::var(
            NUM_DIMENSIONS_ARRAY,
            Sort::array(Sort::BitVec(ADDR_BITS), Sort::BitVec(32)),
        )
        .select(addr)
    }

    pub fn is_mock(&self, addr: &Expr) -> Expr {
        Expr::var(IS_MOCK_ARRAY, Sort::array(Sort::BitVec(ADDR_BITS), Sort::Bool)).select(addr)
    }

    /// Type id and dimensions of `addr` equal those of `ty`.
    pub fn has_type(&self, addr: &Expr, ty: &Type) -> Expr {
        Expr::and([
            self.sym_type_id(addr).eq(&Expr::int32(self.type_id(ty))),
            self.sym_num_dimensions(addr)
                .eq(&Expr::int32(ty.num_dimensions() as i32)),
        ])
    }

    pub fn type_constraint(&self, addr: &Expr, storage: &TypeStorage) -> TypeConstraint {
        let is = Expr::or(storage.possible.iter().map(|ty| self.has_type(addr, ty)));
        TypeConstraint {
            is,
            null: addr.eq(&Expr::null()),
            correctness: self.correctness(addr),
        }
    }

    fn correctness(&self, addr: &Expr) -> Expr {
        let id = self.sym_type_id(addr);
        let dims = self.sym_num_dimensions(addr);
        let mut parts = vec![
            id.ge(&Expr::int32(EMPTY_TYPE_ID)),
            id.le(&Expr::int32(self.number_of_types())),
            dims.ge(&Expr::int32(0)),
            dims.le(&Expr::int32(MAX_NUM_DIMENSIONS)),
        ];
        for primitive in PRIMITIVE_TYPES.iter() {
            let is_primitive = id.eq(&Expr::int32(self.type_id(primitive)));
            parts.push(Expr::or([is_primitive.not(), dims.ge(&Expr::int32(1))]));
        }
        Expr::and(parts)
    }

    /// Static preference of a type; higher ratings are tried first.
    pub fn rating(&self, ty: &Type) -> i64 {
        let base = *self
            .ratings
            .borrow_mut()
            .entry(ty.clone())
            .or_insert_with(|| self.static_rating(ty));
        base + self.bonus.borrow().get(ty).copied().unwrap_or(0)
    }

    /// Raises the rating of a type chosen by a successful resolution.
    pub fn bump_rating(&self, ty: &Type) {
        *self.bonus.borrow_mut().entry(ty.clone()).or_insert(0) += 1;
    }

    fn static_rating(&self, ty: &Type) -> i64 {
        let Type::Class(name) = ty.base_type() else {
            return 0;
        };
        let mut cost = 0;
        cost += match name.as_str() {
            "java.util.ArrayList" => 4096,
            "java.lang.Integer" | "java.lang.Character" | "java.lang.Long" => 8192,
            _ => 0,
        };
        let package = ty.package();
        if package.starts_with("java.lang") {
            cost += 1024;
        }
        if package.starts_with("java.util") {
            cost += 512;
        }
        if package.starts_with("java") {
            cost += 128;
        }
        if self.public.get(name).copied().unwrap_or(false) {
            cost += 16;
        }
        if ty.is_object() {
            cost -= 32;
        }
        if name.contains('$') {
            let anonymous = name
                .rsplit_once('$')
                .is_some_and(|(_, tail)| !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()));
            if anonymous {
                cost -= 128;
            }
            cost -= 4096;
        }
        cost
    }

    /// Fixed address of the class reference object for `ty`.
    pub fn class_ref_addr(&self, ty: &Type) -> Expr {
        let mut refs = self.class_refs.borrow_mut();
        let next = CLASS_REF_BASE - refs.len() as i32;
        Expr::addr(*refs.entry(ty.clone()).or_insert(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{evaluate, Assignment, Key, Value};
    use std::collections::BTreeSet;

    struct Cells(HashMap<Key, i128>);

    impl Assignment for Cells {
        fn lookup(&self, key: &Key, sort: &Sort) -> Option<Value> {
            let value = *self.0.get(key)?;
            Some(Value::Int {
                value,
                bits: sort.bits().unwrap_or(32),
            })
        }
    }

    fn registry() -> TypeRegistry {
        let program = Program::from_json(r#"{"classes":[{"name":"demo.A"},{"name":"demo.B$1"}]}"#).unwrap();
        TypeRegistry::new(&program)
    }

    fn cells(addr: i128, id: i32, dims: i32) -> Cells {
        Cells(HashMap::from([
            (
                Key::Cell {
                    array: TYPE_ID_ARRAY.into(),
                    path: vec![addr],
                },
                id as i128,
            ),
            (
                Key::Cell {
                    array: NUM_DIMENSIONS_ARRAY.into(),
                    path: vec![addr],
                },
                dims as i128,
            ),
        ]))
    }

    #[test]
    fn test_ids_round_trip_through_dimensions() {
        let registry = registry();
        let ty = Type::class("demo.A").make_array(2);
        let id = registry.type_id(&ty);
        assert!(id > PRIMITIVE_TYPES.len() as i32);
        assert_eq!(registry.type_by_id(id, 2), Some(ty));
        assert_eq!(registry.type_by_id(registry.type_id(&Type::Int), 0), None);
        assert_eq!(registry.type_by_id(0, 0), None);
    }

    #[test]
    fn test_type_constraint_accepts_possible_types_only() {
        let registry = registry();
        let addr = Expr::addr(-1);
        let storage = TypeStorage {
            least_common: Type::object(),
            possible: BTreeSet::from([Type::class("demo.A"), Type::array_of(Type::Int)]),
        };
        let constraint = registry.type_constraint(&addr, &storage);
        let a = registry.type_id(&Type::class("demo.A"));
        let int = registry.type_id(&Type::Int);

        let holds = |id, dims| {
            evaluate(&constraint.is_constraint(), &cells(-1, id, dims))
                .unwrap()
                .as_bool()
        };
        assert_eq!(holds(a, 0), Some(true));
        assert_eq!(holds(int, 1), Some(true));
        assert_eq!(holds(int, 0), Some(false));
        assert_eq!(holds(a, 1), Some(false));
    }

    #[test]
    fn test_ratings_prefer_plain_public_classes() {
        let registry = registry();
        assert!(registry.rating(&Type::class("demo.A")) > registry.rating(&Type::class("demo.B$1")));
        assert!(
            registry.rating(&Type::class("java.lang.Integer"))
                > registry.rating(&Type::class("demo.A"))
        );
        let before = registry.rating(&Type::class("demo.A"));
        registry.bump_rating(&Type::class("demo.A"));
        assert_eq!(registry.rating(&Type::class("demo.A")), before + 1);
    }

    #[test]
    fn test_class_refs_are_stable() {
        let registry = registry();
        let a = registry.class_ref_addr(&Type::Int);
        let b = registry.class_ref_addr(&Type::class("demo.A"));
        assert_ne!(a, b);
        assert_eq!(registry.class_ref_addr(&Type::Int), a);
        assert!(a.as_int().is_some_and(|v| v <= CLASS_REF_BASE as i128));
    }
}
