// Library classes every program can rely on

use super::{ClassDef, ClassKind, FieldDef, Type};

pub const NULL_POINTER_EXCEPTION: &str = "java.lang.NullPointerException";
pub const ARITHMETIC_EXCEPTION: &str = "java.lang.ArithmeticException";
pub const ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION: &str = "java.lang.ArrayIndexOutOfBoundsException";
pub const INDEX_OUT_OF_BOUNDS_EXCEPTION: &str = "java.lang.IndexOutOfBoundsException";
pub const STRING_INDEX_OUT_OF_BOUNDS_EXCEPTION: &str = "java.lang.StringIndexOutOfBoundsException";
pub const NEGATIVE_ARRAY_SIZE_EXCEPTION: &str = "java.lang.NegativeArraySizeException";
pub const ARRAY_STORE_EXCEPTION: &str = "java.lang.ArrayStoreException";
pub const CLASS_CAST_EXCEPTION: &str = "java.lang.ClassCastException";
pub const LIST_INTERFACE: &str = "java.util.List";
pub const ARRAY_LIST_CLASS: &str = "java.util.ArrayList";

/// Boxed primitive classes and the primitive they wrap.
pub const BOXED_TYPES: [(&str, Type); 6] = [
    ("java.lang.Boolean", Type::Boolean),
    ("java.lang.Byte", Type::Byte),
    ("java.lang.Short", Type::Short),
    ("java.lang.Character", Type::Char),
    ("java.lang.Integer", Type::Int),
    ("java.lang.Long", Type::Long),
];

fn library(name: &str, super_class: Option<&str>, kind: ClassKind) -> ClassDef {
    ClassDef {
        name: name.to_string(),
        super_class: super_class.map(str::to_string),
        interfaces: Vec::new(),
        kind,
        library: true,
        public: true,
        enum_constants: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
    }
}

pub fn builtin_classes() -> Vec<ClassDef> {
    let mut classes = vec![
        library(super::OBJECT_CLASS, None, ClassKind::Class),
        library(super::STRING_CLASS, Some(super::OBJECT_CLASS), ClassKind::Class),
        library(super::CLASS_CLASS, Some(super::OBJECT_CLASS), ClassKind::Class),
        library(super::ENUM_CLASS, Some(super::OBJECT_CLASS), ClassKind::Abstract),
        library(super::THROWABLE_CLASS, Some(super::OBJECT_CLASS), ClassKind::Class),
        library("java.lang.Exception", Some(super::THROWABLE_CLASS), ClassKind::Class),
        library("java.lang.RuntimeException", Some("java.lang.Exception"), ClassKind::Class),
        library(LIST_INTERFACE, None, ClassKind::Interface),
    ];

    let runtime_exceptions = [
        NULL_POINTER_EXCEPTION,
        ARITHMETIC_EXCEPTION,
        INDEX_OUT_OF_BOUNDS_EXCEPTION,
        NEGATIVE_ARRAY_SIZE_EXCEPTION,
        ARRAY_STORE_EXCEPTION,
        CLASS_CAST_EXCEPTION,
        "java.lang.IllegalArgumentException",
        "java.lang.IllegalStateException",
    ];
    for name in runtime_exceptions {
        classes.push(library(name, Some("java.lang.RuntimeException"), ClassKind::Class));
    }
    for name in [ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, STRING_INDEX_OUT_OF_BOUNDS_EXCEPTION] {
        classes.push(library(name, Some(INDEX_OUT_OF_BOUNDS_EXCEPTION), ClassKind::Class));
    }

    let mut array_list = library(ARRAY_LIST_CLASS, Some(super::OBJECT_CLASS), ClassKind::Class);
    array_list.interfaces.push(LIST_INTERFACE.to_string());
    classes.push(array_list);

    for (name, primitive) in BOXED_TYPES {
        let mut boxed = library(name, Some(super::OBJECT_CLASS), ClassKind::Class);
        boxed.fields.push(FieldDef {
            name: "value".to_string(),
            ty: primitive,
            is_static: false,
            is_final: true,
        });
        classes.push(boxed);
    }
    classes
}

/// Primitive wrapped by a boxed class.
pub fn unboxed_type(class: &str) -> Option<Type> {
    BOXED_TYPES
        .iter()
        .find(|(name, _)| *name == class)
        .map(|(_, ty)| ty.clone())
}
