//! Value types of the analysed program

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProgramError;

pub const OBJECT_CLASS: &str = "java.lang.Object";
pub const STRING_CLASS: &str = "java.lang.String";
pub const CLASS_CLASS: &str = "java.lang.Class";
pub const ENUM_CLASS: &str = "java.lang.Enum";
pub const THROWABLE_CLASS: &str = "java.lang.Throwable";

/// A type as written in the program representation.
///
/// Types serialize as their source spelling: `int`, `demo.Point`, `char[][]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Type {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Void,
    /// Type of the `null` literal
    Null,
    Class(String),
    Array(Box<Type>),
}

/// Primitive types in the order used for type ids.
pub const PRIMITIVE_TYPES: [Type; 6] = [
    Type::Boolean,
    Type::Byte,
    Type::Short,
    Type::Char,
    Type::Int,
    Type::Long,
];

impl Type {
    pub fn object() -> Self {
        Type::Class(OBJECT_CLASS.to_string())
    }

    pub fn class(name: impl Into<String>) -> Self {
        Type::Class(name.into())
    }

    pub fn array_of(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    /// Wraps this type into `dims` array layers.
    pub fn make_array(self, dims: u32) -> Self {
        (0..dims).fold(self, |acc, _| Type::array_of(acc))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Boolean | Type::Byte | Type::Short | Type::Char | Type::Int | Type::Long
        )
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Class(_) | Type::Array(_) | Type::Null)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Type::Class(name) if name == OBJECT_CLASS)
    }

    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Innermost non-array type.
    pub fn base_type(&self) -> &Type {
        match self {
            Type::Array(elem) => elem.base_type(),
            other => other,
        }
    }

    pub fn num_dimensions(&self) -> u32 {
        match self {
            Type::Array(elem) => 1 + elem.num_dimensions(),
            _ => 0,
        }
    }

    pub fn class_name(&self) -> Option<&str> {
        match self {
            Type::Class(name) => Some(name),
            _ => None,
        }
    }

    /// Bit width of integral primitives.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Type::Byte => Some(8),
            Type::Short | Type::Char => Some(16),
            Type::Int => Some(32),
            Type::Long => Some(64),
            _ => None,
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, Type::Char)
    }

    /// Package prefix of a class type, empty for everything else.
    pub fn package(&self) -> &str {
        match self.base_type() {
            Type::Class(name) => name.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or(""),
            _ => "",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Boolean => write!(f, "boolean"),
            Type::Byte => write!(f, "byte"),
            Type::Short => write!(f, "short"),
            Type::Char => write!(f, "char"),
            Type::Int => write!(f, "int"),
            Type::Long => write!(f, "long"),
            Type::Void => write!(f, "void"),
            Type::Null => write!(f, "null"),
            Type::Class(name) => write!(f, "{}", name),
            Type::Array(elem) => write!(f, "{}[]", elem),
        }
    }
}

impl FromStr for Type {
    type Err = ProgramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix("[]") {
            return Ok(Type::array_of(inner.parse()?));
        }
        match s {
            "boolean" => Ok(Type::Boolean),
            "byte" => Ok(Type::Byte),
            "short" => Ok(Type::Short),
            "char" => Ok(Type::Char),
            "int" => Ok(Type::Int),
            "long" => Ok(Type::Long),
            "void" => Ok(Type::Void),
            "null" => Ok(Type::Null),
            "float" | "double" => Err(ProgramError::UnsupportedType(s.to_string())),
            "" => Err(ProgramError::UnsupportedType(s.to_string())),
            name if name.chars().any(|c| c.is_whitespace() || c == '[' || c == ']') => {
                Err(ProgramError::UnsupportedType(name.to_string()))
            }
            name => Ok(Type::Class(name.to_string())),
        }
    }
}

impl TryFrom<String> for Type {
    type Error = ProgramError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Type> for String {
    fn from(ty: Type) -> Self {
        ty.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let ty: Type = "char[][]".parse().unwrap();
        assert_eq!(ty, Type::Char.make_array(2));
        assert_eq!(ty.to_string(), "char[][]");
        assert_eq!(ty.num_dimensions(), 2);
        assert_eq!(ty.base_type(), &Type::Char);
    }

    #[test]
    fn test_floating_point_rejected() {
        assert!(matches!(
            "double".parse::<Type>(),
            Err(ProgramError::UnsupportedType(_))
        ));
        assert!("float[]".parse::<Type>().is_err());
    }

    #[test]
    fn test_serde_uses_source_spelling() {
        let json = serde_json::to_string(&Type::array_of(Type::class("demo.Point"))).unwrap();
        assert_eq!(json, "\"demo.Point[]\"");
        let back: Type = serde_json::from_str(&json).unwrap();
        assert_eq!(back.package(), "demo");
    }
}
