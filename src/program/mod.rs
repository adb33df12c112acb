//! Program representation consumed by the engine
//!
//! A program is a set of classes loaded from JSON. Method bodies are kept as
//! flat statement lists; `crate::cfg` turns each body into an instruction
//! graph.

pub mod builtins;
pub mod stmt;
pub mod types;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::ProgramError;

pub use stmt::{
    BinOp, CondOp, Condition, Constant, FieldRef, IdentityRef, InvokeExpr, InvokeKind, MethodRef,
    Operand, Place, Rvalue, Stmt, StmtIndex,
};
pub use types::{Type, CLASS_CLASS, ENUM_CLASS, OBJECT_CLASS, STRING_CLASS, THROWABLE_CLASS};

pub const STATIC_INITIALIZER: &str = "<clinit>";
pub const CONSTRUCTOR: &str = "<init>";

/// Identifier of a method inside a loaded [`Program`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId(pub u32);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    #[default]
    Class,
    Abstract,
    Interface,
    Enum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default, rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trap {
    pub begin: StmtIndex,
    pub end: StmtIndex,
    pub handler: StmtIndex,
    pub exception: String,
}

impl Trap {
    pub fn covers(&self, index: StmtIndex) -> bool {
        self.begin <= index && index < self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Body {
    pub stmts: Vec<Stmt>,
    #[serde(default)]
    pub traps: Vec<Trap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    #[serde(default)]
    pub params: Vec<Type>,
    #[serde(default = "stmt::void_type")]
    pub ret: Type,
    #[serde(default, rename = "static")]
    pub is_static: bool,
    #[serde(default, rename = "native")]
    pub is_native: bool,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
    #[serde(default)]
    pub body: Option<Body>,
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default, rename = "super")]
    pub super_class: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub kind: ClassKind,
    /// Classes of the runtime library rather than of the code under test
    #[serde(default)]
    pub library: bool,
    #[serde(default = "yes")]
    pub public: bool,
    #[serde(default)]
    pub enum_constants: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
}

impl ClassDef {
    pub fn is_interface(&self) -> bool {
        self.kind == ClassKind::Interface
    }

    pub fn is_enum(&self) -> bool {
        self.kind == ClassKind::Enum
    }

    pub fn is_instantiable(&self) -> bool {
        matches!(self.kind, ClassKind::Class | ClassKind::Enum)
    }
}

/// Method with its owner, as stored in the loaded program.
#[derive(Debug, Clone)]
pub struct Method {
    pub id: MethodId,
    pub class: String,
    pub def: MethodDef,
}

impl Method {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn is_static(&self) -> bool {
        self.def.is_static
    }

    pub fn body(&self) -> Option<&Body> {
        self.def.body.as_ref()
    }

    pub fn signature(&self) -> MethodRef {
        MethodRef {
            class: self.class.clone(),
            name: self.def.name.clone(),
            params: self.def.params.clone(),
            ret: self.def.ret.clone(),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature())
    }
}

#[derive(Debug, Deserialize)]
struct ProgramFile {
    classes: Vec<ClassDef>,
}

/// Loaded and validated program.
#[derive(Debug, Clone)]
pub struct Program {
    classes: Vec<ClassDef>,
    by_name: HashMap<String, usize>,
    methods: Vec<Method>,
    class_methods: HashMap<String, Vec<MethodId>>,
}

impl Program {
    /// Load a program from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ProgramError> {
        let text = std::fs::read_to_string(path).map_err(|source| ProgramError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ProgramError> {
        let file: ProgramFile = serde_json::from_str(text)?;
        Self::from_classes(file.classes)
    }

    /// Build a program from class definitions, adding the built-in library
    /// classes that are not already declared.
    pub fn from_classes(classes: Vec<ClassDef>) -> Result<Self, ProgramError> {
        let mut all = Vec::with_capacity(classes.len());
        let mut by_name = HashMap::new();
        for class in classes {
            if by_name.insert(class.name.clone(), all.len()).is_some() {
                return Err(ProgramError::DuplicateClass(class.name));
            }
            all.push(class);
        }
        for builtin in builtins::builtin_classes() {
            if !by_name.contains_key(&builtin.name) {
                by_name.insert(builtin.name.clone(), all.len());
                all.push(builtin);
            }
        }

        let mut methods = Vec::new();
        let mut class_methods: HashMap<String, Vec<MethodId>> = HashMap::new();
        for class in &mut all {
            if class.super_class.is_none() && class.name != OBJECT_CLASS && !class.is_interface() {
                class.super_class = Some(OBJECT_CLASS.to_string());
            }
            for def in std::mem::take(&mut class.methods) {
                let id = MethodId(methods.len() as u32);
                class_methods.entry(class.name.clone()).or_default().push(id);
                methods.push(Method {
                    id,
                    class: class.name.clone(),
                    def,
                });
            }
        }

        let program = Program {
            classes: all,
            by_name,
            methods,
            class_methods,
        };
        program.validate()?;
        Ok(program)
    }

    fn validate(&self) -> Result<(), ProgramError> {
        for class in &self.classes {
            if let Some(parent) = &class.super_class {
                if !self.by_name.contains_key(parent) {
                    return Err(ProgramError::MissingSuperclass {
                        class: class.name.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
        for method in &self.methods {
            let Some(body) = method.body() else { continue };
            let len = body.stmts.len();
            for (index, stmt) in body.stmts.iter().enumerate() {
                for target in stmt.jump_targets() {
                    if target >= len {
                        return Err(ProgramError::BadJump {
                            method: method.to_string(),
                            index,
                            target,
                            len,
                        });
                    }
                }
            }
            for trap in &body.traps {
                if trap.begin >= trap.end || trap.end > len || trap.handler >= len {
                    return Err(ProgramError::BadTrap {
                        method: method.to_string(),
                        begin: trap.begin,
                        end: trap.end,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.iter()
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.by_name.get(name).map(|&i| &self.classes[i])
    }

    pub fn method(&self, id: MethodId) -> &Method {
        &self.methods[id.0 as usize]
    }

    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter()
    }

    pub fn methods_of(&self, class: &str) -> &[MethodId] {
        self.class_methods
            .get(class)
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    /// Method declared directly in `class` with the given name and parameters.
    pub fn find_declared(&self, class: &str, name: &str, params: &[Type]) -> Option<MethodId> {
        self.methods_of(class)
            .iter()
            .copied()
            .find(|&id| {
                let m = self.method(id);
                m.def.name == name && m.def.params == params
            })
    }

    /// Walks `class` and its superclasses for a matching declaration.
    pub fn resolve_method(&self, class: &str, name: &str, params: &[Type]) -> Option<MethodId> {
        self.superclass_chain(class)
            .find_map(|c| self.find_declared(&c.name, name, params))
    }

    /// Virtual dispatch: the implementation `class` runs for `method`.
    pub fn resolve_virtual(&self, class: &str, method: &MethodRef) -> Option<MethodId> {
        self.superclass_chain(class)
            .filter_map(|c| self.find_declared(&c.name, &method.name, &method.params))
            .find(|&id| !self.method(id).def.is_abstract)
    }

    pub fn static_initializer(&self, class: &str) -> Option<MethodId> {
        self.find_declared(class, STATIC_INITIALIZER, &[])
            .filter(|&id| self.method(id).body().is_some())
    }

    /// The class itself followed by its superclasses.
    pub fn superclass_chain<'a>(&'a self, class: &str) -> impl Iterator<Item = &'a ClassDef> + 'a {
        let mut next = self.class(class);
        std::iter::from_fn(move || {
            let current = next?;
            next = current.super_class.as_deref().and_then(|s| self.class(s));
            Some(current)
        })
    }

    /// Class declaring `field` as seen from `class`, with its definition.
    pub fn resolve_field<'a>(&'a self, class: &str, field: &str) -> Option<(&'a str, &'a FieldDef)> {
        self.superclass_chain(class).find_map(|c| {
            c.fields
                .iter()
                .find(|f| f.name == field)
                .map(|f| (c.name.as_str(), f))
        })
    }

    /// Instance fields of `class` including inherited ones, as (owner, field).
    pub fn instance_fields<'a>(&'a self, class: &str) -> Vec<(&'a str, &'a FieldDef)> {
        let mut fields = Vec::new();
        for c in self.superclass_chain(class) {
            for f in c.fields.iter().filter(|f| !f.is_static) {
                fields.push((c.name.as_str(), f));
            }
        }
        fields
    }

    /// Finds a method from a `Class.method` or `Class.method(int,int)` string.
    pub fn find_method(&self, target: &str) -> Result<MethodId, ProgramError> {
        let (head, params) = match target.split_once('(') {
            Some((head, rest)) => {
                let inner = rest.trim_end_matches(')');
                let params = inner
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::parse::<Type>)
                    .collect::<Result<Vec<_>, _>>()?;
                (head, Some(params))
            }
            None => (target, None),
        };
        let (class, name) = head
            .rsplit_once('.')
            .ok_or_else(|| ProgramError::MethodNotFound(target.to_string()))?;
        if self.class(class).is_none() {
            return Err(ProgramError::ClassNotFound(class.to_string()));
        }
        let candidates: Vec<MethodId> = self
            .methods_of(class)
            .iter()
            .copied()
            .filter(|&id| {
                let m = self.method(id);
                m.def.name == name && params.as_ref().map_or(true, |p| &m.def.params == p)
            })
            .collect();
        match candidates.as_slice() {
            [id] => Ok(*id),
            [] => Err(ProgramError::MethodNotFound(target.to_string())),
            _ => Err(ProgramError::AmbiguousMethod(target.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Program {
        Program::from_json(
            r#"{"classes":[
                {"name":"demo.Shape","kind":"abstract","methods":[
                    {"name":"area","ret":"int","abstract":true}]},
                {"name":"demo.Square","super":"demo.Shape",
                 "fields":[{"name":"side","type":"int"}],
                 "methods":[{"name":"area","ret":"int","body":{"stmts":[
                    {"op":"return","value":{"const":{"int":1}}}]}}]}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_builtins_are_injected() {
        let program = sample();
        assert!(program.class(OBJECT_CLASS).is_some());
        assert!(program.class("java.lang.NullPointerException").is_some());
    }

    #[test]
    fn test_resolve_virtual_skips_abstract() {
        let program = sample();
        let sig = MethodRef {
            class: "demo.Shape".into(),
            name: "area".into(),
            params: vec![],
            ret: Type::Int,
        };
        let id = program.resolve_virtual("demo.Square", &sig).unwrap();
        assert_eq!(program.method(id).class, "demo.Square");
        assert!(program.resolve_virtual("demo.Shape", &sig).is_none());
    }

    #[test]
    fn test_find_method_by_signature() {
        let program = sample();
        assert!(program.find_method("demo.Square.area").is_ok());
        assert!(program.find_method("demo.Square.area()").is_ok());
        assert!(matches!(
            program.find_method("demo.Missing.area"),
            Err(ProgramError::ClassNotFound(_))
        ));
    }

    #[test]
    fn test_bad_jump_rejected() {
        let result = Program::from_json(
            r#"{"classes":[{"name":"demo.A","methods":[{"name":"f","body":{"stmts":[
                {"op":"goto","target":5}]}}]}]}"#,
        );
        assert!(matches!(result, Err(ProgramError::BadJump { .. })));
    }

    #[test]
    fn test_instance_fields_include_inherited() {
        let program = Program::from_json(
            r#"{"classes":[
                {"name":"demo.Base","fields":[{"name":"a","type":"int"},{"name":"s","type":"int","static":true}]},
                {"name":"demo.Derived","super":"demo.Base","fields":[{"name":"b","type":"long"}]}
            ]}"#,
        )
        .unwrap();
        let names: Vec<&str> = program
            .instance_fields("demo.Derived")
            .iter()
            .map(|(_, f)| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
