//! The semantic type system, as handed down by the checker.
//!
//! This is the contract side of the boundary described in SPEC_FULL.md §A:
//! the checker (out of scope for this crate, the way `seen_parser` and
//! `seen_typechecker` are out of scope for `seen_ir`) produces these types;
//! the Lowerer consumes them and erases them into [`crate::value::IrType`].
//! Nothing in this module performs inference or checking — it is a plain
//! data model.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatWidth {
    W32,
    W64,
}

/// A resolved semantic type. Struct and union payloads are carried by name
/// and resolved against [`TypeTables`] rather than boxed inline, which is
/// how the checker tolerates recursive types (a struct with a pointer to
/// itself) without an infinite type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SemanticType {
    Void,
    Bool,
    Int { width: IntWidth, signed: bool },
    Float(FloatWidth),
    String,
    NullLiteral,
    Ptr(Box<SemanticType>),
    Array(Box<SemanticType>, usize),
    Slice(Box<SemanticType>),
    Struct(String),
    Union(String),
    Function(Box<FunctionSig>),
}

impl SemanticType {
    pub fn is_integral(&self) -> bool {
        matches!(self, SemanticType::Int { .. })
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, SemanticType::Int { .. } | SemanticType::Float(_))
    }
}

/// Function-typed equality compares parameters and return type only; the
/// throws set, generics and `extern`-ness do not participate in the
/// *type* of a function value, only in how it may be called.
impl PartialEq for FunctionSig {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && self.return_type == other.return_type
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSig {
    pub params: Vec<ParamType>,
    pub return_type: SemanticType,
    pub throws: Vec<String>,
    pub generics: Vec<String>,
    pub is_extern: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamType {
    pub ty: SemanticType,
    pub is_move: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<(String, SemanticType)>,
    pub methods: IndexMap<String, FunctionSig>,
    pub generics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionVariant {
    pub name: String,
    pub fields: Option<Vec<(String, SemanticType)>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionDef {
    pub name: String,
    pub tag_width: IntWidth,
    pub variants: Vec<UnionVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorTypeDef {
    pub name: String,
    pub fields: Vec<(String, SemanticType)>,
}

/// Side tables the Lowerer consults to resolve a struct/union/error name
/// into its full definition. Kept separate from `SemanticType` itself so
/// that a type that merely *refers* to `"Node"` doesn't need `Node`'s
/// fields in scope yet — this is what lets a struct point at itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeTables {
    pub structs: IndexMap<String, StructDef>,
    pub unions: IndexMap<String, UnionDef>,
    pub errors: IndexMap<String, ErrorTypeDef>,
}

impl TypeTables {
    pub fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.structs.get(name)
    }

    pub fn union_def(&self, name: &str) -> Option<&UnionDef> {
        self.unions.get(name)
    }

    pub fn error_def(&self, name: &str) -> Option<&ErrorTypeDef> {
        self.errors.get(name)
    }
}
