//! IR types and value identifiers for the Anvil middle end.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::semantic::{FloatWidth, IntWidth};

/// An opaque per-function value identifier. Definitions and uses both
/// refer to values by id; nothing outside this module and [`crate::instr`]
/// should need to know it's a `u32`.
pub type ValueId = u32;

/// Reserved sentinel produced by mem2reg's renaming pass when a use is
/// reached along a path with no reaching definition. A well-typed,
/// checker-validated program never observes this value at runtime — its
/// survival past promotion is an internal error (spec.md §7,
/// `MidError::UndefValueSurvived`), not a source-program error.
pub const UNDEF_VALUE: ValueId = u32::MAX;

pub type BlockId = u32;

/// Erased IR types (spec.md §3.2). Struct and union payloads are carried
/// by name and resolved against the owning [`crate::module::Module`]'s
/// type declarations, the same late-binding scheme `semantic::SemanticType`
/// uses for recursive types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IrType {
    #[default]
    Void,
    Bool,
    Int { width: IntWidth, signed: bool },
    Float(FloatWidth),
    /// A heap-backed, runtime-managed string value (spec.md §3.1/§4.6) —
    /// opaque at this layer, not a raw byte pointer, so that string
    /// equality and lifecycle ops can be told apart from plain pointer
    /// arithmetic by every later pass, including the C printer.
    String,
    Ptr(Box<IrType>),
    Array(Box<IrType>, usize),
    Slice(Box<IrType>),
    Struct(String),
    Union(String),
    Function { params: Vec<IrType>, ret: Box<IrType> },
}

impl IrType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, IrType::Int { .. } | IrType::Float(_))
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, IrType::Int { .. })
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, IrType::Ptr(_))
    }

    pub fn ptr_to(inner: IrType) -> IrType {
        IrType::Ptr(Box::new(inner))
    }

    /// Underlying pointee if this is a pointer type, for the
    /// load/store/field-addr instructions that need it.
    pub fn pointee(&self) -> Option<&IrType> {
        match self {
            IrType::Ptr(inner) => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Bool => write!(f, "bool"),
            IrType::String => write!(f, "string"),
            IrType::Int { width, signed } => {
                let prefix = if *signed { "i" } else { "u" };
                let bits = match width {
                    IntWidth::W8 => 8,
                    IntWidth::W16 => 16,
                    IntWidth::W32 => 32,
                    IntWidth::W64 => 64,
                };
                write!(f, "{prefix}{bits}")
            }
            IrType::Float(FloatWidth::W32) => write!(f, "f32"),
            IrType::Float(FloatWidth::W64) => write!(f, "f64"),
            IrType::Ptr(inner) => write!(f, "*{inner}"),
            IrType::Array(inner, len) => write!(f, "[{inner}; {len}]"),
            IrType::Slice(inner) => write!(f, "[{inner}]"),
            IrType::Struct(name) => write!(f, "struct {name}"),
            IrType::Union(name) => write!(f, "union {name}"),
            IrType::Function { params, ret } => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_c_like_surface() {
        let t = IrType::Ptr(Box::new(IrType::Int { width: IntWidth::W32, signed: true }));
        assert_eq!(t.to_string(), "*i32");
    }

    #[test]
    fn numeric_classification() {
        assert!(IrType::Int { width: IntWidth::W64, signed: false }.is_numeric());
        assert!(IrType::Float(FloatWidth::W64).is_numeric());
        assert!(!IrType::Bool.is_numeric());
        assert!(!IrType::Struct("Point".into()).is_numeric());
    }
}
