//! Name mangling (spec.md §4.2): raw names for non-overloaded,
//! non-generic, non-method functions pass straight through; everything
//! else earns a mangled name so the C printer never has to emit two
//! functions with the same symbol.

use crate::semantic::{FloatWidth, IntWidth};
use crate::value::IrType;

pub fn module_prefixed(module: &str, name: &str) -> String {
    format!("{module}__{name}")
}

/// Disambiguate an overloaded function by its parameter-type signature.
pub fn overload_mangled(name: &str, param_types: &[IrType]) -> String {
    let mut out = name.to_string();
    for ty in param_types {
        out.push('_');
        out.push_str(&type_tag(ty));
    }
    out
}

/// Disambiguate a monomorphized generic instantiation by its concrete
/// type arguments.
pub fn monomorphization_mangled(base_name: &str, type_args: &[IrType]) -> String {
    let mut out = base_name.to_string();
    out.push('$');
    for (i, ty) in type_args.iter().enumerate() {
        if i > 0 {
            out.push('_');
        }
        out.push_str(&type_tag(ty));
    }
    out
}

pub fn method_mangled(struct_name: &str, method_name: &str) -> String {
    format!("{struct_name}__{method_name}")
}

fn type_tag(ty: &IrType) -> String {
    match ty {
        IrType::Void => "v".to_string(),
        IrType::Bool => "b".to_string(),
        IrType::String => "str".to_string(),
        IrType::Int { width, signed } => {
            let prefix = if *signed { "i" } else { "u" };
            let bits = match width {
                IntWidth::W8 => 8,
                IntWidth::W16 => 16,
                IntWidth::W32 => 32,
                IntWidth::W64 => 64,
            };
            format!("{prefix}{bits}")
        }
        IrType::Float(FloatWidth::W32) => "f32".to_string(),
        IrType::Float(FloatWidth::W64) => "f64".to_string(),
        IrType::Ptr(inner) => format!("p{}", type_tag(inner)),
        IrType::Array(inner, len) => format!("a{len}{}", type_tag(inner)),
        IrType::Slice(inner) => format!("s{}", type_tag(inner)),
        IrType::Struct(name) => format!("S{}", name.len()).chars().chain(name.chars()).collect(),
        IrType::Union(name) => format!("U{}", name.len()).chars().chain(name.chars()).collect(),
        IrType::Function { params, ret } => {
            let mut s = "F".to_string();
            for p in params {
                s.push_str(&type_tag(p));
            }
            s.push('_');
            s.push_str(&type_tag(ret));
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::IntWidth;

    #[test]
    fn overload_mangling_is_distinct_per_signature() {
        let by_int = overload_mangled("add", &[IrType::Int { width: IntWidth::W32, signed: true }]);
        let by_float = overload_mangled("add", &[IrType::Float(FloatWidth::W64)]);
        assert_ne!(by_int, by_float);
    }

    #[test]
    fn monomorphization_mangling_is_stable_for_equal_args() {
        let a = monomorphization_mangled("Box", &[IrType::Bool]);
        let b = monomorphization_mangled("Box", &[IrType::Bool]);
        assert_eq!(a, b);
    }
}
