//! A lowered module: ordered globals, functions, named-type declarations
//! and extern declarations (spec.md §3.5), plus the statistics helper
//! SPEC_FULL.md §C keeps around for the driver's per-module log line.

use serde::{Deserialize, Serialize};

use crate::function::Function;
use crate::value::IrType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub name: String,
    pub ty: IrType,
    pub init_int: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructLayout {
    pub name: String,
    pub fields: Vec<(String, IrType)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionLayout {
    pub name: String,
    pub tag_ty: IrType,
    pub variants: Vec<(String, Option<Vec<IrType>>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeDecl {
    Struct(StructLayout),
    Union(UnionLayout),
}

impl TypeDecl {
    pub fn name(&self) -> &str {
        match self {
            TypeDecl::Struct(s) => &s.name,
            TypeDecl::Union(u) => &u.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternDecl {
    pub name: String,
    pub params: Vec<IrType>,
    pub ret: IrType,
}

/// A single lowered translation unit. Every collection here is ordered —
/// `seen_ir::module::IRModule` keeps `functions`/`imports` in `HashMap`s;
/// this crate uses `Vec` throughout instead, because spec.md §3.5 makes
/// block/field/function order part of the module's identity, not an
/// incidental storage detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub globals: Vec<Global>,
    pub functions: Vec<Function>,
    pub types: Vec<TypeDecl>,
    pub externs: Vec<ExternDecl>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), globals: Vec::new(), functions: Vec::new(), types: Vec::new(), externs: Vec::new() }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn struct_layout(&self, name: &str) -> Option<&StructLayout> {
        self.types.iter().find_map(|t| match t {
            TypeDecl::Struct(s) if s.name == name => Some(s),
            _ => None,
        })
    }

    pub fn union_layout(&self, name: &str) -> Option<&UnionLayout> {
        self.types.iter().find_map(|t| match t {
            TypeDecl::Union(u) if u.name == name => Some(u),
            _ => None,
        })
    }

    pub fn stats(&self) -> ModuleStats {
        ModuleStats::compute(self)
    }
}

/// Aggregate counts over a lowered module, the way
/// `seen_ir::module::ModuleStatistics` summarizes an `IRModule` for a log
/// line or a quick sanity check — not used by any correctness-bearing
/// pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModuleStats {
    pub function_count: usize,
    pub global_count: usize,
    pub block_count: usize,
    pub instruction_count: usize,
}

impl ModuleStats {
    pub fn compute(module: &Module) -> Self {
        let block_count = module.functions.iter().map(|f| f.blocks.len()).sum();
        let instruction_count = module
            .functions
            .iter()
            .flat_map(|f| f.blocks.iter())
            .map(|b| b.instrs.len())
            .sum();
        Self {
            function_count: module.functions.len(),
            global_count: module.globals.len(),
            block_count,
            instruction_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_has_zeroed_stats() {
        let m = Module::new("empty");
        let stats = m.stats();
        assert_eq!(stats.function_count, 0);
        assert_eq!(stats.block_count, 0);
    }
}
