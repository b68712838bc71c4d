//! Multi-module driver (spec.md §4.7): topologically orders a set of
//! modules so every module's dependencies lower before it, prefixes each
//! non-root module's symbols with its module name, merges extern
//! declarations by name (first one wins), and reports a dependency cycle
//! before any lowering begins rather than partway through.

use std::collections::{HashMap, HashSet};

use crate::error::MidError;
use crate::instr::Instr;
use crate::lower::{self, mangle};
use crate::module::{Module, TypeDecl};
use crate::typed_ast::{CheckerOutput, ModuleAst};
use crate::value::IrType;

/// One module's lowering inputs, keyed by module name in the map the
/// driver is handed.
pub struct DriverInput<'a> {
    pub ast: &'a ModuleAst,
    pub checker: &'a CheckerOutput,
}

/// Lower every module in `inputs` as a single compilation, ordering them
/// leaf-first with `root` last, prefixing every non-root module's
/// functions/globals/types with its module name, and deduplicating
/// extern declarations across the whole set.
pub fn lower_program(inputs: &HashMap<String, DriverInput<'_>>, root: &str) -> Result<Vec<Module>, MidError> {
    let order = topological_order(inputs, root)?;

    let mut seen_externs: HashSet<String> = HashSet::new();
    let mut modules = Vec::with_capacity(order.len());

    for name in &order {
        let input = inputs
            .get(name)
            .unwrap_or_else(|| panic!("topological_order only returns names present in `inputs`"));
        let mut lowered = lower::lower_module(input.ast, input.checker)?;

        if name != root {
            prefix_module(&mut lowered, name);
        }

        lowered.externs.retain(|e| seen_externs.insert(e.name.clone()));

        modules.push(lowered);
    }

    Ok(modules)
}

/// Reads a module's dependency edges off its import table: an imported
/// name's mangled form is always `{owning_module}__{name}` (the same
/// scheme [`prefix_module`] applies below), so the owning module is
/// recoverable without a separate dependency list.
fn module_dependencies(ast: &ModuleAst) -> Vec<String> {
    let mut deps: Vec<String> = ast
        .imports
        .iter()
        .filter_map(|imp| imp.mangled_name.split_once("__").map(|(module, _)| module.to_string()))
        .collect();
    deps.sort();
    deps.dedup();
    deps
}

fn topological_order(inputs: &HashMap<String, DriverInput<'_>>, root: &str) -> Result<Vec<String>, MidError> {
    let mut order = Vec::with_capacity(inputs.len());
    let mut visited: HashSet<String> = HashSet::new();
    let mut on_stack: HashSet<String> = HashSet::new();

    fn visit(
        name: &str,
        inputs: &HashMap<String, DriverInput<'_>>,
        visited: &mut HashSet<String>,
        on_stack: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<(), MidError> {
        if visited.contains(name) {
            return Ok(());
        }
        let Some(input) = inputs.get(name) else { return Ok(()) };
        if !on_stack.insert(name.to_string()) {
            return Err(MidError::ModuleCycle(name.to_string()));
        }
        for dep in module_dependencies(input.ast) {
            visit(&dep, inputs, visited, on_stack, order)?;
        }
        on_stack.remove(name);
        visited.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }

    visit(root, inputs, &mut visited, &mut on_stack, &mut order)?;
    let mut remaining: Vec<&String> = inputs.keys().collect();
    remaining.sort();
    for name in remaining {
        visit(name, inputs, &mut visited, &mut on_stack, &mut order)?;
    }

    Ok(order)
}

/// Renames every function, global, and named type this module declares to
/// its module-prefixed form, and rewrites every reference to one of those
/// names throughout the module's bodies and type declarations. A name
/// this module merely imports (and thus does not declare) is left alone —
/// it was already lowered to its defining module's mangled form upstream
/// by the checker's `resolved_callee`/`resolved_method` tables.
fn prefix_module(module: &mut Module, module_name: &str) {
    let fn_map: HashMap<String, String> =
        module.functions.iter().map(|f| (f.name.clone(), mangle::module_prefixed(module_name, &f.name))).collect();
    let type_map: HashMap<String, String> =
        module.types.iter().map(|t| (t.name().to_string(), mangle::module_prefixed(module_name, t.name()))).collect();
    let global_map: HashMap<String, String> =
        module.globals.iter().map(|g| (g.name.clone(), mangle::module_prefixed(module_name, &g.name))).collect();

    for t in &mut module.types {
        rename_type_decl(t, &type_map);
    }
    for g in &mut module.globals {
        if let Some(new_name) = global_map.get(&g.name) {
            g.name = new_name.clone();
        }
        g.ty = rename_ty(&g.ty, &type_map);
    }
    for e in &mut module.externs {
        e.ret = rename_ty(&e.ret, &type_map);
        for p in &mut e.params {
            *p = rename_ty(p, &type_map);
        }
    }
    for f in &mut module.functions {
        if let Some(new_name) = fn_map.get(&f.name) {
            f.name = new_name.clone();
        }
        f.return_ty = rename_ty(&f.return_ty, &type_map);
        for p in &mut f.params {
            p.ty = rename_ty(&p.ty, &type_map);
        }
        for b in &mut f.blocks {
            for phi in &mut b.phis {
                phi.ty = rename_ty(&phi.ty, &type_map);
            }
            for instr in &mut b.instrs {
                rename_instr(instr, &fn_map, &type_map);
            }
        }
    }
}

fn rename_type_decl(decl: &mut TypeDecl, type_map: &HashMap<String, String>) {
    match decl {
        TypeDecl::Struct(s) => {
            if let Some(new_name) = type_map.get(&s.name) {
                s.name = new_name.clone();
            }
            for (_, ty) in &mut s.fields {
                *ty = rename_ty(ty, type_map);
            }
        }
        TypeDecl::Union(u) => {
            if let Some(new_name) = type_map.get(&u.name) {
                u.name = new_name.clone();
            }
            for (_, fields) in &mut u.variants {
                if let Some(fields) = fields {
                    for ty in fields {
                        *ty = rename_ty(ty, type_map);
                    }
                }
            }
        }
    }
}

fn rename_ty(ty: &IrType, type_map: &HashMap<String, String>) -> IrType {
    match ty {
        IrType::Struct(name) => IrType::Struct(type_map.get(name).cloned().unwrap_or_else(|| name.clone())),
        IrType::Union(name) => IrType::Union(type_map.get(name).cloned().unwrap_or_else(|| name.clone())),
        IrType::Ptr(inner) => IrType::Ptr(Box::new(rename_ty(inner, type_map))),
        IrType::Array(inner, len) => IrType::Array(Box::new(rename_ty(inner, type_map)), *len),
        IrType::Slice(inner) => IrType::Slice(Box::new(rename_ty(inner, type_map))),
        IrType::Function { params, ret } => IrType::Function {
            params: params.iter().map(|p| rename_ty(p, type_map)).collect(),
            ret: Box::new(rename_ty(ret, type_map)),
        },
        other => other.clone(),
    }
}

fn rename_instr(instr: &mut Instr, fn_map: &HashMap<String, String>, type_map: &HashMap<String, String>) {
    match instr {
        Instr::Alloca { ty, .. } | Instr::Load { ty, .. } | Instr::ConstInt { ty, .. } | Instr::ConstFloat { ty, .. } | Instr::ConstNullPtr { ty, .. } => {
            *ty = rename_ty(ty, type_map);
        }
        Instr::FieldAddr { struct_name, field_ty, .. } => {
            if let Some(new_name) = type_map.get(struct_name) {
                *struct_name = new_name.clone();
            }
            *field_ty = rename_ty(field_ty, type_map);
        }
        Instr::ElemAddr { elem_ty, .. } => *elem_ty = rename_ty(elem_ty, type_map),
        Instr::Binary { result_ty, .. } | Instr::Unary { result_ty, .. } => {
            *result_ty = rename_ty(result_ty, type_map);
        }
        Instr::Call { callee, ret_ty, .. } => {
            if let Some(new_name) = fn_map.get(callee) {
                *callee = new_name.clone();
            }
            *ret_ty = rename_ty(ret_ty, type_map);
        }
        Instr::ExternCall { ret_ty, .. } => *ret_ty = rename_ty(ret_ty, type_map),
        Instr::ThrowsCall { callee, .. } => {
            if let Some(new_name) = fn_map.get(callee) {
                *callee = new_name.clone();
            }
        }
        Instr::Cast { target_ty, .. } => *target_ty = rename_ty(target_ty, type_map),
        Instr::SizeOf { ty, result_ty, .. } => {
            *ty = rename_ty(ty, type_map);
            *result_ty = rename_ty(result_ty, type_map);
        }
        Instr::Destroy { struct_name, .. } | Instr::OnCopy { struct_name, .. } => {
            if let Some(new_name) = type_map.get(struct_name) {
                *struct_name = new_name.clone();
            }
        }
        Instr::Store { .. }
        | Instr::ConstBool { .. }
        | Instr::ConstString { .. }
        | Instr::Move { .. }
        | Instr::BoundsCheck { .. }
        | Instr::NullCheck { .. }
        | Instr::Assert { .. }
        | Instr::Require { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed_ast::{CheckerOutput, ImportedName, ModuleAst};

    fn module_ast(name: &str, imports: Vec<ImportedName>) -> ModuleAst {
        ModuleAst { name: name.to_string(), functions: Vec::new(), types: Default::default(), imports }
    }

    #[test]
    fn root_is_ordered_after_its_dependency() {
        let math = module_ast("math", vec![]);
        let main = module_ast(
            "main",
            vec![ImportedName { local_name: "add".into(), mangled_name: "math__add".into(), is_overloaded: false }],
        );
        let math_checker = CheckerOutput::default();
        let main_checker = CheckerOutput::default();
        let mut inputs = HashMap::new();
        inputs.insert("math".to_string(), DriverInput { ast: &math, checker: &math_checker });
        inputs.insert("main".to_string(), DriverInput { ast: &main, checker: &main_checker });

        let order = topological_order(&inputs, "main").unwrap();
        let math_pos = order.iter().position(|n| n == "math").unwrap();
        let main_pos = order.iter().position(|n| n == "main").unwrap();
        assert!(math_pos < main_pos);
    }

    #[test]
    fn cyclic_imports_are_rejected() {
        let a = module_ast(
            "a",
            vec![ImportedName { local_name: "b_fn".into(), mangled_name: "b__b_fn".into(), is_overloaded: false }],
        );
        let b = module_ast(
            "b",
            vec![ImportedName { local_name: "a_fn".into(), mangled_name: "a__a_fn".into(), is_overloaded: false }],
        );
        let a_checker = CheckerOutput::default();
        let b_checker = CheckerOutput::default();
        let mut inputs = HashMap::new();
        inputs.insert("a".to_string(), DriverInput { ast: &a, checker: &a_checker });
        inputs.insert("b".to_string(), DriverInput { ast: &b, checker: &b_checker });

        assert!(topological_order(&inputs, "a").is_err());
    }

    #[test]
    fn prefixing_renames_functions_and_their_own_call_sites() {
        use crate::function::FunctionBuilder;
        use crate::instr::Terminator;

        let mut b = FunctionBuilder::new("helper", vec![], IrType::Void);
        let entry = b.fresh_block();
        b.block_mut(entry).push(Instr::Call { dest: None, callee: "helper".to_string(), args: vec![], ret_ty: IrType::Void });
        b.block_mut(entry).terminate(Terminator::ReturnVoid);
        let f = b.seal().unwrap();

        let mut module = Module::new("util");
        module.functions.push(f);
        prefix_module(&mut module, "util");

        assert_eq!(module.functions[0].name, "util__helper");
        let Instr::Call { callee, .. } = &module.functions[0].blocks[0].instrs[0] else { panic!("expected call") };
        assert_eq!(callee, "util__helper");
    }
}
