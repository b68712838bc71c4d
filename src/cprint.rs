//! The C printer (spec.md §4.6): a total, mechanical translation of a
//! post-SSA-destruction module into compilable C. Every instruction and
//! terminator becomes exactly one (or a small fixed handful of) C
//! statement; every basic block becomes a label; branches and jumps
//! become `goto`. The printer has no license to optimize, reorder, or
//! alter semantics — any divergence from the IR it is handed is a printer
//! bug, not a design choice.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::error::MidError;
use crate::function::{Block, Function};
use crate::instr::{Instr, Terminator};
use crate::module::{ExternDecl, Module, TypeDecl, UnionLayout};
use crate::semantic::{FloatWidth, IntWidth};
use crate::typed_ast::{BinOp, UnOp};
use crate::value::{IrType, ValueId};

/// The runtime this printer's output is wired against (spec.md §6's
/// ABI surface). The runtime's own header and implementation are out of
/// scope for this crate; the printer only emits calls against it.
const RUNTIME_HEADER: &str = "anvil_runtime.h";

/// Emit the complete C translation unit for a lowered, promoted,
/// SSA-destructed module. Fails with `MidError::Internal` if the module
/// still carries phi nodes — that is a contract violation by whatever
/// produced the module, not something this printer may paper over.
pub fn print_module(module: &Module) -> Result<String, MidError> {
    let mut out = String::new();
    writeln!(out, "#include <stdint.h>").unwrap();
    writeln!(out, "#include <stdbool.h>").unwrap();
    writeln!(out, "#include <stddef.h>").unwrap();
    writeln!(out, "#include <stdlib.h>").unwrap();
    writeln!(out, "#include \"{RUNTIME_HEADER}\"").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "/* module: {} */", module.name).unwrap();
    writeln!(out).unwrap();

    for decl in &module.types {
        print_type_decl(&mut out, decl);
        writeln!(out).unwrap();
    }

    for g in &module.globals {
        match g.init_int {
            Some(v) => writeln!(out, "{} = {v};", decl_string(&g.ty, &sanitize_ident(&g.name))).unwrap(),
            None => writeln!(out, "{};", decl_string(&g.ty, &sanitize_ident(&g.name))).unwrap(),
        }
    }
    if !module.globals.is_empty() {
        writeln!(out).unwrap();
    }

    for e in &module.externs {
        writeln!(out, "{};", print_extern_signature(e)).unwrap();
    }
    if !module.externs.is_empty() {
        writeln!(out).unwrap();
    }

    for f in &module.functions {
        writeln!(out, "{};", print_function_signature(f)).unwrap();
    }
    writeln!(out).unwrap();

    for f in &module.functions {
        print_function(&mut out, f)?;
        writeln!(out).unwrap();
    }

    Ok(out)
}

fn print_extern_signature(e: &ExternDecl) -> String {
    let params = e.params.iter().map(|p| c_type(p)).collect::<Vec<_>>().join(", ");
    let params = if params.is_empty() { "void".to_string() } else { params };
    format!("{} {}({})", c_type(&e.ret), sanitize_ident(&e.name), params)
}

fn print_function_signature(f: &Function) -> String {
    let params = if f.params.is_empty() {
        "void".to_string()
    } else {
        f.params
            .iter()
            .map(|p| decl_string(&p.ty, &sanitize_ident(&p.name)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{} {}({})", c_type(&f.return_ty), sanitize_ident(&f.name), params)
}

fn print_function(out: &mut String, f: &Function) -> Result<(), MidError> {
    writeln!(out, "{} {{", print_function_signature(f)).unwrap();

    let mut types: HashMap<ValueId, IrType> = HashMap::new();
    let mut names: HashMap<ValueId, String> = HashMap::new();
    for (i, p) in f.params.iter().enumerate() {
        let id = i as ValueId;
        types.insert(id, p.ty.clone());
        names.insert(id, sanitize_ident(&p.name));
    }

    for block in &f.blocks {
        print_block(out, f.name.as_str(), block, &mut types, &names)?;
    }

    writeln!(out, "}}").unwrap();
    Ok(())
}

fn print_block(
    out: &mut String,
    function_name: &str,
    block: &Block,
    types: &mut HashMap<ValueId, IrType>,
    names: &HashMap<ValueId, String>,
) -> Result<(), MidError> {
    if !block.phis.is_empty() {
        return Err(MidError::Internal(format!(
            "function `{function_name}` block {} still carries phi nodes at print time — SSA destruction must run first",
            block.id
        )));
    }
    writeln!(out, "L{}: ;", block.id).unwrap();
    for instr in &block.instrs {
        print_instr(out, instr, types, names);
    }
    print_terminator(out, &block.terminator, types, names);
    Ok(())
}

/// Resolves a value's printed C name: a parameter keeps its source name,
/// everything else is the uniform `v<id>` register name.
fn value_name(id: ValueId, names: &HashMap<ValueId, String>) -> String {
    names.get(&id).cloned().unwrap_or_else(|| format!("v{id}"))
}

fn print_instr(out: &mut String, instr: &Instr, types: &mut HashMap<ValueId, IrType>, names: &HashMap<ValueId, String>) {
    let n = |id: ValueId| value_name(id, names);
    match instr {
        Instr::Alloca { dest, ty } => {
            let backing = format!("{}_backing", n(*dest));
            writeln!(out, "    {};", decl_string(ty, &backing)).unwrap();
            let ptr_ty = IrType::Ptr(Box::new(ty.clone()));
            writeln!(out, "    {} = &{backing};", decl_string(&ptr_ty, &n(*dest))).unwrap();
            types.insert(*dest, ptr_ty);
        }
        Instr::Load { dest, ty, ptr } => {
            writeln!(out, "    {} = *{};", decl_string(ty, &n(*dest)), n(*ptr)).unwrap();
            types.insert(*dest, ty.clone());
        }
        Instr::Store { ptr, value } => {
            writeln!(out, "    *{} = {};", n(*ptr), n(*value)).unwrap();
        }
        Instr::FieldAddr { dest, base, field, field_ty, .. } => {
            let ptr_ty = IrType::Ptr(Box::new(field_ty.clone()));
            writeln!(out, "    {} = &({}->{});", decl_string(&ptr_ty, &n(*dest)), n(*base), sanitize_ident(field)).unwrap();
            types.insert(*dest, ptr_ty);
        }
        Instr::ElemAddr { dest, base, index, elem_ty } => {
            let ptr_ty = IrType::Ptr(Box::new(elem_ty.clone()));
            writeln!(out, "    {} = &(*{})[{}];", decl_string(&ptr_ty, &n(*dest)), n(*base), n(*index)).unwrap();
            types.insert(*dest, ptr_ty);
        }
        Instr::Binary { dest, op, lhs, rhs, result_ty } => {
            let operand_is_string = matches!(types.get(lhs), Some(IrType::String));
            let expr = match (operand_is_string, op) {
                (true, BinOp::Eq) => format!("anvil_string_eq({}, {})", n(*lhs), n(*rhs)),
                (true, BinOp::Ne) => format!("!anvil_string_eq({}, {})", n(*lhs), n(*rhs)),
                _ => format!("({} {} {})", n(*lhs), bin_op_str(*op), n(*rhs)),
            };
            writeln!(out, "    {} = {expr};", decl_string(result_ty, &n(*dest))).unwrap();
            types.insert(*dest, result_ty.clone());
        }
        Instr::Unary { dest, op, operand, result_ty } => {
            writeln!(out, "    {} = {}{};", decl_string(result_ty, &n(*dest)), un_op_str(*op), n(*operand)).unwrap();
            types.insert(*dest, result_ty.clone());
        }
        Instr::ConstInt { dest, value, ty } => {
            writeln!(out, "    {} = {value};", decl_string(ty, &n(*dest))).unwrap();
            types.insert(*dest, ty.clone());
        }
        Instr::ConstFloat { dest, value, ty } => {
            writeln!(out, "    {} = {value:?};", decl_string(ty, &n(*dest))).unwrap();
            types.insert(*dest, ty.clone());
        }
        Instr::ConstBool { dest, value } => {
            writeln!(out, "    {} = {value};", decl_string(&IrType::Bool, &n(*dest))).unwrap();
            types.insert(*dest, IrType::Bool);
        }
        Instr::ConstString { dest, value } => {
            writeln!(out, "    {} = anvil_string_literal(\"{}\");", decl_string(&IrType::String, &n(*dest)), escape_c_string(value)).unwrap();
            types.insert(*dest, IrType::String);
        }
        Instr::ConstNullPtr { dest, ty } => {
            writeln!(out, "    {} = NULL;", decl_string(ty, &n(*dest))).unwrap();
            types.insert(*dest, ty.clone());
        }
        Instr::Call { dest, callee, args, ret_ty } => {
            let call = format!("{}({})", sanitize_ident(callee), join_args(args, names));
            match dest {
                Some(d) => {
                    writeln!(out, "    {} = {call};", decl_string(ret_ty, &n(*d))).unwrap();
                    types.insert(*d, ret_ty.clone());
                }
                None => {
                    writeln!(out, "    {call};").unwrap();
                }
            }
        }
        Instr::ExternCall { dest, callee, args, ret_ty } => {
            let call = format!("{}({})", sanitize_ident(callee), join_args(args, names));
            match dest {
                Some(d) => {
                    writeln!(out, "    {} = {call};", decl_string(ret_ty, &n(*d))).unwrap();
                    types.insert(*d, ret_ty.clone());
                }
                None => {
                    writeln!(out, "    {call};").unwrap();
                }
            }
        }
        Instr::ThrowsCall { dest, callee, args, out_ptr, err_ptr } => {
            let mut all_args: Vec<String> = args.iter().map(|a| n(*a)).collect();
            all_args.push(n(*out_ptr));
            all_args.push(n(*err_ptr));
            let tag_ty = IrType::Int { width: IntWidth::W32, signed: true };
            writeln!(out, "    {} = {}({});", decl_string(&tag_ty, &n(*dest)), sanitize_ident(callee), all_args.join(", ")).unwrap();
            types.insert(*dest, tag_ty);
        }
        Instr::Cast { dest, value, target_ty } => {
            writeln!(out, "    {} = ({})({});", decl_string(target_ty, &n(*dest)), c_type(target_ty), n(*value)).unwrap();
            types.insert(*dest, target_ty.clone());
        }
        Instr::SizeOf { dest, ty, result_ty } => {
            writeln!(out, "    {} = sizeof({});", decl_string(result_ty, &n(*dest)), size_of_type_name(ty)).unwrap();
            types.insert(*dest, result_ty.clone());
        }
        Instr::Destroy { ptr, struct_name } => {
            writeln!(out, "    {}__destroy({});", sanitize_ident(struct_name), n(*ptr)).unwrap();
        }
        Instr::OnCopy { dest, value, struct_name } => {
            let ty = IrType::Struct(struct_name.clone());
            writeln!(out, "    {} = {}__oncopy({});", decl_string(&ty, &n(*dest)), sanitize_ident(struct_name), n(*value)).unwrap();
            types.insert(*dest, ty);
        }
        Instr::Move { dest, source } => {
            let ty = types.get(source).cloned().unwrap_or(IrType::Void);
            writeln!(out, "    {} = {};", decl_string(&ty, &n(*dest)), n(*source)).unwrap();
            types.insert(*dest, ty);
        }
        Instr::BoundsCheck { index, len } => {
            writeln!(out, "    anvil_bounds_check({}, {});", n(*index), n(*len)).unwrap();
        }
        Instr::NullCheck { ptr } => {
            writeln!(out, "    anvil_null_check({});", n(*ptr)).unwrap();
        }
        Instr::Assert { cond, message } => {
            writeln!(out, "    anvil_assert({}, \"{}\");", n(*cond), escape_c_string(message)).unwrap();
        }
        Instr::Require { cond, message } => {
            writeln!(out, "    anvil_require({}, \"{}\");", n(*cond), escape_c_string(message)).unwrap();
        }
    }
}

fn print_terminator(out: &mut String, term: &Terminator, _types: &HashMap<ValueId, IrType>, names: &HashMap<ValueId, String>) {
    let n = |id: ValueId| value_name(id, names);
    match term {
        Terminator::ReturnValue(v) => {
            writeln!(out, "    return {};", n(*v)).unwrap();
        }
        Terminator::ReturnVoid => {
            writeln!(out, "    return;").unwrap();
        }
        Terminator::Jump(b) => {
            writeln!(out, "    goto L{b};").unwrap();
        }
        Terminator::Branch { cond, then_block, else_block } => {
            writeln!(out, "    if ({}) {{ goto L{then_block}; }} else {{ goto L{else_block}; }}", n(*cond)).unwrap();
        }
        Terminator::Switch { scrutinee, cases, default } => {
            writeln!(out, "    switch ({}) {{", n(*scrutinee)).unwrap();
            for (value, block) in cases {
                writeln!(out, "        case {value}: goto L{block};").unwrap();
            }
            writeln!(out, "        default: goto L{default};").unwrap();
            writeln!(out, "    }}").unwrap();
        }
        Terminator::Unreachable => {
            writeln!(out, "    abort();").unwrap();
        }
    }
}

fn join_args(args: &[ValueId], names: &HashMap<ValueId, String>) -> String {
    args.iter().map(|a| value_name(*a, names)).collect::<Vec<_>>().join(", ")
}

fn bin_op_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Rem => "%",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
        BinOp::BitXor => "^",
        BinOp::Shl => "<<",
        BinOp::Shr => ">>",
    }
}

fn un_op_str(op: UnOp) -> &'static str {
    match op {
        UnOp::Neg => "-",
        UnOp::Not => "!",
        UnOp::BitNot => "~",
        UnOp::Deref => "*",
        UnOp::AddrOf => "&",
    }
}

/// Maps an [`IrType`] to its base C spelling — valid to use directly as a
/// cast target or wherever a bare type name is needed. Declaring a
/// *variable* of a composite type (arrays in particular) needs
/// [`decl_string`] instead, since C's declarator syntax wraps the name.
fn c_type(ty: &IrType) -> String {
    match ty {
        IrType::Void => "void".to_string(),
        IrType::Bool => "bool".to_string(),
        IrType::Int { width, signed } => {
            let prefix = if *signed { "int" } else { "uint" };
            let bits = match width {
                IntWidth::W8 => 8,
                IntWidth::W16 => 16,
                IntWidth::W32 => 32,
                IntWidth::W64 => 64,
            };
            format!("{prefix}{bits}_t")
        }
        IrType::Float(FloatWidth::W32) => "float".to_string(),
        IrType::Float(FloatWidth::W64) => "double".to_string(),
        IrType::String => "AnvilString".to_string(),
        IrType::Ptr(inner) => format!("{}*", c_type(inner)),
        IrType::Array(inner, _) => format!("{}*", c_type(inner)),
        IrType::Slice(inner) => format!("{}*", c_type(inner)),
        IrType::Struct(name) => format!("struct {}", sanitize_ident(name)),
        IrType::Union(name) => format!("struct {}", sanitize_ident(name)),
        IrType::Function { params, ret } => {
            let params = params.iter().map(|p| c_type(p)).collect::<Vec<_>>().join(", ");
            format!("{}(*)({})", c_type(ret), params)
        }
    }
}

/// The name used inside `sizeof(...)` for a measured type — identical to
/// [`c_type`] except arrays keep their `T[N]` shape so `sizeof` measures
/// the whole block rather than decaying to an element pointer.
fn size_of_type_name(ty: &IrType) -> String {
    match ty {
        IrType::Array(inner, len) => format!("{}[{len}]", c_type(inner)),
        other => c_type(other),
    }
}

/// Formats a declarator for `name` of type `ty` — the piece C's grammar
/// insists on wrapping around the identifier for array types
/// (`T name[N]`, not `T[N] name`).
fn decl_string(ty: &IrType, name: &str) -> String {
    match ty {
        IrType::Array(inner, len) => format!("{} {name}[{len}]", c_type(inner)),
        other => format!("{} {name}", c_type(other)),
    }
}

fn print_type_decl(out: &mut String, decl: &TypeDecl) {
    match decl {
        TypeDecl::Struct(s) => {
            writeln!(out, "struct {} {{", sanitize_ident(&s.name)).unwrap();
            for (field_name, field_ty) in &s.fields {
                writeln!(out, "    {};", decl_string(field_ty, &sanitize_ident(field_name))).unwrap();
            }
            writeln!(out, "}};").unwrap();
        }
        TypeDecl::Union(u) => print_union_decl(out, u),
    }
}

/// A tagged union prints as spec.md §4.6 requires: an enum of named tag
/// constants plus `struct { tag; union { variant structs... } data; }`.
fn print_union_decl(out: &mut String, u: &UnionLayout) {
    let name = sanitize_ident(&u.name);
    writeln!(out, "enum {{").unwrap();
    for (i, (variant_name, _)) in u.variants.iter().enumerate() {
        writeln!(out, "    {name}_TAG_{} = {i},", sanitize_ident(variant_name)).unwrap();
    }
    writeln!(out, "}};").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "struct {name} {{").unwrap();
    writeln!(out, "    int32_t tag;").unwrap();
    writeln!(out, "    union {{").unwrap();
    for (variant_name, fields) in &u.variants {
        match fields {
            Some(fields) if !fields.is_empty() => {
                writeln!(out, "        struct {{").unwrap();
                for (i, field_ty) in fields.iter().enumerate() {
                    writeln!(out, "            {};", decl_string(field_ty, &format!("f{i}"))).unwrap();
                }
                writeln!(out, "        }} {};", sanitize_ident(variant_name)).unwrap();
            }
            _ => {
                writeln!(out, "        struct {{ uint8_t _unused; }} {};", sanitize_ident(variant_name)).unwrap();
            }
        }
    }
    writeln!(out, "    }} data;").unwrap();
    writeln!(out, "}};").unwrap();
}

fn escape_c_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Every C identifier the printer emits is already one of the Lowerer's
/// own mangled names, which are built from source identifiers — safe in
/// the overwhelming common case, but spec.md §4.6 still calls for a fixed
/// substitution for anything outside `[A-Za-z0-9_]`.
fn sanitize_ident(name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !name.is_empty() {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            let _ = write!(out, "_{:x}_", c as u32);
        }
    }
    if out.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(true) {
        out.insert(0, '_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{FunctionBuilder, Param};
    use crate::instr::Instr;
    use crate::module::{Module, StructLayout};

    #[test]
    fn sanitize_ident_passes_through_plain_names() {
        assert_eq!(sanitize_ident("main"), "main");
        assert_eq!(sanitize_ident("Point__new"), "Point__new");
    }

    #[test]
    fn sanitize_ident_escapes_invalid_characters() {
        let s = sanitize_ident("a.b");
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn straight_line_function_prints_one_label_and_a_return() {
        let mut b = FunctionBuilder::new(
            "add",
            vec![
                Param { name: "a".to_string(), ty: IrType::Int { width: IntWidth::W32, signed: true }, is_move: false },
                Param { name: "b".to_string(), ty: IrType::Int { width: IntWidth::W32, signed: true }, is_move: false },
            ],
            IrType::Int { width: IntWidth::W32, signed: true },
        );
        let entry = b.fresh_block();
        let dest = b.fresh_value();
        b.block_mut(entry).push(Instr::Binary {
            dest,
            op: BinOp::Add,
            lhs: 0,
            rhs: 1,
            result_ty: IrType::Int { width: IntWidth::W32, signed: true },
        });
        b.block_mut(entry).terminate(Terminator::ReturnValue(dest));
        let f = b.seal().unwrap();

        let mut module = Module::new("m");
        module.functions.push(f);
        let c = print_module(&module).unwrap();
        assert!(c.contains("L0: ;"));
        assert!(c.contains("return v2;"));
        assert!(c.contains("int32_t add(int32_t a, int32_t b)"));
    }

    #[test]
    fn phi_surviving_to_print_time_is_rejected() {
        let mut b = FunctionBuilder::new("f", vec![], IrType::Void);
        let entry = b.fresh_block();
        b.block_mut(entry).phis.push(crate::instr::Phi { dest: 0, ty: IrType::Bool, incomings: vec![] });
        b.block_mut(entry).terminate(Terminator::ReturnVoid);
        let f = b.seal().unwrap();
        let mut module = Module::new("m");
        module.functions.push(f);
        assert!(print_module(&module).is_err());
    }

    #[test]
    fn struct_layout_prints_fields_in_declared_order() {
        let mut out = String::new();
        print_type_decl(
            &mut out,
            &TypeDecl::Struct(StructLayout {
                name: "Point".to_string(),
                fields: vec![
                    ("x".to_string(), IrType::Int { width: IntWidth::W32, signed: true }),
                    ("y".to_string(), IrType::Int { width: IntWidth::W32, signed: true }),
                ],
            }),
        );
        let x_pos = out.find("x;").unwrap();
        let y_pos = out.find("y;").unwrap();
        assert!(x_pos < y_pos);
    }
}
