//! The Lowerer: turns a [`crate::typed_ast::ModuleAst`] plus its
//! [`crate::typed_ast::CheckerOutput`] into a [`crate::module::Module`] of
//! block IR (spec.md §4.2). The four concerns big enough to earn their own
//! file are split out: [`mangle`] (name mangling), [`scope`] (destructor
//! lifecycle), [`throws`] (the throws/catch protocol), and [`control_flow`]
//! (loop/if/switch desugaring); this file owns the shared `Lowerer` state
//! and the expression-independent glue between them. Expression lowering
//! itself lives in [`expr`].

pub mod control_flow;
pub mod expr;
pub mod mangle;
pub mod scope;
pub mod throws;

use std::collections::HashMap;

use log::debug;

use crate::error::MidError;
use crate::function::{BlockBuilder, Function, FunctionBuilder, Param};
use crate::instr::{Instr, Terminator};
use crate::module::{Module, StructLayout, TypeDecl, UnionLayout};
use crate::semantic::{SemanticType, TypeTables};
use crate::typed_ast::{CheckerOutput, CheckerTables, FunctionDecl, FunctionParam as TypedFunctionParam, ModuleAst};
use crate::value::{BlockId, IrType, ValueId};

struct LoopContext {
    break_target: BlockId,
    continue_target: BlockId,
    scope_depth: usize,
}

pub struct Lowerer<'a> {
    #[allow(dead_code)]
    module_name: String,
    #[allow(dead_code)]
    types: &'a TypeTables,
    checker: &'a CheckerTables,
    builder: FunctionBuilder,
    current_block: BlockId,
    scopes: scope::ScopeStack,
    locals: HashMap<String, ValueId>,
    loop_stack: Vec<LoopContext>,
    current_function_throws: Option<Vec<String>>,
    current_function_out_ptr: Option<ValueId>,
    current_function_err_ptr: Option<ValueId>,
}

/// Erase a checker-level [`SemanticType`] to the IR's [`IrType`]
/// (spec.md §3.2): scalars map one-to-one, struct/union payloads are kept
/// by name since their layout lives in the module's type declarations, not
/// inline in every reference to them.
pub fn erase_type(ty: &SemanticType) -> IrType {
    match ty {
        SemanticType::Void => IrType::Void,
        SemanticType::Bool => IrType::Bool,
        SemanticType::Int { width, signed } => IrType::Int { width: *width, signed: *signed },
        SemanticType::Float(w) => IrType::Float(*w),
        SemanticType::String => IrType::String,
        SemanticType::NullLiteral => IrType::Ptr(Box::new(IrType::Void)),
        SemanticType::Ptr(inner) => IrType::Ptr(Box::new(erase_type(inner))),
        SemanticType::Array(inner, len) => IrType::Array(Box::new(erase_type(inner)), *len),
        SemanticType::Slice(inner) => IrType::Slice(Box::new(erase_type(inner))),
        SemanticType::Struct(name) => IrType::Struct(name.clone()),
        SemanticType::Union(name) => IrType::Union(name.clone()),
        SemanticType::Function(sig) => IrType::Function {
            params: sig.params.iter().map(|p| erase_type(&p.ty)).collect(),
            ret: Box::new(erase_type(&sig.return_type)),
        },
    }
}

/// Lower an entire module: its struct/union declarations, then every
/// function. Each function gets its own [`Lowerer`]; the type tables and
/// checker tables are shared read-only across all of them.
pub fn lower_module(ast: &ModuleAst, checker: &CheckerOutput) -> Result<Module, MidError> {
    let mut module = Module::new(ast.name.clone());

    for (name, def) in ast.types.structs.iter() {
        module.types.push(TypeDecl::Struct(StructLayout {
            name: name.clone(),
            fields: def.fields.iter().map(|(n, t)| (n.clone(), erase_type(t))).collect(),
        }));
    }
    for (name, def) in ast.types.unions.iter() {
        module.types.push(TypeDecl::Union(UnionLayout {
            name: name.clone(),
            tag_ty: IrType::Int { width: def.tag_width, signed: false },
            variants: def
                .variants
                .iter()
                .map(|v| (v.name.clone(), v.fields.as_ref().map(|fs| fs.iter().map(|(_, t)| erase_type(t)).collect())))
                .collect(),
        }));
    }
    for mono in &checker.mono_structs {
        module.types.push(TypeDecl::Struct(StructLayout {
            name: mono.mangled_name.clone(),
            fields: mono.def.fields.iter().map(|(n, t)| (n.clone(), erase_type(t))).collect(),
        }));
    }

    for function_decl in &ast.functions {
        if !function_decl.generics.is_empty() {
            // A generic template has no C symbol of its own; every concrete
            // instantiation the checker resolved gets lowered separately,
            // named by the checker's own mangled name (spec.md §4.2.4).
            for mono in checker.mono_functions.iter().filter(|m| m.original_name == function_decl.name) {
                debug!("lowering monomorphized function `{}` as `{}`", function_decl.name, mono.mangled_name);
                let params: Vec<TypedFunctionParam> = function_decl
                    .params
                    .iter()
                    .zip(mono.signature.params.iter())
                    .map(|(template, resolved)| TypedFunctionParam {
                        name: template.name.clone(),
                        ty: resolved.ty.clone(),
                        is_move: resolved.is_move,
                    })
                    .collect();
                let lowered = lower_function(
                    function_decl,
                    mono.mangled_name.clone(),
                    &params,
                    &mono.signature.return_type,
                    &mono.signature.throws,
                    &ast.types,
                    &checker.tables,
                )?;
                module.functions.push(lowered);
            }
            continue;
        }

        debug!("lowering function `{}`", function_decl.name);
        let name = mangled_name_for(function_decl, &ast.functions);
        let lowered = lower_function(
            function_decl,
            name,
            &function_decl.params,
            &function_decl.return_type,
            &function_decl.throws,
            &ast.types,
            &checker.tables,
        )?;
        module.functions.push(lowered);
    }

    Ok(module)
}

/// The C symbol a function definition lowers to: methods get the struct
/// prefix, and a name shared by more than one non-generic declaration
/// (an overload set) gets its parameter types folded in so the printer
/// never has to emit two functions under the same symbol. Monomorphized
/// instantiations never reach this function — they're named directly from
/// the checker's own `MonoFunction::mangled_name`.
fn mangled_name_for(decl: &FunctionDecl, all_functions: &[FunctionDecl]) -> String {
    let base = match &decl.is_method_of {
        Some(struct_name) => mangle::method_mangled(struct_name, &decl.name),
        None => decl.name.clone(),
    };

    let overload_count = all_functions
        .iter()
        .filter(|other| {
            other.generics.is_empty() && other.is_method_of == decl.is_method_of && other.name == decl.name
        })
        .count();
    if overload_count > 1 {
        let param_types: Vec<IrType> = decl.params.iter().map(|p| erase_type(&p.ty)).collect();
        mangle::overload_mangled(&base, &param_types)
    } else {
        base
    }
}

/// Lowers one function definition: `decl` supplies what never varies
/// across instantiations (the body, method-ness), while `name`/`params`/
/// `return_type`/`throws` carry what does — the mangled symbol and the
/// resolved signature, either taken straight from `decl` for an ordinary
/// function or from a [`crate::typed_ast::MonoFunction`] for a generic one.
fn lower_function(
    decl: &FunctionDecl,
    name: String,
    params: &[TypedFunctionParam],
    return_type: &SemanticType,
    throws: &[String],
    types: &TypeTables,
    checker: &CheckerTables,
) -> Result<Function, MidError> {
    let mut ir_params: Vec<Param> = Vec::new();
    if let Some(struct_name) = &decl.is_method_of {
        ir_params.push(Param {
            name: "self".to_string(),
            ty: IrType::ptr_to(IrType::Struct(struct_name.clone())),
            is_move: false,
        });
    }
    for p in params {
        ir_params.push(Param { name: p.name.clone(), ty: erase_type(&p.ty), is_move: p.is_move });
    }
    let return_ty = erase_type(return_type);
    let (ir_params, return_ty) = throws::transform_signature(ir_params, return_ty, throws);

    let mut builder = FunctionBuilder::new(name, ir_params.clone(), return_ty.clone());
    if !throws.is_empty() {
        builder.throws = Some(throws.to_vec());
    }
    let entry = builder.fresh_block();

    let mut lowerer = Lowerer {
        module_name: String::new(),
        types,
        checker,
        builder,
        current_block: entry,
        scopes: scope::ScopeStack::default(),
        locals: HashMap::new(),
        loop_stack: Vec::new(),
        current_function_throws: if throws.is_empty() { None } else { Some(throws.to_vec()) },
        current_function_out_ptr: None,
        current_function_err_ptr: None,
    };

    lowerer.scopes.push();

    // Parameters occupy the first N value ids by convention, reserved
    // up front so that every id an alloca/instruction earns afterward
    // (starting with the allocas below) falls strictly after them.
    for _ in 0..ir_params.len() {
        lowerer.builder.fresh_value();
    }

    // Bind parameters by alloca'ing a slot for each and storing the
    // incoming value — this is what lets the Lowerer treat parameters and
    // `let`-bound locals uniformly, leaving promotion entirely to mem2reg.
    for (i, p) in ir_params.iter().enumerate() {
        let incoming = i as ValueId;
        if p.name == "__out" {
            lowerer.current_function_out_ptr = Some(incoming);
            continue;
        }
        if p.name == "__err" {
            lowerer.current_function_err_ptr = Some(incoming);
            continue;
        }
        let slot = lowerer.declare_local(&p.name, p.ty.clone());
        lowerer.current_block_mut().push(Instr::Store { ptr: slot, value: incoming });
    }

    lowerer.lower_stmt_block(&decl.body)?;

    if !lowerer.current_block_terminated() {
        let block = lowerer.builder.block_mut(lowerer.current_block);
        lowerer.scopes.emit_innermost(block);
        let term = if matches!(lowerer.builder.return_ty, IrType::Void) {
            Terminator::ReturnVoid
        } else if lowerer.builder.throws.is_some() {
            let zero = lowerer.const_int(0, IrType::Int { width: crate::semantic::IntWidth::W32, signed: true });
            Terminator::ReturnValue(zero)
        } else {
            Terminator::Unreachable
        };
        lowerer.current_block_mut().terminate(term);
    }
    lowerer.scopes.pop();

    lowerer.builder.seal()
}

impl Lowerer<'_> {
    pub(crate) fn current_block_mut(&mut self) -> &mut BlockBuilder {
        let id = self.current_block;
        self.builder.block_mut(id)
    }

    pub(crate) fn current_block_terminated(&mut self) -> bool {
        self.current_block_mut().is_terminated()
    }

    pub(crate) fn set_current_block(&mut self, id: BlockId) {
        self.current_block = id;
    }

    pub(crate) fn const_int(&mut self, value: i64, ty: IrType) -> ValueId {
        let dest = self.builder.fresh_value();
        self.current_block_mut().push(Instr::ConstInt { dest, value, ty });
        dest
    }

    pub(crate) fn const_bool(&mut self, value: bool) -> ValueId {
        let dest = self.builder.fresh_value();
        self.current_block_mut().push(Instr::ConstBool { dest, value });
        dest
    }

    /// Allocates a new local slot and registers it in the current scope.
    /// Used uniformly for `let` bindings and parameter storage; only
    /// locals whose type the checker flagged via `auto_destroy` register a
    /// destroy obligation.
    pub(crate) fn declare_local(&mut self, name: &str, ty: IrType) -> ValueId {
        let ptr = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Alloca { dest: ptr, ty: ty.clone() });
        self.locals.insert(name.to_string(), ptr);
        if let IrType::Struct(struct_name) = &ty {
            if self.checker.auto_destroy.contains(struct_name) {
                self.scopes.register_destroyable(ptr, struct_name.clone());
            }
        }
        ptr
    }

    /// Binds `name` directly to an existing pointer value without
    /// allocating new storage — used for catch-arm error bindings, which
    /// alias the call's own `__err` scratch slot rather than owning a copy.
    pub(crate) fn bind_local(&mut self, name: &str, ptr: ValueId) {
        self.locals.insert(name.to_string(), ptr);
    }

    pub(crate) fn local_ptr(&self, name: &str) -> Option<ValueId> {
        self.locals.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::{FloatWidth, FunctionSig, IntWidth, ParamType};
    use crate::typed_ast::{Block, CheckerOutput, MonoFunction};

    fn void_fn(name: &str, params: Vec<TypedFunctionParam>) -> FunctionDecl {
        FunctionDecl {
            name: name.to_string(),
            params,
            return_type: SemanticType::Void,
            throws: Vec::new(),
            generics: Vec::new(),
            is_extern: false,
            is_method_of: None,
            body: Block::default(),
        }
    }

    #[test]
    fn overloaded_functions_get_distinct_mangled_names() {
        let by_int = void_fn("add", vec![TypedFunctionParam {
            name: "a".to_string(),
            ty: SemanticType::Int { width: IntWidth::W32, signed: true },
            is_move: false,
        }]);
        let by_float = void_fn("add", vec![TypedFunctionParam {
            name: "a".to_string(),
            ty: SemanticType::Float(FloatWidth::W64),
            is_move: false,
        }]);
        let all = vec![by_int.clone(), by_float.clone()];

        let int_name = mangled_name_for(&by_int, &all);
        let float_name = mangled_name_for(&by_float, &all);
        assert_ne!(int_name, float_name, "two overloads of `add` must not collide on one C symbol");
        assert_ne!(int_name, "add");
    }

    #[test]
    fn a_lone_function_keeps_its_raw_name() {
        let decl = void_fn("helper", vec![]);
        let all = vec![decl.clone()];
        assert_eq!(mangled_name_for(&decl, &all), "helper");
    }

    #[test]
    fn generic_functions_lower_once_per_monomorphization() {
        let template = FunctionDecl {
            generics: vec!["T".to_string()],
            ..void_fn("identity", vec![TypedFunctionParam { name: "x".to_string(), ty: SemanticType::Bool, is_move: false }])
        };
        let ast = ModuleAst { name: "m".to_string(), functions: vec![template], ..ModuleAst::default() };

        let mut checker = CheckerOutput::default();
        for (mangled, ty) in [
            ("identity$i32", SemanticType::Int { width: IntWidth::W32, signed: true }),
            ("identity$f64", SemanticType::Float(FloatWidth::W64)),
        ] {
            checker.mono_functions.push(MonoFunction {
                mangled_name: mangled.to_string(),
                original_name: "identity".to_string(),
                signature: FunctionSig {
                    params: vec![ParamType { ty, is_move: false }],
                    return_type: SemanticType::Void,
                    throws: Vec::new(),
                    generics: Vec::new(),
                    is_extern: false,
                },
            });
        }

        let module = lower_module(&ast, &checker).unwrap();
        let names: Vec<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"identity$i32"));
        assert!(names.contains(&"identity$f64"));
        assert_eq!(names.len(), 2, "a generic template lowers to exactly its monomorphizations, never itself");
    }
}
