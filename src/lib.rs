//! Middle end for the Anvil systems language.
//!
//! Takes a typed syntax tree and the type checker's auxiliary tables
//! (spec.md §6) and produces portable C: lower to a block-based IR
//! ([`lower`]/[`value`]/[`instr`]/[`function`]/[`module`]), promote simple
//! stack slots to SSA values ([`cfg`]/[`mem2reg`]), destruct SSA back to
//! parallel copies the printer can emit without phis ([`ssa_destruct`]),
//! order and merge multiple modules ([`driver`]), and print the result as
//! C ([`cprint`]).
//!
//! Lexing, parsing, name/type resolution, generic resolution, and
//! classical scalar optimizations (constant folding, CSE, dead-code
//! elimination, strength reduction) are all out of scope: this crate
//! receives an already-typed tree and performs no inference of its own.

pub mod cfg;
pub mod cprint;
pub mod driver;
pub mod error;
pub mod function;
pub mod instr;
pub mod lower;
pub mod mem2reg;
pub mod module;
pub mod semantic;
pub mod ssa_destruct;
pub mod typed_ast;
pub mod value;

pub use error::{MidError, MidResult};
pub use module::Module;
pub use value::{IrType, ValueId};

/// Run a module's functions through the full pipeline this crate owns:
/// lower, promote, destruct. The printer is a separate final step
/// ([`cprint::print_module`]) since some callers want the IR itself (for
/// tests, or to drive their own emission) without always printing it.
pub fn compile_module(ast: &typed_ast::ModuleAst, checker: &typed_ast::CheckerOutput) -> MidResult<Module> {
    let mut module = lower::lower_module(ast, checker)?;
    for function in std::mem::take(&mut module.functions) {
        function.validate()?;
        let cfg_info = cfg::analyze(&function)?;
        let (promoted, _stats) = mem2reg::promote(function, &cfg_info)?;
        let (destructed, _stats) = ssa_destruct::destruct(promoted);
        module.functions.push(destructed);
    }
    Ok(module)
}

/// Installs `env_logger` against `RUST_LOG` so the trace-level pass
/// statistics `mem2reg`/`ssa_destruct` emit are visible when a caller asks
/// for them — a no-op if a logger is already installed, since tests may
/// call this more than once.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{FunctionBuilder, Param};
    use crate::instr::Instr;
    use crate::instr::Terminator;
    use crate::semantic::IntWidth;
    use crate::typed_ast::{CheckerOutput, FunctionDecl, ModuleAst};

    #[test]
    fn compile_module_runs_the_full_pipeline_on_a_trivial_function() {
        let decl = FunctionDecl {
            name: "answer".to_string(),
            params: vec![],
            return_type: crate::semantic::SemanticType::Int { width: IntWidth::W32, signed: true },
            throws: vec![],
            generics: vec![],
            is_extern: false,
            is_method_of: None,
            body: crate::typed_ast::Block {
                stmts: vec![crate::typed_ast::Stmt::Return(Some(crate::typed_ast::Expr::IntLit { id: 0, value: 42 }))],
            },
        };
        let ast = ModuleAst { name: "m".to_string(), functions: vec![decl], types: Default::default(), imports: vec![] };
        let mut checker = CheckerOutput::default();
        checker.tables.expr_types.insert(0, crate::semantic::SemanticType::Int { width: IntWidth::W32, signed: true });

        let module = compile_module(&ast, &checker).unwrap();
        assert_eq!(module.functions.len(), 1);
        assert!(module.functions[0].blocks.iter().all(|b| b.phis.is_empty()));
    }

    #[test]
    fn init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }

    #[test]
    fn fresh_function_builder_seals_cleanly_through_the_pipeline() {
        let mut b = FunctionBuilder::new("noop", vec![Param { name: "x".into(), ty: IrType::Bool, is_move: false }], IrType::Void);
        let entry = b.fresh_block();
        let dest = b.fresh_value();
        b.block_mut(entry).push(Instr::ConstBool { dest, value: true });
        b.block_mut(entry).terminate(Terminator::ReturnVoid);
        let f = b.seal().unwrap();
        let cfg_info = cfg::analyze(&f).unwrap();
        let (promoted, _) = mem2reg::promote(f, &cfg_info).unwrap();
        let (destructed, _) = ssa_destruct::destruct(promoted);
        assert!(destructed.validate().is_ok());
    }
}
