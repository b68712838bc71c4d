//! The throws/catch error-handling protocol (spec.md §5): a throwing
//! function's signature gains `__out`/`__err` pointer parameters and its
//! return type becomes an `i32` tag (`0` = success, `i` = the `i`-th
//! declared throws type, 1-indexed in declaration order); a caller
//! dispatches on the tag with `catch panic` (abort on any non-zero tag),
//! `catch throw` (propagate by forwarding into the caller's own throws
//! protocol), or `catch { ... }` (an exhaustive or defaulted tag switch).

use crate::error::MidError;
use crate::function::{FunctionBuilder, Param};
use crate::instr::{Instr, Terminator};
use crate::semantic::IntWidth;
use crate::typed_ast::{Block, CatchArm, CatchClause, CatchDefault};
use crate::value::{BlockId, IrType, ValueId};

use super::Lowerer;

pub const SUCCESS_TAG: i64 = 0;

/// `0` means success; a throws type's tag is its 1-based position in the
/// function's declared (ordered) throws list.
pub fn tag_for_error(throws: &[String], error_type: &str) -> i64 {
    throws
        .iter()
        .position(|t| t == error_type)
        .map(|i| (i as i64) + 1)
        .unwrap_or(0)
}

/// Appends `__out`/`__err` parameters and rewrites the return type to the
/// `i32` tag, when `throws` is non-empty. Functions with no `throws`
/// clause are returned unchanged.
pub fn transform_signature(params: Vec<Param>, return_ty: IrType, throws: &[String]) -> (Vec<Param>, IrType) {
    if throws.is_empty() {
        return (params, return_ty);
    }
    let mut new_params = params;
    new_params.push(Param { name: "__out".to_string(), ty: IrType::ptr_to(return_ty), is_move: false });
    new_params.push(Param { name: "__err".to_string(), ty: IrType::ptr_to(IrType::Void), is_move: false });
    (new_params, IrType::Int { width: IntWidth::W32, signed: true })
}

impl Lowerer<'_> {
    /// Lowers a call through the throws protocol: emits the `ThrowsCall`
    /// against freshly allocated out/err scratch storage, then dispatches
    /// `catch` on the resulting tag. Returns the success value (void calls
    /// yield `None`).
    pub(crate) fn lower_throwing_call(
        &mut self,
        callee: &str,
        args: Vec<ValueId>,
        success_ty: IrType,
        callee_throws: &[String],
        catch: &CatchClause,
    ) -> Result<Option<ValueId>, MidError> {
        let out_ptr = self.builder.fresh_value();
        let err_ptr = self.builder.fresh_value();
        let tag = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Alloca { dest: out_ptr, ty: success_ty.clone() });
        self.current_block_mut().push(Instr::Alloca { dest: err_ptr, ty: IrType::Void });
        self.current_block_mut()
            .push(Instr::ThrowsCall { dest: tag, callee: callee.to_string(), args, out_ptr, err_ptr });

        let success_value = if matches!(success_ty, IrType::Void) {
            None
        } else {
            let v = self.builder.fresh_value();
            Some((v, success_ty))
        };

        self.lower_catch_dispatch(tag, out_ptr, err_ptr, callee_throws, catch, success_value.clone())?;

        Ok(success_value.map(|(v, _)| v))
    }

    /// Builds the control flow for a `catch` clause given the already
    /// emitted tag value. On the success path (`tag == 0`), if a success
    /// value is expected it is loaded from `out_ptr` into the given
    /// `ValueId`.
    fn lower_catch_dispatch(
        &mut self,
        tag: ValueId,
        out_ptr: ValueId,
        err_ptr: ValueId,
        callee_throws: &[String],
        catch: &CatchClause,
        success_value: Option<(ValueId, IrType)>,
    ) -> Result<(), MidError> {
        match catch {
            CatchClause::Panic => self.lower_catch_panic(tag, out_ptr, success_value),
            CatchClause::Throw => self.lower_catch_rethrow(tag, err_ptr, callee_throws, success_value),
            CatchClause::Handlers { arms, default } => {
                self.lower_catch_handlers(tag, out_ptr, err_ptr, callee_throws, arms, default, success_value)
            }
        }
    }

    fn load_success(&mut self, out_ptr: ValueId, success_value: &Option<(ValueId, IrType)>) {
        if let Some((dest, ty)) = success_value {
            self.current_block_mut().push(Instr::Load { dest: *dest, ty: ty.clone(), ptr: out_ptr });
        }
    }

    fn lower_catch_panic(
        &mut self,
        tag: ValueId,
        out_ptr: ValueId,
        success_value: Option<(ValueId, IrType)>,
    ) -> Result<(), MidError> {
        let zero = self.const_int(0, IrType::Int { width: IntWidth::W32, signed: true });
        let is_err = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Binary {
            dest: is_err,
            op: crate::typed_ast::BinOp::Ne,
            lhs: tag,
            rhs: zero,
            result_ty: IrType::Bool,
        });
        let abort_block = self.builder.fresh_block();
        let cont_block = self.builder.fresh_block();
        self.current_block_mut()
            .terminate(Terminator::Branch { cond: is_err, then_block: abort_block, else_block: cont_block });

        self.set_current_block(abort_block);
        self.current_block_mut().push(Instr::ExternCall {
            dest: None,
            callee: "anvil_panic".to_string(),
            args: vec![tag],
            ret_ty: IrType::Void,
        });
        self.current_block_mut().terminate(Terminator::Unreachable);

        self.set_current_block(cont_block);
        self.load_success(out_ptr, &success_value);
        Ok(())
    }

    fn lower_catch_rethrow(
        &mut self,
        tag: ValueId,
        err_ptr: ValueId,
        callee_throws: &[String],
        success_value: Option<(ValueId, IrType)>,
    ) -> Result<(), MidError> {
        let Some(caller_throws) = self.current_function_throws.clone() else {
            return Err(MidError::CheckerContract(
                "`catch throw` used inside a function with no throws clause of its own".to_string(),
            ));
        };

        let zero = self.const_int(0, IrType::Int { width: IntWidth::W32, signed: true });
        let is_err = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Binary {
            dest: is_err,
            op: crate::typed_ast::BinOp::Ne,
            lhs: tag,
            rhs: zero,
            result_ty: IrType::Bool,
        });
        let propagate_block = self.builder.fresh_block();
        let cont_block = self.builder.fresh_block();
        self.current_block_mut()
            .terminate(Terminator::Branch { cond: is_err, then_block: propagate_block, else_block: cont_block });

        self.set_current_block(propagate_block);
        let block = self.builder.block_mut(self.current_block);
        self.scopes.emit_all_enclosing(block);
        let caller_err = self.current_function_err_ptr.expect("throwing function has an __err param");
        self.current_block_mut().push(Instr::Store { ptr: caller_err, value: err_ptr });

        if callee_throws == caller_throws.as_slice() {
            // Same throws list, same order: the callee's tag already means
            // the same thing to the caller, nothing to remap.
            self.current_block_mut().terminate(Terminator::ReturnValue(tag));
        } else {
            // Different throws lists: map each of the callee's tags to the
            // caller's tag for the same error type by name.
            let mut cases: Vec<(i64, BlockId)> = Vec::new();
            let mut remap_blocks: Vec<(BlockId, i64)> = Vec::new();
            for (i, error_type) in callee_throws.iter().enumerate() {
                let callee_tag = (i as i64) + 1;
                let caller_tag = tag_for_error(&caller_throws, error_type);
                let block_id = self.builder.fresh_block();
                cases.push((callee_tag, block_id));
                remap_blocks.push((block_id, caller_tag));
            }
            let unmapped_block = self.builder.fresh_block();
            self.current_block_mut().terminate(Terminator::Switch { scrutinee: tag, cases, default: unmapped_block });

            for (block_id, caller_tag) in remap_blocks {
                self.set_current_block(block_id);
                let mapped = self.const_int(caller_tag, IrType::Int { width: IntWidth::W32, signed: true });
                self.current_block_mut().terminate(Terminator::ReturnValue(mapped));
            }

            // A callee tag outside `callee_throws` would mean the checker
            // let an inconsistent call through; forward the raw tag rather
            // than fabricate a mapping for it.
            self.set_current_block(unmapped_block);
            self.current_block_mut().terminate(Terminator::ReturnValue(tag));
        }

        self.set_current_block(cont_block);
        Ok(())
    }

    fn lower_catch_handlers(
        &mut self,
        tag: ValueId,
        out_ptr: ValueId,
        err_ptr: ValueId,
        callee_throws: &[String],
        arms: &[CatchArm],
        default: &Option<CatchDefault>,
        success_value: Option<(ValueId, IrType)>,
    ) -> Result<(), MidError> {
        let join_block = self.builder.fresh_block();
        let mut cases: Vec<(i64, BlockId)> = Vec::new();
        let mut handler_blocks = Vec::new();

        let success_block = self.builder.fresh_block();
        cases.push((SUCCESS_TAG, success_block));

        for arm in arms {
            let case_tag = tag_for_error(callee_throws, &arm.error_type);
            let block_id = self.builder.fresh_block();
            cases.push((case_tag, block_id));
            handler_blocks.push((block_id, &arm.body, arm.binding.as_deref()));
        }

        let default_block = self.builder.fresh_block();
        self.current_block_mut().terminate(Terminator::Switch { scrutinee: tag, cases, default: default_block });

        self.set_current_block(success_block);
        self.load_success(out_ptr, &success_value);
        self.current_block_mut().terminate(Terminator::Jump(join_block));

        for (block_id, body, binding) in handler_blocks {
            self.set_current_block(block_id);
            if let Some(name) = binding {
                self.bind_local(name, err_ptr);
            }
            self.lower_block(body)?;
            if !self.current_block_terminated() {
                self.current_block_mut().terminate(Terminator::Jump(join_block));
            }
        }

        self.set_current_block(default_block);
        match default {
            Some(CatchDefault { binding, body }) => {
                if let Some(name) = binding {
                    self.bind_local(name, err_ptr);
                }
                self.lower_block(body)?;
                if !self.current_block_terminated() {
                    self.current_block_mut().terminate(Terminator::Jump(join_block));
                }
            }
            None => {
                // With no default, every declared throws type must have its
                // own arm; success has its own dedicated case above, so the
                // switch's default is unreachable once this is exhaustive.
                let covered: std::collections::HashSet<&str> = arms.iter().map(|a| a.error_type.as_str()).collect();
                if let Some(missing) = callee_throws.iter().find(|t| !covered.contains(t.as_str())) {
                    return Err(MidError::NonExhaustiveCatch(missing.clone()));
                }
                self.current_block_mut().terminate(Terminator::Unreachable);
            }
        }

        self.set_current_block(join_block);
        Ok(())
    }

    fn lower_block(&mut self, _block: &Block) -> Result<(), MidError> {
        self.lower_stmt_block(_block)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::function::FunctionBuilder;
    use crate::semantic::TypeTables;
    use crate::typed_ast::CheckerTables;

    fn int_ty() -> IrType {
        IrType::Int { width: IntWidth::W32, signed: true }
    }

    #[test]
    fn handlers_with_a_default_arm_still_load_success_on_tag_zero() {
        let types = TypeTables::default();
        let checker = CheckerTables::default();
        let mut builder = FunctionBuilder::new("f", vec![], int_ty());
        let entry = builder.fresh_block();
        let mut lowerer = Lowerer {
            module_name: String::new(),
            types: &types,
            checker: &checker,
            builder,
            current_block: entry,
            scopes: crate::lower::scope::ScopeStack::default(),
            locals: HashMap::new(),
            loop_stack: Vec::new(),
            current_function_throws: None,
            current_function_out_ptr: None,
            current_function_err_ptr: None,
        };
        lowerer.scopes.push();

        let out_ptr = lowerer.builder.fresh_value();
        let err_ptr = lowerer.builder.fresh_value();
        let tag = lowerer.builder.fresh_value();
        lowerer.current_block_mut().push(Instr::Alloca { dest: out_ptr, ty: int_ty() });
        lowerer.current_block_mut().push(Instr::Alloca { dest: err_ptr, ty: IrType::Void });

        let success_value = lowerer.builder.fresh_value();
        let default = Some(CatchDefault { binding: None, body: Block::default() });
        lowerer
            .lower_catch_handlers(
                tag,
                out_ptr,
                err_ptr,
                &["Overflow".to_string()],
                &[],
                &default,
                Some((success_value, int_ty())),
            )
            .unwrap();
        lowerer.current_block_mut().terminate(Terminator::ReturnValue(success_value));

        let f = lowerer.builder.seal().unwrap();
        let loads_from_out =
            f.blocks.iter().any(|b| b.instrs.iter().any(|i| matches!(i, Instr::Load { ptr, .. } if *ptr == out_ptr)));
        assert!(loads_from_out, "tag-0 success case must still load from out_ptr even when a default arm exists");
    }

    #[test]
    fn rethrow_passes_the_tag_through_unchanged_for_identical_throws_lists() {
        let types = TypeTables::default();
        let checker = CheckerTables::default();
        let params =
            vec![Param { name: "__out".to_string(), ty: IrType::ptr_to(int_ty()), is_move: false }, Param {
                name: "__err".to_string(),
                ty: IrType::ptr_to(IrType::Void),
                is_move: false,
            }];
        let mut builder = FunctionBuilder::new("caller", params, int_ty());
        let entry = builder.fresh_block();
        let caller_out = builder.fresh_value();
        let caller_err = builder.fresh_value();
        let mut lowerer = Lowerer {
            module_name: String::new(),
            types: &types,
            checker: &checker,
            builder,
            current_block: entry,
            scopes: crate::lower::scope::ScopeStack::default(),
            locals: HashMap::new(),
            loop_stack: Vec::new(),
            current_function_throws: Some(vec!["Overflow".to_string()]),
            current_function_out_ptr: Some(caller_out),
            current_function_err_ptr: Some(caller_err),
        };
        lowerer.scopes.push();

        let tag = lowerer.builder.fresh_value();
        let err_ptr = lowerer.builder.fresh_value();
        lowerer.current_block_mut().push(Instr::Alloca { dest: err_ptr, ty: IrType::Void });
        lowerer.lower_catch_rethrow(tag, err_ptr, &["Overflow".to_string()], None).unwrap();
        lowerer.current_block_mut().terminate(Terminator::ReturnValue(tag));

        let f = lowerer.builder.seal().unwrap();
        let propagate_returns_tag_directly = f.blocks.iter().any(|b| matches!(b.terminator, Terminator::ReturnValue(v) if v == tag));
        assert!(propagate_returns_tag_directly, "identical throws lists must forward the tag unchanged");
        assert!(!f.blocks.iter().any(|b| matches!(b.terminator, Terminator::Switch { .. })));
    }

    #[test]
    fn rethrow_remaps_tags_by_error_name_when_throws_lists_differ() {
        let types = TypeTables::default();
        let checker = CheckerTables::default();
        let params =
            vec![Param { name: "__out".to_string(), ty: IrType::ptr_to(int_ty()), is_move: false }, Param {
                name: "__err".to_string(),
                ty: IrType::ptr_to(IrType::Void),
                is_move: false,
            }];
        let mut builder = FunctionBuilder::new("caller", params, int_ty());
        let entry = builder.fresh_block();
        let caller_out = builder.fresh_value();
        let caller_err = builder.fresh_value();
        let mut lowerer = Lowerer {
            module_name: String::new(),
            types: &types,
            checker: &checker,
            builder,
            current_block: entry,
            scopes: crate::lower::scope::ScopeStack::default(),
            locals: HashMap::new(),
            loop_stack: Vec::new(),
            // The caller declares the same two error types the callee does,
            // but in the opposite order — so tag 1 from the callee (its
            // first throws type) must become tag 2 for the caller.
            current_function_throws: Some(vec!["Oom".to_string(), "Overflow".to_string()]),
            current_function_out_ptr: Some(caller_out),
            current_function_err_ptr: Some(caller_err),
        };
        lowerer.scopes.push();

        let tag = lowerer.builder.fresh_value();
        let err_ptr = lowerer.builder.fresh_value();
        lowerer.current_block_mut().push(Instr::Alloca { dest: err_ptr, ty: IrType::Void });
        lowerer
            .lower_catch_rethrow(tag, err_ptr, &["Overflow".to_string(), "Oom".to_string()], None)
            .unwrap();
        lowerer.current_block_mut().terminate(Terminator::ReturnVoid);

        let f = lowerer.builder.seal().unwrap();
        let switch = f.blocks.iter().find_map(|b| match &b.terminator {
            Terminator::Switch { scrutinee, cases, .. } if *scrutinee == tag => Some(cases.clone()),
            _ => None,
        });
        let cases = switch.expect("differing throws lists must remap via a switch on the callee's tag");
        let overflow_case = cases.iter().find(|(callee_tag, _)| *callee_tag == 1).unwrap();
        let remap_block = f.block(overflow_case.1).unwrap();
        assert!(matches!(remap_block.terminator, Terminator::ReturnValue(v) if v != tag), "Overflow must remap to the caller's own tag for Overflow, not pass the callee's tag through");
    }
}
