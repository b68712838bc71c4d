//! Statement and control-flow lowering (spec.md §4.2): `if`, `while`,
//! `for`, `switch`, `break`/`continue`, and the scope lifecycle each of
//! them must thread destroys through on every exit path.

use crate::error::MidError;
use crate::instr::{Instr, Terminator};
use crate::typed_ast::{Block, Stmt};
use crate::value::IrType;

use super::{LoopContext, Lowerer};

impl Lowerer<'_> {
    pub(crate) fn lower_stmt_block(&mut self, block: &Block) -> Result<(), MidError> {
        self.scopes.push();
        for stmt in &block.stmts {
            if self.current_block_terminated() {
                break;
            }
            self.lower_stmt(stmt)?;
        }
        if !self.current_block_terminated() {
            let block = self.builder.block_mut(self.current_block);
            self.scopes.emit_innermost(block);
        }
        self.scopes.pop();
        Ok(())
    }

    pub(crate) fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), MidError> {
        match stmt {
            Stmt::Let { name, value, .. } => {
                let value_id = self.lower_expr(value)?;
                let ty = self.expr_ir_type(value);
                let slot = self.declare_local(name, ty);
                self.current_block_mut().push(Instr::Store { ptr: slot, value: value_id });
                Ok(())
            }
            Stmt::Expr(e) => {
                self.lower_expr(e)?;
                Ok(())
            }
            Stmt::Return(value) => {
                let value_id = match value {
                    Some(e) => Some(self.lower_expr(e)?),
                    None => None,
                };
                let block = self.builder.block_mut(self.current_block);
                self.scopes.emit_all_enclosing(block);
                let term = match (value_id, self.builder.throws.is_some()) {
                    (Some(v), true) => {
                        if let Some(out_ptr) = self.current_function_out_ptr {
                            self.current_block_mut().push(Instr::Store { ptr: out_ptr, value: v });
                        }
                        let zero = self.const_int(0, IrType::Int { width: crate::semantic::IntWidth::W32, signed: true });
                        Terminator::ReturnValue(zero)
                    }
                    (Some(v), false) => Terminator::ReturnValue(v),
                    (None, _) => Terminator::ReturnVoid,
                };
                self.current_block_mut().terminate(term);
                Ok(())
            }
            Stmt::Throw { error_type, fields } => {
                let Some(throws) = self.current_function_throws.clone() else {
                    return Err(MidError::CheckerContract(format!(
                        "`throw {error_type}` used inside a function with no throws clause"
                    )));
                };
                let tag = super::throws::tag_for_error(&throws, error_type);
                if tag == 0 {
                    return Err(MidError::CheckerContract(format!(
                        "thrown type `{error_type}` is not in this function's throws clause"
                    )));
                }
                if let Some(err_ptr) = self.current_function_err_ptr {
                    for (_, field_value) in fields {
                        let v = self.lower_expr(field_value)?;
                        self.current_block_mut().push(Instr::Store { ptr: err_ptr, value: v });
                    }
                }
                let block = self.builder.block_mut(self.current_block);
                self.scopes.emit_all_enclosing(block);
                let tag_value = self.const_int(tag, IrType::Int { width: crate::semantic::IntWidth::W32, signed: true });
                self.current_block_mut().terminate(Terminator::ReturnValue(tag_value));
                Ok(())
            }
            Stmt::If { cond, then_block, else_block } => self.lower_if_stmt(cond, then_block, else_block.as_ref()),
            Stmt::While { cond, body } => self.lower_while(cond, body),
            Stmt::For { var, start, end, body } => self.lower_for(var, start, end, body),
            Stmt::Switch { scrutinee, cases, default } => self.lower_switch(scrutinee, cases, default),
            Stmt::Break => self.lower_break(),
            Stmt::Continue => self.lower_continue(),
            Stmt::Block(b) => self.lower_stmt_block(b),
        }
    }

    fn lower_if_stmt(&mut self, cond: &crate::typed_ast::Expr, then_block: &Block, else_block: Option<&Block>) -> Result<(), MidError> {
        let cond_value = self.lower_expr(cond)?;
        let then_id = self.builder.fresh_block();
        let else_id = self.builder.fresh_block();
        let join_id = self.builder.fresh_block();

        self.current_block_mut().terminate(Terminator::Branch { cond: cond_value, then_block: then_id, else_block: else_id });

        self.set_current_block(then_id);
        self.lower_stmt_block(then_block)?;
        if !self.current_block_terminated() {
            self.current_block_mut().terminate(Terminator::Jump(join_id));
        }

        self.set_current_block(else_id);
        if let Some(else_b) = else_block {
            self.lower_stmt_block(else_b)?;
        }
        if !self.current_block_terminated() {
            self.current_block_mut().terminate(Terminator::Jump(join_id));
        }

        self.set_current_block(join_id);
        Ok(())
    }

    fn lower_while(&mut self, cond: &crate::typed_ast::Expr, body: &Block) -> Result<(), MidError> {
        let header_id = self.builder.fresh_block();
        let body_id = self.builder.fresh_block();
        let exit_id = self.builder.fresh_block();

        self.current_block_mut().terminate(Terminator::Jump(header_id));

        self.set_current_block(header_id);
        let cond_value = self.lower_expr(cond)?;
        self.current_block_mut().terminate(Terminator::Branch { cond: cond_value, then_block: body_id, else_block: exit_id });

        self.loop_stack.push(LoopContext { break_target: exit_id, continue_target: header_id, scope_depth: self.scopes.depth() });
        self.set_current_block(body_id);
        self.lower_stmt_block(body)?;
        if !self.current_block_terminated() {
            self.current_block_mut().terminate(Terminator::Jump(header_id));
        }
        self.loop_stack.pop();

        self.set_current_block(exit_id);
        Ok(())
    }

    fn lower_for(&mut self, var: &str, start: &crate::typed_ast::Expr, end: &crate::typed_ast::Expr, body: &Block) -> Result<(), MidError> {
        let int_ty = IrType::Int { width: crate::semantic::IntWidth::W64, signed: true };
        let start_value = self.lower_expr(start)?;
        let end_value = self.lower_expr(end)?;

        self.scopes.push();
        let counter_slot = self.declare_local(var, int_ty.clone());
        self.current_block_mut().push(Instr::Store { ptr: counter_slot, value: start_value });

        let header_id = self.builder.fresh_block();
        let body_id = self.builder.fresh_block();
        let step_id = self.builder.fresh_block();
        let exit_id = self.builder.fresh_block();

        self.current_block_mut().terminate(Terminator::Jump(header_id));

        self.set_current_block(header_id);
        let counter_value = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Load { dest: counter_value, ty: int_ty.clone(), ptr: counter_slot });
        let cond_value = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Binary {
            dest: cond_value,
            op: crate::typed_ast::BinOp::Lt,
            lhs: counter_value,
            rhs: end_value,
            result_ty: IrType::Bool,
        });
        self.current_block_mut().terminate(Terminator::Branch { cond: cond_value, then_block: body_id, else_block: exit_id });

        self.loop_stack.push(LoopContext { break_target: exit_id, continue_target: step_id, scope_depth: self.scopes.depth() });
        self.set_current_block(body_id);
        self.lower_stmt_block(body)?;
        if !self.current_block_terminated() {
            self.current_block_mut().terminate(Terminator::Jump(step_id));
        }
        self.loop_stack.pop();

        self.set_current_block(step_id);
        let cur = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Load { dest: cur, ty: int_ty.clone(), ptr: counter_slot });
        let one = self.const_int(1, int_ty.clone());
        let next = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Binary { dest: next, op: crate::typed_ast::BinOp::Add, lhs: cur, rhs: one, result_ty: int_ty });
        self.current_block_mut().push(Instr::Store { ptr: counter_slot, value: next });
        self.current_block_mut().terminate(Terminator::Jump(header_id));

        self.set_current_block(exit_id);
        self.scopes.pop();
        Ok(())
    }

    fn lower_switch(
        &mut self,
        scrutinee: &crate::typed_ast::Expr,
        cases: &[(i64, Block)],
        default: &Block,
    ) -> Result<(), MidError> {
        let scrutinee_value = self.lower_expr(scrutinee)?;
        let join_id = self.builder.fresh_block();

        let mut case_blocks = Vec::new();
        for (value, body) in cases {
            let id = self.builder.fresh_block();
            case_blocks.push((*value, id, body));
        }
        let default_id = self.builder.fresh_block();

        self.current_block_mut().terminate(Terminator::Switch {
            scrutinee: scrutinee_value,
            cases: case_blocks.iter().map(|(v, id, _)| (*v, *id)).collect(),
            default: default_id,
        });

        for (_, id, body) in &case_blocks {
            self.set_current_block(*id);
            self.lower_stmt_block(body)?;
            if !self.current_block_terminated() {
                self.current_block_mut().terminate(Terminator::Jump(join_id));
            }
        }

        self.set_current_block(default_id);
        self.lower_stmt_block(default)?;
        if !self.current_block_terminated() {
            self.current_block_mut().terminate(Terminator::Jump(join_id));
        }

        self.set_current_block(join_id);
        Ok(())
    }

    fn lower_break(&mut self) -> Result<(), MidError> {
        let ctx = self
            .loop_stack
            .last()
            .ok_or_else(|| MidError::CheckerContract("`break` used outside a loop".to_string()))?;
        let (target, scope_depth) = (ctx.break_target, ctx.scope_depth);
        let block = self.builder.block_mut(self.current_block);
        self.scopes.emit_until(scope_depth, block);
        self.current_block_mut().terminate(Terminator::Jump(target));
        Ok(())
    }

    fn lower_continue(&mut self) -> Result<(), MidError> {
        let ctx = self
            .loop_stack
            .last()
            .ok_or_else(|| MidError::CheckerContract("`continue` used outside a loop".to_string()))?;
        let (target, scope_depth) = (ctx.continue_target, ctx.scope_depth);
        let block = self.builder.block_mut(self.current_block);
        self.scopes.emit_until(scope_depth, block);
        self.current_block_mut().terminate(Terminator::Jump(target));
        Ok(())
    }
}
