//! Expression lowering (spec.md §4.2). Every expression lowers to a
//! `ValueId`; assignment targets and field/index access additionally need
//! an *address* (`lower_lvalue`) rather than a value.

use crate::error::MidError;
use crate::instr::Instr;
use crate::semantic::SemanticType;
use crate::typed_ast::{CatchClause, Expr, Stmt, ValueBlock};
use crate::value::{IrType, ValueId, UNDEF_VALUE};

use super::Lowerer;

impl Lowerer<'_> {
    pub(crate) fn expr_ir_type(&self, expr: &Expr) -> IrType {
        self.checker
            .type_of(expr.id())
            .map(super::erase_type)
            .unwrap_or(IrType::Void)
    }

    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<ValueId, MidError> {
        match expr {
            Expr::IntLit { value, .. } => Ok(self.const_int(*value, self.expr_ir_type(expr))),
            Expr::FloatLit { value, .. } => {
                let dest = self.builder.fresh_value();
                let ty = self.expr_ir_type(expr);
                self.current_block_mut().push(Instr::ConstFloat { dest, value: *value, ty });
                Ok(dest)
            }
            Expr::BoolLit { value, .. } => Ok(self.const_bool(*value)),
            Expr::StringLit { value, .. } => {
                let dest = self.builder.fresh_value();
                self.current_block_mut().push(Instr::ConstString { dest, value: value.clone() });
                Ok(dest)
            }
            Expr::NullLit { .. } => {
                let dest = self.builder.fresh_value();
                let ty = self.expr_ir_type(expr);
                self.current_block_mut().push(Instr::ConstNullPtr { dest, ty });
                Ok(dest)
            }
            Expr::Ident { name, .. } => {
                let ptr = self
                    .local_ptr(name)
                    .ok_or_else(|| MidError::UndefinedName(name.clone()))?;
                let dest = self.builder.fresh_value();
                let ty = self.expr_ir_type(expr);
                self.current_block_mut().push(Instr::Load { dest, ty, ptr });
                Ok(dest)
            }
            Expr::Move { name, .. } => {
                let ptr = self
                    .local_ptr(name)
                    .ok_or_else(|| MidError::UndefinedName(name.clone()))?;
                let dest = self.builder.fresh_value();
                let ty = self.expr_ir_type(expr);
                self.current_block_mut().push(Instr::Load { dest, ty, ptr });
                self.scopes.mark_moved(ptr);
                Ok(dest)
            }
            Expr::StructLit { type_name, fields, .. } => self.lower_struct_lit(type_name, fields, expr),
            Expr::ArrayLit { elements, .. } => self.lower_array_lit(elements, expr),
            Expr::Member { base, field, .. } => {
                let ptr = self.lower_lvalue(expr)?;
                let dest = self.builder.fresh_value();
                let ty = self.expr_ir_type(expr);
                let _ = (base, field);
                self.current_block_mut().push(Instr::Load { dest, ty, ptr });
                Ok(dest)
            }
            Expr::Index { .. } => {
                let ptr = self.lower_lvalue(expr)?;
                let dest = self.builder.fresh_value();
                let ty = self.expr_ir_type(expr);
                self.current_block_mut().push(Instr::Load { dest, ty, ptr });
                Ok(dest)
            }
            Expr::Assign { target, value, .. } => {
                let value_id = self.lower_expr(value)?;
                let ptr = self.lower_lvalue(target)?;
                if let Expr::Ident { name, .. } = target.as_ref() {
                    if let Some(p) = self.local_ptr(name) {
                        self.scopes.unmark_moved(p);
                    }
                }
                self.current_block_mut().push(Instr::Store { ptr, value: value_id });
                Ok(value_id)
            }
            Expr::Binary { op, left, right, .. } => {
                let lhs = self.lower_expr(left)?;
                let rhs = self.lower_expr(right)?;
                let dest = self.builder.fresh_value();
                let result_ty = self.expr_ir_type(expr);
                self.current_block_mut().push(Instr::Binary { dest, op: *op, lhs, rhs, result_ty });
                Ok(dest)
            }
            Expr::Unary { op, operand, .. } => {
                let value = self.lower_expr(operand)?;
                let dest = self.builder.fresh_value();
                let result_ty = self.expr_ir_type(expr);
                self.current_block_mut().push(Instr::Unary { dest, op: *op, operand: value, result_ty });
                Ok(dest)
            }
            Expr::LogicalAnd { left, right, .. } => self.lower_short_circuit(left, right, false),
            Expr::LogicalOr { left, right, .. } => self.lower_short_circuit(left, right, true),
            Expr::If { cond, then_branch, else_branch, .. } => self.lower_if_expr(cond, then_branch, else_branch, expr),
            Expr::Cast { value, target, .. } => {
                let v = self.lower_expr(value)?;
                let dest = self.builder.fresh_value();
                let target_ty = super::erase_type(target);
                self.current_block_mut().push(Instr::Cast { dest, value: v, target_ty });
                Ok(dest)
            }
            Expr::SizeOf { target, .. } => {
                let dest = self.builder.fresh_value();
                let ty = super::erase_type(target);
                let result_ty = self.expr_ir_type(expr);
                self.current_block_mut().push(Instr::SizeOf { dest, ty, result_ty });
                Ok(dest)
            }
            Expr::Call { callee, args, .. } => {
                let arg_values = args.iter().map(|a| self.lower_expr(a)).collect::<Result<Vec<_>, _>>()?;
                let ret_ty = self.expr_ir_type(expr);
                let resolved = self.checker.resolved_callee.get(&expr.id()).cloned().unwrap_or_else(|| callee.clone());
                let dest = if matches!(ret_ty, IrType::Void) { None } else { Some(self.builder.fresh_value()) };
                self.current_block_mut().push(Instr::Call { dest, callee: resolved, args: arg_values, ret_ty });
                Ok(dest.unwrap_or(UNDEF_VALUE))
            }
            Expr::MethodCall { receiver, method, args, .. } => {
                let recv_ptr = self.lower_lvalue(receiver)?;
                let mut arg_values = vec![recv_ptr];
                for a in args {
                    arg_values.push(self.lower_expr(a)?);
                }
                let ret_ty = self.expr_ir_type(expr);
                let resolved = self
                    .checker
                    .resolved_method
                    .get(&expr.id())
                    .cloned()
                    .unwrap_or_else(|| method.clone());
                let dest = if matches!(ret_ty, IrType::Void) { None } else { Some(self.builder.fresh_value()) };
                self.current_block_mut().push(Instr::Call { dest, callee: resolved, args: arg_values, ret_ty });
                Ok(dest.unwrap_or(UNDEF_VALUE))
            }
            Expr::CallCatch { call, catch, .. } => self.lower_call_catch(call, catch, expr),
        }
    }

    /// Returns the address a `let`-bound local, field, or array element
    /// lives at, for use as a `Store` target or a `Load` source.
    pub(crate) fn lower_lvalue(&mut self, expr: &Expr) -> Result<ValueId, MidError> {
        match expr {
            Expr::Ident { name, .. } => self.local_ptr(name).ok_or_else(|| MidError::UndefinedName(name.clone())),
            Expr::Member { base, field, .. } => {
                let base_ptr = self.lower_lvalue(base)?;
                let base_ty = self.expr_ir_type(base);
                let struct_name = match &base_ty {
                    IrType::Struct(n) => n.clone(),
                    IrType::Ptr(inner) => match inner.as_ref() {
                        IrType::Struct(n) => n.clone(),
                        _ => return Err(MidError::CheckerContract(format!("`{field}` accessed on a non-struct base"))),
                    },
                    _ => return Err(MidError::CheckerContract(format!("`{field}` accessed on a non-struct base"))),
                };
                let field_ty = self.expr_ir_type(expr);
                let dest = self.builder.fresh_value();
                self.current_block_mut().push(Instr::FieldAddr {
                    dest,
                    base: base_ptr,
                    struct_name,
                    field: field.clone(),
                    field_ty,
                });
                Ok(dest)
            }
            Expr::Index { base, index, .. } => {
                let base_ptr = self.lower_lvalue(base)?;
                let index_value = self.lower_expr(index)?;
                let elem_ty = self.expr_ir_type(expr);
                let dest = self.builder.fresh_value();
                self.current_block_mut().push(Instr::ElemAddr { dest, base: base_ptr, index: index_value, elem_ty });
                Ok(dest)
            }
            other => Err(MidError::CheckerContract(format!("expression is not an lvalue: {other:?}"))),
        }
    }

    fn lower_struct_lit(&mut self, type_name: &str, fields: &[(String, Expr)], expr: &Expr) -> Result<ValueId, MidError> {
        let ty = self.expr_ir_type(expr);
        let slot = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Alloca { dest: slot, ty: ty.clone() });
        for (field_name, field_expr) in fields {
            let value = self.lower_expr(field_expr)?;
            let field_ty = self.expr_ir_type(field_expr);
            let addr = self.builder.fresh_value();
            self.current_block_mut().push(Instr::FieldAddr {
                dest: addr,
                base: slot,
                struct_name: type_name.to_string(),
                field: field_name.clone(),
                field_ty,
            });
            self.current_block_mut().push(Instr::Store { ptr: addr, value });
        }
        let dest = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Load { dest, ty, ptr: slot });
        Ok(dest)
    }

    fn lower_array_lit(&mut self, elements: &[Expr], expr: &Expr) -> Result<ValueId, MidError> {
        let ty = self.expr_ir_type(expr);
        let elem_ty = match &ty {
            IrType::Array(inner, _) => inner.as_ref().clone(),
            _ => IrType::Void,
        };
        let slot = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Alloca { dest: slot, ty: ty.clone() });
        for (i, elem) in elements.iter().enumerate() {
            let value = self.lower_expr(elem)?;
            let index = self.const_int(i as i64, IrType::Int { width: crate::semantic::IntWidth::W64, signed: true });
            let addr = self.builder.fresh_value();
            self.current_block_mut().push(Instr::ElemAddr { dest: addr, base: slot, index, elem_ty: elem_ty.clone() });
            self.current_block_mut().push(Instr::Store { ptr: addr, value });
        }
        let dest = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Load { dest, ty, ptr: slot });
        Ok(dest)
    }

    /// `a && b` / `a || b` short-circuit: `b` is only evaluated along one
    /// branch, so a plain `Binary` can't express it — it must become a
    /// branch with the result merged through a local slot.
    fn lower_short_circuit(&mut self, left: &Expr, right: &Expr, is_or: bool) -> Result<ValueId, MidError> {
        let result_slot = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Alloca { dest: result_slot, ty: IrType::Bool });

        let left_value = self.lower_expr(left)?;
        let rhs_block = self.builder.fresh_block();
        let join_block = self.builder.fresh_block();
        let short_circuit_block = self.builder.fresh_block();

        let (then_block, else_block) =
            if is_or { (short_circuit_block, rhs_block) } else { (rhs_block, short_circuit_block) };
        self.current_block_mut().push(Instr::Store { ptr: result_slot, value: left_value });
        self.current_block_mut().terminate(crate::instr::Terminator::Branch { cond: left_value, then_block, else_block });

        self.set_current_block(short_circuit_block);
        self.current_block_mut().terminate(crate::instr::Terminator::Jump(join_block));

        self.set_current_block(rhs_block);
        let right_value = self.lower_expr(right)?;
        self.current_block_mut().push(Instr::Store { ptr: result_slot, value: right_value });
        self.current_block_mut().terminate(crate::instr::Terminator::Jump(join_block));

        self.set_current_block(join_block);
        let dest = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Load { dest, ty: IrType::Bool, ptr: result_slot });
        Ok(dest)
    }

    /// `if` as an expression: both arms are lowered into their own block
    /// and store into a shared result slot, which mem2reg later turns into
    /// a phi. Each arm is a [`ValueBlock`] — a statement prefix plus a
    /// mandatory tail expression — and an early `return` in that prefix is
    /// rejected per SPEC_FULL.md §D rather than lowered.
    fn lower_if_expr(
        &mut self,
        cond: &Expr,
        then_branch: &ValueBlock,
        else_branch: &ValueBlock,
        expr: &Expr,
    ) -> Result<ValueId, MidError> {
        let ty = self.expr_ir_type(expr);
        let result_slot = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Alloca { dest: result_slot, ty: ty.clone() });

        let cond_value = self.lower_expr(cond)?;
        let then_id = self.builder.fresh_block();
        let else_id = self.builder.fresh_block();
        let join_id = self.builder.fresh_block();
        self.current_block_mut().terminate(crate::instr::Terminator::Branch { cond: cond_value, then_block: then_id, else_block: else_id });

        self.set_current_block(then_id);
        let then_value = self.lower_value_block(then_branch)?;
        self.current_block_mut().push(Instr::Store { ptr: result_slot, value: then_value });
        self.current_block_mut().terminate(crate::instr::Terminator::Jump(join_id));

        self.set_current_block(else_id);
        let else_value = self.lower_value_block(else_branch)?;
        self.current_block_mut().push(Instr::Store { ptr: result_slot, value: else_value });
        self.current_block_mut().terminate(crate::instr::Terminator::Jump(join_id));

        self.set_current_block(join_id);
        let dest = self.builder.fresh_value();
        self.current_block_mut().push(Instr::Load { dest, ty, ptr: result_slot });
        Ok(dest)
    }

    /// Lowers an if-expression arm: its leading statements (none of which
    /// may be an early `return`, per SPEC_FULL.md §D), then its tail
    /// expression for the arm's value.
    fn lower_value_block(&mut self, block: &ValueBlock) -> Result<ValueId, MidError> {
        self.scopes.push();
        for stmt in &block.stmts {
            if let Stmt::Return(_) = stmt {
                return Err(MidError::EarlyReturnInExpressionArm(
                    "a `return` inside an if-expression arm is not allowed; the arm must produce a value instead".to_string(),
                ));
            }
            self.lower_stmt(stmt)?;
        }
        let value = self.lower_expr(&block.tail)?;
        let block = self.builder.block_mut(self.current_block);
        self.scopes.emit_innermost(block);
        self.scopes.pop();
        Ok(value)
    }

    fn lower_call_catch(&mut self, call: &Expr, catch: &CatchClause, _expr: &Expr) -> Result<ValueId, MidError> {
        let Expr::Call { callee, args, .. } = call else {
            return Err(MidError::CheckerContract("`catch` may only follow a call expression".to_string()));
        };
        let arg_values = args.iter().map(|a| self.lower_expr(a)).collect::<Result<Vec<_>, _>>()?;
        let success_ty = self.expr_ir_type(call);
        let resolved = self.checker.resolved_callee.get(&call.id()).cloned().unwrap_or_else(|| callee.clone());

        let callee_throws = self
            .checker
            .expr_types
            .get(&call.id())
            .and_then(|t| match t {
                SemanticType::Function(sig) => Some(sig.throws.clone()),
                _ => None,
            })
            .unwrap_or_default();

        let result = self.lower_throwing_call(&resolved, arg_values, success_ty, &callee_throws, catch)?;
        Ok(result.unwrap_or(UNDEF_VALUE))
    }
}
