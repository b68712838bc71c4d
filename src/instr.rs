//! Block-local instructions, terminators, and phi nodes (spec.md §3.3/§3.4),
//! plus the operand-rewrite and definition-classification helpers every
//! later pass (mem2reg, SSA destruction) is built on top of (spec.md §4.1).

use serde::{Deserialize, Serialize};

use crate::typed_ast::{BinOp, UnOp};
use crate::value::{BlockId, IrType, ValueId};

/// One instruction. `dest` fields are *definitions*, never rewritten by
/// [`rewrite_operands`]; every other `ValueId` field is an *operand*.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Instr {
    Alloca { dest: ValueId, ty: IrType },
    Load { dest: ValueId, ty: IrType, ptr: ValueId },
    Store { ptr: ValueId, value: ValueId },
    FieldAddr { dest: ValueId, base: ValueId, struct_name: String, field: String, field_ty: IrType },
    ElemAddr { dest: ValueId, base: ValueId, index: ValueId, elem_ty: IrType },

    Binary { dest: ValueId, op: BinOp, lhs: ValueId, rhs: ValueId, result_ty: IrType },
    Unary { dest: ValueId, op: UnOp, operand: ValueId, result_ty: IrType },

    ConstInt { dest: ValueId, value: i64, ty: IrType },
    ConstFloat { dest: ValueId, value: f64, ty: IrType },
    ConstBool { dest: ValueId, value: bool },
    ConstString { dest: ValueId, value: String },
    ConstNullPtr { dest: ValueId, ty: IrType },

    Call { dest: Option<ValueId>, callee: String, args: Vec<ValueId>, ret_ty: IrType },
    ExternCall { dest: Option<ValueId>, callee: String, args: Vec<ValueId>, ret_ty: IrType },
    /// A call through the throws protocol (spec.md §5): `dest` receives the
    /// i32 tag, the success value (if any) and error payload (if any) are
    /// written through `out_ptr`/`err_ptr`.
    ThrowsCall { dest: ValueId, callee: String, args: Vec<ValueId>, out_ptr: ValueId, err_ptr: ValueId },

    Cast { dest: ValueId, value: ValueId, target_ty: IrType },
    SizeOf { dest: ValueId, ty: IrType, result_ty: IrType },

    Destroy { ptr: ValueId, struct_name: String },
    OnCopy { dest: ValueId, value: ValueId, struct_name: String },
    Move { dest: ValueId, source: ValueId },

    BoundsCheck { index: ValueId, len: ValueId },
    NullCheck { ptr: ValueId },
    Assert { cond: ValueId, message: String },
    Require { cond: ValueId, message: String },
}

impl Instr {
    /// The value this instruction defines, if any. Per spec.md §4.1: every
    /// instruction defines a value except `Store`, a void-returning
    /// `Call`/`ExternCall`, `Destroy`, and the runtime checks.
    pub fn defined_value(&self) -> Option<ValueId> {
        match self {
            Instr::Alloca { dest, .. }
            | Instr::Load { dest, .. }
            | Instr::FieldAddr { dest, .. }
            | Instr::ElemAddr { dest, .. }
            | Instr::Binary { dest, .. }
            | Instr::Unary { dest, .. }
            | Instr::ConstInt { dest, .. }
            | Instr::ConstFloat { dest, .. }
            | Instr::ConstBool { dest, .. }
            | Instr::ConstString { dest, .. }
            | Instr::ConstNullPtr { dest, .. }
            | Instr::ThrowsCall { dest, .. }
            | Instr::Cast { dest, .. }
            | Instr::SizeOf { dest, .. }
            | Instr::OnCopy { dest, .. }
            | Instr::Move { dest, .. } => Some(*dest),
            Instr::Call { dest, .. } | Instr::ExternCall { dest, .. } => *dest,
            Instr::Store { .. }
            | Instr::Destroy { .. }
            | Instr::BoundsCheck { .. }
            | Instr::NullCheck { .. }
            | Instr::Assert { .. }
            | Instr::Require { .. } => None,
        }
    }

    /// True for `Load`/`Store` whose pointer operand is exactly `alloc` and
    /// which use it only as the pointer, never escaping it — the predicate
    /// mem2reg's classification pass needs (spec.md §4.4 step 1).
    pub fn is_simple_access_to(&self, alloc: ValueId) -> bool {
        matches!(self, Instr::Load { ptr, .. } if *ptr == alloc)
            || matches!(self, Instr::Store { ptr, .. } if *ptr == alloc)
    }

    /// True if this instruction uses `alloc` in any position other than as
    /// a plain `Load`/`Store` pointer — i.e. the address escapes, which
    /// disqualifies the allocation from promotion.
    pub fn escapes(&self, alloc: ValueId) -> bool {
        let touches = |v: ValueId| v == alloc;
        match self {
            Instr::Load { ptr, .. } => *ptr != alloc && touches(*ptr),
            Instr::Store { ptr, value } => *ptr != alloc && (touches(*ptr) || touches(*value)),
            Instr::FieldAddr { base, .. } => touches(*base),
            Instr::ElemAddr { base, index, .. } => touches(*base) || touches(*index),
            Instr::Call { args, .. } | Instr::ExternCall { args, .. } => args.iter().any(|a| touches(*a)),
            Instr::ThrowsCall { args, out_ptr, err_ptr, .. } => {
                args.iter().any(|a| touches(*a)) || touches(*out_ptr) || touches(*err_ptr)
            }
            Instr::Cast { value, .. } => touches(*value),
            Instr::Destroy { ptr, .. } => touches(*ptr),
            Instr::OnCopy { value, .. } => touches(*value),
            Instr::Move { source, .. } => touches(*source),
            Instr::BoundsCheck { index, len } => touches(*index) || touches(*len),
            Instr::NullCheck { ptr } => touches(*ptr),
            Instr::Binary { lhs, rhs, .. } => touches(*lhs) || touches(*rhs),
            Instr::Unary { operand, .. } => touches(*operand),
            _ => false,
        }
    }
}

/// Rewrite every *operand* position of `instr` through `f`, leaving `dest`
/// fields untouched. This is the single source of truth every pass that
/// needs to remap value ids (mem2reg's renaming, SSA destruction's
/// parallel-copy lowering) goes through, rather than hand-rolling a match
/// over every variant again. Idempotent under the identity mapping.
pub fn rewrite_operands(instr: &Instr, f: &mut impl FnMut(ValueId) -> ValueId) -> Instr {
    match instr.clone() {
        Instr::Alloca { dest, ty } => Instr::Alloca { dest, ty },
        Instr::Load { dest, ty, ptr } => Instr::Load { dest, ty, ptr: f(ptr) },
        Instr::Store { ptr, value } => Instr::Store { ptr: f(ptr), value: f(value) },
        Instr::FieldAddr { dest, base, struct_name, field, field_ty } => {
            Instr::FieldAddr { dest, base: f(base), struct_name, field, field_ty }
        }
        Instr::ElemAddr { dest, base, index, elem_ty } => {
            Instr::ElemAddr { dest, base: f(base), index: f(index), elem_ty }
        }
        Instr::Binary { dest, op, lhs, rhs, result_ty } => {
            Instr::Binary { dest, op, lhs: f(lhs), rhs: f(rhs), result_ty }
        }
        Instr::Unary { dest, op, operand, result_ty } => {
            Instr::Unary { dest, op, operand: f(operand), result_ty }
        }
        Instr::ConstInt { dest, value, ty } => Instr::ConstInt { dest, value, ty },
        Instr::ConstFloat { dest, value, ty } => Instr::ConstFloat { dest, value, ty },
        Instr::ConstBool { dest, value } => Instr::ConstBool { dest, value },
        Instr::ConstString { dest, value } => Instr::ConstString { dest, value },
        Instr::ConstNullPtr { dest, ty } => Instr::ConstNullPtr { dest, ty },
        Instr::Call { dest, callee, args, ret_ty } => {
            Instr::Call { dest, callee, args: args.into_iter().map(&mut *f).collect(), ret_ty }
        }
        Instr::ExternCall { dest, callee, args, ret_ty } => {
            Instr::ExternCall { dest, callee, args: args.into_iter().map(&mut *f).collect(), ret_ty }
        }
        Instr::ThrowsCall { dest, callee, args, out_ptr, err_ptr } => Instr::ThrowsCall {
            dest,
            callee,
            args: args.into_iter().map(&mut *f).collect(),
            out_ptr: f(out_ptr),
            err_ptr: f(err_ptr),
        },
        Instr::Cast { dest, value, target_ty } => Instr::Cast { dest, value: f(value), target_ty },
        Instr::SizeOf { dest, ty, result_ty } => Instr::SizeOf { dest, ty, result_ty },
        Instr::Destroy { ptr, struct_name } => Instr::Destroy { ptr: f(ptr), struct_name },
        Instr::OnCopy { dest, value, struct_name } => Instr::OnCopy { dest, value: f(value), struct_name },
        Instr::Move { dest, source } => Instr::Move { dest, source: f(source) },
        Instr::BoundsCheck { index, len } => Instr::BoundsCheck { index: f(index), len: f(len) },
        Instr::NullCheck { ptr } => Instr::NullCheck { ptr: f(ptr) },
        Instr::Assert { cond, message } => Instr::Assert { cond: f(cond), message },
        Instr::Require { cond, message } => Instr::Require { cond: f(cond), message },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phi {
    pub dest: ValueId,
    pub ty: IrType,
    pub incomings: Vec<(BlockId, ValueId)>,
}

impl Phi {
    pub fn rewrite_incomings(&self, f: &mut impl FnMut(ValueId) -> ValueId) -> Phi {
        Phi {
            dest: self.dest,
            ty: self.ty.clone(),
            incomings: self.incomings.iter().map(|(b, v)| (*b, f(*v))).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Terminator {
    ReturnValue(ValueId),
    ReturnVoid,
    Jump(BlockId),
    Branch { cond: ValueId, then_block: BlockId, else_block: BlockId },
    Switch { scrutinee: ValueId, cases: Vec<(i64, BlockId)>, default: BlockId },
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::ReturnValue(_) | Terminator::ReturnVoid | Terminator::Unreachable => vec![],
            Terminator::Jump(b) => vec![*b],
            Terminator::Branch { then_block, else_block, .. } => vec![*then_block, *else_block],
            Terminator::Switch { cases, default, .. } => {
                let mut out: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                out.push(*default);
                out
            }
        }
    }

    pub fn rewrite_operands(&self, f: &mut impl FnMut(ValueId) -> ValueId) -> Terminator {
        match self.clone() {
            Terminator::ReturnValue(v) => Terminator::ReturnValue(f(v)),
            Terminator::ReturnVoid => Terminator::ReturnVoid,
            Terminator::Jump(b) => Terminator::Jump(b),
            Terminator::Branch { cond, then_block, else_block } => {
                Terminator::Branch { cond: f(cond), then_block, else_block }
            }
            Terminator::Switch { scrutinee, cases, default } => {
                Terminator::Switch { scrutinee: f(scrutinee), cases, default }
            }
            Terminator::Unreachable => Terminator::Unreachable,
        }
    }

    /// Rewrite a successor block id wherever it appears, used when
    /// splitting a critical edge (spec.md §4.5).
    pub fn rewrite_successor(&self, from: BlockId, to: BlockId) -> Terminator {
        let map = |b: BlockId| if b == from { to } else { b };
        match self.clone() {
            Terminator::Jump(b) => Terminator::Jump(map(b)),
            Terminator::Branch { cond, then_block, else_block } => {
                Terminator::Branch { cond, then_block: map(then_block), else_block: map(else_block) }
            }
            Terminator::Switch { scrutinee, cases, default } => Terminator::Switch {
                scrutinee,
                cases: cases.into_iter().map(|(v, b)| (v, map(b))).collect(),
                default: map(default),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::IntWidth;

    #[test]
    fn rewrite_operands_is_identity_preserving() {
        let instr = Instr::Binary {
            dest: 3,
            op: BinOp::Add,
            lhs: 1,
            rhs: 2,
            result_ty: IrType::Int { width: IntWidth::W32, signed: true },
        };
        let same = rewrite_operands(&instr, &mut |v| v);
        match (instr, same) {
            (Instr::Binary { lhs: a, rhs: b, .. }, Instr::Binary { lhs: c, rhs: d, .. }) => {
                assert_eq!(a, c);
                assert_eq!(b, d);
            }
            _ => panic!("variant changed under rewrite"),
        }
    }

    #[test]
    fn rewrite_operands_never_touches_dest() {
        let instr = Instr::Load { dest: 7, ty: IrType::Bool, ptr: 4 };
        let rewritten = rewrite_operands(&instr, &mut |v| v + 100);
        match rewritten {
            Instr::Load { dest, ptr, .. } => {
                assert_eq!(dest, 7);
                assert_eq!(ptr, 104);
            }
            _ => panic!("unexpected variant"),
        }
    }

    #[test]
    fn defined_value_excludes_store_and_checks() {
        assert_eq!(Instr::Store { ptr: 0, value: 1 }.defined_value(), None);
        assert_eq!(Instr::BoundsCheck { index: 0, len: 1 }.defined_value(), None);
        assert_eq!(Instr::Alloca { dest: 5, ty: IrType::Bool }.defined_value(), Some(5));
    }

    #[test]
    fn switch_successors_include_default() {
        let term = Terminator::Switch { scrutinee: 0, cases: vec![(1, 10), (2, 11)], default: 12 };
        assert_eq!(term.successors(), vec![10, 11, 12]);
    }
}
