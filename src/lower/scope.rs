//! Scope lifecycle (spec.md §4.2): every block-scoped `let` of a struct
//! with a destructor registers a destroy obligation; leaving the scope —
//! normally or through an early `return`/`throw`/`catch`-rethrow/`break`/
//! `continue` — destroys every live obligation in reverse declaration
//! order. A value that has been moved out of is shadowed out of its
//! scope's obligations so it is never double-destroyed.

use std::collections::HashSet;

use crate::function::BlockBuilder;
use crate::instr::Instr;
use crate::value::ValueId;

#[derive(Debug, Default)]
struct Scope {
    /// `(pointer, struct_name)` pairs in declaration order.
    obligations: Vec<(ValueId, String)>,
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    moved: HashSet<ValueId>,
}

impl ScopeStack {
    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    pub fn register_destroyable(&mut self, ptr: ValueId, struct_name: impl Into<String>) {
        self.scopes
            .last_mut()
            .expect("register_destroyable called outside any scope")
            .obligations
            .push((ptr, struct_name.into()));
    }

    /// Marks `ptr` as moved-from: it is shadowed out of destruction for
    /// the rest of its scope's lifetime, including on early exit.
    pub fn mark_moved(&mut self, ptr: ValueId) {
        self.moved.insert(ptr);
    }

    /// A move target is freshly owned again once it has been assigned a
    /// new value (e.g. re-bound after being passed by move in a loop body).
    pub fn unmark_moved(&mut self, ptr: ValueId) {
        self.moved.remove(&ptr);
    }

    /// Emit destroys for exactly the innermost scope, in reverse
    /// declaration order — used when control falls off the end of a block
    /// normally.
    pub fn emit_innermost(&self, block: &mut BlockBuilder) {
        if let Some(scope) = self.scopes.last() {
            self.emit_scope(scope, block);
        }
    }

    /// Emit destroys for every enclosing scope, innermost first — used on
    /// early exit (`return`, `throw`, `break`, `continue`, a `catch`
    /// rethrow) so nothing between the exit point and the scope it targets
    /// leaks.
    pub fn emit_all_enclosing(&self, block: &mut BlockBuilder) {
        for scope in self.scopes.iter().rev() {
            self.emit_scope(scope, block);
        }
    }

    /// Emit destroys for every scope up to (but not including) the
    /// `keep_outer` outermost scopes — used by `break`/`continue`, which
    /// unwind only as far as the loop's own scope.
    pub fn emit_until(&self, keep_outer: usize, block: &mut BlockBuilder) {
        for scope in self.scopes.iter().rev().take(self.scopes.len().saturating_sub(keep_outer)) {
            self.emit_scope(scope, block);
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    fn emit_scope(&self, scope: &Scope, block: &mut BlockBuilder) {
        for (ptr, struct_name) in scope.obligations.iter().rev() {
            if !self.moved.contains(ptr) {
                block.push(Instr::Destroy { ptr: *ptr, struct_name: struct_name.clone() });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::IrType;

    #[test]
    fn destroys_emit_in_reverse_declaration_order() {
        let mut stack = ScopeStack::default();
        stack.push();
        stack.register_destroyable(1, "Point");
        stack.register_destroyable(2, "Line");
        let mut block = BlockBuilder::new(0);
        stack.emit_innermost(&mut block);
        let order: Vec<ValueId> = block
            .instrs
            .iter()
            .map(|i| match i {
                Instr::Destroy { ptr, .. } => *ptr,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn moved_values_are_not_destroyed() {
        let mut stack = ScopeStack::default();
        stack.push();
        stack.register_destroyable(1, "Buffer");
        stack.mark_moved(1);
        let mut block = BlockBuilder::new(0);
        stack.emit_innermost(&mut block);
        assert!(block.instrs.is_empty());
        let _ = IrType::Void;
    }

    #[test]
    fn early_exit_destroys_every_enclosing_scope() {
        let mut stack = ScopeStack::default();
        stack.push();
        stack.register_destroyable(1, "A");
        stack.push();
        stack.register_destroyable(2, "B");
        let mut block = BlockBuilder::new(0);
        stack.emit_all_enclosing(&mut block);
        assert_eq!(block.instrs.len(), 2);
    }
}
