//! A function's blocks and the scaffolding the Lowerer uses to build them
//! one instruction at a time before they are sealed (spec.md §3.5).

use serde::{Deserialize, Serialize};

use crate::instr::{Instr, Phi, Terminator};
use crate::value::{BlockId, IrType, ValueId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: IrType,
    pub is_move: bool,
}

/// A finished, immutable block: phis, then instructions, then exactly one
/// terminator. Once a function's blocks are all `Block`s (not
/// `BlockBuilder`s) the function is sealed and ready for CFG analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub phis: Vec<Phi>,
    pub instrs: Vec<Instr>,
    pub terminator: Terminator,
}

/// The working form of a block while the Lowerer is still emitting into
/// it. `terminator` is absent until the block's last statement is lowered;
/// a block with no terminator when the function is sealed is an internal
/// error (spec.md §7).
#[derive(Debug, Clone, Default)]
pub struct BlockBuilder {
    pub id: BlockId,
    pub phis: Vec<Phi>,
    pub instrs: Vec<Instr>,
    pub terminator: Option<Terminator>,
}

impl BlockBuilder {
    pub fn new(id: BlockId) -> Self {
        Self { id, phis: Vec::new(), instrs: Vec::new(), terminator: None }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }

    pub fn push(&mut self, instr: Instr) {
        debug_assert!(self.terminator.is_none(), "cannot append past a block's terminator");
        self.instrs.push(instr);
    }

    pub fn terminate(&mut self, term: Terminator) {
        debug_assert!(self.terminator.is_none(), "block {} already terminated", self.id);
        self.terminator = Some(term);
    }

    pub fn seal(self) -> Result<Block, crate::error::MidError> {
        let terminator = self
            .terminator
            .ok_or(crate::error::MidError::UnterminatedBlock(self.id))?;
        Ok(Block { id: self.id, phis: self.phis, instrs: self.instrs, terminator })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub return_ty: IrType,
    pub blocks: Vec<Block>,
    pub next_value: ValueId,
    /// Ordered list of error type names this function's signature was
    /// transformed for (spec.md §5); `None` for a function with no
    /// `throws` clause — its signature is left untouched.
    pub throws: Option<Vec<String>>,
}

impl Function {
    pub fn entry_block(&self) -> BlockId {
        self.blocks.first().map(|b| b.id).unwrap_or(0)
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// Re-checks the structural invariants the CFG/dominance builder
    /// assumes: every block is present exactly once, every terminator's
    /// successors name a block that exists, and the function has exactly
    /// one entry (spec.md §4.3 precondition; SPEC_FULL.md §C).
    pub fn validate(&self) -> Result<(), crate::error::MidError> {
        use std::collections::HashSet;
        if self.blocks.is_empty() {
            return Err(crate::error::MidError::Internal(format!(
                "function `{}` has no blocks",
                self.name
            )));
        }
        let ids: HashSet<BlockId> = self.blocks.iter().map(|b| b.id).collect();
        if ids.len() != self.blocks.len() {
            return Err(crate::error::MidError::Internal(format!(
                "function `{}` has duplicate block ids",
                self.name
            )));
        }
        for block in &self.blocks {
            for succ in block.terminator.successors() {
                if !ids.contains(&succ) {
                    return Err(crate::error::MidError::Internal(format!(
                        "function `{}` block {} jumps to undefined block {}",
                        self.name, block.id, succ
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Scaffolding a [`crate::lower`] pass builds up and finally seals into a
/// [`Function`]. Owns the fresh-value counter the way `seen_ir::generator`
/// owns a register counter on its `GenerationContext`.
#[derive(Debug, Default)]
pub struct FunctionBuilder {
    pub name: String,
    pub params: Vec<Param>,
    pub return_ty: IrType,
    pub blocks: Vec<BlockBuilder>,
    pub throws: Option<Vec<String>>,
    next_value: ValueId,
    next_block: BlockId,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, params: Vec<Param>, return_ty: IrType) -> Self {
        Self {
            name: name.into(),
            params,
            return_ty,
            blocks: Vec::new(),
            throws: None,
            next_value: 0,
            next_block: 0,
        }
    }

    pub fn fresh_value(&mut self) -> ValueId {
        let id = self.next_value;
        self.next_value += 1;
        id
    }

    pub fn fresh_block(&mut self) -> BlockId {
        let id = self.next_block;
        self.next_block += 1;
        self.blocks.push(BlockBuilder::new(id));
        id
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockBuilder {
        self.blocks
            .iter_mut()
            .find(|b| b.id == id)
            .expect("fresh_block must be called before block_mut")
    }

    pub fn seal(self) -> Result<Function, crate::error::MidError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for b in self.blocks {
            blocks.push(b.seal()?);
        }
        Ok(Function {
            name: self.name,
            params: self.params,
            return_ty: self.return_ty,
            blocks,
            next_value: self.next_value,
            throws: self.throws,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealing_an_unterminated_block_is_an_error() {
        let mut b = FunctionBuilder::new("f", vec![], IrType::Void);
        b.fresh_block();
        let err = b.seal().unwrap_err();
        assert!(matches!(err, crate::error::MidError::UnterminatedBlock(0)));
    }

    #[test]
    fn sealed_function_reports_undefined_jump_target() {
        let mut b = FunctionBuilder::new("f", vec![], IrType::Void);
        let entry = b.fresh_block();
        b.block_mut(entry).terminate(Terminator::Jump(99));
        let f = b.seal().unwrap();
        assert!(f.validate().is_err());
    }
}
