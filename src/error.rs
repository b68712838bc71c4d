//! Error types for the Anvil middle end.
//!
//! Two domains, matching spec.md §7: a checker-contract violation (the
//! Lowerer received input the type checker should never have let through)
//! and an internal pass invariant failure (a bug in this crate, not the
//! source program). Neither is retried or recovered from — the driver
//! decides whether to abort the process.

use thiserror::Error;

use crate::value::IrType;

#[derive(Debug, Error)]
pub enum MidError {
    #[error("internal consistency error: {0}")]
    Internal(String),

    #[error("checker contract violation: {0}")]
    CheckerContract(String),

    #[error("undefined name: {0}")]
    UndefinedName(String),

    #[error("unknown struct: {0}")]
    UnknownStruct(String),

    #[error("unknown union: {0}")]
    UnknownUnion(String),

    #[error("type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: IrType, found: IrType },

    #[error("early return inside an if-expression arm is not allowed: {0}")]
    EarlyReturnInExpressionArm(String),

    #[error("a promoted value's definition did not reach a use: {0}")]
    UndefValueSurvived(String),

    #[error("block {0} is not terminated")]
    UnterminatedBlock(u32),

    #[error("phi incoming-block set does not match predecessors for block {0}")]
    PhiPredecessorMismatch(u32),

    #[error("module dependency cycle detected: {0}")]
    ModuleCycle(String),

    #[error("non-exhaustive catch missing handler for thrown type: {0}")]
    NonExhaustiveCatch(String),
}

pub type MidResult<T> = std::result::Result<T, MidError>;
