//! The typed syntax tree and checker tables: the Lowerer's entire input
//! contract (spec.md §6). This module owns no inference or resolution
//! logic — it is the shape the checker (out of scope, grounded the same
//! way `seen_ir::generator` treats `seen_parser::Expression` as an input
//! it consumes but does not produce) is assumed to have already produced.

use std::collections::{HashMap, HashSet};

use crate::semantic::{FunctionSig, SemanticType, StructDef, TypeTables, UnionDef};
use serde::{Deserialize, Serialize};

pub type ExprId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    Deref,
    AddrOf,
}

#[derive(Debug, Clone)]
pub enum Expr {
    IntLit { id: ExprId, value: i64 },
    FloatLit { id: ExprId, value: f64 },
    BoolLit { id: ExprId, value: bool },
    StringLit { id: ExprId, value: String },
    NullLit { id: ExprId },
    Ident { id: ExprId, name: String },
    StructLit { id: ExprId, type_name: String, fields: Vec<(String, Expr)> },
    ArrayLit { id: ExprId, elements: Vec<Expr> },
    Member { id: ExprId, base: Box<Expr>, field: String },
    Index { id: ExprId, base: Box<Expr>, index: Box<Expr> },
    Call { id: ExprId, callee: String, args: Vec<Expr> },
    MethodCall { id: ExprId, receiver: Box<Expr>, method: String, args: Vec<Expr> },
    CallCatch { id: ExprId, call: Box<Expr>, catch: CatchClause },
    Assign { id: ExprId, target: Box<Expr>, value: Box<Expr> },
    Binary { id: ExprId, op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Unary { id: ExprId, op: UnOp, operand: Box<Expr> },
    LogicalAnd { id: ExprId, left: Box<Expr>, right: Box<Expr> },
    LogicalOr { id: ExprId, left: Box<Expr>, right: Box<Expr> },
    /// `if` as an expression: both arms are required and each arm must
    /// terminate with a value, never an early `return` (spec.md's Open
    /// Question, resolved in SPEC_FULL.md §D).
    If { id: ExprId, cond: Box<Expr>, then_branch: Box<ValueBlock>, else_branch: Box<ValueBlock> },
    Move { id: ExprId, name: String },
    Cast { id: ExprId, value: Box<Expr>, target: SemanticType },
    SizeOf { id: ExprId, target: SemanticType },
}

impl Expr {
    pub fn id(&self) -> ExprId {
        match self {
            Expr::IntLit { id, .. }
            | Expr::FloatLit { id, .. }
            | Expr::BoolLit { id, .. }
            | Expr::StringLit { id, .. }
            | Expr::NullLit { id }
            | Expr::Ident { id, .. }
            | Expr::StructLit { id, .. }
            | Expr::ArrayLit { id, .. }
            | Expr::Member { id, .. }
            | Expr::Index { id, .. }
            | Expr::Call { id, .. }
            | Expr::MethodCall { id, .. }
            | Expr::CallCatch { id, .. }
            | Expr::Assign { id, .. }
            | Expr::Binary { id, .. }
            | Expr::Unary { id, .. }
            | Expr::LogicalAnd { id, .. }
            | Expr::LogicalOr { id, .. }
            | Expr::If { id, .. }
            | Expr::Move { id, .. }
            | Expr::Cast { id, .. }
            | Expr::SizeOf { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CatchClause {
    Panic,
    Throw,
    Handlers { arms: Vec<CatchArm>, default: Option<CatchDefault> },
}

#[derive(Debug, Clone)]
pub struct CatchArm {
    pub error_type: String,
    pub binding: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct CatchDefault {
    pub binding: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Let { name: String, is_mutable: bool, value: Expr },
    Expr(Expr),
    Return(Option<Expr>),
    /// Statement-level `if`: unlike `Expr::If`, arms may end early (return,
    /// throw, break, continue) and an arm may be omitted.
    If { cond: Expr, then_block: Block, else_block: Option<Block> },
    While { cond: Expr, body: Block },
    For { var: String, start: Expr, end: Expr, body: Block },
    Switch { scrutinee: Expr, cases: Vec<(i64, Block)>, default: Block },
    Break,
    Continue,
    Throw { error_type: String, fields: Vec<(String, Expr)> },
    Block(Block),
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

/// A statement block used where a *value* is required (an if-expression
/// arm): leading statements followed by a mandatory tail expression that
/// supplies the block's value. Unlike [`Block`], a leading statement may
/// not be an early `return` — the Lowerer rejects that with
/// `MidError::EarlyReturnInExpressionArm` rather than accepting it the way
/// a statement-level `if`'s `Block` arms do.
#[derive(Debug, Clone)]
pub struct ValueBlock {
    pub stmts: Vec<Stmt>,
    pub tail: Box<Expr>,
}

#[derive(Debug, Clone)]
pub struct FunctionParam {
    pub name: String,
    pub ty: SemanticType,
    pub is_move: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<FunctionParam>,
    pub return_type: SemanticType,
    pub throws: Vec<String>,
    pub generics: Vec<String>,
    pub is_extern: bool,
    /// `Some(struct_name)` for a method; the implicit `self` parameter is
    /// not listed in `params` and is synthesized during lowering.
    pub is_method_of: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct ImportedName {
    pub local_name: String,
    pub mangled_name: String,
    pub is_overloaded: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ModuleAst {
    pub name: String,
    pub functions: Vec<FunctionDecl>,
    pub types: TypeTables,
    pub imports: Vec<ImportedName>,
}

/// Per-monomorphization records: one instantiated struct or function per
/// concrete type argument list the checker resolved, named by its mangled
/// name (spec.md §4.2's mangling scheme, monomorphization variant).
#[derive(Debug, Clone)]
pub struct MonoStruct {
    pub mangled_name: String,
    pub original_name: String,
    pub def: StructDef,
}

#[derive(Debug, Clone)]
pub struct MonoFunction {
    pub mangled_name: String,
    pub original_name: String,
    pub signature: FunctionSig,
}

#[derive(Debug, Clone)]
pub struct MonoUnion {
    pub mangled_name: String,
    pub original_name: String,
    pub def: UnionDef,
}

/// Everything the checker attaches to the tree out-of-band: a type per
/// expression, a resolved callee per call site (so overload mangling
/// doesn't need to be redone by the Lowerer), and the set of struct names
/// needing a synthesized `__destroy`/`__oncopy` hook.
#[derive(Debug, Clone, Default)]
pub struct CheckerTables {
    pub expr_types: HashMap<ExprId, SemanticType>,
    pub resolved_callee: HashMap<ExprId, String>,
    pub resolved_method: HashMap<ExprId, String>,
    pub monomorphization_of: HashMap<ExprId, String>,
    pub auto_destroy: HashSet<String>,
    pub auto_oncopy: HashSet<String>,
}

impl CheckerTables {
    pub fn type_of(&self, id: ExprId) -> Option<&SemanticType> {
        self.expr_types.get(&id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckerOutput {
    pub tables: CheckerTables,
    pub mono_structs: Vec<MonoStruct>,
    pub mono_functions: Vec<MonoFunction>,
    pub mono_unions: Vec<MonoUnion>,
}
