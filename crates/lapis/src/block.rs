//! Basic blocks and block groups.
//!
//! A block is an ordered list of expressions whose final element is a
//! terminator once control flow is finalised. A block group is an ordered
//! set of blocks with a designated entry, owned either by a function body
//! or by a structured-control (or lambda) expression.

use crate::expr::ExprId;
use crate::ty::TypeId;
use crate::value::ValueId;

/// Index into the builder's block arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index into the builder's block-group arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockGroupId(pub(crate) u32);

impl BlockGroupId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Who owns a block group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockGroupOwner {
    /// Not yet attached; only legal transiently during construction.
    Detached,
    /// A function body.
    Func(ValueId),
    /// A structured-control or lambda expression.
    Expr(ExprId),
}

#[derive(Debug, Clone)]
pub struct Block {
    pub ident: String,
    pub exprs: Vec<ExprId>,
    /// Predecessor blocks; maintained by the builder whenever terminator
    /// edges change.
    pub preds: Vec<BlockId>,
    pub parent: BlockGroupId,
    /// When this block is a landing pad for with-exception terminators,
    /// the exception class types it catches.
    pub exception_catch_tys: Vec<TypeId>,
}

impl Block {
    /// A block with no predecessors that is not the entry is dead code.
    #[must_use]
    pub fn has_preds(&self) -> bool {
        !self.preds.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BlockGroup {
    pub ident: String,
    pub blocks: Vec<BlockId>,
    pub entry: Option<BlockId>,
    pub owner: BlockGroupOwner,
}

impl BlockGroup {
    #[must_use]
    pub fn entry_block(&self) -> BlockId {
        self.entry.expect("block group has no entry block")
    }
}
