//! IR expressions: typed operations producing at most one local result.
//!
//! Expression kinds group into memory operations, unary/binary arithmetic,
//! calls and conversions, terminators, and structured control flow. The
//! "with-exception" twins of call-like kinds are not separate kinds: an
//! expression with a non-empty successor list `[success, error]` *is* the
//! exceptional form, and is a terminator. This halves the kind count and
//! keeps every rewrite-by-kind site exhaustive.

use smallvec::SmallVec;
use strum::{Display, IntoStaticStr};

use crate::block::{BlockGroupId, BlockId};
use crate::diag::DebugLocation;
use crate::ty::TypeId;
use crate::value::{Literal, ValueId};

/// Index into the builder's expression arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(pub(crate) u32);

impl ExprId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum UnaryOpKind {
    Neg,
    Not,
    BitNot,
}

/// Binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum BinaryOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

/// Intrinsic operations recognised by the optimiser and code generators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum IntrinsicKind {
    ArrayGetUnchecked,
    ArrayGetRefUnchecked,
    ArraySetUnchecked,
    ArraySize,
    /// Produces the runtime zero value of an object type; raw arrays are
    /// zero-initialised by the allocator, so filling with this is a no-op.
    ObjectZeroValue,
    CStringInit,
    VArrayGet,
    VArraySet,
}

/// The three source forms of `for .. in`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum ForInKind {
    /// `for i in a..b`
    Range,
    /// `for x in iterable`
    Iter,
    /// `for i in a..=b`; do-while-like, the body runs before the condition.
    ClosedRange,
}

/// Payload of a lambda expression. The body group is `groups[0]` of the
/// carrying expression.
#[derive(Debug, Clone)]
pub struct LambdaData {
    pub params: Vec<ValueId>,
    pub ret_value: Option<ValueId>,
    pub src_name: String,
    /// Local named functions may reference themselves inside their body.
    pub is_local_func: bool,
}

/// The kind (and kind-specific payload) of an expression.
///
/// Operand conventions, where not obvious:
/// - `Load`: `[location]`; `Store`: `[value, location]`.
/// - `GetElementRef`/`StoreElementRef`: location plus a constant member
///   path; `StoreElementRef` is `[value, location]`.
/// - `Apply`: `[callee, args..]`; `Invoke`: `[object, args..]`;
///   `InvokeStatic`: `[rtti, args..]`.
/// - `Branch`: `[cond]` with successors `[true, false]`.
/// - `MultiBranch`: `[selector]` with successors `[default, case..]`.
/// - with-exception forms of call-like kinds carry successors
///   `[success, error]`.
#[derive(Debug, Clone)]
pub enum ExprKind {
    // memory
    Allocate {
        ty: TypeId,
    },
    Load,
    Store,
    GetElementRef {
        path: SmallVec<[u64; 2]>,
    },
    StoreElementRef {
        path: SmallVec<[u64; 2]>,
    },

    // arithmetic
    UnaryOp(UnaryOpKind),
    BinaryOp(BinaryOpKind),

    // other
    Constant(Literal),
    Tuple,
    Field {
        path: SmallVec<[u64; 2]>,
    },
    Apply {
        is_super_call: bool,
        instantiate_args: Vec<TypeId>,
    },
    Invoke {
        method_name: String,
        method_sig: TypeId,
        instantiate_args: Vec<TypeId>,
    },
    InvokeStatic {
        method_name: String,
        method_sig: TypeId,
        instantiate_args: Vec<TypeId>,
    },
    TypeCast,
    InstanceOf {
        target_ty: TypeId,
    },
    Box,
    UnBox,
    UnBoxToRef,
    Intrinsic {
        kind: IntrinsicKind,
    },
    /// Reads the instantiated form of a generic value. Legal only before
    /// the optimisation phase; the checker rejects it afterwards.
    GetInstantiateValue {
        inst_tys: Vec<TypeId>,
    },
    Lambda(std::boxed::Box<LambdaData>),
    /// Binds a source-level variable name to a value for tooling.
    Debug {
        name: String,
    },
    Spawn {
        execute_closure: bool,
    },
    RawArrayAllocate {
        elem_ty: TypeId,
    },
    RawArrayLiteralInit,
    RawArrayInitByValue,
    VArrayBuilder,
    GetRtti,
    GetRttiStatic,

    // terminators
    GoTo,
    Branch,
    MultiBranch {
        cases: Vec<u64>,
    },
    Exit,
    RaiseException,

    // structured control flow; flattened before low-level passes
    If,
    Loop,
    ForIn(ForInKind),
}

impl ExprKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Allocate { .. } => "Allocate",
            Self::Load => "Load",
            Self::Store => "Store",
            Self::GetElementRef { .. } => "GetElementRef",
            Self::StoreElementRef { .. } => "StoreElementRef",
            Self::UnaryOp(_) => "UnaryOp",
            Self::BinaryOp(_) => "BinaryOp",
            Self::Constant(_) => "Constant",
            Self::Tuple => "Tuple",
            Self::Field { .. } => "Field",
            Self::Apply { .. } => "Apply",
            Self::Invoke { .. } => "Invoke",
            Self::InvokeStatic { .. } => "InvokeStatic",
            Self::TypeCast => "TypeCast",
            Self::InstanceOf { .. } => "InstanceOf",
            Self::Box => "Box",
            Self::UnBox => "UnBox",
            Self::UnBoxToRef => "UnBoxToRef",
            Self::Intrinsic { .. } => "Intrinsic",
            Self::GetInstantiateValue { .. } => "GetInstantiateValue",
            Self::Lambda(_) => "Lambda",
            Self::Debug { .. } => "Debug",
            Self::Spawn { .. } => "Spawn",
            Self::RawArrayAllocate { .. } => "RawArrayAllocate",
            Self::RawArrayLiteralInit => "RawArrayLiteralInit",
            Self::RawArrayInitByValue => "RawArrayInitByValue",
            Self::VArrayBuilder => "VArrayBuilder",
            Self::GetRtti => "GetRTTI",
            Self::GetRttiStatic => "GetRTTIStatic",
            Self::GoTo => "GoTo",
            Self::Branch => "Branch",
            Self::MultiBranch { .. } => "MultiBranch",
            Self::Exit => "Exit",
            Self::RaiseException => "RaiseException",
            Self::If => "If",
            Self::Loop => "Loop",
            Self::ForIn(_) => "ForIn",
        }
    }

    /// Kinds that are always terminators, independent of exception edges.
    #[must_use]
    pub fn is_plain_terminator(&self) -> bool {
        matches!(
            self,
            Self::GoTo | Self::Branch | Self::MultiBranch { .. } | Self::Exit | Self::RaiseException
        )
    }

    /// Kinds that may carry `[success, error]` exception edges and thereby
    /// become terminators.
    #[must_use]
    pub fn may_carry_exception_edges(&self) -> bool {
        matches!(
            self,
            Self::Apply { .. }
                | Self::Invoke { .. }
                | Self::InvokeStatic { .. }
                | Self::UnaryOp(_)
                | Self::BinaryOp(_)
                | Self::TypeCast
                | Self::Intrinsic { .. }
                | Self::Allocate { .. }
                | Self::RawArrayAllocate { .. }
                | Self::Spawn { .. }
        )
    }

    #[must_use]
    pub fn is_structured_control(&self) -> bool {
        matches!(self, Self::If | Self::Loop | Self::ForIn(_))
    }
}

/// An expression node in the arena.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub operands: SmallVec<[ValueId; 4]>,
    /// The single `LocalVar` this expression defines, if it produces one.
    pub result: Option<ValueId>,
    /// The containing block; `None` once detached.
    pub parent: Option<BlockId>,
    /// Successor blocks of terminator forms. All successors live in the
    /// same block group as the expression.
    pub successors: SmallVec<[BlockId; 2]>,
    /// Nested block groups of structured control flow and lambdas, in
    /// storage order (`[body, latch, cond]` for `ForIn`, `[then, else]`
    /// for `If`, `[body]` for `Loop` and `Lambda`).
    pub groups: SmallVec<[BlockGroupId; 3]>,
    pub loc: DebugLocation,
}

impl Expr {
    /// Whether this expression transfers control: a plain terminator kind,
    /// or a call-like kind carrying exception edges.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.kind.is_plain_terminator() || !self.successors.is_empty()
    }

    /// Whether this is the exceptional (`[success, error]`) form of a
    /// call-like kind.
    #[must_use]
    pub fn has_exception_edges(&self) -> bool {
        self.kind.may_carry_exception_edges() && !self.successors.is_empty()
    }

    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant(_))
    }

    #[must_use]
    pub fn is_debug(&self) -> bool {
        matches!(self.kind, ExprKind::Debug { .. })
    }

    #[must_use]
    pub fn is_lambda(&self) -> bool {
        matches!(self.kind, ExprKind::Lambda(_))
    }

    #[must_use]
    pub fn is_apply(&self) -> bool {
        matches!(self.kind, ExprKind::Apply { .. })
    }

    /// Callee of an `Apply`, object of an `Invoke`, rtti of an
    /// `InvokeStatic`.
    #[must_use]
    pub fn callee(&self) -> Option<ValueId> {
        match self.kind {
            ExprKind::Apply { .. } | ExprKind::Invoke { .. } | ExprKind::InvokeStatic { .. } => {
                self.operands.first().copied()
            }
            _ => None,
        }
    }

    /// Arguments of a call-like expression (everything after the callee or
    /// receiver). Empty once the expression has been unlinked.
    #[must_use]
    pub fn call_args(&self) -> &[ValueId] {
        match self.kind {
            ExprKind::Apply { .. } | ExprKind::Invoke { .. } | ExprKind::InvokeStatic { .. } => {
                self.operands.get(1..).unwrap_or(&[])
            }
            _ => &[],
        }
    }

    #[must_use]
    pub fn lambda_data(&self) -> Option<&LambdaData> {
        match &self.kind {
            ExprKind::Lambda(data) => Some(data),
            _ => None,
        }
    }

    /// Body group of a lambda.
    #[must_use]
    pub fn lambda_body(&self) -> Option<BlockGroupId> {
        self.is_lambda().then(|| self.groups[0])
    }

    /// The nested groups of a `ForIn` in storage order.
    #[must_use]
    pub fn for_in_body(&self) -> BlockGroupId {
        debug_assert!(matches!(self.kind, ExprKind::ForIn(_)));
        self.groups[0]
    }

    #[must_use]
    pub fn for_in_latch(&self) -> BlockGroupId {
        debug_assert!(matches!(self.kind, ExprKind::ForIn(_)));
        self.groups[1]
    }

    #[must_use]
    pub fn for_in_cond(&self) -> BlockGroupId {
        debug_assert!(matches!(self.kind, ExprKind::ForIn(_)));
        self.groups[2]
    }

    /// The loop-condition variable of a `ForIn` (an allocation holding a
    /// `Bool`).
    #[must_use]
    pub fn for_in_loop_cond_var(&self) -> ValueId {
        debug_assert!(matches!(self.kind, ExprKind::ForIn(_)));
        self.operands[1]
    }

    /// Nested groups in the order control enters them. Walkers and the
    /// dataflow engine traverse nested groups in this order.
    #[must_use]
    pub fn execution_order(&self) -> SmallVec<[BlockGroupId; 3]> {
        match self.kind {
            ExprKind::ForIn(ForInKind::Range) => {
                SmallVec::from_slice(&[self.for_in_cond(), self.for_in_body(), self.for_in_latch()])
            }
            ExprKind::ForIn(ForInKind::Iter) => {
                SmallVec::from_slice(&[self.for_in_latch(), self.for_in_cond(), self.for_in_body()])
            }
            ExprKind::ForIn(ForInKind::ClosedRange) => {
                SmallVec::from_slice(&[self.for_in_body(), self.for_in_cond(), self.for_in_latch()])
            }
            _ => self.groups.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(kind: ExprKind) -> Expr {
        Expr {
            kind,
            operands: SmallVec::new(),
            result: None,
            parent: None,
            successors: SmallVec::new(),
            groups: SmallVec::new(),
            loc: DebugLocation::INVALID,
        }
    }

    #[test]
    fn test_plain_terminator_kinds() {
        assert!(bare(ExprKind::GoTo).is_terminator());
        assert!(bare(ExprKind::Exit).is_terminator());
        assert!(!bare(ExprKind::Load).is_terminator());
    }

    #[test]
    fn test_apply_with_exception_edges_is_terminator() {
        let mut e = bare(ExprKind::Apply { is_super_call: false, instantiate_args: vec![] });
        assert!(!e.is_terminator());
        e.successors = SmallVec::from_slice(&[BlockId(0), BlockId(1)]);
        assert!(e.is_terminator());
        assert!(e.has_exception_edges());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ExprKind::GetRtti.name(), "GetRTTI");
        assert_eq!(ExprKind::Tuple.name(), "Tuple");
    }
}
