//! IR values: literals, globals, functions, parameters, and local results.
//!
//! Every value has a type and an identifier; global identifiers are
//! prefixed with `@`, locals with `%`, so the distinction is lexical.
//! Each value records the expressions that read it; all operand mutations
//! go through the builder, which keeps those user sets consistent.

use bitflags::bitflags;
use strum::{Display, IntoStaticStr};

use crate::block::BlockGroupId;
use crate::expr::ExprId;
use crate::diag::DebugLocation;
use crate::ty::{DefId, GenericTypeId, TypeId};

/// Index into the builder's value arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Attribute bits carried by values and v-table slots.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attributes: u32 {
        const NO_INLINE       = 1 << 0;
        const READONLY        = 1 << 1;
        const IMPORTED        = 1 << 2;
        /// Operator-overloading function (`[]`, `+`, ...).
        const OPERATOR        = 1 << 3;
        const SKIP_ANALYSIS   = 1 << 4;
        const NO_REFLECT_INFO = 1 << 5;
        const ABSTRACT        = 1 << 6;
        const STATIC          = 1 << 7;
        /// Method that may mutate a value-type receiver.
        const MUT             = 1 << 8;
        /// `let`-bound: a single initialising store is allowed.
        const LET             = 1 << 9;
    }
}

/// Literal constants.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Rune(char),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Unit,
    Null,
}

impl Literal {
    #[must_use]
    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The numeric value of an integer-like literal, used by selector
    /// checks on enum tuples.
    #[must_use]
    pub fn as_selector_index(&self) -> Option<usize> {
        match self {
            Self::Bool(b) => Some(usize::from(*b)),
            Self::UInt(v) => usize::try_from(*v).ok(),
            Self::Int(v) => usize::try_from(*v).ok(),
            _ => None,
        }
    }
}

/// Role of a function, beyond its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum FuncKind {
    Default,
    /// An `init` constructor of a class or struct.
    Constructor,
    GlobalVarInit,
    PackageInit,
    MainEntry,
    Macro,
    Finalizer,
    /// Compiler-generated initialiser for an instance variable's default
    /// value; always profitable to inline.
    InstanceVarInit,
}

/// Which node owns a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOwner {
    Func(ValueId),
    Lambda(ExprId),
}

/// Body and metadata of a function defined in this package.
#[derive(Debug, Clone)]
pub struct FuncData {
    pub body: BlockGroupId,
    pub params: Vec<ValueId>,
    /// The local var holding the `[ret]` allocation, when the function
    /// returns through a slot.
    pub ret_value: Option<ValueId>,
    pub func_kind: FuncKind,
    /// The custom def this function is declared in or extends, if any.
    pub parent_def: Option<DefId>,
    pub generic_params: Vec<GenericTypeId>,
    /// Unmangled source name, used by pass allow/deny lists.
    pub src_name: String,
    pub package: String,
}

/// What a value is.
#[derive(Debug, Clone)]
pub enum ValueKind {
    Literal(Literal),
    /// A program-wide mutable cell. Initialised either by a literal or by
    /// running an initialiser function before package init completes.
    GlobalVar {
        init: Option<Literal>,
        init_func: Option<ValueId>,
    },
    /// An opaque reference to a symbol defined in another package.
    Imported {
        package: String,
    },
    Func(Box<FuncData>),
    ImportedFunc {
        package: String,
        func_kind: FuncKind,
        parent_def: Option<DefId>,
        src_name: String,
    },
    Parameter {
        owner: ParamOwner,
    },
    /// The result of an expression; has exactly one defining expression.
    LocalVar {
        def: ExprId,
    },
}

/// A value node in the arena.
#[derive(Debug, Clone)]
pub struct Value {
    pub ident: String,
    pub ty: TypeId,
    pub attrs: Attributes,
    /// Expressions reading this value. Kept consistent with operand lists
    /// by the builder's mutation methods.
    pub users: Vec<ExprId>,
    pub loc: DebugLocation,
    pub kind: ValueKind,
}

impl Value {
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ValueKind::Literal(_))
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::GlobalVar { .. }
                | ValueKind::Func(_)
                | ValueKind::ImportedFunc { .. }
                | ValueKind::Imported { .. }
        )
    }

    #[must_use]
    pub fn is_local_var(&self) -> bool {
        matches!(self.kind, ValueKind::LocalVar { .. })
    }

    #[must_use]
    pub fn is_parameter(&self) -> bool {
        matches!(self.kind, ValueKind::Parameter { .. })
    }

    #[must_use]
    pub fn is_func_with_body(&self) -> bool {
        matches!(self.kind, ValueKind::Func(_))
    }

    #[must_use]
    pub fn is_func(&self) -> bool {
        matches!(self.kind, ValueKind::Func(_) | ValueKind::ImportedFunc { .. })
    }

    /// The defining expression of a local var.
    #[must_use]
    pub fn defining_expr(&self) -> Option<ExprId> {
        match self.kind {
            ValueKind::LocalVar { def } => Some(def),
            _ => None,
        }
    }

    #[must_use]
    pub fn func_data(&self) -> Option<&FuncData> {
        match &self.kind {
            ValueKind::Func(data) => Some(data),
            _ => None,
        }
    }

    pub fn func_data_mut(&mut self) -> Option<&mut FuncData> {
        match &mut self.kind {
            ValueKind::Func(data) => Some(data),
            _ => None,
        }
    }

    /// The role of a function value, defined or imported.
    #[must_use]
    pub fn func_kind(&self) -> Option<FuncKind> {
        match &self.kind {
            ValueKind::Func(data) => Some(data.func_kind),
            ValueKind::ImportedFunc { func_kind, .. } => Some(*func_kind),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.func_kind() == Some(FuncKind::Constructor)
    }

    /// Identifier with its `@`/`%` prefix removed.
    #[must_use]
    pub fn ident_without_prefix(&self) -> &str {
        self.ident.trim_start_matches(['@', '%'])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_index_from_literals() {
        assert_eq!(Literal::Bool(true).as_selector_index(), Some(1));
        assert_eq!(Literal::Bool(false).as_selector_index(), Some(0));
        assert_eq!(Literal::UInt(3).as_selector_index(), Some(3));
        assert_eq!(Literal::String("x".into()).as_selector_index(), None);
    }

    #[test]
    fn test_attribute_bits_compose() {
        let attrs = Attributes::LET | Attributes::READONLY;
        assert!(attrs.contains(Attributes::LET));
        assert!(!attrs.contains(Attributes::NO_INLINE));
    }
}
