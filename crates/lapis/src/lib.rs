#![doc = include_str!("../../../README.md")]

mod block;
mod builder;
mod def;
mod diag;
mod expr;
mod package;
mod subst;
mod ty;
mod value;
mod visitor;

pub mod analysis;
pub mod checker;
pub mod pipeline;
pub mod transform;

pub use crate::{
    block::{Block, BlockGroup, BlockGroupId, BlockGroupOwner, BlockId},
    builder::Builder,
    def::{AbstractMethod, CustomDef, CustomDefKind, CustomDefTag, EnumCtor, MemberVar, VTable, VTableSlot},
    diag::{CheckError, CollectSink, DebugLocation, DiagSink, Diagnostic, Severity},
    expr::{
        BinaryOpKind, Expr, ExprId, ExprKind, ForInKind, IntrinsicKind, LambdaData, UnaryOpKind,
    },
    package::{AccessLevel, Mangler, Package, PlainMangler},
    pipeline::{OptLevel, Options, Phase, run_pipeline, run_pipeline_with_devirt},
    subst::{MultiTypeSubst, TwoStageSubst, TypeSubst},
    ty::{DefId, FloatWidth, FuncSig, GenericParam, GenericTypeId, IntWidth, Type, TypeId},
    value::{Attributes, FuncData, FuncKind, Literal, ParamOwner, Value, ValueId, ValueKind},
    visitor::{
        VisitResult, visit_blocks, visit_func_exprs, visit_func_exprs_mut, visit_group_exprs,
        visit_group_exprs_mut, visit_group_exprs_mut_post, visit_groups,
    },
};
