//! IR transformation passes.
//!
//! Each pass is a self-contained rewrite: it either mutates the graph or
//! leaves it untouched, and every pass is idempotent once it has
//! converged. Pass-level progress messages go through `tracing` with a
//! per-pass target.

pub mod array_lambda;
pub mod box_recursion;
pub mod flatten_for_in;
pub mod function_inline;
pub mod get_ref_to_elem;
pub mod lambda_inline;
pub mod mark_inited;
pub mod redundant_future;
pub mod unit_unify;
pub mod useless_allocate;

use crate::builder::Builder;
use crate::expr::{ExprId, ExprKind};
use crate::value::ValueId;

/// Wildcard for [`FuncInfo`] fields.
pub const NOT_CARE: &str = "*";

/// A pattern identifying well-known library functions by source name,
/// declaring def, and package. Used by pass allow and deny lists.
#[derive(Debug, Clone, Copy)]
pub struct FuncInfo {
    pub name: &'static str,
    pub def_name: &'static str,
    pub package: &'static str,
}

impl FuncInfo {
    #[must_use]
    pub const fn new(name: &'static str, def_name: &'static str, package: &'static str) -> Self {
        Self { name, def_name, package }
    }
}

/// Whether `func` matches the pattern.
#[must_use]
pub fn is_expected_function(b: &Builder, func: ValueId, info: &FuncInfo) -> bool {
    let Some(data) = b.value(func).func_data() else { return false };
    if info.name != NOT_CARE && data.src_name != info.name {
        return false;
    }
    if info.package != NOT_CARE && data.package != info.package {
        return false;
    }
    if info.def_name != NOT_CARE {
        let def_name = data.parent_def.map(|d| b.def(d).src_name.as_str()).unwrap_or("");
        if def_name != info.def_name {
            return false;
        }
    }
    true
}

/// If `expr` is an `Apply` whose callee is the result of a `Lambda`
/// expression, returns that lambda.
#[must_use]
pub fn is_apply_to_lambda(b: &Builder, expr: ExprId) -> Option<ExprId> {
    if !matches!(b.expr(expr).kind, ExprKind::Apply { .. }) {
        return None;
    }
    let callee = b.expr(expr).callee()?;
    if !b.value(callee).is_local_var() {
        return None;
    }
    let def = b.value(callee).defining_expr()?;
    b.expr(def).is_lambda().then_some(def)
}
