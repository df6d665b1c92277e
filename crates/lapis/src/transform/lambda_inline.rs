//! Lambda inlining: fold lambdas into their single call site.
//!
//! A lambda qualifies when it has exactly one use and that use is the
//! callee position of an `Apply`. The mechanics are the function
//! inliner's; this pass only proves the site profitable.

use tracing::debug;

use crate::builder::Builder;
use crate::expr::ExprId;
use crate::package::Package;
use crate::value::ValueId;
use crate::visitor::{VisitResult, visit_group_exprs_mut_post};

use super::function_inline::FunctionInline;
use super::is_apply_to_lambda;

pub fn run_on_package(b: &mut Builder, package: &Package, inliner: &mut FunctionInline) {
    for func in package.global_funcs() {
        run_on_func(b, func, inliner);
    }
}

pub fn run_on_func(b: &mut Builder, func: ValueId, inliner: &mut FunctionInline) {
    let body = b.func_body(func);
    let mut sites: Vec<ExprId> = Vec::new();
    visit_group_exprs_mut_post(b, body, &mut |bld, e| {
        if let Some(lambda) = is_apply_to_lambda(bld, e) {
            if has_single_call_use(bld, lambda) {
                sites.push(e);
            }
        }
        VisitResult::Continue
    });
    for apply in sites {
        if b.expr(apply).parent.is_none() {
            continue;
        }
        let lambda = is_apply_to_lambda(b, apply);
        debug!(target: "lapis::lambda_inline", at = %b.expr(apply).loc, "lambda inlined");
        inliner.inline_call_site(b, apply);
        // the lambda's closure value is dead once its only call is gone
        if let Some(lambda) = lambda {
            let closure = b.expr(lambda).result.expect("lambda has a result");
            if b.value(closure).users.is_empty() {
                b.remove_self_from_block(lambda);
            }
        }
    }
}

/// The lambda result's only user is the apply's callee slot.
fn has_single_call_use(b: &Builder, lambda: ExprId) -> bool {
    let Some(res) = b.expr(lambda).result else { return false };
    b.value(res).users.len() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ExprKind;
    use crate::pipeline::OptLevel;
    use crate::value::{FuncKind, Literal, ParamOwner};

    /// A single-use lambda called in place disappears into the caller.
    #[test]
    fn test_single_use_lambda_is_inlined() {
        let mut b = Builder::new();
        let i64t = b.int64_ty();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);

        let lam_ty = b.func_ty(vec![i64t], i64t);
        let lambda = b.create_lambda("adder", lam_ty, entry);
        let lam_body = b.expr(lambda).lambda_body().unwrap();
        let lam_entry = b.create_block(lam_body);
        let p = b.create_parameter(i64t, ParamOwner::Lambda(lambda));
        let ret_alloc = b.create_allocate(i64t, lam_entry);
        let ret_slot = b.expr(ret_alloc).result.unwrap();
        b.create_store(p, ret_slot, lam_entry);
        b.create_exit(lam_entry);
        if let ExprKind::Lambda(data) = &mut b.expr_mut(lambda).kind {
            data.ret_value = Some(ret_slot);
        }

        let closure = b.expr(lambda).result.unwrap();
        let arg = b.create_constant(Literal::Int(3), i64t, entry);
        let arg_v = b.expr(arg).result.unwrap();
        let call = b.create_apply(closure, &[arg_v], i64t, entry);
        b.create_exit(entry);

        let mut inliner = FunctionInline::new(OptLevel::O2);
        run_on_func(&mut b, f, &mut inliner);

        assert!(b.expr(call).parent.is_none());
        assert!(b.expr(lambda).parent.is_none());
        // the cloned store now writes the argument constant
        let clone_stores_arg = b.group(body).blocks.iter().any(|&blk| {
            b.block(blk).exprs.iter().any(|&e| {
                matches!(b.expr(e).kind, ExprKind::Store)
                    && b.expr(e).operands.first() == Some(&arg_v)
            })
        });
        assert!(clone_stores_arg);
    }
}
