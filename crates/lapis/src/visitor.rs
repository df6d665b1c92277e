//! Pre/post walkers over expressions, blocks, and block groups.
//!
//! Walks descend through nested block groups of structured control flow
//! and lambdas in execution order. Return values steer the walk: continue,
//! skip the children of the current node, or stop outright. The `_mut`
//! variants snapshot id lists up front so callbacks may rewrite the graph
//! while walking; expressions detached by a callback are not descended
//! into, and nodes added during the walk are not visited.

use crate::block::{BlockGroupId, BlockId};
use crate::builder::Builder;
use crate::expr::ExprId;
use crate::value::ValueId;

/// Outcome of a visit action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    /// Continue to walk into child items.
    Continue,
    /// Continue walking, but don't enter child items.
    Skip,
    /// Stop walking immediately.
    Stop,
}

/// Walks every expression under `group`, pre- and post-order.
pub fn visit_group_exprs(
    b: &Builder,
    group: BlockGroupId,
    pre: &mut dyn FnMut(&Builder, ExprId) -> VisitResult,
    post: &mut dyn FnMut(&Builder, ExprId) -> VisitResult,
) -> VisitResult {
    for &block in &b.group(group).blocks {
        for &e in &b.block(block).exprs {
            if walk_expr(b, e, pre, post) == VisitResult::Stop {
                return VisitResult::Stop;
            }
        }
    }
    VisitResult::Continue
}

fn walk_expr(
    b: &Builder,
    e: ExprId,
    pre: &mut dyn FnMut(&Builder, ExprId) -> VisitResult,
    post: &mut dyn FnMut(&Builder, ExprId) -> VisitResult,
) -> VisitResult {
    match pre(b, e) {
        VisitResult::Stop => return VisitResult::Stop,
        VisitResult::Skip => return VisitResult::Continue,
        VisitResult::Continue => {}
    }
    for nested in b.expr(e).execution_order() {
        if visit_group_exprs(b, nested, pre, post) == VisitResult::Stop {
            return VisitResult::Stop;
        }
    }
    post(b, e)
}

/// Walks every expression under a function body, pre-order only.
pub fn visit_func_exprs(
    b: &Builder,
    func: ValueId,
    pre: &mut dyn FnMut(&Builder, ExprId) -> VisitResult,
) -> VisitResult {
    let mut post = |_: &Builder, _: ExprId| VisitResult::Continue;
    visit_group_exprs(b, b.func_body(func), pre, &mut post)
}

/// Walks every block under `group`, descending through nested groups.
pub fn visit_blocks(
    b: &Builder,
    group: BlockGroupId,
    pre: &mut dyn FnMut(&Builder, BlockId) -> VisitResult,
) -> VisitResult {
    for &block in &b.group(group).blocks {
        match pre(b, block) {
            VisitResult::Stop => return VisitResult::Stop,
            VisitResult::Skip => continue,
            VisitResult::Continue => {}
        }
        for &e in &b.block(block).exprs {
            for nested in b.expr(e).execution_order() {
                if visit_blocks(b, nested, pre) == VisitResult::Stop {
                    return VisitResult::Stop;
                }
            }
        }
    }
    VisitResult::Continue
}

/// Walks every block group nested under (and including) `group`.
pub fn visit_groups(
    b: &Builder,
    group: BlockGroupId,
    pre: &mut dyn FnMut(&Builder, BlockGroupId) -> VisitResult,
) -> VisitResult {
    match pre(b, group) {
        VisitResult::Stop => return VisitResult::Stop,
        VisitResult::Skip => return VisitResult::Continue,
        VisitResult::Continue => {}
    }
    for block in b.group(group).blocks.clone() {
        for e in b.block(block).exprs.clone() {
            for nested in b.expr(e).execution_order() {
                if visit_groups(b, nested, pre) == VisitResult::Stop {
                    return VisitResult::Stop;
                }
            }
        }
    }
    VisitResult::Continue
}

/// Mutable pre-order walk: the callback may rewrite the graph.
pub fn visit_group_exprs_mut(
    b: &mut Builder,
    group: BlockGroupId,
    f: &mut dyn FnMut(&mut Builder, ExprId) -> VisitResult,
) -> VisitResult {
    let blocks = b.group(group).blocks.clone();
    for block in blocks {
        let exprs = b.block(block).exprs.clone();
        for e in exprs {
            match f(b, e) {
                VisitResult::Stop => return VisitResult::Stop,
                VisitResult::Skip => continue,
                VisitResult::Continue => {}
            }
            if b.expr(e).parent.is_none() {
                // detached by the callback; nothing to descend into
                continue;
            }
            for nested in b.expr(e).execution_order() {
                if visit_group_exprs_mut(b, nested, f) == VisitResult::Stop {
                    return VisitResult::Stop;
                }
            }
        }
    }
    VisitResult::Continue
}

/// Mutable post-order walk: children first, then the node itself.
pub fn visit_group_exprs_mut_post(
    b: &mut Builder,
    group: BlockGroupId,
    f: &mut dyn FnMut(&mut Builder, ExprId) -> VisitResult,
) -> VisitResult {
    let blocks = b.group(group).blocks.clone();
    for block in blocks {
        let exprs = b.block(block).exprs.clone();
        for e in exprs {
            for nested in b.expr(e).execution_order() {
                if visit_group_exprs_mut_post(b, nested, f) == VisitResult::Stop {
                    return VisitResult::Stop;
                }
            }
            if f(b, e) == VisitResult::Stop {
                return VisitResult::Stop;
            }
        }
    }
    VisitResult::Continue
}

/// Mutable pre-order walk over a function body.
pub fn visit_func_exprs_mut(
    b: &mut Builder,
    func: ValueId,
    f: &mut dyn FnMut(&mut Builder, ExprId) -> VisitResult,
) -> VisitResult {
    let body = b.func_body(func);
    visit_group_exprs_mut(b, body, f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FuncKind, Literal};

    #[test]
    fn test_walk_visits_lambda_body() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let lam = b.create_lambda("anon", fty, entry);
        let lam_body = b.expr(lam).lambda_body().unwrap();
        let lam_entry = b.create_block(lam_body);
        let i64t = b.int64_ty();
        let inner = b.create_constant(Literal::Int(7), i64t, lam_entry);
        b.create_exit(lam_entry);
        b.create_exit(entry);

        let mut seen = Vec::new();
        visit_func_exprs(&b, f, &mut |_, e| {
            seen.push(e);
            VisitResult::Continue
        });
        assert!(seen.contains(&inner));
        assert!(seen.contains(&lam));
    }

    #[test]
    fn test_skip_prunes_children() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let lam = b.create_lambda("anon", fty, entry);
        let lam_body = b.expr(lam).lambda_body().unwrap();
        let lam_entry = b.create_block(lam_body);
        let i64t = b.int64_ty();
        let inner = b.create_constant(Literal::Int(7), i64t, lam_entry);
        b.create_exit(entry);

        let mut seen = Vec::new();
        visit_func_exprs(&b, f, &mut |bld, e| {
            seen.push(e);
            if bld.expr(e).is_lambda() { VisitResult::Skip } else { VisitResult::Continue }
        });
        assert!(!seen.contains(&inner));
    }
}
