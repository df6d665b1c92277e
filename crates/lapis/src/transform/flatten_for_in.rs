//! Flattening of structured `for .. in` expressions into plain blocks.
//!
//! Each `ForIn` owns three nested groups (body, latch, cond). The pass
//! moves their blocks into the enclosing group, turns every nested `Exit`
//! into a `GoTo` along the variant's wiring, and introduces a jump block
//! that reads the loop-condition variable and branches between the loop
//! and the continuation. The closed-range variant runs its body before
//! the condition, so its branch lives in a dedicated latch-entry block.

use crate::block::{BlockGroupId, BlockId};
use crate::builder::Builder;
use crate::expr::{ExprId, ExprKind, ForInKind};
use crate::package::Package;
use crate::value::{Attributes, ValueId};

pub fn run_on_package(b: &mut Builder, package: &Package) {
    for func in package.global_funcs() {
        run_on_func(b, func);
    }
}

pub fn run_on_func(b: &mut Builder, func: ValueId) {
    if b.value(func).attrs.contains(Attributes::SKIP_ANALYSIS) {
        return;
    }
    let body = b.func_body(func);
    run_on_group(b, body);
}

fn run_on_group(b: &mut Builder, group: BlockGroupId) {
    // flattening splits blocks and rehomes others; restart until no
    // structured loop remains in this group
    loop {
        let mut flattened = false;
        let blocks = b.group(group).blocks.clone();
        'scan: for block in blocks {
            let exprs = b.block(block).exprs.clone();
            for e in exprs {
                match &b.expr(e).kind {
                    ExprKind::Lambda(_) => {
                        let lam_body = b.expr(e).lambda_body().expect("lambda has a body");
                        run_on_group(b, lam_body);
                    }
                    ExprKind::ForIn(_) => {
                        let nested_body = b.expr(e).for_in_body();
                        run_on_group(b, nested_body);
                        // the latch may hold arbitrary code once a next()
                        // call has been inlined into it
                        let nested_latch = b.expr(e).for_in_latch();
                        run_on_group(b, nested_latch);
                        flatten_for_in(b, e);
                        flattened = true;
                        break 'scan;
                    }
                    _ => {}
                }
            }
        }
        if !flattened {
            return;
        }
    }
}

fn flatten_for_in(b: &mut Builder, e: ExprId) {
    let ExprKind::ForIn(kind) = b.expr(e).kind else { unreachable!("not a for-in") };
    if kind == ForInKind::ClosedRange {
        return flatten_closed_range(b, e);
    }
    let parent_block = b.expr(e).parent.expect("for-in lives in a block");
    let group = b.block(parent_block).parent;
    let continuation = move_expressions_after(b, e);

    let body_group = b.expr(e).for_in_body();
    let latch_group = b.expr(e).for_in_latch();
    let cond_group = b.expr(e).for_in_cond();
    let body_entry = b.group(body_group).entry_block();
    let latch_entry = b.group(latch_group).entry_block();
    let cond_entry = b.group(cond_group).entry_block();
    let loop_cond_var = b.expr(e).for_in_loop_cond_var();
    let loc = b.expr(e).loc;

    // the jump block re-tests the loop condition between iterations
    let jump_block = b.create_block(group);
    let load = b.create_load(loop_cond_var, jump_block);
    b.expr_mut(load).loc = loc;
    let cond_val = b.expr(load).result.expect("load has a result");
    let branch = b.create_branch(cond_val, body_entry, continuation, jump_block);
    b.expr_mut(branch).loc = loc;

    match kind {
        ForInKind::Range => {
            replace_exits_with_goto(b, cond_group, jump_block);
            replace_exits_with_goto(b, body_group, latch_entry);
            replace_exits_with_goto(b, latch_group, cond_entry);
        }
        ForInKind::Iter => {
            replace_exits_with_goto(b, latch_group, cond_entry);
            replace_exits_with_goto(b, cond_group, body_entry);
            replace_exits_with_goto(b, body_group, jump_block);
        }
        ForInKind::ClosedRange => unreachable!(),
    }

    let loop_entry = b.group(b.expr(e).execution_order()[0]).entry_block();
    b.create_goto(loop_entry, parent_block);
    move_blocks_to_parent(b, e, group);
    b.remove_self_from_block(e);
}

/// ```text
/// #parent:        ... GoTo(#body)
/// #body:          loop body        GoTo(#cond)
/// #cond:          cond = i != b    GoTo(#latch-entry)
/// #latch-entry:   %c = Load(cond)  Branch(%c, #latch, #continuation)
/// #latch:         iter = i + 1     GoTo(#body)
/// ```
/// The inclusive upper bound makes this do-while-like: the body runs
/// before the condition is consulted.
fn flatten_closed_range(b: &mut Builder, e: ExprId) {
    let parent_block = b.expr(e).parent.expect("for-in lives in a block");
    let group = b.block(parent_block).parent;
    let continuation = move_expressions_after(b, e);

    let body_group = b.expr(e).for_in_body();
    let latch_group = b.expr(e).for_in_latch();
    let cond_group = b.expr(e).for_in_cond();
    let body_entry = b.group(body_group).entry_block();
    let latch_entry_old = b.group(latch_group).entry_block();
    let cond_entry = b.group(cond_group).entry_block();
    let loop_cond_var = b.expr(e).for_in_loop_cond_var();
    let loc = b.expr(e).loc;

    debug_assert!(b.block_terminator(parent_block).is_none());
    let loop_entry = b.group(b.expr(e).execution_order()[0]).entry_block();
    b.create_goto(loop_entry, parent_block);

    replace_exits_with_goto(b, body_group, cond_entry);
    let branch_block = b.create_block(group);
    replace_exits_with_goto(b, cond_group, branch_block);
    let load = b.create_load(loop_cond_var, branch_block);
    b.expr_mut(load).loc = loc;
    let cond_val = b.expr(load).result.expect("load has a result");
    let branch = b.create_branch(cond_val, latch_entry_old, continuation, branch_block);
    b.expr_mut(branch).loc = loc;
    replace_exits_with_goto(b, latch_group, body_entry);

    move_blocks_to_parent(b, e, group);
    b.remove_self_from_block(e);
}

/// Moves everything after the `ForIn` into a fresh block that serves as
/// the common continuation once the loop finishes.
fn move_expressions_after(b: &mut Builder, e: ExprId) -> BlockId {
    let parent_block = b.expr(e).parent.expect("for-in lives in a block");
    let group = b.block(parent_block).parent;
    let continuation = b.create_block(group);
    let exprs = b.block(parent_block).exprs.clone();
    let pos = exprs.iter().position(|x| *x == e).expect("for-in is in its parent block");
    for &moved in &exprs[pos + 1..] {
        b.move_expr_to(moved, continuation);
    }
    continuation
}

fn replace_exits_with_goto(b: &mut Builder, group: BlockGroupId, target: BlockId) {
    let blocks = b.group(group).blocks.clone();
    for block in blocks {
        let Some(term) = b.block_terminator(block) else { continue };
        if matches!(b.expr(term).kind, ExprKind::Exit) {
            let loc = b.expr(term).loc;
            b.remove_self_from_block(term);
            let goto = b.create_goto(target, block);
            b.expr_mut(goto).loc = loc;
        }
    }
}

fn move_blocks_to_parent(b: &mut Builder, e: ExprId, parent_group: BlockGroupId) {
    for nested in b.expr(e).execution_order() {
        for block in b.group(nested).blocks.clone() {
            b.move_block_to_group(block, parent_group);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockGroupOwner;
    use crate::value::{FuncKind, Literal};

    /// Builds the structured shape of `for i in 0..3 { .. }` and checks
    /// the flattened control flow.
    #[test]
    fn test_flatten_range_introduces_jump_block() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body_group = b.func_body(f);
        let entry = b.create_block(body_group);

        let i64t = b.int64_ty();
        let boolt = b.bool_ty();
        let iter_alloc = b.create_allocate(i64t, entry);
        let iter_var = b.expr(iter_alloc).result.unwrap();
        let cond_alloc = b.create_allocate(boolt, entry);
        let cond_var = b.expr(cond_alloc).result.unwrap();

        let for_in = b.create_expression(
            ExprKind::ForIn(ForInKind::Range),
            smallvec::SmallVec::from_slice(&[iter_var, cond_var]),
            Some(unit),
            entry,
            crate::diag::DebugLocation::INVALID,
        );
        let body = b.create_block_group(BlockGroupOwner::Expr(for_in));
        let latch = b.create_block_group(BlockGroupOwner::Expr(for_in));
        let cond = b.create_block_group(BlockGroupOwner::Expr(for_in));
        b.attach_group(for_in, body);
        b.attach_group(for_in, latch);
        b.attach_group(for_in, cond);

        let body_block = b.create_block(body);
        b.create_load(iter_var, body_block);
        b.create_exit(body_block);
        let latch_block = b.create_block(latch);
        let one = b.create_constant(Literal::Int(1), i64t, latch_block);
        let one_v = b.expr(one).result.unwrap();
        b.create_store(one_v, iter_var, latch_block);
        b.create_exit(latch_block);
        let cond_block = b.create_block(cond);
        let t = b.create_bool_literal(true, cond_block);
        let t_v = b.expr(t).result.unwrap();
        b.create_store(t_v, cond_var, cond_block);
        b.create_exit(cond_block);

        // the continuation after the loop
        let unit_res = b.create_unit_literal(entry);
        let _ = unit_res;
        b.create_exit(entry);

        run_on_func(&mut b, f);

        // no ForIn remains anywhere in the body
        let mut found_for_in = false;
        let mut pre = |bld: &Builder, e: ExprId| {
            if matches!(bld.expr(e).kind, ExprKind::ForIn(_)) {
                found_for_in = true;
            }
            crate::visitor::VisitResult::Continue
        };
        let mut post = |_: &Builder, _: ExprId| crate::visitor::VisitResult::Continue;
        crate::visitor::visit_group_exprs(&b, body_group, &mut pre, &mut post);
        assert!(!found_for_in);

        // a jump block loads the cond var and branches body vs continuation
        let jump = b.group(body_group).blocks.iter().copied().find(|&blk| {
            let exprs = &b.block(blk).exprs;
            exprs.len() == 2
                && matches!(b.expr(exprs[0]).kind, ExprKind::Load)
                && b.expr(exprs[0]).operands.first() == Some(&cond_var)
                && matches!(b.expr(exprs[1]).kind, ExprKind::Branch)
        });
        let jump = jump.expect("jump block exists");
        let branch = b.block_terminator(jump).unwrap();
        assert_eq!(b.expr(branch).successors()[0], body_block);

        // the latch jumps back to the cond block
        let latch_term = b.block_terminator(latch_block).unwrap();
        assert!(matches!(b.expr(latch_term).kind, ExprKind::GoTo));
        assert_eq!(b.expr(latch_term).successors()[0], cond_block);

        // every moved block now lives in the function body group
        for blk in [body_block, latch_block, cond_block, jump] {
            assert_eq!(b.block(blk).parent, body_group);
        }
    }
}
