//! Unit unification: collapse every used `Unit`-typed result onto one
//! canonical unit literal per function body.

use tracing::debug;

use crate::builder::Builder;
use crate::expr::{ExprId, ExprKind};
use crate::package::Package;
use crate::value::ValueId;
use crate::visitor::{VisitResult, visit_group_exprs_mut};

pub fn run_on_package(b: &mut Builder, package: &Package) {
    for func in package.global_funcs() {
        run_on_func(b, func);
    }
}

fn needs_unify(b: &Builder, e: ExprId) -> bool {
    let Some(res) = b.expr(e).result else { return false };
    if !b.ty(b.value(res).ty).is_unit() {
        return false;
    }
    if b.value(res).users.is_empty() {
        return false;
    }
    if let ExprKind::Constant(lit) = &b.expr(e).kind {
        if lit.is_null() || lit.is_unit() {
            return false;
        }
    }
    true
}

pub fn run_on_func(b: &mut Builder, func: ValueId) {
    let mut canonical_unit: Option<ExprId> = None;
    let body = b.func_body(func);
    visit_group_exprs_mut(b, body, &mut |bld, e| {
        if matches!(bld.expr(e).kind, ExprKind::GetRtti | ExprKind::GetRttiStatic) {
            return VisitResult::Continue;
        }
        if needs_unify(bld, e) {
            let group = bld.parent_group_of(e).expect("expression lives in a group");
            let unit = load_or_create_unit(bld, &mut canonical_unit, group);
            let old_res = bld.expr(e).result.expect("unify target has a result");
            let new_res = bld.expr(unit).result.expect("unit literal has a result");
            bld.replace_value_uses(old_res, new_res, Some(group));
            debug!(target: "lapis::unit_unify", at = %bld.expr(e).loc, "unit unify");
        }
        VisitResult::Continue
    });
}

/// Places the canonical unit literal at the head of the enclosing body's
/// entry block, once.
fn load_or_create_unit(b: &mut Builder, canonical: &mut Option<ExprId>, group: crate::block::BlockGroupId) -> ExprId {
    if let Some(existing) = *canonical {
        return existing;
    }
    let entry = b.group(group).entry_block();
    let unit = b.create_unit_literal(entry);
    let first = b.block(entry).exprs[0];
    if first != unit {
        b.move_before(unit, first);
    }
    *canonical = Some(unit);
    unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FuncKind, Literal};

    /// Three used unit-typed expressions collapse onto one literal at the
    /// entry, replaced at every use site.
    #[test]
    fn test_unit_results_unify_to_one_literal() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();

        let alloc = b.create_allocate(i64t, entry);
        let slot = b.expr(alloc).result.unwrap();
        let c = b.create_constant(Literal::Int(1), i64t, entry);
        let cv = b.expr(c).result.unwrap();

        // three unit-producing stores, each with a consumer
        let mut stores = Vec::new();
        let mut users = Vec::new();
        for _ in 0..3 {
            let store = b.create_store(cv, slot, entry);
            let sres = b.expr(store).result.unwrap();
            let tup_ty = b.tuple_ty(vec![unit]);
            users.push(b.create_tuple(&[sres], tup_ty, entry));
            stores.push(store);
        }
        b.create_exit(entry);

        run_on_func(&mut b, f);

        // exactly one unit literal, sitting at the entry's head
        let first = b.block(entry).exprs[0];
        assert!(matches!(&b.expr(first).kind, ExprKind::Constant(Literal::Unit)));
        let unit_res = b.expr(first).result.unwrap();
        for user in users {
            assert_eq!(b.expr(user).operands.as_slice(), &[unit_res]);
        }
        // the store results lost their users
        for store in stores {
            let res = b.expr(store).result.unwrap();
            assert!(b.value(res).users.is_empty());
        }
        let unit_literals = b
            .block(entry)
            .exprs
            .iter()
            .filter(|e| matches!(&b.expr(**e).kind, ExprKind::Constant(Literal::Unit)))
            .count();
        assert_eq!(unit_literals, 1);
    }
}
