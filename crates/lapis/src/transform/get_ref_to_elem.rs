//! GetRef-to-array-element: when an unchecked array read feeds only
//! `Field` projections, take a reference to the element instead and load
//! the projected members through it.

use crate::builder::Builder;
use crate::expr::{ExprKind, IntrinsicKind};
use crate::package::Package;
use crate::value::{Attributes, ValueId};

pub fn run_on_package(b: &mut Builder, package: &Package) {
    for func in package.global_funcs() {
        run_on_func(b, func);
    }
}

pub fn run_on_func(b: &mut Builder, func: ValueId) {
    let body = b.func_body(func);
    let blocks = b.group(body).blocks.clone();
    for block in blocks {
        let exprs = b.block(block).exprs.clone();
        for e in exprs {
            if !matches!(b.expr(e).kind, ExprKind::Intrinsic { kind: IntrinsicKind::ArrayGetUnchecked }) {
                continue;
            }
            let Some(res) = b.expr(e).result else { continue };
            let users = b.value(res).users.clone();
            if users.is_empty()
                || !users.iter().all(|u| matches!(b.expr(*u).kind, ExprKind::Field { .. }))
            {
                continue;
            }

            let elem_ty = b.value(res).ty;
            let elem_ref_ty = b.ref_to(elem_ty);
            let operands: Vec<ValueId> = b.expr(e).operands.to_vec();
            let parent = b.expr(e).parent.expect("intrinsic lives in a block");
            let loc = b.expr(e).loc;
            let array_get_ref = b.create_intrinsic(
                IntrinsicKind::ArrayGetRefUnchecked,
                &operands,
                elem_ref_ty,
                parent,
            );
            b.expr_mut(array_get_ref).loc = loc;
            let ref_res = b.expr(array_get_ref).result.expect("intrinsic has a result");

            for user in users {
                let ExprKind::Field { path } = b.expr(user).kind.clone() else { unreachable!() };
                let field_res = b.expr(user).result.expect("field has a result");
                let field_ty = b.value(field_res).ty;
                let field_ref_ty = b.ref_to(field_ty);
                let user_parent = b.expr(user).parent.expect("field lives in a block");
                let user_loc = b.expr(user).loc;
                let get_elem_ref =
                    b.create_get_element_ref(ref_res, &path, field_ref_ty, user_parent);
                b.expr_mut(get_elem_ref).loc = user_loc;
                let ger_res = b.expr(get_elem_ref).result.expect("get-element-ref has a result");
                b.value_mut(ger_res).attrs |= Attributes::READONLY;
                let load = b.create_load(ger_res, user_parent);
                b.expr_mut(load).loc = user_loc;
                b.move_before(get_elem_ref, user);
                b.move_before(load, user);
                b.replace_with(user, load);
            }
            b.move_before(array_get_ref, e);
            b.replace_with(e, array_get_ref);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FuncKind;

    #[test]
    fn test_field_only_array_get_becomes_ref_and_load() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let pair_ty = b.tuple_ty(vec![i64t, i64t]);
        let arr_ty = b.raw_array_ty(pair_ty);
        let arr_ref = b.ref_to(arr_ty);

        let arr_alloc = b.create_allocate(arr_ty, entry);
        let arr = b.expr(arr_alloc).result.unwrap();
        let _ = arr_ref;
        let idx_c = b.create_constant(crate::value::Literal::Int(0), i64t, entry);
        let idx = b.expr(idx_c).result.unwrap();
        let get = b.create_intrinsic(IntrinsicKind::ArrayGetUnchecked, &[arr, idx], pair_ty, entry);
        let elem = b.expr(get).result.unwrap();
        let field = b.create_field(elem, &[1], i64t, entry);
        let field_res = b.expr(field).result.unwrap();
        let sink_ty = b.tuple_ty(vec![i64t]);
        let consumer = b.create_tuple(&[field_res], sink_ty, entry);
        b.create_exit(entry);

        run_on_func(&mut b, f);

        // the old load-then-project chain is gone
        assert!(b.expr(get).parent.is_none());
        assert!(b.expr(field).parent.is_none());
        let kinds: Vec<&'static str> =
            b.block(entry).exprs.iter().map(|e| b.expr(*e).kind.name()).collect();
        assert!(kinds.contains(&"GetElementRef"));
        assert!(kinds.contains(&"Load"));
        // the consumer now reads the load's result
        let load_feeds_consumer = b.block(entry).exprs.iter().any(|&e| {
            matches!(b.expr(e).kind, ExprKind::Load)
                && b.expr(e).result.is_some_and(|r| b.value(r).users.contains(&consumer))
        });
        assert!(load_feeds_consumer);
    }
}
