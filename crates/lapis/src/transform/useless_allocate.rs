//! Useless allocation elimination: drop allocations that are only ever
//! written, never read, passed, or returned.

use tracing::debug;

use crate::builder::Builder;
use crate::expr::ExprKind;
use crate::package::Package;
use crate::value::ValueId;

pub fn run_on_package(b: &mut Builder, package: &Package) {
    for func in package.global_funcs() {
        run_on_func(b, func);
    }
}

pub fn run_on_func(b: &mut Builder, func: ValueId) {
    let body = b.func_body(func);
    let ret_value = b.value(func).func_data().and_then(|d| d.ret_value);
    let blocks = b.group(body).blocks.clone();
    for block in blocks {
        let exprs = b.block(block).exprs.clone();
        for e in exprs {
            let ExprKind::Allocate { ty } = b.expr(e).kind else { continue };
            // a finalizer observes the allocation even if nothing reads it
            if let Some((def, _)) = b.custom_def_of(ty) {
                if b.def(def).finalizer().is_some() {
                    continue;
                }
            }
            let Some(res) = b.expr(e).result else { continue };
            if ret_value == Some(res) {
                continue;
            }
            let users = b.value(res).users.clone();
            let only_written = users.iter().all(|&u| match &b.expr(u).kind {
                ExprKind::Store | ExprKind::StoreElementRef { .. } => {
                    b.expr(u).operands.get(1).copied() == Some(res)
                }
                ExprKind::Debug { .. } => true,
                _ => false,
            });
            if only_written {
                b.remove_self_from_block(e);
                for user in users {
                    b.remove_self_from_block(user);
                }
                debug!(target: "lapis::useless_allocate", at = %b.expr(e).loc, "allocate and its users deleted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FuncKind, Literal};

    #[test]
    fn test_store_only_allocation_is_removed() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let alloc = b.create_allocate(i64t, entry);
        let slot = b.expr(alloc).result.unwrap();
        let c = b.create_constant(Literal::Int(5), i64t, entry);
        let cv = b.expr(c).result.unwrap();
        let store = b.create_store(cv, slot, entry);
        b.create_exit(entry);

        run_on_func(&mut b, f);

        assert!(b.expr(alloc).parent.is_none());
        assert!(b.expr(store).parent.is_none());
        // the constant stays; only the allocation chain goes
        assert!(b.expr(c).parent.is_some());
    }

    #[test]
    fn test_loaded_allocation_stays() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let alloc = b.create_allocate(i64t, entry);
        let slot = b.expr(alloc).result.unwrap();
        let c = b.create_constant(Literal::Int(5), i64t, entry);
        let cv = b.expr(c).result.unwrap();
        b.create_store(cv, slot, entry);
        b.create_load(slot, entry);
        b.create_exit(entry);

        run_on_func(&mut b, f);
        assert!(b.expr(alloc).parent.is_some());
    }

    #[test]
    fn test_store_of_slot_into_other_location_keeps_allocation() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let ref_i64 = b.ref_to(i64t);
        let inner = b.create_allocate(i64t, entry);
        let inner_slot = b.expr(inner).result.unwrap();
        let outer = b.create_allocate(ref_i64, entry);
        let outer_slot = b.expr(outer).result.unwrap();
        // the inner slot escapes as a stored value, not a store target
        b.create_store(inner_slot, outer_slot, entry);
        b.create_exit(entry);

        run_on_func(&mut b, f);
        assert!(b.expr(inner).parent.is_some());
    }
}
