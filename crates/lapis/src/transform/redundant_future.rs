//! Redundant future removal: a `Spawn` whose future object exists only to
//! carry the closure into the spawn gets rewritten to spawn the closure
//! directly.

use ahash::AHashSet;
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

pub fn run_on_func(b: &mut Builder, func: ValueId) {
    let body = b.func_body(func);
    visit_group_exprs_mut(b, body, &mut |bld, e| {
        if let Some((future, apply)) = check_spawn_with_future(bld, e) {
            rewrite_spawn_without_future(bld, e, future, apply);
            debug!(
                target: "lapis::redundant_future",
                at = %bld.expr(e).loc,
                "spawn optimised, redundant future removed"
            );
        }
        VisitResult::Continue
    });
}

/// A candidate spawn takes a freshly allocated future whose only other
/// user is the future's init `Apply` (plus, optionally, a debug binding).
fn check_spawn_with_future(b: &Builder, e: ExprId) -> Option<(ValueId, ExprId)> {
    let ExprKind::Spawn { execute_closure } = b.expr(e).kind else { return None };
    if execute_closure {
        return None;
    }
    let future = b.expr(e).operands[0];
    if !b.value(future).is_local_var() {
        return None;
    }
    let mut users: AHashSet<ExprId> = b.value(future).users.iter().copied().collect();
    if users.len() == 3 {
        // allocation, spawn, and a debug binding: drop the binding
        if let Some(dbg) = b.debug_expr_of(future) {
            users.remove(&dbg);
        }
    }
    if users.len() == 2 {
        users.remove(&e);
    }
    if users.len() != 1 {
        return None;
    }
    let apply = users.into_iter().next().expect("one user remains");
    matches!(b.expr(apply).kind, ExprKind::Apply { .. }).then_some((future, apply))
}

/// ```text
/// %a: Future  = Allocate()
/// %b: FuncTy  = Lambda()
/// %c          = Apply(Future::init, %a, %b)
/// %d          = Spawn(%a)
/// ```
/// becomes `%b = Lambda(); %d = Spawn(%b)` with the execute-closure flag
/// set.
fn rewrite_spawn_without_future(b: &mut Builder, spawn: ExprId, future: ValueId, apply: ExprId) {
    let closure = b.expr(apply).operands[2];
    debug_assert!(b.ty(b.value(closure).ty).is_func());

    let future_def = b.value(future).defining_expr().expect("future is a local var");
    let scope = b.parent_group_of(spawn);
    b.remove_self_from_block(apply);
    b.replace_value_uses(future, closure, scope);
    b.remove_self_from_block(future_def);
    if let ExprKind::Spawn { execute_closure } = &mut b.expr_mut(spawn).kind {
        *execute_closure = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{CustomDef, CustomDefKind};
    use crate::value::FuncKind;

    #[test]
    fn test_spawn_takes_closure_directly() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);

        // a Future class and its init
        let future_def = b.create_def(CustomDef {
            src_name: "Future".into(),
            mangled_name: "_LFuture".into(),
            package: "std.core".into(),
            generic_params: vec![],
            instance_vars: vec![],
            static_vars: vec![],
            methods: vec![],
            vtable: Default::default(),
            kind: CustomDefKind::Class {
                super_class: None,
                interfaces: vec![],
                finalizer: None,
                abstract_methods: vec![],
                is_interface: false,
            },
            imported: false,
        });
        let future_ty = b.custom_ty(future_def, vec![]);
        let future_ref = b.ref_to(future_ty);

        let init_ty = b.func_ty(vec![future_ref, fty], unit);
        let init = b.create_func("init", init_ty, FuncKind::Constructor, "std.core");
        let init_body = b.func_body(init);
        let init_entry = b.create_block(init_body);
        b.create_exit(init_entry);

        let alloc = b.create_allocate(future_ty, entry);
        let future = b.expr(alloc).result.unwrap();
        let lambda = b.create_lambda("task", fty, entry);
        let lam_body = b.expr(lambda).lambda_body().unwrap();
        let lam_entry = b.create_block(lam_body);
        b.create_exit(lam_entry);
        let closure = b.expr(lambda).result.unwrap();
        b.create_apply(init, &[future, closure], unit, entry);
        let spawn = b.create_spawn(future, future_ref, entry);
        b.create_exit(entry);

        run_on_func(&mut b, f);

        assert!(matches!(b.expr(spawn).kind, ExprKind::Spawn { execute_closure: true }));
        assert_eq!(b.expr(spawn).operands.as_slice(), &[closure]);
        assert!(b.expr(alloc).parent.is_none());
    }

    #[test]
    fn test_spawn_with_escaping_future_is_kept() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let alloc = b.create_allocate(i64t, entry);
        let future = b.expr(alloc).result.unwrap();
        // an extra load makes the future observable
        b.create_load(future, entry);
        let spawn = b.create_spawn(future, i64t, entry);
        b.create_exit(entry);

        run_on_func(&mut b, f);
        assert!(matches!(b.expr(spawn).kind, ExprKind::Spawn { execute_closure: false }));
        assert!(b.expr(alloc).parent.is_some());
    }
}
