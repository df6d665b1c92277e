//! Array-lambda optimisation: `arrayInitByFunction` with a lambda that
//! only ever returns one constant becomes `RawArrayInitByValue`; a
//! by-value init whose value is the runtime's zero value disappears
//! entirely.

use ahash::AHashSet;
use tracing::debug;

use crate::builder::Builder;
use crate::expr::{ExprId, ExprKind, IntrinsicKind};
use crate::package::Package;
use crate::value::{Literal, ValueId};
use crate::visitor::{VisitResult, visit_group_exprs_mut};

use super::{FuncInfo, NOT_CARE, is_expected_function};

const ARRAY_INIT_FUNC: FuncInfo = FuncInfo::new("arrayInitByFunction", NOT_CARE, "std.core");

pub fn run_on_package(b: &mut Builder, package: &Package) {
    for func in package.global_funcs() {
        run_on_func(b, func);
    }
}

pub fn run_on_func(b: &mut Builder, func: ValueId) {
    let body = b.func_body(func);
    visit_group_exprs_mut(b, body, &mut |bld, e| {
        if let Some(constant) = check_can_rewrite_lambda(bld, e) {
            rewrite_array_init(bld, e, constant);
            debug!(
                target: "lapis::array_lambda",
                at = %bld.expr(e).loc,
                "arrayInitByFunction optimised to a by-value init"
            );
        } else if let Some(zero) = check_can_rewrite_zero_value(bld, e) {
            rewrite_zero_value(bld, e, zero);
            debug!(
                target: "lapis::array_lambda",
                at = %bld.expr(e).loc,
                "by-value init deleted, the item is the zero value"
            );
        }
        VisitResult::Continue
    });
}

/// An `Apply` of `arrayInitByFunction` whose init closure is a lambda
/// returning a single constant.
fn check_can_rewrite_lambda(b: &Builder, e: ExprId) -> Option<ExprId> {
    if !matches!(b.expr(e).kind, ExprKind::Apply { .. }) {
        return None;
    }
    let callee = b.expr(e).callee()?;
    if !b.value(callee).is_func_with_body() || !is_expected_function(b, callee, &ARRAY_INIT_FUNC) {
        return None;
    }
    let args = b.expr(e).call_args();
    debug_assert_eq!(args.len(), 2);
    let closure_var = *args.get(1)?;
    if !b.value(closure_var).is_local_var() {
        return None;
    }
    let closure = b.value(closure_var).defining_expr()?;
    if !b.expr(closure).is_lambda() {
        return None;
    }
    check_lambda_returns_const(b, closure)
}

/// The lambda must be a single block holding nothing but its return-slot
/// allocation, the constant, the store, debug bindings, and the exit.
fn check_lambda_returns_const(b: &Builder, lambda: ExprId) -> Option<ExprId> {
    let data = b.expr(lambda).lambda_data()?;
    let ret = data.ret_value?;
    let ret_alloc = b.value(ret).defining_expr()?;
    debug_assert!(matches!(b.expr(ret_alloc).kind, ExprKind::Allocate { .. }));
    let users = &b.value(ret).users;
    if users.len() != 1 {
        return None;
    }
    let store = users[0];
    if !matches!(b.expr(store).kind, ExprKind::Store) {
        return None;
    }
    let ret_val = b.expr(store).operands[0];
    if !b.value(ret_val).is_local_var() {
        return None;
    }
    let constant = b.value(ret_val).defining_expr()?;
    if !b.expr(constant).is_constant() {
        return None;
    }

    let valid: AHashSet<ExprId> = AHashSet::from_iter([ret_alloc, store, constant]);
    let body = b.expr(lambda).lambda_body()?;
    let blocks = &b.group(body).blocks;
    if blocks.len() > 1 {
        return None;
    }
    for &e in &b.block(blocks[0]).exprs {
        if b.expr(e).is_debug() || b.expr(e).is_terminator() {
            continue;
        }
        if !valid.contains(&e) {
            return None;
        }
    }
    Some(constant)
}

fn rewrite_array_init(b: &mut Builder, apply: ExprId, constant: ExprId) {
    let raw_array = b.expr(apply).call_args()[0];
    // the array operand is the freshly allocated raw array; its size is
    // the allocation's first operand
    let array_def = b.value(raw_array).defining_expr().expect("raw array is a local var");
    let size = b.expr(array_def).operands[0];
    let parent = b.expr(apply).parent.expect("apply lives in a block");

    let lit = match &b.expr(constant).kind {
        ExprKind::Constant(lit) => lit.clone(),
        _ => unreachable!("checked to be a constant"),
    };
    let const_res = b.expr(constant).result.expect("constant has a result");
    let lit_ty = b.value(const_res).ty;
    let init_val = b.create_constant(lit, lit_ty, parent);
    let init_res = b.expr(init_val).result.expect("constant has a result");
    let unit = b.unit_ty();
    let new_init = b.create_expression(
        ExprKind::RawArrayInitByValue,
        smallvec::SmallVec::from_slice(&[raw_array, size, init_res]),
        Some(unit),
        parent,
        b.expr(apply).loc,
    );

    b.move_before(init_val, apply);
    b.move_before(new_init, apply);
    // the apply produced the array; its uses now read the array directly
    let scope = b.parent_group_of(apply);
    if let Some(old_res) = b.expr(apply).result {
        b.replace_value_uses(old_res, raw_array, scope);
    }
    b.remove_self_from_block(apply);
}

/// A `RawArrayInitByValue` whose init value is the `ObjectZeroValue`
/// intrinsic: zero-init is the runtime default.
fn check_can_rewrite_zero_value(b: &Builder, e: ExprId) -> Option<ExprId> {
    if !matches!(b.expr(e).kind, ExprKind::RawArrayInitByValue) {
        return None;
    }
    let init_val = *b.expr(e).operands.get(2)?;
    if !b.value(init_val).is_local_var() {
        return None;
    }
    let init_expr = b.value(init_val).defining_expr()?;
    matches!(b.expr(init_expr).kind, ExprKind::Intrinsic { kind: IntrinsicKind::ObjectZeroValue })
        .then_some(init_expr)
}

fn rewrite_zero_value(b: &mut Builder, init: ExprId, zero_val: ExprId) {
    debug_assert!(b.expr(init).result.is_none_or(|r| b.value(r).users.is_empty()));
    b.remove_self_from_block(init);

    let Some(res) = b.expr(zero_val).result else { return };
    let users = b.value(res).users.clone();
    if users.is_empty() {
        b.remove_self_from_block(zero_val);
    } else if users.len() == 1 && b.expr(users[0]).is_debug() {
        b.remove_self_from_block(users[0]);
        b.remove_self_from_block(zero_val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FuncKind;

    fn setup_array_init(b: &mut Builder) -> (ValueId, crate::block::BlockId, ValueId) {
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let arr_ty = b.raw_array_ty(i64t);
        let arr_ref = b.ref_to(arr_ty);
        let size_c = b.create_constant(Literal::Int(4), i64t, entry);
        let size = b.expr(size_c).result.unwrap();
        let alloc = b.create_expression(
            ExprKind::RawArrayAllocate { elem_ty: i64t },
            smallvec::SmallVec::from_slice(&[size]),
            Some(arr_ref),
            entry,
            crate::diag::DebugLocation::INVALID,
        );
        let arr = b.expr(alloc).result.unwrap();
        (f, entry, arr)
    }

    #[test]
    fn test_constant_lambda_becomes_by_value_init() {
        let mut b = Builder::new();
        let (f, entry, arr) = setup_array_init(&mut b);
        let unit = b.unit_ty();
        let i64t = b.int64_ty();
        let arr_ref = b.value(arr).ty;

        // arrayInitByFunction(arr, lambda) with `lambda = { ret 7 }`
        let lam_fty = b.func_ty(vec![], i64t);
        let init_fty = b.func_ty(vec![arr_ref, lam_fty], unit);
        let init_fn = b.create_func("arrayInitByFunction", init_fty, FuncKind::Default, "std.core");
        let init_body = b.func_body(init_fn);
        let init_entry = b.create_block(init_body);
        b.create_exit(init_entry);

        let lambda = b.create_lambda("init", lam_fty, entry);
        let lam_body = b.expr(lambda).lambda_body().unwrap();
        let lam_entry = b.create_block(lam_body);
        let ret_alloc = b.create_allocate(i64t, lam_entry);
        let ret_slot = b.expr(ret_alloc).result.unwrap();
        let seven = b.create_constant(Literal::Int(7), i64t, lam_entry);
        let seven_v = b.expr(seven).result.unwrap();
        b.create_store(seven_v, ret_slot, lam_entry);
        b.create_exit(lam_entry);
        if let ExprKind::Lambda(data) = &mut b.expr_mut(lambda).kind {
            data.ret_value = Some(ret_slot);
        }

        let closure = b.expr(lambda).result.unwrap();
        let apply = b.create_apply(init_fn, &[arr, closure], arr_ref, entry);
        b.create_exit(entry);

        run_on_func(&mut b, f);

        assert!(b.expr(apply).parent.is_none());
        let has_by_value = b
            .block(entry)
            .exprs
            .iter()
            .any(|e| matches!(b.expr(*e).kind, ExprKind::RawArrayInitByValue));
        assert!(has_by_value);
    }

    #[test]
    fn test_zero_value_init_is_deleted() {
        let mut b = Builder::new();
        let (f, entry, arr) = setup_array_init(&mut b);
        let unit = b.unit_ty();
        let i64t = b.int64_ty();
        let size = b.expr(b.value(arr).defining_expr().unwrap()).operands[0];
        let zero = b.create_intrinsic(IntrinsicKind::ObjectZeroValue, &[], i64t, entry);
        let zero_v = b.expr(zero).result.unwrap();
        let init = b.create_expression(
            ExprKind::RawArrayInitByValue,
            smallvec::SmallVec::from_slice(&[arr, size, zero_v]),
            Some(unit),
            entry,
            crate::diag::DebugLocation::INVALID,
        );
        b.create_exit(entry);

        run_on_func(&mut b, f);
        assert!(b.expr(init).parent.is_none());
        assert!(b.expr(zero).parent.is_none());
    }
}
