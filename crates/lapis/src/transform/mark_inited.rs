//! Finalizer guard: mark whether a class instance finished construction.
//!
//! Every class with a finalizer receives a synthetic `hasInited: Bool`
//! instance field. Constructors store `false` on entry and `true` before
//! each `Exit`; the finalizer's entry is replaced with a guard that
//! short-circuits when the flag is still false, so a constructor that
//! threw never reaches user cleanup code over uninitialised members.
//! Imported classes receive the field too, keeping their layout aligned.

use crate::builder::Builder;
use crate::def::MemberVar;
use crate::expr::ExprKind;
use crate::package::Package;
use crate::ty::DefId;
use crate::value::{Attributes, ValueId};

pub fn run_on_package(b: &mut Builder, package: &Package) {
    // Any member added here is invisible to the exporter, so imported
    // classes never carry it in their metadata; add it to the mirror by
    // hand so later layouts agree.
    for &class in &package.imported_classes {
        if b.def(class).finalizer().is_some() {
            add_has_inited_field(b, class);
        }
    }

    for &class in &package.classes {
        let Some(finalizer) = b.def(class).finalizer() else { continue };
        add_has_inited_field(b, class);
        let index = [u64::try_from(b.all_instance_vars(class).len() - 1).expect("member index fits u64")];

        for method in b.def(class).methods.clone() {
            if b.value(method).is_func_with_body() && b.value(method).is_constructor() {
                init_has_inited_to_false(b, method, &index);
                reassign_has_inited_to_true(b, method, &index);
            }
        }

        // While doing incremental compilation the finalizer may be an
        // imported func; the guard then already exists on the other side.
        if b.value(finalizer).is_func_with_body() {
            add_guard_to_finalizer(b, finalizer, &index);
        }
    }
}

fn add_has_inited_field(b: &mut Builder, class: DefId) {
    let bool_ty = b.bool_ty();
    let mut member = MemberVar::new("hasInited", bool_ty);
    member.attrs |= Attributes::NO_REFLECT_INFO;
    b.def_mut(class).instance_vars.push(member);
}

fn init_has_inited_to_false(b: &mut Builder, init_func: ValueId, path: &[u64]) {
    let entry = b.func_entry_block(init_func);
    let this_arg = b.value(init_func).func_data().and_then(|d| d.params.first().copied());
    let this_arg = this_arg.expect("constructor has a receiver");
    let false_val = b.create_bool_literal(false, entry);
    let false_res = b.expr(false_val).result.expect("constant has a result");
    let store = b.create_store_element_ref(false_res, this_arg, path, entry);
    b.insert_expr_into_head(entry, store);
    b.insert_expr_into_head(entry, false_val);
}

fn reassign_has_inited_to_true(b: &mut Builder, init_func: ValueId, path: &[u64]) {
    let this_arg = b.value(init_func).func_data().and_then(|d| d.params.first().copied());
    let this_arg = this_arg.expect("constructor has a receiver");
    let body = b.func_body(init_func);
    for block in b.group(body).blocks.clone() {
        let Some(term) = b.block_terminator(block) else { continue };
        if !matches!(b.expr(term).kind, ExprKind::Exit) {
            continue;
        }
        b.remove_self_from_block(term);
        let true_val = b.create_bool_literal(true, block);
        let true_res = b.expr(true_val).result.expect("constant has a result");
        b.create_store_element_ref(true_res, this_arg, path, block);
        b.create_exit(block);
    }
}

fn add_guard_to_finalizer(b: &mut Builder, finalizer: ValueId, path: &[u64]) {
    let body = b.func_body(finalizer);
    let old_entry = b.group(body).entry_block();
    let this_arg = b.value(finalizer).func_data().and_then(|d| d.params.first().copied());
    let this_arg = this_arg.expect("finalizer has a receiver");

    let guard = b.create_block(body);
    let bool_ty = b.bool_ty();
    let bool_ref = b.ref_to(bool_ty);
    let flag_ref = b.create_get_element_ref(this_arg, path, bool_ref, guard);
    let flag_ref_res = b.expr(flag_ref).result.expect("get-element-ref has a result");
    let load = b.create_load(flag_ref_res, guard);
    let load_res = b.expr(load).result.expect("load has a result");

    let exit_block = b.create_block(body);
    b.create_exit(exit_block);
    b.create_branch(load_res, old_entry, exit_block, guard);
    b.set_entry_block(body, guard);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{CustomDef, CustomDefKind};
    use crate::value::FuncKind;

    fn make_class_with_finalizer(b: &mut Builder, pkg: &mut Package) -> (DefId, ValueId, ValueId) {
        let unit = b.unit_ty();
        let i64t = b.int64_ty();

        let class = b.create_def(CustomDef {
            src_name: "CA".into(),
            mangled_name: "_LCA".into(),
            package: "demo".into(),
            generic_params: vec![],
            instance_vars: vec![MemberVar::new("x", i64t)],
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
        let class_ty = b.custom_ty(class, vec![]);
        let this_ty = b.ref_to(class_ty);

        let ctor_ty = b.func_ty(vec![this_ty], unit);
        let ctor = b.create_func("init", ctor_ty, FuncKind::Constructor, "demo");
        b.value_mut(ctor).func_data_mut().unwrap().parent_def = Some(class);
        b.create_parameter(this_ty, crate::value::ParamOwner::Func(ctor));
        let ctor_body = b.func_body(ctor);
        let ctor_entry = b.create_block(ctor_body);
        b.create_exit(ctor_entry);

        let fin_ty = b.func_ty(vec![this_ty], unit);
        let fin = b.create_func("finalize", fin_ty, FuncKind::Finalizer, "demo");
        b.value_mut(fin).func_data_mut().unwrap().parent_def = Some(class);
        b.create_parameter(this_ty, crate::value::ParamOwner::Func(fin));
        let fin_body = b.func_body(fin);
        let fin_entry = b.create_block(fin_body);
        b.create_exit(fin_entry);

        b.def_mut(class).methods.push(ctor);
        if let CustomDefKind::Class { finalizer, .. } = &mut b.def_mut(class).kind {
            *finalizer = Some(fin);
        }
        pkg.classes.push(class);
        pkg.funcs.push(ctor);
        pkg.funcs.push(fin);
        (class, ctor, fin)
    }

    #[test]
    fn test_ctor_stores_flag_and_finalizer_is_guarded() {
        let mut b = Builder::new();
        let mut pkg = Package::new("demo");
        let (class, ctor, fin) = make_class_with_finalizer(&mut b, &mut pkg);

        run_on_package(&mut b, &pkg);

        // the synthetic field comes last
        let vars = b.all_instance_vars(class);
        assert_eq!(vars.last().unwrap().name, "hasInited");

        // ctor: entry starts with `false` then the flag store; the exit
        // path stores `true` right before leaving
        let entry = b.func_entry_block(ctor);
        let exprs = &b.block(entry).exprs;
        assert!(matches!(
            b.expr(exprs[0]).kind,
            ExprKind::Constant(crate::value::Literal::Bool(false))
        ));
        assert!(matches!(b.expr(exprs[1]).kind, ExprKind::StoreElementRef { .. }));
        let n = exprs.len();
        assert!(matches!(
            b.expr(exprs[n - 3]).kind,
            ExprKind::Constant(crate::value::Literal::Bool(true))
        ));
        assert!(matches!(b.expr(exprs[n - 2]).kind, ExprKind::StoreElementRef { .. }));
        assert!(matches!(b.expr(exprs[n - 1]).kind, ExprKind::Exit));

        // finalizer: the new entry loads the flag and branches to the old
        // body or straight out
        let fin_body = b.func_body(fin);
        let guard = b.group(fin_body).entry_block();
        let guard_exprs = &b.block(guard).exprs;
        assert!(matches!(b.expr(guard_exprs[0]).kind, ExprKind::GetElementRef { .. }));
        assert!(matches!(b.expr(guard_exprs[1]).kind, ExprKind::Load));
        assert!(matches!(b.expr(guard_exprs[2]).kind, ExprKind::Branch));
    }
}
