//! Boxing of recursion-inducing value types.
//!
//! A struct or enum whose transitive instance types contain the type
//! itself would need infinite layout. Offending members and constructor
//! payloads are rewritten to `Box<T>&`; afterwards every store into a
//! boxed slot gets a `Box` in front, every projection out of one gets an
//! `UnBox` behind, and `TypeCast`s to enum-payload tuples are retyped to
//! the boxed shape.

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::builder::Builder;
use crate::def::CustomDefKind;
use crate::expr::{ExprId, ExprKind};
use crate::package::Package;
use crate::subst::TypeSubst;
use crate::ty::{Type, TypeId};
use crate::visitor::{VisitResult, visit_group_exprs_mut};

pub fn run_on_package(b: &mut Builder, package: &Package) {
    create_box_for_recursion_enums(b, package);
    create_box_for_recursion_structs(b, package);
    insert_box_and_unbox_exprs(b, package);
}

// ===------------------------------------------------------------------===//
// Recursion detection and def rewriting
// ===------------------------------------------------------------------===//

fn is_expected_value_type(
    b: &mut Builder,
    expected: TypeId,
    current: TypeId,
    do_check: bool,
    visited: &mut AHashSet<TypeId>,
) -> bool {
    if do_check && current == expected {
        return true;
    }
    if !visited.insert(current) {
        return false;
    }
    match b.ty(current).clone() {
        Type::Custom(def_id, args) => {
            let subst: TypeSubst =
                b.def(def_id).generic_params.iter().copied().zip(args).collect();
            match &b.def(def_id).kind {
                CustomDefKind::Enum { ctors, .. } => {
                    let param_tys: Vec<TypeId> = ctors
                        .iter()
                        .filter_map(|c| match b.ty(c.func_ty) {
                            Type::Func(sig) => Some(sig.params.clone()),
                            _ => None,
                        })
                        .flatten()
                        .collect();
                    for ty in param_tys {
                        let inst = b.instantiate_type(ty, &subst);
                        if is_expected_value_type(b, expected, inst, true, visited) {
                            return true;
                        }
                    }
                    false
                }
                CustomDefKind::Struct { .. } => {
                    let member_tys: Vec<TypeId> =
                        b.def(def_id).instance_vars.iter().map(|m| m.ty).collect();
                    for ty in member_tys {
                        let inst = b.instantiate_type(ty, &subst);
                        if is_expected_value_type(b, expected, inst, true, visited) {
                            return true;
                        }
                    }
                    false
                }
                _ => false,
            }
        }
        Type::Tuple(elems) => {
            for ty in elems {
                if is_expected_value_type(b, expected, ty, true, visited) {
                    return true;
                }
            }
            false
        }
        _ => false,
    }
}

/// Whether `ty`'s layout would contain itself.
fn is_recursion_type(b: &mut Builder, ty: TypeId) -> bool {
    let mut visited = AHashSet::new();
    is_expected_value_type(b, ty, ty, false, &mut visited)
}

fn create_box_for_recursion_enums(b: &mut Builder, package: &Package) {
    for def_id in package.all_enum_defs() {
        let ctor_count = b.def(def_id).enum_ctors().len();
        for ctor_idx in 0..ctor_count {
            let func_ty = b.def(def_id).enum_ctors()[ctor_idx].func_ty;
            let Type::Func(sig) = b.ty(func_ty).clone() else { continue };
            let mut params = sig.params.clone();
            let mut has_recursion = false;
            for p in &mut params {
                if is_recursion_type(b, *p) {
                    has_recursion = true;
                    let boxed = b.box_of(*p);
                    *p = b.ref_to(boxed);
                }
            }
            if has_recursion {
                let new_ty = b.func_ty(params, sig.ret);
                if let CustomDefKind::Enum { ctors, .. } = &mut b.def_mut(def_id).kind {
                    ctors[ctor_idx].func_ty = new_ty;
                }
            }
        }
    }
}

fn create_box_for_recursion_structs(b: &mut Builder, package: &Package) {
    for def_id in package.all_struct_defs() {
        let member_count = b.def(def_id).instance_vars.len();
        for i in 0..member_count {
            let member_ty = b.def(def_id).instance_vars[i].ty;
            if is_recursion_type(b, member_ty) {
                let boxed = b.box_of(member_ty);
                let new_ty = b.ref_to(boxed);
                b.def_mut(def_id).instance_vars[i].ty = new_ty;
            }
        }
    }
}

// ===------------------------------------------------------------------===//
// Expression rewriting
// ===------------------------------------------------------------------===//

/// Whether `left` is (after stripping references) a `Box` of `right`, with
/// open generics treated as matching anything.
fn left_is_box_type_of_right(b: &Builder, left: TypeId, right: TypeId) -> bool {
    let left = b.strip_all_refs(left);
    let Type::Box(base) = b.ty(left) else { return false };
    generic_or_equal(b, *base, right)
}

fn generic_or_equal(b: &Builder, left: TypeId, right: TypeId) -> bool {
    let left = b.strip_all_refs(left);
    let right = b.strip_all_refs(right);
    if left == right {
        return true;
    }
    if b.ty(left).is_generic() {
        return true;
    }
    let lt = b.ty(left);
    let rt = b.ty(right);
    if std::mem::discriminant(lt) != std::mem::discriminant(rt) {
        return false;
    }
    if let (Type::Custom(ld, _), Type::Custom(rd, _)) = (lt, rt) {
        if ld != rd {
            return false;
        }
    }
    let largs = lt.type_args();
    let rargs = rt.type_args();
    if largs.len() != rargs.len() {
        return false;
    }
    largs.iter().zip(&rargs).all(|(l, r)| generic_or_equal(b, *l, *r))
}

fn target_type_at(b: &mut Builder, base: TypeId, path: &[u64]) -> TypeId {
    let mut ty = base;
    for &p in path {
        ty = b
            .field_of_type(ty, usize::try_from(p).expect("member path fits usize"))
            .expect("member path resolves within its type");
    }
    ty
}

fn store_element_ref_needs_box(b: &mut Builder, e: ExprId) -> bool {
    let location_ty = b.value(b.expr(e).operands[1]).ty;
    let path: Vec<u64> = match &b.expr(e).kind {
        ExprKind::StoreElementRef { path } => path.to_vec(),
        _ => return false,
    };
    let target = target_type_at(b, location_ty, &path);
    let src = b.value(b.expr(e).operands[0]).ty;
    left_is_box_type_of_right(b, target, src)
}

fn get_element_ref_needs_unbox(b: &mut Builder, e: ExprId) -> bool {
    let location_ty = b.value(b.expr(e).operands[0]).ty;
    let base = b.strip_all_refs(location_ty);
    // an element ref into an enum addresses the selector, never a payload
    if b.is_enum_ty(base) {
        return false;
    }
    let path: Vec<u64> = match &b.expr(e).kind {
        ExprKind::GetElementRef { path } => path.to_vec(),
        _ => return false,
    };
    let src = target_type_at(b, base, &path);
    let Some(res) = b.expr(e).result else { return false };
    let target = b.strip_all_refs(b.value(res).ty);
    if left_is_box_type_of_right(b, src, target) {
        let users = &b.value(res).users;
        return users.len() == 1 && matches!(b.expr(users[0]).kind, ExprKind::Load);
    }
    false
}

/// For a `Tuple` forming an enum value: the payload positions whose
/// constructor slot is boxed.
fn tuple_needs_box(b: &Builder, e: ExprId) -> Vec<usize> {
    let Some(res) = b.expr(e).result else { return Vec::new() };
    let res_ty = b.value(res).ty;
    let Some((def_id, _)) = b.custom_def_of(res_ty) else { return Vec::new() };
    if !b.is_enum_ty(res_ty) {
        return Vec::new();
    }
    let operands = &b.expr(e).operands;
    let Some(index) = b
        .value(operands[0])
        .defining_expr()
        .and_then(|d| match &b.expr(d).kind {
            ExprKind::Constant(lit) => lit.as_selector_index(),
            _ => None,
        })
    else {
        return Vec::new();
    };
    let ctors = b.def(def_id).enum_ctors();
    let Some(ctor) = ctors.get(index) else { return Vec::new() };
    let Type::Func(sig) = b.ty(ctor.func_ty) else { return Vec::new() };
    let args = &operands[1..];
    debug_assert_eq!(args.len(), sig.params.len());
    let mut boxed_positions = Vec::new();
    for (i, (&param, &arg)) in sig.params.iter().zip(args).enumerate() {
        if left_is_box_type_of_right(b, param, b.value(arg).ty) {
            boxed_positions.push(i + 1);
        }
    }
    boxed_positions
}

/// Result of inspecting one `Field` projection out of an enum-payload
/// `TypeCast`.
struct FieldCastFinding {
    cast: Option<(ExprId, Vec<usize>)>,
    field: Option<ExprId>,
}

/// ```text
/// enum E { A | B(Box<S>&) }
/// %1: Tuple<UInt32, S> = TypeCast(%0)
/// %2: S                = Field(%1, 1)
/// ```
/// must become a cast to `Tuple<UInt32, Box<S>&>`, a `Field` of the boxed
/// slot, and an `UnBox`. The cast is shared by all its projections, so it
/// is collected once and the fields remember whether their slot is boxed.
fn field_and_typecast_need_unbox(
    b: &Builder,
    field: ExprId,
    collected_casts: &[(ExprId, Vec<usize>)],
) -> FieldCastFinding {
    let none = FieldCastFinding { cast: None, field: None };
    let ExprKind::Field { path } = &b.expr(field).kind else { return none };
    if path.len() != 1 || path[0] == 0 {
        return none;
    }
    let index = usize::try_from(path[0]).expect("member path fits usize");
    let base = b.expr(field).operands[0];
    if !b.value(base).is_local_var() {
        return none;
    }
    let Some(cast) = b.value(base).defining_expr() else { return none };
    if !matches!(b.expr(cast).kind, ExprKind::TypeCast) {
        return none;
    }
    let src_ty = b.value(b.expr(cast).operands[0]).ty;
    if !b.is_enum_ty(src_ty) {
        return none;
    }
    let Some(cast_res) = b.expr(cast).result else { return none };
    let target_ty = b.value(cast_res).ty;
    let Type::Tuple(tuple_args) = b.ty(target_ty) else { return none };

    for (seen_cast, boxed) in collected_casts {
        if *seen_cast != cast {
            continue;
        }
        let field_hit = boxed.contains(&index).then_some(field);
        return FieldCastFinding { cast: None, field: field_hit };
    }

    let Some((def_id, _)) = b.custom_def_of(src_ty) else { return none };
    let payload_args = &tuple_args[1..];
    let mut boxed_path = Vec::new();
    let mut field_hit = None;
    for ctor in b.def(def_id).enum_ctors() {
        let Type::Func(sig) = b.ty(ctor.func_ty) else { continue };
        if sig.params.len() != payload_args.len() {
            continue;
        }
        for (i, (&param, &arg)) in sig.params.iter().zip(payload_args).enumerate() {
            if left_is_box_type_of_right(b, param, arg) {
                boxed_path.push(i + 1);
                if i + 1 == index {
                    field_hit = Some(field);
                }
            } else if !b.is_equal_or_subtype_of(param, arg) && !generic_or_equal(b, param, arg) {
                boxed_path.clear();
                field_hit = None;
                break;
            }
        }
        if !boxed_path.is_empty() {
            break;
        }
    }
    if boxed_path.is_empty() {
        none
    } else {
        FieldCastFinding { cast: Some((cast, boxed_path)), field: field_hit }
    }
}

fn field_needs_unbox(b: &mut Builder, e: ExprId) -> bool {
    let base_ty = b.value(b.expr(e).operands[0]).ty;
    if b.is_enum_ty(base_ty) {
        return false;
    }
    let path: Vec<u64> = match &b.expr(e).kind {
        ExprKind::Field { path } => path.to_vec(),
        _ => return false,
    };
    let target = target_type_at(b, base_ty, &path);
    let Some(res) = b.expr(e).result else { return false };
    left_is_box_type_of_right(b, target, b.value(res).ty)
}

fn insert_box_and_unbox_exprs(b: &mut Builder, package: &Package) {
    let mut store_refs: Vec<ExprId> = Vec::new();
    let mut get_refs: Vec<ExprId> = Vec::new();
    let mut tuples: Vec<(ExprId, Vec<usize>)> = Vec::new();
    let mut typecasts: Vec<(ExprId, Vec<usize>)> = Vec::new();
    let mut fields: Vec<ExprId> = Vec::new();

    for func in package.global_funcs() {
        let body = b.func_body(func);
        visit_group_exprs_mut(b, body, &mut |bld, e| {
            match &bld.expr(e).kind {
                ExprKind::StoreElementRef { .. } => {
                    if store_element_ref_needs_box(bld, e) {
                        store_refs.push(e);
                    }
                }
                ExprKind::GetElementRef { .. } => {
                    if get_element_ref_needs_unbox(bld, e) {
                        get_refs.push(e);
                    }
                }
                ExprKind::Tuple => {
                    let boxed = tuple_needs_box(bld, e);
                    if !boxed.is_empty() {
                        tuples.push((e, boxed));
                    }
                }
                ExprKind::Field { .. } => {
                    let finding = field_and_typecast_need_unbox(bld, e, &typecasts);
                    if let Some(cast) = finding.cast {
                        typecasts.push(cast);
                    }
                    if let Some(f) = finding.field {
                        fields.push(f);
                    }
                    if field_needs_unbox(bld, e) {
                        fields.push(e);
                    }
                }
                _ => {}
            }
            VisitResult::Continue
        });
    }

    for e in store_refs {
        insert_box_before_store_element_ref(b, e);
    }
    for e in get_refs {
        insert_unbox_after_get_element_ref(b, e);
    }
    for (e, boxed) in tuples {
        insert_box_before_tuple(b, e, &boxed);
    }
    for (e, boxed) in typecasts {
        retype_cast_to_boxed_tuple(b, e, &boxed);
    }
    for e in fields {
        insert_unbox_after_field(b, e);
    }
}

fn insert_box_before_store_element_ref(b: &mut Builder, e: ExprId) {
    let parent = b.expr(e).parent.expect("store lives in a block");
    let src = b.expr(e).operands[0];
    let boxed = b.box_of(b.value(src).ty);
    let box_ty = b.ref_to(boxed);
    let box_expr = b.create_box(src, box_ty, parent);
    b.move_before(box_expr, e);
    let box_res = b.expr(box_expr).result.expect("box has a result");
    b.replace_operand(e, src, box_res);
}

fn insert_unbox_after_get_element_ref(b: &mut Builder, e: ExprId) {
    let parent = b.expr(e).parent.expect("get-element-ref lives in a block");
    let location = b.expr(e).operands[0];
    let path: SmallVec<[u64; 2]> = match &b.expr(e).kind {
        ExprKind::GetElementRef { path } => path.clone(),
        _ => unreachable!(),
    };
    let res = b.expr(e).result.expect("get-element-ref has a result");
    let target_ty = b.strip_all_refs(b.value(res).ty);
    let boxed = b.box_of(target_ty);
    let box_ty = b.ref_to(boxed);
    let ger_res_ty = b.ref_to(box_ty);

    let new_ger = b.create_get_element_ref(location, &path, ger_res_ty, parent);
    b.move_before(new_ger, e);
    let new_ger_res = b.expr(new_ger).result.expect("get-element-ref has a result");

    let load = b.value(res).users[0];
    let new_load = b.create_load(new_ger_res, parent);
    b.move_before(new_load, e);
    let new_load_res = b.expr(new_load).result.expect("load has a result");

    let unbox = b.create_unbox(new_load_res, target_ty, parent);
    b.replace_with(load, unbox);
    b.remove_self_from_block(e);
}

fn insert_box_before_tuple(b: &mut Builder, e: ExprId, boxed_positions: &[usize]) {
    let parent = b.expr(e).parent.expect("tuple lives in a block");
    for &i in boxed_positions {
        let src = b.expr(e).operands[i];
        let boxed = b.box_of(b.value(src).ty);
        let box_ty = b.ref_to(boxed);
        let box_expr = b.create_box(src, box_ty, parent);
        b.move_before(box_expr, e);
        let box_res = b.expr(box_expr).result.expect("box has a result");
        b.replace_operand_at(e, i, box_res);
    }
}

fn retype_cast_to_boxed_tuple(b: &mut Builder, e: ExprId, boxed_positions: &[usize]) {
    let parent = b.expr(e).parent.expect("cast lives in a block");
    let res = b.expr(e).result.expect("cast has a result");
    let Type::Tuple(mut elems) = b.ty(b.value(res).ty).clone() else {
        unreachable!("cast target must be an enum payload tuple");
    };
    for &i in boxed_positions {
        debug_assert!(i < elems.len());
        let boxed = b.box_of(elems[i]);
        elems[i] = b.ref_to(boxed);
    }
    let new_target = b.tuple_ty(elems);
    let src = b.expr(e).operands[0];
    let loc = b.expr(e).loc;
    let new_cast = b.create_typecast(src, new_target, parent);
    b.expr_mut(new_cast).loc = loc;
    b.move_before(new_cast, e);
    b.replace_with(e, new_cast);
}

fn insert_unbox_after_field(b: &mut Builder, e: ExprId) {
    let parent = b.expr(e).parent.expect("field lives in a block");
    let res = b.expr(e).result.expect("field has a result");
    let res_ty = b.value(res).ty;
    let boxed = b.box_of(res_ty);
    let box_ty = b.ref_to(boxed);
    let base = b.expr(e).operands[0];
    let path: SmallVec<[u64; 2]> = match &b.expr(e).kind {
        ExprKind::Field { path } => path.clone(),
        _ => unreachable!(),
    };
    let loc = b.expr(e).loc;
    let new_field = b.create_field(base, &path, box_ty, parent);
    b.expr_mut(new_field).loc = loc;
    b.move_before(new_field, e);
    let new_field_res = b.expr(new_field).result.expect("field has a result");
    let unbox = b.create_unbox(new_field_res, res_ty, parent);
    b.replace_with(e, unbox);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{CustomDef, EnumCtor};
    use crate::value::{FuncKind, Literal};

    /// `enum List { Nil | Cons(Int64, List) }`
    fn make_list_enum(b: &mut Builder) -> (crate::ty::DefId, TypeId) {
        let def = b.create_def(CustomDef {
            src_name: "List".into(),
            mangled_name: "_LList".into(),
            package: "demo".into(),
            generic_params: vec![],
            instance_vars: vec![],
            static_vars: vec![],
            methods: vec![],
            vtable: Default::default(),
            kind: CustomDefKind::Enum { ctors: vec![], non_exhaustive: false },
            imported: false,
        });
        let list_ty = b.custom_ty(def, vec![]);
        let i64t = b.int64_ty();
        let nil_ty = b.func_ty(vec![], list_ty);
        let cons_ty = b.func_ty(vec![i64t, list_ty], list_ty);
        if let CustomDefKind::Enum { ctors, .. } = &mut b.def_mut(def).kind {
            ctors.push(EnumCtor { name: "Nil".into(), mangled_name: "_LNil".into(), func_ty: nil_ty });
            ctors.push(EnumCtor { name: "Cons".into(), mangled_name: "_LCons".into(), func_ty: cons_ty });
        }
        (def, list_ty)
    }

    #[test]
    fn test_recursive_enum_payload_gets_boxed() {
        let mut b = Builder::new();
        let mut pkg = Package::new("demo");
        let (def, list_ty) = make_list_enum(&mut b);
        pkg.enums.push(def);

        run_on_package(&mut b, &pkg);

        let ctors = b.def(def).enum_ctors().to_vec();
        let Type::Func(cons_sig) = b.ty(ctors[1].func_ty).clone() else { panic!("ctor type") };
        // first payload is untouched, the tail is now Box<List>&
        let i64t = b.int64_ty();
        assert_eq!(cons_sig.params[0], i64t);
        let boxed = b.box_of(list_ty);
        let expected_tail = b.ref_to(boxed);
        assert_eq!(cons_sig.params[1], expected_tail);
    }

    #[test]
    fn test_cons_tuple_gets_box_inserted() {
        let mut b = Builder::new();
        let mut pkg = Package::new("demo");
        let (def, list_ty) = make_list_enum(&mut b);
        pkg.enums.push(def);

        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        pkg.funcs.push(f);
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let u32t = b.uint32_ty();

        // Cons(4, nil_value)
        let sel = b.create_constant(Literal::UInt(1), u32t, entry);
        let sel_v = b.expr(sel).result.unwrap();
        let head = b.create_constant(Literal::Int(4), i64t, entry);
        let head_v = b.expr(head).result.unwrap();
        let nil_sel = b.create_constant(Literal::UInt(0), u32t, entry);
        let nil_sel_v = b.expr(nil_sel).result.unwrap();
        let nil = b.create_tuple(&[nil_sel_v], list_ty, entry);
        let nil_v = b.expr(nil).result.unwrap();
        let cons = b.create_tuple(&[sel_v, head_v, nil_v], list_ty, entry);
        b.create_exit(entry);

        run_on_package(&mut b, &pkg);

        // the tail operand is now the result of a Box expression
        let tail = b.expr(cons).operands[2];
        let tail_def = b.value(tail).defining_expr().unwrap();
        assert!(matches!(b.expr(tail_def).kind, ExprKind::Box));
        let boxed = b.box_of(list_ty);
        let expected = b.ref_to(boxed);
        assert_eq!(b.value(tail).ty, expected);
    }

    #[test]
    fn test_projecting_boxed_tail_gets_unboxed() {
        let mut b = Builder::new();
        let mut pkg = Package::new("demo");
        let (def, list_ty) = make_list_enum(&mut b);
        pkg.enums.push(def);

        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        pkg.funcs.push(f);
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let u32t = b.uint32_ty();

        // %0: List = ...; %1: Tuple<UInt32, Int64, List> = TypeCast(%0)
        // %2: List = Field(%1, 2)
        let nil_sel = b.create_constant(Literal::UInt(0), u32t, entry);
        let nil_sel_v = b.expr(nil_sel).result.unwrap();
        let value = b.create_tuple(&[nil_sel_v], list_ty, entry);
        let value_v = b.expr(value).result.unwrap();
        let payload_ty = b.tuple_ty(vec![u32t, i64t, list_ty]);
        let cast = b.create_typecast(value_v, payload_ty, entry);
        let cast_v = b.expr(cast).result.unwrap();
        let tail = b.create_field(cast_v, &[2], list_ty, entry);
        let tail_v = b.expr(tail).result.unwrap();
        let sinkt = b.tuple_ty(vec![list_ty]);
        let consumer = b.create_tuple(&[tail_v], sinkt, entry);
        b.create_exit(entry);

        run_on_package(&mut b, &pkg);

        // the old cast and field are replaced; the consumer reads an UnBox
        assert!(b.expr(cast).parent.is_none());
        assert!(b.expr(tail).parent.is_none());
        let feeding = b.expr(consumer).operands[0];
        let feeding_def = b.value(feeding).defining_expr().unwrap();
        assert!(matches!(b.expr(feeding_def).kind, ExprKind::UnBox));
    }
}
