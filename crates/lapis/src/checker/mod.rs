//! The well-formedness checker: an invariant validator over the IR.
//!
//! Runs between pipeline phases, in parallel across top-level definitions
//! on a fixed worker pool sized by the configured job count. Each rule is
//! gated on the phase, because earlier phases legitimately carry partial
//! invariants (a block may still lack expressions before lowering
//! finishes). On failure the checker emits one diagnostic per issue, dumps
//! the offending definition at debug level, and returns `false`; callers
//! abort the pipeline.

pub mod var_init;

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashSet;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::block::{BlockGroupId, BlockId};
use crate::builder::Builder;
use crate::def::{CustomDefKind, VTableSlot};
use crate::diag::{DebugLocation, DiagSink, Diagnostic};
use crate::expr::{ExprId, ExprKind};
use crate::package::Package;
use crate::pipeline::{Options, Phase};
use crate::ty::{DefId, GenericTypeId, Type, TypeId};
use crate::value::{Literal, ValueId};
use crate::visitor::{VisitResult, visit_group_exprs};

struct CheckCtx<'a> {
    b: &'a Builder,
    opts: &'a Options,
    phase: Phase,
    sink: &'a dyn DiagSink,
    idents: Mutex<AHashSet<String>>,
    failed: AtomicBool,
}

impl CheckCtx<'_> {
    fn error(&self, loc: DebugLocation, msg: String) {
        self.sink.report(Diagnostic::error(loc, msg));
        self.failed.store(true, Ordering::Relaxed);
    }

    fn error_in_func(&self, func: ValueId, msg: String) {
        let loc = self.b.value(func).loc;
        self.error(loc, format!("{}: {msg}", self.b.value(func).ident));
        debug!(target: "lapis::checker", "{}", self.b.func_to_string(func));
    }

    fn warning_in_func(&self, func: ValueId, msg: String) {
        let loc = self.b.value(func).loc;
        self.sink.report(Diagnostic::warning(loc, format!("{}: {msg}", self.b.value(func).ident)));
        warn!(target: "lapis::checker", func = %self.b.value(func).ident, "{msg}");
    }

    /// Registers an identifier, reporting a clash. Insertion is the only
    /// operation on the shared set, guarded by its mutex.
    fn check_identifier(&self, ident: &str) -> bool {
        let fresh = self.idents.lock().expect("identifier set poisoned").insert(ident.to_string());
        if !fresh {
            self.error(DebugLocation::INVALID, format!("duplicated identifier {ident}"));
        }
        fresh
    }

    fn is_end_phase(&self) -> bool {
        self.phase >= Phase::Opt
    }
}

/// Validates the whole package for the given phase. Returns `false` when
/// any rule failed; diagnostics carry the details.
pub fn check_package(
    b: &Builder,
    package: &Package,
    opts: &Options,
    phase: Phase,
    sink: &dyn DiagSink,
) -> bool {
    let ctx = CheckCtx {
        b,
        opts,
        phase,
        sink,
        idents: Mutex::new(AHashSet::new()),
        failed: AtomicBool::new(false),
    };
    let jobs = opts.job_count.max(1);
    match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => pool.install(|| run_checks(&ctx, package)),
        Err(_) => run_checks(&ctx, package),
    }
    !ctx.failed.load(Ordering::Relaxed)
}

fn run_checks(ctx: &CheckCtx<'_>, package: &Package) {
    for &gv in &package.globals {
        ctx.check_identifier(&ctx.b.value(gv).ident);
    }
    package.all_defs().par_iter().for_each(|def| check_def(ctx, *def));
    package.global_funcs().par_iter().for_each(|func| check_func(ctx, *func));
}

// ===------------------------------------------------------------------===//
// Custom defs
// ===------------------------------------------------------------------===//

fn check_def(ctx: &CheckCtx<'_>, def_id: DefId) {
    let def = ctx.b.def(def_id);
    ctx.check_identifier(&def.mangled_name);
    check_vtable(ctx, def_id);
    if let CustomDefKind::Enum { ctors, .. } = &def.kind {
        for ctor in ctors {
            if !matches!(ctx.b.ty(ctor.func_ty), Type::Func(_)) {
                ctx.error(
                    DebugLocation::INVALID,
                    format!("enum {} constructor {} does not carry a function type", def.src_name, ctor.name),
                );
            }
        }
    }
}

/// Slot `i` of the child must correspond to slot `i` of the parent: same
/// source name, identical parameter types (the receiver may refine to a
/// subtype), covariant return type. Abstract slots are legal only on
/// abstract defs.
fn check_vtable(ctx: &CheckCtx<'_>, def_id: DefId) {
    let b = ctx.b;
    let def = b.def(def_id);
    for (parent_ty, slots) in &def.vtable {
        for slot in slots {
            if slot.instance.is_none() && !def.is_abstract() {
                ctx.error(
                    DebugLocation::INVALID,
                    format!(
                        "def {}: abstract v-table slot {} on a non-abstract def",
                        def.src_name, slot.src_name
                    ),
                );
            }
        }
        let Some((parent_def, _)) = b.custom_def_of(*parent_ty) else { continue };
        if parent_def == def_id {
            continue;
        }
        let Some(parent_slots) = b.def(parent_def).vtable.get(parent_ty) else { continue };
        if slots.len() < parent_slots.len() {
            ctx.error(
                DebugLocation::INVALID,
                format!(
                    "def {}: v-table for {} has {} slots, parent declares {}",
                    def.src_name,
                    b.type_to_string(*parent_ty),
                    slots.len(),
                    parent_slots.len()
                ),
            );
            continue;
        }
        for (i, parent_slot) in parent_slots.iter().enumerate() {
            let child_slot = &slots[i];
            if child_slot.src_name != parent_slot.src_name {
                ctx.error(
                    DebugLocation::INVALID,
                    format!(
                        "def {}: v-table slot {i} is {}, parent slot is {}",
                        def.src_name, child_slot.src_name, parent_slot.src_name
                    ),
                );
                continue;
            }
            if !vtable_sig_compatible(b, child_slot, parent_slot) {
                ctx.error(
                    DebugLocation::INVALID,
                    format!(
                        "def {}: v-table slot {} signature mismatch against {}",
                        def.src_name,
                        child_slot.src_name,
                        b.type_to_string(*parent_ty)
                    ),
                );
            }
        }
    }
}

fn vtable_sig_compatible(b: &Builder, child: &VTableSlot, parent: &VTableSlot) -> bool {
    let (Type::Func(child_sig), Type::Func(parent_sig)) = (b.ty(child.sig_ty), b.ty(parent.sig_ty))
    else {
        return false;
    };
    if child_sig.params.len() != parent_sig.params.len() {
        return false;
    }
    for (i, (&cp, &pp)) in child_sig.params.iter().zip(&parent_sig.params).enumerate() {
        if i == 0 {
            // the receiver tolerates a class-subtype refinement
            let cs = b.strip_all_refs(cp);
            let ps = b.strip_all_refs(pp);
            if !(cs == ps
                || matches!(b.ty(cs), Type::This)
                || matches!(b.ty(ps), Type::This)
                || b.is_equal_or_subtype_of(cs, ps))
            {
                return false;
            }
        } else if cp != pp && !type_involves_generic(b, cp) && !type_involves_generic(b, pp) {
            return false;
        }
    }
    // covariant return
    child_sig.ret == parent_sig.ret
        || b.is_equal_or_subtype_of(child_sig.ret, parent_sig.ret)
        || type_involves_generic(b, child_sig.ret)
        || type_involves_generic(b, parent_sig.ret)
}

// ===------------------------------------------------------------------===//
// Functions
// ===------------------------------------------------------------------===//

fn check_func(ctx: &CheckCtx<'_>, func: ValueId) {
    let b = ctx.b;
    ctx.check_identifier(&b.value(func).ident);
    let Some(data) = b.value(func).func_data() else { return };

    // parameter list agreement with the function type
    match b.ty(b.value(func).ty) {
        Type::Func(sig) => {
            if sig.params.len() != data.params.len() {
                ctx.error_in_func(
                    func,
                    format!(
                        "has {} parameters, its type declares {}",
                        data.params.len(),
                        sig.params.len()
                    ),
                );
            } else {
                for (&param, &ty) in data.params.iter().zip(&sig.params) {
                    if b.value(param).ty != ty {
                        ctx.error_in_func(
                            func,
                            format!("parameter {} disagrees with the function type", b.value(param).ident),
                        );
                    }
                }
            }
        }
        _ => ctx.error_in_func(func, "does not carry a function type".to_string()),
    }

    check_generic_visibility(ctx, func);
    check_block_group(ctx, func, data.body);

    let mut pre = |bld: &Builder, e: ExprId| {
        check_expr(ctx, func, e);
        for &op in &bld.expr(e).operands {
            check_ref_depth(ctx, func, op, bld.expr(e).is_debug());
        }
        if let Some(res) = bld.expr(e).result {
            check_ref_depth(ctx, func, res, false);
        }
        VisitResult::Continue
    };
    let mut post = |_: &Builder, _: ExprId| VisitResult::Continue;
    visit_group_exprs(b, data.body, &mut pre, &mut post);

    let mut blocks_pre = |_: &Builder, block: BlockId| {
        check_block(ctx, func, block);
        VisitResult::Continue
    };
    crate::visitor::visit_blocks(b, data.body, &mut blocks_pre);

    if ctx.is_end_phase() {
        let mut values: Vec<ValueId> = data.params.clone();
        operand_check_group(ctx, func, data.body, &mut values);
    }
}

/// Generic types used inside the body must be visible in the function's or
/// the enclosing def's generic parameters.
fn check_generic_visibility(ctx: &CheckCtx<'_>, func: ValueId) {
    let b = ctx.b;
    let Some(data) = b.value(func).func_data() else { return };
    let mut allowed: AHashSet<GenericTypeId> = data.generic_params.iter().copied().collect();
    if let Some(def) = data.parent_def {
        allowed.extend(b.def(def).generic_params.iter().copied());
    }

    let check_ty = |ty: TypeId, what: &str| {
        let mut frees = AHashSet::new();
        b.free_generics(ty, &mut frees);
        for g in frees {
            if !allowed.contains(&g) {
                ctx.error_in_func(
                    func,
                    format!("generic type {} in {what} is not visible here", b.generic(g).name),
                );
            }
        }
    };

    let mut pre = |bld: &Builder, e: ExprId| {
        // lambdas introduce their own generic scope upstream; their
        // contents are covered by the lambda's own type
        if let Some(res) = bld.expr(e).result {
            check_ty(bld.value(res).ty, "result");
        }
        for &op in &bld.expr(e).operands {
            if bld.value(op).is_local_var() || bld.value(op).is_parameter() {
                check_ty(bld.value(op).ty, "operand");
            }
        }
        VisitResult::Continue
    };
    let mut post = |_: &Builder, _: ExprId| VisitResult::Continue;
    visit_group_exprs(b, data.body, &mut pre, &mut post);
}

fn check_block_group(ctx: &CheckCtx<'_>, func: ValueId, group: BlockGroupId) {
    let b = ctx.b;
    let mut groups_pre = |bld: &Builder, g: BlockGroupId| {
        if bld.group(g).blocks.is_empty() {
            ctx.error_in_func(func, format!("block group {} has no block", bld.group(g).ident));
            return VisitResult::Continue;
        }
        if bld.group(g).entry.is_none() {
            ctx.error_in_func(func, format!("block group {} has no entry block", bld.group(g).ident));
            return VisitResult::Continue;
        }
        let has_return = bld.group(g).blocks.iter().any(|&block| {
            bld.block_terminator(block).is_some_and(|t| {
                matches!(bld.expr(t).kind, ExprKind::Exit | ExprKind::RaiseException)
            })
        });
        if !has_return {
            ctx.warning_in_func(func, format!("block group {} has no exit or raise terminator", bld.group(g).ident));
        }
        VisitResult::Continue
    };
    crate::visitor::visit_groups(b, group, &mut groups_pre);
}

/// A block must hold expressions (by the end phase); the last one must be
/// its only terminator; successor and predecessor lists must agree and
/// stay inside one group.
fn check_block(ctx: &CheckCtx<'_>, func: ValueId, block: BlockId) {
    let b = ctx.b;
    let exprs = &b.block(block).exprs;
    if ctx.is_end_phase() && exprs.is_empty() {
        ctx.error_in_func(func, format!("block {} has no expression", b.block(block).ident));
        return;
    }
    for &e in exprs.iter().rev().skip(1) {
        if b.expr(e).is_terminator() {
            ctx.error_in_func(
                func,
                format!("terminator found in the middle of block {}", b.block(block).ident),
            );
            return;
        }
    }
    let is_entry = b.group(b.block(block).parent).entry == Some(block);
    let is_dead = !is_entry && b.block(block).preds.is_empty();
    let Some(term) = b.block_terminator(block) else {
        if !is_dead && ctx.is_end_phase() {
            ctx.error_in_func(func, format!("block {} does not have terminator", b.block(block).ident));
        }
        return;
    };
    for &suc in b.expr(term).successors() {
        if b.block(suc).parent != b.block(block).parent {
            ctx.error_in_func(
                func,
                format!(
                    "successor {} of block {} lives in another block group",
                    b.block(suc).ident,
                    b.block(block).ident
                ),
            );
        }
        if !b.block(suc).preds.contains(&block) {
            ctx.error_in_func(
                func,
                format!(
                    "{} is {}'s successor, but {} is not {}'s predecessor",
                    b.block(suc).ident,
                    b.block(block).ident,
                    b.block(block).ident,
                    b.block(suc).ident
                ),
            );
        }
    }
    for &pred in &b.block(block).preds {
        let listed = b
            .block_terminator(pred)
            .is_some_and(|t| b.expr(t).successors().contains(&block));
        if !listed {
            ctx.error_in_func(
                func,
                format!(
                    "{} lists {} as predecessor, but {}'s terminator does not target it",
                    b.block(block).ident,
                    b.block(pred).ident,
                    b.block(pred).ident
                ),
            );
        }
    }
}

/// Value types may appear as `T` or `T&`; reference types (classes, raw
/// arrays) may add one more level; nothing goes deeper.
fn check_ref_depth(ctx: &CheckCtx<'_>, func: ValueId, value: ValueId, in_debug: bool) {
    let b = ctx.b;
    let ty = b.value(value).ty;
    let depth = b.ref_depth(ty);
    let base = b.strip_all_refs(ty);
    let max = if b.is_class_ty(base)
        || matches!(b.ty(base), Type::RawArray(_) | Type::Generic(_))
    {
        2
    } else {
        1
    };
    if depth > max {
        ctx.error_in_func(
            func,
            format!("value {} has reference depth {depth}", b.value(value).ident),
        );
    }
    if in_debug && ctx.opts.enable_compile_debug && depth == 0 && !b.value(value).is_literal() {
        ctx.error_in_func(
            func,
            format!("debug operand {} must be a reference", b.value(value).ident),
        );
    }
}

// ===------------------------------------------------------------------===//
// Expressions
// ===------------------------------------------------------------------===//

/// Subtype check that tolerates open generics; instantiation happens
/// upstream and phase by phase.
fn check_type(b: &Builder, sub: TypeId, sup: TypeId) -> bool {
    if sub == sup || b.is_equal_or_subtype_of(sub, sup) {
        return true;
    }
    type_involves_generic(b, sub) || type_involves_generic(b, sup)
}

fn type_involves_generic(b: &Builder, ty: TypeId) -> bool {
    match b.ty(ty) {
        Type::Generic(_) | Type::This => true,
        other => other.type_args().iter().any(|a| type_involves_generic(b, *a)),
    }
}

fn result_ty(b: &Builder, e: ExprId) -> Option<TypeId> {
    b.expr(e).result.map(|r| b.value(r).ty)
}

fn operand_ty(b: &Builder, e: ExprId, idx: usize) -> TypeId {
    b.value(b.expr(e).operands[idx]).ty
}

fn check_expr(ctx: &CheckCtx<'_>, func: ValueId, e: ExprId) {
    let b = ctx.b;
    let expr = b.expr(e);
    let fail = |msg: String| ctx.error_in_func(func, format!("{}: {msg}", b.expr_to_string(e)));

    match &expr.kind {
        ExprKind::Allocate { ty } => {
            let Some(res) = result_ty(b, e) else { return fail("allocate has no result".into()) };
            if b.strip_one_ref(res) != *ty {
                fail("result type is not a reference to the allocated type".into());
            }
        }
        ExprKind::Load => {
            let loc_ty = operand_ty(b, e, 0);
            if !b.ty(loc_ty).is_ref() {
                return fail("load location is not a reference".into());
            }
            if let Some(res) = result_ty(b, e) {
                if !check_type(b, b.strip_one_ref(loc_ty), res) && !check_type(b, res, b.strip_one_ref(loc_ty)) {
                    fail("loaded type disagrees with the location".into());
                }
            }
        }
        ExprKind::Store => {
            let value_ty = operand_ty(b, e, 0);
            let loc_ty = operand_ty(b, e, 1);
            if !b.ty(loc_ty).is_ref() {
                return fail("store location is not a reference".into());
            }
            if !check_type(b, value_ty, b.strip_one_ref(loc_ty)) {
                fail("stored value disagrees with the location type".into());
            }
            if result_ty(b, e).is_some_and(|t| !b.ty(t).is_unit()) {
                fail("store result must be Unit".into());
            }
        }
        ExprKind::GetElementRef { path } => {
            let loc_ty = operand_ty(b, e, 0);
            if !b.ty(loc_ty).is_ref() {
                return fail("get-element-ref location is not a reference".into());
            }
            if let (Some(field), Some(res)) = (resolve_path(b, loc_ty, path), result_ty(b, e)) {
                if !check_type(b, field, b.strip_all_refs(res)) && !check_type(b, b.strip_all_refs(res), field) {
                    fail("element reference type disagrees with the member".into());
                }
            }
        }
        ExprKind::StoreElementRef { path } => {
            let value_ty = operand_ty(b, e, 0);
            let loc_ty = operand_ty(b, e, 1);
            if let Some(field) = resolve_path(b, loc_ty, path) {
                // a boxed slot accepts the box reference
                if !check_type(b, value_ty, field) && !check_type(b, field, value_ty) {
                    fail("stored element disagrees with the member type".into());
                }
            }
        }
        ExprKind::Constant(lit) => {
            let Some(res) = result_ty(b, e) else { return };
            let ok = match lit {
                Literal::Bool(_) => matches!(b.ty(res), Type::Bool),
                Literal::Rune(_) => matches!(b.ty(res), Type::Rune),
                Literal::Int(_) => matches!(b.ty(res), Type::Int(_)),
                Literal::UInt(_) => matches!(b.ty(res), Type::UInt(_) | Type::Bool),
                Literal::Float(_) => matches!(b.ty(res), Type::Float(_)),
                Literal::String(_) => true,
                Literal::Unit => b.ty(res).is_unit(),
                Literal::Null => true,
            };
            if !ok {
                fail("literal disagrees with the result type".into());
            }
        }
        ExprKind::Tuple => check_tuple(ctx, func, e),
        ExprKind::Field { path } => {
            let base_ty = operand_ty(b, e, 0);
            // on enums only the selector is addressable by Field
            if b.is_enum_ty(base_ty) {
                if path.first() != Some(&0) {
                    // a payload projection goes through a TypeCast first
                    let (Some(field), Some(res)) = (resolve_path(b, base_ty, path), result_ty(b, e)) else {
                        return;
                    };
                    if !check_type(b, field, res) {
                        fail("field type disagrees with the member".into());
                    }
                }
                return;
            }
            if let (Some(field), Some(res)) = (resolve_path(b, base_ty, path), result_ty(b, e)) {
                if !check_type(b, field, res) && !check_type(b, res, field) {
                    fail("field type disagrees with the member".into());
                }
            }
        }
        ExprKind::Apply { .. } => check_apply(ctx, func, e),
        ExprKind::Invoke { method_sig, .. } => {
            let obj_ty = b.strip_all_refs(operand_ty(b, e, 0));
            if !b.is_class_ty(obj_ty) && !type_involves_generic(b, obj_ty) {
                fail("invoke receiver is not a class reference".into());
            }
            if !matches!(b.ty(*method_sig), Type::Func(_)) {
                fail("invoke method signature is not a function type".into());
            }
            check_call_arg_levels(ctx, func, e);
        }
        ExprKind::InvokeStatic { method_sig, .. } => {
            if !matches!(b.ty(*method_sig), Type::Func(_)) {
                fail("invoke-static method signature is not a function type".into());
            }
            check_call_arg_levels(ctx, func, e);
        }
        ExprKind::TypeCast => check_typecast(ctx, func, e),
        ExprKind::InstanceOf { .. } => {
            if result_ty(b, e).is_some_and(|t| !matches!(b.ty(t), Type::Bool)) {
                fail("instance-of result must be Bool".into());
            }
        }
        ExprKind::Branch => {
            if !matches!(b.ty(operand_ty(b, e, 0)), Type::Bool) {
                fail("branch condition must be Bool".into());
            }
            if expr.successors().len() != 2 {
                fail("branch must have exactly two successors".into());
            }
        }
        ExprKind::MultiBranch { cases } => {
            if !b.ty(operand_ty(b, e, 0)).is_integer() {
                fail("multi-branch selector must be an integer".into());
            }
            if expr.successors().len() != cases.len() + 1 {
                fail("multi-branch successor count disagrees with its cases".into());
            }
        }
        ExprKind::GetInstantiateValue { .. } => {
            if ctx.phase >= Phase::Opt {
                fail("GetInstantiateValue is illegal at this phase".into());
            }
        }
        ExprKind::Lambda(data) => {
            if let Some(res) = result_ty(b, e) {
                match b.ty(res) {
                    Type::Func(sig) => {
                        if sig.params.len() != data.params.len() {
                            fail("lambda parameter list disagrees with its type".into());
                        }
                    }
                    _ => fail("lambda result must carry a function type".into()),
                }
            }
        }
        ExprKind::Box => {
            if let Some(res) = result_ty(b, e) {
                let inner = b.strip_one_ref(res);
                if !b.ty(inner).is_box() {
                    fail("box result must be a boxed reference".into());
                }
            }
        }
        ExprKind::UnBox => {
            let src = b.strip_all_refs(operand_ty(b, e, 0));
            if !b.ty(src).is_box() {
                fail("unbox source must be a boxed reference".into());
            }
        }
        _ => {}
    }
}

fn resolve_path(b: &Builder, base: TypeId, path: &[u64]) -> Option<TypeId> {
    let mut ty = base;
    for &step in path {
        ty = b.field_of_type_readonly(ty, usize::try_from(step).ok()?)?;
    }
    Some(ty)
}

/// A `Tuple` forming an enum value: operand 0 is a constant selector
/// (`UInt32`, or `Bool` for two-constructor enums); the remaining operands
/// must match the selected constructor's parameters.
fn check_tuple(ctx: &CheckCtx<'_>, func: ValueId, e: ExprId) {
    let b = ctx.b;
    let fail = |msg: String| ctx.error_in_func(func, format!("{}: {msg}", b.expr_to_string(e)));
    let Some(res) = result_ty(b, e) else { return };

    match b.ty(b.strip_all_refs(res)) {
        Type::Tuple(elems) => {
            let expr = b.expr(e);
            if elems.len() != expr.operands.len() {
                return fail("tuple arity disagrees with its type".into());
            }
            for (&op, &ty) in expr.operands.iter().zip(elems) {
                if !check_type(b, b.value(op).ty, ty) {
                    fail("tuple element disagrees with its type".into());
                }
            }
        }
        Type::Custom(def_id, _) => {
            let def = b.def(*def_id);
            let CustomDefKind::Enum { ctors, .. } = &def.kind else {
                return fail("tuple result must be a tuple or enum type".into());
            };
            let expr = b.expr(e);
            let Some(&selector) = expr.operands.first() else {
                return fail("enum tuple is missing its selector".into());
            };
            let selector_lit = b
                .value(selector)
                .defining_expr()
                .and_then(|d| match &b.expr(d).kind {
                    ExprKind::Constant(lit) => lit.as_selector_index(),
                    _ => None,
                });
            let Some(index) = selector_lit else {
                return fail("enum tuple selector must be a constant UInt32 or Bool".into());
            };
            let Some(ctor) = ctors.get(index) else {
                return fail(format!("enum tuple selector {index} is out of range"));
            };
            let Type::Func(sig) = b.ty(ctor.func_ty) else { return };
            let args = &expr.operands[1..];
            if args.len() != sig.params.len() {
                return fail("enum tuple payload arity disagrees with the constructor".into());
            }
            for (&op, &ty) in args.iter().zip(&sig.params) {
                if !check_type(b, b.value(op).ty, ty) && !check_type(b, ty, b.value(op).ty) {
                    fail("enum tuple payload disagrees with the constructor".into());
                }
            }
        }
        _ => fail("tuple result must be a tuple or enum type".into()),
    }
}

fn check_apply(ctx: &CheckCtx<'_>, func: ValueId, e: ExprId) {
    let b = ctx.b;
    let fail = |msg: String| ctx.error_in_func(func, format!("{}: {msg}", b.expr_to_string(e)));
    let expr = b.expr(e);
    let Some(callee) = expr.callee() else { return fail("apply has no callee".into()) };
    let Type::Func(sig) = b.ty(b.strip_all_refs(b.value(callee).ty)) else {
        return fail("apply callee does not carry a function type".into());
    };
    let args = expr.call_args();
    if !sig.has_varargs && args.len() != sig.params.len() {
        return fail(format!(
            "apply passes {} arguments, the callee takes {}",
            args.len(),
            sig.params.len()
        ));
    }
    for (&arg, &param) in args.iter().zip(&sig.params) {
        if !check_type(b, b.value(arg).ty, param) {
            fail(format!("argument {} disagrees with its parameter type", b.value(arg).ident));
        }
    }
    if let Some(res) = result_ty(b, e) {
        if !check_type(b, sig.ret, res) && !check_type(b, res, sig.ret) {
            fail("apply result disagrees with the callee's return type".into());
        }
    }
    check_call_arg_levels(ctx, func, e);
    // a constructor receives its receiver through a one-level reference
    if b.value(callee).is_constructor() {
        if let Some(&receiver) = args.first() {
            let ty = b.value(receiver).ty;
            if b.ref_depth(ty) != 1 && !type_involves_generic(b, ty) {
                fail("constructor receiver must be a one-level reference".into());
            }
        }
    }
}

/// Call arguments must be value types, function types, or single-level
/// references (class references keep their one indirection).
fn check_call_arg_levels(ctx: &CheckCtx<'_>, func: ValueId, e: ExprId) {
    let b = ctx.b;
    for &arg in b.expr(e).call_args() {
        let depth = b.ref_depth(b.value(arg).ty);
        if depth > 1 {
            ctx.error_in_func(
                func,
                format!(
                    "{}: argument {} is a multi-level reference",
                    b.expr_to_string(e),
                    b.value(arg).ident
                ),
            );
        }
    }
}

/// `TypeCast` legality: trivial enums cast to and from `UInt32`,
/// non-trivial enums to and from their payload tuples, integers to and
/// from rune/int/float/trivial-enum; class hierarchies cast along their
/// subtype edges.
fn check_typecast(ctx: &CheckCtx<'_>, func: ValueId, e: ExprId) {
    let b = ctx.b;
    let Some(res) = result_ty(b, e) else { return };
    let src = operand_ty(b, e, 0);
    if cast_is_legal(b, src, res) {
        return;
    }
    ctx.error_in_func(
        func,
        format!(
            "{}: illegal cast from {} to {}",
            b.expr_to_string(e),
            b.type_to_string(src),
            b.type_to_string(res)
        ),
    );
}

fn cast_is_legal(b: &Builder, src: TypeId, target: TypeId) -> bool {
    if src == target || type_involves_generic(b, src) || type_involves_generic(b, target) {
        return true;
    }
    let src_base = b.strip_all_refs(src);
    let target_base = b.strip_all_refs(target);
    if matches!(b.ty(src_base), Type::Nothing) {
        return true;
    }
    let trivial_enum = |t: TypeId| {
        b.custom_def_of(t)
            .is_some_and(|(d, _)| b.def(d).is_trivial_enum(b) && !b.def(d).enum_ctors().is_empty())
    };
    let nontrivial_enum =
        |t: TypeId| b.is_enum_ty(t) && !trivial_enum(t);
    let numericish = |t: TypeId| {
        b.ty(t).is_integer() || b.ty(t).is_float() || matches!(b.ty(t), Type::Rune) || trivial_enum(t)
    };
    // trivial enum <-> UInt32
    if trivial_enum(src_base) && matches!(b.ty(target_base), Type::UInt(crate::ty::IntWidth::I32)) {
        return true;
    }
    if trivial_enum(target_base) && matches!(b.ty(src_base), Type::UInt(crate::ty::IntWidth::I32)) {
        return true;
    }
    // non-trivial enum <-> its payload tuple
    if nontrivial_enum(src_base) && matches!(b.ty(target_base), Type::Tuple(_)) {
        return true;
    }
    if nontrivial_enum(target_base) && matches!(b.ty(src_base), Type::Tuple(_)) {
        return true;
    }
    // numeric conversions
    if b.ty(src_base).is_integer() && numericish(target_base) {
        return true;
    }
    if b.ty(target_base).is_integer() && numericish(src_base) {
        return true;
    }
    if b.ty(src_base).is_float() && b.ty(target_base).is_float() {
        return true;
    }
    // up- and down-casts along the class hierarchy
    if b.is_equal_or_subtype_of(src_base, target_base) || b.is_equal_or_subtype_of(target_base, src_base) {
        return true;
    }
    false
}

// ===------------------------------------------------------------------===//
// Use before def
// ===------------------------------------------------------------------===//

/// Every operand used must be a global, imported, or literal value, a
/// parameter in scope, or the result of a preceding expression on every
/// path from the entry. Branch-local definitions roll back when the walk
/// leaves the branch.
fn operand_check_group(
    ctx: &CheckCtx<'_>,
    func: ValueId,
    group: BlockGroupId,
    values: &mut Vec<ValueId>,
) -> bool {
    let b = ctx.b;
    let Some(entry) = b.group(group).entry else { return true };
    let size = values.len();
    let mut visited: AHashSet<BlockId> = AHashSet::new();
    let ret = operand_check_block(ctx, func, entry, values, &mut visited);
    values.truncate(size);
    ret
}

fn operand_check_block(
    ctx: &CheckCtx<'_>,
    func: ValueId,
    block: BlockId,
    values: &mut Vec<ValueId>,
    visited: &mut AHashSet<BlockId>,
) -> bool {
    if !visited.insert(block) {
        return true;
    }
    let b = ctx.b;
    let mut ret = true;
    for &e in &b.block(block).exprs {
        for &op in &b.expr(e).operands {
            let v = b.value(op);
            if v.is_literal() || v.is_global() || v.attrs.contains(crate::value::Attributes::IMPORTED) {
                continue;
            }
            if !values.contains(&op) {
                ctx.error_in_func(
                    func,
                    format!("{} in {} is unreachable", v.ident, b.block(block).ident),
                );
                ret = false;
            }
        }
        let expr = b.expr(e);
        if expr.is_terminator() {
            if let Some(res) = expr.result {
                values.push(res);
            }
            for &suc in expr.successors() {
                let size = values.len();
                ret = operand_check_block(ctx, func, suc, values, visited) && ret;
                values.truncate(size);
            }
            continue;
        }
        match &expr.kind {
            ExprKind::If | ExprKind::Loop | ExprKind::ForIn(_) => {
                for g in expr.execution_order() {
                    ret = operand_check_group(ctx, func, g, values) && ret;
                }
            }
            ExprKind::Lambda(data) => {
                let size = values.len();
                if data.is_local_func {
                    // a local function may reference itself in its body
                    if let Some(res) = expr.result {
                        values.push(res);
                    }
                }
                values.extend(data.params.iter().copied());
                if let Some(body) = expr.lambda_body() {
                    ret = operand_check_group(ctx, func, body, values) && ret;
                }
                values.truncate(size);
            }
            _ => {}
        }
        if let Some(res) = expr.result {
            values.push(res);
        }
    }
    ret
}
