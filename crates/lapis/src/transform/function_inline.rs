//! Function inlining.
//!
//! An `Apply` is inlined by cloning the callee's body into the caller,
//! substituting each formal parameter with its actual argument (with a
//! cast where instantiation changed the type), splitting the caller's
//! block at the call site, routing the first half into the clone's entry
//! and every clone exit into the second half, and replacing uses of the
//! call's result with a load of the clone's return slot.
//!
//! Eligibility is decided by scoring the callee's size against a
//! threshold, with boosts for single-use, operator, and function-typed
//! parameter callees, a per-caller fan-out cap, and allow/deny lists of
//! well-known library functions.

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use tracing::debug;

use crate::block::{BlockGroupId, BlockGroupOwner, BlockId};
use crate::builder::Builder;
use crate::expr::{Expr, ExprId, ExprKind, LambdaData};
use crate::pipeline::OptLevel;
use crate::subst::TypeSubst;
use crate::value::{Attributes, FuncKind, ParamOwner, ValueId};
use crate::visitor::{VisitResult, visit_group_exprs_mut_post};

use super::{FuncInfo, NOT_CARE, is_expected_function};

const INIT_INLINE_THRESHOLD: usize = 20;
/// Cap on inlined calls per enclosing function, against code expansion.
const INLINED_COUNT_THRESHOLD: usize = 20;
/// Size counting stops once a callee is clearly too large.
const SEARCH_THRESHOLD: usize = INIT_INLINE_THRESHOLD * 3;
/// Divisor for the "+20%" threshold boosts.
const INCREASE_THRESHOLD: usize = 5;
/// Multiplier when the callee takes a function-typed parameter.
const INCREASE_WHEN_CALLEE_WITH_LAMBDA_ARG: usize = 2;
/// Blocks beyond this size are too expensive to scan for call sites.
const INLINED_BLOCKSIZE_THRESHOLD: usize = 10_000;

/// Hot standard-library methods that always pay off.
const INLINE_WHITE_LIST: &[FuncInfo] = &[
    FuncInfo::new("get", "Array", "std.core"),
    FuncInfo::new("set", "Array", "std.core"),
    FuncInfo::new("[]", "Array", "std.core"),
    FuncInfo::new("copyTo", "Array", "std.core"),
    FuncInfo::new("utf8Size", "", "std.core"),
    FuncInfo::new("[]", "String", "std.core"),
    FuncInfo::new("init", "ArrayList", "std.collection"),
    FuncInfo::new("get", "ArrayList", "std.collection"),
    FuncInfo::new("set", "ArrayList", "std.collection"),
    FuncInfo::new("append", "ArrayList", "std.collection"),
    FuncInfo::new("[]", "ArrayList", "std.collection"),
    FuncInfo::new("checkRange", "ArrayList", "std.collection"),
    FuncInfo::new("remove", "ArrayList", "std.collection"),
    FuncInfo::new("==", "HashSet", "std.collection"),
    FuncInfo::new("!=", "HashSet", "std.collection"),
];

/// Functions other passes or platforms depend on seeing uninlined.
const INLINE_BLACK_LIST: &[FuncInfo] = &[
    // redundant-future removal matches on the un-inlined init
    FuncInfo::new("init", "Future", "std.core"),
    // array-lambda optimisation matches on the un-inlined call
    FuncInfo::new("arrayInitByFunction", "", "std.core"),
    FuncInfo::new("callNativeFunc", NOT_CARE, "std.fs"),
    // inlining the wrapping shifts in loops costs more than the call
    FuncInfo::new("wrappingShl", NOT_CARE, "std.overflow"),
    FuncInfo::new("wrappingShr", NOT_CARE, "std.overflow"),
];

pub struct FunctionInline {
    opt_level: OptLevel,
    global_func: Option<ValueId>,
    inlined_count: AHashMap<ValueId, usize>,
    func_size: AHashMap<ValueId, usize>,
    /// Callee -> callers it was inlined into; consumed by incremental
    /// compilation bookkeeping.
    effect_map: AHashMap<ValueId, AHashSet<ValueId>>,
}

impl FunctionInline {
    #[must_use]
    pub fn new(opt_level: OptLevel) -> Self {
        Self {
            opt_level,
            global_func: None,
            inlined_count: AHashMap::new(),
            func_size: AHashMap::new(),
            effect_map: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn effect_map(&self) -> &AHashMap<ValueId, AHashSet<ValueId>> {
        &self.effect_map
    }

    pub fn run(&mut self, b: &mut Builder, func: ValueId) {
        self.global_func = Some(func);
        let body = b.func_body(func);
        self.inline_group(b, body);
    }

    fn inline_group(&mut self, b: &mut Builder, group: BlockGroupId) {
        let mut apply_sites = Vec::new();
        visit_group_exprs_mut_post(b, group, &mut |bld, e| {
            if bld.expr(e).is_apply() {
                apply_sites.push(e);
            }
            VisitResult::Continue
        });
        for apply in apply_sites {
            if b.expr(apply).parent.is_some() && self.check_can_rewrite(b, apply) {
                self.do_inline(b, apply);
            }
        }
    }

    /// Inlines a specific call site unconditionally; the lambda-inline
    /// pass uses this once it has proven a site profitable.
    pub fn inline_call_site(&mut self, b: &mut Builder, apply: ExprId) {
        self.do_inline(b, apply);
    }

    // ================================================================= //
    // Eligibility
    // ================================================================= //

    fn check_can_rewrite(&mut self, b: &Builder, apply: ExprId) -> bool {
        let Some(callee) = b.expr(apply).callee() else { return false };
        // imported, intrinsic, and foreign callees have no body to clone
        if !b.value(callee).is_func_with_body() {
            return false;
        }
        let block = b.expr(apply).parent.expect("apply lives in a block");
        // a call right before a raise almost never runs twice
        if b
            .block_terminator(block)
            .is_some_and(|t| matches!(b.expr(t).kind, ExprKind::RaiseException))
        {
            return false;
        }
        if b.block(block).exprs.len() >= INLINED_BLOCKSIZE_THRESHOLD {
            return false;
        }
        // recursive calls gain nothing from one unrolled layer
        if Some(callee) == self.global_func {
            return false;
        }
        if self.in_black_list(b, callee) {
            return false;
        }
        if INLINE_WHITE_LIST.iter().any(|info| is_expected_function(b, callee, info)) {
            return true;
        }
        if b.value(callee).func_kind() == Some(FuncKind::InstanceVarInit) {
            return true;
        }
        let global = self.global_func.expect("run() sets the enclosing function");
        if self.inlined_count.get(&global).copied().unwrap_or(0) >= INLINED_COUNT_THRESHOLD {
            return false;
        }
        let threshold = self.calculate_threshold(b, callee);
        let size = match self.func_size.get(&callee) {
            Some(&s) => s,
            None => {
                let s = count_func_size(b, callee);
                self.func_size.insert(callee, s);
                s
            }
        };
        if size <= threshold {
            *self.inlined_count.entry(global).or_insert(0) += 1;
            return true;
        }
        false
    }

    fn in_black_list(&self, b: &Builder, callee: ValueId) -> bool {
        if matches!(
            b.value(callee).func_kind(),
            Some(FuncKind::Macro | FuncKind::GlobalVarInit | FuncKind::MainEntry | FuncKind::PackageInit)
        ) {
            return true;
        }
        if let crate::ty::Type::Func(sig) = b.ty(b.value(callee).ty) {
            if sig.is_c {
                return true;
            }
        }
        if b.value(callee).attrs.contains(Attributes::NO_INLINE) {
            return true;
        }
        INLINE_BLACK_LIST.iter().any(|info| is_expected_function(b, callee, info))
    }

    fn calculate_threshold(&self, b: &Builder, callee: ValueId) -> usize {
        let mut threshold = INIT_INLINE_THRESHOLD;
        if only_called_once(b, callee) {
            threshold += threshold / INCREASE_THRESHOLD;
        }
        if self.opt_level < OptLevel::Os {
            if b.value(callee).attrs.contains(Attributes::OPERATOR) {
                threshold = INIT_INLINE_THRESHOLD + INIT_INLINE_THRESHOLD / INCREASE_THRESHOLD;
            }
            if func_with_lambda_arg(b, callee) {
                threshold = INIT_INLINE_THRESHOLD * INCREASE_WHEN_CALLEE_WITH_LAMBDA_ARG;
            }
        }
        threshold
    }

    // ================================================================= //
    // Mechanics
    // ================================================================= //

    fn do_inline(&mut self, b: &mut Builder, apply: ExprId) {
        self.record_effect(b, apply);
        debug!(target: "lapis::inline", at = %b.expr(apply).loc, "function inlined");

        let callee = b.expr(apply).callee().expect("apply has a callee");
        // the callee is either a function with a body or a local lambda
        let (src_group, formals) = if b.value(callee).is_func_with_body() {
            let data = b.value(callee).func_data().expect("callee has a body");
            (data.body, data.params.clone())
        } else {
            let lambda = b.value(callee).defining_expr().expect("lambda callee is a local var");
            let data = b.expr(lambda).lambda_data().expect("callee is a lambda").clone();
            (b.expr(lambda).lambda_body().expect("lambda has a body"), data.params)
        };
        let src_ret = if b.value(callee).is_func_with_body() {
            b.value(callee).func_data().and_then(|d| d.ret_value)
        } else {
            let lambda = b.value(callee).defining_expr().expect("lambda callee is a local var");
            b.expr(lambda).lambda_data().and_then(|d| d.ret_value)
        };

        let subst = instantiation_subst(b, apply, callee);

        // substitute formals with actuals up front: the cloner maps every
        // parameter occurrence directly to its argument (casting where
        // instantiation changed the type)
        let args: Vec<ValueId> = b.expr(apply).call_args().to_vec();
        let mut value_map: AHashMap<ValueId, ValueId> = AHashMap::new();
        for (&formal, &actual) in formals.iter().zip(&args) {
            let formal_ty = b.instantiate_type(b.value(formal).ty, &subst);
            let replacement = if formal_ty != b.value(actual).ty
                && !matches!(b.ty(formal_ty), crate::ty::Type::Generic(_))
            {
                let parent = b.expr(apply).parent.expect("apply lives in a block");
                let cast = b.create_typecast(actual, formal_ty, parent);
                b.move_before(cast, apply);
                b.expr(cast).result.expect("cast has a result")
            } else {
                actual
            };
            value_map.insert(formal, replacement);
        }

        let loc = b.expr(apply).loc;
        let new_group = clone_block_group(b, src_group, &subst, &mut value_map);
        set_group_location(b, new_group, loc);
        let clone_ret = src_ret.and_then(|r| value_map.get(&r).copied());

        // the clone's blocks belong to the caller's group now
        let apply_group = b.parent_group_of(apply).expect("apply lives in a group");
        let clone_entry = b.group(new_group).entry_block();
        let clone_blocks = b.group(new_group).blocks.clone();
        for block in &clone_blocks {
            b.move_block_to_group(*block, apply_group);
        }

        // replace uses of the call's result with loads of the return slot
        if let Some(ret_slot) = clone_ret {
            if let Some(apply_res) = b.expr(apply).result {
                replace_func_result(b, ret_slot, apply_res);
            }
        }

        // splice: first half jumps into the clone, every clone exit jumps
        // to the second half
        let (block1, block2) = b.split_block(apply);
        let goto = b.block_terminator(block1).expect("split leaves a goto");
        b.replace_successor(goto, block2, clone_entry);
        for block in clone_blocks {
            let Some(term) = b.block_terminator(block) else { continue };
            if matches!(b.expr(term).kind, ExprKind::Exit) {
                b.remove_self_from_block(term);
                b.create_goto(block2, block);
            }
        }
    }

    fn record_effect(&mut self, b: &Builder, apply: ExprId) {
        let Some(callee) = b.expr(apply).callee() else { return };
        // lambdas are not global functions; only record func-to-func edges
        if !b.value(callee).is_func_with_body() {
            return;
        }
        let Some(parent) = b.top_level_func_of_expr(apply) else { return };
        self.effect_map.entry(callee).or_default().insert(parent);
    }
}

fn only_called_once(b: &Builder, func: ValueId) -> bool {
    let mut seen_call = false;
    for &user in &b.value(func).users {
        if matches!(b.expr(user).kind, ExprKind::Apply { .. }) {
            if seen_call {
                return false;
            }
            seen_call = true;
        }
    }
    true
}

fn func_with_lambda_arg(b: &Builder, func: ValueId) -> bool {
    let Some(data) = b.value(func).func_data() else { return false };
    data.params.iter().any(|p| b.ty(b.value(*p).ty).is_func())
}

fn expr_size(b: &Builder, e: ExprId) -> usize {
    let Some(body) = b.expr(e).lambda_body() else { return 1 };
    let mut size = 0;
    for &block in &b.group(body).blocks {
        for &inner in &b.block(block).exprs {
            size += expr_size(b, inner);
        }
    }
    size
}

fn count_func_size(b: &Builder, func: ValueId) -> usize {
    let mut size = 0;
    let body = b.func_body(func);
    for &block in &b.group(body).blocks {
        for &e in &b.block(block).exprs {
            size += expr_size(b, e);
            if size >= SEARCH_THRESHOLD {
                return size;
            }
        }
    }
    size
}

/// The substitution a call site imposes on its generic callee.
fn instantiation_subst(b: &Builder, apply: ExprId, callee: ValueId) -> TypeSubst {
    let ExprKind::Apply { instantiate_args, .. } = &b.expr(apply).kind else {
        return TypeSubst::new();
    };
    let Some(data) = b.value(callee).func_data() else { return TypeSubst::new() };
    data.generic_params.iter().copied().zip(instantiate_args.iter().copied()).collect()
}

/// Inlined code reports the call site as its location.
fn set_group_location(b: &mut Builder, group: BlockGroupId, loc: crate::diag::DebugLocation) {
    for block in b.group(group).blocks.clone() {
        for e in b.block(block).exprs.clone() {
            b.expr_mut(e).loc = loc;
            for nested in b.expr(e).execution_order() {
                set_group_location(b, nested, loc);
            }
        }
    }
}

/// Insert a load of the cloned return slot before every user of the old
/// call result and redirect the use, casting when instantiation changed
/// the type.
fn replace_func_result(b: &mut Builder, ret_slot: ValueId, old_res: ValueId) {
    let slot_ty = b.value(ret_slot).ty;
    debug_assert!(b.ty(slot_ty).is_ref());
    let users = b.value(old_res).users.clone();
    if users.is_empty() {
        return;
    }
    let loaded_ty = b.strip_one_ref(slot_ty);
    for user in users {
        let parent = b.expr(user).parent.expect("user lives in a block");
        let load = b.create_load(ret_slot, parent);
        b.move_before(load, user);
        let mut replacement = b.expr(load).result.expect("load has a result");
        if loaded_ty != b.value(old_res).ty {
            let cast = b.create_typecast(replacement, b.value(old_res).ty, parent);
            b.move_before(cast, user);
            replacement = b.expr(cast).result.expect("cast has a result");
        }
        b.replace_operand(user, old_res, replacement);
    }
}

// ===------------------------------------------------------------------===//
// Block-group cloning
// ===------------------------------------------------------------------===//

/// Clones `src` into a fresh group, renumbering locals through
/// `value_map` and instantiating types with `subst`. Parameters seeded in
/// the map beforehand become their mapped values in the clone.
pub fn clone_block_group(
    b: &mut Builder,
    src: BlockGroupId,
    subst: &TypeSubst,
    value_map: &mut AHashMap<ValueId, ValueId>,
) -> BlockGroupId {
    let new_group = b.create_block_group(BlockGroupOwner::Detached);
    let mut block_map: AHashMap<BlockId, BlockId> = AHashMap::new();
    let src_blocks = b.group(src).blocks.clone();
    for &src_block in &src_blocks {
        let new_block = b.create_block(new_group);
        block_map.insert(src_block, new_block);
    }
    if let Some(entry) = b.group(src).entry {
        b.set_entry_block(new_group, block_map[&entry]);
    }

    // results first, so forward references across blocks resolve
    for &src_block in &src_blocks {
        for e in b.block(src_block).exprs.clone() {
            pre_alloc_results(b, e, subst, value_map);
        }
    }
    for &src_block in &src_blocks {
        for e in b.block(src_block).exprs.clone() {
            clone_expr(b, e, block_map[&src_block], &block_map, subst, value_map);
        }
    }
    new_group
}

fn pre_alloc_results(
    b: &mut Builder,
    e: ExprId,
    subst: &TypeSubst,
    value_map: &mut AHashMap<ValueId, ValueId>,
) {
    if let Some(res) = b.expr(e).result {
        let ty = b.instantiate_type(b.value(res).ty, subst);
        let loc = b.value(res).loc;
        let attrs = b.value(res).attrs;
        let new_res = b.alloc_local_value(ty, loc);
        b.value_mut(new_res).attrs = attrs;
        value_map.insert(res, new_res);
    }
    for nested in b.expr(e).groups.clone() {
        for block in b.group(nested).blocks.clone() {
            for inner in b.block(block).exprs.clone() {
                pre_alloc_results(b, inner, subst, value_map);
            }
        }
    }
}

fn clone_expr(
    b: &mut Builder,
    e: ExprId,
    target_block: BlockId,
    block_map: &AHashMap<BlockId, BlockId>,
    subst: &TypeSubst,
    value_map: &mut AHashMap<ValueId, ValueId>,
) -> ExprId {
    let src: Expr = b.expr(e).clone();
    let kind = clone_kind(b, &src.kind, subst);
    let operands: SmallVec<[ValueId; 4]> =
        src.operands.iter().map(|op| value_map.get(op).copied().unwrap_or(*op)).collect();
    let successors: SmallVec<[BlockId; 2]> =
        src.successors.iter().map(|s| block_map.get(s).copied().unwrap_or(*s)).collect();
    let result = src.result.map(|r| value_map[&r]);
    let new_e = b.create_expr_prebuilt(kind, operands, successors, result, target_block, src.loc);

    // nested groups: lambdas and structured control clone recursively
    for nested in src.groups {
        let cloned = clone_block_group(b, nested, subst, value_map);
        b.attach_group(new_e, cloned);
    }
    // a cloned lambda owns fresh parameters and return slot
    if let ExprKind::Lambda(old_data) = &src.kind {
        let old_params = old_data.params.clone();
        let old_ret = old_data.ret_value;
        let mut new_params = Vec::with_capacity(old_params.len());
        for old in old_params {
            let ty = b.instantiate_type(b.value(old).ty, subst);
            let param = b.create_parameter(ty, ParamOwner::Lambda(new_e));
            value_map.insert(old, param);
            new_params.push(param);
        }
        let new_ret = old_ret.and_then(|r| value_map.get(&r).copied());
        if let ExprKind::Lambda(data) = &mut b.expr_mut(new_e).kind {
            data.params = new_params;
            data.ret_value = new_ret;
        }
        // the body was cloned before the parameters were mapped; patch
        // any operand that still names an old parameter
        let body = b.expr(new_e).lambda_body().expect("lambda has a body");
        patch_group_operands(b, body, value_map);
    }
    new_e
}

fn patch_group_operands(b: &mut Builder, group: BlockGroupId, value_map: &AHashMap<ValueId, ValueId>) {
    for block in b.group(group).blocks.clone() {
        for e in b.block(block).exprs.clone() {
            for idx in 0..b.expr(e).operands.len() {
                let op = b.expr(e).operands[idx];
                if let Some(&mapped) = value_map.get(&op) {
                    b.replace_operand_at(e, idx, mapped);
                }
            }
            for nested in b.expr(e).groups.clone() {
                patch_group_operands(b, nested, value_map);
            }
        }
    }
}

fn clone_kind(b: &mut Builder, kind: &ExprKind, subst: &TypeSubst) -> ExprKind {
    match kind {
        ExprKind::Allocate { ty } => ExprKind::Allocate { ty: b.instantiate_type(*ty, subst) },
        ExprKind::InstanceOf { target_ty } => {
            ExprKind::InstanceOf { target_ty: b.instantiate_type(*target_ty, subst) }
        }
        ExprKind::RawArrayAllocate { elem_ty } => {
            ExprKind::RawArrayAllocate { elem_ty: b.instantiate_type(*elem_ty, subst) }
        }
        ExprKind::Invoke { method_name, method_sig, instantiate_args } => ExprKind::Invoke {
            method_name: method_name.clone(),
            method_sig: b.instantiate_type(*method_sig, subst),
            instantiate_args: instantiate_args.iter().map(|t| b.instantiate_type(*t, subst)).collect(),
        },
        ExprKind::InvokeStatic { method_name, method_sig, instantiate_args } => ExprKind::InvokeStatic {
            method_name: method_name.clone(),
            method_sig: b.instantiate_type(*method_sig, subst),
            instantiate_args: instantiate_args.iter().map(|t| b.instantiate_type(*t, subst)).collect(),
        },
        ExprKind::Apply { is_super_call, instantiate_args } => ExprKind::Apply {
            is_super_call: *is_super_call,
            instantiate_args: instantiate_args.iter().map(|t| b.instantiate_type(*t, subst)).collect(),
        },
        // the outer-def-declared prefix survives; only the tail picks up
        // this instantiation
        ExprKind::GetInstantiateValue { inst_tys } => ExprKind::GetInstantiateValue {
            inst_tys: inst_tys.iter().map(|t| b.instantiate_type(*t, subst)).collect(),
        },
        ExprKind::Lambda(data) => ExprKind::Lambda(Box::new(LambdaData {
            params: Vec::new(),
            ret_value: None,
            src_name: data.src_name.clone(),
            is_local_func: data.is_local_func,
        })),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Literal;

    /// S1: `fn foo(p: Int64): Int64 { ret p }` inlined into
    /// `fn bar(): Int64 { foo(2) }` leaves no Apply and the constant
    /// reaches bar's return slot through the store idiom.
    #[test]
    fn test_inline_with_parameter_substitution() {
        let mut b = Builder::new();
        let i64t = b.int64_ty();
        let unit = b.unit_ty();

        // foo
        let foo_ty = b.func_ty(vec![i64t], i64t);
        let foo = b.create_func("foo", foo_ty, FuncKind::Default, "demo");
        let p = b.create_parameter(i64t, ParamOwner::Func(foo));
        let foo_body = b.func_body(foo);
        let foo_entry = b.create_block(foo_body);
        let ret_alloc = b.create_allocate(i64t, foo_entry);
        let ret_slot = b.expr(ret_alloc).result.unwrap();
        b.create_store(p, ret_slot, foo_entry);
        b.create_exit(foo_entry);
        b.value_mut(foo).func_data_mut().unwrap().ret_value = Some(ret_slot);

        // bar
        let bar_ty = b.func_ty(vec![], i64t);
        let bar = b.create_func("bar", bar_ty, FuncKind::Default, "demo");
        let bar_body = b.func_body(bar);
        let bar_entry = b.create_block(bar_body);
        let bar_ret_alloc = b.create_allocate(i64t, bar_entry);
        let bar_ret = b.expr(bar_ret_alloc).result.unwrap();
        let two = b.create_constant(Literal::Int(2), i64t, bar_entry);
        let two_v = b.expr(two).result.unwrap();
        let call = b.create_apply(foo, &[two_v], i64t, bar_entry);
        let call_res = b.expr(call).result.unwrap();
        b.create_store(call_res, bar_ret, bar_entry);
        b.create_exit(bar_entry);
        b.value_mut(bar).func_data_mut().unwrap().ret_value = Some(bar_ret);
        let _ = unit;

        let mut inliner = FunctionInline::new(OptLevel::O2);
        inliner.run(&mut b, bar);

        // no Apply to foo remains anywhere in bar
        let mut applies = 0;
        let mut pre = |bld: &Builder, e: ExprId| {
            if bld.expr(e).is_apply() {
                applies += 1;
            }
            VisitResult::Continue
        };
        let mut post = |_: &Builder, _: ExprId| VisitResult::Continue;
        crate::visitor::visit_group_exprs(&b, bar_body, &mut pre, &mut post);
        assert_eq!(applies, 0);
        assert!(b.expr(call).parent.is_none());

        // the cloned store writes the constant into the cloned slot; the
        // old call result has no users left
        assert!(b.value(call_res).users.is_empty());
        // the inlined body stores %two into the clone's return slot
        let clone_stores_constant = b.group(bar_body).blocks.iter().any(|&blk| {
            b.block(blk).exprs.iter().any(|&e| {
                matches!(b.expr(e).kind, ExprKind::Store)
                    && b.expr(e).operands.first() == Some(&two_v)
                    && b.expr(e).operands.get(1) != Some(&bar_ret)
            })
        });
        assert!(clone_stores_constant);
        // effect map records foo -> bar
        assert!(inliner.effect_map()[&foo].contains(&bar));
    }

    /// Callers above the fan-out cap stop inlining.
    #[test]
    fn test_recursive_callee_is_skipped() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let call = b.create_apply(f, &[], unit, entry);
        b.create_exit(entry);

        let mut inliner = FunctionInline::new(OptLevel::O2);
        inliner.run(&mut b, f);
        assert!(b.expr(call).parent.is_some());
    }

    #[test]
    fn test_no_inline_attribute_is_respected() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let callee = b.create_func("tiny", fty, FuncKind::Default, "demo");
        b.value_mut(callee).attrs |= Attributes::NO_INLINE;
        let callee_body = b.func_body(callee);
        let callee_entry = b.create_block(callee_body);
        b.create_exit(callee_entry);

        let caller = b.create_func("caller", fty, FuncKind::Default, "demo");
        let body = b.func_body(caller);
        let entry = b.create_block(body);
        let call = b.create_apply(callee, &[], unit, entry);
        b.create_exit(entry);

        let mut inliner = FunctionInline::new(OptLevel::O2);
        inliner.run(&mut b, caller);
        assert!(b.expr(call).parent.is_some());
    }
}
