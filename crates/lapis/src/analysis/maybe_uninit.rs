//! Maybe-uninit analysis: which locations may still be uninitialised.
//!
//! One bit per fact, in this order: constructor-local member variables,
//! then every allocation that carries a debug name, then (when the
//! enclosing class has a super class) one trailing "super constructor not
//! yet called" bit. The analysis is a *maybe* kind: a location is flagged
//! if any path leaves it uninitialised.
//!
//! Alongside the bits, the domain records the source lines of stores seen
//! so far per fact; the var-init checker turns these into notes.

use std::collections::BTreeSet;

use ahash::AHashMap;

use crate::block::BlockGroupId;
use crate::builder::Builder;
use crate::expr::{ExprId, ExprKind};
use crate::ty::DefId;
use crate::value::ValueId;

use super::genkill::{GenKillDomain, GenKillKind};
use super::{AbstractDomain, FlowTransfer, ReachableKind};

/// Context for analysing a constructor.
#[derive(Debug, Clone, Default)]
pub struct ConstructorInitInfo {
    pub this_def: Option<DefId>,
    pub super_class: Option<DefId>,
    /// Members inherited from the super-class chain.
    pub super_member_count: usize,
    /// Members declared on the def itself.
    pub local_member_count: usize,
}

/// Whether a member index names a super or local member in the current
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberInitKind {
    SuperMember,
    LocalMember,
    Na,
}

/// Collects the bit index of every debug-named allocation under `group`,
/// descending into lambda bodies.
pub fn save_allocate_map(
    b: &Builder,
    group: BlockGroupId,
    next_idx: &mut usize,
    map: &mut AHashMap<ValueId, usize>,
) {
    for &block in &b.group(group).blocks {
        for &e in &b.block(block).exprs {
            let expr = b.expr(e);
            if matches!(expr.kind, ExprKind::Allocate { .. }) {
                if let Some(res) = expr.result {
                    if b.debug_expr_of(res).is_some() {
                        map.insert(res, *next_idx);
                        *next_idx += 1;
                    }
                }
            }
            if let Some(body) = expr.lambda_body() {
                save_allocate_map(b, body, next_idx, map);
            }
        }
    }
}

/// For a `StoreElementRef` inside a constructor writing through `this`
/// with a single-step path, the member index being initialised.
pub fn is_initialising_member_var(b: &Builder, func: ValueId, store: ExprId) -> Option<usize> {
    let expr = b.expr(store);
    let ExprKind::StoreElementRef { path } = &expr.kind else { return None };
    let location = *expr.operands.get(1)?;
    if !b.value(func).is_constructor() || !b.value(location).is_parameter() {
        return None;
    }
    let this_param = *b.value(func).func_data()?.params.first()?;
    if location == this_param && path.len() == 1 {
        return usize::try_from(path[0]).ok();
    }
    None
}

/// Dataflow state: uninit bits plus the store lines seen per fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaybeUninitDomain {
    pub bits: GenKillDomain,
    pub maybe_inited_pos: Vec<BTreeSet<u32>>,
}

impl MaybeUninitDomain {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            bits: GenKillDomain::new(size, GenKillKind::Maybe),
            maybe_inited_pos: vec![BTreeSet::new(); size],
        }
    }
}

impl AbstractDomain for MaybeUninitDomain {
    fn join(&mut self, other: &Self) -> bool {
        for (mine, theirs) in self.maybe_inited_pos.iter_mut().zip(&other.maybe_inited_pos) {
            mine.extend(theirs.iter().copied());
        }
        self.bits.join(&other.bits)
    }

    fn describe(&self) -> String {
        self.bits.describe()
    }
}

/// The maybe-uninit transfer functions for one function.
pub struct MaybeUninitTransfer {
    pub func: ValueId,
    pub ctor_info: ConstructorInitInfo,
    pub allocate_idx: AHashMap<ValueId, usize>,
    domain_size: usize,
}

impl MaybeUninitTransfer {
    pub fn new(b: &Builder, func: ValueId, ctor_info: ConstructorInitInfo) -> Self {
        let mut next_idx = ctor_info.local_member_count;
        let mut allocate_idx = AHashMap::new();
        save_allocate_map(b, b.func_body(func), &mut next_idx, &mut allocate_idx);
        let mut domain_size = next_idx;
        if ctor_info.super_class.is_some() {
            domain_size += 1;
        }
        Self { func, ctor_info, allocate_idx, domain_size }
    }

    /// Whether a tracked allocation may be uninitialised in `state`;
    /// `None` for untracked locations.
    #[must_use]
    pub fn is_maybe_uninited_allocation(&self, state: &MaybeUninitDomain, location: ValueId) -> Option<bool> {
        self.allocate_idx.get(&location).map(|idx| state.bits.is_true_at(*idx))
    }

    /// Store lines recorded for a tracked allocation.
    #[must_use]
    pub fn inited_positions_of_allocation<'a>(
        &self,
        state: &'a MaybeUninitDomain,
        location: ValueId,
    ) -> Option<&'a BTreeSet<u32>> {
        self.allocate_idx.get(&location).map(|idx| &state.maybe_inited_pos[*idx])
    }

    /// Classifies an all-members index against the current state.
    #[must_use]
    pub fn is_maybe_uninited_member(&self, state: &MaybeUninitDomain, member_index: usize) -> MemberInitKind {
        let info = &self.ctor_info;
        if member_index < info.super_member_count {
            if state.bits.is_true_at(self.domain_size - 1) {
                MemberInitKind::SuperMember
            } else {
                MemberInitKind::Na
            }
        } else if member_index < info.super_member_count + info.local_member_count {
            if state.bits.is_true_at(member_index - info.super_member_count) {
                MemberInitKind::LocalMember
            } else {
                MemberInitKind::Na
            }
        } else {
            unreachable!("member index {member_index} beyond the def's member count")
        }
    }

    /// Store lines recorded for an all-members index.
    #[must_use]
    pub fn inited_positions_of_member<'a>(
        &self,
        state: &'a MaybeUninitDomain,
        member_index: usize,
    ) -> &'a BTreeSet<u32> {
        debug_assert!(member_index >= self.ctor_info.super_member_count);
        &state.maybe_inited_pos[member_index - self.ctor_info.super_member_count]
    }

    /// All-members indices of local members that may be uninitialised.
    #[must_use]
    pub fn maybe_uninited_local_members(&self, state: &MaybeUninitDomain) -> Vec<usize> {
        (0..self.ctor_info.local_member_count)
            .filter(|i| state.bits.is_true_at(*i))
            .map(|i| i + self.ctor_info.super_member_count)
            .collect()
    }

    fn set_all_local_members_inited(&self, state: &mut MaybeUninitDomain) {
        for i in 0..self.ctor_info.local_member_count {
            state.bits.kill_fact(i);
        }
    }

    fn handle_apply(&self, b: &Builder, state: &mut MaybeUninitDomain, e: ExprId) {
        if !b.value(self.func).is_constructor() {
            return;
        }
        let expr = b.expr(e);
        let ExprKind::Apply { is_super_call, .. } = expr.kind else { return };
        if is_super_call {
            state.bits.kill_fact(self.domain_size - 1);
            return;
        }
        // a delegation to a sibling constructor of the same def with
        // `this` as its first argument initialises everything
        let Some(callee) = expr.callee() else { return };
        if !b.value(callee).is_func_with_body() || !b.value(callee).is_constructor() {
            return;
        }
        let callee_parent = b.value(callee).func_data().and_then(|d| d.parent_def);
        let this_param = b.value(self.func).func_data().and_then(|d| d.params.first().copied());
        if callee_parent == self.ctor_info.this_def
            && callee_parent.is_some()
            && expr.call_args().first().copied() == this_param
        {
            self.set_all_local_members_inited(state);
            if self.ctor_info.super_class.is_some() {
                state.bits.kill_fact(self.domain_size - 1);
            }
        }
    }
}

impl FlowTransfer for MaybeUninitTransfer {
    type Domain = MaybeUninitDomain;

    const NAME: &'static str = "maybe-uninit";

    fn bottom(&mut self, _b: &Builder) -> Self::Domain {
        MaybeUninitDomain::new(self.domain_size)
    }

    fn initialize_entry_state(&mut self, _b: &Builder, state: &mut Self::Domain) {
        // everything starts uninitialised
        state.bits.kind = ReachableKind::Reachable;
        state.bits.gen_all();
    }

    fn transfer_expr(&mut self, b: &Builder, state: &mut Self::Domain, e: ExprId) {
        let expr = b.expr(e);
        match &expr.kind {
            ExprKind::Allocate { .. } => {
                if let Some(res) = expr.result {
                    if let Some(&idx) = self.allocate_idx.get(&res) {
                        state.bits.gen_fact(idx);
                    }
                }
            }
            ExprKind::Store => {
                let location = expr.operands[1];
                if let Some(&idx) = self.allocate_idx.get(&location) {
                    state.bits.kill_fact(idx);
                    state.maybe_inited_pos[idx].insert(expr.loc.line);
                }
            }
            ExprKind::StoreElementRef { .. } => {
                let func = b.top_level_func_of_expr(e).unwrap_or(self.func);
                let Some(member_idx) = is_initialising_member_var(b, func, e) else { return };
                debug_assert!(
                    member_idx < self.ctor_info.super_member_count + self.ctor_info.local_member_count
                );
                if member_idx < self.ctor_info.super_member_count {
                    return;
                }
                let state_idx = member_idx - self.ctor_info.super_member_count;
                state.bits.kill_fact(state_idx);
                state.maybe_inited_pos[state_idx].insert(b.expr(e).loc.line);
            }
            ExprKind::Apply { .. } => self.handle_apply(b, state, e),
            _ => {}
        }
    }
}
