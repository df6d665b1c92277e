//! Maybe-init analysis: which locations may already be initialised.
//!
//! The mirror image of maybe-uninit: stores gen, allocations kill (a fresh
//! allocation is definitely uninitialised), and a delegating constructor
//! call initialises every local member. At any point at least one of
//! maybe-init and maybe-uninit holds for a tracked location.

use ahash::AHashMap;

use crate::builder::Builder;
use crate::expr::{ExprId, ExprKind};
use crate::value::ValueId;

use super::genkill::{GenKillDomain, GenKillKind};
use super::maybe_uninit::{ConstructorInitInfo, MemberInitKind, is_initialising_member_var, save_allocate_map};
use super::{AbstractDomain, FlowTransfer, ReachableKind};

/// Dataflow state: one init bit per tracked fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaybeInitDomain {
    pub bits: GenKillDomain,
}

impl MaybeInitDomain {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { bits: GenKillDomain::new(size, GenKillKind::Maybe) }
    }
}

impl AbstractDomain for MaybeInitDomain {
    fn join(&mut self, other: &Self) -> bool {
        self.bits.join(&other.bits)
    }

    fn describe(&self) -> String {
        self.bits.describe()
    }
}

/// The maybe-init transfer functions for one function.
pub struct MaybeInitTransfer {
    pub func: ValueId,
    pub ctor_info: ConstructorInitInfo,
    pub allocate_idx: AHashMap<ValueId, usize>,
    domain_size: usize,
}

impl MaybeInitTransfer {
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

    /// Whether a tracked allocation may be initialised in `state`; `None`
    /// for untracked locations.
    #[must_use]
    pub fn is_maybe_inited_allocation(&self, state: &MaybeInitDomain, location: ValueId) -> Option<bool> {
        self.allocate_idx.get(&location).map(|idx| state.bits.is_true_at(*idx))
    }

    /// Classifies an all-members index against the current state.
    #[must_use]
    pub fn is_maybe_inited_member(&self, state: &MaybeInitDomain, member_index: usize) -> MemberInitKind {
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

    fn set_all_local_members_inited(&self, state: &mut MaybeInitDomain) {
        for i in 0..self.ctor_info.local_member_count {
            state.bits.gen_fact(i);
        }
    }

    fn handle_apply(&self, b: &Builder, state: &mut MaybeInitDomain, e: ExprId) {
        if !b.value(self.func).is_constructor() {
            return;
        }
        let expr = b.expr(e);
        let ExprKind::Apply { is_super_call, .. } = expr.kind else { return };
        if is_super_call {
            state.bits.gen_fact(self.domain_size - 1);
            return;
        }
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
                state.bits.gen_fact(self.domain_size - 1);
            }
        }
    }
}

impl FlowTransfer for MaybeInitTransfer {
    type Domain = MaybeInitDomain;

    const NAME: &'static str = "maybe-init";

    fn bottom(&mut self, _b: &Builder) -> Self::Domain {
        MaybeInitDomain::new(self.domain_size)
    }

    fn initialize_entry_state(&mut self, _b: &Builder, state: &mut Self::Domain) {
        // all bits stay 0: nothing is initialised on entry
        state.bits.kind = ReachableKind::Reachable;
    }

    fn transfer_expr(&mut self, b: &Builder, state: &mut Self::Domain, e: ExprId) {
        let expr = b.expr(e);
        match &expr.kind {
            ExprKind::Allocate { .. } => {
                // freshly allocated means definitely uninitialised
                if let Some(res) = expr.result {
                    if let Some(&idx) = self.allocate_idx.get(&res) {
                        state.bits.kill_fact(idx);
                    }
                }
            }
            ExprKind::Store => {
                let location = expr.operands[1];
                if let Some(&idx) = self.allocate_idx.get(&location) {
                    state.bits.gen_fact(idx);
                }
            }
            ExprKind::StoreElementRef { .. } => {
                let func = b.top_level_func_of_expr(e).unwrap_or(self.func);
                let Some(member_idx) = is_initialising_member_var(b, func, e) else { return };
                if member_idx < self.ctor_info.super_member_count {
                    return;
                }
                state.bits.gen_fact(member_idx - self.ctor_info.super_member_count);
            }
            ExprKind::Apply { .. } => self.handle_apply(b, state, e),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;
    use crate::value::{FuncKind, Literal};

    /// Builds `fn f() { var x: Int64; if cond { x = 1 } use(x) }` shaped
    /// control flow with plain blocks.
    #[test]
    fn test_init_and_uninit_are_complementary_at_join() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let then_b = b.create_block(body);
        let join_b = b.create_block(body);

        let i64t = b.int64_ty();
        let alloc = b.create_allocate(i64t, entry);
        let x = b.expr(alloc).result.unwrap();
        b.create_debug(x, "x", entry);
        let cond = b.create_bool_literal(true, entry);
        let cond_v = b.expr(cond).result.unwrap();
        b.create_branch(cond_v, then_b, join_b, entry);

        let one = b.create_constant(Literal::Int(1), i64t, then_b);
        let one_v = b.expr(one).result.unwrap();
        b.create_store(one_v, x, then_b);
        b.create_goto(join_b, then_b);

        let load = b.create_load(x, join_b);
        b.create_exit(join_b);

        let ctor = ConstructorInitInfo::default();
        let mut init = Analysis::new(f, MaybeInitTransfer::new(&b, f, ctor.clone()));
        init.run(&b).unwrap();
        let mut uninit = Analysis::new(f, MaybeUninitAnalysisHelper::new(&b, f, ctor));
        uninit.run(&b).unwrap();

        let mut init_states = Vec::new();
        init.for_each_state(&b, &mut |state, e| {
            if e == load {
                init_states.push(state.clone());
            }
        });
        let mut uninit_states = Vec::new();
        uninit.for_each_state(&b, &mut |state, e| {
            if e == load {
                uninit_states.push(state.clone());
            }
        });
        // one arm stores, the other does not: both may-init and may-uninit
        assert_eq!(init.transfer.is_maybe_inited_allocation(&init_states[0], x), Some(true));
        assert_eq!(uninit.transfer.is_maybe_uninited_allocation(&uninit_states[0], x), Some(true));
    }

    use super::super::maybe_uninit::MaybeUninitTransfer as MaybeUninitAnalysisHelper;
}
