//! Forward dataflow over the IR, parametric in an abstract domain.
//!
//! The engine processes a function's body with a worklist over blocks in
//! reverse post-order. A block's entry state is the join of its
//! predecessors' exit states; structured-control expressions recurse into
//! their nested groups; lambda bodies are analysed with a fresh entry
//! after a pluggable captured-variable hook has coarsened the state.
//!
//! After the fixpoint, [`Analysis::for_each_state`] replays the transfers
//! to expose the state immediately before every expression, which is how
//! the checkers consume analysis results.

pub mod call_graph;
pub mod genkill;
pub mod maybe_init;
pub mod maybe_uninit;
pub mod value_analysis;

use std::collections::VecDeque;

use ahash::AHashMap;
use tracing::trace;

use crate::block::{BlockGroupId, BlockId};
use crate::builder::Builder;
use crate::diag::CheckError;
use crate::expr::{ExprId, ExprKind};
use crate::value::ValueId;

/// Whether a program point has been reached by any path yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachableKind {
    Reachable,
    Unreachable,
}

/// An abstract domain the engine can drive.
pub trait AbstractDomain: Clone {
    /// Joins `other` into `self`; returns whether anything changed.
    fn join(&mut self, other: &Self) -> bool;
    /// Rendering for trace output.
    fn describe(&self) -> String {
        String::new()
    }
}

/// The transfer functions of one analysis instance.
pub trait FlowTransfer {
    type Domain: AbstractDomain;

    /// Analysis name, for tracing.
    const NAME: &'static str;

    /// Functions whose groups exceed this many blocks abort the analysis;
    /// consumers then treat results as unknown.
    fn block_limit(&self) -> Option<usize> {
        None
    }

    /// The empty initial element.
    fn bottom(&mut self, b: &Builder) -> Self::Domain;

    /// Prepares the state at the function entry.
    fn initialize_entry_state(&mut self, b: &Builder, state: &mut Self::Domain);

    /// Prepares the fresh state a lambda body starts from.
    fn initialize_lambda_entry_state(&mut self, b: &Builder, lambda: ExprId, state: &mut Self::Domain) {
        let _ = (b, lambda);
        self.initialize_entry_state(b, state);
    }

    /// Invoked at a `Lambda` expression before its body is analysed;
    /// typically coarsens captured variables.
    fn handle_captured_vars(&mut self, b: &Builder, lambda: ExprId, state: &mut Self::Domain) {
        let _ = (b, lambda, state);
    }

    /// Effect of a non-terminator expression.
    fn transfer_expr(&mut self, b: &Builder, state: &mut Self::Domain, e: ExprId);

    /// Effect of a terminator; may refine control to one live successor.
    fn transfer_terminator(&mut self, b: &Builder, state: &mut Self::Domain, t: ExprId) -> Option<BlockId> {
        let _ = (b, state, t);
        None
    }
}

/// The dataflow engine.
pub struct Analysis<T: FlowTransfer> {
    pub func: ValueId,
    pub transfer: T,
    block_in: AHashMap<BlockId, T::Domain>,
    block_out: AHashMap<BlockId, T::Domain>,
    /// When a terminator refined control, only this successor receives the
    /// block's exit state.
    live_succ: AHashMap<BlockId, BlockId>,
}

impl<T: FlowTransfer> Analysis<T> {
    pub fn new(func: ValueId, transfer: T) -> Self {
        Self {
            func,
            transfer,
            block_in: AHashMap::new(),
            block_out: AHashMap::new(),
            live_succ: AHashMap::new(),
        }
    }

    /// Runs to fixpoint over the function body.
    pub fn run(&mut self, b: &Builder) -> Result<(), CheckError> {
        let body = b.func_body(self.func);
        let mut entry = self.transfer.bottom(b);
        self.transfer.initialize_entry_state(b, &mut entry);
        trace!(target: "lapis::analysis", analysis = T::NAME, func = %b.value(self.func).ident, "run");
        self.fixpoint_group(b, body, entry)?;
        Ok(())
    }

    /// The computed state at the entry of `block`, when reachable.
    #[must_use]
    pub fn state_at_block_entry(&self, block: BlockId) -> Option<&T::Domain> {
        self.block_in.get(&block)
    }

    /// Replays the transfers, invoking `f` with the state immediately
    /// before each expression, in execution order, lambda bodies included.
    pub fn for_each_state(&mut self, b: &Builder, f: &mut dyn FnMut(&T::Domain, ExprId)) {
        let body = b.func_body(self.func);
        self.replay_group(b, body, f);
    }

    fn fixpoint_group(
        &mut self,
        b: &Builder,
        group: BlockGroupId,
        input: T::Domain,
    ) -> Result<T::Domain, CheckError> {
        if let Some(limit) = self.transfer.block_limit() {
            if b.group(group).blocks.len() > limit {
                return Err(CheckError::AnalysisAborted);
            }
        }
        let Some(entry) = b.group(group).entry else {
            return Ok(input);
        };
        // Seed the entry with the group input. Joins accumulate across
        // repeated invocations (loops around a structured group).
        match self.block_in.get_mut(&entry) {
            Some(existing) => {
                existing.join(&input);
            }
            None => {
                self.block_in.insert(entry, input);
            }
        }

        let order = b.reverse_post_order(group);
        let mut worklist: VecDeque<BlockId> = order.iter().copied().collect();
        let mut queued: ahash::AHashSet<BlockId> = worklist.iter().copied().collect();

        while let Some(block) = worklist.pop_front() {
            queued.remove(&block);
            // entry state = join of predecessors' exits; the entry block
            // additionally joins the group input seeded above
            let mut acc: Option<T::Domain> =
                (block == entry).then(|| self.block_in.get(&entry).cloned().expect("entry state seeded"));
            for pred in &b.block(block).preds {
                if let Some(live) = self.live_succ.get(pred) {
                    if *live != block {
                        continue;
                    }
                }
                if let Some(out) = self.block_out.get(pred) {
                    match &mut acc {
                        Some(a) => {
                            a.join(out);
                        }
                        None => acc = Some(out.clone()),
                    }
                }
            }
            let Some(mut state) = acc else {
                // no reachable predecessor yet
                continue;
            };
            self.block_in.insert(block, state.clone());

            let exprs = b.block(block).exprs.clone();
            let mut live = None;
            for e in exprs {
                live = self.apply_expr(b, &mut state, e, true, &mut None)?;
            }

            let changed = match self.block_out.get_mut(&block) {
                Some(old) => old.join(&state),
                None => {
                    self.block_out.insert(block, state);
                    true
                }
            };
            match live {
                Some(l) => {
                    self.live_succ.insert(block, l);
                }
                None => {
                    self.live_succ.remove(&block);
                }
            }
            if changed {
                if let Some(term) = b.block_terminator(block) {
                    for suc in b.expr(term).successors() {
                        if b.block(*suc).parent == b.block(block).parent && queued.insert(*suc) {
                            worklist.push_back(*suc);
                        }
                    }
                }
            }
        }
        Ok(self.group_exit_state(b, group))
    }

    /// Applies one expression's transfer, recursing into structured control
    /// and lambdas. Returns the live successor for terminators that
    /// refine control.
    fn apply_expr(
        &mut self,
        b: &Builder,
        state: &mut T::Domain,
        e: ExprId,
        fixpoint: bool,
        observer: &mut Option<&mut dyn FnMut(&T::Domain, ExprId)>,
    ) -> Result<Option<BlockId>, CheckError> {
        if let Some(f) = observer.as_mut() {
            f(state, e);
        }
        let expr = b.expr(e);
        if expr.kind.is_structured_control() {
            let order = expr.execution_order();
            let is_loop = matches!(expr.kind, ExprKind::Loop | ExprKind::ForIn(_));
            let mut exit: Option<T::Domain> = is_loop.then(|| state.clone());
            for nested in order {
                let nested_exit = if fixpoint {
                    self.fixpoint_group(b, nested, state.clone())?
                } else {
                    self.replay_group_collect_exit(b, nested, observer)
                };
                match &mut exit {
                    Some(acc) => {
                        acc.join(&nested_exit);
                    }
                    None => exit = Some(nested_exit),
                }
            }
            if let Some(exit) = exit {
                *state = exit;
            }
            return Ok(None);
        }
        if expr.is_lambda() {
            self.transfer.handle_captured_vars(b, e, state);
            let body = expr.lambda_body().expect("lambda has a body group");
            let mut fresh = self.transfer.bottom(b);
            self.transfer.initialize_lambda_entry_state(b, e, &mut fresh);
            if fixpoint {
                let _ = self.fixpoint_group(b, body, fresh)?;
            } else {
                let _ = self.replay_group_collect_exit(b, body, observer);
            }
            self.transfer.transfer_expr(b, state, e);
            return Ok(None);
        }
        if expr.is_terminator() {
            return Ok(self.transfer.transfer_terminator(b, state, e));
        }
        self.transfer.transfer_expr(b, state, e);
        Ok(None)
    }

    fn replay_group(&mut self, b: &Builder, group: BlockGroupId, f: &mut dyn FnMut(&T::Domain, ExprId)) {
        let mut observer: Option<&mut dyn FnMut(&T::Domain, ExprId)> = Some(f);
        let _ = self.replay_group_inner(b, group, &mut observer);
    }

    fn replay_group_collect_exit(
        &mut self,
        b: &Builder,
        group: BlockGroupId,
        observer: &mut Option<&mut dyn FnMut(&T::Domain, ExprId)>,
    ) -> T::Domain {
        self.replay_group_inner(b, group, observer)
    }

    fn replay_group_inner(
        &mut self,
        b: &Builder,
        group: BlockGroupId,
        observer: &mut Option<&mut dyn FnMut(&T::Domain, ExprId)>,
    ) -> T::Domain {
        for block in b.group(group).blocks.clone() {
            let Some(start) = self.block_in.get(&block) else { continue };
            let mut state = start.clone();
            for e in b.block(block).exprs.clone() {
                // replay never aborts: the fixpoint already ran
                let _ = self.apply_expr(b, &mut state, e, false, observer);
            }
        }
        self.group_exit_state(b, group)
    }

    /// The composite exit: the join of the exit states of blocks leaving
    /// the group through an `Exit` terminator.
    fn group_exit_state(&mut self, b: &Builder, group: BlockGroupId) -> T::Domain {
        let mut exit: Option<T::Domain> = None;
        for block in &b.group(group).blocks {
            let Some(term) = b.block_terminator(*block) else { continue };
            if !matches!(b.expr(term).kind, ExprKind::Exit) {
                continue;
            }
            if let Some(out) = self.block_out.get(block) {
                match &mut exit {
                    Some(acc) => {
                        acc.join(out);
                    }
                    None => exit = Some(out.clone()),
                }
            }
        }
        exit.unwrap_or_else(|| self.transfer.bottom(b))
    }
}
