//! The var-init checker: use-before-init, illegal `let` reassignment, and
//! member-function calls on a partially initialised receiver.
//!
//! Consumes the maybe-init and maybe-uninit analyses. Findings go to the
//! diagnostic sink with positions from the offending expression; they do
//! not abort the pipeline by themselves.

use rayon::prelude::*;
use std::collections::BTreeSet;

use crate::analysis::Analysis;
use crate::analysis::maybe_init::{MaybeInitDomain, MaybeInitTransfer};
use crate::analysis::maybe_uninit::{
    ConstructorInitInfo, MaybeUninitDomain, MaybeUninitTransfer, MemberInitKind,
    is_initialising_member_var,
};
use crate::builder::Builder;
use crate::def::MemberVar;
use crate::diag::{DiagSink, Diagnostic};
use crate::expr::{ExprId, ExprKind};
use crate::package::Package;
use crate::value::{Attributes, ValueId};

pub struct VarInitCheck<'a> {
    sink: &'a dyn DiagSink,
}

impl<'a> VarInitCheck<'a> {
    #[must_use]
    pub fn new(sink: &'a dyn DiagSink) -> Self {
        Self { sink }
    }

    /// Checks every function of the package, in parallel on a pool sized
    /// by `job_count`.
    pub fn run_on_package(&self, b: &Builder, package: &Package, job_count: usize) {
        let funcs = package.global_funcs();
        let run = || {
            funcs.par_iter().for_each(|func| self.run_on_func(b, *func));
        };
        match rayon::ThreadPoolBuilder::new().num_threads(job_count.max(1)).build() {
            Ok(pool) => pool.install(run),
            Err(_) => run(),
        }
    }

    pub fn run_on_func(&self, b: &Builder, func: ValueId) {
        if b.value(func).attrs.contains(Attributes::SKIP_ANALYSIS) {
            return;
        }
        let ctor_info = constructor_init_info(b, func);
        let members = match ctor_info.this_def {
            Some(def) => b.all_instance_vars(def),
            None => Vec::new(),
        };
        self.use_before_init_check(b, func, &ctor_info, &members);
        self.reassign_inited_let_check(b, func, &ctor_info, &members);
    }

    // ================================================================= //

    fn use_before_init_check(
        &self,
        b: &Builder,
        func: ValueId,
        ctor_info: &ConstructorInitInfo,
        members: &[MemberVar],
    ) {
        let transfer = MaybeUninitTransfer::new(b, func, ctor_info.clone());
        let mut analysis = Analysis::new(func, transfer);
        if analysis.run(b).is_err() {
            // block cap exceeded; results would be unknown anyway
            return;
        }
        let mut observations: Vec<(MaybeUninitDomain, ExprId)> = Vec::new();
        analysis.for_each_state(b, &mut |state, e| {
            if matches!(
                b.expr(e).kind,
                ExprKind::Load | ExprKind::GetElementRef { .. } | ExprKind::Apply { .. }
            ) {
                observations.push((state.clone(), e));
            }
        });
        let transfer = &analysis.transfer;
        for (state, e) in &observations {
            match &b.expr(*e).kind {
                ExprKind::Load => {
                    self.check_load_of_allocation(b, transfer, state, *e);
                }
                ExprKind::GetElementRef { path } => {
                    self.check_member_access(b, func, transfer, state, *e, path, members);
                }
                ExprKind::Apply { .. } => {
                    self.check_member_func_call(b, func, transfer, state, *e, members);
                }
                _ => {}
            }
        }
    }

    fn check_load_of_allocation(
        &self,
        b: &Builder,
        transfer: &MaybeUninitTransfer,
        state: &MaybeUninitDomain,
        e: ExprId,
    ) {
        let location = b.expr(e).operands[0];
        if transfer.is_maybe_uninited_allocation(state, location) != Some(true) {
            return;
        }
        let name = debug_name_of(b, location);
        self.sink.report(Diagnostic::error(
            b.expr(e).loc,
            format!("variable '{name}' is used before being initialized"),
        ));
        self.add_inited_pos_notes(&name, transfer.inited_positions_of_allocation(state, location));
    }

    /// A `GetElementRef` on `this` reading a member that may still be
    /// uninitialised, or whose super constructor has not run yet.
    fn check_member_access(
        &self,
        b: &Builder,
        func: ValueId,
        transfer: &MaybeUninitTransfer,
        state: &MaybeUninitDomain,
        e: ExprId,
        path: &[u64],
        members: &[MemberVar],
    ) {
        if !b.value(func).is_constructor() || path.len() != 1 {
            return;
        }
        let location = b.expr(e).operands[0];
        let this_param =
            b.value(func).func_data().and_then(|d| d.params.first().copied());
        if Some(location) != this_param {
            return;
        }
        let Ok(member_idx) = usize::try_from(path[0]) else { return };
        if member_idx >= members.len() {
            return;
        }
        match transfer.is_maybe_uninited_member(state, member_idx) {
            MemberInitKind::SuperMember => {
                self.sink.report(Diagnostic::error(
                    b.expr(e).loc,
                    format!(
                        "member '{}' is used before the super constructor is called",
                        members[member_idx].name
                    ),
                ));
            }
            MemberInitKind::LocalMember => {
                let name = members[member_idx].name.clone();
                self.sink.report(Diagnostic::error(
                    b.expr(e).loc,
                    format!("member '{name}' is used before being initialized"),
                ));
                self.add_inited_pos_notes(&name, Some(transfer.inited_positions_of_member(state, member_idx)));
            }
            MemberInitKind::Na => {}
        }
    }

    /// Calling a member function of `this` while any local member may be
    /// uninitialised leaks a partially constructed object.
    fn check_member_func_call(
        &self,
        b: &Builder,
        func: ValueId,
        transfer: &MaybeUninitTransfer,
        state: &MaybeUninitDomain,
        e: ExprId,
        members: &[MemberVar],
    ) {
        if !b.value(func).is_constructor() {
            return;
        }
        let expr = b.expr(e);
        let Some(callee) = expr.callee() else { return };
        if b.value(callee).is_constructor() {
            // delegating constructor calls are the initialisation itself
            return;
        }
        let callee_parent = match &b.value(callee).kind {
            crate::value::ValueKind::Func(data) => data.parent_def,
            crate::value::ValueKind::ImportedFunc { parent_def, .. } => *parent_def,
            _ => None,
        };
        let this_def = b.value(func).func_data().and_then(|d| d.parent_def);
        if callee_parent.is_none() || callee_parent != this_def {
            return;
        }
        let this_param = b.value(func).func_data().and_then(|d| d.params.first().copied());
        if expr.call_args().first().copied() != this_param {
            return;
        }
        let uninited = transfer.maybe_uninited_local_members(state);
        if uninited.is_empty() {
            return;
        }
        let names: Vec<&str> = uninited
            .iter()
            .filter_map(|i| members.get(*i).map(|m| m.name.as_str()))
            .collect();
        self.sink.report(Diagnostic::error(
            expr.loc,
            format!(
                "cannot call member function '{}' before member{} {} {} initialized",
                b.value(callee).ident_without_prefix(),
                if names.len() > 1 { "s" } else { "" },
                names.join(", "),
                if names.len() > 1 { "are" } else { "is" },
            ),
        ));
    }

    // ================================================================= //

    fn reassign_inited_let_check(
        &self,
        b: &Builder,
        func: ValueId,
        ctor_info: &ConstructorInitInfo,
        members: &[MemberVar],
    ) {
        let transfer = MaybeInitTransfer::new(b, func, ctor_info.clone());
        let mut analysis = Analysis::new(func, transfer);
        if analysis.run(b).is_err() {
            return;
        }
        let mut observations: Vec<(MaybeInitDomain, ExprId)> = Vec::new();
        analysis.for_each_state(b, &mut |state, e| {
            if matches!(b.expr(e).kind, ExprKind::Store | ExprKind::StoreElementRef { .. }) {
                observations.push((state.clone(), e));
            }
        });
        let transfer = &analysis.transfer;
        for (state, e) in &observations {
            match &b.expr(*e).kind {
                ExprKind::Store => {
                    let location = b.expr(*e).operands[1];
                    if !b.value(location).attrs.contains(Attributes::LET) {
                        continue;
                    }
                    if transfer.is_maybe_inited_allocation(state, location) == Some(true) {
                        let name = debug_name_of(b, location);
                        self.sink.report(Diagnostic::error(
                            b.expr(*e).loc,
                            format!("cannot reassign initialized let binding '{name}'"),
                        ));
                    }
                }
                ExprKind::StoreElementRef { .. } => {
                    let Some(member_idx) = is_initialising_member_var(b, func, *e) else { continue };
                    let Some(member) = members.get(member_idx) else { continue };
                    if !member.attrs.contains(Attributes::LET) {
                        continue;
                    }
                    if transfer.is_maybe_inited_member(state, member_idx) == MemberInitKind::LocalMember {
                        self.sink.report(Diagnostic::error(
                            b.expr(*e).loc,
                            format!("cannot reassign initialized let member '{}'", member.name),
                        ));
                    }
                }
                _ => {}
            }
        }
    }

    fn add_inited_pos_notes(&self, identifier: &str, positions: Option<&BTreeSet<u32>>) {
        let Some(positions) = positions else { return };
        for &line in positions {
            self.sink.report(Diagnostic::note(
                crate::diag::DebugLocation::new(0, line, 0),
                format!("'{identifier}' may have been initialized here"),
            ));
        }
    }
}

/// Derives the constructor context of `func`: the def it initialises, the
/// super class, and the member split.
pub fn constructor_init_info(b: &Builder, func: ValueId) -> ConstructorInitInfo {
    let mut info = ConstructorInitInfo::default();
    if !b.value(func).is_constructor() {
        return info;
    }
    let Some(def) = b.value(func).func_data().and_then(|d| d.parent_def) else {
        return info;
    };
    info.this_def = Some(def);
    info.super_class = b.super_class_def(def);
    info.super_member_count = b.super_member_count(def);
    info.local_member_count = b.def(def).instance_vars.len();
    info
}

/// The source name a location was declared under, from its debug binding.
fn debug_name_of(b: &Builder, location: ValueId) -> String {
    b.debug_expr_of(location)
        .and_then(|d| match &b.expr(d).kind {
            ExprKind::Debug { name } => Some(name.clone()),
            _ => None,
        })
        .unwrap_or_else(|| b.value(location).ident.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::CollectSink;
    use crate::value::{FuncKind, Literal};

    /// `var x: Int64` then a load before any store: one error at the
    /// load's line.
    #[test]
    fn test_use_before_init_is_reported() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let alloc = b.create_allocate(i64t, entry);
        let x = b.expr(alloc).result.unwrap();
        b.create_debug(x, "x", entry);
        let load = b.create_load(x, entry);
        b.expr_mut(load).loc = crate::diag::DebugLocation::new(1, 12, 5);
        b.create_exit(entry);

        let sink = CollectSink::new();
        VarInitCheck::new(&sink).run_on_func(&b, f);
        let diags = sink.take();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("'x' is used before being initialized"));
        assert_eq!(diags[0].location.line, 12);
    }

    /// A store after initialisation of a `let` binding is rejected; the
    /// first store is fine.
    #[test]
    fn test_reassign_let_is_reported() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let alloc = b.create_allocate(i64t, entry);
        let x = b.expr(alloc).result.unwrap();
        b.value_mut(x).attrs |= Attributes::LET;
        b.create_debug(x, "x", entry);
        let c1 = b.create_constant(Literal::Int(1), i64t, entry);
        let v1 = b.expr(c1).result.unwrap();
        b.create_store(v1, x, entry);
        let c2 = b.create_constant(Literal::Int(2), i64t, entry);
        let v2 = b.expr(c2).result.unwrap();
        b.create_store(v2, x, entry);
        b.create_exit(entry);

        let sink = CollectSink::new();
        VarInitCheck::new(&sink).run_on_func(&b, f);
        let diags = sink.take();
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("reassign initialized let binding 'x'"));
    }

    /// A store on only one path leaves the variable initialised-maybe;
    /// loading on the joined path is still an error.
    #[test]
    fn test_partial_init_still_reported() {
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
        let store = b.create_store(one_v, x, then_b);
        b.expr_mut(store).loc = crate::diag::DebugLocation::new(1, 3, 9);
        b.create_goto(join_b, then_b);
        b.create_load(x, join_b);
        b.create_exit(join_b);

        let sink = CollectSink::new();
        VarInitCheck::new(&sink).run_on_func(&b, f);
        let diags = sink.take();
        // one error plus a note pointing at the store line
        assert!(diags.iter().any(|d| d.message.contains("used before being initialized")));
        assert!(diags.iter().any(|d| d.severity == crate::diag::Severity::Note && d.location.line == 3));
    }
}
