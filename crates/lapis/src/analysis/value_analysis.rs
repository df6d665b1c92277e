//! Symbolic value analysis over abstract objects and references.
//!
//! The state tracks, per value, either a domain element, a symbolic
//! *abstract object*, or a *reference* to such an object (one or two
//! levels of indirection). Three maps carry the state: `program` (value →
//! domain), `ref_map` (ref → ref or object), and a shared `children` map
//! (object → per-field objects; for enums, child 0 is the constructor
//! selector). Each static allocation site owns exactly one abstract
//! ref/object, which is what makes the analysis converge on loops.
//!
//! A per-package global state over read-only global variables is built
//! once before the per-function analyses run and is read-only afterwards.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use crate::builder::Builder;
use crate::expr::{ExprId, ExprKind};
use crate::package::Package;
use crate::ty::Type;
use crate::value::{Attributes, Literal, ValueId, ValueKind};

use super::{AbstractDomain, FlowTransfer, ReachableKind};

/// Result of joining two abstract values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueJoinOutcome {
    Unchanged,
    Changed,
    /// The values have no common refinement; the carrying state lifts the
    /// slot to `Top`.
    Diverged,
}

/// A lattice of concrete-ish values the analysis can track.
pub trait AbstractValue: Clone + PartialEq {
    /// Joins `other` into `self`.
    fn join(&mut self, other: &Self) -> ValueJoinOutcome;

    /// The element for a known literal, when the domain tracks it.
    fn from_literal(lit: &Literal) -> Option<Self>
    where
        Self: Sized,
    {
        let _ = lit;
        None
    }

    /// A definite boolean, when the element implies one. Lets the engine
    /// refine a `Branch` to its single live successor.
    fn as_bool(&self) -> Option<bool> {
        None
    }

    fn describe(&self) -> String;
}

/// An abstract reference. [`RefId::TOP`] is the unknown reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefId(u32);

impl RefId {
    pub const TOP: Self = Self(u32::MAX);

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }

    #[must_use]
    pub fn is_top(self) -> bool {
        self == Self::TOP
    }
}

/// An abstract object; one per static allocation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(u32);

impl ObjId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Key of the program-state map: an IR value or an abstract object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tracked {
    Val(ValueId),
    Obj(ObjId),
}

/// What a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    Ref(RefId),
    Obj(ObjId),
}

/// The per-value lattice element.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDomain<V> {
    Top,
    Bottom,
    Val(V),
    Ref(RefId),
}

impl<V: AbstractValue> ValueDomain<V> {
    #[must_use]
    pub fn as_value(&self) -> Option<&V> {
        match self {
            Self::Val(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_ref_id(&self) -> Option<RefId> {
        match self {
            Self::Ref(r) => Some(*r),
            _ => None,
        }
    }

    fn join(&mut self, other: &Self) -> bool {
        match (&mut *self, other) {
            (Self::Top, _) => false,
            (_, Self::Bottom) => false,
            (Self::Bottom, _) => {
                *self = other.clone();
                true
            }
            (Self::Val(a), Self::Val(b)) => match a.join(b) {
                ValueJoinOutcome::Unchanged => false,
                ValueJoinOutcome::Changed => true,
                ValueJoinOutcome::Diverged => {
                    *self = Self::Top;
                    true
                }
            },
            (Self::Ref(a), Self::Ref(b)) if *a == *b => false,
            (Self::Ref(a), Self::Ref(_)) if a.is_top() => false,
            (Self::Ref(_), Self::Ref(b)) if b.is_top() => {
                *self = Self::Ref(RefId::TOP);
                true
            }
            // structurally different states collapse to unknown
            _ => {
                *self = Self::Top;
                true
            }
        }
    }
}

struct RefInfo {
    #[expect(dead_code, reason = "names surface only in trace output")]
    name: String,
    #[expect(dead_code, reason = "distinguishes global-state refs in dumps")]
    is_static: bool,
    /// References this one was merged from, used for equivalence checks
    /// during joins.
    roots: Vec<RefId>,
}

struct ObjInfo {
    name: String,
}

/// Pools and structural maps shared by every state of one analysis run.
///
/// The children map and per-site memo tables are identical across all the
/// states of an analysis; states share them through an `Rc`. Value
/// analyses are strictly per-function and single-threaded, so the shared
/// cell is never contended.
#[derive(Default)]
pub struct ValuePools {
    refs: Vec<RefInfo>,
    objs: Vec<ObjInfo>,
    children: AHashMap<Tracked, Vec<ObjId>>,
    allocated_ref: AHashMap<ExprId, RefId>,
    allocated_two_level_ref: AHashMap<ExprId, RefId>,
    allocated_obj: AHashMap<ExprId, ObjId>,
    is_global: bool,
}

impl ValuePools {
    fn create_ref(&mut self, site: Option<ExprId>, two_level: bool) -> RefId {
        if let Some(site) = site {
            let memo = if two_level { &self.allocated_two_level_ref } else { &self.allocated_ref };
            if let Some(&r) = memo.get(&site) {
                return r;
            }
        }
        let id = RefId(u32::try_from(self.refs.len()).expect("ref pool exceeds u32"));
        let prefix = if self.is_global { "sRef" } else { "Ref" };
        self.refs.push(RefInfo {
            name: format!("{prefix}{}", id.0),
            is_static: self.is_global,
            roots: Vec::new(),
        });
        if let Some(site) = site {
            let memo =
                if two_level { &mut self.allocated_two_level_ref } else { &mut self.allocated_ref };
            memo.insert(site, id);
        }
        id
    }

    fn create_obj(&mut self, site: Option<ExprId>) -> ObjId {
        if let Some(site) = site {
            if let Some(&o) = self.allocated_obj.get(&site) {
                return o;
            }
        }
        let id = ObjId(u32::try_from(self.objs.len()).expect("object pool exceeds u32"));
        let prefix = if self.is_global { "sObj" } else { "Obj" };
        self.objs.push(ObjInfo { name: format!("{prefix}{}", id.0) });
        if let Some(site) = site {
            self.allocated_obj.insert(site, id);
        }
        id
    }

    fn create_child_obj(&mut self, parent_name: &str, field: usize) -> ObjId {
        let id = ObjId(u32::try_from(self.objs.len()).expect("object pool exceeds u32"));
        self.objs.push(ObjInfo { name: format!("{parent_name}.{field}") });
        id
    }

    fn obj_name(&self, obj: ObjId) -> String {
        self.objs[obj.index()].name.clone()
    }

    /// Two refs are equivalent when they were merged from the same roots.
    fn equivalent(&self, a: RefId, b: RefId) -> bool {
        if a.is_top() || b.is_top() {
            return false;
        }
        let ra = &self.refs[a.index()].roots;
        let rb = &self.refs[b.index()].roots;
        !ra.is_empty() && ra == rb
    }

    /// Whether `a` transitively subsumes `b` through its merge roots.
    fn can_represent(&self, a: RefId, b: RefId) -> bool {
        if a.is_top() || b.is_top() {
            return false;
        }
        let mut stack = self.refs[a.index()].roots.clone();
        while let Some(r) = stack.pop() {
            if r == b {
                return true;
            }
            if !r.is_top() {
                stack.extend(self.refs[r.index()].roots.iter().copied());
            }
        }
        false
    }
}

/// The dataflow state of the value analysis.
pub struct ValueState<V> {
    pub kind: ReachableKind,
    program: AHashMap<Tracked, ValueDomain<V>>,
    ref_map: AHashMap<RefId, RefTarget>,
    pools: Rc<RefCell<ValuePools>>,
}

impl<V: AbstractValue> Clone for ValueState<V> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            program: self.program.clone(),
            ref_map: self.ref_map.clone(),
            pools: Rc::clone(&self.pools),
        }
    }
}

impl<V: AbstractValue> ValueState<V> {
    #[must_use]
    pub fn new(pools: Rc<RefCell<ValuePools>>) -> Self {
        Self { kind: ReachableKind::Unreachable, program: AHashMap::new(), ref_map: AHashMap::new(), pools }
    }

    /// Sets or overwrites the state of `dest`.
    pub fn update(&mut self, dest: Tracked, domain: ValueDomain<V>) {
        self.program.insert(dest, domain);
    }

    /// Sets `dest` to top or bottom.
    pub fn set_to_bound(&mut self, dest: Tracked, is_top: bool) {
        self.update(dest, if is_top { ValueDomain::Top } else { ValueDomain::Bottom });
    }

    /// Initialises or updates `dest` to top, or to the unknown reference.
    pub fn set_to_top_or_top_ref(&mut self, dest: Tracked, is_ref: bool) {
        let domain = if is_ref { ValueDomain::Ref(RefId::TOP) } else { ValueDomain::Top };
        self.update(dest, domain);
    }

    /// Like [`Self::set_to_top_or_top_ref`] but only for untracked values.
    pub fn try_set_to_top_or_top_ref(&mut self, dest: Tracked, is_ref: bool) {
        if !self.program.contains_key(&dest) {
            self.set_to_top_or_top_ref(dest, is_ref);
        }
    }

    #[must_use]
    pub fn domain_of(&self, v: Tracked) -> Option<&ValueDomain<V>> {
        self.program.get(&v)
    }

    /// The abstract value of `v`, when its state is a concrete element.
    #[must_use]
    pub fn check_abstract_value(&self, v: Tracked) -> Option<&V> {
        self.program.get(&v).and_then(ValueDomain::as_value)
    }

    /// The domain of `v`, looking through one reference when `v` is a
    /// reference-typed IR value.
    #[must_use]
    pub fn abstract_domain(&self, b: &Builder, v: ValueId) -> Option<&ValueDomain<V>> {
        if b.value(v).ty != b.strip_all_refs(b.value(v).ty) {
            let obj = self.abstract_object_ref_by(Tracked::Val(v))?;
            return self.program.get(&Tracked::Obj(obj));
        }
        self.program.get(&Tracked::Val(v))
    }

    /// The object a first- or second-class reference ultimately points at.
    #[must_use]
    pub fn abstract_object_ref_by(&self, v: Tracked) -> Option<ObjId> {
        let ValueDomain::Ref(r) = self.program.get(&v)? else { return None };
        match self.ref_map.get(r)? {
            RefTarget::Obj(o) => Some(*o),
            RefTarget::Ref(inner) => match self.ref_map.get(inner)? {
                RefTarget::Obj(o) => Some(*o),
                RefTarget::Ref(_) => None,
            },
        }
    }

    /// The per-field objects of `v`, following one reference if needed.
    #[must_use]
    pub fn children(&self, v: Tracked) -> Vec<ObjId> {
        if let Some(kids) = self.pools.borrow().children.get(&v) {
            return kids.clone();
        }
        if let Some(obj) = self.abstract_object_ref_by(v) {
            if let Some(kids) = self.pools.borrow().children.get(&Tracked::Obj(obj)) {
                return kids.clone();
            }
        }
        Vec::new()
    }

    #[must_use]
    pub fn child(&self, v: Tracked, index: usize) -> Option<ObjId> {
        self.children(v).get(index).copied()
    }

    /// Creates (or reuses, per allocation site) a reference and target
    /// object for `dest`, setting the object to top.
    pub fn referenced_obj_set_to_top(&mut self, dest: Tracked, site: Option<ExprId>) -> ObjId {
        let (r, obj) = {
            let mut pools = self.pools.borrow_mut();
            (pools.create_ref(site, false), pools.create_obj(site))
        };
        self.update(dest, ValueDomain::Ref(r));
        self.set_to_bound(Tracked::Obj(obj), true);
        self.ref_map.insert(r, RefTarget::Obj(obj));
        obj
    }

    /// The two-level variant for `T&&` values: outer ref → inner ref →
    /// object.
    pub fn two_level_ref_set_to_top(&mut self, dest: Tracked, site: Option<ExprId>) -> ObjId {
        let (outer, inner, obj) = {
            let mut pools = self.pools.borrow_mut();
            (pools.create_ref(site, false), pools.create_ref(site, true), pools.create_obj(site))
        };
        self.update(dest, ValueDomain::Ref(outer));
        self.ref_map.insert(outer, RefTarget::Ref(inner));
        self.ref_map.insert(inner, RefTarget::Obj(obj));
        self.set_to_bound(Tracked::Obj(obj), true);
        obj
    }

    /// Creates `count` children under `v`, initialising each to top.
    pub fn create_children_set_to_top(&mut self, v: Tracked, count: usize) {
        if count == 0 || self.pools.borrow().children.contains_key(&v) {
            return;
        }
        let name = match v {
            Tracked::Obj(o) => self.pools.borrow().obj_name(o),
            Tracked::Val(_) => "local".to_string(),
        };
        let mut kids = Vec::with_capacity(count);
        for i in 0..count {
            let child = self.pools.borrow_mut().create_child_obj(&name, i);
            self.set_to_bound(Tracked::Obj(child), true);
            kids.push(child);
        }
        self.pools.borrow_mut().children.insert(v, kids);
    }

    /// Propagates the state of `src` to `dest`, handling children.
    pub fn propagate(&mut self, src: Tracked, dest: Tracked) {
        self.propagate_without_children(src, dest);

        let src_kids = self.pools.borrow().children.get(&src).cloned();
        let dest_kids = self.pools.borrow().children.get(&dest).cloned();
        match (src_kids, dest_kids) {
            (Some(src_kids), Some(dest_kids)) => {
                // Both sides track fields: propagate pairwise. For some
                // types only a prefix of the members is tracked (an enum
                // records just the constructor selector), so dest may be
                // shorter than src.
                debug_assert!(src_kids.len() >= dest_kids.len());
                for (s, d) in src_kids.iter().zip(&dest_kids) {
                    self.propagate_without_children(Tracked::Obj(*s), Tracked::Obj(*d));
                }
            }
            (None, Some(dest_kids)) => {
                // Assigning from an untracked structure: any known member
                // state becomes unknown.
                self.set_non_top_children_to_top(&dest_kids);
            }
            (Some(src_kids), None) => {
                let name = match dest {
                    Tracked::Obj(o) => self.pools.borrow().obj_name(o),
                    Tracked::Val(_) => "local".to_string(),
                };
                let mut kids = Vec::with_capacity(src_kids.len());
                for (i, s) in src_kids.iter().enumerate() {
                    let child = self.pools.borrow_mut().create_child_obj(&name, i);
                    let state = self
                        .program
                        .get(&Tracked::Obj(*s))
                        .cloned()
                        .unwrap_or(ValueDomain::Top);
                    self.program.insert(Tracked::Obj(child), state);
                    kids.push(child);
                }
                self.pools.borrow_mut().children.insert(dest, kids);
            }
            (None, None) => {}
        }
    }

    fn propagate_without_children(&mut self, src: Tracked, dest: Tracked) {
        let state = self.program.get(&src).cloned().unwrap_or(ValueDomain::Top);
        self.program.insert(dest, state);
    }

    /// Propagates from an IR value, treating function references as
    /// unknowns the way the builder sees them.
    pub fn propagate_value(&mut self, b: &Builder, src: ValueId, dest: Tracked) {
        if !b.value(src).is_parameter() && !b.value(src).is_local_var() {
            self.program.entry(dest).or_insert(ValueDomain::Top);
            return;
        }
        self.propagate(Tracked::Val(src), dest);
    }

    /// Coarsens a value and every tracked field of it to top.
    pub fn set_self_and_children_to_top(&mut self, b: &Builder, v: ValueId) {
        let target = if b.value(v).ty == b.strip_all_refs(b.value(v).ty) {
            Some(Tracked::Val(v))
        } else {
            self.abstract_object_ref_by(Tracked::Val(v)).map(Tracked::Obj)
        };
        if let Some(target) = target {
            self.set_to_bound(target, true);
            let kids = self.children(target);
            self.set_non_top_children_to_top(&kids);
        }
    }

    fn set_non_top_children_to_top(&mut self, kids: &[ObjId]) {
        for child in kids {
            if let Some(state) = self.program.get_mut(&Tracked::Obj(*child)) {
                if matches!(state, ValueDomain::Val(_)) {
                    *state = ValueDomain::Top;
                }
            }
        }
    }

    fn merge_ref(&mut self, lhs: RefId, rhs: RefId, other: &Self) -> RefId {
        let get_obj = |map: &AHashMap<RefId, RefTarget>, r: RefId| match map.get(&r) {
            Some(RefTarget::Obj(o)) => Some(*o),
            _ => None,
        };
        let new_ref = {
            let mut pools = self.pools.borrow_mut();
            let r = pools.create_ref(None, false);
            pools.refs[r.index()].roots = vec![lhs, rhs];
            r
        };
        let lhs_obj = get_obj(&self.ref_map, lhs);
        let rhs_obj = get_obj(&other.ref_map, rhs);
        let new_obj = self.pools.borrow_mut().create_obj(None);
        let mut joined = lhs_obj
            .and_then(|o| self.program.get(&Tracked::Obj(o)).cloned())
            .unwrap_or(ValueDomain::Top);
        if let Some(rhs_state) = rhs_obj.and_then(|o| other.program.get(&Tracked::Obj(o))) {
            joined.join(rhs_state);
        }
        self.program.insert(Tracked::Obj(new_obj), joined);
        self.ref_map.insert(new_ref, RefTarget::Obj(new_obj));
        new_ref
    }

    fn ref_map_join(&mut self, other: &Self) -> bool {
        let mut changed = false;
        let keys: Vec<RefId> = other.ref_map.keys().copied().collect();
        for key in keys {
            let theirs = other.ref_map[&key];
            let Some(mine) = self.ref_map.get(&key).copied() else {
                self.ref_map.insert(key, theirs);
                changed = true;
                continue;
            };
            match (mine, theirs) {
                (RefTarget::Obj(a), RefTarget::Obj(bo)) => {
                    debug_assert_eq!(a, bo, "one allocation site owns one object");
                }
                (RefTarget::Ref(r1), RefTarget::Ref(r2)) => {
                    if r1 == r2 || r1.is_top() {
                        continue;
                    }
                    if r2.is_top() {
                        self.ref_map.insert(key, RefTarget::Ref(RefId::TOP));
                        changed = true;
                        continue;
                    }
                    let (equivalent, r2_represents, r1_represents) = {
                        let pools = self.pools.borrow();
                        (
                            pools.equivalent(r1, r2),
                            pools.can_represent(r2, r1),
                            pools.can_represent(r1, r2),
                        )
                    };
                    if equivalent || r1_represents {
                        continue;
                    }
                    if r2_represents {
                        self.ref_map.insert(key, RefTarget::Ref(r2));
                        changed = true;
                        continue;
                    }
                    let merged = self.merge_ref(r1, r2, other);
                    self.ref_map.insert(key, RefTarget::Ref(merged));
                    changed = true;
                }
                // a site cannot flip between direct and indirect targets
                (RefTarget::Ref(_), RefTarget::Obj(_)) | (RefTarget::Obj(_), RefTarget::Ref(_)) => {
                    unreachable!("ref target shape diverged across states")
                }
            }
        }
        changed
    }
}

impl<V: AbstractValue> AbstractDomain for ValueState<V> {
    fn join(&mut self, other: &Self) -> bool {
        if other.kind == ReachableKind::Unreachable {
            return false;
        }
        if self.kind == ReachableKind::Unreachable {
            *self = other.clone();
            return true;
        }
        let mut changed = false;
        let keys: Vec<Tracked> = other.program.keys().copied().collect();
        for key in keys {
            let theirs = &other.program[&key];
            match self.program.get_mut(&key) {
                Some(mine) => changed |= mine.join(theirs),
                None => {
                    self.program.insert(key, theirs.clone());
                    changed = true;
                }
            }
        }
        changed |= self.ref_map_join(other);
        changed
    }

    fn describe(&self) -> String {
        if self.kind == ReachableKind::Unreachable {
            return "unreachable".to_string();
        }
        format!("{} tracked, {} refs", self.program.len(), self.ref_map.len())
    }
}

/// Read-only global-variable state shared by every function analysis in a
/// package.
pub struct GlobalValueState<V> {
    pub state: ValueState<V>,
}

impl<V: AbstractValue> GlobalValueState<V> {
    /// Seeds the state for every tracked read-only global with an
    /// initialiser function.
    pub fn build(b: &Builder, package: &Package) -> Self {
        let pools = Rc::new(RefCell::new(ValuePools { is_global: true, ..ValuePools::default() }));
        let mut state = ValueState::new(Rc::clone(&pools));
        state.kind = ReachableKind::Reachable;
        for &gv in &package.globals {
            let value = b.value(gv);
            let ValueKind::GlobalVar { init_func, .. } = &value.kind else { continue };
            if !value.attrs.contains(Attributes::READONLY) || init_func.is_none() {
                continue;
            }
            let inner = b.strip_one_ref(value.ty);
            if b.ty(inner).is_ref() {
                state.two_level_ref_set_to_top(Tracked::Val(gv), None);
            } else {
                let obj = state.referenced_obj_set_to_top(Tracked::Val(gv), None);
                let field_count = match b.ty(inner) {
                    Type::Tuple(elems) => elems.len(),
                    Type::Custom(def, _) => b.all_instance_vars(*def).len(),
                    _ => 0,
                };
                state.create_children_set_to_top(Tracked::Obj(obj), field_count);
            }
        }
        Self { state }
    }
}

/// The transfer functions of a value analysis instance.
pub struct ValueAnalysisTransfer<V: AbstractValue> {
    pub func: ValueId,
    pools: Rc<RefCell<ValuePools>>,
    globals: Option<Rc<GlobalValueState<V>>>,
    block_limit: Option<usize>,
}

impl<V: AbstractValue> ValueAnalysisTransfer<V> {
    #[must_use]
    pub fn new(func: ValueId, globals: Option<Rc<GlobalValueState<V>>>) -> Self {
        Self {
            func,
            pools: Rc::new(RefCell::new(ValuePools::default())),
            globals,
            block_limit: None,
        }
    }

    pub fn with_block_limit(mut self, limit: usize) -> Self {
        self.block_limit = Some(limit);
        self
    }

    fn init_params(&self, b: &Builder, state: &mut ValueState<V>, params: &[ValueId]) {
        for &param in params {
            let ty = b.value(param).ty;
            if b.ty(ty).is_ref() || b.ty(ty).is_generic() {
                let _ = state.referenced_obj_set_to_top(Tracked::Val(param), None);
            } else {
                state.update(Tracked::Val(param), ValueDomain::Top);
            }
        }
    }

    fn field_count_of(&self, b: &Builder, ty: crate::ty::TypeId) -> usize {
        match b.ty(b.strip_all_refs(ty)) {
            Type::Tuple(elems) => elems.len(),
            Type::Custom(def, _) => match &b.def(*def).kind {
                // only the constructor selector of an enum is tracked
                crate::def::CustomDefKind::Enum { .. } => 1,
                _ => b.all_instance_vars(*def).len(),
            },
            _ => 0,
        }
    }

    fn result_top(&self, b: &Builder, state: &mut ValueState<V>, e: ExprId) {
        if let Some(res) = b.expr(e).result {
            let is_ref = b.ty(b.value(res).ty).is_ref();
            if is_ref {
                let _ = state.referenced_obj_set_to_top(Tracked::Val(res), Some(e));
            } else {
                state.set_to_top_or_top_ref(Tracked::Val(res), false);
            }
        }
    }

    fn escape_call_args(&self, b: &Builder, state: &mut ValueState<V>, e: ExprId) {
        for &arg in b.expr(e).operands.clone().iter() {
            if b.ty(b.value(arg).ty).is_ref() {
                state.set_self_and_children_to_top(b, arg);
            }
        }
    }
}

impl<V: AbstractValue> FlowTransfer for ValueAnalysisTransfer<V> {
    type Domain = ValueState<V>;

    const NAME: &'static str = "value-analysis";

    fn block_limit(&self) -> Option<usize> {
        self.block_limit
    }

    fn bottom(&mut self, _b: &Builder) -> Self::Domain {
        ValueState::new(Rc::clone(&self.pools))
    }

    fn initialize_entry_state(&mut self, b: &Builder, state: &mut Self::Domain) {
        state.kind = ReachableKind::Reachable;
        // Mirror the read-only global snapshot into this function's state.
        // Refs and objects are re-materialised in this analysis's own
        // pools; the domains (tops, or whatever richer seeding produced)
        // carry over.
        if let Some(globals) = self.globals.clone() {
            let entries: Vec<(Tracked, ValueDomain<V>)> = globals
                .state
                .program
                .iter()
                .filter(|(k, _)| matches!(k, Tracked::Val(_)))
                .map(|(k, v)| (*k, v.clone()))
                .collect();
            for (key, dom) in entries {
                match dom {
                    ValueDomain::Ref(r) => {
                        let two_level =
                            matches!(globals.state.ref_map.get(&r), Some(RefTarget::Ref(_)));
                        let obj = if two_level {
                            state.two_level_ref_set_to_top(key, None)
                        } else {
                            state.referenced_obj_set_to_top(key, None)
                        };
                        let field_count = globals.state.children(key).len();
                        state.create_children_set_to_top(Tracked::Obj(obj), field_count);
                    }
                    other => state.update(key, other),
                }
            }
        }
        let params = b.value(self.func).func_data().map(|d| d.params.clone()).unwrap_or_default();
        self.init_params(b, state, &params);
    }

    fn initialize_lambda_entry_state(&mut self, b: &Builder, lambda: ExprId, state: &mut Self::Domain) {
        state.kind = ReachableKind::Reachable;
        let params = b.expr(lambda).lambda_data().map(|d| d.params.clone()).unwrap_or_default();
        self.init_params(b, state, &params);
    }

    fn handle_captured_vars(&mut self, b: &Builder, lambda: ExprId, state: &mut Self::Domain) {
        // anything the lambda body reads from the enclosing scope may be
        // mutated by the time (and each time) the lambda runs
        let Some(body) = b.expr(lambda).lambda_body() else { return };
        let mut captured = Vec::new();
        let mut pre = |bld: &Builder, e: ExprId| {
            for &op in &bld.expr(e).operands {
                let defined_inside = match &bld.value(op).kind {
                    ValueKind::Parameter { owner: crate::value::ParamOwner::Lambda(l) } => {
                        *l == lambda || bld.expr_in_group(*l, body)
                    }
                    ValueKind::Parameter { .. } => false,
                    ValueKind::LocalVar { def } => bld.expr_in_group(*def, body),
                    // globals and literals carry no capturable state
                    _ => true,
                };
                if !defined_inside {
                    captured.push(op);
                }
            }
            crate::visitor::VisitResult::Continue
        };
        let mut post = |_: &Builder, _: ExprId| crate::visitor::VisitResult::Continue;
        crate::visitor::visit_group_exprs(b, body, &mut pre, &mut post);
        for v in captured {
            state.set_self_and_children_to_top(b, v);
        }
    }

    fn transfer_expr(&mut self, b: &Builder, state: &mut Self::Domain, e: ExprId) {
        let expr = b.expr(e);
        match &expr.kind {
            ExprKind::Allocate { ty } => {
                if let Some(res) = expr.result {
                    let obj = state.referenced_obj_set_to_top(Tracked::Val(res), Some(e));
                    let count = self.field_count_of(b, *ty);
                    state.create_children_set_to_top(Tracked::Obj(obj), count);
                }
            }
            ExprKind::Load => {
                let location = expr.operands[0];
                let Some(res) = expr.result else { return };
                if let Some(obj) = state.abstract_object_ref_by(Tracked::Val(location)) {
                    state.propagate(Tracked::Obj(obj), Tracked::Val(res));
                } else {
                    let is_ref = b.ty(b.value(res).ty).is_ref();
                    state.set_to_top_or_top_ref(Tracked::Val(res), is_ref);
                }
            }
            ExprKind::Store => {
                let value = expr.operands[0];
                let location = expr.operands[1];
                if let Some(obj) = state.abstract_object_ref_by(Tracked::Val(location)) {
                    state.propagate_value(b, value, Tracked::Obj(obj));
                }
            }
            ExprKind::Constant(lit) => {
                if let Some(res) = expr.result {
                    match V::from_literal(lit) {
                        Some(v) => state.update(Tracked::Val(res), ValueDomain::Val(v)),
                        None => state.set_to_top_or_top_ref(Tracked::Val(res), false),
                    }
                }
            }
            ExprKind::Tuple => {
                if let Some(res) = expr.result {
                    state.set_to_top_or_top_ref(Tracked::Val(res), false);
                    let operands = expr.operands.clone();
                    state.create_children_set_to_top(Tracked::Val(res), operands.len());
                    let kids = state.children(Tracked::Val(res));
                    for (op, child) in operands.iter().zip(kids) {
                        state.propagate_value(b, *op, Tracked::Obj(child));
                    }
                }
            }
            ExprKind::Field { path } => {
                let Some(res) = expr.result else { return };
                let base = expr.operands[0];
                if path.len() == 1 {
                    if let Some(child) = state.child(Tracked::Val(base), path[0] as usize) {
                        state.propagate(Tracked::Obj(child), Tracked::Val(res));
                        return;
                    }
                }
                let is_ref = b.ty(b.value(res).ty).is_ref();
                state.set_to_top_or_top_ref(Tracked::Val(res), is_ref);
            }
            ExprKind::GetElementRef { path } => {
                let Some(res) = expr.result else { return };
                let location = expr.operands[0];
                if path.len() == 1 {
                    if let Some(child) = state.child(Tracked::Val(location), path[0] as usize) {
                        let r = self.pools.borrow_mut().create_ref(Some(e), false);
                        state.update(Tracked::Val(res), ValueDomain::Ref(r));
                        state.ref_map.insert(r, RefTarget::Obj(child));
                        return;
                    }
                }
                state.set_to_top_or_top_ref(Tracked::Val(res), true);
            }
            ExprKind::StoreElementRef { path } => {
                let value = expr.operands[0];
                let location = expr.operands[1];
                if path.len() == 1 {
                    if let Some(child) = state.child(Tracked::Val(location), path[0] as usize) {
                        state.propagate_value(b, value, Tracked::Obj(child));
                        return;
                    }
                }
                // unknown path: the whole object is dirty
                state.set_self_and_children_to_top(b, location);
            }
            ExprKind::TypeCast | ExprKind::Box | ExprKind::UnBox | ExprKind::UnBoxToRef => {
                if let Some(res) = expr.result {
                    let src = expr.operands[0];
                    state.propagate_value(b, src, Tracked::Val(res));
                }
            }
            ExprKind::Apply { .. }
            | ExprKind::Invoke { .. }
            | ExprKind::InvokeStatic { .. }
            | ExprKind::Intrinsic { .. }
            | ExprKind::Spawn { .. } => {
                self.escape_call_args(b, state, e);
                self.result_top(b, state, e);
            }
            ExprKind::Debug { .. } | ExprKind::GetRtti | ExprKind::GetRttiStatic => {}
            _ => {
                self.result_top(b, state, e);
            }
        }
    }

    fn transfer_terminator(
        &mut self,
        b: &Builder,
        state: &mut Self::Domain,
        t: ExprId,
    ) -> Option<crate::block::BlockId> {
        let expr = b.expr(t);
        if !matches!(expr.kind, ExprKind::Branch) {
            return None;
        }
        let cond = expr.operands[0];
        let known = state.check_abstract_value(Tracked::Val(cond)).and_then(AbstractValue::as_bool)?;
        let succs = expr.successors();
        Some(if known { succs[0] } else { succs[1] })
    }
}

/// A small constant-propagation domain over literals; the workhorse for
/// tests and for branch refinement.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstValue(pub Literal);

impl AbstractValue for ConstValue {
    fn join(&mut self, other: &Self) -> ValueJoinOutcome {
        if self == other { ValueJoinOutcome::Unchanged } else { ValueJoinOutcome::Diverged }
    }

    fn from_literal(lit: &Literal) -> Option<Self> {
        Some(Self(lit.clone()))
    }

    fn as_bool(&self) -> Option<bool> {
        match self.0 {
            Literal::Bool(v) => Some(v),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        format!("{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Analysis;
    use crate::value::FuncKind;

    #[test]
    fn test_allocation_site_owns_one_object() {
        let pools = Rc::new(RefCell::new(ValuePools::default()));
        let site = ExprId(7);
        let r1 = pools.borrow_mut().create_ref(Some(site), false);
        let r2 = pools.borrow_mut().create_ref(Some(site), false);
        assert_eq!(r1, r2);
        let o1 = pools.borrow_mut().create_obj(Some(site));
        let o2 = pools.borrow_mut().create_obj(Some(site));
        assert_eq!(o1, o2);
    }

    #[test]
    fn test_constant_store_load_roundtrip() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let i64t = b.int64_ty();
        let alloc = b.create_allocate(i64t, entry);
        let slot = b.expr(alloc).result.unwrap();
        let c = b.create_constant(Literal::Int(41), i64t, entry);
        let cv = b.expr(c).result.unwrap();
        b.create_store(cv, slot, entry);
        let load = b.create_load(slot, entry);
        let loaded = b.expr(load).result.unwrap();
        b.create_exit(entry);

        let transfer: ValueAnalysisTransfer<ConstValue> = ValueAnalysisTransfer::new(f, None);
        let mut analysis = Analysis::new(f, transfer);
        analysis.run(&b).unwrap();

        let mut states = Vec::new();
        analysis.for_each_state(&b, &mut |state, e| {
            if b.expr(e).is_terminator() {
                states.push(state.clone());
            }
        });
        let at_exit = states.last().expect("exit state observed");
        assert_eq!(
            at_exit.check_abstract_value(Tracked::Val(loaded)),
            Some(&ConstValue(Literal::Int(41)))
        );
    }

    #[test]
    fn test_branch_refinement_on_known_condition() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let fty = b.func_ty(vec![], unit);
        let f = b.create_func("f", fty, FuncKind::Default, "demo");
        let body = b.func_body(f);
        let entry = b.create_block(body);
        let then_b = b.create_block(body);
        let else_b = b.create_block(body);
        let cond = b.create_bool_literal(true, entry);
        let cond_v = b.expr(cond).result.unwrap();
        b.create_branch(cond_v, then_b, else_b, entry);
        b.create_exit(then_b);
        b.create_exit(else_b);

        let transfer: ValueAnalysisTransfer<ConstValue> = ValueAnalysisTransfer::new(f, None);
        let mut analysis = Analysis::new(f, transfer);
        analysis.run(&b).unwrap();
        // the false arm never receives a state
        assert!(analysis.state_at_block_entry(then_b).is_some());
        assert!(analysis.state_at_block_entry(else_b).is_none());
    }
}
