//! Type substitutions: single, multi-candidate, and two-stage forms.
//!
//! A [`TypeSubst`] is a total function from a finite set of generic
//! variables to types. A [`MultiTypeSubst`] maps each variable to a
//! non-empty candidate set and is used while several extensions could
//! match. A [`TwoStageSubst`] maps user-visible generics to fresh internal
//! variables and those to concrete types, so one user variable can receive
//! different concrete bindings at different use sites without aliasing.

use ahash::AHashSet;
use indexmap::{IndexMap, IndexSet};

use crate::builder::Builder;
use crate::ty::{GenericTypeId, Type, TypeId};

/// A total map from generic variables to types.
///
/// Backed by an insertion-ordered map so expansion and debugging output are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSubst {
    map: IndexMap<GenericTypeId, TypeId>,
}

impl TypeSubst {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn insert(&mut self, var: GenericTypeId, ty: TypeId) {
        self.map.insert(var, ty);
    }

    #[must_use]
    pub fn get(&self, var: GenericTypeId) -> Option<TypeId> {
        self.map.get(&var).copied()
    }

    #[must_use]
    pub fn contains(&self, var: GenericTypeId) -> bool {
        self.map.contains_key(&var)
    }

    pub fn iter(&self) -> impl Iterator<Item = (GenericTypeId, TypeId)> + '_ {
        self.map.iter().map(|(k, v)| (*k, *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = GenericTypeId> + '_ {
        self.map.keys().copied()
    }

    /// A substitution is cyclic when some variable can reach itself through
    /// the free variables of mapped types, excluding pure identity
    /// mappings. Cyclic substitutions must not be applied; instantiation
    /// would not terminate.
    #[must_use]
    pub fn is_cyclic(&self, builder: &Builder) -> bool {
        for start in self.map.keys() {
            let mut seen = AHashSet::new();
            let mut stack = vec![*start];
            while let Some(var) = stack.pop() {
                let Some(mapped) = self.get(var) else { continue };
                if matches!(builder.ty(mapped), Type::Generic(g) if *g == var) {
                    // identity mapping, harmless
                    continue;
                }
                let mut frees = AHashSet::new();
                builder.free_generics(mapped, &mut frees);
                for f in frees {
                    if f == *start {
                        return true;
                    }
                    if seen.insert(f) {
                        stack.push(f);
                    }
                }
            }
        }
        false
    }
}

impl FromIterator<(GenericTypeId, TypeId)> for TypeSubst {
    fn from_iter<I: IntoIterator<Item = (GenericTypeId, TypeId)>>(iter: I) -> Self {
        Self { map: iter.into_iter().collect() }
    }
}

/// A one-to-many substitution candidate set used during inference and
/// overload resolution across extensions.
#[derive(Debug, Clone, Default)]
pub struct MultiTypeSubst {
    map: IndexMap<GenericTypeId, IndexSet<TypeId>>,
}

impl MultiTypeSubst {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn insert_candidate(&mut self, var: GenericTypeId, ty: TypeId) {
        self.map.entry(var).or_default().insert(ty);
    }

    #[must_use]
    pub fn candidates(&self, var: GenericTypeId) -> Option<&IndexSet<TypeId>> {
        self.map.get(&var)
    }

    /// Collapses to a single substitution by preferring, for each variable,
    /// the first candidate that is not the variable itself.
    #[must_use]
    pub fn to_single(&self, builder: &Builder) -> TypeSubst {
        let mut single = TypeSubst::new();
        for (var, cands) in &self.map {
            let picked = cands
                .iter()
                .find(|c| !matches!(builder.ty(**c), Type::Generic(g) if g == var))
                .or_else(|| cands.first());
            if let Some(ty) = picked {
                single.insert(*var, *ty);
            }
        }
        single
    }

    /// Expands into the finite set of single substitutions formed by
    /// picking one candidate per variable; the cartesian product in
    /// insertion order.
    #[must_use]
    pub fn expand(&self) -> Vec<TypeSubst> {
        let mut result = vec![TypeSubst::new()];
        for (var, cands) in &self.map {
            let mut next = Vec::with_capacity(result.len() * cands.len());
            for partial in &result {
                for ty in cands {
                    let mut extended = partial.clone();
                    extended.insert(*var, *ty);
                    next.push(extended);
                }
            }
            result = next;
        }
        result
    }

    /// Drops mappings for variables not reachable from `used` types. A kept
    /// mapping may itself mention further variables, so the used set grows
    /// to a fixpoint.
    #[must_use]
    pub fn filter_unused(&self, builder: &Builder, used: &[TypeId]) -> Self {
        let mut live: AHashSet<GenericTypeId> = AHashSet::new();
        for ty in used {
            builder.free_generics(*ty, &mut live);
        }
        loop {
            let mut grew = false;
            for (var, cands) in &self.map {
                if !live.contains(var) {
                    continue;
                }
                for ty in cands {
                    let mut frees = AHashSet::new();
                    builder.free_generics(*ty, &mut frees);
                    for f in frees {
                        grew |= live.insert(f);
                    }
                }
            }
            if !grew {
                break;
            }
        }
        let mut filtered = Self::new();
        for (var, cands) in &self.map {
            if live.contains(var) {
                for ty in cands {
                    filtered.insert_candidate(*var, *ty);
                }
            }
        }
        filtered
    }
}

/// The canonical form for cross-extension instantiation: user-visible
/// generics map to fresh internal variables (`u2i`), which map to concrete
/// types (`inst`).
#[derive(Debug, Clone, Default)]
pub struct TwoStageSubst {
    pub u2i: TypeSubst,
    pub inst: TypeSubst,
}

impl TwoStageSubst {
    #[must_use]
    pub fn new(u2i: TypeSubst, inst: TypeSubst) -> Self {
        Self { u2i, inst }
    }

    /// Applies both stages in order and re-interns the result.
    pub fn apply(&self, builder: &mut Builder, ty: TypeId) -> TypeId {
        let mid = builder.instantiate_type(ty, &self.u2i);
        builder.instantiate_type(mid, &self.inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn test_two_stage_result_only_contains_inst_free_vars() {
        let mut b = Builder::new();
        let user = b.register_generic("T", vec![]);
        let internal = b.register_generic("T#0", vec![]);
        let user_ty = b.intern_type(Type::Generic(user));
        let internal_ty = b.intern_type(Type::Generic(internal));
        let concrete = b.int64_ty();

        let two = TwoStageSubst::new(
            TypeSubst::from_iter([(user, internal_ty)]),
            TypeSubst::from_iter([(internal, concrete)]),
        );

        let shape = b.tuple_ty(vec![user_ty, user_ty]);
        let result = two.apply(&mut b, shape);

        let mut frees = AHashSet::new();
        b.free_generics(result, &mut frees);
        assert!(frees.is_empty());
        let expected = b.tuple_ty(vec![concrete, concrete]);
        assert_eq!(result, expected);
    }

    #[test]
    fn test_expand_cartesian_product() {
        let mut b = Builder::new();
        let t = b.register_generic("T", vec![]);
        let u = b.register_generic("U", vec![]);
        let i64t = b.int64_ty();
        let boolt = b.bool_ty();
        let unit = b.unit_ty();

        let mut multi = MultiTypeSubst::new();
        multi.insert_candidate(t, i64t);
        multi.insert_candidate(t, boolt);
        multi.insert_candidate(u, unit);

        let expanded = multi.expand();
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].get(t), Some(i64t));
        assert_eq!(expanded[0].get(u), Some(unit));
        assert_eq!(expanded[1].get(t), Some(boolt));
    }

    #[test]
    fn test_to_single_skips_self_candidates() {
        let mut b = Builder::new();
        let t = b.register_generic("T", vec![]);
        let t_ty = b.intern_type(Type::Generic(t));
        let i = b.int64_ty();

        let mut multi = MultiTypeSubst::new();
        multi.insert_candidate(t, t_ty);
        multi.insert_candidate(t, i);

        let single = multi.to_single(&b);
        assert_eq!(single.get(t), Some(i));
    }

    #[test]
    fn test_cyclic_detection() {
        let mut b = Builder::new();
        let t = b.register_generic("T", vec![]);
        let u = b.register_generic("U", vec![]);
        let t_ty = b.intern_type(Type::Generic(t));
        let u_ty = b.intern_type(Type::Generic(u));

        // T -> Tuple<U>, U -> Tuple<T> is a cycle through two hops.
        let tup_u = b.tuple_ty(vec![u_ty]);
        let tup_t = b.tuple_ty(vec![t_ty]);
        let cyclic = TypeSubst::from_iter([(t, tup_u), (u, tup_t)]);
        assert!(cyclic.is_cyclic(&b));

        // Identity mapping is not a cycle.
        let identity = TypeSubst::from_iter([(t, t_ty)]);
        assert!(!identity.is_cyclic(&b));

        let i = b.int64_ty();
        let acyclic = TypeSubst::from_iter([(t, tup_u), (u, i)]);
        assert!(!acyclic.is_cyclic(&b));
    }

    #[test]
    fn test_filter_unused_keeps_reachable_mappings() {
        let mut b = Builder::new();
        let t = b.register_generic("T", vec![]);
        let u = b.register_generic("U", vec![]);
        let dead = b.register_generic("V", vec![]);
        let t_ty = b.intern_type(Type::Generic(t));
        let u_ty = b.intern_type(Type::Generic(u));
        let i = b.int64_ty();

        let mut multi = MultiTypeSubst::new();
        // T is used directly; its candidate mentions U, which keeps U live.
        let tup_u = b.tuple_ty(vec![u_ty]);
        multi.insert_candidate(t, tup_u);
        multi.insert_candidate(u, i);
        multi.insert_candidate(dead, i);

        let filtered = multi.filter_unused(&b, &[t_ty]);
        assert!(filtered.candidates(t).is_some());
        assert!(filtered.candidates(u).is_some());
        assert!(filtered.candidates(dead).is_none());
    }
}
