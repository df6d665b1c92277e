//! The IR type system: structural types, custom-decl types, generics.
//!
//! Types are interned: building the same shape twice returns the same
//! [`TypeId`], so equality is identity. All construction and every query
//! that needs to see through other types (subtyping, field lookup,
//! instantiation) goes through the [`Builder`], which owns the arena.

use std::collections::VecDeque;

use ahash::AHashSet;
use strum::IntoStaticStr;

use crate::builder::Builder;
use crate::def::CustomDefKind;
use crate::subst::TypeSubst;

/// Index into the builder's interned type table.
///
/// `u32` keeps handles at four bytes; a package will not approach four
/// billion distinct types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index into the builder's generic-parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenericTypeId(pub(crate) u32);

impl GenericTypeId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index into the builder's custom-definition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefId(pub(crate) u32);

impl DefId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Widths of the primitive integer types. `Native` is pointer-sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum IntWidth {
    I8,
    I16,
    I32,
    I64,
    Native,
}

/// Widths of the primitive float types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum FloatWidth {
    F16,
    F32,
    F64,
}

/// A function signature type.
///
/// Only C function types may carry a variadic tail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncSig {
    pub params: Vec<TypeId>,
    pub ret: TypeId,
    pub is_c: bool,
    pub has_varargs: bool,
}

/// A generic type parameter: source name plus upper bounds.
#[derive(Debug, Clone)]
pub struct GenericParam {
    pub name: String,
    pub upper_bounds: Vec<TypeId>,
}

/// The structural shape of a type.
///
/// Reference depth is bounded: a value type `T` may appear as `T` or `T&`;
/// a reference type (class, raw array) as `T`, `T&`, or `T&&`; never deeper.
/// The checker enforces this, the type system merely represents it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum Type {
    Int(IntWidth),
    UInt(IntWidth),
    Float(FloatWidth),
    Bool,
    /// A unicode scalar value.
    Rune,
    Unit,
    Void,
    /// The uninhabited bottom type; a subtype of everything.
    Nothing,
    CString,
    /// The receiver type inside a custom def; resolved by dispatch against
    /// the declared parent of the enclosing function.
    This,
    Tuple(Vec<TypeId>),
    Func(FuncSig),
    /// One level of indirection. `T&&` is represented as `Ref(Ref(T))`.
    Ref(TypeId),
    RawArray(TypeId),
    VArray(TypeId, u64),
    CPointer(TypeId),
    /// Reference-carrying wrapper around a value type, introduced when a
    /// recursive struct or enum member has to move behind a pointer.
    Box(TypeId),
    /// A class, struct, or enum applied to type arguments. Identity is
    /// `(def, args)`; argument arity always equals the def's parameter
    /// arity.
    Custom(DefId, Vec<TypeId>),
    Generic(GenericTypeId),
}

impl Type {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.into()
    }

    #[must_use]
    pub fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_))
    }

    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int(_) | Self::UInt(_))
    }

    #[must_use]
    pub fn is_unsigned_integer(&self) -> bool {
        matches!(self, Self::UInt(_))
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    #[must_use]
    pub fn is_unit(&self) -> bool {
        matches!(self, Self::Unit)
    }

    #[must_use]
    pub fn is_generic(&self) -> bool {
        matches!(self, Self::Generic(_))
    }

    #[must_use]
    pub fn is_func(&self) -> bool {
        matches!(self, Self::Func(_))
    }

    #[must_use]
    pub fn is_box(&self) -> bool {
        matches!(self, Self::Box(_))
    }

    /// Direct type arguments of this type, in declaration order.
    #[must_use]
    pub fn type_args(&self) -> Vec<TypeId> {
        match self {
            Self::Tuple(elems) | Self::Custom(_, elems) => elems.clone(),
            Self::Func(sig) => {
                let mut args = sig.params.clone();
                args.push(sig.ret);
                args
            }
            Self::Ref(t) | Self::RawArray(t) | Self::VArray(t, _) | Self::CPointer(t) | Self::Box(t) => {
                vec![*t]
            }
            _ => Vec::new(),
        }
    }
}

impl Builder {
    /// Interns a type, returning the existing id when an equal one exists.
    pub fn intern_type(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.type_cache.get(&ty) {
            return id;
        }
        let id = TypeId(u32::try_from(self.types.len()).expect("type arena exceeds u32"));
        self.type_cache.insert(ty.clone(), id);
        self.types.push(ty);
        id
    }

    #[must_use]
    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.index()]
    }

    pub fn register_generic(&mut self, name: impl Into<String>, upper_bounds: Vec<TypeId>) -> GenericTypeId {
        let id = GenericTypeId(u32::try_from(self.generics.len()).expect("generic arena exceeds u32"));
        self.generics.push(GenericParam { name: name.into(), upper_bounds });
        id
    }

    #[must_use]
    pub fn generic(&self, id: GenericTypeId) -> &GenericParam {
        &self.generics[id.index()]
    }

    // Common shapes. Interning makes repeated calls free of duplicates.

    pub fn unit_ty(&mut self) -> TypeId {
        self.intern_type(Type::Unit)
    }

    pub fn bool_ty(&mut self) -> TypeId {
        self.intern_type(Type::Bool)
    }

    pub fn void_ty(&mut self) -> TypeId {
        self.intern_type(Type::Void)
    }

    pub fn nothing_ty(&mut self) -> TypeId {
        self.intern_type(Type::Nothing)
    }

    pub fn rune_ty(&mut self) -> TypeId {
        self.intern_type(Type::Rune)
    }

    pub fn int64_ty(&mut self) -> TypeId {
        self.intern_type(Type::Int(IntWidth::I64))
    }

    pub fn uint32_ty(&mut self) -> TypeId {
        self.intern_type(Type::UInt(IntWidth::I32))
    }

    pub fn uint64_ty(&mut self) -> TypeId {
        self.intern_type(Type::UInt(IntWidth::I64))
    }

    pub fn float64_ty(&mut self) -> TypeId {
        self.intern_type(Type::Float(FloatWidth::F64))
    }

    pub fn ref_to(&mut self, base: TypeId) -> TypeId {
        self.intern_type(Type::Ref(base))
    }

    pub fn box_of(&mut self, base: TypeId) -> TypeId {
        self.intern_type(Type::Box(base))
    }

    pub fn tuple_ty(&mut self, elems: Vec<TypeId>) -> TypeId {
        self.intern_type(Type::Tuple(elems))
    }

    pub fn raw_array_ty(&mut self, elem: TypeId) -> TypeId {
        self.intern_type(Type::RawArray(elem))
    }

    pub fn func_ty(&mut self, params: Vec<TypeId>, ret: TypeId) -> TypeId {
        self.intern_type(Type::Func(FuncSig { params, ret, is_c: false, has_varargs: false }))
    }

    pub fn custom_ty(&mut self, def: DefId, args: Vec<TypeId>) -> TypeId {
        debug_assert_eq!(
            args.len(),
            self.def(def).generic_params.len(),
            "type argument arity must match the def's generic parameter arity"
        );
        let id = self.intern_type(Type::Custom(def, args));
        self.populate_supers(id);
        id
    }

    /// Fills the supers cache for `id` and, transitively, for every super
    /// discovered. Shared `&self` queries (the checker runs in parallel)
    /// then read the cache without interning.
    pub fn populate_supers(&mut self, id: TypeId) {
        let root = self.strip_all_refs(id);
        if self.supers_cache.lock().expect("supers cache poisoned").contains_key(&root) {
            return;
        }
        let mut fathers = vec![root];
        let mut queue = VecDeque::from([root]);
        let mut seen = AHashSet::from_iter([root]);
        while let Some(cur) = queue.pop_front() {
            for sup in self.direct_supers_interning(cur) {
                if seen.insert(sup) {
                    fathers.push(sup);
                    queue.push_back(sup);
                }
            }
        }
        let supers = fathers.clone();
        self.supers_cache.lock().expect("supers cache poisoned").insert(root, fathers);
        for sup in supers {
            if sup != root && matches!(self.ty(sup), Type::Custom(..)) {
                self.populate_supers(sup);
            }
        }
    }

    /// Like `direct_supers` but allowed to intern the instantiated shapes.
    fn direct_supers_interning(&mut self, id: TypeId) -> Vec<TypeId> {
        let Some((def_id, args)) = self.custom_def_of(id) else {
            return Vec::new();
        };
        let def = self.def(def_id);
        let mut supers = Vec::new();
        match &def.kind {
            CustomDefKind::Class { super_class, interfaces, .. } => {
                supers.extend(super_class.iter().copied());
                supers.extend(interfaces.iter().copied());
            }
            CustomDefKind::Struct { .. } | CustomDefKind::Enum { .. } => {}
            CustomDefKind::Extend { .. } => return Vec::new(),
        }
        for i in 0..self.extend_index.len() {
            let ext = self.extend_index[i];
            let CustomDefKind::Extend { extended, interfaces } = &self.def(ext).kind else {
                continue;
            };
            let interfaces = interfaces.clone();
            if let Some((ext_def, _)) = self.custom_def_of(*extended) {
                if ext_def == def_id {
                    supers.extend(interfaces);
                }
            }
        }
        if args.is_empty() {
            return supers;
        }
        let subst: TypeSubst = self.def(def_id).generic_params.iter().copied().zip(args).collect();
        supers.into_iter().map(|s| self.instantiate_type(s, &subst)).collect()
    }

    /// Removes leading `T&` layers until a non-reference remains.
    #[must_use]
    pub fn strip_all_refs(&self, mut id: TypeId) -> TypeId {
        while let Type::Ref(base) = self.ty(id) {
            id = *base;
        }
        id
    }

    /// Removes at most one leading `T&` layer.
    #[must_use]
    pub fn strip_one_ref(&self, id: TypeId) -> TypeId {
        match self.ty(id) {
            Type::Ref(base) => *base,
            _ => id,
        }
    }

    /// Number of leading reference layers on `id`.
    #[must_use]
    pub fn ref_depth(&self, mut id: TypeId) -> usize {
        let mut depth = 0;
        while let Type::Ref(base) = self.ty(id) {
            depth += 1;
            id = *base;
        }
        depth
    }

    /// Whether `id` strips down to a custom def of the given kind.
    #[must_use]
    pub fn is_custom_of(&self, id: TypeId, pred: impl Fn(&CustomDefKind) -> bool) -> bool {
        match self.ty(self.strip_all_refs(id)) {
            Type::Custom(def, _) => pred(&self.def(*def).kind),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_class_ty(&self, id: TypeId) -> bool {
        self.is_custom_of(id, |k| matches!(k, CustomDefKind::Class { .. }))
    }

    #[must_use]
    pub fn is_struct_ty(&self, id: TypeId) -> bool {
        self.is_custom_of(id, |k| matches!(k, CustomDefKind::Struct { .. }))
    }

    #[must_use]
    pub fn is_enum_ty(&self, id: TypeId) -> bool {
        self.is_custom_of(id, |k| matches!(k, CustomDefKind::Enum { .. }))
    }

    /// The def behind a custom type, if `id` is one after stripping refs.
    #[must_use]
    pub fn custom_def_of(&self, id: TypeId) -> Option<(DefId, Vec<TypeId>)> {
        match self.ty(self.strip_all_refs(id)) {
            Type::Custom(def, args) => Some((*def, args.clone())),
            _ => None,
        }
    }

    /// Applies a substitution and re-interns. Types without free generic
    /// variables come back unchanged (and with the same identity).
    pub fn instantiate_type(&mut self, id: TypeId, subst: &TypeSubst) -> TypeId {
        if subst.is_empty() {
            return id;
        }
        let ty = self.ty(id).clone();
        match ty {
            Type::Generic(g) => subst.get(g).unwrap_or(id),
            Type::Tuple(elems) => {
                let elems = elems.iter().map(|e| self.instantiate_type(*e, subst)).collect();
                self.intern_type(Type::Tuple(elems))
            }
            Type::Func(sig) => {
                let params = sig.params.iter().map(|p| self.instantiate_type(*p, subst)).collect();
                let ret = self.instantiate_type(sig.ret, subst);
                self.intern_type(Type::Func(FuncSig { params, ret, is_c: sig.is_c, has_varargs: sig.has_varargs }))
            }
            Type::Ref(base) => {
                let base = self.instantiate_type(base, subst);
                self.intern_type(Type::Ref(base))
            }
            Type::RawArray(elem) => {
                let elem = self.instantiate_type(elem, subst);
                self.intern_type(Type::RawArray(elem))
            }
            Type::VArray(elem, n) => {
                let elem = self.instantiate_type(elem, subst);
                self.intern_type(Type::VArray(elem, n))
            }
            Type::CPointer(base) => {
                let base = self.instantiate_type(base, subst);
                self.intern_type(Type::CPointer(base))
            }
            Type::Box(base) => {
                let base = self.instantiate_type(base, subst);
                self.intern_type(Type::Box(base))
            }
            Type::Custom(def, args) => {
                let args = args.iter().map(|a| self.instantiate_type(*a, subst)).collect();
                self.intern_type(Type::Custom(def, args))
            }
            _ => id,
        }
    }

    /// Collects the free generic variables of `id`.
    pub fn free_generics(&self, id: TypeId, out: &mut AHashSet<GenericTypeId>) {
        match self.ty(id) {
            Type::Generic(g) => {
                out.insert(*g);
            }
            other => {
                for arg in other.type_args() {
                    self.free_generics(arg, out);
                }
            }
        }
    }

    /// All (instantiated) super types of a custom type: the type itself,
    /// its super class chain, and every interface implemented directly, by
    /// a super, or added through an extension. Cached per type.
    pub fn all_supers(&self, id: TypeId) -> Vec<TypeId> {
        let root = self.strip_all_refs(id);
        if let Some(cached) = self.supers_cache.lock().expect("supers cache poisoned").get(&root) {
            return cached.clone();
        }
        let mut fathers = vec![root];
        let mut queue = VecDeque::from([root]);
        let mut seen = AHashSet::from_iter([root]);
        while let Some(cur) = queue.pop_front() {
            for sup in self.direct_supers(cur) {
                if seen.insert(sup) {
                    fathers.push(sup);
                    queue.push_back(sup);
                }
            }
        }
        self.supers_cache.lock().expect("supers cache poisoned").insert(root, fathers.clone());
        fathers
    }

    /// Direct super types: super class, implemented interfaces, and
    /// interfaces contributed by extensions, instantiated with the type's
    /// arguments. Interning happens eagerly when defs are registered, so
    /// this is a read-only walk.
    fn direct_supers(&self, id: TypeId) -> Vec<TypeId> {
        let Some((def_id, args)) = self.custom_def_of(id) else {
            return Vec::new();
        };
        let def = self.def(def_id);
        let mut supers = Vec::new();
        match &def.kind {
            CustomDefKind::Class { super_class, interfaces, .. } => {
                supers.extend(super_class.iter().copied());
                supers.extend(interfaces.iter().copied());
            }
            CustomDefKind::Struct { .. } | CustomDefKind::Enum { .. } => {}
            CustomDefKind::Extend { .. } => return Vec::new(),
        }
        for ext in &self.extend_index {
            let CustomDefKind::Extend { extended, interfaces } = &self.def(*ext).kind else {
                continue;
            };
            if let Some((ext_def, _)) = self.custom_def_of(*extended) {
                if ext_def == def_id {
                    supers.extend(interfaces.iter().copied());
                }
            }
        }
        if args.is_empty() {
            return supers;
        }
        // Pre-instantiated supers are recorded against the def's own
        // generic parameters; map them to this type's arguments.
        let subst: TypeSubst = def.generic_params.iter().copied().zip(args).collect();
        // Instantiation needs &mut for interning; supers of instantiated
        // generics are pre-interned by `register_instantiated_supers`.
        supers
            .into_iter()
            .map(|s| self.lookup_instantiated(s, &subst).unwrap_or(s))
            .collect()
    }

    /// Read-only instantiation: succeeds only when every intermediate shape
    /// has already been interned. Used by `&self` queries such as the
    /// subtyping walk; the builder interns super shapes when defs are
    /// registered, so misses only occur for types never formed anywhere.
    fn lookup_instantiated(&self, id: TypeId, subst: &TypeSubst) -> Option<TypeId> {
        if subst.is_empty() {
            return Some(id);
        }
        let ty = self.ty(id);
        let shape = match ty {
            Type::Generic(g) => return Some(subst.get(*g).unwrap_or(id)),
            Type::Tuple(elems) => {
                let elems = elems
                    .iter()
                    .map(|e| self.lookup_instantiated(*e, subst))
                    .collect::<Option<Vec<_>>>()?;
                Type::Tuple(elems)
            }
            Type::Func(sig) => {
                let params = sig
                    .params
                    .iter()
                    .map(|p| self.lookup_instantiated(*p, subst))
                    .collect::<Option<Vec<_>>>()?;
                let ret = self.lookup_instantiated(sig.ret, subst)?;
                Type::Func(FuncSig { params, ret, is_c: sig.is_c, has_varargs: sig.has_varargs })
            }
            Type::Ref(base) => Type::Ref(self.lookup_instantiated(*base, subst)?),
            Type::RawArray(elem) => Type::RawArray(self.lookup_instantiated(*elem, subst)?),
            Type::VArray(elem, n) => Type::VArray(self.lookup_instantiated(*elem, subst)?, *n),
            Type::CPointer(base) => Type::CPointer(self.lookup_instantiated(*base, subst)?),
            Type::Box(base) => Type::Box(self.lookup_instantiated(*base, subst)?),
            Type::Custom(def, args) => {
                let args = args
                    .iter()
                    .map(|a| self.lookup_instantiated(*a, subst))
                    .collect::<Option<Vec<_>>>()?;
                Type::Custom(*def, args)
            }
            _ => return Some(id),
        };
        self.type_cache.get(&shape).copied()
    }

    /// Nominal subtyping over class/interface hierarchies with invariant
    /// type arguments, plus `Nothing <: T` and `T& <: T&` for equal `T`.
    #[must_use]
    pub fn is_equal_or_subtype_of(&self, sub: TypeId, sup: TypeId) -> bool {
        if sub == sup {
            return true;
        }
        match (self.ty(sub), self.ty(sup)) {
            (Type::Nothing, _) => true,
            (Type::Ref(a), Type::Ref(b)) => a == b,
            (Type::Generic(g), _) => {
                self.generic(*g).upper_bounds.iter().any(|b| self.is_equal_or_subtype_of(*b, sup))
            }
            (Type::Custom(..), _) => self.all_supers(sub).contains(&sup),
            _ => false,
        }
    }

    /// The type of the `index`-th tuple element, struct/class field, enum
    /// component, or array element; `None` when the index is out of range
    /// or the type has no positional fields. Leading references are seen
    /// through.
    pub fn field_of_type(&mut self, id: TypeId, index: usize) -> Option<TypeId> {
        let base = self.strip_all_refs(id);
        match self.ty(base).clone() {
            Type::Tuple(elems) => elems.get(index).copied(),
            Type::RawArray(elem) | Type::VArray(elem, _) => Some(elem),
            Type::Custom(def_id, args) => {
                let subst: TypeSubst =
                    self.def(def_id).generic_params.iter().copied().zip(args).collect();
                match &self.def(def_id).kind {
                    CustomDefKind::Enum { ctors, .. } => {
                        // The first component of an enum is always the
                        // constructor selector.
                        if index == 0 {
                            if ctors.len() == 2 { Some(self.bool_ty()) } else { Some(self.uint32_ty()) }
                        } else {
                            None
                        }
                    }
                    CustomDefKind::Struct { .. } | CustomDefKind::Class { .. } => {
                        let member = self.all_instance_vars(def_id).get(index)?.ty;
                        Some(self.instantiate_type(member, &subst))
                    }
                    CustomDefKind::Extend { .. } => None,
                }
            }
            _ => None,
        }
    }

    /// Read-only variant of [`Self::field_of_type`] for shared contexts
    /// (the parallel checker). Returns `None` when the answer would need
    /// interning a shape never formed elsewhere; callers tolerate that.
    #[must_use]
    pub fn field_of_type_readonly(&self, id: TypeId, index: usize) -> Option<TypeId> {
        let base = self.strip_all_refs(id);
        match self.ty(base) {
            Type::Tuple(elems) => elems.get(index).copied(),
            Type::RawArray(elem) | Type::VArray(elem, _) => Some(*elem),
            Type::Custom(def_id, args) => {
                let def = self.def(*def_id);
                let subst: TypeSubst =
                    def.generic_params.iter().copied().zip(args.iter().copied()).collect();
                match &def.kind {
                    CustomDefKind::Enum { ctors, .. } => {
                        if index == 0 {
                            let shape = if ctors.len() == 2 { Type::Bool } else { Type::UInt(IntWidth::I32) };
                            self.type_cache.get(&shape).copied()
                        } else {
                            None
                        }
                    }
                    CustomDefKind::Struct { .. } | CustomDefKind::Class { .. } => {
                        let member = self.all_instance_vars(*def_id).get(index)?.ty;
                        self.lookup_instantiated(member, &subst)
                    }
                    CustomDefKind::Extend { .. } => None,
                }
            }
            _ => None,
        }
    }

    /// Renders a type for diagnostics and dumps.
    #[must_use]
    pub fn type_to_string(&self, id: TypeId) -> String {
        match self.ty(id) {
            Type::Int(w) => format!("Int{}", width_name(*w)),
            Type::UInt(w) => format!("UInt{}", width_name(*w)),
            Type::Float(w) => match w {
                FloatWidth::F16 => "Float16".to_string(),
                FloatWidth::F32 => "Float32".to_string(),
                FloatWidth::F64 => "Float64".to_string(),
            },
            Type::Bool => "Bool".to_string(),
            Type::Rune => "Rune".to_string(),
            Type::Unit => "Unit".to_string(),
            Type::Void => "Void".to_string(),
            Type::Nothing => "Nothing".to_string(),
            Type::CString => "CString".to_string(),
            Type::This => "This".to_string(),
            Type::Tuple(elems) => {
                let inner: Vec<String> = elems.iter().map(|e| self.type_to_string(*e)).collect();
                format!("Tuple<{}>", inner.join(", "))
            }
            Type::Func(sig) => {
                let params: Vec<String> = sig.params.iter().map(|p| self.type_to_string(*p)).collect();
                format!("({}) -> {}", params.join(", "), self.type_to_string(sig.ret))
            }
            Type::Ref(base) => format!("{}&", self.type_to_string(*base)),
            Type::RawArray(elem) => format!("RawArray<{}>", self.type_to_string(*elem)),
            Type::VArray(elem, n) => format!("VArray<{}, {n}>", self.type_to_string(*elem)),
            Type::CPointer(base) => format!("CPointer<{}>", self.type_to_string(*base)),
            Type::Box(base) => format!("Box<{}>", self.type_to_string(*base)),
            Type::Custom(def, args) => {
                let name = &self.def(*def).src_name;
                if args.is_empty() {
                    name.clone()
                } else {
                    let inner: Vec<String> = args.iter().map(|a| self.type_to_string(*a)).collect();
                    format!("{name}<{}>", inner.join(", "))
                }
            }
            Type::Generic(g) => self.generic(*g).name.clone(),
        }
    }
}

fn width_name(w: IntWidth) -> &'static str {
    match w {
        IntWidth::I8 => "8",
        IntWidth::I16 => "16",
        IntWidth::I32 => "32",
        IntWidth::I64 => "64",
        IntWidth::Native => "Native",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;

    #[test]
    fn test_interning_returns_same_identity() {
        let mut b = Builder::new();
        let t1 = b.tuple_ty(vec![]);
        let i64a = b.int64_ty();
        let i64b = b.int64_ty();
        assert_eq!(i64a, i64b);
        let t2 = b.tuple_ty(vec![]);
        assert_eq!(t1, t2);
        let pair1 = b.tuple_ty(vec![i64a, i64b]);
        let pair2 = b.tuple_ty(vec![i64b, i64a]);
        assert_eq!(pair1, pair2);
    }

    #[test]
    fn test_strip_all_refs_idempotent() {
        let mut b = Builder::new();
        let base = b.int64_ty();
        let r1 = b.ref_to(base);
        let r2 = b.ref_to(r1);
        let stripped = b.strip_all_refs(r2);
        assert_eq!(stripped, base);
        assert_eq!(b.strip_all_refs(stripped), stripped);
    }

    #[test]
    fn test_ref_depth() {
        let mut b = Builder::new();
        let base = b.bool_ty();
        let r1 = b.ref_to(base);
        let r2 = b.ref_to(r1);
        assert_eq!(b.ref_depth(base), 0);
        assert_eq!(b.ref_depth(r1), 1);
        assert_eq!(b.ref_depth(r2), 2);
    }

    #[test]
    fn test_nothing_is_subtype_of_everything() {
        let mut b = Builder::new();
        let nothing = b.nothing_ty();
        let i = b.int64_ty();
        let t = b.tuple_ty(vec![i]);
        assert!(b.is_equal_or_subtype_of(nothing, i));
        assert!(b.is_equal_or_subtype_of(nothing, t));
        assert!(!b.is_equal_or_subtype_of(i, nothing));
    }

    #[test]
    fn test_instantiate_generic() {
        let mut b = Builder::new();
        let g = b.register_generic("T", vec![]);
        let gt = b.intern_type(Type::Generic(g));
        let i = b.int64_ty();
        let tup = b.tuple_ty(vec![gt, i]);
        let subst = TypeSubst::from_iter([(g, i)]);
        let inst = b.instantiate_type(tup, &subst);
        let expected = b.tuple_ty(vec![i, i]);
        assert_eq!(inst, expected);
    }

    #[test]
    fn test_field_of_tuple_and_array() {
        let mut b = Builder::new();
        let i = b.int64_ty();
        let u = b.unit_ty();
        let tup = b.tuple_ty(vec![i, u]);
        assert_eq!(b.field_of_type(tup, 0), Some(i));
        assert_eq!(b.field_of_type(tup, 1), Some(u));
        assert_eq!(b.field_of_type(tup, 2), None);
        let arr = b.raw_array_ty(i);
        assert_eq!(b.field_of_type(arr, 5), Some(i));
    }
}
