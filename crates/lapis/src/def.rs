//! Custom type definitions: classes, structs, enums, extensions, and the
//! v-tables dynamic dispatch rests on.

use indexmap::IndexMap;
use strum::{Display, IntoStaticStr};

use crate::builder::Builder;
use crate::ty::{DefId, GenericTypeId, TypeId};
use crate::value::{Attributes, ValueId};

/// A direct instance (or static) member variable.
#[derive(Debug, Clone)]
pub struct MemberVar {
    pub name: String,
    pub mangled_name: String,
    pub ty: TypeId,
    pub attrs: Attributes,
}

impl MemberVar {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self { name: name.into(), mangled_name: String::new(), ty, attrs: Attributes::empty() }
    }
}

/// An enum constructor: name, mangled name, and its function type
/// `(payload..) -> EnumType`.
#[derive(Debug, Clone)]
pub struct EnumCtor {
    pub name: String,
    pub mangled_name: String,
    pub func_ty: TypeId,
}

/// A method slot required but not provided by an abstract def.
#[derive(Debug, Clone)]
pub struct AbstractMethod {
    pub name: String,
    pub sig_ty: TypeId,
    pub attrs: Attributes,
}

/// One slot of a v-table.
///
/// Slot `i` of a child def corresponds to slot `i` of the parent: same
/// source name, covariant return type, identical parameter types, with the
/// receiver's `this` tolerated as a class-subtype refinement. A slot
/// without an instance is abstract and only legal on abstract defs.
#[derive(Debug, Clone)]
pub struct VTableSlot {
    pub src_name: String,
    /// The instantiated signature used for dispatch comparison.
    pub sig_ty: TypeId,
    /// The signature as originally declared, before instantiation.
    pub original_ty: TypeId,
    pub return_ty: TypeId,
    /// The parent class/interface type contributing this slot.
    pub parent_ty: TypeId,
    pub instance: Option<ValueId>,
    pub attrs: Attributes,
}

/// Per-parent method tables; iteration order is the declaration order of
/// the parents and is semantic for slot numbering.
pub type VTable = IndexMap<TypeId, Vec<VTableSlot>>;

/// Kind-specific payload of a custom def.
#[derive(Debug, Clone)]
pub enum CustomDefKind {
    Struct {
        is_c: bool,
    },
    Class {
        super_class: Option<TypeId>,
        interfaces: Vec<TypeId>,
        finalizer: Option<ValueId>,
        abstract_methods: Vec<AbstractMethod>,
        is_interface: bool,
    },
    Enum {
        ctors: Vec<EnumCtor>,
        /// The source used an open-enum form.
        non_exhaustive: bool,
    },
    Extend {
        extended: TypeId,
        interfaces: Vec<TypeId>,
    },
}

/// Kind tags, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum CustomDefTag {
    Struct,
    Class,
    Enum,
    Extend,
}

/// A class/struct/enum/extension declaration.
#[derive(Debug, Clone)]
pub struct CustomDef {
    pub src_name: String,
    pub mangled_name: String,
    pub package: String,
    pub generic_params: Vec<GenericTypeId>,
    pub instance_vars: Vec<MemberVar>,
    pub static_vars: Vec<ValueId>,
    /// Methods, each a `Func` or `ImportedFunc` value.
    pub methods: Vec<ValueId>,
    pub vtable: VTable,
    pub kind: CustomDefKind,
    pub imported: bool,
}

impl CustomDef {
    #[must_use]
    pub fn tag(&self) -> CustomDefTag {
        match self.kind {
            CustomDefKind::Struct { .. } => CustomDefTag::Struct,
            CustomDefKind::Class { .. } => CustomDefTag::Class,
            CustomDefKind::Enum { .. } => CustomDefTag::Enum,
            CustomDefKind::Extend { .. } => CustomDefTag::Extend,
        }
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        matches!(self.kind, CustomDefKind::Class { is_interface: true, .. })
    }

    /// Whether abstract v-table slots are legal on this def.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        match &self.kind {
            CustomDefKind::Class { is_interface, abstract_methods, .. } => {
                *is_interface || !abstract_methods.is_empty()
            }
            CustomDefKind::Extend { .. } => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn finalizer(&self) -> Option<ValueId> {
        match &self.kind {
            CustomDefKind::Class { finalizer, .. } => *finalizer,
            _ => None,
        }
    }

    #[must_use]
    pub fn enum_ctors(&self) -> &[EnumCtor] {
        match &self.kind {
            CustomDefKind::Enum { ctors, .. } => ctors,
            _ => &[],
        }
    }

    /// An enum is trivial when no constructor takes parameters; its runtime
    /// representation is then a plain `UInt32` tag.
    #[must_use]
    pub fn is_trivial_enum(&self, builder: &Builder) -> bool {
        match &self.kind {
            CustomDefKind::Enum { ctors, .. } => ctors.iter().all(|c| {
                match builder.ty(c.func_ty) {
                    crate::ty::Type::Func(sig) => sig.params.is_empty(),
                    _ => true,
                }
            }),
            _ => false,
        }
    }
}

impl Builder {
    /// Direct instance variables of `def`.
    #[must_use]
    pub fn direct_instance_vars(&self, def: DefId) -> &[MemberVar] {
        &self.def(def).instance_vars
    }

    /// Instance variables including those inherited through the super-class
    /// chain, supers first. Non-class defs have no inherited members.
    #[must_use]
    pub fn all_instance_vars(&self, def: DefId) -> Vec<MemberVar> {
        let mut chain = vec![def];
        let mut cur = def;
        while let CustomDefKind::Class { super_class: Some(sup), .. } = &self.def(cur).kind {
            let Some((sup_def, _)) = self.custom_def_of(*sup) else { break };
            chain.push(sup_def);
            cur = sup_def;
        }
        let mut vars = Vec::new();
        for d in chain.into_iter().rev() {
            vars.extend(self.def(d).instance_vars.iter().cloned());
        }
        vars
    }

    /// Number of members contributed by the super-class chain alone.
    #[must_use]
    pub fn super_member_count(&self, def: DefId) -> usize {
        self.all_instance_vars(def).len() - self.def(def).instance_vars.len()
    }

    /// The direct super-class def of a class, if any.
    #[must_use]
    pub fn super_class_def(&self, def: DefId) -> Option<DefId> {
        match &self.def(def).kind {
            CustomDefKind::Class { super_class: Some(sup), .. } => {
                self.custom_def_of(*sup).map(|(d, _)| d)
            }
            _ => None,
        }
    }

    /// Resolves an `Invoke` against a receiver type: strips references off
    /// the receiver (callers substitute the enclosing def's declared
    /// parent when the receiver is the `this` type) and scans the
    /// receiver's v-table for a slot with the given source name and an
    /// instantiated signature the call is compatible with.
    #[must_use]
    pub fn lookup_vtable_slot(
        &self,
        receiver: TypeId,
        method_name: &str,
        method_sig: TypeId,
    ) -> Option<(TypeId, usize)> {
        let base = self.strip_all_refs(receiver);
        let (def_id, _) = self.custom_def_of(base)?;
        for (parent_ty, slots) in &self.def(def_id).vtable {
            for (index, slot) in slots.iter().enumerate() {
                if slot.src_name == method_name
                    && (slot.sig_ty == method_sig
                        || self.is_equal_or_subtype_of(slot.sig_ty, method_sig))
                {
                    return Some((*parent_ty, index));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::value::Attributes;

    #[test]
    fn test_lookup_vtable_slot_by_name_and_signature() {
        let mut b = Builder::new();
        let unit = b.unit_ty();
        let def = b.create_def(CustomDef {
            src_name: "CA".into(),
            mangled_name: "_LCA".into(),
            package: "demo".into(),
            generic_params: vec![],
            instance_vars: vec![],
            static_vars: vec![],
            methods: vec![],
            vtable: VTable::default(),
            kind: CustomDefKind::Class {
                super_class: None,
                interfaces: vec![],
                finalizer: None,
                abstract_methods: vec![],
                is_interface: false,
            },
            imported: false,
        });
        let class_ty = b.custom_ty(def, vec![]);
        let this_ref = b.ref_to(class_ty);
        let sig = b.func_ty(vec![this_ref], unit);
        b.def_mut(def).vtable.insert(
            class_ty,
            vec![VTableSlot {
                src_name: "run".into(),
                sig_ty: sig,
                original_ty: sig,
                return_ty: unit,
                parent_ty: class_ty,
                instance: None,
                attrs: Attributes::ABSTRACT,
            }],
        );

        // dispatch sees through the receiver's reference levels
        let receiver = b.ref_to(this_ref);
        assert_eq!(b.lookup_vtable_slot(receiver, "run", sig), Some((class_ty, 0)));
        assert_eq!(b.lookup_vtable_slot(receiver, "missing", sig), None);
    }
}
