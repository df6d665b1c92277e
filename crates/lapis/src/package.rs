//! The package: top-level collections of globals, functions, and custom
//! defs, plus their imported mirrors.

use strum::{Display, IntoStaticStr};

use crate::builder::Builder;
use crate::ty::DefId;
use crate::value::ValueId;

/// Visibility of the package across package boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum AccessLevel {
    Internal,
    Protected,
    Public,
}

/// A compiled package, mutated in place by the pass pipeline.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub access_level: AccessLevel,
    pub package_init_func: Option<ValueId>,
    pub globals: Vec<ValueId>,
    pub funcs: Vec<ValueId>,
    pub classes: Vec<DefId>,
    pub structs: Vec<DefId>,
    pub enums: Vec<DefId>,
    pub extends: Vec<DefId>,
    pub imported_values: Vec<ValueId>,
    pub imported_funcs: Vec<ValueId>,
    pub imported_classes: Vec<DefId>,
    pub imported_structs: Vec<DefId>,
    pub imported_enums: Vec<DefId>,
}

impl Package {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access_level: AccessLevel::Public,
            package_init_func: None,
            globals: Vec::new(),
            funcs: Vec::new(),
            classes: Vec::new(),
            structs: Vec::new(),
            enums: Vec::new(),
            extends: Vec::new(),
            imported_values: Vec::new(),
            imported_funcs: Vec::new(),
            imported_classes: Vec::new(),
            imported_structs: Vec::new(),
            imported_enums: Vec::new(),
        }
    }

    /// All functions defined in this package, package init included.
    #[must_use]
    pub fn global_funcs(&self) -> Vec<ValueId> {
        let mut all = self.funcs.clone();
        if let Some(init) = self.package_init_func {
            if !all.contains(&init) {
                all.push(init);
            }
        }
        all
    }

    /// Defined defs of every kind, in collection order.
    #[must_use]
    pub fn all_defs(&self) -> Vec<DefId> {
        let mut defs = Vec::with_capacity(
            self.classes.len() + self.structs.len() + self.enums.len() + self.extends.len(),
        );
        defs.extend(&self.classes);
        defs.extend(&self.structs);
        defs.extend(&self.enums);
        defs.extend(&self.extends);
        defs
    }

    /// Enum defs, defined and imported.
    #[must_use]
    pub fn all_enum_defs(&self) -> Vec<DefId> {
        let mut defs = self.enums.clone();
        defs.extend(&self.imported_enums);
        defs
    }

    /// Struct defs, defined and imported.
    #[must_use]
    pub fn all_struct_defs(&self) -> Vec<DefId> {
        let mut defs = self.structs.clone();
        defs.extend(&self.imported_structs);
        defs
    }
}

/// The name-mangling oracle.
///
/// Mangling lives outside this crate; all the IR needs is a stable,
/// globally unique string per declaration, and stability is the oracle's
/// responsibility.
pub trait Mangler {
    fn mangle_def(&self, builder: &Builder, def: DefId) -> String;
    fn mangle_func(&self, builder: &Builder, func: ValueId) -> String;
}

/// Mangler that prefixes the package and source name; adequate for tests
/// and for packages that never cross a linkage boundary.
#[derive(Debug, Default)]
pub struct PlainMangler;

impl Mangler for PlainMangler {
    fn mangle_def(&self, builder: &Builder, def: DefId) -> String {
        let d = builder.def(def);
        format!("_L{}{}{}{}", d.package.len(), d.package, d.src_name.len(), d.src_name)
    }

    fn mangle_func(&self, builder: &Builder, func: ValueId) -> String {
        let v = builder.value(func);
        let (pkg, name) = match v.func_data() {
            Some(data) => (data.package.as_str(), data.src_name.as_str()),
            None => ("", v.ident_without_prefix()),
        };
        format!("_L{}{}{}{}F", pkg.len(), pkg, name.len(), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_funcs_includes_package_init_once() {
        let mut pkg = Package::new("demo");
        pkg.funcs.push(ValueId(1));
        pkg.package_init_func = Some(ValueId(2));
        assert_eq!(pkg.global_funcs(), vec![ValueId(1), ValueId(2)]);
        pkg.funcs.push(ValueId(2));
        assert_eq!(pkg.global_funcs(), vec![ValueId(1), ValueId(2)]);
    }
}
