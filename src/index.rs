use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::Result;

use crate::ir::{ClassDef, CompilationUnit, MethodDef};

/// Class lookup index over one compilation unit.
pub(crate) struct UnitIndex<'a> {
    classes: BTreeMap<&'a str, &'a ClassDef>,
}

impl<'a> UnitIndex<'a> {
    pub(crate) fn build(unit: &'a CompilationUnit) -> Result<Self> {
        let mut classes: BTreeMap<&str, &ClassDef> = BTreeMap::new();
        let mut duplicates = Vec::new();
        for class in &unit.classes {
            if classes.insert(class.name.as_str(), class).is_some() {
                duplicates.push(class.name.clone());
            }
        }
        if !duplicates.is_empty() {
            anyhow::bail!(
                "duplicate classes in {}: {}",
                unit.path,
                duplicates.join(", ")
            );
        }
        Ok(UnitIndex { classes })
    }

    pub(crate) fn class(&self, name: &str) -> Option<&'a ClassDef> {
        self.classes.get(name).copied()
    }

    /// All supertypes of `class` defined in this unit, breadth-first.
    pub(crate) fn supertypes(&self, class: &ClassDef) -> Vec<&'a ClassDef> {
        let mut result = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        if let Some(super_name) = &class.super_name {
            queue.push_back(super_name.clone());
        }
        for interface in &class.interfaces {
            queue.push_back(interface.clone());
        }
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let Some(super_class) = self.class(&name) else {
                continue;
            };
            result.push(super_class);
            if let Some(super_name) = &super_class.super_name {
                queue.push_back(super_name.clone());
            }
            for interface in &super_class.interfaces {
                queue.push_back(interface.clone());
            }
        }
        result
    }

    /// True when `sub` names a class whose supertype chain reaches `sup`.
    /// Unknown class names are treated as compatible; the host front end has
    /// already checked base types.
    pub(crate) fn is_declared_subtype(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        let Some(class) = self.class(sub) else {
            return true;
        };
        self.supertypes(class).iter().any(|c| c.name == sup)
    }

    pub(crate) fn find_method(&self, class_name: &str, method: &str) -> Option<&'a MethodDef> {
        let class = self.class(class_name)?;
        class.methods.iter().find(|m| m.name == method)
    }
}
