use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{PrimitiveKind, TypeKind, TypeUse};
use crate::qualifier::{
    HierarchyId, Qualifier, QualifierHierarchy, QualifierSet, set_is_subtype,
};

/// A plain type's structure with a qualifier set at every position.
///
/// Instances are built fresh per query by the type factory; the mutation
/// methods exist for construction passes and checker-authored rewrites only.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AnnotatedType<Q: Qualifier> {
    pub(crate) qualifiers: QualifierSet<Q>,
    pub(crate) structure: TypeStructure<Q>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TypeStructure<Q: Qualifier> {
    Primitive(PrimitiveKind),
    Declared {
        name: String,
        args: Vec<AnnotatedType<Q>>,
    },
    Array {
        component: Box<AnnotatedType<Q>>,
    },
    /// Bound lives in the enclosing declaration's bound table, not inline.
    TypeVar {
        name: String,
    },
    Wildcard {
        bound: Option<Box<AnnotatedType<Q>>>,
    },
    Null,
    Void,
}

/// Structural position of a type use, used by defaulting policies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TypePosition {
    LocalVar,
    Parameter,
    Return,
    Field,
    Receiver,
    Component,
    TypeArgument,
    Bound,
    Expression,
}

impl TypePosition {
    /// Position of a type argument or wildcard bound nested under `self`.
    fn nested(self) -> TypePosition {
        match self {
            TypePosition::Bound => TypePosition::Bound,
            _ => TypePosition::TypeArgument,
        }
    }
}

impl<Q: Qualifier> AnnotatedType<Q> {
    /// Mirrors the plain structure of `use_`, attaching explicit annotations
    /// that the hierarchy recognizes. Defaulting happens separately.
    pub(crate) fn from_use(use_: &TypeUse, hierarchy: &dyn QualifierHierarchy<Q>) -> Self {
        let mut qualifiers = QualifierSet::empty();
        for annotation in &use_.annotations {
            if let Some(q) = hierarchy.parse_annotation(annotation) {
                qualifiers.insert(q);
            }
        }
        let structure = match &use_.kind {
            TypeKind::Primitive { name } => TypeStructure::Primitive(*name),
            TypeKind::Declared { name, args } => TypeStructure::Declared {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| AnnotatedType::from_use(arg, hierarchy))
                    .collect(),
            },
            TypeKind::Array { component } => TypeStructure::Array {
                component: Box::new(AnnotatedType::from_use(component, hierarchy)),
            },
            TypeKind::TypeVar { name } => TypeStructure::TypeVar { name: name.clone() },
            TypeKind::Wildcard { bound } => TypeStructure::Wildcard {
                bound: bound
                    .as_deref()
                    .map(|b| Box::new(AnnotatedType::from_use(b, hierarchy))),
            },
            TypeKind::Null => TypeStructure::Null,
            TypeKind::Void => TypeStructure::Void,
        };
        AnnotatedType {
            qualifiers,
            structure,
        }
    }

    /// Adds to the primary slot unless the hierarchy already has a qualifier.
    pub(crate) fn add_qualifier(&mut self, qualifier: Q) {
        self.qualifiers.insert_missing(qualifier);
    }

    /// Replaces the primary qualifier of the qualifier's hierarchy.
    pub(crate) fn replace_qualifier(&mut self, qualifier: Q) {
        self.qualifiers.insert(qualifier);
    }

    pub(crate) fn remove_qualifier(&mut self, id: HierarchyId) -> Option<Q> {
        self.qualifiers.remove(id)
    }

    pub(crate) fn qualifier(&self, id: HierarchyId) -> Option<&Q> {
        self.qualifiers.get(id)
    }

    pub(crate) fn declared_name(&self) -> Option<&str> {
        match &self.structure {
            TypeStructure::Declared { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Visits every structural position of the tree exactly once, outer
    /// positions first. Type-variable bounds are not part of the tree; see
    /// `scan_with_bounds`.
    pub(crate) fn for_each_position_mut(
        &mut self,
        position: TypePosition,
        visit: &mut dyn FnMut(TypePosition, &mut AnnotatedType<Q>),
    ) {
        visit(position, self);
        match &mut self.structure {
            TypeStructure::Declared { args, .. } => {
                for arg in args {
                    arg.for_each_position_mut(position.nested(), visit);
                }
            }
            TypeStructure::Array { component } => {
                component.for_each_position_mut(TypePosition::Component, visit);
            }
            TypeStructure::Wildcard { bound: Some(bound) } => {
                bound.for_each_position_mut(TypePosition::Bound, visit);
            }
            _ => {}
        }
    }

    /// Visits every position reachable from this type, following
    /// type-variable bounds through `bounds`. The visited set keyed by
    /// variable name protects against mutually recursive bounds such as
    /// `T extends Comparable<T>`.
    pub(crate) fn scan_with_bounds(
        &self,
        bounds: &BTreeMap<String, AnnotatedType<Q>>,
        visit: &mut dyn FnMut(&AnnotatedType<Q>),
    ) {
        let mut visited = BTreeSet::new();
        self.scan_inner(bounds, &mut visited, visit);
    }

    fn scan_inner(
        &self,
        bounds: &BTreeMap<String, AnnotatedType<Q>>,
        visited: &mut BTreeSet<String>,
        visit: &mut dyn FnMut(&AnnotatedType<Q>),
    ) {
        visit(self);
        match &self.structure {
            TypeStructure::Declared { args, .. } => {
                for arg in args {
                    arg.scan_inner(bounds, visited, visit);
                }
            }
            TypeStructure::Array { component } => {
                component.scan_inner(bounds, visited, visit);
            }
            TypeStructure::Wildcard { bound: Some(bound) } => {
                bound.scan_inner(bounds, visited, visit);
            }
            TypeStructure::TypeVar { name } => {
                if visited.insert(name.clone()) {
                    if let Some(bound) = bounds.get(name) {
                        bound.scan_inner(bounds, visited, visit);
                    }
                }
            }
            _ => {}
        }
    }

    /// True when every position in the tree carries one qualifier per active
    /// hierarchy; holds after defaulting.
    pub(crate) fn is_fully_qualified(&self, ids: &[HierarchyId]) -> bool {
        let mut complete = true;
        self.scan_with_bounds(&BTreeMap::new(), &mut |ty| {
            if !matches!(ty.structure, TypeStructure::Void) && !ty.qualifiers.has_all(ids) {
                complete = false;
            }
        });
        complete
    }
}

/// Qualifier subtyping over annotated types: primary qualifiers compare by
/// the hierarchy's order; nested positions (array components, type
/// arguments) are invariant and require equal qualifier sets when both
/// shapes match. Plain base types are the host front end's responsibility.
pub(crate) fn is_subtype<Q: Qualifier>(
    hierarchy: &dyn QualifierHierarchy<Q>,
    sub: &AnnotatedType<Q>,
    sup: &AnnotatedType<Q>,
) -> bool {
    if matches!(sub.structure, TypeStructure::Null) {
        // The null type's qualifiers still decide; its structure matches any
        // reference type.
        return set_is_subtype(hierarchy, &sub.qualifiers, &sup.qualifiers);
    }
    if !set_is_subtype(hierarchy, &sub.qualifiers, &sup.qualifiers) {
        return false;
    }
    match (&sub.structure, &sup.structure) {
        (
            TypeStructure::Array { component: sub_c },
            TypeStructure::Array { component: sup_c },
        ) => invariant_equal(hierarchy, sub_c, sup_c),
        (
            TypeStructure::Declared {
                name: sub_n,
                args: sub_args,
            },
            TypeStructure::Declared {
                name: sup_n,
                args: sup_args,
            },
        ) if sub_n == sup_n && sub_args.len() == sup_args.len() => sub_args
            .iter()
            .zip(sup_args.iter())
            .all(|(a, b)| invariant_equal(hierarchy, a, b)),
        _ => true,
    }
}

fn invariant_equal<Q: Qualifier>(
    hierarchy: &dyn QualifierHierarchy<Q>,
    a: &AnnotatedType<Q>,
    b: &AnnotatedType<Q>,
) -> bool {
    set_is_subtype(hierarchy, &a.qualifiers, &b.qualifiers)
        && set_is_subtype(hierarchy, &b.qualifiers, &a.qualifiers)
        && match (&a.structure, &b.structure) {
            (
                TypeStructure::Array { component: a_c },
                TypeStructure::Array { component: b_c },
            ) => invariant_equal(hierarchy, a_c, b_c),
            (
                TypeStructure::Declared { args: a_args, .. },
                TypeStructure::Declared { args: b_args, .. },
            ) if a_args.len() == b_args.len() => a_args
                .iter()
                .zip(b_args.iter())
                .all(|(x, y)| invariant_equal(hierarchy, x, y)),
            _ => true,
        }
}
