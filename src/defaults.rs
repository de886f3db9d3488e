use crate::ir::{Literal, PrimitiveKind};
use crate::qualifier::{HierarchyId, Qualifier, QualifierHierarchy};
use crate::types::TypePosition;

/// Assigns qualifiers to positions without an explicit annotation.
///
/// The framework defaults are deliberately weak: every position defaults to
/// the hierarchy top (no claim), literals and fresh allocations to bottom
/// (the most specific point). Checkers override selectively; the nullness
/// checker, for instance, sends the `null` literal back to top.
pub(crate) trait DefaultingPolicy<Q: Qualifier>: Send + Sync {
    fn for_position(
        &self,
        hierarchy: &dyn QualifierHierarchy<Q>,
        _position: TypePosition,
        _primitive: Option<PrimitiveKind>,
        id: HierarchyId,
    ) -> Q {
        hierarchy.top(id)
    }

    fn for_literal(
        &self,
        hierarchy: &dyn QualifierHierarchy<Q>,
        _literal: &Literal,
        id: HierarchyId,
    ) -> Q {
        hierarchy.bottom(id)
    }

    fn for_new(&self, hierarchy: &dyn QualifierHierarchy<Q>, id: HierarchyId) -> Q {
        hierarchy.bottom(id)
    }
}

/// The framework defaults with no checker-specific overrides.
pub(crate) struct StandardDefaults;

impl<Q: Qualifier> DefaultingPolicy<Q> for StandardDefaults {}
