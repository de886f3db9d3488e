use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::error::CheckError;
use crate::ir::Annotation;

/// Identifies one qualifier hierarchy within a checker. A checker may compose
/// several hierarchies; each has exactly one top and one bottom.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct HierarchyId(pub(crate) &'static str);

/// One point in a qualifier hierarchy. Payload-bearing qualifiers expose two
/// identity notions: full equality (`Eq`, payload included) and `kind`
/// (payload ignored); the lattice's "same kind, different payload" case needs
/// both.
pub(crate) trait Qualifier: Clone + Eq + Ord + Debug {
    fn hierarchy(&self) -> HierarchyId;

    fn kind(&self) -> &'static str;

    fn same_kind(&self, other: &Self) -> bool {
        self.hierarchy() == other.hierarchy() && self.kind() == other.kind()
    }
}

/// At most one qualifier per hierarchy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct QualifierSet<Q: Qualifier> {
    by_hierarchy: BTreeMap<HierarchyId, Q>,
}

impl<Q: Qualifier> Default for QualifierSet<Q> {
    fn default() -> Self {
        QualifierSet {
            by_hierarchy: BTreeMap::new(),
        }
    }
}

impl<Q: Qualifier> QualifierSet<Q> {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn of(qualifier: Q) -> Self {
        let mut set = Self::empty();
        set.insert(qualifier);
        set
    }

    /// Inserts, replacing any existing qualifier of the same hierarchy.
    pub(crate) fn insert(&mut self, qualifier: Q) -> Option<Q> {
        self.by_hierarchy.insert(qualifier.hierarchy(), qualifier)
    }

    /// Inserts only when the hierarchy has no qualifier yet.
    pub(crate) fn insert_missing(&mut self, qualifier: Q) {
        self.by_hierarchy
            .entry(qualifier.hierarchy())
            .or_insert(qualifier);
    }

    pub(crate) fn get(&self, id: HierarchyId) -> Option<&Q> {
        self.by_hierarchy.get(&id)
    }

    pub(crate) fn remove(&mut self, id: HierarchyId) -> Option<Q> {
        self.by_hierarchy.remove(&id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Q> {
        self.by_hierarchy.values()
    }

    pub(crate) fn has_all(&self, ids: &[HierarchyId]) -> bool {
        ids.iter().all(|id| self.by_hierarchy.contains_key(id))
    }
}

/// The lattice for one checker's qualifier hierarchies.
///
/// Implementations must form a lattice per hierarchy: the subtype relation is
/// reflexive, transitive, and antisymmetric up to qualifier equality, and
/// LUB/GLB are consistent with it. `validate_lattice` checks these laws over
/// `sample_qualifiers` at checker construction.
pub(crate) trait QualifierHierarchy<Q: Qualifier>: Send + Sync {
    fn hierarchy_ids(&self) -> &[HierarchyId];

    fn top(&self, id: HierarchyId) -> Q;

    fn bottom(&self, id: HierarchyId) -> Q;

    fn is_subtype(&self, sub: &Q, sup: &Q) -> bool;

    fn least_upper_bound(&self, a: &Q, b: &Q) -> Q;

    fn greatest_lower_bound(&self, a: &Q, b: &Q) -> Q;

    /// Reads an explicit user annotation into a qualifier, or `None` when the
    /// annotation belongs to some other checker.
    fn parse_annotation(&self, annotation: &Annotation) -> Option<Q>;

    /// Representative qualifiers (beyond top and bottom) for lattice-law
    /// validation and property tests.
    fn sample_qualifiers(&self) -> Vec<Q>;
}

/// Checks lattice laws over the hierarchy's sample qualifiers. Fails at
/// checker construction, before any per-unit analysis runs.
pub(crate) fn validate_lattice<Q: Qualifier>(
    hierarchy: &dyn QualifierHierarchy<Q>,
) -> Result<(), CheckError> {
    for id in hierarchy.hierarchy_ids() {
        let mut sample: Vec<Q> = vec![hierarchy.top(*id), hierarchy.bottom(*id)];
        sample.extend(
            hierarchy
                .sample_qualifiers()
                .into_iter()
                .filter(|q| q.hierarchy() == *id),
        );
        let fail = |reason: String| CheckError::Lattice {
            hierarchy: id.0,
            reason,
        };

        let top = hierarchy.top(*id);
        let bottom = hierarchy.bottom(*id);
        for a in &sample {
            if !hierarchy.is_subtype(a, a) {
                return Err(fail(format!("{a:?} is not a subtype of itself")));
            }
            if !hierarchy.is_subtype(a, &top) {
                return Err(fail(format!("{a:?} is not below top {top:?}")));
            }
            if !hierarchy.is_subtype(&bottom, a) {
                return Err(fail(format!("bottom {bottom:?} is not below {a:?}")));
            }
        }
        for a in &sample {
            for b in &sample {
                if hierarchy.is_subtype(a, b) && hierarchy.is_subtype(b, a) && a != b {
                    return Err(fail(format!("{a:?} and {b:?} violate antisymmetry")));
                }
                let lub = hierarchy.least_upper_bound(a, b);
                let glb = hierarchy.greatest_lower_bound(a, b);
                if lub != hierarchy.least_upper_bound(b, a) {
                    return Err(fail(format!("LUB({a:?}, {b:?}) is not commutative")));
                }
                if glb != hierarchy.greatest_lower_bound(b, a) {
                    return Err(fail(format!("GLB({a:?}, {b:?}) is not commutative")));
                }
                if !hierarchy.is_subtype(a, &lub) || !hierarchy.is_subtype(b, &lub) {
                    return Err(fail(format!("LUB({a:?}, {b:?}) = {lub:?} is not an upper bound")));
                }
                if !hierarchy.is_subtype(&glb, a) || !hierarchy.is_subtype(&glb, b) {
                    return Err(fail(format!("GLB({a:?}, {b:?}) = {glb:?} is not a lower bound")));
                }
            }
        }
    }
    Ok(())
}

/// Hierarchy-by-hierarchy subtype test over complete qualifier sets. A
/// hierarchy missing from `sub` is treated as top, never as bottom.
pub(crate) fn set_is_subtype<Q: Qualifier>(
    hierarchy: &dyn QualifierHierarchy<Q>,
    sub: &QualifierSet<Q>,
    sup: &QualifierSet<Q>,
) -> bool {
    hierarchy.hierarchy_ids().iter().all(|id| {
        let top = hierarchy.top(*id);
        let sub_q = sub.get(*id).unwrap_or(&top);
        let sup_q = sup.get(*id).unwrap_or(&top);
        hierarchy.is_subtype(sub_q, sup_q)
    })
}

pub(crate) fn set_least_upper_bound<Q: Qualifier>(
    hierarchy: &dyn QualifierHierarchy<Q>,
    a: &QualifierSet<Q>,
    b: &QualifierSet<Q>,
) -> QualifierSet<Q> {
    let mut result = QualifierSet::empty();
    for id in hierarchy.hierarchy_ids() {
        match (a.get(*id), b.get(*id)) {
            (Some(qa), Some(qb)) => {
                result.insert(hierarchy.least_upper_bound(qa, qb));
            }
            (Some(q), None) | (None, Some(q)) => {
                result.insert(q.clone());
            }
            (None, None) => {}
        }
    }
    result
}

pub(crate) fn set_greatest_lower_bound<Q: Qualifier>(
    hierarchy: &dyn QualifierHierarchy<Q>,
    a: &QualifierSet<Q>,
    b: &QualifierSet<Q>,
) -> QualifierSet<Q> {
    let mut result = QualifierSet::empty();
    for id in hierarchy.hierarchy_ids() {
        match (a.get(*id), b.get(*id)) {
            (Some(qa), Some(qb)) => {
                result.insert(hierarchy.greatest_lower_bound(qa, qb));
            }
            (Some(q), None) | (None, Some(q)) => {
                result.insert(q.clone());
            }
            (None, None) => {}
        }
    }
    result
}
