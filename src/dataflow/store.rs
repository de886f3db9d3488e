use std::collections::BTreeMap;
use std::fmt;

use crate::cfg::CfgIndex;
use crate::ir::{AssignTarget, Node, NodeId, NodeKind, TypeKind};
use crate::qualifier::{Qualifier, QualifierHierarchy, QualifierSet, set_least_upper_bound};

/// Canonical form of an expression the analysis can track across program
/// points. Expressions that do not canonicalize (arbitrary arithmetic,
/// literals) live only in per-node values.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum ExpressionKey {
    Local(String),
    This,
    Field {
        /// `None` for static or unqualified-static fields.
        receiver: Option<Box<ExpressionKey>>,
        name: String,
    },
    ArrayElement {
        array: Box<ExpressionKey>,
        index: Box<ExpressionKey>,
    },
    CallResult(NodeId),
}

impl ExpressionKey {
    /// Canonicalizes the expression a node evaluates, if it has one.
    pub(crate) fn for_node(cfg: &CfgIndex<'_>, node: &Node) -> Option<ExpressionKey> {
        match &node.kind {
            NodeKind::LocalRead { name } => Some(ExpressionKey::Local(name.clone())),
            NodeKind::This => Some(ExpressionKey::This),
            NodeKind::FieldRead { receiver, field } => {
                let receiver = match receiver {
                    Some(id) => Some(Box::new(Self::for_operand(cfg, *id)?)),
                    None => None,
                };
                Some(ExpressionKey::Field {
                    receiver,
                    name: field.clone(),
                })
            }
            NodeKind::ArrayRead { array, index } => Some(ExpressionKey::ArrayElement {
                array: Box::new(Self::for_operand(cfg, *array)?),
                index: Box::new(Self::for_operand(cfg, *index)?),
            }),
            NodeKind::Call { .. } => Some(ExpressionKey::CallResult(node.id)),
            _ => None,
        }
    }

    pub(crate) fn for_operand(cfg: &CfgIndex<'_>, id: NodeId) -> Option<ExpressionKey> {
        Self::for_node(cfg, cfg.node(id)?)
    }

    pub(crate) fn for_target(cfg: &CfgIndex<'_>, target: &AssignTarget) -> Option<ExpressionKey> {
        match target {
            AssignTarget::Local { local } => Some(ExpressionKey::Local(local.clone())),
            AssignTarget::Field { receiver, field } => {
                let receiver = match receiver {
                    Some(id) => Some(Box::new(Self::for_operand(cfg, *id)?)),
                    None => None,
                };
                Some(ExpressionKey::Field {
                    receiver,
                    name: field.clone(),
                })
            }
            AssignTarget::Array { array, index } => Some(ExpressionKey::ArrayElement {
                array: Box::new(Self::for_operand(cfg, *array)?),
                index: Box::new(Self::for_operand(cfg, *index)?),
            }),
        }
    }

    /// True when `other` occurs anywhere inside this key.
    pub(crate) fn mentions(&self, other: &ExpressionKey) -> bool {
        if self == other {
            return true;
        }
        match self {
            ExpressionKey::Field { receiver, .. } => receiver
                .as_deref()
                .is_some_and(|receiver| receiver.mentions(other)),
            ExpressionKey::ArrayElement { array, index } => {
                array.mentions(other) || index.mentions(other)
            }
            _ => false,
        }
    }

    /// True for entries whose meaning depends on the heap: fields, array
    /// elements, and call results.
    pub(crate) fn is_heap_dependent(&self) -> bool {
        matches!(
            self,
            ExpressionKey::Field { .. }
                | ExpressionKey::ArrayElement { .. }
                | ExpressionKey::CallResult(_)
        )
    }

    fn field_name(&self) -> Option<&str> {
        match self {
            ExpressionKey::Field { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ExpressionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionKey::Local(name) => write!(f, "{name}"),
            ExpressionKey::This => write!(f, "this"),
            ExpressionKey::Field { receiver, name } => match receiver {
                Some(receiver) => write!(f, "{receiver}.{name}"),
                None => write!(f, "{name}"),
            },
            ExpressionKey::ArrayElement { array, index } => write!(f, "{array}[{index}]"),
            ExpressionKey::CallResult(id) => write!(f, "call#{}", id.0),
        }
    }
}

/// What is known about one expression at one program point: a qualifier per
/// hierarchy plus the underlying plain type.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Value<Q: Qualifier> {
    pub(crate) qualifiers: QualifierSet<Q>,
    pub(crate) ty: TypeKind,
}

impl<Q: Qualifier> Value<Q> {
    pub(crate) fn new(qualifiers: QualifierSet<Q>, ty: TypeKind) -> Self {
        Value { qualifiers, ty }
    }
}

/// Abstract state at one program point: a snapshot mapping tracked
/// expressions to values. Stores are immutable; every operation returns a
/// fresh store, which is what makes LUB at join points well-defined.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Store<Q: Qualifier> {
    entries: BTreeMap<ExpressionKey, Value<Q>>,
}

impl<Q: Qualifier> Default for Store<Q> {
    fn default() -> Self {
        Store {
            entries: BTreeMap::new(),
        }
    }
}

impl<Q: Qualifier> Store<Q> {
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn value_of(&self, key: &ExpressionKey) -> Option<&Value<Q>> {
        self.entries.get(key)
    }

    pub(crate) fn with(mut self, key: ExpressionKey, value: Value<Q>) -> Self {
        self.entries.insert(key, value);
        self
    }

    /// Records an assignment: the target gets `value`, and every entry whose
    /// key mentions the overwritten expression is dropped. Writing to a field
    /// also drops same-named field entries under other receivers, which may
    /// alias.
    pub(crate) fn assign(&self, target: &ExpressionKey, value: Value<Q>) -> Self {
        let target_field = target.field_name();
        let mut entries: BTreeMap<ExpressionKey, Value<Q>> = self
            .entries
            .iter()
            .filter(|(key, _)| {
                if key.mentions(target) {
                    return false;
                }
                match (target_field, key.field_name()) {
                    (Some(assigned), Some(existing)) => assigned != existing,
                    _ => true,
                }
            })
            .map(|(key, val)| (key.clone(), val.clone()))
            .collect();
        entries.insert(target.clone(), value);
        Store { entries }
    }

    /// Drops every entry the predicate marks as invalidated.
    pub(crate) fn invalidate(&self, invalidated: impl Fn(&ExpressionKey) -> bool) -> Self {
        Store {
            entries: self
                .entries
                .iter()
                .filter(|(key, _)| !invalidated(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        }
    }

    /// Join for merge points. Keeps only facts both sides agree on: the key
    /// must be present in both stores with the same plain type, and the
    /// qualifiers are joined per hierarchy. Never claims more than is true on
    /// every path.
    pub(crate) fn least_upper_bound(
        &self,
        other: &Store<Q>,
        hierarchy: &dyn QualifierHierarchy<Q>,
    ) -> Self {
        let mut entries = BTreeMap::new();
        for (key, left) in &self.entries {
            let Some(right) = other.entries.get(key) else {
                continue;
            };
            if left.ty != right.ty {
                continue;
            }
            entries.insert(
                key.clone(),
                Value::new(
                    set_least_upper_bound(hierarchy, &left.qualifiers, &right.qualifiers),
                    left.ty.clone(),
                ),
            );
        }
        Store { entries }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&ExpressionKey, &Value<Q>)> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
