use std::collections::BTreeMap;

use crate::cfg::CfgIndex;
use crate::dataflow::store::{ExpressionKey, Store, Value};
use crate::error::CheckError;
use crate::factory::Annotator;
use crate::ir::{BinaryOp, MethodDef, Node, NodeId, NodeKind, TypeKind};
use crate::qualifier::{Qualifier, QualifierHierarchy};

/// Read-only view handed to transfer functions while one node is processed.
pub(crate) struct TransferContext<'a, Q: Qualifier> {
    pub(crate) annotator: &'a Annotator<'a, Q>,
    pub(crate) method: &'a MethodDef,
    pub(crate) cfg: &'a CfgIndex<'a>,
    /// Values already computed for earlier nodes in this fixed-point pass.
    pub(crate) values: &'a BTreeMap<NodeId, Value<Q>>,
}

impl<'a, Q: Qualifier> TransferContext<'a, Q> {
    pub(crate) fn hierarchy(&self) -> &'a dyn QualifierHierarchy<Q> {
        self.annotator.hierarchy
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&'a Node> {
        self.cfg.node(id)
    }

    pub(crate) fn key_for(&self, id: NodeId) -> Option<ExpressionKey> {
        ExpressionKey::for_operand(self.cfg, id)
    }

    /// The abstract value of an operand: what the fixed-point pass computed
    /// for it, falling back to its declared (defaulted) value.
    pub(crate) fn operand_value(&self, id: NodeId) -> Result<Value<Q>, CheckError> {
        if let Some(value) = self.values.get(&id) {
            return Ok(value.clone());
        }
        let node = self.node(id).ok_or_else(|| {
            CheckError::internal("transfer", format!("operand {:?} has no node", id))
        })?;
        self.annotator
            .value_for_declared_node(self.method, self.cfg, node)
    }
}

/// Stores flowing out of one node.
pub(crate) enum FlowStores<Q: Qualifier> {
    Regular(Store<Q>),
    /// Produced by boolean nodes; routed along true/false branch edges.
    Conditional {
        then_store: Store<Q>,
        else_store: Store<Q>,
    },
}

pub(crate) struct TransferOutcome<Q: Qualifier> {
    pub(crate) value: Option<Value<Q>>,
    pub(crate) flow: FlowStores<Q>,
}

/// Per-node-kind rules mapping an input store to output store(s).
///
/// Every method has a sound conservative default; checkers override only the
/// node kinds their qualifier system cares about. A transfer that cannot
/// improve on its input returns it unchanged, so the fixed point always makes
/// progress.
pub(crate) trait TransferFunction<Q: Qualifier>: Send + Sync {
    fn transfer(
        &self,
        ctx: &TransferContext<'_, Q>,
        node: &Node,
        input: &Store<Q>,
    ) -> Result<TransferOutcome<Q>, CheckError> {
        default_transfer(self, ctx, node, input)
    }

    /// The abstract value this node produces.
    fn node_value(
        &self,
        ctx: &TransferContext<'_, Q>,
        node: &Node,
        input: &Store<Q>,
    ) -> Result<Option<Value<Q>>, CheckError> {
        default_node_value(ctx, node, input)
    }

    /// Splits the store after a comparison. The default refines nothing.
    fn refine_comparison(
        &self,
        _ctx: &TransferContext<'_, Q>,
        _op: BinaryOp,
        _lhs: NodeId,
        _rhs: NodeId,
        then_store: Store<Q>,
        else_store: Store<Q>,
    ) -> (Store<Q>, Store<Q>) {
        (then_store, else_store)
    }

    /// Which store entries a method call invalidates. The conservative
    /// default drops everything heap-dependent and keeps locals and `this`.
    fn call_invalidates(
        &self,
        _ctx: &TransferContext<'_, Q>,
        _call: &Node,
        key: &ExpressionKey,
    ) -> bool {
        key.is_heap_dependent()
    }

    /// Checker hook run after call invalidation, e.g. to weaken facts about
    /// values that may alias the receiver.
    fn after_call(
        &self,
        _ctx: &TransferContext<'_, Q>,
        _call: &Node,
        store: Store<Q>,
    ) -> Store<Q> {
        store
    }
}

/// Identity-style transfer with the framework's generic semantics.
pub(crate) fn default_transfer<Q: Qualifier, T: TransferFunction<Q> + ?Sized>(
    tf: &T,
    ctx: &TransferContext<'_, Q>,
    node: &Node,
    input: &Store<Q>,
) -> Result<TransferOutcome<Q>, CheckError> {
    let value = tf.node_value(ctx, node, input)?;
    let flow = match &node.kind {
        NodeKind::Assign { target, .. } => {
            // An assignment whose value cannot be typed is an identity
            // transfer; the store keeps making progress toward the fixed
            // point and the factory surfaces the resolution failure.
            let store = match (ExpressionKey::for_target(ctx.cfg, target), &value) {
                (Some(key), Some(assigned)) => input.assign(&key, assigned.clone()),
                _ => input.clone(),
            };
            FlowStores::Regular(store)
        }
        NodeKind::Call { .. } => {
            let mut store = input.invalidate(|key| tf.call_invalidates(ctx, node, key));
            store = tf.after_call(ctx, node, store);
            if let Some(value) = &value {
                store = store.with(ExpressionKey::CallResult(node.id), value.clone());
            }
            FlowStores::Regular(store)
        }
        NodeKind::Binary { op, lhs, rhs } if op.is_comparison() => {
            let (then_store, else_store) =
                tf.refine_comparison(ctx, *op, *lhs, *rhs, input.clone(), input.clone());
            FlowStores::Conditional {
                then_store,
                else_store,
            }
        }
        _ => {
            // Materialize tracked reads so later joins and invalidations see
            // them; everything else leaves the store untouched.
            let store = match (&value, ExpressionKey::for_node(ctx.cfg, node)) {
                (Some(value), Some(key)) if input.value_of(&key).is_none() => {
                    input.clone().with(key, value.clone())
                }
                _ => input.clone(),
            };
            FlowStores::Regular(store)
        }
    };
    Ok(TransferOutcome { value, flow })
}

/// Generic value computation: reads consult the store, everything else gets
/// its declared (defaulted) value. A node whose declared type cannot be
/// resolved produces no value here; the resolution failure surfaces when the
/// factory is asked for that node directly.
pub(crate) fn default_node_value<Q: Qualifier>(
    ctx: &TransferContext<'_, Q>,
    node: &Node,
    input: &Store<Q>,
) -> Result<Option<Value<Q>>, CheckError> {
    let declared_or_none = |node: &Node| -> Result<Option<Value<Q>>, CheckError> {
        match ctx.annotator.value_for_declared_node(ctx.method, ctx.cfg, node) {
            Ok(value) => Ok(Some(value)),
            Err(CheckError::Resolution { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    };
    match &node.kind {
        NodeKind::Literal { value } => Ok(Some(ctx.annotator.literal_value(value))),
        NodeKind::New { class } => Ok(Some(ctx.annotator.new_value(class))),
        NodeKind::LocalRead { .. }
        | NodeKind::This
        | NodeKind::FieldRead { .. }
        | NodeKind::ArrayRead { .. } => {
            if let Some(key) = ExpressionKey::for_node(ctx.cfg, node) {
                if let Some(value) = input.value_of(&key) {
                    return Ok(Some(value.clone()));
                }
            }
            declared_or_none(node)
        }
        NodeKind::Assign { value, .. } => {
            if let Some(computed) = ctx.values.get(value) {
                return Ok(Some(computed.clone()));
            }
            let operand = ctx.node(*value).ok_or_else(|| {
                CheckError::internal("transfer", format!("operand {value:?} has no node"))
            })?;
            declared_or_none(operand)
        }
        NodeKind::Call { .. } => Ok(declared_or_none(node)?.filter(|value| value.ty != TypeKind::Void)),
        NodeKind::Return { .. } => Ok(None),
        NodeKind::ArrayLength { .. } | NodeKind::Unary { .. } | NodeKind::Binary { .. } => {
            declared_or_none(node)
        }
    }
}

/// Transfer function with no checker-specific behavior.
pub(crate) struct DefaultTransfer;

impl<Q: Qualifier> TransferFunction<Q> for DefaultTransfer {}
