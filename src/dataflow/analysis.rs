use std::collections::{BTreeMap, VecDeque};

use crate::cfg::{CfgIndex, ENTRY_BLOCK};
use crate::dataflow::store::{ExpressionKey, Store, Value};
use crate::dataflow::transfer::{FlowStores, TransferContext, TransferFunction};
use crate::error::CheckError;
use crate::factory::Annotator;
use crate::ir::{BlockId, EdgeKind, MethodDef, NodeId};
use crate::qualifier::Qualifier;
use crate::types::TypePosition;

/// Upper bound on how often one block may be reprocessed. The qualifier
/// lattices have finite height, so the fixed point converges long before
/// this; exceeding it means a transfer function is not monotone.
const MAX_BLOCK_VISITS: usize = 512;

/// Fixed-point result for one method body: the value each node produced and
/// the store holding just before it. Owned by the type factory's memo table
/// and queried read-only for the rest of the unit's checking pass.
pub(crate) struct AnalysisResult<Q: Qualifier> {
    node_values: BTreeMap<NodeId, Value<Q>>,
    node_stores: BTreeMap<NodeId, Store<Q>>,
    block_in: BTreeMap<BlockId, Store<Q>>,
}

impl<Q: Qualifier> AnalysisResult<Q> {
    pub(crate) fn value_of(&self, node: NodeId) -> Option<&Value<Q>> {
        self.node_values.get(&node)
    }

    pub(crate) fn store_before(&self, node: NodeId) -> Option<&Store<Q>> {
        self.node_stores.get(&node)
    }

    pub(crate) fn store_at_block_entry(&self, block: BlockId) -> Option<&Store<Q>> {
        self.block_in.get(&block)
    }
}

/// Entry store for a method body: parameters, declared locals, and for
/// instance methods `this` and the enclosing class's fields at their
/// declared (defaulted) types.
fn initial_store<Q: Qualifier>(annotator: &Annotator<'_, Q>, method: &MethodDef) -> Store<Q> {
    let mut store = Store::empty();
    for param in &method.params {
        store = store.with(
            ExpressionKey::Local(param.name.clone()),
            annotator.value_from_type_use(TypePosition::Parameter, &param.ty),
        );
    }
    for local in &method.locals {
        store = store.with(
            ExpressionKey::Local(local.name.clone()),
            annotator.value_from_type_use(TypePosition::LocalVar, &local.ty),
        );
    }
    if !method.is_static {
        let receiver_ty = method.receiver.clone().unwrap_or_else(|| {
            crate::ir::TypeUse::plain(crate::ir::TypeKind::Declared {
                name: annotator.class.name.clone(),
                args: Vec::new(),
            })
        });
        store = store.with(
            ExpressionKey::This,
            annotator.value_from_type_use(TypePosition::Receiver, &receiver_ty),
        );
        for field in &annotator.class.fields {
            store = store.with(
                ExpressionKey::Field {
                    receiver: Some(Box::new(ExpressionKey::This)),
                    name: field.name.clone(),
                },
                annotator.value_from_type_use(TypePosition::Field, &field.ty),
            );
        }
    }
    store
}

/// Forward worklist fixed point over one method's CFG.
///
/// Joins at merge points use the hierarchy's LUB, so a store never claims
/// more than is true on every path reaching it. Conditional nodes route
/// their then/else stores along true/false edges; exceptional edges receive
/// the join over every prefix of the block.
pub(crate) fn run_analysis<Q: Qualifier>(
    annotator: &Annotator<'_, Q>,
    transfer: &dyn TransferFunction<Q>,
    method: &MethodDef,
    cfg: &CfgIndex<'_>,
) -> Result<AnalysisResult<Q>, CheckError> {
    let hierarchy = annotator.hierarchy;
    let mut node_values: BTreeMap<NodeId, Value<Q>> = BTreeMap::new();
    let mut node_stores: BTreeMap<NodeId, Store<Q>> = BTreeMap::new();
    let mut block_in: BTreeMap<BlockId, Store<Q>> = BTreeMap::new();
    let mut visits: BTreeMap<BlockId, usize> = BTreeMap::new();

    block_in.insert(ENTRY_BLOCK, initial_store(annotator, method));
    let mut worklist = VecDeque::from([ENTRY_BLOCK]);

    while let Some(block_id) = worklist.pop_front() {
        let Some(block) = cfg.block(block_id) else {
            return Err(CheckError::internal(
                "analysis",
                format!("worklist reached unknown block {block_id:?}"),
            ));
        };
        let visit_count = visits.entry(block_id).or_insert(0);
        *visit_count += 1;
        if *visit_count > MAX_BLOCK_VISITS {
            return Err(CheckError::internal(
                "analysis",
                format!(
                    "fixed point did not converge at block {:?} of {}.{}",
                    block_id, annotator.class.name, method.name
                ),
            ));
        }

        let in_store = block_in
            .get(&block_id)
            .cloned()
            .ok_or_else(|| {
                CheckError::internal("analysis", format!("no in-store for block {block_id:?}"))
            })?;

        let mut store = in_store.clone();
        let mut exceptional = in_store;
        let mut conditional: Option<(Store<Q>, Store<Q>)> = None;
        for node in &block.nodes {
            node_stores.insert(node.id, store.clone());
            let outcome = {
                let ctx = TransferContext {
                    annotator,
                    method,
                    cfg,
                    values: &node_values,
                };
                transfer.transfer(&ctx, node, &store)?
            };
            if let Some(value) = outcome.value {
                node_values.insert(node.id, value);
            }
            match outcome.flow {
                FlowStores::Regular(next) => {
                    store = next;
                    conditional = None;
                }
                FlowStores::Conditional {
                    then_store,
                    else_store,
                } => {
                    store = then_store.least_upper_bound(&else_store, hierarchy);
                    conditional = Some((then_store, else_store));
                }
            }
            exceptional = exceptional.least_upper_bound(&store, hierarchy);
        }

        for edge in cfg.successors(block_id) {
            let outgoing = match edge.kind {
                EdgeKind::Normal => store.clone(),
                EdgeKind::TrueBranch => conditional
                    .as_ref()
                    .map(|(then_store, _)| then_store.clone())
                    .unwrap_or_else(|| store.clone()),
                EdgeKind::FalseBranch => conditional
                    .as_ref()
                    .map(|(_, else_store)| else_store.clone())
                    .unwrap_or_else(|| store.clone()),
                EdgeKind::Exception => exceptional.clone(),
            };
            let updated = match block_in.get(&edge.to) {
                None => Some(outgoing),
                Some(existing) => {
                    let joined = existing.least_upper_bound(&outgoing, hierarchy);
                    if &joined != existing { Some(joined) } else { None }
                }
            };
            if let Some(next) = updated {
                block_in.insert(edge.to, next);
                worklist.push_back(edge.to);
            }
        }
    }

    Ok(AnalysisResult {
        node_values,
        node_stores,
        block_in,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflow::transfer::DefaultTransfer;
    use crate::defaults::StandardDefaults;
    use crate::index::UnitIndex;
    use crate::ir::CompilationUnit;
    use crate::qualifier::testing::{TOGGLE, Toggle, ToggleHierarchy};
    use crate::test_support::{MethodBuilder, annotated, class_with, declared_ty, unit_with};

    fn analyze(
        unit: &CompilationUnit,
    ) -> (AnalysisResult<Toggle>, Vec<crate::ir::NodeId>) {
        let index = UnitIndex::build(unit).expect("index");
        let class = &unit.classes[0];
        let annotator = Annotator {
            index: &index,
            class,
            hierarchy: &ToggleHierarchy,
            defaulting: &StandardDefaults,
        };
        let method = &class.methods[0];
        let body = method.body.as_ref().expect("body");
        let cfg = CfgIndex::build(&method.name, body).expect("cfg");
        let node_ids = body
            .blocks
            .iter()
            .flat_map(|block| block.nodes.iter().map(|node| node.id))
            .collect();
        let result =
            run_analysis(&annotator, &DefaultTransfer, method, &cfg).expect("analysis");
        (result, node_ids)
    }

    #[test]
    fn self_loop_converges() {
        let mut builder = MethodBuilder::new("spin")
            .static_method()
            .param("x", annotated(declared_ty("com/example/T"), "Off"));
        builder.block(0);
        builder.local_read("x");
        builder.edge(0, 0, crate::ir::EdgeKind::Normal);
        let unit = unit_with(vec![class_with("com/example/Spin", None, vec![builder.build()])]);

        let (result, nodes) = analyze(&unit);

        for node in nodes {
            assert!(result.store_before(node).is_some());
        }
    }

    #[test]
    fn entry_store_seeds_parameters_and_fields() {
        let mut builder =
            MethodBuilder::new("seeded").param("p", annotated(declared_ty("com/example/T"), "On"));
        builder.block(0);
        builder.ret(None);
        let mut class = class_with("com/example/Seeded", None, vec![builder.build()]);
        class.fields.push(crate::test_support::field(
            "f",
            annotated(declared_ty("com/example/T"), "Off"),
        ));
        let unit = unit_with(vec![class]);

        let (result, _) = analyze(&unit);

        let entry = result
            .store_at_block_entry(crate::ir::BlockId(0))
            .expect("entry store");
        let p = entry
            .value_of(&ExpressionKey::Local("p".to_string()))
            .expect("param entry");
        assert_eq!(p.qualifiers.get(TOGGLE), Some(&Toggle::On));
        let f = entry
            .value_of(&ExpressionKey::Field {
                receiver: Some(Box::new(ExpressionKey::This)),
                name: "f".to_string(),
            })
            .expect("field entry");
        assert_eq!(f.qualifiers.get(TOGGLE), Some(&Toggle::Off));
        assert!(entry.value_of(&ExpressionKey::This).is_some());
    }

    /// The store on an exception edge reflects every prefix of the block:
    /// a fact established mid-block must be joined away.
    #[test]
    fn exception_edge_joins_over_prefixes() {
        let mut builder = MethodBuilder::new("risky")
            .static_method()
            .local("x", annotated(crate::test_support::int_ty(), "Off"));
        builder.block(0);
        let lit = builder.lit_int(1);
        builder.assign_local("x", lit);
        builder.block(1);
        builder.ret(None);
        builder.block(2);
        builder.ret(None);
        builder.edge(0, 1, crate::ir::EdgeKind::Normal);
        builder.edge(0, 2, crate::ir::EdgeKind::Exception);
        let unit = unit_with(vec![class_with("com/example/Risky", None, vec![builder.build()])]);

        let (result, _) = analyze(&unit);

        let x = ExpressionKey::Local("x".to_string());
        // Literals default to bottom (`On`), so the normal successor sees the
        // assignment while the handler keeps the declared `Off`.
        let normal = result
            .store_at_block_entry(crate::ir::BlockId(1))
            .and_then(|store| store.value_of(&x))
            .and_then(|value| value.qualifiers.get(TOGGLE));
        let handler = result
            .store_at_block_entry(crate::ir::BlockId(2))
            .and_then(|store| store.value_of(&x))
            .and_then(|value| value.qualifiers.get(TOGGLE));
        assert_eq!(normal, Some(&Toggle::On));
        assert_eq!(handler, Some(&Toggle::Off));
    }

    /// The conservative call rule drops heap-dependent entries and keeps
    /// locals and `this`.
    #[test]
    fn calls_invalidate_heap_entries() {
        let mut builder = MethodBuilder::new("touch");
        builder.block(0);
        builder.call(None, Some("com/example/Mystery"), "shuffle", Vec::new());
        let probe = builder.ret(None);
        let mut class = class_with("com/example/Holder", None, vec![builder.build()]);
        class.fields.push(crate::test_support::field(
            "f",
            annotated(declared_ty("com/example/T"), "Off"),
        ));
        let unit = unit_with(vec![class]);

        let (result, _) = analyze(&unit);

        let store = result.store_before(probe).expect("store before return");
        assert!(
            store
                .value_of(&ExpressionKey::Field {
                    receiver: Some(Box::new(ExpressionKey::This)),
                    name: "f".to_string(),
                })
                .is_none()
        );
        assert!(store.value_of(&ExpressionKey::This).is_some());
    }

    /// Merged stores never contradict a predecessor: the join is an upper
    /// bound of both contributing branches.
    #[test]
    fn join_is_upper_bound_of_predecessors() {
        let mut builder = MethodBuilder::new("merge")
            .static_method()
            .param("c", crate::test_support::boolean_ty())
            .local("x", annotated(crate::test_support::int_ty(), "Off"));
        builder.block(0);
        let c = builder.local_read("c");
        let lit_true = builder.push(crate::ir::NodeKind::Literal {
            value: crate::ir::Literal::Bool(true),
        });
        builder.binary(crate::ir::BinaryOp::Eq, c, lit_true);
        builder.block(1);
        let lit = builder.lit_int(1);
        builder.assign_local("x", lit);
        builder.block(2);
        builder.ret(None);
        builder.edge(0, 1, crate::ir::EdgeKind::TrueBranch);
        builder.edge(0, 2, crate::ir::EdgeKind::FalseBranch);
        builder.edge(1, 2, crate::ir::EdgeKind::Normal);
        let unit = unit_with(vec![class_with("com/example/Merge", None, vec![builder.build()])]);

        let (result, _) = analyze(&unit);

        let x = ExpressionKey::Local("x".to_string());
        let merged = result
            .store_at_block_entry(crate::ir::BlockId(2))
            .and_then(|store| store.value_of(&x))
            .and_then(|value| value.qualifiers.get(TOGGLE));
        // One branch has `On`, the other the declared `Off`; the merge must
        // keep the weaker `Off`.
        assert_eq!(merged, Some(&Toggle::Off));
    }
}
