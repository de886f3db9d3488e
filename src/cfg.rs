use std::collections::{BTreeMap, BTreeSet};

use crate::error::CheckError;
use crate::ir::{
    AssignTarget, BasicBlock, BlockId, ControlFlowGraph, EdgeKind, FlowEdge, Node, NodeId, NodeKind,
};

/// Validated lookup tables over one method's control-flow graph.
///
/// Construction rejects malformed graphs (duplicate ids, dangling edges,
/// missing entry block, unpaired branch edges) so the dataflow engine never
/// has to tolerate a broken graph mid-analysis.
#[derive(Debug)]
pub(crate) struct CfgIndex<'a> {
    blocks: BTreeMap<BlockId, &'a BasicBlock>,
    nodes: BTreeMap<NodeId, &'a Node>,
    successors: BTreeMap<BlockId, Vec<&'a FlowEdge>>,
    predecessors: BTreeMap<BlockId, Vec<BlockId>>,
}

pub(crate) const ENTRY_BLOCK: BlockId = BlockId(0);

impl<'a> CfgIndex<'a> {
    pub(crate) fn build(method_name: &str, cfg: &'a ControlFlowGraph) -> Result<Self, CheckError> {
        let malformed = |reason: String| CheckError::MalformedCfg {
            method: method_name.to_string(),
            reason,
        };

        let mut blocks = BTreeMap::new();
        let mut nodes = BTreeMap::new();
        for block in &cfg.blocks {
            if blocks.insert(block.id, block).is_some() {
                return Err(malformed(format!("duplicate block id {:?}", block.id)));
            }
            for node in &block.nodes {
                if nodes.insert(node.id, node).is_some() {
                    return Err(malformed(format!("duplicate node id {:?}", node.id)));
                }
            }
        }
        if !blocks.contains_key(&ENTRY_BLOCK) {
            return Err(malformed("missing entry block 0".to_string()));
        }

        let mut successors: BTreeMap<BlockId, Vec<&FlowEdge>> = BTreeMap::new();
        let mut predecessors: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
        for id in blocks.keys() {
            successors.entry(*id).or_default();
            predecessors.entry(*id).or_default();
        }
        for edge in &cfg.edges {
            if !blocks.contains_key(&edge.from) || !blocks.contains_key(&edge.to) {
                return Err(malformed(format!(
                    "edge {:?} -> {:?} references an unknown block",
                    edge.from, edge.to
                )));
            }
            successors.entry(edge.from).or_default().push(edge);
            predecessors.entry(edge.to).or_default().push(edge.from);
        }

        for (id, edges) in &successors {
            let has_true = edges.iter().any(|e| e.kind == EdgeKind::TrueBranch);
            let has_false = edges.iter().any(|e| e.kind == EdgeKind::FalseBranch);
            if has_true != has_false {
                return Err(malformed(format!(
                    "block {:?} has an unpaired conditional edge",
                    id
                )));
            }
        }

        let index = CfgIndex {
            blocks,
            nodes,
            successors,
            predecessors,
        };
        index.validate_operands(method_name)?;
        Ok(index)
    }

    fn validate_operands(&self, method_name: &str) -> Result<(), CheckError> {
        let mut missing = BTreeSet::new();
        for node in self.nodes.values() {
            for operand in operand_ids(&node.kind) {
                if !self.nodes.contains_key(&operand) {
                    missing.insert(operand);
                }
            }
        }
        if let Some(first) = missing.iter().next() {
            return Err(CheckError::MalformedCfg {
                method: method_name.to_string(),
                reason: format!("operand {:?} is not defined by any node", first),
            });
        }

        // Operand references must be acyclic so type resolution can recurse.
        let mut state: BTreeMap<NodeId, u8> = BTreeMap::new();
        for start in self.nodes.keys() {
            if state.contains_key(start) {
                continue;
            }
            let mut stack = vec![(*start, false)];
            while let Some((id, expanded)) = stack.pop() {
                if expanded {
                    state.insert(id, 2);
                    continue;
                }
                match state.get(&id) {
                    Some(1) => {
                        return Err(CheckError::MalformedCfg {
                            method: method_name.to_string(),
                            reason: format!("operand cycle through {:?}", id),
                        });
                    }
                    Some(2) => continue,
                    _ => {}
                }
                state.insert(id, 1);
                stack.push((id, true));
                if let Some(node) = self.nodes.get(&id) {
                    for operand in operand_ids(&node.kind) {
                        match state.get(&operand) {
                            Some(1) => {
                                return Err(CheckError::MalformedCfg {
                                    method: method_name.to_string(),
                                    reason: format!("operand cycle through {:?}", operand),
                                });
                            }
                            Some(2) => {}
                            _ => stack.push((operand, false)),
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn block(&self, id: BlockId) -> Option<&'a BasicBlock> {
        self.blocks.get(&id).copied()
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&'a Node> {
        self.nodes.get(&id).copied()
    }

    pub(crate) fn successors(&self, id: BlockId) -> &[&'a FlowEdge] {
        self.successors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn predecessors(&self, id: BlockId) -> &[BlockId] {
        self.predecessors.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn operand_ids(kind: &NodeKind) -> Vec<NodeId> {
    match kind {
        NodeKind::Literal { .. }
        | NodeKind::LocalRead { .. }
        | NodeKind::This
        | NodeKind::New { .. } => Vec::new(),
        NodeKind::FieldRead { receiver, .. } => receiver.iter().copied().collect(),
        NodeKind::ArrayRead { array, index } => vec![*array, *index],
        NodeKind::ArrayLength { array } => vec![*array],
        NodeKind::Unary { operand, .. } => vec![*operand],
        NodeKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
        NodeKind::Assign { target, value } => {
            let mut ids = match target {
                AssignTarget::Local { .. } => Vec::new(),
                AssignTarget::Field { receiver, .. } => receiver.iter().copied().collect(),
                AssignTarget::Array { array, index } => vec![*array, *index],
            };
            ids.push(*value);
            ids
        }
        NodeKind::Call { receiver, args, .. } => {
            receiver.iter().copied().chain(args.iter().copied()).collect()
        }
        NodeKind::Return { value } => value.iter().copied().collect(),
    }
}
