use std::collections::BTreeSet;

use anyhow::Result;

use crate::checkers::{Checker, CheckerConfig, CheckerMetadata};
use crate::dataflow::store::{ExpressionKey, Store, Value};
use crate::dataflow::transfer::{
    TransferContext, TransferFunction, default_node_value,
};
use crate::defaults::DefaultingPolicy;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::engine::AnalysisContext;
use crate::error::CheckError;
use crate::ir::{
    Annotation, BinaryOp, CompilationUnit, Literal, Node, NodeId, NodeKind,
};
use crate::qualifier::{HierarchyId, Qualifier, QualifierHierarchy};
use crate::register_checker;
use crate::types::AnnotatedType;
use crate::visitor::{CheckContext, RuleSet};

pub(crate) const UPPER_BOUND: HierarchyId = HierarchyId("upperbound");

/// Upper-bound lattice with named-sequence payloads.
///
/// `LtLengthOf {a, b}` means the value is strictly less than the length of
/// every named sequence; more names is a stronger claim. Same-kind GLB is
/// payload union (each named relation is an independent sufficient proof)
/// and LUB is payload intersection. Differently-kinded qualifiers compare by
/// the relaxed kind order Bottom < LtLengthOf < LtEqLengthOf < Unknown with
/// a payload-superset requirement between the two payload kinds.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum UpperBound {
    Unknown,
    LtEqLengthOf(BTreeSet<String>),
    LtLengthOf(BTreeSet<String>),
    Bottom,
}

impl UpperBound {
    pub(crate) fn lt_length_of<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        normalize(UpperBound::LtLengthOf(
            names.into_iter().map(Into::into).collect(),
        ))
    }

    pub(crate) fn lt_eq_length_of<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        normalize(UpperBound::LtEqLengthOf(
            names.into_iter().map(Into::into).collect(),
        ))
    }

    fn proves_index_for(&self, sequence: &str) -> bool {
        matches!(self, UpperBound::Bottom)
            || matches!(self, UpperBound::LtLengthOf(names) if names.contains(sequence))
    }
}

/// An empty payload claims nothing; collapse it to top so payload operations
/// cannot manufacture a vacuous qualifier distinct from `Unknown`.
fn normalize(q: UpperBound) -> UpperBound {
    match q {
        UpperBound::LtLengthOf(names) | UpperBound::LtEqLengthOf(names) if names.is_empty() => {
            UpperBound::Unknown
        }
        other => other,
    }
}

impl Qualifier for UpperBound {
    fn hierarchy(&self) -> HierarchyId {
        UPPER_BOUND
    }

    fn kind(&self) -> &'static str {
        match self {
            UpperBound::Unknown => "UpperBoundUnknown",
            UpperBound::LtEqLengthOf(_) => "LTEqLengthOf",
            UpperBound::LtLengthOf(_) => "LTLengthOf",
            UpperBound::Bottom => "UpperBoundBottom",
        }
    }
}

pub(crate) struct UpperBoundHierarchy;

impl QualifierHierarchy<UpperBound> for UpperBoundHierarchy {
    fn hierarchy_ids(&self) -> &[HierarchyId] {
        &[UPPER_BOUND]
    }

    fn top(&self, _id: HierarchyId) -> UpperBound {
        UpperBound::Unknown
    }

    fn bottom(&self, _id: HierarchyId) -> UpperBound {
        UpperBound::Bottom
    }

    fn is_subtype(&self, sub: &UpperBound, sup: &UpperBound) -> bool {
        match (sub, sup) {
            (UpperBound::Bottom, _) | (_, UpperBound::Unknown) => true,
            (UpperBound::Unknown, _) | (_, UpperBound::Bottom) => false,
            (UpperBound::LtLengthOf(a), UpperBound::LtLengthOf(b))
            | (UpperBound::LtEqLengthOf(a), UpperBound::LtEqLengthOf(b))
            | (UpperBound::LtLengthOf(a), UpperBound::LtEqLengthOf(b)) => b.is_subset(a),
            (UpperBound::LtEqLengthOf(_), UpperBound::LtLengthOf(_)) => false,
        }
    }

    fn least_upper_bound(&self, a: &UpperBound, b: &UpperBound) -> UpperBound {
        match (a, b) {
            (UpperBound::Unknown, _) | (_, UpperBound::Unknown) => UpperBound::Unknown,
            (UpperBound::Bottom, other) | (other, UpperBound::Bottom) => other.clone(),
            (UpperBound::LtLengthOf(x), UpperBound::LtLengthOf(y)) => {
                normalize(UpperBound::LtLengthOf(x.intersection(y).cloned().collect()))
            }
            (UpperBound::LtEqLengthOf(x), UpperBound::LtEqLengthOf(y))
            | (UpperBound::LtLengthOf(x), UpperBound::LtEqLengthOf(y))
            | (UpperBound::LtEqLengthOf(x), UpperBound::LtLengthOf(y)) => {
                normalize(UpperBound::LtEqLengthOf(x.intersection(y).cloned().collect()))
            }
        }
    }

    fn greatest_lower_bound(&self, a: &UpperBound, b: &UpperBound) -> UpperBound {
        match (a, b) {
            (UpperBound::Bottom, _) | (_, UpperBound::Bottom) => UpperBound::Bottom,
            (UpperBound::Unknown, other) | (other, UpperBound::Unknown) => other.clone(),
            (UpperBound::LtEqLengthOf(x), UpperBound::LtEqLengthOf(y)) => {
                normalize(UpperBound::LtEqLengthOf(x.union(y).cloned().collect()))
            }
            (UpperBound::LtLengthOf(x), UpperBound::LtLengthOf(y))
            | (UpperBound::LtLengthOf(x), UpperBound::LtEqLengthOf(y))
            | (UpperBound::LtEqLengthOf(x), UpperBound::LtLengthOf(y)) => {
                normalize(UpperBound::LtLengthOf(x.union(y).cloned().collect()))
            }
        }
    }

    fn parse_annotation(&self, annotation: &Annotation) -> Option<UpperBound> {
        match annotation.name.as_str() {
            "LTLengthOf" => Some(UpperBound::lt_length_of(annotation.args.clone())),
            "LTEqLengthOf" => Some(UpperBound::lt_eq_length_of(annotation.args.clone())),
            "UpperBoundUnknown" => Some(UpperBound::Unknown),
            "UpperBoundBottom" => Some(UpperBound::Bottom),
            _ => None,
        }
    }

    fn sample_qualifiers(&self) -> Vec<UpperBound> {
        vec![
            UpperBound::lt_length_of(["a"]),
            UpperBound::lt_length_of(["a", "b"]),
            UpperBound::lt_length_of(["b"]),
            UpperBound::lt_eq_length_of(["a"]),
            UpperBound::lt_eq_length_of(["a", "b"]),
        ]
    }
}

/// Every position defaults to top: without a length relation nothing is
/// known, and the framework's literal/allocation bottom default would claim
/// an index is in bounds for every sequence.
pub(crate) struct UpperBoundDefaults;

impl DefaultingPolicy<UpperBound> for UpperBoundDefaults {
    fn for_literal(
        &self,
        _hierarchy: &dyn QualifierHierarchy<UpperBound>,
        _literal: &Literal,
        _id: HierarchyId,
    ) -> UpperBound {
        UpperBound::Unknown
    }

    fn for_new(
        &self,
        _hierarchy: &dyn QualifierHierarchy<UpperBound>,
        _id: HierarchyId,
    ) -> UpperBound {
        UpperBound::Unknown
    }
}

/// Flow rules for length relations: `a.length` is `LtEqLengthOf {a}`,
/// subtracting a positive constant strengthens it to `LtLengthOf`, adding
/// one weakens `LtLengthOf` back to `LtEqLengthOf`, and comparisons against
/// length-related values refine the compared expression in the true branch.
pub(crate) struct UpperBoundTransfer;

impl TransferFunction<UpperBound> for UpperBoundTransfer {
    fn node_value(
        &self,
        ctx: &TransferContext<'_, UpperBound>,
        node: &Node,
        input: &Store<UpperBound>,
    ) -> Result<Option<Value<UpperBound>>, CheckError> {
        let base = default_node_value(ctx, node, input)?;
        let refined = match &node.kind {
            NodeKind::ArrayLength { array } => sequence_name(ctx, *array)
                .map(|name| UpperBound::lt_eq_length_of([name])),
            NodeKind::Binary { op, lhs, rhs } if op.is_arithmetic() => {
                arithmetic_bound(ctx, *op, *lhs, *rhs)
            }
            _ => None,
        };
        Ok(match (base, refined) {
            (Some(mut value), Some(qualifier)) => {
                value.qualifiers.insert(qualifier);
                Some(value)
            }
            (base, _) => base,
        })
    }

    fn refine_comparison(
        &self,
        ctx: &TransferContext<'_, UpperBound>,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        then_store: Store<UpperBound>,
        else_store: Store<UpperBound>,
    ) -> (Store<UpperBound>, Store<UpperBound>) {
        // Normalize to `bounded ⋖ bound` form.
        let (bounded, bound, strict) = match op {
            BinaryOp::Lt => (lhs, rhs, true),
            BinaryOp::Le => (lhs, rhs, false),
            BinaryOp::Gt => (rhs, lhs, true),
            BinaryOp::Ge => (rhs, lhs, false),
            _ => return (then_store, else_store),
        };
        let Some(bound_ub) = operand_bound(ctx, bound) else {
            return (then_store, else_store);
        };
        let refined = match (strict, bound_ub) {
            // x < (v ≤ len a)  ⟹  x < len a
            (true, UpperBound::LtEqLengthOf(names)) => UpperBound::LtLengthOf(names),
            (true, UpperBound::LtLengthOf(names)) => UpperBound::LtLengthOf(names),
            // x ≤ (v < len a)  ⟹  x < len a
            (false, UpperBound::LtLengthOf(names)) => UpperBound::LtLengthOf(names),
            (false, UpperBound::LtEqLengthOf(names)) => UpperBound::LtEqLengthOf(names),
            _ => return (then_store, else_store),
        };
        let then_store = refine(ctx, then_store, bounded, normalize(refined));
        (then_store, else_store)
    }

    /// Mutation through a receiver that names a tracked sequence drops that
    /// sequence from every payload: `list.clear()` invalidates length facts
    /// about `list` held by any other expression.
    fn after_call(
        &self,
        ctx: &TransferContext<'_, UpperBound>,
        call: &Node,
        store: Store<UpperBound>,
    ) -> Store<UpperBound> {
        let NodeKind::Call {
            receiver: Some(receiver),
            ..
        } = &call.kind
        else {
            return store;
        };
        let Some(key) = ctx.key_for(*receiver) else {
            return store;
        };
        let sequence = key.to_string();
        let mut stripped = Store::empty();
        for (key, value) in store.iter() {
            let mut value = value.clone();
            if let Some(qualifier) = value.qualifiers.get(UPPER_BOUND) {
                if let Some(weakened) = strip_sequence(qualifier, &sequence) {
                    value.qualifiers.insert(weakened);
                }
            }
            stripped = stripped.with(key.clone(), value);
        }
        stripped
    }
}

fn strip_sequence(qualifier: &UpperBound, sequence: &str) -> Option<UpperBound> {
    let strip = |names: &BTreeSet<String>| {
        names
            .iter()
            .filter(|name| name.as_str() != sequence)
            .cloned()
            .collect::<BTreeSet<String>>()
    };
    match qualifier {
        UpperBound::LtLengthOf(names) if names.contains(sequence) => {
            Some(normalize(UpperBound::LtLengthOf(strip(names))))
        }
        UpperBound::LtEqLengthOf(names) if names.contains(sequence) => {
            Some(normalize(UpperBound::LtEqLengthOf(strip(names))))
        }
        _ => None,
    }
}

fn sequence_name(ctx: &TransferContext<'_, UpperBound>, id: NodeId) -> Option<String> {
    ctx.key_for(id).map(|key| key.to_string())
}

fn literal_int(ctx: &TransferContext<'_, UpperBound>, id: NodeId) -> Option<i64> {
    match ctx.node(id).map(|node| &node.kind) {
        Some(NodeKind::Literal {
            value: Literal::Int(value),
        }) => Some(*value),
        _ => None,
    }
}

fn operand_bound(ctx: &TransferContext<'_, UpperBound>, id: NodeId) -> Option<UpperBound> {
    ctx.operand_value(id)
        .ok()?
        .qualifiers
        .get(UPPER_BOUND)
        .cloned()
        .filter(|q| !matches!(q, UpperBound::Unknown))
}

/// Bound of `lhs op rhs` when one side is a constant offset of a
/// length-related value.
fn arithmetic_bound(
    ctx: &TransferContext<'_, UpperBound>,
    op: BinaryOp,
    lhs: NodeId,
    rhs: NodeId,
) -> Option<UpperBound> {
    let (value, delta) = match op {
        BinaryOp::Sub => (operand_bound(ctx, lhs)?, -literal_int(ctx, rhs)?),
        BinaryOp::Add => match (operand_bound(ctx, lhs), literal_int(ctx, rhs)) {
            (Some(value), Some(delta)) => (value, delta),
            _ => (operand_bound(ctx, rhs)?, literal_int(ctx, lhs)?),
        },
        _ => return None,
    };
    let bound = match (value, delta) {
        (value, 0) => value,
        // v ≤ len - 1  ⟹  v - c < len for c ≥ 1
        (UpperBound::LtEqLengthOf(names), delta) if delta <= -1 => UpperBound::LtLengthOf(names),
        (UpperBound::LtLengthOf(names), delta) if delta <= 0 => UpperBound::LtLengthOf(names),
        // v < len  ⟹  v + 1 ≤ len
        (UpperBound::LtLengthOf(names), 1) => UpperBound::LtEqLengthOf(names),
        _ => return None,
    };
    Some(normalize(bound))
}

fn refine(
    ctx: &TransferContext<'_, UpperBound>,
    store: Store<UpperBound>,
    id: NodeId,
    qualifier: UpperBound,
) -> Store<UpperBound> {
    let Some(key) = ctx.key_for(id) else {
        return store;
    };
    let value = store
        .value_of(&key)
        .cloned()
        .or_else(|| ctx.operand_value(id).ok());
    match value {
        Some(mut value) => {
            let current = value
                .qualifiers
                .get(UPPER_BOUND)
                .cloned()
                .unwrap_or(UpperBound::Unknown);
            value
                .qualifiers
                .insert(UpperBoundHierarchy.greatest_lower_bound(&current, &qualifier));
            store.with(key, value)
        }
        None => store,
    }
}

pub(crate) struct UpperBoundRules;

impl RuleSet<UpperBound> for UpperBoundRules {
    fn check_array_access(
        &self,
        ctx: &CheckContext<'_, UpperBound>,
        node: &Node,
        array: &Node,
        index_ty: &AnnotatedType<UpperBound>,
        sink: &mut DiagnosticSink,
    ) {
        let sequence = match ExpressionKey::for_node(ctx.cfg, array) {
            Some(key) => key.to_string(),
            // An access through an untrackable array expression cannot be
            // proven in bounds.
            None => {
                sink.report(
                    Severity::Error,
                    ctx.location(node),
                    "array.access.unsafe.high",
                    "cannot prove the index is within bounds of this array".to_string(),
                );
                return;
            }
        };
        let proven = index_ty
            .qualifier(UPPER_BOUND)
            .is_some_and(|q| q.proves_index_for(&sequence));
        if !proven {
            sink.report(
                Severity::Error,
                ctx.location(node),
                "array.access.unsafe.high",
                format!("index may be past the last element of {sequence}"),
            );
        }
    }
}

/// Upper-bound checker: a configuration of the generic engine.
pub(crate) struct UpperBoundChecker {
    config: CheckerConfig<UpperBound>,
}

impl Default for UpperBoundChecker {
    fn default() -> Self {
        UpperBoundChecker {
            config: CheckerConfig {
                hierarchy: Box::new(UpperBoundHierarchy),
                transfer: Box::new(UpperBoundTransfer),
                defaulting: Box::new(UpperBoundDefaults),
                rules: Box::new(UpperBoundRules),
            },
        }
    }
}

impl Checker for UpperBoundChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "UPPER_BOUND",
            name: "Index upper-bound checks",
            description: "Proves array indices stay below the length of the accessed sequence",
        }
    }

    fn validate(&self) -> Result<(), CheckError> {
        self.config.validate()
    }

    fn check(
        &self,
        context: &AnalysisContext,
        unit: &CompilationUnit,
    ) -> Result<Vec<Diagnostic>> {
        self.config.check_unit(unit, context.config().flow_enabled)
    }
}

register_checker!(UpperBoundChecker);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::EdgeKind;
    use crate::qualifier::validate_lattice;
    use crate::test_support::{MethodBuilder, array_ty, class_with, int_ty, unit_with};

    fn run(unit: &CompilationUnit) -> Vec<Diagnostic> {
        UpperBoundChecker::default()
            .config
            .check_unit(unit, true)
            .expect("checker run")
    }

    fn messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.message_key).collect()
    }

    #[test]
    fn lattice_is_valid() {
        validate_lattice(&UpperBoundHierarchy).expect("valid upper-bound lattice");
    }

    #[test]
    fn same_kind_glb_is_payload_union() {
        let h = UpperBoundHierarchy;
        assert_eq!(
            h.greatest_lower_bound(
                &UpperBound::lt_length_of(["a"]),
                &UpperBound::lt_length_of(["b"]),
            ),
            UpperBound::lt_length_of(["a", "b"])
        );
    }

    #[test]
    fn same_kind_lub_is_payload_intersection() {
        let h = UpperBoundHierarchy;
        assert_eq!(
            h.least_upper_bound(
                &UpperBound::lt_length_of(["a", "b"]),
                &UpperBound::lt_length_of(["b", "c"]),
            ),
            UpperBound::lt_length_of(["b"])
        );
        assert_eq!(
            h.least_upper_bound(
                &UpperBound::lt_length_of(["a"]),
                &UpperBound::lt_length_of(["b"]),
            ),
            UpperBound::Unknown
        );
    }

    #[test]
    fn cross_kind_bounds_mix_payloads() {
        let h = UpperBoundHierarchy;
        assert_eq!(
            h.least_upper_bound(
                &UpperBound::lt_length_of(["a", "b"]),
                &UpperBound::lt_eq_length_of(["b"]),
            ),
            UpperBound::lt_eq_length_of(["b"])
        );
        assert_eq!(
            h.greatest_lower_bound(
                &UpperBound::lt_length_of(["a"]),
                &UpperBound::lt_eq_length_of(["b"]),
            ),
            UpperBound::lt_length_of(["a", "b"])
        );
    }

    #[test]
    fn relaxed_subtyping_requires_payload_superset() {
        let h = UpperBoundHierarchy;
        assert!(h.is_subtype(
            &UpperBound::lt_length_of(["a", "b"]),
            &UpperBound::lt_eq_length_of(["a"]),
        ));
        assert!(!h.is_subtype(
            &UpperBound::lt_eq_length_of(["a"]),
            &UpperBound::lt_length_of(["a"]),
        ));
        assert!(!h.is_subtype(
            &UpperBound::lt_length_of(["a"]),
            &UpperBound::lt_length_of(["a", "b"]),
        ));
    }

    /// `int i = a.length - 1; a[i]` is provable; `a[i + 1]` is not.
    #[test]
    fn length_minus_one_indexes_safely() {
        let mut builder = MethodBuilder::new("touch")
            .static_method()
            .param("a", array_ty(int_ty()))
            .local("i", int_ty());
        builder.block(0);
        let a = builder.local_read("a");
        let len = builder.array_length(a);
        let one = builder.lit_int(1);
        let len_minus_one = builder.binary(BinaryOp::Sub, len, one);
        builder.assign_local("i", len_minus_one);
        let a_again = builder.local_read("a");
        let i = builder.local_read("i");
        builder.array_read(a_again, i);
        let i_again = builder.local_read("i");
        let one_again = builder.lit_int(1);
        let past_end = builder.binary(BinaryOp::Add, i_again, one_again);
        let a_third = builder.local_read("a");
        builder.array_read(a_third, past_end);
        builder.ret(None);
        let unit = unit_with(vec![class_with(
            "com/example/Index",
            None,
            vec![builder.build()],
        )]);

        let diagnostics = run(&unit);

        assert_eq!(messages(&diagnostics), vec!["array.access.unsafe.high"]);
        assert!(diagnostics[0].message.contains("a"));
    }

    /// `for (int i = 0; i < a.length; i++) { a[i] = 0; }` converges and the
    /// body access is in bounds.
    #[test]
    fn counted_loop_reaches_fixed_point_in_bounds() {
        let mut builder = MethodBuilder::new("fill")
            .static_method()
            .param("a", array_ty(int_ty()))
            .local("i", int_ty());
        builder.block(0);
        let zero = builder.lit_int(0);
        builder.assign_local("i", zero);
        builder.block(1);
        let i = builder.local_read("i");
        let a = builder.local_read("a");
        let len = builder.array_length(a);
        builder.binary(BinaryOp::Lt, i, len);
        builder.block(2);
        let a_body = builder.local_read("a");
        let i_body = builder.local_read("i");
        let zero_again = builder.lit_int(0);
        builder.assign_array(a_body, i_body, zero_again);
        let i_next = builder.local_read("i");
        let one = builder.lit_int(1);
        let incremented = builder.binary(BinaryOp::Add, i_next, one);
        builder.assign_local("i", incremented);
        builder.block(3);
        builder.ret(None);
        builder.edge(0, 1, EdgeKind::Normal);
        builder.edge(1, 2, EdgeKind::TrueBranch);
        builder.edge(1, 3, EdgeKind::FalseBranch);
        builder.edge(2, 1, EdgeKind::Normal);
        let unit = unit_with(vec![class_with(
            "com/example/Loop",
            None,
            vec![builder.build()],
        )]);

        let diagnostics = run(&unit);

        assert!(
            diagnostics.is_empty(),
            "expected clean loop, got {diagnostics:?}"
        );
    }

    /// An unchecked access never gets a length relation.
    #[test]
    fn unchecked_access_is_reported() {
        let mut builder = MethodBuilder::new("touch")
            .static_method()
            .param("a", array_ty(int_ty()))
            .param("i", int_ty());
        builder.block(0);
        let a = builder.local_read("a");
        let i = builder.local_read("i");
        builder.array_read(a, i);
        builder.ret(None);
        let unit = unit_with(vec![class_with(
            "com/example/Index",
            None,
            vec![builder.build()],
        )]);

        assert_eq!(messages(&run(&unit)), vec!["array.access.unsafe.high"]);
    }

    /// `i <= a.length` only proves `LtEqLengthOf`, which is not enough for
    /// an access.
    #[test]
    fn non_strict_guard_is_not_enough() {
        let mut builder = MethodBuilder::new("touch")
            .static_method()
            .param("a", array_ty(int_ty()))
            .param("i", int_ty());
        builder.block(0);
        let i = builder.local_read("i");
        let a = builder.local_read("a");
        let len = builder.array_length(a);
        builder.binary(BinaryOp::Le, i, len);
        builder.block(1);
        let a_body = builder.local_read("a");
        let i_body = builder.local_read("i");
        builder.array_read(a_body, i_body);
        builder.ret(None);
        builder.block(2);
        builder.ret(None);
        builder.edge(0, 1, EdgeKind::TrueBranch);
        builder.edge(0, 2, EdgeKind::FalseBranch);
        let unit = unit_with(vec![class_with(
            "com/example/Index",
            None,
            vec![builder.build()],
        )]);

        assert_eq!(messages(&run(&unit)), vec!["array.access.unsafe.high"]);
    }

    /// A strict guard with the operands flipped (`a.length > i`) refines the
    /// bounded side.
    #[test]
    fn flipped_strict_guard_refines() {
        let mut builder = MethodBuilder::new("touch")
            .static_method()
            .param("a", array_ty(int_ty()))
            .param("i", int_ty());
        builder.block(0);
        let a = builder.local_read("a");
        let len = builder.array_length(a);
        let i = builder.local_read("i");
        builder.binary(BinaryOp::Gt, len, i);
        builder.block(1);
        let a_body = builder.local_read("a");
        let i_body = builder.local_read("i");
        builder.array_read(a_body, i_body);
        builder.ret(None);
        builder.block(2);
        builder.ret(None);
        builder.edge(0, 1, EdgeKind::TrueBranch);
        builder.edge(0, 2, EdgeKind::FalseBranch);
        let unit = unit_with(vec![class_with(
            "com/example/Index",
            None,
            vec![builder.build()],
        )]);

        assert!(run(&unit).is_empty());
    }

    /// A mutating call through the sequence drops length facts about it
    /// (the conservative call-invalidation decision).
    #[test]
    fn mutation_call_invalidates_length_facts() {
        let touch = |with_clear: bool| {
            let mut builder = MethodBuilder::new("touch")
                .static_method()
                .param("a", array_ty(int_ty()))
                .local("i", int_ty());
            builder.block(0);
            let a = builder.local_read("a");
            let len = builder.array_length(a);
            let one = builder.lit_int(1);
            let len_minus_one = builder.binary(BinaryOp::Sub, len, one);
            builder.assign_local("i", len_minus_one);
            if with_clear {
                let receiver = builder.local_read("a");
                builder.call(Some(receiver), None, "clear", Vec::new());
            }
            let a_again = builder.local_read("a");
            let i = builder.local_read("i");
            builder.array_read(a_again, i);
            builder.ret(None);
            unit_with(vec![class_with(
                "com/example/Index",
                None,
                vec![builder.build()],
            )])
        };

        assert!(run(&touch(false)).is_empty());
        assert_eq!(
            messages(&run(&touch(true))),
            vec!["array.access.unsafe.high"]
        );
    }
}
