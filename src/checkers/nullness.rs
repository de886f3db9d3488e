use anyhow::Result;

use crate::checkers::{Checker, CheckerConfig, CheckerMetadata};
use crate::dataflow::store::{ExpressionKey, Store};
use crate::dataflow::transfer::{
    FlowStores, TransferContext, TransferFunction, TransferOutcome, default_transfer,
};
use crate::defaults::DefaultingPolicy;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::engine::AnalysisContext;
use crate::error::CheckError;
use crate::ir::{
    Annotation, BinaryOp, CompilationUnit, Literal, Node, NodeId, NodeKind, PrimitiveKind,
};
use crate::qualifier::{HierarchyId, Qualifier, QualifierHierarchy};
use crate::register_checker;
use crate::types::{AnnotatedType, TypePosition};
use crate::visitor::{CheckContext, RuleSet};

pub(crate) const NULLNESS: HierarchyId = HierarchyId("nullness");

/// Two-point nullness lattice: `Nullable` (top) > `NonNull` (bottom).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Nullness {
    Nullable,
    NonNull,
}

impl Qualifier for Nullness {
    fn hierarchy(&self) -> HierarchyId {
        NULLNESS
    }

    fn kind(&self) -> &'static str {
        match self {
            Nullness::Nullable => "Nullable",
            Nullness::NonNull => "NonNull",
        }
    }
}

pub(crate) struct NullnessHierarchy;

impl QualifierHierarchy<Nullness> for NullnessHierarchy {
    fn hierarchy_ids(&self) -> &[HierarchyId] {
        &[NULLNESS]
    }

    fn top(&self, _id: HierarchyId) -> Nullness {
        Nullness::Nullable
    }

    fn bottom(&self, _id: HierarchyId) -> Nullness {
        Nullness::NonNull
    }

    fn is_subtype(&self, sub: &Nullness, sup: &Nullness) -> bool {
        sub == &Nullness::NonNull || sup == &Nullness::Nullable
    }

    fn least_upper_bound(&self, a: &Nullness, b: &Nullness) -> Nullness {
        if a == &Nullness::Nullable || b == &Nullness::Nullable {
            Nullness::Nullable
        } else {
            Nullness::NonNull
        }
    }

    fn greatest_lower_bound(&self, a: &Nullness, b: &Nullness) -> Nullness {
        if a == &Nullness::NonNull || b == &Nullness::NonNull {
            Nullness::NonNull
        } else {
            Nullness::Nullable
        }
    }

    fn parse_annotation(&self, annotation: &Annotation) -> Option<Nullness> {
        match annotation.name.as_str() {
            "Nullable" => Some(Nullness::Nullable),
            "NonNull" => Some(Nullness::NonNull),
            _ => None,
        }
    }

    fn sample_qualifiers(&self) -> Vec<Nullness> {
        vec![Nullness::Nullable, Nullness::NonNull]
    }
}

/// Null-marked defaults: declared positions are non-null unless annotated
/// `@Nullable`; locals default to top and rely on flow; the `null` literal
/// overrides the framework's literal-to-bottom rule.
pub(crate) struct NullnessDefaults;

impl DefaultingPolicy<Nullness> for NullnessDefaults {
    fn for_position(
        &self,
        _hierarchy: &dyn QualifierHierarchy<Nullness>,
        position: TypePosition,
        primitive: Option<PrimitiveKind>,
        _id: HierarchyId,
    ) -> Nullness {
        if primitive.is_some() {
            return Nullness::NonNull;
        }
        match position {
            TypePosition::LocalVar => Nullness::Nullable,
            _ => Nullness::NonNull,
        }
    }

    fn for_literal(
        &self,
        _hierarchy: &dyn QualifierHierarchy<Nullness>,
        literal: &Literal,
        _id: HierarchyId,
    ) -> Nullness {
        match literal {
            Literal::Null => Nullness::Nullable,
            _ => Nullness::NonNull,
        }
    }

    fn for_new(
        &self,
        _hierarchy: &dyn QualifierHierarchy<Nullness>,
        _id: HierarchyId,
    ) -> Nullness {
        Nullness::NonNull
    }
}

/// Flow rules: `x != null` / `x == null` comparisons refine the tested
/// expression in the corresponding branch, and a completed dereference
/// leaves its receiver non-null.
pub(crate) struct NullnessTransfer;

impl TransferFunction<Nullness> for NullnessTransfer {
    fn transfer(
        &self,
        ctx: &TransferContext<'_, Nullness>,
        node: &Node,
        input: &Store<Nullness>,
    ) -> Result<TransferOutcome<Nullness>, CheckError> {
        let outcome = default_transfer(self, ctx, node, input)?;
        let Some(receiver) = deref_receiver(&node.kind) else {
            return Ok(outcome);
        };
        let Some(key) = ctx.key_for(receiver) else {
            return Ok(outcome);
        };
        match outcome.flow {
            FlowStores::Regular(store) => {
                let store = mark_non_null(ctx, store, &key, receiver);
                Ok(TransferOutcome {
                    value: outcome.value,
                    flow: FlowStores::Regular(store),
                })
            }
            conditional => Ok(TransferOutcome {
                value: outcome.value,
                flow: conditional,
            }),
        }
    }

    fn refine_comparison(
        &self,
        ctx: &TransferContext<'_, Nullness>,
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
        then_store: Store<Nullness>,
        else_store: Store<Nullness>,
    ) -> (Store<Nullness>, Store<Nullness>) {
        let tested = match (is_null_literal(ctx, lhs), is_null_literal(ctx, rhs)) {
            (false, true) => lhs,
            (true, false) => rhs,
            _ => return (then_store, else_store),
        };
        let Some(key) = ctx.key_for(tested) else {
            return (then_store, else_store);
        };
        match op {
            BinaryOp::Ne => {
                let then_store = mark_non_null(ctx, then_store, &key, tested);
                (then_store, else_store)
            }
            BinaryOp::Eq => {
                let else_store = mark_non_null(ctx, else_store, &key, tested);
                (then_store, else_store)
            }
            _ => (then_store, else_store),
        }
    }
}

fn deref_receiver(kind: &NodeKind) -> Option<NodeId> {
    match kind {
        NodeKind::FieldRead {
            receiver: Some(receiver),
            ..
        } => Some(*receiver),
        NodeKind::ArrayRead { array, .. } | NodeKind::ArrayLength { array } => Some(*array),
        NodeKind::Call {
            receiver: Some(receiver),
            ..
        } => Some(*receiver),
        _ => None,
    }
}

fn is_null_literal(ctx: &TransferContext<'_, Nullness>, id: NodeId) -> bool {
    matches!(
        ctx.node(id).map(|node| &node.kind),
        Some(NodeKind::Literal {
            value: Literal::Null
        })
    )
}

fn mark_non_null(
    ctx: &TransferContext<'_, Nullness>,
    store: Store<Nullness>,
    key: &ExpressionKey,
    tested: NodeId,
) -> Store<Nullness> {
    let value = store
        .value_of(key)
        .cloned()
        .or_else(|| ctx.operand_value(tested).ok());
    match value {
        Some(mut value) => {
            value.qualifiers.insert(Nullness::NonNull);
            store.with(key.clone(), value)
        }
        None => store,
    }
}

pub(crate) struct NullnessRules;

impl RuleSet<Nullness> for NullnessRules {
    fn check_dereference(
        &self,
        ctx: &CheckContext<'_, Nullness>,
        node: &Node,
        receiver: &AnnotatedType<Nullness>,
        sink: &mut DiagnosticSink,
    ) {
        if receiver.qualifier(NULLNESS) != Some(&Nullness::Nullable) {
            return;
        }
        let message = match &node.kind {
            NodeKind::Call { method, .. } => {
                format!("possible null receiver in call to {method}")
            }
            NodeKind::FieldRead { field, .. } => {
                format!("possible null receiver reading field {field}")
            }
            _ => "possible null array dereference".to_string(),
        };
        sink.report(
            Severity::Error,
            ctx.location(node),
            "dereference.of.nullable",
            message,
        );
    }
}

/// Nullness checker: a configuration of the generic engine.
pub(crate) struct NullnessChecker {
    config: CheckerConfig<Nullness>,
}

impl Default for NullnessChecker {
    fn default() -> Self {
        NullnessChecker {
            config: CheckerConfig {
                hierarchy: Box::new(NullnessHierarchy),
                transfer: Box::new(NullnessTransfer),
                defaulting: Box::new(NullnessDefaults),
                rules: Box::new(NullnessRules),
            },
        }
    }
}

impl Checker for NullnessChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "NULLNESS",
            name: "Nullness checks",
            description: "Flow-sensitive nullness checking of dereferences, returns, and overrides",
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

register_checker!(NullnessChecker);
