use anyhow::Result;

use crate::checkers::{Checker, CheckerConfig, CheckerMetadata};
use crate::dataflow::transfer::DefaultTransfer;
use crate::defaults::DefaultingPolicy;
use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};
use crate::engine::AnalysisContext;
use crate::error::CheckError;
use crate::ir::{Annotation, CompilationUnit, Literal, Node, NodeKind, PrimitiveKind};
use crate::qualifier::{HierarchyId, Qualifier, QualifierHierarchy};
use crate::register_checker;
use crate::types::{AnnotatedType, TypePosition};
use crate::visitor::{CheckContext, RuleSet};

pub(crate) const SIGNEDNESS: HierarchyId = HierarchyId("signedness");

/// Diamond lattice: `Signed` and `Unsigned` are unrelated siblings under
/// `Unknown`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Signedness {
    Unknown,
    Signed,
    Unsigned,
    Bottom,
}

impl Qualifier for Signedness {
    fn hierarchy(&self) -> HierarchyId {
        SIGNEDNESS
    }

    fn kind(&self) -> &'static str {
        match self {
            Signedness::Unknown => "SignednessUnknown",
            Signedness::Signed => "Signed",
            Signedness::Unsigned => "Unsigned",
            Signedness::Bottom => "SignednessBottom",
        }
    }
}

pub(crate) struct SignednessHierarchy;

impl QualifierHierarchy<Signedness> for SignednessHierarchy {
    fn hierarchy_ids(&self) -> &[HierarchyId] {
        &[SIGNEDNESS]
    }

    fn top(&self, _id: HierarchyId) -> Signedness {
        Signedness::Unknown
    }

    fn bottom(&self, _id: HierarchyId) -> Signedness {
        Signedness::Bottom
    }

    fn is_subtype(&self, sub: &Signedness, sup: &Signedness) -> bool {
        sub == &Signedness::Bottom || sup == &Signedness::Unknown || sub == sup
    }

    fn least_upper_bound(&self, a: &Signedness, b: &Signedness) -> Signedness {
        match (a, b) {
            (x, y) if x == y => *x,
            (Signedness::Bottom, other) | (other, Signedness::Bottom) => *other,
            _ => Signedness::Unknown,
        }
    }

    fn greatest_lower_bound(&self, a: &Signedness, b: &Signedness) -> Signedness {
        match (a, b) {
            (x, y) if x == y => *x,
            (Signedness::Unknown, other) | (other, Signedness::Unknown) => *other,
            _ => Signedness::Bottom,
        }
    }

    fn parse_annotation(&self, annotation: &Annotation) -> Option<Signedness> {
        match annotation.name.as_str() {
            "Signed" => Some(Signedness::Signed),
            "Unsigned" => Some(Signedness::Unsigned),
            "SignednessUnknown" => Some(Signedness::Unknown),
            "SignednessBottom" => Some(Signedness::Bottom),
            _ => None,
        }
    }

    fn sample_qualifiers(&self) -> Vec<Signedness> {
        vec![
            Signedness::Unknown,
            Signedness::Signed,
            Signedness::Unsigned,
            Signedness::Bottom,
        ]
    }
}

/// Numeric primitives are signed unless annotated; `char` is the one
/// unsigned primitive. References carry no signedness claim.
pub(crate) struct SignednessDefaults;

impl DefaultingPolicy<Signedness> for SignednessDefaults {
    fn for_position(
        &self,
        _hierarchy: &dyn QualifierHierarchy<Signedness>,
        _position: TypePosition,
        primitive: Option<PrimitiveKind>,
        _id: HierarchyId,
    ) -> Signedness {
        match primitive {
            Some(PrimitiveKind::Char) => Signedness::Unsigned,
            Some(kind) if kind.is_numeric() => Signedness::Signed,
            _ => Signedness::Unknown,
        }
    }

    fn for_literal(
        &self,
        _hierarchy: &dyn QualifierHierarchy<Signedness>,
        literal: &Literal,
        _id: HierarchyId,
    ) -> Signedness {
        match literal {
            Literal::Int(_) => Signedness::Signed,
            _ => Signedness::Unknown,
        }
    }

    fn for_new(
        &self,
        _hierarchy: &dyn QualifierHierarchy<Signedness>,
        _id: HierarchyId,
    ) -> Signedness {
        Signedness::Unknown
    }
}

/// The signedness operator table: arithmetic and comparisons must not mix a
/// signed operand with an unsigned one.
pub(crate) struct SignednessRules;

impl RuleSet<Signedness> for SignednessRules {
    fn check_binary(
        &self,
        ctx: &CheckContext<'_, Signedness>,
        node: &Node,
        lhs: &AnnotatedType<Signedness>,
        rhs: &AnnotatedType<Signedness>,
        sink: &mut DiagnosticSink,
    ) {
        let NodeKind::Binary { op, .. } = &node.kind else {
            return;
        };
        if !op.is_arithmetic() && !op.is_comparison() {
            return;
        }
        let left = lhs.qualifier(SIGNEDNESS).copied();
        let right = rhs.qualifier(SIGNEDNESS).copied();
        let mixed = matches!(
            (left, right),
            (Some(Signedness::Signed), Some(Signedness::Unsigned))
                | (Some(Signedness::Unsigned), Some(Signedness::Signed))
        );
        if mixed {
            let severity = if op.is_arithmetic() {
                Severity::Error
            } else {
                Severity::Warning
            };
            sink.report(
                severity,
                ctx.location(node),
                "operation.mixed.signedness",
                format!("{op:?} mixes a signed operand with an unsigned one"),
            );
        }
    }
}

/// Signedness checker: a configuration of the generic engine. No transfer
/// overrides; the default flow machinery is enough for an operator table.
pub(crate) struct SignednessChecker {
    config: CheckerConfig<Signedness>,
}

impl Default for SignednessChecker {
    fn default() -> Self {
        SignednessChecker {
            config: CheckerConfig {
                hierarchy: Box::new(SignednessHierarchy),
                transfer: Box::new(DefaultTransfer),
                defaulting: Box::new(SignednessDefaults),
                rules: Box::new(SignednessRules),
            },
        }
    }
}

impl Checker for SignednessChecker {
    fn metadata(&self) -> CheckerMetadata {
        CheckerMetadata {
            id: "SIGNEDNESS",
            name: "Signedness checks",
            description: "Rejects arithmetic and comparisons mixing signed and unsigned values",
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

register_checker!(SignednessChecker);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, EdgeKind, TypeKind, TypeUse};
    use crate::qualifier::validate_lattice;
    use crate::test_support::{MethodBuilder, annotated, class_with, int_ty, unit_with};

    fn char_ty() -> TypeUse {
        TypeUse::plain(TypeKind::Primitive {
            name: PrimitiveKind::Char,
        })
    }

    fn run(unit: &CompilationUnit) -> Vec<Diagnostic> {
        SignednessChecker::default()
            .config
            .check_unit(unit, true)
            .expect("checker run")
    }

    #[test]
    fn lattice_is_valid() {
        validate_lattice(&SignednessHierarchy).expect("valid signedness lattice");
    }

    #[test]
    fn siblings_join_to_top_and_meet_at_bottom() {
        let h = SignednessHierarchy;
        assert_eq!(
            h.least_upper_bound(&Signedness::Signed, &Signedness::Unsigned),
            Signedness::Unknown
        );
        assert_eq!(
            h.greatest_lower_bound(&Signedness::Signed, &Signedness::Unsigned),
            Signedness::Bottom
        );
        assert!(!h.is_subtype(&Signedness::Signed, &Signedness::Unsigned));
        assert!(!h.is_subtype(&Signedness::Unsigned, &Signedness::Signed));
    }

    #[test]
    fn mixed_arithmetic_is_reported() {
        let mut builder = MethodBuilder::new("mix")
            .static_method()
            .param("s", int_ty())
            .param("u", annotated(int_ty(), "Unsigned"));
        builder.block(0);
        let s = builder.local_read("s");
        let u = builder.local_read("u");
        builder.binary(BinaryOp::Add, s, u);
        builder.ret(None);
        let unit = unit_with(vec![class_with(
            "com/example/Mix",
            None,
            vec![builder.build()],
        )]);

        let diagnostics = run(&unit);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message_key, "operation.mixed.signedness");
    }

    #[test]
    fn char_defaults_to_unsigned() {
        let mut builder = MethodBuilder::new("mix")
            .static_method()
            .param("c", char_ty())
            .param("n", int_ty());
        builder.block(0);
        let c = builder.local_read("c");
        let n = builder.local_read("n");
        builder.binary(BinaryOp::Lt, c, n);
        builder.ret(None);
        let unit = unit_with(vec![class_with(
            "com/example/Mix",
            None,
            vec![builder.build()],
        )]);

        assert_eq!(run(&unit).len(), 1);
    }

    #[test]
    fn same_signedness_arithmetic_is_silent() {
        let mut builder = MethodBuilder::new("sum")
            .static_method()
            .param("x", int_ty())
            .param("y", int_ty());
        builder.block(0);
        let x = builder.local_read("x");
        let y = builder.local_read("y");
        builder.binary(BinaryOp::Add, x, y);
        builder.ret(None);
        let unit = unit_with(vec![class_with(
            "com/example/Sum",
            None,
            vec![builder.build()],
        )]);

        assert!(run(&unit).is_empty());
    }

    #[test]
    fn unsigned_comparison_with_literal_is_reported() {
        let mut builder = MethodBuilder::new("guard")
            .static_method()
            .param("u", annotated(int_ty(), "Unsigned"));
        builder.block(0);
        let u = builder.local_read("u");
        let zero = builder.lit_int(0);
        builder.binary(BinaryOp::Lt, u, zero);
        builder.ret(None);
        builder.block(1);
        builder.ret(None);
        builder.block(2);
        builder.ret(None);
        builder.edge(0, 1, EdgeKind::TrueBranch);
        builder.edge(0, 2, EdgeKind::FalseBranch);
        let unit = unit_with(vec![class_with(
            "com/example/Guard",
            None,
            vec![builder.build()],
        )]);

        assert_eq!(run(&unit).len(), 1);
    }
}
