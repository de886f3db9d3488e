use anyhow::Result;

use crate::dataflow::transfer::TransferFunction;
use crate::defaults::DefaultingPolicy;
use crate::diagnostics::{Diagnostic, DiagnosticSink, SourceLocation};
use crate::engine::AnalysisContext;
use crate::error::CheckError;
use crate::index::UnitIndex;
use crate::ir::CompilationUnit;
use crate::qualifier::{Qualifier, QualifierHierarchy, validate_lattice};
use crate::visitor::{RuleSet, Visitor};

pub(crate) mod nullness;
pub(crate) mod signedness;
pub(crate) mod upperbound;

/// Metadata describing a checker.
#[derive(Clone, Debug)]
pub(crate) struct CheckerMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// Checker interface for engine execution. `validate` runs once at engine
/// construction, before any unit is analyzed.
pub(crate) trait Checker: Send + Sync {
    fn metadata(&self) -> CheckerMetadata;

    fn validate(&self) -> Result<(), CheckError> {
        Ok(())
    }

    fn check(&self, context: &AnalysisContext, unit: &CompilationUnit)
    -> Result<Vec<Diagnostic>>;
}

/// Wrapper struct for checker factory functions to enable inventory
/// collection.
pub(crate) struct CheckerFactory(pub fn() -> Box<dyn Checker>);

inventory::collect!(CheckerFactory);

/// Macro to register a checker implementation.
///
/// Usage: `register_checker!(CheckerName);`
#[macro_export]
macro_rules! register_checker {
    ($checker_type:ty) => {
        inventory::submit! {
            $crate::checkers::CheckerFactory(|| Box::new(<$checker_type>::default()))
        }
    };
}

/// Returns all registered checkers as boxed trait objects.
pub(crate) fn all_checkers() -> Vec<Box<dyn Checker>> {
    inventory::iter::<CheckerFactory>
        .into_iter()
        .map(|factory| (factory.0)())
        .collect()
}

/// One concrete checker is a configuration of the generic engine: a
/// qualifier hierarchy, a transfer function, a defaulting policy, and a rule
/// set. No checker subclasses the framework.
pub(crate) struct CheckerConfig<Q: Qualifier> {
    pub(crate) hierarchy: Box<dyn QualifierHierarchy<Q>>,
    pub(crate) transfer: Box<dyn TransferFunction<Q>>,
    pub(crate) defaulting: Box<dyn DefaultingPolicy<Q>>,
    pub(crate) rules: Box<dyn RuleSet<Q>>,
}

impl<Q: Qualifier> CheckerConfig<Q> {
    pub(crate) fn validate(&self) -> Result<(), CheckError> {
        validate_lattice(self.hierarchy.as_ref())
    }

    /// Runs this checker over one compilation unit. Rule violations are
    /// collected; a malformed CFG or engine-internal failure aborts the unit
    /// with a tagged internal-error diagnostic.
    pub(crate) fn check_unit(
        &self,
        unit: &CompilationUnit,
        flow_enabled: bool,
    ) -> Result<Vec<Diagnostic>> {
        let index = UnitIndex::build(unit)?;
        let mut sink = DiagnosticSink::new();
        let visitor = Visitor {
            hierarchy: self.hierarchy.as_ref(),
            defaulting: self.defaulting.as_ref(),
            transfer: self.transfer.as_ref(),
            rules: self.rules.as_ref(),
            flow_enabled,
        };
        if let Err(err) = visitor.check_unit(unit, &index, &mut sink) {
            sink.internal_error(SourceLocation::unit(&unit.path), err.to_string());
        }
        Ok(sink.into_diagnostics())
    }
}
