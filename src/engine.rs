use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use opentelemetry::KeyValue;
use rayon::prelude::*;
use serde_sarif::sarif::{
    MultiformatMessageString, ReportingDescriptor, Result as SarifResult,
};

use crate::checkers::{Checker, CheckerMetadata, all_checkers};
use crate::diagnostics::to_sarif_result;
use crate::ir::ProgramBundle;
use crate::telemetry::{Telemetry, with_span};

/// Explicit engine configuration threaded through construction; there is no
/// process-wide mutable state.
#[derive(Clone, Debug)]
pub(crate) struct EngineConfig {
    pub(crate) flow_enabled: bool,
    pub(crate) checker_filter: Option<BTreeSet<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            flow_enabled: true,
            checker_filter: None,
        }
    }
}

/// Inputs shared by all checkers for one run.
pub(crate) struct AnalysisContext {
    pub(crate) bundle: ProgramBundle,
    config: EngineConfig,
    telemetry: Option<Arc<Telemetry>>,
}

impl AnalysisContext {
    pub(crate) fn new(
        bundle: ProgramBundle,
        config: EngineConfig,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Self {
        AnalysisContext {
            bundle,
            config,
            telemetry,
        }
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    pub(crate) fn with_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        with_span(self.telemetry(), name, attributes, f)
    }
}

/// Analysis engine that executes registered checkers over every compilation
/// unit. Units are independent, so they run on worker threads; the lattice
/// tables inside each checker are immutable and shared, while per-unit
/// factories and stores stay confined to the thread that creates them.
pub(crate) struct Engine {
    checkers: Vec<Box<dyn Checker>>,
}

impl Engine {
    /// Builds the engine and validates every checker's lattice before any
    /// unit is analyzed; a broken hierarchy is a checker bug, not a per-file
    /// diagnostic.
    pub(crate) fn new(config: &EngineConfig) -> Result<Self> {
        let mut checkers: Vec<Box<dyn Checker>> = all_checkers()
            .into_iter()
            .filter(|checker| match &config.checker_filter {
                Some(filter) => filter.contains(checker.metadata().id),
                None => true,
            })
            .collect();
        checkers.sort_by(|a, b| a.metadata().id.cmp(b.metadata().id));
        for checker in &checkers {
            checker
                .validate()
                .map_err(|err| anyhow::anyhow!("checker {}: {err}", checker.metadata().id))?;
        }
        Ok(Engine { checkers })
    }

    pub(crate) fn checker_ids(&self) -> Vec<&'static str> {
        self.checkers.iter().map(|c| c.metadata().id).collect()
    }

    pub(crate) fn analyze(&self, context: &AnalysisContext) -> Result<EngineOutput> {
        let rules = self
            .checkers
            .iter()
            .map(|checker| rule_descriptor(&checker.metadata()))
            .collect();

        let unit_results: Result<Vec<Vec<SarifResult>>> = context
            .bundle
            .units
            .par_iter()
            .map(|unit| {
                let mut results = Vec::new();
                for checker in &self.checkers {
                    let metadata = checker.metadata();
                    let span_attributes = [
                        KeyValue::new("qualcheck.checker_id", metadata.id),
                        KeyValue::new("qualcheck.unit", unit.path.clone()),
                    ];
                    let diagnostics = context.with_span(
                        &format!("checker:{}", metadata.id),
                        &span_attributes,
                        || checker.check(context, unit),
                    )?;
                    for diagnostic in &diagnostics {
                        let mut result = to_sarif_result(diagnostic);
                        result.rule_id = Some(metadata.id.to_string());
                        results.push(result);
                    }
                }
                Ok(results)
            })
            .collect();

        let mut results: Vec<SarifResult> = unit_results?.into_iter().flatten().collect();
        results.sort_by(|left, right| {
            let left_id = left.rule_id.as_deref().unwrap_or("");
            let right_id = right.rule_id.as_deref().unwrap_or("");
            let left_msg = left.message.text.as_deref().unwrap_or("").to_string();
            let right_msg = right.message.text.as_deref().unwrap_or("").to_string();
            left_id.cmp(right_id).then(left_msg.cmp(&right_msg))
        });

        Ok(EngineOutput { rules, results })
    }
}

/// Aggregated SARIF payload from checker execution.
pub(crate) struct EngineOutput {
    pub(crate) rules: Vec<ReportingDescriptor>,
    pub(crate) results: Vec<SarifResult>,
}

fn rule_descriptor(metadata: &CheckerMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}
