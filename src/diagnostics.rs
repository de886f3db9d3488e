use serde_sarif::sarif::{
    ArtifactLocation, Location, LogicalLocation, Message, PhysicalLocation, Region,
    Result as SarifResult,
};

/// How a diagnostic should be treated by consumers. `InternalError` marks
/// framework or checker bugs, kept distinct from rule violations so users do
/// not mistake one for a real type error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Severity {
    Error,
    Warning,
    InternalError,
}

impl Severity {
    fn tag(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::InternalError => "internal error",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SourceLocation {
    pub(crate) unit_path: Option<String>,
    pub(crate) class_name: String,
    pub(crate) method: Option<String>,
    pub(crate) line: Option<u32>,
}

impl SourceLocation {
    pub(crate) fn method(class_name: &str, method: &str) -> Self {
        SourceLocation {
            unit_path: None,
            class_name: class_name.to_string(),
            method: Some(method.to_string()),
            line: None,
        }
    }

    /// Location naming a whole compilation unit, for failures with no more
    /// precise anchor.
    pub(crate) fn unit(path: &str) -> Self {
        SourceLocation {
            unit_path: Some(path.to_string()),
            class_name: path.to_string(),
            method: None,
            line: None,
        }
    }

    pub(crate) fn with_unit(mut self, path: &str) -> Self {
        self.unit_path = Some(path.to_string());
        self
    }

    pub(crate) fn with_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }
}

/// One rule violation (or internal error) found during checking.
#[derive(Clone, Debug)]
pub(crate) struct Diagnostic {
    pub(crate) severity: Severity,
    pub(crate) message_key: &'static str,
    pub(crate) message: String,
    pub(crate) location: SourceLocation,
}

/// Collects diagnostics during one checker's traversal. Reporting never
/// aborts the traversal; one pass surfaces every violation.
#[derive(Default)]
pub(crate) struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn report(
        &mut self,
        severity: Severity,
        location: SourceLocation,
        message_key: &'static str,
        message: String,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            message_key,
            message,
            location,
        });
    }

    pub(crate) fn internal_error(&mut self, location: SourceLocation, message: String) {
        self.report(
            Severity::InternalError,
            location,
            "internal.error",
            message,
        );
    }

    pub(crate) fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub(crate) fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub(crate) fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

pub(crate) fn to_sarif_result(diagnostic: &Diagnostic) -> SarifResult {
    let logical = match &diagnostic.location.method {
        Some(method) => LogicalLocation::builder()
            .name(format!("{}.{}", diagnostic.location.class_name, method))
            .kind("function")
            .build(),
        None => LogicalLocation::builder()
            .name(diagnostic.location.class_name.clone())
            .kind("type")
            .build(),
    };
    let location = match &diagnostic.location.unit_path {
        Some(path) => {
            let artifact_location = ArtifactLocation::builder().uri(path.clone()).build();
            let physical = if let Some(line) = diagnostic.location.line {
                let region = Region::builder().start_line(line as i64).build();
                PhysicalLocation::builder()
                    .artifact_location(artifact_location)
                    .region(region)
                    .build()
            } else {
                PhysicalLocation::builder()
                    .artifact_location(artifact_location)
                    .build()
            };
            Location::builder()
                .logical_locations(vec![logical])
                .physical_location(physical)
                .build()
        }
        None => Location::builder().logical_locations(vec![logical]).build(),
    };
    let message = Message::builder()
        .text(format!(
            "{}: [{}] {}",
            diagnostic.severity.tag(),
            diagnostic.message_key,
            diagnostic.message
        ))
        .build();
    SarifResult::builder()
        .message(message)
        .locations(vec![location])
        .build()
}
