mod cfg;
mod checkers;
mod dataflow;
mod defaults;
mod diagnostics;
mod engine;
mod error;
mod factory;
mod index;
mod ir;
mod qualifier;
mod telemetry;
#[cfg(test)]
mod test_support;
mod types;
mod visitor;

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use serde_sarif::sarif::{
    Invocation, PropertyBag, Run, Sarif, SCHEMA_URL, Tool, ToolComponent,
};
use tracing::info;

use crate::engine::{AnalysisContext, Engine, EngineConfig};
use crate::ir::ProgramBundle;
use crate::telemetry::Telemetry;

/// CLI arguments for qualcheck execution.
#[derive(Parser, Debug)]
#[command(
    name = "qualcheck",
    about = "Pluggable type-qualifier checking with SARIF output.",
    version
)]
struct Cli {
    /// Program representation JSON; repeatable.
    #[arg(long, value_name = "PATH", required = true)]
    input: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Run only the named checkers (by id).
    #[arg(long, value_name = "ID")]
    checker: Vec<String>,
    /// Disable flow-sensitive refinement; only declared and defaulted
    /// qualifiers are checked.
    #[arg(long)]
    no_flow: bool,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    #[arg(long, value_name = "URL")]
    otlp_endpoint: Option<String>,
}

fn main() -> Result<()> {
    telemetry::init_logging();
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    for input in &cli.input {
        if !input.exists() {
            anyhow::bail!("input not found: {}", input.display());
        }
    }

    let telemetry = match &cli.otlp_endpoint {
        Some(endpoint) => Some(Arc::new(Telemetry::new(endpoint.clone())?)),
        None => None,
    };

    let started_at = Instant::now();
    let load_started_at = Instant::now();
    let bundle = load_bundle(&cli.input)?;
    let load_duration_ms = load_started_at.elapsed().as_millis();

    let config = EngineConfig {
        flow_enabled: !cli.no_flow,
        checker_filter: if cli.checker.is_empty() {
            None
        } else {
            Some(cli.checker.iter().cloned().collect::<BTreeSet<String>>())
        },
    };
    let engine = Engine::new(&config)?;
    info!(checkers = ?engine.checker_ids(), "engine configured");

    let stats = BundleStats::of(&bundle, load_duration_ms);
    let context = AnalysisContext::new(bundle, config, telemetry.clone());
    let output = engine.analyze(&context)?;
    let invocation = build_invocation(&stats, output.results.len());
    let sarif = build_sarif(invocation, output.rules, output.results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} load_ms={} units={} classes={}",
            started_at.elapsed().as_millis(),
            stats.load_duration_ms,
            stats.unit_count,
            stats.class_count
        );
    }

    if let Some(telemetry) = &telemetry {
        telemetry.shutdown()?;
    }

    Ok(())
}

/// Loads and merges every `--input` bundle, with JSON errors reported at
/// their exact path.
fn load_bundle(inputs: &[PathBuf]) -> Result<ProgramBundle> {
    let mut bundle = ProgramBundle::default();
    for input in inputs {
        let file = File::open(input)
            .with_context(|| format!("failed to open {}", input.display()))?;
        let mut deserializer = serde_json::Deserializer::from_reader(io::BufReader::new(file));
        let parsed: ProgramBundle = serde_path_to_error::deserialize(&mut deserializer)
            .with_context(|| format!("failed to parse {}", input.display()))?;
        bundle.units.extend(parsed.units);
    }
    Ok(bundle)
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Metadata captured for SARIF invocation properties.
struct BundleStats {
    load_duration_ms: u128,
    unit_count: usize,
    class_count: usize,
    method_count: usize,
}

impl BundleStats {
    fn of(bundle: &ProgramBundle, load_duration_ms: u128) -> Self {
        BundleStats {
            load_duration_ms,
            unit_count: bundle.units.len(),
            class_count: bundle.units.iter().map(|unit| unit.classes.len()).sum(),
            method_count: bundle
                .units
                .iter()
                .flat_map(|unit| unit.classes.iter())
                .map(|class| class.methods.len())
                .sum(),
        }
    }
}

fn build_invocation(stats: &BundleStats, result_count: usize) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert(
        "qualcheck.load_ms".to_string(),
        json!(stats.load_duration_ms),
    );
    properties.insert("qualcheck.unit_count".to_string(), json!(stats.unit_count));
    properties.insert(
        "qualcheck.class_count".to_string(),
        json!(stats.class_count),
    );
    properties.insert(
        "qualcheck.method_count".to_string(),
        json!(stats.method_count),
    );
    properties.insert("qualcheck.result_count".to_string(), json!(result_count));

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(
            PropertyBag::builder()
                .additional_properties(properties)
                .build(),
        )
        .build()
}

fn build_sarif(
    invocation: Invocation,
    rules: Vec<serde_sarif::sarif::ReportingDescriptor>,
    results: Vec<serde_sarif::sarif::Result>,
) -> Sarif {
    let driver = if rules.is_empty() {
        ToolComponent::builder()
            .name("qualcheck")
            .information_uri("https://github.com/qualcheck/qualcheck")
            .build()
    } else {
        ToolComponent::builder()
            .name("qualcheck")
            .information_uri("https://github.com/qualcheck/qualcheck")
            .rules(rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = Run::builder()
        .tool(tool)
        .invocations(vec![invocation])
        .results(results)
        .build();

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
