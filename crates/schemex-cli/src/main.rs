//! Schemex CLI - Command-line interface
//!
//! Usage:
//!   schemex deps <schema>
//!   schemex extract --schema <schema> --input <corpus.json> --out <dir>
//!   schemex ground --run <run.json> --text <file>
//!   schemex evaluate --gold <gold.json> --runs <dir>

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use schemex_core::{AppConfig, ContractProvider, GroundingPolicy, LoggingConfig, ResultMap, Schema};
use schemex_extractor::metrics::deserialize_optional_id;
use schemex_extractor::{
    classify, span_output, AggregateMetrics, ClassGraph, DependencyEntry, Document, DocumentRun,
    EvaluationReport, Evaluator, GoldDocument, Orchestrator, SchemaContracts, SpanGrounder,
    StaticContracts, TierPlan,
};

#[derive(Parser)]
#[command(name = "schemex")]
#[command(about = "Schema-driven tiered extraction CLI")]
#[command(version)]
struct Cli {
    /// TOML configuration file (environment variables still override)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the class dependency map and tier plan
    Deps {
        /// Schema file, LinkML YAML or JSON
        schema: PathBuf,
    },
    /// Extract every document of a corpus
    Extract {
        #[arg(long)]
        schema: PathBuf,
        /// Corpus JSON: an array of `{id?, text}` records
        #[arg(long)]
        input: PathBuf,
        /// Directory receiving one `run_<id>.json` per document
        #[arg(long)]
        out: PathBuf,
        /// Precomputed output contracts keyed by class
        #[arg(long)]
        contracts: Option<PathBuf>,
        /// Documents processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Ground the mentions of a run in its source text
    Ground {
        #[arg(long)]
        run: PathBuf,
        /// Source text of the run's document
        #[arg(long)]
        text: PathBuf,
        /// `first-occurrence-consumed` or `all-occurrences`
        #[arg(long)]
        policy: Option<GroundingPolicy>,
        /// Output file, stdout if omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Score runs against gold annotations
    Evaluate {
        #[arg(long)]
        gold: PathBuf,
        /// Directory of `run_<id>.json` files
        #[arg(long)]
        runs: PathBuf,
        /// Report file, stdout summary only if omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// A corpus record; gold files carry the same fields
#[derive(Debug, Deserialize)]
struct CorpusEntry {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    id: Option<String>,
    text: String,
}

#[derive(Debug, Serialize)]
struct DependencyReport {
    dependencies: BTreeMap<String, DependencyEntry>,
    tiers: TierPlan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Deps { schema } => {
            let schema = Schema::from_path(&schema)?;
            let graph = ClassGraph::build(&schema, &config.extraction.root_types)?;
            let report = DependencyReport {
                dependencies: graph.dependency_map(),
                tiers: classify(&graph),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Extract {
            schema,
            input,
            out,
            contracts,
            concurrency,
        } => {
            let mut config = config;
            if let Some(n) = concurrency {
                config.extraction.document_concurrency = n;
            }
            extract(&config, &schema, &input, &out, contracts.as_deref()).await?;
        }
        Commands::Ground {
            run,
            text,
            policy,
            out,
        } => {
            let mut grounding = config.grounding.clone();
            if let Some(policy) = policy {
                grounding.policy = policy;
            }
            let run: DocumentRun = read_json(&run)?;
            let text = std::fs::read_to_string(&text)
                .with_context(|| format!("Failed to read {}", text.display()))?;

            let grounded = SpanGrounder::from(&grounding).ground_text(&run.results, &text);
            if !grounded.unresolved.is_empty() {
                warn!(
                    document = %run.document_id,
                    unresolved = grounded.unresolved.len(),
                    "Some mentions were not found in the text"
                );
            }
            let output = span_output([(run.document_id.as_str(), &grounded)]);
            write_or_print(out.as_deref(), &output)?;
        }
        Commands::Evaluate { gold, runs, out } => {
            let gold: Vec<GoldDocument> = read_json(&gold)?;
            let runs = load_runs(&runs)?;
            let report = evaluate(&gold, &runs);
            if let Some(path) = out.as_deref() {
                write_json(path, &report.0)?;
            }
            println!("{}", report.1.report());
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("schemex={}", logging.level).into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn extract(
    config: &AppConfig,
    schema_path: &Path,
    input: &Path,
    out: &Path,
    contracts_path: Option<&Path>,
) -> Result<()> {
    let schema = Arc::new(Schema::from_path(schema_path)?);
    let graph = ClassGraph::build(&schema, &config.extraction.root_types)?;

    let contracts: Arc<dyn ContractProvider> = match contracts_path {
        Some(path) => Arc::new(StaticContracts::from_path(path)?),
        None => Arc::new(SchemaContracts::generate(&schema, &classify(&graph))),
    };
    let oracle = schemex_oracle::create_oracle(&config.oracle)?;
    let orchestrator = Orchestrator::from_config(schema, oracle, contracts, config)?;

    let documents = load_corpus(input)?;
    std::fs::create_dir_all(out)
        .with_context(|| format!("Failed to create {}", out.display()))?;

    let runs = orchestrator.run_batch(&documents).await;
    for run in &runs {
        write_json(&out.join(run_file_name(&run.document_id)), run)?;
    }

    let failures: usize = runs.iter().map(|r| r.failures.len()).sum();
    info!(
        documents = runs.len(),
        failures,
        out = %out.display(),
        "Extraction complete"
    );
    Ok(())
}

/// Documents of a corpus file; missing ids become 1-based positions
fn load_corpus(path: &Path) -> Result<Vec<Document>> {
    let entries: Vec<CorpusEntry> = read_json(path)?;
    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let id = entry.id.unwrap_or_else(|| (i + 1).to_string());
            Document::new(id, entry.text)
        })
        .collect())
}

fn run_file_name(document_id: &str) -> String {
    let safe: String = document_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("run_{safe}.json")
}

/// Every run file of a directory, keyed by document id
fn load_runs(dir: &Path) -> Result<BTreeMap<String, ResultMap>> {
    let mut runs = BTreeMap::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        let is_run = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("run_") && n.ends_with(".json"));
        if is_run {
            let run: DocumentRun = read_json(&path)?;
            runs.insert(run.document_id, run.results);
        }
    }

    Ok(runs)
}

/// Score every gold document that has a run; documents without one are skipped
fn evaluate(
    gold: &[GoldDocument],
    runs: &BTreeMap<String, ResultMap>,
) -> (EvaluationReport, AggregateMetrics) {
    let evaluator = Evaluator::new();
    let mut aggregate = AggregateMetrics::default();
    let mut documents = BTreeMap::new();

    for (i, doc) in gold.iter().enumerate() {
        let id = doc.id.clone().unwrap_or_else(|| (i + 1).to_string());
        let Some(results) = runs.get(&id) else {
            warn!(document = %id, "No run for gold document, skipping");
            continue;
        };
        let metrics = evaluator.evaluate_document(results, doc);
        aggregate.add(&metrics);
        documents.insert(id, metrics.report());
    }

    let report = EvaluationReport {
        documents,
        overall: aggregate.overall(),
    };
    (report, aggregate)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn write_or_print<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    match path {
        Some(path) => write_json(path, value),
        None => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
    }
}
