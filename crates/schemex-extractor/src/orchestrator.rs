//! Tiered extraction orchestrator
//!
//! Runs one document through `Independent -> Specialization -> Relationship`,
//! committing each tier's results before the next tier starts. Every document
//! works on its own clone of the class graph.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use schemex_core::{
    AppConfig, ContractProvider, ExtractionConfig, ExtractionOracle, ExtractionResult,
    OracleFailure, OracleRequest, OutputContract, RelationRecord, ResultMap, Schema, SchemaError,
    TierKind,
};

use crate::graph::ClassGraph;
use crate::instructions::{Instruction, TierInstructions};
use crate::pruner::{apply_endpoint_policy, check_parent, MissingEvidence, PruneEvent};
use crate::retry::RetryPolicy;
use crate::tiers::classify;

/// A document to extract from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Independent,
    Specialization,
    Relationship,
    Done,
}

impl Stage {
    pub fn next(self) -> Self {
        match self {
            Self::Independent => Self::Specialization,
            Self::Specialization => Self::Relationship,
            Self::Relationship | Self::Done => Self::Done,
        }
    }
}

/// What an oracle call was asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPurpose {
    Mentions,
    Attributes,
    Relations,
}

/// An instruction sent to the oracle, kept for auditing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub class_name: String,
    pub purpose: CallPurpose,
    #[serde(flatten)]
    pub instruction: Instruction,
}

/// An oracle failure recovered as an empty result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFailure {
    pub class_name: String,
    pub tier: TierKind,
    pub purpose: CallPurpose,
    pub error: String,
}

/// Outcome of extracting one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRun {
    pub run_id: Uuid,
    pub document_id: String,
    pub results: ResultMap,
    #[serde(default)]
    pub prompts: Vec<PromptRecord>,
    #[serde(default)]
    pub pruned: Vec<PruneEvent>,
    #[serde(default)]
    pub skipped: Vec<MissingEvidence>,
    #[serde(default)]
    pub failures: Vec<ClassFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl DocumentRun {
    fn start(document_id: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            results: ResultMap::new(),
            prompts: Vec::new(),
            pruned: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            started_at: now,
            completed_at: now,
        }
    }

    /// Every class removed by pruning in this run
    pub fn pruned_classes(&self) -> BTreeSet<&str> {
        self.pruned
            .iter()
            .flat_map(|event| event.removed.iter().map(String::as_str))
            .collect()
    }
}

/// Drives tiered extraction against an injected oracle
pub struct Orchestrator {
    oracle: Arc<dyn ExtractionOracle>,
    contracts: Arc<dyn ContractProvider>,
    schema: Arc<Schema>,
    graph: ClassGraph,
    retry: RetryPolicy,
    config: ExtractionConfig,
}

impl Orchestrator {
    pub fn new(
        schema: Arc<Schema>,
        graph: ClassGraph,
        oracle: Arc<dyn ExtractionOracle>,
        contracts: Arc<dyn ContractProvider>,
    ) -> Self {
        Self {
            oracle,
            contracts,
            schema,
            graph,
            retry: RetryPolicy::default(),
            config: ExtractionConfig::default(),
        }
    }

    /// Build the class graph from the schema and wire everything from config
    pub fn from_config(
        schema: Arc<Schema>,
        oracle: Arc<dyn ExtractionOracle>,
        contracts: Arc<dyn ContractProvider>,
        config: &AppConfig,
    ) -> Result<Self, SchemaError> {
        let graph = ClassGraph::build(&schema, &config.extraction.root_types)?;
        Ok(Self::new(schema, graph, oracle, contracts)
            .with_retry(RetryPolicy::from(&config.retry))
            .with_config(config.extraction.clone()))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_config(mut self, config: ExtractionConfig) -> Self {
        self.config = config;
        self
    }

    /// Base graph shared by all documents
    pub fn graph(&self) -> &ClassGraph {
        &self.graph
    }

    /// Extract a batch of documents with bounded concurrency.
    ///
    /// Runs are returned in input order.
    pub async fn run_batch(&self, documents: &[Document]) -> Vec<DocumentRun> {
        let concurrency = self.config.document_concurrency.max(1);
        info!(
            documents = documents.len(),
            concurrency,
            oracle = self.oracle.name(),
            "Starting extraction batch"
        );

        let mut runs: Vec<(usize, DocumentRun)> = stream::iter(documents.iter().enumerate())
            .map(|(i, document)| async move { (i, self.run_document(document).await) })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        runs.sort_by_key(|(i, _)| *i);
        runs.into_iter().map(|(_, run)| run).collect()
    }

    /// Extract one document through every tier
    pub async fn run_document(&self, document: &Document) -> DocumentRun {
        let mut run = DocumentRun::start(&document.id);
        let mut graph = self.graph.clone();
        let mut stage = Stage::Independent;

        while stage != Stage::Done {
            info!(document = %document.id, stage = ?stage, classes = graph.len(), "Entering tier");
            match stage {
                Stage::Independent => self.independent_tier(&graph, document, &mut run).await,
                Stage::Specialization => {
                    self.specialization_tier(&graph, document, &mut run).await
                }
                Stage::Relationship => {
                    let events = apply_endpoint_policy(&mut graph, &run.results);
                    run.pruned.extend(events);
                    self.relationship_tier(&graph, document, &mut run).await
                }
                Stage::Done => {}
            }
            stage = stage.next();
        }

        run.completed_at = Utc::now();
        info!(
            document = %document.id,
            classes = run.results.len(),
            pruned = run.pruned_classes().len(),
            skipped = run.skipped.len(),
            failures = run.failures.len(),
            "Document extraction finished"
        );
        run
    }

    fn instructions(&self) -> TierInstructions<'_> {
        TierInstructions::new(&self.schema, &self.config.system_prompt)
    }

    /// Look up the contract for one purpose
    fn contract(&self, class_name: &str, purpose: CallPurpose) -> Result<OutputContract, OracleFailure> {
        let contracts = self.contracts.contracts_for(class_name);
        let contract = contracts.and_then(|c| match purpose {
            CallPurpose::Mentions => c.mentions,
            CallPurpose::Attributes => c.attributes,
            CallPurpose::Relations => c.relations,
        });
        contract.ok_or_else(|| OracleFailure::MissingContract(class_name.to_string()))
    }

    /// One oracle call with retry; the instruction is recorded either way
    async fn call(
        &self,
        document: &Document,
        class_name: &str,
        purpose: CallPurpose,
        instruction: Instruction,
        contract: OutputContract,
        run: &mut DocumentRun,
    ) -> Result<Value, OracleFailure> {
        run.prompts.push(PromptRecord {
            class_name: class_name.to_string(),
            purpose,
            instruction: instruction.clone(),
        });

        let request = OracleRequest {
            class_name: class_name.to_string(),
            system: instruction.system,
            instruction: instruction.instruction,
            text: document.text.clone(),
            contract,
        };

        debug!(document = %document.id, class = class_name, purpose = ?purpose, "Calling oracle");
        self.retry
            .retry(class_name, || self.oracle.extract(&request))
            .await
    }

    fn record_failure(
        document: &Document,
        run: &mut DocumentRun,
        class_name: &str,
        tier: TierKind,
        purpose: CallPurpose,
        failure: OracleFailure,
    ) {
        warn!(
            document = %document.id,
            class = class_name,
            tier = %tier,
            error = %failure,
            "Oracle failure, recording empty result"
        );
        run.failures.push(ClassFailure {
            class_name: class_name.to_string(),
            tier,
            purpose,
            error: failure.to_string(),
        });
    }

    async fn independent_tier(&self, graph: &ClassGraph, document: &Document, run: &mut DocumentRun) {
        let plan = classify(graph);
        let mut tier = ResultMap::new();

        for class in &plan.independent {
            let mut result = ExtractionResult::empty(class.as_str(), TierKind::Independent);
            result.identifier = self.schema.identifier_of(class);

            let outcome = match self.contract(class, CallPurpose::Mentions) {
                Ok(contract) => {
                    let instruction = self.instructions().independent(class);
                    self.call(document, class, CallPurpose::Mentions, instruction, contract.clone(), run)
                        .await
                        .and_then(|value| contract.parse_mentions(&value))
                }
                Err(failure) => Err(failure),
            };

            match outcome {
                Ok(mentions) => result.extend_instances(mentions),
                Err(failure) => Self::record_failure(
                    document,
                    run,
                    class,
                    TierKind::Independent,
                    CallPurpose::Mentions,
                    failure,
                ),
            }

            debug!(document = %document.id, class = %class, instances = result.instances.len(), "Class extracted");
            tier.insert(class.clone(), result);
        }

        run.results.extend(tier);
    }

    async fn specialization_tier(
        &self,
        graph: &ClassGraph,
        document: &Document,
        run: &mut DocumentRun,
    ) {
        let plan = classify(graph);
        let mut tier = ResultMap::new();
        let mut pending: Vec<(&String, &String)> = plan.specializations.iter().collect();

        // Chained specializations run after their parent within the tier
        while !pending.is_empty() {
            let waiting: BTreeSet<&str> = pending.iter().map(|&(c, _)| c.as_str()).collect();
            let (mut ready, rest): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|(_, parent)| !waiting.contains(parent.as_str()));
            if ready.is_empty() {
                ready = rest;
                pending = Vec::new();
            } else {
                pending = rest;
            }

            for (class, parent) in ready {
                let view = if tier.contains_key(parent) {
                    &tier
                } else {
                    &run.results
                };
                if let Some(missing) = check_parent(class, parent, view) {
                    info!(document = %document.id, class = %class, parent = %parent, "Parent has no instances, skipping");
                    run.skipped.push(missing);
                    continue;
                }
                let parent_instances = view
                    .get(parent)
                    .map(|r| r.instances.clone())
                    .unwrap_or_default();

                let result = self
                    .specialization(document, class, parent, &parent_instances, run)
                    .await;
                tier.insert(class.clone(), result);
            }
        }

        run.results.extend(tier);
    }

    async fn specialization(
        &self,
        document: &Document,
        class: &str,
        parent: &str,
        parent_instances: &[String],
        run: &mut DocumentRun,
    ) -> ExtractionResult {
        let mut result = ExtractionResult::empty(class, TierKind::Specialization);

        let contract = match self.contract(class, CallPurpose::Mentions) {
            Ok(contract) => contract,
            Err(failure) => {
                Self::record_failure(document, run, class, TierKind::Specialization, CallPurpose::Mentions, failure);
                return result;
            }
        };
        let identifier = contract.root_field.clone();
        result.identifier = Some(identifier.clone());

        let instruction = self
            .instructions()
            .specialization(class, parent, &identifier, parent_instances);
        let mentions = self
            .call(document, class, CallPurpose::Mentions, instruction, contract.clone(), run)
            .await
            .and_then(|value| contract.parse_mentions(&value));
        match mentions {
            Ok(mentions) => result.extend_instances(mentions),
            Err(failure) => {
                Self::record_failure(document, run, class, TierKind::Specialization, CallPurpose::Mentions, failure);
                return result;
            }
        }

        if !result.has_instances() {
            return result;
        }

        // Attribute records are optional; a class without the contract keeps its instances
        let Ok(contract) = self.contract(class, CallPurpose::Attributes) else {
            return result;
        };
        let instruction = self
            .instructions()
            .attributes(class, parent, &identifier, &result.instances);
        let records = self
            .call(document, class, CallPurpose::Attributes, instruction, contract.clone(), run)
            .await
            .and_then(|value| contract.parse_records(&value));
        match records {
            Ok(records) => result.attributes = records,
            Err(failure) => Self::record_failure(
                document,
                run,
                class,
                TierKind::Specialization,
                CallPurpose::Attributes,
                failure,
            ),
        }

        debug!(document = %document.id, class, instances = result.instances.len(), "Class extracted");
        result
    }

    async fn relationship_tier(&self, graph: &ClassGraph, document: &Document, run: &mut DocumentRun) {
        let plan = classify(graph);
        let mut tier = ResultMap::new();

        for (class, [subject, object]) in &plan.relationships {
            let instances = |name: &str| {
                run.results
                    .get(name)
                    .map(|r| r.instances.clone())
                    .unwrap_or_default()
            };
            let subject_instances = instances(subject.as_str());
            let object_instances = instances(object.as_str());

            let mut result = ExtractionResult::empty(class.as_str(), TierKind::Relationship);
            let outcome = match self.contract(class, CallPurpose::Relations) {
                Ok(contract) => {
                    let instruction = self.instructions().relationship(
                        class,
                        subject,
                        object,
                        &subject_instances,
                        &object_instances,
                    );
                    self.call(document, class, CallPurpose::Relations, instruction, contract.clone(), run)
                        .await
                        .and_then(|value| contract.parse_records(&value))
                        .and_then(|records| relation_records(&contract, records))
                }
                Err(failure) => Err(failure),
            };

            match outcome {
                Ok(relations) => result.relations = relations,
                Err(failure) => Self::record_failure(
                    document,
                    run,
                    class,
                    TierKind::Relationship,
                    CallPurpose::Relations,
                    failure,
                ),
            }

            debug!(document = %document.id, class = %class, relations = result.relations.len(), "Class extracted");
            tier.insert(class.clone(), result);
        }

        run.results.extend(tier);
    }
}

/// Convert checked records into relation records; a non-string endpoint
/// violates the contract
fn relation_records(
    contract: &OutputContract,
    records: Vec<serde_json::Map<String, Value>>,
) -> Result<Vec<RelationRecord>, OracleFailure> {
    records
        .into_iter()
        .map(|record| {
            RelationRecord::from_record(record).ok_or_else(|| {
                OracleFailure::ContractViolation(format!(
                    "{}: subject, predicate and object must be strings",
                    contract.name
                ))
            })
        })
        .collect()
}

/// Per-class instance counts of a run, for summaries
pub fn instance_counts(run: &DocumentRun) -> BTreeMap<&str, usize> {
    run.results
        .iter()
        .map(|(class, result)| {
            let count = result.instances.len() + result.relations.len();
            (class.as_str(), count)
        })
        .collect()
}
