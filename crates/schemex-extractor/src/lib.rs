//! Schemex Extractor - Schema-driven tiered extraction
//!
//! Turns a class schema into a dependency graph, extracts classes tier by
//! tier through an external oracle with cascading pruning, grounds the
//! extracted mentions back into source text and scores the results
//! against gold annotations.

pub mod contracts;
pub mod graph;
pub mod grounding;
pub mod instructions;
pub mod metrics;
pub mod orchestrator;
pub mod pruner;
pub mod retry;
pub mod tiers;

pub use contracts::{SchemaContracts, StaticContracts};
pub use graph::{ClassGraph, DependencyEntry, EdgeRole};
pub use grounding::{span_output, split_segments, GroundedDocument, Segment, SpanGrounder, SpanOutput};
pub use instructions::{Instruction, InstructionBuilder, TierInstructions};
pub use metrics::{
    compute_metrics, AggregateMetrics, DocumentMetrics, EvaluationReport, Evaluator, GoldDocument,
    PassMetrics, Scores,
};
pub use orchestrator::{Document, DocumentRun, Orchestrator, Stage};
pub use pruner::{apply_endpoint_policy, MissingEvidence, PruneEvent};
pub use retry::RetryPolicy;
pub use tiers::{classify, ClassTier, TierPlan};
