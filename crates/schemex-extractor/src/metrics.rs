//! Quality Metrics module
//!
//! Set-based evaluation of extraction results against gold annotations.
//! Entities are compared as normalized labels, relations as normalized
//! (subject, predicate, object) triples with predicted predicates exploded
//! on `|`. The aggregate pools the TP/FP/FN sets of all documents before
//! scoring.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use schemex_core::{normalize, RelationTriple, ResultMap};

// ============================================================================
// Scores
// ============================================================================

/// Precision, recall and F1
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
}

impl Scores {
    /// Round every score to `places` decimals
    pub fn rounded(self, places: i32) -> Self {
        let factor = 10f64.powi(places);
        let round = |x: f64| (x * factor).round() / factor;
        Self {
            precision: round(self.precision),
            recall: round(self.recall),
            f1_score: round(self.f1_score),
        }
    }
}

/// Scores from set sizes; every ratio with a zero denominator is 0
pub fn compute_metrics(tp: usize, fp: usize, fn_: usize) -> Scores {
    let ratio = |num: usize, den: usize| {
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    };
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1_score = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };

    Scores {
        precision,
        recall,
        f1_score,
    }
}

// ============================================================================
// Pass Metrics
// ============================================================================

/// TP/FP/FN sets of one evaluation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassMetrics<T: Ord> {
    pub true_positives: BTreeSet<T>,
    pub false_positives: BTreeSet<T>,
    pub false_negatives: BTreeSet<T>,
}

impl<T: Ord> Default for PassMetrics<T> {
    fn default() -> Self {
        Self {
            true_positives: BTreeSet::new(),
            false_positives: BTreeSet::new(),
            false_negatives: BTreeSet::new(),
        }
    }
}

impl<T: Ord + Clone> PassMetrics<T> {
    /// TP = P ∩ G, FP = P − G, FN = G − P
    pub fn compare(predicted: &BTreeSet<T>, gold: &BTreeSet<T>) -> Self {
        Self {
            true_positives: predicted.intersection(gold).cloned().collect(),
            false_positives: predicted.difference(gold).cloned().collect(),
            false_negatives: gold.difference(predicted).cloned().collect(),
        }
    }

    /// Pool another pass into this one (set union)
    pub fn merge(&mut self, other: &Self) {
        self.true_positives.extend(other.true_positives.iter().cloned());
        self.false_positives.extend(other.false_positives.iter().cloned());
        self.false_negatives.extend(other.false_negatives.iter().cloned());
    }

    pub fn scores(&self) -> Scores {
        compute_metrics(
            self.true_positives.len(),
            self.false_positives.len(),
            self.false_negatives.len(),
        )
    }

    /// Sets plus scores rounded to 3 decimals
    pub fn report(&self) -> PassReport<T> {
        PassReport {
            sets: self.clone(),
            scores: self.scores().rounded(3),
        }
    }
}

/// Serialized form of a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport<T: Ord> {
    #[serde(flatten)]
    pub sets: PassMetrics<T>,
    #[serde(flatten)]
    pub scores: Scores,
}

pub type EntityMetrics = PassMetrics<String>;
pub type RelationMetrics = PassMetrics<RelationTriple>;

// ============================================================================
// Gold Standard Types
// ============================================================================

/// A gold entity; only its label takes part in comparison
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Used when the record carries no `label`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_span: Option<String>,
}

impl GoldEntity {
    pub fn text(&self) -> Option<&str> {
        self.label.as_deref().or(self.text_span.as_deref())
    }
}

/// A gold relation record; absent fields read as empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldRelation {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub predicate: String,
    #[serde(default)]
    pub object: String,
}

/// Gold annotations of one document.
///
/// `entities` and `relations` accept flat record lists as well as lists of
/// `{type: [records]}` groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldDocument {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<String>,

    #[serde(default, deserialize_with = "deserialize_records")]
    pub entities: Vec<GoldEntity>,

    #[serde(default, deserialize_with = "deserialize_records")]
    pub relations: Vec<GoldRelation>,
}

impl GoldDocument {
    pub fn entity_set(&self) -> BTreeSet<String> {
        self.entities
            .iter()
            .filter_map(GoldEntity::text)
            .map(normalize)
            .filter(|label| !label.is_empty())
            .collect()
    }

    /// Gold predicates are not exploded
    pub fn relation_set(&self) -> BTreeSet<RelationTriple> {
        self.relations
            .iter()
            .map(|r| RelationTriple::new(&r.subject, &r.predicate, &r.object))
            .collect()
    }
}

/// Accept a string or numeric document id
pub fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn deserialize_records<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let items = Vec::<Value>::deserialize(deserializer)?;
    let mut records = Vec::new();

    for item in items {
        let is_group = item
            .as_object()
            .map(|map| !map.is_empty() && map.values().all(Value::is_array))
            .unwrap_or(false);

        if is_group {
            if let Value::Object(map) = item {
                for (_, group) in map {
                    if let Value::Array(entries) = group {
                        for entry in entries {
                            records.push(serde_json::from_value(entry).map_err(serde::de::Error::custom)?);
                        }
                    }
                }
            }
        } else {
            records.push(serde_json::from_value(item).map_err(serde::de::Error::custom)?);
        }
    }

    Ok(records)
}

// ============================================================================
// Evaluator
// ============================================================================

/// Predicted entity labels: instances plus identifier labels of attribute records
pub fn predicted_entities(results: &ResultMap) -> BTreeSet<String> {
    let mut entities = BTreeSet::new();
    for result in results.values() {
        entities.extend(result.instances.iter().map(|i| normalize(i)));
        entities.extend(result.attribute_labels().into_iter().map(normalize));
    }
    entities.remove("");
    entities
}

/// Predicted triples, one per predicate alternative
pub fn predicted_triples(results: &ResultMap) -> BTreeSet<RelationTriple> {
    results
        .values()
        .flat_map(|result| result.relations.iter().flat_map(|r| r.triples()))
        .collect()
}

/// Metrics of one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetrics {
    pub entities: EntityMetrics,
    pub relations: RelationMetrics,
}

impl DocumentMetrics {
    pub fn report(&self) -> DocumentReport {
        DocumentReport {
            entities: self.entities.report(),
            relations: self.relations.report(),
        }
    }
}

/// Serialized per-document metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentReport {
    pub entities: PassReport<String>,
    pub relations: PassReport<RelationTriple>,
}

/// Evaluator for extraction quality
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate_document(&self, results: &ResultMap, gold: &GoldDocument) -> DocumentMetrics {
        DocumentMetrics {
            entities: PassMetrics::compare(&predicted_entities(results), &gold.entity_set()),
            relations: PassMetrics::compare(&predicted_triples(results), &gold.relation_set()),
        }
    }
}

// ============================================================================
// Aggregate Metrics
// ============================================================================

/// Micro-averaged metrics pooled over documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub entities: EntityMetrics,
    pub relations: RelationMetrics,
    pub num_documents: usize,
}

/// Overall scores, rounded to 3 decimals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverallMetrics {
    pub entities: Scores,
    pub relations: Scores,
}

impl AggregateMetrics {
    pub fn add(&mut self, metrics: &DocumentMetrics) {
        self.entities.merge(&metrics.entities);
        self.relations.merge(&metrics.relations);
        self.num_documents += 1;
    }

    pub fn overall(&self) -> OverallMetrics {
        OverallMetrics {
            entities: self.entities.scores().rounded(3),
            relations: self.relations.scores().rounded(3),
        }
    }

    /// Print a summary report
    pub fn report(&self) -> String {
        let entities = self.entities.scores();
        let relations = self.relations.scores();
        format!(
            "=== Extraction Quality Report ===\n\n\
             Documents evaluated: {}\n\n\
             Entity Extraction:\n\
               Precision: {:.3}\n\
               Recall:    {:.3}\n\
               F1 Score:  {:.3}\n\
               TP: {} | FP: {} | FN: {}\n\n\
             Relation Extraction:\n\
               Precision: {:.3}\n\
               Recall:    {:.3}\n\
               F1 Score:  {:.3}\n\
               TP: {} | FP: {} | FN: {}\n",
            self.num_documents,
            entities.precision,
            entities.recall,
            entities.f1_score,
            self.entities.true_positives.len(),
            self.entities.false_positives.len(),
            self.entities.false_negatives.len(),
            relations.precision,
            relations.recall,
            relations.f1_score,
            self.relations.true_positives.len(),
            self.relations.false_positives.len(),
            self.relations.false_negatives.len(),
        )
    }
}

/// Full evaluation output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub documents: BTreeMap<String, DocumentReport>,
    pub overall: OverallMetrics,
}

// ============================================================================
// Tests
// ============================================================================
