//! Span grounding
//!
//! Maps extracted mention strings back to character offsets inside named
//! segments of the source text (`title:` / `abstract:` by default).
//! Matching is literal and case-sensitive; offsets count characters, not
//! bytes, and `end_idx` is inclusive.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::warn;

use schemex_core::{GroundingConfig, GroundingPolicy, ResultMap, SpanAnnotation, UnresolvedSpan};

/// Segment id used when the text carries none of the markers
pub const WHOLE_TEXT: &str = "text";

/// A named slice of the source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub text: String,
}

/// Split text into segments by `<marker>:` prefixes.
///
/// A marker counts only at the start of a line. Segments come back in
/// marker order, which is also the search priority. Each segment runs to
/// the next marker found later in the text and is trimmed of whitespace
/// and surrounding quotes.
pub fn split_segments(text: &str, markers: &[String]) -> Vec<Segment> {
    let mut found: Vec<(&str, usize, usize)> = markers
        .iter()
        .filter_map(|marker| {
            let tag = format!("{marker}:");
            line_start_position(text, &tag).map(|pos| (marker.as_str(), pos, pos + tag.len()))
        })
        .collect();

    if found.is_empty() {
        return vec![Segment {
            id: WHOLE_TEXT.to_string(),
            text: clean(text),
        }];
    }

    found.sort_by_key(|(_, pos, _)| *pos);
    let mut by_marker: HashMap<&str, String> = HashMap::new();
    for (i, (marker, _, body_start)) in found.iter().enumerate() {
        let body_end = found
            .get(i + 1)
            .map(|(_, next, _)| *next)
            .unwrap_or(text.len())
            .max(*body_start);
        by_marker.insert(*marker, clean(&text[*body_start..body_end]));
    }

    markers
        .iter()
        .filter_map(|marker| {
            by_marker.remove(marker.as_str()).map(|text| Segment {
                id: marker.clone(),
                text,
            })
        })
        .collect()
}

/// First occurrence of `tag` that begins a line, ignoring indentation
fn line_start_position(text: &str, tag: &str) -> Option<usize> {
    text.match_indices(tag).map(|(pos, _)| pos).find(|&pos| {
        let before = text[..pos].trim_end_matches([' ', '\t']);
        before.is_empty() || before.ends_with('\n')
    })
}

fn clean(text: &str) -> String {
    text.trim().trim_matches('"').trim().to_string()
}

/// Non-overlapping character offsets of `needle` in `haystack`
fn char_occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    haystack
        .match_indices(needle)
        .map(|(byte, _)| haystack[..byte].chars().count())
        .collect()
}

/// Grounding result for one document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundedDocument {
    pub entities: Vec<SpanAnnotation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<UnresolvedSpan>,
}

/// Span output entry, `{"entities": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpans {
    pub entities: Vec<SpanAnnotation>,
}

/// Span output keyed by document id
pub type SpanOutput = BTreeMap<String, EntitySpans>;

/// Grounds mentions under a single run-wide policy
#[derive(Debug, Clone)]
pub struct SpanGrounder {
    policy: GroundingPolicy,
    markers: Vec<String>,
    labels: BTreeMap<String, String>,
}

impl SpanGrounder {
    pub fn new(policy: GroundingPolicy) -> Self {
        Self::from(&GroundingConfig {
            policy,
            ..Default::default()
        })
    }

    pub fn policy(&self) -> GroundingPolicy {
        self.policy
    }

    /// Output label for a class, falling back to the class name
    pub fn label_for<'a>(&'a self, class_name: &'a str) -> &'a str {
        self.labels
            .get(class_name)
            .map(String::as_str)
            .unwrap_or(class_name)
    }

    /// Split raw text with the configured markers and ground against it
    pub fn ground_text(&self, results: &ResultMap, text: &str) -> GroundedDocument {
        self.ground(results, &split_segments(text, &self.markers))
    }

    /// Ground every instance of every class
    pub fn ground(&self, results: &ResultMap, segments: &[Segment]) -> GroundedDocument {
        let mut grounded = GroundedDocument::default();
        // Remaining occurrences per mention and segment, shared across classes
        let mut remaining: HashMap<&str, Vec<VecDeque<usize>>> = HashMap::new();

        for (class_name, result) in results {
            let label = self.label_for(class_name);

            for mention in &result.instances {
                let before = grounded.entities.len();

                match self.policy {
                    GroundingPolicy::AllOccurrences => {
                        for segment in segments {
                            for start in char_occurrences(&segment.text, mention) {
                                grounded
                                    .entities
                                    .push(annotation(start, mention, segment, label));
                            }
                        }
                    }
                    GroundingPolicy::FirstOccurrenceConsumed => {
                        let queues = remaining.entry(mention.as_str()).or_insert_with(|| {
                            segments
                                .iter()
                                .map(|s| char_occurrences(&s.text, mention).into())
                                .collect()
                        });
                        let hit = queues
                            .iter_mut()
                            .zip(segments)
                            .find_map(|(queue, segment)| queue.pop_front().map(|s| (s, segment)));
                        if let Some((start, segment)) = hit {
                            grounded
                                .entities
                                .push(annotation(start, mention, segment, label));
                        }
                    }
                }

                if grounded.entities.len() == before {
                    warn!(class = %class_name, mention = %mention, "Could not find span");
                    grounded.unresolved.push(UnresolvedSpan {
                        class_name: class_name.clone(),
                        mention: mention.clone(),
                    });
                }
            }
        }

        grounded
    }
}

fn annotation(start: usize, mention: &str, segment: &Segment, label: &str) -> SpanAnnotation {
    SpanAnnotation {
        start_idx: start,
        end_idx: start + mention.chars().count() - 1,
        location: segment.id.clone(),
        text_span: mention.to_string(),
        label: label.to_string(),
    }
}

impl From<&GroundingConfig> for SpanGrounder {
    fn from(config: &GroundingConfig) -> Self {
        Self {
            policy: config.policy,
            markers: config.segments.clone(),
            labels: config.labels.clone(),
        }
    }
}

impl Default for SpanGrounder {
    fn default() -> Self {
        Self::from(&GroundingConfig::default())
    }
}

/// Assemble `{doc_id: {"entities": [...]}}`
pub fn span_output<'a, I>(documents: I) -> SpanOutput
where
    I: IntoIterator<Item = (&'a str, &'a GroundedDocument)>,
{
    documents
        .into_iter()
        .map(|(id, doc)| {
            (
                id.to_string(),
                EntitySpans {
                    entities: doc.entities.clone(),
                },
            )
        })
        .collect()
}
