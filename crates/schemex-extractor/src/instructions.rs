//! Instruction building for oracle calls
//!
//! Every call carries a system message (identity plus annotation rules) and
//! a task instruction (schema context plus upstream instances).

use serde::{Deserialize, Serialize};

use schemex_core::schema::{OBJECT, PREDICATE, SUBJECT};
use schemex_core::Schema;

const BASE_RULES: &[&str] = &[
    "Annotate only mentions explicitly written in the text, copied exactly as they appear.",
    "Use the longest meaningful mention and do not annotate generic terms alone.",
    "Include both full forms and abbreviations when both are present.",
    "Do not add entities that are merely associated with the text but not written in it.",
    "Return an empty list when nothing in the text matches.",
];

/// System message plus task instruction for one call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub system: String,
    pub instruction: String,
}

/// Builder for structured instructions
#[derive(Debug, Clone, Default)]
pub struct InstructionBuilder {
    identity: String,
    rules: Vec<String>,
    schema_sections: Vec<String>,
    context_sections: Vec<String>,
}

impl InstructionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the identity line of the system message
    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Add an annotation rule
    pub fn add_rule(mut self, rule: impl Into<String>) -> Self {
        self.rules.push(rule.into());
        self
    }

    /// Add a schema section to the task
    pub fn add_schema(mut self, section: impl Into<String>) -> Self {
        self.schema_sections.push(section.into());
        self
    }

    /// Add a context section (upstream instances)
    pub fn add_context(mut self, section: impl Into<String>) -> Self {
        self.context_sections.push(section.into());
        self
    }

    pub fn build(self) -> Instruction {
        let mut system = String::new();

        if !self.identity.is_empty() {
            system.push_str("# Identity\n\n");
            system.push_str(&self.identity);
            system.push_str("\n\n");
        }

        if !self.rules.is_empty() {
            system.push_str("# Instructions\n\n");
            for rule in &self.rules {
                system.push_str(&format!("* {rule}\n"));
            }
        }

        let mut instruction = String::new();

        if !self.schema_sections.is_empty() {
            instruction.push_str("# Schema\n\n");
            instruction.push_str(&self.schema_sections.join("\n\n"));
            instruction.push_str("\n\n");
        }

        if !self.context_sections.is_empty() {
            instruction.push_str("# Context\n\n");
            instruction.push_str(&self.context_sections.join("\n"));
            instruction.push('\n');
        }

        Instruction {
            system: system.trim_end().to_string(),
            instruction: instruction.trim_end().to_string(),
        }
    }
}

/// Per-tier instruction templates over one schema
#[derive(Debug, Clone, Copy)]
pub struct TierInstructions<'a> {
    schema: &'a Schema,
    identity: &'a str,
}

impl<'a> TierInstructions<'a> {
    pub fn new(schema: &'a Schema, identity: &'a str) -> Self {
        Self { schema, identity }
    }

    /// Builder preloaded with identity, base rules and the class's own rules
    fn builder(&self, class: &str) -> InstructionBuilder {
        let mut builder = InstructionBuilder::new().identity(self.identity);
        for rule in BASE_RULES {
            builder = builder.add_rule(*rule);
        }
        if let Some(rules) = self
            .schema
            .class(class)
            .and_then(|c| c.annotation("annotation_rules"))
        {
            builder = builder.add_rule(rules);
        }
        builder
    }

    fn definition(&self, class: &str) -> Option<String> {
        self.schema
            .class(class)
            .and_then(|c| c.description.as_deref())
            .map(|desc| format!("A '{class}' is defined as: {}.", desc.trim_end_matches('.')))
    }

    fn examples(&self, class: &str) -> Option<String> {
        self.schema
            .class(class)
            .and_then(|c| c.annotation("prompt.examples"))
            .map(|examples| format!("Examples:\n{examples}"))
    }

    fn with_intro(&self, sentence: String) -> String {
        match self.schema.intro() {
            Some(intro) => format!("{intro} {sentence}"),
            None => sentence,
        }
    }

    /// Mention extraction for an independent class
    pub fn independent(&self, class: &str) -> Instruction {
        let mut task = format!(
            "Extract all mentions of entities of class '{class}' that are explicitly mentioned in the provided text."
        );
        if let Some(definition) = self.definition(class) {
            task.push(' ');
            task.push_str(&definition);
        }
        task.push_str(&format!(
            " Return a list of all entity mentions for the class {class}."
        ));

        let mut builder = self.builder(class).add_schema(self.with_intro(task));
        if let Some(examples) = self.examples(class) {
            builder = builder.add_schema(examples);
        }
        builder.build()
    }

    /// Instance extraction for a specialization, scoped by the parent's instances
    pub fn specialization(
        &self,
        class: &str,
        parent: &str,
        identifier: &str,
        parent_instances: &[String],
    ) -> Instruction {
        let mut task = format!(
            "Extract all instances of class '{class}' that are explicitly mentioned in the provided text."
        );
        if let Some(definition) = self.definition(class) {
            task.push(' ');
            task.push_str(&definition);
        }
        task.push_str(&format!(
            " Instances of this class are specializations of the parent class '{parent}'. \
             While all instances of '{class}' are derived from '{parent}', not all entities \
             of the parent class are necessarily members of the child class. \
             Return a list of all {identifier} values for the class {class}."
        ));

        let mut builder = self
            .builder(class)
            .add_schema(self.with_intro(task))
            .add_context(format!(
                "Instances of the parent class '{parent}': {}.",
                parent_instances.join(", ")
            ));
        if let Some(examples) = self.examples(class) {
            builder = builder.add_schema(examples);
        }
        builder.build()
    }

    /// Attribute extraction for the instances found for a specialization
    pub fn attributes(
        &self,
        class: &str,
        parent: &str,
        identifier: &str,
        instances: &[String],
    ) -> Instruction {
        let attributes: Vec<String> = self
            .schema
            .effective_attributes(class)
            .iter()
            .map(|(name, attr)| match attr.description.as_deref() {
                Some(desc) => format!("{name} ({desc})"),
                None => name.clone(),
            })
            .collect();

        let task = format!(
            "For each {identifier} identified as an instance of class '{class}', extract the \
             following attributes: {}. Include all inherited attributes from the parent class \
             '{parent}' and their respective values.",
            attributes.join(", ")
        );

        let mut builder = self.builder(class).add_schema(task);
        if !instances.is_empty() {
            builder = builder.add_context(format!(
                "The identifiers must match the entities identified in the previous step: {}.",
                instances.join(", ")
            ));
        }
        builder.build()
    }

    /// Relationship extraction between two endpoint instance lists
    pub fn relationship(
        &self,
        class: &str,
        subject: &str,
        object: &str,
        subject_instances: &[String],
        object_instances: &[String],
    ) -> Instruction {
        let predicates = self.schema.predicate_values(class);
        let definition = self.schema.class(class);

        let mut task = format!(
            "Your task is to extract relationships of class '{class}' between entities of class \
             '{subject}' and '{object}' that are explicitly mentioned in the provided text."
        );
        match predicates.as_slice() {
            [] => {}
            [single] => task.push_str(&format!(" The predicate is '{single}'.")),
            many => task.push_str(&format!(
                " The relationship can be described by one or more of the following predicate \
                 values: {}. Identify and extract only the predicates that are explicitly \
                 mentioned in the text.",
                many.join(", ")
            )),
        }
        if let Some(desc) = definition.and_then(|c| c.description.as_deref()) {
            task.push_str(&format!(
                " The relationship is described as follows: \"{desc}\"."
            ));
        }

        let mut builder = self.builder(class).add_schema(self.with_intro(task));
        for endpoint in [subject, object] {
            if let Some(definition) = self.definition(endpoint) {
                builder = builder.add_schema(definition);
            }
        }

        if let Some(constraints) = self.cardinality(class, subject, object) {
            builder = builder.add_schema(constraints);
        }

        let extra: Vec<String> = definition
            .map(|c| {
                c.attributes
                    .iter()
                    .filter(|(name, _)| ![SUBJECT, OBJECT, PREDICATE].contains(&name.as_str()))
                    .map(|(name, attr)| match attr.description.as_deref() {
                        Some(desc) => format!("{name} ({desc})"),
                        None => name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !extra.is_empty() {
            builder = builder.add_schema(format!(
                "Extract and include the following attributes for each relationship: {}.",
                extra.join(", ")
            ));
        }

        builder
            .add_context(format!(
                "Instances of class '{subject}': {}.",
                subject_instances.join(", ")
            ))
            .add_context(format!(
                "Instances of class '{object}': {}.",
                object_instances.join(", ")
            ))
            .add_context("Entities involved in these relationships must belong to these sets.")
            .build()
    }

    /// Cardinality sentences, only for endpoints declaring both bounds
    fn cardinality(&self, class: &str, subject: &str, object: &str) -> Option<String> {
        let attributes = &self.schema.class(class)?.attributes;
        let mut lines = Vec::new();

        if let Some(bounds) = attributes.get(SUBJECT).and_then(|a| a.cardinality()) {
            lines.push(format!(
                "- A '{object}' can be followed by a minimum of {} and a maximum of {} '{subject}'.",
                bounds.min, bounds.max
            ));
        }
        if let Some(bounds) = attributes.get(OBJECT).and_then(|a| a.cardinality()) {
            lines.push(format!(
                "- A '{subject}' can follow a minimum of {} and a maximum of {} '{object}'.",
                bounds.min, bounds.max
            ));
        }

        (!lines.is_empty()).then(|| format!("Cardinality constraints:\n{}", lines.join("\n")))
    }
}
