//! Workflow documents.
//!
//! A workflow file is a bare JSON array of step records: no envelope, no
//! version field. Loading never validates step contents, so a document
//! written by a newer editor (or by hand) always loads and only fails when
//! the offending step is executed.

use super::step::{Step, StepKind, StepRecord};
use crate::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered sequence of step records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workflow {
    records: Vec<StepRecord>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            records: steps.into_iter().map(StepRecord::from).collect(),
        }
    }

    pub fn from_records(records: Vec<StepRecord>) -> Self {
        Self { records }
    }

    /// Load a workflow from a JSON file
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a JSON array of objects.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EtlError::Workflow(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Parse a workflow from a JSON string
    ///
    /// # Errors
    ///
    /// Fails if the text is not a JSON array of objects.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| EtlError::Workflow(format!("Failed to parse workflow JSON: {e}")))
    }

    /// Save the workflow to a JSON file
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| {
            EtlError::Workflow(format!("Failed to write {}: {e}", path.display()))
        })
    }

    /// Serialize to pretty JSON (two-space indent)
    ///
    /// # Errors
    ///
    /// Fails only if a record holds a value JSON cannot represent.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Append a typed step
    pub fn push(&mut self, step: impl Into<StepRecord>) {
        self.records.push(step.into());
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_kind(&self) -> Option<Result<StepKind>> {
        self.records.first().map(StepRecord::kind)
    }

    pub fn last_kind(&self) -> Option<Result<StepKind>> {
        self.records.last().map(StepRecord::kind)
    }

    /// Decode every record up front.
    ///
    /// The interpreter decodes lazily, one step at a time; this is the eager
    /// alternative for callers that want malformed steps rejected before
    /// anything runs.
    ///
    /// # Errors
    ///
    /// Returns the first decode error, prefixed with its 1-based position.
    pub fn decode_all(&self) -> Result<Vec<Step>> {
        self.records
            .iter()
            .enumerate()
            .map(|(idx, record)| {
                Step::decode(record)
                    .map_err(|e| EtlError::Workflow(format!("Step {}: {e}", idx + 1)))
            })
            .collect()
    }
}

impl From<Vec<Step>> for Workflow {
    fn from(steps: Vec<Step>) -> Self {
        Self::from_steps(steps)
    }
}

impl<'a> IntoIterator for &'a Workflow {
    type Item = &'a StepRecord;
    type IntoIter = std::slice::Iter<'a, StepRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
