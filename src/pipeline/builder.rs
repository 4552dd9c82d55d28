//! Editor model for assembling workflows.
//!
//! Steps can only be appended one at a time, or replaced wholesale by
//! loading a file. Each step gets a display label for the step list.

use super::job::{InteractiveRunner, JobHandle};
use super::policy::{Refusal, RunPolicy};
use super::step::{EPSG_RANGE, Step, StepRecord, StepRole};
use super::workflow::Workflow;
use crate::error::Result;
use std::fmt;
use std::path::Path;

/// Reason an append was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderWarning {
    /// A transform was added to an empty workflow
    NeedsSource,
    /// A sink was added to an empty workflow
    NeedsSteps,
    /// A reproject target outside [`EPSG_RANGE`]
    EpsgOutOfRange(u32),
}

impl fmt::Display for BuilderWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NeedsSource => f.write_str("Add a source first."),
            Self::NeedsSteps => f.write_str("Add steps first."),
            Self::EpsgOutOfRange(code) => write!(
                f,
                "EPSG code {code} is outside {}..={}.",
                EPSG_RANGE.start(),
                EPSG_RANGE.end()
            ),
        }
    }
}

impl std::error::Error for BuilderWarning {}

/// Label for any record, decodable or not
pub fn record_label(record: &StepRecord) -> String {
    match Step::decode(record) {
        Ok(step) => step.label(),
        Err(_) => format!("{} (invalid)", record.kind_str().unwrap_or("<missing type>")),
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowBuilder {
    workflow: Workflow,
    labels: Vec<String>,
}

impl WorkflowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.workflow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflow.is_empty()
    }

    /// Append a step.
    ///
    /// # Errors
    ///
    /// Transforms and sinks are rejected while the workflow is empty, and
    /// reprojects to a code outside [`EPSG_RANGE`] are always rejected.
    pub fn append(&mut self, step: Step) -> std::result::Result<(), BuilderWarning> {
        if let Some(code) = step.epsg_out_of_range() {
            return Err(BuilderWarning::EpsgOutOfRange(code));
        }
        if self.workflow.is_empty() {
            match step.role() {
                StepRole::Source => {}
                StepRole::Transform => return Err(BuilderWarning::NeedsSource),
                StepRole::Sink => return Err(BuilderWarning::NeedsSteps),
            }
        }
        self.labels.push(step.label());
        self.workflow.push(step);
        Ok(())
    }

    /// Replace the current steps with the workflow stored at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed; the current steps are
    /// kept in that case.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let workflow = Workflow::load(path)?;
        self.labels = workflow.records().iter().map(record_label).collect();
        self.workflow = workflow;
        Ok(())
    }

    /// Write the current steps to `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.workflow.save(path)
    }

    /// Whether the current steps satisfy `policy`.
    ///
    /// # Errors
    ///
    /// Returns the policy's [`Refusal`].
    pub fn can_run(&self, policy: &RunPolicy) -> std::result::Result<(), Refusal> {
        policy.check(&self.workflow)
    }

    /// Submit the current steps through `runner`.
    ///
    /// # Errors
    ///
    /// Returns the runner's [`Refusal`] if its policy is not met.
    pub fn run(&self, runner: &InteractiveRunner) -> std::result::Result<JobHandle, Refusal> {
        runner.submit(&self.workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Step {
        Step::CsvSource {
            path: "/data/parcels.csv".to_owned(),
        }
    }

    #[test]
    fn test_append_guards() {
        let mut builder = WorkflowBuilder::new();
        assert_eq!(
            builder.append(Step::Reproject { epsg: 4326 }),
            Err(BuilderWarning::NeedsSource)
        );
        assert_eq!(
            builder
                .append(Step::CsvSink {
                    path: "out.csv".to_owned()
                })
                .map_err(|w| w.to_string()),
            Err("Add steps first.".to_owned())
        );
        assert!(builder.is_empty());

        builder.append(source()).expect("source");
        builder.append(Step::Reproject { epsg: 3857 }).expect("transform");
        builder
            .append(Step::CsvSink {
                path: "/tmp/out.csv".to_owned(),
            })
            .expect("sink");
        assert_eq!(
            builder.labels(),
            [
                "CSV Source: parcels.csv",
                "Reproject → EPSG:3857",
                "CSV Sink: out.csv"
            ]
        );
        assert!(builder.can_run(&RunPolicy::interactive()).is_ok());
    }

    #[test]
    fn test_append_rejects_epsg_out_of_range() {
        let mut builder = WorkflowBuilder::new();
        builder.append(source()).expect("source");
        let warning = builder.append(Step::Reproject { epsg: 900 }).unwrap_err();
        assert_eq!(warning, BuilderWarning::EpsgOutOfRange(900));
        assert_eq!(warning.to_string(), "EPSG code 900 is outside 1000..=999999.");
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("workflow.json");

        let mut builder = WorkflowBuilder::new();
        builder.append(source()).expect("source");
        builder
            .append(Step::Join {
                path: "lookup.parquet".to_owned(),
                left: "id".to_owned(),
                right: "parcel_id".to_owned(),
            })
            .expect("join");
        builder.save(&path).expect("save");

        let mut loaded = WorkflowBuilder::new();
        loaded.load(&path).expect("load");
        assert_eq!(loaded.workflow(), builder.workflow());
        assert_eq!(loaded.labels(), builder.labels());
    }

    #[test]
    fn test_failed_load_keeps_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").expect("write");

        let mut builder = WorkflowBuilder::new();
        builder.append(source()).expect("source");

        assert!(builder.load(&bad).is_err());
        assert!(builder.load(dir.path().join("missing.json")).is_err());
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.labels(), ["CSV Source: parcels.csv"]);
    }

    #[test]
    fn test_labels_for_invalid_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("workflow.json");
        std::fs::write(
            &path,
            r#"[{"type": "unknown_step"}, {"type": "filter"}, {"path": "x"}]"#,
        )
        .expect("write");

        let mut builder = WorkflowBuilder::new();
        builder.load(&path).expect("lax load");
        assert_eq!(
            builder.labels(),
            [
                "unknown_step (invalid)",
                "filter (invalid)",
                "<missing type> (invalid)"
            ]
        );
        assert!(builder.can_run(&RunPolicy::interactive()).is_err());
    }
}
