//! Run policies and pre-flight checks.
//!
//! A [`RunPolicy`] is the gate an entry point applies before handing a
//! workflow to the interpreter. Failing it is a [`Refusal`]: nothing runs and
//! nothing is written. [`validate_workflow`] is the stricter offline check
//! behind `geoetl check`.

use super::step::{EPSG_RANGE, Step, StepKind, StepRole};
use super::workflow::Workflow;
use std::fmt;

/// Constraint on the kind of the first or last step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindRule {
    Any,
    Role(StepRole),
    Exactly(StepKind),
}

impl KindRule {
    fn matches(self, kind: Option<StepKind>) -> bool {
        match self {
            Self::Any => true,
            Self::Role(role) => kind.is_some_and(|k| k.role() == role),
            Self::Exactly(expected) => kind == Some(expected),
        }
    }

    fn describe(self) -> String {
        match self {
            Self::Any => "any step".to_owned(),
            Self::Role(StepRole::Source) => "a source step".to_owned(),
            Self::Role(StepRole::Transform) => "a transform step".to_owned(),
            Self::Role(StepRole::Sink) => "a sink step".to_owned(),
            Self::Exactly(kind) => kind.display_name().to_owned(),
        }
    }
}

/// The pipeline was not run because it does not satisfy the policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal {
    pub message: String,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Refusal {}

/// Shape a workflow must have before it is run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPolicy {
    pub allow_empty: bool,
    pub first: KindRule,
    pub last: KindRule,
}

impl RunPolicy {
    /// The editor's gate: a CSV source first and a CSV sink last.
    pub fn interactive() -> Self {
        Self {
            allow_empty: false,
            first: KindRule::Exactly(StepKind::CsvSource),
            last: KindRule::Exactly(StepKind::CsvSink),
        }
    }

    /// Batch runs attempt anything; the interpreter reports what fails.
    pub fn headless() -> Self {
        Self {
            allow_empty: true,
            first: KindRule::Any,
            last: KindRule::Any,
        }
    }

    /// Any source first and any sink last.
    pub fn source_to_sink() -> Self {
        Self {
            allow_empty: false,
            first: KindRule::Role(StepRole::Source),
            last: KindRule::Role(StepRole::Sink),
        }
    }

    fn refusal_message(&self) -> String {
        format!(
            "Pipeline must start with {} and end with {}.",
            self.first.describe(),
            self.last.describe()
        )
    }

    /// Check a workflow against the policy.
    ///
    /// Only the `type` of the first and last record is inspected; records
    /// with an unknown type never satisfy a rule other than [`KindRule::Any`].
    ///
    /// # Errors
    ///
    /// Returns a [`Refusal`] naming the expected first and last steps.
    pub fn check(&self, workflow: &Workflow) -> Result<(), Refusal> {
        if workflow.is_empty() {
            return if self.allow_empty {
                Ok(())
            } else {
                Err(Refusal {
                    message: self.refusal_message(),
                })
            };
        }

        let first = workflow.first_kind().and_then(Result::ok);
        let last = workflow.last_kind().and_then(Result::ok);
        if self.first.matches(first) && self.last.matches(last) {
            Ok(())
        } else {
            Err(Refusal {
                message: self.refusal_message(),
            })
        }
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Problem found by [`validate_workflow`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub step_index: Option<usize>,
    pub message: String,
}

impl ValidationError {
    fn step(step_index: usize, message: impl Into<String>) -> Self {
        Self {
            step_index: Some(step_index),
            message: message.into(),
        }
    }

    fn workflow(message: impl Into<String>) -> Self {
        Self {
            step_index: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(idx) = self.step_index {
            write!(f, "Step {}: {}", idx + 1, self.message)
        } else {
            write!(f, "Workflow: {}", self.message)
        }
    }
}

/// Validate a workflow without touching any data.
///
/// Applies the policy, decodes every record, and simulates the dataset
/// binding so that a transform or sink ahead of every source is reported.
pub fn validate_workflow(workflow: &Workflow, policy: &RunPolicy) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Err(refusal) = policy.check(workflow) {
        errors.push(ValidationError::workflow(refusal.message));
    }

    let mut bound = false;
    for (idx, record) in workflow.records().iter().enumerate() {
        match Step::decode(record) {
            Ok(step) => {
                if let Some(code) = step.epsg_out_of_range() {
                    errors.push(ValidationError::step(
                        idx,
                        format!(
                            "EPSG code {code} is outside {}..={}",
                            EPSG_RANGE.start(),
                            EPSG_RANGE.end()
                        ),
                    ));
                }
                match step.role() {
                    StepRole::Source => bound = true,
                    StepRole::Transform | StepRole::Sink if !bound => {
                        errors.push(ValidationError::step(
                            idx,
                            format!("{} runs before any source step", step.kind().display_name()),
                        ));
                    }
                    StepRole::Transform | StepRole::Sink => {}
                }
            }
            Err(e) => errors.push(ValidationError::step(idx, e.to_string())),
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::step::StepRecord;

    fn csv_pipeline() -> Workflow {
        Workflow::from_steps([
            Step::CsvSource {
                path: "a.csv".to_owned(),
            },
            Step::Filter {
                expr: "val > 10".to_owned(),
            },
            Step::CsvSink {
                path: "b.csv".to_owned(),
            },
        ])
    }

    const REFUSAL: &str = "Pipeline must start with CSV Source and end with CSV Sink.";

    #[test]
    fn test_interactive_refusals() {
        let policy = RunPolicy::interactive();
        assert!(policy.check(&csv_pipeline()).is_ok());

        let empty = Workflow::new();
        assert_eq!(policy.check(&empty).unwrap_err().message, REFUSAL);

        let wrong_first = Workflow::from_steps([
            Step::ParquetSource {
                path: "a.parquet".to_owned(),
            },
            Step::CsvSink {
                path: "b.csv".to_owned(),
            },
        ]);
        assert_eq!(policy.check(&wrong_first).unwrap_err().message, REFUSAL);

        let wrong_last = Workflow::from_steps([
            Step::CsvSource {
                path: "a.csv".to_owned(),
            },
            Step::ParquetSink {
                path: "b.parquet".to_owned(),
            },
        ]);
        assert_eq!(policy.check(&wrong_last).unwrap_err().message, REFUSAL);
    }

    #[test]
    fn test_headless_accepts_anything() {
        let policy = RunPolicy::headless();
        assert!(policy.check(&Workflow::new()).is_ok());

        let mut unknown = StepRecord::default();
        unknown
            .0
            .insert("type".to_owned(), serde_json::json!("unknown_step"));
        assert!(policy.check(&Workflow::from_records(vec![unknown])).is_ok());
    }

    #[test]
    fn test_source_to_sink() {
        let policy = RunPolicy::source_to_sink();
        let wf = Workflow::from_steps([
            Step::ParquetSource {
                path: "a.parquet".to_owned(),
            },
            Step::Reproject { epsg: 3857 },
            Step::CloudSink {
                url: "s3://bucket/out.parquet".to_owned(),
            },
        ]);
        assert!(policy.check(&wf).is_ok());

        let err = policy.check(&Workflow::new()).unwrap_err();
        assert_eq!(
            err.message,
            "Pipeline must start with a source step and end with a sink step."
        );
    }

    #[test]
    fn test_validate_workflow() {
        assert!(validate_workflow(&csv_pipeline(), &RunPolicy::interactive()).is_empty());

        let wf = Workflow::from_json(
            r#"[
                {"type": "filter", "expr": "a > 1"},
                {"type": "csv_source", "path": "a.csv"},
                {"type": "reproject"},
                {"type": "csv_sink", "path": "b.csv"}
            ]"#,
        )
        .expect("load");
        let errors = validate_workflow(&wf, &RunPolicy::headless());
        let rendered: Vec<String> = errors.iter().map(ToString::to_string).collect();
        assert_eq!(errors.len(), 2, "{rendered:?}");
        assert_eq!(rendered[0], "Step 1: Filter runs before any source step");
        assert!(rendered[1].starts_with("Step 3:"), "{rendered:?}");
        assert!(rendered[1].contains("'epsg'"), "{rendered:?}");

        let errors = validate_workflow(&wf, &RunPolicy::interactive());
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].step_index, None);
    }

    #[test]
    fn test_validate_reports_epsg_out_of_range() {
        let wf = Workflow::from_steps([
            Step::CsvSource {
                path: "a.csv".to_owned(),
            },
            Step::Reproject { epsg: 900 },
        ]);
        let errors = validate_workflow(&wf, &RunPolicy::headless());
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "Step 2: EPSG code 900 is outside 1000..=999999"
        );
    }
}
