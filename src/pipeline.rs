//! Workflow model and execution.
//!
//! A workflow is an ordered list of step records stored as a JSON array.
//! Steps run strictly in order against a single current dataset: a source
//! binds it, transforms replace it, sinks write it and leave it in place.
//!
//! # Step vocabulary
//!
//! - **Sources**: `csv_source`, `parquet_source`, `postgis_source`, `cloud_source`
//! - **Transforms**: `filter`, `reproject`, `join`
//! - **Sinks**: `csv_sink`, `parquet_sink`, `postgis_sink`, `cloud_sink`
//!
//! # Entry points
//!
//! - [`run_workflow_file`] loads a file and runs it synchronously with no gate.
//! - [`InteractiveRunner`] checks a [`RunPolicy`] and runs the workflow as a
//!   background [`PipelineJob`].
//! - [`WorkflowBuilder`] assembles workflows step by step for an editor.
//!
//! # Example
//!
//! ```no_run
//! use geoetl::pipeline::{Interpreter, Step, Workflow};
//!
//! let workflow = Workflow::from_steps([
//!     Step::CsvSource { path: "parcels.csv".to_owned() },
//!     Step::Filter { expr: "area > 100".to_owned() },
//!     Step::CsvSink { path: "large.csv".to_owned() },
//! ]);
//!
//! let report = Interpreter::default().run(workflow.records())?;
//! println!("{}", report.summary());
//! # Ok::<(), geoetl::error::EtlError>(())
//! ```

pub mod builder;
pub mod headless;
pub mod interpreter;
pub mod job;
pub mod policy;
pub mod step;
pub mod workflow;

pub use builder::{BuilderWarning, WorkflowBuilder, record_label};
pub use headless::{Feedback, TracingFeedback, run_workflow_file};
pub use interpreter::{
    DEFAULT_CONNECT_TIMEOUT, ExecutionContext, Interpreter, Outcome, RunOptions, RunReport,
};
pub use job::{Completion, InteractiveRunner, JobHandle, PipelineJob};
pub use policy::{KindRule, Refusal, RunPolicy, ValidationError, validate_workflow};
pub use step::{Step, StepKind, StepRecord, StepRole};
pub use workflow::Workflow;
