//! Headless workflow runs.
//!
//! Loads a workflow file and runs it synchronously, with no policy gate.
//! Progress lines go to a [`Feedback`] sink; on failure the interpreter's
//! message is returned as the terminal error.

use super::interpreter::{Interpreter, RunReport};
use super::workflow::Workflow;
use crate::error::{EtlError, Result};
use std::path::Path;

/// Receives human-readable progress lines
pub trait Feedback {
    fn push_info(&mut self, message: &str);
}

/// Forwards feedback to `tracing` at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFeedback;

impl Feedback for TracingFeedback {
    fn push_info(&mut self, message: &str) {
        tracing::info!("{message}");
    }
}

/// Collects feedback lines, mostly for tests and embedding
impl Feedback for Vec<String> {
    fn push_info(&mut self, message: &str) {
        self.push(message.to_owned());
    }
}

/// Load the workflow at `path` and run it to completion.
///
/// # Errors
///
/// Fails on an empty path, on a workflow file that cannot be loaded, or
/// with the error of the first failing step.
pub fn run_workflow_file(
    path: &Path,
    interpreter: &Interpreter,
    feedback: &mut dyn Feedback,
) -> Result<RunReport> {
    if path.as_os_str().is_empty() {
        return Err(EtlError::Workflow("No input workflow provided".to_owned()));
    }

    feedback.push_info(&format!("Loading workflow from {}", path.display()));
    let workflow = Workflow::load(path)?;
    let report = interpreter.run(workflow.records())?;
    feedback.push_info("Workflow finished successfully");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_path() {
        let mut lines = Vec::new();
        let err = run_workflow_file(Path::new(""), &Interpreter::default(), &mut lines)
            .unwrap_err();
        assert!(err.to_string().contains("No input workflow provided"));
        assert!(lines.is_empty());
    }

    #[test]
    fn test_feedback_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wf_path = dir.path().join("empty.json");
        std::fs::write(&wf_path, "[]").expect("write");

        let mut lines = Vec::new();
        run_workflow_file(&wf_path, &Interpreter::default(), &mut lines).expect("run");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("Loading workflow from {}", wf_path.display()));
        assert_eq!(lines[1], "Workflow finished successfully");
    }

    #[test]
    fn test_missing_file() {
        let mut lines = Vec::new();
        let err = run_workflow_file(
            Path::new("/nonexistent/workflow.json"),
            &Interpreter::default(),
            &mut lines,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Failed to read"), "{err}");
        assert_eq!(lines.len(), 1, "only the loading line");
    }
}
