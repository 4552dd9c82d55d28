//! Background pipeline jobs.
//!
//! The interactive entry point never blocks its caller: the workflow is
//! checked against a [`RunPolicy`], then handed to a worker thread. The
//! caller keeps a [`JobHandle`] to poll or wait on, and may register a
//! callback that fires once with the job's [`Completion`].

use super::interpreter::{Interpreter, Outcome};
use super::policy::{Refusal, RunPolicy};
use super::step::StepRecord;
use super::workflow::Workflow;
use std::sync::mpsc::{Receiver, TryRecvError, channel};
use std::thread::JoinHandle;

/// How a background job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    Failed,
}

impl From<&Outcome> for Completion {
    fn from(outcome: &Outcome) -> Self {
        if outcome.success {
            Self::Completed
        } else {
            Self::Failed
        }
    }
}

/// Handle on a submitted job
#[derive(Debug)]
pub struct JobHandle {
    receiver: Option<Receiver<Outcome>>,
    thread: Option<JoinHandle<()>>,
    outcome: Option<Outcome>,
}

impl JobHandle {
    fn finished(outcome: Outcome) -> Self {
        Self {
            receiver: None,
            thread: None,
            outcome: Some(outcome),
        }
    }

    fn lost() -> Outcome {
        Outcome::failed("Pipeline job ended without reporting an outcome")
    }

    /// Block until the job ends.
    pub fn wait(mut self) -> Outcome {
        if let Some(outcome) = self.outcome.take() {
            return outcome;
        }
        let outcome = self
            .receiver
            .take()
            .and_then(|rx| rx.recv().ok())
            .unwrap_or_else(Self::lost);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("Pipeline job thread panicked after reporting");
        }
        outcome
    }

    /// The outcome, if the job has ended. Never blocks.
    pub fn try_outcome(&mut self) -> Option<&Outcome> {
        if self.outcome.is_none()
            && let Some(rx) = &self.receiver
        {
            match rx.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(TryRecvError::Disconnected) => self.outcome = Some(Self::lost()),
                Err(TryRecvError::Empty) => {}
            }
        }
        self.outcome.as_ref()
    }

    pub fn is_finished(&mut self) -> bool {
        self.try_outcome().is_some()
    }
}

/// A workflow snapshot ready to run on a worker thread
#[derive(Debug, Clone)]
pub struct PipelineJob {
    records: Vec<StepRecord>,
    interpreter: Interpreter,
}

impl PipelineJob {
    /// Snapshot `workflow`; later edits to it do not affect the job.
    pub fn new(workflow: &Workflow, interpreter: Interpreter) -> Self {
        Self {
            records: workflow.records().to_vec(),
            interpreter,
        }
    }

    pub fn submit(self) -> JobHandle {
        self.submit_with_callback(|_, _| {})
    }

    /// Start the job. `on_complete` runs on the worker thread once the
    /// interpreter returns.
    ///
    /// If the worker thread cannot be started the handle is returned already
    /// failed and `on_complete` is not called.
    pub fn submit_with_callback<F>(self, on_complete: F) -> JobHandle
    where
        F: FnOnce(Completion, &Outcome) + Send + 'static,
    {
        let (tx, rx) = channel();
        let Self {
            records,
            interpreter,
        } = self;

        let spawned = std::thread::Builder::new()
            .name("geoetl-job".to_owned())
            .spawn(move || {
                tracing::info!("Pipeline job started ({} steps)", records.len());
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    interpreter.execute(&records)
                }))
                .unwrap_or_else(|_panic| Outcome::failed("Pipeline job panicked"));

                match &outcome.error {
                    None => tracing::info!("Pipeline job completed"),
                    Some(err) => tracing::error!("Pipeline job failed: {err}"),
                }
                on_complete(Completion::from(&outcome), &outcome);
                if tx.send(outcome).is_err() {
                    tracing::debug!("Job handle dropped before completion");
                }
            });

        match spawned {
            Ok(thread) => JobHandle {
                receiver: Some(rx),
                thread: Some(thread),
                outcome: None,
            },
            Err(e) => {
                tracing::error!("Failed to spawn pipeline job thread: {e}");
                JobHandle::finished(Outcome::failed(format!(
                    "Failed to spawn pipeline job thread: {e}"
                )))
            }
        }
    }
}

/// The editor's run action: policy gate, then background submission
#[derive(Debug, Clone, Default)]
pub struct InteractiveRunner {
    policy: RunPolicy,
    interpreter: Interpreter,
}

impl InteractiveRunner {
    pub fn new(policy: RunPolicy, interpreter: Interpreter) -> Self {
        Self {
            policy,
            interpreter,
        }
    }

    pub fn policy(&self) -> &RunPolicy {
        &self.policy
    }

    /// Submit `workflow` as a background job.
    ///
    /// # Errors
    ///
    /// Returns a [`Refusal`] without starting anything when the workflow
    /// does not satisfy the policy.
    pub fn submit(&self, workflow: &Workflow) -> Result<JobHandle, Refusal> {
        self.submit_with_callback(workflow, |_, _| {})
    }

    /// Like [`Self::submit`], with a completion callback.
    ///
    /// # Errors
    ///
    /// Returns a [`Refusal`] when the workflow does not satisfy the policy.
    pub fn submit_with_callback<F>(
        &self,
        workflow: &Workflow,
        on_complete: F,
    ) -> Result<JobHandle, Refusal>
    where
        F: FnOnce(Completion, &Outcome) + Send + 'static,
    {
        self.policy.check(workflow).inspect_err(|refusal| {
            tracing::warn!("Run refused: {refusal}");
        })?;
        Ok(PipelineJob::new(workflow, self.interpreter.clone()).submit_with_callback(on_complete))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Step;

    fn csv_workflow(dir: &std::path::Path) -> (Workflow, std::path::PathBuf) {
        let input = dir.join("a.csv");
        std::fs::write(&input, "id,val\n1,5\n2,15\n").expect("fixture");
        let output = dir.join("b.csv");
        let wf = Workflow::from_steps([
            Step::CsvSource {
                path: input.to_string_lossy().into_owned(),
            },
            Step::CsvSink {
                path: output.to_string_lossy().into_owned(),
            },
        ]);
        (wf, output)
    }

    #[test]
    fn test_job_completes_with_callback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (wf, output) = csv_workflow(dir.path());

        let (tx, rx) = channel();
        let handle = InteractiveRunner::default()
            .submit_with_callback(&wf, move |completion, _| {
                tx.send(completion).expect("send completion");
            })
            .expect("accepted");

        let outcome = handle.wait();
        assert!(outcome.success, "{outcome:?}");
        assert_eq!(rx.recv().expect("callback"), Completion::Completed);
        assert!(output.exists());
    }

    #[test]
    fn test_failed_job() {
        let wf = Workflow::from_steps([
            Step::CsvSource {
                path: "/nonexistent.csv".to_owned(),
            },
            Step::CsvSink {
                path: "/nonexistent-out.csv".to_owned(),
            },
        ]);
        let mut handle = PipelineJob::new(&wf, Interpreter::default()).submit();
        while !handle.is_finished() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let outcome = handle.try_outcome().cloned().expect("finished");
        assert!(!outcome.success);
        assert_eq!(Completion::from(&outcome), Completion::Failed);
    }

    #[test]
    fn test_refusal_starts_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (mut wf, output) = csv_workflow(dir.path());
        wf.push(Step::Filter {
            expr: "val > 1".to_owned(),
        });

        let refusal = InteractiveRunner::default().submit(&wf).unwrap_err();
        assert_eq!(
            refusal.message,
            "Pipeline must start with CSV Source and end with CSV Sink."
        );
        assert!(!output.exists());
    }
}
