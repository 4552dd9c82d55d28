use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use geoetl::config::{EtlConfig, PolicyPreset, load_config, load_default_config};
use geoetl::pipeline::{
    InteractiveRunner, TracingFeedback, Workflow, record_label, run_workflow_file,
    validate_workflow,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "geoetl",
    version,
    about = "Run linear ETL workflows over tabular and geospatial data"
)]
pub struct Cli {
    /// Path to a JSON config file. Defaults to the platform config directory.
    #[arg(long, global = true, env = "GEOETL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow file to completion
    Run {
        /// Path to the workflow JSON file
        workflow: PathBuf,

        /// Run policy. `headless` runs in the foreground with no gate; the
        /// other presets check the first and last step, then run as a
        /// background job.
        #[arg(long, value_enum)]
        policy: Option<PolicyPreset>,
    },
    /// Decode every step and check the workflow against a run policy
    Check {
        /// Path to the workflow JSON file
        workflow: PathBuf,

        /// Run policy to check against
        #[arg(long, value_enum)]
        policy: Option<PolicyPreset>,
    },
    /// List the steps of a workflow
    Show {
        /// Path to the workflow JSON file
        workflow: PathBuf,
    },
}

pub fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => load_default_config()?,
    };

    match cli.command {
        Commands::Run { workflow, policy } => handle_run(&workflow, policy, &config),
        Commands::Check { workflow, policy } => handle_check(&workflow, policy, &config),
        Commands::Show { workflow } => handle_show(&workflow),
    }
}

fn preset(flag: Option<PolicyPreset>, config: &EtlConfig) -> PolicyPreset {
    flag.or(config.policy).unwrap_or(PolicyPreset::Headless)
}

fn handle_run(path: &Path, policy: Option<PolicyPreset>, config: &EtlConfig) -> Result<()> {
    let interpreter = config.interpreter();

    match preset(policy, config) {
        PolicyPreset::Headless => {
            let report = run_workflow_file(path, &interpreter, &mut TracingFeedback)?;
            println!("{}", report.summary());
        }
        gated => {
            let workflow = Workflow::load(path)?;
            let runner = InteractiveRunner::new(gated.policy(), interpreter);
            let outcome = runner.submit(&workflow)?.wait();
            if let Some(err) = outcome.error {
                bail!("Pipeline job failed: {err}");
            }
            println!("Pipeline job completed ({} steps)", workflow.len());
        }
    }
    Ok(())
}

fn handle_check(path: &Path, policy: Option<PolicyPreset>, config: &EtlConfig) -> Result<()> {
    let workflow = Workflow::load(path)?;
    let problems = validate_workflow(&workflow, &preset(policy, config).policy());

    if problems.is_empty() {
        println!("✓ {} is valid ({} steps)", path.display(), workflow.len());
        return Ok(());
    }

    for problem in &problems {
        println!("✗ {problem}");
    }
    bail!("{} problem(s) found in {}", problems.len(), path.display());
}

fn handle_show(path: &Path) -> Result<()> {
    let workflow = Workflow::load(path)?;
    if workflow.is_empty() {
        println!("{} has no steps", path.display());
        return Ok(());
    }
    for (index, record) in workflow.records().iter().enumerate() {
        println!("{:>3}. {}", index + 1, record_label(record));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory as _;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_policy_flag_parsing() {
        let cli = Cli::parse_from(["geoetl", "run", "wf.json", "--policy", "source-to-sink"]);
        let Commands::Run { workflow, policy } = cli.command else {
            panic!("expected the run subcommand");
        };
        assert_eq!(workflow, PathBuf::from("wf.json"));
        assert_eq!(policy, Some(PolicyPreset::SourceToSink));
    }

    #[test]
    fn test_preset_precedence() {
        let mut config = EtlConfig::default();
        assert_eq!(preset(None, &config), PolicyPreset::Headless);
        config.policy = Some(PolicyPreset::Interactive);
        assert_eq!(preset(None, &config), PolicyPreset::Interactive);
        assert_eq!(
            preset(Some(PolicyPreset::SourceToSink), &config),
            PolicyPreset::SourceToSink
        );
    }
}
