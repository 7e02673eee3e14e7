//! Workflow orchestrator.
//!
//! Sequences validation -> extraction -> condition table -> argument
//! assembly -> activate -> main run -> deactivate. Deactivation is always
//! attempted once activation succeeded, even after a failed or cancelled
//! main run, so the tool's license session is never left dangling. A
//! cancellation observed anywhere tears down every registered subprocess
//! before the outcome is propagated.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use crate::condition::write_condition_file;
use crate::config::RunnerConfig;
use crate::datafiles::{file_stem, validate_filetable, DataFileEntry};
use crate::error::WorkflowError;
use crate::extract::prepare_datafiles;
use crate::operation::Operation;
use crate::process::ProcessRegistry;
use crate::progress::EventSinks;
use crate::runner::{run_cmd, run_cmd_shielded};
use crate::tool::{activate_args, convert_args, deactivate_args, ToolOptions};

/// One configured workflow runner. Owns the process registry scoped to the
/// operations it runs.
pub struct Workflow {
    config: RunnerConfig,
    registry: ProcessRegistry,
    sinks: EventSinks,
}

impl Workflow {
    pub fn new(config: RunnerConfig, sinks: EventSinks) -> Self {
        Self {
            config,
            registry: ProcessRegistry::new(),
            sinks,
        }
    }

    /// Run the DirectDIA workflow: extract, write the condition table, then
    /// activate / search / deactivate. Returns the overall tool success.
    pub async fn run_direct(
        &self,
        entries: &mut Vec<DataFileEntry>,
        options: ToolOptions,
        op: &Operation,
    ) -> Result<bool, WorkflowError> {
        self.registry.begin(op.id());
        let result = self.direct_inner(entries, options, op).await;
        self.close_operation(op, &result).await;
        result
    }

    /// Run the convert workflow: one tool invocation per input file, with
    /// per-file progress.
    pub async fn run_convert(
        &self,
        entries: &mut Vec<DataFileEntry>,
        options: ToolOptions,
        op: &Operation,
    ) -> Result<bool, WorkflowError> {
        self.registry.begin(op.id());
        let result = self.convert_inner(entries, options, op).await;
        self.close_operation(op, &result).await;
        result
    }

    /// On cancellation, tear down every live subprocess under the operation;
    /// otherwise just drop the registration.
    async fn close_operation(&self, op: &Operation, result: &Result<bool, WorkflowError>) {
        match result {
            Err(e) if e.is_cancelled() => self.registry.cleanup(op.id()).await,
            _ => self.registry.finish(op.id()),
        }
    }

    async fn direct_inner(
        &self,
        entries: &mut Vec<DataFileEntry>,
        mut options: ToolOptions,
        op: &Operation,
    ) -> Result<bool, WorkflowError> {
        if entries.is_empty() {
            return Err(WorkflowError::Validation("No files to process".into()));
        }
        let output_dir = required_path(&options.output_directory, "Output directory")?;
        required_path(&options.properties_file, "Properties file")?;
        required_path(&options.fasta_file, "FASTA file")?;
        if !validate_filetable(entries) {
            return Err(WorkflowError::Validation(
                "Invalid file table: mixed or unsupported file types".into(),
            ));
        }
        let license_key = self.license_key()?;

        let experiment = match &options.experiment_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => file_stem(&entries[0].name),
        };
        options.experiment_name = Some(experiment.clone());

        let (data_dir, params_dir) = create_run_dirs(&output_dir)?;
        stage_file(&mut options.properties_file, &params_dir)?;
        stage_file(&mut options.fasta_file, &params_dir)?;
        stage_file(&mut options.go_file, &params_dir)?;
        stage_file(&mut options.report_file, &params_dir)?;
        stage_file(&mut options.mod_repository, &params_dir)?;
        stage_file(&mut options.enzyme_database, &params_dir)?;

        self.sinks.info("Preparing data files");
        prepare_datafiles(entries, &data_dir, op, &self.sinks).await?;

        let condition_path = params_dir.join(format!("{}_condition.tsv", experiment));
        write_condition_file(entries, &condition_path, &self.sinks)?;
        debug!("wrote condition file to {}", condition_path.display());
        options.condition_file = Some(condition_path);

        let main_argv = self.command(options.full_args(entries));
        debug!("assembled {} tool argument(s)", main_argv.len());

        if !self.activate(op, &license_key).await? {
            return Ok(false);
        }

        self.sinks.info("Launching Spectronaut");
        let timeout = self.main_timeout();
        let main_result = run_cmd(op, &self.registry, &main_argv, timeout, &self.sinks).await;
        match &main_result {
            Ok(true) => self.sinks.info("Spectronaut exited successfully"),
            Ok(false) => self.sinks.error("Processing failed, see detailed log"),
            Err(_) => self.sinks.warn("Processing cancelled by user"),
        }

        self.deactivate(op).await;
        main_result
    }

    async fn convert_inner(
        &self,
        entries: &mut Vec<DataFileEntry>,
        mut options: ToolOptions,
        op: &Operation,
    ) -> Result<bool, WorkflowError> {
        if entries.is_empty() {
            return Err(WorkflowError::Validation("No files to process".into()));
        }
        let output_dir = required_path(&options.output_directory, "Output directory")?;
        if !validate_filetable(entries) {
            return Err(WorkflowError::Validation(
                "Invalid file table: mixed or unsupported file types".into(),
            ));
        }
        let license_key = self.license_key()?;

        let (data_dir, params_dir) = create_run_dirs(&output_dir)?;
        stage_file(&mut options.properties_file, &params_dir)?;

        self.sinks.info("Preparing data files");
        prepare_datafiles(entries, &data_dir, op, &self.sinks).await?;

        // convert has no main sub-command of its own
        options.protocol = None;
        let base_args = options.to_args();

        if !self.activate(op, &license_key).await? {
            return Ok(false);
        }

        let total = entries.len();
        self.sinks.info(format!("Converting {} file(s)", total));
        self.sinks.progress(Some(0.0));

        let timeout = self.main_timeout();
        let mut success = true;
        let mut cancellation: Option<WorkflowError> = None;
        for (i, entry) in entries.iter().enumerate() {
            let argv = self.command(convert_args(entry, &base_args));
            match run_cmd(op, &self.registry, &argv, timeout, &self.sinks).await {
                Ok(true) => {
                    self.sinks
                        .info(format!("[{}|{}] Converted successfully", i + 1, total));
                }
                Ok(false) => {
                    success = false;
                    self.sinks.error("Processing failed, see detailed log");
                }
                Err(e) => {
                    self.sinks.warn("Processing cancelled by user");
                    cancellation = Some(e);
                    break;
                }
            }
            self.sinks.progress(Some((i + 1) as f64 / total as f64));
        }
        self.sinks.progress(None);

        self.deactivate(op).await;
        match cancellation {
            Some(e) => Err(e),
            None => Ok(success),
        }
    }

    async fn activate(&self, op: &Operation, license_key: &str) -> Result<bool, WorkflowError> {
        self.sinks.info("Activating Spectronaut");
        let argv = self.command(activate_args(license_key));
        let activated = run_cmd(op, &self.registry, &argv, None, &self.sinks).await?;
        if activated {
            self.sinks.info("Spectronaut activated successfully");
        } else {
            self.sinks
                .error("Cannot activate Spectronaut, see detailed log");
        }
        Ok(activated)
    }

    /// Guaranteed deactivation: shielded from the cancellation signal and
    /// its result only ever logged, never folded into the run outcome.
    async fn deactivate(&self, op: &Operation) {
        self.sinks.info("Deactivating Spectronaut");
        let argv = self.command(deactivate_args());
        match run_cmd_shielded(op, &self.registry, &argv, None, &self.sinks).await {
            Ok(true) => self.sinks.info("Spectronaut deactivated"),
            _ => self
                .sinks
                .error("Cannot deactivate Spectronaut, see detailed log"),
        }
    }

    fn command(&self, args: Vec<String>) -> Vec<String> {
        let mut argv = self.config.spectronaut_command.clone();
        argv.extend(args);
        argv
    }

    fn license_key(&self) -> Result<String, WorkflowError> {
        match &self.config.spectronaut_key {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => Err(WorkflowError::Validation("Cannot find license key".into())),
        }
    }

    fn main_timeout(&self) -> Option<Duration> {
        self.config.tool_timeout_secs.map(Duration::from_secs)
    }
}

fn required_path(value: &Option<PathBuf>, label: &str) -> Result<PathBuf, WorkflowError> {
    match value {
        Some(path) if !path.as_os_str().is_empty() => Ok(path.clone()),
        _ => Err(WorkflowError::Validation(format!("{} not specified", label))),
    }
}

/// An output directory that cannot be created is rejected as bad input,
/// the same as a missing required field.
fn create_run_dirs(output_dir: &Path) -> Result<(PathBuf, PathBuf), WorkflowError> {
    let data_dir = output_dir.join("data");
    let params_dir = output_dir.join("params");
    for dir in [&data_dir, &params_dir] {
        fs::create_dir_all(dir).map_err(|e| {
            WorkflowError::Validation(format!("Cannot create {}: {}", dir.display(), e))
        })?;
    }
    Ok((data_dir, params_dir))
}

/// Copy a parameter file into `params/` and point the option at the copy, so
/// the run directory is self-contained. Options naming missing files are
/// left as-is for the tool itself to report.
fn stage_file(option: &mut Option<PathBuf>, params_dir: &Path) -> Result<(), WorkflowError> {
    let Some(source) = option.as_ref() else {
        return Ok(());
    };
    if source.as_os_str().is_empty() || !source.exists() {
        return Ok(());
    }
    let Some(file_name) = source.file_name() else {
        return Ok(());
    };
    let staged = params_dir.join(file_name);
    fs::copy(source, &staged)
        .with_context(|| format!("Failed to stage {}", source.display()))?;
    *option = Some(staged);
    Ok(())
}
