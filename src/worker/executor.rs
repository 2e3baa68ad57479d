use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;
use uuid::Uuid;

use crate::config::ToolConfig;
use crate::error::{DaemonError, Result};
use crate::worker::fileset::{parse_param_file, InputFileset};

/// Name of the run manifest written into the work directory.
pub const MANIFEST_FILE: &str = "run-params.json";

/// Everything the execution routine needs from a job.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub job_id: Uuid,
    pub input_files: &'a [PathBuf],
    pub output_dir: &'a Path,
    pub work_dir: &'a Path,
}

/// Performs the computational work of a job and returns its output
/// artifacts. Occupies the calling worker until it finishes.
pub trait Executor: Send + Sync + 'static {
    fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> impl Future<Output = Result<Vec<PathBuf>>> + Send;
}

/// A single call of the external analysis tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub params: serde_json::Value,
    pub raw_files: BTreeMap<String, PathBuf>,
    pub reference_files: BTreeMap<String, PathBuf>,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
}

pub trait ToolRunner: Send + Sync + 'static {
    fn run(&self, invocation: ToolInvocation) -> impl Future<Output = Result<Vec<PathBuf>>> + Send;
}

/// Classifies a job's inputs, parses its parameter file and hands both to
/// the analysis tool.
#[derive(Debug, Clone)]
pub struct AnalysisExecutor<T = CommandTool> {
    config: ToolConfig,
    tool: T,
}

impl AnalysisExecutor {
    pub fn new(config: ToolConfig) -> Self {
        Self::with_tool(config, CommandTool)
    }
}

impl<T: ToolRunner> AnalysisExecutor<T> {
    pub fn with_tool(config: ToolConfig, tool: T) -> Self {
        Self { config, tool }
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }
}

impl<T: ToolRunner> Executor for AnalysisExecutor<T> {
    async fn execute(&self, request: ExecutionRequest<'_>) -> Result<Vec<PathBuf>> {
        let fileset = InputFileset::classify(request.input_files)?;
        let params = parse_param_file(&fileset.param_file).await?;

        tracing::info!(
            job_id = %request.job_id,
            raw_files = fileset.raw_files.len(),
            reference_files = fileset.reference_files.len(),
            param_file = %fileset.param_file.display(),
            "Starting analysis"
        );

        let invocation = ToolInvocation {
            binary: self.config.binary_path.clone(),
            args: self.config.args.clone(),
            params,
            raw_files: fileset.raw_files,
            reference_files: fileset.reference_files,
            output_dir: request.output_dir.to_path_buf(),
            work_dir: request.work_dir.to_path_buf(),
        };

        self.tool.run(invocation).await.map_err(|e| {
            tracing::error!(job_id = %request.job_id, error = %e, "Could not execute analysis tool");
            match e {
                DaemonError::Execution(message) => DaemonError::Execution(message),
                other => DaemonError::Execution(other.to_string()),
            }
        })
    }
}

#[derive(Serialize)]
struct RunManifest<'a> {
    params: &'a serde_json::Value,
    raw_files: &'a BTreeMap<String, PathBuf>,
    fasta_files: &'a BTreeMap<String, PathBuf>,
    output_dir: &'a Path,
}

/// Runs the analysis tool as a child process.
///
/// The invocation is written to [`MANIFEST_FILE`] in the work directory and
/// the tool is started as `<binary> <args..> <manifest>`. Every regular file
/// left in the output directory, apart from the manifest, is an artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandTool;

impl ToolRunner for CommandTool {
    async fn run(&self, invocation: ToolInvocation) -> Result<Vec<PathBuf>> {
        for dir in [&invocation.work_dir, &invocation.output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DaemonError::io(dir, e))?;
        }

        let manifest_path = invocation.work_dir.join(MANIFEST_FILE);
        let manifest = serde_json::to_vec_pretty(&RunManifest {
            params: &invocation.params,
            raw_files: &invocation.raw_files,
            fasta_files: &invocation.reference_files,
            output_dir: &invocation.output_dir,
        })
        .map_err(|e| DaemonError::Execution(format!("could not encode run manifest: {e}")))?;
        tokio::fs::write(&manifest_path, manifest)
            .await
            .map_err(|e| DaemonError::io(&manifest_path, e))?;

        tracing::info!(
            binary = %invocation.binary.display(),
            manifest = %manifest_path.display(),
            "Running analysis tool"
        );

        let result = Command::new(&invocation.binary)
            .args(&invocation.args)
            .arg(&manifest_path)
            .current_dir(&invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(&invocation.binary, result)?;
        collect_outputs(&invocation.output_dir, &manifest_path).await
    }
}

impl CommandTool {
    fn process_output(
        binary: &Path,
        result: std::result::Result<std::process::Output, std::io::Error>,
    ) -> Result<()> {
        match result {
            Ok(output) => {
                let exit_code = output.status.code();
                if output.status.success() {
                    tracing::info!(exit_code = ?exit_code, "Analysis tool finished");
                    tracing::debug!(stdout = %String::from_utf8_lossy(&output.stdout));
                    return Ok(());
                }

                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                tracing::warn!(exit_code = ?exit_code, "Analysis tool failed");
                Err(DaemonError::Execution(match exit_code {
                    _ if !stderr.is_empty() => stderr,
                    Some(code) => format!("Exit code: {code}"),
                    None => "Terminated by signal".to_string(),
                }))
            }
            Err(e) => Err(DaemonError::Execution(format!(
                "could not start {}: {}",
                binary.display(),
                e
            ))),
        }
    }
}

async fn collect_outputs(output_dir: &Path, manifest: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(output_dir)
        .await
        .map_err(|e| DaemonError::io(output_dir, e))?;

    let mut outputs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DaemonError::io(output_dir, e))?
    {
        let path = entry.path();
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file && path != manifest {
            outputs.push(path);
        }
    }
    outputs.sort();
    Ok(outputs)
}
