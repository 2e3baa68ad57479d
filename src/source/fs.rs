//! File-based request protocol.
//!
//! Clients create a directory `<listen_dir>/<name>` whose name matches the
//! job pattern, put the input files in `<name>/input/` and finally create
//! an empty `<name>/ready` marker. The daemon answers through files in the
//! same directory:
//!
//! | file            | content                                        |
//! |-----------------|------------------------------------------------|
//! | `status`        | `WAITING`, `WORKING`, `SUCCESS`, `ERROR`, `STUCK` |
//! | `error`         | failure message, written before `ERROR`        |
//! | `outfiles.json` | JSON array of artifact paths, before `SUCCESS` |
//! | `beat`          | RFC 3339 timestamp, rewritten on every heartbeat |
//!
//! Output artifacts are placed in `<name>/output/`. A directory that
//! already has a `status` file is never picked up again.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use uuid::Uuid;

use crate::config::ListenerConfig;
use crate::error::{DaemonError, Result};
use crate::scheduler::{JobHandle, JobStatus, Lifecycle};
use crate::source::JobSource;
use crate::worker::Heartbeat;

pub const READY_MARKER: &str = "ready";
pub const STATUS_FILE: &str = "status";
pub const ERROR_FILE: &str = "error";
pub const OUTFILES_FILE: &str = "outfiles.json";
pub const BEAT_FILE: &str = "beat";
pub const INPUT_DIR: &str = "input";
pub const OUTPUT_DIR: &str = "output";

/// Polls a directory for ready requests and yields them as [`FsJob`]s.
#[derive(Debug)]
pub struct DirectoryListener {
    listen_dir: PathBuf,
    pattern: Regex,
    poll_interval: Duration,
    claimed: HashSet<String>,
    pending: VecDeque<FsJob>,
}

impl DirectoryListener {
    pub fn new(config: &ListenerConfig) -> Result<Self> {
        Ok(Self {
            listen_dir: config.listen_dir.clone(),
            pattern: config.compile_pattern()?,
            poll_interval: config.poll_interval(),
            claimed: HashSet::new(),
            pending: VecDeque::new(),
        })
    }

    pub fn listen_dir(&self) -> &Path {
        &self.listen_dir
    }

    /// Scan the directory once and queue every new ready request, in name
    /// order. Returns how many were claimed.
    pub async fn scan(&mut self) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.listen_dir)
            .await
            .map_err(|e| DaemonError::io(&self.listen_dir, e))?;

        self.prune_claimed().await;

        let mut found = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DaemonError::io(&self.listen_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.pattern.is_match(&name) || self.claimed.contains(&name) {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let dir = entry.path();
            if !exists(&dir.join(READY_MARKER)).await || exists(&dir.join(STATUS_FILE)).await {
                continue;
            }
            found.push((name, dir));
        }
        found.sort();

        let mut claimed = 0;
        for (name, dir) in found {
            match FsJob::claim(name.clone(), dir).await {
                Ok(job) => {
                    tracing::info!(request = %name, job_id = %job.id(), "Claimed request");
                    self.claimed.insert(name);
                    self.pending.push_back(job);
                    claimed += 1;
                }
                Err(e) => {
                    tracing::warn!(request = %name, error = %e, "Could not claim request");
                }
            }
        }
        Ok(claimed)
    }

    /// Number of request names currently remembered as claimed.
    pub fn claimed_len(&self) -> usize {
        self.claimed.len()
    }

    /// Forget claimed requests that have been answered or removed. Both are
    /// skipped by the `status` check alone, so the name is no longer needed.
    async fn prune_claimed(&mut self) {
        let mut done = Vec::new();
        for name in &self.claimed {
            let dir = self.listen_dir.join(name);
            if !exists(&dir).await || exists(&dir.join(STATUS_FILE)).await {
                done.push(name.clone());
            }
        }
        for name in done {
            self.claimed.remove(&name);
        }
    }
}

impl JobSource for DirectoryListener {
    type Job = FsJob;

    async fn next_job(&mut self) -> Option<FsJob> {
        loop {
            if let Some(job) = self.pending.pop_front() {
                return Some(job);
            }
            if let Err(e) = self.scan().await {
                tracing::warn!(
                    dir = %self.listen_dir.display(),
                    error = %e,
                    "Could not scan listen directory"
                );
            }
            if self.pending.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Replace `path` with `contents` via a temporary file and a rename, so
/// readers never observe a partial write.
fn write_atomic(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    std::fs::write(&tmp, contents).map_err(|e| DaemonError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| DaemonError::io(path, e))
}

/// A request directory claimed by a [`DirectoryListener`].
#[derive(Debug)]
pub struct FsJob {
    id: Uuid,
    name: String,
    dir: PathBuf,
    inputs: Vec<PathBuf>,
    output_dir: PathBuf,
    outputs: Vec<PathBuf>,
    lifecycle: Lifecycle,
    heartbeat: Heartbeat,
    span: tracing::Span,
}

impl FsJob {
    /// Read the inputs of the request in `dir` and create its output
    /// directory.
    pub async fn claim(name: String, dir: PathBuf) -> Result<Self> {
        let input_dir = dir.join(INPUT_DIR);
        let mut inputs = Vec::new();
        let mut entries = tokio::fs::read_dir(&input_dir)
            .await
            .map_err(|e| DaemonError::io(&input_dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DaemonError::io(&input_dir, e))?
        {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                inputs.push(entry.path());
            }
        }
        inputs.sort();

        let output_dir = dir.join(OUTPUT_DIR);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| DaemonError::io(&output_dir, e))?;

        let id = Uuid::new_v4();
        let beat_path = dir.join(BEAT_FILE);
        let heartbeat = Heartbeat::new(move || {
            if let Err(e) = write_atomic(&beat_path, Utc::now().to_rfc3339()) {
                tracing::warn!(file = %beat_path.display(), error = %e, "Could not write heartbeat");
            }
        });
        let span = tracing::info_span!("job", job_id = %id, request = %name);

        Ok(Self {
            id,
            name,
            dir,
            inputs,
            output_dir,
            outputs: Vec::new(),
            lifecycle: Lifecycle::new(),
            heartbeat,
            span,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_status(&self, status: JobStatus) -> Result<()> {
        write_atomic(&self.dir.join(STATUS_FILE), status.as_str())
    }
}

impl JobHandle for FsJob {
    fn id(&self) -> Uuid {
        self.id
    }

    fn input_files(&self) -> &[PathBuf] {
        &self.inputs
    }

    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn span(&self) -> tracing::Span {
        self.span.clone()
    }

    fn status(&self) -> Option<JobStatus> {
        self.lifecycle.status()
    }

    fn set_status(&mut self, status: JobStatus) -> Result<()> {
        self.lifecycle.check(status)?;
        self.write_status(status)?;
        self.lifecycle.advance(status)?;
        Ok(())
    }

    fn report_error(&mut self, message: &str) -> Result<()> {
        self.lifecycle.check(JobStatus::Error)?;
        self.span
            .in_scope(|| tracing::info!(error = message, "Reporting job error"));
        write_atomic(&self.dir.join(ERROR_FILE), message)?;
        self.write_status(JobStatus::Error)?;
        self.lifecycle.advance(JobStatus::Error)?;
        Ok(())
    }

    fn report_success(&mut self, outputs: Vec<PathBuf>) -> Result<()> {
        self.lifecycle.check(JobStatus::Success)?;
        let listing = serde_json::to_vec_pretty(&outputs)
            .map_err(|e| DaemonError::Unknown(format!("could not encode output list: {e}")))?;
        write_atomic(&self.dir.join(OUTFILES_FILE), listing)?;
        self.write_status(JobStatus::Success)?;
        self.lifecycle.advance(JobStatus::Success)?;
        self.outputs = outputs;
        Ok(())
    }

    fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }
}

/// State of a request as seen from the client side of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestReport {
    pub name: String,
    pub status: Option<JobStatus>,
    pub error: Option<String>,
    pub outputs: Vec<PathBuf>,
    pub last_beat: Option<DateTime<Utc>>,
}

/// Create a request directory under `listen_dir`, copy `files` into its
/// `input/` directory and mark it ready. Returns the request directory.
///
/// Without a `name`, one matching the default job pattern is generated.
pub async fn submit_request(
    listen_dir: &Path,
    name: Option<String>,
    files: &[PathBuf],
) -> Result<PathBuf> {
    let name = name.unwrap_or_else(|| format!("input_{}", Uuid::new_v4().simple()));
    let dir = listen_dir.join(&name);
    let input_dir = dir.join(INPUT_DIR);
    tokio::fs::create_dir_all(&input_dir)
        .await
        .map_err(|e| DaemonError::io(&input_dir, e))?;

    for file in files {
        let Some(file_name) = file.file_name() else {
            return Err(DaemonError::Input(format!(
                "not a file: {}",
                file.display()
            )));
        };
        let target = input_dir.join(file_name);
        tokio::fs::copy(file, &target)
            .await
            .map_err(|e| DaemonError::io(file, e))?;
    }

    let marker = dir.join(READY_MARKER);
    tokio::fs::write(&marker, b"")
        .await
        .map_err(|e| DaemonError::io(&marker, e))?;
    Ok(dir)
}

/// Read the daemon's answer files in the request directory `dir`.
pub async fn read_request(dir: &Path) -> Result<RequestReport> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let status = match read_optional(&dir.join(STATUS_FILE)).await? {
        Some(text) => Some(text.parse()?),
        None => None,
    };
    let error = read_optional(&dir.join(ERROR_FILE)).await?;
    let outputs = match read_optional(&dir.join(OUTFILES_FILE)).await? {
        Some(text) => serde_json::from_str(&text).map_err(|e| DaemonError::Format {
            path: dir.join(OUTFILES_FILE),
            reason: e.to_string(),
        })?,
        None => Vec::new(),
    };
    let last_beat = read_optional(&dir.join(BEAT_FILE))
        .await?
        .and_then(|text| DateTime::parse_from_rfc3339(text.trim()).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(RequestReport {
        name,
        status,
        error,
        outputs,
        last_beat,
    })
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(DaemonError::io(path, e)),
    }
}
