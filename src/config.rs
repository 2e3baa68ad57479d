use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::error::{DaemonError, Result};

pub const DEFAULT_JOB_PATTERN: &str = "input_[a-zA-Z0-9]*";

/// Where and how job requests are discovered.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Directory scanned for request directories
    pub listen_dir: PathBuf,
    /// Request directory names must match this pattern in full
    pub job_pattern: String,
    /// Delay between scans when no request is pending
    pub poll_interval_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            listen_dir: PathBuf::from("."),
            job_pattern: DEFAULT_JOB_PATTERN.to_string(),
            poll_interval_ms: 1000,
        }
    }
}

impl ListenerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Compile `job_pattern`, anchored so that it must match the whole name.
    pub fn compile_pattern(&self) -> Result<Regex> {
        Regex::new(&format!("^(?:{})$", self.job_pattern)).map_err(|e| {
            DaemonError::Config(format!("invalid job pattern {:?}: {}", self.job_pattern, e))
        })
    }
}

/// External analysis tool invoked for every job.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub binary_path: PathBuf,
    /// Arguments placed before the run manifest path
    pub args: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("MaxQuantCmd"),
            args: Vec::new(),
        }
    }
}

/// Process-wide settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub queue_capacity: usize,
    pub num_workers: usize,
    pub heartbeat_interval_ms: u64,
    pub listener: ListenerConfig,
    pub tool: ToolConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            num_workers: 5,
            heartbeat_interval_ms: 2000,
            listener: ListenerConfig::default(),
            tool: ToolConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn new(listen_dir: impl Into<PathBuf>, binary_path: impl Into<PathBuf>) -> Self {
        Self {
            listener: ListenerConfig {
                listen_dir: listen_dir.into(),
                ..Default::default()
            },
            tool: ToolConfig {
                binary_path: binary_path.into(),
                args: Vec::new(),
            },
            ..Default::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(DaemonError::Config("queue capacity must be at least 1".into()));
        }
        if self.num_workers == 0 {
            return Err(DaemonError::Config("worker count must be at least 1".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(DaemonError::Config("heartbeat interval must be positive".into()));
        }
        if self.listener.poll_interval_ms == 0 {
            return Err(DaemonError::Config("poll interval must be positive".into()));
        }
        self.listener.compile_pattern()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_config_default() {
        let cfg = DaemonConfig::default();
        assert_eq!(cfg.queue_capacity, 5);
        assert_eq!(cfg.num_workers, 5);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(2));
        assert_eq!(cfg.listener.job_pattern, DEFAULT_JOB_PATTERN);
        assert_eq!(cfg.listener.listen_dir, PathBuf::from("."));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn daemon_config_new_and_builders() {
        let cfg = DaemonConfig::new("/srv/requests", "/opt/tool/bin/run")
            .with_queue_capacity(2)
            .with_workers(3)
            .with_heartbeat_interval_ms(250);
        assert_eq!(cfg.listener.listen_dir, PathBuf::from("/srv/requests"));
        assert_eq!(cfg.tool.binary_path, PathBuf::from("/opt/tool/bin/run"));
        assert_eq!(cfg.queue_capacity, 2);
        assert_eq!(cfg.num_workers, 3);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(250));
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        let cfg = DaemonConfig::default().with_queue_capacity(0);
        assert!(matches!(cfg.validate(), Err(DaemonError::Config(_))));

        let cfg = DaemonConfig::default().with_workers(0);
        assert!(matches!(cfg.validate(), Err(DaemonError::Config(_))));

        let cfg = DaemonConfig::default().with_heartbeat_interval_ms(0);
        assert!(matches!(cfg.validate(), Err(DaemonError::Config(_))));
    }

    #[test]
    fn validate_rejects_bad_pattern() {
        let mut cfg = DaemonConfig::default();
        cfg.listener.job_pattern = "input_[".to_string();
        assert!(matches!(cfg.validate(), Err(DaemonError::Config(_))));
    }

    #[test]
    fn job_pattern_matches_whole_name() {
        let re = ListenerConfig::default().compile_pattern().unwrap();
        assert!(re.is_match("input_abc123"));
        assert!(re.is_match("input_"));
        assert!(!re.is_match("xinput_abc"));
        assert!(!re.is_match("input_abc.tmp"));
    }
}
