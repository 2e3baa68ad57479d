use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DaemonError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Raw,
    Reference,
    Parameters,
}

impl InputKind {
    /// Kind of `path` by extension, ignoring case.
    pub fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "raw" => Some(InputKind::Raw),
            "fasta" => Some(InputKind::Reference),
            "yaml" | "json" => Some(InputKind::Parameters),
            _ => None,
        }
    }
}

/// A job's input files split by kind, keyed by file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFileset {
    pub raw_files: BTreeMap<String, PathBuf>,
    pub reference_files: BTreeMap<String, PathBuf>,
    pub param_file: PathBuf,
}

impl InputFileset {
    /// Classify `inputs`. Exactly one parameter file must be present.
    ///
    /// Files with an unknown extension are skipped with a warning.
    pub fn classify(inputs: &[PathBuf]) -> Result<Self> {
        let mut raw_files = BTreeMap::new();
        let mut reference_files = BTreeMap::new();
        let mut param_files = BTreeMap::new();

        for file in inputs {
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let target = match InputKind::of(file) {
                Some(InputKind::Raw) => &mut raw_files,
                Some(InputKind::Reference) => &mut reference_files,
                Some(InputKind::Parameters) => &mut param_files,
                None => {
                    tracing::warn!(file = %file.display(), "Unknown input file");
                    continue;
                }
            };
            target.insert(stem, file.clone());
        }

        if param_files.len() > 1 {
            tracing::error!(count = param_files.len(), "Got more than one parameter file");
            return Err(DaemonError::Input("Too many parameter files".to_string()));
        }
        let Some((_, param_file)) = param_files.pop_first() else {
            tracing::error!("No parameter file");
            return Err(DaemonError::Input("No parameter file".to_string()));
        };

        Ok(Self {
            raw_files,
            reference_files,
            param_file,
        })
    }
}

/// Parse a YAML or JSON parameter file, chosen by extension.
pub async fn parse_param_file(path: &Path) -> Result<serde_json::Value> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    if ext != "yaml" && ext != "json" {
        return Err(DaemonError::Format {
            path: path.to_path_buf(),
            reason: format!("unsupported extension {ext:?}"),
        });
    }

    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        tracing::error!(file = %path.display(), error = %e, "Could not read parameter file");
        DaemonError::io(path, e)
    })?;

    let parsed: std::result::Result<serde_json::Value, String> = if ext == "yaml" {
        serde_yaml::from_str(&text).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&text).map_err(|e| e.to_string())
    };
    parsed.map_err(|reason| {
        tracing::error!(file = %path.display(), %reason, "Invalid parameter file");
        DaemonError::Format {
            path: path.to_path_buf(),
            reason,
        }
    })
}
