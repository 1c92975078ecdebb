use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::enumerate::EnumerateOptions;
use crate::error::{Result, VerizipError};
use crate::hasher::HashAlgorithm;
use crate::path_util::{absolutize, default_output_path, safe_output_path};

/// Run options as supplied by the CLI or a JSON defaults file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    /// Directory for default-named archives; the working directory when unset.
    pub output_dir: Option<PathBuf>,
    /// Nest every entry under the basename of the shared root.
    pub root_directory: bool,
    pub ignore_dotfiles: bool,
    pub ignore_windows_volume_folders: bool,
    pub algorithm: HashAlgorithm,
}

/// A validated configuration: absolute inputs that exist and a free output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub inputs: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub output_dir: PathBuf,
    pub flatten: bool,
    pub enumerate: EnumerateOptions,
    pub algorithm: HashAlgorithm,
    pub timestamp: String,
}

impl RunConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    pub fn resolve(&self, timestamp: &str) -> Result<ResolvedConfig> {
        if self.inputs.is_empty() {
            return Err(VerizipError::NoInputs);
        }

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            inputs.push(absolutize(input).map_err(|err| VerizipError::io(input, err))?);
        }

        let missing: Vec<PathBuf> = inputs
            .iter()
            .filter(|input| !input.is_dir() && !input.is_file())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(VerizipError::MissingInput { paths: missing });
        }

        let output_path = match &self.output {
            Some(output) => {
                let output = absolutize(output).map_err(|err| VerizipError::io(output, err))?;
                safe_output_path(&output)
            }
            None => {
                let dir = self.output_dir.as_deref().unwrap_or(Path::new("."));
                let dir = absolutize(dir).map_err(|err| VerizipError::io(dir, err))?;
                default_output_path(&inputs, &dir, timestamp)
            }
        };
        let output_dir = output_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(ResolvedConfig {
            inputs,
            output_path,
            output_dir,
            flatten: self.root_directory,
            enumerate: EnumerateOptions {
                ignore_dotfiles: self.ignore_dotfiles,
                ignore_reserved_folders: self.ignore_windows_volume_folders,
            },
            algorithm: self.algorithm,
            timestamp: timestamp.to_string(),
        })
    }
}
