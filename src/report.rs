//! Failure reports and the timestamped error file written beside the archive.

use std::error::Error as _;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::VerizipError;
use crate::index::Discrepancy;

const REPORT_SUFFIX: &str = "_verizip_error.txt";
const RUN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const LINE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Where the pipeline is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Enumerating,
    Hashing,
    Writing,
    Finalized,
    ReVerifying,
    Verified,
    Failed,
}

/// Terminal failure of a run. The archive has already been removed when this is returned.
#[derive(Debug)]
pub struct FailureReport {
    pub archive: PathBuf,
    pub failed_in: RunState,
    pub error: VerizipError,
    pub discrepancies: Vec<Discrepancy>,
    pub report_path: Option<PathBuf>,
    pub archive_removed: bool,
}

impl FailureReport {
    pub fn is_mismatch(&self) -> bool {
        matches!(self.error, VerizipError::VerificationMismatch { .. })
    }

    /// Contents of the error file: the error chain for aborted runs, one line per discrepancy for
    /// failed verification.
    pub fn render(&self, now: DateTime<Local>) -> String {
        if self.is_mismatch() {
            return self
                .discrepancies
                .iter()
                .map(|discrepancy| format!("{discrepancy}\n"))
                .collect();
        }

        let mut output = format!(
            "{} - ERROR - Exception occurred during creation of zip file '{}' ({:?}): {}\n",
            now.format(LINE_TIMESTAMP_FORMAT),
            self.archive.display(),
            self.failed_in,
            self.error
        );
        let mut source = self.error.source();
        while let Some(cause) = source {
            output.push_str(&format!("  caused by: {cause}\n"));
            source = cause.source();
        }
        output
    }
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.report_path {
            Some(report) => write!(f, "{} - see '{}'", self.error, report.display()),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for FailureReport {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub fn run_timestamp(now: DateTime<Local>) -> String {
    now.format(RUN_TIMESTAMP_FORMAT).to_string()
}

pub fn report_path(output_dir: &Path, timestamp: &str) -> PathBuf {
    output_dir.join(format!("{timestamp}{REPORT_SUFFIX}"))
}

pub fn write_report(path: &Path, contents: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}
