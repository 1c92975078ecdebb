//! Hash-verified zip creation.
//!
//! Sources are enumerated and hashed, written into a zip, then the finished zip is re-read and
//! every entry hashed again. The archive is kept only when both digest -> paths indices agree.

pub mod archive;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod hasher;
pub mod index;
pub mod logging;
pub mod notify;
pub mod path_util;
pub mod report;
pub mod verifier;

pub use config::{ResolvedConfig, RunConfig};
pub use error::{Result, VerizipError};
pub use hasher::HashAlgorithm;
pub use index::{Discrepancy, HashIndex};
pub use report::{FailureReport, RunState};
pub use verifier::{StagedArchive, VerifiedArchive, Verifier};
