//! Error types for verizip

use std::io;
use std::path::{Path, PathBuf};

/// Result type for verizip operations
pub type Result<T> = std::result::Result<T, VerizipError>;

/// Every failure that can abort a run. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum VerizipError {
    #[error("Path(s) {} not found", quoted_list(.paths))]
    MissingInput { paths: Vec<PathBuf> },

    #[error("No input paths were given")]
    NoInputs,

    #[error("Cannot access '{}'; zip creation aborted", .path.display())]
    InaccessiblePath {
        path: PathBuf,
        #[source]
        source: Option<io::Error>,
    },

    #[error("'{}' no longer present in folder - zip creation aborted", .path.display())]
    FileVanished { path: PathBuf },

    #[error(
        "'{}' is not a regular file (may be a pipe/socket) - zip creation aborted",
        .path.display()
    )]
    IrregularFile { path: PathBuf },

    #[error(
        "'{}' has a name that is not valid Unicode and cannot be stored as a zip entry name",
        .path.display()
    )]
    NonUnicodeName { path: PathBuf },

    #[error("Entry name '{name}' would be written twice (from '{}')", .path.display())]
    DuplicateEntry { name: String, path: PathBuf },

    #[error("'{}' failed verification ({discrepancies} discrepancies)", .archive.display())]
    VerificationMismatch {
        archive: PathBuf,
        discrepancies: usize,
    },

    #[error("Failed to read archive '{}': {message}", .archive.display())]
    ArchiveRead { archive: PathBuf, message: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Zip error on '{name}': {source}")]
    Zip {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },
}

impl VerizipError {
    /// Classify an I/O error raised while touching a source file.
    pub fn from_source_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::FileVanished {
                path: path.to_path_buf(),
            },
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Render `['a', 'b']` style listings as `'a', 'b'`.
pub fn quoted_list<T: AsRef<Path>>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| format!("'{}'", item.as_ref().display()))
        .collect::<Vec<_>>()
        .join(", ")
}
