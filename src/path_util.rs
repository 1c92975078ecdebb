//! Path helpers shared by hashing and archive writing.
//!
//! `relative_name` is the single place an archive entry name is derived. The source index and the
//! archive writer both call it, so they can never disagree about where a file lives in the zip.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, VerizipError};

const SIZE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Path conventions of the host, passed explicitly so naming stays a pure function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsKind {
    Posix,
    Windows,
}

impl OsKind {
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    pub fn separator(self) -> char {
        match self {
            Self::Posix => '/',
            Self::Windows => '\\',
        }
    }
}

/// Longest component-wise prefix shared by every path, or `None` when nothing is shared.
pub fn common_root<S: AsRef<str>>(paths: &[S], separator: char) -> Option<String> {
    let split: Vec<Vec<&str>> = paths
        .iter()
        .map(|path| path.as_ref().split(separator).collect())
        .collect();
    let first = split.first()?;

    let shared: Vec<&str> = first
        .iter()
        .enumerate()
        .take_while(|(level, component)| {
            split
                .iter()
                .all(|components| components.get(*level) == Some(*component))
        })
        .map(|(_, component)| *component)
        .collect();

    let root = shared.join(&separator.to_string());
    if root.is_empty() { None } else { Some(root) }
}

/// Root used for naming the entries of one input: its parent when it is the only input, the
/// common root of all inputs otherwise.
pub fn root_for_inputs(inputs: &[PathBuf], os: OsKind) -> Option<String> {
    match inputs {
        [single] => single
            .parent()
            .map(|parent| parent.to_string_lossy().to_string())
            .filter(|parent| !parent.is_empty()),
        _ => {
            let strings: Vec<String> = inputs
                .iter()
                .map(|input| input.to_string_lossy().to_string())
                .collect();
            common_root(&strings, os.separator())
        }
    }
}

/// Archive-relative name of `path`, always with forward slashes on Windows.
pub fn relative_name(path: &str, root: Option<&str>, flatten: bool, os: OsKind) -> String {
    let separator = os.separator();

    let mut name = match root.and_then(|root| strip_root(path, root, separator)) {
        Some(relative) => relative.to_string(),
        None => match os {
            OsKind::Posix => path.strip_prefix(separator).unwrap_or(path).to_string(),
            OsKind::Windows => path.replace(':', ""),
        },
    };

    if flatten {
        if let Some(base) = root.map(|root| basename(root, os)) {
            if !base.is_empty() {
                name = format!("{base}{separator}{name}");
            }
        }
    }

    match os {
        OsKind::Windows => name.replace('\\', "/"),
        OsKind::Posix => name,
    }
}

/// `relative_name` for a file on disk. Names that are not valid Unicode are refused: a lossy
/// conversion would map distinct files onto the same entry.
pub fn entry_name(path: &Path, root: Option<&str>, flatten: bool, os: OsKind) -> Result<String> {
    let path_str = path.to_str().ok_or_else(|| VerizipError::NonUnicodeName {
        path: path.to_path_buf(),
    })?;
    Ok(relative_name(path_str, root, flatten, os))
}

fn strip_root<'a>(path: &'a str, root: &str, separator: char) -> Option<&'a str> {
    let rest = path.strip_prefix(root)?;
    if root.ends_with(separator) {
        return Some(rest);
    }
    rest.strip_prefix(separator)
}

/// Last component; empty for a filesystem root or a bare drive.
fn basename(path: &str, os: OsKind) -> &str {
    let base = path.rsplit(os.separator()).next().unwrap_or("");
    match os {
        OsKind::Windows if base.ends_with(':') => "",
        _ => base,
    }
}

/// First of `path`, `stem_2.ext`, `stem_3.ext`, ... that does not exist yet.
pub fn safe_output_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = path.to_path_buf();
    let mut suffix = 2_u32;
    while candidate.is_file() {
        candidate = path.with_file_name(format!("{stem}_{suffix}{extension}"));
        suffix += 1;
    }
    candidate
}

/// `<basename>.zip` for a single input, `<timestamp>_archive.zip` otherwise.
pub fn default_output_path(inputs: &[PathBuf], output_dir: &Path, timestamp: &str) -> PathBuf {
    let file_name = match inputs {
        [single] => {
            let base = single
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "archive".to_string());
            format!("{base}.zip")
        }
        _ => format!("{timestamp}_archive.zip"),
    };
    safe_output_path(&output_dir.join(file_name))
}

pub fn readable_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut num = bytes as f64;
    for unit in SIZE_UNITS {
        if num.abs() < 1024.0 {
            return format!("{num:.1} {unit}");
        }
        num /= 1024.0;
    }
    format!("{num:.1} TB")
}

pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize_lexical(path));
    }
    let cwd = std::env::current_dir()?;
    Ok(normalize_lexical(&cwd.join(path)))
}

fn normalize_lexical(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = normalized.pop();
            }
            Component::Normal(segment) => normalized.push(segment),
        }
    }
    normalized
}
