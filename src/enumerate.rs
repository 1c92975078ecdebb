//! Deterministic recursive listing of the files under a set of roots.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, VerizipError, quoted_list};
use crate::logging::Logger;

/// Folder names that only belong in the root of a Windows volume.
pub const RESERVED_FOLDERS: [&str; 2] = ["$RECYCLE.BIN", "System Volume Information"];

/// A file found during enumeration, with its size at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Default)]
pub struct Enumeration {
    pub files: Vec<FileRecord>,
    pub total_size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerateOptions {
    pub ignore_dotfiles: bool,
    pub ignore_reserved_folders: bool,
}

/// Walks input roots. Reserved-folder sightings are remembered for the enumerator's lifetime, so a
/// single enumerator should be shared by every input of a run.
pub struct FileEnumerator<'a> {
    options: EnumerateOptions,
    logger: &'a dyn Logger,
    reserved_seen: BTreeMap<String, Vec<PathBuf>>,
}

impl<'a> FileEnumerator<'a> {
    pub fn new(options: EnumerateOptions, logger: &'a dyn Logger) -> Self {
        Self {
            options,
            logger,
            reserved_seen: BTreeMap::new(),
        }
    }

    /// Every non-directory entry under `roots`, sorted by absolute path. Any unreadable path aborts
    /// the whole listing.
    pub fn enumerate<P: AsRef<Path>>(&mut self, roots: &[P]) -> Result<Enumeration> {
        let mut sorted_roots: Vec<&Path> = roots.iter().map(AsRef::as_ref).collect();
        sorted_roots.sort_by(|left, right| left.as_os_str().cmp(right.as_os_str()));

        let mut enumeration = Enumeration::default();
        for root in sorted_roots {
            self.walk_root(root, &mut enumeration)?;
        }

        enumeration
            .files
            .sort_by(|left, right| left.path.as_os_str().cmp(right.path.as_os_str()));
        Ok(enumeration)
    }

    pub fn reserved_sightings(&self) -> &BTreeMap<String, Vec<PathBuf>> {
        &self.reserved_seen
    }

    fn walk_root(&mut self, root: &Path, enumeration: &mut Enumeration) -> Result<()> {
        let options = self.options;
        let logger = self.logger;
        let reserved_seen = &mut self.reserved_seen;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| keep_entry(entry, root, options, logger, reserved_seen));

        for entry in walker {
            let entry = entry.map_err(|err| walk_error(err, root))?;
            let file_type = entry.file_type();
            if file_type.is_dir() {
                continue;
            }

            let metadata = if file_type.is_symlink() {
                match fs::metadata(entry.path()) {
                    Ok(metadata) if metadata.is_dir() => continue,
                    Ok(metadata) => metadata,
                    Err(source) => {
                        return Err(VerizipError::InaccessiblePath {
                            path: entry.into_path(),
                            source: Some(source),
                        });
                    }
                }
            } else {
                entry.metadata().map_err(|err| walk_error(err, root))?
            };

            enumeration.total_size += metadata.len();
            enumeration.files.push(FileRecord {
                path: entry.into_path(),
                size: metadata.len(),
            });
        }

        Ok(())
    }
}

fn keep_entry(
    entry: &DirEntry,
    root: &Path,
    options: EnumerateOptions,
    logger: &dyn Logger,
    reserved_seen: &mut BTreeMap<String, Vec<PathBuf>>,
) -> bool {
    if entry.depth() == 0 {
        return true;
    }

    let name = entry.file_name().to_string_lossy();
    if options.ignore_dotfiles && name.starts_with('.') {
        return false;
    }

    if options.ignore_reserved_folders
        && entry.file_type().is_dir()
        && RESERVED_FOLDERS.contains(&&*name)
    {
        let occurrences = reserved_seen.entry(name.to_string()).or_default();
        occurrences.push(entry.path().to_path_buf());
        if occurrences.len() == 1 {
            logger.info(&format!(
                "'{}' will not be processed (Windows system directory)",
                entry.path().display()
            ));
        } else {
            logger.warn(&format!(
                "Excluded folder '{name}' has been excluded more than once within path '{}' - \
                 this is unexpected, as this folder should only be found in the root of a drive. \
                 Be advised that the following folders will NOT be processed: {}",
                root.display(),
                quoted_list(occurrences.as_slice())
            ));
        }
        return false;
    }

    true
}

fn walk_error(err: walkdir::Error, root: &Path) -> VerizipError {
    let path = err
        .path()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.to_path_buf());
    VerizipError::InaccessiblePath {
        path,
        source: err.into_io_error(),
    }
}
