//! Digest -> relative paths mapping, built once from the sources and once from the archive.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use serde::Serialize;

use crate::enumerate::FileRecord;
use crate::error::{Result, VerizipError};
use crate::hasher::{self, HashAlgorithm};
use crate::logging::Logger;
use crate::path_util::{OsKind, entry_name};

/// Paths per digest, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct HashIndex {
    entries: BTreeMap<String, Vec<String>>,
}

/// One reason two indices disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    MissingFromArchive {
        digest: String,
        expected: Vec<String>,
    },
    PathsDiffer {
        digest: String,
        source: Vec<String>,
        archive: Vec<String>,
    },
    UnexpectedInArchive {
        digest: String,
        found: Vec<String>,
    },
    CountDiffers {
        source: usize,
        archive: usize,
    },
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, digest: impl Into<String>, relative_path: impl Into<String>) {
        self.entries
            .entry(digest.into())
            .or_default()
            .push(relative_path.into());
    }

    /// Append every path of `other`, concatenating lists that share a digest.
    pub fn merge(&mut self, other: HashIndex) {
        for (digest, paths) in other.entries {
            self.entries.entry(digest).or_default().extend(paths);
        }
    }

    pub fn get(&self, digest: &str) -> Option<&[String]> {
        self.entries.get(digest).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Same digests, and per digest the same paths in any order.
    pub fn matches(&self, other: &HashIndex) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|(digest, paths)| {
                other
                    .entries
                    .get(digest)
                    .is_some_and(|other_paths| sorted(paths) == sorted(other_paths))
            })
    }

    /// Discrepancies from the point of view of `self` as the source index.
    pub fn diff(&self, archive: &HashIndex) -> Vec<Discrepancy> {
        let mut discrepancies = Vec::new();
        for (digest, paths) in &self.entries {
            match archive.entries.get(digest) {
                None => discrepancies.push(Discrepancy::MissingFromArchive {
                    digest: digest.clone(),
                    expected: paths.clone(),
                }),
                Some(archive_paths) if sorted(paths) != sorted(archive_paths) => {
                    discrepancies.push(Discrepancy::PathsDiffer {
                        digest: digest.clone(),
                        source: paths.clone(),
                        archive: archive_paths.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        for (digest, paths) in &archive.entries {
            if !self.entries.contains_key(digest) {
                discrepancies.push(Discrepancy::UnexpectedInArchive {
                    digest: digest.clone(),
                    found: paths.clone(),
                });
            }
        }
        discrepancies
    }
}

fn sorted(paths: &[String]) -> Vec<&str> {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted
}

fn quoted(paths: &[String]) -> String {
    paths
        .iter()
        .map(|path| format!("'{path}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFromArchive { digest, expected } => write!(
                f,
                "Hash '{digest}' not present in zip file (with expected files {})",
                quoted(expected)
            ),
            Self::PathsDiffer {
                digest,
                source,
                archive,
            } => write!(
                f,
                "Files for hash '{digest}' do not match between source and zip ([{}] in source - [{}] in zip)",
                quoted(source),
                quoted(archive)
            ),
            Self::UnexpectedInArchive { digest, found } => write!(
                f,
                "Hash '{digest}' present in zip file but not in source (with files {})",
                quoted(found)
            ),
            Self::CountDiffers { source, archive } => write!(
                f,
                "File count does not match between source and zip ({source} in source - {archive} in zip)"
            ),
        }
    }
}

/// Builds the source-side index. Every record must still be a regular file when it is hashed.
pub struct IndexBuilder<'a> {
    algorithm: HashAlgorithm,
    os: OsKind,
    logger: &'a dyn Logger,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(algorithm: HashAlgorithm, os: OsKind, logger: &'a dyn Logger) -> Self {
        Self {
            algorithm,
            os,
            logger,
        }
    }

    pub fn build(
        &self,
        records: &[FileRecord],
        common_root: Option<&str>,
        flatten: bool,
    ) -> Result<HashIndex> {
        let mut ordered: Vec<&FileRecord> = records.iter().collect();
        ordered.sort_by(|left, right| left.path.as_os_str().cmp(right.path.as_os_str()));

        let mut index = HashIndex::new();
        for record in ordered {
            let path = &record.path;
            let is_regular = match fs::metadata(path) {
                Ok(metadata) => metadata.is_file(),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
                Err(err) => return Err(VerizipError::io(path, err)),
            };
            if !is_regular {
                return Err(if path.exists() {
                    VerizipError::IrregularFile { path: path.clone() }
                } else {
                    VerizipError::FileVanished { path: path.clone() }
                });
            }

            let name = entry_name(path, common_root, flatten, self.os)?;
            let digest = hasher::hash_file(path, self.algorithm)
                .map_err(|err| VerizipError::from_source_io(path, err))?;
            self.logger
                .debug(&format!("{} {digest} {name}", self.algorithm.name()));
            index.insert(digest, name);
        }
        Ok(index)
    }
}
