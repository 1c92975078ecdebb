//! Zip writing for the sources and zip reading for the post-write check.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Local, Timelike};
use zip::{
    CompressionMethod, DateTime as ZipDateTime, ZipArchive, ZipWriter, write::SimpleFileOptions,
};

use crate::enumerate::FileRecord;
use crate::error::{Result, VerizipError};
use crate::hasher::{self, HashAlgorithm};
use crate::index::HashIndex;
use crate::logging::Logger;
use crate::path_util::{OsKind, entry_name};

/// Streams source files into a deflated zip with ZIP64 extensions on every entry.
pub struct ArchiveWriter<'a> {
    path: PathBuf,
    zip: ZipWriter<File>,
    names: HashSet<String>,
    os: OsKind,
    logger: &'a dyn Logger,
}

impl<'a> ArchiveWriter<'a> {
    /// Creates (or truncates) the archive file at `path`.
    pub fn create(path: &Path, os: OsKind, logger: &'a dyn Logger) -> Result<Self> {
        let file = File::create(path).map_err(|err| VerizipError::io(path, err))?;
        Ok(Self {
            path: path.to_path_buf(),
            zip: ZipWriter::new(file),
            names: HashSet::new(),
            os,
            logger,
        })
    }

    pub fn entries_written(&self) -> usize {
        self.names.len()
    }

    /// Adds `records` in sorted order. Entry names are derived exactly as the source index derives
    /// them.
    pub fn write_files(
        &mut self,
        records: &[FileRecord],
        common_root: Option<&str>,
        flatten: bool,
    ) -> Result<()> {
        let mut ordered: Vec<&FileRecord> = records.iter().collect();
        ordered.sort_by(|left, right| left.path.as_os_str().cmp(right.path.as_os_str()));

        for record in ordered {
            let name = entry_name(&record.path, common_root, flatten, self.os)?;
            self.write_file(&record.path, name)?;
        }
        Ok(())
    }

    fn write_file(&mut self, path: &Path, name: String) -> Result<()> {
        let mut input =
            File::open(path).map_err(|err| VerizipError::from_source_io(path, err))?;
        let metadata = input
            .metadata()
            .map_err(|err| VerizipError::from_source_io(path, err))?;
        if !metadata.is_file() {
            return Err(VerizipError::IrregularFile {
                path: path.to_path_buf(),
            });
        }
        if !self.names.insert(name.clone()) {
            return Err(VerizipError::DuplicateEntry {
                name,
                path: path.to_path_buf(),
            });
        }

        self.zip
            .start_file(name.clone(), entry_options(&metadata))
            .map_err(|source| VerizipError::Zip {
                name: name.clone(),
                source,
            })?;
        io::copy(&mut input, &mut self.zip)
            .map_err(|err| VerizipError::from_source_io(path, err))?;
        self.logger.debug(&format!("added '{name}'"));
        Ok(())
    }

    /// Writes the central directory and flushes the archive to disk.
    pub fn finish(self) -> Result<PathBuf> {
        let file = self.zip.finish().map_err(|source| VerizipError::Zip {
            name: self.path.display().to_string(),
            source,
        })?;
        file.sync_all()
            .map_err(|err| VerizipError::io(&self.path, err))?;
        Ok(self.path)
    }
}

fn entry_options(metadata: &fs::Metadata) -> SimpleFileOptions {
    let mut options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    if let Some(modified) = zip_timestamp(metadata) {
        options = options.last_modified_time(modified);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        options = options.unix_permissions(metadata.permissions().mode());
    }
    options
}

/// Source mtime in local time; zip cannot represent dates before 1980.
fn zip_timestamp(metadata: &fs::Metadata) -> Option<ZipDateTime> {
    let modified: DateTime<Local> = metadata.modified().ok()?.into();
    ZipDateTime::from_date_and_time(
        u16::try_from(modified.year()).ok()?,
        modified.month() as u8,
        modified.day() as u8,
        modified.hour() as u8,
        modified.minute() as u8,
        modified.second() as u8,
    )
    .ok()
}

/// What a finished archive actually contains.
#[derive(Debug, Clone, Default)]
pub struct ArchiveListing {
    pub index: HashIndex,
    pub entry_count: usize,
}

/// Reopens `path` and hashes every entry in stored order.
pub fn read_index(path: &Path, algorithm: HashAlgorithm) -> Result<ArchiveListing> {
    let read_error = |message: String| VerizipError::ArchiveRead {
        archive: path.to_path_buf(),
        message,
    };

    let file = File::open(path).map_err(|err| VerizipError::io(path, err))?;
    let mut archive = ZipArchive::new(file).map_err(|err| read_error(err.to_string()))?;

    let mut listing = ArchiveListing {
        index: HashIndex::new(),
        entry_count: archive.len(),
    };
    for idx in 0..archive.len() {
        let mut entry = archive
            .by_index(idx)
            .map_err(|err| read_error(format!("entry index {idx}: {err}")))?;
        let name = entry.name().to_string();
        let digest = hasher::hash_reader(&mut entry, algorithm)
            .map_err(|err| read_error(format!("entry '{name}': {err}")))?;
        listing.index.insert(digest, name);
    }
    Ok(listing)
}
