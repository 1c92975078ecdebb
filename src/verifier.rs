//! Orchestrates one run: enumerate, hash, write, re-read, compare, and clean up on failure.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;

use crate::archive::{self, ArchiveWriter};
use crate::config::ResolvedConfig;
use crate::enumerate::{FileEnumerator, FileRecord};
use crate::error::{Result, VerizipError};
use crate::hasher::HashAlgorithm;
use crate::index::{Discrepancy, HashIndex, IndexBuilder};
use crate::logging::Logger;
use crate::notify::NotificationSink;
use crate::path_util::{OsKind, readable_size, root_for_inputs};
use crate::report::{self, FailureReport, RunState};

/// A finalized archive whose source-side index is known but which has not been re-read yet.
#[derive(Debug, Clone)]
pub struct StagedArchive {
    pub path: PathBuf,
    pub source_index: HashIndex,
    pub file_count: usize,
    pub total_size: u64,
}

/// Summary of a run that ended in `Verified`.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedArchive {
    pub path: PathBuf,
    pub file_count: usize,
    pub total_size: u64,
    pub algorithm: HashAlgorithm,
    pub index: HashIndex,
}

pub struct Verifier<'a> {
    config: ResolvedConfig,
    os: OsKind,
    logger: &'a dyn Logger,
    notifier: &'a dyn NotificationSink,
    state: RunState,
}

impl<'a> Verifier<'a> {
    pub fn new(
        config: ResolvedConfig,
        logger: &'a dyn Logger,
        notifier: &'a dyn NotificationSink,
    ) -> Self {
        Self {
            config,
            os: OsKind::host(),
            logger,
            notifier,
            state: RunState::Enumerating,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// `create` followed by `verify`.
    pub fn run(&mut self) -> std::result::Result<VerifiedArchive, FailureReport> {
        let staged = self.create()?;
        self.verify(staged)
    }

    /// Writes and finalizes the archive. Any error removes the partial archive and writes the
    /// error report.
    pub fn create(&mut self) -> std::result::Result<StagedArchive, FailureReport> {
        let message = format!(
            "Zip file will be created at path '{}'",
            self.config.output_path.display()
        );
        self.logger.info(&message);
        self.notifier.notify(&message);

        match self.write_archive() {
            Ok(staged) => {
                self.state = RunState::Finalized;
                self.logger.info(&format!(
                    "'{}' finalised - will now be verified",
                    staged.path.display()
                ));
                Ok(staged)
            }
            Err(err) => Err(self.fail(err, Vec::new())),
        }
    }

    /// Re-reads the archive and compares it with the source index.
    pub fn verify(
        &mut self,
        staged: StagedArchive,
    ) -> std::result::Result<VerifiedArchive, FailureReport> {
        self.state = RunState::ReVerifying;
        let listing = match archive::read_index(&staged.path, self.config.algorithm) {
            Ok(listing) => listing,
            Err(err) => return Err(self.fail(err, Vec::new())),
        };

        if staged.source_index.matches(&listing.index) && staged.file_count == listing.entry_count
        {
            self.state = RunState::Verified;
            self.logger
                .info("Verification complete; no discrepancies identified");
            let message = format!("'{}' created successfully", staged.path.display());
            self.logger.info(&message);
            self.notifier.notify(&message);
            return Ok(VerifiedArchive {
                path: staged.path,
                file_count: staged.file_count,
                total_size: staged.total_size,
                algorithm: self.config.algorithm,
                index: listing.index,
            });
        }

        let mut discrepancies = staged.source_index.diff(&listing.index);
        if staged.file_count != listing.entry_count {
            discrepancies.push(Discrepancy::CountDiffers {
                source: staged.file_count,
                archive: listing.entry_count,
            });
        }
        let err = VerizipError::VerificationMismatch {
            archive: staged.path,
            discrepancies: discrepancies.len(),
        };
        Err(self.fail(err, discrepancies))
    }

    fn write_archive(&mut self) -> Result<StagedArchive> {
        let config = self.config.clone();
        let logger = self.logger;
        let root = root_for_inputs(&config.inputs, self.os);
        let root = root.as_deref();

        let mut writer = ArchiveWriter::create(&config.output_path, self.os, logger)?;
        let mut enumerator = FileEnumerator::new(config.enumerate, logger);
        let builder = IndexBuilder::new(config.algorithm, self.os, logger);

        let mut staged = StagedArchive {
            path: config.output_path.clone(),
            source_index: HashIndex::new(),
            file_count: 0,
            total_size: 0,
        };

        for input in &config.inputs {
            self.state = RunState::Enumerating;
            let is_dir = input.is_dir();
            let records = if is_dir {
                let mut files = enumerator.enumerate(&[input])?.files;
                // The archive itself may sit inside an input directory.
                files.retain(|record| record.path != config.output_path);
                let size: u64 = files.iter().map(|record| record.size).sum();
                logger.info(&format!(
                    "'{}' contains {} files ({}) for compression",
                    input.display(),
                    files.len(),
                    readable_size(size)
                ));
                staged.total_size += size;
                files
            } else {
                let record = single_file_record(input)?;
                staged.total_size += record.size;
                vec![record]
            };
            staged.file_count += records.len();

            self.state = RunState::Hashing;
            staged
                .source_index
                .merge(builder.build(&records, root, config.flatten)?);

            self.state = RunState::Writing;
            writer.write_files(&records, root, config.flatten)?;
            if is_dir {
                logger.info(&format!(
                    "'{}' contents added to zip successfully",
                    input.display()
                ));
            } else {
                logger.info(&format!("'{}' added to zip successfully", input.display()));
            }
        }

        staged.path = writer.finish()?;
        Ok(staged)
    }

    /// Moves to `Failed`: removes the archive, writes the report file, notifies.
    fn fail(&mut self, error: VerizipError, discrepancies: Vec<Discrepancy>) -> FailureReport {
        let failed_in = self.state;
        self.state = RunState::Failed;
        let archive = self.config.output_path.clone();
        self.logger.error(&error.to_string());

        let archive_removed = remove_archive(&archive, self.logger);
        let mut failure = FailureReport {
            archive,
            failed_in,
            error,
            discrepancies,
            report_path: None,
            archive_removed,
        };

        let path = report::report_path(&self.config.output_dir, &self.config.timestamp);
        match report::write_report(&path, &failure.render(Local::now())) {
            Ok(()) => failure.report_path = Some(path),
            Err(err) => self.logger.error(&format!(
                "failed to write error report '{}': {err}",
                path.display()
            )),
        }

        let message = match (&failure.report_path, failure.is_mismatch()) {
            (Some(report), true) => format!(
                "'{}' failed verification - see error log at '{}'",
                failure.archive.display(),
                report.display()
            ),
            (Some(report), false) => format!("Error occurred - see '{}'", report.display()),
            (None, _) => format!("Error occurred - {}", failure.error),
        };
        self.logger.error(&message);
        self.notifier.notify(&message);
        failure
    }
}

fn single_file_record(path: &Path) -> Result<FileRecord> {
    let metadata = fs::metadata(path).map_err(|err| VerizipError::from_source_io(path, err))?;
    Ok(FileRecord {
        path: path.to_path_buf(),
        size: metadata.len(),
    })
}

/// True when no archive is left behind.
fn remove_archive(path: &Path, logger: &dyn Logger) -> bool {
    if !path.is_file() {
        return true;
    }
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) => {
            logger.error(&format!(
                "failed to remove archive '{}': {err}",
                path.display()
            ));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::logging::MemoryLogger;
    use crate::notify::ConsoleSink;
    use std::cell::RefCell;
    use std::fs::File;
    use std::io::Write;
    use uuid::Uuid;
    use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

    const HI_SHA1: &str = "c22b5f9178342609428d6f51b2c5af4c0bde6a42";
    const HELLO_SHA1: &str = "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d";
    const TIMESTAMP: &str = "2024-03-09_14-05-07";

    struct Scratch(PathBuf);

    impl Scratch {
        fn new(label: &str) -> std::io::Result<Self> {
            let dir =
                std::env::temp_dir().join(format!("verizip-test-{label}-{}", Uuid::new_v4()));
            fs::create_dir_all(&dir)?;
            Ok(Self(dir))
        }

        fn file(&self, rel: &str, content: &str) -> std::io::Result<PathBuf> {
            let path = self.0.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, content)?;
            Ok(path)
        }

        fn out(&self) -> PathBuf {
            self.0.join("out")
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[derive(Default)]
    struct RecordingSink(RefCell<Vec<String>>);

    impl NotificationSink for RecordingSink {
        fn notify(&self, message: &str) {
            self.0.borrow_mut().push(message.to_string());
        }
    }

    fn resolve(
        inputs: Vec<PathBuf>,
        output: PathBuf,
        tweak: impl FnOnce(&mut RunConfig),
    ) -> ResolvedConfig {
        let mut config = RunConfig {
            inputs,
            output: Some(output),
            ..RunConfig::default()
        };
        tweak(&mut config);
        match config.resolve(TIMESTAMP) {
            Ok(resolved) => resolved,
            Err(err) => panic!("config did not resolve: {err}"),
        }
    }

    fn entry_names(path: &Path) -> Vec<String> {
        let archive = File::open(path)
            .map_err(zip::result::ZipError::from)
            .and_then(ZipArchive::new);
        match archive {
            Ok(archive) => archive.file_names().map(str::to_string).collect(),
            Err(err) => panic!("archive unreadable: {err}"),
        }
    }

    #[test]
    fn identical_files_verify_under_one_digest() -> std::io::Result<()> {
        let scratch = Scratch::new("verify-example")?;
        let x = scratch.file("a/x.txt", "hi")?;
        let y = scratch.file("a/y.txt", "hi")?;
        fs::create_dir_all(scratch.out())?;
        let config = resolve(vec![x, y], scratch.out().join("pair.zip"), |_| {});
        let logger = MemoryLogger::new();
        let sink = RecordingSink::default();

        let mut verifier = Verifier::new(config, &logger, &sink);
        let verified = match verifier.run() {
            Ok(verified) => verified,
            Err(report) => panic!("run failed: {report}"),
        };

        assert_eq!(verifier.state(), RunState::Verified);
        assert_eq!(verified.file_count, 2);
        assert_eq!(
            verified.index.get(HI_SHA1),
            Some(&["x.txt".to_string(), "y.txt".to_string()][..])
        );
        assert_eq!(entry_names(&verified.path), vec!["x.txt", "y.txt"]);

        let reread = archive::read_index(&verified.path, HashAlgorithm::Sha1);
        assert!(reread.is_ok_and(|listing| listing.index == verified.index));
        assert_eq!(sink.0.borrow().len(), 2);
        Ok(())
    }

    #[test]
    fn directory_inputs_keep_structure_and_flatten_under_root() -> std::io::Result<()> {
        let scratch = Scratch::new("verify-dirs")?;
        scratch.file("p/a/one.txt", "one")?;
        scratch.file("p/a/deep/two.txt", "two")?;
        scratch.file("p/b/one-copy.txt", "one")?;
        fs::create_dir_all(scratch.out())?;
        let inputs = vec![scratch.0.join("p").join("b"), scratch.0.join("p").join("a")];

        let plain = resolve(inputs.clone(), scratch.out().join("plain.zip"), |_| {});
        let flat = resolve(inputs, scratch.out().join("flat.zip"), |config| {
            config.root_directory = true;
        });
        let logger = MemoryLogger::new();

        let plain = Verifier::new(plain, &logger, &ConsoleSink).run();
        let flat = Verifier::new(flat, &logger, &ConsoleSink).run();
        let (plain, flat) = match (plain, flat) {
            (Ok(plain), Ok(flat)) => (plain, flat),
            (plain, flat) => panic!("runs failed: {:?} / {:?}", plain.err(), flat.err()),
        };

        assert_eq!(
            entry_names(&plain.path),
            vec!["b/one-copy.txt", "a/deep/two.txt", "a/one.txt"]
        );
        assert_eq!(
            entry_names(&flat.path),
            vec!["p/b/one-copy.txt", "p/a/deep/two.txt", "p/a/one.txt"]
        );
        let one_digest = "fe05bcdcdc4928012781a5f1a2a77cbb5398e106";
        assert_eq!(plain.index.get(one_digest).map(<[String]>::len), Some(2));
        assert_eq!(plain.file_count, 3);
        assert_eq!(plain.total_size, 9);
        Ok(())
    }

    #[test]
    fn exclusion_flags_control_archive_contents() -> std::io::Result<()> {
        let scratch = Scratch::new("verify-excl")?;
        scratch.file("data/keep.txt", "keep")?;
        scratch.file("data/.DS_Store", "mac")?;
        scratch.file("data/$RECYCLE.BIN/deleted.txt", "bin")?;
        fs::create_dir_all(scratch.out())?;
        let input = vec![scratch.0.join("data")];

        let included = resolve(input.clone(), scratch.out().join("all.zip"), |_| {});
        let excluded = resolve(input, scratch.out().join("some.zip"), |config| {
            config.ignore_dotfiles = true;
            config.ignore_windows_volume_folders = true;
        });
        let logger = MemoryLogger::new();

        let included = Verifier::new(included, &logger, &ConsoleSink).run();
        let excluded = Verifier::new(excluded, &logger, &ConsoleSink).run();
        let (included, excluded) = match (included, excluded) {
            (Ok(included), Ok(excluded)) => (included, excluded),
            (included, excluded) => {
                panic!("runs failed: {:?} / {:?}", included.err(), excluded.err())
            }
        };

        assert_eq!(
            entry_names(&included.path),
            vec!["data/$RECYCLE.BIN/deleted.txt", "data/.DS_Store", "data/keep.txt"]
        );
        assert_eq!(entry_names(&excluded.path), vec!["data/keep.txt"]);
        assert_eq!(excluded.index.path_count(), 1);
        Ok(())
    }

    #[test]
    fn corrupted_archive_fails_with_digest_in_report() -> std::io::Result<()> {
        let scratch = Scratch::new("verify-corrupt")?;
        let x = scratch.file("a/x.txt", "hi")?;
        let y = scratch.file("a/y.txt", "hello")?;
        fs::create_dir_all(scratch.out())?;
        let config = resolve(vec![x, y], scratch.out().join("bad.zip"), |_| {});
        let logger = MemoryLogger::new();
        let sink = RecordingSink::default();

        let mut verifier = Verifier::new(config, &logger, &sink);
        let staged = match verifier.create() {
            Ok(staged) => staged,
            Err(report) => panic!("create failed: {report}"),
        };
        assert_eq!(verifier.state(), RunState::Finalized);

        // Same entry names, one entry's bytes changed.
        let mut zip = ZipWriter::new(File::create(&staged.path)?);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file("x.txt", options)?;
        zip.write_all(b"ho")?;
        zip.start_file("y.txt", options)?;
        zip.write_all(b"hello")?;
        zip.finish()?;

        let failure = match verifier.verify(staged) {
            Ok(verified) => panic!("corruption went unnoticed: {verified:?}"),
            Err(failure) => failure,
        };

        assert_eq!(verifier.state(), RunState::Failed);
        assert_eq!(failure.failed_in, RunState::ReVerifying);
        assert!(failure.is_mismatch());
        assert!(failure.archive_removed);
        assert!(!failure.archive.exists());
        assert!(failure.discrepancies.contains(&Discrepancy::MissingFromArchive {
            digest: HI_SHA1.to_string(),
            expected: vec!["x.txt".to_string()],
        }));
        assert!(failure.discrepancies.iter().all(|discrepancy| !discrepancy
            .to_string()
            .contains(HELLO_SHA1)));

        let report_path = failure.report_path.clone().unwrap_or_default();
        assert_eq!(
            report_path,
            scratch.out().join(format!("{TIMESTAMP}_verizip_error.txt"))
        );
        let report = fs::read_to_string(&report_path)?;
        assert!(report.contains(HI_SHA1));
        assert!(
            sink.0
                .borrow()
                .iter()
                .any(|message| message.contains("failed verification"))
        );
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn broken_link_aborts_and_removes_partial_archive() -> std::io::Result<()> {
        let scratch = Scratch::new("verify-abort")?;
        scratch.file("data/a.txt", "a")?;
        std::os::unix::fs::symlink(scratch.0.join("nowhere"), scratch.0.join("data/b.txt"))?;
        fs::create_dir_all(scratch.out())?;
        let config = resolve(
            vec![scratch.0.join("data")],
            scratch.out().join("x.zip"),
            |_| {},
        );
        let logger = MemoryLogger::new();

        let mut verifier = Verifier::new(config, &logger, &ConsoleSink);
        let failure = match verifier.run() {
            Ok(verified) => panic!("expected failure, got {verified:?}"),
            Err(failure) => failure,
        };

        assert_eq!(failure.failed_in, RunState::Enumerating);
        assert!(matches!(failure.error, VerizipError::InaccessiblePath { .. }));
        assert!(!scratch.out().join("x.zip").exists());
        let report = fs::read_to_string(failure.report_path.clone().unwrap_or_default())?;
        assert!(report.contains("Exception occurred during creation of zip file"));
        assert!(report.contains("b.txt"));
        Ok(())
    }

    #[test]
    fn same_content_across_inputs_merges_into_one_digest() -> std::io::Result<()> {
        let scratch = Scratch::new("verify-merge")?;
        scratch.file("m/first/hello.txt", "hello")?;
        let second = scratch.file("m/hello-again.txt", "hello")?;
        fs::create_dir_all(scratch.out())?;
        let config = resolve(
            vec![scratch.0.join("m").join("first"), second],
            scratch.out().join("merged.zip"),
            |_| {},
        );
        let logger = MemoryLogger::new();

        let verified = match Verifier::new(config, &logger, &ConsoleSink).run() {
            Ok(verified) => verified,
            Err(report) => panic!("run failed: {report}"),
        };

        assert_eq!(verified.index.len(), 1);
        assert_eq!(
            verified.index.get(HELLO_SHA1),
            Some(&["first/hello.txt".to_string(), "hello-again.txt".to_string()][..])
        );
        Ok(())
    }

    #[test]
    fn archive_inside_input_directory_is_not_its_own_source() -> std::io::Result<()> {
        let scratch = Scratch::new("verify-self")?;
        scratch.file("data/a.txt", "hi")?;
        scratch.file("data/b.txt", "hello")?;
        let output = scratch.0.join("data").join("out.zip");
        let config = resolve(vec![scratch.0.join("data")], output.clone(), |_| {});
        let logger = MemoryLogger::new();

        let verified = match Verifier::new(config, &logger, &ConsoleSink).run() {
            Ok(verified) => verified,
            Err(report) => panic!("run failed: {report}"),
        };

        assert_eq!(verified.path, output);
        assert_eq!(verified.file_count, 2);
        assert_eq!(verified.total_size, 7);
        assert_eq!(entry_names(&output), vec!["data/a.txt", "data/b.txt"]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn fifo_in_input_directory_fails_hashing() -> std::io::Result<()> {
        let scratch = Scratch::new("verify-fifo")?;
        scratch.file("data/a.txt", "a")?;
        let fifo = scratch.0.join("data").join("pipe");
        let status = std::process::Command::new("mkfifo").arg(&fifo).status()?;
        assert!(status.success(), "mkfifo exited with {status}");
        fs::create_dir_all(scratch.out())?;
        let config = resolve(
            vec![scratch.0.join("data")],
            scratch.out().join("fifo.zip"),
            |_| {},
        );
        let logger = MemoryLogger::new();

        let failure = match Verifier::new(config, &logger, &ConsoleSink).run() {
            Ok(verified) => panic!("expected failure, got {verified:?}"),
            Err(failure) => failure,
        };

        assert_eq!(failure.failed_in, RunState::Hashing);
        match &failure.error {
            VerizipError::IrregularFile { path } => assert_eq!(path, &fifo),
            other => panic!("expected IrregularFile, got {other:?}"),
        }
        assert!(failure.archive_removed);
        assert!(!scratch.out().join("fifo.zip").exists());

        let error_line = failure.error.to_string();
        let logged = logger
            .lines()
            .iter()
            .filter(|(_, line)| *line == error_line)
            .count();
        assert_eq!(logged, 1);
        Ok(())
    }
}
