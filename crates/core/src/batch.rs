use crate::error::ExtractError;
use crate::formats::extract_path;
use crate::indexer::discover_documents;
use crate::models::{BatchOptions, ExtractOptions, FileType, OutputOptions, SkippedFile};
use crate::render::write_artifacts;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub const ERROR_LOG_FILE_NAME: &str = "error_log.txt";

/// One source document and the artifacts written for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFile {
    pub source: PathBuf,
    pub file_type: FileType,
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: Vec<ExtractedFile>,
    pub failed: Vec<SkippedFile>,
    /// Set when a failure halted the run before every file was attempted.
    pub stopped_early: bool,
    pub error_log: Option<PathBuf>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Files to process: every supported document under a directory, or the
/// non-blank lines of a list file.
pub fn collect_batch_files(path: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    if !path.exists() {
        return Err(ExtractError::NotFound(path.to_path_buf()));
    }

    if path.is_dir() {
        return Ok(discover_documents(path));
    }

    let list = fs::read_to_string(path)?;
    Ok(list
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Extracts one file and writes its artifacts. Errors are returned as-is.
pub fn extract_file(
    path: &Path,
    extract: &ExtractOptions,
    output: &OutputOptions,
) -> Result<ExtractedFile, ExtractError> {
    let record = extract_path(path, extract)?;
    let artifacts = write_artifacts(&record, path, output, extract)?;

    Ok(ExtractedFile {
        source: path.to_path_buf(),
        file_type: record.file_type,
        artifacts,
    })
}

/// Writes `<path>: <error>` lines to `error_log.txt` in `dir`.
pub fn write_error_log(dir: &Path, failures: &[SkippedFile]) -> Result<PathBuf, ExtractError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(ERROR_LOG_FILE_NAME);
    let body: String = failures
        .iter()
        .map(|failure| format!("{}: {}\n", failure.path.display(), failure.reason))
        .collect();
    fs::write(&path, body)?;
    Ok(path)
}

fn finish(mut report: BatchReport, options: &BatchOptions) -> Result<BatchReport, ExtractError> {
    if !report.failed.is_empty() {
        let dir = options
            .output
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        report.error_log = Some(write_error_log(&dir, &report.failed)?);
    }

    info!(
        total = report.total,
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        stopped_early = report.stopped_early,
        "batch finished"
    );
    Ok(report)
}

fn record_outcome(
    report: &mut BatchReport,
    path: PathBuf,
    outcome: Result<ExtractedFile, ExtractError>,
) {
    match outcome {
        Ok(file) => {
            info!(source = %path.display(), file_type = %file.file_type, "extracted");
            report.succeeded.push(file);
        }
        Err(error) => {
            warn!(source = %path.display(), reason = %error, "extraction failed");
            report.failed.push(SkippedFile {
                path,
                reason: error.to_string(),
            });
        }
    }
}

/// Processes `files` in order. Unless `continue_on_error` is set, the first
/// failure stops the run.
pub fn run_batch(files: &[PathBuf], options: &BatchOptions) -> Result<BatchReport, ExtractError> {
    let mut report = BatchReport {
        total: files.len(),
        ..BatchReport::default()
    };

    for (position, path) in files.iter().enumerate() {
        let outcome = extract_file(path, &options.extract, &options.output);
        let failed = outcome.is_err();
        record_outcome(&mut report, path.clone(), outcome);

        if failed && !options.continue_on_error {
            report.stopped_early = position + 1 < files.len();
            break;
        }
    }

    finish(report, options)
}

/// Runs up to `options.jobs` extractions at once on the blocking pool.
///
/// Results are reported in input order. Without `continue_on_error`, a
/// failure stops new files from starting; extractions already running are
/// allowed to finish.
pub async fn run_batch_parallel(
    files: Vec<PathBuf>,
    options: BatchOptions,
) -> Result<BatchReport, ExtractError> {
    if options.jobs <= 1 {
        return tokio::task::spawn_blocking(move || run_batch(&files, &options))
            .await
            .map_err(|error| ExtractError::Worker(error.to_string()))?;
    }

    let total = files.len();
    let semaphore = Arc::new(Semaphore::new(options.jobs));
    let halted = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::with_capacity(total);

    for path in files {
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|error| ExtractError::Worker(error.to_string()))?;
        if halted.load(Ordering::SeqCst) {
            break;
        }

        let extract = options.extract.clone();
        let output = options.output.clone();
        let continue_on_error = options.continue_on_error;
        let halted = Arc::clone(&halted);

        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let outcome = extract_file(&path, &extract, &output);
            if outcome.is_err() && !continue_on_error {
                halted.store(true, Ordering::SeqCst);
            }
            (path, outcome)
        }));
    }

    let mut report = BatchReport {
        total,
        ..BatchReport::default()
    };
    let started = handles.len();
    for handle in handles {
        let (path, outcome) = handle
            .await
            .map_err(|error| ExtractError::Worker(error.to_string()))?;
        record_outcome(&mut report, path, outcome);
    }
    report.stopped_early = started < total;

    finish(report, &options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutputFormat;
    use tempfile::tempdir;

    fn library_with_failure(dir: &Path) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
        fs::write(dir.join("a.md"), "# A\nalpha\n")?;
        fs::write(dir.join("b.docx"), b"not a zip archive")?;
        fs::write(dir.join("c.md"), "# C\ngamma\n")?;
        Ok(collect_batch_files(dir)?)
    }

    fn options(output_dir: &Path, continue_on_error: bool, jobs: usize) -> BatchOptions {
        BatchOptions {
            continue_on_error,
            output: OutputOptions {
                format: OutputFormat::Txt,
                output_dir: Some(output_dir.to_path_buf()),
            },
            jobs,
            ..BatchOptions::default()
        }
    }

    #[test]
    fn directory_and_list_file_inputs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = library_with_failure(dir.path())?;
        assert_eq!(files.len(), 3);

        let list = dir.path().join("files.lst");
        fs::write(&list, "\n  one.pdf \n\ntwo.md\n")?;
        assert_eq!(
            collect_batch_files(&list)?,
            vec![PathBuf::from("one.pdf"), PathBuf::from("two.md")]
        );

        assert!(matches!(
            collect_batch_files(&dir.path().join("missing")),
            Err(ExtractError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn first_failure_stops_by_default_and_is_logged() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = library_with_failure(dir.path())?;
        let out = dir.path().join("out");

        let report = run_batch(&files, &options(&out, false, 1))?;

        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(report.stopped_early);
        assert!(!report.is_success());
        assert!(out.join("a.txt").exists());
        assert!(!out.join("c.txt").exists());

        let log = fs::read_to_string(out.join(ERROR_LOG_FILE_NAME))?;
        assert_eq!(log.lines().count(), 1);
        assert!(log.starts_with(&format!("{}: ", files[1].display())));
        Ok(())
    }

    #[test]
    fn continue_on_error_processes_remaining_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = library_with_failure(dir.path())?;
        let out = dir.path().join("out");

        let report = run_batch(&files, &options(&out, true, 1))?;

        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.stopped_early);
        assert_eq!(report.error_log, Some(out.join(ERROR_LOG_FILE_NAME)));
        Ok(())
    }

    #[test]
    fn clean_batch_writes_no_error_log() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("only.md"), "# Only\n")?;
        let out = dir.path().join("out");

        let report = run_batch(&collect_batch_files(dir.path())?, &options(&out, false, 1))?;

        assert!(report.is_success());
        assert_eq!(report.error_log, None);
        assert!(!out.join(ERROR_LOG_FILE_NAME).exists());
        assert_eq!(report.succeeded[0].file_type, FileType::Markdown);
        Ok(())
    }

    #[tokio::test]
    async fn parallel_batch_keeps_input_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let files = library_with_failure(dir.path())?;
        let out = dir.path().join("out");

        let report = run_batch_parallel(files.clone(), options(&out, true, 3)).await?;

        let sources: Vec<_> = report.succeeded.iter().map(|file| file.source.clone()).collect();
        assert_eq!(sources, vec![files[0].clone(), files[2].clone()]);
        assert_eq!(report.failed[0].path, files[1]);
        assert!(out.join(ERROR_LOG_FILE_NAME).exists());
        Ok(())
    }

    #[tokio::test]
    async fn parallel_batch_halts_after_leading_failure() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let broken = dir.path().join("broken.docx");
        fs::write(&broken, b"not a zip archive")?;
        let mut files = vec![broken.clone()];
        for number in 0..30 {
            let path = dir.path().join(format!("note{number:02}.md"));
            fs::write(&path, format!("# Note {number}\nbody\n"))?;
            files.push(path);
        }
        let out = dir.path().join("out");

        let report = run_batch_parallel(files.clone(), options(&out, false, 2)).await?;

        assert_eq!(report.total, files.len());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, broken);
        assert!(!report.is_success());
        assert!(report.stopped_early);

        let started = report.succeeded.len() + report.failed.len();
        assert!(started < files.len());
        let sources: Vec<_> = report.succeeded.iter().map(|file| file.source.clone()).collect();
        assert_eq!(sources, files[1..started].to_vec());
        assert!(!out.join("note29.txt").exists());

        let log = fs::read_to_string(out.join(ERROR_LOG_FILE_NAME))?;
        assert_eq!(log.lines().count(), 1);
        assert!(log.starts_with(&format!("{}: ", broken.display())));
        Ok(())
    }
}
