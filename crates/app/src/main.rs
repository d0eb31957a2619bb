use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docshelf_core::{
    build_index, collect_batch_files, default_index_path, extract_file, format_report,
    load_catalog, render_catalog, run_batch_parallel, search_library, BatchOptions,
    ExtractOptions, IndexOptions, OutputFormat, OutputOptions, SearchOptions,
    DEFAULT_CONTEXT_CHARS, SUPPORTED_EXTENSIONS,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docshelf", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Show debug logs and full error details.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Txt,
    Json,
    Both,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Txt => OutputFormat::Txt,
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Both => OutputFormat::Both,
        }
    }
}

#[derive(clap::Args)]
struct ArtifactArgs {
    /// Directory for written artifacts. Defaults to the source directory.
    #[arg(long, short)]
    output_dir: Option<PathBuf>,

    /// Artifact format.
    #[arg(long, value_enum, default_value = "txt")]
    format: FormatArg,

    /// Shorthand for `--format json`.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Drop author, subject, keywords and format extras.
    #[arg(long, default_value_t = false)]
    no_metadata: bool,

    /// Skip table of contents extraction.
    #[arg(long, default_value_t = false)]
    no_toc: bool,
}

impl ArtifactArgs {
    fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            include_metadata: !self.no_metadata,
            include_toc: !self.no_toc,
        }
    }

    fn output_options(&self) -> OutputOptions {
        OutputOptions {
            format: if self.json {
                OutputFormat::Json
            } else {
                self.format.into()
            },
            output_dir: self.output_dir.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Extract one PDF, Markdown or Word document.
    Extract {
        file: PathBuf,
        #[command(flatten)]
        artifacts: ArtifactArgs,
    },
    /// Extract every document in a folder or listed in a file.
    Batch {
        /// Folder (searched recursively) or newline-delimited file list.
        path: PathBuf,
        #[command(flatten)]
        artifacts: ArtifactArgs,
        /// Keep going after a file fails.
        #[arg(long, default_value_t = false)]
        continue_on_error: bool,
        /// Number of documents extracted at once.
        #[arg(long, short, default_value = "1")]
        jobs: usize,
    },
    /// Build or refresh the library index.
    Index {
        #[arg(long, env = "DOCSHELF_LIBRARY", default_value = ".")]
        library: PathBuf,
        /// Index file. Defaults to `<library>/library_index.json`.
        #[arg(long)]
        index: Option<PathBuf>,
        /// Rebuild every entry even when its hash is unchanged.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print the library catalog.
    Catalog {
        #[arg(long, env = "DOCSHELF_LIBRARY", default_value = ".")]
        library: PathBuf,
        #[arg(long)]
        index: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Search extracted text across the library.
    Search {
        pattern: String,
        #[arg(long, env = "DOCSHELF_LIBRARY", default_value = ".")]
        library: PathBuf,
        /// Treat the pattern as a regular expression.
        #[arg(long, short, default_value_t = false)]
        regex: bool,
        #[arg(long, short, default_value_t = false)]
        case_sensitive: bool,
        /// Characters of context on each side of a match.
        #[arg(long, env = "DOCSHELF_CONTEXT_CHARS", default_value_t = DEFAULT_CONTEXT_CHARS)]
        context: usize,
        /// Maximum matches reported per document.
        #[arg(long)]
        max_results: Option<usize>,
        #[arg(long)]
        index: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn run(command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Extract { file, artifacts } => {
            let extracted = extract_file(
                &file,
                &artifacts.extract_options(),
                &artifacts.output_options(),
            )?;
            println!("✓ Extracted {} ({})", file_label(&file), extracted.file_type);
            for artifact in &extracted.artifacts {
                println!("  {}", artifact.display());
            }
            Ok(true)
        }
        Command::Batch {
            path,
            artifacts,
            continue_on_error,
            jobs,
        } => {
            let files = collect_batch_files(&path)?;
            if files.is_empty() {
                println!("No supported files found to process.");
                println!("Supported formats: {}", SUPPORTED_EXTENSIONS.join(", "));
                return Ok(true);
            }

            println!("Processing {} files...", files.len());
            let options = BatchOptions {
                continue_on_error,
                output: artifacts.output_options(),
                extract: artifacts.extract_options(),
                jobs,
            };
            let report = run_batch_parallel(files, options).await?;

            for file in &report.succeeded {
                println!("✓ {} ({})", file_label(&file.source), file.file_type);
            }
            for failure in &report.failed {
                println!("✗ {}: {}", file_label(&failure.path), failure.reason);
            }
            if report.stopped_early {
                println!("Stopping due to error. Use --continue-on-error to process remaining files.");
            }

            println!();
            println!("Completed: {} files", report.succeeded.len());
            if !report.failed.is_empty() {
                println!("Failed: {} files", report.failed.len());
            }
            if let Some(log) = &report.error_log {
                println!("Error log saved to: {}", log.display());
            }
            Ok(report.is_success())
        }
        Command::Index {
            library,
            index,
            force,
        } => {
            let options = IndexOptions {
                index_path: index,
                force_reindex: force,
            };
            let report = build_index(&library, &options)?;

            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
            }
            println!(
                "Indexed {} documents ({} extracted, {} unchanged) -> {}",
                report.catalog.total_documents,
                report.catalog.extracted_count,
                report.stats.unchanged,
                report.index_path.display()
            );
            Ok(true)
        }
        Command::Catalog {
            library,
            index,
            json,
        } => {
            let index_path = index.unwrap_or_else(|| default_index_path(&library));
            let catalog = load_catalog(&index_path).with_context(|| {
                format!(
                    "no library index at {}; run `docshelf index` first",
                    index_path.display()
                )
            })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                println!("{}", render_catalog(&catalog));
            }
            Ok(true)
        }
        Command::Search {
            pattern,
            library,
            regex,
            case_sensitive,
            context,
            max_results,
            index,
            json,
        } => {
            let options = SearchOptions {
                pattern,
                is_regex: regex,
                case_sensitive,
                context_chars: context,
                max_results_per_file: max_results,
                index_path: index,
            };
            let report = search_library(&library, &options)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", format_report(&report));
            }
            Ok(report.total_matches > 0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "docshelf boot"
    );

    match run(cli.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("Error: {error}");
            if cli.verbose {
                eprintln!("{error:?}");
            }
            ExitCode::FAILURE
        }
    }
}
