//! CLI binary for lecture-ingest.
//!
//! A thin shim over the library crate: maps flags onto `PipelineConfig` and
//! `ServiceConfig`, drives a progress bar, and prints results.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use lecture_ingest::storage::records::DEFAULT_HISTORY_LIMIT;
use lecture_ingest::{
    delete_document, ingest_and_save, write_document, DocumentStore, IngestOutput,
    IngestProgressCallback, OutputMode, Pipeline, PipelineConfig, ProgressCallback, ServiceConfig,
    SupabaseBlobStore, SupabaseDocumentStore,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over pages, with one log line per enriched image.
struct CliProgressCallback {
    bar: ProgressBar,
    degraded: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            degraded: AtomicUsize::new(0),
        })
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_ingest_start(&self, total_pages: usize) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        self.bar.set_length(total_pages as u64);
        self.bar.set_prefix("Ingesting");
    }

    fn on_page_start(&self, page_num: usize, _total_pages: usize) {
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, _total_pages: usize, _fraction: f64) {
        self.bar.set_position(page_num as u64);
    }

    fn on_image_enriched(&self, page_num: usize, ordinal: usize, degraded: bool) {
        let mark = if degraded {
            self.degraded.fetch_add(1, Ordering::SeqCst);
            yellow("⚠")
        } else {
            green("✓")
        };
        self.bar
            .println(format!("  {} Image {:>3}  {}", mark, ordinal, dim(&format!("page {page_num}"))));
    }

    fn on_ingest_complete(&self, total_pages: usize, images: usize) {
        self.bar.finish_and_clear();
        let degraded = self.degraded.load(Ordering::SeqCst);
        if degraded == 0 {
            eprintln!(
                "{} {} pages, {} images",
                green("✔"),
                bold(&total_pages.to_string()),
                images
            );
        } else {
            eprintln!(
                "{} {} pages, {} images ({} with placeholders)",
                yellow("⚠"),
                bold(&total_pages.to_string()),
                images,
                degraded
            );
        }
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest a lecture and save it to the upload history
  lecture-ingest process week3.pdf --subject Pharmacology

  # One record per slide, also written to a file, not saved
  lecture-ingest process week3.pdf --subject Pharmacology --mode structured -o week3.json --no-save

  # Recent uploads for one subject
  lecture-ingest history --subject Pharmacology --limit 10

  # Delete an upload and its images
  lecture-ingest delete 42

ENVIRONMENT VARIABLES:
  SUPABASE_URL               Base URL for blob storage and the history table
  SUPABASE_SERVICE_ROLE_KEY  Service key for both
  LECTURE_IMAGE_BUCKET       Storage bucket (default: lecture-images)
  LECTURE_DOCUMENTS_TABLE    History table (default: documents)
  OPENAI_API_KEY             OpenAI API key (vision model)
  EDGEQUAKE_LLM_PROVIDER     Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL            Override model ID
  PDFIUM_LIB_DIR             Directory containing libpdfium
"#;

/// Ingest lecture PDFs into text with described inline images.
#[derive(Parser, Debug)]
#[command(
    name = "lecture-ingest",
    version,
    about = "Turn lecture PDFs into reading-order text with AI-described images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LECTURE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "LECTURE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest one PDF.
    Process(ProcessArgs),
    /// List recent uploads.
    History {
        /// Only uploads with this subject.
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// Delete an upload and, best-effort, its stored images.
    Delete {
        /// Upload identifier as shown by `history`.
        id: String,
    },
}

#[derive(clap::Args, Debug)]
struct ProcessArgs {
    /// Local PDF file.
    input: PathBuf,

    /// Subject label stored with the upload.
    #[arg(short, long, env = "LECTURE_SUBJECT")]
    subject: String,

    #[arg(long, value_enum, default_value = "flattened")]
    mode: ModeArg,

    /// Also write the content to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not insert a row into the upload history.
    #[arg(long)]
    no_save: bool,

    /// Minimum image size in bytes (default depends on mode).
    #[arg(long)]
    min_image_bytes: Option<usize>,

    /// Wait after each image, in milliseconds.
    #[arg(long, env = "LECTURE_IMAGE_DELAY_MS", default_value_t = 1000)]
    image_delay_ms: u64,

    /// Vision model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Per-image vision call timeout in seconds.
    #[arg(long, default_value_t = 60)]
    api_timeout: u64,

    /// Print the full run output as JSON instead of the content.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long)]
    no_progress: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Flattened,
    Structured,
}

impl From<ModeArg> for OutputMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Flattened => OutputMode::Flattened,
            ModeArg::Structured => OutputMode::Structured,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The progress bar replaces INFO logs when it is shown.
    let show_progress = match &cli.command {
        Command::Process(args) => !cli.quiet && !args.no_progress && !args.json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let services = ServiceConfig::from_env();

    match cli.command {
        Command::Process(ref args) => process(args, &services, show_progress, cli.quiet).await,
        Command::History { subject, limit } => history(&services, subject.as_deref(), limit).await,
        Command::Delete { id } => delete(&services, &id).await,
    }
}

async fn process(
    args: &ProcessArgs,
    services: &ServiceConfig,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let filename = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.input.display().to_string());

    let progress = show_progress.then(|| {
        let cb: ProgressCallback = CliProgressCallback::new();
        cb
    });
    let config = build_config(args, progress)?;
    let pipeline = Pipeline::from_services(config, services).context("Vision provider setup failed")?;

    let output = if args.no_save {
        pipeline.ingest(bytes, &filename, &args.subject).await?
    } else {
        let store = SupabaseDocumentStore::new(services.clone());
        let report = ingest_and_save(&pipeline, &store, bytes, &filename, &args.subject).await?;
        match &report.saved {
            Ok(entry) if !quiet => eprintln!("{} Saved as id {}", green("✔"), bold(&entry.id)),
            Ok(_) => {}
            Err(e) => eprintln!("{} Not saved to history: {}", yellow("⚠"), e),
        }
        report.output
    };

    if let Some(ref path) = args.output {
        write_document(&output.document, path).await?;
        if !quiet {
            eprintln!("{} Wrote {}", green("✔"), path.display());
        }
    }

    print_output(&output, args.json)?;

    if !quiet {
        for warning in &output.warnings {
            eprintln!("  {} {}", yellow("⚠"), warning);
        }
        eprintln!(
            "   {}",
            dim(&format!(
                "{} images enriched, {} skipped, {}ms total",
                output.stats.images_enriched,
                output.stats.images_skipped,
                output.stats.total_duration_ms
            ))
        );
    }
    Ok(())
}

fn print_output(output: &IngestOutput, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if json {
        let rendered = serde_json::to_string_pretty(output).context("Failed to serialise output")?;
        writeln!(handle, "{rendered}")?;
    } else {
        let content = output.document.serialized_content();
        handle.write_all(content.as_bytes())?;
        if !content.ends_with('\n') {
            handle.write_all(b"\n")?;
        }
    }
    Ok(())
}

async fn history(services: &ServiceConfig, subject: Option<&str>, limit: usize) -> Result<()> {
    require_services(services)?;
    let store = SupabaseDocumentStore::new(services.clone());
    let entries = match subject {
        Some(s) => store.list_by_subject(s, limit).await,
        None => store.list_recent(limit).await,
    }
    .context("Failed to load upload history")?;

    if entries.is_empty() {
        eprintln!("{}", dim("No uploads yet."));
        return Ok(());
    }
    for entry in entries {
        println!(
            "{:>6}  {}  {:<40}  {:<20}  {} slides",
            entry.id,
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.filename,
            entry.subject,
            entry.slide_count()
        );
    }
    Ok(())
}

async fn delete(services: &ServiceConfig, id: &str) -> Result<()> {
    require_services(services)?;
    let store = SupabaseDocumentStore::new(services.clone());
    let blobs = SupabaseBlobStore::new(services.clone());
    let report = delete_document(&store, &blobs, id)
        .await
        .with_context(|| format!("Failed to delete document {id}"))?;

    eprintln!(
        "{} Deleted {} ({} images removed)",
        green("✔"),
        bold(&report.id),
        report.blobs_removed.len()
    );
    for failure in &report.blob_failures {
        eprintln!("  {} {}", yellow("⚠"), failure);
    }
    if let Some(ref e) = report.lookup_error {
        eprintln!("  {} images not cleaned up: {}", yellow("⚠"), e);
    }
    Ok(())
}

fn require_services(services: &ServiceConfig) -> Result<()> {
    if !services.is_configured() {
        bail!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set");
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(args: &ProcessArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .mode(args.mode.into())
        .image_delay_ms(args.image_delay_ms)
        .api_timeout_secs(args.api_timeout);

    if let Some(n) = args.min_image_bytes {
        builder = builder.min_image_bytes(n);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

