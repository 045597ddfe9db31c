//! CLI binary for osm-pipeline.
//!
//! A thin shim over the library crate that maps CLI flags to `OsmConfig`,
//! builds the stage lists for one document and prints a summary.

use anyhow::{Context, Result};
use clap::Parser;
use osm_pipeline::pipeline::extractors::{
    Extractor, LlmExtractor, RTransparentExtractor, DEFAULT_LLM_MODEL,
};
use osm_pipeline::pipeline::parsers::{Parser as DocParser, ScienceBeamParser};
use osm_pipeline::pipeline::upload::OsmSaver;
use osm_pipeline::{
    OsmConfig, OsmError, Pipeline, PipelineOutput, RecordContext, ReqwestTransport, Savers,
    Transport,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF: converted with ScienceBeam, metrics from rtransparent
  osm -f paper.pdf -u PMC1234567

  # PubMed Central XML, both extractors
  osm -f PMC1234567.xml -u PMC1234567 --parser pmc --extractor rtransparent --extractor llm

  # Services already running (skip the container start-up backoff)
  osm -f paper.pdf -u my-paper --user-managed-compose

  # Re-run over previous outputs
  osm -f paper.pdf -u my-paper --overwrite

OUTPUTS:
  <output-dir>/<stem>.xml            converted document (PDF input only)
  <output-dir>/<stem>_metrics.json   extracted metrics

ENVIRONMENT VARIABLES:
  OSM_API                     Base URL of the remote store API
  SCIENCEBEAM_PROTOCOL/HOST/PORT  ScienceBeam conversion service
  RTRANSPARENT_URL            rtransparent extraction service
  LLM_EXTRACTION_URL          LLM extraction service
  OSM_USER_MANAGED_COMPOSE    Services are managed outside this process
  RUST_LOG                    Log filter (overrides --verbose/--quiet)

A record that fails validation or is rejected by the store is quarantined
for manual review; the run still exits with an error.
"#;

/// Extract open-science indicators from a publication and record them.
#[derive(Parser, Debug)]
#[command(
    name = "osm",
    version,
    about = "Extract open-science indicators from a publication and record them",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF or XML file to process.
    #[arg(short, long)]
    filepath: PathBuf,

    /// Identifier you know this work by (recorded as work.user_defined_id).
    #[arg(short, long)]
    uid: String,

    /// Directory for the converted document and metrics JSON.
    #[arg(short, long, env = "OSM_OUTPUT_DIR", default_value = "osm_output")]
    output_dir: PathBuf,

    /// Parser: noop, pmc, sciencebeam. Default: sciencebeam for .pdf, noop for .xml.
    #[arg(long, value_enum)]
    parser: Option<ParserArg>,

    /// Extractor to run; repeat for several.
    #[arg(long = "extractor", value_enum, default_values = ["rtransparent"])]
    extractors: Vec<ExtractorArg>,

    /// Model requested from the LLM extraction service.
    #[arg(long, env = "OSM_LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    llm_model: String,

    /// Free-text comment stored with the record.
    #[arg(long, default_value = "")]
    comment: String,

    /// Contact email stored with the record.
    #[arg(long, env = "OSM_EMAIL")]
    email: Option<String>,

    /// PubMed id of the work.
    #[arg(long)]
    pmid: Option<String>,

    /// DOI of the work.
    #[arg(long)]
    doi: Option<String>,

    /// Free-form tag stored with the record; repeat for several.
    #[arg(long = "data-tag")]
    data_tags: Vec<String>,

    /// Base URL of the remote store API (overrides OSM_API).
    #[arg(long)]
    osm_api: Option<String>,

    /// The conversion service is already running; skip the start-up backoff.
    #[arg(long)]
    user_managed_compose: bool,

    /// Connection attempts against the conversion service.
    #[arg(long, env = "OSM_PARSE_ATTEMPTS")]
    parse_attempts: Option<u32>,

    /// Per-request timeout for backend calls, in seconds.
    #[arg(long, env = "OSM_REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Replace outputs left by a previous run.
    #[arg(long)]
    overwrite: bool,

    /// Print the delivered records as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OSM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OSM_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ParserArg {
    Noop,
    Pmc,
    Sciencebeam,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ExtractorArg {
    Rtransparent,
    Llm,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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

    // ── Build config and stages ──────────────────────────────────────────
    let config = build_config(&cli)?;
    let transport: Arc<dyn Transport> = Arc::new(
        ReqwestTransport::new(config.request_timeout_secs).context("Failed to build HTTP client")?,
    );

    let parser_arg = match cli.parser {
        Some(p) => p,
        None => default_parser(&cli.filepath)?,
    };
    let parser = match parser_arg {
        ParserArg::Noop => DocParser::Noop,
        ParserArg::Pmc => DocParser::Pmc,
        ParserArg::Sciencebeam => {
            DocParser::ScienceBeam(ScienceBeamParser::new(&config, Arc::clone(&transport)))
        }
    };

    let mut extractors = Vec::new();
    for arg in dedup(&cli.extractors) {
        extractors.push(match arg {
            ExtractorArg::Rtransparent => {
                Extractor::RTransparent(RTransparentExtractor::new(&config, Arc::clone(&transport)))
            }
            ExtractorArg::Llm => Extractor::Llm(LlmExtractor::new(
                &config,
                cli.llm_model.clone(),
                Arc::clone(&transport),
            )),
        });
    }

    // ── Output paths ─────────────────────────────────────────────────────
    let stem = cli
        .filepath
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("Cannot derive an output name from {:?}", cli.filepath))?
        .to_string();
    let xml_path = cli.output_dir.join(format!("{stem}.xml"));
    let metrics_path = cli.output_dir.join(format!("{stem}_metrics.json"));

    if !cli.overwrite {
        let converts = parser_arg == ParserArg::Sciencebeam;
        for path in [metrics_path.as_path()]
            .into_iter()
            .chain(converts.then_some(xml_path.as_path()))
        {
            if path.exists() {
                return Err(OsmError::OutputExists {
                    path: path.to_path_buf(),
                }
                .into());
            }
        }
    }

    let filename = cli
        .filepath
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut context = RecordContext::new(cli.uid.clone(), filename)
        .comment(cli.comment.clone())
        .data_tags(cli.data_tags.clone());
    if let Some(ref email) = cli.email {
        context = context.email(email.clone());
    }
    if let Some(ref pmid) = cli.pmid {
        context = context.pmid(pmid.clone());
    }
    if let Some(ref doi) = cli.doi {
        context = context.doi(doi.clone());
    }

    let osm = OsmSaver::new(&config, context, transport);
    let pipeline = Pipeline::new(
        vec![parser],
        extractors,
        Savers::new(osm),
        &cli.filepath,
        &xml_path,
        &metrics_path,
    )
    .context("Invalid pipeline")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let output = match pipeline.run().await {
        Ok(output) => output,
        Err(e) => {
            if !cli.quiet {
                report_failure(&e);
            }
            return Err(e).context("Pipeline failed");
        }
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    }
    if !cli.quiet {
        print_summary(&output, &metrics_path);
    }
    Ok(())
}

/// Map CLI args onto the environment-derived `OsmConfig`.
fn build_config(cli: &Cli) -> Result<OsmConfig> {
    let base = OsmConfig::from_env().context("Invalid configuration in environment")?;

    OsmConfig::builder()
        .sciencebeam(base.sciencebeam)
        .rtransparent(base.rtransparent)
        .llm_extraction(base.llm_extraction)
        .osm_api(cli.osm_api.clone().unwrap_or(base.osm_api))
        .parse_attempts(cli.parse_attempts.unwrap_or(base.parse_attempts))
        .parse_backoff_secs(base.parse_backoff_secs)
        .user_managed_compose(cli.user_managed_compose || base.user_managed_compose)
        .request_timeout_secs(cli.request_timeout.unwrap_or(base.request_timeout_secs))
        .build()
        .context("Invalid configuration")
}

/// `.pdf` → sciencebeam, `.xml` → noop.
fn default_parser(path: &Path) -> Result<ParserArg> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => Ok(ParserArg::Sciencebeam),
        Some("xml") => Ok(ParserArg::Noop),
        _ => anyhow::bail!(
            "Cannot choose a parser for {:?}; pass --parser noop|pmc|sciencebeam",
            path
        ),
    }
}

/// Keep the first occurrence of each extractor.
fn dedup(args: &[ExtractorArg]) -> Vec<ExtractorArg> {
    let mut seen = Vec::new();
    for &arg in args {
        if !seen.contains(&arg) {
            seen.push(arg);
        }
    }
    seen
}

fn report_failure(e: &OsmError) {
    match e {
        OsmError::QuarantineFailed { .. } => eprintln!(
            "{} {}",
            red("✘"),
            bold("Record could not be delivered or quarantined; it was not preserved.")
        ),
        e if e.is_quarantinable() => eprintln!(
            "{} {}",
            red("✘"),
            bold("Record not delivered; it was quarantined for manual review.")
        ),
        _ => {}
    }
}

fn print_summary(output: &PipelineOutput, metrics_path: &Path) {
    for record in &output.records {
        eprintln!(
            "{} {} × {}  {}  {}",
            green("✔"),
            record.parser,
            record.extractor,
            dim(&format!("{} fields", record.metrics().len())),
            dim(record.invocation.work.content_hash.get(..12).unwrap_or_default()),
        );
    }
    eprintln!(
        "{}  {} record(s) delivered  →  {}",
        green("✔"),
        output.records.len(),
        bold(&metrics_path.display().to_string()),
    );
}
