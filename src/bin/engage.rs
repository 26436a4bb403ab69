//! Engage CLI - Command-line interface for engagement scoring
//!
//! Commands:
//! - score: Score a batch of raw events into per-session records
//! - validate: Validate raw events against engage.raw_event.v1
//! - doctor: Diagnose configuration and environment
//! - schema: Print input or output schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engagement_flux::boundary::{
    EventSource, JsonSink, LineProtocolSink, MemorySource, NdjsonSink, NdjsonSource, ScoreSink,
};
use engagement_flux::config::ScoringConfig;
use engagement_flux::pipeline::EngagementProcessor;
use engagement_flux::schema::{RawEventAdapter, RawEventRecord, SCHEMA_VERSION};
use engagement_flux::{ComputeError, FLUX_VERSION, PRODUCER_NAME};

/// Engage - per-session reading engagement scores from page telemetry
#[derive(Parser)]
#[command(name = "engage")]
#[command(author = "Synheart AI Inc")]
#[command(version = FLUX_VERSION)]
#[command(about = "Score reading engagement from scroll and viewport telemetry", long_about = None)]
struct Cli {
    /// Log per-session detail (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a batch of raw events
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// TOML configuration file with a [scoring] table
        #[arg(long)]
        config: Option<PathBuf>,

        /// Average reading speed in words per minute
        #[arg(long)]
        reading_speed: Option<f64>,

        /// Seconds represented by one in-viewport sample
        #[arg(long)]
        sampling_interval: Option<f64>,

        /// Maximum number of scoring threads
        #[arg(long)]
        max_parallelism: Option<usize>,
    },

    /// Validate raw event schema
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one score record per line)
    Ndjson,
    /// JSON array of score records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Time-series line protocol (measurement event_scores)
    Line,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (engage.raw_event.v1)
    Input,
    /// Output schema (score record)
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .init();
}

fn run(cli: Cli) -> Result<(), EngageCliError> {
    match cli.command {
        Commands::Score {
            input,
            output,
            input_format,
            output_format,
            config,
            reading_speed,
            sampling_interval,
            max_parallelism,
        } => {
            let overrides = ConfigOverrides {
                reading_speed,
                sampling_interval,
                max_parallelism,
            };
            cmd_score(
                &input,
                &output,
                input_format,
                output_format,
                config.as_deref(),
                overrides,
            )
        }
        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),
        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

struct ConfigOverrides {
    reading_speed: Option<f64>,
    sampling_interval: Option<f64>,
    max_parallelism: Option<usize>,
}

/// File values first, then command-line flags
fn resolve_config(
    path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<ScoringConfig, EngageCliError> {
    let mut config = match path {
        Some(path) => ScoringConfig::load(path)?,
        None => ScoringConfig::default(),
    };
    if let Some(speed) = overrides.reading_speed {
        config = config.with_average_reading_speed(speed);
    }
    if let Some(interval) = overrides.sampling_interval {
        config = config.with_sampling_interval(interval);
    }
    if let Some(workers) = overrides.max_parallelism {
        config = config.with_max_parallelism(workers);
    }
    Ok(config)
}

fn cmd_score(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config_path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<(), EngageCliError> {
    let config = resolve_config(config_path, overrides)?;
    let processor = EngagementProcessor::new(config)?;

    let mut source: Box<dyn EventSource> = match input_format {
        InputFormat::Ndjson => Box::new(NdjsonSource::new(open_input(input)?)),
        InputFormat::Json => {
            let mut buffer = String::new();
            open_input(input)?.read_to_string(&mut buffer)?;
            Box::new(MemorySource::new(RawEventAdapter::parse_array(&buffer)?))
        }
    };

    let writer = open_output(output)?;
    let mut sink: Box<dyn ScoreSink> = match output_format {
        OutputFormat::Ndjson => Box::new(NdjsonSink::new(writer)),
        OutputFormat::Json => Box::new(JsonSink::new(writer)),
        OutputFormat::JsonPretty => Box::new(JsonSink::pretty(writer)),
        OutputFormat::Line => Box::new(LineProtocolSink::new(writer)),
    };

    // Empty input is an empty result, not a failure
    processor.run(source.as_mut(), sink.as_mut())?;
    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), EngageCliError> {
    let events = read_events(input, input_format)?;
    let skipped = RawEventAdapter::validate_events(&events);

    let report = ValidationReport {
        schema_version: SCHEMA_VERSION.to_string(),
        total_events: events.len(),
        valid_events: events.len() - skipped.len(),
        invalid_events: skipped.len(),
        errors: skipped
            .iter()
            .map(|s| ValidationErrorDetail {
                index: s.index,
                session: s.session_key.as_ref().map(|k| k.to_string()),
                error: s.reason.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Index {} ({}): {}",
                    err.index,
                    err.session.as_deref().unwrap_or("unknown session"),
                    err.error
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(EngageCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), EngageCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck {
            name: "version".to_string(),
            status: CheckStatus::Ok,
            message: format!("{} {}", PRODUCER_NAME, FLUX_VERSION),
        },
        DoctorCheck {
            name: "schema_version".to_string(),
            status: CheckStatus::Ok,
            message: format!("Input schema: {}", SCHEMA_VERSION),
        },
    ];

    let config_check = match config_path {
        Some(path) if !path.exists() => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist; defaults will be used", path.display()),
        },
        Some(path) => match ScoringConfig::load(path) {
            Ok(config) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: describe_config(&config),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            },
        },
        None => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!("defaults: {}", describe_config(&ScoringConfig::default())),
        },
    };
    checks.push(config_check);

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (ready for `engage score -i -`)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: FLUX_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Engage Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(EngageCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), EngageCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", get_input_json_schema());
            } else {
                println!("Input Schema: {}", SCHEMA_VERSION);
                println!();
                println!("One telemetry sample per record, sent by the page every 2 seconds:");
                println!();
                println!("- timestamp (alias time): RFC 3339 sample time          [required]");
                println!("- source_url: page URL                                   [required]");
                println!("- session_id: visit identifier                           [required]");
                println!("- api_key: content owner                                 [required]");
                println!("- y_position (alias scroll_depth): pixels scrolled       [required]");
                println!("- bottom_of_viewport (alias viewport_bottom): pixels     [required]");
                println!("- is_scrolling, is_visible: booleans                     [default false]");
                println!("- word_count: words in the content                       [optional]");
                println!();
                println!("Numbers may be JSON numbers or numeric strings.");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", get_output_json_schema());
            } else {
                println!("Output Schema: score record");
                println!();
                println!("One record per session:");
                println!();
                println!("- id: unique record id");
                println!("- source_url, session_id, api_key");
                println!("- reached_end_of_content: scrolled past the viewport bottom");
                println!("- total_in_viewport_seconds: in-viewport samples x sampling interval");
                println!("- word_count: content length (0 when unknown)");
                println!("- score: 0-150 (regression strength 0-50 + viewport dwell 0-100)");
                println!("- written_at: RFC 3339 write time");
            }
        }
    }

    Ok(())
}

// Helper functions

fn open_input(input: &Path) -> Result<Box<dyn io::BufRead>, EngageCliError> {
    if input.to_string_lossy() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(File::open(input)?)))
    }
}

fn open_output(output: &Path) -> Result<Box<dyn Write>, EngageCliError> {
    if output.to_string_lossy() == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(BufWriter::new(File::create(output)?)))
    }
}

fn read_events(
    input: &Path,
    input_format: InputFormat,
) -> Result<Vec<RawEventRecord>, EngageCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let events = match input_format {
        InputFormat::Ndjson => RawEventAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => RawEventAdapter::parse_array(&input_data)?,
    };
    Ok(events)
}

fn describe_config(config: &ScoringConfig) -> String {
    format!(
        "reading speed {} wpm, sampling interval {} s, {} worker(s)",
        config.average_reading_speed, config.sampling_interval_seconds, config.max_parallelism
    )
}

fn get_input_json_schema() -> String {
    let number = serde_json::json!({ "type": ["number", "string"] });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://synheart.ai/schemas/engage.raw_event.v1.json",
        "title": SCHEMA_VERSION,
        "description": "Page telemetry sample",
        "type": "object",
        "required": [
            "timestamp",
            "source_url",
            "session_id",
            "api_key",
            "y_position",
            "bottom_of_viewport"
        ],
        "properties": {
            "schema_version": { "type": "string", "const": SCHEMA_VERSION },
            "timestamp": { "type": "string", "format": "date-time" },
            "source_url": { "type": "string" },
            "session_id": { "type": "string" },
            "api_key": { "type": "string" },
            "y_position": number,
            "bottom_of_viewport": number,
            "is_scrolling": { "type": "boolean" },
            "is_visible": { "type": "boolean" },
            "word_count": number
        }
    })
    .to_string()
}

fn get_output_json_schema() -> String {
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://synheart.ai/schemas/engage.score_record.v1.json",
        "title": "engage.score_record.v1",
        "description": "Per-session engagement score",
        "type": "object",
        "required": [
            "id", "source_url", "session_id", "api_key", "reached_end_of_content",
            "total_in_viewport_seconds", "word_count", "score", "written_at"
        ],
        "properties": {
            "id": { "type": "string" },
            "source_url": { "type": "string" },
            "session_id": { "type": "string" },
            "api_key": { "type": "string" },
            "reached_end_of_content": { "type": "boolean" },
            "total_in_viewport_seconds": { "type": "number", "minimum": 0 },
            "word_count": { "type": "number", "minimum": 0 },
            "score": { "type": "number", "minimum": 0, "maximum": 150 },
            "written_at": { "type": "string", "format": "date-time" }
        }
    })
    .to_string()
}

// Error handling

#[derive(Debug)]
enum EngageCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for EngageCliError {
    fn from(e: io::Error) -> Self {
        EngageCliError::Io(e)
    }
}

impl From<ComputeError> for EngageCliError {
    fn from(e: ComputeError) -> Self {
        EngageCliError::Compute(e)
    }
}

impl From<serde_json::Error> for EngageCliError {
    fn from(e: serde_json::Error) -> Self {
        EngageCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<EngageCliError> for CliError {
    fn from(e: EngageCliError) -> Self {
        match e {
            EngageCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            EngageCliError::Compute(e) => {
                let (code, hint) = match &e {
                    ComputeError::ParseError(_) | ComputeError::JsonError(_) => (
                        "PARSE_ERROR",
                        "Ensure input matches engage.raw_event.v1 schema",
                    ),
                    ComputeError::ConfigError(_) | ComputeError::TomlError(_) => {
                        ("CONFIG_ERROR", "Run 'engage doctor --config <file>' for details")
                    }
                    ComputeError::SourceFetch(_) => ("SOURCE_ERROR", "Check the input stream"),
                    ComputeError::SinkWrite(_) => ("SINK_ERROR", "Check the output destination"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            EngageCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            EngageCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            EngageCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    schema_version: String,
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    session: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
