//! GameBuddy CLI - offline driver for the GameBuddy engine
//!
//! Commands:
//! - replay: Run recorded feature records through the cycle (batch mode)
//! - calibrate: Build a baseline from recorded feature records
//! - validate: Validate feature records
//! - doctor: Diagnose configuration and profile storage
//! - schema: Print input, output, or configuration schema

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use gamebuddy_engine::config::EngineConfig;
use gamebuddy_engine::encoder::ReportEncoder;
use gamebuddy_engine::pipeline::{FocusEngine, DEFAULT_PROFILE};
use gamebuddy_engine::session::{PersistedState, SessionContext};
use gamebuddy_engine::storage::{JsonFileStore, PersistenceWorker, ProfileStore};
use gamebuddy_engine::types::{CycleOutput, FeatureRecord};
use gamebuddy_engine::{EngineError, ENGINE_VERSION, PRODUCER_NAME};

/// GameBuddy - focus, fatigue and frustration coaching engine
#[derive(Parser)]
#[command(name = "gamebuddy")]
#[command(author = "GameBuddy Contributors")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Replay facial feature records through the GameBuddy engine", long_about = None)]
struct Cli {
    /// Log level filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run feature records through the engine (batch mode)
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "report")]
        output_format: OutputFormat,

        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        profile: ProfileArgs,

        /// Context tag attached to every cycle (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Build a baseline from feature records
    Calibrate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        profile: ProfileArgs,
    },

    /// Validate feature records
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

    /// Diagnose configuration and profile storage
    Doctor {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        profile: ProfileArgs,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema (or full JSON for config)
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(clap::Args)]
struct ConfigArgs {
    /// Default configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// User override configuration file, layered over --config
    #[arg(long)]
    user_config: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ProfileArgs {
    /// Profile id
    #[arg(long, default_value = DEFAULT_PROFILE)]
    profile: String,

    /// Directory holding persisted profile state
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Pretty-printed session report with summary
    Report,
    /// One cycle envelope per line
    Ndjson,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Feature record input
    Input,
    /// Cycle output
    Output,
    /// Engine configuration (defaults)
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

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

fn init_logging(level: Option<&str>) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.format_timestamp_millis().init();
}

fn run(cli: Cli) -> Result<(), GameBuddyCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            input_format,
            output_format,
            config,
            profile,
            tags,
        } => cmd_replay(
            &input,
            &output,
            input_format,
            output_format,
            &config,
            &profile,
            &tags,
        ),

        Commands::Calibrate {
            input,
            input_format,
            config,
            profile,
        } => cmd_calibrate(&input, input_format, &config, &profile),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor {
            config,
            profile,
            json,
        } => cmd_doctor(&config, &profile, json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config_args: &ConfigArgs,
    profile: &ProfileArgs,
    tags: &[String],
) -> Result<(), GameBuddyCliError> {
    let records = read_records(input, &input_format)?;
    let Some(first) = records.first() else {
        return Err(GameBuddyCliError::NoRecords);
    };
    let started_at = first.timestamp;

    let config = load_config(config_args)?;
    let mut engine = FocusEngine::new(config)?;
    let store = open_store(profile);
    let mut ctx = open_session(store.as_deref(), &profile.profile, started_at, engine.config());

    let outputs: Vec<CycleOutput> = records
        .into_iter()
        .map(|record| {
            let now = record.timestamp;
            engine.run_cycle(&mut ctx, now, Some(record), tags)
        })
        .collect();

    let encoder = ReportEncoder::new();
    let output_data = match output_format {
        OutputFormat::Report => {
            let coaching = &engine.config().adaptive_coaching;
            encoder.encode_session_to_json(&ctx, &outputs, coaching)? + "\n"
        }
        OutputFormat::Ndjson => {
            let mut lines = Vec::with_capacity(outputs.len());
            for out in &outputs {
                lines.push(encoder.encode_cycle_to_json(&ctx, out)?);
            }
            lines.join("\n") + "\n"
        }
    };
    write_output(output, &output_data)?;

    if let Some(store) = store {
        save_session(store, &ctx)?;
    }
    Ok(())
}

fn cmd_calibrate(
    input: &Path,
    input_format: InputFormat,
    config_args: &ConfigArgs,
    profile: &ProfileArgs,
) -> Result<(), GameBuddyCliError> {
    let records = read_records(input, &input_format)?;
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Err(GameBuddyCliError::NoRecords);
    };
    let started_at = first.timestamp;
    let ended_at = last.timestamp;

    // the recording is the calibration window
    let mut config = load_config(config_args)?;
    let recorded_secs = (ended_at - started_at).num_milliseconds() as f64 / 1000.0;
    if recorded_secs > 0.0 {
        config.calibration.duration_secs = recorded_secs;
    }

    let mut engine = FocusEngine::new(config)?;
    let store = open_store(profile);
    let mut ctx = open_session(store.as_deref(), &profile.profile, started_at, engine.config());

    engine.start_calibration(&mut ctx, started_at);
    for record in records {
        let now = record.timestamp;
        engine.run_cycle(&mut ctx, now, Some(record), &[]);
    }

    if ctx.calibration.is_collecting() {
        engine.cancel_calibration(&mut ctx);
        return Err(GameBuddyCliError::CalibrationFailed(
            "recording ended before the calibration window closed".to_string(),
        ));
    }
    // a failed session leaves any earlier baseline in place
    let Some(baseline) = ctx
        .baseline
        .as_ref()
        .filter(|b| b.calibrated_at == Some(ended_at))
    else {
        return Err(GameBuddyCliError::CalibrationFailed(
            "not enough face samples in recording".to_string(),
        ));
    };

    println!("{}", serde_json::to_string_pretty(baseline)?);

    if let Some(store) = store {
        save_session(store, &ctx)?;
    }
    Ok(())
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), GameBuddyCliError> {
    let input_data = read_input(input)?;
    let candidates = split_records(&input_data, &input_format)?;

    let errors: Vec<ValidationErrorDetail> = candidates
        .iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let result = serde_json::from_value::<FeatureRecord>(value.clone())
                .map_err(|e| e.to_string())
                .and_then(|record| record.validate().map_err(|e| e.to_string()));
            result.err().map(|error| ValidationErrorDetail { index, error })
        })
        .collect();

    let report = ValidationReport {
        total_records: candidates.len(),
        valid_records: candidates.len() - errors.len(),
        invalid_records: errors.len(),
        errors,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Record {}: {}", err.index, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(GameBuddyCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_doctor(
    config_args: &ConfigArgs,
    profile: &ProfileArgs,
    json: bool,
) -> Result<(), GameBuddyCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Engine version {}", ENGINE_VERSION),
    });

    match load_config(config_args) {
        Ok(config) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Configuration valid (cycle {}s, window {}s, {} goals)",
                config.cycle_period_secs,
                config.smoothing.window_secs,
                config.rewards.goals.len()
            ),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: format!("Invalid configuration: {}", e),
        }),
    }

    if let Some(dir) = &profile.state_dir {
        if dir.exists() {
            let store = JsonFileStore::new(dir);
            let state = PersistedState::load(&store, &profile.profile);
            let (status, message) = match &state.baseline {
                Some(baseline) => (
                    CheckStatus::Ok,
                    match baseline.calibrated_at {
                        Some(at) => format!("Baseline calibrated at {}", at.to_rfc3339()),
                        None => "Baseline present (never calibrated)".to_string(),
                    },
                ),
                None => (
                    CheckStatus::Warning,
                    "No baseline stored; metrics will use defaults".to_string(),
                ),
            };
            checks.push(DoctorCheck {
                name: "baseline".to_string(),
                status,
                message,
            });

            let unlocked = state.achievements.achievements().filter(|a| a.unlocked).count();
            checks.push(DoctorCheck {
                name: "profile".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Profile {}: {} pattern entries, {} achievements unlocked",
                    profile.profile,
                    state.patterns.len(),
                    unlocked
                ),
            });
        } else {
            checks.push(DoctorCheck {
                name: "state_dir".to_string(),
                status: CheckStatus::Warning,
                message: "State directory does not exist".to_string(),
            });
        }
    }

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
            message: "stdin is a pipe (replay from stdin ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("GameBuddy Doctor Report");
        println!("=======================");
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

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(GameBuddyCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), GameBuddyCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", input_json_schema());
            } else {
                println!("Input: feature record (one per cycle)");
                println!();
                println!("- timestamp: RFC 3339 capture time");
                println!("- detected: whether a face was found");
                println!("- gaze: {{ x, y }} in -1..1, 0 = screen centre");
                println!("- head_pose: {{ yaw, pitch, roll }} in degrees");
                println!("- eye_openness: {{ left, right }} eye-aspect-ratio (~0.3 open)");
                println!("- blink: a blink completed since the previous record");
                println!("- jaw_open: yawn score 0..1");
                println!("- expressions: brow_down, brow_inner_up, jaw_forward, mouth_press,");
                println!("  mouth_close, mouth_pucker, eye_squint, eye_wide, smile (0..1)");
                println!("- emotions: angry, sad, happy, neutral, surprise, fear, disgust");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", output_json_schema());
            } else {
                println!("Output: cycle envelope");
                println!();
                println!("- report_version, producer: {{ name, version, instance_id }}");
                println!("- profile_id, session_id");
                println!("- output:");
                println!("  - snapshot: attention, fatigue, frustration, engagement, distraction (0..100)");
                println!("  - state: {{ label, category, message_allowed }} or null");
                println!("  - message: {{ state, category, variant, text }} or null");
                println!("  - new_achievements: achievements unlocked since the last notification");
                println!("  - calibrating, uncalibrated, stale flags");
            }
        }
        SchemaType::Config => {
            let defaults = EngineConfig::default();
            if json_schema {
                println!("{}", defaults.to_json()?);
            } else {
                println!("Configuration defaults");
                println!();
                println!("- cycle_period_secs: {}", defaults.cycle_period_secs);
                println!("- smoothing.window_secs: {}", defaults.smoothing.window_secs);
                println!("- messaging.cooldown_secs: {}", defaults.messaging.cooldown_secs);
                println!(
                    "- messaging.global_min_interval_secs: {}",
                    defaults.messaging.global_min_interval_secs
                );
                println!("- calibration.duration_secs: {}", defaults.calibration.duration_secs);
                println!(
                    "- adaptive_coaching.max_entries: {}",
                    defaults.adaptive_coaching.max_entries
                );
                println!("- rewards.goals: {}", defaults.rewards.goals.len());
                println!();
                println!("Use --json-schema for the full default configuration.");
            }
        }
    }

    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, GameBuddyCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), GameBuddyCliError> {
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        stdout.write_all(data.as_bytes())?;
        stdout.flush()?;
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

/// Split input into raw JSON values without interpreting them as records
fn split_records(
    input_data: &str,
    format: &InputFormat,
) -> Result<Vec<serde_json::Value>, GameBuddyCliError> {
    match format {
        InputFormat::Json => Ok(serde_json::from_str(input_data)?),
        InputFormat::Ndjson => input_data
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line.trim()).map_err(|e| {
                    GameBuddyCliError::ParseError(format!("line {}: {}", n + 1, e))
                })
            })
            .collect(),
    }
}

fn read_records(
    input: &Path,
    format: &InputFormat,
) -> Result<Vec<FeatureRecord>, GameBuddyCliError> {
    let input_data = read_input(input)?;
    let mut records = Vec::new();
    for (index, value) in split_records(&input_data, format)?.into_iter().enumerate() {
        let record: FeatureRecord = serde_json::from_value(value)
            .map_err(|e| GameBuddyCliError::ParseError(format!("record {}: {}", index, e)))?;
        record.validate()?;
        records.push(record);
    }
    Ok(records)
}

fn load_config(args: &ConfigArgs) -> Result<EngineConfig, GameBuddyCliError> {
    let config = match (&args.config, &args.user_config) {
        (None, None) => EngineConfig::default(),
        (Some(path), None) => EngineConfig::load(path)?,
        (default_path, Some(user_path)) => {
            let missing = PathBuf::new();
            EngineConfig::load_layered(default_path.as_deref().unwrap_or(&missing), user_path)?
        }
    };
    Ok(config)
}

fn open_store(profile: &ProfileArgs) -> Option<Arc<dyn ProfileStore>> {
    profile
        .state_dir
        .as_ref()
        .map(|dir| Arc::new(JsonFileStore::new(dir)) as Arc<dyn ProfileStore>)
}

fn open_session(
    store: Option<&dyn ProfileStore>,
    profile_id: &str,
    started_at: DateTime<Utc>,
    config: &EngineConfig,
) -> SessionContext {
    match store {
        Some(store) => {
            let persisted = PersistedState::load(store, profile_id);
            SessionContext::restore(profile_id, persisted, started_at, config)
        }
        None => SessionContext::new(profile_id, started_at, config),
    }
}

fn save_session(store: Arc<dyn ProfileStore>, ctx: &SessionContext) -> Result<(), GameBuddyCliError> {
    let worker = PersistenceWorker::start(store);
    worker.checkpoint(&ctx.profile_id, ctx.checkpoint())?;
    let flushed = worker.flush();
    worker.shutdown();
    flushed.map_err(GameBuddyCliError::from)
}

fn input_json_schema() -> String {
    let unit = serde_json::json!({ "type": "number", "minimum": 0, "maximum": 1 });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "gamebuddy.feature_record",
        "description": "One cycle of facial-analysis features",
        "type": "object",
        "required": ["timestamp", "detected"],
        "properties": {
            "timestamp": { "type": "string", "format": "date-time" },
            "detected": { "type": "boolean" },
            "gaze": {
                "type": "object",
                "properties": { "x": { "type": "number" }, "y": { "type": "number" } }
            },
            "head_pose": {
                "type": "object",
                "properties": {
                    "yaw": { "type": "number" },
                    "pitch": { "type": "number" },
                    "roll": { "type": "number" }
                }
            },
            "eye_openness": {
                "type": "object",
                "properties": { "left": { "type": "number" }, "right": { "type": "number" } }
            },
            "blink": { "type": "boolean" },
            "jaw_open": unit.clone(),
            "expressions": {
                "type": "object",
                "additionalProperties": unit.clone()
            },
            "emotions": {
                "type": "object",
                "additionalProperties": { "type": "number", "minimum": 0 }
            }
        }
    })
    .to_string()
}

fn output_json_schema() -> String {
    let percent = serde_json::json!({ "type": "number", "minimum": 0, "maximum": 100 });
    serde_json::json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "gamebuddy.cycle_envelope",
        "type": "object",
        "required": ["report_version", "producer", "profile_id", "session_id", "output"],
        "properties": {
            "report_version": { "type": "string" },
            "producer": {
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "version": { "type": "string" },
                    "instance_id": { "type": "string" }
                }
            },
            "profile_id": { "type": "string" },
            "session_id": { "type": "string" },
            "output": {
                "type": "object",
                "properties": {
                    "timestamp": { "type": "string", "format": "date-time" },
                    "snapshot": {
                        "type": "object",
                        "properties": {
                            "attention": percent.clone(),
                            "fatigue": percent.clone(),
                            "frustration": percent.clone(),
                            "engagement": percent.clone(),
                            "distraction": percent.clone()
                        }
                    },
                    "state": { "type": ["object", "null"] },
                    "message": { "type": ["object", "null"] },
                    "new_achievements": { "type": "array" },
                    "calibrating": { "type": "boolean" },
                    "uncalibrated": { "type": "boolean" },
                    "stale": { "type": "boolean" }
                }
            }
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum GameBuddyCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoRecords,
    ValidationFailed(usize),
    CalibrationFailed(String),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for GameBuddyCliError {
    fn from(e: io::Error) -> Self {
        GameBuddyCliError::Io(e)
    }
}

impl From<EngineError> for GameBuddyCliError {
    fn from(e: EngineError) -> Self {
        GameBuddyCliError::Engine(e)
    }
}

impl From<serde_json::Error> for GameBuddyCliError {
    fn from(e: serde_json::Error) -> Self {
        GameBuddyCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<GameBuddyCliError> for CliError {
    fn from(e: GameBuddyCliError) -> Self {
        match e {
            GameBuddyCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            GameBuddyCliError::Engine(e) => {
                let (code, hint) = match &e {
                    EngineError::InvalidConfig(_) => {
                        ("CONFIG_ERROR", "Check the configuration files")
                    }
                    EngineError::InvalidRecord(_) => {
                        ("VALIDATION_ERROR", "Run 'gamebuddy validate' for details")
                    }
                    EngineError::Storage(_) => {
                        ("STORAGE_ERROR", "Check the state directory is writable")
                    }
                    _ => ("ENGINE_ERROR", "Run 'gamebuddy doctor' for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            GameBuddyCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            GameBuddyCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No feature records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            GameBuddyCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            GameBuddyCliError::CalibrationFailed(msg) => CliError {
                code: "CALIBRATION_FAILED".to_string(),
                message: msg,
                hint: Some("Record at least the calibration duration with a visible face".to_string()),
            },
            GameBuddyCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            GameBuddyCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
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
