use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ihe_core::constants::{CONFIG_ENV_VAR, DEFAULT_CONFIG_FILE};
use ihe_core::{
    AssertionCache, AssertionProvider, AuditLog, BatchCheckpoint, BatchOrchestrator, BatchResult,
    BatchSettings, BatchTermination, CompositeAuditLog, EngineConfig, FileAssertionProvider,
    FileAuditLog, FileDocumentSource, FilePatientSource, HttpTransport, PatientSource,
    TracingAuditLog, TransportEngine,
};
use ihe_wire::build_registration_request;

/// Exit code when a batch halts on a critical failure.
const EXIT_HALTED: u8 = 2;
/// Exit code when a batch is cancelled before the end of its list.
const EXIT_CANCELLED: u8 = 3;
/// Exit code when `validate` finds invalid patient rows.
const EXIT_INVALID: u8 = 4;

#[derive(Parser)]
#[command(name = "ihe-run")]
#[command(about = "Runs IHE patient registration and document submission batches")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register every patient in a file and submit a document for each
    Run {
        /// YAML list of patient records
        #[arg(long)]
        patients: PathBuf,
        /// Engine configuration (defaults to $IHE_CONFIG, then ihe.yaml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Batch identifier used for checkpoint and result file names
        #[arg(long)]
        batch_id: Option<String>,
    },
    /// Continue a batch from a checkpoint file
    Resume {
        /// Checkpoint written by an earlier run
        #[arg(long)]
        checkpoint: PathBuf,
        /// The same patient file the checkpoint was taken over
        #[arg(long)]
        patients: PathBuf,
        /// Engine configuration (defaults to $IHE_CONFIG, then ihe.yaml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check the configuration and build every registration message without sending
    Validate {
        /// YAML list of patient records
        #[arg(long)]
        patients: PathBuf,
        /// Engine configuration (defaults to $IHE_CONFIG, then ihe.yaml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("ihe=info".parse()?))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            patients,
            config,
            batch_id,
        } => {
            let config = load_config(config)?;
            let source = FilePatientSource::new(patients);
            let batch_id = batch_id.unwrap_or_else(new_batch_id);
            let settings = BatchSettings::from_config(&config, batch_id, source.source_ref());
            let result = run(&config, &source, settings, None)?;
            Ok(report(&result))
        }
        Commands::Resume {
            checkpoint,
            patients,
            config,
        } => {
            let config = load_config(config)?;
            let source = FilePatientSource::new(patients);
            let saved = BatchCheckpoint::load(&checkpoint)
                .with_context(|| format!("failed to load checkpoint {}", checkpoint.display()))?;
            let mut settings =
                BatchSettings::from_config(&config, saved.batch_id.clone(), source.source_ref());
            // Keep writing next to the checkpoint being resumed.
            if let Some(dir) = checkpoint.parent().filter(|d| !d.as_os_str().is_empty()) {
                settings.checkpoint_dir = dir.to_path_buf();
            }
            let result = run(&config, &source, settings, Some(saved))?;
            Ok(report(&result))
        }
        Commands::Validate { patients, config } => {
            let config = load_config(config)?;
            validate(&config, &FilePatientSource::new(patients))
        }
    }
}

fn config_path(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn load_config(flag: Option<PathBuf>) -> anyhow::Result<EngineConfig> {
    let path = config_path(flag);
    let config = EngineConfig::load(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    tracing::info!("++ Loaded configuration from {}", path.display());
    Ok(config)
}

fn new_batch_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("batch-{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

fn assertion_provider(config: &EngineConfig) -> FileAssertionProvider {
    let assertion = config.assertion();
    let lifetime = i64::try_from(assertion.lifetime_secs).unwrap_or(i64::MAX);
    FileAssertionProvider::new(assertion.path.clone())
        .with_lifetime(chrono::Duration::seconds(lifetime))
}

fn build_orchestrator(
    config: &EngineConfig,
    settings: BatchSettings,
) -> anyhow::Result<BatchOrchestrator> {
    let transport = HttpTransport::new(config.pool_max_idle_per_host())
        .context("failed to build HTTP client")?;

    let mut logs: Vec<Box<dyn AuditLog>> = vec![Box::new(TracingAuditLog)];
    if let Some(dir) = config.audit_dir() {
        let log = FileAuditLog::new(dir)
            .with_context(|| format!("failed to create audit directory {}", dir.display()))?;
        logs.push(Box::new(log));
    }

    let engine = TransportEngine::new(
        Box::new(transport),
        Box::new(CompositeAuditLog::new(logs)),
        config.retry_policy(),
        config.timeouts(),
    );
    let assertions = AssertionCache::new(
        Box::new(assertion_provider(config)),
        config.assertion().subject.clone(),
    );
    let document = config.document();
    let documents = FileDocumentSource::new(document.path.clone(), document.metadata());

    Ok(BatchOrchestrator::new(
        engine,
        assertions,
        Box::new(documents),
        settings,
    )?)
}

fn run(
    config: &EngineConfig,
    source: &FilePatientSource,
    settings: BatchSettings,
    checkpoint: Option<BatchCheckpoint>,
) -> anyhow::Result<BatchResult> {
    let patients = source.patients()?;
    tracing::info!(
        "++ Starting batch {} over {} patients from {}",
        settings.batch_id,
        patients.len(),
        source.source_ref()
    );
    let orchestrator = build_orchestrator(config, settings)?;
    Ok(orchestrator.run_batch(&patients, &config.endpoints(), checkpoint)?)
}

/// Prints the batch summary as JSON and maps the termination to an exit code.
fn report(result: &BatchResult) -> ExitCode {
    let summary = serde_json::json!({
        "batch_id": result.batch_id,
        "termination": result.termination,
        "statistics": result.statistics,
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::error!("failed to render batch summary: {e}"),
    }

    match result.termination {
        BatchTermination::Completed => ExitCode::SUCCESS,
        BatchTermination::Halted { .. } => ExitCode::from(EXIT_HALTED),
        BatchTermination::Cancelled { .. } => ExitCode::from(EXIT_CANCELLED),
    }
}

fn validate(config: &EngineConfig, source: &FilePatientSource) -> anyhow::Result<ExitCode> {
    let patients = source.patients()?;
    let assertion = assertion_provider(config)
        .signed_assertion(&config.assertion().subject, &config.assertion().audience)?;
    check_document(&config.document().path)?;

    let mut invalid = 0usize;
    for (index, patient) in patients.iter().enumerate() {
        if let Err(e) =
            build_registration_request(patient, config.sender(), config.receiver(), &assertion)
        {
            invalid += 1;
            println!("row {index} ({}): {e}", patient.id.trim());
        }
    }
    println!(
        "{} patients checked, {} invalid",
        patients.len(),
        invalid
    );

    Ok(if invalid == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INVALID)
    })
}

fn check_document(path: &Path) -> anyhow::Result<()> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("document template {} is not readable", path.display()))?;
    anyhow::ensure!(meta.len() > 0, "document template {} is empty", path.display());
    Ok(())
}
