//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::journal::JournalWriter;
use crate::runner::{self, RunOptions, RunSummary};
use crate::script::Script;
use axiom_core::{AxiomError, CuriosityBuffer, Engine, EngineConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum script size (10 MB).
const MAX_SCRIPT_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum snapshot size (500 MB).
///
/// Snapshots can be larger since they contain the whole graph.
const MAX_SNAPSHOT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Capacity of the runner's curiosity queue.
const CURIOSITY_CAPACITY: usize = 1024;

/// Canonicalize an input path and make sure it is a regular file no larger
/// than `max_size`.
fn validate_input_file(path: &Path, max_size: u64) -> Result<PathBuf, AxiomError> {
    let canonical = path.canonicalize().map_err(|e| {
        AxiomError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(AxiomError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| AxiomError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > max_size {
        return Err(AxiomError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(canonical)
}

/// Resolve an output path against its canonical parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, AxiomError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let canonical_parent = parent.canonicalize().map_err(|e| {
        AxiomError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;
    if !canonical_parent.is_dir() {
        return Err(AxiomError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }
    let filename = path
        .file_name()
        .ok_or_else(|| AxiomError::IoError("Output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

// =============================================================================
// LOADING
// =============================================================================

/// Load the engine configuration, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, AxiomError> {
    match path {
        Some(path) => {
            let path = validate_input_file(path, MAX_SCRIPT_FILE_SIZE)?;
            EngineConfig::load(&path)
        }
        None => Ok(EngineConfig::default()),
    }
}

pub fn load_script(path: &Path) -> Result<Script, AxiomError> {
    let path = validate_input_file(path, MAX_SCRIPT_FILE_SIZE)?;
    let source = std::fs::read_to_string(&path)
        .map_err(|e| AxiomError::IoError(format!("Read script: {}", e)))?;
    Script::from_json(&source)
}

fn read_snapshot(path: &Path) -> Result<Vec<u8>, AxiomError> {
    let path = validate_input_file(path, MAX_SNAPSHOT_FILE_SIZE)?;
    std::fs::read(&path).map_err(|e| AxiomError::IoError(format!("Read snapshot: {}", e)))
}

/// Ticks to run: the command line, then the script, then just past the last
/// scheduled item.
fn run_length(script: &Script, requested: Option<u64>) -> u64 {
    requested
        .or(script.ticks)
        .unwrap_or_else(|| script.horizon().saturating_add(1))
}

/// Build an engine, restored from a snapshot or freshly seeded by `script`.
fn prepare_engine(
    config: EngineConfig,
    script: &Script,
    restore: Option<&Path>,
    curiosity: &Arc<CuriosityBuffer>,
    journal: Option<crate::journal::ChannelObserver>,
) -> Result<Engine, AxiomError> {
    let mut builder = Engine::builder(config).curiosity(curiosity.clone());
    if let Some(observer) = journal {
        builder = builder.observer(Arc::new(observer));
    }
    match restore {
        Some(path) => {
            let bytes = read_snapshot(path)?;
            builder.snapshot_bytes(&bytes)?.build()
        }
        None => {
            let mut engine = builder.build()?;
            script.seed(&mut engine)?;
            Ok(engine)
        }
    }
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Arguments of `axiom run`.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub script: PathBuf,
    pub ticks: Option<u64>,
    pub realtime: bool,
    pub journal: Option<PathBuf>,
    pub restore: Option<PathBuf>,
    pub snapshot: Option<PathBuf>,
}

/// Run a script and report what happened.
pub async fn cmd_run(
    config: EngineConfig,
    args: RunArgs,
    json_mode: bool,
) -> Result<(), AxiomError> {
    let summary = run_script(config, &args).await?;
    print_summary(&summary, json_mode);
    Ok(())
}

/// The body of `axiom run`, without printing.
pub async fn run_script(config: EngineConfig, args: &RunArgs) -> Result<RunSummary, AxiomError> {
    let script = load_script(&args.script)?;
    let options = RunOptions {
        ticks: run_length(&script, args.ticks),
        realtime: args.realtime,
        interval: Duration::from_millis(config.tick_interval_ms),
    };

    let (writer, observer) = match &args.journal {
        Some(path) => {
            let path = validate_output_path(path)?;
            let (writer, observer) = JournalWriter::spawn(&path).await?;
            (Some(writer), Some(observer))
        }
        None => (None, None),
    };
    let snapshot_path = args
        .snapshot
        .as_deref()
        .map(validate_output_path)
        .transpose()?;

    let curiosity = Arc::new(CuriosityBuffer::new(CURIOSITY_CAPACITY));
    let mut engine = prepare_engine(
        config,
        &script,
        args.restore.as_deref(),
        &curiosity,
        observer,
    )?;
    let summary = runner::run(&mut engine, &script, &curiosity, options).await?;

    if let Some(path) = snapshot_path {
        let bytes = engine.export()?;
        std::fs::write(&path, &bytes)
            .map_err(|e| AxiomError::IoError(format!("Write snapshot: {}", e)))?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "snapshot written");
    }

    // Dropping the engine releases the journal observer and lets the writer
    // finish.
    drop(engine);
    if let Some(writer) = writer {
        writer.finish().await?;
    }
    Ok(summary)
}

fn print_summary(summary: &RunSummary, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
        return;
    }

    println!("Axiom Run");
    println!("=========");
    println!("Stop:       {:?}", summary.stop);
    println!("Ticks:      {} (final tick {})", summary.ticks_run, summary.final_tick);
    println!(
        "Decisions:  {} ({} reflex)",
        summary.decisions, summary.reflex_decisions
    );
    println!("Links:      {}", summary.links_created);
    println!(
        "Inputs:     {} applied, {} deferred, {} failed",
        summary.inputs_applied, summary.inputs_deferred, summary.inputs_failed
    );
    println!(
        "Proposals:  {} applied, {} failed",
        summary.proposals_applied, summary.proposals_failed
    );
    println!(
        "Graph:      {} tokens, {} connections, {} active",
        summary.metrics.token_count,
        summary.metrics.connection_count,
        summary.metrics.active_tokens()
    );
    for input in &summary.unresolved {
        println!("Unresolved: {}", input);
    }
    println!("State hash: {}", summary.state_hash);
}

// =============================================================================
// VALIDATE COMMAND
// =============================================================================

/// Check a configuration and describe it.
pub fn cmd_validate(
    config: &EngineConfig,
    path: Option<&Path>,
    json_mode: bool,
) -> Result<(), AxiomError> {
    config.validate()?;

    if json_mode {
        let output = serde_json::json!({
            "valid": true,
            "config": path.map(|p| p.to_string_lossy().to_string()),
            "state_dim": config.state_dim,
            "embedding_dim": config.embedding_dim,
            "tick_interval_ms": config.tick_interval_ms,
            "domains": config
                .domains
                .iter()
                .map(|d| serde_json::json!({ "id": d.id.0, "name": d.name }))
                .collect::<Vec<_>>()
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Configuration OK");
    if let Some(path) = path {
        println!("File:          {}", path.display());
    }
    println!("State dim:     {}", config.state_dim);
    println!("Embedding dim: {}", config.embedding_dim);
    println!("Tick interval: {} ms", config.tick_interval_ms);
    for domain in &config.domains {
        println!("Domain {}:      {}", domain.id, domain.name);
    }
    Ok(())
}

// =============================================================================
// CHECKSUM COMMAND
// =============================================================================

/// Run a script headless and print the BLAKE3 hash of the final snapshot.
pub async fn cmd_checksum(
    config: EngineConfig,
    script: Option<PathBuf>,
    ticks: Option<u64>,
    restore: Option<PathBuf>,
    json_mode: bool,
) -> Result<(), AxiomError> {
    let (hash, tick) = checksum(config, script.as_deref(), ticks, restore.as_deref()).await?;

    if json_mode {
        let output = serde_json::json!({
            "algorithm": "blake3",
            "hash": hash,
            "tick": tick
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
    } else {
        println!("{}", hash);
    }
    Ok(())
}

/// Hash and final tick of a headless run.
pub async fn checksum(
    config: EngineConfig,
    script: Option<&Path>,
    ticks: Option<u64>,
    restore: Option<&Path>,
) -> Result<(String, u64), AxiomError> {
    // Without a script only the requested ticks run, so a bare restore
    // hashes the snapshot as saved.
    let (script, length) = match script {
        Some(path) => {
            let script = load_script(path)?;
            let length = run_length(&script, ticks);
            (script, length)
        }
        None => (Script::default(), ticks.unwrap_or(0)),
    };
    let options = RunOptions {
        ticks: length,
        realtime: false,
        interval: Duration::from_millis(config.tick_interval_ms),
    };
    let curiosity = Arc::new(CuriosityBuffer::new(CURIOSITY_CAPACITY));
    let mut engine = prepare_engine(config, &script, restore, &curiosity, None)?;
    let summary = runner::run(&mut engine, &script, &curiosity, options).await?;
    Ok((summary.state_hash, summary.final_tick))
}
