//! uxpanel - persona-driven UX evaluation
//!
//! A CLI tool that audits a screenshot, a multi-step flow or a screen
//! recording through several simulated personas concurrently, aggregates
//! their findings, and can redraw the screen for each persona.
//!
//! Exit codes:
//!   0 - Success (average score at or above --fail-below, or no --fail-below set)
//!   1 - Runtime error (config, artifact, backend failure, etc.)
//!   2 - Average overall score below --fail-below

mod analysis;
mod cli;
mod client;
mod config;
mod export;
mod loader;
mod models;
mod orchestrator;
mod report;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use client::HttpEvaluationClient;
use config::{Config, CONFIG_FILE};
use export::{export_batch, export_to_dir, ExportError, PngRasterizer, RenderedSurface};
use indicatif::{ProgressBar, ProgressStyle};
use loader::ArtifactLoader;
use models::{Artifact, Persona, ScoreLevel};
use orchestrator::{EvaluationError, Orchestrator, PersonaFailure, RunPhase, RunRequest, RunResult};
use report::{ReportMetadata, RunReport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration first so its verbose flag can raise the log level
    let loaded = load_config(&args);
    let config_verbose = matches!(loaded, Ok((ref config, _)) if config.general.verbose);

    // Initialize logging
    init_logging(&args, config_verbose);

    info!("uxpanel v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", redacted(&args));

    match run_audit(args, loaded).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Evaluation failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Arguments with the API key masked, for logging.
fn redacted(args: &Args) -> Args {
    let mut args = args.clone();
    if args.api_key.is_some() {
        args.api_key = Some("***".to_string());
    }
    args
}

/// Handle --init-config: generate a default .uxpanel.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize the backend, personas, export and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config_verbose: bool) {
    let level = args.log_level(config_verbose);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete evaluation workflow. Returns exit code (0 or 2).
async fn run_audit(args: Args, loaded: Result<(Config, ConfigOrigin)>) -> Result<i32> {
    let (mut config, origin) = loaded?;
    log_config_origin(&origin);
    config.merge_with_args(&args);

    if args.list_personas {
        return Ok(handle_list_personas(&config));
    }

    // Step 1: Load the artifact and resolve the run
    let loader = ArtifactLoader::new(config.backend.max_inline_bytes);
    let (artifact, source) = load_artifact(&args, &loader)?;
    let personas = config.select_personas(&args.personas)?;
    let backend = config.backend_config();

    if args.dry_run {
        return Ok(handle_dry_run(&artifact, &source, &personas, &config));
    }

    if backend.api_key.trim().is_empty() {
        bail!(
            "No API key configured. Set UXPANEL_API_KEY, pass --api-key, or set backend.api_key in {}",
            CONFIG_FILE
        );
    }

    // Step 2: Run the evaluation
    let client = Arc::new(HttpEvaluationClient::new().context("Failed to build HTTP client")?);
    let orchestrator = Orchestrator::new(client, config.general.failure_policy);

    println!("🔬 Evaluating {} with {} persona(s)...", artifact.kind(), personas.len());
    println!(
        "   Model: {} | Backend: {} ({}) | Policy: {}",
        config.evaluation.model,
        backend.provider,
        backend.analysis_model,
        orchestrator.policy()
    );
    if config.evaluation.generate_images {
        println!("   Optimized images: {}", backend.image_model);
    }

    let progress = spawn_progress(orchestrator.subscribe(), args.quiet);

    let request = RunRequest {
        artifact,
        personas: personas.clone(),
        model: config.evaluation.model,
        generate_images: config.evaluation.generate_images,
        backend: backend.clone(),
    };
    let outcome = orchestrator.run_evaluation(&request).await;
    drop(orchestrator);
    if let Some(progress) = progress {
        let _ = progress.await;
    }

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            print_evaluation_error(&e);
            return Err(e.into());
        }
    };

    // Step 3: Export optimized images
    let rasterizer = PngRasterizer::new(config.export.padding, &config.export.background)
        .context("Invalid export settings")?;

    let image_paths = match args.images_dir {
        Some(ref dir) => write_optimized_images(&rasterizer, &result, &personas, dir).await?,
        None => HashMap::new(),
    };

    if let Some(ref archive_path) = args.archive {
        let prefix = format!("{}_{}", result.model, config.export.file_prefix);
        write_archive(&rasterizer, &result, &personas, &prefix, archive_path).await?;
    }

    // Step 4: Build and save the report
    let metadata = ReportMetadata {
        artifact_kind: request.artifact.kind().to_string(),
        artifact_source: source.display().to_string(),
        evaluation_model: result.model,
        provider: backend.provider.to_string(),
        analysis_model: backend.analysis_model.clone(),
        failure_policy: config.general.failure_policy.to_string(),
        analysis_date: Utc::now(),
        duration_seconds: result.elapsed.as_secs_f64(),
        personas_selected: personas.len(),
    };
    let run_report = RunReport::build(metadata, &result, &personas, &image_paths);

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&run_report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&run_report),
    };

    let output_path = PathBuf::from(&config.general.output);
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    // Print summary
    let summary = &run_report.summary;
    let level = ScoreLevel::from_score(summary.average_overall_score);
    println!("\n📊 Evaluation Summary:");
    println!(
        "   Reports: {}/{} | Average score: {} {} ({})",
        summary.report_count,
        personas.len(),
        level.emoji(),
        summary.average_overall_score,
        level
    );
    println!(
        "   Issues: {} | Hotspots: {} | Suggestions: {}",
        summary.total_issues(),
        summary.hotspots.len(),
        summary.total_suggestions()
    );
    for failure in result.analysis_failures() {
        println!("   ❌ {}: {}", failure.persona_name, failure.reason);
    }
    if config.evaluation.generate_images {
        println!(
            "   Optimized images: {}/{}",
            result.optimized_images.len(),
            result.reports.len()
        );
    }
    println!("   Duration: {:.1}s", result.elapsed.as_secs_f64());
    println!("\n✅ Evaluation complete! Report saved to: {}", output_path.display());

    // Check --fail-below threshold
    if let Some(threshold) = args.fail_below {
        if summary.average_overall_score < threshold {
            eprintln!(
                "\n⛔ Average score {} is below {}. Failing (exit code 2).",
                summary.average_overall_score, threshold
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Load the artifact named on the command line.
fn load_artifact(args: &Args, loader: &ArtifactLoader) -> Result<(Artifact, PathBuf)> {
    let (artifact, path) = if let Some(ref path) = args.image {
        (loader.load_image(path), path)
    } else if let Some(ref path) = args.flow {
        (loader.load_flow(path), path)
    } else if let Some(ref path) = args.video {
        (loader.load_video(path), path)
    } else {
        bail!("No artifact given; use --image, --flow or --video");
    };

    let artifact = artifact.context("Failed to load artifact")?;
    Ok((artifact, path.clone()))
}

/// Drive a spinner from the run's phase transitions.
fn spawn_progress(
    mut phases: watch::Receiver<RunPhase>,
    quiet: bool,
) -> Option<tokio::task::JoinHandle<()>> {
    if quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    Some(tokio::spawn(async move {
        while phases.changed().await.is_ok() {
            let phase = *phases.borrow_and_update();
            match phase {
                RunPhase::Idle => {}
                RunPhase::RunningAnalysis => pb.set_message("Analyzing with every persona..."),
                RunPhase::RunningGeneration => pb.set_message("Generating optimized images..."),
                RunPhase::Settled => break,
            }
        }
        pb.finish_and_clear();
    }))
}

fn print_evaluation_error(e: &EvaluationError) {
    let failures: &[PersonaFailure] = match e {
        EvaluationError::PersonaFailed { failures, .. } => failures,
        EvaluationError::PartialRun { failures } => failures,
        EvaluationError::Precondition(_) => &[],
    };
    for failure in failures {
        eprintln!("   ❌ {}: {}", failure.persona_name, failure.reason);
    }
}

/// Optimized images of `result` as surfaces, in persona order.
fn optimized_surfaces(result: &RunResult, personas: &[Persona]) -> Vec<(String, RenderedSurface)> {
    personas
        .iter()
        .filter_map(|persona| {
            let media = result.optimized_images.get(&persona.id)?;
            match RenderedSurface::from_media(persona.name.clone(), media) {
                Ok(surface) => Some((persona.id.clone(), surface)),
                Err(e) => {
                    warn!(persona = %persona.name, error = %e, "cannot decode optimized image");
                    None
                }
            }
        })
        .collect()
}

/// Export each optimized image into `dir`. Returns persona id to file path.
async fn write_optimized_images(
    rasterizer: &PngRasterizer,
    result: &RunResult,
    personas: &[Persona],
    dir: &Path,
) -> Result<HashMap<String, String>> {
    let (persona_ids, surfaces): (Vec<String>, Vec<RenderedSurface>) =
        optimized_surfaces(result, personas).into_iter().unzip();
    if surfaces.is_empty() {
        warn!("No optimized images to write");
        return Ok(HashMap::new());
    }

    let written = export_to_dir(rasterizer, &surfaces, dir)
        .await
        .with_context(|| format!("Failed to write optimized images to {}", dir.display()))?;

    let paths: HashMap<String, String> = persona_ids
        .into_iter()
        .zip(written)
        .filter_map(|(id, path)| Some((id, path?.display().to_string())))
        .collect();

    println!("🖼️  Wrote {} optimized image(s) to {}", paths.len(), dir.display());
    Ok(paths)
}

/// Batch-export every optimized image into one zip archive.
async fn write_archive(
    rasterizer: &PngRasterizer,
    result: &RunResult,
    personas: &[Persona],
    prefix: &str,
    path: &Path,
) -> Result<()> {
    let surfaces: Vec<RenderedSurface> = optimized_surfaces(result, personas)
        .into_iter()
        .map(|(_, surface)| surface)
        .collect();

    let export = match export_batch(rasterizer, &surfaces, prefix).await {
        Ok(export) => export,
        Err(ExportError::EmptyInput) => {
            warn!("No optimized images to archive; skipping {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e).context("Batch export failed"),
    };

    std::fs::write(path, &export.bytes)
        .with_context(|| format!("Failed to write archive to {}", path.display()))?;
    println!(
        "📦 Archived {} image(s) to {}{}",
        export.entries.len(),
        path.display(),
        if export.skipped.is_empty() {
            String::new()
        } else {
            format!(" (skipped: {})", export.skipped.join(", "))
        }
    );
    Ok(())
}

/// Handle --list-personas.
fn handle_list_personas(config: &Config) -> i32 {
    println!("Configured personas:\n");
    for persona in &config.personas {
        println!("  {:>4}  {} [{}]", persona.id, persona.name, persona.role);
        if !persona.description.is_empty() {
            println!("        {}", persona.description);
        }
    }
    0
}

/// Handle --dry-run: print the resolved plan without calling the backend.
fn handle_dry_run(artifact: &Artifact, source: &Path, personas: &[Persona], config: &Config) -> i32 {
    println!("\n🔍 Dry run: no backend calls will be made.\n");

    match artifact {
        Artifact::Image(media) | Artifact::Video(media) => println!(
            "   Artifact: {} {} ({}, {} bytes)",
            artifact.kind(),
            source.display(),
            media.mime_type,
            media.bytes.len()
        ),
        Artifact::Flow(steps) => {
            println!("   Artifact: flow {} ({} steps)", source.display(), steps.len());
            for (i, step) in steps.iter().enumerate() {
                println!("     {}. {}", i + 1, step.description);
            }
        }
    }

    println!(
        "   Model: {} ({} dimensions)",
        config.evaluation.model,
        config.evaluation.model.dimension_labels().len()
    );
    println!(
        "   Backend: {} / {}",
        config.backend.provider, config.backend.analysis_model
    );
    println!("   Policy: {}", config.general.failure_policy);
    println!(
        "   Optimized images: {}",
        if config.evaluation.generate_images {
            "yes"
        } else {
            "no"
        }
    );
    println!("   Personas:");
    for persona in personas {
        println!("     👤 {} ({})", persona.name, persona.role);
    }

    println!("\n✅ Dry run complete.");
    0
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is installed, so where the configuration came from
/// is returned and logged later.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::Explicit(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigOrigin::DefaultFile)),
        Ok(None) => Ok((Config::default(), ConfigOrigin::Builtin)),
        Err(e) => Ok((Config::default(), ConfigOrigin::Unreadable(format!("{:#}", e)))),
    }
}

/// Where the configuration in use was loaded from.
enum ConfigOrigin {
    Explicit(PathBuf),
    DefaultFile,
    Builtin,
    Unreadable(String),
}

fn log_config_origin(origin: &ConfigOrigin) {
    match origin {
        ConfigOrigin::Explicit(path) => info!("Loaded config from: {}", path.display()),
        ConfigOrigin::DefaultFile => info!("Loaded default config from {}", CONFIG_FILE),
        ConfigOrigin::Builtin => debug!("No config file found, using defaults"),
        ConfigOrigin::Unreadable(e) => warn!("Failed to load config: {}", e),
    }
}
