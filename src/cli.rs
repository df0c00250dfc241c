//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use crate::client::Provider;
use crate::models::EvaluationModel;
use crate::orchestrator::FailurePolicy;

/// uxpanel - persona-driven UX evaluation for screenshots, flows and recordings
///
/// Audits a UI artifact through several simulated personas at once,
/// aggregates their findings, and can redraw the screen to fix the
/// problems each persona found.
///
/// Examples:
///   uxpanel --image checkout.png
///   uxpanel --image checkout.png --persona 1 --persona 2 --persona 3 --model ues
///   uxpanel --flow ./signup-flow --persona 1 --persona 3 --format json
///   uxpanel --image home.png --persona 1 --persona 2 --generate-images --archive redesigns.zip
///   uxpanel --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(group(ArgGroup::new("artifact").args(["image", "flow", "video"]).multiple(false)))]
pub struct Args {
    /// Screenshot to evaluate (png, jpg, webp)
    #[arg(long, value_name = "FILE")]
    pub image: Option<PathBuf>,

    /// Directory of step screenshots to evaluate as one flow
    ///
    /// Images are taken in file-name order. A .txt file with the same name
    /// as an image is used as that step's description.
    #[arg(long, value_name = "DIR")]
    pub flow: Option<PathBuf>,

    /// Screen recording to evaluate (mp4, webm, mov)
    #[arg(long, value_name = "FILE")]
    pub video: Option<PathBuf>,

    /// Persona id to evaluate with (repeatable)
    ///
    /// Defaults to the first configured persona. See --list-personas.
    #[arg(short, long = "persona", value_name = "ID")]
    pub personas: Vec<String>,

    /// Evaluation model
    #[arg(short, long, value_name = "MODEL")]
    pub model: Option<EvaluationModel>,

    /// Also redraw the artifact for every persona that produced a report
    #[arg(long)]
    pub generate_images: bool,

    /// How failures of individual personas are treated
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<FailurePolicy>,

    /// Backend provider
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<Provider>,

    /// Backend API key
    #[arg(long, env = "UXPANEL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Per-call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Directory to write each optimized image to
    #[arg(long, value_name = "DIR")]
    pub images_dir: Option<PathBuf>,

    /// Zip archive to export all optimized images into
    #[arg(long, value_name = "FILE")]
    pub archive: Option<PathBuf>,

    /// Fail if the average overall score is below this value
    ///
    /// Useful for CI pipelines. Exit code 2 when the score is too low.
    #[arg(long, value_name = "SCORE")]
    pub fail_below: Option<u8>,

    /// Dry run: load the artifact and print the plan without calling the backend
    #[arg(long)]
    pub dry_run: bool,

    /// List configured personas and exit
    #[arg(long)]
    pub list_personas: bool,

    /// Generate a default .uxpanel.toml configuration file
    #[arg(long)]
    pub init_config: bool,

    /// Path to configuration file
    ///
    /// If not specified, looks for .uxpanel.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Whether this invocation evaluates an artifact at all.
    pub fn needs_artifact(&self) -> bool {
        !(self.init_config || self.list_personas)
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if !self.needs_artifact() {
            return Ok(());
        }

        let selected = [&self.image, &self.flow, &self.video]
            .iter()
            .filter(|a| a.is_some())
            .count();
        if selected != 1 {
            return Err("Exactly one of --image, --flow or --video is required".to_string());
        }

        for path in [&self.image, &self.video].into_iter().flatten() {
            if !path.is_file() {
                return Err(format!("File does not exist: {}", path.display()));
            }
        }
        if let Some(ref dir) = self.flow {
            if !dir.is_dir() {
                return Err(format!("Flow directory does not exist: {}", dir.display()));
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(score) = self.fail_below {
            if score > 100 {
                return Err("--fail-below must be between 0 and 100".to_string());
            }
        }

        if let Some(ref dir) = self.images_dir {
            if dir.exists() && !dir.is_dir() {
                return Err(format!("Images path is not a directory: {}", dir.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is `general.verbose` from the config file; `--quiet`
    /// still wins over it.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
