//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.uxpanel.toml` files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::client::{BackendConfig, Provider};
use crate::export::{DEFAULT_BACKGROUND, DEFAULT_PADDING};
use crate::models::{EvaluationModel, Persona};
use crate::orchestrator::FailurePolicy;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".uxpanel.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Backend service settings.
    #[serde(default)]
    pub backend: BackendSettings,

    /// Evaluation settings.
    #[serde(default)]
    pub evaluation: EvaluationSettings,

    /// Export settings.
    #[serde(default)]
    pub export: ExportSettings,

    /// Persona definitions.
    #[serde(default = "Persona::defaults")]
    pub personas: Vec<Persona>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            backend: BackendSettings::default(),
            evaluation: EvaluationSettings::default(),
            export: ExportSettings::default(),
            personas: Persona::defaults(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// How analysis failures of individual personas are treated.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_output() -> String {
    "uxpanel_report.md".to_string()
}

/// Backend service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub provider: Provider,

    /// API key. Usually supplied through `UXPANEL_API_KEY` instead.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model used for the structured analysis.
    #[serde(default = "default_analysis_model")]
    pub analysis_model: String,

    /// Model used to redraw the artifact.
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Endpoint override.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Number of retries on transient failure.
    #[serde(default = "default_retries")]
    pub retries: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Largest artifact file sent inline.
    #[serde(default = "default_max_inline_bytes")]
    pub max_inline_bytes: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            api_key: None,
            analysis_model: default_analysis_model(),
            image_model: default_image_model(),
            base_url: None,
            timeout_seconds: default_timeout(),
            retries: default_retries(),
            temperature: default_temperature(),
            max_inline_bytes: default_max_inline_bytes(),
        }
    }
}

fn default_analysis_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_image_model() -> String {
    "gemini-3-pro-image-preview".to_string()
}

fn default_timeout() -> u64 {
    300 // image generation regularly takes over a minute
}

fn default_retries() -> usize {
    2
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_inline_bytes() -> u64 {
    20 * 1024 * 1024
}

/// Evaluation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationSettings {
    #[serde(default)]
    pub model: EvaluationModel,

    /// Also redraw the artifact for every persona with a report.
    #[serde(default)]
    pub generate_images: bool,
}

/// Export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    /// Padding around each exported surface, in pixels.
    #[serde(default = "default_padding")]
    pub padding: u32,

    /// Background colour behind each exported surface.
    #[serde(default = "default_background")]
    pub background: String,

    /// Archive entry name prefix.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            padding: default_padding(),
            background: default_background(),
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_padding() -> u32 {
    DEFAULT_PADDING
}

fn default_background() -> String {
    DEFAULT_BACKGROUND.to_string()
}

fn default_file_prefix() -> String {
    "Report".to_string()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only values the user actually passed are applied.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(policy) = args.policy {
            self.general.failure_policy = policy;
        }
        if args.verbose {
            self.general.verbose = true;
        }

        if let Some(provider) = args.provider {
            self.backend.provider = provider;
        }
        if let Some(ref key) = args.api_key {
            self.backend.api_key = Some(key.clone());
        }
        if let Some(timeout) = args.timeout {
            self.backend.timeout_seconds = timeout;
        }

        if let Some(model) = args.model {
            self.evaluation.model = model;
        }
        if args.generate_images {
            self.evaluation.generate_images = true;
        }
    }

    /// Resolve the backend settings into the value passed to every client call.
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            provider: self.backend.provider,
            api_key: self.backend.api_key.clone().unwrap_or_default(),
            analysis_model: self.backend.analysis_model.clone(),
            image_model: self.backend.image_model.clone(),
            base_url: self.backend.base_url.clone(),
            timeout: Duration::from_secs(self.backend.timeout_seconds),
            retries: self.backend.retries,
            temperature: self.backend.temperature,
        }
    }

    /// Pick personas by id, in the order given. With no ids, the first
    /// configured persona is used.
    pub fn select_personas(&self, ids: &[String]) -> Result<Vec<Persona>> {
        if ids.is_empty() {
            return match self.personas.first() {
                Some(persona) => Ok(vec![persona.clone()]),
                None => bail!("No personas configured"),
            };
        }

        ids.iter()
            .map(|id| {
                self.personas
                    .iter()
                    .find(|p| &p.id == id)
                    .cloned()
                    .with_context(|| format!("Unknown persona id: {}", id))
            })
            .collect()
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
