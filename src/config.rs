//! Configuration management for blueprint-forge
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (blueprints.toml)
//! - Environment variables (BLUEPRINTS__*)
//!
//! ## Example config file (blueprints.toml):
//! ```toml
//! [project]
//! root = "./blueprints"
//! skip_files = ["README.md", "CLAUDE.md"]
//!
//! [generation]
//! language = "python"
//! max_concurrency = 4
//! max_repairs = 2
//! command = ["claude", "-p"]
//!
//! [verification]
//! fuzzy_threshold = 0.8
//!
//! [output]
//! dir = "./generated"
//! overwrite = false
//! report = "./generation-report.json"
//! ```
//!
//! Core components never read this directly; the binary converts it into
//! the per-component settings structs and passes those in.

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::graph::LoadConfig;
use crate::language::Language;
use crate::schedule::SchedulerConfig;
use crate::verify::VerifyConfig;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForgeConfig {
    /// Blueprint discovery settings
    #[serde(default)]
    pub project: ProjectConfig,

    /// Generation and scheduling settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Verification settings
    #[serde(default)]
    pub verification: VerificationConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Blueprint discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Directory scanned for blueprints
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Blueprint file extensions
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// File names that are never blueprints
    #[serde(default = "default_skip_files")]
    pub skip_files: Vec<String>,

    /// Relative path prefixes excluded from the walk
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,

    /// Project manifest listing third-party dependencies (relative to root)
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Target language for generated code
    #[serde(default)]
    pub language: Language,

    /// Model name handed to the generator command
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum concurrent generation calls
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Regenerations allowed after the first attempt
    #[serde(default = "default_max_repairs")]
    pub max_repairs: usize,

    /// Per-attempt timeout in seconds (0 disables the timeout)
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// External generator program and its arguments
    #[serde(default = "default_command")]
    pub command: Vec<String>,
}

/// Verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Minimum confidence for a fuzzy declared-element match
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// Check declared elements are present
    #[serde(default = "default_true")]
    pub check_declared: bool,

    /// Check project-local imports
    #[serde(default = "default_true")]
    pub check_imports: bool,

    /// Treat soft findings as repair triggers
    #[serde(default)]
    pub repair_on_soft_findings: bool,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for generated files; alongside blueprints when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Persist accepted artifacts
    #[serde(default = "default_true")]
    pub write_artifacts: bool,

    /// Replace files that already exist at an artifact's destination
    #[serde(default)]
    pub overwrite: bool,

    /// JSON run report path
    #[serde(default)]
    pub report: Option<PathBuf>,
}

// Default value functions
fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_extensions() -> Vec<String> {
    vec![".md".to_string()]
}

fn default_skip_files() -> Vec<String> {
    vec![
        "README.md".to_string(),
        "CLAUDE.md".to_string(),
        "BLUEPRINTS_SPEC.md".to_string(),
    ]
}

fn default_skip_prefixes() -> Vec<String> {
    LoadConfig::default().skip_prefixes
}

fn default_manifest() -> PathBuf {
    PathBuf::from("main.md")
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_repairs() -> usize {
    2
}

fn default_attempt_timeout_secs() -> u64 {
    300
}

fn default_command() -> Vec<String> {
    vec!["claude".to_string(), "-p".to_string()]
}

fn default_fuzzy_threshold() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            extensions: default_extensions(),
            skip_files: default_skip_files(),
            skip_prefixes: default_skip_prefixes(),
            manifest: default_manifest(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            language: Language::default(),
            model: default_model(),
            max_concurrency: default_max_concurrency(),
            max_repairs: default_max_repairs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            command: default_command(),
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            check_declared: true,
            check_imports: true,
            repair_on_soft_findings: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: None,
            write_artifacts: true,
            overwrite: false,
            report: None,
        }
    }
}

impl ForgeConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the default locations
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "blueprints.toml",
            ".blueprints.toml",
            "config/blueprints.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "blueprints") {
            let xdg_config = config_dir.config_dir().join("blueprints.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // BLUEPRINTS__GENERATION__MAX_CONCURRENCY=8
        builder = builder.add_source(
            Environment::with_prefix("BLUEPRINTS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> std::io::Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Get the blueprint root (resolves relative paths)
    pub fn project_root(&self) -> PathBuf {
        if self.project.root.is_absolute() {
            self.project.root.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.project.root)
        }
    }

    /// Discovery settings for the graph loader
    pub fn load_config(&self) -> LoadConfig {
        LoadConfig {
            extensions: self.project.extensions.clone(),
            skip_files: self.project.skip_files.clone(),
            skip_prefixes: self.project.skip_prefixes.clone(),
            include_prefixes: Vec::new(),
        }
    }

    /// Verification settings
    pub fn verify_config(&self) -> VerifyConfig {
        VerifyConfig {
            fuzzy_threshold: self.verification.fuzzy_threshold,
            check_declared: self.verification.check_declared,
            check_imports: self.verification.check_imports,
            repair_on_soft_findings: self.verification.repair_on_soft_findings,
        }
    }

    /// Scheduler settings
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let timeout = match self.generation.attempt_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        SchedulerConfig {
            language: self.generation.language,
            max_concurrency: self.generation.max_concurrency.max(1),
            max_repairs: self.generation.max_repairs,
            attempt_timeout: timeout,
            verify: self.verify_config(),
        }
    }
}
