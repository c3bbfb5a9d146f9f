//! Layered configuration.
//!
//! Precedence is file, then `XSD_VALIDATE_*` environment variables, then CLI
//! arguments. Config files are TOML or JSON and are searched in the current
//! directory and the user config directory when not named explicitly.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{Cli, OutputFormat};
use crate::error::{ConfigError, ConfigResult};

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    pub validation: ValidationSection,
    pub schema: SchemaSection,
    pub output: OutputSection,
    pub files: FileSection,
}

/// Validation-pass settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationSection {
    /// Number of concurrent validation passes
    pub threads: Option<usize>,
    /// Stop scheduling new files after the first invalid result
    pub fail_fast: bool,
    /// Show progress indicators
    pub show_progress: bool,
    /// Per-file timeout in seconds
    pub timeout_seconds: u64,
}

/// Schema selection and resolution settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SchemaSection {
    /// Root schema pinned for every document
    pub root: Option<PathBuf>,
    /// Catalog file for local identifier resolution
    pub catalog: Option<PathBuf>,
    /// Compiled schemas held in memory
    pub max_cached_schemas: u64,
}

/// Output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputSection {
    /// Report format
    pub format: OutputFormatConfig,
    /// Verbose output
    pub verbose: bool,
    /// Quiet mode (errors only)
    pub quiet: bool,
}

/// File selection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileSection {
    /// File extensions to process
    pub extensions: Vec<String>,
    /// Include patterns (glob syntax)
    pub include_patterns: Vec<String>,
    /// Exclude patterns (glob syntax)
    pub exclude_patterns: Vec<String>,
}

/// Serializable mirror of the CLI output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormatConfig {
    Human,
    Json,
    Summary,
}

impl From<OutputFormat> for OutputFormatConfig {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Human => OutputFormatConfig::Human,
            OutputFormat::Json => OutputFormatConfig::Json,
            OutputFormat::Summary => OutputFormatConfig::Summary,
        }
    }
}

impl From<OutputFormatConfig> for OutputFormat {
    fn from(format: OutputFormatConfig) -> Self {
        match format {
            OutputFormatConfig::Human => OutputFormat::Human,
            OutputFormatConfig::Json => OutputFormat::Json,
            OutputFormatConfig::Summary => OutputFormat::Summary,
        }
    }
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            threads: None,
            fail_fast: false,
            show_progress: false,
            timeout_seconds: 30,
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            format: OutputFormatConfig::Human,
            verbose: false,
            quiet: false,
        }
    }
}

impl Default for FileSection {
    fn default() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            include_patterns: vec![],
            exclude_patterns: vec![],
        }
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> ConfigResult<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound {
                    path: config_path.clone(),
                });
            }
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides(config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> ConfigResult<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Extensionless files are tried as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> ConfigResult<Option<Config>> {
        let config_names = [
            "xsd-validate.toml",
            "xsd-validate.json",
            ".xsd-validate.toml",
            ".xsd-validate.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("xsd-validate");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> ConfigResult<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> ConfigResult<Config> {
        let parse_err = |key: &str, value: &str| {
            ConfigError::Environment(format!("Invalid {} value: {}", key, value))
        };

        if let Some(threads) = env.get("XSD_VALIDATE_THREADS") {
            config.validation.threads = Some(
                threads
                    .parse()
                    .map_err(|_| parse_err("XSD_VALIDATE_THREADS", &threads))?,
            );
        }

        if let Some(fail_fast) = env.get("XSD_VALIDATE_FAIL_FAST") {
            config.validation.fail_fast = fail_fast
                .parse()
                .map_err(|_| parse_err("XSD_VALIDATE_FAIL_FAST", &fail_fast))?;
        }

        if let Some(timeout) = env.get("XSD_VALIDATE_TIMEOUT") {
            config.validation.timeout_seconds = timeout
                .parse()
                .map_err(|_| parse_err("XSD_VALIDATE_TIMEOUT", &timeout))?;
        }

        if let Some(schema) = env.get("XSD_VALIDATE_SCHEMA") {
            config.schema.root = Some(PathBuf::from(schema));
        }

        if let Some(catalog) = env.get("XSD_VALIDATE_CATALOG") {
            config.schema.catalog = Some(PathBuf::from(catalog));
        }

        if let Some(max) = env.get("XSD_VALIDATE_MAX_CACHED_SCHEMAS") {
            config.schema.max_cached_schemas = max
                .parse()
                .map_err(|_| parse_err("XSD_VALIDATE_MAX_CACHED_SCHEMAS", &max))?;
        }

        if let Some(verbose) = env.get("XSD_VALIDATE_VERBOSE") {
            config.output.verbose = verbose
                .parse()
                .map_err(|_| parse_err("XSD_VALIDATE_VERBOSE", &verbose))?;
        }

        if let Some(quiet) = env.get("XSD_VALIDATE_QUIET") {
            config.output.quiet = quiet
                .parse()
                .map_err(|_| parse_err("XSD_VALIDATE_QUIET", &quiet))?;
        }

        if let Some(format) = env.get("XSD_VALIDATE_FORMAT") {
            config.output.format = match format.to_lowercase().as_str() {
                "human" => OutputFormatConfig::Human,
                "json" => OutputFormatConfig::Json,
                "summary" => OutputFormatConfig::Summary,
                _ => return Err(parse_err("XSD_VALIDATE_FORMAT", &format)),
            };
        }

        if let Some(extensions) = env.get("XSD_VALIDATE_EXTENSIONS") {
            config.files.extensions = extensions
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if cli.threads.is_some() {
            config.validation.threads = cli.threads;
        }
        if cli.fail_fast {
            config.validation.fail_fast = true;
        }
        if cli.progress {
            config.validation.show_progress = true;
        }
        config.validation.timeout_seconds = cli.timeout;

        if let Some(schema) = &cli.schema {
            config.schema.root = Some(schema.clone());
        }
        if let Some(catalog) = &cli.catalog {
            config.schema.catalog = Some(catalog.clone());
        }
        config.schema.max_cached_schemas = cli.max_cached_schemas;

        config.output.format = cli.format.into();
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        config.files.extensions = cli.get_extensions();
        if !cli.include_patterns.is_empty() {
            config.files.include_patterns = cli.include_patterns.clone();
        }
        if !cli.exclude_patterns.is_empty() {
            config.files.exclude_patterns = cli.exclude_patterns.clone();
        }

        config
    }

    /// Merge two configurations (second takes precedence)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        if override_config.validation.threads.is_some() {
            base.validation.threads = override_config.validation.threads;
        }
        base.validation.fail_fast = override_config.validation.fail_fast;
        base.validation.show_progress = override_config.validation.show_progress;
        base.validation.timeout_seconds = override_config.validation.timeout_seconds;

        if override_config.schema.root.is_some() {
            base.schema.root = override_config.schema.root;
        }
        if override_config.schema.catalog.is_some() {
            base.schema.catalog = override_config.schema.catalog;
        }
        if override_config.schema.max_cached_schemas != 0 {
            base.schema.max_cached_schemas = override_config.schema.max_cached_schemas;
        }

        base.output.format = override_config.output.format;
        base.output.verbose = override_config.output.verbose;
        base.output.quiet = override_config.output.quiet;

        if !override_config.files.extensions.is_empty() {
            base.files.extensions = override_config.files.extensions;
        }
        if !override_config.files.include_patterns.is_empty() {
            base.files.include_patterns = override_config.files.include_patterns;
        }
        if !override_config.files.exclude_patterns.is_empty() {
            base.files.exclude_patterns = override_config.files.exclude_patterns;
        }

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> ConfigResult<()> {
        let invalid = |field: &str, value: String, reason: &str| {
            Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value,
                reason: reason.to_string(),
            })
        };

        if let Some(threads) = config.validation.threads {
            if threads == 0 {
                return invalid("validation.threads", "0".into(), "must be greater than 0");
            }
            if threads > 1000 {
                return invalid(
                    "validation.threads",
                    threads.to_string(),
                    "cannot exceed 1000",
                );
            }
        }

        if config.validation.timeout_seconds == 0 {
            return invalid(
                "validation.timeout_seconds",
                "0".into(),
                "must be greater than 0",
            );
        }

        if config.schema.max_cached_schemas == 0 {
            return invalid(
                "schema.max_cached_schemas",
                "0".into(),
                "must be greater than 0",
            );
        }

        if config.output.verbose && config.output.quiet {
            return invalid(
                "output",
                "verbose+quiet".into(),
                "cannot enable both verbose and quiet modes",
            );
        }

        if config.files.extensions.is_empty() {
            return invalid(
                "files.extensions",
                "[]".into(),
                "at least one file extension must be specified",
            );
        }

        for ext in &config.files.extensions {
            if ext.contains('/') || ext.contains('\\') || ext.contains('.') {
                return invalid(
                    "files.extensions",
                    ext.clone(),
                    "extensions are given without separators or dots",
                );
            }
        }

        Ok(())
    }

    /// Get the effective thread count
    pub fn get_thread_count(config: &Config) -> usize {
        config.validation.threads.unwrap_or_else(num_cpus::get)
    }

    /// Per-file timeout as a Duration
    pub fn get_timeout_duration(config: &Config) -> Duration {
        Duration::from_secs(config.validation.timeout_seconds)
    }
}
