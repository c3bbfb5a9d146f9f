use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show critical errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
    /// Show all available debugging information
    Debug,
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Per-file lines plus a summary
    #[default]
    Human,
    /// Machine-readable JSON report
    Json,
    /// Summary only
    Summary,
}

/// Offline XML Schema validation tool
#[derive(Parser, Debug, Clone)]
#[command(name = "xsd-validate")]
#[command(about = "Validate XML documents against XSD schemas without network access")]
#[command(version)]
pub struct Cli {
    /// Document or directory to validate
    #[arg(help = "XML file or directory to validate")]
    pub path: PathBuf,

    /// Root schema to validate every document against. Without it the
    /// documents' own xsi:schemaLocation hints select the schema.
    #[arg(long = "schema", help = "Root XSD used for all documents")]
    pub schema: Option<PathBuf>,

    /// Catalog mapping schema identifiers to local files
    #[arg(long = "catalog", help = "XML catalog file for local resolution")]
    pub catalog: Option<PathBuf>,

    /// File extensions to process (comma-separated)
    #[arg(
        short = 'e',
        long = "extensions",
        default_value = "xml",
        help = "File extensions to process (e.g., 'xml,cmdi')"
    )]
    pub extensions: String,

    /// Number of concurrent validation passes
    #[arg(
        short = 't',
        long = "threads",
        help = "Number of concurrent validation passes"
    )]
    pub threads: Option<usize>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Include file patterns (glob syntax)
    #[arg(long = "include", action = clap::ArgAction::Append)]
    pub include_patterns: Vec<String>,

    /// Exclude file patterns (glob syntax)
    #[arg(long = "exclude", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Show progress indicators
    #[arg(long = "progress")]
    pub progress: bool,

    /// Stop scheduling new files after the first invalid result
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,

    /// Per-file validation timeout in seconds
    #[arg(long = "timeout", default_value = "30")]
    pub timeout: u64,

    /// Report format
    #[arg(long = "format", value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,

    /// Configuration file (TOML or JSON)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Maximum number of compiled schemas held in memory
    #[arg(long = "max-cached-schemas", default_value = "64")]
    pub max_cached_schemas: u64,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn get_extensions(&self) -> Vec<String> {
        self.extensions
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Checks that cannot wait for config merging: the target path and any
    /// explicitly named files must exist.
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.exists() {
            return Err(format!("Path does not exist: {}", self.path.display()));
        }
        if let Some(schema) = &self.schema
            && !schema.exists()
        {
            return Err(format!("Schema does not exist: {}", schema.display()));
        }
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn get_thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_basic_cli_parsing() {
        let args = vec!["xsd-validate", "/tmp"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.path, PathBuf::from("/tmp"));
        assert_eq!(cli.format, OutputFormat::Human);
        assert!(cli.schema.is_none());
        assert!(cli.catalog.is_none());
    }

    #[test]
    fn test_full_cli_parsing() {
        let args = vec![
            "xsd-validate",
            "--schema",
            "root.xsd",
            "--catalog",
            "catalog.xml",
            "-e",
            "xml,cmdi",
            "-t",
            "4",
            "--include",
            "**/*.xml",
            "--exclude",
            "**/tmp/**",
            "--fail-fast",
            "--format",
            "json",
            "--max-cached-schemas",
            "8",
            "docs/",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.schema, Some(PathBuf::from("root.xsd")));
        assert_eq!(cli.catalog, Some(PathBuf::from("catalog.xml")));
        assert_eq!(cli.get_extensions(), vec!["xml", "cmdi"]);
        assert_eq!(cli.threads, Some(4));
        assert_eq!(cli.include_patterns, vec!["**/*.xml"]);
        assert_eq!(cli.exclude_patterns, vec!["**/tmp/**"]);
        assert!(cli.fail_fast);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.max_cached_schemas, 8);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let args = vec!["xsd-validate", "-q", "-v", "/tmp"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_extensions_are_trimmed() {
        let args = vec!["xsd-validate", "-e", " xml , xsd ,", "/tmp"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.get_extensions(), vec!["xml", "xsd"]);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let args = vec!["xsd-validate", "-t", "0", "."];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.validate().is_err());
    }
}
