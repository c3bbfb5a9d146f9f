use std::path::PathBuf;

use thiserror::Error;

/// Main application error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog load error: {0}")]
    CatalogLoad(String),

    #[error("Schema compilation error: {location} - {details}")]
    SchemaCompilation { location: PathBuf, details: String },

    #[error("Document read error: {file} - {details}")]
    DocumentRead { file: PathBuf, details: String },

    #[error("Validation timeout: {file} after {timeout_seconds} seconds")]
    Timeout { file: PathBuf, timeout_seconds: u64 },

    #[error("Schema not resolvable: {identifier} - no catalog entry or local file")]
    SchemaNotResolvable { identifier: String },

    #[error("Schema hint extraction failed: {file} - no schema location found")]
    SchemaHintNotFound { file: PathBuf },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system traversal error: {path} - {reason}")]
    FileSystemTraversal { path: PathBuf, reason: String },

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

/// Catalog-specific error types
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Catalog is not well-formed XML: {path} - {details}")]
    Parse { path: PathBuf, details: String },

    #[error("Not a catalog document: {path} - root element is '{found}'")]
    NotACatalog { path: PathBuf, found: String },

    #[error("Invalid catalog entry: {path} - {details}")]
    InvalidEntry { path: PathBuf, details: String },

    #[error("Catalog read failed: {path} - {details}")]
    Read { path: PathBuf, details: String },
}

/// Schema-compilation error types
///
/// Clone is required so cached compilation failures can be handed to every
/// concurrent waiter.
#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error("Cannot resolve schema reference '{identifier}' from {referenced_from}")]
    UnresolvableReference {
        identifier: String,
        referenced_from: PathBuf,
    },

    #[error("Schema is not well-formed XML: {location} - {details}")]
    Parse { location: PathBuf, details: String },

    #[error("Not a schema document: {location} - root element is '{found}'")]
    NotASchema { location: PathBuf, found: String },

    #[error("Duplicate global {kind} '{name}' in {location}")]
    DuplicateDefinition {
        kind: String,
        name: String,
        location: PathBuf,
    },

    #[error("Unknown type '{name}' referenced in {location}")]
    UnknownType { name: String, location: PathBuf },

    #[error("Unsupported schema construct '{construct}' in {location}")]
    UnsupportedConstruct {
        construct: String,
        location: PathBuf,
    },

    #[error("Malformed schema component in {location}: {details}")]
    Malformed { location: PathBuf, details: String },

    #[error("Schema read failed: {location} - {details}")]
    Read { location: PathBuf, details: String },
}

impl CompileError {
    /// Location of the schema document the error was raised in
    pub fn location(&self) -> &PathBuf {
        match self {
            CompileError::UnresolvableReference {
                referenced_from, ..
            } => referenced_from,
            CompileError::Parse { location, .. }
            | CompileError::NotASchema { location, .. }
            | CompileError::DuplicateDefinition { location, .. }
            | CompileError::UnknownType { location, .. }
            | CompileError::UnsupportedConstruct { location, .. }
            | CompileError::Malformed { location, .. }
            | CompileError::Read { location, .. } => location,
        }
    }
}

/// Configuration-specific error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Configuration read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Invalid configuration value: {field} = {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

// Error conversion implementations
impl From<CatalogError> for ValidationError {
    fn from(err: CatalogError) -> Self {
        ValidationError::CatalogLoad(err.to_string())
    }
}

impl From<CompileError> for ValidationError {
    fn from(err: CompileError) -> Self {
        ValidationError::SchemaCompilation {
            location: err.location().clone(),
            details: err.to_string(),
        }
    }
}

impl From<ConfigError> for ValidationError {
    fn from(err: ConfigError) -> Self {
        ValidationError::Config(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Catalog result type alias
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Compilation result type alias
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
