//! # xsd-validate Library
//!
//! Offline validation of XML documents against XSD schemas: a catalog maps
//! schema identifiers to local files, schemas compile once into shared
//! immutable tables, and a streaming walk checks each document in order,
//! reporting violations with three severities. No network access, ever.

pub mod cache;
pub mod catalog;
pub mod cli;
pub mod collector;
pub mod compiler;
pub mod config;
pub mod error;
pub mod file_discovery;
pub mod model;
pub mod output;
pub mod processor;
pub mod schema_locator;
pub mod validator;

pub use cache::CompiledSchemaCache;
pub use catalog::{Catalog, SchemaResolver};
pub use cli::{Cli, OutputFormat, VerbosityLevel};
pub use collector::{
    Severity, Violation, ViolationCollector, ViolationList, ViolationSink,
};
pub use compiler::SchemaCompiler;
pub use config::{Config, ConfigManager};
pub use error::{CatalogError, CompileError, ConfigError, ValidationError};
pub use file_discovery::{DiscoveredFiles, FileDiscovery};
pub use model::{CompiledSchema, QName};
pub use output::Output;
pub use processor::DocumentProcessor;
pub use schema_locator::{SchemaHint, SchemaLocator};
pub use validator::{
    FileValidationResult, PerformanceMetrics, ProgressCallback, ValidationConfig, ValidationEngine,
    ValidationPhase, ValidationProgress, ValidationResults, ValidationStatus,
};
