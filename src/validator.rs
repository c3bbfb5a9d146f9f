//! Hybrid async/sync validation engine.
//!
//! - **Async I/O**: file discovery, hint scanning, schema resolution
//! - **Sync CPU-bound work**: schema compilation and the validating walk run
//!   on blocking threads via spawn_blocking
//! - **Concurrent orchestration**: tokio::spawn creates one task per document
//! - **Bounded concurrency**: a semaphore caps how many passes run at once
//!
//! Schemas are compiled once and shared: the compiled-schema cache hands the
//! same `Arc<CompiledSchema>` to every document that resolves to it.

use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::CompiledSchemaCache;
use crate::catalog::SchemaResolver;
use crate::collector::{Severity, ViolationCollector, ViolationList};
use crate::compiler::SchemaCompiler;
use crate::error::{CompileError, Result, ValidationError};
use crate::file_discovery::FileDiscovery;
use crate::model::CompiledSchema;
use crate::processor::DocumentProcessor;
use crate::schema_locator::SchemaLocator;

/// Validation run configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationConfig {
    /// Number of concurrent validation passes
    pub max_concurrent_validations: usize,
    /// Per-document timeout
    pub validation_timeout: Duration,
    /// Stop scheduling new documents after the first invalid result
    pub fail_fast: bool,
    /// Show progress indicators
    pub show_progress: bool,
    /// Print each violation to stderr the moment it is recorded, instead of
    /// only in the final report
    pub live_reporting: bool,
    /// Collect performance metrics
    pub collect_metrics: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_validations: num_cpus::get(),
            validation_timeout: Duration::from_secs(30),
            fail_fast: false,
            show_progress: false,
            live_reporting: false,
            collect_metrics: true,
        }
    }
}

/// Status of a single document validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    /// Document conforms: the pass recorded no violations of any severity
    Valid,
    /// The pass recorded violations
    Invalid { violation_count: usize },
    /// Operational error; the document never got a verdict
    Error { message: String },
    /// Document was not examined (e.g. no schema hint, fail-fast)
    Skipped { reason: String },
}

impl ValidationStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationStatus::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationStatus::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationStatus::Error { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ValidationStatus::Skipped { .. })
    }
}

/// Result of validating a single document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileValidationResult {
    /// Path of the validated document
    pub path: PathBuf,
    pub status: ValidationStatus,
    /// Schema the document was validated against, when one was resolved
    pub schema: Option<PathBuf>,
    /// Duration of the pass
    pub duration: Duration,
    /// Everything the pass recorded, in arrival order
    pub violations: ViolationList,
}

impl FileValidationResult {
    pub fn valid(path: PathBuf, schema: PathBuf, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Valid,
            schema: Some(schema),
            duration,
            violations: ViolationList::new(),
        }
    }

    pub fn invalid(
        path: PathBuf,
        schema: PathBuf,
        violations: ViolationList,
        duration: Duration,
    ) -> Self {
        Self {
            path,
            status: ValidationStatus::Invalid {
                violation_count: violations.len(),
            },
            schema: Some(schema),
            duration,
            violations,
        }
    }

    pub fn error(path: PathBuf, error: ValidationError, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Error {
                message: error.to_string(),
            },
            schema: None,
            duration,
            violations: ViolationList::new(),
        }
    }

    pub fn skipped(path: PathBuf, reason: String, duration: Duration) -> Self {
        Self {
            path,
            status: ValidationStatus::Skipped { reason },
            schema: None,
            duration,
            violations: ViolationList::new(),
        }
    }
}

/// Progress update for a running validation
#[derive(Debug, Clone)]
pub struct ValidationProgress {
    /// Document most recently finished, if any
    pub current_file: Option<PathBuf>,
    pub completed: usize,
    pub total: usize,
    pub phase: ValidationPhase,
}

/// Phase of the validation workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Discovery,
    SchemaCompilation,
    Validation,
    Aggregation,
    Complete,
}

/// Performance metrics for a validation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_duration: Duration,
    pub discovery_duration: Duration,
    pub validation_duration: Duration,
    pub average_time_per_file: Duration,
    pub throughput_files_per_second: f64,
    /// Peak resident memory in MB, 0 when unavailable
    pub peak_memory_mb: u64,
    pub concurrent_validations: usize,
    /// Distinct schemas compiled during the run
    pub schemas_compiled: u64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_duration: Duration::ZERO,
            discovery_duration: Duration::ZERO,
            validation_duration: Duration::ZERO,
            average_time_per_file: Duration::ZERO,
            throughput_files_per_second: 0.0,
            peak_memory_mb: 0,
            concurrent_validations: 1,
            schemas_compiled: 0,
        }
    }
}

/// Aggregated results of validating a batch of documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResults {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub error_files: usize,
    pub skipped_files: usize,
    /// Violation totals across all documents
    pub warning_count: usize,
    pub error_count: usize,
    pub fatal_count: usize,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub file_results: Vec<FileValidationResult>,
    /// Schemas used during the run
    pub schemas_used: Vec<String>,
    /// Unreadable directory entries encountered during discovery
    pub discovery_warnings: Vec<String>,
    pub performance_metrics: PerformanceMetrics,
}

impl ValidationResults {
    /// Aggregate individual document results into a summary
    pub fn aggregate(file_results: Vec<FileValidationResult>) -> Self {
        let total_files = file_results.len();
        let mut valid_files = 0;
        let mut invalid_files = 0;
        let mut error_files = 0;
        let mut skipped_files = 0;
        let mut warning_count = 0;
        let mut error_count = 0;
        let mut fatal_count = 0;
        let mut total_duration = Duration::ZERO;
        let mut schemas_used = std::collections::BTreeSet::new();

        for result in &file_results {
            match result.status {
                ValidationStatus::Valid => valid_files += 1,
                ValidationStatus::Invalid { .. } => invalid_files += 1,
                ValidationStatus::Error { .. } => error_files += 1,
                ValidationStatus::Skipped { .. } => skipped_files += 1,
            }

            warning_count += result.violations.count_of(Severity::Warning);
            error_count += result.violations.count_of(Severity::Error);
            fatal_count += result.violations.count_of(Severity::FatalError);

            total_duration += result.duration;

            if let Some(ref schema) = result.schema {
                schemas_used.insert(schema.display().to_string());
            }
        }

        let average_duration = if total_files > 0 {
            total_duration / total_files as u32
        } else {
            Duration::ZERO
        };

        Self {
            total_files,
            valid_files,
            invalid_files,
            error_files,
            skipped_files,
            warning_count,
            error_count,
            fatal_count,
            total_duration,
            average_duration,
            file_results,
            schemas_used: schemas_used.into_iter().collect(),
            discovery_warnings: Vec::new(),
            performance_metrics: PerformanceMetrics::default(),
        }
    }

    /// Aggregate with detailed performance metrics attached
    pub fn with_metrics(
        file_results: Vec<FileValidationResult>,
        performance_metrics: PerformanceMetrics,
    ) -> Self {
        let mut results = Self::aggregate(file_results);
        results.performance_metrics = performance_metrics;
        results
    }

    /// True when every document was examined and none recorded a violation
    pub fn all_valid(&self) -> bool {
        self.valid_files == self.total_files && self.total_files > 0
    }

    /// True when any document was invalid or hit an operational error
    pub fn has_failures(&self) -> bool {
        self.invalid_files > 0 || self.error_files > 0
    }

    /// Success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.valid_files as f64 / self.total_files as f64) * 100.0
        }
    }
}

/// Progress callback type for validation updates
pub type ProgressCallback = Arc<dyn Fn(ValidationProgress) + Send + Sync>;

/// Orchestrates validation of a document batch.
///
/// Discovery and hint scanning are async; compilation and the document walk
/// run on blocking threads. Results come back in the order documents were
/// submitted regardless of completion order.
pub struct ValidationEngine {
    locator: Arc<SchemaLocator>,
    compiler: Arc<SchemaCompiler>,
    cache: Arc<CompiledSchemaCache>,
    /// When set, every document is validated against this schema and hints
    /// are ignored
    pinned_schema: Option<PathBuf>,
    config: ValidationConfig,
}

impl ValidationEngine {
    pub fn new(resolver: SchemaResolver, max_cached_schemas: u64, config: ValidationConfig) -> Self {
        Self {
            locator: Arc::new(SchemaLocator::new(resolver.clone())),
            compiler: Arc::new(SchemaCompiler::new(resolver)),
            cache: Arc::new(CompiledSchemaCache::new(max_cached_schemas)),
            pinned_schema: None,
            config,
        }
    }

    /// Pin a root schema: hints in documents are no longer consulted
    pub fn with_pinned_schema(mut self, schema: Option<PathBuf>) -> Self {
        self.pinned_schema = schema;
        self
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CompiledSchemaCache> {
        &self.cache
    }

    /// Validate documents at a path (directory or file)
    pub async fn validate_path(
        &self,
        path: &Path,
        file_discovery: &FileDiscovery,
    ) -> Result<ValidationResults> {
        self.validate_path_with_progress(path, file_discovery, None)
            .await
    }

    /// Validate documents at a path with progress tracking
    pub async fn validate_path_with_progress(
        &self,
        path: &Path,
        file_discovery: &FileDiscovery,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<ValidationResults> {
        let workflow_start = Instant::now();
        let mut performance_metrics = PerformanceMetrics {
            concurrent_validations: self.config.max_concurrent_validations,
            ..PerformanceMetrics::default()
        };

        // Phase 1: discovery
        let discovery_start = Instant::now();
        if let Some(ref callback) = progress_callback {
            callback(ValidationProgress {
                current_file: None,
                completed: 0,
                total: 0,
                phase: ValidationPhase::Discovery,
            });
        }

        let discovered = file_discovery.discover(path).await?;
        performance_metrics.discovery_duration = discovery_start.elapsed();

        let discovery_warnings: Vec<String> = discovered
            .warnings
            .iter()
            .map(|w| format!("{}: {}", w.path.display(), w.reason))
            .collect();

        if discovered.files.is_empty() {
            performance_metrics.total_duration = workflow_start.elapsed();
            let mut results = ValidationResults::with_metrics(Vec::new(), performance_metrics);
            results.discovery_warnings = discovery_warnings;
            return Ok(results);
        }

        // Phase 2: compilation and validation, interleaved per document
        let validation_start = Instant::now();
        if let Some(ref callback) = progress_callback {
            callback(ValidationProgress {
                current_file: None,
                completed: 0,
                total: discovered.files.len(),
                phase: ValidationPhase::SchemaCompilation,
            });
        }

        let file_results = self
            .validate_files_with_progress(discovered.files, progress_callback.clone())
            .await?;
        performance_metrics.validation_duration = validation_start.elapsed();

        // Phase 3: aggregation
        if let Some(ref callback) = progress_callback {
            callback(ValidationProgress {
                current_file: None,
                completed: file_results.len(),
                total: file_results.len(),
                phase: ValidationPhase::Aggregation,
            });
        }

        performance_metrics.schemas_compiled = self.cache.entry_count().await;
        performance_metrics.total_duration = workflow_start.elapsed();
        performance_metrics.average_time_per_file = if !file_results.is_empty() {
            performance_metrics.validation_duration / file_results.len() as u32
        } else {
            Duration::ZERO
        };
        performance_metrics.throughput_files_per_second =
            if performance_metrics.total_duration.as_secs_f64() > 0.0 {
                file_results.len() as f64 / performance_metrics.total_duration.as_secs_f64()
            } else {
                0.0
            };

        if self.config.collect_metrics {
            performance_metrics.peak_memory_mb = peak_memory_mb().await;
        }

        let mut final_results = ValidationResults::with_metrics(file_results, performance_metrics);
        final_results.discovery_warnings = discovery_warnings;

        if let Some(ref callback) = progress_callback {
            callback(ValidationProgress {
                current_file: None,
                completed: final_results.total_files,
                total: final_results.total_files,
                phase: ValidationPhase::Complete,
            });
        }

        Ok(final_results)
    }

    /// Validate a list of documents using concurrent tasks
    pub async fn validate_files(&self, files: Vec<PathBuf>) -> Result<Vec<FileValidationResult>> {
        self.validate_files_with_progress(files, None).await
    }

    /// Validate a list of documents with progress tracking
    pub async fn validate_files_with_progress(
        &self,
        files: Vec<PathBuf>,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<Vec<FileValidationResult>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let total_files = files.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let abort = Arc::new(AtomicBool::new(false));
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.max_concurrent_validations,
        ));

        let validation_tasks: Vec<_> = files
            .into_iter()
            .map(|file_path| {
                let locator = Arc::clone(&self.locator);
                let compiler = Arc::clone(&self.compiler);
                let cache = Arc::clone(&self.cache);
                let pinned = self.pinned_schema.clone();
                let semaphore = Arc::clone(&semaphore);
                let timeout = self.config.validation_timeout;
                let fail_fast = self.config.fail_fast;
                let live_reporting = self.config.live_reporting;
                let progress_callback = progress_callback.clone();
                let completed = Arc::clone(&completed);
                let abort = Arc::clone(&abort);

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.map_err(|_| {
                        ValidationError::Concurrency {
                            details: "validation semaphore closed".to_string(),
                        }
                    })?;

                    // Checked after the permit so in-flight passes finish
                    // but queued documents stop
                    let validation_result = if fail_fast && abort.load(Ordering::SeqCst) {
                        FileValidationResult::skipped(
                            file_path.clone(),
                            "fail-fast: an earlier document failed".to_string(),
                            Duration::ZERO,
                        )
                    } else {
                        match tokio::time::timeout(
                            timeout,
                            Self::validate_single_file_internal(
                                file_path.clone(),
                                locator,
                                compiler,
                                cache,
                                pinned,
                                live_reporting,
                            ),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => FileValidationResult::error(
                                file_path.clone(),
                                ValidationError::Timeout {
                                    file: file_path.clone(),
                                    timeout_seconds: timeout.as_secs(),
                                },
                                timeout,
                            ),
                        }
                    };

                    if fail_fast
                        && (validation_result.status.is_invalid()
                            || validation_result.status.is_error())
                    {
                        abort.store(true, Ordering::SeqCst);
                    }

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = progress_callback {
                        callback(ValidationProgress {
                            current_file: Some(file_path),
                            completed: done,
                            total: total_files,
                            phase: ValidationPhase::Validation,
                        });
                    }

                    Ok::<FileValidationResult, ValidationError>(validation_result)
                })
            })
            .collect();

        let task_results =
            try_join_all(validation_tasks)
                .await
                .map_err(|e| ValidationError::Concurrency {
                    details: format!("Task join error: {}", e),
                })?;

        let mut file_results = Vec::with_capacity(task_results.len());
        for result in task_results {
            file_results.push(result?);
        }

        Ok(file_results)
    }

    async fn validate_single_file_internal(
        file_path: PathBuf,
        locator: Arc<SchemaLocator>,
        compiler: Arc<SchemaCompiler>,
        cache: Arc<CompiledSchemaCache>,
        pinned_schema: Option<PathBuf>,
        live_reporting: bool,
    ) -> FileValidationResult {
        let start_time = Instant::now();

        // Step 1: which schema?
        let schema_path = match pinned_schema {
            Some(schema) => schema,
            None => match locator.locate(&file_path).await {
                Ok(schema) => schema,
                Err(ValidationError::SchemaHintNotFound { .. }) => {
                    return FileValidationResult::skipped(
                        file_path,
                        "no schema hint in document".to_string(),
                        start_time.elapsed(),
                    );
                }
                Err(e) => {
                    return FileValidationResult::error(file_path, e, start_time.elapsed());
                }
            },
        };

        // Step 2: compile, or reuse a previous compilation. Compilation is
        // CPU-bound and runs on a blocking thread; concurrent requests for
        // the same schema wait for the one compile.
        let compile_path = schema_path.clone();
        let schema: Arc<CompiledSchema> = match cache
            .get_or_compile(&schema_path, move || {
                let path = compile_path.clone();
                async move {
                    tokio::task::spawn_blocking(move || compiler.compile(&path).map(Arc::new))
                        .await
                        .map_err(|e| CompileError::Read {
                            location: compile_path,
                            details: format!("compilation task failed: {}", e),
                        })?
                }
            })
            .await
        {
            Ok(schema) => schema,
            Err(e) => {
                return FileValidationResult::error(file_path, e.into(), start_time.elapsed());
            }
        };

        // Step 3: the validating walk, also CPU-bound
        let pass_path = file_path.clone();
        let pass_result = tokio::task::spawn_blocking(move || {
            let mut collector = if live_reporting {
                ViolationCollector::with_reporter(Box::new(|violation| {
                    eprintln!("{}", violation);
                }))
            } else {
                ViolationCollector::new()
            };
            let processor = DocumentProcessor::new(&schema);
            let outcome = processor.process_file(&pass_path, &mut collector);
            (outcome, collector.into_list())
        })
        .await;

        let duration = start_time.elapsed();

        match pass_result {
            Ok((Ok(()), violations)) => {
                if violations.is_empty() {
                    FileValidationResult::valid(file_path, schema_path, duration)
                } else {
                    FileValidationResult::invalid(file_path, schema_path, violations, duration)
                }
            }
            Ok((Err(e), _)) => FileValidationResult::error(file_path, e, duration),
            Err(e) => FileValidationResult::error(
                file_path,
                ValidationError::Concurrency {
                    details: format!("Join error: {}", e),
                },
                duration,
            ),
        }
    }

    /// Validate a single document (public interface)
    pub async fn validate_single_file(&self, file_path: &Path) -> Result<FileValidationResult> {
        Ok(Self::validate_single_file_internal(
            file_path.to_path_buf(),
            Arc::clone(&self.locator),
            Arc::clone(&self.compiler),
            Arc::clone(&self.cache),
            self.pinned_schema.clone(),
            self.config.live_reporting,
        )
        .await)
    }
}

/// Peak resident memory of this process in MB, 0 when unavailable
async fn peak_memory_mb() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = tokio::fs::read_to_string("/proc/self/status").await {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmPeak:")
                    && let Some(kb_str) = rest.split_whitespace().next()
                    && let Ok(kb) = kb_str.parse::<u64>()
                {
                    return kb / 1024;
                }
            }
        }
    }

    0
}
