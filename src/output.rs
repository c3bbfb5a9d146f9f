//! Report formatting.
//!
//! Violations print as `severity: document:line:column: message` so they are
//! clickable in editors and greppable in CI logs. The JSON format carries the
//! full result set for downstream tooling.

use chrono::Utc;
use std::time::Duration;

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::validator::{
    FileValidationResult, PerformanceMetrics, ValidationResults, ValidationStatus,
};

/// Output formatter for validation results
pub struct Output {
    format: OutputFormat,
    verbosity: VerbosityLevel,
    show_colors: bool,
}

impl Output {
    pub fn new(format: OutputFormat, verbosity: VerbosityLevel) -> Self {
        Self {
            format,
            verbosity,
            show_colors: format == OutputFormat::Human && atty::is(atty::Stream::Stdout),
        }
    }

    /// Disable ANSI colors regardless of the terminal
    pub fn without_colors(mut self) -> Self {
        self.show_colors = false;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    pub fn format_results(&self, results: &ValidationResults) -> String {
        match self.format {
            OutputFormat::Human => self.format_human(results),
            OutputFormat::Json => self.format_json(results),
            OutputFormat::Summary => self.format_summary(results),
        }
    }

    fn format_human(&self, results: &ValidationResults) -> String {
        let mut output = String::new();

        for warning in &results.discovery_warnings {
            output.push_str(&format!(
                "{} {}\n",
                self.colorize("warning:", "33"),
                warning
            ));
        }

        for file_result in &results.file_results {
            let show = match self.verbosity {
                // Quiet mode reports only documents that failed
                VerbosityLevel::Quiet => {
                    file_result.status.is_invalid() || file_result.status.is_error()
                }
                VerbosityLevel::Normal => !file_result.status.is_valid(),
                VerbosityLevel::Verbose | VerbosityLevel::Debug => true,
            };
            if show {
                output.push_str(&self.format_file_result(file_result));
                output.push('\n');
            }
        }

        if self.verbosity > VerbosityLevel::Quiet {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&self.format_summary(results));
        }

        output
    }

    fn format_json(&self, results: &ValidationResults) -> String {
        let report = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "results": results,
        });
        // ValidationResults always serializes; a failure here is a bug
        serde_json::to_string_pretty(&report)
            .unwrap_or_else(|e| format!("{{\"error\": \"report serialization failed: {}\"}}", e))
    }

    /// One line per document plus its violations
    pub fn format_file_result(&self, result: &FileValidationResult) -> String {
        let path_display = result.path.display();
        let duration_str = format_duration(result.duration);

        match &result.status {
            ValidationStatus::Valid => {
                let against = result
                    .schema
                    .as_ref()
                    .map(|s| format!(" against {}", s.display()))
                    .unwrap_or_default();
                format!(
                    "{}  {} ({}){}",
                    self.colorize("✓ VALID", "32"),
                    path_display,
                    duration_str,
                    against
                )
            }
            ValidationStatus::Invalid { violation_count } => {
                let mut output = format!(
                    "{}  {} ({}) - {} violation{}",
                    self.colorize("✗ INVALID", "31"),
                    path_display,
                    duration_str,
                    violation_count,
                    if *violation_count == 1 { "" } else { "s" }
                );

                for violation in result.violations.iter() {
                    output.push_str(&format!("\n    {}", violation));
                }
                output
            }
            ValidationStatus::Error { message } => {
                format!(
                    "{}  {} ({}) - {}",
                    self.colorize("⚠ ERROR", "33"),
                    path_display,
                    duration_str,
                    message
                )
            }
            ValidationStatus::Skipped { reason } => {
                format!(
                    "{}  {} ({}) - {}",
                    self.colorize("- SKIPPED", "36"),
                    path_display,
                    duration_str,
                    reason
                )
            }
        }
    }

    fn format_summary(&self, results: &ValidationResults) -> String {
        let mut output = String::new();
        output.push_str("Validation Summary:\n");
        output.push_str(&format!("  Total files: {}\n", results.total_files));
        output.push_str(&format!(
            "  {} {}\n",
            self.colorize("Valid:", "32"),
            results.valid_files
        ));

        if results.invalid_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Invalid:", "31"),
                results.invalid_files
            ));
        }
        if results.error_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Errors:", "33"),
                results.error_files
            ));
        }
        if results.skipped_files > 0 {
            output.push_str(&format!(
                "  {} {}\n",
                self.colorize("Skipped:", "36"),
                results.skipped_files
            ));
        }

        if results.warning_count + results.error_count + results.fatal_count > 0 {
            output.push_str(&format!(
                "  Violations: {} warning(s), {} error(s), {} fatal\n",
                results.warning_count, results.error_count, results.fatal_count
            ));
        }

        output.push_str(&format!("  Success rate: {:.1}%\n", results.success_rate()));
        output.push_str(&format!(
            "  Duration: {}\n",
            format_duration(results.total_duration)
        ));

        if self.verbosity >= VerbosityLevel::Verbose {
            output.push_str(&self.format_performance_metrics(&results.performance_metrics));
        }

        if self.verbosity == VerbosityLevel::Debug {
            output.push_str(&self.format_debug_info(results));
        }

        output
    }

    fn format_performance_metrics(&self, metrics: &PerformanceMetrics) -> String {
        let mut output = String::new();
        output.push_str("\nPerformance Metrics:\n");
        output.push_str(&format!(
            "  Throughput: {:.1} files/sec\n",
            metrics.throughput_files_per_second
        ));
        output.push_str(&format!(
            "  Concurrent validations: {}\n",
            metrics.concurrent_validations
        ));
        output.push_str(&format!(
            "  Schemas compiled: {}\n",
            metrics.schemas_compiled
        ));

        if self.verbosity == VerbosityLevel::Debug {
            output.push_str(&format!("  Peak memory: {} MB\n", metrics.peak_memory_mb));
        }
        output
    }

    fn format_debug_info(&self, results: &ValidationResults) -> String {
        let mut output = String::new();
        output.push_str("\nDebug Information:\n");
        output.push_str(&format!("  Schemas used: {}\n", results.schemas_used.len()));
        for (i, schema) in results.schemas_used.iter().enumerate() {
            output.push_str(&format!("    {}: {}\n", i + 1, schema));
        }
        output
    }
}

fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs_f64();
    if total_secs < 1.0 {
        format!("{:.0}ms", duration.as_millis())
    } else if total_secs < 60.0 {
        format!("{:.2}s", total_secs)
    } else {
        let mins = (total_secs / 60.0) as u64;
        let secs = total_secs % 60.0;
        format!("{}m{:.1}s", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{Violation, ViolationList};
    use crate::error::ValidationError;
    use std::path::PathBuf;

    fn sample_results() -> ValidationResults {
        let mut violations = ViolationList::new();
        violations.push(Violation::error("bad.xml", "content does not match type xs:decimal").at(2, 9));

        ValidationResults::aggregate(vec![
            FileValidationResult::valid(
                PathBuf::from("good.xml"),
                PathBuf::from("root.xsd"),
                Duration::from_millis(10),
            ),
            FileValidationResult::invalid(
                PathBuf::from("bad.xml"),
                PathBuf::from("root.xsd"),
                violations,
                Duration::from_millis(12),
            ),
            FileValidationResult::error(
                PathBuf::from("broken.xml"),
                ValidationError::Config("test".to_string()),
                Duration::from_millis(1),
            ),
        ])
    }

    fn plain(format: OutputFormat, verbosity: VerbosityLevel) -> Output {
        Output::new(format, verbosity).without_colors()
    }

    #[test]
    fn test_human_output_includes_violation_lines() {
        let output = plain(OutputFormat::Human, VerbosityLevel::Normal);
        let formatted = output.format_results(&sample_results());

        assert!(formatted.contains("✗ INVALID"));
        assert!(formatted.contains("error: bad.xml:2:9: content does not match type xs:decimal"));
        assert!(formatted.contains("Validation Summary:"));
        // Valid files are not listed at normal verbosity
        assert!(!formatted.contains("good.xml"));
    }

    #[test]
    fn test_verbose_lists_every_file() {
        let output = plain(OutputFormat::Human, VerbosityLevel::Verbose);
        let formatted = output.format_results(&sample_results());

        assert!(formatted.contains("good.xml"));
        assert!(formatted.contains("bad.xml"));
        assert!(formatted.contains("Performance Metrics:"));
    }

    #[test]
    fn test_quiet_shows_only_failures() {
        let output = plain(OutputFormat::Human, VerbosityLevel::Quiet);
        let formatted = output.format_results(&sample_results());

        assert!(formatted.contains("bad.xml"));
        assert!(formatted.contains("broken.xml"));
        assert!(!formatted.contains("good.xml"));
        assert!(!formatted.contains("Validation Summary:"));
    }

    #[test]
    fn test_summary_format() {
        let output = plain(OutputFormat::Summary, VerbosityLevel::Normal);
        let formatted = output.format_results(&sample_results());

        assert!(formatted.contains("Total files: 3"));
        assert!(formatted.contains("Success rate: 33.3%"));
        assert!(!formatted.contains("✗ INVALID"));
    }

    #[test]
    fn test_json_format_is_parseable() {
        let output = plain(OutputFormat::Json, VerbosityLevel::Normal);
        let formatted = output.format_results(&sample_results());

        let parsed: serde_json::Value = serde_json::from_str(&formatted).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["results"]["total_files"], serde_json::json!(3));
    }

    #[test]
    fn test_colors_disabled_without_tty() {
        let output = plain(OutputFormat::Human, VerbosityLevel::Verbose);
        let formatted = output.format_results(&sample_results());
        assert!(!formatted.contains("\x1b["));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(5)), "5ms");
        assert_eq!(format_duration(Duration::from_secs(2)), "2.00s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30.0s");
    }
}
