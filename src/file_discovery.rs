use futures::StreamExt;
use globset::{GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_stream::wrappers::ReadDirStream;

use crate::error::{Result, ValidationError};

/// Async discovery of candidate documents under a root path.
///
/// A file named directly on the command line is always a candidate; extension
/// and pattern filters apply only to directory traversal. Results come back
/// sorted so a run over the same tree always processes files in the same
/// order, which keeps reports diffable.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    /// File extensions to include (e.g., ["xml", "cmdi"]), lowercase
    extensions: Vec<String>,
    include_set: Option<GlobSet>,
    exclude_set: Option<GlobSet>,
}

/// A directory entry that could not be examined. Traversal continues past
/// these; they surface in the report instead of killing the run.
#[derive(Debug, Clone)]
pub struct DiscoveryWarning {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything a traversal produced
#[derive(Debug, Default)]
pub struct DiscoveredFiles {
    pub files: Vec<PathBuf>,
    pub warnings: Vec<DiscoveryWarning>,
}

impl FileDiscovery {
    pub fn new() -> Self {
        Self {
            extensions: vec!["xml".to_string()],
            include_set: None,
            exclude_set: None,
        }
    }

    /// Set file extensions to discover
    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions.into_iter().map(|e| e.to_lowercase()).collect();
        self
    }

    /// Add include patterns (glob syntax); at least one must match
    pub fn with_include_patterns(mut self, patterns: &[String]) -> Result<Self> {
        self.include_set = Self::build_glob_set(patterns, "include")?;
        Ok(self)
    }

    /// Add exclude patterns (glob syntax); any match drops the file
    pub fn with_exclude_patterns(mut self, patterns: &[String]) -> Result<Self> {
        self.exclude_set = Self::build_glob_set(patterns, "exclude")?;
        Ok(self)
    }

    fn build_glob_set(patterns: &[String], kind: &str) -> Result<Option<GlobSet>> {
        if patterns.is_empty() {
            return Ok(None);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = globset::GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| {
                    ValidationError::Config(format!(
                        "Invalid {} pattern '{}': {}",
                        kind, pattern, e
                    ))
                })?;
            builder.add(glob);
        }

        Ok(Some(builder.build().map_err(|e| {
            ValidationError::Config(format!("Failed to build {} glob set: {}", kind, e))
        })?))
    }

    /// Discover candidate files under `path`, which may itself be a file.
    ///
    /// An unreadable root is an error; an unreadable entry below it is a
    /// warning and traversal continues.
    pub async fn discover(&self, path: &Path) -> Result<DiscoveredFiles> {
        let metadata =
            fs::metadata(path)
                .await
                .map_err(|e| ValidationError::FileSystemTraversal {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;

        if metadata.is_file() {
            // Explicitly named, so filters do not apply
            return Ok(DiscoveredFiles {
                files: vec![path.to_path_buf()],
                warnings: vec![],
            });
        }

        let mut result = DiscoveredFiles::default();
        self.walk_directory(path, &mut result).await?;

        result.files.sort();
        result.files.dedup();
        Ok(result)
    }

    fn walk_directory<'a>(
        &'a self,
        dir: &'a Path,
        result: &'a mut DiscoveredFiles,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let read_dir = match fs::read_dir(dir).await {
                Ok(rd) => rd,
                Err(e) => {
                    result.warnings.push(DiscoveryWarning {
                        path: dir.to_path_buf(),
                        reason: e.to_string(),
                    });
                    return Ok(());
                }
            };

            let mut entries = ReadDirStream::new(read_dir);
            while let Some(entry) = entries.next().await {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        result.warnings.push(DiscoveryWarning {
                            path: dir.to_path_buf(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                let entry_path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(ft) => ft,
                    Err(e) => {
                        result.warnings.push(DiscoveryWarning {
                            path: entry_path,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                // Symlinks are skipped: a link cycle must not hang the run
                if file_type.is_symlink() {
                    continue;
                }

                if file_type.is_dir() {
                    self.walk_directory(&entry_path, result).await?;
                } else if file_type.is_file() && self.should_process(&entry_path) {
                    result.files.push(entry_path);
                }
            }

            Ok(())
        })
    }

    /// Filter applied to files found during traversal
    pub fn should_process(&self, path: &Path) -> bool {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(extension) => {
                if !self.extensions.contains(&extension.to_lowercase()) {
                    return false;
                }
            }
            None => return false,
        }

        if let Some(exclude_set) = &self.exclude_set
            && exclude_set.is_match(path)
        {
            return false;
        }

        if let Some(include_set) = &self.include_set {
            return include_set.is_match(path);
        }

        true
    }
}

impl Default for FileDiscovery {
    fn default() -> Self {
        Self::new()
    }
}
