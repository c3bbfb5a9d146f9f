use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::catalog::SchemaResolver;
use crate::error::{Result, ValidationError};

/// Cached regex for xsi:schemaLocation extraction
static SCHEMA_LOCATION_REGEX: OnceLock<Regex> = OnceLock::new();

/// Cached regex for xsi:noNamespaceSchemaLocation extraction
static NO_NAMESPACE_REGEX: OnceLock<Regex> = OnceLock::new();

fn schema_location_regex() -> &'static Regex {
    SCHEMA_LOCATION_REGEX.get_or_init(|| {
        Regex::new(r#"xsi:schemaLocation\s*=\s*"([^"]*)""#)
            .expect("Failed to compile schemaLocation regex")
    })
}

fn no_namespace_regex() -> &'static Regex {
    NO_NAMESPACE_REGEX.get_or_init(|| {
        Regex::new(r#"xsi:noNamespaceSchemaLocation\s*=\s*"([^"]*)""#)
            .expect("Failed to compile noNamespaceSchemaLocation regex")
    })
}

/// A schema reference found in a document's root element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaHint {
    /// Namespace half of an xsi:schemaLocation pair; absent for
    /// xsi:noNamespaceSchemaLocation
    pub namespace: Option<String>,
    /// Location half of the pair, as written in the document
    pub location: String,
}

/// Locates the schema a document should be validated against.
///
/// The document head is scanned for `xsi:schemaLocation` /
/// `xsi:noNamespaceSchemaLocation` hints line by line; the scan stops at the
/// first closing tag, so large documents are never read whole just to find
/// the hint. Each hint then goes through the resolver chain (catalog by
/// namespace, catalog by location, document-relative path). Remote-looking
/// locations resolve only when the catalog maps them to local files.
pub struct SchemaLocator {
    resolver: SchemaResolver,
}

impl SchemaLocator {
    pub fn new(resolver: SchemaResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &SchemaResolver {
        &self.resolver
    }

    /// Extract schema hints from a document using async I/O.
    ///
    /// A document without any hint is reported as `SchemaHintNotFound`; the
    /// caller decides whether that means "skip" or "fail".
    pub async fn extract_hints(&self, file_path: &Path) -> Result<Vec<SchemaHint>> {
        let file = File::open(file_path).await.map_err(ValidationError::Io)?;
        let hints = Self::extract_from_reader(BufReader::new(file)).await?;

        if hints.is_empty() {
            return Err(ValidationError::SchemaHintNotFound {
                file: file_path.to_path_buf(),
            });
        }

        Ok(hints)
    }

    /// Extract schema hints from an async reader. Returns an empty vec when
    /// the document carries no hints.
    pub async fn extract_from_reader<R>(reader: R) -> Result<Vec<SchemaHint>>
    where
        R: tokio::io::AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut hints = Vec::new();

        while let Some(line) = lines.next_line().await.map_err(ValidationError::Io)? {
            if let Some(caps) = schema_location_regex().captures(&line) {
                hints.extend(parse_location_pairs(&caps[1]));
            }

            if let Some(caps) = no_namespace_regex().captures(&line) {
                let location = caps[1].trim();
                if !location.is_empty() {
                    hints.push(SchemaHint {
                        namespace: None,
                        location: location.to_string(),
                    });
                }
            }

            // Hints live on the root element; stop once it closes
            if line.trim_start().starts_with("</") || line.trim_end().ends_with("/>") {
                break;
            }
            if !hints.is_empty() && line.contains('>') {
                break;
            }
        }

        Ok(hints)
    }

    /// Resolve a single hint to a local schema file
    pub fn resolve_hint(&self, hint: &SchemaHint, document_dir: &Path) -> Option<PathBuf> {
        self.resolver.resolve(
            hint.namespace.as_deref(),
            Some(&hint.location),
            document_dir,
        )
    }

    /// Find the schema for a document: extract its hints and resolve them in
    /// document order, first resolvable hint wins.
    pub async fn locate(&self, document: &Path) -> Result<PathBuf> {
        let hints = self.extract_hints(document).await?;
        let document_dir = document.parent().unwrap_or(Path::new("."));

        for hint in &hints {
            if let Some(path) = self.resolve_hint(hint, document_dir) {
                return Ok(path);
            }
        }

        // Name the first hint in the error; it is what the author intended
        let identifier = hints
            .first()
            .map(|h| {
                h.namespace
                    .clone()
                    .unwrap_or_else(|| h.location.clone())
            })
            .unwrap_or_default();
        Err(ValidationError::SchemaNotResolvable { identifier })
    }
}

/// Split an xsi:schemaLocation attribute value into (namespace, location)
/// pairs. The value is whitespace-separated alternating namespaces and
/// locations; a trailing namespace without a location is dropped.
fn parse_location_pairs(value: &str) -> Vec<SchemaHint> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    tokens
        .chunks_exact(2)
        .map(|pair| SchemaHint {
            namespace: Some(pair[0].to_string()),
            location: pair[1].to_string(),
        })
        .collect()
}
