//! Local resource catalog.
//!
//! Maps schema identifiers (namespace URIs, system identifiers, public
//! identifiers) to files on disk so that reference resolution never touches
//! the network. The format is the OASIS XML Catalogs subset consisting of
//! `<uri>`, `<system>` and `<public>` entries; relative targets resolve
//! against the catalog file's own directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::CatalogError;

/// An immutable identifier-to-file mapping loaded at startup.
///
/// Lookups never do I/O. Whether a mapped file actually exists is checked by
/// whoever opens it, so a stale entry surfaces as a read error naming the
/// mapped path rather than as a silent fallback.
#[derive(Debug, Default)]
pub struct Catalog {
    uri_entries: BTreeMap<String, PathBuf>,
    system_entries: BTreeMap<String, PathBuf>,
    public_entries: BTreeMap<String, PathBuf>,
    source: Option<PathBuf>,
}

impl Catalog {
    /// A catalog with no entries. Running without a catalog file behaves
    /// exactly like running with this.
    pub fn empty() -> Self {
        Catalog::default()
    }

    /// Load a catalog file. A path that does not exist or cannot be parsed
    /// is a hard error: a declared catalog must be usable.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Read {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        let base_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let mut catalog = Self::parse(&content, path, &base_dir)?;
        catalog.source = Some(path.to_path_buf());
        Ok(catalog)
    }

    fn parse(content: &str, path: &Path, base_dir: &Path) -> Result<Self, CatalogError> {
        let doc = roxmltree::Document::parse(content).map_err(|e| CatalogError::Parse {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;

        let root = doc.root_element();
        if root.tag_name().name() != "catalog" {
            return Err(CatalogError::NotACatalog {
                path: path.to_path_buf(),
                found: root.tag_name().name().to_string(),
            });
        }

        let mut catalog = Catalog::default();
        for entry in root.children().filter(|n| n.is_element()) {
            let require = |attr: &str| {
                entry.attribute(attr).ok_or_else(|| CatalogError::InvalidEntry {
                    path: path.to_path_buf(),
                    details: format!(
                        "{} entry missing '{}' attribute",
                        entry.tag_name().name(),
                        attr
                    ),
                })
            };

            match entry.tag_name().name() {
                "uri" => {
                    let name = require("name")?;
                    let target = base_dir.join(require("uri")?);
                    // First matching entry wins, as catalog processors do
                    catalog.uri_entries.entry(name.to_string()).or_insert(target);
                }
                "system" => {
                    let system_id = require("systemId")?;
                    let target = base_dir.join(require("uri")?);
                    catalog
                        .system_entries
                        .entry(system_id.to_string())
                        .or_insert(target);
                }
                "public" => {
                    let public_id = require("publicId")?;
                    let target = base_dir.join(require("uri")?);
                    catalog
                        .public_entries
                        .entry(public_id.to_string())
                        .or_insert(target);
                }
                // Entry types outside the subset are skipped, per catalog
                // processing rules
                _ => {}
            }
        }

        Ok(catalog)
    }

    /// Resolve a namespace URI through `<uri>` entries
    pub fn resolve_uri(&self, uri: &str) -> Option<&Path> {
        self.uri_entries.get(uri).map(PathBuf::as_path)
    }

    /// Resolve a system identifier (a schemaLocation hint) through
    /// `<system>` entries
    pub fn resolve_system(&self, system_id: &str) -> Option<&Path> {
        self.system_entries.get(system_id).map(PathBuf::as_path)
    }

    /// Resolve a public identifier through `<public>` entries
    pub fn resolve_public(&self, public_id: &str) -> Option<&Path> {
        self.public_entries.get(public_id).map(PathBuf::as_path)
    }

    /// Resolve an identifier of any kind, uri entries first
    pub fn resolve(&self, identifier: &str) -> Option<&Path> {
        self.resolve_uri(identifier)
            .or_else(|| self.resolve_system(identifier))
            .or_else(|| self.resolve_public(identifier))
    }

    pub fn is_empty(&self) -> bool {
        self.uri_entries.is_empty()
            && self.system_entries.is_empty()
            && self.public_entries.is_empty()
    }

    pub fn entry_count(&self) -> usize {
        self.uri_entries.len() + self.system_entries.len() + self.public_entries.len()
    }

    /// The file this catalog was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Resolves schema references to local files: catalog first, then the
/// default same-directory strategy. Never the network.
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    catalog: Arc<Catalog>,
}

impl SchemaResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        SchemaResolver { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Resolve a schema reference from a document in `referent_dir`.
    ///
    /// `namespace` is an import's namespace attribute, `location` a
    /// schemaLocation hint; either may be absent. The chain is:
    ///
    /// 1. catalog lookup by namespace
    /// 2. catalog lookup by location
    /// 3. the location as a path, absolute or relative to `referent_dir`,
    ///    when it points at an existing file
    ///
    /// A catalog hit is returned without an existence check so that a stale
    /// entry fails loudly at read time instead of being shadowed by a
    /// fallback file. Remote-looking locations (http/https) resolve only
    /// through the catalog.
    pub fn resolve(
        &self,
        namespace: Option<&str>,
        location: Option<&str>,
        referent_dir: &Path,
    ) -> Option<PathBuf> {
        if let Some(ns) = namespace {
            if let Some(mapped) = self.catalog.resolve(ns) {
                return Some(mapped.to_path_buf());
            }
        }

        if let Some(loc) = location {
            if let Some(mapped) = self.catalog.resolve(loc) {
                return Some(mapped.to_path_buf());
            }

            if is_remote(loc) {
                return None;
            }

            let candidate = if Path::new(loc).is_absolute() {
                PathBuf::from(loc)
            } else {
                referent_dir.join(loc)
            };
            if candidate.exists() {
                return Some(candidate);
            }
        }

        None
    }
}

fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_catalog(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("catalog.xml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_catalog_with_all_entry_kinds() {
        let dir = TempDir::new().unwrap();
        let path = write_catalog(
            &dir,
            r#"<?xml version="1.0"?>
<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog">
  <uri name="urn:example:taxonomy" uri="./taxonomy.xsd"/>
  <system systemId="http://example.com/types.xsd" uri="types.xsd"/>
  <public publicId="-//EXAMPLE//DTD Test//EN" uri="legacy.xsd"/>
</catalog>"#,
        );

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.entry_count(), 3);
        assert!(!catalog.is_empty());
        assert_eq!(catalog.source(), Some(path.as_path()));

        let mapped = catalog.resolve_uri("urn:example:taxonomy").unwrap();
        assert_eq!(mapped, dir.path().join("./taxonomy.xsd"));

        let mapped = catalog.resolve_system("http://example.com/types.xsd").unwrap();
        assert_eq!(mapped, dir.path().join("types.xsd"));

        let mapped = catalog.resolve_public("-//EXAMPLE//DTD Test//EN").unwrap();
        assert_eq!(mapped, dir.path().join("legacy.xsd"));
    }

    #[test]
    fn test_missing_catalog_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-such-catalog.xml");

        match Catalog::load(&missing) {
            Err(CatalogError::FileNotFound { path }) => assert_eq!(path, missing),
            other => panic!("expected FileNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_catalog_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let path = write_catalog(&dir, "<catalog><uri name='x'");

        match Catalog::load(&path) {
            Err(CatalogError::Parse { .. }) => {}
            other => panic!("expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_root_element() {
        let dir = TempDir::new().unwrap();
        let path = write_catalog(&dir, "<mappings><uri name='x' uri='y'/></mappings>");

        match Catalog::load(&path) {
            Err(CatalogError::NotACatalog { found, .. }) => assert_eq!(found, "mappings"),
            other => panic!("expected NotACatalog, got {:?}", other),
        }
    }

    #[test]
    fn test_entry_missing_attribute() {
        let dir = TempDir::new().unwrap();
        let path = write_catalog(&dir, r#"<catalog><uri uri="taxonomy.xsd"/></catalog>"#);

        match Catalog::load(&path) {
            Err(CatalogError::InvalidEntry { details, .. }) => {
                assert!(details.contains("'name'"));
            }
            other => panic!("expected InvalidEntry, got {:?}", other),
        }
    }

    #[test]
    fn test_first_matching_entry_wins() {
        let dir = TempDir::new().unwrap();
        let path = write_catalog(
            &dir,
            r#"<catalog>
  <uri name="urn:example:taxonomy" uri="first.xsd"/>
  <uri name="urn:example:taxonomy" uri="second.xsd"/>
</catalog>"#,
        );

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(
            catalog.resolve_uri("urn:example:taxonomy").unwrap(),
            dir.path().join("first.xsd")
        );
    }

    #[test]
    fn test_unknown_entry_kinds_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = write_catalog(
            &dir,
            r#"<catalog>
  <group><uri name="a" uri="a.xsd"/></group>
  <uri name="urn:example:taxonomy" uri="taxonomy.xsd"/>
</catalog>"#,
        );

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.entry_count(), 1);
        assert!(catalog.resolve_uri("urn:example:taxonomy").is_some());
    }

    #[test]
    fn test_empty_catalog_resolves_nothing() {
        let catalog = Catalog::empty();
        assert!(catalog.is_empty());
        assert!(catalog.resolve("urn:example:taxonomy").is_none());
        assert!(catalog.source().is_none());
    }

    #[test]
    fn test_resolver_prefers_catalog_over_local_file() {
        let dir = TempDir::new().unwrap();
        // A file that the same-directory fallback would find
        fs::write(dir.path().join("types.xsd"), "<xs:schema/>").unwrap();
        let mapped_dir = TempDir::new().unwrap();
        let catalog_path = write_catalog(
            &mapped_dir,
            r#"<catalog><system systemId="types.xsd" uri="mapped-types.xsd"/></catalog>"#,
        );

        let resolver = SchemaResolver::new(Arc::new(Catalog::load(&catalog_path).unwrap()));
        let resolved = resolver.resolve(None, Some("types.xsd"), dir.path()).unwrap();
        assert_eq!(resolved, mapped_dir.path().join("mapped-types.xsd"));
    }

    #[test]
    fn test_resolver_namespace_lookup_without_location() {
        let dir = TempDir::new().unwrap();
        let catalog_path = write_catalog(
            &dir,
            r#"<catalog><uri name="urn:example:taxonomy" uri="./taxonomy.xsd"/></catalog>"#,
        );

        let resolver = SchemaResolver::new(Arc::new(Catalog::load(&catalog_path).unwrap()));
        let resolved = resolver
            .resolve(Some("urn:example:taxonomy"), None, dir.path())
            .unwrap();
        assert_eq!(resolved, dir.path().join("./taxonomy.xsd"));
    }

    #[test]
    fn test_resolver_falls_back_to_same_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("local.xsd"), "<xs:schema/>").unwrap();

        let resolver = SchemaResolver::new(Arc::new(Catalog::empty()));
        let resolved = resolver.resolve(None, Some("local.xsd"), dir.path()).unwrap();
        assert_eq!(resolved, dir.path().join("local.xsd"));
    }

    #[test]
    fn test_resolver_fallback_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let resolver = SchemaResolver::new(Arc::new(Catalog::empty()));
        assert!(resolver.resolve(None, Some("ghost.xsd"), dir.path()).is_none());
    }

    #[test]
    fn test_resolver_never_treats_urls_as_paths() {
        let dir = TempDir::new().unwrap();
        let resolver = SchemaResolver::new(Arc::new(Catalog::empty()));
        assert!(
            resolver
                .resolve(None, Some("http://example.com/schema.xsd"), dir.path())
                .is_none()
        );

        // With a catalog entry the same URL resolves locally
        let catalog_path = write_catalog(
            &dir,
            r#"<catalog><system systemId="http://example.com/schema.xsd" uri="schema.xsd"/></catalog>"#,
        );
        let resolver = SchemaResolver::new(Arc::new(Catalog::load(&catalog_path).unwrap()));
        let resolved = resolver
            .resolve(None, Some("http://example.com/schema.xsd"), dir.path())
            .unwrap();
        assert_eq!(resolved, dir.path().join("schema.xsd"));
    }

    #[test]
    fn test_resolver_absolute_location() {
        let dir = TempDir::new().unwrap();
        let abs = dir.path().join("abs.xsd");
        fs::write(&abs, "<xs:schema/>").unwrap();

        let resolver = SchemaResolver::new(Arc::new(Catalog::empty()));
        let other_dir = TempDir::new().unwrap();
        let resolved = resolver
            .resolve(None, Some(abs.to_str().unwrap()), other_dir.path())
            .unwrap();
        assert_eq!(resolved, abs);
    }
}
