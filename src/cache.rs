use std::path::Path;
use std::sync::Arc;

use moka::future::Cache;

use crate::error::CompileError;
use crate::model::CompiledSchema;

/// In-memory cache of compiled schemas, keyed by schema path.
///
/// `moka` handles concurrent access and "thundering herd" protection: when
/// several documents resolve to the same schema at once, only one task runs
/// the compilation and the rest wait for its result. Compilation failures are
/// handed to every waiter as well, so a broken schema is reported once per
/// requesting document without being recompiled each time.
pub struct CompiledSchemaCache {
    cache: Cache<String, Arc<CompiledSchema>>,
}

impl CompiledSchemaCache {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder().max_capacity(max_capacity).build();

        Self { cache }
    }

    /// Cache key for a schema path.
    ///
    /// Canonicalized so that `./schemas/root.xsd` and an absolute path to the
    /// same file share one entry. Paths that cannot be canonicalized (not yet
    /// existing, permissions) fall back to their literal form; the compile
    /// step will produce the real error.
    pub fn cache_key(path: &Path) -> String {
        path.canonicalize()
            .unwrap_or_else(|_| path.to_path_buf())
            .display()
            .to_string()
    }

    /// Get a compiled schema from the cache, or compile it if missing.
    ///
    /// The `compile` future only runs when the key is absent; concurrent
    /// requests for the same key wait for the single leader to finish.
    pub async fn get_or_compile<F, Fut>(
        &self,
        path: &Path,
        compile: F,
    ) -> Result<Arc<CompiledSchema>, CompileError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Arc<CompiledSchema>, CompileError>>,
    {
        self.cache
            .try_get_with(Self::cache_key(path), compile())
            .await
            .map_err(|e| (*e).clone()) // Unwrap the Arc<E> from moka
    }

    pub async fn get(&self, path: &Path) -> Option<Arc<CompiledSchema>> {
        self.cache.get(&Self::cache_key(path)).await
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.cache.contains_key(&Self::cache_key(path))
    }

    /// Number of cached schemas
    pub async fn entry_count(&self) -> u64 {
        // Run sync to ensure all pending operations are complete
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, SchemaResolver};
    use crate::compiler::SchemaCompiler;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const SIMPLE_SCHEMA: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:taxonomy"
           xmlns:tns="urn:example:taxonomy"
           elementFormDefault="qualified">
  <xs:element name="invoice" type="tns:InvoiceType"/>
  <xs:complexType name="InvoiceType">
    <xs:sequence>
      <xs:element name="amount" type="xs:decimal"/>
    </xs:sequence>
  </xs:complexType>
</xs:schema>"#;

    fn write_schema(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn test_compiler() -> Arc<SchemaCompiler> {
        Arc::new(SchemaCompiler::new(SchemaResolver::new(Arc::new(
            Catalog::empty(),
        ))))
    }

    #[tokio::test]
    async fn test_miss_compiles_and_hit_does_not() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "root.xsd", SIMPLE_SCHEMA);

        let cache = CompiledSchemaCache::new(10);
        let compiler = test_compiler();
        let compile_count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let compiler = compiler.clone();
            let count = compile_count.clone();
            let p = path.clone();
            let schema = cache
                .get_or_compile(&path, move || async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    compiler.compile(&p).map(Arc::new)
                })
                .await
                .unwrap();
            assert!(schema.covers_namespace("urn:example:taxonomy"));
        }

        assert_eq!(compile_count.load(Ordering::SeqCst), 1);
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_relative_and_absolute_paths_share_an_entry() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "root.xsd", SIMPLE_SCHEMA);

        // A non-canonical spelling of the same file
        let indirect = dir.path().join(".").join("root.xsd");

        assert_eq!(
            CompiledSchemaCache::cache_key(&path),
            CompiledSchemaCache::cache_key(&indirect)
        );
    }

    #[tokio::test]
    async fn test_concurrent_requests_compile_once() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "root.xsd", SIMPLE_SCHEMA);

        let cache = Arc::new(CompiledSchemaCache::new(10));
        let compiler = test_compiler();
        let compile_count = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let compiler = compiler.clone();
                let count = compile_count.clone();
                let path = path.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compile(&path.clone(), move || async move {
                            count.fetch_add(1, Ordering::SeqCst);
                            compiler.compile(&path).map(Arc::new)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(compile_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compile_failure_reaches_every_waiter() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "broken.xsd", "<xs:schema unclosed");

        let cache = Arc::new(CompiledSchemaCache::new(10));
        let compiler = test_compiler();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let compiler = compiler.clone();
                let path = path.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compile(&path.clone(), move || async move {
                            compiler.compile(&path).map(Arc::new)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            let result = task.await.unwrap();
            assert!(matches!(result.unwrap_err(), CompileError::Parse { .. }));
        }

        // Failures are not cached; a later fixed schema compiles fresh
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_distinct_schemas_get_distinct_entries() {
        let dir = TempDir::new().unwrap();
        let a = write_schema(&dir, "a.xsd", SIMPLE_SCHEMA);
        let b = write_schema(&dir, "b.xsd", SIMPLE_SCHEMA);

        let cache = CompiledSchemaCache::new(10);
        let compiler = test_compiler();

        for path in [&a, &b] {
            let compiler = compiler.clone();
            let p = path.clone();
            cache
                .get_or_compile(path, move || async move {
                    compiler.compile(&p).map(Arc::new)
                })
                .await
                .unwrap();
        }

        assert_eq!(cache.entry_count().await, 2);
        assert!(cache.contains(&a));
        assert!(cache.contains(&b));
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let dir = TempDir::new().unwrap();
        let path = write_schema(&dir, "root.xsd", SIMPLE_SCHEMA);

        let cache = CompiledSchemaCache::new(10);
        let compiler = test_compiler();
        let p = path.clone();
        cache
            .get_or_compile(&path, move || async move {
                compiler.compile(&p).map(Arc::new)
            })
            .await
            .unwrap();

        cache.invalidate_all();
        assert_eq!(cache.entry_count().await, 0);
        assert!(cache.get(&path).await.is_none());
    }
}
