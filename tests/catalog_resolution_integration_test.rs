//! Catalog-driven schema resolution: namespace mappings, import chains,
//! precedence over document-relative fallback, and loud failure modes.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use xsd_validate::catalog::{Catalog, SchemaResolver};
use xsd_validate::error::CatalogError;
use xsd_validate::validator::{ValidationConfig, ValidationEngine};

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn engine_with(catalog: Catalog) -> ValidationEngine {
    ValidationEngine::new(
        SchemaResolver::new(Arc::new(catalog)),
        16,
        ValidationConfig::default(),
    )
}

/// Root schema importing a second namespace with no location hint; only the
/// catalog can supply the imported file.
#[tokio::test]
async fn import_without_location_resolves_through_catalog() {
    let dir = TempDir::new().unwrap();

    write(
        &dir,
        "types.xsd",
        r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:types">
  <xs:simpleType name="MoneyType">
    <xs:restriction base="xs:decimal"/>
  </xs:simpleType>
</xs:schema>"#,
    );

    write(
        &dir,
        "root.xsd",
        r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:taxonomy"
           xmlns:t="urn:example:types"
           elementFormDefault="qualified">
  <xs:import namespace="urn:example:types"/>
  <xs:element name="payment" type="t:MoneyType"/>
</xs:schema>"#,
    );

    let catalog_path = write(
        &dir,
        "catalog.xml",
        r#"<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog">
  <uri name="urn:example:taxonomy" uri="root.xsd"/>
  <uri name="urn:example:types" uri="types.xsd"/>
</catalog>"#,
    );

    let doc = write(
        &dir,
        "payment.xml",
        r#"<?xml version="1.0"?>
<payment xmlns="urn:example:taxonomy"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="urn:example:taxonomy http://example.com/root.xsd">12.50</payment>"#,
    );

    let engine = engine_with(Catalog::load(&catalog_path).unwrap());
    let result = engine.validate_single_file(&doc).await.unwrap();

    assert!(result.status.is_valid(), "got {:?}", result);
}

/// The catalog mapping wins over a same-directory file with the hinted name.
#[tokio::test]
async fn catalog_mapping_takes_precedence_over_local_file() {
    let dir = TempDir::new().unwrap();

    // Local file would accept anything
    write(
        &dir,
        "invoice.xsd",
        r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:taxonomy"
           xmlns:tns="urn:example:taxonomy">
  <xs:element name="invoice" type="xs:anyType"/>
</xs:schema>"#,
    );

    // Catalog points the namespace at a stricter schema
    write(
        &dir,
        "strict.xsd",
        r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:taxonomy"
           xmlns:tns="urn:example:taxonomy">
  <xs:element name="invoice" type="xs:decimal"/>
</xs:schema>"#,
    );

    let catalog_path = write(
        &dir,
        "catalog.xml",
        r#"<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog">
  <uri name="urn:example:taxonomy" uri="strict.xsd"/>
</catalog>"#,
    );

    let doc = write(
        &dir,
        "doc.xml",
        r#"<?xml version="1.0"?>
<invoice xmlns="urn:example:taxonomy"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="urn:example:taxonomy invoice.xsd">not a decimal</invoice>"#,
    );

    let engine = engine_with(Catalog::load(&catalog_path).unwrap());
    let result = engine.validate_single_file(&doc).await.unwrap();

    // The strict schema rejects the content; the permissive local file
    // would have accepted it
    assert!(result.status.is_invalid(), "got {:?}", result);
}

#[tokio::test]
async fn missing_catalog_file_is_a_hard_error() {
    let result = Catalog::load(std::path::Path::new("/nonexistent/catalog.xml"));
    assert!(matches!(
        result.unwrap_err(),
        CatalogError::FileNotFound { .. }
    ));
}

#[tokio::test]
async fn malformed_catalog_is_a_hard_error() {
    let dir = TempDir::new().unwrap();
    let catalog_path = write(&dir, "catalog.xml", "<catalog unclosed");

    let result = Catalog::load(&catalog_path);
    assert!(matches!(result.unwrap_err(), CatalogError::Parse { .. }));
}

/// A catalog entry pointing at a file that no longer exists fails at schema
/// read time, naming the mapped path instead of silently falling back.
#[tokio::test]
async fn stale_catalog_entry_fails_loudly() {
    let dir = TempDir::new().unwrap();

    let catalog_path = write(
        &dir,
        "catalog.xml",
        r#"<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog">
  <uri name="urn:example:taxonomy" uri="deleted.xsd"/>
</catalog>"#,
    );

    // invoice.xsd exists right next to the document, but the catalog entry
    // must not be shadowed by it
    write(
        &dir,
        "invoice.xsd",
        r#"<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"/>"#,
    );

    let doc = write(
        &dir,
        "doc.xml",
        r#"<invoice xmlns="urn:example:taxonomy"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="urn:example:taxonomy invoice.xsd"/>"#,
    );

    let engine = engine_with(Catalog::load(&catalog_path).unwrap());
    let result = engine.validate_single_file(&doc).await.unwrap();

    assert!(result.status.is_error(), "got {:?}", result);
}

#[tokio::test]
async fn empty_catalog_behaves_like_no_catalog() {
    let dir = TempDir::new().unwrap();

    write(
        &dir,
        "plain.xsd",
        r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="root" type="xs:string"/>
</xs:schema>"#,
    );
    let doc = write(
        &dir,
        "doc.xml",
        r#"<root xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
      xsi:noNamespaceSchemaLocation="plain.xsd">hello</root>"#,
    );

    let engine = engine_with(Catalog::empty());
    let result = engine.validate_single_file(&doc).await.unwrap();

    assert!(result.status.is_valid(), "got {:?}", result);
}
