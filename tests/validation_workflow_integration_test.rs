//! End-to-end validation workflow tests: discovery, schema selection,
//! compilation, the validating pass, and result aggregation.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use xsd_validate::catalog::{Catalog, SchemaResolver};
use xsd_validate::collector::Severity;
use xsd_validate::file_discovery::FileDiscovery;
use xsd_validate::validator::{ValidationConfig, ValidationEngine};

const INVOICE_SCHEMA: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:taxonomy"
           xmlns:tns="urn:example:taxonomy"
           elementFormDefault="qualified">
  <xs:element name="invoice" type="tns:InvoiceType"/>
  <xs:complexType name="InvoiceType">
    <xs:sequence>
      <xs:element name="amount" type="xs:decimal"/>
      <xs:element name="note" type="xs:string" minOccurs="0" maxOccurs="unbounded"/>
    </xs:sequence>
    <xs:attribute name="currency" type="xs:string" use="required"/>
  </xs:complexType>
</xs:schema>"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn invoice_doc(amount: &str, currency_attr: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<invoice xmlns="urn:example:taxonomy"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="urn:example:taxonomy invoice.xsd"{}>
  <amount>{}</amount>
</invoice>"#,
        currency_attr, amount
    )
}

fn engine(config: ValidationConfig) -> ValidationEngine {
    ValidationEngine::new(
        SchemaResolver::new(Arc::new(Catalog::empty())),
        16,
        config,
    )
}

#[tokio::test]
async fn valid_document_produces_no_violations() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    let doc = write(&dir, "good.xml", &invoice_doc("10.00", r#" currency="USD""#));

    let engine = engine(ValidationConfig::default());
    let result = engine.validate_single_file(&doc).await.unwrap();

    assert!(result.status.is_valid(), "got {:?}", result);
    assert!(result.violations.is_empty());
}

#[tokio::test]
async fn bad_decimal_yields_exactly_one_error() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    let doc = write(&dir, "bad.xml", &invoice_doc("abc", r#" currency="USD""#));

    let engine = engine(ValidationConfig::default());
    let result = engine.validate_single_file(&doc).await.unwrap();

    assert!(result.status.is_invalid(), "got {:?}", result);
    assert_eq!(result.violations.count_of(Severity::Error), 1);
    assert_eq!(result.violations.count_of(Severity::FatalError), 0);
}

#[tokio::test]
async fn independent_violations_are_all_reported() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    // Bad amount AND missing required currency attribute
    let doc = write(&dir, "bad.xml", &invoice_doc("abc", ""));

    let engine = engine(ValidationConfig::default());
    let result = engine.validate_single_file(&doc).await.unwrap();

    assert!(result.status.is_invalid());
    assert!(
        result.violations.count_of(Severity::Error) >= 2,
        "expected both violations, got {:?}",
        result.violations
    );
}

#[tokio::test]
async fn malformed_document_records_fatal_and_stops() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    let doc = write(
        &dir,
        "broken.xml",
        r#"<?xml version="1.0"?>
<invoice xmlns="urn:example:taxonomy"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="urn:example:taxonomy invoice.xsd" currency="USD">
  <amount>10.00
</invoice>"#,
    );

    let engine = engine(ValidationConfig::default());
    let result = engine.validate_single_file(&doc).await.unwrap();

    assert!(result.status.is_invalid(), "got {:?}", result);
    // The fatal is recorded, and nothing follows it
    assert_eq!(result.violations.count_of(Severity::FatalError), 1);
    assert_eq!(result.violations.len(), 1);
}

#[tokio::test]
async fn structural_and_value_violations_are_both_reported() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    let doc = write(
        &dir,
        "bad.xml",
        r#"<?xml version="1.0"?>
<invoice xmlns="urn:example:taxonomy"
         xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
         xsi:schemaLocation="urn:example:taxonomy invoice.xsd" currency="USD">
  <amount>abc</amount>
  <note>fine</note>
  <surprise>not in the schema</surprise>
</invoice>"#,
    );

    let engine = engine(ValidationConfig::default());
    let result = engine.validate_single_file(&doc).await.unwrap();

    // One structural error for the stray element, one value error for the
    // bad decimal; a broken sibling must not hide the other finding
    assert!(result.violations.len() >= 2, "got {:?}", result.violations);
    let messages = result.violations.messages();
    assert!(messages.iter().any(|m| m.contains("surprise")));
    assert!(messages.iter().any(|m| m.contains("amount") || m.contains("decimal")));
}

#[tokio::test]
async fn document_without_hint_is_skipped_not_failed() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    write(&dir, "good.xml", &invoice_doc("10.00", r#" currency="USD""#));
    write(
        &dir,
        "nohint.xml",
        "<?xml version=\"1.0\"?>\n<unrelated>data</unrelated>",
    );

    let engine = engine(ValidationConfig::default());
    let discovery = FileDiscovery::new();
    let results = engine.validate_path(dir.path(), &discovery).await.unwrap();

    assert_eq!(results.total_files, 2);
    assert_eq!(results.valid_files, 1);
    assert_eq!(results.skipped_files, 1);
    assert_eq!(results.invalid_files, 0);
    assert_eq!(results.error_files, 0);
}

#[tokio::test]
async fn pinned_schema_validates_hintless_documents() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    let doc = write(
        &dir,
        "doc.xml",
        r#"<?xml version="1.0"?>
<invoice xmlns="urn:example:taxonomy" currency="EUR">
  <amount>42.50</amount>
  <note>pinned run</note>
</invoice>"#,
    );

    let engine = engine(ValidationConfig::default()).with_pinned_schema(Some(schema));
    let result = engine.validate_single_file(&doc).await.unwrap();

    assert!(result.status.is_valid(), "got {:?}", result);
}

#[tokio::test]
async fn directory_run_is_deterministic() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    for i in 0..6 {
        let amount = if i % 2 == 0 { "10.00" } else { "abc" };
        write(
            &dir,
            &format!("doc{}.xml", i),
            &invoice_doc(amount, r#" currency="USD""#),
        );
    }

    let config = ValidationConfig {
        max_concurrent_validations: 4,
        ..ValidationConfig::default()
    };
    let engine = engine(config);
    let discovery = FileDiscovery::new();

    let first = engine.validate_path(dir.path(), &discovery).await.unwrap();
    let second = engine.validate_path(dir.path(), &discovery).await.unwrap();

    let order = |results: &xsd_validate::validator::ValidationResults| {
        results
            .file_results
            .iter()
            .map(|r| r.path.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(order(&first), order(&second));
    assert_eq!(first.invalid_files, 3);
    assert_eq!(first.valid_files, 3);
}

#[tokio::test]
async fn one_schema_serves_the_whole_batch() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    for i in 0..10 {
        write(
            &dir,
            &format!("doc{}.xml", i),
            &invoice_doc("10.00", r#" currency="USD""#),
        );
    }

    let engine = engine(ValidationConfig {
        max_concurrent_validations: 4,
        ..ValidationConfig::default()
    });
    let discovery = FileDiscovery::new();
    let results = engine.validate_path(dir.path(), &discovery).await.unwrap();

    assert_eq!(results.valid_files, 10);
    assert_eq!(results.performance_metrics.schemas_compiled, 1);
    assert_eq!(results.schemas_used.len(), 1);
}

#[tokio::test]
async fn fail_fast_stops_scheduling_after_first_failure() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", INVOICE_SCHEMA);
    for i in 0..8 {
        write(
            &dir,
            &format!("doc{}.xml", i),
            &invoice_doc("abc", r#" currency="USD""#),
        );
    }

    let engine = engine(ValidationConfig {
        max_concurrent_validations: 1,
        fail_fast: true,
        ..ValidationConfig::default()
    });
    let discovery = FileDiscovery::new();
    let results = engine.validate_path(dir.path(), &discovery).await.unwrap();

    assert!(results.invalid_files >= 1);
    assert_eq!(results.invalid_files + results.skipped_files, 8);
}

#[tokio::test]
async fn broken_schema_fails_every_document_that_needs_it() {
    let dir = TempDir::new().unwrap();
    write(&dir, "invoice.xsd", "<xs:schema definitely broken");
    for i in 0..3 {
        write(
            &dir,
            &format!("doc{}.xml", i),
            &invoice_doc("10.00", r#" currency="USD""#),
        );
    }

    let engine = engine(ValidationConfig::default());
    let discovery = FileDiscovery::new();
    let results = engine.validate_path(dir.path(), &discovery).await.unwrap();

    assert_eq!(results.error_files, 3);
    // The failed compilation is not cached as a schema
    assert_eq!(results.performance_metrics.schemas_compiled, 0);
}
