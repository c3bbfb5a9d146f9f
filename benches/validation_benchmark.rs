use std::sync::Arc;

use xsd_validate::catalog::{Catalog, SchemaResolver};
use xsd_validate::collector::ViolationCollector;
use xsd_validate::compiler::SchemaCompiler;
use xsd_validate::model::CompiledSchema;
use xsd_validate::processor::DocumentProcessor;

fn main() {
    divan::main();
}

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

fn compile_schema() -> CompiledSchema {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("root.xsd");
    std::fs::write(&path, INVOICE_SCHEMA).unwrap();
    let compiler = SchemaCompiler::new(SchemaResolver::new(Arc::new(Catalog::empty())));
    compiler.compile(&path).unwrap()
}

fn invoice_document(notes: usize) -> String {
    let mut doc = String::from(
        r#"<?xml version="1.0"?>
<invoice xmlns="urn:example:taxonomy" currency="USD">
  <amount>10.00</amount>
"#,
    );
    for i in 0..notes {
        doc.push_str(&format!("  <note>line item {}</note>\n", i));
    }
    doc.push_str("</invoice>\n");
    doc
}

#[divan::bench]
fn compile_invoice_schema(bencher: divan::Bencher) {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("root.xsd");
    std::fs::write(&path, INVOICE_SCHEMA).unwrap();
    let compiler = SchemaCompiler::new(SchemaResolver::new(Arc::new(Catalog::empty())));

    bencher.bench(|| compiler.compile(&path).unwrap());
}

#[divan::bench(args = [10, 100, 1000])]
fn validate_clean_document(bencher: divan::Bencher, notes: usize) {
    let schema = compile_schema();
    let doc = invoice_document(notes);

    bencher.bench(|| {
        let mut collector = ViolationCollector::new();
        DocumentProcessor::new(&schema).process_str("bench.xml", &doc, &mut collector);
        collector.into_list().len()
    });
}

#[divan::bench(args = [10, 100])]
fn validate_document_with_violations(bencher: divan::Bencher, notes: usize) {
    let schema = compile_schema();
    // Every amount is malformed, so each run records a violation
    let doc = invoice_document(notes).replace("10.00", "not-a-number");

    bencher.bench(|| {
        let mut collector = ViolationCollector::new();
        DocumentProcessor::new(&schema).process_str("bench.xml", &doc, &mut collector);
        collector.into_list().len()
    });
}
