//! A compiled schema is an immutable table shared across threads: compile
//! once, validate from many workers concurrently with identical verdicts.

use std::fs;
use std::sync::Arc;

use rayon::prelude::*;
use tempfile::TempDir;

use xsd_validate::catalog::{Catalog, SchemaResolver};
use xsd_validate::collector::ViolationCollector;
use xsd_validate::compiler::SchemaCompiler;
use xsd_validate::model::CompiledSchema;
use xsd_validate::processor::DocumentProcessor;

const PRODUCT_SCHEMA: &str = r#"<?xml version="1.0"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema"
           targetNamespace="urn:example:catalog"
           xmlns:tns="urn:example:catalog"
           elementFormDefault="qualified">
  <xs:element name="product" type="tns:ProductType"/>
  <xs:complexType name="ProductType">
    <xs:sequence>
      <xs:element name="name" type="xs:string"/>
      <xs:element name="price" type="xs:decimal"/>
    </xs:sequence>
    <xs:attribute name="sku" type="xs:string" use="required"/>
  </xs:complexType>
</xs:schema>"#;

fn compile_product_schema() -> Arc<CompiledSchema> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("product.xsd");
    fs::write(&path, PRODUCT_SCHEMA).unwrap();
    let compiler = SchemaCompiler::new(SchemaResolver::new(Arc::new(Catalog::empty())));
    Arc::new(compiler.compile(&path).unwrap())
}

fn product_document(price: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<product xmlns="urn:example:catalog" sku="A-1">
  <name>widget</name>
  <price>{}</price>
</product>"#,
        price
    )
}

#[test]
fn one_compiled_schema_serves_many_threads() {
    let schema = compile_product_schema();

    let violation_counts: Vec<usize> = (0..64)
        .into_par_iter()
        .map(|i| {
            // Alternate clean and broken documents across the pool
            let doc = if i % 2 == 0 {
                product_document("9.99")
            } else {
                product_document("free")
            };
            let mut collector = ViolationCollector::new();
            DocumentProcessor::new(&schema).process_str("doc.xml", &doc, &mut collector);
            collector.into_list().len()
        })
        .collect();

    for (i, count) in violation_counts.iter().enumerate() {
        if i % 2 == 0 {
            assert_eq!(*count, 0, "clean document {} reported violations", i);
        } else {
            assert_eq!(*count, 1, "broken document {} expected one violation", i);
        }
    }
}

#[test]
fn concurrent_runs_agree_with_a_sequential_run() {
    let schema = compile_product_schema();
    let doc = product_document("not-a-price");

    let mut sequential = ViolationCollector::new();
    DocumentProcessor::new(&schema).process_str("doc.xml", &doc, &mut sequential);
    let expected = sequential.into_list().messages();

    let concurrent: Vec<Vec<String>> = (0..16)
        .into_par_iter()
        .map(|_| {
            let mut collector = ViolationCollector::new();
            DocumentProcessor::new(&schema).process_str("doc.xml", &doc, &mut collector);
            collector.into_list().messages()
        })
        .collect();

    for messages in concurrent {
        assert_eq!(messages, expected);
    }
}
