//! Schema compilation.
//!
//! Turns a root schema document and its transitive xs:include/xs:import
//! references into a fully linked [`CompiledSchema`]. Reference resolution
//! is catalog-first and strictly local; a reference no strategy can satisfy
//! fails compilation instead of reaching for the network.
//!
//! Compilation runs in two phases. Phase 1 collects every referenced schema
//! document, following includes and imports recursively with a
//! canonical-path guard so reference cycles terminate. Phase 2 registers the
//! global declarations of every collected document and links them: named
//! simple types are flattened onto their primitive with the facets of the
//! whole restriction chain merged, and every QName reference is checked
//! against the global tables. Constructs outside the supported subset are
//! compile errors, never silently skipped, so a schema that compiles is a
//! schema that is fully enforced.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use roxmltree::Node;

use crate::catalog::SchemaResolver;
use crate::error::{CompileError, CompileResult};
use crate::model::{
    AttributeDecl, AttributeUse, CompiledSchema, ComplexType, ContentModel, ElementDecl, Facets,
    LocalElement, MaxOccurs, Particle, Pattern, PrimitiveType, QName, SimpleType, Term, TypeDef,
    TypeRef, XML_NAMESPACE, XSD_NAMESPACE,
};

/// Compiles root schemas into immutable, reusable [`CompiledSchema`] values
#[derive(Debug, Clone)]
pub struct SchemaCompiler {
    resolver: SchemaResolver,
}

/// What targetNamespace a referenced schema document must declare
enum NamespaceExpectation {
    /// The root schema: any namespace goes
    Any,
    /// xs:include: the includer's namespace, adopted when the included
    /// document declares none
    SameAs(String),
    /// xs:import: exactly the import's namespace attribute
    Declared(Option<String>),
}

/// One schema document gathered in phase 1
struct SchemaDocument {
    path: PathBuf,
    content: String,
    target_namespace: String,
    qualified_elements: bool,
    qualified_attributes: bool,
}

#[derive(Default)]
struct Collection {
    visited: HashSet<PathBuf>,
    documents: Vec<SchemaDocument>,
}

impl SchemaCompiler {
    pub fn new(resolver: SchemaResolver) -> Self {
        SchemaCompiler { resolver }
    }

    pub fn resolver(&self) -> &SchemaResolver {
        &self.resolver
    }

    /// Compile the schema rooted at `root_path` together with everything it
    /// transitively includes and imports.
    pub fn compile(&self, root_path: &Path) -> CompileResult<CompiledSchema> {
        let mut collection = Collection::default();
        self.collect(root_path, NamespaceExpectation::Any, &mut collection)?;
        link(root_path, &collection.documents)
    }

    fn collect(
        &self,
        path: &Path,
        expectation: NamespaceExpectation,
        collection: &mut Collection,
    ) -> CompileResult<()> {
        let canonical = path.canonicalize().map_err(|e| CompileError::Read {
            location: path.to_path_buf(),
            details: e.to_string(),
        })?;
        if collection.visited.contains(&canonical) {
            return Ok(());
        }

        let content = std::fs::read_to_string(&canonical).map_err(|e| CompileError::Read {
            location: path.to_path_buf(),
            details: e.to_string(),
        })?;

        let (references, target_namespace, qualified_elements, qualified_attributes) = {
            let doc = roxmltree::Document::parse(&content).map_err(|e| CompileError::Parse {
                location: path.to_path_buf(),
                details: e.to_string(),
            })?;
            let root = doc.root_element();
            if root.tag_name().name() != "schema"
                || root.tag_name().namespace() != Some(XSD_NAMESPACE)
            {
                return Err(CompileError::NotASchema {
                    location: path.to_path_buf(),
                    found: QName::new(
                        root.tag_name().namespace().unwrap_or(""),
                        root.tag_name().name(),
                    )
                    .to_string(),
                });
            }

            let declared = root.attribute("targetNamespace");
            let target_namespace = effective_namespace(declared, &expectation, path)?;
            let qualified_elements = root.attribute("elementFormDefault") == Some("qualified");
            let qualified_attributes = root.attribute("attributeFormDefault") == Some("qualified");

            let referent_dir = canonical.parent().unwrap_or(Path::new(".")).to_path_buf();
            let mut references = Vec::new();
            for child in root.children().filter(|n| n.is_element()) {
                if child.tag_name().namespace() != Some(XSD_NAMESPACE) {
                    continue;
                }
                match child.tag_name().name() {
                    "include" => {
                        let location = child.attribute("schemaLocation").ok_or_else(|| {
                            malformed(path, "xs:include requires a schemaLocation attribute")
                        })?;
                        let target = self
                            .resolver
                            .resolve(None, Some(location), &referent_dir)
                            .ok_or_else(|| CompileError::UnresolvableReference {
                                identifier: location.to_string(),
                                referenced_from: path.to_path_buf(),
                            })?;
                        references.push((
                            NamespaceExpectation::SameAs(target_namespace.clone()),
                            target,
                        ));
                    }
                    "import" => {
                        let namespace = child.attribute("namespace");
                        if namespace == Some(XSD_NAMESPACE) || namespace == Some(XML_NAMESPACE) {
                            continue;
                        }
                        let location = child.attribute("schemaLocation");
                        if namespace.is_none() && location.is_none() {
                            continue;
                        }
                        let target = self
                            .resolver
                            .resolve(namespace, location, &referent_dir)
                            .ok_or_else(|| CompileError::UnresolvableReference {
                                identifier: namespace
                                    .or(location)
                                    .unwrap_or_default()
                                    .to_string(),
                                referenced_from: path.to_path_buf(),
                            })?;
                        references.push((
                            NamespaceExpectation::Declared(namespace.map(String::from)),
                            target,
                        ));
                    }
                    _ => {}
                }
            }
            (
                references,
                target_namespace,
                qualified_elements,
                qualified_attributes,
            )
        };

        collection.visited.insert(canonical.clone());
        collection.documents.push(SchemaDocument {
            path: canonical,
            content,
            target_namespace,
            qualified_elements,
            qualified_attributes,
        });

        for (expectation, target) in references {
            self.collect(&target, expectation, collection)?;
        }
        Ok(())
    }
}

fn effective_namespace(
    declared: Option<&str>,
    expectation: &NamespaceExpectation,
    path: &Path,
) -> CompileResult<String> {
    match expectation {
        NamespaceExpectation::Any => Ok(declared.unwrap_or("").to_string()),
        NamespaceExpectation::SameAs(expected) => match declared {
            // Chameleon include: the document adopts the includer's namespace
            None => Ok(expected.clone()),
            Some(d) if d == expected => Ok(d.to_string()),
            Some(d) => Err(malformed(
                path,
                format!(
                    "included schema declares targetNamespace '{}' but '{}' was expected",
                    d, expected
                ),
            )),
        },
        NamespaceExpectation::Declared(expected) => match (declared, expected) {
            (Some(d), Some(e)) if d == e => Ok(d.to_string()),
            (Some(d), Some(e)) => Err(malformed(
                path,
                format!(
                    "imported schema declares targetNamespace '{}' but '{}' was expected",
                    d, e
                ),
            )),
            (None, Some(e)) => Err(malformed(
                path,
                format!(
                    "imported schema declares no targetNamespace but '{}' was expected",
                    e
                ),
            )),
            (Some(d), None) => Err(malformed(
                path,
                format!(
                    "imported schema declares targetNamespace '{}' but none was expected",
                    d
                ),
            )),
            (None, None) => Ok(String::new()),
        },
    }
}

// ---------------------------------------------------------------------------
// Phase 2: raw declaration tables

#[derive(Debug, Clone)]
enum RawType {
    Complex(RawComplex),
    Simple(RawSimple),
}

#[derive(Debug, Clone)]
struct RawComplex {
    mixed: bool,
    content: RawContent,
    attributes: Vec<RawAttribute>,
}

#[derive(Debug, Clone)]
enum RawContent {
    Empty,
    Group(RawParticle),
    SimpleContent { base: QName },
}

#[derive(Debug, Clone)]
struct RawParticle {
    min_occurs: u32,
    max_occurs: MaxOccurs,
    term: RawTerm,
}

#[derive(Debug, Clone)]
enum RawTerm {
    Element(RawElementUse),
    Sequence(Vec<RawParticle>),
    Choice(Vec<RawParticle>),
    All(Vec<RawParticle>),
}

#[derive(Debug, Clone)]
struct RawElementUse {
    reference: Option<QName>,
    name: Option<QName>,
    nillable: bool,
    type_name: Option<QName>,
    inline: Option<Box<RawType>>,
}

#[derive(Debug, Clone)]
struct RawElement {
    name: QName,
    nillable: bool,
    type_name: Option<QName>,
    inline: Option<RawType>,
}

#[derive(Debug, Clone)]
struct RawSimple {
    base: QName,
    facets: RawFacets,
}

#[derive(Debug, Clone, Default)]
struct RawFacets {
    enumeration: Vec<String>,
    patterns: Vec<String>,
    length: Option<String>,
    min_length: Option<String>,
    max_length: Option<String>,
    min_inclusive: Option<String>,
    max_inclusive: Option<String>,
    min_exclusive: Option<String>,
    max_exclusive: Option<String>,
}

#[derive(Debug, Clone)]
struct RawAttribute {
    reference: Option<QName>,
    name: Option<QName>,
    type_name: Option<QName>,
    inline: Option<RawSimple>,
    usage: AttributeUse,
    fixed: Option<String>,
}

#[derive(Default)]
struct RawTables {
    elements: BTreeMap<QName, (RawElement, PathBuf)>,
    types: BTreeMap<QName, (RawType, PathBuf)>,
    attributes: BTreeMap<QName, (RawAttribute, PathBuf)>,
}

fn malformed(location: &Path, details: impl Into<String>) -> CompileError {
    CompileError::Malformed {
        location: location.to_path_buf(),
        details: details.into(),
    }
}

fn unsupported(construct: impl Into<String>, location: &Path) -> CompileError {
    CompileError::UnsupportedConstruct {
        construct: construct.into(),
        location: location.to_path_buf(),
    }
}

fn resolve_qname(node: Node<'_, '_>, value: &str, location: &Path) -> CompileResult<QName> {
    match value.split_once(':') {
        Some((prefix, local)) => {
            let namespace = node.lookup_namespace_uri(Some(prefix)).ok_or_else(|| {
                malformed(
                    location,
                    format!("undeclared namespace prefix '{}' in '{}'", prefix, value),
                )
            })?;
            Ok(QName::new(namespace, local))
        }
        None => {
            let namespace = node.lookup_namespace_uri(None).unwrap_or("");
            Ok(QName::new(namespace, value))
        }
    }
}

fn register_globals(document: &SchemaDocument, tables: &mut RawTables) -> CompileResult<()> {
    let doc = roxmltree::Document::parse(&document.content).map_err(|e| CompileError::Parse {
        location: document.path.clone(),
        details: e.to_string(),
    })?;
    let root = doc.root_element();

    for child in root.children().filter(|n| n.is_element()) {
        if child.tag_name().namespace() != Some(XSD_NAMESPACE) {
            return Err(unsupported(
                QName::new(
                    child.tag_name().namespace().unwrap_or(""),
                    child.tag_name().name(),
                )
                .to_string(),
                &document.path,
            ));
        }
        match child.tag_name().name() {
            "element" => {
                let (qname, raw) = parse_global_element(child, document)?;
                if tables.elements.contains_key(&qname) {
                    return Err(CompileError::DuplicateDefinition {
                        kind: "element".to_string(),
                        name: qname.to_string(),
                        location: document.path.clone(),
                    });
                }
                tables.elements.insert(qname, (raw, document.path.clone()));
            }
            "complexType" | "simpleType" => {
                let name = child.attribute("name").ok_or_else(|| {
                    malformed(&document.path, "global type requires a name attribute")
                })?;
                let qname = QName::new(document.target_namespace.clone(), name);
                let raw = if child.tag_name().name() == "complexType" {
                    RawType::Complex(parse_complex_type(child, document)?)
                } else {
                    RawType::Simple(parse_simple_type(child, document)?)
                };
                if tables.types.contains_key(&qname) {
                    return Err(CompileError::DuplicateDefinition {
                        kind: "type".to_string(),
                        name: qname.to_string(),
                        location: document.path.clone(),
                    });
                }
                tables.types.insert(qname, (raw, document.path.clone()));
            }
            "attribute" => {
                let raw = parse_attribute(child, document, true)?;
                let qname = match raw.name.clone() {
                    Some(name) => name,
                    None => {
                        return Err(malformed(
                            &document.path,
                            "global attribute requires a name attribute",
                        ));
                    }
                };
                if tables.attributes.contains_key(&qname) {
                    return Err(CompileError::DuplicateDefinition {
                        kind: "attribute".to_string(),
                        name: qname.to_string(),
                        location: document.path.clone(),
                    });
                }
                tables.attributes.insert(qname, (raw, document.path.clone()));
            }
            "include" | "import" | "annotation" => {}
            other => {
                return Err(unsupported(format!("xs:{}", other), &document.path));
            }
        }
    }
    Ok(())
}

fn parse_global_element(
    node: Node<'_, '_>,
    document: &SchemaDocument,
) -> CompileResult<(QName, RawElement)> {
    reject_unsupported_element_attrs(node, document)?;
    let name = node
        .attribute("name")
        .ok_or_else(|| malformed(&document.path, "global element requires a name attribute"))?;
    let qname = QName::new(document.target_namespace.clone(), name);
    let nillable = node.attribute("nillable") == Some("true");
    let type_name = node
        .attribute("type")
        .map(|v| resolve_qname(node, v, &document.path))
        .transpose()?;
    let inline = parse_inline_type(node, document)?;
    if type_name.is_some() && inline.is_some() {
        return Err(malformed(
            &document.path,
            format!(
                "element '{}' has both a type attribute and an inline type",
                name
            ),
        ));
    }
    Ok((
        qname.clone(),
        RawElement {
            name: qname,
            nillable,
            type_name,
            inline,
        },
    ))
}

fn reject_unsupported_element_attrs(
    node: Node<'_, '_>,
    document: &SchemaDocument,
) -> CompileResult<()> {
    for attr in ["fixed", "substitutionGroup"] {
        if node.attribute(attr).is_some() {
            return Err(unsupported(format!("xs:element/@{}", attr), &document.path));
        }
    }
    if node.attribute("abstract") == Some("true") {
        return Err(unsupported("xs:element/@abstract", &document.path));
    }
    Ok(())
}

fn parse_inline_type(
    node: Node<'_, '_>,
    document: &SchemaDocument,
) -> CompileResult<Option<RawType>> {
    let mut inline = None;
    for child in node.children().filter(|n| n.is_element()) {
        let parsed = match child.tag_name().name() {
            "annotation" => continue,
            "complexType" => RawType::Complex(parse_complex_type(child, document)?),
            "simpleType" => RawType::Simple(parse_simple_type(child, document)?),
            "unique" | "key" | "keyref" => {
                return Err(unsupported(
                    format!("xs:{}", child.tag_name().name()),
                    &document.path,
                ));
            }
            other => return Err(unsupported(format!("xs:{}", other), &document.path)),
        };
        if inline.is_some() {
            return Err(malformed(&document.path, "element has multiple inline types"));
        }
        inline = Some(parsed);
    }
    Ok(inline)
}

#[derive(Clone, Copy, PartialEq)]
enum GroupKind {
    Sequence,
    Choice,
    All,
}

fn parse_complex_type(
    node: Node<'_, '_>,
    document: &SchemaDocument,
) -> CompileResult<RawComplex> {
    let mixed = node.attribute("mixed") == Some("true");
    let mut content = RawContent::Empty;
    let mut attributes = Vec::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "annotation" => {}
            "sequence" | "choice" | "all" => {
                if !matches!(content, RawContent::Empty) {
                    return Err(malformed(
                        &document.path,
                        "complex type has more than one content group",
                    ));
                }
                let kind = match child.tag_name().name() {
                    "sequence" => GroupKind::Sequence,
                    "choice" => GroupKind::Choice,
                    _ => GroupKind::All,
                };
                content = RawContent::Group(parse_group(child, kind, document)?);
            }
            "simpleContent" => {
                let (base, extension_attrs) = parse_simple_content(child, document)?;
                content = RawContent::SimpleContent { base };
                attributes.extend(extension_attrs);
            }
            "complexContent" => {
                return Err(unsupported("xs:complexContent", &document.path));
            }
            "attribute" => attributes.push(parse_attribute(child, document, false)?),
            "attributeGroup" => return Err(unsupported("xs:attributeGroup", &document.path)),
            "anyAttribute" => return Err(unsupported("xs:anyAttribute", &document.path)),
            other => return Err(unsupported(format!("xs:{}", other), &document.path)),
        }
    }

    Ok(RawComplex {
        mixed,
        content,
        attributes,
    })
}

fn parse_group(
    node: Node<'_, '_>,
    kind: GroupKind,
    document: &SchemaDocument,
) -> CompileResult<RawParticle> {
    let (min_occurs, max_occurs) = parse_occurs(node, document)?;
    let mut particles = Vec::new();

    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "annotation" => {}
            "element" => particles.push(parse_element_use(child, document)?),
            "sequence" | "choice" => {
                if kind == GroupKind::All {
                    return Err(malformed(
                        &document.path,
                        "xs:all may contain only element particles",
                    ));
                }
                let nested = match child.tag_name().name() {
                    "sequence" => GroupKind::Sequence,
                    _ => GroupKind::Choice,
                };
                particles.push(parse_group(child, nested, document)?);
            }
            "all" => {
                return Err(malformed(
                    &document.path,
                    "xs:all is only allowed as the sole top-level group",
                ));
            }
            "any" => return Err(unsupported("xs:any", &document.path)),
            "group" => return Err(unsupported("xs:group reference", &document.path)),
            other => return Err(unsupported(format!("xs:{}", other), &document.path)),
        }
    }

    if kind == GroupKind::All {
        for particle in &particles {
            let over_once = match particle.max_occurs {
                MaxOccurs::Bounded(n) => n > 1,
                MaxOccurs::Unbounded => true,
            };
            if particle.min_occurs > 1 || over_once {
                return Err(malformed(
                    &document.path,
                    "xs:all members must have occurrence bounds of at most 1",
                ));
            }
        }
    }

    let term = match kind {
        GroupKind::Sequence => RawTerm::Sequence(particles),
        GroupKind::Choice => RawTerm::Choice(particles),
        GroupKind::All => RawTerm::All(particles),
    };
    Ok(RawParticle {
        min_occurs,
        max_occurs,
        term,
    })
}

fn parse_element_use(
    node: Node<'_, '_>,
    document: &SchemaDocument,
) -> CompileResult<RawParticle> {
    reject_unsupported_element_attrs(node, document)?;
    let (min_occurs, max_occurs) = parse_occurs(node, document)?;
    let nillable = node.attribute("nillable") == Some("true");

    let (reference, name) = match (node.attribute("ref"), node.attribute("name")) {
        (Some(r), None) => (Some(resolve_qname(node, r, &document.path)?), None),
        (None, Some(n)) => {
            let namespace = local_namespace(
                node,
                document.qualified_elements,
                &document.target_namespace,
                &document.path,
            )?;
            (None, Some(QName::new(namespace, n)))
        }
        (Some(_), Some(_)) => {
            return Err(malformed(
                &document.path,
                "element has both a ref and a name attribute",
            ));
        }
        (None, None) => {
            return Err(malformed(
                &document.path,
                "element requires a name or ref attribute",
            ));
        }
    };

    let type_name = node
        .attribute("type")
        .map(|v| resolve_qname(node, v, &document.path))
        .transpose()?;
    let inline = parse_inline_type(node, document)?;
    if reference.is_some() && (type_name.is_some() || inline.is_some()) {
        return Err(malformed(
            &document.path,
            "an element ref cannot also carry a type",
        ));
    }
    if type_name.is_some() && inline.is_some() {
        return Err(malformed(
            &document.path,
            "element has both a type attribute and an inline type",
        ));
    }

    Ok(RawParticle {
        min_occurs,
        max_occurs,
        term: RawTerm::Element(RawElementUse {
            reference,
            name,
            nillable,
            type_name,
            inline: inline.map(Box::new),
        }),
    })
}

fn local_namespace(
    node: Node<'_, '_>,
    qualified_by_default: bool,
    target_namespace: &str,
    location: &Path,
) -> CompileResult<String> {
    let qualified = match node.attribute("form") {
        None => qualified_by_default,
        Some("qualified") => true,
        Some("unqualified") => false,
        Some(other) => {
            return Err(malformed(
                location,
                format!("invalid form attribute '{}'", other),
            ));
        }
    };
    Ok(if qualified {
        target_namespace.to_string()
    } else {
        String::new()
    })
}

fn parse_occurs(
    node: Node<'_, '_>,
    document: &SchemaDocument,
) -> CompileResult<(u32, MaxOccurs)> {
    let min_occurs = match node.attribute("minOccurs") {
        None => 1,
        Some(v) => v.parse::<u32>().map_err(|_| {
            malformed(&document.path, format!("invalid minOccurs value '{}'", v))
        })?,
    };
    let max_occurs = match node.attribute("maxOccurs") {
        None => MaxOccurs::Bounded(1),
        Some("unbounded") => MaxOccurs::Unbounded,
        Some(v) => MaxOccurs::Bounded(v.parse::<u32>().map_err(|_| {
            malformed(&document.path, format!("invalid maxOccurs value '{}'", v))
        })?),
    };
    if let MaxOccurs::Bounded(max) = max_occurs {
        if max < min_occurs {
            return Err(malformed(
                &document.path,
                format!("maxOccurs {} is less than minOccurs {}", max, min_occurs),
            ));
        }
    }
    Ok((min_occurs, max_occurs))
}

fn parse_simple_content(
    node: Node<'_, '_>,
    document: &SchemaDocument,
) -> CompileResult<(QName, Vec<RawAttribute>)> {
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "annotation" => {}
            "extension" => {
                let base = child.attribute("base").ok_or_else(|| {
                    malformed(&document.path, "xs:extension requires a base attribute")
                })?;
                let base = resolve_qname(child, base, &document.path)?;
                let mut attributes = Vec::new();
                for sub in child.children().filter(|n| n.is_element()) {
                    match sub.tag_name().name() {
                        "annotation" => {}
                        "attribute" => attributes.push(parse_attribute(sub, document, false)?),
                        "attributeGroup" => {
                            return Err(unsupported("xs:attributeGroup", &document.path));
                        }
                        "anyAttribute" => {
                            return Err(unsupported("xs:anyAttribute", &document.path));
                        }
                        other => {
                            return Err(unsupported(format!("xs:{}", other), &document.path));
                        }
                    }
                }
                return Ok((base, attributes));
            }
            "restriction" => {
                return Err(unsupported("xs:simpleContent/xs:restriction", &document.path));
            }
            other => return Err(unsupported(format!("xs:{}", other), &document.path)),
        }
    }
    Err(malformed(
        &document.path,
        "xs:simpleContent requires an extension child",
    ))
}

fn parse_simple_type(node: Node<'_, '_>, document: &SchemaDocument) -> CompileResult<RawSimple> {
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "annotation" => {}
            "restriction" => {
                let base = child.attribute("base").ok_or_else(|| {
                    malformed(&document.path, "xs:restriction requires a base attribute")
                })?;
                let base = resolve_qname(child, base, &document.path)?;
                let facets = parse_facets(child, document)?;
                return Ok(RawSimple { base, facets });
            }
            "list" => return Err(unsupported("xs:list", &document.path)),
            "union" => return Err(unsupported("xs:union", &document.path)),
            other => return Err(unsupported(format!("xs:{}", other), &document.path)),
        }
    }
    Err(malformed(
        &document.path,
        "xs:simpleType requires a restriction",
    ))
}

fn parse_facets(node: Node<'_, '_>, document: &SchemaDocument) -> CompileResult<RawFacets> {
    let mut facets = RawFacets::default();
    for facet in node.children().filter(|n| n.is_element()) {
        let facet_name = facet.tag_name().name();
        if matches!(facet_name, "annotation" | "whiteSpace") {
            // whitespace collapse is built into the value checks
            continue;
        }
        let value = facet.attribute("value").ok_or_else(|| {
            malformed(
                &document.path,
                format!("facet xs:{} is missing its value attribute", facet_name),
            )
        })?;
        match facet_name {
            "enumeration" => facets.enumeration.push(value.to_string()),
            "pattern" => facets.patterns.push(value.to_string()),
            "length" => set_once(&mut facets.length, facet_name, value, &document.path)?,
            "minLength" => set_once(&mut facets.min_length, facet_name, value, &document.path)?,
            "maxLength" => set_once(&mut facets.max_length, facet_name, value, &document.path)?,
            "minInclusive" => {
                set_once(&mut facets.min_inclusive, facet_name, value, &document.path)?
            }
            "maxInclusive" => {
                set_once(&mut facets.max_inclusive, facet_name, value, &document.path)?
            }
            "minExclusive" => {
                set_once(&mut facets.min_exclusive, facet_name, value, &document.path)?
            }
            "maxExclusive" => {
                set_once(&mut facets.max_exclusive, facet_name, value, &document.path)?
            }
            other => return Err(unsupported(format!("facet xs:{}", other), &document.path)),
        }
    }
    Ok(facets)
}

fn set_once(
    slot: &mut Option<String>,
    facet: &str,
    value: &str,
    location: &Path,
) -> CompileResult<()> {
    if slot.is_some() {
        return Err(malformed(location, format!("duplicate facet xs:{}", facet)));
    }
    *slot = Some(value.to_string());
    Ok(())
}

fn parse_attribute(
    node: Node<'_, '_>,
    document: &SchemaDocument,
    is_global: bool,
) -> CompileResult<RawAttribute> {
    let (reference, name) = match (node.attribute("ref"), node.attribute("name")) {
        (Some(r), None) => {
            if is_global {
                return Err(malformed(
                    &document.path,
                    "a global attribute cannot use ref",
                ));
            }
            (Some(resolve_qname(node, r, &document.path)?), None)
        }
        (None, Some(n)) => {
            let namespace = if is_global {
                document.target_namespace.clone()
            } else {
                local_namespace(
                    node,
                    document.qualified_attributes,
                    &document.target_namespace,
                    &document.path,
                )?
            };
            (None, Some(QName::new(namespace, n)))
        }
        (Some(_), Some(_)) => {
            return Err(malformed(
                &document.path,
                "attribute has both a ref and a name attribute",
            ));
        }
        (None, None) => {
            return Err(malformed(
                &document.path,
                "attribute requires a name or ref attribute",
            ));
        }
    };

    let type_name = node
        .attribute("type")
        .map(|v| resolve_qname(node, v, &document.path))
        .transpose()?;
    let mut inline = None;
    for child in node.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "annotation" => {}
            "simpleType" => {
                if inline.is_some() {
                    return Err(malformed(
                        &document.path,
                        "attribute has multiple inline types",
                    ));
                }
                inline = Some(parse_simple_type(child, document)?);
            }
            other => return Err(unsupported(format!("xs:{}", other), &document.path)),
        }
    }
    if type_name.is_some() && inline.is_some() {
        return Err(malformed(
            &document.path,
            "attribute has both a type attribute and an inline type",
        ));
    }

    let usage = match node.attribute("use") {
        None => AttributeUse::Optional,
        Some(_) if is_global => {
            return Err(malformed(
                &document.path,
                "use is not allowed on a global attribute",
            ));
        }
        Some("optional") => AttributeUse::Optional,
        Some("required") => AttributeUse::Required,
        Some("prohibited") => AttributeUse::Prohibited,
        Some(other) => {
            return Err(malformed(
                &document.path,
                format!("invalid use attribute '{}'", other),
            ));
        }
    };

    Ok(RawAttribute {
        reference,
        name,
        type_name,
        inline,
        usage,
        fixed: node.attribute("fixed").map(String::from),
    })
}

// ---------------------------------------------------------------------------
// Linking

struct Linker<'a> {
    tables: &'a RawTables,
    simple_memo: BTreeMap<QName, SimpleType>,
    simple_stack: Vec<QName>,
    element_stack: Vec<QName>,
}

impl<'a> Linker<'a> {
    fn new(tables: &'a RawTables) -> Self {
        Linker {
            tables,
            simple_memo: BTreeMap::new(),
            simple_stack: Vec::new(),
            element_stack: Vec::new(),
        }
    }

    /// Flatten a named simple type onto its primitive, merging the facets of
    /// the whole restriction chain
    fn named_simple(&mut self, name: &QName, referenced_from: &Path) -> CompileResult<SimpleType> {
        if let Some(done) = self.simple_memo.get(name) {
            return Ok(done.clone());
        }
        if self.simple_stack.contains(name) {
            return Err(malformed(
                referenced_from,
                format!("circular simple type derivation involving '{}'", name),
            ));
        }
        let (raw, location) = match self.tables.types.get(name) {
            Some((RawType::Simple(raw), location)) => (raw.clone(), location.clone()),
            Some((RawType::Complex(_), location)) => {
                return Err(malformed(
                    location,
                    format!("'{}' is not a simple type", name),
                ));
            }
            None => {
                return Err(CompileError::UnknownType {
                    name: name.to_string(),
                    location: referenced_from.to_path_buf(),
                });
            }
        };

        self.simple_stack.push(name.clone());
        let result = self.build_simple(&raw, &location);
        self.simple_stack.pop();
        let simple = result?;
        self.simple_memo.insert(name.clone(), simple.clone());
        Ok(simple)
    }

    fn build_simple(&mut self, raw: &RawSimple, location: &Path) -> CompileResult<SimpleType> {
        let (primitive, parent_facets) = if raw.base.namespace == XSD_NAMESPACE {
            let primitive = PrimitiveType::by_name(&raw.base.local)
                .ok_or_else(|| unsupported(format!("xs:{}", raw.base.local), location))?;
            (primitive, Facets::default())
        } else {
            let parent = self.named_simple(&raw.base, location)?;
            (parent.primitive, parent.facets)
        };
        let facets = build_facets(&raw.facets, primitive, parent_facets, location)?;
        Ok(SimpleType { primitive, facets })
    }

    /// Type reference for element content: any named type or builtin
    fn type_ref(&mut self, type_name: &QName, location: &Path) -> CompileResult<TypeRef> {
        if type_name.namespace == XSD_NAMESPACE {
            return PrimitiveType::by_name(&type_name.local)
                .map(TypeRef::Builtin)
                .ok_or_else(|| unsupported(format!("xs:{}", type_name.local), location));
        }
        if self.tables.types.contains_key(type_name) {
            Ok(TypeRef::Named(type_name.clone()))
        } else {
            Err(CompileError::UnknownType {
                name: type_name.to_string(),
                location: location.to_path_buf(),
            })
        }
    }

    /// Type reference that must resolve to a simple type (attributes,
    /// simpleContent bases)
    fn simple_type_ref(&mut self, type_name: &QName, location: &Path) -> CompileResult<TypeRef> {
        if type_name.namespace == XSD_NAMESPACE {
            let primitive = PrimitiveType::by_name(&type_name.local)
                .ok_or_else(|| unsupported(format!("xs:{}", type_name.local), location))?;
            if primitive == PrimitiveType::AnyType {
                return Err(malformed(location, "xs:anyType is not a simple type"));
            }
            return Ok(TypeRef::Builtin(primitive));
        }
        // Verifies both existence and simpleness
        self.named_simple(type_name, location)?;
        Ok(TypeRef::Named(type_name.clone()))
    }

    fn convert_type(&mut self, raw: &RawType, location: &Path) -> CompileResult<TypeDef> {
        match raw {
            RawType::Complex(complex) => {
                Ok(TypeDef::Complex(self.convert_complex(complex, location)?))
            }
            RawType::Simple(simple) => Ok(TypeDef::Simple(self.build_simple(simple, location)?)),
        }
    }

    fn convert_complex(&mut self, raw: &RawComplex, location: &Path) -> CompileResult<ComplexType> {
        let content = match &raw.content {
            RawContent::Empty => {
                if raw.mixed {
                    ContentModel::Mixed(Particle::required(Term::Sequence(Vec::new())))
                } else {
                    ContentModel::Empty
                }
            }
            RawContent::Group(group) => {
                let particle = self.convert_particle(group, location)?;
                if raw.mixed {
                    ContentModel::Mixed(particle)
                } else {
                    ContentModel::ElementOnly(particle)
                }
            }
            RawContent::SimpleContent { base } => {
                ContentModel::Simple(self.simple_type_ref(base, location)?)
            }
        };

        let mut attributes = Vec::new();
        let mut seen = BTreeSet::new();
        for raw_attr in &raw.attributes {
            let decl = self.convert_attribute(raw_attr, location)?;
            if !seen.insert(decl.name.clone()) {
                return Err(malformed(
                    location,
                    format!("duplicate attribute '{}' in complex type", decl.name),
                ));
            }
            attributes.push(decl);
        }

        Ok(ComplexType {
            content,
            attributes,
        })
    }

    fn convert_particle(&mut self, raw: &RawParticle, location: &Path) -> CompileResult<Particle> {
        let term = match &raw.term {
            RawTerm::Element(element_use) => {
                Term::Element(self.convert_element_use(element_use, location)?)
            }
            RawTerm::Sequence(items) => Term::Sequence(self.convert_particles(items, location)?),
            RawTerm::Choice(items) => Term::Choice(self.convert_particles(items, location)?),
            RawTerm::All(items) => Term::All(self.convert_particles(items, location)?),
        };
        Ok(Particle {
            term,
            min_occurs: raw.min_occurs,
            max_occurs: raw.max_occurs,
        })
    }

    fn convert_particles(
        &mut self,
        raw: &[RawParticle],
        location: &Path,
    ) -> CompileResult<Vec<Particle>> {
        raw.iter()
            .map(|p| self.convert_particle(p, location))
            .collect()
    }

    fn convert_element_use(
        &mut self,
        raw: &RawElementUse,
        location: &Path,
    ) -> CompileResult<LocalElement> {
        if let Some(reference) = &raw.reference {
            let (global, global_location) = match self.tables.elements.get(reference) {
                Some((global, loc)) => (global.clone(), loc.clone()),
                None => {
                    return Err(malformed(
                        location,
                        format!("reference to undeclared element '{}'", reference),
                    ));
                }
            };
            // Recursion through refs is only expressible with a named type
            if self.element_stack.contains(reference) {
                return Err(malformed(
                    &global_location,
                    format!(
                        "recursive reference to element '{}' with an anonymous type",
                        reference
                    ),
                ));
            }
            self.element_stack.push(reference.clone());
            let type_ref = self.global_element_type(&global, &global_location);
            self.element_stack.pop();
            return Ok(LocalElement {
                name: global.name.clone(),
                nillable: global.nillable,
                type_ref: type_ref?,
            });
        }

        let name = match raw.name.clone() {
            Some(name) => name,
            None => return Err(malformed(location, "element use without a name")),
        };
        let type_ref =
            self.use_type_ref(raw.type_name.as_ref(), raw.inline.as_deref(), location)?;
        Ok(LocalElement {
            name,
            nillable: raw.nillable,
            type_ref,
        })
    }

    fn global_element_type(
        &mut self,
        raw: &RawElement,
        location: &Path,
    ) -> CompileResult<TypeRef> {
        self.use_type_ref(raw.type_name.as_ref(), raw.inline.as_ref(), location)
    }

    fn use_type_ref(
        &mut self,
        type_name: Option<&QName>,
        inline: Option<&RawType>,
        location: &Path,
    ) -> CompileResult<TypeRef> {
        match (type_name, inline) {
            (Some(name), None) => self.type_ref(name, location),
            (None, Some(raw)) => Ok(TypeRef::Inline(Box::new(
                self.convert_type(raw, location)?,
            ))),
            (None, None) => Ok(TypeRef::Builtin(PrimitiveType::AnyType)),
            (Some(_), Some(_)) => Err(malformed(
                location,
                "declaration has both a type attribute and an inline type",
            )),
        }
    }

    fn convert_attribute(
        &mut self,
        raw: &RawAttribute,
        location: &Path,
    ) -> CompileResult<AttributeDecl> {
        if let Some(reference) = &raw.reference {
            let (global, global_location) = match self.tables.attributes.get(reference) {
                Some((global, loc)) => (global.clone(), loc.clone()),
                None => {
                    return Err(malformed(
                        location,
                        format!("reference to undeclared attribute '{}'", reference),
                    ));
                }
            };
            let mut decl = self.convert_attribute(&global, &global_location)?;
            // The referencing site decides the use and may tighten fixed
            decl.usage = raw.usage;
            if raw.fixed.is_some() {
                decl.fixed = raw.fixed.clone();
            }
            return Ok(decl);
        }

        let name = match raw.name.clone() {
            Some(name) => name,
            None => return Err(malformed(location, "attribute use without a name")),
        };
        let type_ref = match (&raw.type_name, &raw.inline) {
            (Some(type_name), None) => self.simple_type_ref(type_name, location)?,
            (None, Some(inline)) => TypeRef::Inline(Box::new(TypeDef::Simple(
                self.build_simple(inline, location)?,
            ))),
            (None, None) => TypeRef::Builtin(PrimitiveType::AnySimpleType),
            (Some(_), Some(_)) => {
                return Err(malformed(
                    location,
                    "attribute has both a type attribute and an inline type",
                ));
            }
        };
        Ok(AttributeDecl {
            name,
            type_ref,
            usage: raw.usage,
            fixed: raw.fixed.clone(),
        })
    }
}

fn build_facets(
    raw: &RawFacets,
    primitive: PrimitiveType,
    parent: Facets,
    location: &Path,
) -> CompileResult<Facets> {
    let mut facets = parent;

    if !raw.enumeration.is_empty() {
        let mut values = Vec::new();
        for value in &raw.enumeration {
            let normalized = if primitive.collapses_whitespace() {
                value.trim()
            } else {
                value.as_str()
            };
            primitive.check(normalized).map_err(|e| {
                malformed(location, format!("invalid enumeration value: {}", e))
            })?;
            values.push(normalized.to_string());
        }
        facets.enumeration = Some(values);
    }

    if !raw.patterns.is_empty() {
        // Several pattern facets in one restriction step are alternatives
        let source = if raw.patterns.len() == 1 {
            raw.patterns[0].clone()
        } else {
            raw.patterns
                .iter()
                .map(|p| format!("(?:{})", p))
                .collect::<Vec<_>>()
                .join("|")
        };
        facets.pattern = Some(Pattern::compile(&source).map_err(|e| {
            malformed(location, format!("invalid pattern '{}': {}", source, e))
        })?);
    }

    if let Some(value) = &raw.length {
        facets.length = Some(parse_length_facet("length", value, location)?);
    }
    if let Some(value) = &raw.min_length {
        facets.min_length = Some(parse_length_facet("minLength", value, location)?);
    }
    if let Some(value) = &raw.max_length {
        facets.max_length = Some(parse_length_facet("maxLength", value, location)?);
    }

    let bounds = [
        ("minInclusive", &raw.min_inclusive),
        ("maxInclusive", &raw.max_inclusive),
        ("minExclusive", &raw.min_exclusive),
        ("maxExclusive", &raw.max_exclusive),
    ];
    if bounds.iter().any(|(_, v)| v.is_some()) {
        let ordered = primitive.is_integer()
            || primitive.is_fractional()
            || primitive == PrimitiveType::Date;
        if !ordered {
            return Err(malformed(
                location,
                format!("range facets are not supported on type {}", primitive),
            ));
        }
        for (facet, value) in bounds {
            if let Some(value) = value {
                let trimmed = value.trim();
                primitive.check(trimmed).map_err(|e| {
                    malformed(location, format!("invalid {} value: {}", facet, e))
                })?;
                let slot = match facet {
                    "minInclusive" => &mut facets.min_inclusive,
                    "maxInclusive" => &mut facets.max_inclusive,
                    "minExclusive" => &mut facets.min_exclusive,
                    _ => &mut facets.max_exclusive,
                };
                *slot = Some(trimmed.to_string());
            }
        }
    }

    Ok(facets)
}

fn parse_length_facet(facet: &str, value: &str, location: &Path) -> CompileResult<u32> {
    value.trim().parse::<u32>().map_err(|_| {
        malformed(
            location,
            format!(
                "facet xs:{} value '{}' is not a non-negative integer",
                facet, value
            ),
        )
    })
}

fn link(root_path: &Path, documents: &[SchemaDocument]) -> CompileResult<CompiledSchema> {
    let mut tables = RawTables::default();
    for document in documents {
        register_globals(document, &mut tables)?;
    }

    let mut linker = Linker::new(&tables);

    let mut types = BTreeMap::new();
    for (name, (raw, location)) in &tables.types {
        let def = match raw {
            RawType::Simple(_) => TypeDef::Simple(linker.named_simple(name, location)?),
            RawType::Complex(complex) => {
                TypeDef::Complex(linker.convert_complex(complex, location)?)
            }
        };
        types.insert(name.clone(), def);
    }

    let mut elements = BTreeMap::new();
    for (name, (raw, location)) in &tables.elements {
        let type_ref = linker.global_element_type(raw, location)?;
        elements.insert(
            name.clone(),
            ElementDecl {
                name: name.clone(),
                type_ref,
                nillable: raw.nillable,
            },
        );
    }

    let mut attributes = BTreeMap::new();
    for (name, (raw, location)) in &tables.attributes {
        attributes.insert(name.clone(), linker.convert_attribute(raw, location)?);
    }

    let namespaces: BTreeSet<String> = documents
        .iter()
        .map(|d| d.target_namespace.clone())
        .collect();

    Ok(CompiledSchema {
        root_path: root_path.to_path_buf(),
        namespaces,
        elements,
        types,
        attributes,
    })
}
