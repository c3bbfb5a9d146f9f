//! The validating pass over instance documents.
//!
//! A [`DocumentProcessor`] walks one document at a time against a
//! [`CompiledSchema`] and reports everything it finds to a
//! [`ViolationSink`]. Recoverable problems never stop the walk, so a
//! document with N independent defects produces N violations. Only a
//! document that cannot be read as XML at all produces a fatal violation,
//! and the pass stops there because nothing beyond the failure point can
//! be trusted.
//!
//! Structural mismatches are reported once per content model, while value
//! and attribute violations are reported per occurrence. Content models in
//! the supported subset are deterministic, so greedy matching never needs
//! to backtrack.

use std::collections::BTreeMap;
use std::path::Path;

use roxmltree::Node;

use crate::collector::{Violation, ViolationSink};
use crate::error::ValidationError;
use crate::model::{
    AttributeDecl, AttributeUse, CompiledSchema, ComplexType, ContentModel, Facets, LocalElement,
    Particle, PrimitiveType, QName, SimpleType, Term, TypeDef, TypeRef, TypeView, XSI_NAMESPACE,
};

/// Validates instance documents against one compiled schema
#[derive(Debug, Clone)]
pub struct DocumentProcessor<'s> {
    schema: &'s CompiledSchema,
}

impl<'s> DocumentProcessor<'s> {
    pub fn new(schema: &'s CompiledSchema) -> Self {
        DocumentProcessor { schema }
    }

    /// Validate the document at `path`, reporting violations to `sink`.
    ///
    /// An unreadable file is an operational error, not a violation: the
    /// document was never examined, so it gets no verdict.
    pub fn process_file(
        &self,
        path: &Path,
        sink: &mut dyn ViolationSink,
    ) -> Result<(), ValidationError> {
        let bytes = std::fs::read(path).map_err(|e| ValidationError::DocumentRead {
            file: path.to_path_buf(),
            details: e.to_string(),
        })?;
        let document_name = path.display().to_string();
        match String::from_utf8(bytes) {
            Ok(content) => {
                self.process_str(&document_name, &content, sink);
                Ok(())
            }
            Err(e) => {
                let offset = e.utf8_error().valid_up_to();
                let (line, column) = position_of_byte(e.as_bytes(), offset);
                sink.fatal_error(
                    Violation::fatal(
                        &document_name,
                        format!("document is not valid UTF-8 (byte offset {})", offset),
                    )
                    .at(line, column),
                );
                Ok(())
            }
        }
    }

    /// Validate already-loaded document text. `document_name` is only used
    /// to label violations.
    pub fn process_str(&self, document_name: &str, content: &str, sink: &mut dyn ViolationSink) {
        let doc = match roxmltree::Document::parse(content) {
            Ok(doc) => doc,
            Err(e) => {
                let pos = e.pos();
                sink.fatal_error(
                    Violation::fatal(document_name, format!("document is not well-formed: {}", e))
                        .at(pos.row, pos.col),
                );
                return;
            }
        };

        let mut walker = Walker {
            schema: self.schema,
            document: document_name.to_string(),
            sink,
        };
        walker.check_root(doc.root_element());
    }
}

struct Walker<'s, 'k> {
    schema: &'s CompiledSchema,
    document: String,
    sink: &'k mut dyn ViolationSink,
}

impl<'s> Walker<'s, '_> {
    fn check_root(&mut self, root: Node<'_, '_>) {
        let name = qname_of(root);
        match self.schema.element(&name) {
            Some(decl) => self.check_element(root, &decl.name, &decl.type_ref, decl.nillable),
            None => {
                self.report_error(
                    root,
                    format!("no global declaration found for root element '{}'", name),
                );
            }
        }
    }

    fn check_element(
        &mut self,
        node: Node<'_, '_>,
        name: &QName,
        type_ref: &TypeRef,
        nillable: bool,
    ) {
        let nil = self.nil_state(node, name, nillable);
        let schema = self.schema;
        let Some(view) = schema.view(type_ref) else {
            // Linking guarantees named references resolve
            return;
        };

        match view {
            TypeView::Builtin(PrimitiveType::AnyType) => {}
            TypeView::Builtin(PrimitiveType::AnySimpleType) => {
                self.check_attributes(node, &[], name);
                if nil {
                    self.require_nil_empty(node, name);
                    return;
                }
                self.reject_child_elements(node, name);
            }
            TypeView::Builtin(primitive) => {
                self.check_attributes(node, &[], name);
                if nil {
                    self.require_nil_empty(node, name);
                    return;
                }
                self.reject_child_elements(node, name);
                let simple = SimpleType {
                    primitive,
                    facets: Facets::default(),
                };
                self.check_text(node, &simple, name);
            }
            TypeView::Def(TypeDef::Simple(simple)) => {
                self.check_attributes(node, &[], name);
                if nil {
                    self.require_nil_empty(node, name);
                    return;
                }
                self.reject_child_elements(node, name);
                self.check_text(node, simple, name);
            }
            TypeView::Def(TypeDef::Complex(complex)) => {
                self.check_attributes(node, &complex.attributes, name);
                if nil {
                    self.require_nil_empty(node, name);
                    return;
                }
                self.check_complex_content(node, complex, name);
            }
        }
    }

    fn check_complex_content(&mut self, node: Node<'_, '_>, complex: &ComplexType, name: &QName) {
        match &complex.content {
            ContentModel::Empty => {
                if let Some(child) = node.children().find(|n| n.is_element()) {
                    self.report_error(
                        child,
                        format!("element '{}' must be empty", name),
                    );
                }
                if has_significant_text(node) {
                    self.report_error(
                        node,
                        format!("element '{}' must be empty but contains text", name),
                    );
                }
            }
            ContentModel::Simple(inner) => {
                self.reject_child_elements(node, name);
                if let Some(simple) = self.resolved_simple(inner) {
                    self.check_text(node, &simple, name);
                }
            }
            ContentModel::ElementOnly(particle) => {
                if let Some(text) = first_significant_text(node) {
                    self.report_error(
                        text,
                        format!("element '{}' cannot contain character data", name),
                    );
                }
                self.check_children(node, particle, name);
            }
            ContentModel::Mixed(particle) => {
                self.check_children(node, particle, name);
            }
        }
    }

    fn check_children(&mut self, node: Node<'_, '_>, particle: &Particle, owner: &QName) {
        let children: Vec<Node> = node.children().filter(|n| n.is_element()).collect();

        match &particle.term {
            Term::All(members) => self.match_all(particle, members, &children, owner),
            _ => self.match_ordered(particle, &children, node, owner),
        }

        // Recurse by declaration so value violations inside a structurally
        // broken parent are still found
        let mut index = BTreeMap::new();
        element_index(particle, &mut index);
        for child in children {
            if let Some(decl) = index.get(&qname_of(child)) {
                self.check_element(child, &decl.name, &decl.type_ref, decl.nillable);
            }
        }
    }

    fn match_ordered(
        &mut self,
        particle: &Particle,
        children: &[Node],
        node: Node<'_, '_>,
        owner: &QName,
    ) {
        match consume_particle(particle, children, 0) {
            Ok(end) if end == children.len() => {}
            Ok(end) => {
                self.report_error(
                    children[end],
                    format!(
                        "unexpected element '{}' in element '{}'",
                        qname_of(children[end]),
                        owner
                    ),
                );
            }
            Err(failure) => {
                let expected = describe_expected(&failure.expected);
                if failure.at < children.len() {
                    self.report_error(
                        children[failure.at],
                        format!(
                            "invalid content in element '{}': found '{}' where {} is expected",
                            owner,
                            qname_of(children[failure.at]),
                            expected
                        ),
                    );
                } else {
                    self.report_error(
                        node,
                        format!(
                            "the content of element '{}' is not complete: {} is expected",
                            owner, expected
                        ),
                    );
                }
            }
        }
    }

    fn match_all(
        &mut self,
        particle: &Particle,
        members: &[Particle],
        children: &[Node],
        owner: &QName,
    ) {
        let mut counts: BTreeMap<QName, u32> = BTreeMap::new();
        for child in children {
            let name = qname_of(*child);
            let member = members.iter().find(|m| match &m.term {
                Term::Element(e) => e.name == name,
                _ => false,
            });
            match member {
                Some(_) => {
                    let count = counts.entry(name.clone()).or_insert(0);
                    *count += 1;
                    if *count > 1 {
                        self.report_error(
                            *child,
                            format!(
                                "element '{}' appears more than once in element '{}'",
                                name, owner
                            ),
                        );
                    }
                }
                None => {
                    self.report_error(
                        *child,
                        format!("unexpected element '{}' in element '{}'", name, owner),
                    );
                }
            }
        }

        // An absent optional all-group leaves nothing to require
        if children.is_empty() && particle.min_occurs == 0 {
            return;
        }
        for member in members {
            if member.min_occurs == 0 {
                continue;
            }
            if let Term::Element(e) = &member.term {
                if !counts.contains_key(&e.name) {
                    self.report_error_at_owner(
                        owner,
                        format!(
                            "element '{}' is missing required element '{}'",
                            owner, e.name
                        ),
                    );
                }
            }
        }
    }

    fn check_attributes(
        &mut self,
        node: Node<'_, '_>,
        declared: &[AttributeDecl],
        element_name: &QName,
    ) {
        for decl in declared {
            let value = attribute_value(node, &decl.name);
            match (decl.usage, value) {
                (AttributeUse::Prohibited, Some(_)) => {
                    self.report_error(
                        node,
                        format!(
                            "attribute '{}' is prohibited on element '{}'",
                            decl.name, element_name
                        ),
                    );
                }
                (AttributeUse::Required, None) => {
                    self.report_error(
                        node,
                        format!(
                            "required attribute '{}' is missing on element '{}'",
                            decl.name, element_name
                        ),
                    );
                }
                (_, Some(value)) => {
                    self.check_attribute_value(node, decl, value, element_name);
                }
                (_, None) => {}
            }
        }

        for attr in node.attributes() {
            let namespace = attr.namespace().unwrap_or("");
            if namespace == XSI_NAMESPACE {
                if attr.name() == "type" {
                    self.report_warning(
                        node,
                        format!(
                            "attribute xsi:type on element '{}' is not supported and was ignored",
                            element_name
                        ),
                    );
                }
                // nil is handled with the element, the location hints are
                // the locator's concern
                continue;
            }
            let name = QName::new(namespace, attr.name());
            if declared.iter().any(|d| d.name == name) {
                continue;
            }
            if !namespace.is_empty() && !self.schema.covers_namespace(namespace) {
                self.report_warning(
                    node,
                    format!(
                        "attribute '{}' on element '{}' is outside the schema's namespaces and was not checked",
                        name, element_name
                    ),
                );
            } else {
                self.report_error(
                    node,
                    format!(
                        "attribute '{}' is not declared for element '{}'",
                        name, element_name
                    ),
                );
            }
        }
    }

    fn check_attribute_value(
        &mut self,
        node: Node<'_, '_>,
        decl: &AttributeDecl,
        value: &str,
        element_name: &QName,
    ) {
        let Some(simple) = self.resolved_simple(&decl.type_ref) else {
            return;
        };
        if let Err(details) = simple.check_value(value) {
            self.report_error(
                node,
                format!(
                    "attribute '{}' of element '{}': {}",
                    decl.name, element_name, details
                ),
            );
        }
        if let Some(fixed) = &decl.fixed {
            let normalized = if simple.primitive.collapses_whitespace() {
                value.trim()
            } else {
                value
            };
            if normalized != fixed {
                self.report_error(
                    node,
                    format!(
                        "attribute '{}' of element '{}' must have the fixed value '{}', found '{}'",
                        decl.name, element_name, fixed, normalized
                    ),
                );
            }
        }
    }

    /// Resolve a type reference that linking constrained to a simple type.
    /// anyType and anySimpleType admit every value, so they resolve to None.
    fn resolved_simple(&self, type_ref: &TypeRef) -> Option<SimpleType> {
        match self.schema.view(type_ref)? {
            TypeView::Builtin(PrimitiveType::AnyType | PrimitiveType::AnySimpleType) => None,
            TypeView::Builtin(primitive) => Some(SimpleType {
                primitive,
                facets: Facets::default(),
            }),
            TypeView::Def(TypeDef::Simple(simple)) => Some(simple.clone()),
            TypeView::Def(TypeDef::Complex(_)) => None,
        }
    }

    fn check_text(&mut self, node: Node<'_, '_>, simple: &SimpleType, name: &QName) {
        let text = text_content(node);
        if let Err(details) = simple.check_value(&text) {
            self.report_error(node, format!("element '{}': {}", name, details));
        }
    }

    fn reject_child_elements(&mut self, node: Node<'_, '_>, name: &QName) {
        for child in node.children().filter(|n| n.is_element()) {
            self.report_error(
                child,
                format!(
                    "element '{}' is not allowed inside '{}', which has simple content",
                    qname_of(child),
                    name
                ),
            );
        }
    }

    fn nil_state(&mut self, node: Node<'_, '_>, name: &QName, nillable: bool) -> bool {
        let Some(value) = node.attribute((XSI_NAMESPACE, "nil")) else {
            return false;
        };
        let value = value.trim();
        let is_true = value == "true" || value == "1";
        if !is_true && value != "false" && value != "0" {
            self.report_error(
                node,
                format!("xsi:nil value '{}' is not a valid boolean", value),
            );
            return false;
        }
        if is_true && !nillable {
            self.report_error(
                node,
                format!("element '{}' is not nillable", name),
            );
            return false;
        }
        is_true
    }

    fn require_nil_empty(&mut self, node: Node<'_, '_>, name: &QName) {
        let has_elements = node.children().any(|n| n.is_element());
        if has_elements || has_significant_text(node) {
            self.report_error(
                node,
                format!(
                    "element '{}' carries xsi:nil=\"true\" and must be empty",
                    name
                ),
            );
        }
    }

    fn report_error(&mut self, node: Node<'_, '_>, message: String) {
        let (line, column) = position_of(node);
        self.sink
            .error(Violation::error(&self.document, message).at(line, column));
    }

    fn report_warning(&mut self, node: Node<'_, '_>, message: String) {
        let (line, column) = position_of(node);
        self.sink
            .warning(Violation::warning(&self.document, message).at(line, column));
    }

    /// For violations with no better anchor than the owning element; the
    /// caller has already moved past the owner's node
    fn report_error_at_owner(&mut self, _owner: &QName, message: String) {
        self.sink.error(Violation::error(&self.document, message));
    }
}

// ---------------------------------------------------------------------------
// Content-model matching

/// Where ordered matching gave up and what could have continued it
struct ContentFailure {
    at: usize,
    expected: Vec<QName>,
}

/// Match one particle starting at `pos`, honoring its occurrence bounds.
/// Matching is greedy and never backtracks.
fn consume_particle(
    particle: &Particle,
    children: &[Node],
    mut pos: usize,
) -> Result<usize, ContentFailure> {
    let mut count: u32 = 0;
    let mut failure: Option<ContentFailure> = None;
    loop {
        if !particle.max_occurs.admits(count + 1) {
            break;
        }
        match try_term(&particle.term, children, pos) {
            Ok(next) => {
                if next == pos {
                    // A zero-width match satisfies any remaining occurrences
                    count = count.max(particle.min_occurs);
                    break;
                }
                pos = next;
                count += 1;
            }
            Err(f) => {
                failure = Some(f);
                break;
            }
        }
    }
    if count < particle.min_occurs {
        Err(failure.unwrap_or_else(|| ContentFailure {
            at: pos,
            expected: first_set(&particle.term),
        }))
    } else {
        Ok(pos)
    }
}

fn try_term(term: &Term, children: &[Node], pos: usize) -> Result<usize, ContentFailure> {
    match term {
        Term::Element(element) => match children.get(pos) {
            Some(child) if qname_of(*child) == element.name => Ok(pos + 1),
            _ => Err(ContentFailure {
                at: pos,
                expected: vec![element.name.clone()],
            }),
        },
        Term::Sequence(items) => {
            let mut cursor = pos;
            for item in items {
                cursor = consume_particle(item, children, cursor)?;
            }
            Ok(cursor)
        }
        Term::Choice(items) => {
            let mut best: Option<ContentFailure> = None;
            for item in items {
                match consume_particle(item, children, pos) {
                    Ok(next) => return Ok(next),
                    Err(f) => {
                        best = Some(match best {
                            None => f,
                            Some(b) if f.at > b.at => f,
                            Some(mut b) => {
                                if f.at == b.at {
                                    for name in f.expected {
                                        if !b.expected.contains(&name) {
                                            b.expected.push(name);
                                        }
                                    }
                                }
                                b
                            }
                        });
                    }
                }
            }
            Err(best.unwrap_or_else(|| ContentFailure {
                at: pos,
                expected: Vec::new(),
            }))
        }
        // xs:all is matched order-free by the walker, never through here
        Term::All(_) => Ok(pos),
    }
}

/// The element names a term can start with, for diagnostics
fn first_set(term: &Term) -> Vec<QName> {
    let mut names = Vec::new();
    collect_first_set(term, &mut names);
    names
}

fn collect_first_set(term: &Term, names: &mut Vec<QName>) {
    match term {
        Term::Element(e) => {
            if !names.contains(&e.name) {
                names.push(e.name.clone());
            }
        }
        Term::Sequence(items) => {
            for item in items {
                collect_first_set(&item.term, names);
                if item.min_occurs > 0 {
                    break;
                }
            }
        }
        Term::Choice(items) | Term::All(items) => {
            for item in items {
                collect_first_set(&item.term, names);
            }
        }
    }
}

fn describe_expected(expected: &[QName]) -> String {
    if expected.is_empty() {
        return "no further content".to_string();
    }
    expected
        .iter()
        .map(|name| format!("'{}'", name))
        .collect::<Vec<_>>()
        .join(" or ")
}

fn element_index<'p>(particle: &'p Particle, index: &mut BTreeMap<QName, &'p LocalElement>) {
    match &particle.term {
        Term::Element(element) => {
            index.entry(element.name.clone()).or_insert(element);
        }
        Term::Sequence(items) | Term::Choice(items) | Term::All(items) => {
            for item in items {
                element_index(item, index);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Node helpers

fn qname_of(node: Node<'_, '_>) -> QName {
    QName::new(
        node.tag_name().namespace().unwrap_or(""),
        node.tag_name().name(),
    )
}

fn attribute_value<'a>(node: Node<'a, 'a>, name: &QName) -> Option<&'a str> {
    if name.namespace.is_empty() {
        node.attribute(name.local.as_str())
    } else {
        node.attribute((name.namespace.as_str(), name.local.as_str()))
    }
}

fn text_content(node: Node<'_, '_>) -> String {
    node.children()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

fn has_significant_text(node: Node<'_, '_>) -> bool {
    first_significant_text(node).is_some()
}

fn first_significant_text<'a>(node: Node<'a, 'a>) -> Option<Node<'a, 'a>> {
    node.children()
        .filter(|n| n.is_text())
        .find(|n| n.text().is_some_and(|t| !t.trim().is_empty()))
}

fn position_of(node: Node<'_, '_>) -> (u32, u32) {
    let pos = node.document().text_pos_at(node.range().start);
    (pos.row, pos.col)
}

fn position_of_byte(bytes: &[u8], offset: usize) -> (u32, u32) {
    let prefix = &bytes[..offset.min(bytes.len())];
    let line = prefix.iter().filter(|b| **b == b'\n').count() as u32 + 1;
    let column = match prefix.iter().rposition(|b| *b == b'\n') {
        Some(last) => (offset - last) as u32,
        None => offset as u32 + 1,
    };
    (line, column)
}
