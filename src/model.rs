//! Immutable compiled-schema model.
//!
//! A `CompiledSchema` is the output of the compiler: every global declaration
//! from the root schema and its transitive includes/imports, fully linked.
//! It is cheap to share (`Arc`) and safe to use from many validation passes
//! at once.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

/// The XML Schema namespace
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// The XML Schema instance namespace (xsi:)
pub const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// The xml: namespace
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Namespace-qualified name. An empty namespace means "no namespace".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QName {
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        QName {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    pub fn unqualified(local: impl Into<String>) -> Self {
        QName {
            namespace: String::new(),
            local: local.into(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// Upper occurrence bound of a particle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxOccurs {
    Bounded(u32),
    Unbounded,
}

impl MaxOccurs {
    /// Whether `count` occurrences stay within the bound
    pub fn admits(&self, count: u32) -> bool {
        match self {
            MaxOccurs::Bounded(n) => count <= *n,
            MaxOccurs::Unbounded => true,
        }
    }
}

impl fmt::Display for MaxOccurs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxOccurs::Bounded(n) => write!(f, "{}", n),
            MaxOccurs::Unbounded => write!(f, "unbounded"),
        }
    }
}

/// A content-model particle: a term plus its occurrence bounds
#[derive(Debug, Clone)]
pub struct Particle {
    pub term: Term,
    pub min_occurs: u32,
    pub max_occurs: MaxOccurs,
}

impl Particle {
    pub fn required(term: Term) -> Self {
        Particle {
            term,
            min_occurs: 1,
            max_occurs: MaxOccurs::Bounded(1),
        }
    }
}

/// The term of a particle
#[derive(Debug, Clone)]
pub enum Term {
    Element(LocalElement),
    Sequence(Vec<Particle>),
    Choice(Vec<Particle>),
    /// xs:all group; member particles are always elements
    All(Vec<Particle>),
}

/// An element use inside a content model, with its name already qualified
/// according to elementFormDefault
#[derive(Debug, Clone)]
pub struct LocalElement {
    pub name: QName,
    pub type_ref: TypeRef,
    /// Whether instances may carry xsi:nil="true"
    pub nillable: bool,
}

/// Reference to a type definition
#[derive(Debug, Clone)]
pub enum TypeRef {
    /// One of the built-in xs: types
    Builtin(PrimitiveType),
    /// A named type; linking guarantees the name exists in the schema's
    /// type table
    Named(QName),
    /// An anonymous type declared inline
    Inline(Box<TypeDef>),
}

/// A global or inline type definition
#[derive(Debug, Clone)]
pub enum TypeDef {
    Simple(SimpleType),
    Complex(ComplexType),
}

/// How an attribute use is constrained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeUse {
    Optional,
    Required,
    Prohibited,
}

/// An attribute declaration (global or local)
#[derive(Debug, Clone)]
pub struct AttributeDecl {
    pub name: QName,
    pub type_ref: TypeRef,
    pub usage: AttributeUse,
    /// Value constrained by xs:attribute/@fixed, when present
    pub fixed: Option<String>,
}

/// A complex type: a content model plus attribute uses
#[derive(Debug, Clone)]
pub struct ComplexType {
    pub content: ContentModel,
    pub attributes: Vec<AttributeDecl>,
}

/// Content model of a complex type
#[derive(Debug, Clone)]
pub enum ContentModel {
    /// No character or element content allowed
    Empty,
    /// Character content only, checked against a simple type
    Simple(TypeRef),
    /// Element content only; non-whitespace text is a violation
    ElementOnly(Particle),
    /// Element content with interleaved character data
    Mixed(Particle),
}

/// A simple type flattened to its primitive plus the merged facets of its
/// restriction chain
#[derive(Debug, Clone)]
pub struct SimpleType {
    pub primitive: PrimitiveType,
    pub facets: Facets,
}

impl SimpleType {
    /// Check a lexical value against the primitive value space and all facets
    pub fn check_value(&self, value: &str) -> Result<(), String> {
        let normalized = if self.primitive.collapses_whitespace() {
            value.trim()
        } else {
            value
        };
        self.primitive.check(normalized)?;
        self.facets.check(normalized, self.primitive)
    }
}

/// A compiled xs:pattern facet. The regex is anchored so the pattern must
/// match the whole value.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub source: String,
    pub regex: Regex,
}

impl Pattern {
    pub fn compile(source: &str) -> Result<Self, String> {
        let anchored = format!("^(?:{})$", source);
        let regex = Regex::new(&anchored).map_err(|e| e.to_string())?;
        Ok(Pattern {
            source: source.to_string(),
            regex,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

/// Constraining facets merged over a restriction chain
#[derive(Debug, Clone, Default)]
pub struct Facets {
    pub enumeration: Option<Vec<String>>,
    pub pattern: Option<Pattern>,
    pub length: Option<u32>,
    pub min_length: Option<u32>,
    pub max_length: Option<u32>,
    pub min_inclusive: Option<String>,
    pub max_inclusive: Option<String>,
    pub min_exclusive: Option<String>,
    pub max_exclusive: Option<String>,
}

impl Facets {
    pub fn is_empty(&self) -> bool {
        self.enumeration.is_none()
            && self.pattern.is_none()
            && self.length.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.min_inclusive.is_none()
            && self.max_inclusive.is_none()
            && self.min_exclusive.is_none()
            && self.max_exclusive.is_none()
    }

    /// Whether any range facet is present
    pub fn has_range(&self) -> bool {
        self.min_inclusive.is_some()
            || self.max_inclusive.is_some()
            || self.min_exclusive.is_some()
            || self.max_exclusive.is_some()
    }

    /// Check a normalized value against every facet
    pub fn check(&self, value: &str, primitive: PrimitiveType) -> Result<(), String> {
        if let Some(ref values) = self.enumeration {
            if !values.iter().any(|v| v == value) {
                return Err(format!(
                    "value '{}' is not one of the enumerated values [{}]",
                    value,
                    values.join(", ")
                ));
            }
        }

        if let Some(ref pattern) = self.pattern {
            if !pattern.matches(value) {
                return Err(format!(
                    "value '{}' does not match pattern '{}'",
                    value, pattern.source
                ));
            }
        }

        let char_count = value.chars().count() as u32;
        if let Some(length) = self.length {
            if char_count != length {
                return Err(format!(
                    "value '{}' has length {} but exactly {} is required",
                    value, char_count, length
                ));
            }
        }
        if let Some(min) = self.min_length {
            if char_count < min {
                return Err(format!(
                    "value '{}' has length {} but at least {} is required",
                    value, char_count, min
                ));
            }
        }
        if let Some(max) = self.max_length {
            if char_count > max {
                return Err(format!(
                    "value '{}' has length {} but at most {} is allowed",
                    value, char_count, max
                ));
            }
        }

        if self.has_range() {
            self.check_range(value, primitive)?;
        }

        Ok(())
    }

    fn check_range(&self, value: &str, primitive: PrimitiveType) -> Result<(), String> {
        let bound_err = |facet: &str, bound: &str, relation: &str| {
            format!(
                "value '{}' violates facet {}: must be {} {}",
                value, facet, relation, bound
            )
        };

        if primitive.is_integer() {
            let actual = parse_integer(value)?;
            if let Some(ref bound) = self.min_inclusive {
                if actual < parse_integer(bound)? {
                    return Err(bound_err("minInclusive", bound, ">="));
                }
            }
            if let Some(ref bound) = self.max_inclusive {
                if actual > parse_integer(bound)? {
                    return Err(bound_err("maxInclusive", bound, "<="));
                }
            }
            if let Some(ref bound) = self.min_exclusive {
                if actual <= parse_integer(bound)? {
                    return Err(bound_err("minExclusive", bound, ">"));
                }
            }
            if let Some(ref bound) = self.max_exclusive {
                if actual >= parse_integer(bound)? {
                    return Err(bound_err("maxExclusive", bound, "<"));
                }
            }
            return Ok(());
        }

        if primitive.is_fractional() {
            let actual = parse_fractional(value)?;
            if let Some(ref bound) = self.min_inclusive {
                if actual < parse_fractional(bound)? {
                    return Err(bound_err("minInclusive", bound, ">="));
                }
            }
            if let Some(ref bound) = self.max_inclusive {
                if actual > parse_fractional(bound)? {
                    return Err(bound_err("maxInclusive", bound, "<="));
                }
            }
            if let Some(ref bound) = self.min_exclusive {
                if actual <= parse_fractional(bound)? {
                    return Err(bound_err("minExclusive", bound, ">"));
                }
            }
            if let Some(ref bound) = self.max_exclusive {
                if actual >= parse_fractional(bound)? {
                    return Err(bound_err("maxExclusive", bound, "<"));
                }
            }
            return Ok(());
        }

        if primitive == PrimitiveType::Date {
            let actual = parse_date(value)?;
            if let Some(ref bound) = self.min_inclusive {
                if actual < parse_date(bound)? {
                    return Err(bound_err("minInclusive", bound, ">="));
                }
            }
            if let Some(ref bound) = self.max_inclusive {
                if actual > parse_date(bound)? {
                    return Err(bound_err("maxInclusive", bound, "<="));
                }
            }
            if let Some(ref bound) = self.min_exclusive {
                if actual <= parse_date(bound)? {
                    return Err(bound_err("minExclusive", bound, ">"));
                }
            }
            if let Some(ref bound) = self.max_exclusive {
                if actual >= parse_date(bound)? {
                    return Err(bound_err("maxExclusive", bound, "<"));
                }
            }
            return Ok(());
        }

        Err(format!(
            "range facets are not supported on type {}",
            primitive
        ))
    }
}

/// Built-in xs: primitive and derived types in the supported subset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    AnyType,
    AnySimpleType,
    String,
    NormalizedString,
    Token,
    AnyUri,
    Id,
    IdRef,
    NmToken,
    Language,
    Boolean,
    Decimal,
    Integer,
    Long,
    Int,
    Short,
    Byte,
    NonNegativeInteger,
    PositiveInteger,
    UnsignedLong,
    UnsignedInt,
    Double,
    Float,
    Date,
    DateTime,
    Time,
    GYear,
    GYearMonth,
}

impl PrimitiveType {
    /// Look up a built-in type by its local name in the xs: namespace
    pub fn by_name(local: &str) -> Option<Self> {
        use PrimitiveType::*;
        let ty = match local {
            "anyType" => AnyType,
            "anySimpleType" => AnySimpleType,
            "string" => String,
            "normalizedString" => NormalizedString,
            "token" => Token,
            "anyURI" => AnyUri,
            "ID" => Id,
            "IDREF" => IdRef,
            "NMTOKEN" => NmToken,
            "language" => Language,
            "boolean" => Boolean,
            "decimal" => Decimal,
            "integer" => Integer,
            "long" => Long,
            "int" => Int,
            "short" => Short,
            "byte" => Byte,
            "nonNegativeInteger" => NonNegativeInteger,
            "positiveInteger" => PositiveInteger,
            "unsignedLong" => UnsignedLong,
            "unsignedInt" => UnsignedInt,
            "double" => Double,
            "float" => Float,
            "date" => Date,
            "dateTime" => DateTime,
            "time" => Time,
            "gYear" => GYear,
            "gYearMonth" => GYearMonth,
            _ => return None,
        };
        Some(ty)
    }

    /// Local name in the xs: namespace
    pub fn local_name(&self) -> &'static str {
        use PrimitiveType::*;
        match self {
            AnyType => "anyType",
            AnySimpleType => "anySimpleType",
            String => "string",
            NormalizedString => "normalizedString",
            Token => "token",
            AnyUri => "anyURI",
            Id => "ID",
            IdRef => "IDREF",
            NmToken => "NMTOKEN",
            Language => "language",
            Boolean => "boolean",
            Decimal => "decimal",
            Integer => "integer",
            Long => "long",
            Int => "int",
            Short => "short",
            Byte => "byte",
            NonNegativeInteger => "nonNegativeInteger",
            PositiveInteger => "positiveInteger",
            UnsignedLong => "unsignedLong",
            UnsignedInt => "unsignedInt",
            Double => "double",
            Float => "float",
            Date => "date",
            DateTime => "dateTime",
            Time => "time",
            GYear => "gYear",
            GYearMonth => "gYearMonth",
        }
    }

    pub fn is_integer(&self) -> bool {
        use PrimitiveType::*;
        matches!(
            self,
            Integer
                | Long
                | Int
                | Short
                | Byte
                | NonNegativeInteger
                | PositiveInteger
                | UnsignedLong
                | UnsignedInt
        )
    }

    pub fn is_fractional(&self) -> bool {
        use PrimitiveType::*;
        matches!(self, Decimal | Double | Float)
    }

    /// Whether leading/trailing whitespace is insignificant for this type
    pub fn collapses_whitespace(&self) -> bool {
        use PrimitiveType::*;
        !matches!(self, String | NormalizedString | AnyType | AnySimpleType)
    }

    /// Check a lexical value against this type's value space
    pub fn check(&self, value: &str) -> Result<(), String> {
        use PrimitiveType::*;
        let type_err = || {
            Err(format!(
                "'{}' is not a valid value of type xs:{}",
                value,
                self.local_name()
            ))
        };

        match self {
            AnyType | AnySimpleType | String | NormalizedString | Token | AnyUri => Ok(()),
            Id | IdRef => {
                if is_ncname(value) {
                    Ok(())
                } else {
                    type_err()
                }
            }
            NmToken => {
                if !value.is_empty() && !value.contains(char::is_whitespace) {
                    Ok(())
                } else {
                    type_err()
                }
            }
            Language => {
                if is_language_tag(value) {
                    Ok(())
                } else {
                    type_err()
                }
            }
            Boolean => match value {
                "true" | "false" | "1" | "0" => Ok(()),
                _ => type_err(),
            },
            Integer => parse_integer(value).map(|_| ()).or_else(|_| type_err()),
            Long => check_integer_range(value, i64::MIN as i128, i64::MAX as i128)
                .or_else(|_| type_err()),
            Int => check_integer_range(value, i32::MIN as i128, i32::MAX as i128)
                .or_else(|_| type_err()),
            Short => check_integer_range(value, i16::MIN as i128, i16::MAX as i128)
                .or_else(|_| type_err()),
            Byte => check_integer_range(value, i8::MIN as i128, i8::MAX as i128)
                .or_else(|_| type_err()),
            NonNegativeInteger => {
                check_integer_range(value, 0, i128::MAX).or_else(|_| type_err())
            }
            PositiveInteger => check_integer_range(value, 1, i128::MAX).or_else(|_| type_err()),
            UnsignedLong => {
                check_integer_range(value, 0, u64::MAX as i128).or_else(|_| type_err())
            }
            UnsignedInt => {
                check_integer_range(value, 0, u32::MAX as i128).or_else(|_| type_err())
            }
            Decimal => parse_decimal(value).map(|_| ()).or_else(|_| type_err()),
            Double | Float => parse_floating(value).map(|_| ()).or_else(|_| type_err()),
            Date => parse_date(value).map(|_| ()).or_else(|_| type_err()),
            DateTime => parse_date_time(value).map(|_| ()).or_else(|_| type_err()),
            Time => parse_time(value).map(|_| ()).or_else(|_| type_err()),
            GYear => {
                if is_g_year(strip_timezone(value)) {
                    Ok(())
                } else {
                    type_err()
                }
            }
            GYearMonth => {
                if is_g_year_month(strip_timezone(value)) {
                    Ok(())
                } else {
                    type_err()
                }
            }
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xs:{}", self.local_name())
    }
}

/// A global element declaration
#[derive(Debug, Clone)]
pub struct ElementDecl {
    pub name: QName,
    pub type_ref: TypeRef,
    pub nillable: bool,
}

/// Borrowed view of a dereferenced type
#[derive(Debug, Clone, Copy)]
pub enum TypeView<'a> {
    Builtin(PrimitiveType),
    Def(&'a TypeDef),
}

/// The fully linked, immutable output of schema compilation.
///
/// All tables are keyed by qualified name and iterate in a stable order, so
/// two compilations of the same sources produce identical results.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    /// Path of the root schema document this was compiled from
    pub root_path: PathBuf,
    /// Every target namespace seen across root + includes + imports.
    /// A schema with no targetNamespace contributes the empty string.
    pub namespaces: BTreeSet<String>,
    pub elements: BTreeMap<QName, ElementDecl>,
    pub types: BTreeMap<QName, TypeDef>,
    pub attributes: BTreeMap<QName, AttributeDecl>,
}

impl CompiledSchema {
    pub fn element(&self, name: &QName) -> Option<&ElementDecl> {
        self.elements.get(name)
    }

    pub fn type_def(&self, name: &QName) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn attribute(&self, name: &QName) -> Option<&AttributeDecl> {
        self.attributes.get(name)
    }

    pub fn covers_namespace(&self, namespace: &str) -> bool {
        self.namespaces.contains(namespace)
    }

    /// Dereference a type reference against this schema's tables.
    ///
    /// Returns None only for a named reference absent from the type table,
    /// which linking rules out for schemas produced by the compiler.
    pub fn view<'a>(&'a self, type_ref: &'a TypeRef) -> Option<TypeView<'a>> {
        match type_ref {
            TypeRef::Builtin(p) => Some(TypeView::Builtin(*p)),
            TypeRef::Named(name) => self.types.get(name).map(TypeView::Def),
            TypeRef::Inline(def) => Some(TypeView::Def(def)),
        }
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }
}

fn parse_integer(value: &str) -> Result<i128, String> {
    let v = value.strip_prefix('+').unwrap_or(value);
    i128::from_str(v).map_err(|_| format!("'{}' is not an integer", value))
}

fn check_integer_range(value: &str, min: i128, max: i128) -> Result<(), String> {
    let n = parse_integer(value)?;
    if n < min || n > max {
        return Err(format!("'{}' is outside [{}, {}]", value, min, max));
    }
    Ok(())
}

fn parse_decimal(value: &str) -> Result<f64, String> {
    let err = || format!("'{}' is not a decimal", value);
    let v = value
        .strip_prefix('+')
        .or_else(|| value.strip_prefix('-'))
        .unwrap_or(value);
    if v.is_empty() {
        return Err(err());
    }
    let (int_part, frac_part) = match v.split_once('.') {
        Some((i, f)) => (i, f),
        None => (v, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(err());
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(err());
    }
    f64::from_str(value).map_err(|_| err())
}

fn parse_fractional(value: &str) -> Result<f64, String> {
    parse_floating(value)
}

fn parse_floating(value: &str) -> Result<f64, String> {
    match value {
        "INF" => return Ok(f64::INFINITY),
        "-INF" => return Ok(f64::NEG_INFINITY),
        "NaN" => return Ok(f64::NAN),
        _ => {}
    }
    // Rust's float grammar is wider than the XSD one (inf, infinity, nan);
    // reject the spellings XSD does not define.
    if value.chars().any(|c| c.is_ascii_alphabetic() && c != 'E' && c != 'e') {
        return Err(format!("'{}' is not a floating-point number", value));
    }
    f64::from_str(value).map_err(|_| format!("'{}' is not a floating-point number", value))
}

fn strip_timezone(value: &str) -> &str {
    if let Some(v) = value.strip_suffix('Z') {
        return v;
    }
    // +hh:mm / -hh:mm offsets; a '-' only counts when positioned as a suffix
    if value.len() > 6 {
        let (head, tail) = value.split_at(value.len() - 6);
        let bytes = tail.as_bytes();
        if (bytes[0] == b'+' || bytes[0] == b'-')
            && bytes[3] == b':'
            && tail[1..3].chars().all(|c| c.is_ascii_digit())
            && tail[4..6].chars().all(|c| c.is_ascii_digit())
        {
            return head;
        }
    }
    value
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    let v = strip_timezone(value);
    NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| format!("'{}' is not a date", value))
}

fn parse_date_time(value: &str) -> Result<NaiveDateTime, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|_| format!("'{}' is not a dateTime", value))
}

fn parse_time(value: &str) -> Result<NaiveTime, String> {
    let v = strip_timezone(value);
    NaiveTime::parse_from_str(v, "%H:%M:%S%.f").map_err(|_| format!("'{}' is not a time", value))
}

fn is_g_year(value: &str) -> bool {
    let v = value.strip_prefix('-').unwrap_or(value);
    v.len() >= 4 && v.chars().all(|c| c.is_ascii_digit())
}

fn is_g_year_month(value: &str) -> bool {
    let v = value.strip_prefix('-').unwrap_or(value);
    match v.rsplit_once('-') {
        Some((year, month)) => {
            year.len() >= 4
                && year.chars().all(|c| c.is_ascii_digit())
                && month.len() == 2
                && month.chars().all(|c| c.is_ascii_digit())
                && matches!(month.parse::<u32>(), Ok(1..=12))
        }
        None => false,
    }
}

fn is_ncname(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn is_language_tag(value: &str) -> bool {
    let mut parts = value.split('-');
    match parts.next() {
        Some(primary)
            if !primary.is_empty()
                && primary.len() <= 8
                && primary.chars().all(|c| c.is_ascii_alphabetic()) => {}
        _ => return false,
    }
    parts.all(|sub| {
        !sub.is_empty() && sub.len() <= 8 && sub.chars().all(|c| c.is_ascii_alphanumeric())
    })
}
