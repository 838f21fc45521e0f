//! Response object model.
//!
//! Turns a raw API document into a typed attribute tree. Scalars are typed by
//! trying, in order, integer, float, timestamp and boolean before falling back
//! to text. `<rowset>` elements become [`Rowset`]s, or [`IndexedRowset`]s when
//! they declare key columns.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use roxmltree::{Document as XmlDocument, Node as XmlNode};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};
use crate::rowset::{IndexedRowset, Row, Rowset};

/// Timestamp format used throughout the API
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DEFAULT_ROW_TAG: &str = "row";

/// A typed leaf value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Scalar {
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Boolean(bool),
    Text(String),
}

impl Scalar {
    /// Coerce raw text into the most specific scalar type
    ///
    /// Surrounding whitespace is ignored for the typed attempts, but text
    /// values keep it.
    pub fn parse(raw: &str) -> Self {
        let value = raw.trim();
        if let Some(int) = parse_integer(value) {
            return Scalar::Integer(int);
        }
        if let Some(float) = parse_float(value) {
            return Scalar::Float(float);
        }
        if let Some(ts) = parse_timestamp(value) {
            return Scalar::Timestamp(ts);
        }
        match value {
            "True" | "true" => Scalar::Boolean(true),
            "False" | "false" => Scalar::Boolean(false),
            _ => Scalar::Text(raw.to_string()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats, so `"0"` balances still read as numbers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            Scalar::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Boolean(v) => Some(*v),
            Scalar::Integer(0) => Some(false),
            Scalar::Integer(1) => Some(true),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Scalar::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Natural ordering: numbers numerically, text lexically, timestamps
    /// chronologically. Values of unrelated types order by type.
    pub fn natural_cmp(&self, other: &Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Integer(a), Scalar::Integer(b)) => a.cmp(b),
            (Scalar::Text(a), Scalar::Text(b)) => a.cmp(b),
            (Scalar::Timestamp(a), Scalar::Timestamp(b)) => a.cmp(b),
            (Scalar::Boolean(a), Scalar::Boolean(b)) => a.cmp(b),
            (a, b) => match (a.as_numeric(), b.as_numeric()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }

    fn as_numeric(&self) -> Option<f64> {
        match self {
            Scalar::Integer(_) | Scalar::Float(_) => self.as_f64(),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Scalar::Integer(_) | Scalar::Float(_) => 0,
            Scalar::Boolean(_) => 1,
            Scalar::Timestamp(_) => 2,
            Scalar::Text(_) => 3,
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Integer(a), Scalar::Integer(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => a.to_bits() == b.to_bits(),
            (Scalar::Timestamp(a), Scalar::Timestamp(b)) => a == b,
            (Scalar::Boolean(a), Scalar::Boolean(b)) => a == b,
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Scalar::Integer(v) => v.hash(state),
            Scalar::Float(v) => v.to_bits().hash(state),
            Scalar::Timestamp(v) => v.hash(state),
            Scalar::Boolean(v) => v.hash(state),
            Scalar::Text(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Integer(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Timestamp(v) => write!(f, "{}", v.format(TIMESTAMP_FORMAT)),
            Scalar::Boolean(v) => write!(f, "{}", v),
            Scalar::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Integer(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Integer(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Text(value)
    }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(value: DateTime<Utc>) -> Self {
        Scalar::Timestamp(value)
    }
}

fn parse_integer(value: &str) -> Option<i64> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_float(value: &str) -> Option<f64> {
    // f64::from_str accepts "inf" and "NaN", which are names here, not numbers
    let numeric = value
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E'));
    if !numeric || !value.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.len() != 19 || value.as_bytes()[10] != b' ' {
        return None;
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// A field of a [`Node`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Scalar(Scalar),
    Node(Node),
    Rowset(Rowset),
    IndexedRowset(IndexedRowset),
}

impl Value {
    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    /// The plain rowset view; indexed rowsets deref to their rows
    pub fn as_rowset(&self) -> Option<&Rowset> {
        match self {
            Value::Rowset(r) => Some(r),
            Value::IndexedRowset(r) => Some(r.rowset()),
            _ => None,
        }
    }

    pub fn as_indexed(&self) -> Option<&IndexedRowset> {
        match self {
            Value::IndexedRowset(r) => Some(r),
            _ => None,
        }
    }
}

/// Typed attribute container built from one XML element.
///
/// Field order follows the document. A repeated field name keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    fields: Vec<(String, Value)>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn scalar(&self, name: &str) -> Option<&Scalar> {
        self.get(name).and_then(Value::as_scalar)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.scalar(name).and_then(Scalar::as_i64)
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.scalar(name).and_then(Scalar::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.scalar(name).and_then(Scalar::as_bool)
    }

    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.scalar(name).and_then(Scalar::as_timestamp)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.scalar(name).and_then(Scalar::as_str)
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.get(name).and_then(Value::as_node)
    }

    pub fn rowset(&self, name: &str) -> Option<&Rowset> {
        self.get(name).and_then(Value::as_rowset)
    }

    pub fn indexed(&self, name: &str) -> Option<&IndexedRowset> {
        self.get(name).and_then(Value::as_indexed)
    }

    /// Mutable access for in-place sorting. Indexed rowsets keep their index.
    pub fn rowset_mut(&mut self, name: &str) -> Option<&mut Rowset> {
        match self.get_mut(name)? {
            Value::Rowset(r) => Some(r),
            Value::IndexedRowset(r) => Some(r.rowset_mut()),
            _ => None,
        }
    }
}

/// A parsed document: the result payload plus the server's freshness window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub version: Option<i64>,
    pub current_time: DateTime<Utc>,
    pub cached_until: DateTime<Utc>,
    pub result: Node,
}

impl Document {
    /// Seconds the server allows this document to be reused, by its own clock
    pub fn cache_window(&self) -> chrono::Duration {
        self.cached_until - self.current_time
    }
}

/// Result of a successful call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub document: Document,
    /// Whether the document was replayed from the cache store
    pub from_cache: bool,
}

impl Response {
    pub fn current_time(&self) -> DateTime<Utc> {
        self.document.current_time
    }

    pub fn cached_until(&self) -> DateTime<Utc> {
        self.document.cached_until
    }

    pub fn result(&self) -> &Node {
        &self.document.result
    }

    pub fn into_result(self) -> Node {
        self.document.result
    }
}

impl Deref for Response {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.document.result
    }
}

/// Parse a raw API document.
///
/// An `<error>` element at the top level short-circuits into an [`ApiError`].
pub fn parse(raw: &str) -> Result<Document> {
    let xml = XmlDocument::parse(raw)?;
    let root = xml.root_element();

    if let Some(error) = declared_error(root) {
        return Err(error);
    }

    let current_time = child_element(root, "currentTime")
        .and_then(|e| parse_timestamp(element_text(e).trim()))
        .ok_or_else(|| ApiError::server(0, "Malformed document: missing currentTime"))?;
    let cached_until = child_element(root, "cachedUntil")
        .and_then(|e| parse_timestamp(element_text(e).trim()))
        .unwrap_or(current_time);
    let result = match child_element(root, "result") {
        Some(element) => element_to_node(element),
        None => Node::new(),
    };

    Ok(Document {
        version: root.attribute("version").and_then(parse_integer),
        current_time,
        cached_until,
        result,
    })
}

/// The error declared by a document, if it is an API error document
pub fn find_error(raw: &str) -> Option<ApiError> {
    let xml = XmlDocument::parse(raw).ok()?;
    declared_error(xml.root_element())
}

fn declared_error(root: XmlNode<'_, '_>) -> Option<ApiError> {
    if root.has_tag_name("error") {
        return Some(error_from_element(root));
    }
    child_element(root, "error").map(error_from_element)
}

fn error_from_element(element: XmlNode<'_, '_>) -> ApiError {
    let code = element
        .attribute("code")
        .and_then(parse_integer)
        .unwrap_or(0);
    ApiError::from_api_code(code, element_text(element).trim())
}

fn child_element<'a, 'input>(
    parent: XmlNode<'a, 'input>,
    name: &str,
) -> Option<XmlNode<'a, 'input>> {
    parent
        .children()
        .find(|c| c.is_element() && c.has_tag_name(name))
}

fn element_text(element: XmlNode<'_, '_>) -> String {
    element
        .children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect()
}

fn has_element_children(element: XmlNode<'_, '_>) -> bool {
    element.children().any(|c| c.is_element())
}

/// Attributes become scalar fields, children become fields named by tag
fn element_to_node(element: XmlNode<'_, '_>) -> Node {
    let mut node = Node::new();
    for attr in element.attributes() {
        node.insert(attr.name(), Value::Scalar(Scalar::parse(attr.value())));
    }
    for child in element.children().filter(|c| c.is_element()) {
        let (name, value) = element_to_field(child);
        node.insert(name, value);
    }
    node
}

fn element_to_field(element: XmlNode<'_, '_>) -> (String, Value) {
    if element.has_tag_name("rowset") {
        let name = element.attribute("name").unwrap_or("rowset").to_string();
        return (name, rowset_from_element(element));
    }

    let name = element.tag_name().name().to_string();
    if element.attributes().next().is_none() && !has_element_children(element) {
        return (name, Value::Scalar(Scalar::parse(&element_text(element))));
    }
    (name, Value::Node(element_to_node(element)))
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn rowset_from_element(element: XmlNode<'_, '_>) -> Value {
    let name = element.attribute("name").unwrap_or_default().to_string();
    let row_tag = element.attribute("row").unwrap_or(DEFAULT_ROW_TAG);
    let key = split_list(element.attribute("key"));
    let mut columns = split_list(element.attribute("columns"));

    let row_elements: Vec<_> = element
        .children()
        .filter(|c| c.is_element() && c.has_tag_name(row_tag))
        .collect();

    // Undeclared attributes extend the shared schema in first-seen order
    for row in &row_elements {
        for attr in row.attributes() {
            if !columns.iter().any(|c| c == attr.name()) {
                columns.push(attr.name().to_string());
            }
        }
    }
    let columns: Arc<[String]> = columns.into();

    let rows = row_elements
        .iter()
        .map(|row| {
            let values = columns
                .iter()
                .map(|col| Scalar::parse(row.attribute(col.as_str()).unwrap_or_default()))
                .collect();
            let mut children = Node::new();
            for child in row.children().filter(|c| c.is_element()) {
                let (name, value) = element_to_field(child);
                children.insert(name, value);
            }
            Arc::new(Row::new(columns.clone(), values, children))
        })
        .collect();

    let rowset = Rowset::new(name, columns, rows);
    if key.is_empty() {
        Value::Rowset(rowset)
    } else {
        Value::IndexedRowset(IndexedRowset::build(rowset, key))
    }
}
