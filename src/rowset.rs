//! Rowsets and the operations layered on them.
//!
//! Rows are immutable and shared behind `Arc`, so an [`IndexedRowset`] or a
//! [`GroupedRowset`] only adds a mapping on top of the rows it was built from.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RowsetError, RowsetResult};
use crate::response::{Node, Scalar, Value};

/// One row of a rowset; values line up with the rowset's columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Scalar>,
    children: Node,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, mut values: Vec<Scalar>, children: Node) -> Self {
        values.resize(columns.len(), Scalar::Text(String::new()));
        Self {
            columns,
            values,
            children,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    pub fn int(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Scalar::as_i64)
    }

    pub fn float(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Scalar::as_f64)
    }

    pub fn bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(Scalar::as_bool)
    }

    pub fn timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        self.get(column).and_then(Scalar::as_timestamp)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Scalar::as_str)
    }

    /// Nested element inside the row, e.g. a per-row rowset
    pub fn child(&self, name: &str) -> Option<&Value> {
        self.children.get(name)
    }

    pub fn children(&self) -> &Node {
        &self.children
    }
}

/// Outcome of a lookup that was given a caller-supplied default
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'a, T, D> {
    Found(&'a T),
    Default(D),
}

impl<'a, T, D> Lookup<'a, T, D> {
    pub fn found(&self) -> Option<&'a T> {
        match self {
            Lookup::Found(value) => Some(*value),
            Lookup::Default(_) => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn into_default(self) -> Option<D> {
        match self {
            Lookup::Found(_) => None,
            Lookup::Default(default) => Some(default),
        }
    }
}

/// Ordered, homogeneous collection of rows sharing one column schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rowset {
    name: String,
    columns: Arc<[String]>,
    rows: Vec<Arc<Row>>,
}

impl Rowset {
    pub(crate) fn new(name: String, columns: Arc<[String]>, rows: Vec<Arc<Row>>) -> Self {
        Self {
            name,
            columns,
            rows,
        }
    }

    /// Build a rowset from raw values; short rows are padded with empty text
    pub fn from_rows(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Scalar>>,
    ) -> Self {
        let columns: Arc<[String]> = columns.into();
        let rows = rows
            .into_iter()
            .map(|values| Arc::new(Row::new(columns.clone(), values, Node::new())))
            .collect();
        Self::new(name.into(), columns, rows)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Arc<Row>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().map(|r| r.as_ref())
    }

    fn column_index(&self, column: &str) -> RowsetResult<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| RowsetError::UnknownColumn {
                column: column.to_string(),
            })
    }

    /// Project the requested columns, row by row, as borrowed tuples
    pub fn select(&self, columns: &[&str]) -> RowsetResult<Select<'_>> {
        let positions = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<RowsetResult<Vec<_>>>()?;
        Ok(Select {
            rows: self.rows.iter(),
            positions,
        })
    }

    /// Single-column projection
    pub fn column(&self, column: &str) -> RowsetResult<impl Iterator<Item = &Scalar>> {
        let i = self.column_index(column)?;
        Ok(self.rows.iter().map(move |r| &r.values[i]))
    }

    /// Stable in-place sort by a column's natural ordering
    pub fn sort_by(&mut self, column: &str, reverse: bool) -> RowsetResult<&mut Self> {
        let i = self.column_index(column)?;
        self.rows.sort_by(|a, b| {
            let ord = a.values[i].natural_cmp(&b.values[i]);
            if reverse { ord.reverse() } else { ord }
        });
        Ok(self)
    }

    /// Sorted copy; the receiver keeps its order
    pub fn sorted_by(&self, column: &str, reverse: bool) -> RowsetResult<Rowset> {
        let mut sorted = self.clone();
        sorted.sort_by(column, reverse)?;
        Ok(sorted)
    }

    /// Fresh key to row index over a column. Later rows win on duplicate keys.
    pub fn indexed_by(&self, column: &str) -> RowsetResult<IndexedRowset> {
        self.column_index(column)?;
        Ok(IndexedRowset::build(self.clone(), vec![column.to_string()]))
    }

    /// Partition rows by a column's distinct values, keeping row order
    pub fn grouped_by(&self, column: &str) -> RowsetResult<GroupedRowset> {
        let i = self.column_index(column)?;
        let mut groups: Vec<(Scalar, Vec<Arc<Row>>)> = Vec::new();
        let mut positions: HashMap<Scalar, usize> = HashMap::new();

        for row in &self.rows {
            let key = &row.values[i];
            match positions.get(key) {
                Some(&pos) => groups[pos].1.push(row.clone()),
                None => {
                    positions.insert(key.clone(), groups.len());
                    groups.push((key.clone(), vec![row.clone()]));
                }
            }
        }

        let groups = groups
            .into_iter()
            .map(|(key, rows)| {
                (
                    key,
                    Rowset::new(self.name.clone(), self.columns.clone(), rows),
                )
            })
            .collect();

        Ok(GroupedRowset {
            column: column.to_string(),
            groups,
            positions,
        })
    }
}

impl<'a> IntoIterator for &'a Rowset {
    type Item = &'a Row;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, Arc<Row>>, fn(&'a Arc<Row>) -> &'a Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows
            .iter()
            .map(unwrap_row as fn(&'a Arc<Row>) -> &'a Row)
    }
}

fn unwrap_row(row: &Arc<Row>) -> &Row {
    row
}

/// Lazy projection over a rowset. Yields one tuple per row and nothing else.
pub struct Select<'a> {
    rows: std::slice::Iter<'a, Arc<Row>>,
    positions: Vec<usize>,
}

impl<'a> Iterator for Select<'a> {
    type Item = Vec<&'a Scalar>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(self.positions.iter().map(|&i| &row.values[i]).collect())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for Select<'_> {}

fn format_key(key: &[Scalar]) -> String {
    key.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// A rowset plus a key to row index built in a single pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "IndexedRowsetRepr", into = "IndexedRowsetRepr")]
pub struct IndexedRowset {
    rowset: Rowset,
    key: Vec<String>,
    index: HashMap<Vec<Scalar>, Arc<Row>>,
}

#[derive(Serialize, Deserialize)]
struct IndexedRowsetRepr {
    rowset: Rowset,
    key: Vec<String>,
}

impl From<IndexedRowsetRepr> for IndexedRowset {
    fn from(repr: IndexedRowsetRepr) -> Self {
        IndexedRowset::build(repr.rowset, repr.key)
    }
}

impl From<IndexedRowset> for IndexedRowsetRepr {
    fn from(indexed: IndexedRowset) -> Self {
        IndexedRowsetRepr {
            rowset: indexed.rowset,
            key: indexed.key,
        }
    }
}

impl IndexedRowset {
    /// Index rows in document order; a duplicate key overwrites the earlier row
    pub(crate) fn build(rowset: Rowset, key: Vec<String>) -> Self {
        let positions: Vec<Option<usize>> = key
            .iter()
            .map(|k| rowset.columns.iter().position(|c| c == k))
            .collect();

        let mut index = HashMap::with_capacity(rowset.rows.len());
        for row in &rowset.rows {
            let key_values = positions
                .iter()
                .map(|p| match p {
                    Some(i) => row.values[*i].clone(),
                    None => Scalar::Text(String::new()),
                })
                .collect();
            index.insert(key_values, row.clone());
        }

        Self { rowset, key, index }
    }

    pub fn rowset(&self) -> &Rowset {
        &self.rowset
    }

    /// In-place reordering does not disturb the index
    pub fn rowset_mut(&mut self) -> &mut Rowset {
        &mut self.rowset
    }

    pub fn into_rowset(self) -> Rowset {
        self.rowset
    }

    pub fn key(&self) -> &[String] {
        &self.key
    }

    pub fn sort_by(&mut self, column: &str, reverse: bool) -> RowsetResult<&mut Self> {
        self.rowset.sort_by(column, reverse)?;
        Ok(self)
    }

    pub fn contains_key(&self, key: impl Into<Scalar>) -> bool {
        self.index.contains_key(&vec![key.into()])
    }

    pub fn get(&self, key: impl Into<Scalar>) -> RowsetResult<&Row> {
        self.get_composite(&[key.into()])
    }

    /// Lookup for rowsets declaring several key columns
    pub fn get_composite(&self, key: &[Scalar]) -> RowsetResult<&Row> {
        self.index
            .get(key)
            .map(|r| r.as_ref())
            .ok_or_else(|| RowsetError::KeyNotFound {
                key: format_key(key),
            })
    }

    pub fn get_or<D>(&self, key: impl Into<Scalar>, default: D) -> Lookup<'_, Row, D> {
        match self.index.get([key.into()].as_slice()) {
            Some(row) => Lookup::Found(row.as_ref()),
            None => Lookup::Default(default),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &[Scalar]> {
        self.index.keys().map(|k| k.as_slice())
    }
}

impl Deref for IndexedRowset {
    type Target = Rowset;

    fn deref(&self) -> &Rowset {
        &self.rowset
    }
}

/// Rows partitioned by the distinct values of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GroupedRowsetRepr", into = "GroupedRowsetRepr")]
pub struct GroupedRowset {
    column: String,
    groups: Vec<(Scalar, Rowset)>,
    positions: HashMap<Scalar, usize>,
}

#[derive(Serialize, Deserialize)]
struct GroupedRowsetRepr {
    column: String,
    groups: Vec<(Scalar, Rowset)>,
}

impl From<GroupedRowsetRepr> for GroupedRowset {
    fn from(repr: GroupedRowsetRepr) -> Self {
        let positions = repr
            .groups
            .iter()
            .enumerate()
            .map(|(pos, (key, _))| (key.clone(), pos))
            .collect();
        GroupedRowset {
            column: repr.column,
            groups: repr.groups,
            positions,
        }
    }
}

impl From<GroupedRowset> for GroupedRowsetRepr {
    fn from(grouped: GroupedRowset) -> Self {
        GroupedRowsetRepr {
            column: grouped.column,
            groups: grouped.groups,
        }
    }
}

impl GroupedRowset {
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn contains_key(&self, key: impl Into<Scalar>) -> bool {
        self.positions.contains_key(&key.into())
    }

    pub fn get(&self, key: impl Into<Scalar>) -> RowsetResult<&Rowset> {
        let key = key.into();
        self.positions
            .get(&key)
            .map(|&pos| &self.groups[pos].1)
            .ok_or_else(|| RowsetError::KeyNotFound {
                key: key.to_string(),
            })
    }

    pub fn get_or<D>(&self, key: impl Into<Scalar>, default: D) -> Lookup<'_, Rowset, D> {
        match self.positions.get(&key.into()) {
            Some(&pos) => Lookup::Found(&self.groups[pos].1),
            None => Lookup::Default(default),
        }
    }

    /// Group keys in order of first appearance
    pub fn keys(&self) -> impl Iterator<Item = &Scalar> {
        self.groups.iter().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Scalar, &Rowset)> {
        self.groups.iter().map(|(k, r)| (k, r))
    }
}
