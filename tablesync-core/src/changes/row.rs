//! Pending rows and the borrowed views used to read and write them by name.
//!
//! A [`RowChange`] only holds slots. Name-based access goes through
//! [`RowRef`] and [`RowMut`], which borrow the owning table's schema and
//! annotation registry, so a row is never read or written detached from its
//! table.

use super::column::TableSchema;
use crate::adapters::DataRecord;
use crate::value::SqlValue;
use crate::{Result, TableSyncError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What persisting a row will do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// Not yet classified; resolved by the existence check during persist.
    #[default]
    Unknown,
    Insert,
    Update,
}

/// One pending row.
///
/// A `None` slot was never assigned; `Some(SqlValue::Null)` is an explicit
/// database null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    values: Vec<Option<SqlValue>>,
    annotations: Option<Vec<Option<SqlValue>>>,
    change_type: ChangeType,
}

impl RowChange {
    pub(crate) fn new(column_count: usize) -> Self {
        Self {
            values: vec![None; column_count],
            annotations: None,
            change_type: ChangeType::Unknown,
        }
    }

    pub const fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub const fn set_change_type(&mut self, change_type: ChangeType) {
        self.change_type = change_type;
    }

    pub fn is_unknown_change(&self) -> bool {
        self.change_type == ChangeType::Unknown
    }

    /// Value of the column at `index`, if assigned.
    pub fn value(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index).and_then(Option::as_ref)
    }

    pub fn values(&self) -> &[Option<SqlValue>] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [Option<SqlValue>] {
        &mut self.values
    }

    /// Value of the annotation at registry position `index`, if set on this row.
    pub fn annotation(&self, index: usize) -> Option<&SqlValue> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(index))
            .and_then(Option::as_ref)
    }

    fn set_annotation_at(&mut self, index: usize, value: Option<SqlValue>) {
        let annotations = self.annotations.get_or_insert_with(Vec::new);
        if annotations.len() <= index {
            annotations.resize(index + 1, None);
        }
        annotations[index] = value;
    }

    fn annotation_count(&self) -> usize {
        self.annotations.as_ref().map_or(0, Vec::len)
    }
}

/// Looks up an annotation name in a table registry, ignoring case.
pub(crate) fn annotation_position(registry: &[String], name: &str) -> Option<usize> {
    registry.iter().position(|a| a.eq_ignore_ascii_case(name))
}

/// Read access to a row together with its table's schema.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    pub(crate) row: &'a RowChange,
    pub(crate) schema: &'a TableSchema,
    pub(crate) annotations: &'a [String],
    pub(crate) position: usize,
}

impl<'a> RowRef<'a> {
    /// Position of the row in its change-set.
    pub const fn position(&self) -> usize {
        self.position
    }

    pub const fn row(&self) -> &'a RowChange {
        self.row
    }

    pub const fn change_type(&self) -> ChangeType {
        self.row.change_type
    }

    /// Value of a column by name.
    ///
    /// # Errors
    /// `UnknownColumn` when the table has no such column.
    pub fn get(&self, column: &str) -> Result<Option<&'a SqlValue>> {
        let index = self.schema.column_index(column)?;
        Ok(self.row.value(index))
    }

    /// Value of a column by position.
    pub fn get_at(&self, index: usize) -> Option<&'a SqlValue> {
        self.row.value(index)
    }

    /// Column value, else annotation value, else `None`. Never fails.
    pub fn try_get(&self, name: &str) -> Option<&'a SqlValue> {
        if let Some(index) = self.schema.try_column_index(name) {
            return self.row.value(index);
        }
        annotation_position(self.annotations, name).and_then(|index| self.row.annotation(index))
    }

    /// Value of an annotation by name.
    ///
    /// # Errors
    /// `UnknownAnnotation` when no row of the table ever set `name`.
    pub fn get_annotation(&self, name: &str) -> Result<Option<&'a SqlValue>> {
        let index = annotation_position(self.annotations, name).ok_or_else(|| {
            TableSyncError::UnknownAnnotation {
                annotation: name.to_string(),
            }
        })?;
        Ok(self.row.annotation(index))
    }

    /// Column values followed by the annotations set on this row.
    pub fn to_dictionary(&self) -> IndexMap<String, Option<SqlValue>> {
        let mut result = IndexMap::with_capacity(
            self.schema.columns.len() + self.row.annotation_count(),
        );
        for column in &self.schema.columns {
            result.insert(column.name.clone(), self.row.value(column.index).cloned());
        }
        for (index, name) in self
            .annotations
            .iter()
            .enumerate()
            .take(self.row.annotation_count())
        {
            result.insert(name.clone(), self.row.annotation(index).cloned());
        }
        result
    }
}

/// Something that can supply values for schema columns by name.
///
/// Implementations decide how names match; the provided ones ignore case.
pub trait RowSource {
    /// Value of the property called `name`, or `None` if there is no such property.
    fn property(&self, name: &str) -> Option<SqlValue>;
}

impl RowSource for serde_json::Map<String, serde_json::Value> {
    fn property(&self, name: &str) -> Option<SqlValue> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(SqlValue::from_json)
    }
}

impl RowSource for serde_json::Value {
    fn property(&self, name: &str) -> Option<SqlValue> {
        self.as_object().and_then(|object| object.property(name))
    }
}

impl RowSource for DataRecord {
    fn property(&self, name: &str) -> Option<SqlValue> {
        self.get(name).cloned()
    }
}

impl<S: std::hash::BuildHasher> RowSource for std::collections::HashMap<String, SqlValue, S> {
    fn property(&self, name: &str) -> Option<SqlValue> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .cloned()
    }
}

/// Write access to a row together with its table's schema and annotation registry.
#[derive(Debug)]
pub struct RowMut<'a> {
    pub(crate) row: &'a mut RowChange,
    pub(crate) schema: &'a TableSchema,
    pub(crate) annotations: &'a mut Vec<String>,
    pub(crate) position: usize,
}

impl RowMut<'_> {
    /// Read-only view of the same row.
    pub fn view(&self) -> RowRef<'_> {
        RowRef {
            row: self.row,
            schema: self.schema,
            annotations: self.annotations,
            position: self.position,
        }
    }

    pub const fn position(&self) -> usize {
        self.position
    }

    pub const fn change_type(&self) -> ChangeType {
        self.row.change_type
    }

    pub const fn set_change_type(&mut self, change_type: ChangeType) {
        self.row.change_type = change_type;
    }

    /// Value of a column by name.
    ///
    /// # Errors
    /// `UnknownColumn` when the table has no such column.
    pub fn get(&self, column: &str) -> Result<Option<&SqlValue>> {
        let index = self.schema.column_index(column)?;
        Ok(self.row.value(index))
    }

    /// Column value, else annotation value, else `None`.
    pub fn try_get(&self, name: &str) -> Option<&SqlValue> {
        self.view().try_get(name)
    }

    /// Value of an annotation by name.
    ///
    /// # Errors
    /// `UnknownAnnotation` when no row of the table ever set `name`.
    pub fn get_annotation(&self, name: &str) -> Result<Option<&SqlValue>> {
        self.view().get_annotation(name)
    }

    /// Assigns a column by name, converting to the column's type.
    ///
    /// # Errors
    /// `UnknownColumn` for names outside the schema, `Conversion` when the
    /// value does not fit the column type.
    pub fn set(&mut self, column: &str, value: impl Into<SqlValue>) -> Result<()> {
        let index = self.schema.column_index(column)?;
        self.set_at(index, value)
    }

    /// Assigns a column by position, converting to the column's type.
    pub fn set_at(&mut self, index: usize, value: impl Into<SqlValue>) -> Result<()> {
        let column = self.schema.columns.get(index).ok_or_else(|| {
            TableSyncError::unknown_column(format!("#{index}"), &self.schema.table_name)
        })?;
        let value = value.into().convert_to(&column.data_type, &column.name)?;
        self.row.values[index] = Some(value);
        Ok(())
    }

    /// Returns a column to the never-assigned state.
    pub fn unset(&mut self, column: &str) -> Result<()> {
        let index = self.schema.column_index(column)?;
        self.row.values[index] = None;
        Ok(())
    }

    /// Sets an annotation, registering its name with the table on first use.
    pub fn set_annotation(&mut self, name: &str, value: impl Into<SqlValue>) {
        self.set_annotation_value(name, Some(value.into()));
    }

    fn set_annotation_value(&mut self, name: &str, value: Option<SqlValue>) {
        let index = annotation_position(self.annotations, name).unwrap_or_else(|| {
            self.annotations.push(name.to_string());
            self.annotations.len() - 1
        });
        self.row.set_annotation_at(index, value);
    }

    /// Merges name/value pairs, keeping unknown names as annotations.
    pub fn apply_dictionary<K, V, I>(&mut self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<SqlValue>,
    {
        self.apply_dictionary_with(pairs, true)
    }

    /// Merges name/value pairs.
    ///
    /// Values for schema columns are converted to the column type and a
    /// `None`/null source becomes an explicit database null. Other names are
    /// stored as annotations when `store_extraneous` is set and dropped
    /// otherwise.
    pub fn apply_dictionary_with<K, V, I>(&mut self, pairs: I, store_extraneous: bool) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<SqlValue>,
    {
        for (name, value) in pairs {
            let name = name.as_ref();
            match self.schema.try_column_index(name) {
                Some(index) => self.set_at(index, value)?,
                None if store_extraneous => self.set_annotation(name, value),
                None => {}
            }
        }
        Ok(())
    }

    /// Copies the columns of a data record accepted by `filter`.
    ///
    /// Database nulls become unassigned slots when `convert_db_null_to_none`
    /// is set. Columns outside the schema become annotations.
    pub fn apply_data_record<F>(
        &mut self,
        record: &DataRecord,
        convert_db_null_to_none: bool,
        filter: F,
    ) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        for (name, value) in record.iter() {
            if !filter(name) {
                continue;
            }

            let value = if value.is_null() && convert_db_null_to_none {
                None
            } else {
                Some(value.clone())
            };

            match (self.schema.try_column_index(name), value) {
                (Some(index), Some(value)) => self.set_at(index, value)?,
                (Some(index), None) => self.row.values[index] = None,
                (None, value) => self.set_annotation_value(name, value),
            }
        }
        Ok(())
    }

    /// [`Self::apply_data_record`] with a filter that keeps or drops
    /// non-schema columns.
    pub fn apply_data_record_with(
        &mut self,
        record: &DataRecord,
        convert_db_null_to_none: bool,
        store_extraneous: bool,
    ) -> Result<()> {
        let schema = self.schema;
        self.apply_data_record(record, convert_db_null_to_none, |name| {
            store_extraneous || schema.try_column_index(name).is_some()
        })
    }

    /// Copies every schema column the source has a property for.
    ///
    /// Never creates annotations.
    pub fn apply_object_properties<S: RowSource + ?Sized>(&mut self, source: &S) -> Result<()> {
        let schema = self.schema;
        for column in &schema.columns {
            if let Some(value) = source.property(&column.name) {
                self.set_at(column.index, value)?;
            }
        }
        Ok(())
    }

    /// Serializes `value` to JSON and applies its fields as object properties.
    pub fn apply_serializable<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let json = serde_json::to_value(value).map_err(|source| TableSyncError::Serialization {
            context: format!("Cannot serialize row source for {}", self.schema.table_name),
            source,
        })?;
        self.apply_object_properties(&json)
    }

    /// Applies the attributes of one XML element whose names match columns.
    ///
    /// Other attributes and child nodes are ignored.
    pub fn apply_xml_element(&mut self, xml: &str) -> Result<()> {
        let document = roxmltree::Document::parse(xml).map_err(|e| {
            TableSyncError::configuration(format!("Invalid XML element: {e}"))
        })?;

        for attribute in document.root_element().attributes() {
            if let Some(index) = self.schema.try_column_index(attribute.name()) {
                self.set_at(index, attribute.value())?;
            }
        }
        Ok(())
    }

    /// Column values followed by the annotations set on this row.
    pub fn to_dictionary(&self) -> IndexMap<String, Option<SqlValue>> {
        self.view().to_dictionary()
    }
}
