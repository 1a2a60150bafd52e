// src/process/mod.rs
pub mod filter;
pub mod gunzip;
pub mod parse;
pub mod select;
pub mod write;

use std::{collections::HashMap, sync::Arc};

/// Column names from the header line, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl Schema {
    /// Build a schema. If a name repeats, lookups by name resolve to its
    /// first occurrence.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut index = HashMap::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            index.entry(name.clone()).or_insert(i);
        }
        Self { columns, index }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// One data row. Holds its values positionally alongside the shared schema,
/// so `get(name)` and `value(i)` always agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<String>,
}

impl Record {
    /// Callers guarantee `values.len() == schema.len()`; the parser enforces it.
    pub(crate) fn new(schema: Arc<Schema>, values: Vec<String>) -> Self {
        debug_assert_eq!(schema.len(), values.len());
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.schema.position(column).map(|i| self.values[i].as_str())
    }

    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// `(column, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.schema
            .columns()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

/// A schema plus its rows in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    schema: Arc<Schema>,
    records: Vec<Record>,
}

impl Dataset {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            records: Vec::new(),
        }
    }

    /// Build from a header and raw rows. Rows must have one value per column.
    pub fn from_rows<H, S>(header: H, rows: Vec<Vec<String>>) -> crate::error::Result<Self>
    where
        H: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let schema = Arc::new(Schema::new(header));
        let mut ds = Dataset::new(schema.clone());
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != schema.len() {
                return Err(crate::error::PipelineError::MalformedRow {
                    line: i as u64 + 2,
                    detail: format!("expected {} fields, found {}", schema.len(), row.len()),
                });
            }
            ds.records.push(Record::new(schema.clone(), row));
        }
        Ok(ds)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_name_and_position_agree() {
        let ds = Dataset::from_rows(
            ["model", "price", "manufacturer"],
            vec![row(&["A23BP2", "10", "TORK CRAFT"])],
        )
        .unwrap();
        let rec = &ds.records()[0];
        for (i, col) in ds.schema().columns().iter().enumerate() {
            assert_eq!(rec.get(col), rec.value(i));
        }
        assert_eq!(rec.get("missing"), None);
        assert_eq!(
            rec.iter().collect::<Vec<_>>(),
            vec![("model", "A23BP2"), ("price", "10"), ("manufacturer", "TORK CRAFT")]
        );
    }

    #[test]
    fn test_duplicate_header_resolves_to_first() {
        let schema = Schema::new(["sku", "sku", "qty"]);
        assert_eq!(schema.position("sku"), Some(0));
        assert_eq!(schema.position("qty"), Some(2));
        assert_eq!(schema.len(), 3);
    }

    #[test]
    fn test_from_rows_rejects_short_row() {
        let err = Dataset::from_rows(["a", "b"], vec![row(&["1"])]).unwrap_err();
        assert!(matches!(
            err,
            crate::error::PipelineError::MalformedRow { line: 2, .. }
        ));
    }
}
