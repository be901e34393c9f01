//! Observation tables: ordered rows of named, typed columns.

use crate::data::{ColumnType, Value};
use crate::error::{Result, TidyError};
use crate::summarize::{Aggregate, Predicate, Summarize};
use serde_json::{Map, Value as JsonValue};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// A tuple of column values identifying one partition of a table.
///
/// Keys compare by [`Value::total_cmp`], so `Int(1)` and `Float(1.0)`
/// are the same key.
#[derive(Debug, Clone)]
pub struct GroupKey(pub Vec<Value>);

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for GroupKey {}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match a.total_cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join("/"))
    }
}

/// An immutable, column-oriented observation table.
///
/// One row is one observation. Every column has the same length and a
/// single [`ColumnType`]. All verbs return a new table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    names: Vec<String>,
    types: Vec<ColumnType>,
    columns: Vec<Vec<Value>>,
    n_rows: usize,
}

impl Table {
    /// Create an empty table with no columns.
    pub fn new() -> Self {
        Self {
            names: Vec::new(),
            types: Vec::new(),
            columns: Vec::new(),
            n_rows: 0,
        }
    }

    /// Build a table from named columns, inferring each column's type.
    ///
    /// Mixed integer and float columns become `Float`; a column mixing
    /// text with numbers becomes `Text` and its numbers are rendered as
    /// text. An all-missing column is typed `Float`.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<Value>)>) -> Result<Self> {
        let mut table = Self::new();
        let mut first = true;
        for (name, values) in columns {
            if first {
                table.n_rows = values.len();
                first = false;
            }
            table.push_column(name.into(), values)?;
        }
        Ok(table)
    }

    /// Build a table from named columns with declared types.
    pub fn from_typed_columns<S: Into<String>>(
        columns: Vec<(S, ColumnType, Vec<Value>)>,
        n_rows: usize,
    ) -> Result<Self> {
        let mut table = Self::new();
        table.n_rows = n_rows;
        for (name, column_type, values) in columns {
            if let Some(bad) = values
                .iter()
                .filter_map(|v| v.column_type())
                .find(|t| !column_type.accepts(*t))
            {
                let name = name.into();
                return Err(TidyError::TypeMismatch {
                    reason: format!("{} value in a {} column", bad, column_type),
                    column: name,
                });
            }
            table.push_typed_column(name.into(), column_type, values)?;
        }
        Ok(table)
    }

    /// Build a table from row-major values.
    pub fn from_rows<S: AsRef<str>>(names: &[S], rows: Vec<Vec<Value>>) -> Result<Self> {
        let n_cols = names.len();
        let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); n_cols];
        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() != n_cols {
                return Err(TidyError::RaggedRow {
                    row: row_idx + 1,
                    expected: n_cols,
                    actual: row.len(),
                });
            }
            for (col, value) in columns.iter_mut().zip(row) {
                col.push(value);
            }
        }
        Self::from_columns(
            names
                .iter()
                .map(|n| n.as_ref().to_string())
                .zip(columns)
                .collect(),
        )
    }

    /// Load a table from a CSV file.
    ///
    /// Expected format:
    /// - First row: header with column names
    /// - Subsequent rows: one observation each
    ///
    /// Column types are inferred from the full column: integer if every
    /// value parses as an integer, float if every value parses as a number,
    /// text otherwise. Empty fields and `NA` are missing.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Parse a table from CSV text.
    pub fn from_csv_str(text: &str) -> Result<Self> {
        Self::from_csv_reader(text.as_bytes())
    }

    /// Parse a table from any CSV byte stream.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let names: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
        if names.is_empty() || names.iter().all(|n| n.is_empty()) {
            return Err(TidyError::EmptyData("CSV has no header".to_string()));
        }

        let mut records = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() == 1 && record.get(0).map_or(true, |s| s.is_empty()) {
                continue;
            }
            records.push(record);
        }

        let mut table = Self::new();
        table.n_rows = records.len();
        for (col_idx, name) in names.iter().enumerate() {
            let column_type =
                ColumnType::infer(records.iter().map(|r| r.get(col_idx).unwrap_or("")));
            let values: Vec<Value> = records
                .iter()
                .map(|r| Value::parse(r.get(col_idx).unwrap_or(""), column_type))
                .collect();
            table.push_typed_column(name.clone(), column_type, values)?;
        }

        tracing::debug!(
            rows = table.n_rows,
            columns = table.n_columns(),
            "parsed CSV table"
        );
        Ok(table)
    }

    /// Write the table as CSV to any writer. Missing values are written as `NA`.
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.names)?;
        for row in 0..self.n_rows {
            writer.write_record(self.columns.iter().map(|c| c[row].to_string()))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the table to a CSV file.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.to_csv_writer(file)
    }

    /// Render the table as a CSV string.
    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.to_csv_writer(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Render the table as a JSON array of row objects.
    pub fn to_json_records(&self) -> JsonValue {
        let rows: Vec<JsonValue> = (0..self.n_rows)
            .map(|row| {
                let mut obj = Map::new();
                for (name, col) in self.names.iter().zip(&self.columns) {
                    obj.insert(
                        name.clone(),
                        serde_json::to_value(&col[row]).unwrap_or(JsonValue::Null),
                    );
                }
                JsonValue::Object(obj)
            })
            .collect();
        JsonValue::Array(rows)
    }

    fn push_column(&mut self, name: String, values: Vec<Value>) -> Result<()> {
        let column_type = values
            .iter()
            .filter_map(|v| v.column_type())
            .reduce(|a, b| a.unify(b))
            .unwrap_or(ColumnType::Float);
        let values = if column_type == ColumnType::Text {
            values
                .into_iter()
                .map(|v| match v {
                    Value::Int(_) | Value::Float(_) => Value::Text(v.to_string()),
                    other => other,
                })
                .collect()
        } else {
            values
        };
        self.push_typed_column(name, column_type, values)
    }

    fn push_typed_column(
        &mut self,
        name: String,
        column_type: ColumnType,
        values: Vec<Value>,
    ) -> Result<()> {
        if self.names.contains(&name) {
            return Err(TidyError::DuplicateColumn(name));
        }
        if values.len() != self.n_rows {
            return Err(TidyError::DimensionMismatch {
                expected: self.n_rows,
                actual: values.len(),
            });
        }
        self.names.push(name);
        self.types.push(column_type);
        self.columns.push(values);
        Ok(())
    }

    fn index_of(&self, column: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == column)
            .ok_or_else(|| TidyError::MissingColumn(column.to_string()))
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.names.len()
    }

    /// Check if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Column names in order.
    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.names.iter().any(|n| n == column)
    }

    /// Get the type of a column.
    pub fn column_type(&self, column: &str) -> Result<ColumnType> {
        Ok(self.types[self.index_of(column)?])
    }

    /// Get all values for a column.
    pub fn column(&self, column: &str) -> Result<&[Value]> {
        Ok(&self.columns[self.index_of(column)?])
    }

    /// Get a numeric column as `Option<f64>` per row (`None` for missing).
    ///
    /// A text column holding only missing values reads as all `None`.
    pub fn numeric_column(&self, column: &str) -> Result<Vec<Option<f64>>> {
        let idx = self.index_of(column)?;
        if !self.types[idx].is_numeric() && !self.columns[idx].iter().all(Value::is_missing) {
            return Err(TidyError::TypeMismatch {
                column: column.to_string(),
                reason: format!("expected a numeric column, found {}", self.types[idx]),
            });
        }
        Ok(self.columns[idx].iter().map(Value::as_f64).collect())
    }

    /// Get a single cell.
    pub fn value(&self, row: usize, column: &str) -> Result<&Value> {
        let idx = self.index_of(column)?;
        self.columns[idx].get(row).ok_or(TidyError::DimensionMismatch {
            expected: self.n_rows,
            actual: row + 1,
        })
    }

    /// Get one row as a view.
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        (index < self.n_rows).then_some(Row { table: self, index })
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.n_rows).map(move |index| Row { table: self, index })
    }

    /// Distinct non-missing values of a column, in ascending order.
    pub fn levels(&self, column: &str) -> Result<Vec<Value>> {
        let mut levels: Vec<Value> = self
            .column(column)?
            .iter()
            .filter(|v| !v.is_missing())
            .cloned()
            .collect();
        levels.sort_by(|a, b| a.total_cmp(b));
        levels.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
        Ok(levels)
    }

    /// Partition row indices by the values of the given columns.
    ///
    /// Groups are returned in ascending key order; every key observed in
    /// the table appears exactly once, including keys containing missing
    /// values.
    pub fn group_indices<S: AsRef<str>>(&self, columns: &[S]) -> Result<Vec<(GroupKey, Vec<usize>)>> {
        let idxs: Vec<usize> = columns
            .iter()
            .map(|c| self.index_of(c.as_ref()))
            .collect::<Result<_>>()?;

        let mut groups: std::collections::BTreeMap<GroupKey, Vec<usize>> =
            std::collections::BTreeMap::new();
        for row in 0..self.n_rows {
            let key = GroupKey(idxs.iter().map(|&c| self.columns[c][row].clone()).collect());
            groups.entry(key).or_default().push(row);
        }
        Ok(groups.into_iter().collect())
    }

    /// Keep only the given rows, in the given order.
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            types: self.types.clone(),
            columns: self
                .columns
                .iter()
                .map(|col| rows.iter().map(|&r| col[r].clone()).collect())
                .collect(),
            n_rows: rows.len(),
        }
    }

    /// Keep rows satisfying a predicate, preserving order.
    pub fn filter(&self, predicate: &Predicate) -> Result<Self> {
        let mask = predicate.mask(self)?;
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        Ok(self.take_rows(&rows))
    }

    /// Keep only the named columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> Result<Self> {
        let mut out = Self::new();
        out.n_rows = self.n_rows;
        for column in columns {
            let idx = self.index_of(column.as_ref())?;
            out.push_typed_column(
                self.names[idx].clone(),
                self.types[idx],
                self.columns[idx].clone(),
            )?;
        }
        Ok(out)
    }

    /// Add a column, or replace one with the same name.
    pub fn with_column<S: Into<String>>(&self, name: S, values: Vec<Value>) -> Result<Self> {
        let name = name.into();
        if values.len() != self.n_rows {
            return Err(TidyError::DimensionMismatch {
                expected: self.n_rows,
                actual: values.len(),
            });
        }
        let mut out = self.clone();
        if let Ok(idx) = out.index_of(&name) {
            out.names.remove(idx);
            out.types.remove(idx);
            out.columns.remove(idx);
            let mut single = Self::new();
            single.n_rows = out.n_rows;
            single.push_column(name.clone(), values)?;
            out.names.insert(idx, name);
            out.types.insert(idx, single.types[0]);
            out.columns.insert(idx, single.columns.remove(0));
            Ok(out)
        } else {
            out.push_column(name, values)?;
            Ok(out)
        }
    }

    /// Add a column computed from each row.
    pub fn mutate<S, F>(&self, name: S, f: F) -> Result<Self>
    where
        S: Into<String>,
        F: Fn(&Row<'_>) -> Value,
    {
        let values: Vec<Value> = self.rows().map(|row| f(&row)).collect();
        self.with_column(name, values)
    }

    /// Stable sort by the given columns in ascending order.
    pub fn arrange<S: AsRef<str>>(&self, columns: &[S]) -> Result<Self> {
        let idxs: Vec<usize> = columns
            .iter()
            .map(|c| self.index_of(c.as_ref()))
            .collect::<Result<_>>()?;
        let mut order: Vec<usize> = (0..self.n_rows).collect();
        order.sort_by(|&a, &b| {
            for &c in &idxs {
                match self.columns[c][a].total_cmp(&self.columns[c][b]) {
                    Ordering::Equal => continue,
                    ord => return ord,
                }
            }
            Ordering::Equal
        });
        Ok(self.take_rows(&order))
    }

    /// Indices of rows with no missing value in any of the given columns.
    ///
    /// An empty column list checks every column.
    pub fn complete_rows<S: AsRef<str>>(&self, columns: &[S]) -> Result<Vec<usize>> {
        let idxs: Vec<usize> = if columns.is_empty() {
            (0..self.n_columns()).collect()
        } else {
            columns
                .iter()
                .map(|c| self.index_of(c.as_ref()))
                .collect::<Result<_>>()?
        };
        Ok((0..self.n_rows)
            .filter(|&r| idxs.iter().all(|&c| !self.columns[c][r].is_missing()))
            .collect())
    }

    /// Drop rows with a missing value in any of the given columns.
    ///
    /// An empty column list checks every column.
    pub fn drop_missing<S: AsRef<str>>(&self, columns: &[S]) -> Result<Self> {
        Ok(self.take_rows(&self.complete_rows(columns)?))
    }

    /// Distinct combinations of the given columns, in ascending order.
    pub fn distinct<S: AsRef<str>>(&self, columns: &[S]) -> Result<Self> {
        let firsts: Vec<usize> = self
            .group_indices(columns)?
            .into_iter()
            .map(|(_, rows)| rows[0])
            .collect();
        self.take_rows(&firsts).select(columns)
    }

    /// Count rows per distinct combination of the given columns (column `n`).
    pub fn count_by<S: AsRef<str>>(&self, columns: &[S]) -> Result<Self> {
        Summarize::new()
            .group_by(columns)
            .agg("n", Aggregate::Count)
            .run(self)
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Self {
        let rows: Vec<usize> = (0..n.min(self.n_rows)).collect();
        self.take_rows(&rows)
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

/// A borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Row<'a> {
    /// Row position in the table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Cell value by column name.
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        let idx = self.table.names.iter().position(|n| n == column)?;
        Some(&self.table.columns[idx][self.index])
    }

    /// Numeric cell value by column name.
    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }
}

fn format_cell(value: &Value) -> String {
    match value {
        Value::Float(v) if v.fract() != 0.0 => {
            let s = format!("{:.4}", v);
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        other => other.to_string(),
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cells: Vec<Vec<String>> = self
            .columns
            .iter()
            .map(|col| col.iter().map(format_cell).collect())
            .collect();
        let widths: Vec<usize> = self
            .names
            .iter()
            .zip(&cells)
            .map(|(name, col)| {
                col.iter()
                    .map(|c| c.len())
                    .chain(std::iter::once(name.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        writeln!(f, "# A table: {} x {}", self.n_rows, self.n_columns())?;
        let header: Vec<String> = self
            .names
            .iter()
            .zip(&widths)
            .map(|(n, w)| format!("{:>w$}", n, w = w))
            .collect();
        writeln!(f, "{}", header.join("  "))?;
        for row in 0..self.n_rows {
            let line: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(col, w)| format!("{:>w$}", col[row], w = w))
                .collect();
            writeln!(f, "{}", line.join("  "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn create_test_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "species,island,bill_length_mm,body_mass_g,year").unwrap();
        writeln!(file, "Adelie,Torgersen,39.1,3750,2007").unwrap();
        writeln!(file, "Adelie,Torgersen,NA,NA,2007").unwrap();
        writeln!(file, "Gentoo,Biscoe,46.1,4500,2008").unwrap();
        writeln!(file, "Chinstrap,Dream,46.5,3500,2009").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_csv() {
        let file = create_test_csv();
        let table = Table::from_csv(file.path()).unwrap();

        assert_eq!(table.n_rows(), 4);
        assert_eq!(table.n_columns(), 5);
        assert_eq!(table.column_type("species").unwrap(), ColumnType::Text);
        assert_eq!(table.column_type("bill_length_mm").unwrap(), ColumnType::Float);
        assert_eq!(table.column_type("body_mass_g").unwrap(), ColumnType::Int);
        assert!(table.value(1, "bill_length_mm").unwrap().is_missing());
    }

    #[test]
    fn test_ragged_csv_is_an_error() {
        let result = Table::from_csv_str("a,b\n1,2\n3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_numeric_column_rejects_text() {
        let file = create_test_csv();
        let table = Table::from_csv(file.path()).unwrap();
        assert!(matches!(
            table.numeric_column("species"),
            Err(TidyError::TypeMismatch { .. })
        ));
        assert!(matches!(
            table.numeric_column("flipper"),
            Err(TidyError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_levels_sorted() {
        let file = create_test_csv();
        let table = Table::from_csv(file.path()).unwrap();
        let levels = table.levels("species").unwrap();
        assert_eq!(
            levels,
            vec![
                Value::from("Adelie"),
                Value::from("Chinstrap"),
                Value::from("Gentoo")
            ]
        );
    }

    #[test]
    fn test_group_indices_keep_every_level() {
        let file = create_test_csv();
        let table = Table::from_csv(file.path()).unwrap();
        let groups = table.group_indices(&["species", "island"]).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].1, vec![0, 1]);
    }

    #[test]
    fn test_group_key_equality_follows_ordering() {
        assert_eq!(GroupKey(vec![Value::Int(1)]), GroupKey(vec![Value::Float(1.0)]));
        assert_ne!(GroupKey(vec![Value::Int(1)]), GroupKey(vec![Value::Int(2)]));

        let table = Table::from_columns(vec![
            ("dose", vec![Value::Int(1), Value::Float(1.0), Value::Float(2.5)]),
            ("y", vec![Value::Int(3), Value::Int(4), Value::Int(5)]),
        ])
        .unwrap();
        let groups = table.group_indices(&["dose"]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1, vec![0, 1]);
    }

    #[test]
    fn test_select_and_with_column() {
        let file = create_test_csv();
        let table = Table::from_csv(file.path()).unwrap();
        let narrow = table.select(&["year", "species"]).unwrap();
        assert_eq!(narrow.column_names(), &["year", "species"]);

        let widened = narrow
            .with_column("flag", vec![Value::Int(1); 4])
            .unwrap();
        assert_eq!(widened.n_columns(), 3);
        assert!(narrow.with_column("bad", vec![Value::Int(1)]).is_err());
    }

    #[test]
    fn test_mutate_derived_ratio() {
        let file = create_test_csv();
        let table = Table::from_csv(file.path()).unwrap();
        let out = table
            .mutate("mass_kg", |row| {
                Value::from(row.get_f64("body_mass_g").map(|g| g / 1000.0))
            })
            .unwrap();
        assert_eq!(out.value(0, "mass_kg").unwrap(), &Value::Float(3.75));
        assert!(out.value(1, "mass_kg").unwrap().is_missing());
    }

    #[test]
    fn test_arrange_and_drop_missing() {
        let file = create_test_csv();
        let table = Table::from_csv(file.path()).unwrap();

        let sorted = table.arrange(&["body_mass_g"]).unwrap();
        assert_eq!(sorted.value(0, "body_mass_g").unwrap(), &Value::Int(3500));
        assert!(sorted.value(3, "body_mass_g").unwrap().is_missing());

        let complete = table.drop_missing(&["bill_length_mm"]).unwrap();
        assert_eq!(complete.n_rows(), 3);
    }

    #[test]
    fn test_distinct_and_count_by() {
        let file = create_test_csv();
        let table = Table::from_csv(file.path()).unwrap();

        let islands = table.distinct(&["island"]).unwrap();
        assert_eq!(islands.n_rows(), 3);

        let counts = table.count_by(&["species"]).unwrap();
        assert_eq!(counts.value(0, "n").unwrap(), &Value::Int(2));
    }

    #[test]
    fn test_csv_round_trip_keeps_missing() {
        let file = create_test_csv();
        let table = Table::from_csv(file.path()).unwrap();
        let text = table.to_csv_string().unwrap();
        assert!(text.contains("Adelie,Torgersen,NA,NA,2007"));
        let reparsed = Table::from_csv_str(&text).unwrap();
        assert_eq!(reparsed, table);
    }

    #[test]
    fn test_from_rows_mixed_numeric() {
        let table = Table::from_rows(
            &["g", "x"],
            vec![
                vec![Value::from("A"), Value::Int(1)],
                vec![Value::from("B"), Value::Float(2.5)],
            ],
        )
        .unwrap();
        assert_eq!(table.column_type("x").unwrap(), ColumnType::Float);
        assert_eq!(
            table.numeric_column("x").unwrap(),
            vec![Some(1.0), Some(2.5)]
        );
    }

    #[test]
    fn test_display_has_header() {
        let table = Table::from_csv_str("g,y\nA,1.5\n").unwrap();
        let rendered = table.to_string();
        assert!(rendered.starts_with("# A table: 1 x 2"));
        assert!(rendered.contains("1.5"));
    }
}
