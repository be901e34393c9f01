//! Filter, group and summarise observation tables.
//!
//! ```
//! use tidy_lmm::data::Table;
//! use tidy_lmm::summarize::{Aggregate, Missing, Summarize};
//!
//! let table = Table::from_csv_str("group,x,y\nA,1,2\nA,2,4\nB,1,3\nB,2,5\n").unwrap();
//! let summary = Summarize::new()
//!     .group_by(&["group"])
//!     .agg("mean_y", Aggregate::mean("y", Missing::Ignore))
//!     .run(&table)
//!     .unwrap();
//! assert_eq!(summary.n_rows(), 2);
//! ```

mod aggregate;
mod predicate;

pub use aggregate::{Aggregate, Missing};
pub use predicate::Predicate;

use crate::data::{ColumnType, GroupKey, Table, Value};
use crate::error::{Result, TidyError};
use serde::{Deserialize, Serialize};

/// A named aggregate: one output column of a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedAggregate {
    pub name: String,
    pub aggregate: Aggregate,
}

impl NamedAggregate {
    /// Parse `name=fn:column:policy`, e.g. `mean_mass=mean:body_mass_g:ignore`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, agg) = spec.split_once('=').ok_or_else(|| {
            TidyError::InvalidParameter(format!(
                "Aggregate '{}' must look like name=fn:column:policy",
                spec
            ))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TidyError::InvalidParameter(format!(
                "Aggregate '{}' has an empty name",
                spec
            )));
        }
        Ok(Self {
            name: name.to_string(),
            aggregate: Aggregate::parse(agg)?,
        })
    }
}

/// A summarise operation: optional filter, optional grouping, named aggregates.
///
/// The output has the grouping columns followed by one column per
/// aggregate, with one row per distinct key in ascending key order. An
/// ungrouped summary always has exactly one row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summarize {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    pub aggregates: Vec<NamedAggregate>,
}

impl Summarize {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only rows satisfying `predicate` before grouping.
    ///
    /// Calling this twice combines both predicates.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    /// Partition by the given columns.
    pub fn group_by<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.group_by = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self
    }

    /// Add a named aggregate column.
    pub fn agg<S: Into<String>>(mut self, name: S, aggregate: Aggregate) -> Self {
        self.aggregates.push(NamedAggregate {
            name: name.into(),
            aggregate,
        });
        self
    }

    /// Run against a table.
    pub fn run(&self, table: &Table) -> Result<Table> {
        if self.aggregates.is_empty() {
            return Err(TidyError::InvalidParameter(
                "Summarize needs at least one aggregate".to_string(),
            ));
        }
        for named in &self.aggregates {
            named.aggregate.validate(table)?;
        }

        let data = match &self.filter {
            Some(predicate) => table.filter(predicate)?,
            None => table.clone(),
        };

        let groups: Vec<(GroupKey, Vec<usize>)> = if self.group_by.is_empty() {
            vec![(GroupKey(Vec::new()), (0..data.n_rows()).collect())]
        } else {
            data.group_indices(&self.group_by)?
        };

        let mut columns: Vec<(String, ColumnType, Vec<Value>)> = Vec::new();
        for (k, name) in self.group_by.iter().enumerate() {
            let values = groups.iter().map(|(key, _)| key.0[k].clone()).collect();
            columns.push((name.clone(), data.column_type(name)?, values));
        }
        for named in &self.aggregates {
            let values = groups
                .iter()
                .map(|(_, rows)| named.aggregate.evaluate(&data, rows))
                .collect::<Result<Vec<_>>>()?;
            columns.push((named.name.clone(), named.aggregate.output_type(), values));
        }

        tracing::debug!(
            input_rows = table.n_rows(),
            kept_rows = data.n_rows(),
            groups = groups.len(),
            "summarised table"
        );
        Table::from_typed_columns(columns, groups.len())
    }
}
