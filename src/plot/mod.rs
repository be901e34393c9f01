//! Declarative plot descriptions.
//!
//! Nothing here draws. A [`PlotSpec`] names the table to plot, maps
//! columns to aesthetics and lists layers; it serialises to JSON for an
//! external renderer. [`augment`] produces the per-observation table
//! such a description usually points at.

mod augment;

pub use augment::{augment, slope_variable};

use crate::data::Table;
use crate::error::{Result, TidyError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Column-to-aesthetic mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aesthetics {
    pub x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ymin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ymax: Option<String>,
}

impl Aesthetics {
    /// Every mapped column, with its aesthetic.
    pub fn columns(&self) -> Vec<(&'static str, &str)> {
        let mut out = vec![("x", self.x.as_str())];
        let optional = [
            ("y", &self.y),
            ("color", &self.color),
            ("shape", &self.shape),
            ("group", &self.group),
            ("ymin", &self.ymin),
            ("ymax", &self.ymax),
        ];
        for (aes, column) in optional {
            if let Some(column) = column {
                out.push((aes, column.as_str()));
            }
        }
        out
    }
}

/// One geometric layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Layer {
    /// Scatter of `x` against `y`.
    Point,
    /// Lines through `x`, `y`, one per `group` or `color`.
    Line,
    /// Bars of height `y`.
    Col,
    /// Vertical intervals from `ymin` to `ymax`.
    ErrorBar,
    /// Least-squares line of `y` on `x`, one per `group` or `color`.
    Smooth,
    /// One straight line per row of a coefficient table.
    AbLine {
        /// Output holding the lines; `None` for the plot's own table.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        intercept: String,
        slope: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        color: Option<String>,
    },
}

impl Layer {
    fn required(&self) -> &'static [&'static str] {
        match self {
            Layer::Point | Layer::Line | Layer::Col | Layer::Smooth => &["y"],
            Layer::ErrorBar => &["ymin", "ymax"],
            Layer::AbLine { .. } => &[],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Layer::Point => "point",
            Layer::Line => "line",
            Layer::Col => "col",
            Layer::ErrorBar => "errorbar",
            Layer::Smooth => "smooth",
            Layer::AbLine { .. } => "abline",
        }
    }
}

/// A complete plot description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSpec {
    /// Name of the table (pipeline output or file) being plotted.
    pub data: String,
    pub mapping: Aesthetics,
    pub layers: Vec<Layer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_label: Option<String>,
}

impl PlotSpec {
    /// A plot of `data` with `x` and `y` mapped and no layers yet.
    pub fn new(data: &str, x: &str, y: &str) -> Self {
        Self {
            data: data.to_string(),
            mapping: Aesthetics {
                x: x.to_string(),
                y: Some(y.to_string()),
                ..Aesthetics::default()
            },
            layers: Vec::new(),
            title: None,
            x_label: None,
            y_label: None,
        }
    }

    pub fn color(mut self, column: &str) -> Self {
        self.mapping.color = Some(column.to_string());
        self
    }

    pub fn shape(mut self, column: &str) -> Self {
        self.mapping.shape = Some(column.to_string());
        self
    }

    pub fn group(mut self, column: &str) -> Self {
        self.mapping.group = Some(column.to_string());
        self
    }

    /// Map interval bounds for error bars.
    pub fn range(mut self, ymin: &str, ymax: &str) -> Self {
        self.mapping.ymin = Some(ymin.to_string());
        self.mapping.ymax = Some(ymax.to_string());
        self
    }

    pub fn layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn labels(mut self, x: &str, y: &str) -> Self {
        self.x_label = Some(x.to_string());
        self.y_label = Some(y.to_string());
        self
    }

    /// Check the mapping and layers against the plotted table.
    ///
    /// `AbLine` layers that name their own data are not checked here; see
    /// [`validate_with`](Self::validate_with).
    pub fn validate(&self, table: &Table) -> Result<()> {
        self.check(table, &BTreeMap::new(), false)
    }

    /// Check the plot against its table and any other named tables its
    /// layers refer to.
    pub fn validate_with(&self, table: &Table, others: &BTreeMap<String, Table>) -> Result<()> {
        self.check(table, others, true)
    }

    fn check(&self, table: &Table, others: &BTreeMap<String, Table>, resolve: bool) -> Result<()> {
        if self.layers.is_empty() {
            return Err(TidyError::InvalidParameter(format!(
                "Plot of '{}' has no layers",
                self.data
            )));
        }
        for (aes, column) in self.mapping.columns() {
            if !table.has_column(column) {
                return Err(TidyError::MissingColumn(format!(
                    "{} (mapped to {})",
                    column, aes
                )));
            }
        }

        let mapped = self.mapping.columns();
        for layer in &self.layers {
            for aes in layer.required() {
                if !mapped.iter().any(|(a, _)| a == aes) {
                    return Err(TidyError::InvalidParameter(format!(
                        "Layer '{}' needs the '{}' aesthetic",
                        layer.name(),
                        aes
                    )));
                }
            }
            if let Layer::AbLine {
                data,
                intercept,
                slope,
                color,
            } = layer
            {
                let lines = match data {
                    None => table,
                    Some(name) if resolve => others.get(name).ok_or_else(|| {
                        TidyError::InvalidParameter(format!("Unknown plot data '{}'", name))
                    })?,
                    Some(_) => continue,
                };
                for column in [Some(intercept), Some(slope), color.as_ref()].into_iter().flatten() {
                    if !lines.has_column(column) {
                        return Err(TidyError::MissingColumn(column.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
