//! Data structures: observation tables, formulas and design matrices.

mod design_matrix;
mod formula;
mod random_effects;
pub mod source;
mod table;
mod value;

pub use design_matrix::DesignMatrix;
pub use formula::{Formula, Term};
pub use random_effects::{GroupBlock, MixedFormula, RandomDesign, RandomEffect};
pub use source::{DataSource, Dataset};
pub use table::{GroupKey, Row, Table};
pub use value::{ColumnType, Value};
