//! Wide-column table layout.
//!
//! Rows travel between the engine and a store as column maps. A column
//! that is absent from a row is distinct from one holding `Null`: legacy
//! data rows simply lack `measurement_values_json` and carry the
//! per-measurement `measurement_values` map instead.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MatchupError, Result};

// ── Tables ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Executions,
    Params,
    ExecutionStats,
    Data,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Executions => "doms_executions",
            Table::Params => "doms_params",
            Table::ExecutionStats => "doms_execution_stats",
            Table::Data => "doms_data",
        }
    }

    /// Column holding the row key.
    ///
    /// Single-row tables are keyed by execution id; data rows by their own
    /// generated row id.
    pub fn key_column(&self) -> &'static str {
        match self {
            Table::Executions => columns::ID,
            Table::Params | Table::ExecutionStats => columns::EXECUTION_ID,
            Table::Data => columns::ID,
        }
    }

    pub const ALL: [Table; 4] = [
        Table::Executions,
        Table::Params,
        Table::ExecutionStats,
        Table::Data,
    ];
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Column names, shared by every table that uses them.
pub mod columns {
    pub const ID: &str = "id";
    pub const EXECUTION_ID: &str = "execution_id";

    // doms_executions
    pub const TIME_STARTED: &str = "time_started";
    pub const TIME_COMPLETED: &str = "time_completed";
    pub const USER_EMAIL: &str = "user_email";

    // doms_params
    pub const PRIMARY_DATASET: &str = "primary_dataset";
    pub const MATCHUP_DATASETS: &str = "matchup_datasets";
    pub const DEPTH_MIN: &str = "depth_min";
    pub const DEPTH_MAX: &str = "depth_max";
    pub const TIME_TOLERANCE: &str = "time_tolerance";
    pub const RADIUS_TOLERANCE: &str = "radius_tolerance";
    pub const START_TIME: &str = "start_time";
    pub const END_TIME: &str = "end_time";
    pub const PLATFORMS: &str = "platforms";
    pub const BOUNDING_BOX: &str = "bounding_box";
    pub const PARAMETER: &str = "parameter";

    // doms_execution_stats
    pub const NUM_GRIDDED_MATCHED: &str = "num_gridded_matched";
    pub const NUM_GRIDDED_CHECKED: &str = "num_gridded_checked";
    pub const NUM_INSITU_MATCHED: &str = "num_insitu_matched";
    pub const NUM_INSITU_CHECKED: &str = "num_insitu_checked";
    pub const TIME_TO_COMPLETE: &str = "time_to_complete";

    // doms_data
    pub const VALUE_ID: &str = "value_id";
    /// Parent reference. Holds the parent row id; rows from older writers
    /// hold the parent point identifier as text.
    pub const PRIMARY_VALUE_ID: &str = "primary_value_id";
    pub const X: &str = "x";
    pub const Y: &str = "y";
    pub const SOURCE_DATASET: &str = "source_dataset";
    pub const MEASUREMENT_TIME: &str = "measurement_time";
    pub const PLATFORM: &str = "platform";
    pub const DEVICE: &str = "device";
    pub const MEASUREMENT_VALUES_JSON: &str = "measurement_values_json";
    /// Legacy per-measurement `map<text, double>` column.
    pub const MEASUREMENT_VALUES: &str = "measurement_values";
    pub const IS_PRIMARY: &str = "is_primary";
    pub const DEPTH: &str = "depth";
    pub const FILE_URL: &str = "file_url";

    /// Column order of the data insert statement.
    pub const DATA_INSERT: [&str; 14] = [
        ID,
        EXECUTION_ID,
        VALUE_ID,
        PRIMARY_VALUE_ID,
        X,
        Y,
        SOURCE_DATASET,
        MEASUREMENT_TIME,
        PLATFORM,
        DEVICE,
        MEASUREMENT_VALUES_JSON,
        IS_PRIMARY,
        DEPTH,
        FILE_URL,
    ];
}

// ── Column values ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    DoubleMap(BTreeMap<String, f64>),
}

impl ColumnValue {
    fn type_name(&self) -> &'static str {
        match self {
            ColumnValue::Null => "null",
            ColumnValue::Bool(_) => "boolean",
            ColumnValue::Int(_) => "bigint",
            ColumnValue::Double(_) => "double",
            ColumnValue::Text(_) => "text",
            ColumnValue::Uuid(_) => "uuid",
            ColumnValue::Timestamp(_) => "timestamp",
            ColumnValue::DoubleMap(_) => "map<text, double>",
        }
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        ColumnValue::Bool(v)
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Int(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Double(v)
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::Text(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Text(v.to_string())
    }
}

impl From<Uuid> for ColumnValue {
    fn from(v: Uuid) -> Self {
        ColumnValue::Uuid(v)
    }
}

impl From<DateTime<Utc>> for ColumnValue {
    fn from(v: DateTime<Utc>) -> Self {
        ColumnValue::Timestamp(v)
    }
}

impl From<BTreeMap<String, f64>> for ColumnValue {
    fn from(v: BTreeMap<String, f64>) -> Self {
        ColumnValue::DoubleMap(v)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ColumnValue::Null)
    }
}

// ── Row ────────────────────────────────────────────────────────────

/// A single wide-column row: column name → value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: BTreeMap<String, ColumnValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column assignment.
    pub fn with(mut self, column: &str, value: impl Into<ColumnValue>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<ColumnValue>) {
        self.columns.insert(column.to_string(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<ColumnValue> {
        self.columns.remove(column)
    }

    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns.get(column)
    }

    /// True if the column exists, even when it holds `Null`.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Row identifier for error messages.
    pub fn describe(&self) -> String {
        match self.get(columns::ID).or_else(|| self.get(columns::EXECUTION_ID)) {
            Some(ColumnValue::Uuid(id)) => id.to_string(),
            Some(ColumnValue::Text(id)) => id.clone(),
            _ => "<unkeyed>".to_string(),
        }
    }

    /// Key of this row for `table`, which must be a uuid.
    pub fn key(&self, table: Table) -> Result<Uuid> {
        self.uuid(table.key_column())
    }

    fn missing(&self, column: &str) -> MatchupError {
        MatchupError::decode(self.describe(), format!("missing column '{}'", column))
    }

    fn mismatch(&self, column: &str, expected: &str, found: &ColumnValue) -> MatchupError {
        MatchupError::decode(
            self.describe(),
            format!(
                "column '{}' expected {}, found {}",
                column,
                expected,
                found.type_name()
            ),
        )
    }

    // -- Required columns -----------------------------------------------------

    pub fn uuid(&self, column: &str) -> Result<Uuid> {
        match self.get(column) {
            Some(ColumnValue::Uuid(v)) => Ok(*v),
            Some(other) => Err(self.mismatch(column, "uuid", other)),
            None => Err(self.missing(column)),
        }
    }

    pub fn text(&self, column: &str) -> Result<String> {
        self.opt_text(column)?.ok_or_else(|| self.missing(column))
    }

    pub fn double(&self, column: &str) -> Result<f64> {
        self.opt_double(column)?.ok_or_else(|| self.missing(column))
    }

    pub fn int(&self, column: &str) -> Result<i64> {
        self.opt_int(column)?.ok_or_else(|| self.missing(column))
    }

    pub fn boolean(&self, column: &str) -> Result<bool> {
        match self.get(column) {
            Some(ColumnValue::Bool(v)) => Ok(*v),
            // Older writers stored the flag as 1/0.
            Some(ColumnValue::Int(v)) => Ok(*v != 0),
            Some(other) => Err(self.mismatch(column, "boolean", other)),
            None => Err(self.missing(column)),
        }
    }

    pub fn timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        match self.get(column) {
            Some(ColumnValue::Timestamp(v)) => Ok(*v),
            Some(other) => Err(self.mismatch(column, "timestamp", other)),
            None => Err(self.missing(column)),
        }
    }

    // -- Optional columns (absent or Null → None) -----------------------------

    pub fn opt_text(&self, column: &str) -> Result<Option<String>> {
        match self.get(column) {
            Some(ColumnValue::Text(v)) => Ok(Some(v.clone())),
            Some(ColumnValue::Null) | None => Ok(None),
            Some(other) => Err(self.mismatch(column, "text", other)),
        }
    }

    pub fn opt_double(&self, column: &str) -> Result<Option<f64>> {
        match self.get(column) {
            Some(ColumnValue::Double(v)) => Ok(Some(*v)),
            Some(ColumnValue::Int(v)) => Ok(Some(*v as f64)),
            Some(ColumnValue::Null) | None => Ok(None),
            Some(other) => Err(self.mismatch(column, "double", other)),
        }
    }

    pub fn opt_int(&self, column: &str) -> Result<Option<i64>> {
        match self.get(column) {
            Some(ColumnValue::Int(v)) => Ok(Some(*v)),
            Some(ColumnValue::Null) | None => Ok(None),
            Some(other) => Err(self.mismatch(column, "bigint", other)),
        }
    }
}
