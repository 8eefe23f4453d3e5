//! Entity shapes flowing between the flattener, the write engine and the
//! reconstructor.
//!
//! - `MatchPoint`: caller-authored observation tree (input)
//! - `FlatRow`: one storage row per point occurrence (write path)
//! - `ResultEntry`: reconstructed view handed back to callers (read path)
//! - `Execution`, `MatchupParams`, `ExecutionStats`: single-row records
//!   owned by the surrounding pipeline

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{MatchupError, Result};

// ── Timestamps ─────────────────────────────────────────────────────

/// Legacy timestamp layout accepted by the pipeline, always UTC.
const ISO8601_UTC_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parse an ISO-8601 UTC timestamp.
///
/// Accepts RFC 3339 (any offset, normalised to UTC) and the bare
/// `YYYY-MM-DDTHH:MM:SS` form, which is read as UTC.
pub fn parse_iso8601(text: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, ISO8601_UTC_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| MatchupError::InvalidTimestamp(text.to_string()))
}

/// Parse an ISO-8601 UTC timestamp into milliseconds since the epoch.
pub fn parse_iso8601_millis(text: &str) -> Result<i64> {
    parse_iso8601(text).map(|dt| dt.timestamp_millis())
}

/// Convert milliseconds since the epoch into a UTC timestamp.
pub fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| MatchupError::InvalidTimestamp(millis.to_string()))
}

/// Accepts either an ISO-8601 string or integer epoch milliseconds. Both
/// land at millisecond precision.
pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Millis(ms) => from_millis(ms).map_err(serde::de::Error::custom),
        Raw::Text(text) => parse_iso8601_millis(&text)
            .and_then(from_millis)
            .map_err(serde::de::Error::custom),
    }
}

/// Accepts a list of dataset names or a single comma-separated string.
fn deserialize_datasets<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::List(list) => list,
        Raw::Joined(joined) => split_datasets(&joined),
    })
}

pub(crate) fn split_datasets(joined: &str) -> Vec<String> {
    joined.split(',').map(str::to_string).collect()
}

// ── Execution ──────────────────────────────────────────────────────

/// One run of the matchup pipeline. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub time_started: DateTime<Utc>,
    pub time_completed: DateTime<Utc>,
    pub user_email: String,
}

impl Execution {
    /// Create an execution, generating a fresh id when none is supplied.
    pub fn new(
        id: Option<Uuid>,
        time_started: DateTime<Utc>,
        time_completed: DateTime<Utc>,
        user_email: impl Into<String>,
    ) -> Self {
        Self {
            id: id.unwrap_or_else(Uuid::new_v4),
            time_started,
            time_completed,
            user_email: user_email.into(),
        }
    }
}

// ── Params / Stats ─────────────────────────────────────────────────

/// Matchup request parameters, 1:1 with an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchupParams {
    pub primary: String,
    #[serde(deserialize_with = "deserialize_datasets")]
    pub matchup: Vec<String>,
    #[serde(default)]
    pub depth_min: Option<f64>,
    #[serde(default)]
    pub depth_max: Option<f64>,
    pub time_tolerance: i64,
    pub radius_tolerance: f64,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub start_time: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub end_time: DateTime<Utc>,
    pub platforms: String,
    pub bbox: String,
    pub parameter: String,
}

/// Summary counts for an execution, 1:1 with an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub num_primary_matched: i64,
    pub num_secondary_matched: i64,
    pub time_to_complete: i64,
}

// ── MatchPoint ─────────────────────────────────────────────────────

/// One observation record, optionally carrying nested matched points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPoint {
    /// Caller-assigned identifier, unique only within its source dataset.
    pub id: String,
    pub lon: f64,
    pub lat: f64,
    pub source: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
    #[serde(default, rename = "fileurl", skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Opaque measurement payload, stored as serialized JSON text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<MatchPoint>,
}

impl MatchPoint {
    pub fn new(
        id: impl Into<String>,
        lon: f64,
        lat: f64,
        source: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            lon,
            lat,
            source: source.into(),
            time,
            platform: None,
            device: None,
            depth: None,
            file_url: None,
            data: None,
            matches: Vec::new(),
        }
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn depth(mut self, depth: f64) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn file_url(mut self, url: impl Into<String>) -> Self {
        self.file_url = Some(url.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_match(mut self, point: MatchPoint) -> Self {
        self.matches.push(point);
        self
    }

    /// Number of points in this subtree, including `self`.
    pub fn subtree_len(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(point) = stack.pop() {
            count += 1;
            stack.extend(point.matches.iter());
        }
        count
    }
}

// ── FlatRow ────────────────────────────────────────────────────────

/// Storage projection of a single `MatchPoint` occurrence.
///
/// `row_id` is generated once per flatten and reused across write retries,
/// so rewriting a row overwrites it instead of duplicating it.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    pub row_id: Uuid,
    pub execution_id: Uuid,
    pub value_id: String,
    /// Row id of the immediate parent row; `None` for top-level points.
    pub parent_row_id: Option<Uuid>,
    pub is_top_level: bool,
    pub lon: f64,
    pub lat: f64,
    pub source: String,
    pub time: DateTime<Utc>,
    pub platform: Option<String>,
    pub device: Option<String>,
    pub depth: Option<f64>,
    pub file_url: Option<String>,
    pub measurements_json: String,
}

impl FlatRow {
    /// Project `point` (without its children) into a row with a fresh id.
    pub fn from_point(
        execution_id: Uuid,
        parent_row_id: Option<Uuid>,
        point: &MatchPoint,
    ) -> Result<Self> {
        let measurements_json = match &point.data {
            Some(data) => serde_json::to_string(data)?,
            None => EMPTY_PAYLOAD.to_string(),
        };

        Ok(Self {
            row_id: Uuid::new_v4(),
            execution_id,
            value_id: point.id.clone(),
            parent_row_id,
            is_top_level: parent_row_id.is_none(),
            lon: point.lon,
            lat: point.lat,
            source: point.source.clone(),
            time: point.time,
            platform: point.platform.clone(),
            device: point.device.clone(),
            depth: point.depth,
            file_url: point.file_url.clone(),
            measurements_json,
        })
    }
}

/// Payload stored for points that carry no measurement data.
pub const EMPTY_PAYLOAD: &str = "[]";

// ── Read path ──────────────────────────────────────────────────────

/// Reconstructed point as returned to callers.
///
/// A trimmed entry only carries `lon`, `lat`, `source` and `time`; every
/// other field is absent and skipped on serialization. The payload lands
/// in `primary` for top-level entries and `secondary` for matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub lon: f64,
    pub lat: f64,
    /// Human readable label, `Point(<lon> <lat>)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<String>,
    pub source: String,
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
    #[serde(default, rename = "fileurl", skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<ResultEntry>,
}

impl ResultEntry {
    /// True when the entry was produced by a trimmed retrieval.
    pub fn is_trimmed(&self) -> bool {
        self.id.is_none()
    }

    /// Measurement payload regardless of which slot it was decoded into.
    pub fn payload(&self) -> Option<&Value> {
        self.primary.as_ref().or(self.secondary.as_ref())
    }

    /// Convert back into the authored shape. `None` for trimmed entries.
    pub fn to_match_point(&self) -> Option<MatchPoint> {
        let id = self.id.clone()?;
        let matches = self
            .matches
            .iter()
            .map(ResultEntry::to_match_point)
            .collect::<Option<Vec<_>>>()?;

        Some(MatchPoint {
            id,
            lon: self.lon,
            lat: self.lat,
            source: self.source.clone(),
            time: self.time,
            platform: self.platform.clone(),
            device: self.device.clone(),
            depth: self.depth,
            file_url: self.file_url.clone(),
            data: self.payload().cloned(),
            matches,
        })
    }
}

/// Label used by the full (untrimmed) projection.
pub fn point_label(lon: f64, lat: f64) -> String {
    format!("Point({:.3} {:.3})", lon, lat)
}
