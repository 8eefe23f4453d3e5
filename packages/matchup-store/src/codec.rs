//! Entity ↔ row mapping for every table.
//!
//! Data rows exist in two generations. Current rows carry the payload as
//! JSON text in `measurement_values_json`; legacy rows carry a
//! `measurement_values` map of measurement name → double. Both decode to the
//! same JSON object so callers never see the difference.

use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::error::{MatchupError, Result};
use crate::model::{split_datasets, Execution, ExecutionStats, FlatRow, MatchupParams};
use crate::schema::{columns, ColumnValue, Row};

// ── Execution / params / stats ─────────────────────────────────────

pub fn encode_execution(execution: &Execution) -> Row {
    Row::new()
        .with(columns::ID, execution.id)
        .with(columns::TIME_STARTED, execution.time_started)
        .with(columns::TIME_COMPLETED, execution.time_completed)
        .with(columns::USER_EMAIL, execution.user_email.as_str())
}

pub fn decode_execution(row: &Row) -> Result<Execution> {
    Ok(Execution {
        id: row.uuid(columns::ID)?,
        time_started: row.timestamp(columns::TIME_STARTED)?,
        time_completed: row.timestamp(columns::TIME_COMPLETED)?,
        user_email: row.text(columns::USER_EMAIL)?,
    })
}

pub fn encode_params(execution_id: Uuid, params: &MatchupParams) -> Row {
    Row::new()
        .with(columns::EXECUTION_ID, execution_id)
        .with(columns::PRIMARY_DATASET, params.primary.as_str())
        .with(columns::MATCHUP_DATASETS, params.matchup.join(","))
        .with(columns::DEPTH_MIN, params.depth_min)
        .with(columns::DEPTH_MAX, params.depth_max)
        .with(columns::TIME_TOLERANCE, params.time_tolerance)
        .with(columns::RADIUS_TOLERANCE, params.radius_tolerance)
        .with(columns::START_TIME, params.start_time)
        .with(columns::END_TIME, params.end_time)
        .with(columns::PLATFORMS, params.platforms.as_str())
        .with(columns::BOUNDING_BOX, params.bbox.as_str())
        .with(columns::PARAMETER, params.parameter.as_str())
}

pub fn decode_params(row: &Row) -> Result<MatchupParams> {
    Ok(MatchupParams {
        primary: row.text(columns::PRIMARY_DATASET)?,
        matchup: split_datasets(&row.text(columns::MATCHUP_DATASETS)?),
        depth_min: row.opt_double(columns::DEPTH_MIN)?,
        depth_max: row.opt_double(columns::DEPTH_MAX)?,
        time_tolerance: row.int(columns::TIME_TOLERANCE)?,
        radius_tolerance: row.double(columns::RADIUS_TOLERANCE)?,
        start_time: row.timestamp(columns::START_TIME)?,
        end_time: row.timestamp(columns::END_TIME)?,
        platforms: row.opt_text(columns::PLATFORMS)?.unwrap_or_default(),
        bbox: row.opt_text(columns::BOUNDING_BOX)?.unwrap_or_default(),
        parameter: row.opt_text(columns::PARAMETER)?.unwrap_or_default(),
    })
}

pub fn encode_stats(execution_id: Uuid, stats: &ExecutionStats) -> Row {
    Row::new()
        .with(columns::EXECUTION_ID, execution_id)
        .with(columns::NUM_GRIDDED_MATCHED, stats.num_primary_matched)
        .with(columns::NUM_GRIDDED_CHECKED, ColumnValue::Null)
        .with(columns::NUM_INSITU_MATCHED, stats.num_secondary_matched)
        .with(columns::NUM_INSITU_CHECKED, ColumnValue::Null)
        .with(columns::TIME_TO_COMPLETE, stats.time_to_complete)
}

pub fn decode_stats(row: &Row) -> Result<ExecutionStats> {
    Ok(ExecutionStats {
        num_primary_matched: row.opt_int(columns::NUM_GRIDDED_MATCHED)?.unwrap_or(0),
        num_secondary_matched: row.opt_int(columns::NUM_INSITU_MATCHED)?.unwrap_or(0),
        time_to_complete: row.opt_int(columns::TIME_TO_COMPLETE)?.unwrap_or(0),
    })
}

// ── Data rows ──────────────────────────────────────────────────────

/// Encode a flattened row in `columns::DATA_INSERT` layout.
pub fn encode_flat_row(row: &FlatRow) -> Row {
    Row::new()
        .with(columns::ID, row.row_id)
        .with(columns::EXECUTION_ID, row.execution_id)
        .with(columns::VALUE_ID, row.value_id.as_str())
        .with(columns::PRIMARY_VALUE_ID, row.parent_row_id)
        .with(columns::X, row.lon)
        .with(columns::Y, row.lat)
        .with(columns::SOURCE_DATASET, row.source.as_str())
        .with(columns::MEASUREMENT_TIME, row.time)
        .with(columns::PLATFORM, row.platform.clone())
        .with(columns::DEVICE, row.device.clone())
        .with(columns::MEASUREMENT_VALUES_JSON, row.measurements_json.as_str())
        .with(columns::IS_PRIMARY, row.is_top_level)
        .with(columns::DEPTH, row.depth)
        .with(columns::FILE_URL, row.file_url.clone())
}

/// Parent reference stored on a data row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParentRef {
    /// Generated row id of the parent row.
    Row(Uuid),
    /// Point identifier of a top-level parent, as older writers stored it.
    Value(String),
}

/// Decoded data row, prior to tree assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    pub row_id: Uuid,
    pub value_id: String,
    pub parent: Option<ParentRef>,
    pub is_top_level: bool,
    pub lon: f64,
    pub lat: f64,
    pub source: String,
    pub time: DateTime<Utc>,
    pub platform: Option<String>,
    pub device: Option<String>,
    pub depth: Option<f64>,
    pub file_url: Option<String>,
    pub payload: Value,
}

pub fn decode_data_row(row: &Row) -> Result<DataRow> {
    let parent = match row.get(columns::PRIMARY_VALUE_ID) {
        Some(ColumnValue::Uuid(id)) => Some(ParentRef::Row(*id)),
        Some(ColumnValue::Text(value_id)) => Some(ParentRef::Value(value_id.clone())),
        Some(ColumnValue::Null) | None => None,
        Some(other) => {
            return Err(MatchupError::decode(
                row.describe(),
                format!("unsupported parent reference {:?}", other),
            ))
        }
    };

    Ok(DataRow {
        row_id: row.uuid(columns::ID)?,
        value_id: row.text(columns::VALUE_ID)?,
        parent,
        is_top_level: row.boolean(columns::IS_PRIMARY)?,
        lon: row.double(columns::X)?,
        lat: row.double(columns::Y)?,
        source: row.text(columns::SOURCE_DATASET)?,
        time: row.timestamp(columns::MEASUREMENT_TIME)?,
        platform: row.opt_text(columns::PLATFORM)?,
        device: row.opt_text(columns::DEVICE)?,
        depth: row.opt_double(columns::DEPTH)?,
        file_url: row.opt_text(columns::FILE_URL)?,
        payload: decode_payload(row)?,
    })
}

/// Decode the measurement payload, current layout first.
pub fn decode_payload(row: &Row) -> Result<Value> {
    match row.get(columns::MEASUREMENT_VALUES_JSON) {
        Some(ColumnValue::Text(text)) => {
            return serde_json::from_str(text).map_err(|e| {
                MatchupError::decode(row.describe(), format!("malformed payload JSON: {}", e))
            });
        }
        Some(ColumnValue::Null) | None => {}
        Some(other) => {
            return Err(MatchupError::decode(
                row.describe(),
                format!("payload column holds {:?}", other),
            ))
        }
    }

    match row.get(columns::MEASUREMENT_VALUES) {
        Some(ColumnValue::DoubleMap(values)) => {
            let mut object = Map::with_capacity(values.len());
            for (name, value) in values {
                let number = Number::from_f64(*value).ok_or_else(|| {
                    MatchupError::decode(
                        row.describe(),
                        format!("measurement '{}' is not finite", name),
                    )
                })?;
                object.insert(name.clone(), Value::Number(number));
            }
            Ok(Value::Object(object))
        }
        _ => Err(MatchupError::decode(
            row.describe(),
            "row has neither measurement_values_json nor measurement_values",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MatchPoint;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap()
    }

    fn sample_params() -> MatchupParams {
        MatchupParams {
            primary: "MUR25".into(),
            matchup: vec!["ICOADS".into(), "SAMOS".into()],
            depth_min: Some(0.0),
            depth_max: None,
            time_tolerance: 86400,
            radius_tolerance: 1000.0,
            start_time: t0(),
            end_time: t0(),
            platforms: "1,2,3".into(),
            bbox: "-45,15,-30,30".into(),
            parameter: "sst".into(),
        }
    }

    #[test]
    fn test_params_round_trip() {
        let params = sample_params();
        let row = encode_params(Uuid::new_v4(), &params);
        assert_eq!(row.text(columns::MATCHUP_DATASETS).unwrap(), "ICOADS,SAMOS");
        assert_eq!(decode_params(&row).unwrap(), params);
    }

    #[test]
    fn test_stats_round_trip_writes_null_checked_counts() {
        let stats = ExecutionStats {
            num_primary_matched: 4,
            num_secondary_matched: 9,
            time_to_complete: 31,
        };
        let row = encode_stats(Uuid::new_v4(), &stats);
        assert_eq!(row.get(columns::NUM_GRIDDED_CHECKED), Some(&ColumnValue::Null));
        assert_eq!(decode_stats(&row).unwrap(), stats);
    }

    #[test]
    fn test_execution_round_trip() {
        let execution = Execution::new(None, t0(), t0(), "ops@example.org");
        let row = encode_execution(&execution);
        assert_eq!(decode_execution(&row).unwrap(), execution);
    }

    #[test]
    fn test_flat_row_encodes_all_insert_columns() {
        let point = MatchPoint::new("p1", 1.0, 2.0, "A", t0());
        let flat = FlatRow::from_point(Uuid::new_v4(), None, &point).unwrap();
        let row = encode_flat_row(&flat);
        for column in columns::DATA_INSERT {
            assert!(row.has_column(column), "missing {}", column);
        }
        assert_eq!(row.len(), columns::DATA_INSERT.len());
    }

    #[test]
    fn test_data_row_round_trip() {
        let parent = Uuid::new_v4();
        let point = MatchPoint::new("m1", 1.0, 2.0, "B", t0())
            .platform("ship")
            .depth(5.0)
            .data(json!([{"sea_water_temperature": 20.1}]));
        let flat = FlatRow::from_point(Uuid::new_v4(), Some(parent), &point).unwrap();
        let decoded = decode_data_row(&encode_flat_row(&flat)).unwrap();

        assert_eq!(decoded.row_id, flat.row_id);
        assert_eq!(decoded.parent, Some(ParentRef::Row(parent)));
        assert!(!decoded.is_top_level);
        assert_eq!(decoded.platform.as_deref(), Some("ship"));
        assert_eq!(decoded.device, None);
        assert_eq!(decoded.payload, json!([{"sea_water_temperature": 20.1}]));
    }

    #[test]
    fn test_legacy_payload_matches_current_payload() {
        let mut current = Row::new().with(
            columns::MEASUREMENT_VALUES_JSON,
            r#"{"sst": 20.5, "wind_speed": 3.0}"#,
        );
        current.set(columns::ID, Uuid::new_v4());

        let legacy = Row::new()
            .with(columns::ID, Uuid::new_v4())
            .with(
                columns::MEASUREMENT_VALUES,
                BTreeMap::from([("sst".to_string(), 20.5), ("wind_speed".to_string(), 3.0)]),
            );

        assert_eq!(decode_payload(&current).unwrap(), decode_payload(&legacy).unwrap());
    }

    #[test]
    fn test_null_json_column_falls_back_to_legacy() {
        let row = Row::new()
            .with(columns::MEASUREMENT_VALUES_JSON, ColumnValue::Null)
            .with(columns::MEASUREMENT_VALUES, BTreeMap::from([("sst".to_string(), 1.0)]));
        assert_eq!(decode_payload(&row).unwrap(), json!({"sst": 1.0}));
    }

    #[test]
    fn test_missing_payload_is_decode_error() {
        let row = Row::new().with(columns::ID, Uuid::new_v4());
        let err = decode_payload(&row).unwrap_err();
        assert_eq!(err.code(), "DECODE_ERROR");
    }

    #[test]
    fn test_malformed_payload_is_decode_error() {
        let row = Row::new().with(columns::MEASUREMENT_VALUES_JSON, "{not json");
        assert!(matches!(decode_payload(&row), Err(MatchupError::Decode { .. })));
    }

    #[test]
    fn test_text_parent_reference_is_value_ref() {
        let point = MatchPoint::new("m1", 1.0, 2.0, "B", t0());
        let flat = FlatRow::from_point(Uuid::new_v4(), Some(Uuid::new_v4()), &point).unwrap();
        let mut row = encode_flat_row(&flat);
        row.set(columns::PRIMARY_VALUE_ID, "p1");
        row.set(columns::IS_PRIMARY, 0i64);

        let decoded = decode_data_row(&row).unwrap();
        assert_eq!(decoded.parent, Some(ParentRef::Value("p1".into())));
        assert!(!decoded.is_top_level);
    }
}
