//! Result tree flattener
//!
//! Turns the caller's ordered forest of `MatchPoint`s into the row sequence
//! the write engine persists. Rows come out in pre-order depth-first order:
//! a parent before its children, siblings in input order. The walk uses an
//! explicit stack so arbitrarily deep trees cannot overflow the call stack.

use uuid::Uuid;

use crate::error::Result;
use crate::model::{FlatRow, MatchPoint};

/// Shape of a flattened forest, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlattenSummary {
    pub rows: usize,
    pub top_level: usize,
    /// Deepest nesting level reached; top-level points are depth 0.
    pub max_depth: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flattened {
    pub rows: Vec<FlatRow>,
    pub summary: FlattenSummary,
}

struct Frame<'a> {
    parent_row_id: Option<Uuid>,
    point: &'a MatchPoint,
    depth: usize,
}

/// Flatten `points` into rows for `execution_id`.
///
/// Every row gets a fresh row id; child rows reference their parent's row
/// id. Fails only if a payload cannot be serialized.
pub fn flatten(execution_id: Uuid, points: &[MatchPoint]) -> Result<Flattened> {
    let capacity = points.iter().map(MatchPoint::subtree_len).sum();
    let mut rows = Vec::with_capacity(capacity);
    let mut max_depth = 0;

    // Pushed in reverse so the first sibling pops first.
    let mut stack: Vec<Frame<'_>> = points
        .iter()
        .rev()
        .map(|point| Frame {
            parent_row_id: None,
            point,
            depth: 0,
        })
        .collect();

    while let Some(frame) = stack.pop() {
        let row = FlatRow::from_point(execution_id, frame.parent_row_id, frame.point)?;
        let row_id = row.row_id;
        rows.push(row);
        max_depth = max_depth.max(frame.depth);

        stack.extend(frame.point.matches.iter().rev().map(|child| Frame {
            parent_row_id: Some(row_id),
            point: child,
            depth: frame.depth + 1,
        }));
    }

    let summary = FlattenSummary {
        rows: rows.len(),
        top_level: points.len(),
        max_depth,
    };
    tracing::debug!(
        execution_id = %execution_id,
        rows = summary.rows,
        top_level = summary.top_level,
        max_depth = summary.max_depth,
        "flattened result tree"
    );

    Ok(Flattened { rows, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EMPTY_PAYLOAD;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashMap;

    fn point(id: &str) -> MatchPoint {
        MatchPoint::new(id, 1.0, 2.0, "A", Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_empty_forest() {
        let flat = flatten(Uuid::new_v4(), &[]).unwrap();
        assert!(flat.rows.is_empty());
        assert_eq!(flat.summary, FlattenSummary::default());
    }

    #[test]
    fn test_single_match() {
        let exec = Uuid::new_v4();
        let tree = point("P1")
            .data(json!({"sst": 20.0}))
            .with_match(point("M1").data(json!({"sst": 19.5})));

        let flat = flatten(exec, &[tree]).unwrap();
        assert_eq!(flat.rows.len(), 2);

        let (p, m) = (&flat.rows[0], &flat.rows[1]);
        assert!(p.is_top_level);
        assert_eq!(p.parent_row_id, None);
        assert!(!m.is_top_level);
        assert_eq!(m.parent_row_id, Some(p.row_id));
        assert_eq!(m.measurements_json, r#"{"sst":19.5}"#);
        assert!(flat.rows.iter().all(|r| r.execution_id == exec));
    }

    #[test]
    fn test_preorder_emission() {
        let forest = vec![
            point("a")
                .with_match(point("a1").with_match(point("a1x")).with_match(point("a1y")))
                .with_match(point("a2")),
            point("b"),
            point("c").with_match(point("c1")),
        ];

        let flat = flatten(Uuid::new_v4(), &forest).unwrap();
        let order: Vec<&str> = flat.rows.iter().map(|r| r.value_id.as_str()).collect();
        assert_eq!(order, vec!["a", "a1", "a1x", "a1y", "a2", "b", "c", "c1"]);

        assert_eq!(flat.summary.rows, 8);
        assert_eq!(flat.summary.top_level, 3);
        assert_eq!(flat.summary.max_depth, 2);
    }

    #[test]
    fn test_parent_links_follow_tree() {
        let forest = vec![point("a")
            .with_match(point("a1").with_match(point("a1x")))
            .with_match(point("a2"))];

        let flat = flatten(Uuid::new_v4(), &forest).unwrap();
        let by_value: HashMap<&str, &FlatRow> =
            flat.rows.iter().map(|r| (r.value_id.as_str(), r)).collect();

        assert_eq!(by_value["a1"].parent_row_id, Some(by_value["a"].row_id));
        assert_eq!(by_value["a2"].parent_row_id, Some(by_value["a"].row_id));
        assert_eq!(by_value["a1x"].parent_row_id, Some(by_value["a1"].row_id));
    }

    #[test]
    fn test_missing_payload_is_empty_list() {
        let flat = flatten(Uuid::new_v4(), &[point("a").with_match(point("b"))]).unwrap();
        assert!(flat.rows.iter().all(|r| r.measurements_json == EMPTY_PAYLOAD));
    }

    #[test]
    fn test_repeated_point_ids_get_distinct_rows() {
        let forest = vec![point("dup").with_match(point("m")), point("dup").with_match(point("m"))];
        let flat = flatten(Uuid::new_v4(), &forest).unwrap();

        assert_eq!(flat.rows.len(), 4);
        assert_ne!(flat.rows[0].row_id, flat.rows[2].row_id);
        assert_eq!(flat.rows[3].parent_row_id, Some(flat.rows[2].row_id));
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        let mut tree = point("leaf");
        for depth in (0..5_000).rev() {
            tree = point(&format!("n{}", depth)).with_match(tree);
        }

        let flat = flatten(Uuid::new_v4(), std::slice::from_ref(&tree)).unwrap();
        assert_eq!(flat.rows.len(), 5_001);
        assert_eq!(flat.summary.max_depth, 5_000);
        for pair in flat.rows.windows(2) {
            assert_eq!(pair[1].parent_row_id, Some(pair[0].row_id));
        }

        // Dropping a 5000-deep tree recurses; unwind it by hand.
        let mut next = Some(tree);
        while let Some(mut node) = next {
            next = node.matches.pop();
        }
    }
}
