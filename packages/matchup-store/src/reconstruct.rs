//! Result reconstructor
//!
//! Rebuilds the point forest of an execution from its flat data rows.
//!
//! Top-level rows become the roots, keyed by point identifier. When two
//! top-level rows share an identifier the later one read replaces the
//! earlier, keeping the earlier one's position. Rows below the replaced row
//! attach to the surviving entry.
//!
//! Nested rows attach to their parent through the stored parent reference:
//! a parent row id for current rows, or the parent's point identifier for
//! rows from older writers. `NestingDepth::Full` follows those references to
//! any depth; `NestingDepth::Single` only attaches rows whose parent is a
//! top-level row. Rows that end up unreachable are counted as dropped.

use std::collections::HashMap;

use uuid::Uuid;

use crate::codec::{decode_data_row, DataRow, ParentRef};
use crate::config::NestingDepth;
use crate::error::Result;
use crate::model::{point_label, ResultEntry};
use crate::schema::{columns, Row};
use crate::session::SessionHandle;

#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    pub points: Vec<ResultEntry>,
    /// Rows read but not present in `points`.
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconstructor {
    depth: NestingDepth,
}

struct Node {
    row: DataRow,
    top_level: bool,
}

impl Reconstructor {
    pub fn new(depth: NestingDepth) -> Self {
        Self { depth }
    }

    pub fn depth(&self) -> NestingDepth {
        self.depth
    }

    /// Read and assemble the forest of `execution_id`.
    ///
    /// A trimmed load never reads nested rows.
    pub async fn load(
        &self,
        handle: &SessionHandle,
        execution_id: Uuid,
        trim: bool,
    ) -> Result<Reconstruction> {
        let session = handle.session();
        let top_rows = session.select_data_rows(execution_id, true).await?;

        let reconstruction = if trim {
            assemble_trimmed(&top_rows)?
        } else {
            let nested_rows = session.select_data_rows(execution_id, false).await?;
            self.assemble(&top_rows, &nested_rows)?
        };

        if reconstruction.dropped > 0 {
            tracing::warn!(
                execution_id = %execution_id,
                dropped = reconstruction.dropped,
                depth = ?self.depth,
                "rows not reachable from any top-level point"
            );
        }
        tracing::debug!(
            execution_id = %execution_id,
            points = reconstruction.points.len(),
            trim,
            "reconstructed result tree"
        );

        Ok(reconstruction)
    }

    /// Assemble the full forest from already-read rows.
    pub fn assemble(&self, top_rows: &[Row], nested_rows: &[Row]) -> Result<Reconstruction> {
        let mut arena: Vec<Option<Node>> = Vec::with_capacity(top_rows.len() + nested_rows.len());
        let mut roots: Vec<usize> = Vec::new();
        let mut root_by_value: HashMap<String, usize> = HashMap::new();
        // Root slot of each top-level row, indexed by arena position.
        let mut top_slot: Vec<usize> = Vec::with_capacity(top_rows.len());

        for row in top_rows {
            let row = decode_data_row(row)?;
            let index = arena.len();
            let slot = match root_by_value.get(&row.value_id) {
                Some(&slot) => {
                    roots[slot] = index;
                    slot
                }
                None => {
                    root_by_value.insert(row.value_id.clone(), roots.len());
                    roots.push(index);
                    roots.len() - 1
                }
            };
            top_slot.push(slot);
            arena.push(Some(Node {
                row,
                top_level: true,
            }));
        }

        for row in nested_rows {
            arena.push(Some(Node {
                row: decode_data_row(row)?,
                top_level: false,
            }));
        }

        // Parent index over every row read, in read order.
        let by_row_id: HashMap<Uuid, usize> = arena
            .iter()
            .enumerate()
            .filter_map(|(index, node)| node.as_ref().map(|n| (n.row.row_id, index)))
            .collect();

        let mut kids: Vec<Vec<usize>> = vec![Vec::new(); arena.len()];
        for index in top_rows.len()..arena.len() {
            let Some(node) = &arena[index] else { continue };
            let parent = match &node.row.parent {
                // A replaced top-level parent resolves to the entry that replaced it.
                Some(ParentRef::Row(id)) => by_row_id.get(id).map(|&p| match top_slot.get(p) {
                    Some(&slot) => roots[slot],
                    None => p,
                }),
                Some(ParentRef::Value(value_id)) => {
                    root_by_value.get(value_id).map(|&slot| roots[slot])
                }
                None => None,
            };
            if let Some(parent) = parent.filter(|&p| p != index) {
                kids[parent].push(index);
            }
        }

        // Pre-order walk from the roots.
        let max_depth = match self.depth {
            NestingDepth::Single => 1,
            NestingDepth::Full => usize::MAX,
        };
        let mut order: Vec<usize> = Vec::with_capacity(arena.len());
        let mut stack: Vec<(usize, usize)> = roots.iter().rev().map(|&r| (r, 0)).collect();
        while let Some((index, depth)) = stack.pop() {
            order.push(index);
            if depth < max_depth {
                stack.extend(kids[index].iter().rev().map(|&k| (k, depth + 1)));
            } else {
                kids[index].clear();
            }
        }

        // Children are built before their parents in reverse pre-order.
        let mut built: HashMap<usize, ResultEntry> = HashMap::with_capacity(order.len());
        for &index in order.iter().rev() {
            let Some(node) = arena[index].take() else { continue };
            let matches = kids[index]
                .iter()
                .filter_map(|k| built.remove(k))
                .collect();
            built.insert(index, full_entry(node, matches));
        }

        let points: Vec<ResultEntry> = roots.iter().filter_map(|r| built.remove(r)).collect();
        let dropped = arena.iter().filter(|node| node.is_some()).count();

        Ok(Reconstruction { points, dropped })
    }
}

impl Default for Reconstructor {
    fn default() -> Self {
        Self::new(NestingDepth::default())
    }
}

/// Assemble a trimmed forest: positions, source and time of top-level rows.
pub fn assemble_trimmed(top_rows: &[Row]) -> Result<Reconstruction> {
    let mut points: Vec<ResultEntry> = Vec::with_capacity(top_rows.len());
    let mut slot_by_value: HashMap<String, usize> = HashMap::new();
    let mut replaced = 0;

    for row in top_rows {
        let value_id = row.text(columns::VALUE_ID)?;
        let entry = ResultEntry {
            id: None,
            lon: row.double(columns::X)?,
            lat: row.double(columns::Y)?,
            point: None,
            source: row.text(columns::SOURCE_DATASET)?,
            time: row.timestamp(columns::MEASUREMENT_TIME)?,
            platform: None,
            device: None,
            depth: None,
            file_url: None,
            primary: None,
            secondary: None,
            matches: Vec::new(),
        };
        match slot_by_value.get(&value_id) {
            Some(&slot) => {
                points[slot] = entry;
                replaced += 1;
            }
            None => {
                slot_by_value.insert(value_id, points.len());
                points.push(entry);
            }
        }
    }

    Ok(Reconstruction {
        points,
        dropped: replaced,
    })
}

fn full_entry(node: Node, matches: Vec<ResultEntry>) -> ResultEntry {
    let row = node.row;
    let (primary, secondary) = if node.top_level {
        (Some(row.payload), None)
    } else {
        (None, Some(row.payload))
    };

    ResultEntry {
        id: Some(row.value_id),
        lon: row.lon,
        lat: row.lat,
        point: Some(point_label(row.lon, row.lat)),
        source: row.source,
        time: row.time,
        platform: row.platform,
        device: row.device,
        depth: row.depth,
        file_url: row.file_url,
        primary,
        secondary,
        matches,
    }
}
