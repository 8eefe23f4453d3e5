//! Matchup result persistence engine
//!
//! Stores the nested point/match trees a matchup execution produces as flat
//! wide-column rows and reads them back:
//!
//! - `flatten` walks the forest into `FlatRow`s with generated row ids
//! - `writer` persists the rows in bounded concurrent chunks with whole-pass
//!   retry
//! - `reconstruct` rebuilds the forest from top-level and nested rows
//! - `results` ties execution, params, stats and data rows together
//!
//! Stores plug in through the `session::StoreSession` trait;
//! `memory::MemoryStore` is the in-process implementation.

pub mod codec;
pub mod config;
pub mod error;
pub mod flatten;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod reconstruct;
pub mod results;
pub mod schema;
pub mod session;
pub mod writer;

/// Rows in flight per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Write passes per execution before giving up.
pub const MAX_WRITE_ATTEMPTS: u32 = 5;

pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 10_000;

pub use config::{NestingDepth, StoreConfig};
pub use error::{MatchupError, Result};
pub use flatten::{flatten, FlattenSummary, Flattened};
pub use memory::MemoryStore;
pub use metrics::{Metrics, MetricsSnapshot};
pub use model::{
    parse_iso8601, parse_iso8601_millis, Execution, ExecutionStats, FlatRow, MatchPoint,
    MatchupParams, ResultEntry,
};
pub use reconstruct::{Reconstruction, Reconstructor};
pub use results::{parse_execution_id, ExecutionSubmission, ResultsStorage, RetrievedResults};
pub use schema::{ColumnValue, Row, Table};
pub use session::{SessionHandle, StoreSession};
pub use writer::{BatchWriter, WriteReport};
