//! ResultsStorage - store and retrieve whole matchup executions
//!
//! `store` writes the execution record, its params and stats, then every
//! flattened data row through the batch writer. `retrieve` reads params and
//! stats (both required) and reconstructs the point forest.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{
    decode_execution, decode_params, decode_stats, encode_execution, encode_params, encode_stats,
};
use crate::config::StoreConfig;
use crate::error::{MatchupError, Result};
use crate::flatten::flatten;
use crate::metrics::Metrics;
use crate::model::{
    deserialize_timestamp, Execution, ExecutionStats, MatchPoint, MatchupParams, ResultEntry,
};
use crate::reconstruct::Reconstructor;
use crate::schema::Table;
use crate::session::SessionHandle;
use crate::writer::BatchWriter;

/// Everything the pipeline hands over for one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSubmission {
    /// Caller-chosen id; a fresh one is generated when absent.
    #[serde(default)]
    pub execution_id: Option<Uuid>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub time_started: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub time_completed: DateTime<Utc>,
    pub user_email: String,
    pub params: MatchupParams,
    pub stats: ExecutionStats,
    #[serde(default)]
    pub points: Vec<MatchPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedResults {
    pub execution_id: Uuid,
    pub params: MatchupParams,
    pub stats: ExecutionStats,
    pub points: Vec<ResultEntry>,
}

pub struct ResultsStorage {
    config: StoreConfig,
    writer: BatchWriter,
    reconstructor: Reconstructor,
    metrics: Arc<Metrics>,
}

impl ResultsStorage {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());
        let writer = BatchWriter::new(&config)?.with_metrics(Arc::clone(&metrics));
        let reconstructor = Reconstructor::new(config.nesting_depth);
        Ok(Self {
            config,
            writer,
            reconstructor,
            metrics,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Persist a whole execution and return its id.
    ///
    /// Records are written first, data rows last. A `WriteFailed` leaves the
    /// records and any rows that landed in place.
    pub async fn store(
        &self,
        handle: &SessionHandle,
        submission: &ExecutionSubmission,
    ) -> Result<Uuid> {
        let execution = Execution::new(
            submission.execution_id,
            submission.time_started,
            submission.time_completed,
            submission.user_email.as_str(),
        );
        let execution_id = execution.id;
        let session = handle.session();

        session
            .put_record(Table::Executions, encode_execution(&execution))
            .await?;
        session
            .put_record(Table::Params, encode_params(execution_id, &submission.params))
            .await?;
        session
            .put_record(Table::ExecutionStats, encode_stats(execution_id, &submission.stats))
            .await?;

        let flattened = flatten(execution_id, &submission.points)?;
        let report = self
            .writer
            .write_all(handle, execution_id, &flattened.rows)
            .await?;

        tracing::info!(
            execution_id = %execution_id,
            rows = report.rows,
            top_level = flattened.summary.top_level,
            max_depth = flattened.summary.max_depth,
            attempts = report.attempts,
            "stored execution"
        );
        Ok(execution_id)
    }

    /// Read back params, stats and the point forest of an execution.
    pub async fn retrieve(
        &self,
        handle: &SessionHandle,
        execution_id: Uuid,
        trim: bool,
    ) -> Result<RetrievedResults> {
        let session = handle.session();

        let params_row = session
            .get_record(Table::Params, execution_id)
            .await?
            .ok_or(MatchupError::ExecutionNotFound(execution_id))?;
        let stats_row = session
            .get_record(Table::ExecutionStats, execution_id)
            .await?
            .ok_or(MatchupError::ExecutionNotFound(execution_id))?;

        let params = decode_params(&params_row)?;
        let stats = decode_stats(&stats_row)?;
        let reconstruction = self.reconstructor.load(handle, execution_id, trim).await?;

        Ok(RetrievedResults {
            execution_id,
            params,
            stats,
            points: reconstruction.points,
        })
    }

    /// `retrieve` with the execution id in canonical text form.
    pub async fn retrieve_str(
        &self,
        handle: &SessionHandle,
        execution_id: &str,
        trim: bool,
    ) -> Result<RetrievedResults> {
        let execution_id = parse_execution_id(execution_id)?;
        self.retrieve(handle, execution_id, trim).await
    }

    /// The execution record itself.
    pub async fn execution(&self, handle: &SessionHandle, execution_id: Uuid) -> Result<Execution> {
        let row = handle
            .session()
            .get_record(Table::Executions, execution_id)
            .await?
            .ok_or(MatchupError::ExecutionNotFound(execution_id))?;
        decode_execution(&row)
    }
}

pub fn parse_execution_id(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text.trim()).map_err(|_| MatchupError::InvalidExecutionId(text.to_string()))
}
