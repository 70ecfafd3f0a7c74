//! Sinks for execution records and chat exchanges.

use agent_primitives::{OwnerId, RecordId};
use async_trait::async_trait;

use crate::MemoryResult;
use crate::record::{ChatRecord, ExecutionRecord, ExecutionStats};

/// Receives one record per tool execution.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// Persists `record` and returns its id.
    async fn record(&self, record: ExecutionRecord) -> MemoryResult<RecordId>;

    /// Most recent executions for `owner`, newest first.
    async fn recent(&self, owner: OwnerId, limit: usize) -> MemoryResult<Vec<ExecutionRecord>>;

    /// Counts of all executions recorded for `owner`.
    async fn statistics(&self, owner: OwnerId) -> MemoryResult<ExecutionStats>;
}

/// Receives one record per answered question.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    /// Persists an exchange and returns its id.
    async fn record(
        &self,
        question: &str,
        plan: &str,
        answer: &str,
        owner: OwnerId,
        model_label: &str,
    ) -> MemoryResult<RecordId>;

    /// The last `limit` exchanges of `owner`, oldest first.
    async fn recent(&self, owner: OwnerId, limit: usize) -> MemoryResult<Vec<ChatRecord>>;
}
