//! Records produced by the orchestrator and consumed by storage.

use agent_primitives::{OwnerId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{MemoryError, MemoryResult};

/// Outcome of one tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The tool returned a result.
    Success,
    /// The tool raised an error.
    Error,
}

impl ExecutionStatus {
    /// Lower-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Persisted trace of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    id: RecordId,
    owner: OwnerId,
    question: String,
    tool_name: String,
    #[serde(default)]
    params: Map<String, Value>,
    result: String,
    status: ExecutionStatus,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Creates a builder for an execution of `tool_name` on behalf of `owner`.
    #[must_use]
    pub fn builder(owner: OwnerId, tool_name: impl Into<String>) -> ExecutionRecordBuilder {
        let now = Utc::now();
        ExecutionRecordBuilder {
            id: RecordId::random(),
            owner,
            question: String::new(),
            tool_name: tool_name.into(),
            params: Map::new(),
            result: String::new(),
            status: ExecutionStatus::Success,
            start_time: now,
            end_time: now,
        }
    }

    /// Record identifier.
    #[must_use]
    pub const fn id(&self) -> RecordId {
        self.id
    }

    /// Owner on whose behalf the tool ran.
    #[must_use]
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }

    /// The framed step input that led to the call.
    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    /// Name of the executed tool.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Arguments passed to the tool.
    #[must_use]
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Tool output or error message.
    #[must_use]
    pub fn result(&self) -> &str {
        &self.result
    }

    /// Success or error.
    #[must_use]
    pub const fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// When the tool was invoked.
    #[must_use]
    pub const fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// When the tool returned.
    #[must_use]
    pub const fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Wall-clock duration in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }

    /// Returns a copy whose result is replaced by `result`.
    #[must_use]
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = result.into();
        self
    }
}

/// Builder for [`ExecutionRecord`].
#[derive(Debug)]
pub struct ExecutionRecordBuilder {
    id: RecordId,
    owner: OwnerId,
    question: String,
    tool_name: String,
    params: Map<String, Value>,
    result: String,
    status: ExecutionStatus,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl ExecutionRecordBuilder {
    /// Sets the framed question.
    #[must_use]
    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    /// Sets the call arguments.
    #[must_use]
    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Sets the result text and status.
    #[must_use]
    pub fn outcome(mut self, status: ExecutionStatus, result: impl Into<String>) -> Self {
        self.status = status;
        self.result = result.into();
        self
    }

    /// Sets start and end timestamps.
    #[must_use]
    pub fn timing(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    /// Finalises the record.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when the tool name is blank or
    /// the end time precedes the start time.
    pub fn build(self) -> MemoryResult<ExecutionRecord> {
        if self.tool_name.trim().is_empty() {
            return Err(MemoryError::invalid_record("tool name must not be empty"));
        }
        if self.end_time < self.start_time {
            return Err(MemoryError::invalid_record(
                "execution cannot end before it starts",
            ));
        }
        Ok(ExecutionRecord {
            id: self.id,
            owner: self.owner,
            question: self.question,
            tool_name: self.tool_name,
            params: self.params,
            result: self.result,
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
        })
    }
}

/// Aggregate execution counts for one owner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    /// All recorded executions.
    pub total: usize,
    /// Executions with [`ExecutionStatus::Success`].
    pub succeeded: usize,
    /// Executions with [`ExecutionStatus::Error`].
    pub failed: usize,
}

impl ExecutionStats {
    /// Counts the given records.
    pub fn tally<'a>(records: impl IntoIterator<Item = &'a ExecutionRecord>) -> Self {
        records
            .into_iter()
            .fold(Self::default(), |mut stats, record| {
                stats.total += 1;
                match record.status() {
                    ExecutionStatus::Success => stats.succeeded += 1,
                    ExecutionStatus::Error => stats.failed += 1,
                }
                stats
            })
    }
}

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    id: RecordId,
    owner: OwnerId,
    question: String,
    plan: String,
    answer: String,
    model_label: String,
    timestamp: DateTime<Utc>,
}

impl ChatRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        owner: OwnerId,
        question: impl Into<String>,
        plan: impl Into<String>,
        answer: impl Into<String>,
        model_label: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordId::random(),
            owner,
            question: question.into(),
            plan: plan.into(),
            answer: answer.into(),
            model_label: model_label.into(),
            timestamp: Utc::now(),
        }
    }

    /// Record identifier.
    #[must_use]
    pub const fn id(&self) -> RecordId {
        self.id
    }

    /// Owner of the conversation.
    #[must_use]
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Raw user message.
    #[must_use]
    pub fn question(&self) -> &str {
        &self.question
    }

    /// Rendered plan.
    #[must_use]
    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// Final answer with reasoning traces removed.
    #[must_use]
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Label of the model that answered.
    #[must_use]
    pub fn model_label(&self) -> &str {
        &self.model_label
    }

    /// When the exchange was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn builder_validates_timing_and_name() {
        let start = Utc::now();
        let err = ExecutionRecord::builder(OwnerId::new(1), "add")
            .timing(start, start - Duration::seconds(1))
            .build()
            .expect_err("end before start");
        assert!(matches!(err, MemoryError::InvalidRecord { .. }));

        assert!(ExecutionRecord::builder(OwnerId::new(1), " ").build().is_err());
    }

    #[test]
    fn stats_count_statuses() {
        let ok = ExecutionRecord::builder(OwnerId::new(1), "add")
            .outcome(ExecutionStatus::Success, "3")
            .build()
            .unwrap();
        let failed = ExecutionRecord::builder(OwnerId::new(1), "divide")
            .outcome(ExecutionStatus::Error, "division by zero")
            .build()
            .unwrap();

        let stats = ExecutionStats::tally([&ok, &failed, &ok]);
        assert_eq!(
            stats,
            ExecutionStats {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        );
    }
}
