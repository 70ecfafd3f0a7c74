//! In-memory history backed by bounded per-owner ring buffers.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

use agent_primitives::{OwnerId, RecordId};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::MemoryResult;
use crate::history::{ChatHistory, ExecutionSink};
use crate::record::{ChatRecord, ExecutionRecord, ExecutionStats, ExecutionStatus};

/// Configuration for the volatile history.
#[derive(Debug, Clone, Copy)]
pub struct VolatileConfig {
    capacity: NonZeroUsize,
}

impl VolatileConfig {
    /// Creates a configuration retaining `capacity` records per owner and kind.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { capacity }
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(self) -> NonZeroUsize {
        self.capacity
    }
}

impl Default for VolatileConfig {
    fn default() -> Self {
        Self {
            capacity: NonZeroUsize::new(256).expect("non-zero"),
        }
    }
}

#[derive(Debug, Default)]
struct OwnerHistory {
    executions: VecDeque<ExecutionRecord>,
    chats: VecDeque<ChatRecord>,
    stats: ExecutionStats,
}

/// Volatile history retaining the most recent records of every owner.
///
/// Statistics count every execution ever recorded, including evicted ones.
#[derive(Debug, Default)]
pub struct VolatileHistory {
    config: VolatileConfig,
    owners: RwLock<HashMap<OwnerId, OwnerHistory>>,
}

impl VolatileHistory {
    /// Creates a new history using the supplied configuration.
    #[must_use]
    pub fn new(config: VolatileConfig) -> Self {
        Self {
            config,
            owners: RwLock::new(HashMap::new()),
        }
    }

    fn push_bounded<T>(&self, ring: &mut VecDeque<T>, item: T) {
        ring.push_back(item);
        while ring.len() > self.config.capacity().get() {
            ring.pop_front();
        }
    }
}

#[async_trait]
impl ExecutionSink for VolatileHistory {
    async fn record(&self, record: ExecutionRecord) -> MemoryResult<RecordId> {
        let id = record.id();
        let mut guard = self.owners.write().await;
        let history = guard.entry(record.owner()).or_default();
        history.stats.total += 1;
        match record.status() {
            ExecutionStatus::Success => history.stats.succeeded += 1,
            ExecutionStatus::Error => history.stats.failed += 1,
        }
        self.push_bounded(&mut history.executions, record);
        Ok(id)
    }

    async fn recent(&self, owner: OwnerId, limit: usize) -> MemoryResult<Vec<ExecutionRecord>> {
        let guard = self.owners.read().await;
        Ok(guard
            .get(&owner)
            .map(|history| {
                history
                    .executions
                    .iter()
                    .rev()
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn statistics(&self, owner: OwnerId) -> MemoryResult<ExecutionStats> {
        let guard = self.owners.read().await;
        Ok(guard
            .get(&owner)
            .map(|history| history.stats)
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChatHistory for VolatileHistory {
    async fn record(
        &self,
        question: &str,
        plan: &str,
        answer: &str,
        owner: OwnerId,
        model_label: &str,
    ) -> MemoryResult<RecordId> {
        let record = ChatRecord::new(owner, question, plan, answer, model_label);
        let id = record.id();
        let mut guard = self.owners.write().await;
        let history = guard.entry(owner).or_default();
        self.push_bounded(&mut history.chats, record);
        Ok(id)
    }

    async fn recent(&self, owner: OwnerId, limit: usize) -> MemoryResult<Vec<ChatRecord>> {
        let guard = self.owners.read().await;
        let Some(history) = guard.get(&owner) else {
            return Ok(Vec::new());
        };
        let skip = history.chats.len().saturating_sub(limit);
        Ok(history.chats.iter().skip(skip).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(owner: u64, tool: &str, status: ExecutionStatus) -> ExecutionRecord {
        ExecutionRecord::builder(OwnerId::new(owner), tool)
            .outcome(status, "out")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn respects_capacity_and_keeps_totals() {
        let history = VolatileHistory::new(VolatileConfig::new(NonZeroUsize::new(2).unwrap()));
        for tool in ["one", "two", "three"] {
            ExecutionSink::record(&history, execution(1, tool, ExecutionStatus::Success))
                .await
                .unwrap();
        }
        ExecutionSink::record(&history, execution(1, "four", ExecutionStatus::Error))
            .await
            .unwrap();

        let recent = ExecutionSink::recent(&history, OwnerId::new(1), 10)
            .await
            .unwrap();
        let names: Vec<_> = recent.iter().map(ExecutionRecord::tool_name).collect();
        assert_eq!(names, ["four", "three"]);

        let stats = history.statistics(OwnerId::new(1)).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.failed, 1);
        assert_eq!(history.statistics(OwnerId::new(2)).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn chat_recent_is_chronological_and_owner_scoped() {
        let history = VolatileHistory::default();
        for (owner, question) in [(1, "a"), (2, "x"), (1, "b"), (1, "c")] {
            ChatHistory::record(&history, question, "plan", "answer", OwnerId::new(owner), "m")
                .await
                .unwrap();
        }

        let recent = ChatHistory::recent(&history, OwnerId::new(1), 2)
            .await
            .unwrap();
        let questions: Vec<_> = recent.iter().map(ChatRecord::question).collect();
        assert_eq!(questions, ["b", "c"]);
    }
}
