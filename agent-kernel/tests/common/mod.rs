#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use agent_adapters::{Oracle, OracleError, OracleResult};
use agent_kernel::Agent;
use agent_memory::{InMemoryToolStore, VolatileConfig, VolatileHistory};
use agent_tools::NativeCatalog;
use async_trait::async_trait;

/// Oracle replaying canned replies in order and recording every prompt.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<OracleResult<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let oracle = Self::default();
        oracle
            .replies
            .lock()
            .unwrap()
            .extend(replies.into_iter().map(|reply| Ok(reply.into())));
        Arc::new(oracle)
    }

    pub fn with_results(replies: Vec<OracleResult<String>>) -> Arc<Self> {
        let oracle = Self::default();
        oracle.replies.lock().unwrap().extend(replies);
        Arc::new(oracle)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn chat(&self, prompt: &str) -> OracleResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_owned());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::failed("no scripted reply left")))
    }

    fn label(&self) -> String {
        "scripted/test".to_owned()
    }
}

/// Agent over an in-memory store seeded with the built-in tools.
pub async fn agent(oracle: Arc<ScriptedOracle>) -> (Agent, Arc<VolatileHistory>) {
    agent_with_catalog(oracle, NativeCatalog::with_builtins()).await
}

pub async fn agent_with_catalog(
    oracle: Arc<ScriptedOracle>,
    catalog: NativeCatalog,
) -> (Agent, Arc<VolatileHistory>) {
    let history = Arc::new(VolatileHistory::new(VolatileConfig::default()));
    let agent = Agent::builder(oracle)
        .store(Arc::new(InMemoryToolStore::new()))
        .catalog(catalog)
        .history(Arc::clone(&history))
        .build()
        .unwrap();
    agent.seed_builtins().await.unwrap();
    (agent, history)
}
