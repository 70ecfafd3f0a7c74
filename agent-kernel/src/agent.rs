//! The planning agent facade.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use agent_adapters::Oracle;
use agent_config::AgentConfig;
use agent_memory::{
    ChatHistory, ExecutionRecord, ExecutionSink, ExecutionStats, FileJournal, InMemoryToolStore,
    ToolDefinitionStore, VolatileConfig, VolatileHistory,
};
use agent_primitives::OwnerId;
use agent_prompts::PromptCatalog;
use agent_telemetry::truncate_for_log;
use agent_tools::{NativeCatalog, RegistryCache, ScriptLimits, ToolRegistry, ToolSpec, seed_store};
use tracing::{info, warn};

use crate::admission::ToolAdmission;
use crate::orchestrator::{DEFAULT_HISTORY_WINDOW, Orchestrator, TurnOutcome};
use crate::KernelResult;

/// Characters of a tool result shown in execution history listings.
pub const HISTORY_RESULT_CHARS: usize = 100;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Answers questions for many owners over a shared tool store.
pub struct Agent {
    store: Arc<dyn ToolDefinitionStore>,
    cache: Arc<RegistryCache>,
    orchestrator: Orchestrator,
    admission: ToolAdmission,
    executions: Arc<dyn ExecutionSink>,
    model_label: String,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("model_label", &self.model_label)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Starts building an agent around `oracle`.
    #[must_use]
    pub fn builder(oracle: Arc<dyn Oracle>) -> AgentBuilder {
        AgentBuilder::new(oracle)
    }

    /// Builds an agent from configuration and seeds the built-in tools.
    ///
    /// # Errors
    ///
    /// See [`AgentBuilder::open`].
    pub async fn from_config(config: &AgentConfig, oracle: Arc<dyn Oracle>) -> KernelResult<Self> {
        Self::builder(oracle).open(config).await
    }

    /// Inserts the built-in tools that are not yet stored.
    ///
    /// # Errors
    ///
    /// Returns an error when the store rejects a definition.
    pub async fn seed_builtins(&self) -> KernelResult<usize> {
        let added = seed_store(self.store.as_ref()).await?;
        if added > 0 {
            self.cache.invalidate(OwnerId::SYSTEM).await;
        }
        Ok(added)
    }

    /// Runs one conversational turn for `owner`.
    ///
    /// A registry that cannot be loaded degrades to an empty one.
    pub async fn respond(&self, owner: OwnerId, question: &str) -> TurnOutcome {
        let registry = match self.cache.get(owner).await {
            Ok(registry) => registry,
            Err(err) => {
                warn!(%owner, error = %err, "tool registry unavailable; answering without tools");
                Arc::new(ToolRegistry::new())
            }
        };
        self.orchestrator
            .run(owner, question, &registry, &self.model_label)
            .await
    }

    /// Tools available to `owner`, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error when the registry cannot be loaded.
    pub async fn tools(&self, owner: OwnerId) -> KernelResult<Vec<ToolSpec>> {
        Ok(self.cache.get(owner).await?.list())
    }

    /// Most recent executions for `owner`, newest first, results shortened.
    ///
    /// # Errors
    ///
    /// Returns an error when the execution sink fails.
    pub async fn execution_history(&self, owner: OwnerId, limit: usize) -> KernelResult<Vec<ExecutionRecord>> {
        let records = self.executions.recent(owner, limit).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let result = truncate_for_log(record.result(), HISTORY_RESULT_CHARS);
                record.with_result(result)
            })
            .collect())
    }

    /// Execution counts for `owner`.
    ///
    /// # Errors
    ///
    /// Returns an error when the execution sink fails.
    pub async fn statistics(&self, owner: OwnerId) -> KernelResult<ExecutionStats> {
        Ok(self.executions.statistics(owner).await?)
    }

    /// Register, update, and delete tools.
    #[must_use]
    pub fn admission(&self) -> &ToolAdmission {
        &self.admission
    }

    /// Per-owner registry cache.
    #[must_use]
    pub fn cache(&self) -> &RegistryCache {
        &self.cache
    }

    /// Label stored with every chat record.
    #[must_use]
    pub fn model_label(&self) -> &str {
        &self.model_label
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    oracle: Arc<dyn Oracle>,
    store: Option<Arc<dyn ToolDefinitionStore>>,
    catalog: NativeCatalog,
    executions: Option<Arc<dyn ExecutionSink>>,
    chats: Option<Arc<dyn ChatHistory>>,
    prompts: Option<PromptCatalog>,
    limits: ScriptLimits,
    cache_ttl: Duration,
    history_window: usize,
    model_label: Option<String>,
}

impl fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("cache_ttl", &self.cache_ttl)
            .field("history_window", &self.history_window)
            .field("model_label", &self.model_label)
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            store: None,
            catalog: NativeCatalog::with_builtins(),
            executions: None,
            chats: None,
            prompts: None,
            limits: ScriptLimits::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            history_window: DEFAULT_HISTORY_WINDOW,
            model_label: None,
        }
    }

    /// Applies script limits, cache TTL, and history window from `config`.
    #[must_use]
    pub fn config(mut self, config: &AgentConfig) -> Self {
        self.limits = ScriptLimits::from(&config.scripts);
        self.cache_ttl = config.registry.cache_ttl();
        self.history_window = config.orchestrator.history_window;
        self
    }

    /// Tool definition store; defaults to an empty in-memory store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ToolDefinitionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Native tools resolvable by handle; defaults to the built-ins.
    #[must_use]
    pub fn catalog(mut self, catalog: NativeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// One backend for both execution records and chat history.
    #[must_use]
    pub fn history<H>(mut self, history: Arc<H>) -> Self
    where
        H: ExecutionSink + ChatHistory + 'static,
    {
        self.executions = Some(history.clone());
        self.chats = Some(history);
        self
    }

    /// Execution record sink.
    #[must_use]
    pub fn executions(mut self, executions: Arc<dyn ExecutionSink>) -> Self {
        self.executions = Some(executions);
        self
    }

    /// Chat history sink.
    #[must_use]
    pub fn chats(mut self, chats: Arc<dyn ChatHistory>) -> Self {
        self.chats = Some(chats);
        self
    }

    /// Prompt templates; defaults to [`PromptCatalog::try_default`].
    #[must_use]
    pub fn prompts(mut self, prompts: PromptCatalog) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Interpreter limits for script tools.
    #[must_use]
    pub fn limits(mut self, limits: ScriptLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Registry cache time-to-live.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Prior exchanges embedded in prompts.
    #[must_use]
    pub fn history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Label stored with chat records; defaults to the oracle's label.
    #[must_use]
    pub fn model_label(mut self, label: impl Into<String>) -> Self {
        self.model_label = Some(label.into());
        self
    }

    /// Applies `config`, opens its history backend, builds the agent, and
    /// seeds the built-in tools.
    ///
    /// A configured `journal.path` replaces any history set on the builder.
    ///
    /// # Errors
    ///
    /// Returns an error when the journal cannot be opened, the prompts fail
    /// to build, or seeding fails.
    pub async fn open(self, config: &AgentConfig) -> KernelResult<Agent> {
        let builder = self.config(config);
        let builder = match &config.journal.path {
            Some(path) => builder.history(Arc::new(FileJournal::open(path.clone()).await?)),
            None => builder,
        };
        let agent = builder.build()?;
        agent.seed_builtins().await?;
        Ok(agent)
    }

    /// Builds the agent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::KernelError::Prompt`] when the default prompt
    /// catalog fails to build.
    pub fn build(self) -> KernelResult<Agent> {
        let prompts = match self.prompts {
            Some(prompts) => prompts,
            None => PromptCatalog::try_default()?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryToolStore::new()));
        let volatile = Arc::new(VolatileHistory::new(VolatileConfig::default()));
        let executions = self
            .executions
            .unwrap_or_else(|| volatile.clone() as Arc<dyn ExecutionSink>);
        let chats = self.chats.unwrap_or_else(|| volatile as Arc<dyn ChatHistory>);

        let cache = Arc::new(RegistryCache::new(
            Arc::clone(&store),
            Arc::new(self.catalog),
            self.limits,
            self.cache_ttl,
        ));
        let model_label = self.model_label.unwrap_or_else(|| self.oracle.label());
        let orchestrator = Orchestrator::new(
            self.oracle,
            Arc::new(prompts),
            Arc::clone(&executions),
            chats,
        )
        .with_history_window(self.history_window);
        let admission = ToolAdmission::new(Arc::clone(&store), Arc::clone(&cache));

        info!(model = %model_label, ttl_secs = cache.ttl().as_secs(), "agent ready");
        Ok(Agent {
            store,
            cache,
            orchestrator,
            admission,
            executions,
            model_label,
        })
    }
}
