//! Per-owner registry cache with TTL expiry.
//!
//! Each owner gets one async mutex, created on first use and kept for the
//! cache's lifetime. The hit check and the rebuild both happen under it, so
//! concurrent requests from one owner trigger at most one rebuild.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use agent_config::MIN_CACHE_TTL_SECS;
use agent_memory::ToolDefinitionStore;
use agent_primitives::{OwnerId, ToolDefinition, ToolSource};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::builtin::NativeCatalog;
use crate::registry::ToolRegistry;
use crate::script::ScriptLimits;
use crate::{ToolError, ToolResult};

struct Entry {
    registry: Arc<ToolRegistry>,
    expires_at: Instant,
}

type Slot = Arc<AsyncMutex<Option<Entry>>>;

/// Builds and caches one [`ToolRegistry`] per owner from the definition store.
pub struct RegistryCache {
    store: Arc<dyn ToolDefinitionStore>,
    catalog: Arc<NativeCatalog>,
    limits: ScriptLimits,
    ttl: RwLock<Duration>,
    slots: Mutex<HashMap<OwnerId, Slot>>,
}

impl std::fmt::Debug for RegistryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCache")
            .field("ttl", &self.ttl())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

fn clamp_ttl(ttl: Duration) -> Duration {
    ttl.max(Duration::from_secs(MIN_CACHE_TTL_SECS))
}

impl RegistryCache {
    /// Creates a cache over `store`, resolving native handles via `catalog`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ToolDefinitionStore>,
        catalog: Arc<NativeCatalog>,
        limits: ScriptLimits,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            limits,
            ttl: RwLock::new(clamp_ttl(ttl)),
            slots: Mutex::default(),
        }
    }

    /// Current time-to-live of cached registries.
    ///
    /// # Panics
    ///
    /// Panics if the TTL lock is poisoned.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        *self.ttl.read().expect("registry cache ttl poisoned")
    }

    /// Interpreter limits applied to script tools.
    #[must_use]
    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    /// Changes the TTL for registries built from now on, clamped to
    /// [`MIN_CACHE_TTL_SECS`].
    ///
    /// # Panics
    ///
    /// Panics if the TTL lock is poisoned.
    pub fn set_ttl(&self, ttl: Duration) {
        let ttl = clamp_ttl(ttl);
        *self.ttl.write().expect("registry cache ttl poisoned") = ttl;
        debug!(ttl_secs = ttl.as_secs(), "registry cache ttl changed");
    }

    fn slot(&self, owner: OwnerId) -> Slot {
        let mut slots = self.slots.lock().expect("registry cache slots poisoned");
        Arc::clone(slots.entry(owner).or_default())
    }

    /// Returns the owner's registry, rebuilding it when absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Store`] when the definitions cannot be listed.
    ///
    /// # Panics
    ///
    /// Panics if an internal lock is poisoned.
    pub async fn get(&self, owner: OwnerId) -> ToolResult<Arc<ToolRegistry>> {
        let slot = self.slot(owner);
        let mut entry = slot.lock().await;
        if let Some(cached) = entry.as_ref().filter(|cached| cached.expires_at > Instant::now()) {
            debug!(owner = %owner, "registry cache hit");
            return Ok(Arc::clone(&cached.registry));
        }

        let registry = Arc::new(self.build(owner).await?);
        *entry = Some(Entry {
            registry: Arc::clone(&registry),
            expires_at: Instant::now() + self.ttl(),
        });
        Ok(registry)
    }

    /// Drops the owner's cached registry so the next [`RegistryCache::get`]
    /// rebuilds it.
    ///
    /// # Panics
    ///
    /// Panics if the slot map lock is poisoned.
    pub async fn invalidate(&self, owner: OwnerId) {
        let slot = self.slot(owner);
        if slot.lock().await.take().is_some() {
            debug!(owner = %owner, "registry cache invalidated");
        }
    }

    /// Rebuilds the owner's registry immediately.
    ///
    /// # Errors
    ///
    /// See [`RegistryCache::get`].
    ///
    /// # Panics
    ///
    /// Panics if an internal lock is poisoned.
    pub async fn refresh(&self, owner: OwnerId) -> ToolResult<Arc<ToolRegistry>> {
        self.invalidate(owner).await;
        self.get(owner).await
    }

    async fn build(&self, owner: OwnerId) -> ToolResult<ToolRegistry> {
        let registry = ToolRegistry::with_limits(self.limits.clone());
        let definitions = self.store.list_visible_to(owner).await?;
        let mut skipped = 0_usize;
        for definition in definitions.iter().filter(|definition| definition.active()) {
            if let Err(err) = self.register(&registry, definition) {
                skipped += 1;
                warn!(owner = %owner, tool = definition.name(), error = %err, "skipping tool definition");
            }
        }
        info!(owner = %owner, tools = registry.len(), skipped, "built tool registry");
        Ok(registry)
    }

    fn register(&self, registry: &ToolRegistry, definition: &ToolDefinition) -> ToolResult<()> {
        let parameters = definition.parameters().map(<[_]>::to_vec);
        match definition.source() {
            ToolSource::Script { code } => registry.register_script(
                definition.name(),
                definition.description(),
                code,
                parameters,
            ),
            ToolSource::Native { handle } => {
                let tool = self.catalog.get(handle).ok_or_else(|| {
                    ToolError::invalid_metadata(format!("unknown native handle `{handle}`"))
                })?;
                registry.register_native(
                    definition.name(),
                    definition.description(),
                    tool.clone(),
                    parameters,
                )
            }
        }
    }

    #[cfg(test)]
    async fn expire(&self, owner: OwnerId) {
        if let Some(entry) = self.slot(owner).lock().await.as_mut() {
            entry.expires_at = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use agent_memory::{InMemoryToolStore, MemoryResult, ToolUpdate};
    use agent_primitives::{ToolId, Visibility};
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::builtin::seed_store;

    struct CountingStore {
        inner: InMemoryToolStore,
        listings: AtomicUsize,
    }

    #[async_trait]
    impl ToolDefinitionStore for CountingStore {
        async fn list_visible_to(&self, owner: OwnerId) -> MemoryResult<Vec<ToolDefinition>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.list_visible_to(owner).await
        }

        async fn get_by_name(
            &self,
            owner: OwnerId,
            name: &str,
        ) -> MemoryResult<Option<ToolDefinition>> {
            self.inner.get_by_name(owner, name).await
        }

        async fn get(&self, owner: OwnerId, id: ToolId) -> MemoryResult<Option<ToolDefinition>> {
            self.inner.get(owner, id).await
        }

        async fn insert(&self, definition: ToolDefinition) -> MemoryResult<ToolId> {
            self.inner.insert(definition).await
        }

        async fn update(
            &self,
            owner: OwnerId,
            id: ToolId,
            update: ToolUpdate,
        ) -> MemoryResult<ToolDefinition> {
            self.inner.update(owner, id, update).await
        }

        async fn delete(&self, owner: OwnerId, id: ToolId) -> MemoryResult<ToolDefinition> {
            self.inner.delete(owner, id).await
        }
    }

    async fn fixture() -> (Arc<CountingStore>, RegistryCache) {
        let store = Arc::new(CountingStore {
            inner: InMemoryToolStore::new(),
            listings: AtomicUsize::new(0),
        });
        seed_store(store.as_ref()).await.unwrap();
        let cache = RegistryCache::new(
            store.clone(),
            Arc::new(NativeCatalog::with_builtins()),
            ScriptLimits::default(),
            Duration::from_secs(300),
        );
        (store, cache)
    }

    fn private_tool(owner: OwnerId, name: &str, source: &str) -> ToolDefinition {
        ToolDefinition::builder(owner)
            .name(name)
            .unwrap()
            .source(ToolSource::script(source))
            .visibility(Visibility::Private)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn builds_shared_tools_and_hits_within_ttl() {
        let (store, cache) = fixture().await;
        let owner = OwnerId::new(1);

        let first = cache.get(owner).await.unwrap();
        assert!(first.contains("multiply"));
        assert!(first.contains("current_time"));
        let second = cache.get(owner).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.listings.load(Ordering::SeqCst), 1);

        cache.expire(owner).await;
        let third = cache.get(owner).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(store.listings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_gets_build_once() {
        let (store, cache) = fixture().await;
        let cache = Arc::new(cache);
        let owner = OwnerId::new(9);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(owner).await.unwrap() })
            })
            .collect();
        let mut registries = Vec::new();
        for task in tasks {
            registries.push(task.await.unwrap());
        }

        assert_eq!(store.listings.load(Ordering::SeqCst), 1);
        assert!(registries.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }

    #[tokio::test]
    async fn invalidation_picks_up_new_tools_and_skips_broken_ones() {
        let (store, cache) = fixture().await;
        let owner = OwnerId::new(2);
        let before = cache.get(owner).await.unwrap();
        assert!(!before.contains("square"));

        store
            .insert(private_tool(owner, "square", "def square(x):\n    return x * x\n"))
            .await
            .unwrap();
        store
            .insert(private_tool(owner, "broken", "def broken(:\n"))
            .await
            .unwrap();
        cache.invalidate(owner).await;

        let after = cache.get(owner).await.unwrap();
        assert!(after.contains("square"));
        assert!(!after.contains("broken"));
        assert_eq!(after.invoke("square", json!({"x": 7})).await.unwrap(), json!(49));

        let stranger = cache.get(OwnerId::new(3)).await.unwrap();
        assert!(!stranger.contains("square"));
    }

    #[tokio::test]
    async fn inactive_and_unknown_native_tools_are_skipped() {
        let (store, cache) = fixture().await;
        let owner = OwnerId::new(4);
        let mut inactive = private_tool(owner, "idle", "def idle():\n    return 1\n");
        inactive.set_active(false);
        store.insert(inactive).await.unwrap();
        store
            .insert(
                ToolDefinition::builder(owner)
                    .name("ghost")
                    .unwrap()
                    .source(ToolSource::native("missing.handle"))
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();

        let registry = cache.refresh(owner).await.unwrap();
        assert!(!registry.contains("idle"));
        assert!(!registry.contains("ghost"));
    }

    #[test]
    fn ttl_is_clamped() {
        let cache = RegistryCache::new(
            Arc::new(InMemoryToolStore::new()),
            Arc::new(NativeCatalog::empty()),
            ScriptLimits::default(),
            Duration::from_secs(1),
        );
        assert_eq!(cache.ttl(), Duration::from_secs(MIN_CACHE_TTL_SECS));
        cache.set_ttl(Duration::from_secs(600));
        assert_eq!(cache.ttl(), Duration::from_secs(600));
    }
}
