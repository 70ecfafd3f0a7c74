//! Gatekeeping for writes to the tool definition store.

use std::fmt;
use std::sync::Arc;

use agent_memory::{ToolDefinitionStore, ToolUpdate};
use agent_policy::{
    CodeReviewer, ModuleAllowlist, PolicyError, SecurityVerdict, SourceValidator, StaticSecurityGate,
};
use agent_primitives::{OwnerId, ToolDefinition, ToolId};
use agent_tools::{RegistryCache, SUPPORTED_MODULES, ToolRegistry};
use tracing::{info, warn};

use crate::{KernelError, KernelResult};

/// Reviews, validates, persists, and invalidates on every tool write.
///
/// Script source is reviewed by the security gate before the structural
/// validator runs, so rejected code always carries its itemized findings.
/// Source that passes both is compiled once with the cache's limits, so code
/// outside the interpreter's subset is refused here rather than skipped at
/// every registry build. All checks are skipped for native tools and blank
/// source.
pub struct ToolAdmission {
    store: Arc<dyn ToolDefinitionStore>,
    cache: Arc<RegistryCache>,
    reviewer: Arc<dyn CodeReviewer>,
    validator: SourceValidator<ModuleAllowlist>,
}

impl fmt::Debug for ToolAdmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolAdmission")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ToolAdmission {
    /// Creates an admission service using the default security gate.
    #[must_use]
    pub fn new(store: Arc<dyn ToolDefinitionStore>, cache: Arc<RegistryCache>) -> Self {
        Self {
            store,
            cache,
            reviewer: Arc::new(StaticSecurityGate::new()),
            validator: SourceValidator::new(ModuleAllowlist::new(SUPPORTED_MODULES.iter().copied())),
        }
    }

    /// Replaces the security reviewer.
    #[must_use]
    pub fn with_reviewer(mut self, reviewer: Arc<dyn CodeReviewer>) -> Self {
        self.reviewer = reviewer;
        self
    }

    /// Security verdict for `source` without persisting anything.
    #[must_use]
    pub fn review(&self, source: &str) -> SecurityVerdict {
        self.reviewer.review(source)
    }

    /// Admits a new definition for its owner.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Conflict`] when the owner already has a tool of
    /// that name, a [`KernelError::Policy`] rejection from review or
    /// validation, or a store failure.
    pub async fn register(&self, definition: ToolDefinition) -> KernelResult<ToolId> {
        let owner = definition.owner();
        self.ensure_name_free(owner, definition.name(), None).await?;
        self.check_source(&definition)?;

        let id = self.store.insert(definition.clone()).await?;
        self.cache.invalidate(owner).await;
        info!(%owner, tool = definition.name(), "tool registered");
        Ok(id)
    }

    /// Applies `update` to a tool owned by `owner`.
    ///
    /// Source is re-checked when the update touches the name, source, or
    /// parameters.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] when `owner` has no tool `id`, plus
    /// the errors of [`ToolAdmission::register`].
    pub async fn update(
        &self,
        owner: OwnerId,
        id: ToolId,
        update: ToolUpdate,
    ) -> KernelResult<ToolDefinition> {
        let current = self.store.get(owner, id).await?.ok_or_else(|| KernelError::NotFound {
            reason: format!("tool {id} of owner {owner}"),
        })?;

        if let Some(name) = update.name.as_deref() {
            self.ensure_name_free(owner, name, Some(id)).await?;
        }
        if update.changes_code() {
            let mut candidate = current;
            update.clone().apply_to(&mut candidate)?;
            self.check_source(&candidate)?;
        }

        let updated = self.store.update(owner, id, update).await?;
        self.cache.invalidate(owner).await;
        info!(%owner, tool = updated.name(), "tool updated");
        Ok(updated)
    }

    /// Deletes a tool owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] when `owner` has no tool `id`.
    pub async fn delete(&self, owner: OwnerId, id: ToolId) -> KernelResult<ToolDefinition> {
        let removed = self.store.delete(owner, id).await.map_err(|err| match err {
            agent_memory::MemoryError::NotFound { .. } => KernelError::NotFound {
                reason: err.to_string(),
            },
            other => other.into(),
        })?;
        self.cache.invalidate(owner).await;
        info!(%owner, tool = removed.name(), "tool deleted");
        Ok(removed)
    }

    async fn ensure_name_free(&self, owner: OwnerId, name: &str, except: Option<ToolId>) -> KernelResult<()> {
        let existing = self.store.get_by_name(owner, name).await?;
        match existing {
            Some(definition) if definition.owner() == owner && Some(definition.id()) != except => {
                Err(KernelError::Conflict {
                    name: name.to_owned(),
                })
            }
            _ => Ok(()),
        }
    }

    fn check_source(&self, definition: &ToolDefinition) -> KernelResult<()> {
        let Some(code) = definition.source().script_text() else {
            return Ok(());
        };
        if code.trim().is_empty() {
            return Ok(());
        }

        let verdict = self.reviewer.review(code);
        if !verdict.is_safe() {
            warn!(
                owner = %definition.owner(),
                tool = definition.name(),
                issues = verdict.issues().len(),
                "tool source rejected by security review"
            );
        }
        verdict.into_result()?;
        self.validator
            .validate(code, Some(definition.name()), definition.parameters())?;
        ToolRegistry::with_limits(self.cache.limits().clone())
            .register_script(definition.name(), definition.description(), code, None)
            .map_err(|err| PolicyError::invalid_source(err.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use agent_memory::InMemoryToolStore;
    use agent_primitives::{ParameterSpec, ToolSource};
    use agent_tools::{NativeCatalog, ScriptLimits};

    use super::*;

    const OWNER: OwnerId = OwnerId::new(42);

    fn admission() -> (ToolAdmission, Arc<RegistryCache>) {
        let store: Arc<dyn ToolDefinitionStore> = Arc::new(InMemoryToolStore::new());
        let cache = Arc::new(RegistryCache::new(
            Arc::clone(&store),
            Arc::new(NativeCatalog::empty()),
            ScriptLimits::default(),
            std::time::Duration::from_secs(300),
        ));
        (ToolAdmission::new(store, Arc::clone(&cache)), cache)
    }

    fn script(name: &str, code: &str) -> ToolDefinition {
        ToolDefinition::builder(OWNER)
            .name(name)
            .unwrap()
            .description("test tool")
            .source(ToolSource::script(code))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn registers_and_invalidates_cache() {
        let (admission, cache) = admission();
        assert!(cache.get(OWNER).await.unwrap().is_empty());

        admission
            .register(script("double", "def double(x):\n    return x * 2\n"))
            .await
            .unwrap();
        let registry = cache.get(OWNER).await.unwrap();
        assert!(registry.contains("double"));
    }

    #[tokio::test]
    async fn rejects_duplicate_names_per_owner() {
        let (admission, _) = admission();
        let code = "def twice(x):\n    return x + x\n";
        admission.register(script("twice", code)).await.unwrap();
        let err = admission.register(script("twice", code)).await.unwrap_err();
        assert!(matches!(err, KernelError::Conflict { name } if name == "twice"));
    }

    #[tokio::test]
    async fn unsafe_source_is_rejected_before_validation() {
        let (admission, _) = admission();
        let err = admission
            .register(script("run", "def run(cmd):\n import os\n os.system(cmd, shell=True)"))
            .await
            .unwrap_err();
        let KernelError::Policy(PolicyError::UnsafeCode { issues, .. }) = err else {
            panic!("expected unsafe code rejection, got {err:?}");
        };
        assert!(!issues.is_empty());
    }

    #[tokio::test]
    async fn structural_errors_are_reported() {
        let (admission, _) = admission();
        let err = admission
            .register(script("area", "def size(r):\n    return r * r\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Policy(PolicyError::InvalidSource { .. })));

        let declared = ToolDefinition::builder(OWNER)
            .name("area")
            .unwrap()
            .parameters(vec![ParameterSpec::new("radius").unwrap()])
            .source(ToolSource::script("def area(r):\n    return r * r\n"))
            .build()
            .unwrap();
        assert!(admission.register(declared).await.is_err());
    }

    #[tokio::test]
    async fn source_outside_the_interpreter_subset_is_refused() {
        let (admission, cache) = admission();
        let err = admission
            .register(script("tool", "class Helper:\n    pass\n\ndef tool(x):\n    return x\n"))
            .await
            .unwrap_err();
        let KernelError::Policy(PolicyError::InvalidSource { reason }) = err else {
            panic!("expected invalid source, got {err:?}");
        };
        assert!(reason.contains("not supported"));
        assert!(!cache.get(OWNER).await.unwrap().contains("tool"));
    }

    #[tokio::test]
    async fn update_rechecks_source_and_delete_is_scoped() {
        let (admission, cache) = admission();
        let id = admission
            .register(script("triple", "def triple(x):\n    return x * 3\n"))
            .await
            .unwrap();

        let rejected = admission
            .update(
                OWNER,
                id,
                ToolUpdate {
                    source: Some(ToolSource::script("def triple(x):\n    return eval(x)\n")),
                    ..ToolUpdate::default()
                },
            )
            .await;
        assert!(matches!(rejected, Err(KernelError::Policy(PolicyError::UnsafeCode { .. }))));

        let renamed = admission
            .update(
                OWNER,
                id,
                ToolUpdate {
                    description: Some("multiply by three".to_owned()),
                    ..ToolUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.description(), "multiply by three");

        assert!(matches!(
            admission.delete(OwnerId::new(7), id).await,
            Err(KernelError::NotFound { .. })
        ));
        admission.delete(OWNER, id).await.unwrap();
        assert!(!cache.get(OWNER).await.unwrap().contains("triple"));
    }

    #[test]
    fn review_exposes_network_findings() {
        let (admission, _) = admission();
        let verdict = admission.review("import requests\ndef fetch(url):\n    return requests.get(url)\n");
        assert!(verdict.is_safe());
        assert!(!verdict.issues().is_empty());
    }
}
