//! Tool definition persistence.

use agent_primitives::{OwnerId, ParameterSpec, ToolDefinition, ToolId, ToolSource, Visibility};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{MemoryError, MemoryResult};

/// Storage of tool definitions keyed by `(owner, id)`.
#[async_trait]
pub trait ToolDefinitionStore: Send + Sync {
    /// Definitions owned by `owner` or shared, in insertion order.
    async fn list_visible_to(&self, owner: OwnerId) -> MemoryResult<Vec<ToolDefinition>>;

    /// Looks up a visible definition by name, preferring one owned by `owner`.
    async fn get_by_name(&self, owner: OwnerId, name: &str)
    -> MemoryResult<Option<ToolDefinition>>;

    /// Looks up a definition owned by `owner`.
    async fn get(&self, owner: OwnerId, id: ToolId) -> MemoryResult<Option<ToolDefinition>>;

    /// Persists a new definition.
    async fn insert(&self, definition: ToolDefinition) -> MemoryResult<ToolId>;

    /// Applies `update` to a definition owned by `owner` and returns the result.
    async fn update(
        &self,
        owner: OwnerId,
        id: ToolId,
        update: ToolUpdate,
    ) -> MemoryResult<ToolDefinition>;

    /// Deletes a definition owned by `owner` and returns it.
    async fn delete(&self, owner: OwnerId, id: ToolId) -> MemoryResult<ToolDefinition>;
}

/// Partial update of a tool definition; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ToolUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New explicit parameter list; `Some(None)` clears it.
    pub parameters: Option<Option<Vec<ParameterSpec>>>,
    /// New source.
    pub source: Option<ToolSource>,
    /// New sharing mode.
    pub visibility: Option<Visibility>,
    /// Enable or disable.
    pub active: Option<bool>,
    /// New category label.
    pub label: Option<String>,
}

impl ToolUpdate {
    /// Whether the update touches the name, source, or parameters.
    #[must_use]
    pub fn changes_code(&self) -> bool {
        self.name.is_some() || self.source.is_some() || self.parameters.is_some()
    }

    /// Applies the update to `definition`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when the new name is blank.
    pub fn apply_to(self, definition: &mut ToolDefinition) -> MemoryResult<()> {
        if let Some(name) = self.name {
            definition
                .set_name(name)
                .map_err(|err| MemoryError::invalid_record(err.to_string()))?;
        }
        if let Some(description) = self.description {
            definition.set_description(description);
        }
        if let Some(parameters) = self.parameters {
            definition.set_parameters(parameters);
        }
        if let Some(source) = self.source {
            definition.set_source(source);
        }
        if let Some(visibility) = self.visibility {
            definition.set_visibility(visibility);
        }
        if let Some(active) = self.active {
            definition.set_active(active);
        }
        if let Some(label) = self.label {
            definition.set_label(label);
        }
        Ok(())
    }
}

/// In-process store used by the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryToolStore {
    definitions: RwLock<Vec<ToolDefinition>>,
}

impl InMemoryToolStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored definitions across all owners.
    pub async fn len(&self) -> usize {
        self.definitions.read().await.len()
    }

    /// Returns true when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.definitions.read().await.is_empty()
    }
}

fn name_taken(definitions: &[ToolDefinition], owner: OwnerId, name: &str, except: ToolId) -> bool {
    definitions
        .iter()
        .any(|def| def.owner() == owner && def.name() == name && def.id() != except)
}

#[async_trait]
impl ToolDefinitionStore for InMemoryToolStore {
    async fn list_visible_to(&self, owner: OwnerId) -> MemoryResult<Vec<ToolDefinition>> {
        let guard = self.definitions.read().await;
        Ok(guard
            .iter()
            .filter(|def| def.visible_to(owner))
            .cloned()
            .collect())
    }

    async fn get_by_name(
        &self,
        owner: OwnerId,
        name: &str,
    ) -> MemoryResult<Option<ToolDefinition>> {
        let guard = self.definitions.read().await;
        let visible: Vec<&ToolDefinition> = guard
            .iter()
            .filter(|def| def.name() == name && def.visible_to(owner))
            .collect();
        Ok(visible
            .iter()
            .find(|def| def.owner() == owner)
            .or_else(|| visible.first())
            .map(|def| (*def).clone()))
    }

    async fn get(&self, owner: OwnerId, id: ToolId) -> MemoryResult<Option<ToolDefinition>> {
        let guard = self.definitions.read().await;
        Ok(guard
            .iter()
            .find(|def| def.id() == id && def.owner() == owner)
            .cloned())
    }

    async fn insert(&self, definition: ToolDefinition) -> MemoryResult<ToolId> {
        let mut guard = self.definitions.write().await;
        if name_taken(&guard, definition.owner(), definition.name(), definition.id()) {
            return Err(MemoryError::Conflict {
                owner: definition.owner(),
                name: definition.name().to_owned(),
            });
        }
        if guard.iter().any(|def| def.id() == definition.id()) {
            return Err(MemoryError::invalid_record(format!(
                "tool id {} already exists",
                definition.id()
            )));
        }
        let id = definition.id();
        debug!(owner = %definition.owner(), tool = definition.name(), "stored tool definition");
        guard.push(definition);
        Ok(id)
    }

    async fn update(
        &self,
        owner: OwnerId,
        id: ToolId,
        update: ToolUpdate,
    ) -> MemoryResult<ToolDefinition> {
        let mut guard = self.definitions.write().await;
        let index = guard
            .iter()
            .position(|def| def.id() == id && def.owner() == owner)
            .ok_or(MemoryError::NotFound { owner, id })?;

        let mut updated = guard[index].clone();
        update.apply_to(&mut updated)?;
        if name_taken(&guard, owner, updated.name(), id) {
            return Err(MemoryError::Conflict {
                owner,
                name: updated.name().to_owned(),
            });
        }
        guard[index] = updated.clone();
        Ok(updated)
    }

    async fn delete(&self, owner: OwnerId, id: ToolId) -> MemoryResult<ToolDefinition> {
        let mut guard = self.definitions.write().await;
        let index = guard
            .iter()
            .position(|def| def.id() == id && def.owner() == owner)
            .ok_or(MemoryError::NotFound { owner, id })?;
        Ok(guard.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(owner: OwnerId, name: &str, visibility: Visibility) -> ToolDefinition {
        ToolDefinition::builder(owner)
            .name(name)
            .unwrap()
            .source(ToolSource::script(format!("def {name}():\n    return 1\n")))
            .visibility(visibility)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn visibility_filters_private_tools() {
        let store = InMemoryToolStore::new();
        store
            .insert(script(OwnerId::new(1), "mine", Visibility::Private))
            .await
            .unwrap();
        store
            .insert(script(OwnerId::new(2), "theirs", Visibility::Private))
            .await
            .unwrap();
        store
            .insert(script(OwnerId::SYSTEM, "shared", Visibility::Shared))
            .await
            .unwrap();

        let names: Vec<_> = store
            .list_visible_to(OwnerId::new(1))
            .await
            .unwrap()
            .iter()
            .map(|def| def.name().to_owned())
            .collect();
        assert_eq!(names, ["mine", "shared"]);
    }

    #[tokio::test]
    async fn get_by_name_prefers_owned_definition() {
        let store = InMemoryToolStore::new();
        store
            .insert(script(OwnerId::SYSTEM, "add", Visibility::Shared))
            .await
            .unwrap();
        let own = script(OwnerId::new(5), "add", Visibility::Private);
        let own_id = own.id();
        store.insert(own).await.unwrap();

        let found = store
            .get_by_name(OwnerId::new(5), "add")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), own_id);

        let other = store
            .get_by_name(OwnerId::new(6), "add")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.owner(), OwnerId::SYSTEM);
    }

    #[tokio::test]
    async fn duplicate_names_conflict_per_owner() {
        let store = InMemoryToolStore::new();
        store
            .insert(script(OwnerId::new(1), "dup", Visibility::Private))
            .await
            .unwrap();
        let err = store
            .insert(script(OwnerId::new(1), "dup", Visibility::Private))
            .await
            .expect_err("same owner, same name");
        assert!(matches!(err, MemoryError::Conflict { .. }));

        store
            .insert(script(OwnerId::new(2), "dup", Visibility::Private))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_and_delete_are_owner_scoped() {
        let store = InMemoryToolStore::new();
        let def = script(OwnerId::new(1), "calc", Visibility::Private);
        let id = def.id();
        store.insert(def).await.unwrap();

        let err = store
            .update(OwnerId::new(2), id, ToolUpdate::default())
            .await
            .expect_err("foreign owner");
        assert!(matches!(err, MemoryError::NotFound { .. }));

        let updated = store
            .update(
                OwnerId::new(1),
                id,
                ToolUpdate {
                    description: Some("calculator".into()),
                    active: Some(false),
                    ..ToolUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description(), "calculator");
        assert!(!updated.active());

        assert!(store.delete(OwnerId::new(2), id).await.is_err());
        store.delete(OwnerId::new(1), id).await.unwrap();
        assert!(store.is_empty().await);
    }
}
