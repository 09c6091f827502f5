//! Command store contract and an in-memory backend.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::model::{Command, CommandCriteria};

pub type StoreResult<T> = Result<T, StoreError>;
pub type DynCommandStore = Arc<dyn CommandStore>;

/// Shared storage of commands, visible to every node of the cluster.
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn create(&self, command: Command) -> StoreResult<Command>;
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Command>>;
    async fn search(&self, criteria: &CommandCriteria) -> StoreResult<Vec<Command>>;
    async fn update(&self, command: Command) -> StoreResult<Command>;
    /// Deleting an id that is not stored is not an error.
    async fn delete(&self, id: &str) -> StoreResult<()>;
    /// Remove every command whose expiry is at or before `instant`.
    async fn delete_by_expired_before(&self, instant: DateTime<Utc>) -> StoreResult<usize>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("command '{0}' not found")]
    NotFound(String),
    #[error("command '{0}' already exists")]
    AlreadyExists(String),
    #[error("technical store failure: {0}")]
    Technical(String),
}

#[derive(Clone, Default)]
pub struct MemCommandStore {
    commands: Arc<RwLock<IndexMap<String, Command>>>,
}

impl std::fmt::Debug for MemCommandStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.commands.read().map(|c| c.len()).unwrap_or_default();
        f.debug_struct("MemCommandStore")
            .field("commands", &len)
            .finish()
    }
}

impl MemCommandStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.read().map(|c| c.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned<E>(_: E) -> StoreError {
        StoreError::Technical("command store lock poisoned".into())
    }
}

#[async_trait]
impl CommandStore for MemCommandStore {
    async fn create(&self, command: Command) -> StoreResult<Command> {
        let mut guard = self.commands.write().map_err(Self::poisoned)?;
        if guard.contains_key(&command.id) {
            return Err(StoreError::AlreadyExists(command.id));
        }
        guard.insert(command.id.clone(), command.clone());
        Ok(command)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Command>> {
        let guard = self.commands.read().map_err(Self::poisoned)?;
        Ok(guard.get(id).cloned())
    }

    async fn search(&self, criteria: &CommandCriteria) -> StoreResult<Vec<Command>> {
        let guard = self.commands.read().map_err(Self::poisoned)?;
        let mut found: Vec<Command> = guard
            .values()
            .filter(|command| criteria.matches(command))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn update(&self, command: Command) -> StoreResult<Command> {
        let mut guard = self.commands.write().map_err(Self::poisoned)?;
        match guard.get_mut(&command.id) {
            Some(slot) => {
                *slot = command.clone();
                Ok(command)
            }
            None => Err(StoreError::NotFound(command.id)),
        }
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut guard = self.commands.write().map_err(Self::poisoned)?;
        guard.shift_remove(id);
        Ok(())
    }

    async fn delete_by_expired_before(&self, instant: DateTime<Utc>) -> StoreResult<usize> {
        let mut guard = self.commands.write().map_err(Self::poisoned)?;
        let before = guard.len();
        guard.retain(|_, command| !command.is_expired(instant));
        Ok(before - guard.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandTag, MessageRecipient};
    use chrono::Duration;

    fn command(tag: CommandTag) -> Command {
        Command::new("producer", MessageRecipient::ManagementApis, vec![tag])
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = MemCommandStore::new();
        let cmd = command(CommandTag::EmailTemplateUpdate);
        store.create(cmd.clone()).await.expect("create");
        let err = store.create(cmd).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemCommandStore::new();
        let err = store
            .update(command(CommandTag::EmailTemplateUpdate))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemCommandStore::new();
        let cmd = store
            .create(command(CommandTag::SubscriptionFailure))
            .await
            .unwrap();
        store.delete(&cmd.id).await.expect("first delete");
        store.delete(&cmd.id).await.expect("second delete");
        assert!(store.find_by_id(&cmd.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_twice_removes_nothing_the_second_time() {
        let store = MemCommandStore::new();
        let now = Utc::now();
        for expiry in [now - Duration::seconds(1), now, now + Duration::hours(1)] {
            store
                .create(command(CommandTag::EmailTemplateUpdate).expiring_at(expiry))
                .await
                .unwrap();
        }
        store.create(command(CommandTag::EmailTemplateUpdate)).await.unwrap();

        assert_eq!(store.delete_by_expired_before(now).await.unwrap(), 2);
        assert_eq!(store.delete_by_expired_before(now).await.unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn search_orders_by_creation() {
        let store = MemCommandStore::new();
        let now = Utc::now();
        let late = command(CommandTag::EmailTemplateUpdate).created_at(now);
        let early =
            command(CommandTag::EmailTemplateUpdate).created_at(now - Duration::seconds(10));
        store.create(late.clone()).await.unwrap();
        store.create(early.clone()).await.unwrap();

        let found = store.search(&CommandCriteria::new()).await.unwrap();
        let ids: Vec<_> = found.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![early.id.as_str(), late.id.as_str()]);
    }
}
