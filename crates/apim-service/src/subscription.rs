//! Subscriptions and the `SUBSCRIPTION_FAILURE` command.
//!
//! A data-plane node that cannot honour a subscription posts a unicast
//! failure command; exactly one management node picks it up and marks the
//! subscription as failed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use apim_command::{
    Command, CommandError, CommandListener, CommandTag, ListenerError, MessageRecipient,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    Accepted,
    Paused,
    Rejected,
    Closed,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub api_id: String,
    pub application_id: String,
    pub status: SubscriptionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        api_id: impl Into<String>,
        application_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            api_id: api_id.into(),
            application_id: application_id.into(),
            status: SubscriptionStatus::Pending,
            failure_cause: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn fail(&mut self, cause: impl Into<String>, now: DateTime<Utc>) {
        self.status = SubscriptionStatus::Failure;
        self.failure_cause = Some(cause.into());
        self.updated_at = now;
    }
}

/// Content of a `SUBSCRIPTION_FAILURE` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFailureCommand {
    pub subscription_id: String,
    pub failure_cause: String,
}

impl SubscriptionFailureCommand {
    pub fn new(subscription_id: impl Into<String>, failure_cause: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            failure_cause: failure_cause.into(),
        }
    }

    /// Wrap into a command addressed to the management nodes.
    pub fn into_command(self, from: impl Into<String>) -> Result<Command, CommandError> {
        Command::new(from, MessageRecipient::ManagementApis, vec![CommandTag::SubscriptionFailure])
            .with_content(&self)
    }
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<Subscription>, RepositoryError>;
    async fn update(&self, subscription: Subscription) -> Result<Subscription, RepositoryError>;
}

#[derive(Clone, Default)]
pub struct MemSubscriptionRepository {
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl fmt::Debug for MemSubscriptionRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.subscriptions.read().map(|s| s.len()).unwrap_or_default();
        f.debug_struct("MemSubscriptionRepository")
            .field("subscriptions", &len)
            .finish()
    }
}

impl MemSubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subscription: Subscription) {
        let mut subscriptions = self.subscriptions.write().unwrap_or_else(|p| p.into_inner());
        subscriptions.insert(subscription.id.clone(), subscription);
    }
}

#[async_trait]
impl SubscriptionRepository for MemSubscriptionRepository {
    async fn find(&self, id: &str) -> Result<Option<Subscription>, RepositoryError> {
        let subscriptions = self
            .subscriptions
            .read()
            .map_err(|_| RepositoryError::Technical("subscription lock poisoned".into()))?;
        Ok(subscriptions.get(id).cloned())
    }

    async fn update(&self, subscription: Subscription) -> Result<Subscription, RepositoryError> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .map_err(|_| RepositoryError::Technical("subscription lock poisoned".into()))?;
        match subscriptions.get_mut(&subscription.id) {
            Some(slot) => {
                *slot = subscription.clone();
                Ok(subscription)
            }
            None => Err(RepositoryError::Technical(format!(
                "subscription '{}' does not exist",
                subscription.id
            ))),
        }
    }
}

pub struct SubscriptionFailureListener {
    subscriptions: Arc<dyn SubscriptionRepository>,
}

impl SubscriptionFailureListener {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>) -> Self {
        Self { subscriptions }
    }
}

#[async_trait]
impl CommandListener for SubscriptionFailureListener {
    fn name(&self) -> &str {
        "subscription-failure"
    }

    fn tag(&self) -> CommandTag {
        CommandTag::SubscriptionFailure
    }

    async fn on_command(&self, command: &Command) -> Result<(), ListenerError> {
        let failure: SubscriptionFailureCommand = serde_json::from_str(&command.content)
            .map_err(|err| ListenerError::payload(&command.id, err))?;

        let found = self
            .subscriptions
            .find(&failure.subscription_id)
            .await
            .map_err(|err| {
                ListenerError::Handler(format!(
                    "cannot load subscription '{}': {err}",
                    failure.subscription_id
                ))
            })?;
        let Some(mut subscription) = found else {
            tracing::warn!(
                subscription_id = %failure.subscription_id,
                command_id = %command.id,
                "failure reported for unknown subscription"
            );
            return Ok(());
        };

        subscription.fail(failure.failure_cause, Utc::now());
        self.subscriptions
            .update(subscription)
            .await
            .map_err(|err| {
                ListenerError::Handler(format!(
                    "cannot update subscription '{}': {err}",
                    failure.subscription_id
                ))
            })?;
        tracing::info!(subscription_id = %failure.subscription_id, "subscription marked as failed");
        Ok(())
    }
}
