use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::error::CommandError;

/// Delivery semantics of a command once a node has read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastMode {
    /// Delete after the first read; exactly one node handles it.
    Unicast,
    /// Acknowledge after read; every node handles it once.
    Multicast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandTag {
    DataToIndex,
    SubscriptionFailure,
    EmailTemplateUpdate,
    GroupDefaultRolesUpdate,
}

impl CommandTag {
    pub fn cast_mode(self) -> CastMode {
        match self {
            CommandTag::SubscriptionFailure => CastMode::Unicast,
            CommandTag::DataToIndex
            | CommandTag::EmailTemplateUpdate
            | CommandTag::GroupDefaultRolesUpdate => CastMode::Multicast,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandTag::DataToIndex => "DATA_TO_INDEX",
            CommandTag::SubscriptionFailure => "SUBSCRIPTION_FAILURE",
            CommandTag::EmailTemplateUpdate => "EMAIL_TEMPLATE_UPDATE",
            CommandTag::GroupDefaultRolesUpdate => "GROUP_DEFAULT_ROLES_UPDATE",
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRecipient {
    ManagementApis,
    DataSynchronizer,
}

impl MessageRecipient {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRecipient::ManagementApis => "MANAGEMENT_APIS",
            MessageRecipient::DataSynchronizer => "DATA_SYNCHRONIZER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "MANAGEMENT_APIS" => Some(MessageRecipient::ManagementApis),
            "DATA_SYNCHRONIZER" => Some(MessageRecipient::DataSynchronizer),
            _ => None,
        }
    }
}

impl fmt::Display for MessageRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cross-node instruction shared through the command store.
///
/// `content` is an opaque JSON document whose shape depends on the tags.
/// `acknowledgments` only grows: a node id is appended once, when that node
/// has read a multicast command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: String,
    pub from: String,
    pub to: MessageRecipient,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    pub tags: Vec<CommandTag>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub acknowledgments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<DateTime<Utc>>,
}

impl Command {
    pub fn new(from: impl Into<String>, to: MessageRecipient, tags: Vec<CommandTag>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to,
            organization_id: None,
            environment_id: None,
            tags,
            content: String::new(),
            acknowledgments: Vec::new(),
            created_at: now,
            updated_at: now,
            expired_at: None,
        }
    }

    /// Serialize `payload` as the command content.
    pub fn with_content<T: Serialize>(mut self, payload: &T) -> Result<Self, CommandError> {
        self.content = serde_json::to_string(payload)?;
        Ok(self)
    }

    pub fn with_raw_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn with_environment(mut self, environment_id: impl Into<String>) -> Self {
        self.environment_id = Some(environment_id.into());
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expired_at = Some(at);
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self.updated_at = at;
        self
    }

    /// Unicast iff the command carries exactly one tag and that tag is unicast.
    pub fn cast_mode(&self) -> CastMode {
        match self.tags.as_slice() {
            [tag] if tag.cast_mode() == CastMode::Unicast => CastMode::Unicast,
            _ => CastMode::Multicast,
        }
    }

    pub fn has_tag(&self, tag: CommandTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn is_acknowledged_by(&self, node_id: &str) -> bool {
        self.acknowledgments.iter().any(|ack| ack == node_id)
    }

    /// Record that `node_id` has read this command. Returns `false` when the
    /// node was already listed, in which case nothing changes.
    pub fn acknowledge(&mut self, node_id: &str, now: DateTime<Utc>) -> bool {
        if self.is_acknowledged_by(node_id) {
            return false;
        }
        self.acknowledgments.push(node_id.to_string());
        self.updated_at = now;
        true
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired_at.is_some_and(|at| at <= now)
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, CommandError> {
        Ok(serde_json::from_str(&self.content)?)
    }
}

/// Search filter over stored commands. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandCriteria {
    pub to: Option<MessageRecipient>,
    pub not_tags: Vec<CommandTag>,
    pub not_acked_by: Option<String>,
    pub not_expired_at: Option<DateTime<Utc>>,
}

impl CommandCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(mut self, recipient: MessageRecipient) -> Self {
        self.to = Some(recipient);
        self
    }

    pub fn not_tags(mut self, tags: impl IntoIterator<Item = CommandTag>) -> Self {
        self.not_tags.extend(tags);
        self
    }

    pub fn not_acked_by(mut self, node_id: impl Into<String>) -> Self {
        self.not_acked_by = Some(node_id.into());
        self
    }

    pub fn not_expired_at(mut self, now: DateTime<Utc>) -> Self {
        self.not_expired_at = Some(now);
        self
    }

    pub fn matches(&self, command: &Command) -> bool {
        if let Some(to) = self.to {
            if command.to != to {
                return false;
            }
        }
        if command.tags.iter().any(|tag| self.not_tags.contains(tag)) {
            return false;
        }
        if let Some(node_id) = &self.not_acked_by {
            if command.is_acknowledged_by(node_id) {
                return false;
            }
        }
        if let Some(now) = self.not_expired_at {
            if command.is_expired(now) {
                return false;
            }
        }
        true
    }
}
