//! Notification templates and their propagation across nodes.
//!
//! Each node renders emails from a local template cache. Updating a template
//! on one node refreshes that node's cache and posts an
//! `EMAIL_TEMPLATE_UPDATE` command so that every other node refreshes too.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use apim_command::{
    Command, CommandListener, CommandTag, DynCommandStore, ListenerError, MessageRecipient,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::error::{ManagementError, ManagementResult};

const DEFAULT_COMMAND_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplate {
    pub id: String,
    pub name: String,
    /// Notification scope the template belongs to, e.g. `API` or `PORTAL`.
    pub scope: String,
    pub title: String,
    pub content: String,
    pub organization_id: String,
}

type OrganizationTemplates = HashMap<String, NotificationTemplate>;

/// Templates per organization, shared by the service and its listener.
#[derive(Clone, Default)]
pub struct TemplateCache {
    templates: Arc<RwLock<HashMap<String, OrganizationTemplates>>>,
}

impl fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let organizations = self.templates.read().map(|t| t.len()).unwrap_or_default();
        f.debug_struct("TemplateCache")
            .field("organizations", &organizations)
            .finish()
    }
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, template: NotificationTemplate) {
        let mut templates = self.templates.write().unwrap_or_else(|p| p.into_inner());
        templates
            .entry(template.organization_id.clone())
            .or_default()
            .insert(template.id.clone(), template);
    }

    pub fn get(&self, organization_id: &str, template_id: &str) -> Option<NotificationTemplate> {
        let templates = self.templates.read().unwrap_or_else(|p| p.into_inner());
        templates.get(organization_id)?.get(template_id).cloned()
    }

    pub fn evict(&self, organization_id: &str, template_id: &str) -> Option<NotificationTemplate> {
        let mut templates = self.templates.write().unwrap_or_else(|p| p.into_inner());
        templates.get_mut(organization_id)?.remove(template_id)
    }
}

pub struct NotificationTemplateService {
    cache: TemplateCache,
    commands: DynCommandStore,
    node_id: String,
    command_ttl: Duration,
}

impl NotificationTemplateService {
    pub fn new(
        cache: TemplateCache,
        commands: DynCommandStore,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            commands,
            node_id: node_id.into(),
            command_ttl: Duration::hours(DEFAULT_COMMAND_TTL_HOURS),
        }
    }

    pub fn with_command_ttl(mut self, ttl: Duration) -> Self {
        self.command_ttl = ttl;
        self
    }

    pub fn find(
        &self,
        ctx: &ExecutionContext,
        template_id: &str,
    ) -> ManagementResult<NotificationTemplate> {
        self.cache
            .get(&ctx.organization_id, template_id)
            .ok_or_else(|| ManagementError::not_found("notification template", template_id))
    }

    /// Store `template` locally and tell the other nodes about it.
    ///
    /// Failing to post the command is logged and does not fail the update:
    /// the local change already happened.
    pub async fn update(
        &self,
        ctx: &ExecutionContext,
        template: NotificationTemplate,
    ) -> ManagementResult<NotificationTemplate> {
        if template.organization_id != ctx.organization_id {
            return Err(ManagementError::not_found("notification template", &template.id));
        }
        self.cache.put(template.clone());
        self.send_update_command(ctx, &template).await;
        Ok(template)
    }

    async fn send_update_command(&self, ctx: &ExecutionContext, template: &NotificationTemplate) {
        let mut command = Command::new(
            self.node_id.clone(),
            MessageRecipient::ManagementApis,
            vec![CommandTag::EmailTemplateUpdate],
        )
        .with_organization(ctx.organization_id.clone())
        .expiring_at(Utc::now() + self.command_ttl);
        if let Some(environment_id) = &ctx.environment_id {
            command = command.with_environment(environment_id.clone());
        }

        let command = match command.with_content(template) {
            Ok(command) => command,
            Err(err) => {
                tracing::error!(
                    template_id = %template.id,
                    error = %err,
                    "cannot serialize email template command"
                );
                return;
            }
        };
        match self.commands.create(command).await {
            Ok(created) => tracing::debug!(
                template_id = %template.id,
                command_id = %created.id,
                "email template update sent"
            ),
            Err(err) => tracing::error!(
                template_id = %template.id,
                error = %err,
                "cannot store email template command"
            ),
        }
    }
}

/// Refreshes the local template cache from `EMAIL_TEMPLATE_UPDATE` commands.
pub struct EmailTemplateUpdateListener {
    cache: TemplateCache,
}

impl EmailTemplateUpdateListener {
    pub fn new(cache: TemplateCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl CommandListener for EmailTemplateUpdateListener {
    fn name(&self) -> &str {
        "email-template-update"
    }

    fn tag(&self) -> CommandTag {
        CommandTag::EmailTemplateUpdate
    }

    async fn on_command(&self, command: &Command) -> Result<(), ListenerError> {
        let template: NotificationTemplate = serde_json::from_str(&command.content)
            .map_err(|err| ListenerError::payload(&command.id, err))?;
        tracing::debug!(
            template_id = %template.id,
            organization_id = %template.organization_id,
            "refreshing email template"
        );
        self.cache.put(template);
        Ok(())
    }
}
