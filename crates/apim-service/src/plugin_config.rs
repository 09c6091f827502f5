//! Validation of plugin configurations against the schema each plugin ships.

use std::collections::HashMap;
use std::sync::Arc;

use apim_json::{JsonPatch, JsonSchemaValidator};
use async_trait::async_trait;

use crate::error::{ManagementError, ManagementResult, RepositoryError};

#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Configuration schema of `plugin_id`; `None` when the plugin has none.
    async fn schema_for(&self, plugin_id: &str) -> Result<Option<String>, RepositoryError>;
}

/// Schemas known up front, keyed by plugin id.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaSource {
    schemas: HashMap<String, String>,
}

impl StaticSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, plugin_id: impl Into<String>, schema: impl Into<String>) -> Self {
        self.schemas.insert(plugin_id.into(), schema.into());
        self
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn schema_for(&self, plugin_id: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.schemas.get(plugin_id).cloned())
    }
}

pub struct PluginConfigurationService {
    schemas: Arc<dyn SchemaSource>,
    validator: JsonSchemaValidator,
}

impl PluginConfigurationService {
    pub fn new(schemas: Arc<dyn SchemaSource>) -> Self {
        Self {
            schemas,
            validator: JsonSchemaValidator::new(),
        }
    }

    /// Sanitize `configuration` for `plugin_id` and return it serialized.
    pub async fn validate(&self, plugin_id: &str, configuration: &str) -> ManagementResult<String> {
        let schema = self.schema(plugin_id).await?;
        let sanitized = self.validator.validate(schema.as_deref(), configuration)?;
        tracing::debug!(plugin_id, "plugin configuration validated");
        Ok(sanitized)
    }

    /// Apply `patches` to a stored configuration, then sanitize the result
    /// against the plugin schema.
    pub async fn patch(
        &self,
        plugin_id: &str,
        configuration: &str,
        patches: &[JsonPatch],
    ) -> ManagementResult<String> {
        let patched = apim_json::execute(configuration, patches)?;
        self.validate(plugin_id, &patched).await
    }

    async fn schema(&self, plugin_id: &str) -> ManagementResult<Option<String>> {
        self.schemas.schema_for(plugin_id).await.map_err(|err| {
            ManagementError::technical(format!("cannot load schema of plugin '{plugin_id}'"), err)
        })
    }
}
