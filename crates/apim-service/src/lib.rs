//! Management services built on the command bus and the JSON engines.
//!
//! Every operation receives an [`ExecutionContext`] carrying the caller's
//! organization and principal; nothing is looked up from ambient state.

pub mod context;
pub mod error;
pub mod notification_template;
pub mod permission;
pub mod plugin_config;
pub mod subscription;

pub use context::{ExecutionContext, Principal};
pub use error::{ManagementError, ManagementResult, RepositoryError};
pub use notification_template::{
    EmailTemplateUpdateListener, NotificationTemplate, NotificationTemplateService, TemplateCache,
};
pub use permission::{
    Acl, MemMembershipRepository, MembershipRepository, Permission, PermissionService, Role,
    RoleScope,
};
pub use plugin_config::{PluginConfigurationService, SchemaSource, StaticSchemaSource};
pub use subscription::{
    MemSubscriptionRepository, Subscription, SubscriptionFailureCommand,
    SubscriptionFailureListener, SubscriptionRepository, SubscriptionStatus,
};
