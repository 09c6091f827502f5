/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub organization_admin: bool,
}

impl Principal {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_admin: true,
        }
    }
}

/// Where an operation runs and on whose behalf.
///
/// A context without a principal is a system call (for example, a command
/// listener acting for another node); it holds no permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub organization_id: String,
    pub environment_id: Option<String>,
    pub principal: Option<Principal>,
}

impl ExecutionContext {
    pub fn new(organization_id: impl Into<String>, principal: Principal) -> Self {
        Self {
            organization_id: organization_id.into(),
            environment_id: None,
            principal: Some(principal),
        }
    }

    pub fn system(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            environment_id: None,
            principal: None,
        }
    }

    pub fn with_environment(mut self, environment_id: impl Into<String>) -> Self {
        self.environment_id = Some(environment_id.into());
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.user_id.as_str())
    }
}
