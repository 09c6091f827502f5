//! Role-based permission checks over organizations, environments, APIs,
//! applications and groups.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::error::{ManagementError, ManagementResult, RepositoryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleScope {
    Organization,
    Environment,
    Api,
    Application,
    Group,
}

impl RoleScope {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleScope::Organization => "ORGANIZATION",
            RoleScope::Environment => "ENVIRONMENT",
            RoleScope::Api => "API",
            RoleScope::Application => "APPLICATION",
            RoleScope::Group => "GROUP",
        }
    }

    /// Scopes whose members may also be granted roles through groups.
    fn inherits_from_groups(self) -> bool {
        matches!(self, RoleScope::Api | RoleScope::Application)
    }
}

impl fmt::Display for RoleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Acl {
    #[serde(rename = "C")]
    Create,
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
}

impl Acl {
    pub const ALL: [Acl; 4] = [Acl::Create, Acl::Read, Acl::Update, Acl::Delete];

    pub fn code(self) -> char {
        match self {
            Acl::Create => 'C',
            Acl::Read => 'R',
            Acl::Update => 'U',
            Acl::Delete => 'D',
        }
    }

    /// Parse a compact grant such as `"CRUD"` or `"R"`. Unknown letters are
    /// ignored.
    pub fn parse_codes(codes: &str) -> BTreeSet<Acl> {
        codes
            .chars()
            .filter_map(|c| Acl::ALL.into_iter().find(|acl| acl.code() == c.to_ascii_uppercase()))
            .collect()
    }
}

/// A named permission within a scope, e.g. `API:DEFINITION`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permission {
    pub scope: RoleScope,
    pub name: String,
}

impl Permission {
    pub fn new(scope: RoleScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub scope: RoleScope,
    pub name: String,
    #[serde(default)]
    pub permissions: BTreeMap<String, BTreeSet<Acl>>,
}

impl Role {
    pub fn new(scope: RoleScope, name: impl Into<String>) -> Self {
        Self {
            scope,
            name: name.into(),
            permissions: BTreeMap::new(),
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>, acls: &str) -> Self {
        self.permissions
            .entry(permission.into())
            .or_default()
            .extend(Acl::parse_codes(acls));
        self
    }

    /// `true` when this role grants every one of `acls` on `permission`.
    pub fn grants(&self, permission: &Permission, acls: &[Acl]) -> bool {
        self.scope == permission.scope
            && self
                .permissions
                .get(&permission.name)
                .is_some_and(|granted| acls.iter().all(|acl| granted.contains(acl)))
    }
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Roles `user_id` holds as a member of `reference_id` in `scope`. For
    /// [`RoleScope::Group`] these are the API or application roles the group
    /// membership carries.
    async fn roles_of(
        &self,
        user_id: &str,
        scope: RoleScope,
        reference_id: &str,
    ) -> Result<Vec<Role>, RepositoryError>;

    /// Groups attached to `reference_id`.
    async fn groups_of(
        &self,
        scope: RoleScope,
        reference_id: &str,
    ) -> Result<Vec<String>, RepositoryError>;
}

type MembershipKey = (String, RoleScope, String);

#[derive(Default)]
struct Memberships {
    roles: HashMap<MembershipKey, Vec<Role>>,
    groups: HashMap<(RoleScope, String), Vec<String>>,
}

#[derive(Clone, Default)]
pub struct MemMembershipRepository {
    inner: Arc<RwLock<Memberships>>,
}

impl fmt::Debug for MemMembershipRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (roles, groups) = {
            let inner = self.read();
            (inner.roles.len(), inner.groups.len())
        };
        f.debug_struct("MemMembershipRepository")
            .field("memberships", &roles)
            .field("group_links", &groups)
            .finish()
    }
}

impl MemMembershipRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic mid-write leaves at most one extra entry behind, so a poisoned
    // lock is recovered rather than surfaced.
    fn read(&self) -> RwLockReadGuard<'_, Memberships> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Memberships> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn grant(&self, user_id: &str, scope: RoleScope, reference_id: &str, role: Role) {
        let mut inner = self.write();
        inner
            .roles
            .entry((user_id.to_string(), scope, reference_id.to_string()))
            .or_default()
            .push(role);
    }

    pub fn attach_group(&self, scope: RoleScope, reference_id: &str, group_id: &str) {
        let mut inner = self.write();
        inner
            .groups
            .entry((scope, reference_id.to_string()))
            .or_default()
            .push(group_id.to_string());
    }
}

#[async_trait]
impl MembershipRepository for MemMembershipRepository {
    async fn roles_of(
        &self,
        user_id: &str,
        scope: RoleScope,
        reference_id: &str,
    ) -> Result<Vec<Role>, RepositoryError> {
        Ok(self
            .read()
            .roles
            .get(&(user_id.to_string(), scope, reference_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn groups_of(
        &self,
        scope: RoleScope,
        reference_id: &str,
    ) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .read()
            .groups
            .get(&(scope, reference_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

pub struct PermissionService {
    memberships: Arc<dyn MembershipRepository>,
}

impl PermissionService {
    pub fn new(memberships: Arc<dyn MembershipRepository>) -> Self {
        Self { memberships }
    }

    /// Whether the caller holds every one of `acls` on `permission` for
    /// `reference_id`.
    ///
    /// Organization admins hold everything. Otherwise a single role must
    /// grant all the requested ACLs, either directly on the reference or, for
    /// APIs and applications, through one of the groups attached to it.
    pub async fn has_permission(
        &self,
        ctx: &ExecutionContext,
        permission: &Permission,
        reference_id: &str,
        acls: &[Acl],
    ) -> ManagementResult<bool> {
        let Some(principal) = ctx.principal.as_ref() else {
            return Ok(false);
        };
        if principal.organization_admin {
            return Ok(true);
        }
        let user = principal.user_id.as_str();

        let direct = self.roles(user, permission.scope, reference_id).await?;
        if direct.iter().any(|role| role.grants(permission, acls)) {
            tracing::debug!(user, %permission, reference_id, "granted by direct membership");
            return Ok(true);
        }

        if permission.scope.inherits_from_groups() {
            let groups = self
                .memberships
                .groups_of(permission.scope, reference_id)
                .await
                .map_err(|err| {
                    ManagementError::technical(
                        format!("cannot list groups of {} '{reference_id}'", permission.scope),
                        err,
                    )
                })?;
            for group in &groups {
                let roles = self.roles(user, RoleScope::Group, group).await?;
                if roles.iter().any(|role| role.grants(permission, acls)) {
                    tracing::debug!(
                        user,
                        %permission,
                        reference_id,
                        group,
                        "granted through group"
                    );
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    pub async fn ensure_permission(
        &self,
        ctx: &ExecutionContext,
        permission: &Permission,
        reference_id: &str,
        acls: &[Acl],
    ) -> ManagementResult<()> {
        if self.has_permission(ctx, permission, reference_id, acls).await? {
            return Ok(());
        }
        let codes: String = acls.iter().map(|acl| acl.code()).collect();
        Err(ManagementError::Forbidden {
            user: ctx.user_id().unwrap_or("<system>").to_string(),
            permission: format!("{permission}[{codes}]"),
            reference_id: reference_id.to_string(),
        })
    }

    async fn roles(
        &self,
        user: &str,
        scope: RoleScope,
        reference_id: &str,
    ) -> ManagementResult<Vec<Role>> {
        self.memberships
            .roles_of(user, scope, reference_id)
            .await
            .map_err(|err| {
                ManagementError::technical(
                    format!("cannot load roles of '{user}' on {scope} '{reference_id}'"),
                    err,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Principal;

    fn definition() -> Permission {
        Permission::new(RoleScope::Api, "DEFINITION")
    }

    fn setup() -> (MemMembershipRepository, PermissionService) {
        let repo = MemMembershipRepository::new();
        let service = PermissionService::new(Arc::new(repo.clone()));
        (repo, service)
    }

    #[tokio::test]
    async fn organization_admin_is_always_allowed() {
        let (_, service) = setup();
        let ctx = ExecutionContext::new("DEFAULT", Principal::admin("root"));
        assert!(service.has_permission(&ctx, &definition(), "api-1", &Acl::ALL).await.unwrap());
    }

    #[tokio::test]
    async fn direct_role_must_grant_every_acl() {
        let (repo, service) = setup();
        repo.grant(
            "alice",
            RoleScope::Api,
            "api-1",
            Role::new(RoleScope::Api, "USER").with_permission("DEFINITION", "R"),
        );
        let ctx = ExecutionContext::new("DEFAULT", Principal::user("alice"));

        let read = [Acl::Read];
        assert!(service.has_permission(&ctx, &definition(), "api-1", &read).await.unwrap());
        assert!(!service
            .has_permission(&ctx, &definition(), "api-1", &[Acl::Read, Acl::Update])
            .await
            .unwrap());
        assert!(!service.has_permission(&ctx, &definition(), "api-2", &read).await.unwrap());
    }

    #[tokio::test]
    async fn acls_are_not_combined_across_roles() {
        let (repo, service) = setup();
        for acl in ["R", "U"] {
            let role = Role::new(RoleScope::Api, acl).with_permission("DEFINITION", acl);
            repo.grant("bob", RoleScope::Api, "api-1", role);
        }
        let ctx = ExecutionContext::new("DEFAULT", Principal::user("bob"));

        assert!(!service
            .has_permission(&ctx, &definition(), "api-1", &[Acl::Read, Acl::Update])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn group_roles_apply_to_apis() {
        let (repo, service) = setup();
        repo.attach_group(RoleScope::Api, "api-1", "team-a");
        repo.grant(
            "carol",
            RoleScope::Group,
            "team-a",
            Role::new(RoleScope::Api, "OWNER").with_permission("DEFINITION", "CRUD"),
        );
        let ctx = ExecutionContext::new("DEFAULT", Principal::user("carol"));

        assert!(service.has_permission(&ctx, &definition(), "api-1", &Acl::ALL).await.unwrap());
    }

    #[tokio::test]
    async fn groups_do_not_apply_to_environments() {
        let (repo, service) = setup();
        let permission = Permission::new(RoleScope::Environment, "API");
        repo.attach_group(RoleScope::Environment, "DEFAULT", "team-a");
        repo.grant(
            "dave",
            RoleScope::Group,
            "team-a",
            Role::new(RoleScope::Environment, "ADMIN").with_permission("API", "CRUD"),
        );
        let ctx = ExecutionContext::new("DEFAULT", Principal::user("dave"));

        assert!(!service
            .has_permission(&ctx, &permission, "DEFAULT", &[Acl::Read])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn ensure_permission_reports_forbidden() {
        let (_, service) = setup();
        let ctx = ExecutionContext::new("DEFAULT", Principal::user("eve"));
        let err = service
            .ensure_permission(&ctx, &definition(), "api-1", &[Acl::Update])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ManagementError::Forbidden { ref user, ref permission, .. }
                if user == "eve" && permission == "API:DEFINITION[U]"
        ));
    }

    #[tokio::test]
    async fn system_context_holds_no_permission() {
        let (_, service) = setup();
        let ctx = ExecutionContext::system("DEFAULT");
        assert!(!service
            .has_permission(&ctx, &definition(), "api-1", &[Acl::Read])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn poisoned_memberships_stay_readable_and_writable() {
        let repo = MemMembershipRepository::new();
        repo.grant("frank", RoleScope::Api, "api-1", Role::new(RoleScope::Api, "USER"));
        let poisoner = repo.clone();
        let joined = std::thread::spawn(move || {
            let _guard = poisoner.inner.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();
        assert!(joined.is_err());
        assert!(repo.inner.is_poisoned());

        repo.attach_group(RoleScope::Api, "api-1", "team-a");
        repo.grant("frank", RoleScope::Api, "api-1", Role::new(RoleScope::Api, "OWNER"));

        let roles = repo.roles_of("frank", RoleScope::Api, "api-1").await.unwrap();
        let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["USER", "OWNER"]);
        let groups = repo.groups_of(RoleScope::Api, "api-1").await.unwrap();
        assert_eq!(groups, ["team-a"]);
        assert!(format!("{repo:?}").contains("memberships: 1"));
    }

    #[test]
    fn acl_codes_parse_case_insensitively() {
        assert_eq!(Acl::parse_codes("cRx"), BTreeSet::from([Acl::Create, Acl::Read]));
    }
}
