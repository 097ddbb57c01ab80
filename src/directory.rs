use async_trait::async_trait;
use uuid::Uuid;

use crate::shared::error::HelpdeskError;
use crate::shared::models::{Capability, Role, UserRef};

/// Which roles grant which engine-facing capabilities. This table and the
/// authorizer are the only places that spell out role names.
pub fn role_grants(role: Role, capability: Capability) -> bool {
    match capability {
        Capability::Agent => role == Role::Agent,
        Capability::Triage | Capability::EscalationRecipient => {
            matches!(role, Role::Admin | Role::Superadmin)
        }
    }
}

/// Directory collaborator: who exists and what they can receive. User
/// accounts themselves are owned by the external identity system.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<UserRef>, HelpdeskError>;

    async fn with_capability(&self, capability: Capability)
        -> Result<Vec<UserRef>, HelpdeskError>;

    async fn holds(&self, id: Uuid, capability: Capability) -> Result<bool, HelpdeskError> {
        Ok(self
            .get(id)
            .await?
            .map_or(false, |user| role_grants(user.role, capability)))
    }
}

/// Fixed in-process directory, loaded once at startup.
pub struct StaticDirectory {
    users: Vec<UserRef>,
}

impl StaticDirectory {
    pub fn new(users: Vec<UserRef>) -> Self {
        Self { users }
    }

    /// The default account set a fresh deployment starts with.
    pub fn seeded() -> Self {
        let user = |name: &str, email: &str, role| UserRef {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            role,
        };
        Self::new(vec![
            user("SuperAdmin User", "superadmin@helpdesk.com", Role::Superadmin),
            user("Admin User", "admin@helpdesk.com", Role::Admin),
            user("Manager User", "manager@helpdesk.com", Role::Manager),
            user("Agent User 1", "agent1@helpdesk.com", Role::Agent),
            user("Agent User 2", "agent2@helpdesk.com", Role::Agent),
            user("Test User", "user@helpdesk.com", Role::User),
        ])
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn get(&self, id: Uuid) -> Result<Option<UserRef>, HelpdeskError> {
        Ok(self.users.iter().find(|u| u.id == id).cloned())
    }

    async fn with_capability(
        &self,
        capability: Capability,
    ) -> Result<Vec<UserRef>, HelpdeskError> {
        Ok(self
            .users
            .iter()
            .filter(|u| role_grants(u.role, capability))
            .cloned()
            .collect())
    }
}
