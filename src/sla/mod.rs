pub mod detector;
pub mod escalation;
pub mod sweep;

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::authz::{require, Action, Authorizer};
use crate::shared::clock::Clock;
use crate::shared::error::HelpdeskError;
use crate::shared::models::{Actor, Priority, SlaPolicy};
use crate::shared::state::AppState;
use crate::store::{PolicyStore, TicketStore};

/// The resolution deadline for a ticket bound to `policy` at `created_at`.
pub fn due_date(created_at: DateTime<Utc>, policy: &SlaPolicy) -> DateTime<Utc> {
    created_at + Duration::hours(policy.resolution_time_hours as i64)
}

/// Default catalog a fresh deployment starts with.
const DEFAULT_POLICIES: [(&str, Priority, i32, i32); 4] = [
    ("Low Priority SLA", Priority::Low, 24, 72),
    ("Medium Priority SLA", Priority::Medium, 8, 24),
    ("High Priority SLA", Priority::High, 2, 8),
    ("Urgent Priority SLA", Priority::Urgent, 1, 4),
];

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyDraft {
    pub name: String,
    pub priority: Priority,
    pub response_time_hours: i32,
    pub resolution_time_hours: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyPatch {
    pub name: Option<String>,
    pub response_time_hours: Option<i32>,
    pub resolution_time_hours: Option<i32>,
    pub is_active: Option<bool>,
}

/// Policy registry and administration. The store itself is the registry:
/// lookups re-read it, so catalog edits take effect on the next binding.
#[derive(Clone)]
pub struct PolicyService {
    policies: Arc<dyn PolicyStore>,
    tickets: Arc<dyn TicketStore>,
    authz: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
}

impl PolicyService {
    pub fn new(
        policies: Arc<dyn PolicyStore>,
        tickets: Arc<dyn TicketStore>,
        authz: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policies,
            tickets,
            authz,
            clock,
        }
    }

    pub async fn list(&self, actor: &Actor) -> Result<Vec<SlaPolicy>, HelpdeskError> {
        require(self.authz.as_ref(), actor, Action::ManagePolicies, None)?;
        self.policies.list().await
    }

    /// Creates a policy as the active one for its priority, superseding
    /// (deactivating) the previous active policy so at most one stays
    /// eligible for binding.
    pub async fn create(
        &self,
        actor: &Actor,
        draft: PolicyDraft,
    ) -> Result<SlaPolicy, HelpdeskError> {
        require(self.authz.as_ref(), actor, Action::ManagePolicies, None)?;
        validate_budgets(&draft.name, draft.response_time_hours, draft.resolution_time_hours)?;

        let now = self.clock.now();
        if let Some(mut previous) = self.policies.active_for(draft.priority).await? {
            previous.is_active = false;
            previous.updated_at = now;
            self.policies.update(&previous).await?;
            info!(
                "SLA policy {} superseded for {} priority",
                previous.id, draft.priority
            );
        }

        let policy = SlaPolicy {
            id: Uuid::new_v4(),
            name: draft.name,
            priority: draft.priority,
            response_time_hours: draft.response_time_hours,
            resolution_time_hours: draft.resolution_time_hours,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.policies.insert(&policy).await?;
        Ok(policy)
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: Uuid,
        patch: PolicyPatch,
    ) -> Result<SlaPolicy, HelpdeskError> {
        require(self.authz.as_ref(), actor, Action::ManagePolicies, None)?;
        let mut policy = self
            .policies
            .get(id)
            .await?
            .ok_or_else(|| HelpdeskError::NotFound(format!("SLA policy {id} not found")))?;

        if let Some(name) = patch.name {
            policy.name = name;
        }
        if let Some(hours) = patch.response_time_hours {
            policy.response_time_hours = hours;
        }
        if let Some(hours) = patch.resolution_time_hours {
            policy.resolution_time_hours = hours;
        }
        validate_budgets(
            &policy.name,
            policy.response_time_hours,
            policy.resolution_time_hours,
        )?;

        if let Some(activate) = patch.is_active {
            if activate && !policy.is_active {
                if let Some(mut other) = self.policies.active_for(policy.priority).await? {
                    if other.id != policy.id {
                        other.is_active = false;
                        other.updated_at = self.clock.now();
                        self.policies.update(&other).await?;
                    }
                }
            }
            policy.is_active = activate;
        }

        policy.updated_at = self.clock.now();
        self.policies.update(&policy).await
    }

    /// Deletion is rejected while any ticket still references the policy;
    /// the ticket's due-date semantics stay frozen on the snapshot it bound.
    pub async fn delete(&self, actor: &Actor, id: Uuid) -> Result<(), HelpdeskError> {
        require(self.authz.as_ref(), actor, Action::ManagePolicies, None)?;
        let referencing = self.tickets.count_referencing_policy(id).await?;
        if referencing > 0 {
            return Err(HelpdeskError::Validation(format!(
                "SLA policy {id} is referenced by {referencing} tickets; deactivate it instead"
            )));
        }
        self.policies.delete(id).await
    }

    /// Seeds the default catalog on an empty store.
    pub async fn ensure_defaults(&self) -> Result<(), HelpdeskError> {
        if self.policies.count().await? > 0 {
            return Ok(());
        }
        let now = self.clock.now();
        for (name, priority, response, resolution) in DEFAULT_POLICIES {
            let policy = SlaPolicy {
                id: Uuid::new_v4(),
                name: name.to_string(),
                priority,
                response_time_hours: response,
                resolution_time_hours: resolution,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            self.policies.insert(&policy).await?;
            info!("seeded default SLA policy: {name}");
        }
        Ok(())
    }
}

fn validate_budgets(name: &str, response: i32, resolution: i32) -> Result<(), HelpdeskError> {
    if name.trim().is_empty() {
        return Err(HelpdeskError::Validation(
            "policy name must not be empty".to_string(),
        ));
    }
    if response < 1 || resolution < 1 {
        return Err(HelpdeskError::Validation(
            "time budgets must be at least one hour".to_string(),
        ));
    }
    if resolution < response {
        warn!("policy \"{name}\" has a resolution budget below its response budget");
    }
    Ok(())
}

pub async fn list_policies(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<SlaPolicy>>, HelpdeskError> {
    Ok(Json(state.policies.list(&actor).await?))
}

pub async fn create_policy(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(draft): Json<PolicyDraft>,
) -> Result<(StatusCode, Json<SlaPolicy>), HelpdeskError> {
    let policy = state.policies.create(&actor, draft).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

pub async fn update_policy(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(patch): Json<PolicyPatch>,
) -> Result<Json<SlaPolicy>, HelpdeskError> {
    Ok(Json(state.policies.update(&actor, id, patch).await?))
}

pub async fn delete_policy(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, HelpdeskError> {
    state.policies.delete(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn run_sla_check(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<sweep::PassSummary>, HelpdeskError> {
    require(state.authz.as_ref(), &actor, Action::TriggerSlaCheck, None)?;
    Ok(Json(state.monitor.run_pass().await?))
}

pub fn configure_sla_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/sla/policies", get(list_policies).post(create_policy))
        .route(
            "/api/sla/policies/:id",
            put(update_policy).delete(delete_policy),
        )
        .route("/api/sla/check", post(run_sla_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::RoleAuthorizer;
    use crate::shared::clock::ManualClock;
    use crate::shared::models::Role;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    fn service() -> (PolicyService, Arc<MemoryStore>, Actor) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let admin = Actor {
            id: Uuid::new_v4(),
            role: Role::Admin,
        };
        let service = PolicyService::new(
            store.clone(),
            store.clone(),
            Arc::new(RoleAuthorizer),
            clock,
        );
        (service, store, admin)
    }

    fn draft(priority: Priority, response: i32, resolution: i32) -> PolicyDraft {
        PolicyDraft {
            name: format!("{priority} SLA"),
            priority,
            response_time_hours: response,
            resolution_time_hours: resolution,
        }
    }

    #[tokio::test]
    async fn ensure_defaults_seeds_full_ladder_once() {
        let (service, store, _) = service();
        service.ensure_defaults().await.unwrap();
        service.ensure_defaults().await.unwrap();

        assert_eq!(PolicyStore::count(store.as_ref()).await.unwrap(), 4);
        let urgent = store.active_for(Priority::Urgent).await.unwrap().unwrap();
        assert_eq!(urgent.response_time_hours, 1);
        assert_eq!(urgent.resolution_time_hours, 4);
    }

    #[tokio::test]
    async fn creating_supersedes_previous_active_policy() {
        let (service, store, admin) = service();
        let first = service
            .create(&admin, draft(Priority::High, 2, 8))
            .await
            .unwrap();
        let second = service
            .create(&admin, draft(Priority::High, 1, 6))
            .await
            .unwrap();

        let active = store.active_for(Priority::High).await.unwrap().unwrap();
        assert_eq!(active.id, second.id);
        let first = PolicyStore::get(store.as_ref(), first.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!first.is_active);
    }

    #[tokio::test]
    async fn inactive_policy_behaves_like_no_policy() {
        let (service, store, admin) = service();
        let policy = service
            .create(&admin, draft(Priority::Low, 24, 72))
            .await
            .unwrap();
        service
            .update(
                &admin,
                policy.id,
                PolicyPatch {
                    is_active: Some(false),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap();

        assert!(store.active_for(Priority::Low).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn referenced_policy_cannot_be_deleted() {
        let (service, store, admin) = service();
        let policy = service
            .create(&admin, draft(Priority::Medium, 8, 24))
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let ticket = crate::shared::models::Ticket {
            id: Uuid::new_v4(),
            title: "mouse missing".to_string(),
            description: None,
            category: None,
            priority: Priority::Medium,
            status: crate::shared::models::TicketStatus::Open,
            creator_id: Uuid::new_v4(),
            assignee_id: None,
            policy_id: Some(policy.id),
            due_at: Some(due_date(now, &policy)),
            resolved_at: None,
            escalated_to: None,
            escalation_kind: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        TicketStore::insert(store.as_ref(), &ticket).await.unwrap();

        let result = service.delete(&admin, policy.id).await;
        assert!(matches!(result, Err(HelpdeskError::Validation(_))));
        assert!(PolicyStore::get(store.as_ref(), policy.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn due_date_is_exact_resolution_offset() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let policy = SlaPolicy {
            id: Uuid::new_v4(),
            name: "High Priority SLA".to_string(),
            priority: Priority::High,
            response_time_hours: 2,
            resolution_time_hours: 8,
            is_active: true,
            created_at: created,
            updated_at: created,
        };
        assert_eq!(due_date(created, &policy), created + Duration::hours(8));
    }

    #[tokio::test]
    async fn non_admin_cannot_manage_policies() {
        let (service, _, _) = service();
        let agent = Actor {
            id: Uuid::new_v4(),
            role: Role::Agent,
        };
        let result = service.create(&agent, draft(Priority::High, 2, 8)).await;
        assert!(matches!(result, Err(HelpdeskError::PermissionDenied(_))));
    }
}
