use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use crate::authz::{require, Action, Authorizer, TicketScope};
use crate::directory::Directory;
use crate::notify::{Dispatcher, TicketEvent};
use crate::shared::clock::Clock;
use crate::shared::error::HelpdeskError;
use crate::shared::models::{Actor, Capability, Priority, Ticket, TicketStatus};
use crate::sla::due_date;
use crate::store::{PolicyStore, TicketFilter, TicketStore, Visibility, WRITE_ATTEMPTS};

#[derive(Debug, Clone)]
pub struct TicketDraft {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default)]
pub struct TicketPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

/// Ticket lifecycle operations. Every mutation is a read-decide-write cycle
/// against the store's conditional update, retried on version conflicts.
#[derive(Clone)]
pub struct TicketService {
    tickets: Arc<dyn TicketStore>,
    policies: Arc<dyn PolicyStore>,
    directory: Arc<dyn Directory>,
    authz: Arc<dyn Authorizer>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
}

impl TicketService {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        policies: Arc<dyn PolicyStore>,
        directory: Arc<dyn Directory>,
        authz: Arc<dyn Authorizer>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickets,
            policies,
            directory,
            authz,
            dispatcher,
            clock,
        }
    }

    /// Creates the ticket and binds it to the active policy for its
    /// priority. A missing policy never blocks creation: the ticket simply
    /// starts unmonitored, with no due date.
    pub async fn create(&self, actor: &Actor, draft: TicketDraft) -> Result<Ticket, HelpdeskError> {
        let title = draft.title.trim().to_string();
        if title.is_empty() {
            return Err(HelpdeskError::Validation(
                "ticket title must not be empty".to_string(),
            ));
        }

        let priority = draft.priority.unwrap_or(Priority::Medium);
        let now = self.clock.now();
        let (policy_id, due_at) = match self.policies.active_for(priority).await? {
            Some(policy) => (Some(policy.id), Some(due_date(now, &policy))),
            None => {
                debug!("no active SLA policy for {priority} priority, ticket starts unmonitored");
                (None, None)
            }
        };

        let ticket = Ticket {
            id: Uuid::new_v4(),
            title,
            description: draft.description,
            category: draft.category,
            priority,
            status: TicketStatus::Open,
            creator_id: actor.id,
            assignee_id: None,
            policy_id,
            due_at,
            resolved_at: None,
            escalated_to: None,
            escalation_kind: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.tickets.insert(&ticket).await?;
        self.dispatcher.dispatch(&TicketEvent::Created, &ticket).await;
        Ok(ticket)
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> Result<Ticket, HelpdeskError> {
        let ticket = self.fetch(id).await?;
        require(self.authz.as_ref(), actor, Action::ViewTicket, Some(&ticket))?;
        Ok(ticket)
    }

    pub async fn list(
        &self,
        actor: &Actor,
        mut filter: TicketFilter,
    ) -> Result<Vec<Ticket>, HelpdeskError> {
        match self.authz.ticket_scope(actor) {
            TicketScope::All => {}
            TicketScope::Own => filter.visibility = Some(Visibility::CreatedBy(actor.id)),
            TicketScope::AssignedOrUnassigned => {
                filter.visibility = Some(Visibility::AssignedToOrUnassigned(actor.id));
            }
        }
        self.tickets.list(&filter).await
    }

    /// Applies a status transition. Requesting the current status is an
    /// idempotent no-op; the first transition into resolved stamps
    /// `resolved_at`, which is never cleared afterwards.
    pub async fn change_status(
        &self,
        actor: &Actor,
        id: Uuid,
        requested: TicketStatus,
    ) -> Result<Ticket, HelpdeskError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let current = self.fetch(id).await?;
            require(
                self.authz.as_ref(),
                actor,
                Action::SetStatus(requested),
                Some(&current),
            )?;

            if current.status == requested {
                return Ok(current);
            }
            if !current.status.can_transition(requested) {
                return Err(HelpdeskError::Validation(format!(
                    "cannot move ticket from {} to {}",
                    current.status, requested
                )));
            }

            let now = self.clock.now();
            let mut updated = current.clone();
            updated.status = requested;
            if requested == TicketStatus::Resolved && updated.resolved_at.is_none() {
                updated.resolved_at = Some(now);
            }
            updated.updated_at = now;

            match self.tickets.update(&updated).await {
                Ok(stored) => {
                    let event = if requested == TicketStatus::Resolved {
                        TicketEvent::Resolved
                    } else {
                        TicketEvent::StatusChanged {
                            from: current.status,
                            to: requested,
                        }
                    };
                    self.dispatcher.dispatch(&event, &stored).await;
                    return Ok(stored);
                }
                Err(HelpdeskError::ConcurrentModification(_)) if attempts < WRITE_ATTEMPTS => {
                    debug!("retrying status change for ticket {id} after concurrent write");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Assigns the ticket to an agent and forces it into in_progress. Only
    /// active tickets are assignable; the target must hold the agent
    /// capability.
    pub async fn assign(
        &self,
        actor: &Actor,
        id: Uuid,
        agent_id: Uuid,
    ) -> Result<Ticket, HelpdeskError> {
        let agent = self
            .directory
            .get(agent_id)
            .await?
            .ok_or_else(|| HelpdeskError::NotFound(format!("user {agent_id} not found")))?;
        if !crate::directory::role_grants(agent.role, Capability::Agent) {
            return Err(HelpdeskError::Validation(format!(
                "user {agent_id} does not hold the agent capability"
            )));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let current = self.fetch(id).await?;
            require(self.authz.as_ref(), actor, Action::AssignTicket, Some(&current))?;
            if current.status.is_terminal() {
                return Err(HelpdeskError::Validation(
                    "cannot assign a resolved or closed ticket".to_string(),
                ));
            }

            let mut updated = current.clone();
            updated.assignee_id = Some(agent_id);
            updated.status = TicketStatus::InProgress;
            updated.updated_at = self.clock.now();

            match self.tickets.update(&updated).await {
                Ok(stored) => {
                    self.dispatcher
                        .dispatch(&TicketEvent::Assigned { agent_id }, &stored)
                        .await;
                    return Ok(stored);
                }
                Err(HelpdeskError::ConcurrentModification(_)) if attempts < WRITE_ATTEMPTS => {
                    debug!("retrying assignment for ticket {id} after concurrent write");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Edits ticket details. A manual priority change clears the escalation
    /// marker (a new breach cycle starts) but never re-resolves the bound
    /// policy or due date, which are a creation-time snapshot.
    pub async fn update_details(
        &self,
        actor: &Actor,
        id: Uuid,
        patch: TicketPatch,
    ) -> Result<Ticket, HelpdeskError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let current = self.fetch(id).await?;
            require(
                self.authz.as_ref(),
                actor,
                Action::EditTicketDetails,
                Some(&current),
            )?;
            if patch.priority.is_some() {
                require(self.authz.as_ref(), actor, Action::SetPriority, Some(&current))?;
            }

            let mut updated = current.clone();
            if let Some(title) = &patch.title {
                let title = title.trim();
                if title.is_empty() {
                    return Err(HelpdeskError::Validation(
                        "ticket title must not be empty".to_string(),
                    ));
                }
                updated.title = title.to_string();
            }
            if let Some(description) = &patch.description {
                updated.description = Some(description.clone());
            }
            if let Some(category) = &patch.category {
                updated.category = Some(category.clone());
            }
            if let Some(priority) = patch.priority {
                if priority != updated.priority {
                    updated.priority = priority;
                    updated.escalated_to = None;
                    updated.escalation_kind = None;
                }
            }
            updated.updated_at = self.clock.now();

            match self.tickets.update(&updated).await {
                Ok(stored) => return Ok(stored),
                Err(HelpdeskError::ConcurrentModification(_)) if attempts < WRITE_ATTEMPTS => {
                    debug!("retrying detail update for ticket {id} after concurrent write");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch(&self, id: Uuid) -> Result<Ticket, HelpdeskError> {
        self.tickets
            .get(id)
            .await?
            .ok_or_else(|| HelpdeskError::NotFound(format!("ticket {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::RoleAuthorizer;
    use crate::directory::StaticDirectory;
    use crate::notify::mailer::LogMailer;
    use crate::shared::clock::ManualClock;
    use crate::shared::models::{Role, SlaPolicy, UserRef};
    use crate::store::memory::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        service: TicketService,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        requester: Actor,
        agent: Actor,
        agent_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::at(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let requester_ref = UserRef {
            id: Uuid::new_v4(),
            name: "Test User".to_string(),
            email: "user@helpdesk.test".to_string(),
            role: Role::User,
        };
        let agent_ref = UserRef {
            id: Uuid::new_v4(),
            name: "Agent User".to_string(),
            email: "agent@helpdesk.test".to_string(),
            role: Role::Agent,
        };
        let admin_ref = UserRef {
            id: Uuid::new_v4(),
            name: "Admin User".to_string(),
            email: "admin@helpdesk.test".to_string(),
            role: Role::Admin,
        };
        let requester = Actor {
            id: requester_ref.id,
            role: Role::User,
        };
        let agent = Actor {
            id: agent_ref.id,
            role: Role::Agent,
        };
        let agent_id = agent_ref.id;
        let directory = Arc::new(StaticDirectory::new(vec![
            requester_ref,
            agent_ref,
            admin_ref,
        ]));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            directory.clone(),
            Arc::new(LogMailer),
            clock.clone(),
        ));
        let service = TicketService::new(
            store.clone(),
            store.clone(),
            directory,
            Arc::new(RoleAuthorizer),
            dispatcher,
            clock.clone(),
        );
        Fixture {
            service,
            store,
            clock,
            requester,
            agent,
            agent_id,
        }
    }

    async fn seed_policy(store: &MemoryStore, priority: Priority, response: i32, resolution: i32) {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PolicyStore::insert(
            store,
            &SlaPolicy {
                id: Uuid::new_v4(),
                name: format!("{priority} priority SLA"),
                priority,
                response_time_hours: response,
                resolution_time_hours: resolution,
                is_active: true,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .unwrap();
    }

    fn draft(priority: Priority) -> TicketDraft {
        TicketDraft {
            title: "laptop will not boot".to_string(),
            description: Some("black screen since this morning".to_string()),
            category: Some("hardware".to_string()),
            priority: Some(priority),
        }
    }

    #[tokio::test]
    async fn create_binds_policy_and_computes_due_date() {
        let fx = fixture();
        seed_policy(&fx.store, Priority::High, 2, 8).await;

        let ticket = fx
            .service
            .create(&fx.requester, draft(Priority::High))
            .await
            .unwrap();

        assert!(ticket.policy_id.is_some());
        assert_eq!(
            ticket.due_at,
            Some(ticket.created_at + Duration::hours(8))
        );
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.version, 0);
    }

    #[tokio::test]
    async fn create_without_active_policy_is_unmonitored() {
        let fx = fixture();

        let ticket = fx
            .service
            .create(&fx.requester, draft(Priority::Low))
            .await
            .unwrap();

        assert_eq!(ticket.policy_id, None);
        assert_eq!(ticket.due_at, None);
    }

    #[tokio::test]
    async fn inactive_policy_leaves_ticket_unmonitored() {
        let fx = fixture();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PolicyStore::insert(
            fx.store.as_ref(),
            &SlaPolicy {
                id: Uuid::new_v4(),
                name: "Retired High SLA".to_string(),
                priority: Priority::High,
                response_time_hours: 2,
                resolution_time_hours: 8,
                is_active: false,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .unwrap();

        let ticket = fx
            .service
            .create(&fx.requester, draft(Priority::High))
            .await
            .unwrap();
        assert_eq!(ticket.policy_id, None);
        assert_eq!(ticket.due_at, None);
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let fx = fixture();
        let result = fx
            .service
            .create(
                &fx.requester,
                TicketDraft {
                    title: "   ".to_string(),
                    description: None,
                    category: None,
                    priority: None,
                },
            )
            .await;
        assert!(matches!(result, Err(HelpdeskError::Validation(_))));
    }

    #[tokio::test]
    async fn resolve_stamps_resolved_at_exactly_once() {
        let fx = fixture();
        let ticket = fx
            .service
            .create(&fx.requester, draft(Priority::Medium))
            .await
            .unwrap();

        fx.clock.advance(Duration::hours(1));
        let resolved = fx
            .service
            .change_status(&fx.agent, ticket.id, TicketStatus::Resolved)
            .await
            .unwrap();
        let first_stamp = resolved.resolved_at.unwrap();
        assert_eq!(first_stamp, fx.clock.now());

        fx.clock.advance(Duration::hours(1));
        let again = fx
            .service
            .change_status(&fx.agent, ticket.id, TicketStatus::Resolved)
            .await
            .unwrap();
        assert_eq!(again.resolved_at, Some(first_stamp));
        assert_eq!(again.version, resolved.version);
    }

    #[tokio::test]
    async fn requester_may_close_own_ticket_but_not_resolve() {
        let fx = fixture();
        let ticket = fx
            .service
            .create(&fx.requester, draft(Priority::Medium))
            .await
            .unwrap();

        let denied = fx
            .service
            .change_status(&fx.requester, ticket.id, TicketStatus::Resolved)
            .await;
        assert!(matches!(denied, Err(HelpdeskError::PermissionDenied(_))));

        let closed = fx
            .service
            .change_status(&fx.requester, ticket.id, TicketStatus::Closed)
            .await
            .unwrap();
        assert_eq!(closed.status, TicketStatus::Closed);
    }

    #[tokio::test]
    async fn closed_tickets_reject_further_transitions() {
        let fx = fixture();
        let ticket = fx
            .service
            .create(&fx.requester, draft(Priority::Medium))
            .await
            .unwrap();
        fx.service
            .change_status(&fx.agent, ticket.id, TicketStatus::Closed)
            .await
            .unwrap();

        let reopened = fx
            .service
            .change_status(&fx.agent, ticket.id, TicketStatus::Open)
            .await;
        assert!(matches!(reopened, Err(HelpdeskError::Validation(_))));
    }

    #[tokio::test]
    async fn assignment_forces_in_progress_and_requires_agent_capability() {
        let fx = fixture();
        let ticket = fx
            .service
            .create(&fx.requester, draft(Priority::Medium))
            .await
            .unwrap();

        let to_non_agent = fx.service.assign(&fx.agent, ticket.id, fx.requester.id).await;
        assert!(matches!(to_non_agent, Err(HelpdeskError::Validation(_))));

        let assigned = fx
            .service
            .assign(&fx.agent, ticket.id, fx.agent_id)
            .await
            .unwrap();
        assert_eq!(assigned.status, TicketStatus::InProgress);
        assert_eq!(assigned.assignee_id, Some(fx.agent_id));
    }

    #[tokio::test]
    async fn assignment_rejected_on_terminal_ticket() {
        let fx = fixture();
        let ticket = fx
            .service
            .create(&fx.requester, draft(Priority::Medium))
            .await
            .unwrap();
        fx.service
            .change_status(&fx.agent, ticket.id, TicketStatus::Resolved)
            .await
            .unwrap();

        let result = fx.service.assign(&fx.agent, ticket.id, fx.agent_id).await;
        assert!(matches!(result, Err(HelpdeskError::Validation(_))));
    }

    #[tokio::test]
    async fn manual_priority_change_clears_escalation_marker() {
        let fx = fixture();
        let created = fx
            .service
            .create(&fx.requester, draft(Priority::Medium))
            .await
            .unwrap();

        // Simulate a prior escalation.
        let mut escalated = TicketStore::get(fx.store.as_ref(), created.id)
            .await
            .unwrap()
            .unwrap();
        escalated.priority = Priority::High;
        escalated.escalated_to = Some(Priority::High);
        escalated.escalation_kind = Some(crate::shared::models::ViolationKind::Response);
        let escalated = TicketStore::update(fx.store.as_ref(), &escalated)
            .await
            .unwrap();
        assert!(escalated.escalated_to.is_some());

        let patched = fx
            .service
            .update_details(
                &fx.agent,
                created.id,
                TicketPatch {
                    priority: Some(Priority::Low),
                    ..TicketPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(patched.priority, Priority::Low);
        assert_eq!(patched.escalated_to, None);
        assert_eq!(patched.escalation_kind, None);
    }

    #[tokio::test]
    async fn requester_cannot_change_priority() {
        let fx = fixture();
        let ticket = fx
            .service
            .create(&fx.requester, draft(Priority::Medium))
            .await
            .unwrap();

        let result = fx
            .service
            .update_details(
                &fx.requester,
                ticket.id,
                TicketPatch {
                    priority: Some(Priority::Urgent),
                    ..TicketPatch::default()
                },
            )
            .await;
        assert!(matches!(result, Err(HelpdeskError::PermissionDenied(_))));
    }
}
