use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::shared::error::HelpdeskError;
use crate::shared::models::{Actor, Role, Ticket, TicketStatus};

/// Actions the engine asks about. Role names never appear outside this
/// module; everything else reasons in terms of actions and capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewTicket,
    EditTicketDetails,
    SetStatus(TicketStatus),
    SetPriority,
    AssignTicket,
    ManagePolicies,
    TriggerSlaCheck,
}

impl Action {
    fn describe(&self) -> &'static str {
        match self {
            Action::ViewTicket => "view this ticket",
            Action::EditTicketDetails => "edit this ticket",
            Action::SetStatus(_) => "change this ticket's status",
            Action::SetPriority => "change this ticket's priority",
            Action::AssignTicket => "assign this ticket",
            Action::ManagePolicies => "manage SLA policies",
            Action::TriggerSlaCheck => "trigger an SLA check",
        }
    }
}

/// How much of the ticket set an actor may list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketScope {
    All,
    AssignedOrUnassigned,
    Own,
}

pub trait Authorizer: Send + Sync {
    fn allows(&self, actor: &Actor, action: &Action, ticket: Option<&Ticket>) -> bool;

    fn ticket_scope(&self, actor: &Actor) -> TicketScope;
}

pub fn require(
    authz: &dyn Authorizer,
    actor: &Actor,
    action: Action,
    ticket: Option<&Ticket>,
) -> Result<(), HelpdeskError> {
    if authz.allows(actor, &action, ticket) {
        Ok(())
    } else {
        Err(HelpdeskError::PermissionDenied(format!(
            "actor {} may not {}",
            actor.id,
            action.describe()
        )))
    }
}

/// Role-table implementation of the authorization collaborator.
pub struct RoleAuthorizer;

impl RoleAuthorizer {
    fn is_creator(actor: &Actor, ticket: Option<&Ticket>) -> bool {
        ticket.map_or(false, |t| t.creator_id == actor.id)
    }
}

impl Authorizer for RoleAuthorizer {
    fn allows(&self, actor: &Actor, action: &Action, ticket: Option<&Ticket>) -> bool {
        match actor.role {
            // Requesters act only on their own tickets, and the only status
            // they may set is closing their own request.
            Role::User => match action {
                Action::ViewTicket | Action::EditTicketDetails => {
                    Self::is_creator(actor, ticket)
                }
                Action::SetStatus(TicketStatus::Closed) => Self::is_creator(actor, ticket),
                _ => false,
            },
            Role::Agent => matches!(
                action,
                Action::ViewTicket
                    | Action::EditTicketDetails
                    | Action::SetStatus(_)
                    | Action::SetPriority
                    | Action::AssignTicket
            ),
            Role::Manager => !matches!(action, Action::ManagePolicies),
            Role::Admin | Role::Superadmin => true,
        }
    }

    fn ticket_scope(&self, actor: &Actor) -> TicketScope {
        match actor.role {
            Role::User => TicketScope::Own,
            Role::Agent => TicketScope::AssignedOrUnassigned,
            Role::Manager | Role::Admin | Role::Superadmin => TicketScope::All,
        }
    }
}

// The upstream auth layer validates the session and forwards the caller's
// identity in trusted gateway headers.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = HelpdeskError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, "x-user-id")?;
        let role = header(parts, "x-user-role")?;
        let id = Uuid::parse_str(&id)
            .map_err(|_| HelpdeskError::Validation("malformed x-user-id header".to_string()))?;
        let role: Role = role.parse()?;
        Ok(Actor { id, role })
    }
}

fn header(parts: &Parts, name: &str) -> Result<String, HelpdeskError> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| HelpdeskError::PermissionDenied(format!("missing {name} header")))
}
