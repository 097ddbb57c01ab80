pub mod mailer;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use log::{debug, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::notify::mailer::Mailer;
use crate::shared::clock::Clock;
use crate::shared::error::HelpdeskError;
use crate::shared::models::{
    Actor, Capability, Notification, NotificationKind, Priority, Ticket, TicketStatus, UserRef,
    ViolationKind,
};
use crate::shared::state::AppState;
use crate::store::NotificationStore;
use crate::directory::Directory;

/// One user-facing lifecycle or SLA event on a ticket.
#[derive(Debug, Clone, Copy)]
pub enum TicketEvent {
    Created,
    Assigned { agent_id: Uuid },
    StatusChanged { from: TicketStatus, to: TicketStatus },
    Resolved,
    Escalated { from: Priority, to: Priority, kind: ViolationKind },
    /// First breach alert for a ticket that is already at the top priority.
    MaxPriorityBreach { kind: ViolationKind },
}

/// Turns events into notification records and best-effort emails. All
/// failures are logged and swallowed: the triggering business operation
/// succeeds independently of notification fate.
pub struct Dispatcher {
    notifications: Arc<dyn NotificationStore>,
    directory: Arc<dyn Directory>,
    mailer: Arc<dyn Mailer>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        directory: Arc<dyn Directory>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            notifications,
            directory,
            mailer,
            clock,
        }
    }

    pub async fn dispatch(&self, event: &TicketEvent, ticket: &Ticket) {
        if let Err(err) = self.try_dispatch(event, ticket).await {
            warn!(
                "notification dispatch failed for ticket {}: {err}",
                ticket.id
            );
        }
    }

    async fn try_dispatch(
        &self,
        event: &TicketEvent,
        ticket: &Ticket,
    ) -> Result<(), HelpdeskError> {
        for (user, kind, title, message) in self.render(event, ticket).await? {
            let record = Notification {
                id: Uuid::new_v4(),
                user_id: user.id,
                ticket_id: ticket.id,
                title,
                message,
                kind,
                dedupe_key: format!(
                    "{}:{}:{}:{}",
                    ticket.id,
                    kind.as_str(),
                    ticket.version,
                    user.id
                ),
                is_read: false,
                created_at: self.clock.now(),
            };
            match self.notifications.insert_unique(&record).await {
                Ok(true) => self.send_email(&user, &record),
                Ok(false) => debug!("duplicate notification suppressed: {}", record.dedupe_key),
                Err(err) => warn!(
                    "failed to record {} notification for {}: {err}",
                    kind, user.id
                ),
            }
        }
        Ok(())
    }

    /// Recipient resolution and message templates per event kind.
    async fn render(
        &self,
        event: &TicketEvent,
        ticket: &Ticket,
    ) -> Result<Vec<(UserRef, NotificationKind, String, String)>, HelpdeskError> {
        let mut out = Vec::new();
        match event {
            TicketEvent::Created => {
                if let Some(creator) = self.creator(ticket).await {
                    out.push((
                        creator,
                        NotificationKind::TicketCreated,
                        "Ticket created".to_string(),
                        format!(
                            "Your ticket \"{}\" has been created. Ticket id: {}",
                            ticket.title, ticket.id
                        ),
                    ));
                }
                for user in self.directory.with_capability(Capability::Triage).await? {
                    out.push((
                        user,
                        NotificationKind::NewTicket,
                        "New ticket filed".to_string(),
                        format!(
                            "A new {} priority ticket was filed: \"{}\"",
                            ticket.priority, ticket.title
                        ),
                    ));
                }
            }
            TicketEvent::Assigned { agent_id } => {
                if let Some(agent) = self.directory.get(*agent_id).await? {
                    out.push((
                        agent,
                        NotificationKind::TicketAssigned,
                        "Ticket assigned to you".to_string(),
                        format!(
                            "You have been assigned ticket {}: \"{}\"",
                            ticket.id, ticket.title
                        ),
                    ));
                } else {
                    warn!("assigned agent {agent_id} is not in the directory");
                }
            }
            TicketEvent::StatusChanged { from, to } => {
                if let Some(creator) = self.creator(ticket).await {
                    out.push((
                        creator,
                        NotificationKind::TicketStatus,
                        "Ticket status updated".to_string(),
                        format!(
                            "Your ticket \"{}\" moved from {from} to {to}.",
                            ticket.title
                        ),
                    ));
                }
            }
            TicketEvent::Resolved => {
                if let Some(creator) = self.creator(ticket).await {
                    out.push((
                        creator,
                        NotificationKind::TicketResolved,
                        "Ticket resolved".to_string(),
                        format!("Your ticket \"{}\" has been resolved.", ticket.title),
                    ));
                }
            }
            TicketEvent::Escalated { from, to, kind } => {
                for user in self
                    .directory
                    .with_capability(Capability::EscalationRecipient)
                    .await?
                {
                    out.push((
                        user,
                        NotificationKind::SlaEscalated,
                        format!("SLA violation: ticket {}", ticket.id),
                        format!(
                            "Ticket \"{}\" breached its {kind} window and was escalated from {from} to {to}. Please take immediate action.",
                            ticket.title
                        ),
                    ));
                }
            }
            TicketEvent::MaxPriorityBreach { kind } => {
                for user in self
                    .directory
                    .with_capability(Capability::EscalationRecipient)
                    .await?
                {
                    out.push((
                        user,
                        NotificationKind::SlaEscalated,
                        format!("SLA violation: ticket {}", ticket.id),
                        format!(
                            "Ticket \"{}\" breached its {kind} window and is already at {} priority. Please take immediate action.",
                            ticket.title,
                            Priority::Urgent
                        ),
                    ));
                }
            }
        }
        Ok(out)
    }

    async fn creator(&self, ticket: &Ticket) -> Option<UserRef> {
        match self.directory.get(ticket.creator_id).await {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                warn!(
                    "ticket {} creator {} is not in the directory",
                    ticket.id, ticket.creator_id
                );
                None
            }
            Err(err) => {
                warn!("directory lookup failed for {}: {err}", ticket.creator_id);
                None
            }
        }
    }

    // Fire and forget; the operation that produced the event never waits on
    // the external channel.
    fn send_email(&self, user: &UserRef, record: &Notification) {
        let mailer = self.mailer.clone();
        let to = user.email.clone();
        let subject = record.title.clone();
        let body = record.message.clone();
        let ticket_id = record.ticket_id;
        tokio::spawn(async move {
            if let Err(err) = mailer.send(&to, &subject, &body).await {
                warn!("email delivery failed for ticket {ticket_id} to {to}: {err}");
            }
        });
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<i64>,
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Vec<Notification>>, HelpdeskError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(state.notifications.for_user(actor.id, limit).await?))
}

pub async fn mark_notification_read(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, HelpdeskError> {
    Ok(Json(state.notifications.mark_read(id, actor.id).await?))
}

pub fn configure_notification_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/:id/read", put(mark_notification_read))
}
