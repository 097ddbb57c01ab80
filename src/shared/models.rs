use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared::error::HelpdeskError;

/// Fixed priority ladder: low < medium < high < urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// The next rung up the ladder, or `None` at the top.
    pub fn escalated(self) -> Option<Priority> {
        match self {
            Priority::Low => Some(Priority::Medium),
            Priority::Medium => Some(Priority::High),
            Priority::High => Some(Priority::Urgent),
            Priority::Urgent => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(HelpdeskError::Validation(format!(
                "unknown priority: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    /// Active tickets are subject to SLA monitoring.
    pub fn is_active(self) -> bool {
        matches!(self, TicketStatus::Open | TicketStatus::InProgress)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Valid status transitions. Requesting the current status is handled as
    /// an idempotent no-op before this check; closed is final.
    pub fn can_transition(self, to: TicketStatus) -> bool {
        match (self, to) {
            (TicketStatus::Open, TicketStatus::InProgress)
            | (TicketStatus::Open, TicketStatus::Resolved)
            | (TicketStatus::Open, TicketStatus::Closed)
            | (TicketStatus::InProgress, TicketStatus::Open)
            | (TicketStatus::InProgress, TicketStatus::Resolved)
            | (TicketStatus::InProgress, TicketStatus::Closed)
            | (TicketStatus::Resolved, TicketStatus::Closed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "in_progress" => Ok(TicketStatus::InProgress),
            "resolved" => Ok(TicketStatus::Resolved),
            "closed" => Ok(TicketStatus::Closed),
            other => Err(HelpdeskError::Validation(format!(
                "unknown ticket status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationKind {
    Response,
    Resolution,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::Response => "response",
            ViolationKind::Resolution => "resolution",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationKind {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "response" => Ok(ViolationKind::Response),
            "resolution" => Ok(ViolationKind::Resolution),
            other => Err(HelpdeskError::Validation(format!(
                "unknown violation kind: {other}"
            ))),
        }
    }
}

/// A detected SLA breach on an active ticket. Lives only for the duration of
/// one detection pass.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub ticket_id: Uuid,
    pub kind: ViolationKind,
    pub hours_overdue: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Priority,
    pub status: TicketStatus,
    pub creator_id: Uuid,
    pub assignee_id: Option<Uuid>,
    /// Policy bound at creation; never re-resolved if the catalog changes.
    pub policy_id: Option<Uuid>,
    pub due_at: Option<DateTime<Utc>>,
    /// Stamped on the first transition into resolved; never cleared.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Escalation marker: the priority the SLA engine last escalated (or
    /// flagged) this ticket to. Cleared by a manual priority change.
    pub escalated_to: Option<Priority>,
    pub escalation_kind: Option<ViolationKind>,
    /// Optimistic-concurrency counter; bumped by one on every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub id: Uuid,
    pub name: String,
    pub priority: Priority,
    pub response_time_hours: i32,
    pub resolution_time_hours: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TicketCreated,
    NewTicket,
    TicketAssigned,
    TicketStatus,
    TicketResolved,
    SlaEscalated,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::TicketCreated => "ticket_created",
            NotificationKind::NewTicket => "new_ticket",
            NotificationKind::TicketAssigned => "ticket_assigned",
            NotificationKind::TicketStatus => "ticket_status",
            NotificationKind::TicketResolved => "ticket_resolved",
            NotificationKind::SlaEscalated => "sla_escalated",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ticket_created" => Ok(NotificationKind::TicketCreated),
            "new_ticket" => Ok(NotificationKind::NewTicket),
            "ticket_assigned" => Ok(NotificationKind::TicketAssigned),
            "ticket_status" => Ok(NotificationKind::TicketStatus),
            "ticket_resolved" => Ok(NotificationKind::TicketResolved),
            "sla_escalated" => Ok(NotificationKind::SlaEscalated),
            other => Err(HelpdeskError::Validation(format!(
                "unknown notification kind: {other}"
            ))),
        }
    }
}

/// In-app notification record. Immutable except for the read flag, which is
/// owned by the recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ticket_id: Uuid,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    /// Uniqueness key: one record per (ticket, kind, ticket version, recipient).
    pub dedupe_key: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Manager,
    Admin,
    Superadmin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
            Role::Manager => "manager",
            Role::Admin => "admin",
            Role::Superadmin => "superadmin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HelpdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "agent" => Ok(Role::Agent),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            "superadmin" => Ok(Role::Superadmin),
            other => Err(HelpdeskError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// The authenticated caller of an operation, as supplied by the upstream
/// auth layer.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

/// Directory entry for a user; the directory collaborator owns these.
#[derive(Debug, Clone, Serialize)]
pub struct UserRef {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Capabilities the engine asks about instead of role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// May be the target of a ticket assignment.
    Agent,
    /// Receives the new-ticket broadcast.
    Triage,
    /// Receives SLA escalation alerts.
    EscalationRecipient,
}
