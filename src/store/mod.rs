pub mod memory;
pub mod pg;

use async_trait::async_trait;
use uuid::Uuid;

use crate::shared::error::HelpdeskError;
use crate::shared::models::{Notification, Priority, SlaPolicy, Ticket, TicketStatus};

/// Retry budget for read-decide-write cycles on version conflicts.
pub const WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub enum Visibility {
    CreatedBy(Uuid),
    AssignedToOrUnassigned(Uuid),
}

#[derive(Debug, Clone)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
    pub assignee_id: Option<Uuid>,
    pub visibility: Option<Visibility>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TicketFilter {
    fn default() -> Self {
        Self {
            status: None,
            priority: None,
            assignee_id: None,
            visibility: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert(&self, ticket: &Ticket) -> Result<(), HelpdeskError>;

    async fn get(&self, id: Uuid) -> Result<Option<Ticket>, HelpdeskError>;

    async fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, HelpdeskError>;

    /// Point-in-time read of the SLA monitoring candidates: tickets whose
    /// status is active and whose bound policy is non-null.
    async fn active_with_policy(&self) -> Result<Vec<Ticket>, HelpdeskError>;

    /// Conditional write: persists `ticket` only while the stored version
    /// still equals `ticket.version`, bumping the stored version by one.
    /// Fails with `ConcurrentModification` when another writer got there
    /// first, `NotFound` when the id does not exist.
    async fn update(&self, ticket: &Ticket) -> Result<Ticket, HelpdeskError>;

    async fn count_referencing_policy(&self, policy_id: Uuid) -> Result<i64, HelpdeskError>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn insert(&self, policy: &SlaPolicy) -> Result<(), HelpdeskError>;

    async fn get(&self, id: Uuid) -> Result<Option<SlaPolicy>, HelpdeskError>;

    async fn list(&self) -> Result<Vec<SlaPolicy>, HelpdeskError>;

    /// The active policy eligible for binding at this priority, if any.
    /// Inactive policies behave exactly like absent ones.
    async fn active_for(&self, priority: Priority) -> Result<Option<SlaPolicy>, HelpdeskError>;

    async fn update(&self, policy: &SlaPolicy) -> Result<SlaPolicy, HelpdeskError>;

    async fn delete(&self, id: Uuid) -> Result<(), HelpdeskError>;

    async fn count(&self) -> Result<i64, HelpdeskError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Inserts unless a record with the same dedupe key already exists.
    /// Returns whether a row was written.
    async fn insert_unique(&self, notification: &Notification) -> Result<bool, HelpdeskError>;

    async fn for_user(&self, user_id: Uuid, limit: i64)
        -> Result<Vec<Notification>, HelpdeskError>;

    /// Flips the read flag; only the recipient may do so.
    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<Notification, HelpdeskError>;
}
