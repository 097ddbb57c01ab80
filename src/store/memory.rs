use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::shared::error::HelpdeskError;
use crate::shared::models::{Notification, Priority, SlaPolicy, Ticket};
use crate::store::{NotificationStore, PolicyStore, TicketFilter, TicketStore, Visibility};

/// In-memory implementation of the persistence collaborator; backs tests.
#[derive(Default)]
pub struct MemoryStore {
    tickets: RwLock<HashMap<Uuid, Ticket>>,
    policies: RwLock<HashMap<Uuid, SlaPolicy>>,
    notifications: RwLock<Vec<Notification>>,
    dedupe_keys: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert(&self, ticket: &Ticket) -> Result<(), HelpdeskError> {
        let mut tickets = self.tickets.write().await;
        tickets.insert(ticket.id, ticket.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Ticket>, HelpdeskError> {
        Ok(self.tickets.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, HelpdeskError> {
        let tickets = self.tickets.read().await;
        let mut matched: Vec<Ticket> = tickets
            .values()
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .filter(|t| filter.priority.map_or(true, |p| t.priority == p))
            .filter(|t| filter.assignee_id.map_or(true, |a| t.assignee_id == Some(a)))
            .filter(|t| match filter.visibility {
                Some(Visibility::CreatedBy(user)) => t.creator_id == user,
                Some(Visibility::AssignedToOrUnassigned(user)) => {
                    t.assignee_id.is_none() || t.assignee_id == Some(user)
                }
                None => true,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(clamp_usize(filter.offset))
            .take(clamp_usize(filter.limit))
            .collect())
    }

    async fn active_with_policy(&self) -> Result<Vec<Ticket>, HelpdeskError> {
        let tickets = self.tickets.read().await;
        Ok(tickets
            .values()
            .filter(|t| t.status.is_active() && t.policy_id.is_some())
            .cloned()
            .collect())
    }

    async fn update(&self, ticket: &Ticket) -> Result<Ticket, HelpdeskError> {
        let mut tickets = self.tickets.write().await;
        let current = tickets
            .get(&ticket.id)
            .ok_or_else(|| HelpdeskError::NotFound(format!("ticket {} not found", ticket.id)))?;
        if current.version != ticket.version {
            return Err(HelpdeskError::ConcurrentModification(format!(
                "ticket {} was modified concurrently",
                ticket.id
            )));
        }
        let mut stored = ticket.clone();
        stored.version = ticket.version + 1;
        tickets.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn count_referencing_policy(&self, policy_id: Uuid) -> Result<i64, HelpdeskError> {
        let tickets = self.tickets.read().await;
        Ok(tickets
            .values()
            .filter(|t| t.policy_id == Some(policy_id))
            .count() as i64)
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn insert(&self, policy: &SlaPolicy) -> Result<(), HelpdeskError> {
        let mut policies = self.policies.write().await;
        policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SlaPolicy>, HelpdeskError> {
        Ok(self.policies.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<SlaPolicy>, HelpdeskError> {
        let policies = self.policies.read().await;
        let mut all: Vec<SlaPolicy> = policies.values().cloned().collect();
        all.sort_by_key(|p| (p.priority, p.created_at));
        Ok(all)
    }

    async fn active_for(&self, priority: Priority) -> Result<Option<SlaPolicy>, HelpdeskError> {
        let policies = self.policies.read().await;
        Ok(policies
            .values()
            .filter(|p| p.is_active && p.priority == priority)
            .max_by_key(|p| p.updated_at)
            .cloned())
    }

    async fn update(&self, policy: &SlaPolicy) -> Result<SlaPolicy, HelpdeskError> {
        let mut policies = self.policies.write().await;
        if !policies.contains_key(&policy.id) {
            return Err(HelpdeskError::NotFound(format!(
                "SLA policy {} not found",
                policy.id
            )));
        }
        policies.insert(policy.id, policy.clone());
        Ok(policy.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), HelpdeskError> {
        let mut policies = self.policies.write().await;
        policies
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| HelpdeskError::NotFound(format!("SLA policy {id} not found")))
    }

    async fn count(&self) -> Result<i64, HelpdeskError> {
        Ok(self.policies.read().await.len() as i64)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_unique(&self, notification: &Notification) -> Result<bool, HelpdeskError> {
        let mut keys = self.dedupe_keys.write().await;
        if !keys.insert(notification.dedupe_key.clone()) {
            return Ok(false);
        }
        let mut notifications = self.notifications.write().await;
        notifications.push(notification.clone());
        Ok(true)
    }

    async fn for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, HelpdeskError> {
        let notifications = self.notifications.read().await;
        let mut matched: Vec<Notification> = notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(clamp_usize(limit));
        Ok(matched)
    }

    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<Notification, HelpdeskError> {
        let mut notifications = self.notifications.write().await;
        let record = notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
            .ok_or_else(|| HelpdeskError::NotFound(format!("notification {id} not found")))?;
        record.is_read = true;
        Ok(record.clone())
    }
}

fn clamp_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}
