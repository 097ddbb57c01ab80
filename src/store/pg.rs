use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use uuid::Uuid;

use crate::shared::error::HelpdeskError;
use crate::shared::models::{Notification, Priority, SlaPolicy, Ticket};
use crate::shared::schema::{notifications, sla_policies, tickets};
use crate::store::{NotificationStore, PolicyStore, TicketFilter, TicketStore, Visibility};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

/// Production implementation of the persistence collaborator over Postgres.
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> Result<DbConn, HelpdeskError> {
        self.pool
            .get()
            .map_err(|e| HelpdeskError::Database(format!("connection pool: {e}")))
    }
}

fn db_err(e: diesel::result::Error) -> HelpdeskError {
    HelpdeskError::Database(e.to_string())
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tickets)]
#[diesel(treat_none_as_null = true)]
struct TicketRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    category: Option<String>,
    priority: String,
    status: String,
    creator_id: Uuid,
    assignee_id: Option<Uuid>,
    policy_id: Option<Uuid>,
    due_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    escalated_to: Option<String>,
    escalation_kind: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Ticket> for TicketRow {
    fn from(t: &Ticket) -> Self {
        Self {
            id: t.id,
            title: t.title.clone(),
            description: t.description.clone(),
            category: t.category.clone(),
            priority: t.priority.as_str().to_string(),
            status: t.status.as_str().to_string(),
            creator_id: t.creator_id,
            assignee_id: t.assignee_id,
            policy_id: t.policy_id,
            due_at: t.due_at,
            resolved_at: t.resolved_at,
            escalated_to: t.escalated_to.map(|p| p.as_str().to_string()),
            escalation_kind: t.escalation_kind.map(|k| k.as_str().to_string()),
            version: t.version,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

impl TryFrom<TicketRow> for Ticket {
    type Error = HelpdeskError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        let corrupt =
            |e: HelpdeskError| HelpdeskError::Database(format!("corrupt ticket row {}: {e}", row.id));
        Ok(Ticket {
            id: row.id,
            title: row.title,
            description: row.description,
            category: row.category,
            priority: row.priority.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            creator_id: row.creator_id,
            assignee_id: row.assignee_id,
            policy_id: row.policy_id,
            due_at: row.due_at,
            resolved_at: row.resolved_at,
            escalated_to: row
                .escalated_to
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(corrupt)?,
            escalation_kind: row
                .escalation_kind
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(corrupt)?,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = sla_policies)]
struct PolicyRow {
    id: Uuid,
    name: String,
    priority: String,
    response_time_hours: i32,
    resolution_time_hours: i32,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&SlaPolicy> for PolicyRow {
    fn from(p: &SlaPolicy) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            priority: p.priority.as_str().to_string(),
            response_time_hours: p.response_time_hours,
            resolution_time_hours: p.resolution_time_hours,
            is_active: p.is_active,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

impl TryFrom<PolicyRow> for SlaPolicy {
    type Error = HelpdeskError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        let priority = row
            .priority
            .parse()
            .map_err(|e| HelpdeskError::Database(format!("corrupt policy row {}: {e}", row.id)))?;
        Ok(SlaPolicy {
            id: row.id,
            name: row.name,
            priority,
            response_time_hours: row.response_time_hours,
            resolution_time_hours: row.resolution_time_hours,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = notifications)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    ticket_id: Uuid,
    title: String,
    message: String,
    kind: String,
    dedupe_key: String,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl From<&Notification> for NotificationRow {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            user_id: n.user_id,
            ticket_id: n.ticket_id,
            title: n.title.clone(),
            message: n.message.clone(),
            kind: n.kind.as_str().to_string(),
            dedupe_key: n.dedupe_key.clone(),
            is_read: n.is_read,
            created_at: n.created_at,
        }
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = HelpdeskError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let kind = row.kind.parse().map_err(|e| {
            HelpdeskError::Database(format!("corrupt notification row {}: {e}", row.id))
        })?;
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            ticket_id: row.ticket_id,
            title: row.title,
            message: row.message,
            kind,
            dedupe_key: row.dedupe_key,
            is_read: row.is_read,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl TicketStore for PgStore {
    async fn insert(&self, ticket: &Ticket) -> Result<(), HelpdeskError> {
        let mut conn = self.conn()?;
        diesel::insert_into(tickets::table)
            .values(&TicketRow::from(ticket))
            .execute(&mut conn)
            .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Ticket>, HelpdeskError> {
        let mut conn = self.conn()?;
        let row: Option<TicketRow> = tickets::table
            .filter(tickets::id.eq(id))
            .first(&mut conn)
            .optional()
            .map_err(db_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: &TicketFilter) -> Result<Vec<Ticket>, HelpdeskError> {
        let mut conn = self.conn()?;
        let mut query = tickets::table.into_boxed();

        if let Some(status) = filter.status {
            query = query.filter(tickets::status.eq(status.as_str()));
        }
        if let Some(priority) = filter.priority {
            query = query.filter(tickets::priority.eq(priority.as_str()));
        }
        if let Some(assignee_id) = filter.assignee_id {
            query = query.filter(tickets::assignee_id.eq(assignee_id));
        }
        match filter.visibility {
            Some(Visibility::CreatedBy(user)) => {
                query = query.filter(tickets::creator_id.eq(user));
            }
            Some(Visibility::AssignedToOrUnassigned(user)) => {
                query = query.filter(
                    tickets::assignee_id
                        .eq(user)
                        .or(tickets::assignee_id.is_null()),
                );
            }
            None => {}
        }

        let rows: Vec<TicketRow> = query
            .order(tickets::created_at.desc())
            .limit(filter.limit)
            .offset(filter.offset)
            .load(&mut conn)
            .map_err(db_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn active_with_policy(&self) -> Result<Vec<Ticket>, HelpdeskError> {
        let mut conn = self.conn()?;
        let rows: Vec<TicketRow> = tickets::table
            .filter(tickets::status.eq_any(["open", "in_progress"]))
            .filter(tickets::policy_id.is_not_null())
            .load(&mut conn)
            .map_err(db_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update(&self, ticket: &Ticket) -> Result<Ticket, HelpdeskError> {
        let mut conn = self.conn()?;
        let mut row = TicketRow::from(ticket);
        row.version = ticket.version + 1;

        let updated: Option<TicketRow> = diesel::update(
            tickets::table
                .filter(tickets::id.eq(ticket.id))
                .filter(tickets::version.eq(ticket.version)),
        )
        .set(&row)
        .get_result(&mut conn)
        .optional()
        .map_err(db_err)?;

        match updated {
            Some(row) => row.try_into(),
            None => {
                let exists: i64 = tickets::table
                    .filter(tickets::id.eq(ticket.id))
                    .count()
                    .get_result(&mut conn)
                    .map_err(db_err)?;
                if exists == 0 {
                    Err(HelpdeskError::NotFound(format!(
                        "ticket {} not found",
                        ticket.id
                    )))
                } else {
                    Err(HelpdeskError::ConcurrentModification(format!(
                        "ticket {} was modified concurrently",
                        ticket.id
                    )))
                }
            }
        }
    }

    async fn count_referencing_policy(&self, policy_id: Uuid) -> Result<i64, HelpdeskError> {
        let mut conn = self.conn()?;
        tickets::table
            .filter(tickets::policy_id.eq(policy_id))
            .count()
            .get_result(&mut conn)
            .map_err(db_err)
    }
}

#[async_trait]
impl PolicyStore for PgStore {
    async fn insert(&self, policy: &SlaPolicy) -> Result<(), HelpdeskError> {
        let mut conn = self.conn()?;
        diesel::insert_into(sla_policies::table)
            .values(&PolicyRow::from(policy))
            .execute(&mut conn)
            .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<SlaPolicy>, HelpdeskError> {
        let mut conn = self.conn()?;
        let row: Option<PolicyRow> = sla_policies::table
            .filter(sla_policies::id.eq(id))
            .first(&mut conn)
            .optional()
            .map_err(db_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self) -> Result<Vec<SlaPolicy>, HelpdeskError> {
        let mut conn = self.conn()?;
        let rows: Vec<PolicyRow> = sla_policies::table
            .order((sla_policies::priority.asc(), sla_policies::created_at.asc()))
            .load(&mut conn)
            .map_err(db_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn active_for(&self, priority: Priority) -> Result<Option<SlaPolicy>, HelpdeskError> {
        let mut conn = self.conn()?;
        let row: Option<PolicyRow> = sla_policies::table
            .filter(sla_policies::priority.eq(priority.as_str()))
            .filter(sla_policies::is_active.eq(true))
            .order(sla_policies::updated_at.desc())
            .first(&mut conn)
            .optional()
            .map_err(db_err)?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, policy: &SlaPolicy) -> Result<SlaPolicy, HelpdeskError> {
        let mut conn = self.conn()?;
        let row = PolicyRow::from(policy);
        let updated: Option<PolicyRow> =
            diesel::update(sla_policies::table.filter(sla_policies::id.eq(policy.id)))
                .set(&row)
                .get_result(&mut conn)
                .optional()
                .map_err(db_err)?;
        updated
            .ok_or_else(|| HelpdeskError::NotFound(format!("SLA policy {} not found", policy.id)))?
            .try_into()
    }

    async fn delete(&self, id: Uuid) -> Result<(), HelpdeskError> {
        let mut conn = self.conn()?;
        let deleted = diesel::delete(sla_policies::table.filter(sla_policies::id.eq(id)))
            .execute(&mut conn)
            .map_err(db_err)?;
        if deleted == 0 {
            return Err(HelpdeskError::NotFound(format!("SLA policy {id} not found")));
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64, HelpdeskError> {
        let mut conn = self.conn()?;
        sla_policies::table
            .count()
            .get_result(&mut conn)
            .map_err(db_err)
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_unique(&self, notification: &Notification) -> Result<bool, HelpdeskError> {
        let mut conn = self.conn()?;
        let inserted = diesel::insert_into(notifications::table)
            .values(&NotificationRow::from(notification))
            .on_conflict(notifications::dedupe_key)
            .do_nothing()
            .execute(&mut conn)
            .map_err(db_err)?;
        Ok(inserted > 0)
    }

    async fn for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Notification>, HelpdeskError> {
        let mut conn = self.conn()?;
        let rows: Vec<NotificationRow> = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .order(notifications::created_at.desc())
            .limit(limit)
            .load(&mut conn)
            .map_err(db_err)?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<Notification, HelpdeskError> {
        let mut conn = self.conn()?;
        let updated: Option<NotificationRow> = diesel::update(
            notifications::table
                .filter(notifications::id.eq(id))
                .filter(notifications::user_id.eq(user_id)),
        )
        .set(notifications::is_read.eq(true))
        .get_result(&mut conn)
        .optional()
        .map_err(db_err)?;
        updated
            .ok_or_else(|| HelpdeskError::NotFound(format!("notification {id} not found")))?
            .try_into()
    }
}
