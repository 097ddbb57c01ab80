pub mod lifecycle;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use log::warn;
use serde::Deserialize;
use uuid::Uuid;

use crate::shared::error::HelpdeskError;
use crate::shared::models::{Actor, Priority, Ticket, TicketStatus};
use crate::shared::state::AppState;
use crate::store::TicketFilter;
use crate::tickets::lifecycle::{TicketDraft, TicketPatch};

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTicketRequest {
    pub assignee_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: TicketStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
    pub assignee_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>), HelpdeskError> {
    let ticket = state
        .tickets
        .create(
            &actor,
            TicketDraft {
                title: req.title,
                description: req.description,
                category: req.category,
                priority: req.priority,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Ticket>>, HelpdeskError> {
    let filter = TicketFilter {
        status: query.status,
        priority: query.priority,
        assignee_id: query.assignee_id,
        visibility: None,
        limit: query.limit.unwrap_or(50).clamp(1, 200),
        offset: query.offset.unwrap_or(0).max(0),
    };
    Ok(Json(state.tickets.list(&actor, filter).await?))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, HelpdeskError> {
    Ok(Json(state.tickets.get(&actor, id).await?))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTicketRequest>,
) -> Result<Json<Ticket>, HelpdeskError> {
    let ticket = state
        .tickets
        .update_details(
            &actor,
            id,
            TicketPatch {
                title: req.title,
                description: req.description,
                category: req.category,
                priority: req.priority,
            },
        )
        .await?;
    Ok(Json(ticket))
}

pub async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignTicketRequest>,
) -> Result<Json<Ticket>, HelpdeskError> {
    Ok(Json(state.tickets.assign(&actor, id, req.assignee_id).await?))
}

pub async fn change_status(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<Ticket>, HelpdeskError> {
    let ticket = state.tickets.change_status(&actor, id, req.status).await?;

    // Status mutations double as an on-demand SLA check so breaches surface
    // without waiting for the next scheduled pass. A failed pass only logs.
    if let Err(err) = state.monitor.run_pass().await {
        warn!("post-update SLA check failed: {err}");
    }

    Ok(Json(ticket))
}

pub fn configure_ticket_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/:id", get(get_ticket).put(update_ticket))
        .route("/api/tickets/:id/assign", put(assign_ticket))
        .route("/api/tickets/:id/status", put(change_status))
}
