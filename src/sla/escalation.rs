use std::sync::Arc;

use log::info;

use crate::shared::clock::Clock;
use crate::shared::error::HelpdeskError;
use crate::shared::models::{Priority, Ticket, ViolationKind};
use crate::store::{TicketStore, WRITE_ATTEMPTS};

/// What a single escalation attempt did.
#[derive(Debug)]
pub enum EscalationOutcome {
    /// Priority raised one step; the stored ticket after the write.
    Applied {
        from: Priority,
        to: Priority,
        ticket: Ticket,
    },
    /// Already saturated at the top of the ladder. Carries the updated
    /// ticket the first time the breach is flagged, so the caller alerts
    /// exactly once; silent on every later pass.
    AlreadyAtMax { first_alert: Option<Ticket> },
    /// Another trigger escalated this ticket since our snapshot was taken.
    AlreadyEscalated,
    /// The ticket reached a terminal status since the snapshot; nothing
    /// was applied.
    NoLongerActive,
}

/// Applies the one-step-up escalation rule via conditional writes against
/// the version observed at detection time.
pub struct Escalator {
    tickets: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
}

impl Escalator {
    pub fn new(tickets: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { tickets, clock }
    }

    pub async fn escalate(
        &self,
        snapshot: &Ticket,
        kind: ViolationKind,
    ) -> Result<EscalationOutcome, HelpdeskError> {
        let mut current = snapshot.clone();
        for _ in 0..WRITE_ATTEMPTS {
            if current.status.is_terminal() {
                return Ok(EscalationOutcome::NoLongerActive);
            }
            // A raise past our decision basis means a concurrent trigger
            // handled this breach; re-deciding would double-raise.
            if current.priority > snapshot.priority {
                return Ok(EscalationOutcome::AlreadyEscalated);
            }

            let now = self.clock.now();
            match current.priority.escalated() {
                Some(target) => {
                    let mut updated = current.clone();
                    updated.priority = target;
                    updated.escalated_to = Some(target);
                    updated.escalation_kind = Some(kind);
                    updated.updated_at = now;

                    match self.tickets.update(&updated).await {
                        Ok(ticket) => {
                            info!(
                                "escalated ticket {} from {} to {} ({kind} breach)",
                                ticket.id, current.priority, target
                            );
                            return Ok(EscalationOutcome::Applied {
                                from: current.priority,
                                to: target,
                                ticket,
                            });
                        }
                        Err(HelpdeskError::ConcurrentModification(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
                None => {
                    if current.escalated_to == Some(Priority::Urgent) {
                        return Ok(EscalationOutcome::AlreadyAtMax { first_alert: None });
                    }
                    // First pass to find this ticket breached at the top:
                    // persist the marker so later passes stay silent.
                    let mut updated = current.clone();
                    updated.escalated_to = Some(Priority::Urgent);
                    updated.escalation_kind = Some(kind);
                    updated.updated_at = now;

                    match self.tickets.update(&updated).await {
                        Ok(ticket) => {
                            info!(
                                "ticket {} breached its {kind} window at {} priority",
                                ticket.id,
                                Priority::Urgent
                            );
                            return Ok(EscalationOutcome::AlreadyAtMax {
                                first_alert: Some(ticket),
                            });
                        }
                        Err(HelpdeskError::ConcurrentModification(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
            }

            current = self
                .tickets
                .get(snapshot.id)
                .await?
                .ok_or_else(|| {
                    HelpdeskError::NotFound(format!("ticket {} not found", snapshot.id))
                })?;
        }

        Err(HelpdeskError::ConcurrentModification(format!(
            "gave up escalating ticket {} after {WRITE_ATTEMPTS} attempts",
            snapshot.id
        )))
    }
}
