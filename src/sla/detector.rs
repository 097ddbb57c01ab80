use chrono::{DateTime, Utc};

use crate::shared::models::{SlaPolicy, Ticket, TicketStatus, Violation, ViolationKind};

/// Classifies one ticket against its bound policy at `now`.
///
/// A ticket still waiting for a first response (status open) past the
/// response budget yields a response violation; any active ticket past the
/// resolution budget yields a resolution violation. Both can fire in the
/// same pass.
pub fn classify(ticket: &Ticket, policy: &SlaPolicy, now: DateTime<Utc>) -> Vec<Violation> {
    let mut violations = Vec::new();
    if !ticket.status.is_active() {
        return violations;
    }

    let elapsed = hours_between(ticket.created_at, now);

    let response_budget = f64::from(policy.response_time_hours);
    if ticket.status == TicketStatus::Open && elapsed > response_budget {
        violations.push(Violation {
            ticket_id: ticket.id,
            kind: ViolationKind::Response,
            hours_overdue: elapsed - response_budget,
        });
    }

    let resolution_budget = f64::from(policy.resolution_time_hours);
    if elapsed > resolution_budget {
        violations.push(Violation {
            ticket_id: ticket.id,
            kind: ViolationKind::Resolution,
            hours_overdue: elapsed - resolution_budget,
        });
    }

    violations
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 3600.0
}
