use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::notify::{Dispatcher, TicketEvent};
use crate::shared::clock::Clock;
use crate::shared::error::HelpdeskError;
use crate::shared::models::{Ticket, ViolationKind};
use crate::sla::detector;
use crate::sla::escalation::{EscalationOutcome, Escalator};
use crate::store::{PolicyStore, TicketStore};

#[derive(Debug, Default, Serialize)]
pub struct PassSummary {
    pub scanned: usize,
    pub violations: usize,
    pub escalated: usize,
    pub at_max: usize,
    pub discarded: usize,
    pub failed: usize,
}

enum TicketOutcome {
    Escalated,
    AtMax,
    Discarded,
    Failed,
}

/// Runs the detection/escalation pass, both on a timer and on demand. The
/// two triggers share this code path and are safe to overlap: every
/// per-ticket decision lands as one conditional write.
pub struct SlaMonitor {
    tickets: Arc<dyn TicketStore>,
    policies: Arc<dyn PolicyStore>,
    escalator: Escalator,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    worker_limit: usize,
}

impl SlaMonitor {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        policies: Arc<dyn PolicyStore>,
        escalator: Escalator,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        worker_limit: usize,
    ) -> Self {
        Self {
            tickets,
            policies,
            escalator,
            dispatcher,
            clock,
            worker_limit: worker_limit.max(1),
        }
    }

    /// One point-in-time detection pass over all monitored tickets.
    pub async fn run_pass(&self) -> Result<PassSummary, HelpdeskError> {
        let now = self.clock.now();
        let candidates = self.tickets.active_with_policy().await?;

        let mut summary = PassSummary {
            scanned: candidates.len(),
            ..PassSummary::default()
        };

        // Group per ticket: both violation kinds may fire in one pass, but
        // escalation applies at most once per ticket, reporting the
        // stronger (resolution) breach.
        let mut work: Vec<(Ticket, ViolationKind)> = Vec::new();
        for ticket in candidates {
            let Some(policy_id) = ticket.policy_id else {
                continue;
            };
            let Some(policy) = self.policies.get(policy_id).await? else {
                warn!(
                    "ticket {} references missing SLA policy {policy_id}",
                    ticket.id
                );
                continue;
            };
            let violations = detector::classify(&ticket, &policy, now);
            if violations.is_empty() {
                continue;
            }
            summary.violations += violations.len();
            let kind = if violations
                .iter()
                .any(|v| v.kind == ViolationKind::Resolution)
            {
                ViolationKind::Resolution
            } else {
                ViolationKind::Response
            };
            work.push((ticket, kind));
        }

        let outcomes: Vec<TicketOutcome> = stream::iter(work)
            .map(|(ticket, kind)| self.handle_breach(ticket, kind))
            .buffer_unordered(self.worker_limit)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                TicketOutcome::Escalated => summary.escalated += 1,
                TicketOutcome::AtMax => summary.at_max += 1,
                TicketOutcome::Discarded => summary.discarded += 1,
                TicketOutcome::Failed => summary.failed += 1,
            }
        }

        info!(
            "SLA pass: {} scanned, {} violations, {} escalated, {} at max, {} discarded, {} failed",
            summary.scanned,
            summary.violations,
            summary.escalated,
            summary.at_max,
            summary.discarded,
            summary.failed
        );
        Ok(summary)
    }

    async fn handle_breach(&self, snapshot: Ticket, kind: ViolationKind) -> TicketOutcome {
        match self.escalator.escalate(&snapshot, kind).await {
            Ok(EscalationOutcome::Applied { from, to, ticket }) => {
                self.dispatcher
                    .dispatch(&TicketEvent::Escalated { from, to, kind }, &ticket)
                    .await;
                TicketOutcome::Escalated
            }
            Ok(EscalationOutcome::AlreadyAtMax {
                first_alert: Some(ticket),
            }) => {
                self.dispatcher
                    .dispatch(&TicketEvent::MaxPriorityBreach { kind }, &ticket)
                    .await;
                TicketOutcome::AtMax
            }
            Ok(EscalationOutcome::AlreadyAtMax { first_alert: None }) => TicketOutcome::AtMax,
            Ok(EscalationOutcome::AlreadyEscalated)
            | Ok(EscalationOutcome::NoLongerActive) => TicketOutcome::Discarded,
            Err(err) => {
                warn!("escalation failed for ticket {}: {err}", snapshot.id);
                TicketOutcome::Failed
            }
        }
    }

    /// Spawns the recurring background sweep. Flipping the watch channel
    /// stops the loop; a pass interrupted at shutdown leaves no partial
    /// state because escalations are single conditional writes.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = self;
        tokio::spawn(async move {
            info!("SLA monitor started, sweeping every {interval:?}");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tokio::select! {
                            result = monitor.run_pass() => {
                                if let Err(err) = result {
                                    error!("SLA pass failed: {err}");
                                }
                            }
                            _ = shutdown.changed() => {
                                info!("SLA monitor stopping mid-pass");
                                return;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        info!("SLA monitor stopping");
                        return;
                    }
                }
            }
        })
    }
}
