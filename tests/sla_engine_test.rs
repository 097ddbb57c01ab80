use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use deskserver::authz::RoleAuthorizer;
use deskserver::directory::StaticDirectory;
use deskserver::notify::mailer::LogMailer;
use deskserver::notify::Dispatcher;
use deskserver::shared::clock::ManualClock;
use deskserver::shared::models::{
    Actor, NotificationKind, Priority, Role, TicketStatus, UserRef, ViolationKind,
};
use deskserver::sla::escalation::Escalator;
use deskserver::sla::sweep::SlaMonitor;
use deskserver::sla::PolicyService;
use deskserver::store::memory::MemoryStore;
use deskserver::store::{NotificationStore, TicketStore};
use deskserver::tickets::lifecycle::{TicketDraft, TicketService};

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    tickets: TicketService,
    policies: PolicyService,
    monitor: SlaMonitor,
    requester: Actor,
    agent: Actor,
    admin: Actor,
    admin_id: Uuid,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::at(
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    ));

    let user = |name: &str, role| UserRef {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: format!("{}@helpdesk.test", name.to_lowercase().replace(' ', ".")),
        role,
    };
    let requester_ref = user("Test User", Role::User);
    let agent_ref = user("Agent User", Role::Agent);
    let admin_ref = user("Admin User", Role::Admin);
    let requester = Actor {
        id: requester_ref.id,
        role: Role::User,
    };
    let agent = Actor {
        id: agent_ref.id,
        role: Role::Agent,
    };
    let admin = Actor {
        id: admin_ref.id,
        role: Role::Admin,
    };
    let admin_id = admin_ref.id;

    let directory = Arc::new(StaticDirectory::new(vec![
        requester_ref,
        agent_ref,
        admin_ref,
    ]));
    let authz = Arc::new(RoleAuthorizer);
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        directory.clone(),
        Arc::new(LogMailer),
        clock.clone(),
    ));

    let tickets = TicketService::new(
        store.clone(),
        store.clone(),
        directory,
        authz.clone(),
        dispatcher.clone(),
        clock.clone(),
    );
    let policies = PolicyService::new(store.clone(), store.clone(), authz, clock.clone());
    let escalator = Escalator::new(store.clone(), clock.clone());
    let monitor = SlaMonitor::new(
        store.clone(),
        store.clone(),
        escalator,
        dispatcher,
        clock.clone(),
        4,
    );

    Harness {
        store,
        clock,
        tickets,
        policies,
        monitor,
        requester,
        agent,
        admin,
        admin_id,
    }
}

fn draft(title: &str, priority: Priority) -> TicketDraft {
    TicketDraft {
        title: title.to_string(),
        description: None,
        category: Some("it".to_string()),
        priority: Some(priority),
    }
}

async fn escalation_alerts(store: &MemoryStore, user_id: Uuid) -> usize {
    store
        .for_user(user_id, 100)
        .await
        .unwrap()
        .iter()
        .filter(|n| n.kind == NotificationKind::SlaEscalated)
        .count()
}

#[tokio::test]
async fn breached_ticket_escalates_once_per_pass_despite_double_violation() {
    let h = harness();
    h.policies.ensure_defaults().await.unwrap();

    // High policy is {response 2h, resolution 8h}; at 9h both windows are
    // breached in the same pass.
    let ticket = h
        .tickets
        .create(&h.requester, draft("mail server down", Priority::High))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(9));

    let summary = h.monitor.run_pass().await.unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.violations, 2);
    assert_eq!(summary.escalated, 1);

    let stored = TicketStore::get(h.store.as_ref(), ticket.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.priority, Priority::Urgent);
    assert_eq!(escalation_alerts(&h.store, h.admin_id).await, 1);
}

#[tokio::test]
async fn saturated_ticket_is_not_re_alerted_on_later_passes() {
    let h = harness();
    h.policies.ensure_defaults().await.unwrap();

    let ticket = h
        .tickets
        .create(&h.requester, draft("ransomware alert", Priority::Urgent))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(6));

    // First pass: flags the max-priority breach and alerts once.
    let first = h.monitor.run_pass().await.unwrap();
    assert_eq!(first.escalated, 0);
    assert_eq!(first.at_max, 1);
    assert_eq!(escalation_alerts(&h.store, h.admin_id).await, 1);

    // Later passes see the marker and stay silent.
    h.clock.advance(Duration::hours(4));
    let second = h.monitor.run_pass().await.unwrap();
    assert_eq!(second.at_max, 1);
    assert_eq!(escalation_alerts(&h.store, h.admin_id).await, 1);

    let stored = TicketStore::get(h.store.as_ref(), ticket.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.priority, Priority::Urgent);
}

#[tokio::test]
async fn repeated_passes_walk_the_ladder_one_step_at_a_time() {
    let h = harness();
    h.policies.ensure_defaults().await.unwrap();

    // Low policy is {24h, 72h}; at 80h the resolution window is breached.
    let ticket = h
        .tickets
        .create(&h.requester, draft("slow wifi", Priority::Low))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(80));

    for expected in [Priority::Medium, Priority::High, Priority::Urgent] {
        h.monitor.run_pass().await.unwrap();
        let stored = TicketStore::get(h.store.as_ref(), ticket.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.priority, expected);
    }

    // Three escalations, then the saturation flag was already set by the
    // final raise, so a fourth pass adds nothing.
    h.monitor.run_pass().await.unwrap();
    assert_eq!(escalation_alerts(&h.store, h.admin_id).await, 3);
}

#[tokio::test]
async fn resolved_tickets_are_excluded_from_monitoring() {
    let h = harness();
    h.policies.ensure_defaults().await.unwrap();

    let ticket = h
        .tickets
        .create(&h.requester, draft("broken chair", Priority::High))
        .await
        .unwrap();
    h.tickets
        .change_status(&h.agent, ticket.id, TicketStatus::Resolved)
        .await
        .unwrap();
    h.clock.advance(Duration::hours(50));

    let summary = h.monitor.run_pass().await.unwrap();
    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.violations, 0);

    let stored = TicketStore::get(h.store.as_ref(), ticket.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.priority, Priority::High);
}

#[tokio::test]
async fn unmonitored_ticket_never_escalates() {
    let h = harness();
    // No policies seeded at all: the ticket is created unmonitored.
    let ticket = h
        .tickets
        .create(&h.requester, draft("no sla here", Priority::High))
        .await
        .unwrap();
    assert_eq!(ticket.policy_id, None);
    assert_eq!(ticket.due_at, None);

    h.clock.advance(Duration::hours(100));
    let summary = h.monitor.run_pass().await.unwrap();
    assert_eq!(summary.scanned, 0);

    let stored = TicketStore::get(h.store.as_ref(), ticket.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.priority, Priority::High);
}

#[tokio::test]
async fn policy_binding_is_a_creation_time_snapshot() {
    let h = harness();
    h.policies.ensure_defaults().await.unwrap();

    let ticket = h
        .tickets
        .create(&h.requester, draft("vpn flaky", Priority::Medium))
        .await
        .unwrap();
    let bound_due = ticket.due_at.unwrap();

    // Replacing the catalog after creation must not move the due date.
    h.policies
        .create(
            &h.admin,
            deskserver::sla::PolicyDraft {
                name: "Tighter Medium SLA".to_string(),
                priority: Priority::Medium,
                response_time_hours: 1,
                resolution_time_hours: 2,
            },
        )
        .await
        .unwrap();

    let stored = TicketStore::get(h.store.as_ref(), ticket.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.due_at, Some(bound_due));
    assert_eq!(stored.policy_id, ticket.policy_id);
}

#[tokio::test]
async fn concurrent_resolution_discards_an_in_flight_escalation() {
    let h = harness();
    h.policies.ensure_defaults().await.unwrap();

    let ticket = h
        .tickets
        .create(&h.requester, draft("flaky build agent", Priority::Medium))
        .await
        .unwrap();
    h.clock.advance(Duration::hours(30));

    // A detection pass took its snapshot, then the agent resolved the
    // ticket before the escalation write landed: the stale-version write
    // must fail against the resolved state and be discarded.
    let snapshot = TicketStore::get(h.store.as_ref(), ticket.id)
        .await
        .unwrap()
        .unwrap();
    h.tickets
        .change_status(&h.agent, ticket.id, TicketStatus::Resolved)
        .await
        .unwrap();

    let escalator = Escalator::new(h.store.clone(), h.clock.clone());
    let outcome = escalator
        .escalate(&snapshot, ViolationKind::Resolution)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        deskserver::sla::escalation::EscalationOutcome::NoLongerActive
    ));

    let stored = TicketStore::get(h.store.as_ref(), ticket.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.priority, Priority::Medium);
    assert_eq!(stored.status, TicketStatus::Resolved);
    assert_eq!(escalation_alerts(&h.store, h.admin_id).await, 0);
}

#[tokio::test]
async fn lifecycle_notifications_reach_the_right_inboxes() {
    let h = harness();
    h.policies.ensure_defaults().await.unwrap();

    let ticket = h
        .tickets
        .create(&h.requester, draft("projector dead", Priority::Medium))
        .await
        .unwrap();
    h.tickets
        .assign(&h.admin, ticket.id, h.agent.id)
        .await
        .unwrap();
    h.tickets
        .change_status(&h.agent, ticket.id, TicketStatus::Resolved)
        .await
        .unwrap();

    let requester_inbox = h.store.for_user(h.requester.id, 100).await.unwrap();
    let kinds: Vec<NotificationKind> = requester_inbox.iter().map(|n| n.kind).collect();
    assert!(kinds.contains(&NotificationKind::TicketCreated));
    assert!(kinds.contains(&NotificationKind::TicketResolved));

    let agent_inbox = h.store.for_user(h.agent.id, 100).await.unwrap();
    assert!(agent_inbox
        .iter()
        .any(|n| n.kind == NotificationKind::TicketAssigned));

    let admin_inbox = h.store.for_user(h.admin_id, 100).await.unwrap();
    assert!(admin_inbox
        .iter()
        .any(|n| n.kind == NotificationKind::NewTicket));
}

#[tokio::test]
async fn notification_read_flag_is_recipient_owned() {
    let h = harness();
    h.policies.ensure_defaults().await.unwrap();

    h.tickets
        .create(&h.requester, draft("keyboard sticky", Priority::Low))
        .await
        .unwrap();

    let inbox = h.store.for_user(h.requester.id, 10).await.unwrap();
    let notification = &inbox[0];
    assert!(!notification.is_read);

    // Someone else cannot flip another user's read flag.
    let foreign = h
        .store
        .mark_read(notification.id, h.agent.id)
        .await;
    assert!(foreign.is_err());

    let read = h
        .store
        .mark_read(notification.id, h.requester.id)
        .await
        .unwrap();
    assert!(read.is_read);
}
