use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use dotenvy::dotenv;
use log::info;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

use deskserver::authz::{Authorizer, RoleAuthorizer};
use deskserver::config::AppConfig;
use deskserver::directory::{Directory, StaticDirectory};
use deskserver::notify::mailer::{LogMailer, Mailer, SmtpMailer};
use deskserver::notify::{configure_notification_routes, Dispatcher};
use deskserver::shared::clock::{Clock, SystemClock};
use deskserver::shared::state::AppState;
use deskserver::sla::escalation::Escalator;
use deskserver::sla::sweep::SlaMonitor;
use deskserver::sla::{configure_sla_routes, PolicyService};
use deskserver::store::pg::PgStore;
use deskserver::store::{NotificationStore, PolicyStore, TicketStore};
use deskserver::tickets::lifecycle::TicketService;
use deskserver::tickets::configure_ticket_routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = AppConfig::from_env()?;

    let manager = ConnectionManager::<PgConnection>::new(&config.database_url);
    let pool = Pool::builder()
        .build(manager)
        .context("failed to create database pool")?;
    let store = Arc::new(PgStore::new(pool));

    let tickets: Arc<dyn TicketStore> = store.clone();
    let policy_store: Arc<dyn PolicyStore> = store.clone();
    let notifications: Arc<dyn NotificationStore> = store;

    let directory: Arc<dyn Directory> = Arc::new(StaticDirectory::seeded());
    let authz: Arc<dyn Authorizer> = Arc::new(RoleAuthorizer);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mailer: Arc<dyn Mailer> = if config.email.enabled {
        Arc::new(SmtpMailer::new(config.email.clone()))
    } else {
        Arc::new(LogMailer)
    };

    let dispatcher = Arc::new(Dispatcher::new(
        notifications.clone(),
        directory.clone(),
        mailer,
        clock.clone(),
    ));

    let policies = PolicyService::new(
        policy_store.clone(),
        tickets.clone(),
        authz.clone(),
        clock.clone(),
    );
    policies
        .ensure_defaults()
        .await
        .context("failed to seed default SLA policies")?;

    let ticket_service = TicketService::new(
        tickets.clone(),
        policy_store.clone(),
        directory,
        authz.clone(),
        dispatcher.clone(),
        clock.clone(),
    );

    let escalator = Escalator::new(tickets.clone(), clock.clone());
    let monitor = Arc::new(SlaMonitor::new(
        tickets,
        policy_store,
        escalator,
        dispatcher,
        clock,
        config.sla.worker_limit,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = monitor.clone().spawn(
        Duration::from_secs(config.sla.sweep_interval_secs),
        shutdown_rx,
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;

    let state = Arc::new(AppState {
        config,
        tickets: ticket_service,
        policies,
        notifications,
        monitor,
        authz,
    });

    let app = Router::new()
        .merge(configure_ticket_routes())
        .merge(configure_sla_routes())
        .merge(configure_notification_routes())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("helpdesk server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    monitor_handle.await.ok();
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
