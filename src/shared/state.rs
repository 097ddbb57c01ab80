use std::sync::Arc;

use crate::authz::Authorizer;
use crate::config::AppConfig;
use crate::sla::sweep::SlaMonitor;
use crate::sla::PolicyService;
use crate::store::NotificationStore;
use crate::tickets::lifecycle::TicketService;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub tickets: TicketService,
    pub policies: PolicyService,
    pub notifications: Arc<dyn NotificationStore>,
    pub monitor: Arc<SlaMonitor>,
    pub authz: Arc<dyn Authorizer>,
}
