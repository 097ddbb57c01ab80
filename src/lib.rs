pub mod authz;
pub mod config;
pub mod directory;
pub mod notify;
pub mod shared;
pub mod sla;
pub mod store;
pub mod tickets;
