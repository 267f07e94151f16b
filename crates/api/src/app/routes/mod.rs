//! HTTP routes, one file per area.

pub mod authz;
pub mod notifications;
pub mod session;
pub mod system;
