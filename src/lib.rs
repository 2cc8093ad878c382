//! Canonical transport data store with realtime journey fusion.
//!
//! Reference data (stops, operators, services, scheduled journeys) is
//! imported into a canonical document store; live vehicle reports and rail
//! status messages are matched to scheduled journeys and folded into
//! per-date realtime documents; departure boards fuse the two at query time.

pub mod api;
pub mod config;
pub mod import;
pub mod models;
pub mod realtime;
pub mod store;
pub mod timetable;
pub mod transforms;
