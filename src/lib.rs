//! OLT discovery and polling core
//!
//! Scans configured address ranges for optical line terminals,
//! interrogates each one over SNMP/SSH for its identity, health and
//! attached terminals (ONUs), reconciles the observations into a
//! persistent inventory and broadcasts the resulting change events.

pub mod broadcaster;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod prober;
pub mod reconciler;
pub mod scanner;
pub mod state;
pub mod store;
pub mod transport;

pub use error::{Error, Result};
