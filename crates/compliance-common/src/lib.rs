//! Shared types, configuration, error taxonomy, and tracing bootstrap
//! for the clinic compliance appliance.
//!
//! Every other crate in this workspace depends on this one for its
//! domain vocabulary (`Device`, `Incident`, `EvidenceBundle`, ...),
//! its error composition, and its pattern-signature function — the
//! single source of truth so every producer computes identical
//! signatures for equivalent inputs.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod pattern;

pub use domain::*;
pub use error::{ApplianceError, ApplianceResult};
