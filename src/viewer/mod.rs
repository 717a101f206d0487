//! Read-only surface consumed by the viewer service: search, timeline
//! assembly, indexed-field discovery, and two-tier password
//! authorization.
//!
//! Neither submodule talks to an HTTP framework; both are written against
//! plain values so a host can wire them into whatever framework it uses.
//! The framework itself, CORS, and rate limiting are left to that host.

pub mod auth;
pub mod query;
