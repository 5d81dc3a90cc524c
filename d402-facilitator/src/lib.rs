//! Library surface of the deferred x402 facilitator server.
//!
//! The binary in `main.rs` wires [`config::FacilitatorConfig`] into the
//! Axum router from [`handlers`]. The pieces are exposed as a library so
//! integration tests can assemble the same router against an in-memory
//! store.

pub mod config;
pub mod error;
pub mod handlers;
