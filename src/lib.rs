//! Hivegate - Distributed Request-Admission Gate
//!
//! This crate limits request rates per caller and operation class using
//! minute and hour windows, a per-second burst bucket and escalating blocks
//! for repeat offenders. All counters live in a shared store so any number
//! of instances enforce one set of limits.

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;
pub mod server;
pub mod store;
