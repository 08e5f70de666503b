//! Toolgate - Admission Control for a Tool-Execution Gateway
//!
//! This crate implements the request-admission layer that sits in front of a
//! tool-execution gateway: it decides, for every inbound call, whether the
//! caller may proceed right now, and if not, when it may retry. Counting is
//! delegated to a shared atomic counter store (Redis in production, an
//! in-process map for tests), with an explicit degradation policy for the
//! case where the store is unreachable.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod signal;
