//! Floodgate - Distributed Rate Limiting Middleware
//!
//! This crate implements the rate limiting subsystem of a content platform
//! backend. Inbound requests are throttled with counters held in a shared
//! Redis store, so the enforced limits hold across every server process.
//! Cross-request coordination relies solely on the store executing each
//! check-and-increment as one indivisible unit; no counter state lives in
//! process memory.

pub mod http;
pub mod ratelimit;
pub mod store;
pub mod config;
pub mod error;
