//! Offline-first caching and background sync engine for the Rolan ice cream PWA.
//!
//! This crate is the service-worker core of the site, expressed as a library:
//! - versioned cache partitions over durable storage ([`cache`])
//! - a pure request classifier ([`classify`])
//! - four fetch strategies with offline fallback ([`fetch`])
//! - a durable queue replaying failed orders and contact submissions ([`queue`])
//! - the lifecycle controller tying the events together ([`worker`])
//!
//! The platform surfaces (network, open pages, notifications) are traits, so
//! the whole engine runs against in-memory fakes in tests and against
//! reqwest/SQLite in production.

pub mod cache;
pub mod classify;
pub mod config;
pub mod fetch;
pub mod queue;
pub mod request;
pub mod worker;
