//! Fetch strategies and the network seam.

pub mod fallback;

mod engine;
mod net;

pub use engine::FetchEngine;
pub use net::{FetchFuture, HttpFetcher, NetworkFetcher};
