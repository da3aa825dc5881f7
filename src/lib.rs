//! Cellar: an offline-capable request interception and caching layer.
//!
//! Read requests are classified by path and answered by one of three
//! strategies (cache first, network first, stale while revalidate) over
//! versioned snapshot stores. A lifecycle controller installs the critical
//! resources for a version and evicts stores left behind by older ones.

pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod http;
pub mod lifecycle;
pub mod peripheral;
pub mod strategy;
pub mod worker;

#[cfg(test)]
mod testing;
