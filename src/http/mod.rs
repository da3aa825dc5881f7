//! Request and response types plus the network seam the executors fetch through.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Destination, RequestDescriptor, ResponseSnapshot};
