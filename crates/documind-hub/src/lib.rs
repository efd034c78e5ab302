//! Remote dataset registry: paged row fetches from a datasets-server style
//! REST API, materialized as Arrow record batches.

mod client;
mod rows;

pub use client::{DatasetSlice, DatasetSource, HubClient, HubError, MAX_PAGE_SIZE};
