//! scholar-upstream — C5: the remote scholarly-metadata API client.

pub mod client;
pub mod query_hash;

pub use client::{UpstreamClient, UpstreamPage};
pub use query_hash::{generate_query_hash, QueryHashInput};
