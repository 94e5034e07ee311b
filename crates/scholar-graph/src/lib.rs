//! scholar-graph — C4: the durable graph tier (paper/author/citation store).

pub mod model;
pub mod store;

pub use model::{IngestStatus, PaperRow};
pub use store::GraphStore;
