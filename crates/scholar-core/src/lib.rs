//! scholar-core — C6/C8: field projection, cache key templates, and the
//! `PaperService` orchestrator tying every tier together.

pub mod coalesce;
pub mod keys;
pub mod projector;
pub mod service;

pub use projector::{project_selector, FieldTree};
pub use service::{Diagnostics, PaperService};
