//! scholar-ident — C1 (identifier parsing/normalization) and C2 (the
//! durable identifier index) from spec.md §4.1/§4.2.

pub mod index;
pub mod model;

pub use index::IdentifierIndex;
pub use model::{normalize, normalize_title, parse, ExternalId, ExternalIdType};
