//! Message summary index.
//!
//! Cached per-message metadata (flags, size, envelope) that lets folders be
//! listed and queried without contacting the remote. Persisted per folder in
//! the store's local database together with the locally known folder tree.

mod index;
mod model;
mod repository;

pub use index::{SummaryChanges, SummaryIndex};
pub use model::MessageInfo;
pub use repository::SummaryRepository;
