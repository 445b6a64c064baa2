//! Operation diary.
//!
//! Durable, ordered record of mutations performed while offline. Entries are
//! committed before the offline operation reports success, and are consumed
//! in log order by the [replayer](crate::replay) once the store is back
//! online.

mod model;
mod repository;

pub use model::{DiaryEntry, LoggedEntry, UidMapEntry};
pub use repository::Diary;
