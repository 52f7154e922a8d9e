//! Event journal for lock decisions.

mod jsonl;

pub use jsonl::EventJournal;
