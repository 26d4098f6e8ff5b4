//! File-backed implementation of the position metadata store.
//!
//! One JSON file holds the metadata of every tracked ticket. The file is
//! shared with other subsystems, so every write goes through a single-writer
//! lock file with bounded retry and linearly increasing backoff on
//! contention. Updates merge a partial patch into the stored record at the
//! JSON level; fields absent from the patch are never touched. Writes land
//! via temp-file-and-rename, so once an update returns success any subsequent
//! read — from this process or another — observes the merged record.

mod file_store;

pub use file_store::{FileMetadataStore, StoreError};
