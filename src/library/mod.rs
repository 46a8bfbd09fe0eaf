//! Local library domain: file entities, the canonical store, derived entry
//! views and the continuity store.

pub mod entry;
pub mod local_file;
pub mod store;
pub mod watch_history;

pub use entry::{MediaEntry, build_entries, build_entry, unmatched_files};
pub use local_file::{LocalFile, LocalFileKind, LocalFileMetadata, normalize_path};
pub use store::{BulkOp, LibraryStore, LocalFilePatch};
pub use watch_history::{ContinuityStore, WatchHistoryItem, WatchHistoryKind};
