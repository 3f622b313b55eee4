//! Diary persistence over the host worldbook.
//!
//! One diary is one worldbook entry: the character name is the activation
//! key, the comment field carries a `"{title}-{timestamp}"` display label,
//! and the content starts with a metadata block ahead of the body so a
//! record stays reconstructable even when the label is lost.

pub mod entry;
pub mod store;

pub use entry::{
    DiaryEntry, EntryMetadata, compare_timestamps_desc, compose_content, display_label,
    split_content, split_label,
};
pub use store::{CharacterCount, EntryStore, ExportSnapshot, StoreError, StoreStats};
