pub mod chat;
pub mod file;
pub mod message;
pub mod notice;
pub mod preset;
pub mod worldbook;

pub use chat::{ChatHost, ScriptedChat};
pub use file::FileWorldbook;
pub use message::{Author, ChatMessage};
pub use notice::{Notice, NoticeLevel, NoticeLog, NoticeSink, TracingNotices};
pub use preset::{PresetHost, StaticPresets};
pub use worldbook::{EntryField, FieldValue, MemoryWorldbook, Worldbook, WorldbookEntry};
