use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// One record in a keyword-indexed worldbook.
///
/// Field names mirror the host's entry schema: `keys` drive keyword
/// activation, `comment` is the human-visible label, `content` the injected
/// text, and the remaining flags control when the host pulls the entry into
/// a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldbookEntry {
    pub id: String,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub selective: bool,
    #[serde(default)]
    pub selective_logic: i64,
    #[serde(default)]
    pub position: i64,
}

impl WorldbookEntry {
    pub fn new(id: impl Into<String>, keys: &[String], content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keys: keys.to_vec(),
            comment: String::new(),
            content: content.into(),
            disabled: false,
            selective: false,
            selective_logic: 0,
            position: 0,
        }
    }

    pub(crate) fn apply_field(&mut self, field: EntryField, value: FieldValue) -> Result<()> {
        match (field, value) {
            (EntryField::Comment, FieldValue::Text(text)) => self.comment = text,
            (EntryField::Content, FieldValue::Text(text)) => self.content = text,
            (EntryField::Disabled, FieldValue::Flag(flag)) => self.disabled = flag,
            (EntryField::Selective, FieldValue::Flag(flag)) => self.selective = flag,
            (EntryField::SelectiveLogic, FieldValue::Number(n)) => self.selective_logic = n,
            (EntryField::Position, FieldValue::Number(n)) => self.position = n,
            (field, value) => bail!("field {field:?} does not accept {value:?}"),
        }
        Ok(())
    }

    pub(crate) fn read_field(&self, field: EntryField) -> FieldValue {
        match field {
            EntryField::Comment => FieldValue::Text(self.comment.clone()),
            EntryField::Content => FieldValue::Text(self.content.clone()),
            EntryField::Disabled => FieldValue::Flag(self.disabled),
            EntryField::Selective => FieldValue::Flag(self.selective),
            EntryField::SelectiveLogic => FieldValue::Number(self.selective_logic),
            EntryField::Position => FieldValue::Number(self.position),
        }
    }
}

/// Writable fields of a worldbook entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryField {
    Comment,
    Content,
    Disabled,
    Selective,
    SelectiveLogic,
    Position,
}

/// Value written to an [`EntryField`].  The host API is loosely typed, so
/// writes carry their value kind explicitly and mismatches are rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Number(i64),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Keyword-store operations the host must supply.  Stores are addressed by
/// name; entry ids are opaque strings assigned at creation.
#[async_trait]
pub trait Worldbook: Send + Sync {
    /// Name of the store bound to the active chat, when the host tracks one.
    async fn chat_bound_store_name(&self) -> Result<Option<String>>;

    /// Create an entry and return its store-assigned id.
    async fn create_entry(&self, store: &str, keys: &[String], content: &str) -> Result<String>;

    async fn set_field(
        &self,
        store: &str,
        id: &str,
        field: EntryField,
        value: FieldValue,
    ) -> Result<()>;

    async fn get_field(&self, store: &str, id: &str, field: EntryField)
    -> Result<Option<FieldValue>>;

    async fn list_entries(&self, store: &str) -> Result<Vec<WorldbookEntry>>;

    async fn disable_entry(&self, store: &str, id: &str) -> Result<()>;
}

// ── In-memory adapter ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryBooks {
    stores: HashMap<String, Vec<WorldbookEntry>>,
    next_id: u64,
}

impl MemoryBooks {
    fn entry_mut(&mut self, store: &str, id: &str) -> Result<&mut WorldbookEntry> {
        let Some(entries) = self.stores.get_mut(store) else {
            bail!("worldbook {store:?} does not exist");
        };
        match entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => Ok(entry),
            None => bail!("entry {id:?} not found in worldbook {store:?}"),
        }
    }
}

/// In-process [`Worldbook`] holding everything in memory.  Entry ids are
/// deterministic (`u1`, `u2`, …) so tests can assert on them.
#[derive(Debug, Default)]
pub struct MemoryWorldbook {
    books: Mutex<MemoryBooks>,
    chat_store: Option<String>,
}

impl MemoryWorldbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the host has a worldbook bound to the active chat.
    pub fn with_chat_store(name: impl Into<String>) -> Self {
        Self {
            books: Mutex::new(MemoryBooks::default()),
            chat_store: Some(name.into()),
        }
    }
}

#[async_trait]
impl Worldbook for MemoryWorldbook {
    async fn chat_bound_store_name(&self) -> Result<Option<String>> {
        Ok(self.chat_store.clone())
    }

    async fn create_entry(&self, store: &str, keys: &[String], content: &str) -> Result<String> {
        let mut books = self.books.lock().await;
        books.next_id += 1;
        let id = format!("u{}", books.next_id);
        let entry = WorldbookEntry::new(&id, keys, content);
        books.stores.entry(store.to_string()).or_default().push(entry);
        Ok(id)
    }

    async fn set_field(
        &self,
        store: &str,
        id: &str,
        field: EntryField,
        value: FieldValue,
    ) -> Result<()> {
        let mut books = self.books.lock().await;
        books.entry_mut(store, id)?.apply_field(field, value)
    }

    async fn get_field(
        &self,
        store: &str,
        id: &str,
        field: EntryField,
    ) -> Result<Option<FieldValue>> {
        let books = self.books.lock().await;
        let Some(entries) = books.stores.get(store) else {
            return Ok(None);
        };
        Ok(entries.iter().find(|entry| entry.id == id).map(|entry| entry.read_field(field)))
    }

    async fn list_entries(&self, store: &str) -> Result<Vec<WorldbookEntry>> {
        let books = self.books.lock().await;
        Ok(books.stores.get(store).cloned().unwrap_or_default())
    }

    async fn disable_entry(&self, store: &str, id: &str) -> Result<()> {
        let mut books = self.books.lock().await;
        books.entry_mut(store, id)?.apply_field(EntryField::Disabled, FieldValue::Flag(true))
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
