use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::worldbook::{EntryField, FieldValue, Worldbook, WorldbookEntry};

/// File-backed [`Worldbook`] used by the CLI.  Every store lives in one JSON
/// document keyed by store name; each mutation rewrites the file atomically.
#[derive(Debug)]
pub struct FileWorldbook {
    path: PathBuf,
    books: Mutex<HashMap<String, Vec<WorldbookEntry>>>,
}

impl FileWorldbook {
    /// Open (or create) the worldbook file at `path`.
    ///
    /// An unreadable file is renamed to a `.corrupt` sibling and replaced
    /// with an empty book set.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let books = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(books) => books,
                Err(err) => {
                    let corrupt_path = sibling_path(&path, "corrupt");
                    tracing::warn!(
                        error = %err,
                        path = %path.display(),
                        corrupt = %corrupt_path.display(),
                        "worldbook file unreadable, starting fresh (original moved aside)"
                    );
                    let _ = fs::rename(&path, &corrupt_path);
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                return Err(err).context(format!("reading worldbook file {}", path.display()));
            }
        };
        Ok(Self {
            path,
            books: Mutex::new(books),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the file with the current book set.
    ///
    /// Written to a `.tmp` sibling, `fsync`'d, then renamed over the
    /// original; a crash before the rename leaves the old file untouched.
    /// The `.tmp` file is cleaned up on any error path.
    async fn persist(&self, books: &HashMap<String, Vec<WorldbookEntry>>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = sibling_path(&self.path, "tmp");
        let write_result: Result<()> = async {
            let rendered = serde_json::to_string_pretty(books)?;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(rendered.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(())
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "worldbooks.json".to_string());
    path.with_file_name(format!("{filename}.{suffix}"))
}

#[async_trait]
impl Worldbook for FileWorldbook {
    async fn chat_bound_store_name(&self) -> Result<Option<String>> {
        Ok(None)
    }

    async fn create_entry(&self, store: &str, keys: &[String], content: &str) -> Result<String> {
        let mut books = self.books.lock().await;
        let id = Uuid::new_v4().to_string();
        books
            .entry(store.to_string())
            .or_default()
            .push(WorldbookEntry::new(&id, keys, content));
        self.persist(&books).await?;
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
        let Some(entry) = books
            .get_mut(store)
            .and_then(|entries| entries.iter_mut().find(|entry| entry.id == id))
        else {
            bail!("entry {id:?} not found in worldbook {store:?}");
        };
        entry.apply_field(field, value)?;
        self.persist(&books).await
    }

    async fn get_field(
        &self,
        store: &str,
        id: &str,
        field: EntryField,
    ) -> Result<Option<FieldValue>> {
        let books = self.books.lock().await;
        Ok(books
            .get(store)
            .and_then(|entries| entries.iter().find(|entry| entry.id == id))
            .map(|entry| entry.read_field(field)))
    }

    async fn list_entries(&self, store: &str) -> Result<Vec<WorldbookEntry>> {
        let books = self.books.lock().await;
        Ok(books.get(store).cloned().unwrap_or_default())
    }

    async fn disable_entry(&self, store: &str, id: &str) -> Result<()> {
        self.set_field(store, id, EntryField::Disabled, FieldValue::Flag(true))
            .await
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
