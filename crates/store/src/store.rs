//! The persistence façade the rest of the plugin talks to.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use diarist_config::StoreConfig;
use diarist_extract::{DiaryFields, field_issues};
use diarist_host::{EntryField, FieldValue, Worldbook};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::entry::{DiaryEntry, EntryMetadata, compare_timestamps_desc, compose_content, display_label};

/// Failures surfaced by the store.
///
/// Validation runs before anything touches the worldbook and is never worth
/// retrying; backend failures are what the session retry budget is for.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{}", issues.join("；"))]
    Validation { issues: Vec<String> },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Aggregate counts over the stored diaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_entries: usize,
    pub total_characters: usize,
    /// Alphabetical by character name.
    pub per_character: Vec<CharacterCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacterCount {
    pub name: String,
    pub count: usize,
}

/// Download-ready snapshot of every stored diary.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSnapshot {
    pub export_time: DateTime<Utc>,
    pub worldbook_name: String,
    pub diaries: BTreeMap<String, Vec<DiaryEntry>>,
}

/// Diary persistence over a [`Worldbook`] capability.
///
/// The store name is resolved once, lazily, on the first operation; every
/// operation after that reuses it.
pub struct EntryStore {
    book: Arc<dyn Worldbook>,
    config: StoreConfig,
    resolved: OnceCell<String>,
}

impl EntryStore {
    pub fn new(book: Arc<dyn Worldbook>, config: StoreConfig) -> Self {
        Self {
            book,
            config,
            resolved: OnceCell::new(),
        }
    }

    /// Name of the worldbook diaries live in, resolving it on first use.
    ///
    /// Gives a freshly loaded host a moment to register its stores, then
    /// prefers a worldbook bound to the current chat over the configured
    /// default.  Never fails; an unreachable host just means the default.
    pub async fn ensure_ready(&self) -> &str {
        self.resolved
            .get_or_init(|| async {
                tokio::time::sleep(self.config.ready_delay()).await;
                match self.book.chat_bound_store_name().await {
                    Ok(Some(name)) => name,
                    Ok(None) => self.config.worldbook_name.clone(),
                    Err(error) => {
                        warn!(%error, "could not resolve chat worldbook, using default");
                        self.config.worldbook_name.clone()
                    }
                }
            })
            .await
    }

    /// Validates and persists one diary, returning it with its assigned id.
    ///
    /// The content is written with its metadata block up front, so the
    /// record is already reconstructable before the cosmetic fields go in.
    pub async fn create(
        &self,
        fields: &DiaryFields,
        character_name: &str,
    ) -> Result<DiaryEntry, StoreError> {
        let character = character_name.trim();
        let mut issues = field_issues(&fields.title, &fields.timestamp, &fields.body);
        if character.is_empty() {
            issues.push("角色名称不能为空".to_string());
        }
        if !issues.is_empty() {
            return Err(StoreError::Validation { issues });
        }

        let store = self.ensure_ready().await;
        let meta = EntryMetadata {
            title: fields.title.clone(),
            timestamp: fields.timestamp.clone(),
            character: character.to_string(),
            created_at: Some(Utc::now()),
        };
        let content = compose_content(&meta, &fields.body)?;
        let id = self
            .book
            .create_entry(store, &[character.to_string()], &content)
            .await?;

        if let Err(error) = self.decorate(store, &id, fields).await {
            warn!(%error, id, "diary saved but entry details could not be set");
        }

        Ok(DiaryEntry {
            id,
            title: fields.title.clone(),
            timestamp: fields.timestamp.clone(),
            body: fields.body.clone(),
            character_name: character.to_string(),
        })
    }

    /// Display label, selective activation, and insertion position for a
    /// fresh entry.  The record is already saved when this runs, so callers
    /// treat failures here as cosmetic.
    async fn decorate(&self, store: &str, id: &str, fields: &DiaryFields) -> anyhow::Result<()> {
        let label = display_label(&fields.title, &fields.timestamp);
        self.book
            .set_field(store, id, EntryField::Comment, FieldValue::Text(label))
            .await?;
        self.book
            .set_field(store, id, EntryField::Selective, FieldValue::Flag(true))
            .await?;
        self.book
            .set_field(store, id, EntryField::SelectiveLogic, FieldValue::Number(0))
            .await?;
        self.book
            .set_field(store, id, EntryField::Position, FieldValue::Number(1))
            .await?;
        Ok(())
    }

    /// All surviving diaries grouped by character, newest first per group.
    pub async fn list_all(&self) -> Result<BTreeMap<String, Vec<DiaryEntry>>, StoreError> {
        let store = self.ensure_ready().await;
        let entries = self.book.list_entries(store).await?;

        let mut grouped: BTreeMap<String, Vec<DiaryEntry>> = BTreeMap::new();
        for raw in &entries {
            let Some(diary) = DiaryEntry::from_stored(raw) else {
                continue;
            };
            grouped.entry(diary.character_name.clone()).or_default().push(diary);
        }
        for diaries in grouped.values_mut() {
            diaries.sort_by(|a, b| compare_timestamps_desc(&a.timestamp, &b.timestamp));
        }
        Ok(grouped)
    }

    /// Clears and disables one entry.  Returns `false` when there was
    /// nothing left to delete.
    ///
    /// The worldbook has no hard delete, so removal is clear-then-disable
    /// and a second call on the same id reports `false`.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let store = self.ensure_ready().await;

        match self.book.get_field(store, id, EntryField::Content).await {
            Ok(existing) => {
                let has_content = existing
                    .as_ref()
                    .and_then(FieldValue::as_text)
                    .is_some_and(|text| !text.trim().is_empty());
                if !has_content {
                    return Ok(false);
                }
            }
            // The clear below will surface a real backend problem anyway.
            Err(error) => warn!(%error, id, "could not check entry before deletion"),
        }

        self.book
            .set_field(store, id, EntryField::Content, FieldValue::Text(String::new()))
            .await?;
        self.book.disable_entry(store, id).await?;
        Ok(true)
    }

    /// Aggregate counts over the stored diaries.
    pub async fn stats(&self) -> Result<StoreStats, StoreError> {
        let grouped = self.list_all().await?;
        let total_entries = grouped.values().map(Vec::len).sum();
        let per_character: Vec<CharacterCount> = grouped
            .into_iter()
            .map(|(name, diaries)| CharacterCount { name, count: diaries.len() })
            .collect();
        Ok(StoreStats {
            total_entries,
            total_characters: per_character.len(),
            per_character,
        })
    }

    /// Snapshot of every diary for user download.
    pub async fn export_all(&self) -> Result<ExportSnapshot, StoreError> {
        let diaries = self.list_all().await?;
        Ok(ExportSnapshot {
            export_time: Utc::now(),
            worldbook_name: self.ensure_ready().await.to_string(),
            diaries,
        })
    }

    /// Deletes every diary, returning how many were removed.
    pub async fn clear_all(&self) -> Result<usize, StoreError> {
        let grouped = self.list_all().await?;
        let mut removed = 0;
        for diary in grouped.into_values().flatten() {
            if self.delete(&diary.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use diarist_host::{MemoryWorldbook, WorldbookEntry};

    fn test_config() -> StoreConfig {
        StoreConfig {
            ready_delay_ms: 0,
            ..StoreConfig::default()
        }
    }

    fn store_over(book: Arc<dyn Worldbook>) -> EntryStore {
        EntryStore::new(book, test_config())
    }

    fn fields(title: &str, timestamp: &str, body: &str) -> DiaryFields {
        DiaryFields {
            title: title.to_string(),
            timestamp: timestamp.to_string(),
            body: body.to_string(),
        }
    }

    /// Accepts the initial create, fails every follow-up field write.
    struct FlakyBook {
        inner: MemoryWorldbook,
    }

    #[async_trait]
    impl Worldbook for FlakyBook {
        async fn chat_bound_store_name(&self) -> Result<Option<String>> {
            self.inner.chat_bound_store_name().await
        }

        async fn create_entry(&self, store: &str, keys: &[String], content: &str) -> Result<String> {
            self.inner.create_entry(store, keys, content).await
        }

        async fn set_field(
            &self,
            _store: &str,
            _id: &str,
            _field: EntryField,
            _value: FieldValue,
        ) -> Result<()> {
            bail!("field writes are down")
        }

        async fn get_field(
            &self,
            store: &str,
            id: &str,
            field: EntryField,
        ) -> Result<Option<FieldValue>> {
            self.inner.get_field(store, id, field).await
        }

        async fn list_entries(&self, store: &str) -> Result<Vec<WorldbookEntry>> {
            self.inner.list_entries(store).await
        }

        async fn disable_entry(&self, store: &str, id: &str) -> Result<()> {
            self.inner.disable_entry(store, id).await
        }
    }

    #[tokio::test]
    async fn create_then_list_round_trips() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));

        let created = store.create(&fields("T", "D", "C"), "Alice").await.unwrap();
        assert_eq!(created.id, "u1");

        let all = store.list_all().await.unwrap();
        let diaries = &all["Alice"];
        assert_eq!(diaries.len(), 1);
        assert_eq!(diaries[0].id, "u1");
        assert_eq!(diaries[0].title, "T");
        assert_eq!(diaries[0].timestamp, "D");
        assert_eq!(diaries[0].body, "C");
        assert_eq!(diaries[0].character_name, "Alice");
    }

    #[tokio::test]
    async fn dashed_title_round_trips() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));
        store
            .create(&fields("My-Title", "2024-01-01", "正文"), "Alice")
            .await
            .unwrap();

        let all = store.list_all().await.unwrap();
        assert_eq!(all["Alice"][0].title, "My-Title");
        assert_eq!(all["Alice"][0].timestamp, "2024-01-01");
    }

    #[tokio::test]
    async fn ensure_ready_prefers_chat_bound_store() {
        let store = store_over(Arc::new(MemoryWorldbook::with_chat_store("章节书")));
        assert_eq!(store.ensure_ready().await, "章节书");
    }

    #[tokio::test]
    async fn ensure_ready_falls_back_to_configured_name() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));
        assert_eq!(store.ensure_ready().await, "日记本");
    }

    #[tokio::test]
    async fn validation_collects_issues_without_touching_store() {
        let book = Arc::new(MemoryWorldbook::new());
        let store = store_over(book.clone());

        let oversized = "字".repeat(101);
        let error = store
            .create(&fields(&oversized, "", ""), " ")
            .await
            .unwrap_err();
        let StoreError::Validation { issues } = error else {
            panic!("expected validation error");
        };
        assert!(issues.iter().any(|issue| issue.contains("最多100字符")));
        assert!(issues.contains(&"日记时间不能为空".to_string()));
        assert!(issues.contains(&"日记内容不能为空".to_string()));
        assert!(issues.contains(&"角色名称不能为空".to_string()));

        assert!(book.list_entries("日记本").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_decoration_does_not_lose_the_diary() {
        let store = store_over(Arc::new(FlakyBook { inner: MemoryWorldbook::new() }));

        let created = store
            .create(&fields("标题", "2024-05-01", "正文"), "Alice")
            .await
            .unwrap();
        assert_eq!(created.title, "标题");

        // No comment label was ever written; reconstruction rides on the
        // metadata block.
        let all = store.list_all().await.unwrap();
        assert_eq!(all["Alice"][0].title, "标题");
        assert_eq!(all["Alice"][0].timestamp, "2024-05-01");
    }

    #[tokio::test]
    async fn delete_reports_true_then_false() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));
        let created = store
            .create(&fields("标题", "2024-05-01", "正文"), "Alice")
            .await
            .unwrap();

        assert!(store.delete(&created.id).await.unwrap());
        assert!(!store.delete(&created.id).await.unwrap());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_of_unknown_id_reports_false() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));
        store
            .create(&fields("标题", "2024-05-01", "正文"), "Alice")
            .await
            .unwrap();

        assert!(!store.delete("u99").await.unwrap());
    }

    #[tokio::test]
    async fn groups_sort_newest_first() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));
        for timestamp in ["2024-05-01", "2024-05-03", "2024-05-02"] {
            store
                .create(&fields("标题", timestamp, "正文"), "Alice")
                .await
                .unwrap();
        }

        let all = store.list_all().await.unwrap();
        let timestamps: Vec<&str> =
            all["Alice"].iter().map(|diary| diary.timestamp.as_str()).collect();
        assert_eq!(timestamps, ["2024-05-03", "2024-05-02", "2024-05-01"]);
    }

    #[tokio::test]
    async fn stats_count_per_character() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));
        store.create(&fields("一", "2024-05-01", "正文"), "Alice").await.unwrap();
        store.create(&fields("二", "2024-05-02", "正文"), "Alice").await.unwrap();
        store.create(&fields("三", "2024-05-03", "正文"), "Bob").await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.total_characters, 2);
        assert_eq!(
            stats.per_character,
            vec![
                CharacterCount { name: "Alice".to_string(), count: 2 },
                CharacterCount { name: "Bob".to_string(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn characters_come_back_in_name_order() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));
        store.create(&fields("一", "2024-05-01", "正文"), "Bob").await.unwrap();
        store.create(&fields("二", "2024-05-02", "正文"), "Alice").await.unwrap();

        let all = store.list_all().await.unwrap();
        let names: Vec<&str> = all.keys().map(String::as_str).collect();
        assert_eq!(names, ["Alice", "Bob"]);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.per_character[0].name, "Alice");
        assert_eq!(stats.per_character[1].name, "Bob");
    }

    #[tokio::test]
    async fn export_carries_store_name_and_diaries() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));
        store.create(&fields("标题", "2024-05-01", "正文"), "Alice").await.unwrap();

        let snapshot = store.export_all().await.unwrap();
        assert_eq!(snapshot.worldbook_name, "日记本");
        assert_eq!(snapshot.diaries["Alice"][0].title, "标题");

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("export_time").is_some());
        assert!(json.get("worldbook_name").is_some());
        assert!(json.get("diaries").is_some());
    }

    #[tokio::test]
    async fn clear_all_reports_how_many_went_away() {
        let store = store_over(Arc::new(MemoryWorldbook::new()));
        store.create(&fields("一", "2024-05-01", "正文"), "Alice").await.unwrap();
        store.create(&fields("二", "2024-05-02", "正文"), "Bob").await.unwrap();
        store.create(&fields("三", "2024-05-03", "正文"), "Bob").await.unwrap();

        assert_eq!(store.clear_all().await.unwrap(), 3);
        assert!(store.list_all().await.unwrap().is_empty());
        assert_eq!(store.clear_all().await.unwrap(), 0);
    }
}
