//! Diary records and the shape they take inside a worldbook entry.

use std::cmp::Ordering;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use diarist_extract::is_template_residue;
use diarist_host::WorldbookEntry;
use serde::{Deserialize, Serialize};

/// Tag inside the HTML comment that marks our metadata block.
const METADATA_TAG: &str = "日记元数据:";

const COMMENT_OPEN: &str = "<!--";
const COMMENT_CLOSE: &str = "-->";

// ── Records ──────────────────────────────────────────────────────────────────

/// One diary as shown to the user, reconstructed from its stored form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiaryEntry {
    /// Id assigned by the worldbook backend.
    pub id: String,
    pub title: String,
    /// Free-form date text as the AI wrote it, e.g. `2024年5月1日`.
    pub timestamp: String,
    pub body: String,
    pub character_name: String,
}

/// Structured block embedded ahead of the body:
/// `<!-- 日记元数据: {...} -->`.
///
/// Field names are fixed by the records already sitting in user worldbooks,
/// and every field tolerates absence so hand-edited blocks still parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(rename = "diaryTitle", default)]
    pub title: String,
    #[serde(rename = "diaryTime", default)]
    pub timestamp: String,
    #[serde(rename = "diaryCharacter", default)]
    pub character: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl DiaryEntry {
    /// Rebuilds a diary from its stored worldbook form.
    ///
    /// Returns `None` for entries that are not diaries worth showing:
    /// disabled, emptied by deletion, missing a character or label, or
    /// still carrying unfilled template placeholders.
    pub fn from_stored(raw: &WorldbookEntry) -> Option<Self> {
        if raw.disabled || raw.content.trim().is_empty() {
            return None;
        }

        let (meta, body) = split_content(&raw.content);
        if body.is_empty() {
            return None;
        }

        let character_name = raw
            .keys
            .first()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .or_else(|| {
                meta.as_ref()
                    .map(|meta| meta.character.trim().to_string())
                    .filter(|name| !name.is_empty())
            })?;

        // The metadata block is authoritative; the comment label is the
        // fallback for records written before the block existed.
        let (title, timestamp) = match &meta {
            Some(meta) if !meta.title.trim().is_empty() && !meta.timestamp.trim().is_empty() => {
                (meta.title.trim().to_string(), meta.timestamp.trim().to_string())
            }
            _ => split_label(&raw.comment),
        };
        if title.is_empty() || timestamp.is_empty() {
            return None;
        }
        if is_template_residue(&title, &timestamp, &body) {
            return None;
        }

        Some(Self {
            id: raw.id.clone(),
            title,
            timestamp,
            body,
            character_name,
        })
    }
}

// ── Stored content ───────────────────────────────────────────────────────────

/// Content field for a fresh record: metadata comment, newline, body.
pub fn compose_content(meta: &EntryMetadata, body: &str) -> Result<String> {
    let json = serde_json::to_string(meta).context("serialize diary metadata")?;
    Ok(format!("{COMMENT_OPEN} {METADATA_TAG} {json} {COMMENT_CLOSE}\n{body}"))
}

/// Splits stored content into its optional metadata block and the body.
///
/// A block whose JSON no longer parses is still stripped from the body, it
/// just yields no metadata.  Comments that are not ours stay in the body.
pub fn split_content(content: &str) -> (Option<EntryMetadata>, String) {
    let Some(block) = find_metadata_block(content) else {
        return (None, content.trim().to_string());
    };
    let meta = serde_json::from_str(block.json).ok();
    let body = format!("{}{}", &content[..block.start], &content[block.end..]);
    (meta, body.trim().to_string())
}

struct MetadataBlock<'a> {
    start: usize,
    /// Past the closing `-->` and any whitespace that follows it.
    end: usize,
    json: &'a str,
}

fn find_metadata_block(content: &str) -> Option<MetadataBlock<'_>> {
    let mut from = 0;
    while let Some(open_rel) = content[from..].find(COMMENT_OPEN) {
        let open = from + open_rel;
        let inner_start = open + COMMENT_OPEN.len();
        let close_rel = content[inner_start..].find(COMMENT_CLOSE)?;
        let inner_end = inner_start + close_rel;

        let inner = content[inner_start..inner_end].trim();
        if let Some(json) = inner.strip_prefix(METADATA_TAG) {
            let mut end = inner_end + COMMENT_CLOSE.len();
            let tail = &content[end..];
            end += tail.len() - tail.trim_start().len();
            return Some(MetadataBlock { start: open, end, json: json.trim() });
        }
        from = inner_end + COMMENT_CLOSE.len();
    }
    None
}

// ── Display labels ───────────────────────────────────────────────────────────

/// Label stored in the entry's comment field.
pub fn display_label(title: &str, timestamp: &str) -> String {
    format!("{title}-{timestamp}")
}

/// Splits a comment label back into title and timestamp.
///
/// Prefers the split whose right side is a recognizable date, so dashed
/// dates like `2024-01-01` stay whole even when the title has dashes of
/// its own.  When no suffix looks like a date the split falls back to the
/// last `-`; a label with no dash at all is all title.
pub fn split_label(label: &str) -> (String, String) {
    let label = label.trim();
    let mut search_end = label.len();
    while let Some(dash) = label[..search_end].rfind('-') {
        let candidate = label[dash + 1..].trim();
        if !candidate.is_empty() && timestamp_sort_key(candidate).is_some() {
            return (label[..dash].trim().to_string(), candidate.to_string());
        }
        search_end = dash;
    }
    match label.rsplit_once('-') {
        Some((title, timestamp)) => (title.trim().to_string(), timestamp.trim().to_string()),
        None => (label.to_string(), String::new()),
    }
}

// ── Timestamp ordering ───────────────────────────────────────────────────────

/// Newest-first ordering for the free-form timestamps diaries carry.
///
/// When both sides parse as dates the comparison is date-aware; otherwise
/// it falls back to descending lexical order so the result is still stable.
pub fn compare_timestamps_desc(a: &str, b: &str) -> Ordering {
    match (timestamp_sort_key(a), timestamp_sort_key(b)) {
        (Some(key_a), Some(key_b)) => key_b.cmp(&key_a),
        _ => b.cmp(a),
    }
}

/// Best-effort parse covering the formats seen in stored diaries.
fn timestamp_sort_key(raw: &str) -> Option<NaiveDateTime> {
    let text = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日"] {
        if let Ok(parsed) = NaiveDate::parse_from_str(text, format) {
            return Some(parsed.and_time(NaiveTime::MIN));
        }
    }
    None
}

// ── Tests ────────────────────────────────────────────────────────────────────
