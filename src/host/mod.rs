//! Host collaborator interfaces.
//!
//! The reference manager owns items, attachments, notes, preferences and the
//! visible selection. refmind only talks to it through the narrow traits in
//! this module; each host API version gets its own adapter, picked once when
//! the [`crate::pipeline::input::PayloadLoader`] or
//! [`crate::ask::Assistant`] is constructed.
//!
//! [`memory`] provides an in-process implementation of every trait, used by
//! the CLI (library snapshots exported as JSON) and by the tests.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Numeric item identifier as used by the host database.
pub type ItemId = u64;

/// What kind of record an [`Item`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A bibliographic record (article, book, …).
    #[default]
    Regular,
    /// A file or link attached to a record.
    Attachment,
    /// A note.
    Note,
}

/// How an attachment's file is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// Copied into the host's storage directory.
    ImportedFile,
    /// Snapshot downloaded into storage.
    ImportedUrl,
    /// Points at a file elsewhere on disk.
    LinkedFile,
    /// Only a URL, no local file.
    LinkedUrl,
}

impl LinkMode {
    /// Stored attachments live under the host's storage directory.
    pub fn is_stored(self) -> bool {
        matches!(self, LinkMode::ImportedFile | LinkMode::ImportedUrl)
    }
}

/// A library record as exposed by the host. Read-only for refmind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// Stable 8-character key, used in note tags.
    pub key: String,
    #[serde(default)]
    pub kind: ItemKind,
    #[serde(default)]
    pub title: String,
    /// MIME type of an attachment.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Display filename of an attachment.
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub link_mode: Option<LinkMode>,
    /// Owning top-level item, if any.
    #[serde(default)]
    pub parent_id: Option<ItemId>,
}

impl Item {
    pub fn is_attachment(&self) -> bool {
        self.kind == ItemKind::Attachment
    }

    /// Attachment whose MIME type is exactly `application/pdf`, ignoring case.
    pub fn is_pdf_attachment(&self) -> bool {
        self.is_attachment()
            && self
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.trim().eq_ignore_ascii_case("application/pdf"))
    }

    /// Filename to report to the provider, falling back to the title.
    pub fn display_filename(&self) -> String {
        self.filename
            .clone()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| {
                if self.title.trim().is_empty() {
                    format!("{}.pdf", self.key)
                } else {
                    self.title.clone()
                }
            })
    }
}

/// One entry of the active view's selection.
///
/// Some host versions hand back ids, others whole objects.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectedEntry {
    Id(ItemId),
    Item(Item),
}

/// Item/attachment lookup and the visible selection.
#[async_trait]
pub trait Library: Send + Sync {
    async fn item(&self, id: ItemId) -> Option<Item>;

    /// Currently selected entries in the active items view.
    async fn selected(&self) -> Vec<SelectedEntry>;

    /// Item open in the active reader tab, if any.
    async fn reader_item(&self) -> Option<ItemId>;

    /// Formal attachment list of a top-level item.
    async fn attachments(&self, id: ItemId) -> Vec<ItemId>;

    /// Direct children (attachments and notes) of a top-level item.
    async fn children(&self, id: ItemId) -> Vec<ItemId>;

    /// Select items in the active view.
    async fn select_items(&self, ids: &[ItemId]);
}

/// Ways the host can expose an attachment's content.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// Inline `data:` URI, when the host keeps one.
    async fn data_uri(&self, _item: &Item) -> Option<String> {
        None
    }

    /// Filesystem path of the attachment's file.
    async fn resolve_path(&self, item: &Item) -> Option<PathBuf>;
}

/// Reads a whole file into memory.
#[async_trait]
pub trait BinaryReader: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// Native reader backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFileReader;

#[async_trait]
impl BinaryReader for NativeFileReader {
    fn name(&self) -> &str {
        "native"
    }

    async fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }
}

/// A host note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: ItemId,
    pub parent_id: ItemId,
    pub html: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub date_modified: DateTime<Utc>,
}

impl Note {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Note persistence.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Child notes of an item.
    async fn notes_for(&self, parent_id: ItemId) -> Vec<Note>;

    async fn note(&self, id: ItemId) -> Option<Note>;

    /// Create an empty note under `parent_id`.
    async fn create_note(&self, parent_id: ItemId, html: &str, tags: &[String]) -> Result<Note, String>;

    /// Save the note body and tags transactionally.
    async fn save_note(&self, note: &Note) -> Result<(), String>;
}

/// Generic key/value preference storage.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str) -> Result<(), String>;
}

/// Transient, non-modal user notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}
