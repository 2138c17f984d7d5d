//! In-process host: library snapshots, notes and preferences kept in memory.
//!
//! A [`LibrarySnapshot`] is the JSON shape the CLI reads with `--library`:
//!
//! ```json
//! {
//!   "storage_dir": "/home/me/Zotero/storage",
//!   "items": [
//!     { "id": 1, "key": "ABCD1234", "title": "Attention Is All You Need" },
//!     { "id": 2, "key": "EFGH5678", "kind": "attachment", "parent_id": 1,
//!       "content_type": "application/pdf", "filename": "attention.pdf",
//!       "link_mode": "imported_file" }
//!   ],
//!   "selected": [1]
//! }
//! ```
//!
//! `attachments` may list a formal attachment list per item; when absent the
//! list is derived from children. `paths` and `data_uris` override where an
//! attachment's content comes from.

use super::{
    AttachmentSource, Item, ItemId, ItemKind, Library, LinkMode, Note, NoteStore,
    PreferenceStore, SelectedEntry,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A selection entry as written in a snapshot: a bare id or a whole item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotSelection {
    Id(ItemId),
    Item(Item),
}

impl From<SnapshotSelection> for SelectedEntry {
    fn from(s: SnapshotSelection) -> Self {
        match s {
            SnapshotSelection::Id(id) => SelectedEntry::Id(id),
            SnapshotSelection::Item(item) => SelectedEntry::Item(item),
        }
    }
}

/// Serialisable view of a library.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibrarySnapshot {
    /// Root of the host's storage directory (`<storage>/<key>/<filename>`).
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub selected: Vec<SnapshotSelection>,
    #[serde(default)]
    pub reader: Option<ItemId>,
    /// Formal attachment lists; derived from children when an item is absent.
    #[serde(default)]
    pub attachments: BTreeMap<ItemId, Vec<ItemId>>,
    /// Explicit file paths per attachment.
    #[serde(default)]
    pub paths: BTreeMap<ItemId, PathBuf>,
    /// Inline data URIs per attachment.
    #[serde(default)]
    pub data_uris: BTreeMap<ItemId, String>,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl LibrarySnapshot {
    /// A library holding one linked file under a synthetic parent, selected.
    pub fn single_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "document.pdf".to_string());
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| filename.clone());
        let is_pdf = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));

        let parent = Item {
            id: 1,
            key: "LOCAL001".into(),
            kind: ItemKind::Regular,
            title: title.clone(),
            content_type: None,
            filename: None,
            link_mode: None,
            parent_id: None,
        };
        let attachment = Item {
            id: 2,
            key: "LOCAL002".into(),
            kind: ItemKind::Attachment,
            title,
            content_type: Some(
                if is_pdf { "application/pdf" } else { "application/octet-stream" }.into(),
            ),
            filename: Some(filename),
            link_mode: Some(LinkMode::LinkedFile),
            parent_id: Some(1),
        };

        Self {
            items: vec![parent, attachment],
            selected: vec![SnapshotSelection::Id(1)],
            paths: BTreeMap::from([(2, path.to_path_buf())]),
            ..Self::default()
        }
    }

    /// Parse a snapshot from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ── MemoryLibrary ────────────────────────────────────────────────────────────

/// [`Library`] + [`AttachmentSource`] over a [`LibrarySnapshot`].
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    storage_dir: Option<PathBuf>,
    items: BTreeMap<ItemId, Item>,
    attachments: BTreeMap<ItemId, Vec<ItemId>>,
    paths: BTreeMap<ItemId, PathBuf>,
    data_uris: BTreeMap<ItemId, String>,
    selected: Mutex<Vec<SelectedEntry>>,
    reader: Mutex<Option<ItemId>>,
}

impl MemoryLibrary {
    pub fn new(snapshot: LibrarySnapshot) -> Self {
        Self {
            storage_dir: snapshot.storage_dir,
            items: snapshot.items.into_iter().map(|i| (i.id, i)).collect(),
            attachments: snapshot.attachments,
            paths: snapshot.paths,
            data_uris: snapshot.data_uris,
            selected: Mutex::new(snapshot.selected.into_iter().map(Into::into).collect()),
            reader: Mutex::new(snapshot.reader),
        }
    }

    /// Replace the active selection with whole entries.
    pub fn set_selection(&self, entries: Vec<SelectedEntry>) {
        *lock(&self.selected) = entries;
    }

    pub fn set_reader_item(&self, id: Option<ItemId>) {
        *lock(&self.reader) = id;
    }

    fn child_ids(&self, id: ItemId) -> Vec<ItemId> {
        self.items
            .values()
            .filter(|i| i.parent_id == Some(id))
            .map(|i| i.id)
            .collect()
    }
}

#[async_trait]
impl Library for MemoryLibrary {
    async fn item(&self, id: ItemId) -> Option<Item> {
        self.items.get(&id).cloned()
    }

    async fn selected(&self) -> Vec<SelectedEntry> {
        lock(&self.selected).clone()
    }

    async fn reader_item(&self) -> Option<ItemId> {
        *lock(&self.reader)
    }

    async fn attachments(&self, id: ItemId) -> Vec<ItemId> {
        if let Some(list) = self.attachments.get(&id) {
            return list.clone();
        }
        self.child_ids(id)
            .into_iter()
            .filter(|c| self.items.get(c).is_some_and(Item::is_attachment))
            .collect()
    }

    async fn children(&self, id: ItemId) -> Vec<ItemId> {
        self.child_ids(id)
    }

    async fn select_items(&self, ids: &[ItemId]) {
        debug!("Selecting items {:?}", ids);
        *lock(&self.selected) = ids.iter().copied().map(SelectedEntry::Id).collect();
    }
}

#[async_trait]
impl AttachmentSource for MemoryLibrary {
    async fn data_uri(&self, item: &Item) -> Option<String> {
        self.data_uris.get(&item.id).cloned()
    }

    async fn resolve_path(&self, item: &Item) -> Option<PathBuf> {
        if let Some(p) = self.paths.get(&item.id) {
            return Some(p.clone());
        }
        let stored = item.link_mode.is_some_and(LinkMode::is_stored);
        match (&self.storage_dir, &item.filename) {
            (Some(dir), Some(name)) if stored => Some(dir.join(&item.key).join(name)),
            _ => None,
        }
    }
}

// ── MemoryNotes ──────────────────────────────────────────────────────────────

/// [`NoteStore`] kept in memory. Ids start above every item id it is given.
#[derive(Debug)]
pub struct MemoryNotes {
    notes: Mutex<BTreeMap<ItemId, Note>>,
    next_id: Mutex<ItemId>,
}

impl MemoryNotes {
    pub fn new(first_id: ItemId) -> Self {
        Self {
            notes: Mutex::new(BTreeMap::new()),
            next_id: Mutex::new(first_id),
        }
    }

    pub fn with_notes(notes: Vec<Note>) -> Self {
        let first_id = notes.iter().map(|n| n.id + 1).max().unwrap_or(1_000);
        let store = Self::new(first_id);
        lock(&store.notes).extend(notes.into_iter().map(|n| (n.id, n)));
        store
    }

    pub fn len(&self) -> usize {
        lock(&self.notes).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryNotes {
    fn default() -> Self {
        Self::new(1_000)
    }
}

#[async_trait]
impl NoteStore for MemoryNotes {
    async fn notes_for(&self, parent_id: ItemId) -> Vec<Note> {
        lock(&self.notes)
            .values()
            .filter(|n| n.parent_id == parent_id)
            .cloned()
            .collect()
    }

    async fn note(&self, id: ItemId) -> Option<Note> {
        lock(&self.notes).get(&id).cloned()
    }

    async fn create_note(&self, parent_id: ItemId, html: &str, tags: &[String]) -> Result<Note, String> {
        let id = {
            let mut next = lock(&self.next_id);
            let id = *next;
            *next += 1;
            id
        };
        let note = Note {
            id,
            parent_id,
            html: html.to_string(),
            tags: tags.to_vec(),
            date_modified: Utc::now(),
        };
        lock(&self.notes).insert(id, note.clone());
        Ok(note)
    }

    async fn save_note(&self, note: &Note) -> Result<(), String> {
        let mut notes = lock(&self.notes);
        if !notes.contains_key(&note.id) {
            return Err(format!("note {} does not exist", note.id));
        }
        let mut saved = note.clone();
        saved.date_modified = Utc::now();
        notes.insert(note.id, saved);
        Ok(())
    }
}

// ── Preferences ──────────────────────────────────────────────────────────────

/// [`PreferenceStore`] kept in memory.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: Mutex::new(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// [`PreferenceStore`] persisted as a flat JSON object on disk.
#[derive(Debug)]
pub struct JsonPreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonPreferences {
    /// Load preferences from `path`; a missing file means no preferences yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| format!("{}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(format!("{}: {e}", path.display())),
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonPreferences {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value.to_string());
        let text = serde_json::to_string_pretty(&*values).map_err(|e| e.to_string())?;
        std::fs::write(&self.path, text).map_err(|e| format!("{}: {e}", self.path.display()))
    }
}
