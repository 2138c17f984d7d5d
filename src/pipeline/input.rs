//! Attachment resolution: from a library item (or the current selection) to
//! a readable PDF payload.
//!
//! ## Selection order
//!
//! 1. The item itself, if it is a PDF attachment.
//! 2. Otherwise its top-level container. A standalone non-PDF attachment has
//!    nowhere further to look and yields `NotFound`.
//! 3. PDFs in the container's formal attachment list.
//! 4. PDFs among the container's direct children (some host versions leave
//!    the formal list incomplete).
//!
//! ## Acquisition
//!
//! [`PayloadLoader::acquire`] tries the host's inline data URI first, then
//! resolves a filesystem path and hands it to each configured
//! [`BinaryReader`] in turn (native `tokio::fs` first, then a host binary-read
//! API when one was supplied at construction).
//!
//! Every failure here is an [`AttachmentError`]. The top-level entry points
//! ([`locate_pdf`], [`PayloadLoader::load_pdf`]) log them and return `None`
//! so the question can still go out as text only.

use crate::error::AttachmentError;
use crate::host::{AttachmentSource, BinaryReader, Item, ItemId, Library, NativeFileReader, SelectedEntry};
use crate::pipeline::encode::Base64Payload;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Pause after programmatically changing the selection so the host view can
/// catch up before we read it back.
pub const SELECTION_SETTLE: Duration = Duration::from_millis(50);

const PDF_MIME: &str = "application/pdf";

/// A PDF attachment together with its validated payload.
#[derive(Debug, Clone)]
pub struct ResolvedPdf {
    pub attachment: Item,
    pub payload: Base64Payload,
}

// ── Context ──────────────────────────────────────────────────────────────────

/// The item the user is looking at: selection first, then the reader tab.
///
/// Numeric ids in the selection are preferred over embedded item objects.
/// An empty context is `None`, not an error.
pub async fn context_item(library: &dyn Library) -> Option<Item> {
    let selected = library.selected().await;

    for entry in &selected {
        if let SelectedEntry::Id(id) = entry {
            if let Some(item) = library.item(*id).await {
                debug!("Context from selected id {}", id);
                return Some(item);
            }
        }
    }
    for entry in selected {
        if let SelectedEntry::Item(item) = entry {
            debug!("Context from selected object {}", item.key);
            return Some(item);
        }
    }

    let reader_id = library.reader_item().await?;
    let item = library.item(reader_id).await;
    if item.is_some() {
        debug!("Context from reader item {}", reader_id);
    }
    item
}

/// Select `id` in the active view, give the view a moment, then read the
/// selection context back.
pub async fn focus_item(library: &dyn Library, id: ItemId) -> Option<Item> {
    library.select_items(&[id]).await;
    sleep(SELECTION_SETTLE).await;
    context_item(library).await
}

// ── Candidate search ─────────────────────────────────────────────────────────

/// All PDF attachments reachable from `item`, in priority order.
pub async fn pdf_candidates(
    library: &dyn Library,
    item: &Item,
) -> Result<Vec<Item>, AttachmentError> {
    if item.is_pdf_attachment() {
        return Ok(vec![item.clone()]);
    }

    let container = match item.parent_id {
        Some(parent_id) => library
            .item(parent_id)
            .await
            .ok_or_else(|| not_found(item))?,
        None => item.clone(),
    };
    if container.is_attachment() {
        return Err(not_found(item));
    }

    let mut candidates: Vec<Item> = Vec::new();

    for id in library.attachments(container.id).await {
        if let Some(att) = library.item(id).await {
            if att.is_pdf_attachment() {
                candidates.push(att);
            }
        }
    }

    for id in library.children(container.id).await {
        if candidates.iter().any(|c| c.id == id) {
            continue;
        }
        if let Some(child) = library.item(id).await {
            if child.is_pdf_attachment() {
                debug!("PDF {} found via children, not attachment list", child.key);
                candidates.push(child);
            }
        }
    }

    if candidates.is_empty() {
        return Err(not_found(&container));
    }
    Ok(candidates)
}

/// First PDF attachment reachable from `item`.
pub async fn find_pdf_attachment(
    library: &dyn Library,
    item: &Item,
) -> Result<Item, AttachmentError> {
    pdf_candidates(library, item)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| not_found(item))
}

/// Resolve the PDF for `item`, or for the current context when `None`.
///
/// Never fails: no context or no PDF is `None`.
pub async fn locate_pdf(library: &dyn Library, item: Option<&Item>) -> Option<Item> {
    let owned;
    let item = match item {
        Some(item) => item,
        None => {
            owned = context_item(library).await?;
            &owned
        }
    };
    match find_pdf_attachment(library, item).await {
        Ok(att) => Some(att),
        Err(e) => {
            info!("{}", e);
            None
        }
    }
}

fn not_found(item: &Item) -> AttachmentError {
    AttachmentError::NotFound {
        item: item.key.clone(),
    }
}

// ── Payload acquisition ──────────────────────────────────────────────────────

/// Reads attachment bytes through whichever host capabilities are available.
#[derive(Clone)]
pub struct PayloadLoader {
    source: Arc<dyn AttachmentSource>,
    readers: Vec<Arc<dyn BinaryReader>>,
}

impl PayloadLoader {
    /// Loader using the native file reader only.
    pub fn new(source: Arc<dyn AttachmentSource>) -> Self {
        Self {
            source,
            readers: vec![Arc::new(NativeFileReader)],
        }
    }

    /// Loader that falls back to a host binary-read API after the native reader.
    pub fn with_host_reader(source: Arc<dyn AttachmentSource>, host: Arc<dyn BinaryReader>) -> Self {
        let mut loader = Self::new(source);
        loader.readers.push(host);
        loader
    }

    /// Loader with an explicit reader chain, tried in order.
    pub fn with_readers(source: Arc<dyn AttachmentSource>, readers: Vec<Arc<dyn BinaryReader>>) -> Self {
        Self { source, readers }
    }

    /// Obtain a validated payload for one attachment.
    pub async fn acquire(&self, attachment: &Item) -> Result<Base64Payload, AttachmentError> {
        let filename = attachment.display_filename();
        let mime = attachment
            .content_type
            .clone()
            .unwrap_or_else(|| PDF_MIME.to_string());

        if let Some(uri) = self.source.data_uri(attachment).await {
            match Base64Payload::from_data_uri(&uri, filename.clone()) {
                Ok(payload) if payload.base64().is_empty() => {
                    warn!("Data URI for {} is empty; trying file path", attachment.key);
                }
                Ok(payload) => {
                    if attachment.is_pdf_attachment() && !payload.looks_like_pdf() {
                        warn!(
                            "Attachment {} claims PDF but data URI lacks %PDF- header; sending anyway",
                            attachment.key
                        );
                    }
                    debug!("Attachment {} read from data URI", attachment.key);
                    return Ok(payload);
                }
                Err(e) => {
                    warn!("Data URI for {} unusable ({}); trying file path", attachment.key, e);
                }
            }
        }

        let path = self
            .source
            .resolve_path(attachment)
            .await
            .ok_or_else(|| AttachmentError::Io {
                key: attachment.key.clone(),
                detail: "no file path".into(),
            })?;

        let mut failures = Vec::new();
        for reader in &self.readers {
            match reader.read(&path).await {
                Ok(bytes) if bytes.is_empty() => {
                    failures.push(format!("{}: empty file", reader.name()));
                }
                Ok(bytes) => {
                    debug!(
                        "Attachment {} read via {} reader: {} bytes from {}",
                        attachment.key,
                        reader.name(),
                        bytes.len(),
                        path.display()
                    );
                    let payload = Base64Payload::from_bytes(&bytes, mime.clone(), filename.clone())?;
                    if payload.pdf_magic_mismatch() {
                        warn!(
                            "Attachment {} claims PDF but file lacks %PDF- header; sending anyway",
                            attachment.key
                        );
                    }
                    return Ok(payload);
                }
                Err(e) => failures.push(format!("{}: {}", reader.name(), e)),
            }
        }

        Err(AttachmentError::Io {
            key: attachment.key.clone(),
            detail: if failures.is_empty() {
                format!("no reader available for {}", path.display())
            } else {
                format!("{} ({})", path.display(), failures.join("; "))
            },
        })
    }

    /// Find and read a PDF for `item` (or the current context).
    ///
    /// Candidates are tried in priority order; the first readable one wins.
    /// Never fails: nothing readable is `None`.
    pub async fn load_pdf(&self, library: &dyn Library, item: Option<&Item>) -> Option<ResolvedPdf> {
        let owned;
        let item = match item {
            Some(item) => item,
            None => {
                owned = context_item(library).await?;
                &owned
            }
        };

        let candidates = match pdf_candidates(library, item).await {
            Ok(c) => c,
            Err(e) => {
                info!("{}", e);
                return None;
            }
        };

        for attachment in candidates {
            match self.acquire(&attachment).await {
                Ok(payload) => {
                    info!(
                        "Using PDF {} ({}, ~{} bytes)",
                        attachment.key,
                        payload.filename(),
                        payload.approx_decoded_bytes()
                    );
                    return Some(ResolvedPdf { attachment, payload });
                }
                Err(e) => warn!("Skipping attachment {}: {}", attachment.key, e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::{LibrarySnapshot, MemoryLibrary};
    use crate::host::{ItemKind, LinkMode};
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    fn regular(id: ItemId, key: &str) -> Item {
        Item {
            id,
            key: key.into(),
            kind: ItemKind::Regular,
            title: format!("Item {id}"),
            content_type: None,
            filename: None,
            link_mode: None,
            parent_id: None,
        }
    }

    fn attachment(id: ItemId, key: &str, mime: &str, parent: Option<ItemId>) -> Item {
        Item {
            id,
            key: key.into(),
            kind: ItemKind::Attachment,
            title: String::new(),
            content_type: Some(mime.into()),
            filename: Some(format!("{key}.bin")),
            link_mode: Some(LinkMode::ImportedFile),
            parent_id: parent,
        }
    }

    fn library(items: Vec<Item>) -> MemoryLibrary {
        MemoryLibrary::new(LibrarySnapshot {
            items,
            ..LibrarySnapshot::default()
        })
    }

    #[tokio::test]
    async fn picks_pdf_from_attachment_list() {
        let lib = library(vec![
            regular(1, "PARENT"),
            attachment(2, "TXT", "text/plain", Some(1)),
            attachment(3, "X", "application/pdf", Some(1)),
        ]);
        let parent = lib.item(1).await.unwrap();
        assert_eq!(find_pdf_attachment(&lib, &parent).await.unwrap().key, "X");
    }

    #[tokio::test]
    async fn pdf_attachment_resolves_to_itself() {
        let lib = library(vec![regular(1, "P"), attachment(2, "SELF", "APPLICATION/PDF", Some(1))]);
        let att = lib.item(2).await.unwrap();
        assert_eq!(find_pdf_attachment(&lib, &att).await.unwrap().key, "SELF");
    }

    #[tokio::test]
    async fn sibling_pdf_found_from_non_pdf_attachment() {
        let lib = library(vec![
            regular(1, "P"),
            attachment(2, "HTML", "text/html", Some(1)),
            attachment(3, "PDF", "application/pdf", Some(1)),
        ]);
        let html = lib.item(2).await.unwrap();
        assert_eq!(find_pdf_attachment(&lib, &html).await.unwrap().key, "PDF");
    }

    #[tokio::test]
    async fn standalone_non_pdf_attachment_is_not_found() {
        let lib = library(vec![attachment(5, "LONE", "text/plain", None)]);
        let lone = lib.item(5).await.unwrap();
        let err = find_pdf_attachment(&lib, &lone).await.unwrap_err();
        assert!(matches!(err, AttachmentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn children_cover_incomplete_attachment_list() {
        let lib = MemoryLibrary::new(LibrarySnapshot {
            items: vec![
                regular(1, "P"),
                attachment(2, "TXT", "text/plain", Some(1)),
                attachment(3, "HIDDEN", "application/pdf", Some(1)),
            ],
            attachments: BTreeMap::from([(1, vec![2])]),
            ..LibrarySnapshot::default()
        });
        let parent = lib.item(1).await.unwrap();
        assert_eq!(find_pdf_attachment(&lib, &parent).await.unwrap().key, "HIDDEN");
    }

    #[tokio::test]
    async fn empty_container_yields_no_candidate() {
        let lib = library(vec![regular(1, "EMPTY")]);
        let parent = lib.item(1).await.unwrap();
        assert!(locate_pdf(&lib, Some(&parent)).await.is_none());
    }

    #[tokio::test]
    async fn empty_context_yields_nothing() {
        let lib = library(vec![regular(1, "P")]);
        assert!(context_item(&lib).await.is_none());
        assert!(locate_pdf(&lib, None).await.is_none());
    }

    #[tokio::test]
    async fn context_prefers_ids_then_objects_then_reader() {
        let lib = library(vec![regular(1, "ONE"), regular(2, "TWO"), regular(3, "THREE")]);
        lib.set_selection(vec![SelectedEntry::Item(regular(2, "TWO")), SelectedEntry::Id(1)]);
        assert_eq!(context_item(&lib).await.unwrap().key, "ONE");

        lib.set_selection(vec![SelectedEntry::Item(regular(2, "TWO"))]);
        assert_eq!(context_item(&lib).await.unwrap().key, "TWO");

        lib.set_selection(vec![]);
        lib.set_reader_item(Some(3));
        assert_eq!(context_item(&lib).await.unwrap().key, "THREE");
    }

    #[tokio::test]
    async fn focus_selects_then_reads_back() {
        let lib = library(vec![regular(1, "ONE"), regular(7, "SEVEN")]);
        assert_eq!(focus_item(&lib, 7).await.unwrap().key, "SEVEN");
        assert_eq!(lib.selected().await, vec![SelectedEntry::Id(7)]);
    }

    struct FailingReader;

    #[async_trait::async_trait]
    impl BinaryReader for FailingReader {
        fn name(&self) -> &str {
            "failing"
        }

        async fn read(&self, _path: &Path) -> std::io::Result<Vec<u8>> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "nope"))
        }
    }

    struct FixedReader(Vec<u8>);

    #[async_trait::async_trait]
    impl BinaryReader for FixedReader {
        fn name(&self) -> &str {
            "host"
        }

        async fn read(&self, _path: &Path) -> std::io::Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    fn pdf_lib(paths: BTreeMap<ItemId, PathBuf>, data_uris: BTreeMap<ItemId, String>) -> Arc<MemoryLibrary> {
        Arc::new(MemoryLibrary::new(LibrarySnapshot {
            items: vec![regular(1, "P"), attachment(2, "PDF", "application/pdf", Some(1))],
            paths,
            data_uris,
            ..LibrarySnapshot::default()
        }))
    }

    #[tokio::test]
    async fn data_uri_path_wins() {
        let lib = pdf_lib(
            BTreeMap::new(),
            BTreeMap::from([(2, "data:application/pdf;base64,JVBERi0xLjQK".to_string())]),
        );
        let loader = PayloadLoader::new(lib.clone());
        let att = lib.item(2).await.unwrap();
        let payload = loader.acquire(&att).await.unwrap();
        assert_eq!(payload.base64(), "JVBERi0xLjQK");
        assert!(payload.looks_like_pdf());
    }

    #[tokio::test]
    async fn bad_data_uri_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"%PDF-1.5\nbody").unwrap();

        let lib = pdf_lib(
            BTreeMap::from([(2, path)]),
            BTreeMap::from([(2, "data:application/pdf;base64,@@@@".to_string())]),
        );
        let loader = PayloadLoader::new(lib.clone());
        let att = lib.item(2).await.unwrap();
        let payload = loader.acquire(&att).await.unwrap();
        assert!(payload.looks_like_pdf());
        assert_eq!(payload.approx_decoded_bytes(), 13);
    }

    #[tokio::test]
    async fn host_reader_used_when_native_fails() {
        let lib = pdf_lib(BTreeMap::from([(2, PathBuf::from("/nonexistent/x.pdf"))]), BTreeMap::new());
        let loader = PayloadLoader::with_host_reader(lib.clone(), Arc::new(FixedReader(b"%PDF-2.0".to_vec())));
        let att = lib.item(2).await.unwrap();
        assert!(loader.acquire(&att).await.unwrap().looks_like_pdf());
    }

    #[tokio::test]
    async fn no_reader_succeeds_is_io_error() {
        let lib = pdf_lib(BTreeMap::from([(2, PathBuf::from("/nonexistent/x.pdf"))]), BTreeMap::new());
        let loader = PayloadLoader::with_readers(lib.clone(), vec![Arc::new(FailingReader)]);
        let att = lib.item(2).await.unwrap();
        let err = loader.acquire(&att).await.unwrap_err();
        assert!(matches!(err, AttachmentError::Io { ref detail, .. } if detail.contains("failing")));
    }

    #[tokio::test]
    async fn no_path_is_io_error() {
        let lib = pdf_lib(BTreeMap::new(), BTreeMap::new());
        let loader = PayloadLoader::new(lib.clone());
        let att = lib.item(2).await.unwrap();
        assert!(matches!(loader.acquire(&att).await, Err(AttachmentError::Io { .. })));
    }

    #[tokio::test]
    async fn load_pdf_skips_unreadable_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        std::fs::write(&good, b"%PDF-1.4 ok").unwrap();

        let lib = Arc::new(MemoryLibrary::new(LibrarySnapshot {
            items: vec![
                regular(1, "P"),
                attachment(2, "BROKEN", "application/pdf", Some(1)),
                attachment(3, "GOOD", "application/pdf", Some(1)),
            ],
            paths: BTreeMap::from([(3, good)]),
            ..LibrarySnapshot::default()
        }));
        let loader = PayloadLoader::new(lib.clone());
        let parent = lib.item(1).await.unwrap();
        let resolved = loader.load_pdf(&*lib, Some(&parent)).await.unwrap();
        assert_eq!(resolved.attachment.key, "GOOD");
    }

    #[tokio::test]
    async fn empty_data_uri_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"%PDF-1.6\nreal").unwrap();

        let lib = pdf_lib(
            BTreeMap::from([(2, path)]),
            BTreeMap::from([(2, "data:application/pdf;base64,".to_string())]),
        );
        let loader = PayloadLoader::new(lib.clone());
        let att = lib.item(2).await.unwrap();
        let payload = loader.acquire(&att).await.unwrap();
        assert!(payload.is_well_formed());
        assert_eq!(payload.approx_decoded_bytes(), 13);
    }

    #[tokio::test]
    async fn empty_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.pdf");
        std::fs::write(&path, b"").unwrap();

        let lib = pdf_lib(BTreeMap::from([(2, path)]), BTreeMap::new());
        let loader = PayloadLoader::new(lib.clone());
        let att = lib.item(2).await.unwrap();
        let err = loader.acquire(&att).await.unwrap_err();
        assert!(matches!(err, AttachmentError::Io { ref detail, .. } if detail.contains("empty file")));
    }

    #[tokio::test]
    async fn empty_candidate_is_skipped_for_next_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let zero = dir.path().join("zero.pdf");
        let good = dir.path().join("good.pdf");
        std::fs::write(&zero, b"").unwrap();
        std::fs::write(&good, b"%PDF-1.4 ok").unwrap();

        let lib = Arc::new(MemoryLibrary::new(LibrarySnapshot {
            items: vec![
                regular(1, "P"),
                attachment(2, "EMPTY", "application/pdf", Some(1)),
                attachment(3, "GOOD", "application/pdf", Some(1)),
            ],
            paths: BTreeMap::from([(2, zero), (3, good)]),
            data_uris: BTreeMap::from([(2, "data:application/pdf;base64,".to_string())]),
            ..LibrarySnapshot::default()
        }));
        let loader = PayloadLoader::new(lib.clone());
        let parent = lib.item(1).await.unwrap();
        let resolved = loader.load_pdf(&*lib, Some(&parent)).await.unwrap();
        assert_eq!(resolved.attachment.key, "GOOD");
        assert!(resolved.payload.is_well_formed());
    }

    #[tokio::test]
    async fn load_pdf_all_fail_is_none() {
        let lib = pdf_lib(BTreeMap::new(), BTreeMap::new());
        let loader = PayloadLoader::new(lib.clone());
        let parent = lib.item(1).await.unwrap();
        assert!(loader.load_pdf(&*lib, Some(&parent)).await.is_none());
    }
}
