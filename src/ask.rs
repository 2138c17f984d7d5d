//! End-to-end question flow.
//!
//! ```text
//! target ──▶ resolve PDF ──▶ encode ──▶ build request ──▶ POST ──▶ normalise
//! (item/selection) (input)  (encode)   (request)        (llm)   (normalize)
//! ```
//!
//! PDF lookup never fails the question: an item without a readable PDF is
//! asked about as text only, and the output says so. Pre-flight and transport
//! failures are returned as [`AskError`].

use crate::config::AskConfig;
use crate::error::AskError;
use crate::host::{Item, ItemId, Library};
use crate::pipeline::input::{self, PayloadLoader, ResolvedPdf};
use crate::pipeline::llm::{self, HttpBackend, ReqwestBackend, ResponsesClient};
use crate::pipeline::normalize::{normalize_response, NormalizedAnswer};
use crate::pipeline::request::build_request;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Which item a question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Whatever is selected, or open in the reader.
    #[default]
    Context,
    /// A specific item.
    Item(ItemId),
    /// Select the item in the active view first, then use the selection.
    Focus(ItemId),
}

/// One question.
#[derive(Debug, Clone)]
pub struct AskQuery {
    pub prompt: String,
    pub target: Target,
    pub api_key: String,
}

impl AskQuery {
    pub fn new(prompt: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            target: Target::Context,
            api_key: api_key.into(),
        }
    }

    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }
}

/// Summary of the attachment that was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachmentSummary {
    pub item_key: String,
    pub filename: String,
    pub approx_bytes: usize,
    pub looks_like_pdf: bool,
}

impl From<&ResolvedPdf> for AttachmentSummary {
    fn from(r: &ResolvedPdf) -> Self {
        Self {
            item_key: r.attachment.key.clone(),
            filename: r.payload.filename().to_string(),
            approx_bytes: r.payload.approx_decoded_bytes(),
            looks_like_pdf: r.payload.looks_like_pdf(),
        }
    }
}

/// Result of a successful question.
#[derive(Debug, Clone, Serialize)]
pub struct AskOutput {
    pub answer: NormalizedAnswer,
    /// Item the question was about, if one was found.
    pub item_key: Option<String>,
    pub attachment: Option<AttachmentSummary>,
    pub model: String,
    pub duration_ms: u64,
}

/// Ties the host, the payload loader and the HTTP client together.
pub struct Assistant<B = ReqwestBackend> {
    library: Arc<dyn Library>,
    loader: PayloadLoader,
    client: ResponsesClient<B>,
    config: AskConfig,
}

impl Assistant<ReqwestBackend> {
    /// Assistant talking to `config.endpoint` over `reqwest`.
    pub fn new(library: Arc<dyn Library>, loader: PayloadLoader, config: AskConfig) -> Self {
        let client = ResponsesClient::new(config.endpoint.clone());
        Self::with_client(library, loader, client, config)
    }
}

impl<B: HttpBackend> Assistant<B> {
    pub fn with_client(
        library: Arc<dyn Library>,
        loader: PayloadLoader,
        client: ResponsesClient<B>,
        config: AskConfig,
    ) -> Self {
        Self {
            library,
            loader,
            client,
            config,
        }
    }

    pub fn config(&self) -> &AskConfig {
        &self.config
    }

    pub fn library(&self) -> &Arc<dyn Library> {
        &self.library
    }

    pub fn client(&self) -> &ResponsesClient<B> {
        &self.client
    }

    /// Resolve the item a target refers to.
    pub async fn resolve_target(&self, target: Target) -> Option<Item> {
        match target {
            Target::Context => input::context_item(self.library.as_ref()).await,
            Target::Item(id) => self.library.item(id).await,
            Target::Focus(id) => input::focus_item(self.library.as_ref(), id).await,
        }
    }

    /// Find and read the PDF for a target without asking anything.
    pub async fn inspect(&self, target: Target) -> Option<ResolvedPdf> {
        let item = self.resolve_target(target).await?;
        self.loader.load_pdf(self.library.as_ref(), Some(&item)).await
    }

    /// Ask one question.
    pub async fn ask(&self, query: &AskQuery) -> Result<AskOutput, AskError> {
        let start = Instant::now();
        llm::preflight(&query.api_key, &query.prompt)?;

        // ── Step 1: Resolve the item ─────────────────────────────────────
        let item = self.resolve_target(query.target).await;
        match &item {
            Some(i) => debug!("Question about {} ({})", i.key, i.title),
            None => debug!("No item in context; asking without attachment"),
        }

        // ── Step 2: Locate and read the PDF ──────────────────────────────
        let pdf = match (&item, self.config.attach_pdf) {
            (Some(i), true) => self.loader.load_pdf(self.library.as_ref(), Some(i)).await,
            _ => None,
        };
        let attachment = pdf.as_ref().map(AttachmentSummary::from);
        if self.config.attach_pdf && pdf.is_none() {
            info!("No readable PDF; sending text only");
        }

        // ── Step 3: Build and send ───────────────────────────────────────
        let files = pdf.map(|r| vec![r.payload]).unwrap_or_default();
        let request = build_request(
            &query.prompt,
            self.config.effective_system_prompt(),
            files,
            &self.config,
        );
        let raw = self.client.send(request, &query.api_key).await?;

        // ── Step 4: Normalise ────────────────────────────────────────────
        let answer = normalize_response(&raw);
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Answer via {} ({} chars) in {}ms",
            answer.source,
            answer.text.len(),
            duration_ms
        );

        Ok(AskOutput {
            answer,
            item_key: item.map(|i| i.key),
            attachment,
            model: self.config.model.clone(),
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::host::memory::{LibrarySnapshot, MemoryLibrary, SnapshotSelection};
    use crate::host::{ItemKind, LinkMode};
    use crate::pipeline::llm::HttpReply;
    use crate::pipeline::normalize::SourceTag;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Value>>);

    #[async_trait]
    impl HttpBackend for Arc<Recorder> {
        async fn post_json(&self, _url: &str, _key: &str, body: &Value) -> Result<HttpReply, BoxError> {
            self.0.lock().unwrap().push(body.clone());
            Ok(HttpReply {
                status: 200,
                status_text: "OK".into(),
                body: r#"{"output_text":"An answer."}"#.into(),
            })
        }
    }

    fn paper(id: ItemId, key: &str) -> Item {
        Item {
            id,
            key: key.into(),
            kind: ItemKind::Regular,
            title: format!("Paper {id}"),
            content_type: None,
            filename: None,
            link_mode: None,
            parent_id: None,
        }
    }

    fn pdf(id: ItemId, key: &str, parent: ItemId) -> Item {
        Item {
            id,
            key: key.into(),
            kind: ItemKind::Attachment,
            title: String::new(),
            content_type: Some("application/pdf".into()),
            filename: Some(format!("{key}.pdf")),
            link_mode: Some(LinkMode::ImportedFile),
            parent_id: Some(parent),
        }
    }

    /// Papers 1 and 3; only paper 1 has a PDF, inlined as a data URI.
    fn library() -> Arc<MemoryLibrary> {
        Arc::new(MemoryLibrary::new(LibrarySnapshot {
            items: vec![paper(1, "PAPER001"), pdf(2, "FILE0002", 1), paper(3, "PAPER003")],
            selected: vec![SnapshotSelection::Id(1)],
            data_uris: BTreeMap::from([(2, "data:application/pdf;base64,JVBERi0xLjQK".to_string())]),
            ..LibrarySnapshot::default()
        }))
    }

    fn assistant(lib: Arc<MemoryLibrary>, config: AskConfig) -> (Assistant<Arc<Recorder>>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let assistant = Assistant::with_client(
            lib.clone(),
            PayloadLoader::new(lib),
            ResponsesClient::with_backend(recorder.clone(), "http://test"),
            config,
        );
        (assistant, recorder)
    }

    #[tokio::test]
    async fn context_prefers_selection_then_reader() {
        let lib = library();
        let (assistant, _) = assistant(lib.clone(), AskConfig::default());
        let item = assistant.resolve_target(Target::Context).await.unwrap();
        assert_eq!(item.key, "PAPER001");

        lib.set_selection(Vec::new());
        lib.set_reader_item(Some(3));
        let item = assistant.resolve_target(Target::Context).await.unwrap();
        assert_eq!(item.key, "PAPER003");

        lib.set_reader_item(None);
        assert!(assistant.resolve_target(Target::Context).await.is_none());
    }

    #[tokio::test]
    async fn item_target_ignores_selection() {
        let (assistant, _) = assistant(library(), AskConfig::default());
        let item = assistant.resolve_target(Target::Item(3)).await.unwrap();
        assert_eq!(item.key, "PAPER003");
        assert!(assistant.resolve_target(Target::Item(99)).await.is_none());
    }

    #[tokio::test]
    async fn focus_target_moves_the_selection() {
        let lib = library();
        let (assistant, _) = assistant(lib.clone(), AskConfig::default());
        let item = assistant.resolve_target(Target::Focus(3)).await.unwrap();
        assert_eq!(item.key, "PAPER003");
        assert_eq!(lib.selected().await, vec![crate::host::SelectedEntry::Id(3)]);
    }

    #[tokio::test]
    async fn inspect_finds_pdf_of_selected_paper() {
        let (assistant, _) = assistant(library(), AskConfig::default());
        let resolved = assistant.inspect(Target::Context).await.unwrap();
        assert_eq!(resolved.attachment.key, "FILE0002");
        assert_eq!(resolved.payload.filename(), "FILE0002.pdf");
        assert!(resolved.payload.looks_like_pdf());
        assert!(assistant.inspect(Target::Item(3)).await.is_none());
    }

    #[tokio::test]
    async fn ask_attaches_pdf_when_found() {
        let (assistant, recorder) = assistant(library(), AskConfig::default());
        let out = assistant.ask(&AskQuery::new("What is it?", "sk-test")).await.unwrap();
        assert_eq!(out.answer.text, "An answer.");
        assert_eq!(out.answer.source, SourceTag::OutputText);
        assert_eq!(out.item_key.as_deref(), Some("PAPER001"));
        assert_eq!(out.attachment.as_ref().map(|a| a.item_key.as_str()), Some("FILE0002"));

        let bodies = recorder.0.lock().unwrap();
        assert!(bodies[0].to_string().contains("input_file"));
    }

    #[tokio::test]
    async fn ask_without_pdf_sends_text_only() {
        let config = AskConfig::builder().attach_pdf(false).build().unwrap();
        let (assistant, recorder) = assistant(library(), config);
        let out = assistant.ask(&AskQuery::new("What is it?", "sk-test")).await.unwrap();
        assert!(out.attachment.is_none());
        assert_eq!(out.item_key.as_deref(), Some("PAPER001"));
        assert!(!recorder.0.lock().unwrap()[0].to_string().contains("input_file"));
    }

    #[tokio::test]
    async fn preflight_failure_sends_nothing() {
        let (assistant, recorder) = assistant(library(), AskConfig::default());
        let err = assistant.ask(&AskQuery::new("What is it?", "  ")).await.unwrap_err();
        assert!(matches!(err, AskError::Auth));
        assert!(recorder.0.lock().unwrap().is_empty());
    }
}
