//! Composer controller: the prompt box attached to a chat note.
//!
//! Lifecycle is `new → attach(view) → … → dispose`. The controller owns the
//! active chat note and the in-flight flag; a second submit while one is
//! running is ignored. Output always lands in the attached view, errors as
//! `Error: <details>`.

use crate::ask::{AskOutput, AskQuery, Assistant, Target};
use crate::error::AskError;
use crate::host::{Item, Note, NoteStore, Notifier};
use crate::notes::{ChatExchange, ChatThreads};
use crate::pipeline::llm::{HttpBackend, ReqwestBackend};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Text shown in the output field while a request is running.
pub const PENDING_TEXT: &str = "Thinking…";

/// The widgets a composer drives.
pub trait ComposerView: Send + Sync {
    fn set_output(&self, text: &str);
    /// Disable or re-enable the submit control.
    fn set_busy(&self, busy: bool);
}

/// What a submit did.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Another request was in flight, or the composer is not attached.
    Ignored,
    Answered(Box<AskOutput>),
    /// The displayed error text.
    Failed(String),
}

pub struct Composer<B = ReqwestBackend> {
    assistant: Arc<Assistant<B>>,
    notes: Arc<dyn NoteStore>,
    notifier: Option<Arc<dyn Notifier>>,
    view: Mutex<Option<Arc<dyn ComposerView>>>,
    active_note: Mutex<Option<Note>>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag and re-enables the view on every exit path.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    view: Arc<dyn ComposerView>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.view.set_busy(false);
        self.flag.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: HttpBackend> Composer<B> {
    pub fn new(assistant: Arc<Assistant<B>>, notes: Arc<dyn NoteStore>) -> Self {
        Self {
            assistant,
            notes,
            notifier: None,
            view: Mutex::new(None),
            active_note: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn attach(&self, view: Arc<dyn ComposerView>) {
        *lock(&self.view) = Some(view);
    }

    /// Detach the view and forget the active note.
    pub fn dispose(&self) {
        lock(&self.view).take();
        lock(&self.active_note).take();
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.view).is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn active_note(&self) -> Option<Note> {
        lock(&self.active_note).clone()
    }

    pub fn set_active_note(&self, note: Option<Note>) {
        *lock(&self.active_note) = note;
    }

    /// Make the latest chat thread of `owner` active, creating one if needed.
    pub async fn open_thread(&self, owner: &Item) -> Result<Note, AskError> {
        let note = ChatThreads::new(&*self.notes).open_or_create(owner).await?;
        self.set_active_note(Some(note.clone()));
        Ok(note)
    }

    /// Start a new chat thread for `owner` and make it active.
    pub async fn new_thread(&self, owner: &Item, now: DateTime<Utc>) -> Result<Note, AskError> {
        let note = ChatThreads::new(&*self.notes).new_thread(owner, now).await?;
        self.set_active_note(Some(note.clone()));
        Ok(note)
    }

    /// Ask `prompt` about the active note's parent (or the current context).
    pub async fn submit(&self, prompt: &str, api_key: &str) -> SubmitOutcome {
        let Some(view) = lock(&self.view).clone() else {
            debug!("Submit on a detached composer ignored");
            return SubmitOutcome::Ignored;
        };
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Submit ignored: request already in flight");
            return SubmitOutcome::Ignored;
        }
        view.set_busy(true);
        let _guard = InFlightGuard {
            flag: &self.in_flight,
            view: Arc::clone(&view),
        };
        view.set_output(PENDING_TEXT);

        let note = self.active_note();
        let target = note
            .as_ref()
            .map_or(Target::Context, |n| Target::Focus(n.parent_id));
        let query = AskQuery::new(prompt, api_key).target(target);

        let output = match self.assistant.ask(&query).await {
            Ok(output) => output,
            Err(e) => {
                let text = format!("Error: {e}");
                view.set_output(&text);
                return SubmitOutcome::Failed(text);
            }
        };
        view.set_output(&output.answer.text);

        if let Some(note) = note {
            let exchange = ChatExchange {
                prompt: prompt.trim().to_string(),
                answer: output.answer.text.clone(),
                model: output.model.clone(),
                attachment: output.attachment.as_ref().map(|a| a.filename.clone()),
                at: Utc::now(),
            };
            match ChatThreads::new(&*self.notes).append(note.id, &exchange).await {
                Ok(saved) => self.set_active_note(Some(saved)),
                Err(e) => {
                    warn!("Could not save exchange: {}", e);
                    if let Some(ref n) = self.notifier {
                        n.notify(&format!("Answer not saved: {e}"));
                    }
                }
            }
        }

        SubmitOutcome::Answered(Box::new(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AskConfig;
    use crate::error::BoxError;
    use crate::host::memory::{LibrarySnapshot, MemoryLibrary, MemoryNotes};
    use crate::host::ItemKind;
    use crate::notes::chat_blocks;
    use crate::pipeline::input::PayloadLoader;
    use crate::pipeline::llm::{HttpReply, ResponsesClient};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingView {
        outputs: Mutex<Vec<String>>,
        busy: Mutex<Vec<bool>>,
    }

    impl ComposerView for RecordingView {
        fn set_output(&self, text: &str) {
            self.outputs.lock().unwrap().push(text.to_string());
        }
        fn set_busy(&self, busy: bool) {
            self.busy.lock().unwrap().push(busy);
        }
    }

    impl RecordingView {
        fn last_output(&self) -> String {
            self.outputs.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    /// Replies with a fixed body, optionally after `release` is notified.
    struct Gate {
        status: u16,
        body: String,
        release: Option<Arc<Notify>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpBackend for Gate {
        async fn post_json(&self, _url: &str, _key: &str, _body: &Value) -> Result<HttpReply, BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ref n) = self.release {
                n.notified().await;
            }
            Ok(HttpReply {
                status: self.status,
                status_text: "Status".into(),
                body: self.body.clone(),
            })
        }
    }

    fn paper() -> Item {
        Item {
            id: 1,
            key: "PAPER001".into(),
            kind: ItemKind::Regular,
            title: "A Paper".into(),
            content_type: None,
            filename: None,
            link_mode: None,
            parent_id: None,
        }
    }

    fn composer(gate: Gate) -> (Composer<Gate>, Arc<MemoryNotes>) {
        let library = Arc::new(MemoryLibrary::new(LibrarySnapshot {
            items: vec![paper()],
            ..LibrarySnapshot::default()
        }));
        let loader = PayloadLoader::new(library.clone());
        let client = ResponsesClient::with_backend(gate, "http://test");
        let assistant = Assistant::with_client(library, loader, client, AskConfig::default());
        let notes = Arc::new(MemoryNotes::default());
        (Composer::new(Arc::new(assistant), notes.clone()), notes)
    }

    fn gate(status: u16, body: &str) -> Gate {
        Gate {
            status,
            body: body.into(),
            release: None,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn detached_composer_ignores_submit() {
        let (composer, _) = composer(gate(200, r#"{"output_text":"hi"}"#));
        assert!(matches!(composer.submit("q", "sk-x").await, SubmitOutcome::Ignored));
    }

    #[tokio::test]
    async fn answer_is_shown_and_saved_to_active_note() {
        let (composer, notes) = composer(gate(200, r#"{"output_text":"**42**"}"#));
        let view = Arc::new(RecordingView::default());
        composer.attach(view.clone());
        composer.open_thread(&paper()).await.unwrap();

        let outcome = composer.submit("What is the answer?", "sk-x").await;
        assert!(matches!(outcome, SubmitOutcome::Answered(_)));
        assert_eq!(view.last_output(), "**42**");
        assert_eq!(*view.busy.lock().unwrap(), vec![true, false]);
        assert!(!composer.is_busy());

        let note = composer.active_note().unwrap();
        let stored = notes.note(note.id).await.unwrap();
        let blocks = chat_blocks(&stored.html);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].contains("<strong>42</strong>"));
    }

    #[tokio::test]
    async fn failure_is_displayed_and_flag_restored() {
        let (composer, notes) = composer(gate(401, r#"{"error":{"message":"bad key"}}"#));
        let view = Arc::new(RecordingView::default());
        composer.attach(view.clone());
        composer.open_thread(&paper()).await.unwrap();

        match composer.submit("q", "sk-x").await {
            SubmitOutcome::Failed(text) => assert_eq!(text, "Error: bad key"),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(view.last_output(), "Error: bad key");
        assert!(!composer.is_busy());
        let note = composer.active_note().unwrap();
        assert!(chat_blocks(&notes.note(note.id).await.unwrap().html).is_empty());
    }

    #[tokio::test]
    async fn missing_key_never_reaches_network() {
        let (composer, _) = composer(gate(200, "{}"));
        let view = Arc::new(RecordingView::default());
        composer.attach(view.clone());
        let outcome = composer.submit("q", "").await;
        assert!(matches!(outcome, SubmitOutcome::Failed(ref t) if t.starts_with("Error: Missing API key")));
        assert_eq!(composer.assistant.client().backend().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_submit_while_in_flight_is_ignored() {
        let release = Arc::new(Notify::new());
        let mut g = gate(200, r#"{"output_text":"done"}"#);
        g.release = Some(release.clone());
        let (composer, _) = composer(g);
        let composer = Arc::new(composer);
        let view = Arc::new(RecordingView::default());
        composer.attach(view.clone());

        let first = {
            let c = Arc::clone(&composer);
            tokio::spawn(async move { c.submit("first", "sk-x").await })
        };
        while !composer.is_busy() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(composer.submit("second", "sk-x").await, SubmitOutcome::Ignored));

        release.notify_one();
        assert!(matches!(first.await.unwrap(), SubmitOutcome::Answered(_)));
        assert_eq!(composer.assistant.client().backend().calls.load(Ordering::SeqCst), 1);
        assert!(!composer.is_busy());
    }

    #[tokio::test]
    async fn dispose_detaches_and_forgets_note() {
        let (composer, _) = composer(gate(200, "{}"));
        composer.attach(Arc::new(RecordingView::default()));
        composer.open_thread(&paper()).await.unwrap();
        composer.dispose();
        assert!(!composer.is_attached());
        assert!(composer.active_note().is_none());
    }
}
