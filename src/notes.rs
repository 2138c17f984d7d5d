//! Chat notes: the durable transcript of questions and answers for an item.
//!
//! Each exchange is appended to a host note as an HTML fragment delimited by
//! literal markers so it can be found again:
//!
//! ```text
//! <!-- BEGIN: ai-chat-block -->
//! <div class="ai-chat-block" data-time="…" data-model="…"> … </div>
//! <!-- END: ai-chat-block -->
//! ```
//!
//! Chat notes carry the tags `ai:chat` and `ai:parent:<ownerKey>`. Answers
//! are Markdown; they are rendered with `pulldown-cmark` and sanitised with
//! `ammonia` before they go into the note. Prompts are escaped verbatim.

use crate::error::AskError;
use crate::host::{Item, ItemId, Note, NoteStore};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use pulldown_cmark::Parser;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};

pub const BLOCK_BEGIN: &str = "<!-- BEGIN: ai-chat-block -->";
pub const BLOCK_END: &str = "<!-- END: ai-chat-block -->";
pub const CHAT_TAG: &str = "ai:chat";
pub const PARENT_TAG_PREFIX: &str = "ai:parent:";

/// How recently an empty chat note must have been touched to be reused.
pub const FRESH_WINDOW_SECS: i64 = 120;

static RE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<!-- BEGIN: ai-chat-block -->\s*(.*?)\s*<!-- END: ai-chat-block -->").unwrap()
});

static RE_EMPTY_THREAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*(?:<div[^>]*>\s*)?<h2>AI chat[^<]*</h2>\s*(?:</div>\s*)?$").unwrap()
});

/// One question/answer pair to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatExchange {
    pub prompt: String,
    /// Answer text as returned by the model (Markdown).
    pub answer: String,
    pub model: String,
    /// Filename of the attachment that was sent, if any.
    pub attachment: Option<String>,
    pub at: DateTime<Utc>,
}

/// Tags marking a note as the chat thread of `owner_key`.
pub fn thread_tags(owner_key: &str) -> Vec<String> {
    vec![CHAT_TAG.to_string(), format!("{PARENT_TAG_PREFIX}{owner_key}")]
}

/// Body of a freshly created thread.
pub fn empty_thread_html(owner: &Item) -> String {
    let title = if owner.title.trim().is_empty() {
        owner.key.as_str()
    } else {
        owner.title.as_str()
    };
    format!("<h2>AI chat: {}</h2>\n", ammonia::clean_text(title))
}

/// Render Markdown to sanitised HTML.
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new(markdown);
    let mut html_output = String::new();
    pulldown_cmark::html::push_html(&mut html_output, parser);
    ammonia::clean(&html_output)
}

/// Render one exchange as a delimited HTML block.
pub fn render_block(exchange: &ChatExchange) -> String {
    let prompt = exchange
        .prompt
        .trim()
        .lines()
        .map(ammonia::clean_text)
        .collect::<Vec<_>>()
        .join("<br>");
    let mut meta = ammonia::clean_text(&exchange.model);
    if let Some(ref file) = exchange.attachment {
        meta.push_str(" · ");
        meta.push_str(&ammonia::clean_text(file));
    }

    format!(
        "{BLOCK_BEGIN}\n\
         <div class=\"ai-chat-block\" data-time=\"{time}\" data-model=\"{model}\">\n\
         <p class=\"ai-chat-q\"><strong>Q:</strong> {prompt}</p>\n\
         <div class=\"ai-chat-a\">{answer}</div>\n\
         <p class=\"ai-chat-meta\"><em>{meta}</em></p>\n\
         </div>\n\
         {BLOCK_END}\n",
        time = exchange.at.to_rfc3339(),
        model = ammonia::clean_text(&exchange.model),
        answer = markdown_to_html(&exchange.answer).trim_end(),
    )
}

/// Append a rendered block to a note body.
pub fn append_block(note_html: &str, block: &str) -> String {
    let mut html = note_html.trim_end().to_string();
    if !html.is_empty() {
        html.push('\n');
    }
    html.push_str(block);
    html
}

/// Inner HTML of every chat block in a note, in order.
pub fn chat_blocks(note_html: &str) -> Vec<String> {
    RE_BLOCK
        .captures_iter(note_html)
        .map(|c| c[1].to_string())
        .collect()
}

/// Whether a note is an untouched thread modified within `window`.
///
/// Heuristic: time window plus a regex over the body.
pub fn is_fresh_empty_thread(note: &Note, now: DateTime<Utc>, window: Duration) -> bool {
    now.signed_duration_since(note.date_modified) <= window && RE_EMPTY_THREAD.is_match(&note.html)
}

/// Append an exchange to an HTML file on disk, creating it if missing.
///
/// Written to a temp file and renamed into place so readers never see a
/// half-written note.
pub async fn append_to_file(path: &Path, exchange: &ChatExchange) -> Result<(), AskError> {
    let write_err = |source| AskError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let existing = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(write_err(e)),
    };
    let html = append_block(&existing, &render_block(exchange));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("html.tmp");
    tokio::fs::write(&tmp_path, html.as_bytes()).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!("Appended exchange to {}", path.display());
    Ok(())
}

// ── Thread management ────────────────────────────────────────────────────────

/// Chat threads stored through a host [`NoteStore`].
pub struct ChatThreads<'a> {
    store: &'a dyn NoteStore,
    fresh_window: Duration,
}

impl<'a> ChatThreads<'a> {
    pub fn new(store: &'a dyn NoteStore) -> Self {
        Self {
            store,
            fresh_window: Duration::seconds(FRESH_WINDOW_SECS),
        }
    }

    pub fn with_fresh_window(mut self, window: Duration) -> Self {
        self.fresh_window = window;
        self
    }

    /// Chat notes of `owner`, most recently modified first.
    pub async fn threads_for(&self, owner: &Item) -> Vec<Note> {
        let parent_tag = format!("{PARENT_TAG_PREFIX}{}", owner.key);
        let mut notes: Vec<Note> = self
            .store
            .notes_for(owner.id)
            .await
            .into_iter()
            .filter(|n| n.has_tag(CHAT_TAG) && n.has_tag(&parent_tag))
            .collect();
        notes.sort_by(|a, b| b.date_modified.cmp(&a.date_modified));
        notes
    }

    /// Latest chat thread of `owner`, creating one if there is none.
    pub async fn open_or_create(&self, owner: &Item) -> Result<Note, AskError> {
        if let Some(note) = self.threads_for(owner).await.into_iter().next() {
            debug!("Opening chat note {} for {}", note.id, owner.key);
            return Ok(note);
        }
        self.create(owner).await
    }

    /// Start a new thread, reusing a fresh empty one instead of piling up
    /// duplicates.
    pub async fn new_thread(&self, owner: &Item, now: DateTime<Utc>) -> Result<Note, AskError> {
        if let Some(note) = self
            .threads_for(owner)
            .await
            .into_iter()
            .find(|n| is_fresh_empty_thread(n, now, self.fresh_window))
        {
            debug!("Reusing empty chat note {} for {}", note.id, owner.key);
            return Ok(note);
        }
        self.create(owner).await
    }

    /// Append an exchange to a note and save it.
    pub async fn append(&self, note_id: ItemId, exchange: &ChatExchange) -> Result<Note, AskError> {
        let mut note = self
            .store
            .note(note_id)
            .await
            .ok_or_else(|| AskError::Note(format!("note {note_id} no longer exists")))?;
        note.html = append_block(&note.html, &render_block(exchange));
        self.store.save_note(&note).await.map_err(AskError::Note)?;
        info!("Saved exchange to chat note {}", note.id);
        Ok(note)
    }

    async fn create(&self, owner: &Item) -> Result<Note, AskError> {
        let note = self
            .store
            .create_note(owner.id, &empty_thread_html(owner), &thread_tags(&owner.key))
            .await
            .map_err(AskError::Note)?;
        info!("Created chat note {} for {}", note.id, owner.key);
        Ok(note)
    }
}
