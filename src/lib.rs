//! # refmind
//!
//! Ask a language model questions about a paper in a reference library, with
//! the paper's PDF attached.
//!
//! ## Why this crate?
//!
//! Copy-pasting a paper into a chat window loses figures, tables and layout.
//! The Responses API accepts a PDF as an `input_file` block, so refmind finds
//! the PDF behind whatever item is selected, sends it alongside the question,
//! and keeps the conversation in a note attached to that item.
//!
//! ## Flow
//!
//! ```text
//! question
//!  │
//!  ├─ 1. Target   selected item, reader tab, or an explicit item
//!  ├─ 2. Locate   item itself → formal attachments → children
//!  ├─ 3. Read     data URI, else file path via native/host readers
//!  ├─ 4. Encode   validated base64 → data:application/pdf;base64,…
//!  ├─ 5. Request  Responses API body, one POST, no retries
//!  ├─ 6. Answer   normalised text + source tag
//!  └─ 7. Note     HTML block appended to the item's chat note
//! ```
//!
//! A missing or unreadable PDF never fails a question: it is asked as text
//! only.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use refmind::host::memory::{LibrarySnapshot, MemoryLibrary};
//! use refmind::pipeline::input::PayloadLoader;
//! use refmind::{AskConfig, AskQuery, Assistant};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let library = Arc::new(MemoryLibrary::new(LibrarySnapshot::single_file("paper.pdf")));
//!     let loader = PayloadLoader::new(library.clone());
//!     let assistant = Assistant::new(library, loader, AskConfig::default());
//!
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let output = assistant.ask(&AskQuery::new("What is the main result?", key)).await?;
//!     println!("{}", output.answer.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `refmind` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! refmind = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod ask;
pub mod composer;
pub mod config;
pub mod dialog;
pub mod error;
pub mod host;
pub mod notes;
pub mod pipeline;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use ask::{AskOutput, AskQuery, Assistant, AttachmentSummary, Target};
pub use composer::{Composer, ComposerView, SubmitOutcome};
pub use config::{AskConfig, AskConfigBuilder, ReasoningEffort, TextVerbosity};
pub use dialog::{ask_via_dialog, DialogController, DialogFields, DialogOutcome};
pub use error::{AskError, AttachmentError};
pub use notes::{ChatExchange, ChatThreads};
pub use pipeline::encode::Base64Payload;
pub use pipeline::llm::{HttpBackend, ReqwestBackend, ResponsesClient};
pub use pipeline::normalize::{NormalizedAnswer, SourceTag};
