//! Modal ask dialog.
//!
//! The dialog window belongs to the host; this module owns its state. The
//! opener waits on [`DialogController::closed`], which resolves exactly once
//! with what the user submitted, or [`DialogOutcome::Cancelled`] when the
//! window went away without a submit.

use crate::ask::{AskOutput, AskQuery, Assistant, Target};
use crate::composer::{ComposerView, PENDING_TEXT};
use crate::config::{api_key_from, pref_keys};
use crate::error::AskError;
use crate::host::PreferenceStore;
use crate::pipeline::llm::HttpBackend;
use crate::prompts::DEFAULT_QUESTION;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Values the dialog opens with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogFields {
    pub api_key: String,
    pub prompt: String,
}

impl DialogFields {
    /// Stored key (if any) and the default question.
    pub fn initial(prefs: &dyn PreferenceStore) -> Self {
        Self {
            api_key: api_key_from(prefs).unwrap_or_default(),
            prompt: DEFAULT_QUESTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    Submitted { api_key: String, prompt: String },
    Cancelled,
}

pub struct DialogController {
    tx: Mutex<Option<oneshot::Sender<DialogOutcome>>>,
    rx: Mutex<Option<oneshot::Receiver<DialogOutcome>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for DialogController {
    fn default() -> Self {
        Self::new()
    }
}

impl DialogController {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Close with `outcome`. Only the first call has any effect.
    pub fn close(&self, outcome: DialogOutcome) -> bool {
        match lock(&self.tx).take() {
            Some(tx) => {
                debug!(
                    "Dialog closed (submitted: {})",
                    matches!(outcome, DialogOutcome::Submitted { .. })
                );
                // The receiver may already be gone if nobody waits.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    pub fn submit(&self, api_key: impl Into<String>, prompt: impl Into<String>) -> bool {
        self.close(DialogOutcome::Submitted {
            api_key: api_key.into(),
            prompt: prompt.into(),
        })
    }

    pub fn cancel(&self) -> bool {
        self.close(DialogOutcome::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.tx).is_none()
    }

    /// Wait for the dialog to close.
    ///
    /// The first caller gets the outcome; later callers get `None`
    /// immediately.
    pub async fn closed(&self) -> Option<DialogOutcome> {
        let rx = lock(&self.rx).take()?;
        Some(rx.await.unwrap_or(DialogOutcome::Cancelled))
    }
}

/// Wait for the dialog, store the submitted key, then ask.
///
/// Returns `Ok(None)` when the dialog was cancelled. The answer or the error
/// text is written to `view` either way.
pub async fn ask_via_dialog<B: HttpBackend>(
    dialog: &DialogController,
    prefs: &dyn PreferenceStore,
    assistant: &Assistant<B>,
    view: &dyn ComposerView,
    target: Target,
) -> Result<Option<AskOutput>, AskError> {
    let (api_key, prompt) = match dialog.closed().await {
        Some(DialogOutcome::Submitted { api_key, prompt }) => (api_key, prompt),
        _ => return Ok(None),
    };

    let api_key = api_key.trim().to_string();
    if !api_key.is_empty() {
        if let Err(e) = prefs.set(pref_keys::API_KEY, &api_key) {
            warn!("Could not store API key: {}", e);
        }
    }

    view.set_busy(true);
    view.set_output(PENDING_TEXT);
    let result = assistant.ask(&AskQuery::new(prompt, api_key).target(target)).await;
    match &result {
        Ok(output) => view.set_output(&output.answer.text),
        Err(e) => view.set_output(&format!("Error: {e}")),
    }
    view.set_busy(false);

    result.map(Some)
}
