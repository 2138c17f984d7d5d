//! CLI binary for refmind.
//!
//! A thin shim over the library crate: loads a library snapshot (or wraps a
//! single PDF), maps flags onto `AskConfig`, asks one question and prints
//! the answer.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use refmind::config::{api_key_from, pref_keys};
use refmind::host::memory::{JsonPreferences, LibrarySnapshot, MemoryLibrary, MemoryNotes, MemoryPreferences};
use refmind::host::PreferenceStore;
use refmind::notes::{self, ChatExchange, ChatThreads};
use refmind::pipeline::input::PayloadLoader;
use refmind::prompts::PAPER_SYSTEM_PROMPT;
use refmind::{AskConfig, AskOutput, AskQuery, Assistant, Target};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ask about a single PDF
  refmind --pdf paper.pdf --prompt "What dataset do they use?"

  # Ask about the selected item of a library snapshot
  refmind --library snapshot.json --prompt-file question.txt

  # A specific item, answer appended to an HTML chat note
  refmind --library snapshot.json --item 42 --prompt "Summarize" --note chat.html

  # Show which attachment would be sent (no API key needed)
  refmind --library snapshot.json --inspect-only

  # Keep the key for next time
  refmind --prefs ~/.config/refmind/prefs.json --api-key sk-... --save-key --pdf paper.pdf --prompt "..."

PREFERENCES (--prefs, flat JSON object):
  llmKey               API key
  openaiModel          model id (default gpt-5-mini)
  openaiMaxTokens      max output tokens (default 2048)
  openaiTopP           nucleus sampling, 0.0-1.0 (default 1.0)
  openaiSystemPrompt   system prompt (default: none)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY       API key, used when --api-key is absent
  REFMIND_MODEL        Override model id
  RUST_LOG             tracing filter, e.g. refmind=debug
"#;

/// Ask questions about papers in a reference library, PDF attached.
#[derive(Parser, Debug)]
#[command(
    name = "refmind",
    version,
    about = "Ask an LLM about a paper, with its PDF attached",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP,
    group = clap::ArgGroup::new("source").required(true).args(["library", "pdf"])
)]
struct Cli {
    /// Library snapshot (JSON).
    #[arg(long)]
    library: Option<PathBuf>,

    /// A single PDF file, asked about directly.
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Item id to ask about instead of the selection.
    #[arg(long)]
    item: Option<u64>,

    /// The question.
    #[arg(long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the question from a file.
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Do not attach the PDF; ask with text only.
    #[arg(long)]
    no_pdf: bool,

    /// API key. Falls back to the stored `llmKey` preference.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model id.
    #[arg(long, env = "REFMIND_MODEL")]
    model: Option<String>,

    /// Upper bound on generated tokens.
    #[arg(long)]
    max_output_tokens: Option<u32>,

    /// Nucleus sampling (0.0–1.0).
    #[arg(long)]
    top_p: Option<f32>,

    /// Path to a text file containing a system prompt.
    #[arg(long, conflicts_with = "paper_prompt")]
    system_prompt: Option<PathBuf>,

    /// Use the built-in research-paper system prompt.
    #[arg(long)]
    paper_prompt: bool,

    /// Preferences file (flat JSON object).
    #[arg(long, env = "REFMIND_PREFS")]
    prefs: Option<PathBuf>,

    /// Store --api-key in the preferences file.
    #[arg(long, requires = "prefs")]
    save_key: bool,

    /// Append the exchange to this HTML chat note.
    #[arg(long)]
    note: Option<PathBuf>,

    /// Output structured JSON (AskOutput) instead of the answer text.
    #[arg(long)]
    json: bool,

    /// Show which attachment would be sent and the item's chat threads, then exit.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Host ─────────────────────────────────────────────────────────────
    let prefs: Box<dyn PreferenceStore> = match cli.prefs {
        Some(ref path) => Box::new(
            JsonPreferences::load(path.clone())
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("Failed to load preferences from {}", path.display()))?,
        ),
        None => Box::new(MemoryPreferences::default()),
    };

    let mut snapshot = load_snapshot(&cli).await?;
    let chat_notes = MemoryNotes::with_notes(std::mem::take(&mut snapshot.notes));
    let library = Arc::new(MemoryLibrary::new(snapshot));
    let loader = PayloadLoader::new(library.clone());
    let config = build_config(&cli, prefs.as_ref()).await?;
    let assistant = Assistant::new(library, loader, config);

    let target = cli.item.map_or(Target::Context, Target::Item);

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        return inspect(&assistant, &chat_notes, target, cli.json).await;
    }

    // ── Question ─────────────────────────────────────────────────────────
    let prompt = match (&cli.prompt, &cli.prompt_file) {
        (Some(p), _) => p.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {}", path.display()))?,
        (None, None) => anyhow::bail!("Pass --prompt or --prompt-file"),
    };

    let api_key = cli
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| api_key_from(prefs.as_ref()))
        .unwrap_or_default();
    if cli.save_key {
        if let Some(ref key) = cli.api_key {
            prefs
                .set(pref_keys::API_KEY, key.trim())
                .map_err(anyhow::Error::msg)
                .context("Failed to save API key")?;
        }
    }

    let progress = (!cli.quiet && !cli.json).then(|| spinner(&assistant.config().model));
    let result = assistant
        .ask(&AskQuery::new(prompt.clone(), api_key).target(target))
        .await;
    if let Some(ref bar) = progress {
        bar.finish_and_clear();
    }
    let output = result.context("Question failed")?;

    // ── Output ───────────────────────────────────────────────────────────
    if let Some(ref path) = cli.note {
        let exchange = ChatExchange {
            prompt: prompt.trim().to_string(),
            answer: output.answer.text.clone(),
            model: output.model.clone(),
            attachment: output.attachment.as_ref().map(|a| a.filename.clone()),
            at: Utc::now(),
        };
        notes::append_to_file(path, &exchange)
            .await
            .context("Failed to update chat note")?;
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.answer.text.as_bytes())
            .context("Failed to write to stdout")?;
        if !output.answer.text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
        if !cli.quiet {
            eprintln!("{}", summary(&output));
        }
    }

    Ok(())
}

async fn load_snapshot(cli: &Cli) -> Result<LibrarySnapshot> {
    if let Some(ref path) = cli.library {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read library snapshot {}", path.display()))?;
        return LibrarySnapshot::from_json(&text)
            .with_context(|| format!("Invalid library snapshot {}", path.display()));
    }
    match cli.pdf {
        Some(ref path) => Ok(LibrarySnapshot::single_file(path)),
        None => anyhow::bail!("Pass --library or --pdf"),
    }
}

/// Preferences first, then CLI flags on top.
async fn build_config(cli: &Cli, prefs: &dyn PreferenceStore) -> Result<AskConfig> {
    let mut builder = AskConfig::from_preferences(prefs)
        .context("Invalid stored preferences")?
        .into_builder()
        .attach_pdf(!cli.no_pdf);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(n) = cli.max_output_tokens {
        builder = builder.max_output_tokens(n);
    }
    if let Some(p) = cli.top_p {
        builder = builder.top_p(p);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    } else if cli.paper_prompt {
        builder = builder.system_prompt(PAPER_SYSTEM_PROMPT);
    }

    builder.build().context("Invalid configuration")
}

async fn inspect<B: refmind::HttpBackend>(
    assistant: &Assistant<B>,
    chat_notes: &MemoryNotes,
    target: Target,
    json: bool,
) -> Result<()> {
    let item = assistant.resolve_target(target).await;
    let pdf = assistant.inspect(target).await;
    let threads = match item {
        Some(ref i) => ChatThreads::new(chat_notes).threads_for(i).await,
        None => Vec::new(),
    };

    if json {
        let value = serde_json::json!({
            "item": item,
            "attachment": pdf.as_ref().map(refmind::AttachmentSummary::from),
            "mime_type": pdf.as_ref().map(|r| r.payload.mime_type().to_string()),
            "pdf_magic_mismatch": pdf.as_ref().map(|r| r.payload.pdf_magic_mismatch()),
            "chat_threads": threads.iter().map(|n| n.id).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to serialise inspection")?
        );
        return Ok(());
    }

    match item {
        Some(ref i) => println!("Item:         {} ({})", i.key, i.title),
        None => println!("Item:         <none in context>"),
    }
    match pdf {
        Some(ref r) => {
            println!("Attachment:   {} [{}]", r.attachment.key, r.payload.filename());
            println!("MIME type:    {}", r.payload.mime_type());
            println!("Approx size:  {} bytes", r.payload.approx_decoded_bytes());
            println!("PDF header:   {}", r.payload.looks_like_pdf());
        }
        None => println!("Attachment:   <none>; question would be sent as text only"),
    }
    if item.is_some() {
        println!("Chat threads: {}", threads.len());
    }
    Ok(())
}

fn spinner(model: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix("Asking");
    bar.set_message(model.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn summary(output: &AskOutput) -> String {
    let attached = match output.attachment {
        Some(ref a) => format!("{} (~{} bytes)", a.filename, a.approx_bytes),
        None => "no PDF".to_string(),
    };
    format!(
        "{}  {}  {}  {}",
        green("✔"),
        cyan(&output.model),
        dim(&attached),
        dim(&format!("{} · {}ms", output.answer.source, output.duration_ms)),
    )
}
