//! Pipeline stages between a question and a normalised answer.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ encode ──▶ request ──▶ llm ──▶ normalize
//! (item)    (base64)   (body)     (POST)  (text + tag)
//! ```
//!
//! 1. [`input`]   — find the PDF attachment for an item and read its bytes
//!    through the first source that works
//! 2. [`encode`]  — validate or produce base64 and wrap it in a data URI
//! 3. [`request`] — assemble the Responses API body
//! 4. [`llm`]     — the single HTTP POST and outcome classification; the only
//!    stage with network I/O
//! 5. [`normalize`] — pull answer text out of whatever shape came back

pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod request;
