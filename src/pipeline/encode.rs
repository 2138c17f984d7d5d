//! Base64 codec and validator for attachment payloads.
//!
//! Hosts hand us PDF bytes in two shapes: an inline `data:` URI, or raw
//! bytes read from disk. Both end up as a [`Base64Payload`], a validated,
//! normalised standard-alphabet string ready to be embedded in a Responses
//! API `input_file` block.
//!
//! The `%PDF-` magic check ([`looks_like_pdf`]) is diagnostic only. A payload
//! whose declared MIME type says PDF but whose bytes don't start with `%PDF-`
//! is still sent; the mismatch is logged and recorded on the payload.

use crate::error::AttachmentError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Base64 of the 5-byte `%PDF-` header, truncated to whole characters.
const PDF_MAGIC_B64: &str = "JVBER";

/// Raw bytes encoded per chunk. Must be a multiple of 3 so each chunk's
/// output is unpadded and the concatenation is a single valid string.
const ENCODE_CHUNK_BYTES: usize = 3 * 10 * 1024;

static RE_DATA_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^data:([^;,]+);base64,(.*)$").unwrap());

/// Result of splitting a `data:<mime>;base64,<payload>` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub base64: String,
}

/// Strip all whitespace and pad with `=` to the next multiple of 4.
///
/// Total and idempotent; it never validates.
pub fn normalize(raw: &str) -> String {
    let mut out: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let rem = out.len() % 4;
    if rem != 0 {
        out.extend(std::iter::repeat('=').take(4 - rem));
    }
    out
}

/// Split a data URI into its MIME type and normalised payload.
pub fn extract_from_data_uri(uri: &str) -> Result<DataUri, AttachmentError> {
    let caps = RE_DATA_URI
        .captures(uri.trim())
        .ok_or_else(|| AttachmentError::Format(format!("not a base64 data URI: {}", preview(uri))))?;
    Ok(DataUri {
        mime: caps[1].trim().to_string(),
        base64: normalize(&caps[2]),
    })
}

/// Check the alphabet, then make sure the normalised string decodes.
pub fn validate(base64: &str) -> Result<(), AttachmentError> {
    if let Some((idx, ch)) = base64
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '=')))
    {
        return Err(AttachmentError::Format(format!(
            "invalid character {ch:?} at offset {idx}"
        )));
    }
    STANDARD
        .decode(normalize(base64))
        .map(|_| ())
        .map_err(|e| AttachmentError::Decode(e.to_string()))
}

/// Best-effort check that the payload starts with `%PDF-`.
pub fn looks_like_pdf(base64: &str) -> bool {
    normalize(base64).starts_with(PDF_MAGIC_B64)
}

/// Number of trailing `=` characters.
pub fn padding_count(base64: &str) -> usize {
    base64.bytes().rev().take_while(|&b| b == b'=').count()
}

/// `floor(len * 3 / 4) - padding`, never below zero.
pub fn estimate_decoded_size(base64_len: usize, padding: usize) -> usize {
    (base64_len * 3 / 4).saturating_sub(padding)
}

/// Encode arbitrary bytes to standard base64, chunk by chunk.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(ENCODE_CHUNK_BYTES) {
        STANDARD.encode_string(chunk, &mut out);
    }
    out
}

/// Render a payload as a `data:` URI for the request body.
pub fn to_data_uri(payload: &Base64Payload) -> String {
    format!("data:{};base64,{}", payload.mime_type, payload.base64)
}

fn preview(s: &str) -> String {
    let head: String = s.chars().take(40).collect();
    if head.len() < s.len() {
        format!("{head}…")
    } else {
        head
    }
}

// ── Base64Payload ────────────────────────────────────────────────────────────

/// A validated, normalised base64 payload plus its metadata.
///
/// Only constructible through the validating constructors below, so every
/// value upholds the alphabet/length/decodability invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Payload {
    base64: String,
    mime_type: String,
    filename: String,
    approx_decoded_bytes: usize,
    looks_like_pdf: bool,
}

impl Base64Payload {
    /// Normalise and validate an existing base64 string.
    pub fn from_base64(
        raw: &str,
        mime_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<Self, AttachmentError> {
        let base64 = normalize(raw);
        validate(&base64)?;
        let approx_decoded_bytes = estimate_decoded_size(base64.len(), padding_count(&base64));
        let looks_like_pdf = looks_like_pdf(&base64);
        debug!(
            "Validated base64 payload: {} chars, ~{} bytes decoded",
            base64.len(),
            approx_decoded_bytes
        );
        Ok(Self {
            base64,
            mime_type: mime_type.into(),
            filename: filename.into(),
            approx_decoded_bytes,
            looks_like_pdf,
        })
    }

    /// Extract and validate the payload embedded in a data URI.
    pub fn from_data_uri(uri: &str, filename: impl Into<String>) -> Result<Self, AttachmentError> {
        let DataUri { mime, base64 } = extract_from_data_uri(uri)?;
        Self::from_base64(&base64, mime, filename)
    }

    /// Encode raw file bytes.
    pub fn from_bytes(
        bytes: &[u8],
        mime_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<Self, AttachmentError> {
        Self::from_base64(&encode_bytes(bytes), mime_type, filename)
    }

    pub fn base64(&self) -> &str {
        &self.base64
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn approx_decoded_bytes(&self) -> usize {
        self.approx_decoded_bytes
    }

    /// Whether the bytes start with `%PDF-`. Diagnostic only.
    pub fn looks_like_pdf(&self) -> bool {
        self.looks_like_pdf
    }

    /// True when the declared MIME type is PDF but the magic bytes disagree.
    pub fn pdf_magic_mismatch(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case("application/pdf") && !self.looks_like_pdf
    }

    /// Empty payloads and nameless files are skipped by the request builder.
    pub fn is_well_formed(&self) -> bool {
        !self.base64.is_empty() && !self.filename.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_whitespace_and_pads() {
        assert_eq!(normalize(" JVBE\nRi0x\tLjQ "), "JVBERi0xLjQ=");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("QQ"), "QQ==");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["", "a", "ab c", "JVBERi0xLjQK", "  x y z w v ", "QQ==", "@@@"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "input {s:?}");
        }
    }

    #[test]
    fn data_uri_pdf_example() {
        let uri = "data:application/pdf;base64,JVBERi0xLjQK";
        let parts = extract_from_data_uri(uri).unwrap();
        assert_eq!(parts.mime, "application/pdf");
        assert_eq!(parts.base64, "JVBERi0xLjQK");
        assert!(looks_like_pdf(&parts.base64));
    }

    #[test]
    fn data_uri_rejects_plain_string() {
        let err = extract_from_data_uri("not-a-data-uri").unwrap_err();
        assert!(matches!(err, AttachmentError::Format(_)));
    }

    #[test]
    fn validate_rejects_bad_alphabet() {
        assert!(matches!(validate("JVBE*i0x"), Err(AttachmentError::Format(_))));
        assert!(matches!(validate("JVBE Ri0x"), Err(AttachmentError::Format(_))));
    }

    #[test]
    fn validate_rejects_bad_padding() {
        // 5 chars → padded to "A===" territory, which no decoder accepts
        assert!(matches!(validate("QUJDR"), Err(AttachmentError::Decode(_))));
        assert!(matches!(validate("QQ==QQ=="), Err(AttachmentError::Decode(_))));
    }

    #[test]
    fn validate_accepts_normalized_valid_input() {
        for s in ["SGVsbG8", "SGVsbG8=", "SGVs bG8h", "JVBERi0xLjQK"] {
            let n = normalize(s);
            validate(&n).unwrap();
            assert!(estimate_decoded_size(n.len(), padding_count(&n)) <= n.len());
        }
    }

    #[test]
    fn estimate_decoded_size_matches_decoder() {
        let b64 = STANDARD.encode(b"Hello");
        assert_eq!(estimate_decoded_size(b64.len(), padding_count(&b64)), 5);
        assert_eq!(estimate_decoded_size(0, 2), 0);
        assert_eq!(estimate_decoded_size(1, 3), 0);
    }

    #[test]
    fn chunked_encoding_matches_single_shot() {
        let bytes: Vec<u8> = (0..(ENCODE_CHUNK_BYTES * 2 + 7)).map(|i| (i % 251) as u8).collect();
        assert_eq!(encode_bytes(&bytes), STANDARD.encode(&bytes));
        assert_eq!(encode_bytes(&[]), "");
    }

    #[test]
    fn payload_from_bytes_flags_magic() {
        let pdf = Base64Payload::from_bytes(b"%PDF-1.7\n", "application/pdf", "a.pdf").unwrap();
        assert!(pdf.looks_like_pdf());
        assert!(!pdf.pdf_magic_mismatch());
        assert_eq!(pdf.approx_decoded_bytes(), 9);

        let fake = Base64Payload::from_bytes(b"<html>", "application/pdf", "b.pdf").unwrap();
        assert!(fake.pdf_magic_mismatch());
    }

    #[test]
    fn payload_well_formedness() {
        let empty = Base64Payload::from_bytes(b"", "application/pdf", "a.pdf").unwrap();
        assert!(!empty.is_well_formed());
        let nameless = Base64Payload::from_bytes(b"x", "application/pdf", " ").unwrap();
        assert!(!nameless.is_well_formed());
    }

    #[test]
    fn data_uri_round_trips_through_payload() {
        let p = Base64Payload::from_data_uri("data:application/pdf;base64,JVBERi0x\nLjQK", "p.pdf")
            .unwrap();
        assert_eq!(to_data_uri(&p), "data:application/pdf;base64,JVBERi0xLjQK");
    }
}
