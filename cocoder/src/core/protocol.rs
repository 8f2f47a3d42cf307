//! Line-oriented response protocol spoken by the model.
//!
//! A response is a header line, zero or more checksummed content blocks and a
//! footer line:
//!
//! ```text
//! HEADER (outcome="files-generated"; count=1)
//! CONTENT_START (filename="src/lib.rs"; relevance=9; motivation="entry point")
//! pub fn answer() -> u32 { 42 }
//! CONTENT_END (size=30; checksum="<sha256 hex of the body>")
//! FOOTER (hasMoreToGenerate=false)
//! ```
//!
//! Header and footer are located with regexes anywhere in the text. Content
//! markers only count at the start of a line, so a body may mention them
//! mid-line. Blocks are read by a forward scanner so that a malformed or
//! unterminated block is skipped without swallowing its neighbours.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ProtocolError;

const RELEVANCE: RangeInclusive<u8> = 1..=10;

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"HEADER\s*\(\s*outcome="([^"\n]+)";\s*count=(\d+)\s*\)"#)
        .expect("header regex should be valid")
});

static FOOTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"FOOTER\s*\(\s*hasMoreToGenerate=(\w+)\s*\)").expect("footer regex should be valid")
});

static CONTENT_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?m)^CONTENT_START\s*\(\s*filename="([^"\n]*)";\s*relevance=(\d+);\s*motivation="(.*)"\s*\)"#,
    )
    .expect("content start regex should be valid")
});

static CONTENT_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^CONTENT_END\s*\(\s*size=(\d+);\s*checksum="([^"\n]*)"\s*\)"#)
        .expect("content end regex should be valid")
});

/// The model's declared intent for a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    FilesGenerated,
    FilesRequested,
    NotesGenerated,
    /// Syntactically valid but outside the protocol.
    Unknown(String),
}

impl Outcome {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "files-generated" => Outcome::FilesGenerated,
            "files-requested" => Outcome::FilesRequested,
            "notes-generated" => Outcome::NotesGenerated,
            other => Outcome::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Outcome::FilesGenerated => "files-generated",
            Outcome::FilesRequested => "files-requested",
            Outcome::NotesGenerated => "notes-generated",
            Outcome::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub outcome: Outcome,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footer {
    pub has_more_to_generate: bool,
}

/// One filename/body unit of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub filename: String,
    /// 1 (marginal) to 10 (essential), as declared by the model. Decoded
    /// blocks outside that range are dropped as malformed.
    pub relevance: u8,
    pub motivation: String,
    pub body: String,
    /// Byte length of `body` as declared by the model.
    pub declared_size: usize,
    /// Lowercase hex SHA-256 of `body` as declared by the model.
    pub declared_checksum: String,
    /// Whether the recomputed checksum of `body` equals `declared_checksum`.
    pub checksum_verified: bool,
}

impl Content {
    /// Build a block whose size and checksum are computed from `body`.
    pub fn new(
        filename: impl Into<String>,
        relevance: u8,
        motivation: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        Self {
            filename: filename.into(),
            relevance,
            motivation: motivation.into(),
            declared_size: body.len(),
            declared_checksum: checksum(&body),
            checksum_verified: true,
            body,
        }
    }
}

/// A fully decoded model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptResponse {
    pub header: Header,
    pub contents: Vec<Content>,
    pub footer: Footer,
}

impl PromptResponse {
    /// Wrap undecodable model text as a single note so the turn is not lost.
    pub fn unparsable(raw: &str) -> Self {
        Self {
            header: Header {
                outcome: Outcome::NotesGenerated,
                count: 1,
            },
            contents: vec![Content::new(
                "notes.txt",
                10,
                "unparsable model response",
                format!("Model response: {raw}"),
            )],
            footer: Footer {
                has_more_to_generate: false,
            },
        }
    }
}

/// Lowercase hex SHA-256 of `body`.
pub fn checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn encode_header(header: &Header) -> String {
    format!(
        "HEADER (outcome=\"{}\"; count={})",
        header.outcome, header.count
    )
}

/// Encode a block using its declared size and checksum.
pub fn encode_content(content: &Content) -> String {
    let start = format!(
        "CONTENT_START (filename=\"{}\"; relevance={}; motivation=\"{}\")",
        content.filename, content.relevance, content.motivation
    );
    let end = format!(
        "CONTENT_END (size={}; checksum=\"{}\")",
        content.declared_size, content.declared_checksum
    );
    if content.body.is_empty() {
        format!("{start}\n{end}")
    } else {
        format!("{start}\n{}\n{end}", content.body)
    }
}

pub fn encode_footer(footer: &Footer) -> String {
    format!(
        "FOOTER (hasMoreToGenerate={})",
        footer.has_more_to_generate
    )
}

pub fn encode_response(response: &PromptResponse) -> String {
    let mut lines = Vec::with_capacity(response.contents.len() + 2);
    lines.push(encode_header(&response.header));
    lines.extend(response.contents.iter().map(encode_content));
    lines.push(encode_footer(&response.footer));
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub fn parse_header(raw: &str) -> Result<Header, ProtocolError> {
    let caps = HEADER_RE
        .captures(raw)
        .ok_or(ProtocolError::HeaderNotFound)?;
    let count = caps[2]
        .parse::<usize>()
        .map_err(|_| ProtocolError::HeaderNotFound)?;
    Ok(Header {
        outcome: Outcome::parse(&caps[1]),
        count,
    })
}

pub fn parse_footer(raw: &str) -> Result<Footer, ProtocolError> {
    let caps = FOOTER_RE
        .captures(raw)
        .ok_or(ProtocolError::FooterNotFound)?;
    Ok(Footer {
        has_more_to_generate: &caps[1] == "true",
    })
}

/// Extract every well-formed content block in document order.
pub fn parse_contents(raw: &str) -> Result<Vec<Content>, ProtocolError> {
    let mut contents = Vec::new();
    let mut cursor = 0;

    while let Some(head) = CONTENT_START_RE.captures_at(raw, cursor) {
        let Some(marker) = head.get(0) else { break };
        match parse_block(raw, &head) {
            Some((content, next)) => {
                contents.push(content);
                cursor = next;
            }
            None => {
                debug!(offset = marker.start(), "skipping malformed content block");
                cursor = marker.end();
            }
        }
    }

    if contents.is_empty() {
        return Err(ProtocolError::ContentsNotFound);
    }
    Ok(contents)
}

pub fn parse_prompt_response(raw: &str) -> Result<PromptResponse, ProtocolError> {
    Ok(PromptResponse {
        header: parse_header(raw)?,
        contents: parse_contents(raw)?,
        footer: parse_footer(raw)?,
    })
}

/// Parse the block opened by the start marker captured in `head`.
///
/// Returns the block and the offset just past its end marker, or `None` when
/// the attributes are out of range, the block is never closed, or another
/// block starts before this one ends.
fn parse_block(raw: &str, head: &Captures<'_>) -> Option<(Content, usize)> {
    let relevance = head[2].parse::<u8>().ok().filter(|r| RELEVANCE.contains(r))?;
    let body_start = head.get(0)?.end();

    let tail = CONTENT_END_RE.captures_at(raw, body_start)?;
    let end_match = tail.get(0)?;
    if CONTENT_START_RE
        .find_at(&raw[..end_match.start()], body_start)
        .is_some()
    {
        return None;
    }

    let region = &raw[body_start..end_match.start()];
    let body = strip_one_trailing_newline(strip_one_leading_newline(region));
    let declared_checksum = tail[2].to_ascii_lowercase();
    let checksum_verified = checksum(body) == declared_checksum;

    let content = Content {
        filename: head[1].to_string(),
        relevance,
        motivation: head[3].to_string(),
        body: body.to_string(),
        declared_size: tail[1].parse().ok()?,
        declared_checksum,
        checksum_verified,
    };
    Some((content, end_match.end()))
}

fn strip_one_leading_newline(text: &str) -> &str {
    text.strip_prefix("\r\n")
        .or_else(|| text.strip_prefix('\n'))
        .unwrap_or(text)
}

fn strip_one_trailing_newline(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> PromptResponse {
        PromptResponse {
            header: Header {
                outcome: Outcome::FilesGenerated,
                count: 3,
            },
            contents: vec![
                Content::new("src/lib.rs", 9, "entry point", "pub mod a;\npub mod b;\n"),
                Content::new("README.md", 3, "docs", "# Title\n\n  indented line"),
                Content::new("empty.txt", 1, "placeholder", ""),
            ],
            footer: Footer {
                has_more_to_generate: true,
            },
        }
    }

    #[test]
    fn decode_inverts_encode() {
        let response = sample_response();
        let decoded = parse_prompt_response(&encode_response(&response)).expect("decode");
        assert_eq!(decoded, response);
    }

    #[test]
    fn mutated_body_fails_checksum_verification() {
        let content = Content::new("a.txt", 5, "m", "hello world");
        let encoded = encode_content(&content).replace("hello world", "hello worle");
        let parsed = parse_contents(&encoded).expect("contents");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].body, "hello worle");
        assert!(!parsed[0].checksum_verified);
    }

    #[test]
    fn uppercase_checksum_is_accepted() {
        let content = Content::new("a.txt", 5, "m", "body");
        let encoded = encode_content(&content)
            .replace(&content.declared_checksum, &content.declared_checksum.to_uppercase());
        let parsed = parse_contents(&encoded).expect("contents");
        assert!(parsed[0].checksum_verified);
    }

    #[test]
    fn missing_sections_report_which_one() {
        let footer = encode_footer(&Footer {
            has_more_to_generate: false,
        });
        let content = encode_content(&Content::new("a", 1, "m", "x"));
        let header = encode_header(&Header {
            outcome: Outcome::NotesGenerated,
            count: 1,
        });

        assert_eq!(
            parse_prompt_response(&format!("{content}\n{footer}")).unwrap_err(),
            ProtocolError::HeaderNotFound
        );
        assert_eq!(
            parse_prompt_response(&format!("{header}\n{footer}")).unwrap_err(),
            ProtocolError::ContentsNotFound
        );
        assert_eq!(
            parse_prompt_response(&format!("{header}\n{content}")).unwrap_err(),
            ProtocolError::FooterNotFound
        );
        assert_eq!(
            ProtocolError::HeaderNotFound.to_string(),
            "Header not found"
        );
    }

    #[test]
    fn unknown_outcome_still_decodes() {
        let header = parse_header("HEADER (outcome=\"code-generated\"; count=2)").expect("header");
        assert_eq!(header.outcome, Outcome::Unknown("code-generated".to_string()));
        assert_eq!(header.count, 2);
    }

    #[test]
    fn surrounding_chatter_is_ignored() {
        let mut raw = String::from("Sure! Here is the answer:\n```\n");
        raw.push_str(&encode_response(&sample_response()));
        raw.push_str("```\nLet me know if you need anything else.");
        let decoded = parse_prompt_response(&raw).expect("decode");
        assert_eq!(decoded.contents.len(), 3);
        assert!(decoded.footer.has_more_to_generate);
    }

    #[test]
    fn unterminated_block_is_skipped_without_losing_the_next() {
        let good = encode_content(&Content::new("b.txt", 4, "kept", "second"));
        let raw = format!(
            "CONTENT_START (filename=\"a.txt\"; relevance=4; motivation=\"cut\")\nfirst, never closed\n{good}"
        );
        let parsed = parse_contents(&raw).expect("contents");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].filename, "b.txt");
        assert_eq!(parsed[0].body, "second");
    }

    #[test]
    fn malformed_attributes_are_skipped() {
        let raw = "CONTENT_START (filename=\"a.txt\"; relevance=high; motivation=\"m\")\nx\nCONTENT_END (size=1; checksum=\"00\")";
        assert_eq!(parse_contents(raw).unwrap_err(), ProtocolError::ContentsNotFound);
    }

    fn single_block_reply(content: Content) -> PromptResponse {
        PromptResponse {
            header: Header {
                outcome: Outcome::FilesGenerated,
                count: 1,
            },
            contents: vec![content],
            footer: Footer {
                has_more_to_generate: false,
            },
        }
    }

    #[test]
    fn markers_mentioned_inside_a_body_round_trip() {
        let response = single_block_reply(Content::new(
            "docs/protocol.md",
            9,
            "docs",
            "Blocks begin with CONTENT_START and end with CONTENT_END.\n\
             Example: `CONTENT_END (size=1; checksum=\"00\")` closes one.",
        ));
        let decoded = parse_prompt_response(&encode_response(&response)).expect("decode");
        assert_eq!(decoded, response);
        assert!(decoded.contents[0].checksum_verified);
    }

    #[test]
    fn non_hex_checksum_keeps_block_unverified() {
        let raw = "HEADER (outcome=\"files-generated\"; count=1)\n\
                   CONTENT_START (filename=\"a.txt\"; relevance=5; motivation=\"m\")\n\
                   hello\n\
                   CONTENT_END (size=5; checksum=\"n/a\")\n\
                   FOOTER (hasMoreToGenerate=false)\n";
        let decoded = parse_prompt_response(raw).expect("decode");
        assert_eq!(decoded.contents.len(), 1);
        assert_eq!(decoded.contents[0].body, "hello");
        assert_eq!(decoded.contents[0].declared_checksum, "n/a");
        assert!(!decoded.contents[0].checksum_verified);
    }

    #[test]
    fn out_of_range_relevance_is_skipped() {
        for relevance in [0, 11, 200] {
            let raw = encode_content(&Content::new("a.txt", relevance, "m", "x"));
            assert_eq!(
                parse_contents(&raw).unwrap_err(),
                ProtocolError::ContentsNotFound,
                "relevance={relevance}"
            );
        }
        let kept = encode_content(&Content::new("b.txt", 10, "m", "y"));
        let raw = format!("{}\n{kept}", encode_content(&Content::new("a.txt", 0, "m", "x")));
        let parsed = parse_contents(&raw).expect("contents");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].filename, "b.txt");
    }

    #[test]
    fn unparsable_wraps_raw_text_as_single_note() {
        let response = PromptResponse::unparsable("garbage");
        assert_eq!(response.header.outcome, Outcome::NotesGenerated);
        assert_eq!(response.contents.len(), 1);
        assert_eq!(response.contents[0].body, "Model response: garbage");
        assert!(!response.footer.has_more_to_generate);
    }
}
