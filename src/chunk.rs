//! Markdown-aware text chunker.
//!
//! Body text is first cut into sections at heading lines. A section's heading
//! and breadcrumb lines form its header, which starts every chunk cut from
//! that section, so a long dated section keeps its date in each piece. The
//! body is packed by paragraphs (`\n\n`) up to `max_tokens` less the header,
//! hard-splitting oversize paragraphs at newline or space boundaries.
//! Consecutive pieces of the same section share `overlap_tokens` of trailing
//! body text.
//!
//! Each chunk gets a random UUID and a SHA-256 hash of its text for
//! staleness detection.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::breadcrumb::is_breadcrumb_line;
use crate::heading::is_heading;
use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks; indices are contiguous from 0.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    if text.is_empty() {
        return vec![make_chunk(document_id, 0, text)];
    }

    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens.min(max_tokens.saturating_sub(1)) * CHARS_PER_TOKEN;

    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for section in split_sections(text) {
        let section = Section::parse(&section);
        if section.body.is_empty() {
            chunks.push(make_chunk(document_id, chunk_index, &section.header));
            chunk_index += 1;
            continue;
        }

        let pieces = pack_body(&section.body, section.body_budget(max_chars));
        let mut prev: Option<&str> = None;
        for piece in &pieces {
            let tail = prev.map(|p| overlap_tail(p, overlap_chars)).unwrap_or_default();
            let body = if tail.is_empty() {
                piece.clone()
            } else {
                format!("{}\n{}", tail, piece)
            };
            chunks.push(make_chunk(document_id, chunk_index, &section.with_header(&body)));
            chunk_index += 1;
            prev = Some(piece.as_str());
        }
    }

    // Guarantee at least one chunk
    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim()));
    }

    chunks
}

/// Cut text into heading-led sections; the preamble before the first
/// heading is its own section.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if is_heading(line) && current.iter().any(|l| !l.trim().is_empty()) {
            sections.push(current.join("\n"));
            current.clear();
        }
        current.push(line);
    }
    if current.iter().any(|l| !l.trim().is_empty()) {
        sections.push(current.join("\n"));
    }

    sections
}

/// A section split into its heading/breadcrumb header and the body below.
///
/// The header is repeated at the start of every piece packed from the body.
#[derive(Debug)]
struct Section {
    header: String,
    separator: &'static str,
    body: String,
}

impl Section {
    fn parse(section: &str) -> Self {
        let lines: Vec<&str> = section
            .split('\n')
            .skip_while(|l| l.trim().is_empty())
            .collect();
        let mut header_len = 0;
        if lines.first().is_some_and(|l| is_heading(l)) {
            header_len = 1;
            while lines.get(header_len).is_some_and(|l| is_breadcrumb_line(l)) {
                header_len += 1;
            }
        }

        let rest = &lines[header_len..];
        let separator = if header_len > 0 && rest.first().is_some_and(|l| l.trim().is_empty()) {
            "\n\n"
        } else {
            "\n"
        };

        Self {
            header: lines[..header_len]
                .iter()
                .map(|l| l.trim_end())
                .collect::<Vec<_>>()
                .join("\n"),
            separator,
            body: rest.join("\n").trim().to_string(),
        }
    }

    /// Room left for body text once the header is counted. A header that
    /// eats most of the limit still leaves half of it for the body.
    fn body_budget(&self, max_chars: usize) -> usize {
        if self.header.is_empty() {
            return max_chars;
        }
        let overhead = self.header.len() + self.separator.len();
        max_chars.saturating_sub(overhead).max(max_chars / 2).max(1)
    }

    fn with_header(&self, body: &str) -> String {
        if self.header.is_empty() {
            body.to_string()
        } else {
            format!("{}{}{}", self.header, self.separator, body)
        }
    }
}

/// Pack body paragraphs into pieces of at most `max_chars`.
fn pack_body(body: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in body.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

/// Split an oversize paragraph, preferring newline then space boundaries.
fn hard_split(text: &str, max_chars: usize, pieces: &mut Vec<String>) {
    let mut remaining = text;
    while !remaining.is_empty() {
        let actual_split = if remaining.len() > max_chars {
            let limit = floor_char_boundary(remaining, max_chars);
            let window = &remaining[..limit];
            match window.rfind('\n').or_else(|| window.rfind(' ')) {
                Some(pos) if pos > 0 => pos + 1,
                _ if limit > 0 => limit,
                _ => ceil_char_boundary(remaining, 1),
            }
        } else {
            remaining.len()
        };

        let piece = remaining[..actual_split].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = &remaining[actual_split..];
    }
}

/// Trailing body text of `prev` carried into the next piece.
///
/// `prev` is body text only; the section header is added separately. The
/// tail starts at a word boundary and drops any bracketed or heading lines.
fn overlap_tail(prev: &str, overlap_chars: usize) -> String {
    if overlap_chars == 0 {
        return String::new();
    }

    let tail = if prev.len() > overlap_chars {
        let start = ceil_char_boundary(prev, prev.len() - overlap_chars);
        let tail = &prev[start..];
        match tail.find(char::is_whitespace) {
            Some(pos) => tail[pos..].trim_start(),
            None => tail,
        }
    } else {
        prev
    };

    tail.split('\n')
        .filter(|line| !is_heading(line) && !is_breadcrumb_line(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i.min(s.len())
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
