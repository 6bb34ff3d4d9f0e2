//! Text chunking with configurable size and overlap.
//!
//! Chunking is character based: every chunk except the last is exactly
//! `chunk_size` characters long and starts `chunk_size - overlap`
//! characters after the previous one.

/// A chunk before it is bound to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCandidate {
    pub ordinal: u32,
    pub text: String,
}

/// Normalize whitespace so equal content produces equal chunks and hashes.
///
/// Line endings become `\n`, runs of spaces and tabs collapse to one space,
/// trailing spaces before a newline are dropped, more than two consecutive
/// newlines collapse to two, and the result is trimmed.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut pending_space = false;
    let mut newlines = 0usize;

    for ch in unified.chars() {
        match ch {
            '\n' => {
                pending_space = false;
                newlines += 1;
            }
            c if c.is_whitespace() => {
                pending_space = true;
            }
            c => {
                if newlines > 0 {
                    if !out.is_empty() {
                        out.push_str(if newlines > 1 { "\n\n" } else { "\n" });
                    }
                    newlines = 0;
                } else if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c);
            }
        }
    }

    out
}

/// Chunk already-normalized text into overlapping segments.
///
/// Requires `overlap < chunk_size`; callers validate this through
/// `RagConfig::validate`. Empty text yields no chunks.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<ChunkCandidate> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    if n == 0 || chunk_size == 0 || overlap >= chunk_size {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal = 0u32;

    loop {
        let end = (start + chunk_size).min(n);
        chunks.push(ChunkCandidate {
            ordinal,
            text: chars[start..end].iter().collect(),
        });
        ordinal += 1;

        if end == n {
            break;
        }
        start = end - overlap;
    }

    tracing::debug!(
        chunks = chunks.len(),
        chunk_size,
        overlap,
        "Chunked text"
    );

    chunks
}

/// Concatenate chunks back into text, dropping the repeated overlap.
pub fn reconstruct(chunks: &[ChunkCandidate], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}
