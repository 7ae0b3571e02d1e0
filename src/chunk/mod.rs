//! Size-bounded payload chunking
//!
//! Document stores cap the size of a single document, so a serialized
//! snapshot is cut into pieces before upload and stitched back together
//! after download. This module is store-agnostic:
//! - [`Splitter`] cuts on UTF-8 boundaries, never producing an empty trailer,
//!   measuring either raw bytes or the bytes a piece takes inside a JSON string
//! - [`Joiner`] reassembles indexed pieces and refuses incomplete sets
//! - [`compute_payload_hash`] gives a stable integrity stamp for the payload

mod boundaries;

pub use boundaries::*;

use crate::error::{Error, Result};
use blake3::Hasher;

/// How a [`Splitter`] counts the size of a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMeasure {
    /// UTF-8 bytes of the piece itself
    Raw,
    /// Bytes of the piece once escaped as a JSON string body
    JsonString,
}

impl ChunkMeasure {
    fn char_len(self, c: char) -> usize {
        match self {
            ChunkMeasure::Raw => c.len_utf8(),
            ChunkMeasure::JsonString => json_escaped_len(c),
        }
    }

    fn widest_char(self) -> usize {
        match self {
            ChunkMeasure::Raw => MAX_CHAR_BYTES,
            ChunkMeasure::JsonString => MAX_ESCAPED_CHAR_BYTES,
        }
    }
}

/// Cuts a payload into pieces of at most `max_chunk_bytes` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splitter {
    max_chunk_bytes: usize,
    measure: ChunkMeasure,
}

impl Splitter {
    /// Splitter over raw bytes.
    ///
    /// The size must fit the widest UTF-8 character so every piece makes progress.
    pub fn new(max_chunk_bytes: usize) -> Result<Self> {
        Self::with_measure(max_chunk_bytes, ChunkMeasure::Raw)
    }

    /// Splitter whose pieces stay within `max_chunk_bytes` once embedded as
    /// JSON strings, as they are in stored chunk documents
    pub fn for_json_documents(max_chunk_bytes: usize) -> Result<Self> {
        Self::with_measure(max_chunk_bytes, ChunkMeasure::JsonString)
    }

    pub fn with_measure(max_chunk_bytes: usize, measure: ChunkMeasure) -> Result<Self> {
        if max_chunk_bytes < measure.widest_char() {
            return Err(Error::Config(format!(
                "chunk size must be at least {} bytes, got {}",
                measure.widest_char(),
                max_chunk_bytes
            )));
        }
        Ok(Self {
            max_chunk_bytes,
            measure,
        })
    }

    pub fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
    }

    pub fn measure(&self) -> ChunkMeasure {
        self.measure
    }

    /// Size of `piece` as this splitter counts it
    pub fn measured_len(&self, piece: &str) -> usize {
        match self.measure {
            ChunkMeasure::Raw => piece.len(),
            ChunkMeasure::JsonString => piece.chars().map(json_escaped_len).sum(),
        }
    }

    /// Chunk count for an ASCII payload of `len` bytes: `ceil(len / size)`, at least 1
    pub fn expected_chunks(&self, len: usize) -> usize {
        len.div_ceil(self.max_chunk_bytes).max(1)
    }

    /// Split a payload. An empty payload still yields one (empty) piece.
    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        if text.is_empty() {
            return vec![""];
        }

        match self.measure {
            ChunkMeasure::Raw => self.split_raw(text),
            ChunkMeasure::JsonString => self.split_measured(text),
        }
    }

    fn split_raw<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut pieces = Vec::with_capacity(self.expected_chunks(text.len()));
        let mut start = 0;

        while start < text.len() {
            let end = floor_char_boundary(text, start + self.max_chunk_bytes);
            pieces.push(&text[start..end]);
            start = end;
        }

        pieces
    }

    fn split_measured<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut pieces = Vec::with_capacity(self.expected_chunks(text.len()));
        let mut start = 0;
        let mut size = 0;

        for (offset, c) in text.char_indices() {
            let len = self.measure.char_len(c);
            if size + len > self.max_chunk_bytes {
                pieces.push(&text[start..offset]);
                start = offset;
                size = 0;
            }
            size += len;
        }
        pieces.push(&text[start..]);

        pieces
    }
}

/// Reassembles pieces produced by [`Splitter::split`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joiner {
    expected: usize,
}

impl Joiner {
    pub fn new(expected: usize) -> Self {
        Self { expected }
    }

    /// Concatenate `(index, piece)` pairs in index order.
    ///
    /// Pieces may arrive in any order, but the set must be exactly
    /// `0..expected` with no gaps or duplicates.
    pub fn join(&self, mut pieces: Vec<(usize, String)>) -> Result<String> {
        if pieces.len() != self.expected {
            return Err(Error::Integrity(format!(
                "expected {} chunks, got {}",
                self.expected,
                pieces.len()
            )));
        }

        pieces.sort_by_key(|(index, _)| *index);

        let mut out = String::with_capacity(pieces.iter().map(|(_, p)| p.len()).sum());
        for (position, (index, piece)) in pieces.into_iter().enumerate() {
            if index != position {
                return Err(Error::Integrity(format!(
                    "chunk {} missing from set of {}",
                    position, self.expected
                )));
            }
            out.push_str(&piece);
        }

        Ok(out)
    }
}

/// Compute a stable hash for a serialized payload
pub fn compute_payload_hash(payload: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(payload.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkDocument;

    /// `{"data":""}`
    const DOCUMENT_ENVELOPE_BYTES: usize = 11;

    fn indexed(pieces: &[&str]) -> Vec<(usize, String)> {
        pieces
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.to_string()))
            .collect()
    }

    #[test]
    fn test_exact_boundary_chunk_counts() {
        let splitter = Splitter::new(10).unwrap();

        for len in [1usize, 9, 10, 11, 20, 21, 100] {
            let text = "x".repeat(len);
            let pieces = splitter.split(&text);
            assert_eq!(pieces.len(), len.div_ceil(10), "len {}", len);
            assert_eq!(pieces.len(), splitter.expected_chunks(len));
            assert!(pieces.iter().all(|p| !p.is_empty() && p.len() <= 10));
        }
    }

    #[test]
    fn test_empty_payload_yields_one_chunk() {
        let splitter = Splitter::new(10).unwrap();
        assert_eq!(splitter.split(""), vec![""]);
        assert_eq!(splitter.expected_chunks(0), 1);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let splitter = Splitter::new(4).unwrap();
        let text = "가나다라마바사"; // 3 bytes each
        let pieces = splitter.split(text);

        assert!(pieces.iter().all(|p| p.len() <= 4));
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_tiny_chunk_size_rejected() {
        assert!(Splitter::new(3).is_err());
        assert!(Splitter::new(0).is_err());
        assert!(Splitter::for_json_documents(5).is_err());
        assert!(Splitter::for_json_documents(6).is_ok());
    }

    #[test]
    fn test_json_measure_counts_escapes() {
        let splitter = Splitter::for_json_documents(10).unwrap();
        let text = r#""q""q""q""q"\\"#.repeat(50) + "가나다\u{01}\n";

        let pieces = splitter.split(&text);
        assert_eq!(pieces.concat(), text);
        for piece in &pieces {
            assert!(!piece.is_empty());
            let encoded = serde_json::to_string(&ChunkDocument {
                data: piece.to_string(),
            })
            .unwrap();
            assert_eq!(encoded.len(), splitter.measured_len(piece) + DOCUMENT_ENVELOPE_BYTES);
            assert!(splitter.measured_len(piece) <= 10);
        }
        // Raw splitting would have undercounted every quote
        assert!(pieces.len() > Splitter::new(10).unwrap().split(&text).len());
    }

    #[test]
    fn test_json_measure_matches_raw_for_plain_ascii() {
        let raw = Splitter::new(10).unwrap();
        let json = Splitter::for_json_documents(10).unwrap();
        for len in [1usize, 10, 11, 100] {
            let text = "x".repeat(len);
            assert_eq!(json.split(&text), raw.split(&text));
        }
        assert_eq!(json.split(""), vec![""]);
    }

    #[test]
    fn test_join_out_of_order() {
        let splitter = Splitter::new(5).unwrap();
        let text = "the quick brown fox jumps";
        let mut pieces = indexed(&splitter.split(text));
        pieces.reverse();

        let joined = Joiner::new(5).join(pieces).unwrap();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_join_rejects_incomplete_sets() {
        let pieces = indexed(&["ab", "cd", "ef"]);

        assert!(Joiner::new(4).join(pieces.clone()).is_err());

        let mut gapped = pieces.clone();
        gapped[2].0 = 5;
        assert!(Joiner::new(3).join(gapped).is_err());

        let mut duplicated = pieces;
        duplicated[2].0 = 1;
        assert!(Joiner::new(3).join(duplicated).is_err());
    }

    #[test]
    fn test_payload_hash() {
        assert_eq!(compute_payload_hash("abc"), compute_payload_hash("abc"));
        assert_ne!(compute_payload_hash("abc"), compute_payload_hash("abd"));
    }
}
