//! Recursive character splitting with preferred boundaries and overlap.
//!
//! The splitter walks an ordered list of separators (paragraph break, line
//! break, space, then nothing) and splits at the first one that keeps every
//! piece under the configured size, recursing with the remaining separators
//! on pieces that are still too large. Adjacent chunks share up to
//! `chunk_overlap` characters of trailing context so meaning that straddles
//! a boundary survives retrieval.
//!
//! Splitting is deterministic: the same input and configuration always yield
//! the same chunk boundaries, in document order. Sizes are measured in
//! characters; span offsets are byte offsets into the original text so
//! callers can map a chunk back to its page of origin.

use crate::types::Document;

/// Default boundary preference: paragraph break, line break, word break,
/// then a hard cut at the size limit.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Size, overlap, and boundary preferences for one splitting pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Characters of trailing context carried into the next chunk.
    pub chunk_overlap: usize,
    /// Ordered list of preferred split boundaries; an empty string means a
    /// hard cut at the size limit.
    pub separators: Vec<String>,
}

impl SplitConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Coarse pass over full pages.
    pub fn parent() -> Self {
        Self::new(1500, 300)
    }

    /// Fine pass over a single parent chunk.
    pub fn child() -> Self {
        Self::new(400, 40)
    }

    #[must_use]
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }
}

/// A chunk of text plus the byte offset where it starts in the input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub offset: usize,
}

/// A document-level chunk: text plus the page it starts on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocSpan {
    pub text: String,
    pub page: u32,
}

/// Recursive character splitter over a fixed [`SplitConfig`].
#[derive(Clone, Debug)]
pub struct TextSplitter {
    config: SplitConfig,
}

impl TextSplitter {
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SplitConfig {
        &self.config
    }

    /// Split `text` into ordered spans of at most `chunk_size` characters.
    ///
    /// A text at or under the limit is returned whole, with no overlap
    /// applied.
    pub fn split_text(&self, text: &str) -> Vec<Span> {
        self.split_spans(text, 0, &self.config.separators)
    }

    /// Split a document's pages as one contiguous stream.
    ///
    /// Pages are joined with a line break so chunks may span page
    /// boundaries; each span's `page` is the page containing its starting
    /// offset.
    pub fn split_document(&self, document: &Document) -> Vec<DocSpan> {
        let mut joined = String::new();
        // (byte offset of page start, page number)
        let mut page_starts: Vec<(usize, u32)> = Vec::with_capacity(document.pages.len());
        for page in &document.pages {
            if !joined.is_empty() {
                joined.push('\n');
            }
            page_starts.push((joined.len(), page.number));
            joined.push_str(&page.text);
        }

        self.split_text(&joined)
            .into_iter()
            .filter(|span| !span.text.trim().is_empty())
            .map(|span| {
                let page = page_starts
                    .iter()
                    .rev()
                    .find(|(start, _)| *start <= span.offset)
                    .map(|(_, number)| *number)
                    .unwrap_or(1);
                DocSpan {
                    text: span.text,
                    page,
                }
            })
            .collect()
    }

    fn split_spans(&self, text: &str, base: usize, separators: &[String]) -> Vec<Span> {
        if char_len(text) <= self.config.chunk_size {
            return vec![Span {
                text: text.to_string(),
                offset: base,
            }];
        }

        let Some((index, separator)) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(sep.as_str()))
        else {
            // No configured boundary occurs in the text; fall back to hard
            // cuts so the size contract still holds.
            return self.hard_windows(text, base);
        };

        if separator.is_empty() {
            return self.hard_windows(text, base);
        }

        let remaining = &separators[index + 1..];
        let pieces = split_with_offsets(text, separator);
        self.merge_pieces(pieces, separator, base, remaining)
    }

    /// Greedily merge pieces into chunks of at most `chunk_size` characters,
    /// carrying up to `chunk_overlap` trailing characters between chunks.
    /// An oversized piece flushes the buffer and is split recursively with
    /// the remaining separators.
    fn merge_pieces(
        &self,
        pieces: Vec<(usize, &str)>,
        separator: &str,
        base: usize,
        remaining: &[String],
    ) -> Vec<Span> {
        let sep_len = char_len(separator);
        let mut chunks = Vec::new();
        // (absolute byte offset, piece text)
        let mut buffer: Vec<(usize, &str)> = Vec::new();
        let mut buffer_len = 0usize;

        let flush = |buffer: &[(usize, &str)], chunks: &mut Vec<Span>| {
            if let Some((offset, _)) = buffer.first() {
                let text = buffer
                    .iter()
                    .map(|(_, piece)| *piece)
                    .collect::<Vec<_>>()
                    .join(separator);
                chunks.push(Span {
                    text,
                    offset: *offset,
                });
            }
        };

        for (rel_offset, piece) in pieces {
            let piece_len = char_len(piece);
            let offset = base + rel_offset;

            if piece_len > self.config.chunk_size {
                flush(&buffer, &mut chunks);
                buffer.clear();
                buffer_len = 0;
                chunks.extend(self.split_spans(piece, offset, remaining));
                continue;
            }

            let joined_len = if buffer.is_empty() {
                piece_len
            } else {
                buffer_len + sep_len + piece_len
            };
            if !buffer.is_empty() && joined_len > self.config.chunk_size {
                flush(&buffer, &mut chunks);
                let tail = self.overlap_tail(&buffer, sep_len);
                buffer_len = tail
                    .iter()
                    .map(|(_, piece)| char_len(piece))
                    .sum::<usize>()
                    + sep_len * tail.len().saturating_sub(1);
                buffer = tail;
                // Shrink the carried tail if it cannot fit alongside the
                // incoming piece; overlap is best-effort, the size limit is
                // not.
                while !buffer.is_empty()
                    && buffer_len + sep_len + piece_len > self.config.chunk_size
                {
                    let (_, dropped) = buffer.remove(0);
                    buffer_len -= char_len(dropped);
                    if !buffer.is_empty() {
                        buffer_len -= sep_len;
                    }
                }
            }

            if !buffer.is_empty() {
                buffer_len += sep_len;
            }
            buffer_len += piece_len;
            buffer.push((offset, piece));
        }

        flush(&buffer, &mut chunks);
        chunks
    }

    /// Trailing pieces whose joined length stays within `chunk_overlap`.
    fn overlap_tail<'a>(
        &self,
        buffer: &[(usize, &'a str)],
        sep_len: usize,
    ) -> Vec<(usize, &'a str)> {
        let mut tail: Vec<(usize, &'a str)> = Vec::new();
        let mut tail_len = 0usize;
        for &(offset, piece) in buffer.iter().rev() {
            let piece_len = char_len(piece);
            let joined = if tail.is_empty() {
                piece_len
            } else {
                tail_len + sep_len + piece_len
            };
            if joined > self.config.chunk_overlap {
                break;
            }
            tail_len = joined;
            tail.push((offset, piece));
        }
        tail.reverse();
        tail
    }

    /// Fixed-size windows at the character level, stepping by
    /// `chunk_size − chunk_overlap`.
    fn hard_windows(&self, text: &str, base: usize) -> Vec<Span> {
        let step = self
            .config
            .chunk_size
            .saturating_sub(self.config.chunk_overlap)
            .max(1);

        // Byte index of every char boundary, plus the end of the text.
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        boundaries.push(text.len());
        let total = boundaries.len() - 1;

        let mut spans = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + self.config.chunk_size).min(total);
            spans.push(Span {
                text: text[boundaries[start]..boundaries[end]].to_string(),
                offset: base + boundaries[start],
            });
            if end == total {
                break;
            }
            start += step;
        }
        spans
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split on `separator`, dropping empty pieces but keeping each piece's byte
/// offset in the input.
fn split_with_offsets<'a>(text: &'a str, separator: &str) -> Vec<(usize, &'a str)> {
    let mut pieces = Vec::new();
    let mut position = 0usize;
    for segment in text.split(separator) {
        if !segment.is_empty() {
            pieces.push((position, segment));
        }
        position += segment.len() + separator.len();
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Document, Page};

    fn splitter(size: usize, overlap: usize) -> TextSplitter {
        TextSplitter::new(SplitConfig::new(size, overlap))
    }

    #[test]
    fn short_text_is_one_span_without_overlap() {
        let spans = splitter(100, 20).split_text("short text");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "short text");
        assert_eq!(spans[0].offset, 0);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let spans = splitter(4, 0).split_text("aaa\n\nbbb");
        assert_eq!(
            spans.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
            vec!["aaa", "bbb"]
        );
        assert_eq!(spans[0].offset, 0);
        assert_eq!(spans[1].offset, 5);
    }

    #[test]
    fn carries_overlap_across_word_chunks() {
        // Pieces of two chars joined by spaces; size 5 fits two pieces,
        // overlap 2 carries exactly one piece.
        let spans = splitter(5, 2).split_text("aa bb cc dd");
        assert_eq!(
            spans.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
            vec!["aa bb", "bb cc", "cc dd"]
        );
        // Offsets point at the first piece of each chunk.
        assert_eq!(
            spans.iter().map(|s| s.offset).collect::<Vec<_>>(),
            vec![0, 3, 6]
        );
    }

    #[test]
    fn hard_cuts_when_no_boundary_exists() {
        // 10 chars, size 4, overlap 1: windows at 0, 3, 6.
        let spans = splitter(4, 1).split_text("abcdefghij");
        assert_eq!(
            spans.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
            vec!["abcd", "defg", "ghij"]
        );
    }

    #[test]
    fn oversized_word_falls_through_to_hard_cut() {
        let spans = splitter(4, 0).split_text("aa bbbbbbbb cc");
        assert_eq!(
            spans.iter().map(|s| s.text.as_str()).collect::<Vec<_>>(),
            vec!["aa", "bbbb", "bbbb", "cc"]
        );
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = "First paragraph with words.\n\nSecond paragraph, a little longer.\n\nThird.";
        let a = splitter(30, 8).split_text(text);
        let b = splitter(30, 8).split_text(text);
        assert_eq!(a, b);
    }

    #[test]
    fn document_spans_report_starting_page() {
        let doc = Document::new(
            "doc.txt",
            vec![
                Page::new("abcdefghij", 1),
                Page::new("klmnopqrst", 2),
                Page::new("uvwxyz", 3),
            ],
        );
        // Joined stream is 28 chars with \n separators; size 8 forces each
        // page to split into multiple chunks.
        let spans = splitter(8, 2).split_document(&doc);
        assert!(!spans.is_empty());
        // First chunk starts on page 1, last chunk on page 3.
        assert_eq!(spans.first().unwrap().page, 1);
        assert_eq!(spans.last().unwrap().page, 3);
        // Pages never decrease along the document order.
        for window in spans.windows(2) {
            assert!(window[0].page <= window[1].page);
        }
    }

    #[test]
    fn page_shorter_than_split_unit_is_one_chunk() {
        let doc = Document::new("tiny.txt", vec![Page::new("tiny", 1)]);
        let spans = TextSplitter::new(SplitConfig::parent()).split_document(&doc);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].text, "tiny");
        assert_eq!(spans[0].page, 1);
    }
}
