//! Fallback line-based chunker for plain text and unparsed code.
//!
//! Accumulates lines until the token budget reaches `target_tokens`, emits
//! the window, and restarts with the trailing lines that sum to at least
//! `overlap_tokens` so context is carried across chunk boundaries.

use std::sync::Arc;

use anyhow::Result;

use crate::models::{chunk_level, ChunkMetadata, ChunkResult};
use crate::tokenizer::TokenCounter;

use super::{ChunkLimits, ChunkMetrics, Chunker};

pub struct LineChunker {
    limits: ChunkLimits,
    counter: TokenCounter,
    metrics: Arc<ChunkMetrics>,
}

struct Window {
    /// (1-based line number, text, token count) per buffered line.
    lines: Vec<(u32, String, usize)>,
    tokens: usize,
}

impl Window {
    fn new() -> Self {
        Self {
            lines: Vec::new(),
            tokens: 0,
        }
    }

    fn push(&mut self, line_no: u32, text: &str, tokens: usize) {
        self.lines.push((line_no, text.to_string(), tokens));
        self.tokens += tokens;
    }

    fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl LineChunker {
    pub fn new(limits: ChunkLimits, counter: TokenCounter, metrics: Arc<ChunkMetrics>) -> Self {
        Self {
            limits,
            counter,
            metrics,
        }
    }

    fn emit(&self, window: &Window, out: &mut Vec<ChunkResult>) {
        if window.is_empty() {
            return;
        }
        let content = window
            .lines
            .iter()
            .map(|(_, text, _)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let token_count = self.counter.count(&content);
        if token_count < self.limits.min_tokens || token_count > self.limits.max_tokens {
            self.metrics.record_token_range_drop();
            return;
        }
        let start_line = window.lines.first().map(|(n, _, _)| *n).unwrap_or(1);
        let end_line = window.lines.last().map(|(n, _, _)| *n).unwrap_or(start_line);
        out.push(ChunkResult {
            content,
            start_line,
            end_line,
            token_count,
            metadata: ChunkMetadata {
                level: chunk_level::FILE,
                kind: "text".to_string(),
                ..ChunkMetadata::default()
            },
        });
    }

    /// Trailing lines of the emitted window summing to at least the overlap
    /// budget. Never carries the entire window, which would stall progress.
    fn overlap_tail(&self, window: &Window) -> Vec<(u32, String, usize)> {
        if self.limits.overlap_tokens == 0 || window.lines.len() < 2 {
            return Vec::new();
        }
        let mut tail: Vec<(u32, String, usize)> = Vec::new();
        let mut tokens = 0;
        for entry in window.lines.iter().rev() {
            if tail.len() + 1 >= window.lines.len() {
                break;
            }
            tokens += entry.2;
            tail.push(entry.clone());
            if tokens >= self.limits.overlap_tokens {
                break;
            }
        }
        tail.reverse();
        tail
    }
}

impl Chunker for LineChunker {
    fn chunk(&self, _path: &str, content: &str) -> Result<Vec<ChunkResult>> {
        let mut out = Vec::new();
        let mut window = Window::new();

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let line_tokens = self.counter.count(line);

            // A single line beyond the cap has no safe split boundary left;
            // hard-split it by token windows.
            if line_tokens > self.limits.max_tokens {
                self.emit(&window, &mut out);
                window = Window::new();
                let mut rest = line.to_string();
                while !rest.is_empty() {
                    let piece = self.counter.trim(&rest, self.limits.max_tokens)?;
                    // Token prefixes can end mid-codepoint; back up to the
                    // previous character boundary.
                    let mut cut = piece.len().min(rest.len());
                    while cut > 0 && !rest.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    if cut == 0 {
                        break;
                    }
                    let piece = rest[..cut].to_string();
                    let piece_tokens = self.counter.count(&piece);
                    let mut single = Window::new();
                    single.push(line_no, &piece, piece_tokens);
                    self.emit(&single, &mut out);
                    rest = rest[cut..].to_string();
                }
                continue;
            }

            window.push(line_no, line, line_tokens);

            if window.tokens >= self.limits.target_tokens {
                self.emit(&window, &mut out);
                let tail = self.overlap_tail(&window);
                window = Window::new();
                for (n, text, tokens) in tail {
                    window.push(n, &text, tokens);
                }
                // The carried tail only becomes a chunk once fresh lines
                // push it past the emission threshold again.
            }
        }

        self.emit(&window, &mut out);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> LineChunker {
        LineChunker::new(
            ChunkLimits::default(),
            TokenCounter::default(),
            Arc::new(ChunkMetrics::default()),
        )
    }

    fn chunker_with(limits: ChunkLimits) -> LineChunker {
        LineChunker::new(
            limits,
            TokenCounter::default(),
            Arc::new(ChunkMetrics::default()),
        )
    }

    fn prose(lines: usize) -> String {
        (0..lines)
            .map(|i| format!("Line {i} with some sentence content that has a handful of tokens."))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_short_input_below_min_is_dropped() {
        let metrics = Arc::new(ChunkMetrics::default());
        let c = LineChunker::new(
            ChunkLimits::default(),
            TokenCounter::default(),
            Arc::clone(&metrics),
        );
        let chunks = c.chunk("notes.txt", "just a few words").unwrap();
        assert!(chunks.is_empty());
        assert_eq!(metrics.token_range_drops(), 1);
    }

    #[test]
    fn test_token_bounds_hold_for_every_chunk() {
        let c = chunker();
        let chunks = c.chunk("notes.txt", &prose(400)).unwrap();
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.token_count >= 100, "chunk below minimum");
            assert!(chunk.token_count <= 1600, "chunk above maximum");
        }
    }

    #[test]
    fn test_line_numbers_one_based_inclusive() {
        let mut limits = ChunkLimits::default();
        limits.min_tokens = 1;
        limits.target_tokens = 10_000;
        let c = chunker_with(limits);
        let chunks = c.chunk("notes.txt", "alpha\nbeta\ngamma").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn test_overlap_carried_between_chunks() {
        let mut limits = ChunkLimits::default();
        limits.target_tokens = 60;
        limits.min_tokens = 5;
        limits.overlap_tokens = 15;
        let c = chunker_with(limits);
        let chunks = c.chunk("notes.txt", &prose(40)).unwrap();
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            // The next chunk starts at or before the previous chunk's end,
            // never leaving a gap.
            assert!(pair[1].start_line <= pair[0].end_line + 1);
        }
        // At least one boundary actually overlaps.
        assert!(chunks
            .windows(2)
            .any(|p| p[1].start_line <= p[0].end_line));
    }

    #[test]
    fn test_metadata_present_and_level_one() {
        let c = chunker();
        let chunks = c.chunk("notes.txt", &prose(200)).unwrap();
        for chunk in chunks {
            assert_eq!(chunk.metadata.level, chunk_level::FILE);
            assert_eq!(chunk.metadata.kind, "text");
        }
    }

    #[test]
    fn test_deterministic() {
        let c = chunker();
        let input = prose(300);
        let a = c.chunk("notes.txt", &input).unwrap();
        let b = c.chunk("notes.txt", &input).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content, y.content);
            assert_eq!(x.start_line, y.start_line);
        }
    }
}
