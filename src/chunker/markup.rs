//! Heading-based chunker for markdown and similar markup.
//!
//! Splits at headings, never inside a code fence or table. A section whose
//! trailing line announces a continuation (trailing `:` or a lead-in phrase)
//! is extended into the following paragraph so list or code context stays
//! with the sentence that introduces it.

use std::sync::Arc;

use anyhow::Result;

use crate::models::{chunk_level, ChunkMetadata, ChunkResult};
use crate::tokenizer::TokenCounter;

use super::{ChunkLimits, ChunkMetrics, Chunker};

/// Trailing characters that announce a continuation.
const EXTEND_SUFFIXES: [char; 3] = [':', '、', ','];

/// Lead-in phrases that announce a continuation. The mixed-script set is an
/// external contract; keep it exactly as is.
const EXTEND_INDICATORS: [&str; 5] = ["以下の", "次の", "following", "next", "below"];

pub struct MarkupChunker {
    limits: ChunkLimits,
    counter: TokenCounter,
    metrics: Arc<ChunkMetrics>,
}

#[derive(Debug)]
struct Section {
    start_line: u32,
    lines: Vec<String>,
    heading: Option<String>,
}

impl Section {
    fn end_line(&self) -> u32 {
        self.start_line + self.lines.len().saturating_sub(1) as u32
    }

    fn content(&self) -> String {
        self.lines.join("\n")
    }

    /// Last non-blank line, used for the continuation check.
    fn trailing_line(&self) -> Option<&str> {
        self.lines
            .iter()
            .rev()
            .map(|l| l.trim_end())
            .find(|l| !l.is_empty())
    }
}

impl MarkupChunker {
    pub fn new(limits: ChunkLimits, counter: TokenCounter, metrics: Arc<ChunkMetrics>) -> Self {
        Self {
            limits,
            counter,
            metrics,
        }
    }

    fn split_sections(content: &str) -> Vec<Section> {
        let mut sections: Vec<Section> = Vec::new();
        let mut current = Section {
            start_line: 1,
            lines: Vec::new(),
            heading: None,
        };
        let mut in_fence = false;

        for (idx, line) in content.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = line.trim_start();

            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
            }

            // Headings split, but fences and table rows suppress splitting
            // so structured blocks stay whole.
            let in_table = trimmed.starts_with('|');
            let is_heading = !in_fence && !in_table && trimmed.starts_with('#');

            if is_heading && !current.lines.iter().all(|l| l.trim().is_empty()) {
                sections.push(current);
                current = Section {
                    start_line: line_no,
                    lines: Vec::new(),
                    heading: None,
                };
            }
            if is_heading && current.heading.is_none() {
                current.heading = Some(trimmed.trim_start_matches('#').trim().to_string());
            }
            current.lines.push(line.to_string());
        }
        if !current.lines.is_empty() {
            sections.push(current);
        }
        sections
    }

    fn announces_continuation(line: &str) -> bool {
        let trimmed = line.trim_end();
        if EXTEND_SUFFIXES.iter().any(|s| trimmed.ends_with(*s)) {
            return true;
        }
        EXTEND_INDICATORS.iter().any(|ind| trimmed.contains(ind))
    }

    /// Pull the leading paragraph of `next` into `section` when the section
    /// trail announces a continuation and the token cap allows it.
    fn extend_into_next(&self, section: &mut Section, next: &mut Section) {
        let announces = section
            .trailing_line()
            .map(Self::announces_continuation)
            .unwrap_or(false);
        if !announces {
            return;
        }

        // Leading blank lines plus the first paragraph of the next section.
        let mut para_len = 0;
        for line in &next.lines {
            if line.trim().is_empty() && para_len > 0 {
                break;
            }
            para_len += 1;
        }
        if para_len == 0 || para_len >= next.lines.len() {
            return;
        }

        let candidate: Vec<String> = section
            .lines
            .iter()
            .chain(next.lines[..para_len].iter())
            .cloned()
            .collect();
        if self.counter.count(&candidate.join("\n")) > self.limits.max_tokens {
            return;
        }

        section.lines.extend(next.lines.drain(..para_len));
        next.start_line += para_len as u32;
        if next.heading.is_some() && !next.lines.iter().any(|l| l.trim_start().starts_with('#')) {
            next.heading = None;
        }
    }

    /// Split an over-budget section at blank-line boundaries. A boundary
    /// whose preceding line announces a continuation is not split on, so
    /// the announced paragraph stays attached (the token cap still wins).
    fn split_oversize(&self, section: Section) -> Vec<Section> {
        let mut parts = Vec::new();
        let mut current = Section {
            start_line: section.start_line,
            lines: Vec::new(),
            heading: section.heading.clone(),
        };
        let mut tokens = 0;

        for (offset, line) in section.lines.iter().enumerate() {
            let line_tokens = self.counter.count(line);
            let at_boundary = line.trim().is_empty();
            let announced = current
                .trailing_line()
                .map(Self::announces_continuation)
                .unwrap_or(false);
            if tokens + line_tokens > self.limits.max_tokens
                && at_boundary
                && !announced
                && !current.lines.is_empty()
            {
                parts.push(current);
                current = Section {
                    start_line: section.start_line + offset as u32 + 1,
                    lines: Vec::new(),
                    heading: None,
                };
                tokens = 0;
                continue;
            }
            current.lines.push(line.clone());
            tokens += line_tokens;
        }
        if !current.lines.is_empty() {
            parts.push(current);
        }
        parts
    }

    fn to_chunk(&self, section: &Section) -> Option<ChunkResult> {
        let content = section.content();
        let token_count = self.counter.count(&content);
        if token_count < self.limits.min_tokens || token_count > self.limits.max_tokens {
            self.metrics.record_token_range_drop();
            return None;
        }
        Some(ChunkResult {
            content,
            start_line: section.start_line,
            end_line: section.end_line(),
            token_count,
            metadata: ChunkMetadata {
                level: chunk_level::FILE,
                kind: "markdown".to_string(),
                name: section.heading.clone(),
                ..ChunkMetadata::default()
            },
        })
    }
}

impl Chunker for MarkupChunker {
    fn chunk(&self, _path: &str, content: &str) -> Result<Vec<ChunkResult>> {
        let mut sections = Self::split_sections(content);

        let mut i = 0;
        while i + 1 < sections.len() {
            let (head, tail) = sections.split_at_mut(i + 1);
            self.extend_into_next(&mut head[i], &mut tail[0]);
            if tail[0].lines.is_empty() {
                sections.remove(i + 1);
            } else {
                i += 1;
            }
        }

        let mut out = Vec::new();
        for section in sections {
            if self.counter.count(&section.content()) > self.limits.max_tokens {
                for part in self.split_oversize(section) {
                    if let Some(chunk) = self.to_chunk(&part) {
                        out.push(chunk);
                    }
                }
            } else if let Some(chunk) = self.to_chunk(&section) {
                out.push(chunk);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> MarkupChunker {
        let mut limits = ChunkLimits::default();
        limits.min_tokens = 5;
        MarkupChunker::new(
            limits,
            TokenCounter::default(),
            Arc::new(ChunkMetrics::default()),
        )
    }

    #[test]
    fn test_split_at_headings() {
        let md = "# One\n\nFirst section body with enough words to pass.\n\n# Two\n\nSecond section body with enough words to pass.\n";
        let chunks = chunker().chunk("doc.md", md).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.name.as_deref(), Some("One"));
        assert_eq!(chunks[1].metadata.name.as_deref(), Some("Two"));
        assert_eq!(chunks[1].start_line, 5);
    }

    #[test]
    fn test_heading_inside_fence_does_not_split() {
        let md = "# Doc\n\nIntro words for the document body.\n\n```\n# not a heading\ncode line\n```\n\nClosing words for the document body.\n";
        let chunks = chunker().chunk("doc.md", md).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("# not a heading"));
    }

    #[test]
    fn test_colon_trailer_extends_into_next_paragraph() {
        let md = "# Setup\n\nInstall the dependencies listed below:\n\nFirst install the runtime, then the toolchain packages for the build.\n\n# Other\n\nSome unrelated section body with enough words in it.\n";
        let chunks = chunker().chunk("doc.md", md).unwrap();
        // The paragraph after the colon belongs to the first section even
        // though sections normally split only at headings.
        assert!(chunks[0].content.contains("then the toolchain"));
    }

    #[test]
    fn test_japanese_indicator_extends_across_sections() {
        let md = "# 手順\n\n以下のコマンドを実行\n\n# 実行\n\ncargo run --release を実行してからログを確認する手順の説明です。\n";
        let chunks = chunker().chunk("doc.md", md).unwrap();
        // 「以下の」 in the trailer pulls the following paragraph in.
        assert!(chunks[0].content.contains("# 実行"));
    }

    #[test]
    fn test_extension_across_section_boundary() {
        let md = "# Intro\n\nThe supported options are listed in the following:\n\n# Options\n\nOption one enables verbose output for the ingestion pipeline runs.\n";
        let chunks = chunker().chunk("doc.md", md).unwrap();
        assert_eq!(chunks.len(), 2);
        // The announcing trailer pulls the next paragraph along.
        assert!(chunks[0].content.contains("# Options"));
        assert!(!chunks[1].content.contains("# Options"));
        assert!(chunks[1].content.contains("Option one"));
    }

    #[test]
    fn test_indicator_list_is_stable() {
        // The mixed-script lead-in set is an external contract.
        assert_eq!(
            EXTEND_INDICATORS,
            ["以下の", "次の", "following", "next", "below"]
        );
    }

    #[test]
    fn test_tiny_sections_dropped() {
        let metrics = Arc::new(ChunkMetrics::default());
        let c = MarkupChunker::new(
            ChunkLimits::default(),
            TokenCounter::default(),
            Arc::clone(&metrics),
        );
        let chunks = c.chunk("doc.md", "# T\n\nshort\n").unwrap();
        assert!(chunks.is_empty());
        assert_eq!(metrics.token_range_drops(), 1);
    }
}
