use crate::config::ChunkingConfig;
use crate::error::ConfigError;
use crate::models::Chunk;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMap {
    starts: BTreeMap<usize, u32>,
}

impl PageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(page: u32) -> Self {
        let mut map = Self::new();
        map.insert(0, page);
        map
    }

    /// Records that `page` starts at `char_offset`. Page 0 is ignored.
    pub fn insert(&mut self, char_offset: usize, page: u32) {
        if page >= 1 {
            self.starts.insert(char_offset, page);
        }
    }

    pub fn page_at(&self, char_offset: usize) -> Option<u32> {
        self.starts
            .range(..=char_offset)
            .next_back()
            .map(|(_, page)| *page)
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

impl FromIterator<(usize, u32)> for PageMap {
    fn from_iter<I: IntoIterator<Item = (usize, u32)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (offset, page) in iter {
            map.insert(offset, page);
        }
        map
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

#[derive(Debug, Clone)]
pub struct Chunker<'a> {
    text: &'a str,
    source_document: &'a str,
    pages: &'a PageMap,
    config: ChunkingConfig,
    char_offsets: Vec<usize>,
}

impl<'a> Chunker<'a> {
    pub fn new(
        text: &'a str,
        source_document: &'a str,
        pages: &'a PageMap,
        config: ChunkingConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut char_offsets: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
        char_offsets.push(text.len());

        Ok(Self {
            text,
            source_document,
            pages,
            config,
            char_offsets,
        })
    }

    pub fn char_len(&self) -> usize {
        self.char_offsets.len() - 1
    }

    pub fn iter(&self) -> Chunks<'_, 'a> {
        Chunks {
            chunker: self,
            start: 0,
            sequence_index: 0,
            done: self.char_len() == 0,
        }
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.char_offsets[start]..self.char_offsets[end]]
    }

    fn is_space_at(&self, index: usize) -> bool {
        self.text[self.char_offsets[index]..]
            .chars()
            .next()
            .is_some_and(char::is_whitespace)
    }

    fn snap_to_boundary(&self, start: usize, end: usize) -> usize {
        if self.is_space_at(end - 1) || self.is_space_at(end) {
            return end;
        }

        let floor = start + self.config.overlap;
        for back in 1..=self.config.boundary_lookback {
            let Some(candidate) = end.checked_sub(back) else {
                break;
            };
            if candidate <= floor {
                break;
            }
            if self.is_space_at(candidate - 1) {
                return candidate;
            }
        }
        end
    }
}

#[derive(Debug, Clone)]
pub struct Chunks<'c, 'a> {
    chunker: &'c Chunker<'a>,
    start: usize,
    sequence_index: u64,
    done: bool,
}

impl Iterator for Chunks<'_, '_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let chunker = self.chunker;
        let total = chunker.char_len();
        let start = self.start;
        let mut end = (start + chunker.config.chunk_size).min(total);
        if end < total {
            end = chunker.snap_to_boundary(start, end);
        }

        let text = chunker.slice(start, end);
        let chunk = Chunk {
            chunk_id: make_chunk_id(chunker.source_document, self.sequence_index, text),
            source_document: chunker.source_document.to_string(),
            text: text.to_string(),
            page_number: chunker.pages.page_at(start),
            page_end: chunker.pages.page_at(end - 1),
            sequence_index: self.sequence_index,
            char_start: start,
        };

        if end == total {
            self.done = true;
        } else {
            self.start = end - chunker.config.overlap;
        }
        self.sequence_index += 1;

        Some(chunk)
    }
}

pub fn chunk(
    text: &str,
    source_document: &str,
    pages: &PageMap,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, ConfigError> {
    Ok(Chunker::new(text, source_document, pages, config)?
        .iter()
        .collect())
}

/// Number of chunks a text of `char_len` characters produces without boundary snapping.
pub fn expected_chunk_count(char_len: usize, config: ChunkingConfig) -> usize {
    if char_len == 0 {
        0
    } else if char_len <= config.chunk_size {
        1
    } else {
        (char_len - config.overlap).div_ceil(config.step())
    }
}

fn make_chunk_id(source_document: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_document.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
