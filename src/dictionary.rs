//! Word-to-phoneme dictionaries.
//!
//! A dictionary ships as a zip archive holding a single UTF-8 text table:
//!
//! ```text
//! word;phoneme
//! hello;hɛloʊ
//! world;wɜːld
//! ```
//!
//! The first line is a header and is skipped. Every other line is split at
//! the first `;`. Lines without a non-empty word before the separator are
//! skipped and counted.
//!
//! A [`DictionaryStore`] can hold the compressed archive and unpack it on
//! first use. Lookups are served from an immutable snapshot that is swapped
//! atomically, so a reload never exposes a half-built table.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, TtsError};

/// Header line of a dictionary table.
pub const HEADER_LINE: &str = "word;phoneme";

const SEPARATOR: char = ';';

/// Counts reported by a successful load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub entries: usize,
    pub skipped: usize,
}

type Table = HashMap<String, String>;

/// Case-insensitive word to phoneme-string table.
#[derive(Default)]
pub struct DictionaryStore {
    table: RwLock<Option<Arc<Table>>>,
    archive: RwLock<Option<Arc<[u8]>>>,
}

impl DictionaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store backed by a compressed archive. Nothing is unpacked
    /// until [`ensure_ready`](Self::ensure_ready) or [`unpack`](Self::unpack).
    pub fn from_archive(blob: Vec<u8>) -> Self {
        let store = Self::new();
        store.set_archive(blob);
        store
    }

    pub fn from_archive_file(path: &Path) -> Result<Self> {
        let blob = std::fs::read(path)?;
        log::debug!(
            "Read dictionary archive {} ({} bytes)",
            path.display(),
            blob.len()
        );
        Ok(Self::from_archive(blob))
    }

    pub fn set_archive(&self, blob: Vec<u8>) {
        *self.archive.write() = Some(Arc::from(blob));
    }

    pub fn has_archive(&self) -> bool {
        self.archive.read().is_some()
    }

    /// Parse an uncompressed table and publish it, replacing any previous
    /// table. A table with no valid entries is rejected and the previous
    /// table stays in place.
    pub fn load(&self, raw: &[u8]) -> Result<LoadStats> {
        let text = String::from_utf8_lossy(raw);
        let (table, stats) = parse_table(&text);
        if table.is_empty() {
            return Err(TtsError::DictionaryLoad(format!(
                "no entries found ({} lines skipped)",
                stats.skipped
            )));
        }
        self.publish(table);
        log::info!(
            "Dictionary loaded: {} entries, {} malformed lines skipped",
            stats.entries,
            stats.skipped
        );
        Ok(stats)
    }

    /// Decompress the stored archive and load its table.
    pub fn unpack(&self) -> Result<LoadStats> {
        let blob = self
            .archive
            .read()
            .clone()
            .ok_or_else(|| TtsError::DictionaryLoad("no archive assigned".to_string()))?;
        let raw = decompress(&blob)?;
        self.load(&raw)
    }

    /// Unpack the archive if the table is not ready yet. Failures are logged
    /// and leave the store not ready.
    pub fn ensure_ready(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        if !self.has_archive() {
            return false;
        }
        if let Err(e) = self.unpack() {
            log::warn!("Failed to unpack dictionary: {e}");
        }
        self.is_ready()
    }

    pub fn lookup(&self, word: &str) -> Option<String> {
        let table = self.table.read().clone()?;
        table.get(&word.to_lowercase()).cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.table
            .read()
            .as_ref()
            .is_some_and(|table| !table.is_empty())
    }

    pub fn len(&self) -> usize {
        self.table.read().as_ref().map_or(0, |table| table.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, table: Table) {
        *self.table.write() = Some(Arc::new(table));
    }
}

/// Extract the first file stored in a dictionary archive.
pub fn decompress(blob: &[u8]) -> Result<Vec<u8>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(blob))?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut data)
            .map_err(|e| TtsError::DictionaryLoad(format!("failed to read {name}: {e}")))?;
        return Ok(data);
    }
    Err(TtsError::DictionaryLoad("archive is empty".to_string()))
}

fn parse_table(text: &str) -> (Table, LoadStats) {
    let mut table = Table::new();
    let mut stats = LoadStats::default();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line == HEADER_LINE {
            continue;
        }
        match line.split_once(SEPARATOR) {
            Some((word, phonemes)) if !word.is_empty() => {
                table.insert(word.to_lowercase(), phonemes.to_string());
            }
            _ => {
                log::debug!("Skipping malformed dictionary line: {line:?}");
                stats.skipped += 1;
            }
        }
    }

    stats.entries = table.len();
    (table, stats)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{decompress, parse_table, DictionaryStore};

    fn archive(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            zip.start_file("dictionary.csv", options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn skips_header_and_malformed_lines() {
        let (table, stats) = parse_table("word;phoneme\nhello;hɛloʊ\n;orphan\nnoseparator\n");
        assert_eq!(table.get("hello").map(String::as_str), Some("hɛloʊ"));
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn lookup_ignores_case() {
        let store = DictionaryStore::new();
        store.load("word;phoneme\nHello;hɛloʊ\n".as_bytes()).unwrap();
        assert_eq!(store.lookup("HELLO").as_deref(), Some("hɛloʊ"));
        assert_eq!(store.lookup("hello").as_deref(), Some("hɛloʊ"));
        assert_eq!(store.lookup("world"), None);
    }

    #[test]
    fn empty_table_is_rejected_and_previous_kept() {
        let store = DictionaryStore::new();
        store.load(b"word;phoneme\nhello;h\n").unwrap();
        assert!(store.load(b"word;phoneme\n").is_err());
        assert!(store.is_ready());
        assert_eq!(store.lookup("hello").as_deref(), Some("h"));
    }

    #[test]
    fn unpacks_archive_lazily() {
        let store = DictionaryStore::from_archive(archive("word;phoneme\nworld;wɜːld\n"));
        assert!(!store.is_ready());
        assert!(store.ensure_ready());
        assert_eq!(store.lookup("World").as_deref(), Some("wɜːld"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn corrupt_archive_leaves_store_not_ready() {
        let store = DictionaryStore::from_archive(b"not a zip".to_vec());
        assert!(store.unpack().is_err());
        assert!(!store.ensure_ready());
    }

    #[test]
    fn decompress_returns_first_file() {
        let raw = decompress(&archive("word;phoneme\na;b\n")).unwrap();
        assert_eq!(raw, b"word;phoneme\na;b\n");
    }
}
