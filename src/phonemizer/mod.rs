//! Text to phoneme sentences.
//!
//! The text is lowercased and cleaned, split into words, and each word's
//! trailing terminator (`.` `,` `?` `!`) is recorded. Words are resolved
//! through the language's dictionary when allowed. Whatever is left goes to
//! the neural G2P model as one batch. The per-word phonemes are then NFD
//! decomposed and joined into sentences:
//!
//! | Terminator | Appended | Ends sentence |
//! |---|---|---|
//! | `.` `?` `!` | the terminator | yes |
//! | `,` | `", "` | no |
//! | none | `" "` | no |
//!
//! Spans wrapped in parentheses inside a phoneme string mark a language
//! switch and are dropped.

pub mod g2p;
pub mod lang;

use std::collections::HashMap;
use std::sync::Arc;

use unicode_normalization::UnicodeNormalization;

use crate::dictionary::DictionaryStore;
use crate::error::{Result, TtsError};
use crate::PhonemeSentence;

pub use g2p::G2pDecoder;

const TERMINATORS: [char; 4] = ['.', ',', '?', '!'];

/// Characters replaced by a space before splitting.
const STRIPPED: [char; 16] = [
    '/', '\\', '(', ')', ':', ';', '"', '_', '\r', '\n', '？', '。', '«', '»', '\t', '¿',
];

/// Per-request phonemization options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhonemizeOptions {
    /// espeak-ng voice code of the text language.
    pub espeak_voice: String,
    /// Resolve words through the language dictionary before G2P.
    pub use_dictionary: bool,
    pub characters_as_words: bool,
}

/// Phonemization output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Phonemized {
    /// Phonemized words with their terminators, space separated.
    pub text: String,
    /// Phoneme string per input word, in order.
    pub words: Vec<String>,
    pub sentences: Vec<PhonemeSentence>,
}

#[derive(Debug, Clone, PartialEq)]
struct Word {
    text: String,
    terminator: Option<char>,
}

/// Dictionary and G2P phonemization for all languages.
#[derive(Default)]
pub struct Phonemizer {
    dictionaries: HashMap<String, Arc<DictionaryStore>>,
    g2p: Option<G2pDecoder>,
}

impl Phonemizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_g2p(mut self, g2p: G2pDecoder) -> Self {
        self.g2p = Some(g2p);
        self
    }

    pub fn set_g2p(&mut self, g2p: Option<G2pDecoder>) {
        self.g2p = g2p;
    }

    pub fn has_g2p(&self) -> bool {
        self.g2p.is_some()
    }

    pub fn set_max_decode_steps(&mut self, steps: usize) {
        if let Some(g2p) = self.g2p.as_mut() {
            g2p.set_max_steps(steps);
        }
    }

    /// Register the dictionary for a G2P language code (e.g. `eng-us`).
    pub fn add_dictionary(&mut self, language: impl Into<String>, store: Arc<DictionaryStore>) {
        self.dictionaries.insert(language.into(), store);
    }

    /// Register a compressed dictionary archive; it is unpacked on first use.
    pub fn load_dictionary_archive(&mut self, language: impl Into<String>, blob: Vec<u8>) {
        self.add_dictionary(language, Arc::new(DictionaryStore::from_archive(blob)));
    }

    pub fn dictionary(&self, language: &str) -> Option<Arc<DictionaryStore>> {
        self.dictionaries.get(language).cloned()
    }

    /// Unpack the dictionary for an espeak voice ahead of the first request.
    pub fn prepare_dictionary(&self, espeak_voice: &str) -> bool {
        let Some(store) = lang::g2p_language(espeak_voice).and_then(|l| self.dictionaries.get(l))
        else {
            return false;
        };
        store.ensure_ready()
    }

    pub fn phonemize(&mut self, text: &str, options: &PhonemizeOptions) -> Result<Phonemized> {
        let language = lang::g2p_language(&options.espeak_voice).ok_or_else(|| {
            TtsError::Phonemization(format!(
                "unsupported phonemizer language '{}'",
                options.espeak_voice
            ))
        })?;

        let words = split_words(&normalize_text(text, options.characters_as_words));
        if words.is_empty() {
            return Err(TtsError::Phonemization("text contains no words".to_string()));
        }

        let mut phonemes: Vec<Option<String>> = vec![None; words.len()];
        if options.use_dictionary {
            if let Some(store) = self.dictionaries.get(language) {
                if store.ensure_ready() {
                    for (slot, word) in phonemes.iter_mut().zip(&words) {
                        *slot = store.lookup(&word.text);
                    }
                }
            }
        }

        let unresolved: Vec<String> = words
            .iter()
            .zip(&phonemes)
            .filter(|(_, p)| p.is_none())
            .map(|(w, _)| w.text.clone())
            .collect();

        if !unresolved.is_empty() {
            log::info!(
                "{} of {} words phonemized using dictionary. Using G2P for {}.",
                words.len() - unresolved.len(),
                words.len(),
                unresolved.len()
            );
            let g2p = self.g2p.as_mut().ok_or_else(|| {
                TtsError::Phonemization(format!(
                    "no G2P model loaded for {} unresolved words",
                    unresolved.len()
                ))
            })?;
            let mut generated = g2p
                .decode(&lang::language_tag(language), &unresolved)?
                .into_iter();
            for slot in phonemes.iter_mut().filter(|p| p.is_none()) {
                *slot = generated.next();
            }
        }

        let resolved: Vec<String> = phonemes.into_iter().map(Option::unwrap_or_default).collect();
        let text = words
            .iter()
            .zip(&resolved)
            .map(|(w, p)| match w.terminator {
                Some(t) => format!("{p}{t}"),
                None => p.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        let sentences = assemble_sentences(&words, &resolved);

        log::debug!("Phonemized text: {text}");
        Ok(Phonemized {
            text,
            words: resolved,
            sentences,
        })
    }
}

/// Lowercase, replace separator characters with spaces and collapse runs
/// of spaces. In character mode every character becomes its own word.
fn normalize_text(text: &str, characters_as_words: bool) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if STRIPPED.contains(&c) { ' ' } else { c })
        .collect();

    if characters_as_words {
        let chars: Vec<String> = cleaned
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(String::from)
            .collect();
        chars.join(" ")
    } else {
        cleaned.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ")
    }
}

/// Split on spaces and strip terminator characters from each word. The
/// last terminator in a word is kept. A word made only of terminators
/// hands its terminator to the previous word.
fn split_words(text: &str) -> Vec<Word> {
    let mut words: Vec<Word> = Vec::new();
    for raw in text.split(' ').filter(|w| !w.is_empty()) {
        let terminator = raw.chars().filter(|c| TERMINATORS.contains(c)).last();
        let stripped: String = raw.chars().filter(|c| !TERMINATORS.contains(c)).collect();

        if stripped.is_empty() {
            if let (Some(t), Some(prev)) = (terminator, words.last_mut()) {
                prev.terminator = Some(t);
            }
            continue;
        }
        words.push(Word {
            text: stripped,
            terminator,
        });
    }
    words
}

/// Join per-word phonemes into sentences.
fn assemble_sentences(words: &[Word], phonemes: &[String]) -> Vec<PhonemeSentence> {
    let mut sentences = Vec::new();
    let mut current: PhonemeSentence = Vec::new();

    for (word, ph) in words.iter().zip(phonemes) {
        current.extend(strip_language_switches(ph.trim_end()).nfd());
        match word.terminator {
            Some(t @ ('.' | '?' | '!')) => {
                current.push(t);
                sentences.push(std::mem::take(&mut current));
            }
            Some(',') => current.extend([',', ' ']),
            _ => current.push(' '),
        }
    }

    while current.last() == Some(&' ') {
        current.pop();
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Remove `(lang)` switch markers and the text inside them.
fn strip_language_switches(phonemes: &str) -> String {
    let mut out = String::with_capacity(phonemes.len());
    let mut depth = 0usize;
    for c in phonemes.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        assemble_sentences, normalize_text, split_words, strip_language_switches,
        PhonemizeOptions, Phonemizer, Word,
    };
    use crate::dictionary::DictionaryStore;
    use crate::error::ErrorKind;

    fn english() -> Phonemizer {
        let store = DictionaryStore::new();
        store
            .load("word;phoneme\nhello;hɛloʊ\nworld;wɜːld\nbye;baɪ\n".as_bytes())
            .unwrap();
        let mut phonemizer = Phonemizer::new();
        phonemizer.add_dictionary("eng-us", Arc::new(store));
        phonemizer
    }

    fn options() -> PhonemizeOptions {
        PhonemizeOptions {
            espeak_voice: "en-us".to_string(),
            use_dictionary: true,
            characters_as_words: false,
        }
    }

    fn sentence(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn cleans_separators_and_spaces() {
        assert_eq!(normalize_text("Hello (big)  world;\n", false), "hello big world");
        assert_eq!(normalize_text("ab c", true), "a b c");
    }

    #[test]
    fn records_trailing_terminators() {
        let words = split_words("hello, world. !");
        assert_eq!(
            words,
            vec![
                Word {
                    text: "hello".to_string(),
                    terminator: Some(',')
                },
                Word {
                    text: "world".to_string(),
                    terminator: Some('!')
                },
            ]
        );
    }

    #[test]
    fn drops_language_switch_spans() {
        assert_eq!(strip_language_switches("ab(en)cd(fr)"), "abcd");
    }

    #[test]
    fn phonemizes_single_sentence() {
        let out = english().phonemize("Hello world.", &options()).unwrap();
        assert_eq!(out.sentences, vec![sentence("hɛloʊ wɜːld.")]);
        assert_eq!(out.text, "hɛloʊ wɜːld.");
        assert_eq!(out.words, vec!["hɛloʊ".to_string(), "wɜːld".to_string()]);
    }

    #[test]
    fn comma_keeps_sentence_open() {
        let out = english().phonemize("Hello, world.", &options()).unwrap();
        assert_eq!(out.sentences, vec![sentence("hɛloʊ, wɜːld.")]);
    }

    #[test]
    fn strong_terminators_split_sentences() {
        let out = english().phonemize("Hello! Bye? world", &options()).unwrap();
        assert_eq!(
            out.sentences,
            vec![sentence("hɛloʊ!"), sentence("baɪ?"), sentence("wɜːld")]
        );
    }

    #[test]
    fn unknown_words_without_g2p_fail() {
        let err = english().phonemize("Hello stranger", &options()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PhonemizationFailure);
    }

    #[test]
    fn unsupported_language_fails() {
        let opts = PhonemizeOptions {
            espeak_voice: "xx".to_string(),
            ..options()
        };
        assert!(english().phonemize("Hello", &opts).is_err());
    }

    #[test]
    fn sentences_are_nfd_decomposed() {
        let words = vec![Word {
            text: "cafe".to_string(),
            terminator: Some('.'),
        }];
        let out = assemble_sentences(&words, &["kafé".to_string()]);
        assert_eq!(out, vec![vec!['k', 'a', 'f', 'e', '\u{301}', '.']]);
    }
}
