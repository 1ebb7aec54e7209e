use std::collections::HashMap;
use std::path::Path;

use unicode_normalization::UnicodeNormalization;

use crate::error::{Result, TtsError};

/// Phoneme (single code point) to token-id mapping.
///
/// Keys are stored as the first code point of their NFD form, matching the
/// NFD decomposition applied to phoneme sentences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhonemeIdMap {
    map: HashMap<char, Vec<i64>>,
}

impl PhonemeIdMap {
    pub fn from_table<I, K>(table: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<i64>)>,
        K: AsRef<str>,
    {
        let mut map = HashMap::new();
        for (key, ids) in table {
            if let Some(phoneme) = key.as_ref().nfd().next() {
                map.insert(phoneme, ids);
            }
        }
        Self { map }
    }

    pub fn get(&self, phoneme: char) -> Option<&[i64]> {
        self.map.get(&phoneme).map(Vec::as_slice)
    }

    pub fn contains(&self, phoneme: char) -> bool {
        self.map.contains_key(&phoneme)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Built-in Kokoro vocabulary, used when no tokenizer metadata is imported.
///
/// Each entry is a run of phonemes with consecutive ids starting at the
/// given value.
pub fn kokoro_default_vocab() -> PhonemeIdMap {
    const RUNS: &[(&str, i64)] = &[
        ("$", 0),
        (";:,.!?", 1),
        ("—…\"()\u{201c}\u{201d} \u{0303}ʣʥʦʨᵝꭧAI", 9),
        ("O", 31),
        ("Q", 33),
        ("ST", 35),
        ("W", 39),
        ("Yᵊabcdef", 41),
        ("hijklmnopqrstuvwxyz", 50),
        ("ɑɐɒæ", 69),
        ("βɔɕç", 75),
        ("ɖðʤə", 80),
        ("ɚɛɜ", 85),
        ("ɟ", 90),
        ("ɡ", 92),
        ("ɥ", 99),
        ("ɨɪʝ", 101),
        ("ɯɰŋɳɲɴø", 110),
        ("ɸθœ", 118),
        ("ɹ", 123),
        ("ɾɻ", 125),
        ("ʁɽʂʃʈʧ", 128),
        ("ʊʋ", 135),
        ("ʌɣɤ", 138),
        ("χʎ", 142),
        ("ʒʔ", 147),
        ("ˈˌː", 156),
        ("ʰ", 162),
        ("ʲ", 164),
        ("↓", 169),
        ("→↗↘", 171),
        ("ᵻ", 177),
    ];

    let mut map = HashMap::new();
    for &(run, first) in RUNS {
        for (offset, phoneme) in run.chars().enumerate() {
            map.insert(phoneme, vec![first + offset as i64]);
        }
    }
    PhonemeIdMap { map }
}

/// Read a Kokoro vocabulary from a `"vocab"` object mapping single
/// characters to integer ids. Non-integer values are skipped.
pub fn vocab_from_json(vocab: &serde_json::Value) -> Result<PhonemeIdMap> {
    let vocab_obj = vocab
        .as_object()
        .ok_or_else(|| TtsError::ModelImport("'vocab' must be an object".to_string()))?;

    let table = vocab_obj
        .iter()
        .filter_map(|(k, v)| v.as_i64().map(|id| (k.as_str(), vec![id])));
    let map = PhonemeIdMap::from_table(table);
    if map.is_empty() {
        return Err(TtsError::ModelImport("'vocab' has no usable entries".to_string()));
    }
    Ok(map)
}

/// Load the vocabulary from a Kokoro `config.json` with a top-level
/// `"vocab"` field.
pub fn load_vocab(config_path: &Path) -> Result<PhonemeIdMap> {
    let content = std::fs::read_to_string(config_path)?;
    let json: serde_json::Value = serde_json::from_str(&content)?;
    let vocab = json
        .get("vocab")
        .ok_or_else(|| TtsError::ModelImport("Missing 'vocab' field".to_string()))?;
    vocab_from_json(vocab)
}

#[cfg(test)]
mod tests {
    use super::{kokoro_default_vocab, vocab_from_json, PhonemeIdMap};

    #[test]
    fn default_vocab_ids_follow_runs() {
        let vocab = kokoro_default_vocab();
        assert_eq!(vocab.get('$'), Some(&[0][..]));
        assert_eq!(vocab.get('?'), Some(&[6][..]));
        assert_eq!(vocab.get(' '), Some(&[16][..]));
        assert_eq!(vocab.get('I'), Some(&[25][..]));
        assert_eq!(vocab.get('z'), Some(&[68][..]));
        assert_eq!(vocab.get('ə'), Some(&[83][..]));
        assert_eq!(vocab.get('ø'), Some(&[116][..]));
        assert_eq!(vocab.get('ʧ'), Some(&[133][..]));
        assert_eq!(vocab.get('ː'), Some(&[158][..]));
        assert_eq!(vocab.get('ᵻ'), Some(&[177][..]));
        assert!(!vocab.contains('g'));
    }

    #[test]
    fn keys_use_first_nfd_code_point() {
        let map = PhonemeIdMap::from_table([("é", vec![5]), ("", vec![9])]);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get('e'), Some(&[5][..]));
    }

    #[test]
    fn reads_vocab_object() {
        let json = serde_json::json!({ "a": 43, "b": 44, "bad": "x" });
        let map = vocab_from_json(&json).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get('b'), Some(&[44][..]));
        assert!(vocab_from_json(&serde_json::json!([])).is_err());
    }
}
