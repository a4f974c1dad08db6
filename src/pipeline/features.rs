//! Text extraction and term-frequency features.

use std::collections::{BTreeMap, HashMap};

use crate::error::{param_err, Result};

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// 64-bit FNV-1a hash.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(FNV_PRIME)
    })
}

/// Decode bytes as UTF-8 (invalid sequences become U+FFFD) and collapse
/// whitespace runs into single spaces.
pub fn extract_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase alphanumeric terms of `text`.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Lane layout of a feature vector: vocabulary terms first, hashed buckets
/// for every other term after them.
#[derive(Debug, Clone)]
pub struct FeatureSpace {
    vocabulary: Vec<String>,
    index: HashMap<String, usize>,
    lanes: usize,
}

impl FeatureSpace {
    /// `lanes` must leave at least one hash bucket after the vocabulary.
    pub fn new(vocabulary: &[String], lanes: usize) -> Result<Self> {
        let vocabulary: Vec<String> = vocabulary.iter().map(|t| t.to_lowercase()).collect();
        if lanes <= vocabulary.len() {
            return Err(param_err!(
                "{} feature lanes leave no hash bucket after a {}-term vocabulary",
                lanes,
                vocabulary.len()
            ));
        }
        let mut index = HashMap::with_capacity(vocabulary.len());
        for (lane, term) in vocabulary.iter().enumerate() {
            if index.insert(term.clone(), lane).is_some() {
                return Err(param_err!("vocabulary term '{}' appears twice", term));
            }
        }
        Ok(Self {
            vocabulary,
            index,
            lanes,
        })
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Lane counting `term`.
    pub fn lane(&self, term: &str) -> usize {
        match self.index.get(term) {
            Some(&lane) => lane,
            None => {
                let buckets = (self.lanes - self.vocabulary.len()) as u64;
                self.vocabulary.len() + (fnv1a(term.as_bytes()) % buckets) as usize
            }
        }
    }

    /// Vocabulary term of `lane`; `None` for hash buckets.
    pub fn term(&self, lane: usize) -> Option<&str> {
        self.vocabulary.get(lane).map(String::as_str)
    }

    /// Term counts of `tokens`, one entry per lane.
    pub fn histogram(&self, tokens: &[String]) -> Vec<f64> {
        let mut counts = vec![0.0; self.lanes];
        for token in tokens {
            counts[self.lane(token)] += 1.0;
        }
        counts
    }

    /// One histogram per run of `chunk_tokens` tokens. An empty document
    /// still yields one (all-zero) chunk.
    pub fn chunk(&self, tokens: &[String], chunk_tokens: usize) -> Vec<Vec<f64>> {
        if tokens.is_empty() {
            return vec![vec![0.0; self.lanes]];
        }
        tokens
            .chunks(chunk_tokens.max(1))
            .map(|chunk| self.histogram(chunk))
            .collect()
    }

    /// Per-lane weights for an inner product; unknown terms are an error.
    pub fn weights(&self, term_weights: &BTreeMap<String, f64>) -> Result<Vec<f64>> {
        let mut weights = vec![0.0; self.lanes];
        for (term, &w) in term_weights {
            let lane = self
                .index
                .get(&term.to_lowercase())
                .ok_or_else(|| param_err!("weighted term '{}' is not in the vocabulary", term))?;
            weights[*lane] = w;
        }
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(terms: &[&str]) -> Vec<String> {
        terms.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_fnv1a_reference_values() {
        assert_eq!(fnv1a(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_extract_and_tokenize() {
        let text = extract_text(b"Hello,\n\n  World!\tHELLO \xff again");
        assert_eq!(text, "Hello, World! HELLO \u{fffd} again");
        assert_eq!(tokenize(&text), vec!["hello", "world", "hello", "again"]);
    }

    #[test]
    fn test_vocabulary_and_hash_lanes() {
        let space = FeatureSpace::new(&vocab(&["Cat", "dog"]), 8).unwrap();
        assert_eq!(space.lane("cat"), 0);
        assert_eq!(space.lane("dog"), 1);
        let other = space.lane("zebra");
        assert!((2..8).contains(&other));
        assert_eq!(space.term(0), Some("cat"));
        assert_eq!(space.term(5), None);
    }

    #[test]
    fn test_chunking() {
        let space = FeatureSpace::new(&vocab(&["a"]), 4).unwrap();
        let tokens: Vec<String> = "a b a c a".split(' ').map(String::from).collect();
        let chunks = space.chunk(&tokens, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0][0], 1.0);
        assert_eq!(chunks[2][0], 1.0);
        let total: f64 = chunks.iter().flatten().sum();
        assert_eq!(total, 5.0);

        assert_eq!(space.chunk(&[], 2), vec![vec![0.0; 4]]);
    }

    #[test]
    fn test_invalid_spaces() {
        assert!(FeatureSpace::new(&vocab(&["a", "b"]), 2).is_err());
        assert!(FeatureSpace::new(&vocab(&["a", "A"]), 8).is_err());

        let space = FeatureSpace::new(&vocab(&["a"]), 4).unwrap();
        let mut weights = BTreeMap::new();
        weights.insert("A".to_string(), 2.0);
        assert_eq!(space.weights(&weights).unwrap(), vec![2.0, 0.0, 0.0, 0.0]);
        weights.insert("z".to_string(), 1.0);
        assert!(space.weights(&weights).is_err());
    }
}
