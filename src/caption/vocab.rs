use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

/// WordPiece vocabulary used to turn generated token ids back into text.
#[derive(Clone, Debug)]
pub struct Vocabulary {
    tokens: Vec<String>,
    special_ids: HashSet<i64>,
}

impl Vocabulary {
    /// Load `vocab.txt`: one token per line, line number = token id.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary {}", path.display()))?;
        Self::from_tokens(raw.lines().map(|line| line.to_string()).collect())
    }

    pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(anyhow!("vocabulary is empty"));
        }
        Ok(Self {
            tokens,
            special_ids: HashSet::new(),
        })
    }

    /// Mark ids that must never appear in decoded text (BOS/EOS/PAD).
    pub fn with_special_ids(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.special_ids.extend(ids);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Decode ids to text, skipping special tokens and joining `##` pieces.
    pub fn decode(&self, ids: &[i64]) -> String {
        let mut out = String::new();
        for &id in ids {
            if self.special_ids.contains(&id) {
                continue;
            }
            let Some(token) = usize::try_from(id).ok().and_then(|i| self.tokens.get(i)) else {
                continue;
            };
            if is_bracketed_special(token) {
                continue;
            }
            if let Some(piece) = token.strip_prefix("##") {
                out.push_str(piece);
            } else {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(token);
            }
        }
        clean_up_spaces(&out).trim().to_string()
    }
}

fn is_bracketed_special(token: &str) -> bool {
    static SPECIAL_RE: OnceLock<Regex> = OnceLock::new();
    let re = SPECIAL_RE.get_or_init(|| {
        Regex::new(r"^\[[A-Z_]+\]$").expect("special token pattern is valid")
    });
    re.is_match(token)
}

fn clean_up_spaces(text: &str) -> String {
    text.replace(" .", ".")
        .replace(" ,", ",")
        .replace(" ?", "?")
        .replace(" !", "!")
        .replace(" ' ", "'")
        .replace(" n't", "n't")
        .replace(" 's", "'s")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        let tokens = ["[PAD]", "[UNK]", "[CLS]", "[SEP]", "a", "cat", "sit", "##ting", "on", "mat", ".", "[DEC]"];
        Vocabulary::from_tokens(tokens.iter().map(|t| t.to_string()).collect())
            .unwrap()
            .with_special_ids([0, 3, 11])
    }

    #[test]
    fn decode_joins_wordpieces_and_strips_specials() {
        let v = vocab();
        let text = v.decode(&[11, 4, 5, 6, 7, 8, 4, 9, 10, 3, 0, 0]);
        assert_eq!(text, "a cat sitting on a mat.");
    }

    #[test]
    fn decode_skips_unknown_ids_and_bracketed_tokens() {
        let v = vocab();
        assert_eq!(v.decode(&[2, 4, 999, -1, 5, 1]), "a cat");
    }

    #[test]
    fn decode_of_only_specials_is_empty() {
        let v = vocab();
        assert_eq!(v.decode(&[11, 3, 0]), "");
    }

    #[test]
    fn empty_vocabulary_is_rejected() {
        assert!(Vocabulary::from_tokens(Vec::new()).is_err());
    }
}
