//! Sentence tokenizer backed by pretrained Punkt parameters
//!
//! Reads the `punkt_tab` layout: one directory per language holding
//! `abbrev_types.txt` (required), `collocations.tab` and
//! `sentence_starters.txt` (both optional). There is no naive fallback; a
//! missing language is `ResourceUnavailable`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

const ABBREV_FILE: &str = "abbrev_types.txt";
const COLLOCATIONS_FILE: &str = "collocations.tab";
const STARTERS_FILE: &str = "sentence_starters.txt";

const CLOSING_PUNCT: &[char] = &['"', '\'', ')', ']', '}', '\u{201D}', '\u{2019}', '\u{00BB}'];
const OPENING_PUNCT: &[char] = &['"', '\'', '(', '[', '{', '\u{201C}', '\u{2018}', '\u{00AB}'];

/// Learned parameters for one language
#[derive(Debug, Clone, Default)]
pub struct PunktModel {
    abbrev_types: HashSet<String>,
    collocations: HashSet<(String, String)>,
    sentence_starters: HashSet<String>,
}

impl PunktModel {
    /// Loads the parameter files of one language directory
    pub fn load(dir: &Path) -> Result<Self> {
        let abbrev_path = dir.join(ABBREV_FILE);
        let abbrevs = fs::read_to_string(&abbrev_path).map_err(|e| {
            PipelineError::ResourceUnavailable(format!("{}: {e}", abbrev_path.display()))
        })?;

        let collocations = read_optional(&dir.join(COLLOCATIONS_FILE))?;
        let starters = read_optional(&dir.join(STARTERS_FILE))?;

        Ok(Self::from_parts(
            lines(&abbrevs),
            lines(&collocations).filter_map(|line| line.split_once('\t')),
            lines(&starters),
        ))
    }

    pub fn from_parts<'a>(
        abbrev_types: impl IntoIterator<Item = &'a str>,
        collocations: impl IntoIterator<Item = (&'a str, &'a str)>,
        sentence_starters: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            abbrev_types: abbrev_types.into_iter().map(str::to_lowercase).collect(),
            collocations: collocations
                .into_iter()
                .map(|(a, b)| (a.to_lowercase(), b.to_lowercase()))
                .collect(),
            sentence_starters: sentence_starters.into_iter().map(str::to_lowercase).collect(),
        }
    }

    /// Splits whitespace-normalized text into sentences
    pub fn split(&self, text: &str) -> Vec<String> {
        let words: Vec<(usize, &str)> = word_spans(text).collect();
        let mut sentences = Vec::new();
        let mut start = 0usize;

        for pair in words.windows(2) {
            let (offset, word) = pair[0];
            let (_, next) = pair[1];
            if self.is_boundary(word, next) {
                let end = offset + word.len();
                push_trimmed(&mut sentences, &text[start..end]);
                start = end;
            }
        }
        push_trimmed(&mut sentences, &text[start..]);

        sentences
    }

    fn is_boundary(&self, word: &str, next: &str) -> bool {
        let core = word.trim_end_matches(CLOSING_PUNCT);

        if core.ends_with('?') || core.ends_with('!') {
            return true;
        }

        let next_starts_upper = next
            .trim_start_matches(OPENING_PUNCT)
            .chars()
            .next()
            .is_some_and(char::is_uppercase);

        if core.ends_with("...") || core.ends_with('\u{2026}') {
            return next_starts_upper;
        }

        let Some(stem) = core.strip_suffix('.') else {
            return false;
        };

        let word_type = token_type(stem);
        let next_type = token_type(next);

        if self.collocations.contains(&(word_type.clone(), next_type.clone())) {
            return false;
        }

        if self.abbrev_types.contains(&word_type) || is_initial(&word_type) {
            return self.sentence_starters.contains(&next_type);
        }

        next_starts_upper || !next.chars().next().is_some_and(char::is_lowercase)
    }

    pub fn abbreviation_count(&self) -> usize {
        self.abbrev_types.len()
    }
}

/// Sentence tokenizer holding one model per loaded language
#[derive(Debug)]
pub struct SentenceTokenizer {
    root: PathBuf,
    models: HashMap<String, PunktModel>,
}

impl SentenceTokenizer {
    /// Loads every requested language from `root`; fails if any is missing
    pub fn load(root: &Path, languages: &[&str]) -> Result<Self> {
        if !root.is_dir() {
            return Err(PipelineError::ResourceUnavailable(format!(
                "sentence tokenizer directory not found: {}",
                root.display()
            )));
        }

        let mut models = HashMap::new();
        for language in languages {
            let key = language.to_lowercase();
            if models.contains_key(&key) {
                continue;
            }
            let model = PunktModel::load(&root.join(&key))?;
            debug!(language = %key, abbreviations = model.abbreviation_count(), "Loaded tokenizer model");
            models.insert(key, model);
        }

        info!(path = %root.display(), languages = models.len(), "Sentence tokenizer ready");

        Ok(Self {
            root: root.to_path_buf(),
            models,
        })
    }

    /// Tokenizer from in-memory models
    pub fn from_models(models: impl IntoIterator<Item = (String, PunktModel)>) -> Self {
        Self {
            root: PathBuf::new(),
            models: models.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect(),
        }
    }

    pub fn tokenize(&self, language: &str, text: &str) -> Result<Vec<String>> {
        let model = self.models.get(&language.to_lowercase()).ok_or_else(|| {
            PipelineError::ResourceUnavailable(format!(
                "no sentence tokenizer for language {language:?} under {}",
                self.root.display()
            ))
        })?;
        Ok(model.split(text))
    }

    pub fn supports(&self, language: &str) -> bool {
        self.models.contains_key(&language.to_lowercase())
    }
}

fn read_optional(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(PipelineError::ResourceUnavailable(format!("{}: {e}", path.display()))),
    }
}

fn lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty())
}

/// Words with their byte offsets
fn word_spans(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.split(' ')
        .scan(0usize, |offset, word| {
            let start = *offset;
            *offset += word.len() + 1;
            Some((start, word))
        })
        .filter(|(_, word)| !word.is_empty())
}

/// Lowercased word stripped of surrounding punctuation and a final period
fn token_type(word: &str) -> String {
    word.trim_start_matches(OPENING_PUNCT)
        .trim_end_matches(CLOSING_PUNCT)
        .trim_end_matches([',', ';', ':', '.'])
        .to_lowercase()
}

fn is_initial(word_type: &str) -> bool {
    let mut chars = word_type.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_alphabetic())
}

fn push_trimmed(sentences: &mut Vec<String>, sentence: &str) {
    let sentence = sentence.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }
}
