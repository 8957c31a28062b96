//! Language-selected text analyzers for the sparse index.
//!
//! The analyzer that builds an index is recorded in it and reused for every
//! query against that index.

use rust_stemmers::{Algorithm, Stemmer};

use hyrag_core::Language;

/// English stop words removed by both analyzers.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Tokenization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    /// Lowercased alphanumeric runs, English stop words removed, then
    /// Porter-stemmed.
    Standard,
    /// Overlapping bigrams over CJK runs, standard handling elsewhere.
    Cjk,
}

impl Analyzer {
    /// Analyzer used for a corpus language.
    pub fn for_language(language: Language) -> Self {
        match language {
            Language::En => Self::Standard,
            Language::Zh => Self::Cjk,
        }
    }

    /// Name recorded in the index metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Cjk => "cjk",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "standard" => Some(Self::Standard),
            "cjk" => Some(Self::Cjk),
            _ => None,
        }
    }

    /// Split text into index terms.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        match self {
            Self::Standard => standard_tokens(text),
            Self::Cjk => cjk_tokens(text),
        }
    }
}

fn is_stop_word(term: &str) -> bool {
    STOP_WORDS.binary_search(&term).is_ok()
}

fn standard_tokens(text: &str) -> Vec<String> {
    let stemmer = Stemmer::create(Algorithm::English);
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !is_stop_word(t))
        .map(|t| stemmer.stem(&t).into_owned())
        .collect()
}

/// Han ideographs, kana and hangul.
fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xAC00..=0xD7AF
        | 0xF900..=0xFAFF
        | 0x20000..=0x2A6DF)
}

fn cjk_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cjk_run: Vec<char> = Vec::new();
    let mut word = String::new();

    for c in text.chars() {
        if is_cjk(c) {
            flush_word(&mut word, &mut tokens);
            cjk_run.push(c);
        } else if c.is_alphanumeric() {
            flush_cjk(&mut cjk_run, &mut tokens);
            word.push(c);
        } else {
            flush_word(&mut word, &mut tokens);
            flush_cjk(&mut cjk_run, &mut tokens);
        }
    }
    flush_word(&mut word, &mut tokens);
    flush_cjk(&mut cjk_run, &mut tokens);

    tokens
}

fn flush_word(word: &mut String, tokens: &mut Vec<String>) {
    if word.is_empty() {
        return;
    }
    let term = word.to_lowercase();
    if !is_stop_word(&term) {
        tokens.push(term);
    }
    word.clear();
}

fn flush_cjk(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    match run.len() {
        0 => {}
        1 => tokens.push(run[0].to_string()),
        _ => tokens.extend(run.windows(2).map(|pair| pair.iter().collect::<String>())),
    }
    run.clear();
}
