use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{HashSet, VecDeque};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

use crate::config::TokenizerConfig;
use crate::error::{Error, IoContext, Result};

lazy_static! {
    static ref PUNCT: Regex = Regex::new(r"[[:punct:]]+").expect("valid regex");
    static ref SPACES: Regex = Regex::new(r"\s+").expect("valid regex");
    // Either entirely ASCII or entirely letters.
    static ref VALID: Regex = Regex::new(r"^(?:[[:ascii:]]*|\p{L}+)$").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
}

const ENGLISH: &[&str] = &[
    "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
    "be","because","been","before","being","below","between","both","but","by",
    "can","can't","cannot","could","couldn't",
    "did","didn't","do","does","doesn't","doing","don't","down","during",
    "each","few","for","from","further",
    "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
    "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
    "let's","me","more","most","mustn't","my","myself",
    "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
    "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
    "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
    "under","until","up","very",
    "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
    "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
];

/// Set of lower-cased words the tokenizer drops.
#[derive(Debug, Clone, Default)]
pub struct StopWords(HashSet<String>);

impl StopWords {
    pub fn none() -> Self { Self::default() }

    pub fn english() -> Self { Self::from_words(ENGLISH.iter().copied()) }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        )
    }

    /// Load every `*.txt` list in `dir`, one word per line.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Config(format!("stop-word path is not a directory: {}", dir.display())));
        }
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .at(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("txt"))
            .collect();
        if files.is_empty() {
            return Err(Error::Config(format!("no stop-word files found in {}", dir.display())));
        }
        files.sort();
        let mut words = HashSet::new();
        for file in files {
            let text = std::fs::read_to_string(&file).at(&file)?;
            words.extend(text.lines().map(|l| l.trim().to_lowercase()).filter(|w| !w.is_empty()));
        }
        tracing::info!(dir = %dir.display(), words = words.len(), "loaded stop words");
        Ok(Self(words))
    }

    pub fn contains(&self, token: &str) -> bool { self.0.contains(token) }

    /// The words in sorted order.
    pub fn sorted(&self) -> Vec<String> {
        let mut words: Vec<String> = self.0.iter().cloned().collect();
        words.sort();
        words
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Turns raw text into normalized terms. Holds no mutable state, so a single
/// instance can be shared across parsing threads.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stop_words: Arc<StopWords>,
    config: TokenizerConfig,
}

impl Tokenizer {
    pub fn new(stop_words: StopWords, config: TokenizerConfig) -> Self {
        Self { stop_words: Arc::new(stop_words), config }
    }

    pub fn config(&self) -> &TokenizerConfig { &self.config }

    pub fn stop_words(&self) -> &StopWords { &self.stop_words }

    /// Lazy term sequence over `text`. The returned iterator is `Clone`, and
    /// calling `terms` again yields the same sequence from the start.
    pub fn terms(&self, text: &str) -> Terms<'_> {
        Terms { tokenizer: self, line: self.sanitize(text), pos: 0 }
    }

    /// Lazy term sequence over a reader, one line at a time. Read failures are
    /// yielded as `Err` items.
    pub fn terms_from_reader<R: BufRead>(&self, reader: R) -> ReaderTerms<'_, R> {
        ReaderTerms { tokenizer: self, lines: reader.lines(), pending: VecDeque::new() }
    }

    /// Collect all terms of `text`.
    pub fn tokenize(&self, text: &str) -> Vec<String> { self.terms(text).collect() }

    fn sanitize(&self, text: &str) -> String {
        let normalized: String = if self.config.normalize_unicode {
            text.nfkc().collect()
        } else {
            text.to_string()
        };
        let no_punct = PUNCT.replace_all(&normalized, " ");
        SPACES.replace_all(&no_punct, " ").to_lowercase()
    }

    fn accept(&self, token: &str) -> Option<String> {
        if token.is_empty() || !VALID.is_match(token) || self.stop_words.contains(token) {
            return None;
        }
        if self.config.stem {
            let stem = STEMMER.stem(token);
            if stem.is_empty() { return None; }
            return Some(stem.into_owned());
        }
        Some(token.to_string())
    }
}

/// Iterator returned by [`Tokenizer::terms`].
#[derive(Clone)]
pub struct Terms<'a> {
    tokenizer: &'a Tokenizer,
    line: String,
    pos: usize,
}

impl Iterator for Terms<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while self.pos < self.line.len() {
            let rest = &self.line[self.pos..];
            let end = rest.find(' ').unwrap_or(rest.len());
            let token = &rest[..end];
            self.pos += end + 1;
            if let Some(term) = self.tokenizer.accept(token) {
                return Some(term);
            }
        }
        None
    }
}

/// Iterator returned by [`Tokenizer::terms_from_reader`].
pub struct ReaderTerms<'a, R> {
    tokenizer: &'a Tokenizer,
    lines: std::io::Lines<R>,
    pending: VecDeque<String>,
}

impl<R: BufRead> Iterator for ReaderTerms<'_, R> {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(term) = self.pending.pop_front() {
                return Some(Ok(term));
            }
            match self.lines.next()? {
                Ok(line) => self.pending.extend(self.tokenizer.terms(&line)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
