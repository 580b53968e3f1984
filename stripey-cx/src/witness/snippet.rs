//! Recursive text composites
//!
//! A verse is parsed into a tree of [`Snippet`]s. Leaves hold one text
//! fragment per (hand, hand type); composites hold ordered children. Text for
//! a given hand is resolved at every leaf independently, then concatenated
//! outward, so a correction deep inside one word does not disturb the rest of
//! the verse.

use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// The hand that first wrote the manuscript
pub const FIRSTHAND: &str = "firsthand";

/// Manuscript-specific final-nu abbreviation glyph
const FINAL_NU_GLYPH: char = '¯';

/// Kind of intervention a reading records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandType {
    /// First writing
    Orig,
    /// Correction
    Corr,
    /// Alternative reading by the same corrector
    Alt,
    /// Any other type value found in the markup
    Other(String),
    /// A (hand, type) pair recurring within one apparatus entry
    Dup(Box<HandType>),
}

impl HandType {
    pub fn parse(value: &str) -> Self {
        if let Some(inner) = value.strip_suffix(":dup") {
            return HandType::Dup(Box::new(HandType::parse(inner)));
        }
        match value {
            "orig" => HandType::Orig,
            "corr" => HandType::Corr,
            "alt" => HandType::Alt,
            other => HandType::Other(other.to_string()),
        }
    }

    fn dup(self) -> Self {
        HandType::Dup(Box::new(self))
    }
}

impl fmt::Display for HandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandType::Orig => write!(f, "orig"),
            HandType::Corr => write!(f, "corr"),
            HandType::Alt => write!(f, "alt"),
            HandType::Other(s) => write!(f, "{}", s),
            HandType::Dup(inner) => write!(f, "{}:dup", inner),
        }
    }
}

/// A (hand name, hand type) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandKey {
    pub name: String,
    pub kind: HandType,
}

impl HandKey {
    pub fn new(name: impl Into<String>, kind: HandType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn firsthand() -> Self {
        Self::new(FIRSTHAND, HandType::Orig)
    }

    pub fn is_firsthand(&self) -> bool {
        self.name == FIRSTHAND
    }

    /// Label used when storing the resolved text
    ///
    /// "firsthand" for the original writing, "firsthand(corr)" etc. for the
    /// first scribe's own changes, and the bare name for every other hand.
    pub fn display_label(&self) -> String {
        if self.is_firsthand() {
            match self.kind {
                HandType::Orig => FIRSTHAND.to_string(),
                ref kind => format!("{}({})", FIRSTHAND, kind),
            }
        } else {
            self.name.clone()
        }
    }
}

impl fmt::Display for HandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.kind)
    }
}

/// Canonical precedence of the hands declared by one witness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandOrder(Vec<String>);

impl HandOrder {
    /// Build from declared hand names; firsthand is implied at the front if absent
    pub fn new(declared: Vec<String>) -> Self {
        let mut hands = declared;
        if !hands.iter().any(|h| h == FIRSTHAND) {
            hands.insert(0, FIRSTHAND.to_string());
        }
        Self(hands)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|h| h == name)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl Default for HandOrder {
    fn default() -> Self {
        Self(vec![FIRSTHAND.to_string()])
    }
}

/// Hand resolution failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandResolutionError {
    /// The requested hand is not in the witness's hand order
    #[error("Hand '{hand}' is not declared (hand order: {order:?})")]
    UndeclaredHand { hand: String, order: Vec<String> },

    /// The fallback chain found no earlier hand with text at this point
    #[error("No reading for {requested} or any earlier hand (present: {present:?})")]
    Unresolved {
        requested: String,
        present: Vec<String>,
    },
}

/// Text fragments keyed by hand, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readings {
    entries: Vec<(HandKey, String)>,
    /// Prefix the resolved text with a word separator
    separated: bool,
}

impl Readings {
    pub fn new(separated: bool) -> Self {
        Self {
            entries: Vec::new(),
            separated,
        }
    }

    /// Add a reading; a repeated (hand, type) is re-keyed as `type:dup`
    pub fn add(&mut self, text: impl Into<String>, key: HandKey) {
        let mut key = key;
        while self.contains(&key) {
            key.kind = key.kind.dup();
        }
        self.entries.push((key, text.into()));
    }

    pub fn get(&self, key: &HandKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, text)| text.as_str())
    }

    pub fn contains(&self, key: &HandKey) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &HandKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn first_for_hand(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.name == name)
            .map(|(_, text)| text.as_str())
    }

    /// Raw text for `key`, walking the fallback chain when it is absent
    ///
    /// The first scribe's alternative falls back to their correction, and a
    /// correction to the original. Any other hand takes the text of the most
    /// recent earlier hand present here, so a correction stands until a later
    /// one supersedes it.
    fn resolve(&self, key: &HandKey, order: &HandOrder) -> Result<&str, HandResolutionError> {
        if let Some(text) = self.get(key) {
            return Ok(text);
        }

        if key.is_firsthand() {
            match key.kind {
                HandType::Alt => return self.resolve(&HandKey::new(FIRSTHAND, HandType::Corr), order),
                HandType::Corr => return self.resolve(&HandKey::firsthand(), order),
                _ => {}
            }
        }

        let hand_idx = order
            .position(&key.name)
            .ok_or_else(|| HandResolutionError::UndeclaredHand {
                hand: key.name.clone(),
                order: order.names().to_vec(),
            })?;

        let earlier: Vec<&str> = order.names()[..hand_idx]
            .iter()
            .rev()
            .map(String::as_str)
            .collect();
        let candidates = if earlier.is_empty() {
            vec![FIRSTHAND]
        } else {
            earlier
        };

        for hand in candidates {
            if hand == FIRSTHAND {
                let found = self
                    .get(&HandKey::new(FIRSTHAND, HandType::Corr))
                    .or_else(|| self.get(&HandKey::firsthand()))
                    .or_else(|| self.first_for_hand(FIRSTHAND));
                if let Some(text) = found {
                    return Ok(text);
                }
            } else if let Some(text) = self.first_for_hand(hand) {
                return Ok(text);
            }
        }

        Err(HandResolutionError::Unresolved {
            requested: key.to_string(),
            present: self.keys().map(|k| k.to_string()).collect(),
        })
    }
}

/// A verse or a sub-part of a verse
///
/// Either a leaf of per-hand readings or an ordered list of children, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snippet {
    Leaf(Readings),
    Composite(Vec<Snippet>),
}

impl Snippet {
    /// A snippet contributing nothing
    pub fn empty() -> Self {
        Snippet::Composite(Vec::new())
    }

    /// A firsthand fragment inside a word (no separator)
    pub fn fragment(text: impl Into<String>) -> Self {
        let mut readings = Readings::new(false);
        readings.add(text, HandKey::firsthand());
        Snippet::Leaf(readings)
    }

    /// All (hand, type) pairs found anywhere below this snippet
    pub fn hands(&self) -> BTreeSet<HandKey> {
        let mut all = BTreeSet::new();
        self.collect_hands(&mut all);
        all
    }

    fn collect_hands(&self, all: &mut BTreeSet<HandKey>) {
        match self {
            Snippet::Leaf(readings) => all.extend(readings.keys().cloned()),
            Snippet::Composite(children) => {
                for child in children {
                    child.collect_hands(all);
                }
            }
        }
    }

    /// Resolve the composite text for one hand
    pub fn get_text(&self, key: &HandKey, order: &HandOrder) -> Result<String, HandResolutionError> {
        match self {
            Snippet::Composite(children) => {
                let mut text = String::new();
                for child in children {
                    text.push_str(&child.get_text(key, order)?);
                }
                Ok(post_process(&text))
            }
            Snippet::Leaf(readings) if readings.is_empty() => Ok(String::new()),
            Snippet::Leaf(readings) => {
                let text = post_process(readings.resolve(key, order)?);
                if readings.separated {
                    Ok(format!(" {}", text))
                } else {
                    Ok(text)
                }
            }
        }
    }
}

/// Normalize the final-nu glyph and collapse repeated spaces
pub fn post_process(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        let c = if c == FINAL_NU_GLYPH { 'ν' } else { c };
        if c == ' ' {
            if last_space {
                continue;
            }
            last_space = true;
        } else {
            last_space = false;
        }
        out.push(c);
    }
    out
}
