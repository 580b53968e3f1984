//! Verse markup parser
//!
//! Recursive descent over one `<ab>` subtree. Every element is classified
//! into a [`TagKind`] and dispatched to its handler; anything without a
//! dedicated handler becomes an ordered composite of its element children.

use super::snippet::{HandKey, HandOrder, HandType, Readings, Snippet, FIRSTHAND};
use super::ParseError;
use roxmltree::Node;
use tracing::warn;

/// Structural and paratextual tags that contribute no verse text
const IGNORED_TAGS: &[&str] = &[
    "lb", "cb", "pb", "fw", "pc", "space", "gap", "seg", "note", "num", "unclear", "supplied",
];

/// Tags inside a word whose text is skipped (their tail still belongs to the word)
const WORD_IGNORED_TAGS: &[&str] = &["note", "pc", "seg"];

/// Hand assumed for a correction `<rdg>` that names no hand
const ANONYMOUS_CORRECTOR: &str = "corrector";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Ignored,
    Word,
    Apparatus,
    Container,
}

impl TagKind {
    fn of(tag: &str) -> Self {
        match tag {
            "w" => TagKind::Word,
            "app" => TagKind::Apparatus,
            t if IGNORED_TAGS.contains(&t) => TagKind::Ignored,
            _ => TagKind::Container,
        }
    }
}

/// Parsing context for one verse
///
/// Carries the witness's hand order (needed to resolve `<rdg>` contents) and
/// the verse position for diagnostics.
pub struct VerseParser<'a> {
    order: &'a HandOrder,
    chapter: u32,
    verse: u32,
}

impl<'a> VerseParser<'a> {
    pub fn new(order: &'a HandOrder, chapter: u32, verse: u32) -> Self {
        Self {
            order,
            chapter,
            verse,
        }
    }

    /// Parse an element and everything below it
    pub fn parse(&self, node: Node) -> Result<Snippet, ParseError> {
        match TagKind::of(node.tag_name().name()) {
            TagKind::Ignored => Ok(Snippet::empty()),
            TagKind::Word => Ok(self.parse_word(node)),
            TagKind::Apparatus => self.parse_apparatus(node),
            TagKind::Container => {
                let children = node
                    .children()
                    .filter(Node::is_element)
                    .map(|child| self.parse(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Snippet::Composite(children))
            }
        }
    }

    fn parse_word(&self, node: Node) -> Snippet {
        if node.tail().map_or(false, |t| !t.trim().is_empty()) {
            warn!(
                chapter = self.chapter,
                verse = self.verse,
                word = node.attribute("n").unwrap_or(""),
                "Word has tail text"
            );
        }
        self.read_word(node, true)
    }

    /// Collect a word's text in document order
    ///
    /// Tail text is always taken, since XML attaches the text following a
    /// closing sub-tag to that sub-tag rather than to the enclosing word.
    fn read_word(&self, node: Node, top: bool) -> Snippet {
        let tag = node.tag_name().name();

        if tag == "w" && !top {
            if node.attribute("n").map_or(false, |n| !n.is_empty()) {
                warn!(chapter = self.chapter, verse = self.verse, "Nested <w> tags");
            }
            return Snippet::empty();
        }

        let mut parts = Vec::new();

        if !WORD_IGNORED_TAGS.contains(&tag) {
            if let Some(text) = node.text() {
                let text = text.trim().to_lowercase();
                // "om" marks a scribal omission
                if text == "om" {
                    parts.push(Snippet::fragment(""));
                } else {
                    parts.push(Snippet::fragment(text));
                }
            }

            if tag == "gap" {
                parts.push(Snippet::fragment(" "));
            }

            for child in node.children().filter(Node::is_element) {
                parts.push(self.read_word(child, false));
            }
        }

        if let Some(tail) = node.tail() {
            parts.push(Snippet::fragment(tail.trim().to_lowercase()));
        }

        if top {
            parts.push(Snippet::fragment(" "));
        }

        Snippet::Composite(parts)
    }

    /// An `<app>` becomes one leaf holding each `<rdg>`'s resolved text
    fn parse_apparatus(&self, node: Node) -> Result<Snippet, ParseError> {
        let mut readings = Readings::new(true);

        for child in node.children().filter(Node::is_element) {
            let tag = child.tag_name().name();
            if IGNORED_TAGS.contains(&tag) {
                continue;
            }
            if tag != "rdg" {
                return Err(ParseError::UnexpectedInApparatus {
                    tag: tag.to_string(),
                    chapter: self.chapter,
                    verse: self.verse,
                });
            }

            let content = self.parse(child)?;
            let text = content.get_text(&HandKey::firsthand(), self.order)?;

            let hand = child
                .attribute("hand")
                .map(|h| if h == "*" { FIRSTHAND } else { h });
            let kind = child.attribute("type");

            let key = match (hand, kind) {
                (Some(hand), Some(kind)) => HandKey::new(hand, HandType::parse(kind)),
                (None, None) if text.is_empty() => {
                    warn!(chapter = self.chapter, verse = self.verse, "Empty <rdg> tag");
                    continue;
                }
                (None, Some("orig")) => {
                    warn!(chapter = self.chapter, verse = self.verse, "Assuming <rdg> without hand is firsthand");
                    HandKey::firsthand()
                }
                (None, Some("corr")) => {
                    warn!(
                        chapter = self.chapter,
                        verse = self.verse,
                        "Assuming <rdg> without hand is {}",
                        ANONYMOUS_CORRECTOR
                    );
                    HandKey::new(ANONYMOUS_CORRECTOR, HandType::Corr)
                }
                (None, kind) => {
                    return Err(ParseError::MissingReadingHand {
                        kind: kind.map(str::to_string),
                        chapter: self.chapter,
                        verse: self.verse,
                    })
                }
                (Some(hand), None) => {
                    return Err(ParseError::MissingReadingType {
                        hand: hand.to_string(),
                        chapter: self.chapter,
                        verse: self.verse,
                    })
                }
            };

            readings.add(text, key);
        }

        Ok(Snippet::Leaf(readings))
    }
}
