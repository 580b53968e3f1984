//! Manuscript documents
//!
//! One TEI document per witness: metadata, declared hand order, and the
//! parsed chapters and verses.

use super::parser::VerseParser;
use super::snippet::{HandKey, HandOrder, HandResolutionError, Snippet};
use super::ParseError;
use roxmltree::{Document, Node, ParsingOptions};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A resolved verse text and the label of the hand that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerseText {
    pub hand: String,
    pub text: String,
}

/// One occurrence of a verse in a manuscript
#[derive(Debug, Clone)]
pub struct Verse {
    pub chapter: u32,
    pub num: u32,
    pub snippet: Snippet,
}

impl Verse {
    /// Resolved text for every hand attested in the verse
    ///
    /// Hands are returned in hand order. Texts that resolve to nothing are
    /// omitted.
    pub fn get_texts(&self, order: &HandOrder) -> Result<Vec<VerseText>, HandResolutionError> {
        let mut hands: Vec<HandKey> = self.snippet.hands().into_iter().collect();
        hands.sort_by_key(|k| (order.position(&k.name).unwrap_or(usize::MAX), k.kind.clone()));

        let mut texts = Vec::new();
        for key in hands {
            let text = self.snippet.get_text(&key, order)?;
            let text = text.trim();
            if !text.is_empty() {
                texts.push(VerseText {
                    hand: key.display_label(),
                    text: text.to_string(),
                });
            }
        }
        Ok(texts)
    }
}

/// A chapter and its verses
///
/// A verse number may occur more than once in commentary manuscripts; every
/// occurrence is kept in document order.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub num: u32,
    pub verses: BTreeMap<u32, Vec<Verse>>,
}

/// A parsed witness document
#[derive(Debug, Clone)]
pub struct Manuscript {
    pub name: String,
    /// Book name from `<title type="short">`
    pub book: Option<String>,
    /// Book number from `<title type="work" n="..">`
    pub book_num: Option<i64>,
    /// `ms_name` plus one entry per `<altIdentifier type="..">`
    pub ms_desc: BTreeMap<String, String>,
    pub order_of_hands: HandOrder,
    pub chapters: BTreeMap<u32, Chapter>,
}

impl Manuscript {
    /// Read and parse a manuscript file
    pub fn from_file(name: &str, path: &Path) -> Result<Self, ParseError> {
        info!("Parsing {}", path.display());
        let xml = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(name, &xml)
    }

    /// Parse a manuscript from its XML text
    pub fn parse(name: &str, xml: &str) -> Result<Self, ParseError> {
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let doc = Document::parse_with_options(xml, options)?;

        let mut ms = Manuscript {
            name: name.to_string(),
            book: None,
            book_num: None,
            ms_desc: BTreeMap::new(),
            order_of_hands: HandOrder::default(),
            chapters: BTreeMap::new(),
        };

        ms.parse_metadata(&doc)?;
        info!(
            witness = %ms.name,
            "{} hands defined: {}",
            ms.order_of_hands.names().len(),
            ms.order_of_hands.names().join(", ")
        );

        for div in doc
            .descendants()
            .filter(|n| is_tag(n, "div") && n.attribute("type") == Some("chapter"))
        {
            ms.parse_chapter(div)?;
        }

        debug!("Finished parsing {}", ms.name);
        Ok(ms)
    }

    fn parse_metadata(&mut self, doc: &Document) -> Result<(), ParseError> {
        if let Some(ms_name) = doc.descendants().find(|n| is_tag(n, "msName")) {
            self.ms_desc
                .insert("ms_name".to_string(), ms_name.text().unwrap_or("").trim().to_string());
        }

        for alt in doc.descendants().filter(|n| is_tag(n, "altIdentifier")) {
            let kind = alt.attribute("type").ok_or(ParseError::MissingIdentifierType)?;
            let idno = alt
                .children()
                .find(|c| is_tag(c, "idno"))
                .and_then(|c| c.text())
                .unwrap_or("")
                .trim();
            self.ms_desc.insert(kind.to_string(), idno.to_string());
        }

        for title in doc.descendants().filter(|n| is_tag(n, "title")) {
            match title.attribute("type") {
                Some("short") => {
                    self.book = title.text().map(|t| t.trim().to_string());
                    info!("Detected book: {:?}", self.book);
                }
                Some("work") => {
                    self.book_num = title.attribute("n").and_then(leading_digits_number);
                }
                _ => {}
            }
        }

        let declared: Vec<String> = doc
            .descendants()
            .filter(|n| is_tag(n, "listWit"))
            .flat_map(|list| list.children().filter(|c| is_tag(c, "witness")))
            .filter_map(|w| w.attribute((XML_NAMESPACE, "id")))
            .map(str::to_string)
            .collect();
        self.order_of_hands = HandOrder::new(declared);

        Ok(())
    }

    /// Add the verses of one chapter container; repeats extend the chapter
    fn parse_chapter(&mut self, div: Node) -> Result<(), ParseError> {
        let raw = div.attribute("n").ok_or_else(|| ParseError::MissingNumber {
            element: "div".to_string(),
        })?;
        let num = composite_number(raw, 'K')?;

        if self.chapters.contains_key(&num) {
            debug!("Duplicate chapter {} - adding verses", num);
        } else {
            debug!("Found chapter {}", num);
        }

        let mut verses = Vec::new();
        for ab in div.children().filter(|c| is_tag(c, "ab")) {
            let raw = ab.attribute("n").ok_or_else(|| ParseError::MissingNumber {
                element: "ab".to_string(),
            })?;
            let verse_num = composite_number(raw, 'V')?;
            let snippet = VerseParser::new(&self.order_of_hands, num, verse_num).parse(ab)?;
            verses.push(Verse {
                chapter: num,
                num: verse_num,
                snippet,
            });
        }

        let chapter = self.chapters.entry(num).or_insert_with(|| Chapter {
            num,
            verses: BTreeMap::new(),
        });
        for verse in verses {
            chapter.verses.entry(verse.num).or_default().push(verse);
        }

        Ok(())
    }
}

fn is_tag(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

/// Trailing number of a composite reference
///
/// "B04K12" with marker 'K' gives 12, "B04K12V17" with 'V' gives 17. Plain
/// numbers are taken as they are.
fn composite_number(raw: &str, marker: char) -> Result<u32, ParseError> {
    let tail = if raw.starts_with('B') {
        raw.rsplit(marker).next().unwrap_or(raw)
    } else {
        raw
    };
    tail.trim()
        .parse()
        .map_err(|_| ParseError::BadNumber(raw.to_string()))
}

fn leading_digits_number(raw: &str) -> Option<i64> {
    raw.trim_start_matches(|c: char| !c.is_ascii_digit()).parse().ok()
}
